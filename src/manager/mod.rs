//! The bond manager
//!
//! A [`BondManager`] is the policy engine that ties the record store, the pairing queue, and the
//! address resolver together. It is driven entirely by events. Every `on_*` method processes one
//! event from the link layer, the Security Manager, or the GATT client and runs to completion, all
//! outgoing requests are made through the collaborator traits of the [`host`](crate::host) module.
//!
//! # Pairing
//! Pairing requests are queued in the pairing queue and started one at a time. When pairing
//! completes with bonding, the keys are saved to the record store and the resolving list is
//! rebuilt. If GATT discovery is enabled the peer's Central Address Resolution and Resolvable
//! Private Address Only characteristics are read after bonding.
//!
//! The application is told about the progress of pairing through
//! [`Application::pairing_state_changed`](crate::host::Application::pairing_state_changed). The
//! result of pairing and whether the bond was saved are reported separately, a pairing can
//! succeed but its bond may still fail to be saved.
//!
//! # Reconnecting
//! When a link is established with a bonded peer the link layer is given the bonded long term key,
//! the characteristic configuration of the peer is restored, and any pending Service Changed
//! indication is sent.
//!
//! # Deferred Actions
//! Bonds are only erased while there are no links and the resolving list and white list are only
//! changed while the link layer is idle. Requests for these actions are deferred until their
//! preconditions are met (see [`on_transport_idle`](BondManager::on_transport_idle)).

pub mod deferred;
pub mod link;

use crate::address::{AddressType, BluetoothDeviceAddress};
use crate::config::{BondConfig, PairingMode};
use crate::host::{
    AuthRequirements, AuthState, AuthenticationComplete, BondHost, ConnectionHandle, IdentityInfo,
    PairingFailedReason, PairingPhase, PairingRequest, PairingStatus, PasscodeRequest, Role, SecurityLevel,
};
use crate::queue::{PairingQueue, PairingState};
use crate::record::{BondRecord, CharConfig, StateFlags};
use crate::resolver::{AddressResolver, Rebuild, ResolvingListEntry};
use crate::store::{NvStorage, RecordStore};
use crate::Error;
use deferred::{DeferredAction, DeferredActions};
use link::{LinkInfo, LinkSecurity, SecurityAction};

/// The bond manager
///
/// `N` is the number of bond record slots.
pub struct BondManager<S, H, const N: usize> {
    config: BondConfig,
    store: RecordStore<S, N>,
    resolver: AddressResolver,
    queue: PairingQueue,
    links: Vec<LinkInfo>,
    deferred: DeferredActions,
    host: H,
    placeholder_counter: u64,
}

impl<S, H, const N: usize> BondManager<S, H, N>
where
    S: NvStorage,
    H: BondHost,
{
    /// Create a new `BondManager`
    ///
    /// The bonds are loaded from `storage` and the resolving list (and white list if it is synced)
    /// is rebuilt from them once the link layer is idle.
    pub fn new(config: BondConfig, storage: S, host: H) -> Result<Self, Error> {
        let store = RecordStore::init(storage, config.is_lru_eviction_enabled())?;

        let (local_identity, local_identity_type) = config.local_identity();

        let resolver = AddressResolver::new(
            config.local_irk(),
            local_identity,
            local_identity_type,
            config.resolving_list_size(),
        );

        let queue = PairingQueue::new(config.max_pending_pairings());

        let mut manager = BondManager {
            config,
            store,
            resolver,
            queue,
            links: Vec::new(),
            deferred: DeferredActions::new(),
            host,
            placeholder_counter: 0,
        };

        manager.schedule_list_updates();

        manager.run_deferred();

        Ok(manager)
    }

    fn link_index(&self, connection: ConnectionHandle) -> Result<usize, Error> {
        self.links
            .iter()
            .position(|link| link.connection == connection)
            .ok_or(Error::UnknownConnection)
    }

    fn notify(&mut self, connection: ConnectionHandle, phase: PairingPhase, status: PairingStatus) {
        log::debug!("(BM) {} pairing state {:?}: {:?}", connection, phase, status);

        self.host.pairing_state_changed(connection, phase, status)
    }

    fn schedule_list_updates(&mut self) {
        self.deferred.schedule(DeferredAction::RebuildResolvingList);

        if self.config.is_white_list_synced() {
            self.deferred.schedule(DeferredAction::SyncWhiteList);
        }
    }

    /// The security level of the bonded keys for a link
    ///
    /// `None` is returned if the peer is not bonded or there is no key for the role of the link.
    fn bonded_level(&self, index: usize) -> Option<SecurityLevel> {
        let link = &self.links[index];

        let record = self.store.get(link.slot?)?;

        record.ltk_for(link.role).map(|_| record.security_level())
    }

    /// Give the link layer the bonded long term key of a link
    fn encrypt_with_bond(&mut self, index: usize) -> bool {
        let link = &self.links[index];

        let Some(record) = link.slot.and_then(|slot| self.store.get(slot)) else {
            return false;
        };

        let Some(ltk) = record.ltk_for(link.role) else {
            log::warn!("(BM) bond for {} has no long term key for the {:?} role", record.address, link.role);

            return false;
        };

        let connection = link.connection;
        let level = record.security_level();
        let authenticated = record.flags.contains(StateFlags::AUTHENTICATED);
        let secure_connections = record.flags.contains(StateFlags::SECURE_CONNECTIONS);

        log::trace!("(BM) encrypting {} with key {:032x}", connection, ltk.key);

        self.host
            .start_encryption(connection, &ltk, authenticated, secure_connections);

        self.links[index].pending_key_level = Some(level);

        true
    }

    fn queue_pairing(&mut self, index: usize, pairing_request: Option<PairingRequest>) -> Result<(), Error> {
        let link = &self.links[index];

        match self.queue.enqueue(link.connection, link.address_type, pairing_request) {
            Ok(()) => {
                self.deferred.schedule(DeferredAction::StartNextPairing);

                Ok(())
            }
            Err(Error::InvalidParameter) => {
                log::debug!("(BM) pairing for {} is already queued", link.connection);

                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Process a newly established link
    ///
    /// If the peer is bonded the link layer is given the long term key for encrypting the link,
    /// the characteristic configuration of the peer is restored, and a pending Service Changed
    /// indication is sent.
    ///
    /// When the pairing mode is [`Initiate`](PairingMode::Initiate) a central queues pairing
    /// unless the peer is bonded and a peripheral always sends a security request.
    pub fn on_link_established(
        &mut self,
        connection: ConnectionHandle,
        address: BluetoothDeviceAddress,
        address_type: AddressType,
        role: Role,
    ) -> Result<(), Error> {
        if self.link_index(connection).is_ok() {
            return Err(Error::InvalidParameter);
        }

        let slot = self.store.find_by_address(&address, address_type);

        log::info!(
            "(BM) link {} established with {} ({}) as {:?}, bonded: {}",
            connection,
            address,
            address_type,
            role,
            slot.is_some()
        );

        self.links
            .push(LinkInfo::new(connection, address, address_type, role, slot));

        let index = self.links.len() - 1;

        if let Some(slot) = slot {
            if let Err(e) = self.store.touch(slot) {
                log::warn!("(BM) failed to update LRU order: {}", e);
            }

            self.encrypt_with_bond(index);

            self.restore_bonded_state(connection, slot);
        }

        if self.config.pairing_mode() == PairingMode::Initiate {
            match role {
                Role::Central if slot.is_none() => self.queue_pairing(index, None)?,
                Role::Central => (),
                Role::Peripheral => self
                    .host
                    .send_security_request(connection, self.config.auth_requirements()),
            }
        }

        self.run_deferred();

        Ok(())
    }

    /// Restore the characteristic configuration and send a pending Service Changed indication
    fn restore_bonded_state(&mut self, connection: ConnectionHandle, slot: u8) {
        let Some(record) = self.store.get(slot) else {
            return;
        };

        let char_config: Vec<CharConfig> = record
            .char_config
            .iter()
            .copied()
            .filter(CharConfig::is_used)
            .collect();

        let flags = record.flags;

        self.host.restore_client_config(connection, &char_config);

        if flags.contains(StateFlags::SERVICE_CHANGED) && self.host.send_service_changed(connection) {
            if let Err(e) = self.store.set_flags(slot, flags - StateFlags::SERVICE_CHANGED) {
                log::warn!("(BM) failed to clear the Service Changed flag: {}", e);
            }
        }
    }

    /// Process the termination of a link
    ///
    /// Any pairing of the link is cancelled. Erasing of bonds that was deferred runs once the last
    /// link is terminated.
    pub fn on_link_terminated(&mut self, connection: ConnectionHandle) -> Result<(), Error> {
        let index = self.link_index(connection)?;

        self.links.remove(index);

        if let Some(node) = self.queue.end(connection) {
            log::info!("(BM) pairing of {} cancelled in state {:?}", connection, node.state);

            self.deferred.schedule(DeferredAction::StartNextPairing);
        }

        log::info!("(BM) link {} terminated", connection);

        self.run_deferred();

        Ok(())
    }

    /// Process a pairing request received from the central (peripheral role)
    ///
    /// The request is refused when pairing is disabled, otherwise pairing is queued.
    pub fn on_pairing_request(
        &mut self,
        connection: ConnectionHandle,
        address_type: AddressType,
        pairing_request: PairingRequest,
    ) -> Result<(), Error> {
        let index = self.link_index(connection)?;

        if self.config.pairing_mode() == PairingMode::NoPairing {
            log::info!("(BM) pairing request from {} refused, pairing is disabled", connection);

            self.host
                .terminate_authentication(connection, PairingFailedReason::PairingNotSupported);

            return Ok(());
        }

        self.links[index].address_type = address_type;

        if let Err(e) = self.queue_pairing(index, Some(pairing_request)) {
            self.host
                .terminate_authentication(connection, PairingFailedReason::UnspecifiedReason);

            return Err(e);
        }

        self.run_deferred();

        Ok(())
    }

    /// Satisfy a request for the security level `requested` on a link
    fn satisfy_security(&mut self, index: usize, requested: SecurityLevel) -> Result<(), Error> {
        let link = &self.links[index];

        let action = link.security.decide(requested, self.bonded_level(index));

        log::debug!("(BM) {:?} security requested for {}: {:?}", requested, link.connection, action);

        match action {
            SecurityAction::None | SecurityAction::Wait => Ok(()),
            SecurityAction::Encrypt => {
                self.encrypt_with_bond(index);

                Ok(())
            }
            SecurityAction::Pair if self.config.pairing_mode() == PairingMode::NoPairing => {
                self.host
                    .terminate_authentication(link.connection, PairingFailedReason::PairingNotSupported);

                Ok(())
            }
            SecurityAction::Pair => self.queue_pairing(index, None),
        }
    }

    /// Process a security request from the peripheral (central role)
    ///
    /// If the bond with the peer is at least at the requested security level the link is encrypted
    /// with the bonded keys, otherwise the peer is paired again.
    pub fn on_slave_security_request(
        &mut self,
        connection: ConnectionHandle,
        auth_req: AuthRequirements,
    ) -> Result<(), Error> {
        let index = self.link_index(connection)?;

        if self.links[index].role != Role::Central {
            return Err(Error::InvalidParameter);
        }

        self.satisfy_security(index, auth_req.security_level())?;

        self.run_deferred();

        Ok(())
    }

    /// Raise the security of a link to the level of the configured authentication requirements
    ///
    /// A central encrypts the link (or pairs) and a peripheral sends a security request.
    pub fn request_security(&mut self, connection: ConnectionHandle) -> Result<(), Error> {
        let index = self.link_index(connection)?;

        let auth_req = self.config.auth_requirements();

        match self.links[index].role {
            Role::Central => self.satisfy_security(index, auth_req.security_level())?,
            Role::Peripheral => self.host.send_security_request(connection, auth_req),
        }

        self.run_deferred();

        Ok(())
    }

    /// Pair with the peer of a link
    ///
    /// A central queues pairing even when the peer is bonded. A peripheral sends a security
    /// request as only the central can start pairing.
    pub fn pair(&mut self, connection: ConnectionHandle) -> Result<(), Error> {
        let index = self.link_index(connection)?;

        if self.config.pairing_mode() == PairingMode::NoPairing {
            return Err(Error::InvalidParameter);
        }

        match self.links[index].role {
            Role::Central => self.queue_pairing(index, None)?,
            Role::Peripheral => self
                .host
                .send_security_request(connection, self.config.auth_requirements()),
        }

        self.run_deferred();

        Ok(())
    }

    /// Start queued pairings
    ///
    /// A pairing that the Security Manager refuses to start is ended and the next one is tried.
    fn start_next_pairing(&mut self) {
        while let Some((connection, pairing_request)) = self.queue.pop_and_start_next() {
            let Ok(index) = self.link_index(connection) else {
                self.queue.end(connection);
                continue;
            };

            let link = &mut self.links[index];

            let before = link.security.level();

            link.security = LinkSecurity::Authenticating(before);

            let requirements = self.config.security_requirements(link.role);

            self.notify(connection, PairingPhase::Started, PairingStatus::Success);

            match self
                .host
                .authenticate(connection, &requirements, pairing_request.as_ref())
            {
                Ok(()) => break,
                Err(reason) => {
                    log::warn!("(BM) failed to start pairing for {}: {}", connection, reason);

                    self.queue.end(connection);

                    self.links[index].security = self.links[index].security.after_failed_pairing();

                    self.notify(connection, PairingPhase::Complete, PairingStatus::Failed(reason));
                }
            }
        }
    }

    /// Process the completion of pairing
    ///
    /// The application is always notified of the result of pairing. If the pairing was bonded,
    /// the bond is saved and the application is notified of whether it was saved. A failed
    /// pairing ends the pairing node of the link and the next queued pairing is started.
    pub fn on_authentication_complete(
        &mut self,
        connection: ConnectionHandle,
        complete: AuthenticationComplete,
    ) -> Result<(), Error> {
        let index = match self.link_index(connection) {
            Ok(index) => index,
            Err(e) => {
                self.queue.end(connection);
                return Err(e);
            }
        };

        if self.queue.state(connection) != Some(PairingState::IsPairing) {
            log::warn!("(BM) authentication of {} completed without being started", connection);
        }

        self.deferred.schedule(DeferredAction::StartNextPairing);

        if let Err(reason) = complete.status {
            log::info!("(BM) pairing of {} failed: {}", connection, reason);

            self.queue.end(connection);

            self.links[index].security = self.links[index].security.after_failed_pairing();

            self.notify(connection, PairingPhase::Complete, PairingStatus::Failed(reason));

            self.run_deferred();

            return Ok(());
        }

        let level = complete.auth_state.security_level();

        self.links[index].security = LinkSecurity::Encrypted(level);

        self.links[index].pending_key_level = None;

        log::info!("(BM) pairing of {} complete at {:?}", connection, level);

        self.notify(connection, PairingPhase::Complete, PairingStatus::Success);

        let bonded = complete.auth_state.contains(AuthState::BONDING) && self.config.is_bonding_enabled();

        let saved = if bonded {
            match self.save_bond(index, &complete) {
                Ok(slot) => {
                    log::info!("(BM) bond of {} saved in slot {}", connection, slot);

                    self.notify(connection, PairingPhase::BondSaved, PairingStatus::Success);

                    true
                }
                Err(e) => {
                    log::error!("(BM) bond of {} not saved: {}", connection, e);

                    self.notify(connection, PairingPhase::BondSaved, PairingStatus::NotSaved(e));

                    false
                }
            }
        } else {
            false
        };

        let discovery = saved && self.config.is_gatt_discovery_enabled();

        if self.queue.advance_after_auth_complete(connection, discovery) == Some(PairingState::WaitingCarRead) {
            self.read_discovery_characteristic(connection);
        }

        self.run_deferred();

        Ok(())
    }

    /// Get the identity address to store for the peer of a link
    ///
    /// Identity information distributed during bonding is preferred. An all zero identity address
    /// is replaced with a static random address that is not the identity of any stored bond.
    /// Without identity information the identity of the bond found when the link was established
    /// is used and otherwise the over the air address.
    fn derive_identity(&mut self, index: usize, identity: Option<&IdentityInfo>) -> (BluetoothDeviceAddress, AddressType) {
        let link = &self.links[index];

        match identity {
            Some(info) if !info.address.is_zeroed() => (info.address, info.address_type.base()),
            Some(_) => loop {
                self.placeholder_counter = self.placeholder_counter.wrapping_add(1);

                let placeholder = BluetoothDeviceAddress::new_static_random(self.placeholder_counter);

                if !self.store.contains_identity(&placeholder, AddressType::Random) {
                    log::warn!(
                        "(BM) peer of {} distributed an all zero identity address, using {}",
                        link.connection,
                        placeholder
                    );

                    break (placeholder, AddressType::Random);
                }
            },
            None => match link.slot.and_then(|slot| self.store.get(slot)) {
                Some(record) => (record.address, record.address_type),
                None => (link.address, link.address_type.base()),
            },
        }
    }

    fn save_bond(&mut self, index: usize, complete: &AuthenticationComplete) -> Result<u8, Error> {
        let (address, address_type) = self.derive_identity(index, complete.identity.as_ref());

        let mut record = BondRecord::new(address, address_type);

        record
            .flags
            .set(StateFlags::AUTHENTICATED, complete.auth_state.contains(AuthState::AUTHENTICATED));

        record.flags.set(
            StateFlags::SECURE_CONNECTIONS,
            complete.auth_state.contains(AuthState::SECURE_CONNECTIONS),
        );

        record.local_ltk = complete.local_ltk;
        record.peer_ltk = complete.peer_ltk;
        record.peer_irk = complete.identity.map(|info| info.irk).unwrap_or_default();

        #[cfg(feature = "signing")]
        {
            record.peer_signing = complete.signing;
        }

        let connection = self.links[index].connection;

        // slots of other active links are never evicted
        let in_use: Vec<u8> = self
            .links
            .iter()
            .filter(|link| link.connection != connection)
            .filter_map(|link| link.slot)
            .collect();

        let added = match self.store.add_excluding(record, |slot| in_use.contains(&slot)) {
            Ok(added) => added,
            Err(e) => {
                // a failed write can leave the reused slot empty
                for link in self.links.iter_mut() {
                    if link.slot.map_or(false, |slot| self.store.get(slot).is_none()) {
                        link.slot = None;
                    }
                }

                self.schedule_list_updates();

                return Err(e);
            }
        };

        if let Some(old) = added.superseded.as_ref() {
            if old.has_irk() {
                self.resolver.remove_peer(old.address_type, &old.address);
            }
        }

        self.links[index].slot = Some(added.slot);

        self.schedule_list_updates();

        Ok(added.slot)
    }

    /// Read the characteristic of the current GATT discovery state
    ///
    /// A read that cannot be sent is handled as if the characteristic was not found.
    fn read_discovery_characteristic(&mut self, connection: ConnectionHandle) {
        let Some(uuid) = self.queue.state(connection).and_then(PairingState::characteristic_uuid) else {
            return;
        };

        if !self.host.read_by_uuid(connection, uuid) {
            log::debug!("(BM) failed to send read of {:#06x} to {}", uuid, connection);

            self.finish_discovery_step(connection, None);
        }
    }

    /// Save the result of a GATT discovery step and continue to the next step
    ///
    /// `value` is `None` when the characteristic was not found. The flag of a characteristic that
    /// was not found is cleared.
    fn finish_discovery_step(&mut self, connection: ConnectionHandle, value: Option<&[u8]>) {
        let (flag, phase, supported) = match self.queue.state(connection) {
            Some(PairingState::WaitingCarRead) => (
                StateFlags::CENTRAL_ADDRESS_RESOLUTION,
                PairingPhase::CarRead,
                value.and_then(|value| value.first()) == Some(&1),
            ),
            // the presence of this characteristic is what matters
            Some(PairingState::WaitingRpaoRead) => (StateFlags::RPA_ONLY, PairingPhase::RpaoRead, value.is_some()),
            _ => {
                log::trace!("(BM) GATT response for {} not expected", connection);

                return;
            }
        };

        let slot = self
            .link_index(connection)
            .ok()
            .and_then(|index| self.links[index].slot);

        if let Some((slot, mut flags)) = slot.and_then(|slot| self.store.get(slot).map(|record| (slot, record.flags))) {
            flags.set(flag, supported);

            if let Err(e) = self.store.set_flags(slot, flags) {
                log::warn!("(BM) failed to save the {:?} flag: {}", flag, e);
            }

            if flag == StateFlags::RPA_ONLY {
                self.deferred.schedule(DeferredAction::RebuildResolvingList);
            }
        }

        self.notify(connection, phase, PairingStatus::Success);

        if self.queue.advance_after_gatt_step(connection) == Some(PairingState::WaitingRpaoRead) {
            self.read_discovery_characteristic(connection);
        }
    }

    /// Process a GATT read by type response
    ///
    /// `value` is the value of the characteristic read. A response that does not belong to a GATT
    /// discovery step of the link is ignored.
    pub fn on_gatt_read_by_type_response(&mut self, connection: ConnectionHandle, value: &[u8]) {
        self.finish_discovery_step(connection, Some(value));

        self.run_deferred();
    }

    /// Process a GATT error response
    ///
    /// The characteristic of the current GATT discovery step is taken as not found.
    pub fn on_gatt_error_response(&mut self, connection: ConnectionHandle, error_code: u8) {
        log::debug!("(BM) GATT error {:#04x} for {}", error_code, connection);

        self.finish_discovery_step(connection, None);

        self.run_deferred();
    }

    /// Process a change of a client characteristic configuration by the peer
    ///
    /// The configuration is saved in the peer's bond record so it can be restored when the peer
    /// reconnects. False is returned when the record has no room for the configuration.
    pub fn on_client_config_updated(
        &mut self,
        connection: ConnectionHandle,
        handle: u16,
        value: u16,
    ) -> Result<bool, Error> {
        let index = self.link_index(connection)?;

        let slot = self.links[index].slot.ok_or(Error::NotBonded)?;

        let saved = self.store.update_char_config(slot, handle, value)?;

        if !saved {
            log::warn!("(BM) no room to save configuration of handle {:#06x} for {}", handle, connection);
        }

        Ok(saved)
    }

    /// Process a change of the encryption of a link
    pub fn on_encryption_change(&mut self, connection: ConnectionHandle, enabled: bool) -> Result<(), Error> {
        let index = self.link_index(connection)?;

        let link = &mut self.links[index];

        let key_level = link.pending_key_level.take();

        match (enabled, link.security) {
            (_, LinkSecurity::Authenticating(_)) => (),
            (true, _) => {
                if let Some(level) = key_level {
                    link.security = LinkSecurity::Encrypted(level);

                    self.notify(connection, PairingPhase::Encrypted, PairingStatus::Success);
                }
            }
            (false, _) => link.security = LinkSecurity::NoSecurity,
        }

        Ok(())
    }

    /// Forward a request for a passcode from the Security Manager to the application
    pub fn on_passcode_needed(&mut self, connection: ConnectionHandle, request: PasscodeRequest) -> Result<(), Error> {
        self.link_index(connection)?;

        self.host.passcode_needed(connection, request);

        Ok(())
    }

    /// Relay the application's response to a passcode request to the Security Manager
    ///
    /// `None` rejects the passcode request.
    pub fn passcode_response(&mut self, connection: ConnectionHandle, passcode: Option<u32>) -> Result<(), Error> {
        self.link_index(connection)?;

        self.host.passcode_response(connection, passcode);

        Ok(())
    }

    /// Process the link layer becoming idle
    ///
    /// Deferred updates of the resolving list and white list are run.
    pub fn on_transport_idle(&mut self) {
        self.run_deferred();
    }

    /// Erase the bond of an identity
    ///
    /// The bond is erased once there are no active links.
    pub fn erase_bond(&mut self, address: BluetoothDeviceAddress, address_type: AddressType) -> Result<(), Error> {
        if !self.store.contains_identity(&address, address_type) {
            return Err(Error::NotBonded);
        }

        if !self.links.is_empty() {
            log::info!("(BM) erase of bond for {} deferred until there are no links", address);
        }

        self.deferred.schedule(DeferredAction::Erase(address, address_type));

        self.run_deferred();

        Ok(())
    }

    /// Erase every bond
    ///
    /// The bonds are erased once there are no active links.
    pub fn erase_all_bonds(&mut self) {
        if !self.links.is_empty() {
            log::info!("(BM) erase of all bonds deferred until there are no links");
        }

        self.deferred.schedule(DeferredAction::EraseAll);

        self.run_deferred();
    }

    /// Check if erasing bonds is waiting for every link to be terminated
    pub fn is_erase_pending(&self) -> bool {
        self.deferred.is_erase_pending()
    }

    /// Indicate to every bonded peer that the services of this device changed
    ///
    /// The indication is sent to connected bonded peers immediately, every other bonded peer is
    /// flagged and the indication is sent when it reconnects.
    pub fn service_changed(&mut self) -> Result<(), Error> {
        let slots: Vec<(u8, StateFlags)> = self.store.iter().map(|(slot, record)| (slot, record.flags)).collect();

        for (slot, flags) in slots {
            let connection = self
                .links
                .iter()
                .find(|link| link.slot == Some(slot))
                .map(|link| link.connection);

            let sent = match connection {
                Some(connection) => self.host.send_service_changed(connection),
                None => false,
            };

            let mut new_flags = flags;

            new_flags.set(StateFlags::SERVICE_CHANGED, !sent);

            self.store.set_flags(slot, new_flags)?;
        }

        Ok(())
    }

    fn run_action(&mut self, action: DeferredAction) -> Result<(), Error> {
        match action {
            DeferredAction::StartNextPairing => self.start_next_pairing(),
            DeferredAction::RebuildResolvingList => {
                if self.resolver.rebuild(&mut self.host, self.store.records()) == Rebuild::Deferred {
                    self.deferred.schedule(action);
                }
            }
            DeferredAction::SyncWhiteList => {
                self.host.clear_white_list();

                for record in self.store.records() {
                    self.host
                        .add_to_white_list(record.address_type.base(), record.address);
                }

                log::debug!("(BM) white list synced with {} bonds", self.store.total_bonded());
            }
            DeferredAction::Erase(address, address_type) => {
                if let Some(slot) = self.store.find_by_identity(&address, address_type) {
                    self.store.erase(slot)?;

                    self.resolver.remove_peer(address_type, &address);

                    self.schedule_list_updates();
                }
            }
            DeferredAction::EraseAll => {
                self.store.erase_all()?;

                self.schedule_list_updates();
            }
        }

        Ok(())
    }

    /// Run every deferred action whose precondition is met
    fn run_deferred(&mut self) {
        loop {
            let ready = self.deferred.take_ready(self.links.is_empty(), self.host.is_idle());

            if ready.is_empty() {
                break;
            }

            for action in ready {
                if let Err(e) = self.run_action(action) {
                    log::error!("(BM) deferred {:?} failed: {}", action, e);
                }
            }
        }
    }

    /// The number of bonds
    pub fn bond_count(&self) -> usize {
        self.store.total_bonded()
    }

    /// Read a bond record from storage
    pub fn read_bond(&mut self, slot: u8) -> Result<BondRecord, Error> {
        self.store.read(slot)
    }

    /// Get a bond record
    pub fn get_bond(&self, slot: u8) -> Option<&BondRecord> {
        self.store.get(slot)
    }

    /// Find the slot of the bond for an address
    ///
    /// Resolvable private addresses are resolved with the IRKs of the bonds.
    pub fn find_bond(&self, address: &BluetoothDeviceAddress, address_type: AddressType) -> Option<u8> {
        self.store.find_by_address(address, address_type)
    }

    /// Iterate over the bonds and their slots
    pub fn bonds(&self) -> impl Iterator<Item = (u8, &BondRecord)> + '_ {
        self.store.iter()
    }

    /// The LRU order of the bond slots, the most recently used is first
    pub fn lru_order(&self) -> &[u8] {
        self.store.lru_order()
    }

    /// The mirror of the controller's resolving list
    pub fn resolving_list(&self) -> &[ResolvingListEntry] {
        self.resolver.resolving_list()
    }

    /// The pairing state of a link, `None` if the link has no queued pairing
    pub fn pairing_state(&self, connection: ConnectionHandle) -> Option<PairingState> {
        self.queue.state(connection)
    }

    /// The connection of the link that is pairing
    pub fn pairing_connection(&self) -> Option<ConnectionHandle> {
        self.queue.is_pairing()
    }

    /// The number of queued pairings
    pub fn queued_pairings(&self) -> usize {
        self.queue.len()
    }

    pub fn pairing_queue(&self) -> &PairingQueue {
        &self.queue
    }

    /// Get the information of a link
    pub fn link(&self, connection: ConnectionHandle) -> Option<&LinkInfo> {
        self.links.iter().find(|link| link.connection == connection)
    }

    pub fn config(&self) -> &BondConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn storage(&self) -> &S {
        self.store.storage()
    }

    pub fn storage_mut(&mut self) -> &mut S {
        self.store.storage_mut()
    }
}

#[cfg(test)]
mod tests;
