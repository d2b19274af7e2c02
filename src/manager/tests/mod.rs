//! Bond manager tests
//!
//! The collaborators of the bond manager are replaced with a [`MockHost`] that records every call
//! made to it.


use super::link::LinkSecurity;
use super::BondManager;
use crate::address::{AddressType, BluetoothDeviceAddress};
use crate::config::{BondConfig, BondConfigBuilder};
use crate::host::*;
use crate::queue::PairingState;
use crate::record::{CharConfig, LongTermKey};
use crate::resolver::{PrivacyMode, ResolvingListEntry};
use crate::store::memory::MemoryStorage;

/// A call made to the host
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Authenticate(ConnectionHandle, Option<PairingRequest>),
    TerminateAuthentication(ConnectionHandle, PairingFailedReason),
    SecurityRequest(ConnectionHandle, AuthRequirements),
    PasscodeResponse(ConnectionHandle, Option<u32>),
    StartEncryption(ConnectionHandle, LongTermKey),
    ReadByUuid(ConnectionHandle, u16),
    RestoreClientConfig(ConnectionHandle, Vec<CharConfig>),
    ServiceChanged(ConnectionHandle),
    PasscodeNeeded(ConnectionHandle, PasscodeRequest),
    StateChanged(ConnectionHandle, PairingPhase, PairingStatus),
}

pub struct MockHost {
    pub calls: Vec<Call>,
    pub idle: bool,
    /// Make `authenticate` fail
    pub refuse_authentication: Option<PairingFailedReason>,
    pub gatt_reads_sent: bool,
    pub service_changed_sent: bool,
    pub resolving_list: Vec<ResolvingListEntry>,
    pub privacy_modes: Vec<(BluetoothDeviceAddress, PrivacyMode)>,
    pub white_list: Vec<(AddressType, BluetoothDeviceAddress)>,
}

impl Default for MockHost {
    fn default() -> Self {
        MockHost {
            calls: Vec::new(),
            idle: true,
            refuse_authentication: None,
            gatt_reads_sent: true,
            service_changed_sent: true,
            resolving_list: Vec::new(),
            privacy_modes: Vec::new(),
            white_list: Vec::new(),
        }
    }
}

impl MockHost {
    /// The connections that pairing was started for, in order
    pub fn authenticated(&self) -> Vec<ConnectionHandle> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Authenticate(connection, _) => Some(*connection),
                _ => None,
            })
            .collect()
    }

    /// The pairing state changes of a connection, in order
    pub fn state_changes(&self, connection: ConnectionHandle) -> Vec<(PairingPhase, PairingStatus)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::StateChanged(c, phase, status) if *c == connection => Some((*phase, status.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, call: &Call) -> bool {
        self.calls.contains(call)
    }

    pub fn clear(&mut self) {
        self.calls.clear()
    }
}

impl SecurityManager for MockHost {
    fn authenticate(
        &mut self,
        connection: ConnectionHandle,
        _: &SecurityRequirements,
        pairing_request: Option<&PairingRequest>,
    ) -> Result<(), PairingFailedReason> {
        self.calls
            .push(Call::Authenticate(connection, pairing_request.cloned()));

        match self.refuse_authentication {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    fn terminate_authentication(&mut self, connection: ConnectionHandle, reason: PairingFailedReason) {
        self.calls.push(Call::TerminateAuthentication(connection, reason))
    }

    fn send_security_request(&mut self, connection: ConnectionHandle, auth_req: AuthRequirements) {
        self.calls.push(Call::SecurityRequest(connection, auth_req))
    }

    fn passcode_response(&mut self, connection: ConnectionHandle, passcode: Option<u32>) {
        self.calls.push(Call::PasscodeResponse(connection, passcode))
    }
}

impl LinkLayer for MockHost {
    fn start_encryption(&mut self, connection: ConnectionHandle, ltk: &LongTermKey, _: bool, _: bool) {
        self.calls.push(Call::StartEncryption(connection, *ltk))
    }

    fn is_idle(&self) -> bool {
        self.idle
    }

    fn clear_resolving_list(&mut self) {
        self.resolving_list.clear();
        self.privacy_modes.clear();
    }

    fn add_resolving_list_entry(&mut self, entry: &ResolvingListEntry) {
        self.resolving_list.push(*entry)
    }

    fn set_privacy_mode(&mut self, _: AddressType, address: BluetoothDeviceAddress, mode: PrivacyMode) {
        self.privacy_modes.push((address, mode))
    }

    fn clear_white_list(&mut self) {
        self.white_list.clear()
    }

    fn add_to_white_list(&mut self, address_type: AddressType, address: BluetoothDeviceAddress) {
        self.white_list.push((address_type, address))
    }
}

impl GattClient for MockHost {
    fn read_by_uuid(&mut self, connection: ConnectionHandle, uuid: u16) -> bool {
        self.calls.push(Call::ReadByUuid(connection, uuid));

        self.gatt_reads_sent
    }
}

impl GattServer for MockHost {
    fn restore_client_config(&mut self, connection: ConnectionHandle, config: &[CharConfig]) {
        self.calls
            .push(Call::RestoreClientConfig(connection, config.to_vec()))
    }

    fn send_service_changed(&mut self, connection: ConnectionHandle) -> bool {
        self.calls.push(Call::ServiceChanged(connection));

        self.service_changed_sent
    }
}

impl Application for MockHost {
    fn passcode_needed(&mut self, connection: ConnectionHandle, request: PasscodeRequest) {
        self.calls.push(Call::PasscodeNeeded(connection, request))
    }

    fn pairing_state_changed(&mut self, connection: ConnectionHandle, phase: PairingPhase, status: PairingStatus) {
        self.calls.push(Call::StateChanged(connection, phase, status))
    }
}

pub type Manager<const N: usize> = BondManager<MemoryStorage, MockHost, N>;

pub fn init_logger() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default());
}

pub fn manager<const N: usize>(config: BondConfig) -> Manager<N> {
    init_logger();

    BondManager::new(config, MemoryStorage::new(), MockHost::default()).unwrap()
}

pub fn default_manager<const N: usize>() -> Manager<N> {
    manager(BondConfigBuilder::new().try_build().unwrap())
}

pub fn handle(raw: u16) -> ConnectionHandle {
    ConnectionHandle::new(raw).unwrap()
}

pub fn peer(byte: u8) -> BluetoothDeviceAddress {
    BluetoothDeviceAddress([byte, 0x01, 0x02, 0x03, 0x04, 0x05])
}

pub fn irk(byte: u8) -> u128 {
    0x1111_2222_3333_4444_5555_6666_7777_0000 | byte as u128
}

pub fn bonding_request() -> PairingRequest {
    PairingRequest {
        io_capability: IoCapability::NoInputNoOutput,
        oob_data_present: false,
        auth_req: AuthRequirements {
            bonding: true,
            ..Default::default()
        },
        max_key_size: 16,
        initiator_key_distribution: KeyDistribution::ENC_KEY | KeyDistribution::ID_KEY,
        responder_key_distribution: KeyDistribution::ENC_KEY | KeyDistribution::ID_KEY,
    }
}

pub fn local_ltk(byte: u8) -> LongTermKey {
    LongTermKey::new(0xA000 + byte as u128, byte as u16, byte as u64, 16).unwrap()
}

pub fn peer_ltk(byte: u8) -> LongTermKey {
    LongTermKey::new(0xB000 + byte as u128, byte as u16, byte as u64, 16).unwrap()
}

/// A successful bonded pairing with both long term keys and optional identity information
pub fn bonded(auth_state: AuthState, byte: u8, identity: Option<IdentityInfo>) -> AuthenticationComplete {
    let mut complete = AuthenticationComplete::success(auth_state | AuthState::BONDING);

    complete.local_ltk = Some(local_ltk(byte));
    complete.peer_ltk = Some(peer_ltk(byte));
    complete.identity = identity;

    complete
}

pub fn identity(byte: u8) -> IdentityInfo {
    IdentityInfo {
        irk: irk(byte),
        address: peer(byte),
        address_type: AddressType::Public,
    }
}

/// Establish a link as a peripheral and bond through a pairing request from the peer
pub fn bond_as_peripheral<const N: usize>(
    manager: &mut Manager<N>,
    connection: ConnectionHandle,
    address: BluetoothDeviceAddress,
    complete: AuthenticationComplete,
) {
    manager
        .on_link_established(connection, address, AddressType::Public, Role::Peripheral)
        .unwrap();

    manager
        .on_pairing_request(connection, AddressType::Public, bonding_request())
        .unwrap();

    assert_eq!(Some(PairingState::IsPairing), manager.pairing_state(connection));

    manager
        .on_authentication_complete(connection, complete)
        .unwrap();
}

/// Establish a link as a central and bond by having the application start pairing
pub fn bond_as_central<const N: usize>(
    manager: &mut Manager<N>,
    connection: ConnectionHandle,
    address: BluetoothDeviceAddress,
    complete: AuthenticationComplete,
) {
    manager
        .on_link_established(connection, address, AddressType::Public, Role::Central)
        .unwrap();

    manager.pair(connection).unwrap();

    assert_eq!(Some(PairingState::IsPairing), manager.pairing_state(connection));

    manager
        .on_authentication_complete(connection, complete)
        .unwrap();
}
