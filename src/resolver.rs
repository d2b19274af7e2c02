//! Address resolution
//!
//! A peer using privacy connects with a resolvable private address (RPA) that changes over time.
//! Only a device with the peer's Identity Resolving Key (IRK) can tell that an RPA belongs to the
//! peer. This module contains the hash check for resolving an RPA and the mirror of the
//! controller's resolving list.
//!
//! # Resolving List
//! The controller's resolving list can only be cleared and then filled again, so the mirror is
//! never patched entry by entry on the controller. A rebuild writes the local entry at index zero
//! followed by one entry for every bonded peer that distributed an IRK. A rebuild must not be done
//! while the controller is scanning, advertising, or initiating a connection. When this is the
//! case the rebuild is not done and the caller must retry once the link layer is idle.

use crate::address::{AddressType, BluetoothDeviceAddress};
use crate::host::LinkLayer;
use crate::record::{BondRecord, StateFlags};

/// Check if `rpa` was generated from `irk`
///
/// An IRK of zero is the marker for "no IRK" and never resolves.
pub fn resolve(rpa: &BluetoothDeviceAddress, irk: u128) -> bool {
    irk != 0 && crate::toolbox::ah(irk, rpa.prand()) == rpa.hash()
}

/// The kind of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// A resolvable private address
    Resolvable,
    /// A non-resolvable private address
    NonResolvable,
    /// A public address or a static random address
    StaticIdentity,
}

/// Classify an address by its type and the two most significant bits
pub fn classify(address_type: AddressType, address: &BluetoothDeviceAddress) -> AddressClass {
    match address_type {
        AddressType::Public | AddressType::PublicIdentity | AddressType::RandomIdentity => {
            AddressClass::StaticIdentity
        }
        AddressType::Random => match address.sub_type_bits() {
            0b11 => AddressClass::StaticIdentity,
            0b01 => AddressClass::Resolvable,
            // 0b10 is reserved
            _ => AddressClass::NonResolvable,
        },
    }
}

/// Privacy mode of a resolving list entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivacyMode {
    /// Only the peer's RPA is accepted
    Network,
    /// The peer's identity address is accepted as well as its RPA
    Device,
}

/// An entry of the resolving list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvingListEntry {
    pub identity_address_type: AddressType,
    pub identity_address: BluetoothDeviceAddress,
    pub peer_irk: u128,
    pub local_irk: u128,
    pub privacy_mode: PrivacyMode,
}

/// Find the index of the entry for a peer identity within a resolving list
pub fn find_peer_in_resolving_list(
    list: &[ResolvingListEntry],
    identity_address_type: AddressType,
    identity_address: &BluetoothDeviceAddress,
) -> Option<usize> {
    list.iter().position(|entry| {
        entry.peer_irk != 0
            && entry.identity_address == *identity_address
            && entry.identity_address_type.base() == identity_address_type.base()
    })
}

/// Result of a resolving list rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebuild {
    /// The controller's list was rewritten
    Done,
    /// The link layer is busy, the rebuild must be retried
    Deferred,
}

/// The address resolver
///
/// This holds the mirror of the controller's resolving list.
pub struct AddressResolver {
    local: ResolvingListEntry,
    list: Vec<ResolvingListEntry>,
    capacity: usize,
}

impl AddressResolver {
    /// Create a new `AddressResolver`
    ///
    /// `capacity` is the size of the controller's resolving list, including the local entry.
    pub fn new(
        local_irk: u128,
        local_identity: BluetoothDeviceAddress,
        local_identity_type: AddressType,
        capacity: usize,
    ) -> Self {
        let local = ResolvingListEntry {
            identity_address_type: local_identity_type.base(),
            identity_address: local_identity,
            peer_irk: 0,
            local_irk,
            privacy_mode: PrivacyMode::Network,
        };

        AddressResolver {
            local,
            list: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Get the mirror of the resolving list
    pub fn resolving_list(&self) -> &[ResolvingListEntry] {
        &self.list
    }

    /// Find the entry of a peer in the resolving list
    pub fn find_peer(&self, identity_address_type: AddressType, identity_address: &BluetoothDeviceAddress) -> Option<usize> {
        find_peer_in_resolving_list(&self.list, identity_address_type, identity_address)
    }

    /// Remove the entry of a peer from the mirror
    ///
    /// The controller is not changed until the next rebuild. Returns true if there was an entry
    /// for the peer.
    pub fn remove_peer(&mut self, identity_address_type: AddressType, identity_address: &BluetoothDeviceAddress) -> bool {
        match self.find_peer(identity_address_type, identity_address) {
            Some(index) => {
                self.list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Rebuild the resolving list from `records`
    ///
    /// Nothing is done if the link layer is not idle.
    pub fn rebuild<'a, L, I>(&mut self, link: &mut L, records: I) -> Rebuild
    where
        L: LinkLayer + ?Sized,
        I: IntoIterator<Item = &'a BondRecord>,
    {
        if !link.is_idle() {
            log::debug!("(BM) resolving list rebuild deferred, link layer is busy");

            return Rebuild::Deferred;
        }

        self.list.clear();

        link.clear_resolving_list();

        self.list.push(self.local);

        link.add_resolving_list_entry(&self.local);

        for record in records.into_iter().filter(|record| record.has_irk()) {
            if self.list.len() >= self.capacity {
                log::warn!(
                    "(BM) resolving list is full, {} ({}) is not added",
                    record.address,
                    record.address_type
                );
                break;
            }

            let privacy_mode = if record.flags.contains(StateFlags::RPA_ONLY) {
                PrivacyMode::Network
            } else {
                PrivacyMode::Device
            };

            let entry = ResolvingListEntry {
                identity_address_type: record.address_type.base(),
                identity_address: record.address,
                peer_irk: record.peer_irk,
                local_irk: self.local.local_irk,
                privacy_mode,
            };

            link.add_resolving_list_entry(&entry);

            link.set_privacy_mode(entry.identity_address_type, entry.identity_address, privacy_mode);

            self.list.push(entry);
        }

        log::debug!("(BM) resolving list rebuilt with {} entries", self.list.len());

        Rebuild::Done
    }
}
