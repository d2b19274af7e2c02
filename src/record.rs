//! Bond records
//!
//! A [`BondRecord`] is everything persisted for a bonded peer device. The record store splits a
//! record into separate storage items (see [`NvItem`](crate::store::NvItem)), but outside of the
//! store a record is always handled as a validated, typed value.

use crate::address::{AddressType, BluetoothDeviceAddress};
use crate::host::{Role, SecurityLevel};
use serde::{Deserialize, Serialize};

/// The number of characteristic configuration entries kept per bonded peer
pub const CHAR_CONFIG_TABLE_SIZE: usize = 4;

/// The attribute handle used to mark an unused characteristic configuration entry
pub const INVALID_HANDLE: u16 = 0x0000;

/// The minimum encryption key size in bytes
pub const ENCRYPTION_KEY_MIN_SIZE: u8 = 7;

/// The maximum encryption key size in bytes
pub const ENCRYPTION_KEY_MAX_SIZE: u8 = 16;

bitflags::bitflags! {
    /// State of a bond
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StateFlags: u8 {
        /// The bond was created from an authenticated (MITM protected) pairing
        const AUTHENTICATED = 1 << 0;
        /// A Service Changed indication is pending for the peer
        const SERVICE_CHANGED = 1 << 1;
        /// The peer supports Central Address Resolution
        const CENTRAL_ADDRESS_RESOLUTION = 1 << 2;
        /// The bond was created with LE Secure Connections
        const SECURE_CONNECTIONS = 1 << 3;
        /// The peer only uses resolvable private addresses after bonding
        const RPA_ONLY = 1 << 4;
    }
}

/// A Long Term Key with its identifying information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongTermKey {
    pub key: u128,
    /// Encrypted Diversifier
    pub ediv: u16,
    /// Random number
    pub rand: u64,
    /// The size of the key in bytes
    pub key_size: u8,
}

impl LongTermKey {
    /// Create a new `LongTermKey`
    ///
    /// An error is returned if `key_size` is not within the range of seven to sixteen bytes.
    pub fn new(key: u128, ediv: u16, rand: u64, key_size: u8) -> Result<Self, crate::Error> {
        if (ENCRYPTION_KEY_MIN_SIZE..=ENCRYPTION_KEY_MAX_SIZE).contains(&key_size) {
            Ok(LongTermKey {
                key,
                ediv,
                rand,
                key_size,
            })
        } else {
            Err(crate::Error::InvalidParameter)
        }
    }

    pub fn is_valid(&self) -> bool {
        (ENCRYPTION_KEY_MIN_SIZE..=ENCRYPTION_KEY_MAX_SIZE).contains(&self.key_size)
    }
}

/// The peer's Connection Signature Resolving Key and its sign counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningInfo {
    pub csrk: u128,
    pub sign_counter: u32,
}

/// A characteristic configuration (CCCD) value written by a bonded client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharConfig {
    pub handle: u16,
    pub value: u16,
}

impl CharConfig {
    pub const UNUSED: CharConfig = CharConfig {
        handle: INVALID_HANDLE,
        value: 0,
    };

    pub fn is_used(&self) -> bool {
        self.handle != INVALID_HANDLE
    }
}

/// The bonding information of a peer device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondRecord {
    pub address: BluetoothDeviceAddress,
    pub address_type: AddressType,
    pub flags: StateFlags,
    pub local_ltk: Option<LongTermKey>,
    pub peer_ltk: Option<LongTermKey>,
    /// The peer's Identity Resolving Key, zero when the peer did not distribute one
    pub peer_irk: u128,
    #[cfg(feature = "signing")]
    pub peer_signing: Option<SigningInfo>,
    pub char_config: [CharConfig; CHAR_CONFIG_TABLE_SIZE],
}

impl BondRecord {
    /// Create a record with no keys
    pub fn new(address: BluetoothDeviceAddress, address_type: AddressType) -> Self {
        BondRecord {
            address,
            address_type,
            flags: StateFlags::empty(),
            local_ltk: None,
            peer_ltk: None,
            peer_irk: 0,
            #[cfg(feature = "signing")]
            peer_signing: None,
            char_config: [CharConfig::UNUSED; CHAR_CONFIG_TABLE_SIZE],
        }
    }

    /// Check if the peer distributed an Identity Resolving Key
    pub fn has_irk(&self) -> bool {
        self.peer_irk != 0
    }

    /// Check if this record is for the identity `address` and `address_type`
    ///
    /// Identity address types are compared by their base type.
    pub fn is_identity(&self, address: &BluetoothDeviceAddress, address_type: AddressType) -> bool {
        self.address == *address && self.address_type.base() == address_type.base()
    }

    /// The security level achieved when this bond was created
    pub fn security_level(&self) -> SecurityLevel {
        match (
            self.flags.contains(StateFlags::AUTHENTICATED),
            self.flags.contains(StateFlags::SECURE_CONNECTIONS),
        ) {
            (true, true) => SecurityLevel::SecureConnectionsAuthenticated,
            (true, false) => SecurityLevel::Authenticated,
            (false, _) => SecurityLevel::Unauthenticated,
        }
    }

    /// Get the long term key used for encrypting a link in the role `role`
    ///
    /// A central of a legacy pairing uses the key distributed by the peer, every other case uses
    /// the local key (with secure connections both keys are the same).
    pub fn ltk_for(&self, role: Role) -> Option<LongTermKey> {
        if role == Role::Central && !self.flags.contains(StateFlags::SECURE_CONNECTIONS) {
            self.peer_ltk
        } else {
            self.local_ltk
        }
    }

    /// Reset every entry of the characteristic configuration table
    pub fn clear_char_config(&mut self) {
        self.char_config = [CharConfig::UNUSED; CHAR_CONFIG_TABLE_SIZE];
    }

    /// Set the configuration value for the characteristic configuration at `handle`
    ///
    /// A `value` of zero removes the entry. False is returned if there is no room for a new entry.
    pub fn set_char_config(&mut self, handle: u16, value: u16) -> bool {
        if handle == INVALID_HANDLE {
            return false;
        }

        if let Some(entry) = self.char_config.iter_mut().find(|entry| entry.handle == handle) {
            if value == 0 {
                *entry = CharConfig::UNUSED;
            } else {
                entry.value = value;
            }

            return true;
        }

        if value == 0 {
            return true;
        }

        match self.char_config.iter_mut().find(|entry| !entry.is_used()) {
            Some(entry) => {
                *entry = CharConfig { handle, value };
                true
            }
            None => false,
        }
    }

    /// Get the configuration value of the characteristic configuration at `handle`
    pub fn get_char_config(&self, handle: u16) -> Option<u16> {
        self.char_config
            .iter()
            .find(|entry| entry.is_used() && entry.handle == handle)
            .map(|entry| entry.value)
    }
}
