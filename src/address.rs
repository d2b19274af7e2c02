//! Bluetooth device addresses
//!
//! Addresses are kept in the same byte order as they are sent over the air, the least significant
//! byte is at index zero.

use serde::{Deserialize, Serialize};

/// A Bluetooth device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BluetoothDeviceAddress(pub [u8; 6]);

impl BluetoothDeviceAddress {
    /// The address written into an empty bond record slot
    pub const EMPTY: BluetoothDeviceAddress = BluetoothDeviceAddress([0xFF; 6]);

    /// Create an address of all zeros
    pub const fn zeroed() -> Self {
        BluetoothDeviceAddress([0; 6])
    }

    /// Check if every byte of this address is zero
    pub fn is_zeroed(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Check if this is the empty slot marker (all 0xFF)
    pub fn is_empty_marker(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Get the two most significant bits of the address
    ///
    /// These bits are the sub type of a random device address.
    pub(crate) fn sub_type_bits(&self) -> u8 {
        self.0[5] >> 6
    }

    /// The hash part of a resolvable private address
    pub(crate) fn hash(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// The random part (prand) of a resolvable private address
    pub(crate) fn prand(&self) -> [u8; 3] {
        [self.0[3], self.0[4], self.0[5]]
    }

    /// Create a resolvable private address from an IRK and a 22 bit random value
    ///
    /// The upper two bits of `prand` are overwritten to mark the address as resolvable.
    pub fn new_resolvable(irk: u128, prand: [u8; 3]) -> Self {
        let prand = [prand[0], prand[1], (prand[2] & 0x3F) | 0x40];

        let hash = crate::toolbox::ah(irk, prand);

        BluetoothDeviceAddress([hash[0], hash[1], hash[2], prand[0], prand[1], prand[2]])
    }

    /// Create a static random device address from the lower 46 bits of `val`
    pub fn new_static_random(val: u64) -> Self {
        let mut address = [0u8; 6];

        address.copy_from_slice(&val.to_le_bytes()[..6]);

        address[5] |= 0xC0;

        BluetoothDeviceAddress(address)
    }
}

impl core::ops::Deref for BluetoothDeviceAddress {
    type Target = [u8; 6];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; 6]> for BluetoothDeviceAddress {
    fn from(address: [u8; 6]) -> Self {
        BluetoothDeviceAddress(address)
    }
}

impl core::fmt::Display for BluetoothDeviceAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

/// The type of a device address
///
/// The identity variants are reported once a controller has resolved a private address to an
/// entry of its resolving list. For comparisons of stored identities an identity type is equal to
/// its base type (see [`base`](AddressType::base)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

impl AddressType {
    /// Get the public or random type with the identity information removed
    pub fn base(self) -> Self {
        match self {
            AddressType::Public | AddressType::PublicIdentity => AddressType::Public,
            AddressType::Random | AddressType::RandomIdentity => AddressType::Random,
        }
    }

    pub fn is_random(self) -> bool {
        self.base() == AddressType::Random
    }

    pub(crate) fn into_val(self) -> u8 {
        match self {
            AddressType::Public => 0x0,
            AddressType::Random => 0x1,
            AddressType::PublicIdentity => 0x2,
            AddressType::RandomIdentity => 0x3,
        }
    }
}

impl core::fmt::Display for AddressType {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            AddressType::Public => f.write_str("public"),
            AddressType::Random => f.write_str("random"),
            AddressType::PublicIdentity => f.write_str("public identity"),
            AddressType::RandomIdentity => f.write_str("random identity"),
        }
    }
}
