//! Bond manager configuration
//!
//! A [`BondConfig`] is created with a [`BondConfigBuilder`]. The default configuration waits for
//! the peer to start pairing, uses *just works* (no input and no output), bonds, allows LE Secure
//! Connections, and distributes the encryption and identity keys.
//!
//! ```
//! use bo_tie_bond::config::{BondConfigBuilder, PairingMode};
//! use bo_tie_bond::host::IoCapability;
//!
//! let config = BondConfigBuilder::new()
//!     .set_pairing_mode(PairingMode::Initiate)
//!     .set_io_capability(IoCapability::KeyboardDisplay)
//!     .require_mitm(true)
//!     .enable_lru_eviction()
//!     .try_build()
//!     .unwrap();
//!
//! assert!(config.is_lru_eviction_enabled());
//! ```

use crate::address::{AddressType, BluetoothDeviceAddress};
use crate::host::{AuthRequirements, IoCapability, KeyDistribution, Role, SecurityRequirements};
use crate::record::{ENCRYPTION_KEY_MAX_SIZE, ENCRYPTION_KEY_MIN_SIZE};
use serde::{Deserialize, Serialize};

/// When pairing is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingMode {
    /// Pairing is not allowed
    NoPairing,
    /// Wait for the peer to request pairing (or for the application to start it)
    WaitForRequest,
    /// Start pairing (or a security request) as soon as a link is established
    Initiate,
}

/// Use of LE Secure Connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecureConnectionsPolicy {
    /// Only legacy pairing is used
    Disallow,
    /// Secure Connections is used when both devices support it
    Allow,
    /// Pairing fails unless Secure Connections is used
    Require,
}

/// The configuration of a bond manager
///
/// The `Debug` output does not contain the local IRK.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondConfig {
    pairing_mode: PairingMode,
    mitm: bool,
    io_capability: IoCapability,
    bonding: bool,
    max_key_size: u8,
    secure_connections: SecureConnectionsPolicy,
    auto_sync_white_list: bool,
    lru_eviction: bool,
    gatt_discovery: bool,
    key_distribution: KeyDistribution,
    local_irk: u128,
    local_identity: BluetoothDeviceAddress,
    local_identity_type: AddressType,
    resolving_list_size: usize,
    max_pending_pairings: usize,
}

impl core::fmt::Debug for BondConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BondConfig")
            .field("pairing_mode", &self.pairing_mode)
            .field("mitm", &self.mitm)
            .field("io_capability", &self.io_capability)
            .field("bonding", &self.bonding)
            .field("max_key_size", &self.max_key_size)
            .field("secure_connections", &self.secure_connections)
            .field("auto_sync_white_list", &self.auto_sync_white_list)
            .field("lru_eviction", &self.lru_eviction)
            .field("gatt_discovery", &self.gatt_discovery)
            .field("key_distribution", &self.key_distribution)
            .field("has_local_irk", &(self.local_irk != 0))
            .field("local_identity", &self.local_identity)
            .field("local_identity_type", &self.local_identity_type)
            .field("resolving_list_size", &self.resolving_list_size)
            .field("max_pending_pairings", &self.max_pending_pairings)
            .finish()
    }
}

impl Default for BondConfig {
    fn default() -> Self {
        BondConfig {
            pairing_mode: PairingMode::WaitForRequest,
            mitm: false,
            io_capability: IoCapability::NoInputNoOutput,
            bonding: true,
            max_key_size: ENCRYPTION_KEY_MAX_SIZE,
            secure_connections: SecureConnectionsPolicy::Allow,
            auto_sync_white_list: false,
            lru_eviction: false,
            gatt_discovery: false,
            key_distribution: KeyDistribution::ENC_KEY | KeyDistribution::ID_KEY,
            local_irk: 0,
            local_identity: BluetoothDeviceAddress::zeroed(),
            local_identity_type: AddressType::Public,
            resolving_list_size: 4,
            max_pending_pairings: 8,
        }
    }
}

impl BondConfig {
    pub fn pairing_mode(&self) -> PairingMode {
        self.pairing_mode
    }

    pub fn is_mitm_required(&self) -> bool {
        self.mitm
    }

    pub fn io_capability(&self) -> IoCapability {
        self.io_capability
    }

    pub fn is_bonding_enabled(&self) -> bool {
        self.bonding
    }

    pub fn max_key_size(&self) -> u8 {
        self.max_key_size
    }

    pub fn secure_connections(&self) -> SecureConnectionsPolicy {
        self.secure_connections
    }

    pub fn is_white_list_synced(&self) -> bool {
        self.auto_sync_white_list
    }

    pub fn is_lru_eviction_enabled(&self) -> bool {
        self.lru_eviction
    }

    pub fn is_gatt_discovery_enabled(&self) -> bool {
        self.gatt_discovery
    }

    pub fn key_distribution(&self) -> KeyDistribution {
        self.key_distribution
    }

    pub fn local_irk(&self) -> u128 {
        self.local_irk
    }

    pub fn local_identity(&self) -> (BluetoothDeviceAddress, AddressType) {
        (self.local_identity, self.local_identity_type)
    }

    /// The capacity of the controller's resolving list (including the local entry)
    pub fn resolving_list_size(&self) -> usize {
        self.resolving_list_size
    }

    /// The maximum number of pairings that can be queued
    pub fn max_pending_pairings(&self) -> usize {
        self.max_pending_pairings
    }

    /// The authentication requirements flags sent by this device
    pub fn auth_requirements(&self) -> AuthRequirements {
        AuthRequirements {
            bonding: self.bonding,
            mitm: self.mitm,
            secure_connections: self.secure_connections != SecureConnectionsPolicy::Disallow,
            key_press: false,
        }
    }

    /// The requirements handed to the Security Manager when pairing is started
    pub fn security_requirements(&self, role: Role) -> SecurityRequirements {
        SecurityRequirements {
            role,
            io_capability: self.io_capability,
            oob_available: false,
            auth_req: self.auth_requirements(),
            max_key_size: self.max_key_size,
            key_distribution: if self.bonding {
                self.key_distribution
            } else {
                KeyDistribution::empty()
            },
            secure_connections_only: self.secure_connections == SecureConnectionsPolicy::Require,
        }
    }
}

/// A builder of a [`BondConfig`]
#[derive(Default)]
pub struct BondConfigBuilder {
    config: BondConfig,
}

impl BondConfigBuilder {
    /// Create a new `BondConfigBuilder` with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pairing_mode(mut self, mode: PairingMode) -> Self {
        self.config.pairing_mode = mode;
        self
    }

    /// Require man in the middle protection
    pub fn require_mitm(mut self, mitm: bool) -> Self {
        self.config.mitm = mitm;
        self
    }

    pub fn set_io_capability(mut self, io_capability: IoCapability) -> Self {
        self.config.io_capability = io_capability;
        self
    }

    /// Pair without bonding
    ///
    /// No bond records are created and no keys are distributed.
    pub fn disable_bonding(mut self) -> Self {
        self.config.bonding = false;
        self
    }

    /// Set the maximum encryption key size
    ///
    /// The size must be between seven and sixteen bytes, this is checked in `try_build`.
    pub fn set_max_key_size(mut self, size: u8) -> Self {
        self.config.max_key_size = size;
        self
    }

    pub fn set_secure_connections(mut self, policy: SecureConnectionsPolicy) -> Self {
        self.config.secure_connections = policy;
        self
    }

    /// Rebuild the controller's white list from the bonded devices whenever bonds change
    pub fn enable_white_list_sync(mut self) -> Self {
        self.config.auto_sync_white_list = true;
        self
    }

    /// Replace the least recently used bond when all records are in use
    pub fn enable_lru_eviction(mut self) -> Self {
        self.config.lru_eviction = true;
        self
    }

    /// Read the peer's Central Address Resolution and RPA Only characteristics after bonding
    pub fn enable_gatt_discovery(mut self) -> Self {
        self.config.gatt_discovery = true;
        self
    }

    pub fn set_key_distribution(mut self, keys: KeyDistribution) -> Self {
        self.config.key_distribution = keys;
        self
    }

    /// Set the local Identity Resolving Key and identity address
    pub fn set_local_identity(mut self, irk: u128, address: BluetoothDeviceAddress, address_type: AddressType) -> Self {
        self.config.local_irk = irk;
        self.config.local_identity = address;
        self.config.local_identity_type = address_type;
        self
    }

    /// Set the capacity of the controller's resolving list
    pub fn set_resolving_list_size(mut self, size: usize) -> Self {
        self.config.resolving_list_size = size;
        self
    }

    /// Set the maximum number of queued pairings
    pub fn set_max_pending_pairings(mut self, max: usize) -> Self {
        self.config.max_pending_pairings = max;
        self
    }

    /// Try to build the `BondConfig`
    ///
    /// # Error
    /// An error is returned if the maximum key size is out of range, the resolving list has no
    /// room for the local entry, or no pairings can be queued.
    pub fn try_build(self) -> Result<BondConfig, crate::Error> {
        if !(ENCRYPTION_KEY_MIN_SIZE..=ENCRYPTION_KEY_MAX_SIZE).contains(&self.config.max_key_size)
            || self.config.resolving_list_size == 0
            || self.config.max_pending_pairings == 0
        {
            log::error!(
                "(BM) invalid configuration: max key size {}, resolving list size {}, max pending pairings {}",
                self.config.max_key_size,
                self.config.resolving_list_size,
                self.config.max_pending_pairings
            );

            Err(crate::Error::InvalidParameter)
        } else {
            Ok(self.config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_build() {
        let config = BondConfigBuilder::new().try_build().unwrap();

        assert_eq!(BondConfig::default(), config);
        assert_eq!(PairingMode::WaitForRequest, config.pairing_mode());
        assert!(config.is_bonding_enabled());
        assert!(!config.is_lru_eviction_enabled());
    }

    #[test]
    fn key_size_is_validated() {
        assert!(BondConfigBuilder::new().set_max_key_size(6).try_build().is_err());
        assert!(BondConfigBuilder::new().set_max_key_size(7).try_build().is_ok());
        assert!(BondConfigBuilder::new().set_max_key_size(17).try_build().is_err());
    }

    #[test]
    fn requirements_follow_config() {
        let config = BondConfigBuilder::new()
            .require_mitm(true)
            .set_secure_connections(SecureConnectionsPolicy::Require)
            .try_build()
            .unwrap();

        let requirements = config.security_requirements(Role::Central);

        assert!(requirements.auth_req.mitm);
        assert!(requirements.auth_req.secure_connections);
        assert!(requirements.auth_req.bonding);
        assert!(requirements.secure_connections_only);

        let config = BondConfigBuilder::new()
            .disable_bonding()
            .set_secure_connections(SecureConnectionsPolicy::Disallow)
            .try_build()
            .unwrap();

        let requirements = config.security_requirements(Role::Peripheral);

        assert!(!requirements.auth_req.bonding);
        assert!(!requirements.auth_req.secure_connections);
        assert_eq!(KeyDistribution::empty(), requirements.key_distribution);
    }

    #[test]
    fn debug_output_has_no_irk() {
        let irk = 0xec0234a3_57c8ad05_341010a6_0a397d9b_u128;

        let config = BondConfigBuilder::new()
            .set_local_identity(irk, BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]), AddressType::Public)
            .try_build()
            .unwrap();

        let debug = format!("{:?}", config);

        assert!(debug.contains("has_local_irk: true"));
        assert!(!debug.contains(&irk.to_string()));
        assert!(!debug.contains(&format!("{:x}", irk)));
    }
}
