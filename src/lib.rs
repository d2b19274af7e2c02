//! Bluetooth LE Bond Manager
//!
//! The bond manager decides when devices pair, saves the keys of bonded devices, and gives the
//! saved keys back to the link layer when a bonded device reconnects. It sits between the link
//! layer, the Security Manager, and the GATT client and server of a host, but it does not send
//! anything over the air itself. Everything it needs from the rest of the host is done through the
//! traits in the [`host`] module.
//!
//! The main parts of the bond manager are
//! * the [record store](store) where bonds are kept in non-volatile storage,
//! * the [pairing queue](queue) that makes sure only one pairing is done at a time,
//! * the [address resolver](resolver) that recognizes peers using resolvable private addresses,
//! * and the [`BondManager`] that processes the events of the host.
//!
//! ```
//! # use bo_tie_bond::host::*;
//! # use bo_tie_bond::record::{CharConfig, LongTermKey};
//! # use bo_tie_bond::resolver::{PrivacyMode, ResolvingListEntry};
//! # use bo_tie_bond::{AddressType, BluetoothDeviceAddress};
//! # struct Host;
//! # impl SecurityManager for Host {
//! #     fn authenticate(&mut self, _: ConnectionHandle, _: &SecurityRequirements, _: Option<&PairingRequest>) -> Result<(), PairingFailedReason> { Ok(()) }
//! #     fn terminate_authentication(&mut self, _: ConnectionHandle, _: PairingFailedReason) {}
//! #     fn send_security_request(&mut self, _: ConnectionHandle, _: AuthRequirements) {}
//! #     fn passcode_response(&mut self, _: ConnectionHandle, _: Option<u32>) {}
//! # }
//! # impl LinkLayer for Host {
//! #     fn start_encryption(&mut self, _: ConnectionHandle, _: &LongTermKey, _: bool, _: bool) {}
//! #     fn is_idle(&self) -> bool { true }
//! #     fn clear_resolving_list(&mut self) {}
//! #     fn add_resolving_list_entry(&mut self, _: &ResolvingListEntry) {}
//! #     fn set_privacy_mode(&mut self, _: AddressType, _: BluetoothDeviceAddress, _: PrivacyMode) {}
//! #     fn clear_white_list(&mut self) {}
//! #     fn add_to_white_list(&mut self, _: AddressType, _: BluetoothDeviceAddress) {}
//! # }
//! # impl GattClient for Host {
//! #     fn read_by_uuid(&mut self, _: ConnectionHandle, _: u16) -> bool { false }
//! # }
//! # impl GattServer for Host {
//! #     fn restore_client_config(&mut self, _: ConnectionHandle, _: &[CharConfig]) {}
//! #     fn send_service_changed(&mut self, _: ConnectionHandle) -> bool { false }
//! # }
//! # impl Application for Host {
//! #     fn passcode_needed(&mut self, _: ConnectionHandle, _: PasscodeRequest) {}
//! #     fn pairing_state_changed(&mut self, _: ConnectionHandle, _: PairingPhase, _: PairingStatus) {}
//! # }
//! use bo_tie_bond::config::BondConfigBuilder;
//! use bo_tie_bond::store::memory::MemoryStorage;
//! use bo_tie_bond::BondManager;
//!
//! let config = BondConfigBuilder::new().try_build().unwrap();
//!
//! let mut manager = BondManager::<_, _, 4>::new(config, MemoryStorage::new(), Host).unwrap();
//!
//! let connection = ConnectionHandle::new(1).unwrap();
//! let address = BluetoothDeviceAddress([0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]);
//!
//! manager.on_link_established(connection, address, AddressType::Public, Role::Peripheral).unwrap();
//!
//! let pairing_request = PairingRequest {
//!     io_capability: IoCapability::NoInputNoOutput,
//!     oob_data_present: false,
//!     auth_req: AuthRequirements { bonding: true, ..Default::default() },
//!     max_key_size: 16,
//!     initiator_key_distribution: KeyDistribution::ENC_KEY,
//!     responder_key_distribution: KeyDistribution::ENC_KEY,
//! };
//!
//! manager.on_pairing_request(connection, AddressType::Public, pairing_request).unwrap();
//!
//! let mut complete = AuthenticationComplete::success(AuthState::BONDING);
//!
//! complete.local_ltk = Some(LongTermKey::new(0x1234, 0, 0, 16).unwrap());
//!
//! manager.on_authentication_complete(connection, complete).unwrap();
//!
//! assert_eq!(1, manager.bond_count());
//! assert!(manager.find_bond(&address, AddressType::Public).is_some());
//! ```
//!
//! # Features
//! * `signing` (default) keeps the peer's signing key and sign counter in bond records

pub mod address;
pub mod config;
pub mod error;
pub mod host;
pub mod manager;
pub mod queue;
pub mod record;
pub mod resolver;
pub mod store;
pub mod toolbox;

pub use address::{AddressType, BluetoothDeviceAddress};
pub use config::{BondConfig, BondConfigBuilder};
pub use error::{Error, StorageError};
pub use host::ConnectionHandle;
pub use manager::BondManager;
pub use record::BondRecord;
