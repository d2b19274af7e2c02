//! Interfaces to the rest of the host
//!
//! The bond manager does not send anything over the air by itself. The link layer, the Security
//! Manager, the GATT client and server, and the application are all collaborators that the bond
//! manager calls through the traits in this module. A type implementing every one of these traits
//! automatically implements [`BondHost`], which is what a [`BondManager`] is generic over.
//!
//! The types for the parameters of the inbound events processed by the bond manager are also in
//! this module.
//!
//! [`BondManager`]: crate::BondManager

use crate::address::{AddressType, BluetoothDeviceAddress};
use crate::record::{CharConfig, LongTermKey, SigningInfo};
use crate::resolver::{PrivacyMode, ResolvingListEntry};
use serde::{Deserialize, Serialize};

/// A connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionHandle(u16);

impl ConnectionHandle {
    /// The maximum value of a connection handle
    pub const MAX: u16 = 0x0EFF;

    /// Create a new `ConnectionHandle`
    ///
    /// An error is returned if `raw` is larger than [`MAX`](ConnectionHandle::MAX).
    pub fn new(raw: u16) -> Result<Self, crate::Error> {
        if raw <= Self::MAX {
            Ok(ConnectionHandle(raw))
        } else {
            Err(crate::Error::InvalidParameter)
        }
    }

    pub fn get_raw_handle(&self) -> u16 {
        self.0
    }
}

impl core::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// The role of this device in a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Central,
    Peripheral,
}

/// Security levels of an encrypted link
///
/// These are the encrypted levels of LE security mode one, level two through four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// Unauthenticated pairing with encryption
    Unauthenticated,
    /// Authenticated pairing with encryption
    Authenticated,
    /// Authenticated LE Secure Connections pairing with encryption
    SecureConnectionsAuthenticated,
}

/// The IO Capabilities of a device as it relates to the pairing method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoCapability {
    /// The device only contains a display
    DisplayOnly,
    /// The device contains a display with a method for the user to enter yes or no
    DisplayWithYesOrNo,
    /// The device only contains a keyboard
    KeyboardOnly,
    /// The device has no input or output for the user
    NoInputNoOutput,
    /// The device contains a keyboard and a display
    KeyboardDisplay,
}

/// Authentication requirements flags
///
/// These are the flags of the *AuthReq* field of a pairing request, pairing response, or security
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthRequirements {
    pub bonding: bool,
    pub mitm: bool,
    pub secure_connections: bool,
    pub key_press: bool,
}

impl AuthRequirements {
    pub fn from_val(val: u8) -> Self {
        AuthRequirements {
            bonding: 1 == val & 0b11,
            mitm: 1 == (val >> 2) & 0x1,
            secure_connections: 1 == (val >> 3) & 0x1,
            key_press: 1 == (val >> 4) & 0x1,
        }
    }

    pub fn into_val(self) -> u8 {
        <u8>::from(self.bonding)
            | <u8>::from(self.mitm) << 2
            | <u8>::from(self.secure_connections) << 3
            | <u8>::from(self.key_press) << 4
    }

    /// The security level asked for by these requirements
    pub fn security_level(&self) -> SecurityLevel {
        match (self.mitm, self.secure_connections) {
            (true, true) => SecurityLevel::SecureConnectionsAuthenticated,
            (true, false) => SecurityLevel::Authenticated,
            (false, _) => SecurityLevel::Unauthenticated,
        }
    }
}

bitflags::bitflags! {
    /// Keys distributed during bonding
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct KeyDistribution: u8 {
        const ENC_KEY = 1 << 0;
        const ID_KEY = 1 << 1;
        const SIGN_KEY = 1 << 2;
        const LINK_KEY = 1 << 3;
    }
}

bitflags::bitflags! {
    /// The result flags of a completed authentication
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AuthState: u8 {
        /// The pairing was MITM protected
        const AUTHENTICATED = 1 << 0;
        /// Both devices asked for bonding
        const BONDING = 1 << 1;
        /// LE Secure Connections was used
        const SECURE_CONNECTIONS = 1 << 2;
    }
}

impl AuthState {
    /// The security level of the link encrypted by the completed pairing
    pub fn security_level(&self) -> SecurityLevel {
        match (
            self.contains(AuthState::AUTHENTICATED),
            self.contains(AuthState::SECURE_CONNECTIONS),
        ) {
            (true, true) => SecurityLevel::SecureConnectionsAuthenticated,
            (true, false) => SecurityLevel::Authenticated,
            (false, _) => SecurityLevel::Unauthenticated,
        }
    }
}

/// The parameters of a pairing request received from an initiating peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRequest {
    pub io_capability: IoCapability,
    pub oob_data_present: bool,
    pub auth_req: AuthRequirements,
    pub max_key_size: u8,
    pub initiator_key_distribution: KeyDistribution,
    pub responder_key_distribution: KeyDistribution,
}

/// The requirements for a pairing started by the bond manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRequirements {
    pub role: Role,
    pub io_capability: IoCapability,
    pub oob_available: bool,
    pub auth_req: AuthRequirements,
    pub max_key_size: u8,
    pub key_distribution: KeyDistribution,
    /// Pairing must fail if LE Secure Connections cannot be used
    pub secure_connections_only: bool,
}

/// Reasons for a pairing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingFailedReason {
    PasskeyEntryFailed,
    OobNotAvailable,
    AuthenticationRequirements,
    ConfirmValueFailed,
    PairingNotSupported,
    EncryptionKeySize,
    CommandNotSupported,
    UnspecifiedReason,
    RepeatedAttempts,
    InvalidParameters,
    DhKeyCheckFailed,
    NumericComparisonFailed,
    /// The pairing timed out (reported by the Security Manager)
    Timeout,
}

impl core::fmt::Display for PairingFailedReason {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            PairingFailedReason::PasskeyEntryFailed => f.write_str("passkey entry failed"),
            PairingFailedReason::OobNotAvailable => f.write_str("out of band data not available"),
            PairingFailedReason::AuthenticationRequirements => f.write_str("authentication requirements not met"),
            PairingFailedReason::ConfirmValueFailed => f.write_str("confirm value check failed"),
            PairingFailedReason::PairingNotSupported => f.write_str("pairing not supported"),
            PairingFailedReason::EncryptionKeySize => f.write_str("invalid encryption key size"),
            PairingFailedReason::CommandNotSupported => f.write_str("security manager command not supported"),
            PairingFailedReason::UnspecifiedReason => f.write_str("unspecified reason"),
            PairingFailedReason::RepeatedAttempts => f.write_str("too many attempts at pairing"),
            PairingFailedReason::InvalidParameters => f.write_str("invalid parameters"),
            PairingFailedReason::DhKeyCheckFailed => f.write_str("Diffie Hellman key check failed"),
            PairingFailedReason::NumericComparisonFailed => f.write_str("numeric comparison failed"),
            PairingFailedReason::Timeout => f.write_str("pairing timed out"),
        }
    }
}

/// Identity information distributed by the peer during bonding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityInfo {
    pub irk: u128,
    pub address: BluetoothDeviceAddress,
    pub address_type: AddressType,
}

/// The parameters of an authentication complete event from the Security Manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationComplete {
    pub status: Result<(), PairingFailedReason>,
    pub auth_state: AuthState,
    pub identity: Option<IdentityInfo>,
    pub local_ltk: Option<LongTermKey>,
    pub peer_ltk: Option<LongTermKey>,
    pub signing: Option<SigningInfo>,
}

impl AuthenticationComplete {
    /// Create a successful `AuthenticationComplete` without any keys
    pub fn success(auth_state: AuthState) -> Self {
        AuthenticationComplete {
            status: Ok(()),
            auth_state,
            identity: None,
            local_ltk: None,
            peer_ltk: None,
            signing: None,
        }
    }

    /// Create a failed `AuthenticationComplete`
    pub fn failed(reason: PairingFailedReason) -> Self {
        AuthenticationComplete {
            status: Err(reason),
            auth_state: AuthState::empty(),
            identity: None,
            local_ltk: None,
            peer_ltk: None,
            signing: None,
        }
    }
}

/// What the Security Manager needs from the user to continue pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasscodeRequest {
    /// The passcode must be shown to the user
    Display(u32),
    /// The user must enter the passcode shown on the peer
    Input,
    /// The user must confirm that both devices show this number
    NumericComparison(u32),
}

/// Phases of pairing reported to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingPhase {
    /// Pairing has started
    Started,
    /// Pairing has completed (see the status for the result)
    Complete,
    /// A link was encrypted with previously bonded keys
    Encrypted,
    /// The bond was (or was not) written into the record store
    BondSaved,
    /// The peer's Central Address Resolution characteristic was read
    CarRead,
    /// The peer's Resolvable Private Address Only characteristic was read
    RpaoRead,
}

/// Status reported along with a [`PairingPhase`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingStatus {
    Success,
    /// Pairing failed
    Failed(PairingFailedReason),
    /// Pairing succeeded but the bond could not be saved
    NotSaved(crate::Error),
}

/// Security Manager
pub trait SecurityManager {
    /// Start pairing
    ///
    /// `pairing_request` is the pairing request of the initiating peer when this device is the
    /// responder.
    fn authenticate(
        &mut self,
        connection: ConnectionHandle,
        requirements: &SecurityRequirements,
        pairing_request: Option<&PairingRequest>,
    ) -> Result<(), PairingFailedReason>;

    /// Terminate (or refuse) pairing
    fn terminate_authentication(&mut self, connection: ConnectionHandle, reason: PairingFailedReason);

    /// Send a security request to the central
    fn send_security_request(&mut self, connection: ConnectionHandle, auth_req: AuthRequirements);

    /// Relay the user's response to a [`PasscodeRequest`]
    ///
    /// `None` is used when the user declined.
    fn passcode_response(&mut self, connection: ConnectionHandle, passcode: Option<u32>);
}

/// The link layer
pub trait LinkLayer {
    /// Start (or refresh) encryption of a link with a long term key
    ///
    /// A central starts encryption, a peripheral uses the key to reply to the central's long term
    /// key request.
    fn start_encryption(
        &mut self,
        connection: ConnectionHandle,
        ltk: &LongTermKey,
        authenticated: bool,
        secure_connections: bool,
    );

    /// Check if the controller is not scanning, advertising, or initiating
    ///
    /// The resolving list and white list can only be modified while this returns true.
    fn is_idle(&self) -> bool;

    fn clear_resolving_list(&mut self);

    fn add_resolving_list_entry(&mut self, entry: &ResolvingListEntry);

    fn set_privacy_mode(
        &mut self,
        identity_address_type: AddressType,
        identity_address: BluetoothDeviceAddress,
        mode: PrivacyMode,
    );

    fn clear_white_list(&mut self);

    fn add_to_white_list(&mut self, address_type: AddressType, address: BluetoothDeviceAddress);
}

/// GATT client
pub trait GattClient {
    /// Read a characteristic of the peer by its UUID
    ///
    /// The response must be fed back to the bond manager. False is returned if the read request
    /// could not be sent.
    fn read_by_uuid(&mut self, connection: ConnectionHandle, uuid: u16) -> bool;
}

/// GATT server
pub trait GattServer {
    /// Restore the characteristic configuration of a bonded client
    fn restore_client_config(&mut self, connection: ConnectionHandle, config: &[CharConfig]);

    /// Send a Service Changed indication
    ///
    /// True is returned when the indication was sent.
    fn send_service_changed(&mut self, connection: ConnectionHandle) -> bool;
}

/// Application callbacks
pub trait Application {
    fn passcode_needed(&mut self, connection: ConnectionHandle, request: PasscodeRequest);

    fn pairing_state_changed(&mut self, connection: ConnectionHandle, phase: PairingPhase, status: PairingStatus);
}

/// Every collaborator of a bond manager
pub trait BondHost: SecurityManager + LinkLayer + GattClient + GattServer + Application {}

impl<T> BondHost for T where T: SecurityManager + LinkLayer + GattClient + GattServer + Application {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_requirements_conversion() {
        let auth_req = AuthRequirements {
            bonding: true,
            mitm: true,
            secure_connections: true,
            key_press: false,
        };

        assert_eq!(0b0000_1101, auth_req.into_val());
        assert_eq!(auth_req, AuthRequirements::from_val(0b0000_1101));
        assert_eq!(AuthRequirements::default(), AuthRequirements::from_val(0));
    }

    #[test]
    fn requested_security_level() {
        let mut auth_req = AuthRequirements::default();

        assert_eq!(SecurityLevel::Unauthenticated, auth_req.security_level());

        auth_req.secure_connections = true;

        assert_eq!(SecurityLevel::Unauthenticated, auth_req.security_level());

        auth_req.mitm = true;

        assert_eq!(SecurityLevel::SecureConnectionsAuthenticated, auth_req.security_level());

        assert!(SecurityLevel::Authenticated < SecurityLevel::SecureConnectionsAuthenticated);
        assert!(SecurityLevel::Unauthenticated < SecurityLevel::Authenticated);
    }

    #[test]
    fn connection_handle_range() {
        assert!(ConnectionHandle::new(0x0EFF).is_ok());
        assert!(ConnectionHandle::new(0x0F00).is_err());
    }
}
