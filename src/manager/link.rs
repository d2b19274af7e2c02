//! Active links
//!
//! The bond manager tracks the security of every link. The security of a link is one of
//! [`LinkSecurity`]. When a security level is asked for, [`LinkSecurity::decide`] determines whether
//! the link must be paired or whether encrypting it with the bonded keys is enough.

use crate::address::{AddressType, BluetoothDeviceAddress};
use crate::host::{ConnectionHandle, Role, SecurityLevel};

/// The security of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSecurity {
    /// The link is not encrypted
    NoSecurity,
    /// The link is being paired
    ///
    /// This holds the security level of the link before pairing started.
    Authenticating(Option<SecurityLevel>),
    /// The link is encrypted
    Encrypted(SecurityLevel),
}

/// What is done to achieve a requested security level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityAction {
    /// Nothing, the link is already at the security level
    None,
    /// Pairing is in progress, the request is satisfied by its completion
    Wait,
    /// (Re)start encryption with the bonded keys
    Encrypt,
    /// Pair
    Pair,
}

impl LinkSecurity {
    /// The current security level, `None` if the link is not encrypted
    pub fn level(self) -> Option<SecurityLevel> {
        match self {
            LinkSecurity::NoSecurity => None,
            LinkSecurity::Authenticating(before) => before,
            LinkSecurity::Encrypted(level) => Some(level),
        }
    }

    /// The security of the link after pairing failed
    pub fn after_failed_pairing(self) -> Self {
        match self.level() {
            Some(level) => LinkSecurity::Encrypted(level),
            None => LinkSecurity::NoSecurity,
        }
    }

    /// Decide how to satisfy a request for the security level `requested`
    ///
    /// `bonded` is the security level of the bonded keys for the peer, `None` if the peer is not
    /// bonded. Pairing is only done when neither the current encryption nor the bond is at least
    /// the requested level.
    pub fn decide(self, requested: SecurityLevel, bonded: Option<SecurityLevel>) -> SecurityAction {
        match self {
            LinkSecurity::Authenticating(_) => SecurityAction::Wait,
            LinkSecurity::Encrypted(level) if requested <= level => match bonded {
                Some(_) => SecurityAction::Encrypt,
                None => SecurityAction::None,
            },
            _ => match bonded {
                Some(bonded) if requested <= bonded => SecurityAction::Encrypt,
                _ => SecurityAction::Pair,
            },
        }
    }
}

/// Information on an active link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub connection: ConnectionHandle,
    /// The over the air address of the peer
    pub address: BluetoothDeviceAddress,
    pub address_type: AddressType,
    pub role: Role,
    /// The slot of the peer's bond record
    pub slot: Option<u8>,
    pub security: LinkSecurity,
    /// The security level of the bonded keys given to the link layer for encrypting the link
    pub pending_key_level: Option<SecurityLevel>,
}

impl LinkInfo {
    pub(crate) fn new(
        connection: ConnectionHandle,
        address: BluetoothDeviceAddress,
        address_type: AddressType,
        role: Role,
        slot: Option<u8>,
    ) -> Self {
        LinkInfo {
            connection,
            address,
            address_type,
            role,
            slot,
            security: LinkSecurity::NoSecurity,
            pending_key_level: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use SecurityLevel::*;

    #[test]
    fn unencrypted_link() {
        let security = LinkSecurity::NoSecurity;

        assert_eq!(SecurityAction::Pair, security.decide(Unauthenticated, None));
        assert_eq!(SecurityAction::Encrypt, security.decide(Authenticated, Some(Authenticated)));
        assert_eq!(
            SecurityAction::Pair,
            security.decide(SecureConnectionsAuthenticated, Some(Authenticated))
        );
    }

    #[test]
    fn encrypted_link() {
        let security = LinkSecurity::Encrypted(Authenticated);

        assert_eq!(SecurityAction::None, security.decide(Unauthenticated, None));
        assert_eq!(SecurityAction::Encrypt, security.decide(Authenticated, Some(Authenticated)));
        assert_eq!(SecurityAction::Pair, security.decide(SecureConnectionsAuthenticated, None));
        assert_eq!(
            SecurityAction::Encrypt,
            security.decide(SecureConnectionsAuthenticated, Some(SecureConnectionsAuthenticated))
        );
    }

    #[test]
    fn authenticating_link() {
        let security = LinkSecurity::Authenticating(Some(Unauthenticated));

        assert_eq!(SecurityAction::Wait, security.decide(SecureConnectionsAuthenticated, None));
        assert_eq!(LinkSecurity::Encrypted(Unauthenticated), security.after_failed_pairing());
        assert_eq!(
            LinkSecurity::NoSecurity,
            LinkSecurity::Authenticating(None).after_failed_pairing()
        );
    }
}
