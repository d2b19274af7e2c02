//! Bond manager errors

use core::fmt::{self, Display, Formatter};

/// Errors from the non-volatile storage driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The driver failed to read an item
    Read,
    /// The driver failed to write an item
    Write,
    /// The driver failed to erase an item
    Erase,
    /// An item was read but it could not be converted into its type
    Corrupted,
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            StorageError::Read => f.write_str("failed to read from storage"),
            StorageError::Write => f.write_str("failed to write to storage"),
            StorageError::Erase => f.write_str("failed to erase from storage"),
            StorageError::Corrupted => f.write_str("stored data is corrupted"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<bincode::Error> for StorageError {
    fn from(_: bincode::Error) -> Self {
        StorageError::Corrupted
    }
}

/// General error of the bond manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Out of resources, such as the pairing queue being at capacity.
    NoResources,
    /// Every bond record slot is in use and cannot be evicted
    Full,
    /// Storage I/O failed
    Storage(StorageError),
    /// A parameter is out of its valid range
    InvalidParameter,
    /// There is no active link with the connection handle
    UnknownConnection,
    /// The operation requires a bond with the peer device
    NotBonded,
    /// An index is not a valid bond record slot
    InvalidSlot,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Error::NoResources => f.write_str("no resources"),
            Error::Full => f.write_str("bond records are full"),
            Error::Storage(e) => write!(f, "storage error: {}", e),
            Error::InvalidParameter => f.write_str("invalid parameter"),
            Error::UnknownConnection => f.write_str("unknown connection handle"),
            Error::NotBonded => f.write_str("operation requires bonding"),
            Error::InvalidSlot => f.write_str("invalid bond record slot"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::Storage(e)
    }
}
