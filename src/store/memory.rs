//! Volatile storage
//!
//! `MemoryStorage` keeps every item in memory. It is meant for hosts without non-volatile memory
//! (bonds are lost on reset) and for testing. Failures can be injected to exercise the handling of
//! storage errors.

use super::{NvItem, NvStorage};
use crate::error::StorageError;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    items: BTreeMap<NvItem, Vec<u8>>,
    fail_writes: bool,
    fail_reads: bool,
    fail_item: Option<NvItem>,
    writes: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write (and erase) fail
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail
    }

    /// Make every following read fail
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail
    }

    /// Make every following write of `item` fail
    pub fn set_fail_item(&mut self, item: Option<NvItem>) {
        self.fail_item = item
    }

    /// The number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Get the raw bytes of an item
    pub fn get(&self, item: NvItem) -> Option<&[u8]> {
        self.items.get(&item).map(|bytes| bytes.as_slice())
    }

    /// Overwrite the raw bytes of an item
    pub fn insert_raw(&mut self, item: NvItem, bytes: Vec<u8>) {
        self.items.insert(item, bytes);
    }
}

impl NvStorage for MemoryStorage {
    fn read(&mut self, item: NvItem) -> Result<Option<Vec<u8>>, StorageError> {
        if self.fail_reads {
            return Err(StorageError::Read);
        }

        Ok(self.items.get(&item).cloned())
    }

    fn write(&mut self, item: NvItem, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes || self.fail_item == Some(item) {
            return Err(StorageError::Write);
        }

        self.writes += 1;

        self.items.insert(item, data.to_vec());

        Ok(())
    }

    fn erase(&mut self, item: NvItem) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Erase);
        }

        self.items.remove(&item);

        Ok(())
    }
}
