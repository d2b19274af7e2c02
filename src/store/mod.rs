//! Bond record storage
//!
//! The [`RecordStore`] is a fixed size table of `N` bond record slots kept in non-volatile storage.
//! A record is split into separate storage items so that a single component, such as the
//! characteristic configuration table, can be updated without rewriting the keys. Every item is
//! converted to and from bytes with `bincode`, the storage driver only ever sees opaque byte
//! images.
//!
//! The store keeps a copy of every occupied slot in memory. Reads of the storage driver are only
//! done when the store is initialized and by [`read`](RecordStore::read).
//!
//! A slot is empty when its bond item is missing or holds the empty address marker (all bytes
//! 0xFF). Erasing a slot writes the marker before the key items are erased.

pub mod lru;
pub mod memory;

use crate::address::{AddressType, BluetoothDeviceAddress};
use crate::error::{Error, StorageError};
use crate::record::{BondRecord, CharConfig, LongTermKey, StateFlags, CHAR_CONFIG_TABLE_SIZE};
use crate::resolver::{self, AddressClass};
use lru::LruOrder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[cfg(feature = "signing")]
use crate::record::SigningInfo;

/// Identifier of an item within non-volatile storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NvItem {
    /// Address, address type, and state flags of the bond in a slot
    Bond(u8),
    LocalLtk(u8),
    PeerLtk(u8),
    PeerIrk(u8),
    #[cfg(feature = "signing")]
    PeerSigning(u8),
    CharConfig(u8),
    /// The LRU order table
    LruOrder,
}

/// A non-volatile storage driver
///
/// The driver must serialize its own I/O and a write must either fully succeed or fail.
pub trait NvStorage {
    /// Read an item
    ///
    /// `None` is returned if the item was never written (or was erased).
    fn read(&mut self, item: NvItem) -> Result<Option<Vec<u8>>, StorageError>;

    fn write(&mut self, item: NvItem, data: &[u8]) -> Result<(), StorageError>;

    /// Erase an item
    ///
    /// Erasing an item that does not exist is not an error.
    fn erase(&mut self, item: NvItem) -> Result<(), StorageError>;
}

/// The stored image of [`NvItem::Bond`]
#[derive(Serialize, Deserialize)]
struct BondEntry {
    address: BluetoothDeviceAddress,
    address_type: AddressType,
    flags: StateFlags,
}

impl BondEntry {
    const EMPTY: BondEntry = BondEntry {
        address: BluetoothDeviceAddress::EMPTY,
        address_type: AddressType::Public,
        flags: StateFlags::empty(),
    };
}

/// The result of adding a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Added {
    /// The slot the record was written to
    pub slot: u8,
    /// The record that previously occupied the slot
    ///
    /// This is the old record of the same peer when re-bonding, or the evicted record when the
    /// least recently used slot was reused.
    pub superseded: Option<BondRecord>,
}

/// The bond record store
pub struct RecordStore<S, const N: usize> {
    storage: S,
    slots: [Option<BondRecord>; N],
    lru: LruOrder<N>,
    lru_eviction: bool,
}

impl<S: NvStorage, const N: usize> RecordStore<S, N> {
    /// Initialize the record store from `storage`
    ///
    /// Every slot is loaded from storage. A slot that cannot be deserialized is erased. A missing or
    /// invalid LRU order table is replaced with the default order.
    ///
    /// # Error
    /// An error is returned if `N` is zero or larger than 255, or if the storage driver fails.
    pub fn init(storage: S, lru_eviction: bool) -> Result<Self, Error> {
        if N == 0 || N > u8::MAX as usize {
            return Err(Error::InvalidParameter);
        }

        let mut store = RecordStore {
            storage,
            slots: core::array::from_fn(|_| None),
            lru: LruOrder::new(),
            lru_eviction,
        };

        for slot in 0..N as u8 {
            match store.load_slot(slot) {
                Ok(record) => store.slots[slot as usize] = record,
                Err(StorageError::Corrupted) => {
                    log::warn!("(BM) bond record slot {} is corrupted and is erased", slot);

                    store.erase_items(slot)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let persisted_lru = Self::read_item::<Vec<u8>>(&mut store.storage, NvItem::LruOrder)
            .ok()
            .flatten()
            .and_then(|order| LruOrder::from_persisted(&order));

        match persisted_lru {
            Some(lru) => store.lru = lru,
            None => {
                log::debug!("(BM) LRU order table is missing or invalid, using the default order");

                store.persist_lru()?;
            }
        }

        log::info!("(BM) record store initialized with {} bonds", store.total_bonded());

        Ok(store)
    }

    fn read_item<T: DeserializeOwned>(storage: &mut S, item: NvItem) -> Result<Option<T>, StorageError> {
        match storage.read(item)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_item<T: Serialize>(storage: &mut S, item: NvItem, val: &T) -> Result<(), StorageError> {
        let bytes = bincode::serialize(val)?;

        storage.write(item, &bytes)
    }

    fn write_or_erase<T: Serialize>(storage: &mut S, item: NvItem, val: Option<&T>) -> Result<(), StorageError> {
        match val {
            Some(val) => Self::write_item(storage, item, val),
            None => storage.erase(item),
        }
    }

    fn load_slot(&mut self, slot: u8) -> Result<Option<BondRecord>, StorageError> {
        let entry = match Self::read_item::<BondEntry>(&mut self.storage, NvItem::Bond(slot))? {
            Some(entry) if !entry.address.is_empty_marker() => entry,
            _ => return Ok(None),
        };

        let mut record = BondRecord::new(entry.address, entry.address_type);

        record.flags = entry.flags;

        record.local_ltk = Self::read_item::<LongTermKey>(&mut self.storage, NvItem::LocalLtk(slot))?;

        record.peer_ltk = Self::read_item::<LongTermKey>(&mut self.storage, NvItem::PeerLtk(slot))?;

        if record.local_ltk.iter().chain(record.peer_ltk.iter()).any(|ltk| !ltk.is_valid()) {
            return Err(StorageError::Corrupted);
        }

        record.peer_irk = Self::read_item::<u128>(&mut self.storage, NvItem::PeerIrk(slot))?.unwrap_or_default();

        #[cfg(feature = "signing")]
        {
            record.peer_signing = Self::read_item::<SigningInfo>(&mut self.storage, NvItem::PeerSigning(slot))?;
        }

        if let Some(char_config) =
            Self::read_item::<[CharConfig; CHAR_CONFIG_TABLE_SIZE]>(&mut self.storage, NvItem::CharConfig(slot))?
        {
            record.char_config = char_config;
        }

        Ok(Some(record))
    }

    /// Write every item of a record
    ///
    /// The bond item is written last. Keys written before a failure are unreachable as long as the
    /// bond item of the slot is empty.
    fn write_slot(&mut self, slot: u8, record: &BondRecord) -> Result<(), StorageError> {
        let storage = &mut self.storage;

        Self::write_or_erase(storage, NvItem::LocalLtk(slot), record.local_ltk.as_ref())?;

        Self::write_or_erase(storage, NvItem::PeerLtk(slot), record.peer_ltk.as_ref())?;

        Self::write_or_erase(
            storage,
            NvItem::PeerIrk(slot),
            Some(&record.peer_irk).filter(|irk| **irk != 0),
        )?;

        #[cfg(feature = "signing")]
        Self::write_or_erase(storage, NvItem::PeerSigning(slot), record.peer_signing.as_ref())?;

        Self::write_item(storage, NvItem::CharConfig(slot), &record.char_config)?;

        let entry = BondEntry {
            address: record.address,
            address_type: record.address_type,
            flags: record.flags,
        };

        Self::write_item(storage, NvItem::Bond(slot), &entry)
    }

    /// Overwrite a slot with the empty marker and erase its key items
    fn erase_items(&mut self, slot: u8) -> Result<(), StorageError> {
        Self::write_item(&mut self.storage, NvItem::Bond(slot), &BondEntry::EMPTY)?;

        self.storage.erase(NvItem::LocalLtk(slot))?;
        self.storage.erase(NvItem::PeerLtk(slot))?;
        self.storage.erase(NvItem::PeerIrk(slot))?;

        #[cfg(feature = "signing")]
        self.storage.erase(NvItem::PeerSigning(slot))?;

        self.storage.erase(NvItem::CharConfig(slot))
    }

    fn persist_lru(&mut self) -> Result<(), StorageError> {
        Self::write_item(&mut self.storage, NvItem::LruOrder, &self.lru.as_slice())
    }

    /// Persist the LRU order after a record was written or erased
    ///
    /// The record itself is already in storage so a failure is only logged. The order table is
    /// rewritten on the next change and an invalid table is reset on initialization.
    fn save_lru(&mut self) {
        match self.persist_lru() {
            Ok(()) => log::trace!("(BM) LRU order {:?}", self.lru.as_slice()),
            Err(e) => log::warn!("(BM) failed to save LRU order: {}", e),
        }
    }

    /// Put back the record that was in a slot before a failed write
    ///
    /// If the previous record cannot be written again the slot is left empty.
    fn restore_slot(&mut self, slot: u8) {
        if let Some(previous) = self.slots[slot as usize].take() {
            match self.write_slot(slot, &previous) {
                Ok(()) => self.slots[slot as usize] = Some(previous),
                Err(e) => log::error!("(BM) bond for {} in slot {} is lost: {}", previous.address, slot, e),
            }
        }
    }

    fn check_slot(slot: u8) -> Result<usize, Error> {
        if (slot as usize) < N {
            Ok(slot as usize)
        } else {
            Err(Error::InvalidSlot)
        }
    }

    /// The number of bond record slots
    pub fn capacity(&self) -> usize {
        N
    }

    /// Find the slot of the record for an identity address
    pub fn find_by_identity(&self, address: &BluetoothDeviceAddress, address_type: AddressType) -> Option<u8> {
        self.iter()
            .find(|(_, record)| record.is_identity(address, address_type))
            .map(|(slot, _)| slot)
    }

    /// Find the slot of the record for an over the air address
    ///
    /// If the address is not a stored identity address and it is a resolvable private address,
    /// it is resolved against the IRK of every record.
    pub fn find_by_address(&self, address: &BluetoothDeviceAddress, address_type: AddressType) -> Option<u8> {
        self.find_by_identity(address, address_type).or_else(|| {
            if address_type == AddressType::Random
                && resolver::classify(address_type, address) == AddressClass::Resolvable
            {
                self.iter()
                    .find(|(_, record)| resolver::resolve(address, record.peer_irk))
                    .map(|(slot, _)| slot)
            } else {
                None
            }
        })
    }

    /// Check if there is a record for an identity address
    pub fn contains_identity(&self, address: &BluetoothDeviceAddress, address_type: AddressType) -> bool {
        self.find_by_identity(address, address_type).is_some()
    }

    /// Get a slot for a new record
    ///
    /// The first empty slot is returned. If every slot is occupied and LRU eviction is enabled the
    /// least recently used slot is returned.
    pub fn allocate(&self) -> Result<u8, Error> {
        self.allocate_excluding(|_| false)
    }

    /// Get a slot for a new record where slots for which `excluded` returns true are never evicted
    pub fn allocate_excluding<F>(&self, excluded: F) -> Result<u8, Error>
    where
        F: Fn(u8) -> bool,
    {
        if let Some(slot) = self.slots.iter().position(|slot| slot.is_none()) {
            return Ok(slot as u8);
        }

        if self.lru_eviction {
            self.lru.least_recent_excluding(excluded).ok_or(Error::Full)
        } else {
            Err(Error::Full)
        }
    }

    /// Add a record
    ///
    /// If there is already a record for the identity of `record` it is replaced, otherwise a slot
    /// is allocated. The characteristic configuration table of the record is reset and the slot
    /// becomes the most recently used.
    pub fn add(&mut self, record: BondRecord) -> Result<Added, Error> {
        self.add_excluding(record, |_| false)
    }

    /// Add a record where slots for which `excluded` returns true are never evicted
    pub fn add_excluding<F>(&mut self, mut record: BondRecord, excluded: F) -> Result<Added, Error>
    where
        F: Fn(u8) -> bool,
    {
        let slot = match self.find_by_identity(&record.address, record.address_type) {
            Some(slot) => slot,
            None => self.allocate_excluding(excluded)?,
        };

        record.clear_char_config();

        // an occupied slot is marked empty first so a partial write never mixes two records
        if self.slots[slot as usize].is_some() {
            Self::write_item(&mut self.storage, NvItem::Bond(slot), &BondEntry::EMPTY)?;
        }

        if let Err(e) = self.write_slot(slot, &record) {
            log::error!("(BM) failed to write bond record for {}: {}", record.address, e);

            self.restore_slot(slot);

            return Err(e.into());
        }

        match self.slots[slot as usize].as_ref() {
            Some(old) if old.is_identity(&record.address, record.address_type) => {
                log::info!("(BM) bond record for {} updated in slot {}", old.address, slot)
            }
            Some(old) => log::info!("(BM) bond for {} evicted from slot {}", old.address, slot),
            None => log::info!("(BM) bond for {} added to slot {}", record.address, slot),
        }

        let superseded = self.slots[slot as usize].replace(record);

        self.lru.touch(slot);

        self.save_lru();

        Ok(Added { slot, superseded })
    }

    /// Read a record from storage
    pub fn read(&mut self, slot: u8) -> Result<BondRecord, Error> {
        Self::check_slot(slot)?;

        self.load_slot(slot)?.ok_or(Error::NotBonded)
    }

    /// Get the record in a slot
    pub fn get(&self, slot: u8) -> Option<&BondRecord> {
        self.slots.get(slot as usize).and_then(|record| record.as_ref())
    }

    /// Erase the record in a slot
    ///
    /// The erased record is returned. Erasing an empty slot does nothing.
    pub fn erase(&mut self, slot: u8) -> Result<Option<BondRecord>, Error> {
        let index = Self::check_slot(slot)?;

        if self.slots[index].is_none() {
            return Ok(None);
        }

        self.erase_items(slot)?;

        let erased = self.slots[index].take();

        self.lru.demote(slot);

        self.save_lru();

        if let Some(record) = erased.as_ref() {
            log::info!("(BM) bond for {} ({}) erased", record.address, record.address_type);
        }

        Ok(erased)
    }

    /// Erase every record
    pub fn erase_all(&mut self) -> Result<(), Error> {
        for slot in 0..N as u8 {
            self.erase(slot)?;
        }

        Ok(())
    }

    /// The number of occupied slots
    pub fn total_bonded(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Mark a slot as the most recently used
    pub fn touch(&mut self, slot: u8) -> Result<(), Error> {
        Self::check_slot(slot)?;

        if self.lru.as_slice().first() != Some(&slot) {
            self.lru.touch(slot);

            self.persist_lru()?;
        }

        Ok(())
    }

    /// Set the state flags of a record
    pub fn set_flags(&mut self, slot: u8, flags: StateFlags) -> Result<(), Error> {
        let index = Self::check_slot(slot)?;

        let record = self.slots[index].as_ref().ok_or(Error::NotBonded)?;

        if record.flags == flags {
            return Ok(());
        }

        let entry = BondEntry {
            address: record.address,
            address_type: record.address_type,
            flags,
        };

        Self::write_item(&mut self.storage, NvItem::Bond(slot), &entry)?;

        if let Some(record) = self.slots[index].as_mut() {
            record.flags = flags;
        }

        Ok(())
    }

    /// Update the characteristic configuration table of a record
    ///
    /// False is returned if the table has no room for the configuration.
    pub fn update_char_config(&mut self, slot: u8, handle: u16, value: u16) -> Result<bool, Error> {
        let index = Self::check_slot(slot)?;

        let record = self.slots[index].as_mut().ok_or(Error::NotBonded)?;

        let previous = record.char_config;

        if !record.set_char_config(handle, value) {
            return Ok(false);
        }

        if previous != record.char_config {
            let table = record.char_config;

            if let Err(e) = Self::write_item(&mut self.storage, NvItem::CharConfig(slot), &table) {
                if let Some(record) = self.slots[index].as_mut() {
                    record.char_config = previous;
                }

                return Err(e.into());
            }
        }

        Ok(true)
    }

    /// Set the sign counter of the peer's signing key
    #[cfg(feature = "signing")]
    pub fn set_sign_counter(&mut self, slot: u8, sign_counter: u32) -> Result<(), Error> {
        let index = Self::check_slot(slot)?;

        let record = self.slots[index].as_mut().ok_or(Error::NotBonded)?;

        let mut signing = record.peer_signing.ok_or(Error::NotBonded)?;

        signing.sign_counter = sign_counter;

        Self::write_item(&mut self.storage, NvItem::PeerSigning(slot), &signing)?;

        record.peer_signing = Some(signing);

        Ok(())
    }

    /// Iterate over the occupied slots
    pub fn iter(&self) -> impl Iterator<Item = (u8, &BondRecord)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, record)| record.as_ref().map(|record| (slot as u8, record)))
    }

    /// Iterate over the records
    pub fn records(&self) -> impl Iterator<Item = &BondRecord> + '_ {
        self.slots.iter().flatten()
    }

    /// The LRU order table, the most recently used slot is first
    pub fn lru_order(&self) -> &[u8] {
        self.lru.as_slice()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}

#[cfg(test)]
mod tests;
