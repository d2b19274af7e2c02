//! Record store tests

use super::memory::MemoryStorage;
use super::*;
use quickcheck_macros::quickcheck;

const IRK: u128 = 0xec0234a3_57c8ad05_341010a6_0a397d9b;

fn address(byte: u8) -> BluetoothDeviceAddress {
    BluetoothDeviceAddress([byte, 0x11, 0x22, 0x33, 0x44, 0x55])
}

fn record(byte: u8) -> BondRecord {
    let mut record = BondRecord::new(address(byte), AddressType::Public);

    record.local_ltk = Some(LongTermKey::new(0x1000 + byte as u128, 0x22, 0x33, 16).unwrap());
    record.peer_ltk = Some(LongTermKey::new(0x2000 + byte as u128, 0x44, 0x55, 7).unwrap());
    record.flags = StateFlags::AUTHENTICATED;

    record
}

fn store<const N: usize>(lru_eviction: bool) -> RecordStore<MemoryStorage, N> {
    RecordStore::init(MemoryStorage::new(), lru_eviction).unwrap()
}

fn fill<const N: usize>(store: &mut RecordStore<MemoryStorage, N>) {
    for byte in 0..N as u8 {
        store.add(record(byte)).unwrap();
    }
}

#[test]
fn capacity_is_validated() {
    assert!(RecordStore::<_, 0>::init(MemoryStorage::new(), false).is_err());
    assert!(RecordStore::<_, 256>::init(MemoryStorage::new(), false).is_err());
    assert!(RecordStore::<_, 255>::init(MemoryStorage::new(), false).is_ok());
}

#[test]
fn add_find_read() {
    let mut store = store::<4>(false);

    let mut written = record(1);

    written.peer_irk = IRK;
    written.set_char_config(0x10, 1);

    #[cfg(feature = "signing")]
    {
        written.peer_signing = Some(SigningInfo {
            csrk: 0xABCD,
            sign_counter: 3,
        });
    }

    let added = store.add(written.clone()).unwrap();

    assert_eq!(None, added.superseded);
    assert_eq!(Some(added.slot), store.find_by_address(&address(1), AddressType::Public));
    assert_eq!(Some(added.slot), store.find_by_address(&address(1), AddressType::PublicIdentity));
    assert_eq!(None, store.find_by_address(&address(1), AddressType::Random));

    written.clear_char_config();

    assert_eq!(written, store.read(added.slot).unwrap());
    assert_eq!(Some(&written), store.get(added.slot));
    assert_eq!(1, store.total_bonded());
}

#[test]
fn read_empty_and_invalid_slots() {
    let mut store = store::<2>(false);

    assert_eq!(Err(Error::NotBonded), store.read(1));
    assert_eq!(Err(Error::InvalidSlot), store.read(2));
    assert_eq!(Err(Error::InvalidSlot), store.erase(2));
}

#[test]
fn find_by_resolvable_address() {
    let mut store = store::<4>(false);

    let mut with_irk = record(1);

    with_irk.peer_irk = IRK;

    store.add(record(0)).unwrap();

    let slot = store.add(with_irk).unwrap().slot;

    let rpa = BluetoothDeviceAddress::new_resolvable(IRK, [1, 2, 3]);

    assert_eq!(Some(slot), store.find_by_address(&rpa, AddressType::Random));

    // a resolvable address of an unknown key
    let rpa = BluetoothDeviceAddress::new_resolvable(IRK + 1, [1, 2, 3]);

    assert_eq!(None, store.find_by_address(&rpa, AddressType::Random));
}

#[test]
fn re_adding_replaces_the_record() {
    let mut store = store::<4>(false);

    let first = store.add(record(1)).unwrap();

    let mut updated = record(1);

    updated.flags = StateFlags::SECURE_CONNECTIONS | StateFlags::AUTHENTICATED;

    let second = store.add(updated.clone()).unwrap();

    assert_eq!(first.slot, second.slot);
    assert_eq!(Some(record(1)), second.superseded);
    assert_eq!(1, store.total_bonded());
    assert_eq!(updated, store.read(second.slot).unwrap());
}

#[test]
fn erase_is_idempotent() {
    let mut store = store::<3>(false);

    fill(&mut store);

    let erased = store.erase(1).unwrap();

    assert_eq!(Some(record(1)), erased);

    let lru = store.lru_order().to_vec();
    let writes = store.storage().write_count();

    assert_eq!(None, store.erase(1).unwrap());

    assert_eq!(lru, store.lru_order());
    assert_eq!(writes, store.storage().write_count());
    assert_eq!(2, store.total_bonded());
    assert_eq!(Err(Error::NotBonded), store.read(1));

    // the bond item holds the empty marker and the keys are gone
    let bond = store.storage().get(NvItem::Bond(1)).unwrap().to_vec();
    let entry: BondEntry = bincode::deserialize(&bond).unwrap();

    assert!(entry.address.is_empty_marker());
    assert!(store.storage().get(NvItem::LocalLtk(1)).is_none());
    assert!(store.storage().get(NvItem::PeerLtk(1)).is_none());
}

#[test]
fn erase_all() {
    let mut store = store::<3>(false);

    fill(&mut store);

    store.erase_all().unwrap();

    assert_eq!(0, store.total_bonded());
    assert_eq!(0, store.allocate().unwrap());
}

#[test]
fn full_without_eviction() {
    let mut store = store::<3>(false);

    fill(&mut store);

    assert_eq!(Err(Error::Full), store.allocate());
    assert_eq!(Err(Error::Full), store.add(record(9)).map(|added| added.slot));

    for byte in 0..3 {
        assert_eq!(record(byte), store.read(byte).unwrap());
    }
}

#[test]
fn eviction_takes_least_recently_used() {
    let mut store = store::<3>(true);

    fill(&mut store);

    assert_eq!(&[2, 1, 0], store.lru_order());

    store.touch(0).unwrap();

    assert_eq!(&[0, 2, 1], store.lru_order());

    let last = *store.lru_order().last().unwrap();

    assert_eq!(Ok(last), store.allocate());

    let added = store.add(record(9)).unwrap();

    assert_eq!(last, added.slot);
    assert_eq!(Some(record(1)), added.superseded);
    assert_eq!(Some(&last), store.lru_order().first());
    assert_eq!(None, store.find_by_identity(&address(1), AddressType::Public));
    assert_eq!(3, store.total_bonded());
}

#[test]
fn eviction_skips_excluded_slots() {
    let mut store = store::<2>(true);

    fill(&mut store);

    let least_recent = *store.lru_order().last().unwrap();

    let added = store.add_excluding(record(9), |slot| slot == least_recent).unwrap();

    assert_ne!(least_recent, added.slot);

    assert_eq!(Err(Error::Full), store.allocate_excluding(|_| true));
}

#[test]
fn failed_write_keeps_previous_state() {
    let mut store = store::<2>(false);

    store.add(record(0)).unwrap();

    store.storage_mut().set_fail_writes(true);

    assert_eq!(
        Err(Error::Storage(StorageError::Write)),
        store.add(record(1)).map(|added| added.slot)
    );

    let mut updated = record(0);

    updated.peer_irk = IRK;

    assert!(store.add(updated).is_err());

    assert_eq!(1, store.total_bonded());
    assert_eq!(Some(&record(0)), store.get(0));

    store.storage_mut().set_fail_writes(false);

    assert_eq!(record(0), store.read(0).unwrap());
}

/// Storage where writes of one item fail a number of times
#[derive(Clone, Default)]
struct FailingItem {
    inner: MemoryStorage,
    item: Option<NvItem>,
    failures: usize,
}

impl FailingItem {
    fn fail(&mut self, item: NvItem, failures: usize) {
        self.item = Some(item);
        self.failures = failures;
    }
}

impl NvStorage for FailingItem {
    fn read(&mut self, item: NvItem) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.read(item)
    }

    fn write(&mut self, item: NvItem, data: &[u8]) -> Result<(), StorageError> {
        if self.item == Some(item) && self.failures > 0 {
            self.failures -= 1;

            return Err(StorageError::Write);
        }

        self.inner.write(item, data)
    }

    fn erase(&mut self, item: NvItem) -> Result<(), StorageError> {
        self.inner.erase(item)
    }
}

fn failing_store<const N: usize>(lru_eviction: bool) -> RecordStore<FailingItem, N> {
    RecordStore::init(FailingItem::default(), lru_eviction).unwrap()
}

#[test]
fn failed_eviction_never_mixes_records() {
    let mut store = failing_store::<1>(true);

    store.add(record(0)).unwrap();

    store.storage_mut().fail(NvItem::CharConfig(0), usize::MAX);

    assert_eq!(
        Err(Error::Storage(StorageError::Write)),
        store.add(record(9)).map(|added| added.slot)
    );

    // the keys of the new peer were written but the slot is empty
    assert_eq!(None, store.get(0));
    assert_eq!(Err(Error::NotBonded), store.read(0));
    assert_eq!(0, store.total_bonded());

    let reloaded = RecordStore::<_, 1>::init(store.storage().clone(), true).unwrap();

    assert_eq!(0, reloaded.total_bonded());
}

#[test]
fn failed_eviction_restores_the_evicted_record() {
    let mut store = failing_store::<1>(true);

    store.add(record(0)).unwrap();

    store.storage_mut().fail(NvItem::CharConfig(0), 1);

    assert!(store.add(record(9)).is_err());

    assert_eq!(Some(&record(0)), store.get(0));
    assert_eq!(record(0), store.read(0).unwrap());
    assert_eq!(None, store.find_by_identity(&address(9), AddressType::Public));
}

#[test]
fn failed_update_keeps_previous_keys() {
    let mut store = failing_store::<2>(false);

    store.add(record(0)).unwrap();

    let mut updated = record(0);

    updated.peer_irk = IRK;
    updated.local_ltk = record(5).local_ltk;

    store.storage_mut().fail(NvItem::PeerIrk(0), 1);

    assert!(store.add(updated).is_err());

    assert_eq!(record(0), store.read(0).unwrap());
    assert_eq!(Some(&record(0)), store.get(0));
}

#[test]
fn failed_lru_write_keeps_the_record() {
    let mut store = failing_store::<2>(false);

    store.storage_mut().fail(NvItem::LruOrder, usize::MAX);

    let added = store.add(record(1)).unwrap();

    assert_eq!(1, store.total_bonded());
    assert_eq!(Some(added.slot), store.find_by_identity(&address(1), AddressType::Public));
    assert_eq!(record(1), store.read(added.slot).unwrap());

    assert_eq!(Some(record(1)), store.erase(added.slot).unwrap());
    assert_eq!(0, store.total_bonded());
}

#[test]
fn reload_from_storage() {
    let mut store = store::<3>(false);

    fill(&mut store);

    store.erase(1).unwrap();
    store.touch(0).unwrap();

    assert!(store.update_char_config(0, 0x20, 2).unwrap());
    store.set_flags(2, StateFlags::SERVICE_CHANGED).unwrap();

    let reloaded = RecordStore::<_, 3>::init(store.storage().clone(), false).unwrap();

    assert_eq!(store.lru_order(), reloaded.lru_order());
    assert_eq!(2, reloaded.total_bonded());
    assert_eq!(Some(0x2), reloaded.get(0).and_then(|record| record.get_char_config(0x20)));
    assert_eq!(
        Some(StateFlags::SERVICE_CHANGED),
        reloaded.get(2).map(|record| record.flags)
    );
}

#[test]
fn corrupted_slot_is_erased() {
    let mut storage = MemoryStorage::new();

    storage.insert_raw(NvItem::Bond(0), vec![0xA5]);
    storage.insert_raw(NvItem::LruOrder, vec![1, 2, 3]);

    let store = RecordStore::<_, 2>::init(storage, false).unwrap();

    assert_eq!(0, store.total_bonded());
    assert_eq!(&[0, 1], store.lru_order());
}

#[test]
fn char_config_table_full() {
    let mut store = store::<1>(false);

    store.add(record(0)).unwrap();

    for handle in 1..=CHAR_CONFIG_TABLE_SIZE as u16 {
        assert!(store.update_char_config(0, handle, 1).unwrap());
    }

    assert!(!store.update_char_config(0, 0x99, 1).unwrap());
    assert_eq!(Err(Error::InvalidSlot), store.update_char_config(1, 1, 1));
}

/// Operations for the store properties
///
/// `op % 3` selects add, erase, or touch and `byte` selects the address (or slot).
fn apply<const N: usize>(store: &mut RecordStore<MemoryStorage, N>, op: u8, byte: u8) {
    match op % 3 {
        0 => {
            let _ = store.add(record(byte % 8));
        }
        1 => {
            store.erase(byte % N as u8).unwrap();
        }
        _ => {
            store.touch(byte % N as u8).unwrap();
        }
    }
}

fn slots_are_unique<const N: usize>(store: &RecordStore<MemoryStorage, N>) -> bool {
    let identities: Vec<_> = store.records().map(|record| (record.address, record.address_type)).collect();

    identities
        .iter()
        .enumerate()
        .all(|(index, identity)| !identities[index + 1..].contains(identity))
}

fn lru_is_permutation<const N: usize>(store: &RecordStore<MemoryStorage, N>) -> bool {
    let mut order = store.lru_order().to_vec();

    order.sort();

    order == (0..N as u8).collect::<Vec<_>>()
}

#[quickcheck]
fn slot_uniqueness_with_eviction(ops: Vec<(u8, u8)>) -> bool {
    let mut store = store::<4>(true);

    ops.into_iter().all(|(op, byte)| {
        apply(&mut store, op, byte);

        slots_are_unique(&store) && lru_is_permutation(&store)
    })
}

#[quickcheck]
fn slot_uniqueness_without_eviction(ops: Vec<(u8, u8)>) -> bool {
    let mut store = store::<3>(false);

    ops.into_iter().all(|(op, byte)| {
        apply(&mut store, op, byte);

        slots_are_unique(&store) && lru_is_permutation(&store) && store.total_bonded() <= 3
    })
}

#[quickcheck]
fn erase_twice_equals_erase_once(fill_count: u8, slot: u8) -> bool {
    let mut once = store::<4>(false);
    let mut twice = store::<4>(false);

    for byte in 0..fill_count % 5 {
        once.add(record(byte)).unwrap();
        twice.add(record(byte)).unwrap();
    }

    let slot = slot % 4;

    once.erase(slot).unwrap();
    twice.erase(slot).unwrap();
    twice.erase(slot).unwrap();

    once.lru_order() == twice.lru_order()
        && once.records().eq(twice.records())
        && once.storage().get(NvItem::Bond(slot)) == twice.storage().get(NvItem::Bond(slot))
}
