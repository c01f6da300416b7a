//! An in-memory [`KVStore`] that tests can make fail.

use std::{
    collections::BTreeMap,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use timeslot_bft::persistence::pluggables::{KVGet, KVStore, WriteBatch};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Clones share the same map, so the test keeps a handle on a store after giving it to an actor, and
/// can hand it to the actor's replacement.
#[derive(Clone, Default)]
pub(crate) struct MemKVStore {
    map: Arc<Mutex<Map>>,
    failing: Arc<AtomicBool>,
}

impl MemKVStore {
    pub(crate) fn new() -> MemKVStore {
        MemKVStore::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    /// Make every later write fail, without touching the map, until called again with `false`.
    pub(crate) fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl KVStore for MemKVStore {
    type WriteBatch = MemWriteBatch;
    type Snapshot<'a> = MemSnapshot;

    fn write(&mut self, wb: Self::WriteBatch) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "writes disabled by test"));
        }
        let mut map = self.map.lock().unwrap();
        for (key, value) in wb.0 {
            match value {
                Some(value) => map.insert(key, value),
                None => map.remove(&key),
            };
        }
        Ok(())
    }

    fn snapshot<'b>(&'b self) -> MemSnapshot {
        MemSnapshot(self.map.lock().unwrap().clone())
    }
}

impl KVGet for MemKVStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.lock().unwrap().get(key).cloned()
    }
}

/// Sets and deletes, applied in the order they were made.
pub(crate) struct MemWriteBatch(Vec<(Vec<u8>, Option<Vec<u8>>)>);

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch(Vec::new())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.0.push((key.to_vec(), Some(value.to_vec())));
    }

    fn delete(&mut self, key: &[u8]) {
        self.0.push((key.to_vec(), None));
    }
}

/// A copy of the map as of [`KVStore::snapshot`].
pub(crate) struct MemSnapshot(Map);

impl KVGet for MemSnapshot {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.get(key).cloned()
    }
}
