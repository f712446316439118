//! Typed tables with a buffered write-through toggle.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{DbError, KvStore, TableKey};

/// A typed table over a [`KvStore`].
///
/// Values are bincode-encoded. With write-through disabled, writes collect
/// in a RAM buffer (`None` marking a pending delete) and every read path
/// merges the buffer over the backend; re-enabling write-through flushes the
/// buffer as one batch. This is what lets a reindex avoid a disk write per
/// record.
pub struct Table<K, V> {
    name: &'static str,
    store: KvStore,
    buffer: RwLock<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    write_through: AtomicBool,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K: TableKey, V: Serialize + DeserializeOwned> Table<K, V> {
    /// Open (creating if missing) the table's store under `dir/name`.
    pub fn open(dir: &Path, name: &'static str) -> Result<Self, DbError> {
        let store = KvStore::open(&dir.join(name))?;
        Ok(Self::with_store(store, name))
    }

    /// A fresh in-memory table.
    pub fn in_memory(name: &'static str) -> Self {
        Self::with_store(KvStore::memory(), name)
    }

    fn with_store(store: KvStore, name: &'static str) -> Self {
        Self {
            name,
            store,
            buffer: RwLock::new(BTreeMap::new()),
            write_through: AtomicBool::new(true),
            _types: PhantomData,
        }
    }

    /// Table name (the store directory name).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Point read.
    pub fn get(&self, key: &K) -> Result<Option<V>, DbError> {
        let encoded = key.encode_key();
        if let Some(entry) = self.buffer.read().get(&encoded) {
            return match entry {
                Some(bytes) => Ok(Some(self.decode_value(bytes)?)),
                None => Ok(None),
            };
        }
        match self.store.get(&encoded)? {
            Some(bytes) => Ok(Some(self.decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// True if the key is present.
    pub fn contains(&self, key: &K) -> Result<bool, DbError> {
        Ok(self.get(key)?.is_some())
    }

    /// Point write.
    pub fn put(&self, key: &K, value: &V) -> Result<(), DbError> {
        let encoded_key = key.encode_key();
        let encoded_value =
            bincode::serialize(value).expect("table values encode infallibly");
        if self.write_through.load(Ordering::Acquire) {
            self.store.put(&encoded_key, &encoded_value)
        } else {
            self.buffer.write().insert(encoded_key, Some(encoded_value));
            Ok(())
        }
    }

    /// Point delete; absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<(), DbError> {
        let encoded = key.encode_key();
        if self.write_through.load(Ordering::Acquire) {
            self.store.delete(&encoded)
        } else {
            self.buffer.write().insert(encoded, None);
            Ok(())
        }
    }

    /// Toggle write-through. Enabling it flushes the RAM buffer to the
    /// backend in a single batch.
    pub fn set_write_through(&self, enabled: bool) -> Result<(), DbError> {
        if enabled {
            let drained = std::mem::take(&mut *self.buffer.write());
            if !drained.is_empty() {
                self.store.apply_batch(drained)?;
            }
        }
        self.write_through.store(enabled, Ordering::Release);
        Ok(())
    }

    /// First entry in key order.
    pub fn first(&self) -> Result<Option<(K, V)>, DbError> {
        let mut out = None;
        self.merged_scan(None, |key, value| {
            out = Some((key.to_vec(), value.to_vec()));
            false
        })?;
        out.map(|(k, v)| self.decode_pair(&k, &v)).transpose()
    }

    /// Last entry in key order.
    pub fn last(&self) -> Result<Option<(K, V)>, DbError> {
        let buffer = self.buffer.read();
        // Greatest live buffered entry.
        let buffered = buffer
            .iter()
            .rev()
            .find_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())));
        // Greatest backend entry not shadowed by the buffer.
        let mut backend = None;
        self.store.scan_rev(|key, value| {
            if buffer.contains_key(key) {
                // Shadowed: a live shadow was already considered above, a
                // tombstone hides the backend value. Keep walking.
                true
            } else {
                backend = Some((key.to_vec(), value.to_vec()));
                false
            }
        })?;
        drop(buffer);

        let best = match (buffered, backend) {
            (Some(a), Some(b)) => Some(if a.0 >= b.0 { a } else { b }),
            (a, b) => a.or(b),
        };
        best.map(|(k, v)| self.decode_pair(&k, &v)).transpose()
    }

    /// First entry with key >= `key`.
    pub fn lower_bound(&self, key: &K) -> Result<Option<(K, V)>, DbError> {
        let from = key.encode_key();
        let mut out = None;
        self.merged_scan(Some(&from), |key, value| {
            out = Some((key.to_vec(), value.to_vec()));
            false
        })?;
        out.map(|(k, v)| self.decode_pair(&k, &v)).transpose()
    }

    /// Ascending scan over all entries. The callback returns `false` to
    /// stop early.
    pub fn for_each(&self, mut f: impl FnMut(K, V) -> bool) -> Result<(), DbError> {
        let mut failure = None;
        self.merged_scan(None, |key, value| match self.decode_pair(key, value) {
            Ok((key, value)) => f(key, value),
            Err(error) => {
                failure = Some(error);
                false
            }
        })?;
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Ascending scan starting at the first key >= `from`.
    pub fn for_each_from(&self, from: &K, mut f: impl FnMut(K, V) -> bool) -> Result<(), DbError> {
        let start = from.encode_key();
        let mut failure = None;
        self.merged_scan(Some(&start), |key, value| match self.decode_pair(key, value) {
            Ok((key, value)) => f(key, value),
            Err(error) => {
                failure = Some(error);
                false
            }
        })?;
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<V, DbError> {
        bincode::deserialize(bytes)
            .map_err(|source| DbError::CorruptValue { table: self.name, source })
    }

    fn decode_pair(&self, key: &[u8], value: &[u8]) -> Result<(K, V), DbError> {
        Ok((K::decode_key(key, self.name)?, self.decode_value(value)?))
    }

    /// Ascending byte-level scan merging the write buffer over the backend.
    fn merged_scan(
        &self,
        from: Option<&[u8]>,
        mut f: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), DbError> {
        let buffer = self.buffer.read();
        let mut buffered = match from {
            Some(from) => buffer.range::<[u8], _>((
                std::ops::Bound::Included(from),
                std::ops::Bound::Unbounded,
            )),
            None => buffer.range::<[u8], _>(..),
        }
        .peekable();
        let mut stopped = false;

        self.store.scan(from, |backend_key, backend_value| {
            // Emit buffered entries ordered before the backend key.
            while let Some((buf_key, buf_value)) = buffered.peek() {
                if buf_key.as_slice() < backend_key {
                    if let Some(value) = buf_value {
                        if !f(buf_key, value) {
                            stopped = true;
                            return false;
                        }
                    }
                    buffered.next();
                } else {
                    break;
                }
            }
            // A buffered entry at the same key shadows the backend value.
            if let Some((buf_key, buf_value)) = buffered.peek() {
                if buf_key.as_slice() == backend_key {
                    let keep_going = match buf_value {
                        Some(value) => f(buf_key, value),
                        None => true,
                    };
                    buffered.next();
                    if !keep_going {
                        stopped = true;
                        return false;
                    }
                    return true;
                }
            }
            if !f(backend_key, backend_value) {
                stopped = true;
                return false;
            }
            true
        })?;

        if !stopped {
            for (buf_key, buf_value) in buffered {
                if let Some(value) = buf_value {
                    if !f(buf_key, value) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<K, V> std::fmt::Debug for Table<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("store", &self.store)
            .field("write_through", &self.write_through.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table<u64, String> {
        Table::in_memory("test")
    }

    #[test]
    fn point_ops_roundtrip() {
        let t = table();
        t.put(&3, &"three".to_string()).unwrap();
        assert_eq!(t.get(&3).unwrap().as_deref(), Some("three"));
        t.remove(&3).unwrap();
        assert_eq!(t.get(&3).unwrap(), None);
    }

    #[test]
    fn ordered_access() {
        let t = table();
        for n in [5u64, 1, 9, 3] {
            t.put(&n, &n.to_string()).unwrap();
        }
        assert_eq!(t.first().unwrap().unwrap().0, 1);
        assert_eq!(t.last().unwrap().unwrap().0, 9);
        assert_eq!(t.lower_bound(&4).unwrap().unwrap().0, 5);
        assert_eq!(t.lower_bound(&10).unwrap(), None);

        let mut keys = Vec::new();
        t.for_each(|k, _| {
            keys.push(k);
            true
        })
        .unwrap();
        assert_eq!(keys, vec![1, 3, 5, 9]);
    }

    #[test]
    fn buffered_writes_merge_into_reads() {
        let t = table();
        t.put(&1, &"committed".to_string()).unwrap();
        t.put(&5, &"committed".to_string()).unwrap();

        t.set_write_through(false).unwrap();
        t.put(&3, &"buffered".to_string()).unwrap();
        t.put(&5, &"shadowed".to_string()).unwrap();
        t.remove(&1).unwrap();

        assert_eq!(t.get(&1).unwrap(), None);
        assert_eq!(t.get(&3).unwrap().as_deref(), Some("buffered"));
        assert_eq!(t.get(&5).unwrap().as_deref(), Some("shadowed"));

        let mut seen = Vec::new();
        t.for_each(|k, v| {
            seen.push((k, v));
            true
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![(3, "buffered".to_string()), (5, "shadowed".to_string())]
        );
        assert_eq!(t.first().unwrap().unwrap().0, 3);
        assert_eq!(t.last().unwrap().unwrap().1, "shadowed");

        // Flushing preserves the merged view.
        t.set_write_through(true).unwrap();
        assert_eq!(t.get(&1).unwrap(), None);
        assert_eq!(t.get(&5).unwrap().as_deref(), Some("shadowed"));
    }

    #[test]
    fn rocksdb_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let t: Table<u64, String> = Table::open(dir.path(), "numbers").unwrap();
        t.put(&42, &"answer".to_string()).unwrap();
        t.put(&7, &"seven".to_string()).unwrap();
        assert_eq!(t.first().unwrap().unwrap().0, 7);
        assert_eq!(t.last().unwrap().unwrap().0, 42);
        assert_eq!(t.get(&42).unwrap().as_deref(), Some("answer"));
    }
}
