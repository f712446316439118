//! Raw byte-level key-value backends.

use parking_lot::RwLock;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use crate::DbError;

enum Backend {
    Memory(RwLock<BTreeMap<Vec<u8>, Vec<u8>>>),
    Disk(DB),
}

/// An ordered byte-keyed store: rocksdb on disk, BTreeMap in memory.
pub struct KvStore {
    backend: Backend,
}

impl KvStore {
    /// Open (creating if missing) a rocksdb store at `path`.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| DbError::CreateDir { path: parent.to_path_buf(), source })?;
        }
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path)?;
        Ok(Self { backend: Backend::Disk(db) })
    }

    /// A fresh in-memory store.
    pub fn memory() -> Self {
        Self { backend: Backend::Memory(RwLock::new(BTreeMap::new())) }
    }

    /// Point read.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        match &self.backend {
            Backend::Memory(map) => Ok(map.read().get(key).cloned()),
            Backend::Disk(db) => Ok(db.get(key)?),
        }
    }

    /// Point write.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        match &self.backend {
            Backend::Memory(map) => {
                map.write().insert(key.to_vec(), value.to_vec());
                Ok(())
            }
            Backend::Disk(db) => Ok(db.put(key, value)?),
        }
    }

    /// Point delete; deleting an absent key is a no-op.
    pub fn delete(&self, key: &[u8]) -> Result<(), DbError> {
        match &self.backend {
            Backend::Memory(map) => {
                map.write().remove(key);
                Ok(())
            }
            Backend::Disk(db) => Ok(db.delete(key)?),
        }
    }

    /// Apply a batch of puts (`Some`) and deletes (`None`) atomically.
    pub fn apply_batch(
        &self,
        entries: impl IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)>,
    ) -> Result<(), DbError> {
        match &self.backend {
            Backend::Memory(map) => {
                let mut map = map.write();
                for (key, value) in entries {
                    match value {
                        Some(value) => {
                            map.insert(key, value);
                        }
                        None => {
                            map.remove(&key);
                        }
                    }
                }
                Ok(())
            }
            Backend::Disk(db) => {
                let mut batch = WriteBatch::default();
                for (key, value) in entries {
                    match value {
                        Some(value) => batch.put(&key, &value),
                        None => batch.delete(&key),
                    }
                }
                Ok(db.write(batch)?)
            }
        }
    }

    /// Ascending scan starting at `from` (or the first key). The callback
    /// returns `false` to stop early.
    pub fn scan(
        &self,
        from: Option<&[u8]>,
        mut f: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), DbError> {
        match &self.backend {
            Backend::Memory(map) => {
                let map = map.read();
                let range = match from {
                    Some(from) => {
                        map.range::<[u8], _>((Bound::Included(from), Bound::Unbounded))
                    }
                    None => map.range::<[u8], _>(..),
                };
                for (key, value) in range {
                    if !f(key, value) {
                        break;
                    }
                }
                Ok(())
            }
            Backend::Disk(db) => {
                let mode = match from {
                    Some(from) => IteratorMode::From(from, Direction::Forward),
                    None => IteratorMode::Start,
                };
                for item in db.iterator(mode) {
                    let (key, value) = item?;
                    if !f(&key, &value) {
                        break;
                    }
                }
                Ok(())
            }
        }
    }

    /// Descending scan from the last key. The callback returns `false` to
    /// stop early.
    pub fn scan_rev(&self, mut f: impl FnMut(&[u8], &[u8]) -> bool) -> Result<(), DbError> {
        match &self.backend {
            Backend::Memory(map) => {
                let map = map.read();
                for (key, value) in map.iter().rev() {
                    if !f(key, value) {
                        break;
                    }
                }
                Ok(())
            }
            Backend::Disk(db) => {
                for item in db.iterator(IteratorMode::End) {
                    let (key, value) = item?;
                    if !f(&key, &value) {
                        break;
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.backend {
            Backend::Memory(_) => f.write_str("KvStore::Memory"),
            Backend::Disk(_) => f.write_str("KvStore::Disk"),
        }
    }
}
