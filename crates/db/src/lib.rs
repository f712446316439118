//! Typed key-value table adapters.
//!
//! Each table is its own key-value store (a rocksdb directory on disk, or a
//! BTreeMap in memory for tests and simulation) wrapped with typed keys and
//! bincode-encoded values. Key encodings are order-preserving so ordered
//! tables support `first`/`last`/`lower_bound` and forward scans.
//!
//! A per-table write-through toggle supports bulk loading: with write-through
//! off, writes buffer in RAM and scans merge the buffer over the backend;
//! turning it back on flushes the buffer in one batch.

mod error;
mod keys;
mod kv;
mod table;

pub use error::DbError;
pub use keys::TableKey;
pub use kv::KvStore;
pub use table::Table;
