use std::path::PathBuf;

/// Storage-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The underlying rocksdb store failed.
    #[error(transparent)]
    Backend(#[from] rocksdb::Error),
    /// A stored value failed to decode.
    #[error("corrupt value in table {table}: {source}")]
    CorruptValue {
        /// Table the value came from.
        table: &'static str,
        /// Decoder failure.
        source: bincode::Error,
    },
    /// A stored key failed to decode.
    #[error("corrupt key in table {table}")]
    CorruptKey {
        /// Table the key came from.
        table: &'static str,
    },
    /// The store directory could not be created.
    #[error("failed to create store directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying io error.
        source: std::io::Error,
    },
}
