//! Deterministic, fork-aware chain state engine for a delegated
//! proof-of-stake chain with an embedded exchange.
//!
//! The engine ingests candidate blocks from peers or a local producer,
//! maintains a tree of all known blocks with validity and linkage
//! metadata, commits the heaviest valid chain, reorganizes when a heavier
//! fork appears (bounded by the undo history), and keeps a fee-ordered
//! mempool of pending transactions.
//!
//! Main entry points:
//! * [`ChainDatabase::push_block`] inserts a block, reorganizing if its
//!   fork is heavier.
//! * [`ChainDatabase::store_pending_transaction`] admits a transaction to
//!   the mempool.
//! * [`ShareableChainDatabase`] provides writer-guarded shared access plus
//!   observer notifications.
//!
//! Transaction evaluation rules and market matching are collaborators
//! behind the [`TransactionEvaluator`] and [`MarketEngine`] traits; the
//! engine ships a standard evaluator and a no-op market engine.

pub mod clock;
pub mod config;
pub mod database;
pub mod delegate;
pub mod error;
pub mod evaluation;
pub mod fork;
pub mod genesis;
pub mod market;
pub mod mempool;
mod metrics;
pub mod shareable;
pub mod state;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChainConfig, ForkActivations};
pub use database::{ChainDatabase, ProducerConfig};
pub use error::{ChainError, ChainResult, EvaluationError};
pub use evaluation::{StandardEvaluator, TransactionEvalState, TransactionEvaluator};
pub use fork::BlockForkData;
pub use genesis::{GenesisAsset, GenesisBalance, GenesisDelegate, GenesisSource, GenesisState};
pub use market::{MarketEngine, NoopMarketEngine};
pub use mempool::FeeIndex;
pub use shareable::{BlockSummary, ChainNotification, ChainNotifications, ShareableChainDatabase};
pub use state::{ChainDelta, ChainProperty, ChainState, PendingState, PropertyValue};
