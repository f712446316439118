//! Commonly used value types for the meridian chain state engine.
//!
//! This crate holds the record model shared by the storage layer and the
//! chain engine: blocks, transactions, accounts, assets, balances, market
//! orders, slates and slots, together with the canonical packed encoding and
//! the hashing/signature primitives the records are content-addressed with.

pub mod account;
pub mod asset;
pub mod balance;
pub mod block;
pub mod constants;
pub mod crypto;
pub mod encode;
pub mod market;
pub mod slate;
pub mod transaction;

pub use account::{AccountRecord, DelegateStats};
pub use asset::{AssetAmount, AssetRecord, MARKET_ISSUER_ACCOUNT_ID};
pub use balance::{BalanceRecord, SnapshotRecord, WithdrawClaim, WithdrawCondition};
pub use block::{BlockRecord, FullBlock, SignedBlockHeader};
pub use crypto::{
    hash160, public_key_of, recover, ripemd160, sha256, sign_digest, Address, CryptoError,
    Hash160, Hash256, PublicKey, Signature,
};
pub use encode::{packed, unpack, EncodeError};
pub use market::{
    CollateralRecord, FeedIndex, FeedRecord, MarketHistoryGranularity, MarketHistoryKey,
    MarketHistoryRecord, MarketIndexKey, OrderKind, OrderRecord, Price,
};
pub use slate::{SlateRecord, SlotRecord};
pub use transaction::{Operation, SignedTransaction, TransactionLocation, TransactionRecord};

/// Unix seconds. Block timestamps are always a multiple of the block interval.
pub type Timestamp = u64;

/// Smallest indivisible unit of any asset.
pub type ShareAmount = i64;

/// Sequentially issued account identifier; account `0` is the reserved
/// genesis sentinel.
pub type AccountId = u64;

/// Sequentially issued asset identifier; asset `0` is the base asset.
pub type AssetId = u64;

/// Content-derived identifier of a delegate slate.
pub type SlateId = u64;

/// Content hash of a block header (with the signature zeroed). The all-zero
/// id denotes the genesis parent.
pub type BlockId = Hash160;

/// Content hash of a signed transaction.
pub type TransactionId = Hash160;

/// Content hash of a withdraw condition; balances are addressed by it.
pub type BalanceId = Hash160;

/// Slot number a timestamp falls into, given the block interval.
pub fn slot_number(timestamp: Timestamp, block_interval: u64) -> u64 {
    timestamp / block_interval
}

/// Start time of the slot containing `timestamp`.
pub fn slot_start_time(timestamp: Timestamp, block_interval: u64) -> Timestamp {
    slot_number(timestamp, block_interval) * block_interval
}
