//! The chain-state read interface and its transactional overlay.
//!
//! [`ChainState`] is the read surface shared by the committed database and
//! any number of stacked [`PendingState`] overlays. Writes never go through
//! the trait: overlays collect them in a [`ChainDelta`] and the committed
//! store applies deltas through its typed `store_*` methods, which also
//! maintain the secondary indexes.

mod delta;
mod pending;

pub use delta::ChainDelta;
pub use pending::PendingState;

use meridian_db::{DbError, TableKey};
use meridian_primitives::{
    AccountId, AccountRecord, Address, AssetId, AssetRecord, BalanceId, BalanceRecord, FeedIndex,
    FeedRecord, Hash160, Hash256, MarketHistoryKey, MarketHistoryRecord, MarketIndexKey,
    CollateralRecord, OrderKind, OrderRecord, SignedTransaction, SlateId, SlateRecord, SlotRecord,
    Timestamp, TransactionId, TransactionRecord,
};
use serde::{Deserialize, Serialize};

use crate::error::ChainResult;

/// Keys of the chain-property store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum ChainProperty {
    /// On-disk index layout version.
    DatabaseVersion = 0,
    /// Hash of the packed genesis document.
    ChainId = 1,
    /// The shuffled active delegate list in production order.
    ActiveDelegateList = 2,
    /// Highest asset id issued so far.
    LastAssetId = 3,
    /// Highest account id issued so far.
    LastAccountId = 4,
    /// Highest generic object id issued so far.
    LastObjectId = 5,
    /// Random seed after the last applied block.
    LastRandomSeed = 6,
    /// Confirmations required before a transaction is considered final.
    ConfirmationRequirement = 7,
}

impl TableKey for ChainProperty {
    fn encode_key(&self) -> Vec<u8> {
        vec![*self as u8]
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        let property = match bytes {
            [0] => Self::DatabaseVersion,
            [1] => Self::ChainId,
            [2] => Self::ActiveDelegateList,
            [3] => Self::LastAssetId,
            [4] => Self::LastAccountId,
            [5] => Self::LastObjectId,
            [6] => Self::LastRandomSeed,
            [7] => Self::ConfirmationRequirement,
            _ => return Err(DbError::CorruptKey { table }),
        };
        Ok(property)
    }
}

/// A chain-property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// An unsigned counter or requirement.
    U64(u64),
    /// A 160-bit hash (random seed).
    Hash160(Hash160),
    /// A 256-bit hash (chain id).
    Hash256(Hash256),
    /// An ordered account-id list (active delegates).
    AccountList(Vec<AccountId>),
}

impl PropertyValue {
    /// The `U64` payload, if that is the variant.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(value) => Some(*value),
            _ => None,
        }
    }

    /// The `Hash160` payload, if that is the variant.
    pub fn as_hash160(&self) -> Option<Hash160> {
        match self {
            Self::Hash160(value) => Some(*value),
            _ => None,
        }
    }

    /// The `Hash256` payload, if that is the variant.
    pub fn as_hash256(&self) -> Option<Hash256> {
        match self {
            Self::Hash256(value) => Some(*value),
            _ => None,
        }
    }

    /// The account-list payload, if that is the variant.
    pub fn as_account_list(&self) -> Option<&[AccountId]> {
        match self {
            Self::AccountList(value) => Some(value),
            _ => None,
        }
    }
}

/// Read access to a chain state: the committed database or a pending
/// overlay stacked on one.
pub trait ChainState {
    /// Read a chain property.
    fn get_property(&self, property: ChainProperty) -> ChainResult<Option<PropertyValue>>;

    /// Read an account by id.
    fn get_account(&self, id: AccountId) -> ChainResult<Option<AccountRecord>>;

    /// Resolve an account name.
    fn get_account_id_by_name(&self, name: &str) -> ChainResult<Option<AccountId>>;

    /// Resolve an owner/active key address.
    fn get_account_id_by_address(&self, address: &Address) -> ChainResult<Option<AccountId>>;

    /// Read an asset by id.
    fn get_asset(&self, id: AssetId) -> ChainResult<Option<AssetRecord>>;

    /// Resolve an asset symbol.
    fn get_asset_id_by_symbol(&self, symbol: &str) -> ChainResult<Option<AssetId>>;

    /// Read a balance by its condition id. Zero balances are not returned.
    fn get_balance(&self, id: &BalanceId) -> ChainResult<Option<BalanceRecord>>;

    /// Read a delegate slate.
    fn get_slate(&self, id: SlateId) -> ChainResult<Option<SlateRecord>>;

    /// Read a confirmed transaction.
    fn get_transaction(&self, id: &TransactionId) -> ChainResult<Option<TransactionRecord>>;

    /// Read an open order.
    fn get_order(&self, kind: OrderKind, key: &MarketIndexKey)
        -> ChainResult<Option<OrderRecord>>;

    /// Read a collateral position.
    fn get_collateral(&self, key: &MarketIndexKey) -> ChainResult<Option<CollateralRecord>>;

    /// Read a price feed.
    fn get_feed(&self, index: &FeedIndex) -> ChainResult<Option<FeedRecord>>;

    /// Read a production-slot record.
    fn get_slot(&self, start_time: Timestamp) -> ChainResult<Option<SlotRecord>>;

    /// Read a market-history bucket.
    fn get_market_history(
        &self,
        key: &MarketHistoryKey,
    ) -> ChainResult<Option<MarketHistoryRecord>>;

    /// True if the transaction's replay fingerprint is already known.
    fn is_known_transaction(&self, trx: &SignedTransaction) -> ChainResult<bool>;

    /// The chain id transactions are salted with.
    fn chain_id(&self) -> Hash256;

    /// Number of the head block this state is rooted at.
    fn head_block_num(&self) -> u64;

    /// Chain time: the head block's timestamp (or the previous slot start
    /// before any block exists).
    fn now(&self) -> Timestamp;

    /// The current random seed; zero until the first block.
    fn get_current_random_seed(&self) -> ChainResult<Hash160> {
        Ok(self
            .get_property(ChainProperty::LastRandomSeed)?
            .and_then(|value| value.as_hash160())
            .unwrap_or_default())
    }

    /// The shuffled active delegate list.
    fn get_active_delegates(&self) -> ChainResult<Vec<AccountId>> {
        Ok(self
            .get_property(ChainProperty::ActiveDelegateList)?
            .and_then(|value| value.as_account_list().map(<[AccountId]>::to_vec))
            .unwrap_or_default())
    }
}
