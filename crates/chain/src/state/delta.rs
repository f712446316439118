//! The write-set exchanged between overlays, the committed store and the
//! undo log.

use meridian_primitives::{
    AccountId, AccountRecord, AssetId, AssetRecord, BalanceId, BalanceRecord, CollateralRecord,
    FeedIndex, FeedRecord, MarketHistoryKey, MarketHistoryRecord, MarketIndexKey, OrderKind,
    OrderRecord, SlateId, SlateRecord, SlotRecord, Timestamp, TransactionId, TransactionRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{ChainProperty, PropertyValue};

/// A captured set of state writes, keyed per record kind.
///
/// `None` is a tombstone. The same shape serves three roles: the write-set
/// of a [`super::PendingState`], the persisted undo entry of a block, and
/// the change summary handed to observers. Maps are ordered so application
/// order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainDelta {
    /// Property writes.
    pub properties: BTreeMap<ChainProperty, Option<PropertyValue>>,
    /// Account writes.
    pub accounts: BTreeMap<AccountId, Option<AccountRecord>>,
    /// Asset writes.
    pub assets: BTreeMap<AssetId, Option<AssetRecord>>,
    /// Balance writes.
    pub balances: BTreeMap<BalanceId, Option<BalanceRecord>>,
    /// Slate writes.
    pub slates: BTreeMap<SlateId, Option<SlateRecord>>,
    /// Confirmed-transaction writes.
    pub transactions: BTreeMap<TransactionId, Option<TransactionRecord>>,
    /// Order-book writes.
    pub orders: BTreeMap<(OrderKind, MarketIndexKey), Option<OrderRecord>>,
    /// Collateral writes.
    pub collateral: BTreeMap<MarketIndexKey, Option<CollateralRecord>>,
    /// Feed writes.
    pub feeds: BTreeMap<FeedIndex, Option<FeedRecord>>,
    /// Slot-record writes.
    pub slots: BTreeMap<Timestamp, Option<SlotRecord>>,
    /// Market-history writes.
    pub market_history: BTreeMap<MarketHistoryKey, Option<MarketHistoryRecord>>,
    /// Markets touched by these writes; carried forward so market execution
    /// can find them, never undone.
    pub dirty_markets: BTreeSet<(AssetId, AssetId)>,
}

impl ChainDelta {
    /// True if no writes were captured (dirty-market marks alone do not
    /// count as writes).
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
            && self.accounts.is_empty()
            && self.assets.is_empty()
            && self.balances.is_empty()
            && self.slates.is_empty()
            && self.transactions.is_empty()
            && self.orders.is_empty()
            && self.collateral.is_empty()
            && self.feeds.is_empty()
            && self.slots.is_empty()
            && self.market_history.is_empty()
    }

    /// Overlay `other` on top of `self`; later writes win per key.
    pub fn merge(&mut self, other: ChainDelta) {
        self.properties.extend(other.properties);
        self.accounts.extend(other.accounts);
        self.assets.extend(other.assets);
        self.balances.extend(other.balances);
        self.slates.extend(other.slates);
        self.transactions.extend(other.transactions);
        self.orders.extend(other.orders);
        self.collateral.extend(other.collateral);
        self.feeds.extend(other.feeds);
        self.slots.extend(other.slots);
        self.market_history.extend(other.market_history);
        self.dirty_markets.extend(other.dirty_markets);
    }
}
