//! The copy-on-write overlay blocks and transactions are applied through.

use meridian_primitives::{
    AccountId, AccountRecord, Address, AssetId, AssetRecord, BalanceId, BalanceRecord,
    CollateralRecord, FeedIndex, FeedRecord, Hash256, MarketHistoryKey,
    MarketHistoryRecord, MarketIndexKey, OrderKind, OrderRecord, SignedTransaction, SlateId,
    SlateRecord, SlotRecord, Timestamp, TransactionId, TransactionRecord,
};

use super::{ChainDelta, ChainProperty, ChainState, PropertyValue};
use crate::error::ChainResult;

/// A transactional overlay over a parent state.
///
/// Reads fall through to the parent for any key the overlay has not
/// written; writes collect in a [`ChainDelta`]. Overlays stack: a
/// `PendingState` is itself a [`ChainState`], so speculative transaction
/// evaluation can run in a child overlay and be discarded without touching
/// block-level writes.
///
/// Committing is the caller's job: [`PendingState::into_delta`] surrenders
/// the write-set, and applying it to the parent followed by the delta from
/// [`PendingState::build_undo_delta`] restores every observed key, the
/// invariant that makes speculative block application safe.
pub struct PendingState<'a> {
    parent: &'a dyn ChainState,
    delta: ChainDelta,
}

impl<'a> PendingState<'a> {
    /// A fresh overlay over `parent`.
    pub fn new(parent: &'a dyn ChainState) -> Self {
        Self { parent, delta: ChainDelta::default() }
    }

    /// An overlay seeded with an existing write-set.
    pub fn from_delta(parent: &'a dyn ChainState, delta: ChainDelta) -> Self {
        Self { parent, delta }
    }

    /// Surrender the captured write-set.
    pub fn into_delta(self) -> ChainDelta {
        self.delta
    }

    /// The captured write-set, by reference.
    pub fn delta(&self) -> &ChainDelta {
        &self.delta
    }

    /// Merge a child overlay's write-set over this one.
    pub fn absorb(&mut self, child: ChainDelta) {
        self.delta.merge(child);
    }

    /// Capture the parent's pre-image of every key this overlay wrote.
    ///
    /// Applying the returned delta to the post-application state restores
    /// the parent state on all touched keys.
    pub fn build_undo_delta(&self) -> ChainResult<ChainDelta> {
        let parent = self.parent;
        let mut undo = ChainDelta::default();
        for property in self.delta.properties.keys() {
            undo.properties.insert(*property, parent.get_property(*property)?);
        }
        for id in self.delta.accounts.keys() {
            undo.accounts.insert(*id, parent.get_account(*id)?);
        }
        for id in self.delta.assets.keys() {
            undo.assets.insert(*id, parent.get_asset(*id)?);
        }
        for id in self.delta.balances.keys() {
            undo.balances.insert(*id, parent.get_balance(id)?);
        }
        for id in self.delta.slates.keys() {
            undo.slates.insert(*id, parent.get_slate(*id)?);
        }
        for id in self.delta.transactions.keys() {
            undo.transactions.insert(*id, parent.get_transaction(id)?);
        }
        for (kind, key) in self.delta.orders.keys() {
            undo.orders.insert((*kind, *key), parent.get_order(*kind, key)?);
        }
        for key in self.delta.collateral.keys() {
            undo.collateral.insert(*key, parent.get_collateral(key)?);
        }
        for index in self.delta.feeds.keys() {
            undo.feeds.insert(*index, parent.get_feed(index)?);
        }
        for start_time in self.delta.slots.keys() {
            undo.slots.insert(*start_time, parent.get_slot(*start_time)?);
        }
        for key in self.delta.market_history.keys() {
            undo.market_history.insert(*key, parent.get_market_history(key)?);
        }
        Ok(undo)
    }

    // ── writers ───────────────────────────────────────────────────────

    /// Write a chain property.
    pub fn set_property(&mut self, property: ChainProperty, value: PropertyValue) {
        self.delta.properties.insert(property, Some(value));
    }

    /// Write an account record.
    pub fn store_account(&mut self, record: AccountRecord) {
        self.delta.accounts.insert(record.id, Some(record));
    }

    /// Write an asset record.
    pub fn store_asset(&mut self, record: AssetRecord) {
        self.delta.assets.insert(record.id, Some(record));
    }

    /// Write a balance record (zero balances included; the committed store
    /// migrates them to the empty table on apply).
    pub fn store_balance(&mut self, record: BalanceRecord) {
        self.delta.balances.insert(record.id(), Some(record));
    }

    /// Write a slate record.
    pub fn store_slate(&mut self, record: SlateRecord) {
        self.delta.slates.insert(record.id, Some(record));
    }

    /// Write a confirmed-transaction record.
    pub fn store_transaction(&mut self, id: TransactionId, record: TransactionRecord) {
        self.delta.transactions.insert(id, Some(record));
    }

    /// Write an order, marking its market dirty.
    pub fn store_order(&mut self, kind: OrderKind, key: MarketIndexKey, record: OrderRecord) {
        self.mark_dirty_market(key.order_price.quote_asset_id, key.order_price.base_asset_id);
        self.delta.orders.insert((kind, key), Some(record));
    }

    /// Remove an order, marking its market dirty.
    pub fn remove_order(&mut self, kind: OrderKind, key: MarketIndexKey) {
        self.mark_dirty_market(key.order_price.quote_asset_id, key.order_price.base_asset_id);
        self.delta.orders.insert((kind, key), None);
    }

    /// Write a collateral position, marking its market dirty.
    pub fn store_collateral(&mut self, key: MarketIndexKey, record: CollateralRecord) {
        self.mark_dirty_market(key.order_price.quote_asset_id, key.order_price.base_asset_id);
        self.delta.collateral.insert(key, Some(record));
    }

    /// Remove a collateral position, marking its market dirty.
    pub fn remove_collateral(&mut self, key: MarketIndexKey) {
        self.mark_dirty_market(key.order_price.quote_asset_id, key.order_price.base_asset_id);
        self.delta.collateral.insert(key, None);
    }

    /// Write a price feed.
    pub fn store_feed(&mut self, record: FeedRecord) {
        self.delta.feeds.insert(record.index, Some(record));
    }

    /// Write a production-slot record.
    pub fn store_slot(&mut self, record: SlotRecord) {
        self.delta.slots.insert(record.start_time, Some(record));
    }

    /// Write a market-history bucket.
    pub fn store_market_history(&mut self, key: MarketHistoryKey, record: MarketHistoryRecord) {
        self.delta.market_history.insert(key, Some(record));
    }

    /// Note that a market needs execution.
    pub fn mark_dirty_market(&mut self, quote_id: AssetId, base_id: AssetId) {
        self.delta.dirty_markets.insert((quote_id, base_id));
    }
}

impl ChainState for PendingState<'_> {
    fn get_property(&self, property: ChainProperty) -> ChainResult<Option<PropertyValue>> {
        match self.delta.properties.get(&property) {
            Some(entry) => Ok(entry.clone()),
            None => self.parent.get_property(property),
        }
    }

    fn get_account(&self, id: AccountId) -> ChainResult<Option<AccountRecord>> {
        match self.delta.accounts.get(&id) {
            Some(entry) => Ok(entry.clone()),
            None => self.parent.get_account(id),
        }
    }

    fn get_account_id_by_name(&self, name: &str) -> ChainResult<Option<AccountId>> {
        for (id, entry) in &self.delta.accounts {
            if let Some(record) = entry {
                if record.name == name {
                    return Ok(Some(*id));
                }
            }
        }
        self.parent.get_account_id_by_name(name)
    }

    fn get_account_id_by_address(&self, address: &Address) -> ChainResult<Option<AccountId>> {
        for (id, entry) in &self.delta.accounts {
            if let Some(record) = entry {
                if record.owner_key.address() == *address
                    || record.active_address() == *address
                {
                    return Ok(Some(*id));
                }
            }
        }
        self.parent.get_account_id_by_address(address)
    }

    fn get_asset(&self, id: AssetId) -> ChainResult<Option<AssetRecord>> {
        match self.delta.assets.get(&id) {
            Some(entry) => Ok(entry.clone()),
            None => self.parent.get_asset(id),
        }
    }

    fn get_asset_id_by_symbol(&self, symbol: &str) -> ChainResult<Option<AssetId>> {
        for (id, entry) in &self.delta.assets {
            if let Some(record) = entry {
                if record.symbol == symbol {
                    return Ok(Some(*id));
                }
            }
        }
        self.parent.get_asset_id_by_symbol(symbol)
    }

    fn get_balance(&self, id: &BalanceId) -> ChainResult<Option<BalanceRecord>> {
        match self.delta.balances.get(id) {
            Some(entry) => Ok(entry.clone()),
            None => self.parent.get_balance(id),
        }
    }

    fn get_slate(&self, id: SlateId) -> ChainResult<Option<SlateRecord>> {
        match self.delta.slates.get(&id) {
            Some(entry) => Ok(entry.clone()),
            None => self.parent.get_slate(id),
        }
    }

    fn get_transaction(&self, id: &TransactionId) -> ChainResult<Option<TransactionRecord>> {
        match self.delta.transactions.get(id) {
            Some(entry) => Ok(entry.clone()),
            None => self.parent.get_transaction(id),
        }
    }

    fn get_order(
        &self,
        kind: OrderKind,
        key: &MarketIndexKey,
    ) -> ChainResult<Option<OrderRecord>> {
        match self.delta.orders.get(&(kind, *key)) {
            Some(entry) => Ok(*entry),
            None => self.parent.get_order(kind, key),
        }
    }

    fn get_collateral(&self, key: &MarketIndexKey) -> ChainResult<Option<CollateralRecord>> {
        match self.delta.collateral.get(key) {
            Some(entry) => Ok(*entry),
            None => self.parent.get_collateral(key),
        }
    }

    fn get_feed(&self, index: &FeedIndex) -> ChainResult<Option<FeedRecord>> {
        match self.delta.feeds.get(index) {
            Some(entry) => Ok(*entry),
            None => self.parent.get_feed(index),
        }
    }

    fn get_slot(&self, start_time: Timestamp) -> ChainResult<Option<SlotRecord>> {
        match self.delta.slots.get(&start_time) {
            Some(entry) => Ok(*entry),
            None => self.parent.get_slot(start_time),
        }
    }

    fn get_market_history(
        &self,
        key: &MarketHistoryKey,
    ) -> ChainResult<Option<MarketHistoryRecord>> {
        match self.delta.market_history.get(key) {
            Some(entry) => Ok(*entry),
            None => self.parent.get_market_history(key),
        }
    }

    fn is_known_transaction(&self, trx: &SignedTransaction) -> ChainResult<bool> {
        let digest = trx.digest(self.chain_id());
        for entry in self.delta.transactions.values().flatten() {
            if entry.trx.expiration == trx.expiration
                && entry.trx.digest(self.chain_id()) == digest
            {
                return Ok(true);
            }
        }
        self.parent.is_known_transaction(trx)
    }

    fn chain_id(&self) -> Hash256 {
        self.parent.chain_id()
    }

    fn head_block_num(&self) -> u64 {
        self.parent.head_block_num()
    }

    fn now(&self) -> Timestamp {
        self.parent.now()
    }
}

impl std::fmt::Debug for PendingState<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingState").field("delta", &self.delta).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ChainConfig;
    use crate::store::ChainStore;
    use meridian_primitives::{
        AccountRecord, BalanceRecord, DelegateStats, Hash160, WithdrawCondition,
    };
    use proptest::prelude::*;
    use std::sync::Arc;

    fn store() -> ChainStore {
        ChainStore::in_memory(
            Arc::new(ChainConfig::default()),
            Arc::new(ManualClock::new(1_000_000)),
        )
    }

    fn owner(tag: u8) -> meridian_primitives::Address {
        meridian_primitives::Address(Hash160([tag; 20]))
    }

    fn balance(tag: u8, amount: i64) -> BalanceRecord {
        BalanceRecord::new(WithdrawCondition::signature(owner(tag), 0, 0), amount, 50)
    }

    #[test]
    fn reads_fall_through_and_writes_shadow() {
        let store = store();
        let seeded = balance(1, 500);
        store.store_balance_record(seeded.id(), Some(&seeded)).unwrap();

        let mut pending = PendingState::new(&store);
        assert_eq!(pending.get_balance(&seeded.id()).unwrap().unwrap().balance, 500);

        let mut updated = seeded.clone();
        updated.balance = 300;
        pending.store_balance(updated);
        assert_eq!(pending.get_balance(&seeded.id()).unwrap().unwrap().balance, 300);
        // The parent is untouched until the delta is applied.
        assert_eq!(store.get_balance(&seeded.id()).unwrap().unwrap().balance, 500);
    }

    #[test]
    fn apply_then_undo_is_identity_on_observed_keys() {
        let store = store();
        let existing = balance(1, 500);
        store.store_balance_record(existing.id(), Some(&existing)).unwrap();
        let mut delegate = AccountRecord {
            id: 3,
            name: "carol".into(),
            delegate_info: Some(DelegateStats { votes_for: 10, ..Default::default() }),
            ..Default::default()
        };
        store.store_account_record(3, Some(&delegate)).unwrap();

        let mut pending = PendingState::new(&store);
        let mut modified = existing.clone();
        modified.balance = 100;
        pending.store_balance(modified);
        let created = balance(2, 900);
        let created_id = created.id();
        pending.store_balance(created);
        delegate.delegate_info.as_mut().unwrap().votes_for = 77;
        pending.store_account(delegate);
        pending.set_property(ChainProperty::LastObjectId, PropertyValue::U64(9));

        let undo = pending.build_undo_delta().unwrap();
        let delta = pending.into_delta();

        store.apply_delta(&delta).unwrap();
        assert_eq!(store.get_balance(&existing.id()).unwrap().unwrap().balance, 100);
        assert_eq!(store.get_balance(&created_id).unwrap().unwrap().balance, 900);
        assert_eq!(store.get_account(3).unwrap().unwrap().net_votes(), 77);

        store.apply_delta(&undo).unwrap();
        assert_eq!(store.get_balance(&existing.id()).unwrap().unwrap().balance, 500);
        assert_eq!(store.get_balance(&created_id).unwrap(), None);
        assert_eq!(store.get_account(3).unwrap().unwrap().net_votes(), 10);
        assert_eq!(store.get_property(ChainProperty::LastObjectId).unwrap(), None);
    }

    #[test]
    fn stacked_overlays_discard_or_absorb() {
        let store = store();
        let seeded = balance(1, 500);
        store.store_balance_record(seeded.id(), Some(&seeded)).unwrap();

        let mut base = PendingState::new(&store);
        let mut step_one = seeded.clone();
        step_one.balance = 400;
        base.store_balance(step_one);

        // A child layer sees the base's writes and can be thrown away.
        {
            let mut child = PendingState::new(&base);
            let mut speculative = child.get_balance(&seeded.id()).unwrap().unwrap();
            assert_eq!(speculative.balance, 400);
            speculative.balance = 0;
            child.store_balance(speculative);
        }
        assert_eq!(base.get_balance(&seeded.id()).unwrap().unwrap().balance, 400);

        // Or absorbed, in which case the base adopts its writes.
        let mut child = PendingState::new(&base);
        let mut kept = child.get_balance(&seeded.id()).unwrap().unwrap();
        kept.balance = 250;
        child.store_balance(kept);
        let child_delta = child.into_delta();
        base.absorb(child_delta);
        assert_eq!(base.get_balance(&seeded.id()).unwrap().unwrap().balance, 250);
    }

    proptest! {
        // For any set of balance writes over any seeded state, applying the
        // overlay and then its undo restores every observed key.
        #[test]
        fn overlay_identity(
            seeds in proptest::collection::btree_map(0u8..8, 1i64..1_000, 0..6),
            writes in proptest::collection::vec((0u8..8, 0i64..1_000), 1..12),
        ) {
            let store = store();
            for (tag, amount) in &seeds {
                let record = balance(*tag, *amount);
                store.store_balance_record(record.id(), Some(&record)).unwrap();
            }

            let mut pending = PendingState::new(&store);
            for (tag, amount) in &writes {
                let mut record = pending
                    .get_balance(&balance(*tag, 0).id())
                    .unwrap()
                    .unwrap_or_else(|| balance(*tag, 0));
                record.balance = *amount;
                pending.store_balance(record);
            }

            let before: Vec<_> = (0u8..8)
                .map(|tag| store.get_balance(&balance(tag, 0).id()).unwrap())
                .collect();

            let undo = pending.build_undo_delta().unwrap();
            let delta = pending.into_delta();
            store.apply_delta(&delta).unwrap();
            store.apply_delta(&undo).unwrap();

            let after: Vec<_> = (0u8..8)
                .map(|tag| store.get_balance(&balance(tag, 0).id()).unwrap())
                .collect();
            prop_assert_eq!(before, after);
        }
    }
}
