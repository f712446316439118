//! The committed chain store: every on-disk table plus the in-memory
//! secondary indexes rebuilt at open (delegate votes, collateral
//! expirations, unique-transaction fingerprints, dirty markets).
//!
//! All writes go through the typed `store_*` methods so the secondary
//! indexes can never drift from the primary tables; [`ChainStore::apply_delta`]
//! funnels overlay commits and undo application through the same methods.

use meridian_db::Table;
use meridian_primitives::constants::DATABASE_VERSION;
use meridian_primitives::{
    slot_start_time, AccountId, AccountRecord, Address, AssetAmount, AssetId, AssetRecord,
    BalanceId, BalanceRecord, BlockId, BlockRecord, CollateralRecord, FeedIndex, FeedRecord,
    FullBlock, Hash256, MarketHistoryKey, MarketHistoryRecord, MarketIndexKey, OrderKind,
    OrderRecord, ShareAmount, SignedBlockHeader, SignedTransaction, SlateId, SlateRecord,
    SlotRecord, Timestamp, TransactionId, TransactionRecord,
};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

use crate::clock::Clock;
use crate::config::ChainConfig;
use crate::error::{ChainError, ChainResult};
use crate::fork::BlockForkData;
use crate::market::interest_owed;
use crate::state::{ChainDelta, ChainProperty, ChainState, PropertyValue};

/// Entry of the in-memory delegate-vote index: net votes descending, then
/// account id ascending, so the first N entries are the next round's
/// active delegates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VoteIndex {
    pub votes: ShareAmount,
    pub delegate_id: AccountId,
}

impl Ord for VoteIndex {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .votes
            .cmp(&self.votes)
            .then_with(|| self.delegate_id.cmp(&other.delegate_id))
    }
}

impl PartialOrd for VoteIndex {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Current head of the included chain.
#[derive(Debug, Clone, Default)]
pub(crate) struct HeadBlock {
    pub id: BlockId,
    pub header: SignedBlockHeader,
}

pub(crate) struct ChainStore {
    pub(crate) config: Arc<ChainConfig>,
    pub(crate) clock: Arc<dyn Clock>,

    // index/
    pub(crate) property: Table<ChainProperty, PropertyValue>,
    pub(crate) fork_number: Table<u64, Vec<BlockId>>,
    pub(crate) fork_data: Table<BlockId, BlockForkData>,
    pub(crate) undo_state: Table<BlockId, ChainDelta>,
    pub(crate) block_record: Table<BlockId, BlockRecord>,
    pub(crate) account: Table<AccountId, AccountRecord>,
    pub(crate) account_name: Table<String, AccountId>,
    pub(crate) account_address: Table<Address, AccountId>,
    pub(crate) asset: Table<AssetId, AssetRecord>,
    pub(crate) asset_symbol: Table<String, AssetId>,
    pub(crate) balance: Table<BalanceId, BalanceRecord>,
    pub(crate) empty_balance: Table<BalanceId, BalanceRecord>,
    pub(crate) transaction: Table<TransactionId, TransactionRecord>,
    pub(crate) slate: Table<SlateId, SlateRecord>,
    pub(crate) pending_transaction: Table<TransactionId, SignedTransaction>,
    pub(crate) future_blocks: Table<BlockId, u64>,
    pub(crate) slot: Table<Timestamp, SlotRecord>,
    pub(crate) feed: Table<FeedIndex, FeedRecord>,
    pub(crate) bid: Table<MarketIndexKey, OrderRecord>,
    pub(crate) ask: Table<MarketIndexKey, OrderRecord>,
    pub(crate) relative_bid: Table<MarketIndexKey, OrderRecord>,
    pub(crate) relative_ask: Table<MarketIndexKey, OrderRecord>,
    pub(crate) short: Table<MarketIndexKey, OrderRecord>,
    pub(crate) collateral: Table<MarketIndexKey, CollateralRecord>,
    pub(crate) market_history: Table<MarketHistoryKey, MarketHistoryRecord>,

    // raw_chain/
    pub(crate) block_data: Table<BlockId, FullBlock>,
    pub(crate) block_num_to_id: Table<u64, BlockId>,

    // in-memory, rebuilt at open
    pub(crate) head: RwLock<HeadBlock>,
    pub(crate) stored_chain_id: RwLock<Hash256>,
    pub(crate) delegate_votes: RwLock<BTreeSet<VoteIndex>>,
    pub(crate) collateral_expiration: RwLock<BTreeSet<(AssetId, Timestamp, MarketIndexKey)>>,
    pub(crate) unique_transactions: RwLock<BTreeSet<(Timestamp, Hash256)>>,
    pub(crate) dirty_markets: RwLock<BTreeSet<(AssetId, AssetId)>>,
}

impl ChainStore {
    /// Open every table under `data_dir/index` and `data_dir/raw_chain`.
    pub fn open(
        data_dir: &Path,
        config: Arc<ChainConfig>,
        clock: Arc<dyn Clock>,
    ) -> ChainResult<Self> {
        let index = data_dir.join("index");
        let raw = data_dir.join("raw_chain");
        Ok(Self {
            config,
            clock,
            property: Table::open(&index, "property")?,
            fork_number: Table::open(&index, "fork_number")?,
            fork_data: Table::open(&index, "fork_data")?,
            undo_state: Table::open(&index, "undo_state")?,
            block_record: Table::open(&index, "block_record")?,
            account: Table::open(&index, "account")?,
            account_name: Table::open(&index, "account_name")?,
            account_address: Table::open(&index, "account_address")?,
            asset: Table::open(&index, "asset")?,
            asset_symbol: Table::open(&index, "asset_symbol")?,
            balance: Table::open(&index, "balance")?,
            empty_balance: Table::open(&index, "empty_balance")?,
            transaction: Table::open(&index, "transaction")?,
            slate: Table::open(&index, "slate")?,
            pending_transaction: Table::open(&index, "pending_transaction")?,
            future_blocks: Table::open(&index, "future_blocks")?,
            slot: Table::open(&index, "slot")?,
            feed: Table::open(&index, "feed")?,
            bid: Table::open(&index, "bid")?,
            ask: Table::open(&index, "ask")?,
            relative_bid: Table::open(&index, "relative_bid")?,
            relative_ask: Table::open(&index, "relative_ask")?,
            short: Table::open(&index, "short")?,
            collateral: Table::open(&index, "collateral")?,
            market_history: Table::open(&index, "market_history")?,
            block_data: Table::open(&raw, "block_data")?,
            block_num_to_id: Table::open(&raw, "block_num_to_id")?,
            head: RwLock::new(HeadBlock::default()),
            stored_chain_id: RwLock::new(Hash256::default()),
            delegate_votes: RwLock::new(BTreeSet::new()),
            collateral_expiration: RwLock::new(BTreeSet::new()),
            unique_transactions: RwLock::new(BTreeSet::new()),
            dirty_markets: RwLock::new(BTreeSet::new()),
        })
    }

    /// All tables in memory; used by tests and deterministic simulation.
    pub fn in_memory(config: Arc<ChainConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            property: Table::in_memory("property"),
            fork_number: Table::in_memory("fork_number"),
            fork_data: Table::in_memory("fork_data"),
            undo_state: Table::in_memory("undo_state"),
            block_record: Table::in_memory("block_record"),
            account: Table::in_memory("account"),
            account_name: Table::in_memory("account_name"),
            account_address: Table::in_memory("account_address"),
            asset: Table::in_memory("asset"),
            asset_symbol: Table::in_memory("asset_symbol"),
            balance: Table::in_memory("balance"),
            empty_balance: Table::in_memory("empty_balance"),
            transaction: Table::in_memory("transaction"),
            slate: Table::in_memory("slate"),
            pending_transaction: Table::in_memory("pending_transaction"),
            future_blocks: Table::in_memory("future_blocks"),
            slot: Table::in_memory("slot"),
            feed: Table::in_memory("feed"),
            bid: Table::in_memory("bid"),
            ask: Table::in_memory("ask"),
            relative_bid: Table::in_memory("relative_bid"),
            relative_ask: Table::in_memory("relative_ask"),
            short: Table::in_memory("short"),
            collateral: Table::in_memory("collateral"),
            market_history: Table::in_memory("market_history"),
            block_data: Table::in_memory("block_data"),
            block_num_to_id: Table::in_memory("block_num_to_id"),
            head: RwLock::new(HeadBlock::default()),
            stored_chain_id: RwLock::new(Hash256::default()),
            delegate_votes: RwLock::new(BTreeSet::new()),
            collateral_expiration: RwLock::new(BTreeSet::new()),
            unique_transactions: RwLock::new(BTreeSet::new()),
            dirty_markets: RwLock::new(BTreeSet::new()),
        }
    }

    /// Toggle write-through on the record tables that are safe to buffer
    /// during a reindex. Fork, undo and raw-chain tables stay write-through.
    pub fn set_record_write_through(&self, enabled: bool) -> ChainResult<()> {
        for table_result in [
            self.property.set_write_through(enabled),
            self.account.set_write_through(enabled),
            self.account_name.set_write_through(enabled),
            self.account_address.set_write_through(enabled),
            self.asset.set_write_through(enabled),
            self.asset_symbol.set_write_through(enabled),
            self.balance.set_write_through(enabled),
            self.empty_balance.set_write_through(enabled),
            self.slate.set_write_through(enabled),
            self.transaction.set_write_through(enabled),
            self.feed.set_write_through(enabled),
            self.bid.set_write_through(enabled),
            self.ask.set_write_through(enabled),
            self.relative_bid.set_write_through(enabled),
            self.relative_ask.set_write_through(enabled),
            self.short.set_write_through(enabled),
            self.collateral.set_write_through(enabled),
            self.market_history.set_write_through(enabled),
        ] {
            table_result?;
        }
        Ok(())
    }

    /// Rebuild the in-memory indexes from the primary tables.
    pub fn populate_indexes(&self) -> ChainResult<()> {
        {
            let mut votes = self.delegate_votes.write();
            votes.clear();
            self.account.for_each(|_, record| {
                if record.is_delegate() && !record.is_retracted() {
                    votes.insert(VoteIndex {
                        votes: record.net_votes(),
                        delegate_id: record.id,
                    });
                }
                true
            })?;
        }
        {
            let chain_id = self.chain_id();
            let now = self.now();
            let mut unique = self.unique_transactions.write();
            unique.clear();
            self.transaction.for_each(|_, record| {
                if record.trx.expiration > now {
                    unique.insert((record.trx.expiration, record.trx.digest(chain_id)));
                }
                true
            })?;
        }
        {
            let mut expirations = self.collateral_expiration.write();
            expirations.clear();
            self.collateral.for_each(|key, record| {
                expirations.insert((
                    key.order_price.quote_asset_id,
                    record.expiration,
                    key,
                ));
                true
            })?;
        }
        Ok(())
    }

    /// Check the stored database version: missing means a fresh index,
    /// older triggers a reindex, newer is fatal.
    pub fn check_database_version(&self) -> ChainResult<Option<u64>> {
        let stored = self
            .property
            .get(&ChainProperty::DatabaseVersion)?
            .and_then(|value| value.as_u64());
        if let Some(on_disk) = stored {
            if on_disk > DATABASE_VERSION {
                return Err(ChainError::NewDatabaseVersion {
                    on_disk,
                    supported: DATABASE_VERSION,
                });
            }
        }
        Ok(stored)
    }

    // ── head & identity ───────────────────────────────────────────────

    pub fn head_id(&self) -> BlockId {
        self.head.read().id
    }

    pub fn head_header(&self) -> SignedBlockHeader {
        self.head.read().header.clone()
    }

    pub fn set_head(&self, id: BlockId, header: SignedBlockHeader) {
        *self.head.write() = HeadBlock { id, header };
    }

    pub fn set_chain_id(&self, chain_id: Hash256) {
        *self.stored_chain_id.write() = chain_id;
    }

    // ── block & fork lookups ──────────────────────────────────────────

    pub fn get_block(&self, id: &BlockId) -> ChainResult<FullBlock> {
        self.block_data.get(id)?.ok_or(ChainError::UnknownBlock(*id))
    }

    pub fn get_block_header(&self, id: &BlockId) -> ChainResult<SignedBlockHeader> {
        Ok(self
            .block_record
            .get(id)?
            .ok_or(ChainError::UnknownBlock(*id))?
            .header)
    }

    pub fn get_block_id(&self, block_num: u64) -> ChainResult<BlockId> {
        self.block_num_to_id
            .get(&block_num)?
            .ok_or(ChainError::UnknownBlockNumber(block_num))
    }

    pub fn get_fork_data(&self, id: &BlockId) -> ChainResult<Option<BlockForkData>> {
        Ok(self.fork_data.get(id)?)
    }

    /// All known block ids at the given number.
    pub fn fetch_blocks_at_number(&self, block_num: u64) -> ChainResult<Vec<BlockId>> {
        Ok(self.fork_number.get(&block_num)?.unwrap_or_default())
    }

    // ── typed stores (primary table + secondary indexes) ──────────────

    pub fn store_property(
        &self,
        property: ChainProperty,
        value: Option<&PropertyValue>,
    ) -> ChainResult<()> {
        match value {
            Some(value) => self.property.put(&property, value)?,
            None => self.property.remove(&property)?,
        }
        Ok(())
    }

    pub fn store_account_record(
        &self,
        id: AccountId,
        record: Option<&AccountRecord>,
    ) -> ChainResult<()> {
        let old = self.account.get(&id)?;

        if let Some(old) = &old {
            if old.is_delegate() && !old.is_retracted() {
                self.delegate_votes
                    .write()
                    .remove(&VoteIndex { votes: old.net_votes(), delegate_id: id });
            }
        }

        match record {
            Some(record) => {
                if let Some(old) = &old {
                    if old.name != record.name {
                        self.account_name.remove(&old.name)?;
                    }
                    for address in account_addresses(old) {
                        if !account_addresses(record).contains(&address) {
                            self.account_address.remove(&address)?;
                        }
                    }
                }
                self.account.put(&id, record)?;
                self.account_name.put(&record.name, &id)?;
                for address in account_addresses(record) {
                    self.account_address.put(&address, &id)?;
                }
                if record.is_delegate() && !record.is_retracted() {
                    self.delegate_votes
                        .write()
                        .insert(VoteIndex { votes: record.net_votes(), delegate_id: id });
                }
            }
            None => {
                if let Some(old) = &old {
                    self.account_name.remove(&old.name)?;
                    for address in account_addresses(old) {
                        self.account_address.remove(&address)?;
                    }
                }
                self.account.remove(&id)?;
            }
        }
        Ok(())
    }

    pub fn store_asset_record(
        &self,
        id: AssetId,
        record: Option<&AssetRecord>,
    ) -> ChainResult<()> {
        let old = self.asset.get(&id)?;
        match record {
            Some(record) => {
                if let Some(old) = &old {
                    if old.symbol != record.symbol {
                        self.asset_symbol.remove(&old.symbol)?;
                    }
                }
                self.asset.put(&id, record)?;
                self.asset_symbol.put(&record.symbol, &id)?;
            }
            None => {
                if let Some(old) = &old {
                    self.asset_symbol.remove(&old.symbol)?;
                }
                self.asset.remove(&id)?;
            }
        }
        Ok(())
    }

    /// Store a balance; zero balances migrate to the empty-balance table.
    pub fn store_balance_record(
        &self,
        id: BalanceId,
        record: Option<&BalanceRecord>,
    ) -> ChainResult<()> {
        match record {
            Some(record) if record.balance != 0 => {
                self.balance.put(&id, record)?;
                self.empty_balance.remove(&id)?;
            }
            Some(record) => {
                self.empty_balance.put(&id, record)?;
                self.balance.remove(&id)?;
            }
            None => {
                self.balance.remove(&id)?;
                self.empty_balance.remove(&id)?;
            }
        }
        Ok(())
    }

    pub fn store_slate_record(
        &self,
        id: SlateId,
        record: Option<&SlateRecord>,
    ) -> ChainResult<()> {
        match record {
            Some(record) => self.slate.put(&id, record)?,
            None => self.slate.remove(&id)?,
        }
        Ok(())
    }

    pub fn store_transaction_record(
        &self,
        id: TransactionId,
        record: Option<&TransactionRecord>,
    ) -> ChainResult<()> {
        let chain_id = self.chain_id();
        match record {
            Some(record) => {
                self.transaction.put(&id, record)?;
                self.unique_transactions
                    .write()
                    .insert((record.trx.expiration, record.trx.digest(chain_id)));
            }
            None => {
                if let Some(old) = self.transaction.get(&id)? {
                    self.unique_transactions
                        .write()
                        .remove(&(old.trx.expiration, old.trx.digest(chain_id)));
                }
                self.transaction.remove(&id)?;
            }
        }
        Ok(())
    }

    fn order_table(&self, kind: OrderKind) -> &Table<MarketIndexKey, OrderRecord> {
        match kind {
            OrderKind::Bid => &self.bid,
            OrderKind::Ask => &self.ask,
            OrderKind::RelativeBid => &self.relative_bid,
            OrderKind::RelativeAsk => &self.relative_ask,
            OrderKind::Short => &self.short,
        }
    }

    pub fn store_order_record(
        &self,
        kind: OrderKind,
        key: MarketIndexKey,
        record: Option<&OrderRecord>,
    ) -> ChainResult<()> {
        self.dirty_markets
            .write()
            .insert((key.order_price.quote_asset_id, key.order_price.base_asset_id));
        match record {
            Some(record) => self.order_table(kind).put(&key, record)?,
            None => self.order_table(kind).remove(&key)?,
        }
        Ok(())
    }

    pub fn store_collateral_record(
        &self,
        key: MarketIndexKey,
        record: Option<&CollateralRecord>,
    ) -> ChainResult<()> {
        let quote_id = key.order_price.quote_asset_id;
        self.dirty_markets
            .write()
            .insert((quote_id, key.order_price.base_asset_id));
        if let Some(old) = self.collateral.get(&key)? {
            self.collateral_expiration
                .write()
                .remove(&(quote_id, old.expiration, key));
        }
        match record {
            Some(record) => {
                self.collateral.put(&key, record)?;
                self.collateral_expiration
                    .write()
                    .insert((quote_id, record.expiration, key));
            }
            None => self.collateral.remove(&key)?,
        }
        Ok(())
    }

    pub fn store_feed_record(
        &self,
        index: FeedIndex,
        record: Option<&FeedRecord>,
    ) -> ChainResult<()> {
        match record {
            Some(record) => self.feed.put(&index, record)?,
            None => self.feed.remove(&index)?,
        }
        Ok(())
    }

    pub fn store_slot_record(
        &self,
        start_time: Timestamp,
        record: Option<&SlotRecord>,
    ) -> ChainResult<()> {
        match record {
            Some(record) => self.slot.put(&start_time, record)?,
            None => self.slot.remove(&start_time)?,
        }
        Ok(())
    }

    pub fn store_market_history_record(
        &self,
        key: MarketHistoryKey,
        record: Option<&MarketHistoryRecord>,
    ) -> ChainResult<()> {
        match record {
            Some(record) => self.market_history.put(&key, record)?,
            None => self.market_history.remove(&key)?,
        }
        Ok(())
    }

    /// Apply a captured write-set to the committed tables, in deterministic
    /// per-kind order, through the index-maintaining stores.
    pub fn apply_delta(&self, delta: &ChainDelta) -> ChainResult<()> {
        trace!(target: "chain::store", properties = delta.properties.len(),
               accounts = delta.accounts.len(), balances = delta.balances.len(),
               "applying delta");
        for (property, value) in &delta.properties {
            self.store_property(*property, value.as_ref())?;
        }
        for (id, record) in &delta.accounts {
            self.store_account_record(*id, record.as_ref())?;
        }
        for (id, record) in &delta.assets {
            self.store_asset_record(*id, record.as_ref())?;
        }
        for (id, record) in &delta.balances {
            self.store_balance_record(*id, record.as_ref())?;
        }
        for (id, record) in &delta.slates {
            self.store_slate_record(*id, record.as_ref())?;
        }
        for (id, record) in &delta.transactions {
            self.store_transaction_record(*id, record.as_ref())?;
        }
        for ((kind, key), record) in &delta.orders {
            self.store_order_record(*kind, *key, record.as_ref())?;
        }
        for (key, record) in &delta.collateral {
            self.store_collateral_record(*key, record.as_ref())?;
        }
        for (index, record) in &delta.feeds {
            self.store_feed_record(*index, record.as_ref())?;
        }
        for (start_time, record) in &delta.slots {
            self.store_slot_record(*start_time, record.as_ref())?;
        }
        for (key, record) in &delta.market_history {
            self.store_market_history_record(*key, record.as_ref())?;
        }
        self.dirty_markets.write().extend(delta.dirty_markets.iter().copied());
        Ok(())
    }

    // ── delegate ranking ──────────────────────────────────────────────

    /// Delegates ranked by `(net votes desc, id asc)`, skipping `first`.
    pub fn get_delegates_by_vote(&self, first: usize, count: usize) -> Vec<AccountId> {
        self.delegate_votes
            .read()
            .iter()
            .skip(first)
            .take(count)
            .map(|entry| entry.delegate_id)
            .collect()
    }

    /// The top-N delegate set for the next round, in rank order.
    pub fn next_round_active_delegates(&self) -> Vec<AccountId> {
        self.get_delegates_by_vote(0, self.config.num_delegates)
    }

    // ── audits ────────────────────────────────────────────────────────

    /// Recompute an asset's supply by scanning balances, open orders,
    /// collateral and delegate pay.
    pub fn calculate_supply(&self, asset_id: AssetId) -> ChainResult<AssetAmount> {
        let record = self
            .asset
            .get(&asset_id)?
            .ok_or(ChainError::Inconsistent("supply audit of unknown asset"))?;
        let mut total = AssetAmount::new(record.collected_fees, asset_id);

        self.balance.for_each(|_, balance| {
            if balance.asset_id() == asset_id {
                total.amount += balance.balance;
            }
            true
        })?;

        for table in [&self.ask, &self.relative_ask] {
            table.for_each(|key, order| {
                if key.order_price.base_asset_id == asset_id {
                    total.amount += order.balance;
                }
                true
            })?;
        }

        if asset_id == 0 {
            self.short.for_each(|_, order| {
                total.amount += order.balance;
                true
            })?;
            self.collateral.for_each(|_, position| {
                total.amount += position.collateral_balance;
                true
            })?;
            self.account.for_each(|_, account| {
                if let Some(info) = &account.delegate_info {
                    total.amount += info.pay_balance;
                }
                true
            })?;
        } else {
            for table in [&self.bid, &self.relative_bid] {
                table.for_each(|key, order| {
                    if key.order_price.quote_asset_id == asset_id {
                        total.amount += order.balance;
                    }
                    true
                })?;
            }
        }

        Ok(total)
    }

    /// Total debt backing a market-issued asset: outstanding payoff
    /// balances, optionally with accrued interest.
    pub fn calculate_debt(
        &self,
        asset_id: AssetId,
        include_interest: bool,
    ) -> ChainResult<AssetAmount> {
        let mut total = AssetAmount::new(0, asset_id);
        let now = self.now();
        let max_short_period = self.config.max_short_period_secs;
        self.collateral.for_each(|key, position| {
            if key.order_price.quote_asset_id != asset_id {
                return true;
            }
            total.amount += position.payoff_balance;
            if include_interest {
                let position_start = position.expiration.saturating_sub(max_short_period);
                let age = now.saturating_sub(position_start);
                total.amount +=
                    interest_owed(position.payoff_balance, position.interest_rate_bps, age);
            }
            true
        })?;
        Ok(total)
    }

    /// Collateral positions in `quote_id`'s market expiring at or before
    /// `by`, soonest first. An ordered-range scan over the expiration
    /// index.
    pub fn get_expiring_collateral(
        &self,
        quote_id: AssetId,
        by: Timestamp,
    ) -> Vec<(Timestamp, MarketIndexKey)> {
        let low = (quote_id, 0, MarketIndexKey::default());
        self.collateral_expiration
            .read()
            .range(low..)
            .take_while(|(quote, expiration, _)| *quote == quote_id && *expiration <= by)
            .map(|(_, expiration, key)| (*expiration, *key))
            .collect()
    }

    /// Visit every balance record; `include_empty` also visits zeroed ones.
    pub fn scan_balances(
        &self,
        include_empty: bool,
        mut f: impl FnMut(&BalanceRecord),
    ) -> ChainResult<()> {
        self.balance.for_each(|_, record| {
            f(&record);
            true
        })?;
        if include_empty {
            self.empty_balance.for_each(|_, record| {
                f(&record);
                true
            })?;
        }
        Ok(())
    }

    /// Visit every account record.
    pub fn scan_accounts(&self, mut f: impl FnMut(&AccountRecord)) -> ChainResult<()> {
        self.account.for_each(|_, record| {
            f(&record);
            true
        })?;
        Ok(())
    }

    /// Visit every asset record.
    pub fn scan_assets(&self, mut f: impl FnMut(&AssetRecord)) -> ChainResult<()> {
        self.asset.for_each(|_, record| {
            f(&record);
            true
        })?;
        Ok(())
    }
}

/// Every address a record is reachable by in the address index.
fn account_addresses(record: &AccountRecord) -> Vec<Address> {
    let mut addresses = vec![record.owner_key.address()];
    for key in record.active_key_history.values() {
        let address = key.address();
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    addresses
}

impl ChainState for ChainStore {
    fn get_property(&self, property: ChainProperty) -> ChainResult<Option<PropertyValue>> {
        Ok(self.property.get(&property)?)
    }

    fn get_account(&self, id: AccountId) -> ChainResult<Option<AccountRecord>> {
        Ok(self.account.get(&id)?)
    }

    fn get_account_id_by_name(&self, name: &str) -> ChainResult<Option<AccountId>> {
        Ok(self.account_name.get(&name.to_string())?)
    }

    fn get_account_id_by_address(&self, address: &Address) -> ChainResult<Option<AccountId>> {
        Ok(self.account_address.get(address)?)
    }

    fn get_asset(&self, id: AssetId) -> ChainResult<Option<AssetRecord>> {
        Ok(self.asset.get(&id)?)
    }

    fn get_asset_id_by_symbol(&self, symbol: &str) -> ChainResult<Option<AssetId>> {
        Ok(self.asset_symbol.get(&symbol.to_string())?)
    }

    fn get_balance(&self, id: &BalanceId) -> ChainResult<Option<BalanceRecord>> {
        Ok(self.balance.get(id)?)
    }

    fn get_slate(&self, id: SlateId) -> ChainResult<Option<SlateRecord>> {
        Ok(self.slate.get(&id)?)
    }

    fn get_transaction(&self, id: &TransactionId) -> ChainResult<Option<TransactionRecord>> {
        Ok(self.transaction.get(id)?)
    }

    fn get_order(
        &self,
        kind: OrderKind,
        key: &MarketIndexKey,
    ) -> ChainResult<Option<OrderRecord>> {
        Ok(self.order_table(kind).get(key)?)
    }

    fn get_collateral(&self, key: &MarketIndexKey) -> ChainResult<Option<CollateralRecord>> {
        Ok(self.collateral.get(key)?)
    }

    fn get_feed(&self, index: &FeedIndex) -> ChainResult<Option<FeedRecord>> {
        Ok(self.feed.get(index)?)
    }

    fn get_slot(&self, start_time: Timestamp) -> ChainResult<Option<SlotRecord>> {
        Ok(self.slot.get(&start_time)?)
    }

    fn get_market_history(
        &self,
        key: &MarketHistoryKey,
    ) -> ChainResult<Option<MarketHistoryRecord>> {
        Ok(self.market_history.get(key)?)
    }

    fn is_known_transaction(&self, trx: &SignedTransaction) -> ChainResult<bool> {
        let fingerprint = (trx.expiration, trx.digest(self.chain_id()));
        Ok(self.unique_transactions.read().contains(&fingerprint))
    }

    fn chain_id(&self) -> Hash256 {
        *self.stored_chain_id.read()
    }

    fn head_block_num(&self) -> u64 {
        self.head.read().header.block_num
    }

    fn now(&self) -> Timestamp {
        let head = self.head.read();
        if head.header.block_num > 0 {
            head.header.timestamp
        } else {
            // Before any block: the start of the previous slot, so the
            // first block's timestamp always reads as "in the future".
            slot_start_time(self.clock.now(), self.config.block_interval_secs)
                .saturating_sub(self.config.block_interval_secs)
        }
    }
}

impl std::fmt::Debug for ChainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStore")
            .field("head", &*self.head.read())
            .field("chain_id", &*self.stored_chain_id.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use meridian_primitives::{sha256, DelegateStats, Hash160, WithdrawCondition};

    fn store() -> ChainStore {
        let store = ChainStore::in_memory(
            Arc::new(ChainConfig::default()),
            Arc::new(ManualClock::new(1_000_000)),
        );
        store.set_chain_id(sha256(b"test chain"));
        store
    }

    fn delegate(id: AccountId, votes: ShareAmount) -> AccountRecord {
        AccountRecord {
            id,
            name: format!("delegate-{id}"),
            delegate_info: Some(DelegateStats { votes_for: votes, ..Default::default() }),
            ..Default::default()
        }
    }

    #[test]
    fn vote_index_ranks_by_votes_then_id() {
        let store = store();
        store.store_account_record(1, Some(&delegate(1, 50))).unwrap();
        store.store_account_record(2, Some(&delegate(2, 90))).unwrap();
        store.store_account_record(3, Some(&delegate(3, 50))).unwrap();
        assert_eq!(store.get_delegates_by_vote(0, 10), vec![2, 1, 3]);

        // Vote changes reorder the index through the store path.
        store.store_account_record(3, Some(&delegate(3, 95))).unwrap();
        assert_eq!(store.get_delegates_by_vote(0, 2), vec![3, 2]);

        // Retracted delegates drop out entirely.
        let mut retracted = delegate(2, 90);
        retracted.retracted = true;
        store.store_account_record(2, Some(&retracted)).unwrap();
        assert_eq!(store.get_delegates_by_vote(0, 10), vec![3, 1]);
    }

    #[test]
    fn zero_balances_migrate_to_the_empty_table() {
        let store = store();
        let condition = WithdrawCondition::signature(
            meridian_primitives::Address(Hash160([9; 20])),
            0,
            0,
        );
        let id = condition.balance_id();
        let mut record = BalanceRecord::new(condition, 400, 10);

        store.store_balance_record(id, Some(&record)).unwrap();
        assert!(store.get_balance(&id).unwrap().is_some());

        record.balance = 0;
        store.store_balance_record(id, Some(&record)).unwrap();
        assert_eq!(store.get_balance(&id).unwrap(), None);
        assert!(store.empty_balance.get(&id).unwrap().is_some());

        // Restoring a positive balance moves it back.
        record.balance = 250;
        store.store_balance_record(id, Some(&record)).unwrap();
        assert_eq!(store.get_balance(&id).unwrap().unwrap().balance, 250);
        assert!(store.empty_balance.get(&id).unwrap().is_none());
    }

    #[test]
    fn transaction_store_tracks_replay_fingerprints() {
        let store = store();
        let trx = SignedTransaction { expiration: 2_000_000, ..Default::default() };
        let record = TransactionRecord {
            trx: trx.clone(),
            location: Default::default(),
            fees: 5,
        };
        assert!(!store.is_known_transaction(&trx).unwrap());
        store.store_transaction_record(trx.id(), Some(&record)).unwrap();
        assert!(store.is_known_transaction(&trx).unwrap());
        store.store_transaction_record(trx.id(), None).unwrap();
        assert!(!store.is_known_transaction(&trx).unwrap());
    }

    #[test]
    fn collateral_store_maintains_the_expiration_index() {
        let store = store();
        let key = MarketIndexKey {
            order_price: meridian_primitives::Price {
                ratio: 5,
                quote_asset_id: 1,
                base_asset_id: 0,
            },
            owner: meridian_primitives::Address(Hash160([4; 20])),
        };
        let mut position = CollateralRecord {
            collateral_balance: 1_000,
            payoff_balance: 500,
            interest_rate_bps: 100,
            expiration: 9_000,
        };
        store.store_collateral_record(key, Some(&position)).unwrap();
        assert!(store.collateral_expiration.read().contains(&(1, 9_000, key)));

        position.expiration = 12_000;
        store.store_collateral_record(key, Some(&position)).unwrap();
        let index = store.collateral_expiration.read();
        assert!(!index.contains(&(1, 9_000, key)));
        assert!(index.contains(&(1, 12_000, key)));
        drop(index);

        assert_eq!(store.get_expiring_collateral(1, 11_000), vec![]);
        assert_eq!(store.get_expiring_collateral(1, 12_000), vec![(12_000, key)]);
        assert_eq!(store.get_expiring_collateral(2, 20_000), vec![]);

        store.store_collateral_record(key, None).unwrap();
        assert!(store.collateral_expiration.read().is_empty());
    }

    #[test]
    fn account_rename_updates_the_name_index() {
        let store = store();
        let mut record = delegate(7, 0);
        store.store_account_record(7, Some(&record)).unwrap();
        assert_eq!(store.get_account_id_by_name("delegate-7").unwrap(), Some(7));

        record.name = "renamed".into();
        store.store_account_record(7, Some(&record)).unwrap();
        assert_eq!(store.get_account_id_by_name("delegate-7").unwrap(), None);
        assert_eq!(store.get_account_id_by_name("renamed").unwrap(), Some(7));
    }
}
