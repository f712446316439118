//! The chain database: block ingestion, the application pipeline, the
//! reorg controller and the mempool surface.
//!
//! `push_block` is the single entry point for candidate blocks. It places
//! the block in the fork tree, and if the block's fork is heavier than the
//! head chain, switches to it: pop to the common ancestor, then extend with
//! the alternate history. Every block applies through a pending overlay and
//! commits atomically together with its undo entry, so a failure at any
//! point leaves committed state untouched and marks the offending subtree
//! invalid.

use meridian_primitives::constants::DATABASE_VERSION;
use meridian_primitives::{
    packed, ripemd160, slot_start_time, AccountId, AccountRecord, AssetAmount, AssetId, BlockId,
    BlockRecord, FeedIndex, FullBlock, Hash160, Hash256, Price, PublicKey, ShareAmount,
    SignedBlockHeader, SignedTransaction, SlotRecord, Timestamp, TransactionLocation,
    TransactionRecord,
};
use meridian_db::Table;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ChainConfig;
use crate::delegate::{shuffle_delegates, slot_delegate_index};
use crate::error::{ChainError, ChainResult};
use crate::evaluation::{StandardEvaluator, TransactionEvalState, TransactionEvaluator};
use crate::fork::BlockForkData;
use crate::genesis::{initialize_genesis, GenesisSource, GenesisState};
use crate::market::{MarketEngine, NoopMarketEngine};
use crate::mempool::{FeeIndex, Mempool};
use crate::metrics::ChainMetrics;
use crate::shareable::{BlockSummary, ChainNotification};
use crate::state::{ChainProperty, ChainState, PendingState, PropertyValue};
use crate::store::ChainStore;

/// Limits applied when assembling a block template from the mempool.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Maximum packed block size in bytes.
    pub block_max_size: usize,
    /// Maximum number of transactions per block.
    pub block_max_transaction_count: usize,
    /// Maximum packed size of a single included transaction.
    pub transaction_max_size: usize,
    /// Wall-clock limit on template assembly.
    pub block_max_production_time: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            block_max_size: 1 << 20,
            block_max_transaction_count: 2_000,
            transaction_max_size: 1 << 16,
            block_max_production_time: Duration::from_secs(3),
        }
    }
}

/// The fork-aware chain state engine.
///
/// Single-writer: all mutators take `&mut self`. Wrap in
/// [`crate::ShareableChainDatabase`] for concurrent readers and deferred
/// observer fan-out.
pub struct ChainDatabase {
    store: ChainStore,
    mempool: Mempool,
    evaluator: Arc<dyn TransactionEvaluator>,
    market_engine: Arc<dyn MarketEngine>,
    config: Arc<ChainConfig>,
    clock: Arc<dyn Clock>,
    notifications: Vec<ChainNotification>,
    metrics: ChainMetrics,
}

impl ChainDatabase {
    /// Open (or create) a database at `data_dir` with default collaborators.
    pub fn open(data_dir: &Path, config: ChainConfig, genesis: GenesisSource) -> ChainResult<Self> {
        Self::open_with(
            data_dir,
            config,
            genesis,
            Arc::new(SystemClock),
            Arc::new(StandardEvaluator),
            Arc::new(NoopMarketEngine),
        )
    }

    /// Open (or create) a database with explicit collaborators.
    ///
    /// A missing index directory, or one written by an older database
    /// version, triggers a full reindex: the raw block store is renamed
    /// aside, indices are rebuilt from genesis by replaying every block in
    /// ascending number order, and the old store is deleted. An index
    /// written by a *newer* version fails with
    /// [`ChainError::NewDatabaseVersion`].
    pub fn open_with(
        data_dir: &Path,
        config: ChainConfig,
        genesis: GenesisSource,
        clock: Arc<dyn Clock>,
        evaluator: Arc<dyn TransactionEvaluator>,
        market_engine: Arc<dyn MarketEngine>,
    ) -> ChainResult<Self> {
        let config = Arc::new(config);
        let genesis_state = genesis.load()?;
        let index_dir = data_dir.join("index");
        let raw_dir = data_dir.join("raw_chain");

        if index_dir.exists() {
            let store = ChainStore::open(data_dir, config.clone(), clock.clone())?;
            match store.check_database_version()? {
                Some(version) if version == DATABASE_VERSION => {
                    return Self::finish_open(store, config, clock, evaluator, market_engine);
                }
                stored => {
                    warn!(target: "chain::db", ?stored, "database version outdated, reindexing");
                    drop(store);
                }
            }
        }

        // Fresh init or reindex: wipe the index, keep raw blocks aside.
        let _ = std::fs::remove_dir_all(&index_dir);
        let orig_dir = raw_dir.join("block_data_orig");
        let block_data_dir = raw_dir.join("block_data");
        if block_data_dir.exists() && !orig_dir.exists() {
            std::fs::rename(&block_data_dir, &orig_dir).map_err(|source| {
                ChainError::Db(meridian_db::DbError::CreateDir {
                    path: orig_dir.clone(),
                    source,
                })
            })?;
        }

        // Load the number index into memory and clear it for rebuild.
        let mut num_to_id: Vec<(u64, BlockId)> = Vec::new();
        let num_dir = raw_dir.join("block_num_to_id");
        if num_dir.exists() {
            let table: Table<u64, BlockId> = Table::open(&raw_dir, "block_num_to_id")?;
            table.for_each(|block_num, id| {
                num_to_id.push((block_num, id));
                true
            })?;
            drop(table);
            let _ = std::fs::remove_dir_all(&num_dir);
        }

        let store = ChainStore::open(data_dir, config.clone(), clock.clone())?;
        store.store_property(
            ChainProperty::DatabaseVersion,
            Some(&PropertyValue::U64(DATABASE_VERSION)),
        )?;
        let mut database = Self {
            mempool: Mempool::new(config.default_relay_fee),
            evaluator,
            market_engine,
            clock,
            notifications: Vec::new(),
            metrics: ChainMetrics,
            config,
            store,
        };

        // Bulk-load mode for the whole replay; flushed every thousand
        // blocks and once at the end.
        database.store.set_record_write_through(false)?;
        initialize_genesis(&database.store, &database.config, &genesis_state)?;

        if orig_dir.exists() {
            let orig: Table<BlockId, FullBlock> = Table::open(&raw_dir, "block_data_orig")?;
            let mut blocks: Vec<FullBlock> = Vec::new();
            if num_to_id.is_empty() {
                orig.for_each(|_, block| {
                    blocks.push(block);
                    true
                })?;
                blocks.sort_by_key(FullBlock::block_num);
            } else {
                num_to_id.sort_by_key(|(block_num, _)| *block_num);
                for (_, id) in &num_to_id {
                    if let Some(block) = orig.get(id)? {
                        blocks.push(block);
                    }
                }
            }
            info!(target: "chain::db", blocks = blocks.len(), "re-indexing database");
            let mut indexed = 0u64;
            for block in blocks {
                if let Err(error) = database.push_block(block) {
                    warn!(target: "chain::db", %error, "block rejected during reindex");
                }
                indexed += 1;
                if indexed % 1_000 == 0 {
                    database.store.set_record_write_through(true)?;
                    database.store.set_record_write_through(false)?;
                    debug!(target: "chain::db", indexed, "reindex progress");
                }
            }
            database.store.set_record_write_through(true)?;
            drop(orig);
            let _ = std::fs::remove_dir_all(&orig_dir);
        } else {
            database.store.set_record_write_through(true)?;
        }

        // Replay notifications are stale; observers attach after open.
        database.notifications.clear();
        database.revalidate_pending()?;
        Ok(database)
    }

    fn finish_open(
        store: ChainStore,
        config: Arc<ChainConfig>,
        clock: Arc<dyn Clock>,
        evaluator: Arc<dyn TransactionEvaluator>,
        market_engine: Arc<dyn MarketEngine>,
    ) -> ChainResult<Self> {
        let chain_id = store
            .get_property(ChainProperty::ChainId)?
            .and_then(|value| value.as_hash256())
            .ok_or(ChainError::Inconsistent("database is missing its chain id"))?;
        store.set_chain_id(chain_id);

        if let Some((_, head_id)) = store.block_num_to_id.last()? {
            let header = store.get_block_header(&head_id)?;
            store.set_head(head_id, header);
        }
        store.populate_indexes()?;

        let mut database = Self {
            mempool: Mempool::new(config.default_relay_fee),
            evaluator,
            market_engine,
            clock,
            notifications: Vec::new(),
            metrics: ChainMetrics,
            config,
            store,
        };

        // Blocks noted as "from the future" get their validity re-checked
        // on the next switch attempt.
        let mut future_ids = Vec::new();
        database.store.future_blocks.for_each(|id, _| {
            future_ids.push(id);
            true
        })?;
        for id in future_ids {
            database.store.mark_unchecked(&id)?;
        }

        database.revalidate_pending()?;
        Ok(database)
    }

    /// An all-in-memory database; used by tests and simulation.
    pub fn in_memory(
        config: ChainConfig,
        genesis: GenesisState,
        clock: Arc<dyn Clock>,
    ) -> ChainResult<Self> {
        Self::in_memory_with(
            config,
            genesis,
            clock,
            Arc::new(StandardEvaluator),
            Arc::new(NoopMarketEngine),
        )
    }

    /// An all-in-memory database with explicit collaborators.
    pub fn in_memory_with(
        config: ChainConfig,
        genesis: GenesisState,
        clock: Arc<dyn Clock>,
        evaluator: Arc<dyn TransactionEvaluator>,
        market_engine: Arc<dyn MarketEngine>,
    ) -> ChainResult<Self> {
        let config = Arc::new(config);
        let store = ChainStore::in_memory(config.clone(), clock.clone());
        store.store_property(
            ChainProperty::DatabaseVersion,
            Some(&PropertyValue::U64(DATABASE_VERSION)),
        )?;
        initialize_genesis(&store, &config, &genesis)?;
        Ok(Self {
            mempool: Mempool::new(config.default_relay_fee),
            evaluator,
            market_engine,
            clock,
            notifications: Vec::new(),
            metrics: ChainMetrics,
            config,
            store,
        })
    }

    // ── block ingestion ───────────────────────────────────────────────

    /// Add a block to the fork tree and reorganize if its fork is heavier.
    ///
    /// Returns the fork data of the pushed block (not necessarily the new
    /// head).
    pub fn push_block(&mut self, block: FullBlock) -> ChainResult<BlockForkData> {
        let head_num = self.store.head_block_num();
        if head_num > self.config.max_undo_history
            && block.block_num() <= head_num - self.config.max_undo_history
        {
            return Err(ChainError::BlockOlderThanUndoHistory {
                block_num: block.block_num(),
                head_num,
                undo_history: self.config.max_undo_history,
            });
        }

        let block_id = block.id();
        if self.store.block_data.contains(&block_id)? {
            debug!(target: "chain::db", block = %block_id, "block already known");
            return self
                .store
                .get_fork_data(&block_id)?
                .ok_or(ChainError::Inconsistent("stored block without fork data"));
        }

        let (longest_id, longest_fork) = self.store.store_and_index(block_id, &block)?;

        if longest_fork.can_link() {
            let longest_num = self.store.get_block(&longest_id)?.block_num();
            if longest_num > head_num {
                // Walk candidate levels downward until some fork switches.
                let mut level = longest_num;
                'levels: loop {
                    for candidate in self.store.fetch_blocks_at_number(level)? {
                        let Some(fork) = self.store.get_fork_data(&candidate)? else {
                            continue;
                        };
                        if !fork.can_link() {
                            continue;
                        }
                        match self.switch_to_fork(candidate) {
                            Ok(()) => break 'levels,
                            Err(error) if error.is_time_in_future() => {
                                // May become valid once our clock catches
                                // up; remember it for revalidation.
                                warn!(target: "chain::db", block = %block_id, %error,
                                      "fork has a block from the future, queueing for revalidation");
                                self.store.future_blocks.put(&block_id, &0)?;
                            }
                            Err(error) => {
                                warn!(target: "chain::db", candidate = %candidate, %error,
                                      "fork rejected");
                            }
                        }
                    }
                    if level <= 1 {
                        break;
                    }
                    level -= 1;
                }
            }
        } else {
            debug!(target: "chain::db", block = %block_id, "block does not link to genesis yet");
        }

        self.store
            .get_fork_data(&block_id)?
            .ok_or(ChainError::Inconsistent("pushed block lost its fork data"))
    }

    /// Switch the head to `target_id`: pop to the common ancestor, then
    /// re-apply the alternate history.
    fn switch_to_fork(&mut self, target_id: BlockId) -> ChainResult<()> {
        if target_id == self.store.head_id() {
            return Ok(());
        }
        info!(target: "chain::db", from = %self.store.head_id(), to = %target_id,
              "switching forks");
        let history = self.store.get_fork_history(&target_id)?;
        let common_ancestor = *history.last().expect("fork history is never empty");
        let mut popped = 0u64;
        while self.store.head_id() != common_ancestor {
            self.pop_block()?;
            popped += 1;
        }
        if popped > 0 {
            self.metrics.reorg();
        }
        for block_id in history.iter().rev().skip(1) {
            let block = self.store.get_block(block_id)?;
            self.extend_chain(&block)?;
        }
        Ok(())
    }

    /// Undo the head block: restore the previous committed state from the
    /// undo entry and move head back.
    pub fn pop_block(&mut self) -> ChainResult<()> {
        let (head_id, head_header) = {
            let head = self.store.head.read();
            (head.id, head.header.clone())
        };
        if head_header.block_num == 0 {
            warn!(target: "chain::db", "attempted to pop the genesis state");
            return Ok(());
        }

        self.store.mark_included(&head_id, false)?;
        self.store.block_num_to_id.remove(&head_header.block_num)?;

        let undo = self
            .store
            .undo_state
            .get(&head_id)?
            .ok_or(ChainError::MissingUndoState(head_id))?;
        self.store.apply_delta(&undo)?;

        let previous = head_header.previous;
        let previous_header = if previous.is_zero() {
            SignedBlockHeader::default()
        } else {
            self.store.get_block_header(&previous)?
        };
        self.store.set_head(previous, previous_header);

        self.notifications.push(ChainNotification::StateChanged(Arc::new(undo)));
        self.metrics.block_popped();
        Ok(())
    }

    /// Validate and apply a block extending the current head.
    fn extend_chain(&mut self, block: &FullBlock) -> ChainResult<()> {
        let start = Instant::now();
        let block_id = block.id();
        if let Err(error) = self.apply_block(block, block_id, start) {
            warn!(target: "chain::db", block = %block_id, %error, "error applying block");
            // A block from the future is not wrong, merely early: leave its
            // validity unknown so a later switch re-checks it.
            if !error.is_time_in_future() {
                self.metrics.block_invalid();
                if let Err(mark_error) = self.store.mark_invalid(&block_id, &error.to_string()) {
                    warn!(target: "chain::db", %mark_error, "failed to record block invalidity");
                }
            }
            return Err(error);
        }

        // Drop replay fingerprints that can no longer collide.
        let now = self.store.now();
        let mut unique = self.store.unique_transactions.write();
        while let Some(first) = unique.first().copied() {
            if first.0 <= now {
                unique.pop_first();
            } else {
                break;
            }
        }
        Ok(())
    }

    fn apply_block(
        &mut self,
        block: &FullBlock,
        block_id: BlockId,
        start: Instant,
    ) -> ChainResult<()> {
        let config = self.config.clone();
        let last_checkpoint = config.last_checkpoint_num();

        // Checkpoint gate: at or before the last checkpoint the expected
        // signer comes from the schedule and signature recovery is elided.
        let signee_key = if last_checkpoint >= block.block_num() {
            self.slot_signee_account(block.header.timestamp)?.active_key()
        } else {
            block.header.signee()?
        };
        if let Some(expected) = config.checkpoints.get(&block.block_num()) {
            if *expected != block_id {
                return Err(ChainError::FailedCheckpointVerification {
                    block_num: block.block_num(),
                    expected: *expected,
                    got: block_id,
                });
            }
        }

        self.verify_header(block, &signee_key)?;

        let mut block_record = self
            .store
            .block_record
            .get(&block_id)?
            .ok_or(ChainError::UnknownBlock(block_id))?;

        let (applied_delta, undo) = {
            let mut pending = PendingState::new(&self.store);

            // Production bookkeeping first: it depends on the pre-block
            // active delegate order.
            self.update_delegate_production_info(block, &mut pending, &signee_key)?;
            self.pay_delegate(&mut pending, &signee_key, &mut block_record)?;

            let transactions_after_markets =
                block.block_num() >= config.forks.markets_before_transactions;
            if !transactions_after_markets {
                self.apply_transactions(block, &mut pending)?;
            }
            self.execute_markets(block.header.timestamp, &mut pending)?;
            if transactions_after_markets {
                self.apply_transactions(block, &mut pending)?;
            }

            self.update_active_delegate_list(block, &mut pending)?;
            self.update_random_seed(block, &mut pending, &mut block_record)?;

            // Historical replay behind the last checkpoint needs no undo.
            let undo = if self.store.head_block_num() < last_checkpoint {
                None
            } else {
                Some(pending.build_undo_delta()?)
            };
            (pending.into_delta(), undo)
        };

        if let Some(undo) = undo {
            if block.block_num() > config.max_undo_history {
                let expired_num = block.block_num() - config.max_undo_history;
                if let Ok(expired_id) = self.store.get_block_id(expired_num) {
                    self.store.undo_state.remove(&expired_id)?;
                }
            }
            self.store.undo_state.put(&block_id, &undo)?;
        }

        // Commit: overlay flush, inclusion, head, number index. The writer
        // guard of the shareable wrapper makes this atomic for readers.
        self.store.apply_delta(&applied_delta)?;
        self.store.mark_included(&block_id, true)?;
        self.store.set_head(block_id, block.header.clone());
        self.store.block_num_to_id.put(&block.block_num(), &block_id)?;

        self.clear_pending(block)?;

        block_record.processing_time_us = start.elapsed().as_micros() as u64;
        self.store.block_record.put(&block_id, &block_record)?;

        self.apply_fork_activations(block.block_num())?;

        // Observers only care about recent blocks, not historical replay;
        // the notification is fanned out after the writer scope ends.
        if self.clock.now().saturating_sub(block.header.timestamp) < config.block_interval_secs {
            let summary = BlockSummary {
                block: block.clone(),
                applied_changes: Arc::new(applied_delta),
            };
            self.notifications.push(ChainNotification::BlockApplied(Arc::new(summary)));
        }
        self.metrics.block_applied(block.block_num(), start.elapsed().as_secs_f64());
        Ok(())
    }

    fn verify_header(&self, block: &FullBlock, signee_key: &PublicKey) -> ChainResult<()> {
        let head_id = self.store.head_id();
        let head = self.store.head_header();
        let interval = self.config.block_interval_secs;
        let timestamp = block.header.timestamp;

        if block.block_num() > 1 && block.block_num() != head.block_num + 1 {
            return Err(ChainError::BlockNumbersNotSequential {
                block_num: block.block_num(),
                head_num: head.block_num,
            });
        }
        if block.header.previous != head_id {
            return Err(ChainError::InvalidPreviousBlockId {
                expected: head_id,
                got: block.header.previous,
            });
        }
        if timestamp % interval != 0 {
            return Err(ChainError::InvalidBlockTime { timestamp });
        }
        if block.block_num() > 1 && timestamp <= head.timestamp {
            return Err(ChainError::TimeInPast { timestamp, head_timestamp: head.timestamp });
        }
        let now = self.clock.now();
        if timestamp > now + 2 * interval {
            return Err(ChainError::TimeInFuture { timestamp, now });
        }
        if !block.validate_digest() {
            return Err(ChainError::InvalidBlockDigest);
        }
        if !block.validate_unique() {
            return Err(ChainError::DuplicateTransactionInBlock);
        }

        let expected = self.slot_signee_account(timestamp)?;
        if *signee_key != expected.active_key() {
            return Err(ChainError::InvalidDelegateSignee { expected: expected.id });
        }
        Ok(())
    }

    fn update_delegate_production_info(
        &self,
        block: &FullBlock,
        pending: &mut PendingState<'_>,
        signee_key: &PublicKey,
    ) -> ChainResult<()> {
        let config = &self.config;
        let interval = config.block_interval_secs;

        let delegate_id = self
            .store
            .get_account_id_by_address(&signee_key.address())?
            .ok_or(ChainError::Inconsistent("block signee is not a registered account"))?;
        let mut delegate = pending
            .get_account(delegate_id)?
            .ok_or(ChainError::Inconsistent("block signee account vanished"))?;
        {
            let info = delegate
                .delegate_info
                .as_mut()
                .ok_or(ChainError::Inconsistent("block signee is not a delegate"))?;
            if let Some(committed) = info.next_secret_hash {
                if ripemd160(block.header.previous_secret.as_ref()) != committed {
                    return Err(ChainError::InvalidProducerSecret);
                }
            }
            info.blocks_produced += 1;
            info.next_secret_hash = Some(block.header.next_secret_hash);
            info.last_block_num_produced = block.block_num();
        }
        pending.store_account(delegate);
        if config.track_statistics {
            pending.store_slot(SlotRecord {
                start_time: block.header.timestamp,
                delegate_id,
                block_id: Some(block.id()),
            });
        }

        // Charge every skipped slot to the delegate that owned it. The
        // active list has not been reshuffled yet, so slot positions are
        // still those the missed slots were scheduled under.
        let mut required_confirmations = self
            .store
            .get_property(ChainProperty::ConfirmationRequirement)?
            .and_then(|value| value.as_u64())
            .unwrap_or_else(|| config.initial_confirmation_requirement());
        let head = self.store.head_header();
        let active = self.store.get_active_delegates()?;
        let mut slot_time = if head.block_num > 0 {
            head.timestamp + interval
        } else {
            block.header.timestamp
        };
        while slot_time < block.header.timestamp {
            let index = slot_delegate_index(slot_time, interval, config.num_delegates);
            let missed_id = *active
                .get(index)
                .ok_or(ChainError::Inconsistent("active delegate list too short"))?;
            let mut missed = pending
                .get_account(missed_id)?
                .ok_or(ChainError::Inconsistent("scheduled delegate vanished"))?;
            missed
                .delegate_info
                .as_mut()
                .ok_or(ChainError::Inconsistent("scheduled account is not a delegate"))?
                .blocks_missed += 1;
            pending.store_account(missed);
            if config.track_statistics {
                pending.store_slot(SlotRecord {
                    start_time: slot_time,
                    delegate_id: missed_id,
                    block_id: None,
                });
            }
            slot_time += interval;
            required_confirmations += 2;
        }

        required_confirmations = required_confirmations
            .saturating_sub(1)
            .clamp(1, config.max_confirmation_requirement());
        pending.set_property(
            ChainProperty::ConfirmationRequirement,
            PropertyValue::U64(required_confirmations),
        );
        Ok(())
    }

    fn pay_delegate(
        &self,
        pending: &mut PendingState<'_>,
        signee_key: &PublicKey,
        block_record: &mut BlockRecord,
    ) -> ChainResult<()> {
        let config = &self.config;
        let legacy = self.store.head_block_num() < config.forks.current_pay_formula;

        let mut base_asset = pending
            .get_asset(0)?
            .ok_or(ChainError::Inconsistent("base asset record missing"))?;
        let delegate_id = self
            .store
            .get_account_id_by_address(&signee_key.address())?
            .ok_or(ChainError::Inconsistent("block signee is not a registered account"))?;
        let mut delegate = pending
            .get_account(delegate_id)?
            .ok_or(ChainError::Inconsistent("block signee account vanished"))?;

        let pay_rate = delegate
            .delegate_info
            .as_ref()
            .ok_or(ChainError::Inconsistent("block signee is not a delegate"))?
            .pay_rate
            .min(100) as ShareAmount;

        let accepted_new_shares = if legacy {
            0
        } else {
            config.max_delegate_pay_per_block * pay_rate / 100
        };
        base_asset.current_share_supply += accepted_new_shares;

        let max_collected_fees =
            base_asset.collected_fees / config.fee_pay_window_blocks() as ShareAmount;
        let accepted_collected_fees = max_collected_fees * pay_rate / 100;
        let destroyed_collected_fees = max_collected_fees - accepted_collected_fees;
        base_asset.collected_fees -= max_collected_fees;
        base_asset.current_share_supply -= destroyed_collected_fees;

        let paycheck = accepted_new_shares + accepted_collected_fees;
        {
            let info = delegate.delegate_info.as_mut().expect("checked above");
            info.votes_for += paycheck;
            info.pay_balance += paycheck;
            info.total_paid += paycheck;
        }
        pending.store_account(delegate);
        pending.store_asset(base_asset);

        block_record.signee_shares_issued = accepted_new_shares;
        block_record.signee_fees_collected = accepted_collected_fees;
        block_record.signee_fees_destroyed = destroyed_collected_fees;
        Ok(())
    }

    fn apply_transactions(
        &self,
        block: &FullBlock,
        pending: &mut PendingState<'_>,
    ) -> ChainResult<()> {
        let skip_signatures = block.block_num() <= self.config.last_checkpoint_num();
        for (index, trx) in block.user_transactions.iter().enumerate() {
            let eval = self.evaluator.evaluate(trx, pending, skip_signatures)?;
            let record = TransactionRecord {
                trx: trx.clone(),
                location: TransactionLocation {
                    block_num: block.block_num(),
                    trx_index: index as u32,
                },
                fees: eval.fees,
            };
            pending.store_transaction(trx.id(), record);
        }
        Ok(())
    }

    fn execute_markets(
        &self,
        timestamp: Timestamp,
        pending: &mut PendingState<'_>,
    ) -> ChainResult<()> {
        let mut pairs: BTreeSet<(AssetId, AssetId)> = self.store.dirty_markets.read().clone();
        pairs.extend(pending.delta().dirty_markets.iter().copied());
        for (quote_id, base_id) in pairs {
            if quote_id > base_id {
                self.market_engine.execute(pending, quote_id, base_id, timestamp)?;
            }
            self.store.dirty_markets.write().remove(&(quote_id, base_id));
        }
        Ok(())
    }

    fn update_active_delegate_list(
        &self,
        block: &FullBlock,
        pending: &mut PendingState<'_>,
    ) -> ChainResult<()> {
        if block.block_num() % self.config.num_delegates as u64 != 0 {
            return Ok(());
        }
        let ranked = self.store.next_round_active_delegates();
        let seed = pending.get_current_random_seed()?;
        let shuffled = shuffle_delegates(ranked, seed);
        pending.set_property(
            ChainProperty::ActiveDelegateList,
            PropertyValue::AccountList(shuffled),
        );
        Ok(())
    }

    fn update_random_seed(
        &self,
        block: &FullBlock,
        pending: &mut PendingState<'_>,
        block_record: &mut BlockRecord,
    ) -> ChainResult<()> {
        let current = pending.get_current_random_seed()?;
        let mut bytes = packed(&block.header.previous_secret);
        bytes.extend_from_slice(&packed(&current));
        let new_seed = ripemd160(&bytes);
        pending.set_property(ChainProperty::LastRandomSeed, PropertyValue::Hash160(new_seed));
        block_record.random_seed = new_seed;
        Ok(())
    }

    fn clear_pending(&mut self, block: &FullBlock) -> ChainResult<()> {
        for trx in &block.user_transactions {
            self.store.pending_transaction.remove(&trx.id())?;
        }
        self.mempool.clear_evaluated();
        // Revalidation is deferred work; irrelevant while replaying behind
        // the last checkpoint.
        self.mempool.revalidation_scheduled =
            self.store.head_block_num() >= self.config.last_checkpoint_num();
        self.metrics.mempool_size(0);
        Ok(())
    }

    fn apply_fork_activations(&self, block_num: u64) -> ChainResult<()> {
        let forks = &self.config.forks;
        if forks.base_supply_recompute == Some(block_num) {
            let supply = self.store.calculate_supply(0)?;
            let mut record = self
                .store
                .get_asset(0)?
                .ok_or(ChainError::Inconsistent("base asset record missing"))?;
            record.current_share_supply = supply.amount;
            self.store.store_asset_record(0, Some(&record))?;
        }
        if forks.all_supply_recompute.contains(&block_num) {
            let mut records = Vec::new();
            self.store.scan_assets(|record| records.push(record.clone()))?;
            warn!(target: "chain::db", assets = records.len(), block_num,
                  "recalculating asset supplies");
            for mut record in records {
                let supply = self.store.calculate_supply(record.id)?;
                let mut amount = supply.amount;
                let mut fees = record.collected_fees;
                if record.is_market_issued() {
                    // Reconcile market-issued supply against outstanding
                    // debt; any discrepancy is absorbed as fees.
                    let debt = self.store.calculate_debt(record.id, false)?;
                    if amount != debt.amount {
                        let difference = debt.amount - amount;
                        amount += difference;
                        fees += difference;
                    }
                }
                record.current_share_supply = amount;
                record.collected_fees = fees;
                self.store.store_asset_record(record.id, Some(&record))?;
            }
        }
        if let Some((reset_num, pay_rate)) = forks.delegate_pay_rate_reset {
            if reset_num == block_num {
                let mut delegates = Vec::new();
                self.store.scan_accounts(|record| {
                    if record.is_delegate() {
                        delegates.push(record.clone());
                    }
                })?;
                warn!(target: "chain::db", delegates = delegates.len(), pay_rate,
                      "resetting delegate pay rates");
                for mut record in delegates {
                    record.delegate_info.as_mut().expect("filtered to delegates").pay_rate =
                        pay_rate;
                    self.store.store_account_record(record.id, Some(&record))?;
                }
            }
        }
        Ok(())
    }

    // ── mempool ───────────────────────────────────────────────────────

    /// Evaluate a transaction against the shared pending overlay, requiring
    /// at least `required_fees`; on success its writes join the overlay.
    pub fn evaluate_transaction(
        &mut self,
        trx: &SignedTransaction,
        required_fees: ShareAmount,
    ) -> ChainResult<TransactionEvalState> {
        let accumulated = std::mem::take(&mut self.mempool.pending_delta);
        let mut base = PendingState::from_delta(&self.store, accumulated);

        let result = {
            let mut layer = PendingState::new(&base);
            match self.evaluator.evaluate(trx, &mut layer, false) {
                Ok(eval) => Ok((eval, layer.into_delta())),
                Err(error) => Err(error),
            }
        };

        let outcome = match result {
            Ok((eval, layer_delta)) => {
                let fees = eval.total_fees();
                if fees < required_fees {
                    warn!(target: "chain::mempool", trx = %trx.id(), fees, required_fees,
                          "transaction below relay fee");
                    Err(ChainError::InsufficientRelayFee { fees, required: required_fees })
                } else {
                    base.absorb(layer_delta);
                    Ok(eval)
                }
            }
            Err(error) => Err(error),
        };
        self.mempool.pending_delta = base.into_delta();
        outcome
    }

    /// Check a transaction without admitting it; returns the failure, if
    /// any.
    pub fn get_transaction_error(
        &self,
        trx: &SignedTransaction,
        min_fee: ShareAmount,
    ) -> Option<ChainError> {
        let mut pending = PendingState::new(&self.store);
        match self.evaluator.evaluate(trx, &mut pending, false) {
            Ok(eval) if eval.total_fees() < min_fee => Some(ChainError::InsufficientRelayFee {
                fees: eval.total_fees(),
                required: min_fee,
            }),
            Ok(_) => None,
            Err(error) => Some(error),
        }
    }

    /// Admit a transaction to the mempool. Duplicate ids are silently
    /// ignored (`Ok(None)`); under queue pressure the required relay fee
    /// escalates quadratically unless `override_limits` is set.
    pub fn store_pending_transaction(
        &mut self,
        trx: SignedTransaction,
        override_limits: bool,
    ) -> ChainResult<Option<TransactionEvalState>> {
        let id = trx.id();
        if override_limits {
            info!(target: "chain::mempool", trx = %id, "storing local transaction");
        }
        if self.store.pending_transaction.contains(&id)? {
            return Ok(None);
        }

        let required_fees = if override_limits {
            self.mempool.relay_fee
        } else {
            self.mempool.required_relay_fee(self.config.max_pending_queue_size)
        };

        let eval = self.evaluate_transaction(&trx, required_fees)?;
        self.mempool
            .fee_index
            .insert(FeeIndex { fees: eval.total_fees(), id }, eval.clone());
        self.store.pending_transaction.put(&id, &trx)?;
        self.metrics.mempool_size(self.mempool.fee_index.len());
        Ok(Some(eval))
    }

    /// Rebuild the fee index by re-evaluating every stored pending
    /// transaction against a fresh overlay; invalid ones are dropped.
    pub fn revalidate_pending(&mut self) -> ChainResult<()> {
        self.mempool.clear_evaluated();
        self.mempool.revalidation_scheduled = false;

        let mut entries = Vec::new();
        self.store.pending_transaction.for_each(|id, trx| {
            entries.push((id, trx));
            true
        })?;

        let relay_fee = self.mempool.relay_fee;
        let mut discard = Vec::new();
        for (id, trx) in entries {
            match self.evaluate_transaction(&trx, relay_fee) {
                Ok(eval) => {
                    self.mempool
                        .fee_index
                        .insert(FeeIndex { fees: eval.total_fees(), id }, eval);
                }
                Err(error) => {
                    warn!(target: "chain::mempool", trx = %id, %error,
                          "discarding invalid pending transaction");
                    discard.push(id);
                }
            }
        }
        for id in discard {
            self.store.pending_transaction.remove(&id)?;
        }
        debug!(target: "chain::mempool", pending = self.mempool.fee_index.len(),
               "revalidation complete");
        self.metrics.mempool_size(self.mempool.fee_index.len());
        Ok(())
    }

    /// All currently valid pending transactions, highest fee first.
    pub fn get_pending_transactions(&self) -> Vec<TransactionEvalState> {
        self.mempool.fee_index.values().cloned().collect()
    }

    /// True if a committed block scheduled a mempool revalidation.
    pub fn revalidation_scheduled(&self) -> bool {
        self.mempool.revalidation_scheduled
    }

    /// Current relay-fee floor.
    pub fn relay_fee(&self) -> ShareAmount {
        self.mempool.relay_fee
    }

    /// Adjust the relay-fee floor.
    pub fn set_relay_fee(&mut self, fee: ShareAmount) {
        self.mempool.relay_fee = fee;
    }

    /// Assemble an unsigned block template at `timestamp` from the mempool,
    /// highest fee first, within the producer's limits. The producer
    /// supplies its secret reveal and next commitment; signing is its job.
    pub fn generate_block_template(
        &mut self,
        timestamp: Timestamp,
        previous_secret: Hash160,
        next_secret_hash: Hash160,
        limits: &ProducerConfig,
    ) -> ChainResult<FullBlock> {
        let start = Instant::now();
        let head_id = self.store.head_id();
        let head_num = self.store.head_block_num();

        let mut pending = PendingState::new(&self.store);
        if head_num >= self.config.forks.markets_before_transactions {
            self.execute_markets(timestamp, &mut pending)?;
        }

        let mut block = FullBlock {
            header: SignedBlockHeader {
                previous: head_id,
                block_num: head_num + 1,
                timestamp,
                previous_secret,
                next_secret_hash,
                ..Default::default()
            },
            user_transactions: Vec::new(),
        };
        let mut block_size = block.block_size();

        for candidate in self.get_pending_transactions() {
            if start.elapsed() >= limits.block_max_production_time {
                break;
            }
            if block.user_transactions.len() >= limits.block_max_transaction_count {
                break;
            }
            let trx = candidate.trx;
            let size = trx.data_size();
            if size > limits.transaction_max_size {
                warn!(target: "chain::mempool", trx = %trx.id(), size,
                      "excluding oversized transaction");
                continue;
            }
            if block_size + size > limits.block_max_size {
                continue;
            }
            let mut layer = PendingState::new(&pending);
            match self.evaluator.evaluate(&trx, &mut layer, false) {
                Ok(_) => {
                    let layer_delta = layer.into_delta();
                    pending.absorb(layer_delta);
                    block_size += size;
                    block.user_transactions.push(trx);
                }
                Err(error) => {
                    debug!(target: "chain::mempool", trx = %trx.id(), %error,
                           "excluding failing transaction");
                }
            }
        }

        block.header.transaction_digest = block.compute_transaction_digest();
        Ok(block)
    }

    // ── schedule & feeds ──────────────────────────────────────────────

    /// The delegate account owning the slot at `timestamp`.
    pub fn slot_signee_account(&self, timestamp: Timestamp) -> ChainResult<AccountRecord> {
        let active = self.store.get_active_delegates()?;
        let index =
            slot_delegate_index(timestamp, self.config.block_interval_secs, self.config.num_delegates);
        let id = *active
            .get(index)
            .ok_or(ChainError::Inconsistent("active delegate list too short"))?;
        self.store
            .get_account(id)?
            .ok_or(ChainError::Inconsistent("active delegate without account record"))
    }

    /// The next slot within one round assigned to any of `delegate_ids`.
    pub fn get_next_producible_block_timestamp(
        &self,
        delegate_ids: &[AccountId],
    ) -> ChainResult<Option<Timestamp>> {
        let interval = self.config.block_interval_secs;
        let mut next = slot_start_time(self.clock.now(), interval);
        if next <= self.store.now() {
            next += interval;
        }
        let last = next + self.config.num_delegates as u64 * interval;
        let active = self.store.get_active_delegates()?;
        while next < last {
            let index = slot_delegate_index(next, interval, self.config.num_delegates);
            if let Some(id) = active.get(index) {
                if delegate_ids.contains(id) {
                    return Ok(Some(next));
                }
            }
            next += interval;
        }
        Ok(None)
    }

    /// Median of the feeds published by currently-active delegates within
    /// the last day; `None` below the feed quorum.
    pub fn get_median_delegate_price(&self, quote_id: AssetId) -> ChainResult<Option<Price>> {
        let mut active = self.store.get_active_delegates()?;
        active.sort_unstable();
        let now = self.store.now();
        let mut prices = Vec::new();
        let start = FeedIndex { quote_id, delegate_id: 0 };
        self.store.feed.for_each_from(&start, |index, record| {
            if index.quote_id != quote_id {
                return false;
            }
            if active.binary_search(&index.delegate_id).is_ok()
                && record.last_update + 24 * 60 * 60 > now
                && record.value.quote_asset_id == quote_id
                && record.value.base_asset_id == 0
            {
                prices.push(record.value);
            }
            true
        })?;
        if prices.len() >= self.config.min_feeds {
            prices.sort_unstable();
            Ok(Some(prices[prices.len() / 2]))
        } else {
            Ok(None)
        }
    }

    // ── queries ───────────────────────────────────────────────────────

    /// Read-only view of the last committed state.
    pub fn state(&self) -> &dyn ChainState {
        &self.store
    }

    /// The chain id.
    pub fn chain_id(&self) -> Hash256 {
        self.store.chain_id()
    }

    /// Chain time (the head block's timestamp).
    pub fn now(&self) -> Timestamp {
        self.store.now()
    }

    /// Current head number; 0 before any block.
    pub fn get_head_block_num(&self) -> u64 {
        self.store.head_block_num()
    }

    /// Current head id; zero before any block.
    pub fn get_head_block_id(&self) -> BlockId {
        self.store.head_id()
    }

    /// Current head header.
    pub fn get_head_block(&self) -> SignedBlockHeader {
        self.store.head_header()
    }

    /// Fetch a block body.
    pub fn get_block(&self, block_id: &BlockId) -> ChainResult<FullBlock> {
        self.store.get_block(block_id)
    }

    /// Fetch a block body by number on the main chain.
    pub fn get_block_by_number(&self, block_num: u64) -> ChainResult<FullBlock> {
        let id = self.store.get_block_id(block_num)?;
        self.store.get_block(&id)
    }

    /// Fetch a block's stored record (header + statistics).
    pub fn get_block_record(
        &self,
        block_id: &BlockId,
    ) -> ChainResult<Option<BlockRecord>> {
        Ok(self.store.block_record.get(block_id)?)
    }

    /// Main-chain id at a number.
    pub fn get_block_id(&self, block_num: u64) -> ChainResult<BlockId> {
        self.store.get_block_id(block_num)
    }

    /// Fork metadata of a block id.
    pub fn get_block_fork_data(&self, block_id: &BlockId) -> ChainResult<Option<BlockForkData>> {
        self.store.get_fork_data(block_id)
    }

    /// All known block ids at a number.
    pub fn fetch_blocks_at_number(&self, block_num: u64) -> ChainResult<Vec<BlockId>> {
        self.store.fetch_blocks_at_number(block_num)
    }

    /// Ids from a block back to the common ancestor with the main chain.
    pub fn get_fork_history(&self, block_id: &BlockId) -> ChainResult<Vec<BlockId>> {
        self.store.get_fork_history(block_id)
    }

    /// The shuffled active delegate list.
    pub fn get_active_delegates(&self) -> ChainResult<Vec<AccountId>> {
        self.store.get_active_delegates()
    }

    /// Delegates ranked by vote.
    pub fn get_delegates_by_vote(&self, first: usize, count: usize) -> Vec<AccountId> {
        self.store.get_delegates_by_vote(first, count)
    }

    /// The top-N delegates that would form the next round.
    pub fn next_round_active_delegates(&self) -> Vec<AccountId> {
        self.store.next_round_active_delegates()
    }

    /// Recompute an asset's supply from state (audit).
    pub fn calculate_supply(&self, asset_id: AssetId) -> ChainResult<AssetAmount> {
        self.store.calculate_supply(asset_id)
    }

    /// Outstanding debt of a market-issued asset (audit).
    pub fn calculate_debt(
        &self,
        asset_id: AssetId,
        include_interest: bool,
    ) -> ChainResult<AssetAmount> {
        self.store.calculate_debt(asset_id, include_interest)
    }

    /// Collateral positions in a market expiring at or before `by`.
    pub fn get_expiring_collateral(
        &self,
        quote_id: AssetId,
        by: Timestamp,
    ) -> Vec<(Timestamp, meridian_primitives::MarketIndexKey)> {
        self.store.get_expiring_collateral(quote_id, by)
    }

    /// The confirmed transactions of a stored block.
    pub fn get_transactions_for_block(
        &self,
        block_id: &BlockId,
    ) -> ChainResult<Vec<TransactionRecord>> {
        let record = self
            .store
            .block_record
            .get(block_id)?
            .ok_or(ChainError::UnknownBlock(*block_id))?;
        record
            .user_transaction_ids
            .iter()
            .map(|id| {
                self.store
                    .get_transaction(id)?
                    .ok_or(ChainError::UnknownTransaction(*id))
            })
            .collect()
    }

    /// Genesis snapshot balances never claimed since genesis.
    pub fn unclaimed_genesis(&self) -> ChainResult<AssetAmount> {
        let genesis_date = self
            .store
            .get_account(0)?
            .map(|account| account.registration_date)
            .unwrap_or(0);
        let mut total = AssetAmount::new(0, 0);
        self.store.scan_balances(false, |record| {
            if record.snapshot_info.is_some() && record.last_update <= genesis_date {
                total.amount += record.balance;
            }
        })?;
        Ok(total)
    }

    /// True if an undo entry is stored for the block.
    pub fn has_undo_entry(&self, block_id: &BlockId) -> ChainResult<bool> {
        Ok(self.store.undo_state.contains(block_id)?)
    }

    /// True if the block was recorded for later revalidation after a
    /// `time_in_future` rejection.
    pub fn is_queued_for_revalidation(&self, block_id: &BlockId) -> ChainResult<bool> {
        Ok(self.store.future_blocks.contains(block_id)?)
    }

    /// Drain the notifications collected by mutators since the last drain.
    pub fn take_notifications(&mut self) -> Vec<ChainNotification> {
        std::mem::take(&mut self.notifications)
    }
}

impl std::fmt::Debug for ChainDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainDatabase")
            .field("store", &self.store)
            .field("pending", &self.mempool.fee_index.len())
            .finish_non_exhaustive()
    }
}
