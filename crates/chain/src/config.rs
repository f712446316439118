//! Engine configuration: consensus parameters, checkpoints and the
//! fork-activation table.

use meridian_primitives::constants::PRECISION;
use meridian_primitives::{BlockId, Hash256, ShareAmount};
use std::collections::BTreeMap;

/// Block numbers at which historical behavior changes activate.
///
/// A fresh chain leaves everything at the defaults, which enable current
/// behavior from genesis; replaying an existing chain sets the historical
/// numbers so old blocks re-apply exactly as they first did.
#[derive(Debug, Clone, Default)]
pub struct ForkActivations {
    /// Before this block number, user transactions apply *before* market
    /// execution; from it on, markets execute first.
    pub markets_before_transactions: u64,
    /// Block at which the base asset's supply is recomputed from state.
    pub base_supply_recompute: Option<u64>,
    /// Blocks at which every asset's supply is recomputed, reconciling
    /// market-issued supply against collateral debt through collected fees.
    pub all_supply_recompute: Vec<u64>,
    /// Block at which all delegate pay rates are reset to this value.
    pub delegate_pay_rate_reset: Option<(u64, u8)>,
    /// Before this block number the legacy pay formula (fee pool only, no
    /// share issuance) is used.
    pub current_pay_formula: u64,
}

/// Runtime-constructed consensus and engine parameters.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Seconds between block production slots.
    pub block_interval_secs: u64,
    /// Number of active delegates; also the shuffle period in blocks.
    pub num_delegates: usize,
    /// How many blocks behind head remain reorganizable.
    pub max_undo_history: u64,
    /// Maximum new shares a producing delegate may be issued per block.
    pub max_delegate_pay_per_block: ShareAmount,
    /// Minimum number of delegate feeds for a published median price.
    pub min_feeds: usize,
    /// Maximum lifetime of a short position.
    pub max_short_period_secs: u64,
    /// Mempool size above which the relay fee escalates.
    pub max_pending_queue_size: usize,
    /// Relay fee required of mempool transactions before escalation.
    pub default_relay_fee: ShareAmount,
    /// Whether slot records and market history are stored.
    pub track_statistics: bool,
    /// Hard-coded `block number → id` checkpoints. Signature verification
    /// is elided at or before the last checkpoint.
    pub checkpoints: BTreeMap<u64, BlockId>,
    /// Historical behavior activations.
    pub forks: ForkActivations,
    /// Legacy chain-id substitution: a computed genesis hash equal to
    /// `expected` is rewritten to `desired`.
    pub expected_chain_id: Option<Hash256>,
    /// See [`ChainConfig::expected_chain_id`].
    pub desired_chain_id: Option<Hash256>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            block_interval_secs: 10,
            num_delegates: 101,
            max_undo_history: 5_000,
            max_delegate_pay_per_block: 50 * PRECISION as ShareAmount,
            min_feeds: 51,
            max_short_period_secs: 30 * 24 * 60 * 60,
            max_pending_queue_size: 1_000,
            default_relay_fee: PRECISION as ShareAmount / 10,
            track_statistics: true,
            checkpoints: BTreeMap::new(),
            forks: ForkActivations::default(),
            expected_chain_id: None,
            desired_chain_id: None,
        }
    }
}

impl ChainConfig {
    /// Blocks produced per day at the configured interval.
    pub fn blocks_per_day(&self) -> u64 {
        24 * 60 * 60 / self.block_interval_secs
    }

    /// The fee pool drains over this many blocks (two weeks).
    pub fn fee_pay_window_blocks(&self) -> u64 {
        14 * self.blocks_per_day()
    }

    /// Number of the last hard-coded checkpoint, or 0 if none.
    pub fn last_checkpoint_num(&self) -> u64 {
        self.checkpoints.keys().next_back().copied().unwrap_or(0)
    }

    /// Initial confirmation requirement before any slots are missed.
    pub fn initial_confirmation_requirement(&self) -> u64 {
        2 * self.num_delegates as u64
    }

    /// Upper clamp on the confirmation requirement.
    pub fn max_confirmation_requirement(&self) -> u64 {
        3 * self.num_delegates as u64
    }
}
