//! Engine metrics.

use metrics::{counter, gauge, histogram};

/// Counters and gauges emitted by the engine.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ChainMetrics;

impl ChainMetrics {
    pub fn block_applied(&self, block_num: u64, processing_secs: f64) {
        counter!("meridian_chain_blocks_applied_total").increment(1);
        gauge!("meridian_chain_head_block_number").set(block_num as f64);
        histogram!("meridian_chain_block_processing_seconds").record(processing_secs);
    }

    pub fn block_invalid(&self) {
        counter!("meridian_chain_blocks_invalid_total").increment(1);
    }

    pub fn block_popped(&self) {
        counter!("meridian_chain_blocks_popped_total").increment(1);
    }

    pub fn reorg(&self) {
        counter!("meridian_chain_reorgs_total").increment(1);
    }

    pub fn mempool_size(&self, size: usize) {
        gauge!("meridian_chain_pending_transactions").set(size as f64);
    }
}
