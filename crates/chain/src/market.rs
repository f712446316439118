//! The market-execution seam.
//!
//! Matching algebra is a collaborator, not part of the engine: the block
//! pipeline hands the engine every dirty market with the block timestamp
//! and the pending overlay, and commits whatever the engine wrote. The
//! engine shipped here does nothing, which is a valid market (no matches).

use meridian_primitives::{AssetId, ShareAmount, Timestamp};

use crate::error::ChainResult;
use crate::state::PendingState;

/// Executes one market at a block boundary.
pub trait MarketEngine: Send + Sync + std::fmt::Debug {
    /// Run the `quote`/`base` market at `timestamp`, writing matches,
    /// cover executions and history through `pending`. Returns whether
    /// anything executed.
    fn execute(
        &self,
        pending: &mut PendingState<'_>,
        quote_id: AssetId,
        base_id: AssetId,
        timestamp: Timestamp,
    ) -> ChainResult<bool>;
}

/// A market engine that never matches anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMarketEngine;

impl MarketEngine for NoopMarketEngine {
    fn execute(
        &self,
        _pending: &mut PendingState<'_>,
        _quote_id: AssetId,
        _base_id: AssetId,
        _timestamp: Timestamp,
    ) -> ChainResult<bool> {
        Ok(false)
    }
}

const SECONDS_PER_YEAR: u128 = 365 * 24 * 60 * 60;

/// Simple interest owed on a short position's debt.
pub fn interest_owed(principal: ShareAmount, rate_bps: u64, age_secs: u64) -> ShareAmount {
    if principal <= 0 {
        return 0;
    }
    let owed = principal as u128 * rate_bps as u128 * age_secs as u128
        / (10_000 * SECONDS_PER_YEAR);
    owed.min(ShareAmount::MAX as u128) as ShareAmount
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_scales_linearly_with_age() {
        // 10% APR on 1_000_000 for half a year.
        let half_year = 365 * 24 * 60 * 60 / 2;
        assert_eq!(interest_owed(1_000_000, 1_000, half_year), 50_000);
        assert_eq!(interest_owed(1_000_000, 1_000, 0), 0);
        assert_eq!(interest_owed(0, 1_000, half_year), 0);
    }
}
