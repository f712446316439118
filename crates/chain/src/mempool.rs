//! Mempool bookkeeping: the fee-ordered index over stored pending
//! transactions and the relay-fee pressure valve.
//!
//! Admission, revalidation and block-template assembly live on
//! [`crate::ChainDatabase`], which owns both this structure and the
//! on-disk pending-transaction table.

use meridian_primitives::{ShareAmount, TransactionId};
use std::collections::BTreeMap;

use crate::evaluation::TransactionEvalState;
use crate::state::ChainDelta;

/// Fee-index key: highest fee first, transaction id as tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeIndex {
    /// Total fees the transaction pays.
    pub fees: ShareAmount,
    /// Transaction id.
    pub id: TransactionId,
}

impl Ord for FeeIndex {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.fees.cmp(&self.fees).then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for FeeIndex {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct Mempool {
    /// Evaluated pending transactions, fee-descending.
    pub fee_index: BTreeMap<FeeIndex, TransactionEvalState>,
    /// Accumulated writes of every evaluated pending transaction, stacked
    /// over committed state for the next evaluation.
    pub pending_delta: ChainDelta,
    /// Current relay-fee floor.
    pub relay_fee: ShareAmount,
    /// Set when a committed block requires the pool to be re-evaluated.
    pub revalidation_scheduled: bool,
}

impl Mempool {
    pub fn new(relay_fee: ShareAmount) -> Self {
        Self { relay_fee, ..Default::default() }
    }

    /// The relay fee demanded of a non-override insert, escalating
    /// quadratically in the overage once the pool exceeds `max_queue_size`.
    pub fn required_relay_fee(&self, max_queue_size: usize) -> ShareAmount {
        let size = self.fee_index.len();
        if size > max_queue_size {
            let overage = (size - max_queue_size) as ShareAmount;
            self.relay_fee.saturating_mul(overage).saturating_mul(overage)
        } else {
            self.relay_fee
        }
    }

    /// Drop all evaluated state (stored transactions are untouched).
    pub fn clear_evaluated(&mut self) {
        self.fee_index.clear();
        self.pending_delta = ChainDelta::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_primitives::hash160;

    #[test]
    fn fee_index_orders_highest_first() {
        let a = FeeIndex { fees: 10, id: hash160(b"a") };
        let b = FeeIndex { fees: 20, id: hash160(b"b") };
        let mut keys = vec![a, b];
        keys.sort();
        assert_eq!(keys[0].fees, 20);
    }

    #[test]
    fn relay_fee_escalates_quadratically() {
        let mut pool = Mempool::new(100);
        assert_eq!(pool.required_relay_fee(10), 100);
        // Simulate 13 entries against a cap of 10: overage 3.
        for n in 0..13u8 {
            let state = TransactionEvalState {
                trx: Default::default(),
                fees: n as i64,
                alt_fees_paid: 0,
            };
            pool.fee_index.insert(FeeIndex { fees: n as i64, id: hash160(&[n]) }, state);
        }
        assert_eq!(pool.required_relay_fee(10), 100 * 9);
    }
}
