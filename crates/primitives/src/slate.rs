//! Delegate slates and production-slot records.

use serde::{Deserialize, Serialize};

use crate::crypto::hash160;
use crate::encode::packed;
use crate::{AccountId, BlockId, SlateId, Timestamp};

/// A list of delegates a balance may vote for, addressed by content id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlateRecord {
    /// Content id, [`SlateRecord::id_for`] of the delegate list.
    pub id: SlateId,
    /// Delegates voted for, ascending by id.
    pub delegates: Vec<AccountId>,
}

impl SlateRecord {
    /// Build a slate, computing its content id.
    pub fn new(mut delegates: Vec<AccountId>) -> Self {
        delegates.sort_unstable();
        delegates.dedup();
        let id = Self::id_for(&delegates);
        Self { id, delegates }
    }

    /// Content id of a delegate list: the first eight little-endian bytes
    /// of its packed hash. Id 0 is reserved for "votes for nobody".
    pub fn id_for(delegates: &[AccountId]) -> SlateId {
        if delegates.is_empty() {
            return 0;
        }
        let digest = hash160(&packed(&delegates.to_vec()));
        u64::from_le_bytes(digest.0[..8].try_into().expect("hash is 20 bytes"))
    }
}

/// The outcome of one production slot: who was scheduled, and the block
/// produced (or `None` for a miss). Stored only when statistics tracking
/// is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    /// Start time of the slot.
    pub start_time: Timestamp,
    /// Delegate the schedule assigned to the slot.
    pub delegate_id: AccountId,
    /// Block produced in the slot, if any.
    pub block_id: Option<BlockId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slate_id_is_order_insensitive() {
        let a = SlateRecord::new(vec![3, 1, 2]);
        let b = SlateRecord::new(vec![1, 2, 3]);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, 0);
    }

    #[test]
    fn empty_slate_is_zero() {
        assert_eq!(SlateRecord::id_for(&[]), 0);
    }
}
