//! Balances addressed by their withdraw condition.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash160, Address};
use crate::encode::packed;
use crate::{AssetId, BalanceId, ShareAmount, SlateId, Timestamp};

/// How a balance may be claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawClaim {
    /// Claimable at any time by a signature of `owner`.
    Signature {
        /// Address whose signature releases the balance.
        owner: Address,
    },
    /// Claimable by `owner` as the balance vests linearly.
    Vesting {
        /// Address whose signature releases the vested portion.
        owner: Address,
        /// Vesting start.
        start_time: Timestamp,
        /// Seconds over which the original balance vests.
        duration_secs: u64,
        /// Amount placed under vesting at creation.
        original_balance: ShareAmount,
    },
}

/// The full withdraw condition: claim variant plus the asset held and the
/// delegate slate the balance votes for. Balances are content-addressed by
/// the packed encoding of this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawCondition {
    /// Asset the balance holds.
    pub asset_id: AssetId,
    /// Slate the balance's shares vote for; 0 votes for nobody.
    pub slate_id: SlateId,
    /// The claim variant.
    pub claim: WithdrawClaim,
}

impl WithdrawCondition {
    /// A plain signature condition.
    pub fn signature(owner: Address, asset_id: AssetId, slate_id: SlateId) -> Self {
        Self { asset_id, slate_id, claim: WithdrawClaim::Signature { owner } }
    }

    /// The balance id this condition addresses.
    pub fn balance_id(&self) -> BalanceId {
        hash160(&packed(self))
    }

    /// The owner address of either claim variant.
    pub fn owner(&self) -> Address {
        match &self.claim {
            WithdrawClaim::Signature { owner } | WithdrawClaim::Vesting { owner, .. } => *owner,
        }
    }
}

/// Provenance of a balance imported from a snapshot of another chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// The address string as it appeared in the snapshot.
    pub original_address: String,
    /// The balance at snapshot time.
    pub original_balance: ShareAmount,
}

/// A balance record. Created on first deposit against its condition;
/// moved to the empty-balance table when it reaches zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    /// The addressing condition.
    pub condition: WithdrawCondition,
    /// Current amount.
    pub balance: ShareAmount,
    /// Last modification time.
    pub last_update: Timestamp,
    /// Set when the balance originated from a genesis snapshot.
    pub snapshot_info: Option<SnapshotRecord>,
}

impl BalanceRecord {
    /// A fresh balance under `condition`.
    pub fn new(condition: WithdrawCondition, balance: ShareAmount, now: Timestamp) -> Self {
        Self { condition, balance, last_update: now, snapshot_info: None }
    }

    /// Content id (the condition's id).
    pub fn id(&self) -> BalanceId {
        self.condition.balance_id()
    }

    /// Asset held.
    pub fn asset_id(&self) -> AssetId {
        self.condition.asset_id
    }

    /// Slate voted for.
    pub fn slate_id(&self) -> SlateId {
        self.condition.slate_id
    }

    /// Owner address.
    pub fn owner(&self) -> Address {
        self.condition.owner()
    }

    /// Amount withdrawable at `now`, honoring vesting.
    pub fn available(&self, now: Timestamp) -> ShareAmount {
        match self.condition.claim {
            WithdrawClaim::Signature { .. } => self.balance,
            WithdrawClaim::Vesting { start_time, duration_secs, original_balance, .. } => {
                let vested = if now <= start_time || duration_secs == 0 {
                    if duration_secs == 0 { original_balance } else { 0 }
                } else {
                    let elapsed = (now - start_time).min(duration_secs);
                    ((original_balance as i128 * elapsed as i128) / duration_secs as i128)
                        as ShareAmount
                };
                let already_withdrawn = original_balance - self.balance;
                (vested - already_withdrawn).clamp(0, self.balance)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash160;

    fn owner() -> Address {
        Address(Hash160([7u8; 20]))
    }

    #[test]
    fn balance_id_is_condition_addressed() {
        let a = WithdrawCondition::signature(owner(), 0, 0);
        let b = WithdrawCondition::signature(owner(), 0, 1);
        assert_ne!(a.balance_id(), b.balance_id());
        assert_eq!(a.balance_id(), WithdrawCondition::signature(owner(), 0, 0).balance_id());
    }

    #[test]
    fn vesting_schedule() {
        let condition = WithdrawCondition {
            asset_id: 0,
            slate_id: 0,
            claim: WithdrawClaim::Vesting {
                owner: owner(),
                start_time: 100,
                duration_secs: 100,
                original_balance: 1_000,
            },
        };
        let record = BalanceRecord::new(condition, 1_000, 100);

        assert_eq!(record.available(100), 0);
        assert_eq!(record.available(150), 500);
        assert_eq!(record.available(200), 1_000);
        assert_eq!(record.available(10_000), 1_000);
    }

    #[test]
    fn vesting_accounts_for_prior_withdrawals() {
        let condition = WithdrawCondition {
            asset_id: 0,
            slate_id: 0,
            claim: WithdrawClaim::Vesting {
                owner: owner(),
                start_time: 0,
                duration_secs: 100,
                original_balance: 1_000,
            },
        };
        // 400 already withdrawn.
        let record = BalanceRecord::new(condition, 600, 0);
        // 50% vested = 500; 400 taken already.
        assert_eq!(record.available(50), 100);
    }
}
