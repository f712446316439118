//! Account records and delegate statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::{Address, Hash160, PublicKey};
use crate::{AccountId, ShareAmount, Timestamp};

/// Per-delegate production and pay bookkeeping. Present only on accounts
/// registered as delegates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateStats {
    /// Net votes currently delegated to this account.
    pub votes_for: ShareAmount,
    /// Blocks this delegate has produced.
    pub blocks_produced: u64,
    /// Slots this delegate was scheduled for but missed.
    pub blocks_missed: u64,
    /// Number of the last block this delegate produced.
    pub last_block_num_produced: u64,
    /// Percentage (0..=100) of the maximum pay the delegate accepts.
    pub pay_rate: u8,
    /// Accrued, unwithdrawn pay.
    pub pay_balance: ShareAmount,
    /// Lifetime pay credited.
    pub total_paid: ShareAmount,
    /// Commitment to the secret the delegate will reveal with its next
    /// block; absent until the first block is produced.
    pub next_secret_hash: Option<Hash160>,
}

/// An account. Accounts are created by the genesis document or by
/// registration operations; delegates additionally carry [`DelegateStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Sequential id; 0 is the reserved genesis sentinel.
    pub id: AccountId,
    /// Unique registered name.
    pub name: String,
    /// Permanent owner key.
    pub owner_key: PublicKey,
    /// History of active keys by activation time; the latest entry is the
    /// current active key. Empty means the owner key is active.
    pub active_key_history: BTreeMap<Timestamp, PublicKey>,
    /// Registration time.
    pub registration_date: Timestamp,
    /// Last modification time.
    pub last_update: Timestamp,
    /// Delegate bookkeeping, when this account is a delegate.
    pub delegate_info: Option<DelegateStats>,
    /// Set when the account has been retracted; retracted delegates are
    /// excluded from the vote index.
    pub retracted: bool,
}

impl AccountRecord {
    /// True if the account is a registered delegate.
    pub fn is_delegate(&self) -> bool {
        self.delegate_info.is_some()
    }

    /// True if the account has been retracted.
    pub fn is_retracted(&self) -> bool {
        self.retracted
    }

    /// The currently active key.
    pub fn active_key(&self) -> PublicKey {
        self.active_key_history
            .last_key_value()
            .map(|(_, key)| *key)
            .unwrap_or(self.owner_key)
    }

    /// Address of the currently active key; blocks are signed with it.
    pub fn active_address(&self) -> Address {
        self.active_key().address()
    }

    /// Record a new active key effective at `time`.
    pub fn set_active_key(&mut self, time: Timestamp, key: PublicKey) {
        self.active_key_history.insert(time, key);
    }

    /// Net votes for delegate ranking; zero for non-delegates.
    pub fn net_votes(&self) -> ShareAmount {
        self.delegate_info.as_ref().map(|info| info.votes_for).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_key_falls_back_to_owner() {
        let mut account = AccountRecord {
            owner_key: PublicKey([3u8; 33]),
            ..Default::default()
        };
        assert_eq!(account.active_key(), PublicKey([3u8; 33]));

        account.set_active_key(10, PublicKey([4u8; 33]));
        account.set_active_key(20, PublicKey([5u8; 33]));
        assert_eq!(account.active_key(), PublicKey([5u8; 33]));
    }

    #[test]
    fn net_votes_requires_delegate_info() {
        let mut account = AccountRecord::default();
        assert_eq!(account.net_votes(), 0);
        account.delegate_info = Some(DelegateStats { votes_for: 77, ..Default::default() });
        assert_eq!(account.net_votes(), 77);
    }
}
