//! User transactions and their on-chain records.

use serde::{Deserialize, Serialize};

use crate::balance::WithdrawCondition;
use crate::crypto::{
    hash160, recover, sha256, sign_digest, Address, CryptoError, Hash256, Signature,
};
use crate::encode::packed;
use crate::{AccountId, BalanceId, ShareAmount, Timestamp, TransactionId};

/// A single state transition inside a transaction.
///
/// The engine treats transaction evaluation as a collaborator; this is the
/// minimal operation set the standard evaluator understands. The withdraw /
/// deposit pair is the primitive every balance movement reduces to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Debit an existing balance. Requires a signature by the balance owner.
    Withdraw {
        /// Balance to debit.
        balance_id: BalanceId,
        /// Amount to remove.
        amount: ShareAmount,
    },
    /// Credit the balance addressed by `condition`, creating it on first
    /// touch.
    Deposit {
        /// Withdraw condition of the target balance.
        condition: WithdrawCondition,
        /// Amount to add.
        amount: ShareAmount,
    },
    /// Register a delegate slate so balances can vote for it by id.
    DefineSlate {
        /// Delegates voted for, in ascending id order.
        delegates: Vec<AccountId>,
    },
}

/// A signed user transaction.
///
/// The id covers the signatures; the signing digest does not, and is salted
/// with the chain id so transactions cannot be replayed across chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Latest time at which this transaction may be included in a block.
    pub expiration: Timestamp,
    /// Operations applied in order.
    pub operations: Vec<Operation>,
    /// Recoverable signatures over [`Self::digest`].
    pub signatures: Vec<Signature>,
}

impl SignedTransaction {
    /// Content id of the signed transaction.
    pub fn id(&self) -> TransactionId {
        hash160(&packed(self))
    }

    /// The digest signatures commit to: the unsigned body plus the chain id.
    pub fn digest(&self, chain_id: Hash256) -> Hash256 {
        let unsigned = Self {
            expiration: self.expiration,
            operations: self.operations.clone(),
            signatures: Vec::new(),
        };
        let mut bytes = packed(&unsigned);
        bytes.extend_from_slice(chain_id.as_ref());
        sha256(&bytes)
    }

    /// Append a signature by `secret`.
    pub fn sign(&mut self, secret: &secp256k1::SecretKey, chain_id: Hash256) {
        let digest = self.digest(chain_id);
        self.signatures.push(sign_digest(secret, digest));
    }

    /// Recover the addresses of all signers.
    pub fn recover_signers(&self, chain_id: Hash256) -> Result<Vec<Address>, CryptoError> {
        let digest = self.digest(chain_id);
        self.signatures
            .iter()
            .map(|signature| recover(digest, signature).map(|key| key.address()))
            .collect()
    }

    /// Packed size in bytes.
    pub fn data_size(&self) -> usize {
        packed(self).len()
    }
}

/// Position of a confirmed transaction within the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLocation {
    /// Number of the containing block.
    pub block_num: u64,
    /// Index within the block's transaction list.
    pub trx_index: u32,
}

/// A confirmed transaction with its location and the fees it paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// The transaction as included in the block.
    pub trx: SignedTransaction,
    /// Where it was included.
    pub location: TransactionLocation,
    /// Base-asset fees collected from it.
    pub fees: ShareAmount,
}
