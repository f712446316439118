//! Block headers, full blocks and the derived block record.

use serde::{Deserialize, Serialize};

use crate::crypto::{
    hash160, recover, sha256, sign_digest, CryptoError, Hash160, Hash256, PublicKey, Signature,
};
use crate::encode::packed;
use crate::transaction::SignedTransaction;
use crate::{BlockId, ShareAmount, Timestamp, TransactionId};

/// A signed block header.
///
/// The block id is the content hash of the header with the signature field
/// zeroed, so the id is fixed before signing and the signature can be
/// verified against it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlockHeader {
    /// Id of the parent block; zero for the first block after genesis.
    pub previous: BlockId,
    /// Height of this block; the first produced block has number 1.
    pub block_num: u64,
    /// Production time; always a multiple of the block interval.
    pub timestamp: Timestamp,
    /// Hash of the packed transaction list.
    pub transaction_digest: Hash256,
    /// Reveal of the secret whose hash the producer committed to last round.
    pub previous_secret: Hash160,
    /// Commitment to the secret the producer will reveal next round.
    pub next_secret_hash: Hash160,
    /// Recoverable signature by the slot delegate over [`Self::digest`].
    pub signature: Signature,
}

impl SignedBlockHeader {
    /// Content id: hash of the packed header with an empty signature.
    pub fn id(&self) -> BlockId {
        hash160(&packed(&self.unsigned()))
    }

    /// The digest the producer signs.
    pub fn digest(&self) -> Hash256 {
        sha256(&packed(&self.unsigned()))
    }

    /// Sign the header in place with the producing delegate's key.
    pub fn sign(&mut self, secret: &secp256k1::SecretKey) {
        self.signature = sign_digest(secret, self.digest());
    }

    /// Recover the public key that signed the header.
    pub fn signee(&self) -> Result<PublicKey, CryptoError> {
        recover(self.digest(), &self.signature)
    }

    fn unsigned(&self) -> Self {
        Self { signature: Signature::default(), ..self.clone() }
    }
}

/// A complete block: signed header plus the user transactions it includes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullBlock {
    /// The signed header.
    pub header: SignedBlockHeader,
    /// Included transactions, in application order.
    pub user_transactions: Vec<SignedTransaction>,
}

impl FullBlock {
    /// Content id of the block (the header id).
    pub fn id(&self) -> BlockId {
        self.header.id()
    }

    /// Block height.
    pub fn block_num(&self) -> u64 {
        self.header.block_num
    }

    /// Hash of the packed transaction list.
    pub fn compute_transaction_digest(&self) -> Hash256 {
        sha256(&packed(&self.user_transactions))
    }

    /// True if the header's transaction digest matches the transaction list.
    pub fn validate_digest(&self) -> bool {
        self.header.transaction_digest == self.compute_transaction_digest()
    }

    /// True if no transaction id occurs twice.
    pub fn validate_unique(&self) -> bool {
        let mut seen = std::collections::BTreeSet::new();
        self.user_transactions.iter().all(|trx| seen.insert(trx.id()))
    }

    /// Packed size of the whole block in bytes.
    pub fn block_size(&self) -> usize {
        packed(self).len()
    }
}

/// Persisted per-block statistics, derived at store time and filled in as
/// the block is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// The block header this record describes.
    pub header: SignedBlockHeader,
    /// Ids of the included transactions.
    pub user_transaction_ids: Vec<TransactionId>,
    /// Packed size in bytes.
    pub block_size: u64,
    /// Seconds between the block timestamp and its local arrival.
    pub latency: u64,
    /// Wall-clock microseconds spent applying the block.
    pub processing_time_us: u64,
    /// Random seed after this block was applied.
    pub random_seed: Hash160,
    /// New shares issued to the producing delegate.
    pub signee_shares_issued: ShareAmount,
    /// Fee-pool shares credited to the producing delegate.
    pub signee_fees_collected: ShareAmount,
    /// Fee-pool shares destroyed by the pay computation.
    pub signee_fees_destroyed: ShareAmount,
}

impl BlockRecord {
    /// Build the initial record for a freshly stored block.
    pub fn new(block: &FullBlock, latency: u64) -> Self {
        Self {
            header: block.header.clone(),
            user_transaction_ids: block.user_transactions.iter().map(|t| t.id()).collect(),
            block_size: block.block_size() as u64,
            latency,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::rand::rngs::OsRng;
    use secp256k1::SECP256K1;

    fn sample_header() -> SignedBlockHeader {
        SignedBlockHeader {
            previous: BlockId::default(),
            block_num: 1,
            timestamp: 1_000,
            transaction_digest: sha256(&packed(&Vec::<SignedTransaction>::new())),
            previous_secret: Hash160::default(),
            next_secret_hash: hash160(b"secret-1"),
            signature: Signature::default(),
        }
    }

    #[test]
    fn id_is_signature_independent() {
        let mut header = sample_header();
        let before = header.id();
        let (secret, _) = SECP256K1.generate_keypair(&mut OsRng);
        header.sign(&secret);
        assert_eq!(header.id(), before);
        assert_eq!(header.signee().unwrap(), crate::crypto::public_key_of(&secret));
    }

    #[test]
    fn digest_validation_catches_tampering() {
        let mut block = FullBlock { header: sample_header(), user_transactions: vec![] };
        assert!(block.validate_digest());
        block.user_transactions.push(SignedTransaction { expiration: 5, ..Default::default() });
        assert!(!block.validate_digest());
    }

    #[test]
    fn duplicate_transactions_fail_uniqueness() {
        let trx = SignedTransaction { expiration: 7, ..Default::default() };
        let block = FullBlock {
            header: sample_header(),
            user_transactions: vec![trx.clone(), trx],
        };
        assert!(!block.validate_unique());
    }
}
