//! Error handling for the chain state engine.
//!
//! Structural failures carry the tagged reason that gets attached to fork
//! nodes; semantic failures from transaction evaluation are wrapped as
//! opaque carriers with the offending transaction id.

use meridian_db::DbError;
use meridian_primitives::{
    Address, BalanceId, BlockId, CryptoError, EncodeError, ShareAmount, SlateId, Timestamp,
    TransactionId,
};

/// Result alias used across the engine.
pub type ChainResult<T> = Result<T, ChainError>;

/// Any failure raised by the chain state engine.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    // ── structural ────────────────────────────────────────────────────

    /// The block number does not follow the head block.
    #[error("block number {block_num} does not follow head #{head_num}")]
    BlockNumbersNotSequential {
        /// Number of the offered block.
        block_num: u64,
        /// Current head number.
        head_num: u64,
    },
    /// The block's previous id is not the current head id.
    #[error("previous id {got} does not match head {expected}")]
    InvalidPreviousBlockId {
        /// The head id the block had to reference.
        expected: BlockId,
        /// The id it referenced.
        got: BlockId,
    },
    /// The timestamp is not aligned to the block interval.
    #[error("block time {timestamp} is not a multiple of the block interval")]
    InvalidBlockTime {
        /// Offending timestamp.
        timestamp: Timestamp,
    },
    /// The timestamp does not advance past the head block.
    #[error("block time {timestamp} is not after head time {head_timestamp}")]
    TimeInPast {
        /// Offending timestamp.
        timestamp: Timestamp,
        /// Head timestamp.
        head_timestamp: Timestamp,
    },
    /// The timestamp is too far ahead of local time. Non-terminal: such
    /// blocks are queued for revalidation instead of being marked invalid.
    #[error("block time {timestamp} is more than two intervals past local time {now}")]
    TimeInFuture {
        /// Offending timestamp.
        timestamp: Timestamp,
        /// Local wall-clock time at validation.
        now: Timestamp,
    },
    /// The header's transaction digest does not match the transaction list.
    #[error("block transaction digest does not match its transactions")]
    InvalidBlockDigest,
    /// A transaction id occurs more than once in the block.
    #[error("block contains a duplicate transaction")]
    DuplicateTransactionInBlock,
    /// The block was signed by a key other than the scheduled delegate's.
    #[error("block signee is not the delegate scheduled for the slot (expected account {expected})")]
    InvalidDelegateSignee {
        /// The delegate whose slot the timestamp maps to.
        expected: u64,
    },
    /// The producer's revealed secret does not hash to its prior commitment.
    #[error("producer secret does not match the delegate's committed hash")]
    InvalidProducerSecret,
    /// The block number matches a checkpoint but the id does not.
    #[error("block #{block_num} does not match checkpoint id {expected}")]
    FailedCheckpointVerification {
        /// Checkpointed block number.
        block_num: u64,
        /// The required id.
        expected: BlockId,
        /// The offered id.
        got: BlockId,
    },
    /// The block forks off before the undo horizon; switching is impossible.
    #[error(
        "block #{block_num} is older than the undo history \
         (head #{head_num}, history {undo_history})"
    )]
    BlockOlderThanUndoHistory {
        /// Number of the offered block.
        block_num: u64,
        /// Current head number.
        head_num: u64,
        /// Configured undo depth.
        undo_history: u64,
    },

    // ── operational ───────────────────────────────────────────────────

    /// No block with the given id (or number) is stored.
    #[error("unknown block {0}")]
    UnknownBlock(BlockId),
    /// No block at the given number is on the main chain.
    #[error("no block at number {0}")]
    UnknownBlockNumber(u64),
    /// No transaction with the given id is stored.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),
    /// The transaction does not pay the required relay fee.
    #[error("transaction fees {fees} are below the required relay fee {required}")]
    InsufficientRelayFee {
        /// Fees the transaction pays.
        fees: ShareAmount,
        /// Required relay fee at admission time.
        required: ShareAmount,
    },
    /// The on-disk database was written by a newer version of this code.
    #[error("database version {on_disk} is newer than supported version {supported}")]
    NewDatabaseVersion {
        /// Version found on disk.
        on_disk: u64,
        /// Version this build writes.
        supported: u64,
    },
    /// The genesis document is unusable.
    #[error("invalid genesis document: {0}")]
    InvalidGenesis(String),
    /// A snapshot balance address could not be decoded with any known prefix.
    #[error("invalid legacy address {0:?}")]
    InvalidLegacyAddress(String),
    /// An undo entry that must exist is missing.
    #[error("missing undo state for block {0}")]
    MissingUndoState(BlockId),
    /// A database invariant does not hold.
    #[error("chain state inconsistency: {0}")]
    Inconsistent(&'static str),

    // ── semantic ──────────────────────────────────────────────────────

    /// Transaction evaluation rejected a transaction.
    #[error("transaction {id} failed evaluation: {source}")]
    Evaluation {
        /// The rejected transaction.
        id: TransactionId,
        /// The evaluator's reason.
        #[source]
        source: EvaluationError,
    },

    // ── passthrough ───────────────────────────────────────────────────

    /// Storage-layer failure.
    #[error(transparent)]
    Db(#[from] DbError),
    /// Signature recovery or address parsing failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Packed decoding failure.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl ChainError {
    /// True for [`ChainError::TimeInFuture`], the only failure the reorg
    /// controller treats as non-terminal.
    pub const fn is_time_in_future(&self) -> bool {
        matches!(self, Self::TimeInFuture { .. })
    }
}

/// Reasons the standard transaction evaluator rejects a transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    /// The transaction's expiration is not in the future.
    #[error("transaction expired at {expiration} (chain time {now})")]
    Expired {
        /// Transaction expiration.
        expiration: Timestamp,
        /// Chain time at evaluation.
        now: Timestamp,
    },
    /// The transaction fingerprint was already included.
    #[error("duplicate transaction")]
    Duplicate,
    /// A withdraw names a balance that does not exist.
    #[error("unknown balance {0}")]
    UnknownBalance(BalanceId),
    /// A deposit names a slate that was never defined.
    #[error("unknown slate {0}")]
    UnknownSlate(SlateId),
    /// An operation names an asset that was never registered.
    #[error("unknown asset {0}")]
    UnknownAsset(u64),
    /// No signature by the balance owner was provided.
    #[error("missing signature of {0}")]
    MissingSignature(Address),
    /// A withdraw exceeds the withdrawable balance.
    #[error("insufficient funds: {available} available, {requested} requested")]
    InsufficientFunds {
        /// Withdrawable amount at evaluation time.
        available: ShareAmount,
        /// Requested amount.
        requested: ShareAmount,
    },
    /// An operation amount was zero or negative.
    #[error("operation amount must be positive")]
    NonPositiveAmount,
    /// Deposits exceed withdrawals in some asset.
    #[error("deposits exceed withdrawals by {deficit} of asset {asset_id}")]
    NegativeFee {
        /// The overdrawn asset.
        asset_id: u64,
        /// Amount by which deposits exceed withdrawals.
        deficit: ShareAmount,
    },
    /// A signature in the transaction could not be recovered.
    #[error("unrecoverable signature")]
    BadSignature,
}
