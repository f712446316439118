//! Transaction evaluation.
//!
//! Evaluation rules for rich operation types live outside the engine; the
//! [`TransactionEvaluator`] trait is the seam, and [`StandardEvaluator`]
//! implements the minimal withdraw / deposit / define-slate set every
//! balance movement reduces to. All writes go through the pending overlay,
//! so a failed evaluation leaves no trace.

use meridian_primitives::{
    Address, AssetId, BalanceRecord, ShareAmount, SignedTransaction, SlateRecord, Operation,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use crate::error::{ChainError, ChainResult, EvaluationError};
use crate::state::{ChainState, PendingState};

/// The outcome of a successful evaluation.
#[derive(Debug, Clone)]
pub struct TransactionEvalState {
    /// The evaluated transaction.
    pub trx: SignedTransaction,
    /// Net base-asset fee the transaction pays.
    pub fees: ShareAmount,
    /// Fees paid in alternative assets, valued in base units. The standard
    /// evaluator does not value them and reports zero.
    pub alt_fees_paid: ShareAmount,
}

impl TransactionEvalState {
    /// Total fee value counted toward relay requirements.
    pub fn total_fees(&self) -> ShareAmount {
        self.fees + self.alt_fees_paid
    }
}

/// Applies a transaction's operations to a pending overlay.
pub trait TransactionEvaluator: Send + Sync + std::fmt::Debug {
    /// Evaluate `trx` against `state`, writing every effect through the
    /// overlay. `skip_signatures` elides signature recovery during
    /// checkpointed replay.
    fn evaluate(
        &self,
        trx: &SignedTransaction,
        state: &mut PendingState<'_>,
        skip_signatures: bool,
    ) -> ChainResult<TransactionEvalState>;
}

/// The built-in evaluator for the standard operation set.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardEvaluator;

impl StandardEvaluator {
    fn adjust_votes(
        state: &mut PendingState<'_>,
        slate_id: u64,
        delta: ShareAmount,
    ) -> ChainResult<()> {
        if slate_id == 0 {
            return Ok(());
        }
        let slate = match state.get_slate(slate_id)? {
            Some(slate) => slate,
            // A withdraw from a balance voting for a never-defined slate
            // cannot happen (deposits check), but stay permissive on the
            // way out.
            None => return Ok(()),
        };
        for delegate_id in &slate.delegates {
            if let Some(mut account) = state.get_account(*delegate_id)? {
                if let Some(info) = &mut account.delegate_info {
                    info.votes_for += delta;
                    state.store_account(account);
                }
            }
        }
        Ok(())
    }
}

impl TransactionEvaluator for StandardEvaluator {
    fn evaluate(
        &self,
        trx: &SignedTransaction,
        state: &mut PendingState<'_>,
        skip_signatures: bool,
    ) -> ChainResult<TransactionEvalState> {
        let id = trx.id();
        let semantic = |source: EvaluationError| ChainError::Evaluation { id, source };
        let now = state.now();

        if trx.expiration <= now {
            return Err(semantic(EvaluationError::Expired {
                expiration: trx.expiration,
                now,
            }));
        }
        if state.is_known_transaction(trx)? {
            return Err(semantic(EvaluationError::Duplicate));
        }

        let signers: BTreeSet<Address> = if skip_signatures {
            BTreeSet::new()
        } else {
            trx.recover_signers(state.chain_id())
                .map_err(|_| semantic(EvaluationError::BadSignature))?
                .into_iter()
                .collect()
        };

        let mut withdrawn: BTreeMap<AssetId, ShareAmount> = BTreeMap::new();
        let mut deposited: BTreeMap<AssetId, ShareAmount> = BTreeMap::new();

        for operation in &trx.operations {
            match operation {
                Operation::Withdraw { balance_id, amount } => {
                    if *amount <= 0 {
                        return Err(semantic(EvaluationError::NonPositiveAmount));
                    }
                    let mut balance = state
                        .get_balance(balance_id)?
                        .ok_or_else(|| semantic(EvaluationError::UnknownBalance(*balance_id)))?;
                    let available = balance.available(now);
                    if *amount > available {
                        return Err(semantic(EvaluationError::InsufficientFunds {
                            available,
                            requested: *amount,
                        }));
                    }
                    if !skip_signatures && !signers.contains(&balance.owner()) {
                        return Err(semantic(EvaluationError::MissingSignature(
                            balance.owner(),
                        )));
                    }
                    balance.balance -= amount;
                    balance.last_update = now;
                    if balance.asset_id() == 0 {
                        Self::adjust_votes(state, balance.slate_id(), -amount)?;
                    }
                    *withdrawn.entry(balance.asset_id()).or_default() += amount;
                    state.store_balance(balance);
                }
                Operation::Deposit { condition, amount } => {
                    if *amount <= 0 {
                        return Err(semantic(EvaluationError::NonPositiveAmount));
                    }
                    if state.get_asset(condition.asset_id)?.is_none() {
                        return Err(semantic(EvaluationError::UnknownAsset(
                            condition.asset_id,
                        )));
                    }
                    if condition.slate_id != 0 && state.get_slate(condition.slate_id)?.is_none() {
                        return Err(semantic(EvaluationError::UnknownSlate(condition.slate_id)));
                    }
                    let balance_id = condition.balance_id();
                    let mut balance = state
                        .get_balance(&balance_id)?
                        .unwrap_or_else(|| BalanceRecord::new(condition.clone(), 0, now));
                    balance.balance += amount;
                    balance.last_update = now;
                    if balance.asset_id() == 0 {
                        Self::adjust_votes(state, balance.slate_id(), *amount)?;
                    }
                    *deposited.entry(balance.asset_id()).or_default() += amount;
                    state.store_balance(balance);
                }
                Operation::DefineSlate { delegates } => {
                    let slate = SlateRecord::new(delegates.clone());
                    if state.get_slate(slate.id)?.is_none() {
                        state.store_slate(slate);
                    }
                }
            }
        }

        // Whatever was withdrawn and not re-deposited is the fee, per asset.
        let mut base_fee: ShareAmount = 0;
        let touched: BTreeSet<AssetId> =
            withdrawn.keys().chain(deposited.keys()).copied().collect();
        for asset_id in touched {
            let net = withdrawn.get(&asset_id).copied().unwrap_or(0)
                - deposited.get(&asset_id).copied().unwrap_or(0);
            if net < 0 {
                return Err(semantic(EvaluationError::NegativeFee { asset_id, deficit: -net }));
            }
            if net > 0 {
                let mut asset = state
                    .get_asset(asset_id)?
                    .ok_or_else(|| semantic(EvaluationError::UnknownAsset(asset_id)))?;
                asset.collected_fees += net;
                state.store_asset(asset);
                if asset_id == 0 {
                    base_fee = net;
                }
            }
        }

        trace!(target: "chain::evaluation", trx = %id, fees = base_fee, "transaction evaluated");
        Ok(TransactionEvalState { trx: trx.clone(), fees: base_fee, alt_fees_paid: 0 })
    }
}
