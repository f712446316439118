//! Concurrent access wrapper and observer fan-out.
//!
//! [`ChainDatabase`] is single-writer; this wrapper provides the writer
//! guard that stands in for the original non-preemptable scope: from the
//! start of a push through commit, no reader can observe half-applied
//! state. Observer notifications collected during application are
//! broadcast strictly after the guard is released, in commit order.

use meridian_primitives::{FullBlock, SignedTransaction};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::database::ChainDatabase;
use crate::error::ChainResult;
use crate::evaluation::TransactionEvalState;
use crate::fork::BlockForkData;
use crate::state::ChainDelta;

/// What a block applied to committed state.
#[derive(Debug, Clone)]
pub struct BlockSummary {
    /// The applied block.
    pub block: FullBlock,
    /// Every state write the block committed.
    pub applied_changes: Arc<ChainDelta>,
}

/// Events observers subscribe to.
#[derive(Debug, Clone)]
pub enum ChainNotification {
    /// A block was committed; delivered in commit order.
    BlockApplied(Arc<BlockSummary>),
    /// A block was undone; carries the applied undo delta, delivered in
    /// reverse-commit order.
    StateChanged(Arc<ChainDelta>),
}

/// Receiving half of the observer channel.
pub type ChainNotifications = broadcast::Receiver<ChainNotification>;

/// A [`ChainDatabase`] shareable across threads.
#[derive(Debug)]
pub struct ShareableChainDatabase {
    database: RwLock<ChainDatabase>,
    notification_sender: broadcast::Sender<ChainNotification>,
}

impl ShareableChainDatabase {
    /// Wrap a database for shared use.
    pub fn new(database: ChainDatabase) -> Self {
        let (notification_sender, _) = broadcast::channel(256);
        Self { database: RwLock::new(database), notification_sender }
    }

    /// Subscribe to block-applied / state-changed notifications.
    pub fn subscribe(&self) -> ChainNotifications {
        self.notification_sender.subscribe()
    }

    /// Read access to the last committed state. Readers never observe a
    /// half-applied block.
    pub fn read(&self) -> RwLockReadGuard<'_, ChainDatabase> {
        self.database.read()
    }

    /// Push a block under the writer guard, then fan out notifications.
    pub fn push_block(&self, block: FullBlock) -> ChainResult<BlockForkData> {
        let (result, notifications) = {
            let mut database = self.database.write();
            let result = database.push_block(block);
            (result, database.take_notifications())
        };
        self.fan_out(notifications);
        self.run_scheduled_revalidation();
        result
    }

    /// Undo the head block under the writer guard.
    pub fn pop_block(&self) -> ChainResult<()> {
        let (result, notifications) = {
            let mut database = self.database.write();
            let result = database.pop_block();
            (result, database.take_notifications())
        };
        self.fan_out(notifications);
        result
    }

    /// Admit a transaction to the mempool, running any scheduled
    /// revalidation first.
    pub fn store_pending_transaction(
        &self,
        trx: SignedTransaction,
        override_limits: bool,
    ) -> ChainResult<Option<TransactionEvalState>> {
        self.run_scheduled_revalidation();
        self.database.write().store_pending_transaction(trx, override_limits)
    }

    /// Run mempool revalidation if a committed block scheduled one. This
    /// is the deferred task the pipeline enqueues; it always executes
    /// outside the push writer scope.
    pub fn run_scheduled_revalidation(&self) {
        let mut database = self.database.write();
        if database.revalidation_scheduled() {
            if let Err(error) = database.revalidate_pending() {
                warn!(target: "chain::mempool", %error, "scheduled revalidation failed");
            }
        }
    }

    fn fan_out(&self, notifications: Vec<ChainNotification>) {
        for notification in notifications {
            // Send fails only when nobody is subscribed.
            let _ = self.notification_sender.send(notification);
        }
    }
}
