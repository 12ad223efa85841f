//! # Transactions
//!
//! A [`TransactionScope`] ties one held receive to one transaction:
//!
//! ```text
//! begin ──→ receive_held ──→ consumer ──┬─ ok ──→ tm.commit ──┬─ ok ──→ settle(Commit)
//!                                       │                     └─ err ─→ settle(Rollback)
//!                                       └─ err / drop ──→ settle(Rollback) + tm.rollback
//! ```
//!
//! Every exit other than a successful commit puts the held envelope back on
//! its channel.

use crate::error::TransactionError;
use courier_bus::{ChannelError, Disposition, HeldEnvelope, MessageChannel, PollableChannel};
use courier_types::Envelope;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(u64);

impl TxHandle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Resource transaction boundary used by transactional pollers.
pub trait TransactionManager: Send + Sync {
    fn begin(&self) -> Result<TxHandle, TransactionError>;

    fn commit(&self, tx: TxHandle) -> Result<(), TransactionError>;

    fn rollback(&self, tx: TxHandle) -> Result<(), TransactionError>;
}

/// Transaction manager with no underlying resource.
///
/// Still drives commit/rollback of held envelopes, and tracks which
/// transactions are active.
#[derive(Debug, Default)]
pub struct PseudoTransactionManager {
    next: AtomicU64,
    active: Mutex<HashSet<TxHandle>>,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl PseudoTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.active.lock().len()
    }

    fn finish(&self, tx: TxHandle) -> Result<(), TransactionError> {
        if self.active.lock().remove(&tx) {
            Ok(())
        } else {
            Err(TransactionError::NotActive(tx))
        }
    }
}

impl TransactionManager for PseudoTransactionManager {
    fn begin(&self) -> Result<TxHandle, TransactionError> {
        let tx = TxHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.active.lock().insert(tx);
        Ok(tx)
    }

    fn commit(&self, tx: TxHandle) -> Result<(), TransactionError> {
        self.finish(tx)?;
        self.committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rollback(&self, tx: TxHandle) -> Result<(), TransactionError> {
        self.finish(tx)?;
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Why a commit did not complete.
#[derive(Debug, Clone)]
pub struct CommitFailure {
    pub error: TransactionError,
    /// True when the held envelope went back on the channel.
    pub restored: bool,
}

/// Scoped transaction around one held receive.
///
/// Dropping the scope without calling [`commit`](Self::commit) rolls back.
pub struct TransactionScope {
    channel: Arc<dyn PollableChannel>,
    manager: Arc<dyn TransactionManager>,
    tx: TxHandle,
    held: Option<HeldEnvelope>,
    finished: bool,
}

impl TransactionScope {
    pub fn begin(
        channel: Arc<dyn PollableChannel>,
        manager: Arc<dyn TransactionManager>,
    ) -> Result<Self, TransactionError> {
        let tx = manager.begin()?;
        debug!(channel = channel.name(), tx = %tx, "Transaction started");
        Ok(Self {
            channel,
            manager,
            tx,
            held: None,
            finished: false,
        })
    }

    #[must_use]
    pub fn tx(&self) -> TxHandle {
        self.tx
    }

    /// Receives and holds the next envelope for this transaction.
    pub async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Envelope>, ChannelError> {
        if let Some(held) = &self.held {
            return Ok(Some(held.envelope().clone()));
        }
        let held = self.channel.receive_held(timeout).await?;
        let envelope = held.as_ref().map(|h| h.envelope().clone());
        self.held = held;
        Ok(envelope)
    }

    /// Commits the transaction, then releases the held envelope.
    ///
    /// If the transaction manager refuses the commit the envelope is restored.
    pub fn commit(mut self) -> Result<(), CommitFailure> {
        self.finished = true;
        if let Err(error) = self.manager.commit(self.tx) {
            warn!(channel = self.channel.name(), tx = %self.tx, error = %error, "Commit failed, restoring message");
            let restored = self.restore();
            return Err(CommitFailure { error, restored });
        }

        if let Some(held) = self.held.take() {
            if let Err(e) = self.channel.settle(held, Disposition::Commit) {
                // Already committed on the resource side; nothing to undo.
                warn!(channel = self.channel.name(), tx = %self.tx, error = %e, "Failed to release held message");
            }
        }
        debug!(channel = self.channel.name(), tx = %self.tx, "Transaction committed");
        Ok(())
    }

    /// Restores the held envelope and rolls back. Returns whether an envelope
    /// was restored.
    pub fn rollback(mut self) -> bool {
        self.finished = true;
        self.rollback_inner()
    }

    fn rollback_inner(&mut self) -> bool {
        let restored = self.restore();
        if let Err(e) = self.manager.rollback(self.tx) {
            warn!(channel = self.channel.name(), tx = %self.tx, error = %e, "Rollback failed");
        }
        debug!(channel = self.channel.name(), tx = %self.tx, restored, "Transaction rolled back");
        restored
    }

    fn restore(&mut self) -> bool {
        let Some(held) = self.held.take() else {
            return false;
        };
        let id = held.envelope().id();
        match self.channel.settle(held, Disposition::Rollback) {
            Ok(()) => true,
            Err(e) => {
                warn!(channel = self.channel.name(), message_id = %id, error = %e, "Held message could not be restored");
                false
            }
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback_inner();
        }
    }
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("channel", &self.channel.name())
            .field("tx", &self.tx)
            .field("held", &self.held.as_ref().map(|h| h.envelope().id()))
            .finish()
    }
}
