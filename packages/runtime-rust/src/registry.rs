//! Per-worker transaction slots.
//!
//! The [`TransactionRegistry`] holds one slot per execution worker. A worker
//! reaches its slot only through its [`WorkerContext`], which is passed by
//! `&mut` down the call chain, so a slot is never touched by two threads at
//! once. The registry map itself is shared and tolerates concurrent access
//! from independent workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use relay_core::{same_transaction, IllegalTransactionState, TxHandle};

// ---------------------------------------------------------------------------
// WorkerId / SlotStats
// ---------------------------------------------------------------------------

/// Identifier of an execution worker within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Successful slot operations since the slot was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub binds: u64,
    pub unbinds: u64,
    pub suspends: u64,
    pub resumes: u64,
}

#[derive(Debug, Default)]
struct Slot {
    current: Option<TxHandle>,
    stats: SlotStats,
}

// ---------------------------------------------------------------------------
// TransactionRegistry
// ---------------------------------------------------------------------------

/// Process-wide map from worker to its transaction slot.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    slots: DashMap<WorkerId, Slot>,
    next_worker: AtomicU64,
}

impl TransactionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a worker with an empty slot.
    #[must_use]
    pub fn attach(self: &Arc<Self>) -> WorkerContext {
        let id = WorkerId(self.next_worker.fetch_add(1, Ordering::Relaxed));
        self.slots.insert(id, Slot::default());
        tracing::trace!(worker = %id, "worker attached");
        WorkerContext {
            id,
            registry: Arc::clone(self),
        }
    }

    /// Number of live worker slots.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    /// The transaction bound to `worker`, if any.
    #[must_use]
    pub fn current(&self, worker: WorkerId) -> Option<TxHandle> {
        self.slots.get(&worker).and_then(|slot| slot.current.clone())
    }

    fn slot(
        &self,
        worker: WorkerId,
    ) -> Result<RefMut<'_, WorkerId, Slot>, IllegalTransactionState> {
        self.slots
            .get_mut(&worker)
            .ok_or(IllegalTransactionState::WorkerDetached {
                worker: worker.as_u64(),
            })
    }

    /// Binds `tx` as the worker's current transaction.
    ///
    /// # Errors
    ///
    /// [`IllegalTransactionState::AlreadyBound`] if the slot is occupied,
    /// [`IllegalTransactionState::WorkerDetached`] if the worker is gone.
    pub(crate) fn bind(
        &self,
        worker: WorkerId,
        tx: TxHandle,
    ) -> Result<(), IllegalTransactionState> {
        let mut slot = self.slot(worker)?;
        if let Some(bound) = &slot.current {
            return Err(IllegalTransactionState::AlreadyBound {
                bound: bound.id(),
                attempted: tx.id(),
            });
        }
        tracing::trace!(worker = %worker, tx = %tx.id(), "bind");
        slot.current = Some(tx);
        slot.stats.binds += 1;
        Ok(())
    }

    /// Removes `tx` from the worker's slot.
    ///
    /// # Errors
    ///
    /// [`IllegalTransactionState::NotBound`] unless `tx` is exactly the bound
    /// instance.
    pub(crate) fn unbind(
        &self,
        worker: WorkerId,
        tx: &TxHandle,
    ) -> Result<(), IllegalTransactionState> {
        let mut slot = self.slot(worker)?;
        let is_bound = slot
            .current
            .as_ref()
            .is_some_and(|bound| same_transaction(bound, tx));
        if !is_bound {
            return Err(IllegalTransactionState::NotBound {
                attempted: tx.id(),
                bound: slot.current.as_ref().map(|bound| bound.id()),
            });
        }
        tracing::trace!(worker = %worker, tx = %tx.id(), "unbind");
        slot.current = None;
        slot.stats.unbinds += 1;
        Ok(())
    }

    /// Empties the worker's slot, returning what was bound.
    pub(crate) fn suspend(&self, worker: WorkerId) -> Option<TxHandle> {
        let mut slot = self.slots.get_mut(&worker)?;
        let taken = slot.current.take();
        if let Some(tx) = &taken {
            tracing::trace!(worker = %worker, tx = %tx.id(), "slot suspend");
            slot.stats.suspends += 1;
        }
        taken
    }

    /// Puts a previously suspended transaction back into the worker's slot.
    ///
    /// # Errors
    ///
    /// [`IllegalTransactionState::SlotOccupied`] if the slot is not empty.
    pub(crate) fn resume(
        &self,
        worker: WorkerId,
        tx: TxHandle,
    ) -> Result<(), IllegalTransactionState> {
        let mut slot = self.slot(worker)?;
        if let Some(bound) = &slot.current {
            return Err(IllegalTransactionState::SlotOccupied {
                attempted: tx.id(),
                bound: bound.id(),
            });
        }
        tracing::trace!(worker = %worker, tx = %tx.id(), "slot resume");
        slot.current = Some(tx);
        slot.stats.resumes += 1;
        Ok(())
    }

    /// Empties the worker's slot without counting it as an unbind.
    pub(crate) fn clear(&self, worker: WorkerId) -> Option<TxHandle> {
        self.slots
            .get_mut(&worker)
            .and_then(|mut slot| slot.current.take())
    }

    #[must_use]
    pub fn stats(&self, worker: WorkerId) -> SlotStats {
        self.slots
            .get(&worker)
            .map(|slot| slot.stats)
            .unwrap_or_default()
    }

    fn detach(&self, worker: WorkerId) -> Option<TxHandle> {
        self.slots.remove(&worker).and_then(|(_, slot)| slot.current)
    }
}

// ---------------------------------------------------------------------------
// WorkerContext
// ---------------------------------------------------------------------------

/// Handle to one worker's slot.
///
/// Not `Clone`: exclusive access to the slot follows from exclusive access to
/// this value. Dropping it removes the slot.
#[derive(Debug)]
pub struct WorkerContext {
    id: WorkerId,
    registry: Arc<TransactionRegistry>,
}

impl WorkerContext {
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn current(&self) -> Option<TxHandle> {
        self.registry.current(self.id)
    }

    /// # Errors
    ///
    /// [`IllegalTransactionState::AlreadyBound`] if the slot is occupied.
    pub fn bind(&mut self, tx: TxHandle) -> Result<(), IllegalTransactionState> {
        self.registry.bind(self.id, tx)
    }

    /// # Errors
    ///
    /// [`IllegalTransactionState::NotBound`] unless `tx` is the bound instance.
    pub fn unbind(&mut self, tx: &TxHandle) -> Result<(), IllegalTransactionState> {
        self.registry.unbind(self.id, tx)
    }

    pub fn suspend(&mut self) -> Option<TxHandle> {
        self.registry.suspend(self.id)
    }

    /// # Errors
    ///
    /// [`IllegalTransactionState::SlotOccupied`] if the slot is not empty.
    pub fn resume(&mut self, tx: TxHandle) -> Result<(), IllegalTransactionState> {
        self.registry.resume(self.id, tx)
    }

    pub fn clear(&mut self) -> Option<TxHandle> {
        self.registry.clear(self.id)
    }

    #[must_use]
    pub fn stats(&self) -> SlotStats {
        self.registry.stats(self.id)
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        if let Some(tx) = self.registry.detach(self.id) {
            tracing::warn!(
                worker = %self.id,
                tx = %tx.id(),
                status = %tx.status(),
                "worker dropped with a transaction still bound"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
