//! Error taxonomy of the transactional execution core.
//!
//! - [`IllegalTransactionState`]: policy or registry misuse, raised before
//!   any transaction side effect.
//! - [`TransactionError`]: a transaction lifecycle operation failed.
//! - [`PolicyError`]: a policy could not be turned into a template.
//! - [`ExecutionError`]: what `ExecutionTemplate::execute` returns.

use uuid::Uuid;

use crate::failure::ProcessingFailure;
use crate::kind::KindError;
use crate::policy::TransactionAction;
use crate::transaction::TransactionStatus;

/// The ambient transaction does not fit the policy, or a worker slot was misused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IllegalTransactionState {
    #[error("action {action} requires an ambient transaction but none is bound")]
    TransactionRequired { action: TransactionAction },
    #[error("action {action} forbids an ambient transaction but {bound} is bound")]
    TransactionForbidden {
        action: TransactionAction,
        bound: Uuid,
    },
    #[error("worker slot already holds transaction {bound}; cannot bind {attempted}")]
    AlreadyBound { bound: Uuid, attempted: Uuid },
    #[error("cannot unbind transaction {attempted}: slot holds {bound:?}")]
    NotBound {
        attempted: Uuid,
        bound: Option<Uuid>,
    },
    #[error("cannot resume transaction {attempted}: slot already holds {bound}")]
    SlotOccupied { attempted: Uuid, bound: Uuid },
    #[error("worker {worker} has no slot; it was detached from the registry")]
    WorkerDetached { worker: u64 },
}

/// A begin/commit/rollback/suspend/resume operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction {id} cannot {operation} while {status}")]
    InvalidTransition {
        id: Uuid,
        operation: &'static str,
        status: TransactionStatus,
    },
    #[error("transaction {id} is marked rollback-only and cannot commit")]
    RollbackOnly { id: Uuid },
    #[error("transaction {id} is not XA-capable and cannot be suspended")]
    SuspendNotSupported { id: Uuid },
    #[error("resource `{key}` is already bound to transaction {id}")]
    ResourceAlreadyBound { id: Uuid, key: String },
    #[error("{operation} failed for transaction {id}: {reason}")]
    Resource {
        id: Uuid,
        operation: &'static str,
        reason: String,
    },
    #[error("transaction factory failed: {reason}")]
    Factory { reason: String },
}

/// A policy is inconsistent and cannot back an execution template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("action {action} may begin a transaction but no factory is configured")]
    MissingFactory { action: TransactionAction },
    #[error("external interaction is enabled but no factory is configured")]
    ExternalWithoutFactory,
    #[error("invalid exception filter: {0}")]
    Filter(#[from] KindError),
}

/// Outcome of a failed template execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    IllegalState(#[from] IllegalTransactionState),
    #[error("transaction lifecycle failure: {0}")]
    Lifecycle(#[from] TransactionError),
    #[error(transparent)]
    Processing(#[from] ProcessingFailure),
}

impl ExecutionError {
    /// The normalized processing failure, if this is one.
    #[must_use]
    pub fn failure(&self) -> Option<&ProcessingFailure> {
        match self {
            Self::Processing(failure) => Some(failure),
            _ => None,
        }
    }

    /// Consumes the error, returning the processing failure if this is one.
    #[must_use]
    pub fn into_failure(self) -> Option<ProcessingFailure> {
        match self {
            Self::Processing(failure) => Some(failure),
            _ => None,
        }
    }
}
