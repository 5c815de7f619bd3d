//! Interceptors of the execution pipeline.
//!
//! Each interceptor wraps the next one and receives the callback by value,
//! passing it inward. Layers are composed once per template with
//! `tower::ServiceBuilder` (see [`pipeline`]); composition is static, so a
//! template's chain is one concrete nested type.
//!
//! Every layer is always present. A layer that does not apply to the
//! template's policy or to the ambient state forwards to the next one.

pub mod begin_and_resolve;
pub mod external;
pub mod handle_failure;
pub mod invoke;
pub mod notify;
pub mod pipeline;
pub mod resolve_previous;
pub mod suspend_xa;
pub mod validate;

use std::sync::Arc;

use relay_core::{
    CallbackError, ExecutionError, IllegalTransactionState, MessageEvent, Transaction,
    TransactionError,
};

use crate::metrics;
use crate::registry::WorkerContext;

pub use begin_and_resolve::{BeginAndResolve, BeginAndResolveLayer};
pub use external::{External, ExternalLayer};
pub use handle_failure::{HandleFailure, HandleFailureLayer};
pub use invoke::InvokeCallback;
pub use notify::{Notify, NotifyLayer};
pub use resolve_previous::{ResolvePrevious, ResolvePreviousLayer};
pub use suspend_xa::{SuspendXa, SuspendXaLayer};
pub use validate::{Validate, ValidateLayer};

/// Result flowing back out through the chain.
pub type ChainResult = Result<MessageEvent, ExecutionError>;

/// One step of the execution pipeline.
pub trait Interceptor {
    /// Runs this step around the rest of the chain.
    ///
    /// # Errors
    ///
    /// Whatever the step or the rest of the chain fails with.
    fn intercept<F>(
        &self,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>;
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Per-call record shared by the interceptors of one execution.
#[derive(Debug)]
pub struct ExecutionContext {
    event: MessageEvent,
    processor: Arc<str>,
    begun: usize,
    suspends: usize,
    resumes: usize,
    absorbed: bool,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(event: MessageEvent, processor: Arc<str>) -> Self {
        Self {
            event,
            processor,
            begun: 0,
            suspends: 0,
            resumes: 0,
            absorbed: false,
        }
    }

    /// The event the execution started with.
    #[must_use]
    pub fn event(&self) -> &MessageEvent {
        &self.event
    }

    #[must_use]
    pub fn processor(&self) -> &str {
        &self.processor
    }

    /// Transactions begun by this execution.
    #[must_use]
    pub fn begun(&self) -> usize {
        self.begun
    }

    #[must_use]
    pub fn suspends(&self) -> usize {
        self.suspends
    }

    #[must_use]
    pub fn resumes(&self) -> usize {
        self.resumes
    }

    /// Whether a failure was turned into a successful result.
    #[must_use]
    pub fn absorbed(&self) -> bool {
        self.absorbed
    }

    pub(crate) fn record_begin(&mut self) {
        self.begun += 1;
    }

    pub(crate) fn record_suspend(&mut self) {
        self.suspends += 1;
    }

    pub(crate) fn record_resume(&mut self) {
        self.resumes += 1;
    }

    pub(crate) fn record_absorbed(&mut self) {
        self.absorbed = true;
    }
}

// ---------------------------------------------------------------------------
// Resolution helpers
// ---------------------------------------------------------------------------

/// Commits `tx`, counting the commit.
pub(crate) fn commit(tx: &dyn Transaction) -> Result<(), TransactionError> {
    tx.commit()?;
    metrics::transaction_committed();
    Ok(())
}

/// Rolls `tx` back, counting the rollback.
pub(crate) fn rollback(tx: &dyn Transaction) -> Result<(), TransactionError> {
    tx.rollback()?;
    metrics::transaction_rolled_back();
    Ok(())
}

/// Commits `tx`, or rolls it back if it was marked rollback-only.
pub(crate) fn complete(tx: &dyn Transaction) -> Result<(), TransactionError> {
    if tx.is_rollback_only() {
        rollback(tx)
    } else {
        commit(tx)
    }
}

/// Folds a lifecycle error raised while resolving into the chain result.
///
/// After a success the error replaces the result. After a processing failure
/// it is attached to the failure as suppressed, keeping the failure primary.
pub(crate) fn merge_lifecycle(result: ChainResult, error: TransactionError) -> ChainResult {
    match result {
        Ok(_) => Err(ExecutionError::Lifecycle(error)),
        Err(ExecutionError::Processing(mut failure)) => {
            tracing::warn!(
                processor = failure.processor(),
                error = %error,
                "lifecycle error while resolving a failure; suppressed"
            );
            failure.add_suppressed(error);
            Err(ExecutionError::Processing(failure))
        }
        Err(other) => {
            tracing::warn!(
                error = %error,
                primary = %other,
                "lifecycle error while unwinding; dropped"
            );
            Err(other)
        }
    }
}

/// Folds a registry error raised while unwinding into the chain result.
pub(crate) fn merge_illegal(result: ChainResult, error: IllegalTransactionState) -> ChainResult {
    match result {
        Ok(_) => Err(ExecutionError::IllegalState(error)),
        Err(primary) => {
            tracing::warn!(
                error = %error,
                primary = %primary,
                "registry error while unwinding; dropped"
            );
            Err(primary)
        }
    }
}
