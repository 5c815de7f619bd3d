//! Sets an XA ambient transaction aside for the duration of the call.

use relay_core::{CallbackError, ExecutionError, MessageEvent, TransactionAction};
use tower::Layer;

use super::{merge_illegal, merge_lifecycle, ChainResult, ExecutionContext, Interceptor};
use crate::registry::WorkerContext;

/// Applies to `NONE` and `ALWAYS_BEGIN`. The transaction is suspended before
/// the rest of the chain runs and resumed afterwards whatever the outcome, so
/// suspends and resumes are always paired.
#[derive(Debug, Clone, Copy)]
pub struct SuspendXaLayer {
    action: TransactionAction,
}

impl SuspendXaLayer {
    #[must_use]
    pub fn new(action: TransactionAction) -> Self {
        Self { action }
    }
}

impl<S> Layer<S> for SuspendXaLayer {
    type Service = SuspendXa<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SuspendXa {
            inner,
            action: self.action,
        }
    }
}

pub struct SuspendXa<S> {
    inner: S,
    action: TransactionAction,
}

impl<S: Interceptor> Interceptor for SuspendXa<S> {
    fn intercept<F>(
        &self,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        let ambient = match worker.current() {
            Some(tx) if self.action.displaces_ambient() && tx.is_xa() => tx,
            _ => return self.inner.intercept(worker, ctx, callback),
        };

        ambient.suspend().map_err(ExecutionError::Lifecycle)?;
        worker.suspend();
        ctx.record_suspend();
        tracing::debug!(
            processor = ctx.processor(),
            tx = %ambient.id(),
            "suspended XA transaction"
        );

        let mut result = self.inner.intercept(worker, ctx, callback);

        if let Err(err) = worker.resume(ambient.clone()) {
            result = merge_illegal(result, err);
        }
        ctx.record_resume();
        if let Err(err) = ambient.resume() {
            result = merge_lifecycle(result, err);
        }
        tracing::debug!(processor = ctx.processor(), tx = %ambient.id(), "resumed XA transaction");
        result
    }
}
