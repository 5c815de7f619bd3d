//! Detaches a local ambient transaction and resolves it when the call ends.

use relay_core::{CallbackError, ExecutionError, MessageEvent, TransactionAction};
use tower::Layer;

use super::{complete, merge_lifecycle, rollback, ChainResult, ExecutionContext, Interceptor};
use crate::registry::WorkerContext;

/// Applies to `NONE` and `ALWAYS_BEGIN` with a non-XA ambient transaction,
/// which cannot be suspended. On success the ambient is committed (rolled
/// back if marked rollback-only); on failure it is rolled back.
#[derive(Debug, Clone, Copy)]
pub struct ResolvePreviousLayer {
    action: TransactionAction,
}

impl ResolvePreviousLayer {
    #[must_use]
    pub fn new(action: TransactionAction) -> Self {
        Self { action }
    }
}

impl<S> Layer<S> for ResolvePreviousLayer {
    type Service = ResolvePrevious<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResolvePrevious {
            inner,
            action: self.action,
        }
    }
}

pub struct ResolvePrevious<S> {
    inner: S,
    action: TransactionAction,
}

impl<S: Interceptor> Interceptor for ResolvePrevious<S> {
    fn intercept<F>(
        &self,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        let previous = match worker.current() {
            Some(tx) if self.action.displaces_ambient() && !tx.is_xa() => tx,
            _ => return self.inner.intercept(worker, ctx, callback),
        };
        worker.unbind(&previous)?;
        tracing::debug!(
            processor = ctx.processor(),
            tx = %previous.id(),
            "detached local ambient transaction"
        );

        let mut result = self.inner.intercept(worker, ctx, callback);

        if previous.status().is_terminal() {
            return result;
        }
        let resolved = if result.is_ok() {
            complete(previous.as_ref())
        } else {
            let rolled_back = rollback(previous.as_ref());
            if let (Ok(()), Err(ExecutionError::Processing(failure))) =
                (&rolled_back, &mut result)
            {
                failure.mark_caused_rollback();
            }
            rolled_back
        };
        if let Err(err) = resolved {
            result = merge_lifecycle(result, err);
        }
        result
    }
}
