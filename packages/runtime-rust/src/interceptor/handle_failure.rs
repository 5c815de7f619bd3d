//! Outermost layer: hands processing failures to the exception handler.

use std::sync::Arc;

use relay_core::{CallbackError, ExceptionHandler, ExecutionError, MessageEvent};
use tower::Layer;

use super::{ChainResult, ExecutionContext, Interceptor};
use crate::registry::WorkerContext;

/// Runs after every transactional effect of the call has been applied, so the
/// handler sees the failure with its final `caused_rollback` flag.
#[derive(Clone)]
pub struct HandleFailureLayer {
    handler: Arc<dyn ExceptionHandler>,
    absorb: bool,
}

impl HandleFailureLayer {
    /// With `absorb` set, non-fatal failures turn into the handler's event.
    #[must_use]
    pub fn new(handler: Arc<dyn ExceptionHandler>, absorb: bool) -> Self {
        Self { handler, absorb }
    }
}

impl<S> Layer<S> for HandleFailureLayer {
    type Service = HandleFailure<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HandleFailure {
            inner,
            handler: Arc::clone(&self.handler),
            absorb: self.absorb,
        }
    }
}

pub struct HandleFailure<S> {
    inner: S,
    handler: Arc<dyn ExceptionHandler>,
    absorb: bool,
}

impl<S> HandleFailure<S> {
    #[must_use]
    pub fn is_absorbing(&self) -> bool {
        self.absorb
    }
}

impl<S: Interceptor> Interceptor for HandleFailure<S> {
    fn intercept<F>(
        &self,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        match self.inner.intercept(worker, ctx, callback) {
            Err(ExecutionError::Processing(mut failure)) => {
                let handled = self.handler.handle(&failure, ctx.event());
                failure.replace_event(handled.clone());
                if self.absorb && !failure.is_fatal() {
                    tracing::debug!(
                        processor = ctx.processor(),
                        kind = %failure.kind(),
                        "failure absorbed by exception handler"
                    );
                    ctx.record_absorbed();
                    Ok(handled)
                } else {
                    Err(ExecutionError::Processing(failure))
                }
            }
            other => other,
        }
    }
}
