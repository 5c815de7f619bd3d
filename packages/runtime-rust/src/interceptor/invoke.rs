//! Innermost step: runs the caller's callback.

use std::panic::{self, AssertUnwindSafe};

use relay_core::{CallbackError, ExecutionError, FailureKind, Fault, MessageEvent, PanicError};

use super::{ChainResult, ExecutionContext, Interceptor};
use crate::registry::WorkerContext;

/// Calls the callback and normalizes whatever it raises, panics included,
/// into a single processing failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeCallback;

impl Interceptor for InvokeCallback {
    fn intercept<F>(
        &self,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(worker)));
        let outcome = outcome.unwrap_or_else(|payload| {
            let panic = PanicError::from_payload(payload.as_ref());
            tracing::error!(
                processor = ctx.processor(),
                message = %panic.message,
                "callback panicked"
            );
            Err(Fault::new(FailureKind::FATAL, panic).into())
        });
        outcome
            .map_err(|err| ExecutionError::Processing(err.normalize(ctx.event(), ctx.processor())))
    }
}
