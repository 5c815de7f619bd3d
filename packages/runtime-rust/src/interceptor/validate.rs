//! Rejects executions whose ambient state contradicts the policy.

use relay_core::{CallbackError, IllegalTransactionState, MessageEvent, TransactionAction};
use tower::Layer;

use super::{ChainResult, ExecutionContext, Interceptor};
use crate::registry::WorkerContext;

#[derive(Debug, Clone, Copy)]
pub struct ValidateLayer {
    action: TransactionAction,
}

impl ValidateLayer {
    #[must_use]
    pub fn new(action: TransactionAction) -> Self {
        Self { action }
    }
}

impl<S> Layer<S> for ValidateLayer {
    type Service = Validate<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Validate {
            inner,
            action: self.action,
        }
    }
}

pub struct Validate<S> {
    inner: S,
    action: TransactionAction,
}

impl<S: Interceptor> Interceptor for Validate<S> {
    fn intercept<F>(
        &self,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        match (self.action, worker.current()) {
            (TransactionAction::Never, Some(bound)) => {
                Err(IllegalTransactionState::TransactionForbidden {
                    action: self.action,
                    bound: bound.id(),
                }
                .into())
            }
            (TransactionAction::AlwaysJoin, None) => {
                Err(IllegalTransactionState::TransactionRequired {
                    action: self.action,
                }
                .into())
            }
            _ => self.inner.intercept(worker, ctx, callback),
        }
    }
}
