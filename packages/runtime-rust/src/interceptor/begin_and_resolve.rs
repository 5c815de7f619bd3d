//! Begins the transaction a policy asks for and resolves whatever the call
//! owns or joined once the rest of the chain returns.

use std::sync::Arc;

use relay_core::{
    same_transaction, CallbackError, ExecutionError, FailureKind, MessageEvent, RuntimeContext,
    TransactionAction, TransactionError, TransactionFactory, TxHandle,
};
use tower::Layer;

use super::{
    commit, complete, merge_illegal, merge_lifecycle, rollback, ChainResult, ExecutionContext,
    Interceptor,
};
use crate::disposition::{Disposition, DispositionResolver};
use crate::metrics;
use crate::registry::WorkerContext;

#[derive(Clone)]
pub struct BeginAndResolveLayer {
    action: TransactionAction,
    runtime: Arc<RuntimeContext>,
    factory: Option<Arc<dyn TransactionFactory>>,
    resolver: Arc<DispositionResolver>,
}

impl BeginAndResolveLayer {
    #[must_use]
    pub fn new(
        action: TransactionAction,
        runtime: Arc<RuntimeContext>,
        factory: Option<Arc<dyn TransactionFactory>>,
        resolver: Arc<DispositionResolver>,
    ) -> Self {
        Self {
            action,
            runtime,
            factory,
            resolver,
        }
    }
}

impl<S> Layer<S> for BeginAndResolveLayer {
    type Service = BeginAndResolve<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BeginAndResolve {
            inner,
            action: self.action,
            runtime: Arc::clone(&self.runtime),
            factory: self.factory.clone(),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

pub struct BeginAndResolve<S> {
    inner: S,
    action: TransactionAction,
    runtime: Arc<RuntimeContext>,
    factory: Option<Arc<dyn TransactionFactory>>,
    resolver: Arc<DispositionResolver>,
}

impl<S: Interceptor> BeginAndResolve<S> {
    fn run_new<F>(
        &self,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        let Some(factory) = self.factory.as_ref() else {
            // Template construction rejects policies that could get here.
            return Err(ExecutionError::Lifecycle(TransactionError::Factory {
                reason: format!("{} requires a transaction factory", self.action),
            }));
        };
        let tx = factory.begin(&self.runtime)?;
        metrics::transaction_begun();
        ctx.record_begin();
        if let Err(err) = worker.bind(Arc::clone(&tx)) {
            if let Err(rollback_err) = rollback(tx.as_ref()) {
                tracing::warn!(
                    tx = %tx.id(),
                    error = %rollback_err,
                    "rollback of unbindable transaction failed"
                );
            }
            return Err(err.into());
        }
        tracing::debug!(
            processor = ctx.processor(),
            tx = %tx.id(),
            xa = tx.is_xa(),
            "began transaction"
        );

        let mut result = self.inner.intercept(worker, ctx, callback);

        if tx.status().is_terminal() {
            tracing::debug!(tx = %tx.id(), status = %tx.status(), "transaction already resolved");
        } else {
            let resolved = match &mut result {
                Ok(_) => complete(tx.as_ref()),
                Err(ExecutionError::Processing(failure)) => {
                    let disposition = self.resolver.resolve(failure.kind(), tx.is_rollback_only());
                    apply(&tx, disposition, failure.kind()).map(|rolled_back| {
                        if rolled_back {
                            failure.mark_caused_rollback();
                        }
                    })
                }
                Err(_) => rollback(tx.as_ref()),
            };
            if let Err(err) = resolved {
                result = merge_lifecycle(result, err);
            }
        }

        let still_bound = worker
            .current()
            .is_some_and(|bound| same_transaction(&bound, &tx));
        if still_bound {
            if let Err(err) = worker.unbind(&tx) {
                result = merge_illegal(result, err);
            }
        }
        result
    }

    fn run_joined<F>(
        &self,
        joined: &TxHandle,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        let mut result = self.inner.intercept(worker, ctx, callback);
        let Err(ExecutionError::Processing(failure)) = &mut result else {
            return result;
        };
        if joined.status().is_terminal() {
            return result;
        }
        let disposition = self.resolver.resolve(failure.kind(), joined.is_rollback_only());
        match apply(joined, disposition, failure.kind()) {
            Ok(rolled_back) => {
                if rolled_back {
                    failure.mark_caused_rollback();
                }
                result
            }
            Err(err) => merge_lifecycle(result, err),
        }
    }
}

/// Applies `disposition` to `tx`. Returns whether the transaction was rolled back.
fn apply(
    tx: &TxHandle,
    disposition: Disposition,
    kind: &FailureKind,
) -> Result<bool, TransactionError> {
    tracing::debug!(tx = %tx.id(), %kind, %disposition, "resolving transaction after failure");
    match disposition {
        Disposition::Rollback => rollback(tx.as_ref()).map(|()| true),
        Disposition::Commit => commit(tx.as_ref()).map(|()| false),
        Disposition::None => {
            tracing::warn!(
                tx = %tx.id(),
                %kind,
                "no disposition matched; transaction left unresolved"
            );
            Ok(false)
        }
    }
}

impl<S: Interceptor> Interceptor for BeginAndResolve<S> {
    fn intercept<F>(
        &self,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        let ambient = worker.current();
        if self.action.must_begin(ambient.is_some()) {
            if self.factory.as_ref().is_some_and(|f| !f.is_transacted()) {
                tracing::debug!(
                    processor = ctx.processor(),
                    action = %self.action,
                    "factory is not transacted; running without a transaction"
                );
                return self.inner.intercept(worker, ctx, callback);
            }
            return self.run_new(worker, ctx, callback);
        }
        match ambient {
            Some(joined) if self.action.joins() => self.run_joined(&joined, worker, ctx, callback),
            _ => self.inner.intercept(worker, ctx, callback),
        }
    }
}
