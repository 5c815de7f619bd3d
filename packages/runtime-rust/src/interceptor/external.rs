//! Adopts a transaction started outside the runtime.

use std::sync::Arc;

use relay_core::{
    same_transaction, CallbackError, ExecutionError, MessageEvent, RuntimeContext,
    TransactionFactory,
};
use tower::Layer;

use super::{merge_illegal, ChainResult, ExecutionContext, Interceptor};
use crate::registry::WorkerContext;

/// Binds the external transaction as ambient when the worker has none, and
/// unbinds it again when the call ends. The external manager resolves it.
#[derive(Clone)]
pub struct ExternalLayer {
    runtime: Arc<RuntimeContext>,
    factory: Option<Arc<dyn TransactionFactory>>,
    enabled: bool,
}

impl ExternalLayer {
    #[must_use]
    pub fn new(
        runtime: Arc<RuntimeContext>,
        factory: Option<Arc<dyn TransactionFactory>>,
        enabled: bool,
    ) -> Self {
        Self {
            runtime,
            factory,
            enabled,
        }
    }
}

impl<S> Layer<S> for ExternalLayer {
    type Service = External<S>;

    fn layer(&self, inner: S) -> Self::Service {
        External {
            inner,
            runtime: Arc::clone(&self.runtime),
            factory: self.factory.clone(),
            enabled: self.enabled,
        }
    }
}

pub struct External<S> {
    inner: S,
    runtime: Arc<RuntimeContext>,
    factory: Option<Arc<dyn TransactionFactory>>,
    enabled: bool,
}

impl<S: Interceptor> Interceptor for External<S> {
    fn intercept<F>(
        &self,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        if !self.enabled || worker.current().is_some() {
            return self.inner.intercept(worker, ctx, callback);
        }
        let Some(aware) = self.factory.as_deref().and_then(|f| f.as_external_aware()) else {
            tracing::debug!(
                processor = ctx.processor(),
                "factory cannot join external transactions; skipping"
            );
            return self.inner.intercept(worker, ctx, callback);
        };

        let Some(external) = aware
            .join_external(&self.runtime)
            .map_err(ExecutionError::Lifecycle)?
        else {
            return self.inner.intercept(worker, ctx, callback);
        };

        worker.bind(Arc::clone(&external))?;
        tracing::debug!(
            processor = ctx.processor(),
            tx = %external.id(),
            xa = external.is_xa(),
            "joined external transaction"
        );

        let result = self.inner.intercept(worker, ctx, callback);

        let still_bound = worker
            .current()
            .is_some_and(|bound| same_transaction(&bound, &external));
        if !still_bound {
            return result;
        }
        match worker.unbind(&external) {
            Ok(()) => result,
            Err(err) => merge_illegal(result, err),
        }
    }
}
