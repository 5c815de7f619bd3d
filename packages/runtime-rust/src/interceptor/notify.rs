use std::sync::Arc;

use relay_core::{CallbackError, ExecutionNotification, MessageEvent, NotificationListener};
use tower::Layer;

use super::{ChainResult, ExecutionContext, Interceptor};
use crate::notification::deliver;
use crate::registry::WorkerContext;

/// Fires one pre-invoke notification immediately before the callback and one
/// post-invoke notification immediately after it.
#[derive(Clone, Default)]
pub struct NotifyLayer {
    listener: Option<Arc<dyn NotificationListener>>,
}

impl NotifyLayer {
    #[must_use]
    pub fn new(listener: Option<Arc<dyn NotificationListener>>) -> Self {
        Self { listener }
    }
}

impl<S> Layer<S> for NotifyLayer {
    type Service = Notify<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Notify {
            inner,
            listener: self.listener.clone(),
        }
    }
}

pub struct Notify<S> {
    inner: S,
    listener: Option<Arc<dyn NotificationListener>>,
}

impl<S: Interceptor> Interceptor for Notify<S> {
    fn intercept<F>(
        &self,
        worker: &mut WorkerContext,
        ctx: &mut ExecutionContext,
        callback: F,
    ) -> ChainResult
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        let Some(listener) = self.listener.as_ref() else {
            return self.inner.intercept(worker, ctx, callback);
        };

        deliver(
            Some(listener),
            &ExecutionNotification::PreInvoke {
                processor: ctx.processor(),
                event: ctx.event(),
            },
        );

        let result = self.inner.intercept(worker, ctx, callback);

        let event = match &result {
            Ok(event) => event,
            Err(err) => err.failure().map_or(ctx.event(), |failure| failure.event()),
        };
        deliver(
            Some(listener),
            &ExecutionNotification::PostInvoke {
                processor: ctx.processor(),
                event,
                failure: result.as_ref().err().and_then(|err| err.failure()),
            },
        );
        result
    }
}
