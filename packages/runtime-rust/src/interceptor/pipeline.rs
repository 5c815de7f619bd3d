//! Pipeline composition: stacks every interceptor around the callback.

use std::sync::Arc;

use relay_core::{ExceptionHandler, RuntimeContext, TransactionPolicy};
use tower::ServiceBuilder;

use super::{
    BeginAndResolve, BeginAndResolveLayer, External, ExternalLayer, HandleFailure,
    HandleFailureLayer, InvokeCallback, Notify, NotifyLayer, ResolvePrevious, ResolvePreviousLayer,
    SuspendXa, SuspendXaLayer, Validate, ValidateLayer,
};
use crate::disposition::DispositionResolver;

/// The composed chain of one execution template.
pub type Pipeline = HandleFailure<
    External<Validate<SuspendXa<ResolvePrevious<BeginAndResolve<Notify<InvokeCallback>>>>>>,
>;

/// Builds the execution pipeline for `policy`.
///
/// Layer order (outermost to innermost):
/// 1. `HandleFailureLayer` -- exception handler, after every transactional effect
/// 2. `ExternalLayer` -- adopt an external transaction as ambient
/// 3. `ValidateLayer` -- reject `NEVER`/`ALWAYS_JOIN` mismatches before any side effect
/// 4. `SuspendXaLayer` -- suspend an XA ambient for `NONE`/`ALWAYS_BEGIN`
/// 5. `ResolvePreviousLayer` -- detach a local ambient for `NONE`/`ALWAYS_BEGIN`
/// 6. `BeginAndResolveLayer` -- begin, join and resolve
/// 7. `NotifyLayer` -- pre/post invocation notifications (closest to the callback)
#[must_use]
pub fn build_execution_pipeline(
    runtime: &Arc<RuntimeContext>,
    policy: &TransactionPolicy,
    resolver: DispositionResolver,
    handler: Arc<dyn ExceptionHandler>,
    absorb: bool,
) -> Pipeline {
    let action = policy.action();
    ServiceBuilder::new()
        .layer(HandleFailureLayer::new(handler, absorb))
        .layer(ExternalLayer::new(
            Arc::clone(runtime),
            policy.factory().cloned(),
            policy.interacts_with_external(),
        ))
        .layer(ValidateLayer::new(action))
        .layer(SuspendXaLayer::new(action))
        .layer(ResolvePreviousLayer::new(action))
        .layer(BeginAndResolveLayer::new(
            action,
            Arc::clone(runtime),
            policy.factory().cloned(),
            Arc::new(resolver),
        ))
        .layer(NotifyLayer::new(runtime.listener.clone()))
        .service(InvokeCallback)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
