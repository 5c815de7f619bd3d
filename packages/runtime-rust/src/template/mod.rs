//! Execution templates: the entry point for running a unit of processing
//! under a transaction policy.
//!
//! ```ignore
//! let template = ExecutionTemplate::create(&runtime, policy, handler)?
//!     .with_processor("jms-outbound");
//! let result = template.execute(&mut worker, &event, |worker| {
//!     // processing; may run nested templates with `worker`
//!     Ok(event.with_payload("done"))
//! });
//! ```

use std::sync::Arc;
use std::time::Instant;

use relay_core::{
    CallbackError, ExceptionHandler, ExecutionError, MessageEvent, PolicyError, RuntimeContext,
    TransactionPolicy,
};
use tracing::info_span;

use crate::disposition::DispositionResolver;
use crate::interceptor::pipeline::{build_execution_pipeline, Pipeline};
use crate::interceptor::{ExecutionContext, Interceptor};
use crate::metrics;
use crate::registry::WorkerContext;


/// Runs callbacks under one [`TransactionPolicy`].
///
/// The interceptor chain is built once, at creation; a template is immutable
/// afterwards and may be shared between workers.
pub struct ExecutionTemplate {
    policy: TransactionPolicy,
    processor: Arc<str>,
    absorbing: bool,
    pipeline: Pipeline,
}

impl ExecutionTemplate {
    /// Builds a template that re-raises failures after the handler ran.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if the policy is inconsistent or a filter does not compile.
    pub fn create(
        runtime: &RuntimeContext,
        policy: TransactionPolicy,
        handler: Arc<dyn ExceptionHandler>,
    ) -> Result<Self, PolicyError> {
        Self::build(runtime, policy, handler, false)
    }

    /// Builds a try-scope template: non-fatal failures are resolved into the
    /// handler's event and returned as success.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if the policy is inconsistent or a filter does not compile.
    pub fn create_absorbing(
        runtime: &RuntimeContext,
        policy: TransactionPolicy,
        handler: Arc<dyn ExceptionHandler>,
    ) -> Result<Self, PolicyError> {
        Self::build(runtime, policy, handler, true)
    }

    fn build(
        runtime: &RuntimeContext,
        policy: TransactionPolicy,
        handler: Arc<dyn ExceptionHandler>,
        absorbing: bool,
    ) -> Result<Self, PolicyError> {
        policy.validate()?;
        let resolver = DispositionResolver::for_policy(&policy, &runtime.kinds)?;
        let runtime = Arc::new(runtime.clone());
        let pipeline = build_execution_pipeline(&runtime, &policy, resolver, handler, absorbing);
        Ok(Self {
            processor: Arc::from(policy.action().as_str().to_ascii_lowercase()),
            policy,
            absorbing,
            pipeline,
        })
    }

    /// Sets the processing-unit identifier reported in failures and notifications.
    #[must_use]
    pub fn with_processor(mut self, processor: impl Into<Arc<str>>) -> Self {
        self.processor = processor.into();
        self
    }

    #[must_use]
    pub fn policy(&self) -> &TransactionPolicy {
        &self.policy
    }

    #[must_use]
    pub fn processor(&self) -> &str {
        &self.processor
    }

    #[must_use]
    pub fn is_absorbing(&self) -> bool {
        self.absorbing
    }

    /// Runs `callback` for `event` on `worker`.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::IllegalState`] when the ambient transaction does not
    ///   fit the policy; nothing was changed.
    /// - [`ExecutionError::Lifecycle`] when the callback succeeded but a
    ///   transaction operation failed.
    /// - [`ExecutionError::Processing`] when the callback failed, unless this
    ///   template absorbs failures.
    pub fn execute<F>(
        &self,
        worker: &mut WorkerContext,
        event: &MessageEvent,
        callback: F,
    ) -> Result<MessageEvent, ExecutionError>
    where
        F: FnOnce(&mut WorkerContext) -> Result<MessageEvent, CallbackError>,
    {
        let span = info_span!(
            "execution",
            processor = %self.processor,
            action = %self.policy.action(),
            worker = %worker.id(),
            event = %event.id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let _entered = span.enter();
        let start = Instant::now();

        let mut ctx = ExecutionContext::new(event.clone(), Arc::clone(&self.processor));
        let result = self.pipeline.intercept(worker, &mut ctx, callback);

        debug_assert_eq!(ctx.suspends(), ctx.resumes(), "suspend/resume must be paired");
        let outcome = outcome_label(&result, ctx.absorbed());
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        span.record("duration_ms", duration_ms);
        span.record("outcome", outcome);
        metrics::execution(outcome);
        tracing::debug!(
            begun = ctx.begun(),
            suspends = ctx.suspends(),
            resumes = ctx.resumes(),
            duration_ms,
            outcome,
            "execution complete"
        );
        result
    }
}

impl std::fmt::Debug for ExecutionTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTemplate")
            .field("processor", &self.processor)
            .field("policy", &self.policy)
            .field("absorbing", &self.absorbing)
            .finish_non_exhaustive()
    }
}

fn outcome_label(result: &Result<MessageEvent, ExecutionError>, absorbed: bool) -> &'static str {
    match result {
        Ok(_) if absorbed => "absorbed",
        Ok(_) => "ok",
        Err(ExecutionError::IllegalState(_)) => "illegal-state",
        Err(ExecutionError::Lifecycle(_)) => "lifecycle",
        Err(ExecutionError::Processing(f)) if f.is_fatal() => "fatal",
        Err(ExecutionError::Processing(_)) => "failed",
    }
}
