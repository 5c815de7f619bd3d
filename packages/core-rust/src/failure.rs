//! Failure values raised by callbacks and their normalized form.
//!
//! A callback reports failure by returning a [`CallbackError`]: either a
//! [`Fault`] (a kind plus the underlying error) or a [`ProcessingFailure`]
//! propagated from a nested template. The execution template normalizes every
//! `CallbackError` into exactly one `ProcessingFailure`; already-normalized
//! failures are passed through, never wrapped a second time.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::error::{ExecutionError, TransactionError};
use crate::kind::FailureKind;
use crate::types::MessageEvent;

/// Shared handle to the error that started a failure.
///
/// Cloning a failure clones the handle, so the original error stays
/// reference-identical (`Arc::ptr_eq`) however far the failure travels.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Fault
// ---------------------------------------------------------------------------

/// A failure raised by processing code, tagged with its [`FailureKind`].
#[derive(Debug, Clone)]
pub struct Fault {
    kind: FailureKind,
    cause: Cause,
}

impl Fault {
    /// Wraps `cause` under `kind`.
    pub fn new(
        kind: FailureKind,
        cause: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            kind,
            cause: Arc::from(cause.into()),
        }
    }

    /// Wraps an already shared cause without re-allocating it.
    #[must_use]
    pub fn from_cause(kind: FailureKind, cause: Cause) -> Self {
        Self { kind, cause }
    }

    /// Builds a fault from a plain message.
    pub fn msg<M>(kind: FailureKind, message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::new(kind, anyhow::Error::msg(message))
    }

    #[must_use]
    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    #[must_use]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.cause)
    }
}

impl StdError for Fault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.cause)
    }
}

/// Cause recorded when a callback panics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("callback panicked: {message}")]
pub struct PanicError {
    pub message: String,
}

impl PanicError {
    /// Extracts the panic message from a `catch_unwind` payload.
    #[must_use]
    pub fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}

// ---------------------------------------------------------------------------
// CallbackError
// ---------------------------------------------------------------------------

/// Anything a callback may return as its error.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error(transparent)]
    Processing(#[from] ProcessingFailure),
}

impl CallbackError {
    /// Normalizes into a [`ProcessingFailure`].
    ///
    /// A `Fault` is wrapped with the ambient `event` and `processor`; a
    /// `ProcessingFailure` is returned unchanged.
    #[must_use]
    pub fn normalize(self, event: &MessageEvent, processor: &str) -> ProcessingFailure {
        match self {
            Self::Processing(failure) => failure,
            Self::Fault(fault) => {
                ProcessingFailure::new(fault.kind, fault.cause, event.clone(), processor)
            }
        }
    }
}

/// Lets a callback forward a nested template's error with `?`.
impl From<ExecutionError> for CallbackError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Processing(failure) => Self::Processing(failure),
            ExecutionError::IllegalState(e) => {
                Self::Fault(Fault::new(FailureKind::ILLEGAL_TRANSACTION_STATE, e))
            }
            ExecutionError::Lifecycle(e) => {
                Self::Fault(Fault::new(FailureKind::TRANSACTION_LIFECYCLE, e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessingFailure
// ---------------------------------------------------------------------------

/// The uniform failure produced by an execution template.
#[derive(Debug, Clone)]
pub struct ProcessingFailure {
    kind: FailureKind,
    cause: Cause,
    event: MessageEvent,
    processor: String,
    caused_rollback: bool,
    suppressed: Vec<TransactionError>,
}

impl ProcessingFailure {
    pub fn new(
        kind: FailureKind,
        cause: Cause,
        event: MessageEvent,
        processor: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            cause,
            event,
            processor: processor.into(),
            caused_rollback: false,
            suppressed: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    /// The original error. Identity is preserved across nested templates.
    #[must_use]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Event at the time of failure, or the one an exception handler resolved.
    #[must_use]
    pub fn event(&self) -> &MessageEvent {
        &self.event
    }

    /// Identifier of the processing unit whose template normalized the failure.
    #[must_use]
    pub fn processor(&self) -> &str {
        &self.processor
    }

    /// Whether the failure came from a panic.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind == FailureKind::FATAL
    }

    /// Whether some scope already rolled back a transaction because of this failure.
    #[must_use]
    pub fn caused_rollback(&self) -> bool {
        self.caused_rollback
    }

    /// Lifecycle errors raised while resolving this failure.
    #[must_use]
    pub fn suppressed(&self) -> &[TransactionError] {
        &self.suppressed
    }

    pub fn replace_event(&mut self, event: MessageEvent) {
        self.event = event;
    }

    pub fn mark_caused_rollback(&mut self) {
        self.caused_rollback = true;
    }

    pub fn add_suppressed(&mut self, error: TransactionError) {
        self.suppressed.push(error);
    }

    /// Consumes the failure, returning its event.
    #[must_use]
    pub fn into_event(self) -> MessageEvent {
        self.event
    }
}

impl fmt::Display for ProcessingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed processing event {}: {}: {}",
            self.processor, self.event.id, self.kind, self.cause
        )
    }
}

impl StdError for ProcessingFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IllegalTransactionState;
    use crate::policy::TransactionAction;

    #[derive(Debug, thiserror::Error)]
    #[error("queue unavailable")]
    struct QueueDown;

    fn event() -> MessageEvent {
        MessageEvent::new("orders", "payload")
    }

    #[test]
    fn normalize_wraps_fault_with_event_and_processor() {
        let fault = Fault::new(FailureKind::CONNECTIVITY, QueueDown);
        let cause = Arc::clone(fault.cause());
        let ev = event();

        let failure = CallbackError::from(fault).normalize(&ev, "jms-outbound");

        assert_eq!(failure.kind(), &FailureKind::CONNECTIVITY);
        assert!(Arc::ptr_eq(failure.cause(), &cause));
        assert_eq!(failure.event(), &ev);
        assert_eq!(failure.processor(), "jms-outbound");
        assert!(!failure.caused_rollback());
        assert!(failure.suppressed().is_empty());
    }

    #[test]
    fn normalize_passes_processing_failure_through() {
        let inner = CallbackError::from(Fault::msg(FailureKind::ROUTING, "no route"))
            .normalize(&event(), "inner");
        let cause = Arc::clone(inner.cause());

        let outer = CallbackError::from(inner).normalize(&event(), "outer");

        assert_eq!(outer.processor(), "inner");
        assert!(Arc::ptr_eq(outer.cause(), &cause));
    }

    #[test]
    fn source_chain_reaches_original_error() {
        let failure = CallbackError::from(Fault::new(FailureKind::CONNECTIVITY, QueueDown))
            .normalize(&event(), "p");
        let source = failure.source().unwrap();
        assert!(source.downcast_ref::<QueueDown>().is_some());
    }

    #[test]
    fn execution_error_converts_back_into_callback_error() {
        let illegal = ExecutionError::from(IllegalTransactionState::TransactionRequired {
            action: TransactionAction::AlwaysJoin,
        });
        match CallbackError::from(illegal) {
            CallbackError::Fault(fault) => {
                assert_eq!(fault.kind(), &FailureKind::ILLEGAL_TRANSACTION_STATE);
            }
            CallbackError::Processing(_) => panic!("expected fault"),
        }

        let failure = CallbackError::from(Fault::msg(FailureKind::ROUTING, "x"))
            .normalize(&event(), "p");
        let cause = Arc::clone(failure.cause());
        match CallbackError::from(ExecutionError::Processing(failure)) {
            CallbackError::Processing(f) => assert!(Arc::ptr_eq(f.cause(), &cause)),
            CallbackError::Fault(_) => panic!("expected pass-through"),
        }
    }

    #[test]
    fn panic_payloads_are_described() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(PanicError::from_payload(payload.as_ref()).message, "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(PanicError::from_payload(payload.as_ref()).message, "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(
            PanicError::from_payload(payload.as_ref()).message,
            "non-string panic payload"
        );
    }
}
