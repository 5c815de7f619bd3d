use std::fmt;

use crate::failure::ProcessingFailure;
use crate::types::MessageEvent;

/// Turns a processing failure into the event the flow continues with.
///
/// Invoked by the execution template after the transaction disposition has
/// been applied. Whether the returned event replaces the failure's event or
/// becomes the template's successful result depends on the template flavor.
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, failure: &ProcessingFailure, event: &MessageEvent) -> MessageEvent;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&ProcessingFailure, &MessageEvent) -> MessageEvent + Send + Sync,
{
    fn handle(&self, failure: &ProcessingFailure, event: &MessageEvent) -> MessageEvent {
        self(failure, event)
    }
}

/// Returns the failing event unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionHandler;

impl ExceptionHandler for DefaultExceptionHandler {
    fn handle(&self, failure: &ProcessingFailure, _event: &MessageEvent) -> MessageEvent {
        failure.event().clone()
    }
}

/// Fired around every callback invocation.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionNotification<'a> {
    PreInvoke {
        processor: &'a str,
        event: &'a MessageEvent,
    },
    PostInvoke {
        processor: &'a str,
        event: &'a MessageEvent,
        failure: Option<&'a ProcessingFailure>,
    },
}

impl ExecutionNotification<'_> {
    #[must_use]
    pub fn processor(&self) -> &str {
        match self {
            Self::PreInvoke { processor, .. } | Self::PostInvoke { processor, .. } => processor,
        }
    }

    #[must_use]
    pub fn is_pre(&self) -> bool {
        matches!(self, Self::PreInvoke { .. })
    }
}

/// Observer of [`ExecutionNotification`]s.
///
/// Errors are logged by the caller and never alter the execution outcome.
pub trait NotificationListener: Send + Sync + fmt::Debug {
    /// # Errors
    ///
    /// Any error is reported and otherwise ignored.
    fn on_notification(&self, notification: &ExecutionNotification<'_>) -> anyhow::Result<()>;
}
