//! Notification fan-out and delivery.
//!
//! [`CompositeListener`] forwards every notification to a list of listeners.
//! [`deliver`] is what the pipeline calls: a listener error is logged and
//! never reaches the execution outcome.

use std::sync::Arc;

use relay_core::{ExecutionNotification, NotificationListener};

/// Listener that fans out to several listeners in registration order.
///
/// Every listener sees every notification even if an earlier one fails; the
/// first error is returned afterwards.
#[derive(Debug, Default)]
pub struct CompositeListener {
    listeners: Vec<Arc<dyn NotificationListener>>,
}

impl CompositeListener {
    #[must_use]
    pub fn new(listeners: Vec<Arc<dyn NotificationListener>>) -> Self {
        Self { listeners }
    }

    /// Adds a listener after construction.
    pub fn add(&mut self, listener: Arc<dyn NotificationListener>) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl NotificationListener for CompositeListener {
    fn on_notification(&self, notification: &ExecutionNotification<'_>) -> anyhow::Result<()> {
        let mut first_error = None;
        let mut failed = 0_usize;
        for listener in &self.listeners {
            if let Err(err) = listener.on_notification(notification) {
                failed += 1;
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err.context(format!(
                "{failed} of {} listeners failed",
                self.listeners.len()
            ))),
            None => Ok(()),
        }
    }
}

/// Sends `notification` to `listener`, logging and discarding any error.
pub fn deliver(
    listener: Option<&Arc<dyn NotificationListener>>,
    notification: &ExecutionNotification<'_>,
) {
    let Some(listener) = listener else {
        return;
    };
    if let Err(err) = listener.on_notification(notification) {
        tracing::warn!(
            processor = notification.processor(),
            pre = notification.is_pre(),
            error = %format!("{err:#}"),
            "notification listener failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use relay_core::MessageEvent;

    use super::*;
    use crate::testing::RecordingListener;

    #[test]
    fn composite_reaches_every_listener_despite_failures() {
        let failing = Arc::new(RecordingListener::failing());
        let healthy = Arc::new(RecordingListener::new());
        let composite = CompositeListener::new(vec![
            failing.clone() as Arc<dyn NotificationListener>,
            healthy.clone() as Arc<dyn NotificationListener>,
        ]);
        let event = MessageEvent::new("f", "p");

        let result = composite.on_notification(&ExecutionNotification::PreInvoke {
            processor: "unit",
            event: &event,
        });

        assert!(result.is_err());
        assert_eq!(failing.seen(), vec!["pre:unit"]);
        assert_eq!(healthy.seen(), vec!["pre:unit"]);
    }

    #[test]
    fn deliver_swallows_listener_errors() {
        let listener: Arc<dyn NotificationListener> = Arc::new(RecordingListener::failing());
        let event = MessageEvent::new("f", "p");
        deliver(
            Some(&listener),
            &ExecutionNotification::PostInvoke {
                processor: "unit",
                event: &event,
                failure: None,
            },
        );
        deliver(
            None,
            &ExecutionNotification::PreInvoke {
                processor: "unit",
                event: &event,
            },
        );
    }

    #[test]
    fn empty_composite_is_ok() {
        let mut composite = CompositeListener::default();
        assert!(composite.is_empty());
        let event = MessageEvent::new("f", "p");
        let pre = ExecutionNotification::PreInvoke {
            processor: "unit",
            event: &event,
        };
        assert!(composite.on_notification(&pre).is_ok());
        composite.add(Arc::new(RecordingListener::new()));
        assert_eq!(composite.len(), 1);
    }
}
