use std::fmt;
use std::sync::Arc;

use crate::kind::KindHierarchy;
use crate::traits::NotificationListener;

/// Runtime-wide state shared by every execution template.
///
/// Carries the node identity used in logs, the failure-kind hierarchy filters
/// are compiled against, and the listener that receives execution
/// notifications.
#[derive(Clone)]
pub struct RuntimeContext {
    /// Identifier of the node running the flows.
    pub node_id: String,
    /// Failure-kind hierarchy snapshot used to compile exception filters.
    pub kinds: Arc<KindHierarchy>,
    /// Receiver of pre/post invocation notifications, if any.
    pub listener: Option<Arc<dyn NotificationListener>>,
}

impl RuntimeContext {
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            kinds: Arc::new(KindHierarchy::builtin()),
            listener: None,
        }
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: KindHierarchy) -> Self {
        self.kinds = Arc::new(kinds);
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn NotificationListener>) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new("local")
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("node_id", &self.node_id)
            .field("kinds", &self.kinds)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
