//! Recording test doubles for transactions, factories, handlers and listeners.
//!
//! Every double writes to its own journal and, optionally, to a shared
//! [`CallLog`] so tests can assert on cross-object ordering (for example that
//! an ambient transaction was suspended before a new one began).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::{
    ExceptionHandler, ExecutionNotification, ExternalTransactionAwareFactory, FailureKind,
    MessageEvent, NotificationListener, ProcessingFailure, RuntimeContext, Transaction,
    TransactionCore, TransactionError, TransactionFactory, TxHandle, Value,
};

// ---------------------------------------------------------------------------
// CallLog
// ---------------------------------------------------------------------------

/// Shared, ordered log of calls across several doubles.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Index of the first entry equal to `entry`.
    #[must_use]
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

// ---------------------------------------------------------------------------
// RecordingTransaction
// ---------------------------------------------------------------------------

/// Lifecycle hook recorded by [`RecordingTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxCall {
    Begin,
    Commit,
    Rollback,
    Suspend,
    Resume,
}

impl TxCall {
    fn as_str(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
        }
    }
}

/// In-memory transaction that records every hook invocation.
#[derive(Debug)]
pub struct RecordingTransaction {
    core: TransactionCore,
    label: String,
    calls: Mutex<Vec<TxCall>>,
    failing: Mutex<Vec<TxCall>>,
    log: Option<CallLog>,
}

impl RecordingTransaction {
    /// A transaction that has not begun yet.
    #[must_use]
    pub fn new(label: impl Into<String>, xa: bool) -> Arc<Self> {
        Arc::new(Self {
            core: TransactionCore::new(xa),
            label: label.into(),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            log: None,
        })
    }

    /// Like [`RecordingTransaction::new`], also writing to `log` as `label.call`.
    #[must_use]
    pub fn logged(label: impl Into<String>, xa: bool, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            core: TransactionCore::new(xa),
            label: label.into(),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            log: Some(log.clone()),
        })
    }

    /// An active transaction, as if a connector had already started it.
    #[must_use]
    pub fn begun(label: impl Into<String>, xa: bool) -> Arc<Self> {
        let tx = Self::new(label, xa);
        let began = tx.begin();
        debug_assert!(began.is_ok(), "fresh transaction must begin");
        tx
    }

    #[must_use]
    pub fn begun_local() -> Arc<Self> {
        Self::begun("ambient", false)
    }

    #[must_use]
    pub fn begun_xa() -> Arc<Self> {
        Self::begun("ambient-xa", true)
    }

    /// Makes every later `call` fail with a resource error.
    pub fn fail_on(&self, call: TxCall) {
        self.failing.lock().push(call);
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn calls(&self) -> Vec<TxCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn count(&self, call: TxCall) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.count(TxCall::Commit)
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.count(TxCall::Rollback)
    }

    #[must_use]
    pub fn suspends(&self) -> usize {
        self.count(TxCall::Suspend)
    }

    #[must_use]
    pub fn resumes(&self) -> usize {
        self.count(TxCall::Resume)
    }

    /// Type-erased handle to this transaction.
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> TxHandle {
        Arc::clone(self) as TxHandle
    }

    fn record(&self, call: TxCall) -> Result<(), TransactionError> {
        self.calls.lock().push(call);
        if let Some(log) = &self.log {
            log.push(format!("{}.{}", self.label, call.as_str()));
        }
        if self.failing.lock().contains(&call) {
            return Err(TransactionError::Resource {
                id: self.id(),
                operation: call.as_str(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl Transaction for RecordingTransaction {
    fn core(&self) -> &TransactionCore {
        &self.core
    }

    fn do_begin(&self) -> Result<(), TransactionError> {
        self.record(TxCall::Begin)
    }

    fn do_commit(&self) -> Result<(), TransactionError> {
        self.record(TxCall::Commit)
    }

    fn do_rollback(&self) -> Result<(), TransactionError> {
        self.record(TxCall::Rollback)
    }

    fn do_suspend(&self) -> Result<(), TransactionError> {
        self.record(TxCall::Suspend)
    }

    fn do_resume(&self) -> Result<(), TransactionError> {
        self.record(TxCall::Resume)
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Factory handing out [`RecordingTransaction`]s.
///
/// Queued transactions are returned first; after that a fresh one labelled
/// `new-<n>` is created per call.
#[derive(Debug, Default)]
pub struct StaticFactory {
    xa: bool,
    queue: Mutex<VecDeque<Arc<RecordingTransaction>>>,
    created: Mutex<Vec<Arc<RecordingTransaction>>>,
    failure: Option<String>,
    log: Option<CallLog>,
    begins: AtomicUsize,
    untransacted: bool,
}

impl StaticFactory {
    #[must_use]
    pub fn new(xa: bool) -> Self {
        Self {
            xa,
            ..Self::default()
        }
    }

    /// Returns exactly these transactions, in order, before creating fresh ones.
    #[must_use]
    pub fn returning(txs: impl IntoIterator<Item = Arc<RecordingTransaction>>) -> Self {
        Self {
            queue: Mutex::new(txs.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every `begin` fails with a factory error.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    /// Reports itself as not transacted, so templates never call `begin`.
    #[must_use]
    pub fn untransacted(mut self) -> Self {
        self.untransacted = true;
        self
    }

    /// Transactions handed out so far.
    #[must_use]
    pub fn created(&self) -> Vec<Arc<RecordingTransaction>> {
        self.created.lock().clone()
    }

    /// The most recent transaction handed out.
    #[must_use]
    pub fn last(&self) -> Option<Arc<RecordingTransaction>> {
        self.created.lock().last().cloned()
    }

    #[must_use]
    pub fn begin_count(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }
}

impl TransactionFactory for StaticFactory {
    fn is_transacted(&self) -> bool {
        !self.untransacted
    }

    fn begin(&self, _ctx: &RuntimeContext) -> Result<TxHandle, TransactionError> {
        let n = self.begins.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.failure {
            return Err(TransactionError::Factory {
                reason: reason.clone(),
            });
        }
        let tx = match self.queue.lock().pop_front() {
            Some(tx) => tx,
            None => match &self.log {
                Some(log) => RecordingTransaction::logged(format!("new-{n}"), self.xa, log),
                None => RecordingTransaction::new(format!("new-{n}"), self.xa),
            },
        };
        tx.begin()?;
        self.created.lock().push(Arc::clone(&tx));
        Ok(tx.handle())
    }
}

/// Factory that can also adopt an externally managed transaction.
#[derive(Debug, Default)]
pub struct ExternalFactory {
    inner: StaticFactory,
    external: Mutex<Option<TxHandle>>,
    failure: Option<String>,
    joins: AtomicUsize,
}

impl ExternalFactory {
    /// Factory whose external manager currently runs `external`.
    #[must_use]
    pub fn with_external(external: TxHandle) -> Self {
        Self {
            external: Mutex::new(Some(external)),
            ..Self::default()
        }
    }

    /// Factory whose external manager has no transaction.
    #[must_use]
    pub fn without_external() -> Self {
        Self::default()
    }

    /// Every join attempt fails.
    #[must_use]
    pub fn failing_join(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    /// Local factory used for `begin`.
    #[must_use]
    pub fn local(&self) -> &StaticFactory {
        &self.inner
    }
}

impl TransactionFactory for ExternalFactory {
    fn begin(&self, ctx: &RuntimeContext) -> Result<TxHandle, TransactionError> {
        self.inner.begin(ctx)
    }

    fn as_external_aware(&self) -> Option<&dyn ExternalTransactionAwareFactory> {
        Some(self)
    }
}

impl ExternalTransactionAwareFactory for ExternalFactory {
    fn join_external(&self, _ctx: &RuntimeContext) -> Result<Option<TxHandle>, TransactionError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.failure {
            return Err(TransactionError::Factory {
                reason: reason.clone(),
            });
        }
        Ok(self.external.lock().clone())
    }
}

// ---------------------------------------------------------------------------
// RecordingHandler
// ---------------------------------------------------------------------------

/// What a [`RecordingHandler`] saw for one failure.
#[derive(Debug, Clone, PartialEq)]
pub struct HandledFailure {
    pub kind: FailureKind,
    pub processor: String,
    pub event: MessageEvent,
    pub caused_rollback: bool,
}

/// Exception handler that records each call and answers with a fixed payload.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    reply: Option<Value>,
    handled: Mutex<Vec<HandledFailure>>,
    log: Option<CallLog>,
}

impl RecordingHandler {
    /// Returns the failure's event unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ambient event with `payload`.
    #[must_use]
    pub fn replying(payload: impl Into<Value>) -> Self {
        Self {
            reply: Some(payload.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    #[must_use]
    pub fn handled(&self) -> Vec<HandledFailure> {
        self.handled.lock().clone()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.handled.lock().len()
    }
}

impl ExceptionHandler for RecordingHandler {
    fn handle(&self, failure: &ProcessingFailure, event: &MessageEvent) -> MessageEvent {
        self.handled.lock().push(HandledFailure {
            kind: failure.kind().clone(),
            processor: failure.processor().to_string(),
            event: event.clone(),
            caused_rollback: failure.caused_rollback(),
        });
        if let Some(log) = &self.log {
            log.push(format!("handler:{}", failure.kind()));
        }
        match &self.reply {
            Some(payload) => event.with_payload(payload.clone()),
            None => failure.event().clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingListener
// ---------------------------------------------------------------------------

/// Listener that renders each notification as `pre:<processor>` or
/// `post:<processor>:<ok|kind>`.
#[derive(Debug, Default)]
pub struct RecordingListener {
    seen: Mutex<Vec<String>>,
    fail: bool,
    log: Option<CallLog>,
}

impl RecordingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records, then returns an error from every notification.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    #[must_use]
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl NotificationListener for RecordingListener {
    fn on_notification(&self, notification: &ExecutionNotification<'_>) -> anyhow::Result<()> {
        let entry = match notification {
            ExecutionNotification::PreInvoke { processor, .. } => format!("pre:{processor}"),
            ExecutionNotification::PostInvoke {
                processor, failure, ..
            } => match failure {
                Some(failure) => format!("post:{processor}:{}", failure.kind()),
                None => format!("post:{processor}:ok"),
            },
        };
        if let Some(log) = &self.log {
            log.push(entry.clone());
        }
        self.seen.lock().push(entry);
        if self.fail {
            anyhow::bail!("listener refused notification");
        }
        Ok(())
    }
}
