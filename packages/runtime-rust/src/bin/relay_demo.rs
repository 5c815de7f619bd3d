//! `relay-demo`: runs one execution template against in-memory transactions
//! and prints the resulting journal as JSON.
//!
//! ```bash
//! relay-demo
//! relay-demo --ambient xa --template '{"action":"ALWAYS_BEGIN","factory":"memory"}'
//! relay-demo --fail-with routing \
//!     --template '{"action":"always-begin","factory":"memory","commit_filter":"routing"}'
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use relay_core::{
    ExecutionNotification, FailureKind, Fault, MessageEvent, NotificationListener,
    ProcessingFailure, RuntimeContext, Transaction, TransactionAction, TransactionCore,
    TransactionError, TransactionFactory, TxHandle, Value,
};
use relay_runtime::{
    FactoryRegistry, LogFormat, RuntimeConfig, TemplateConfig, TransactionRegistry, WorkerContext,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// In-memory resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

#[derive(Debug)]
struct MemoryTransaction {
    core: TransactionCore,
    label: String,
    journal: Journal,
}

impl MemoryTransaction {
    fn new(label: String, xa: bool, journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            core: TransactionCore::new(xa),
            label,
            journal,
        })
    }

    fn note(&self, operation: &str) -> Result<(), TransactionError> {
        self.journal.push(format!("{}.{operation}", self.label));
        Ok(())
    }
}

impl Transaction for MemoryTransaction {
    fn core(&self) -> &TransactionCore {
        &self.core
    }

    fn do_begin(&self) -> Result<(), TransactionError> {
        self.note("begin")
    }

    fn do_commit(&self) -> Result<(), TransactionError> {
        self.note("commit")
    }

    fn do_rollback(&self) -> Result<(), TransactionError> {
        self.note("rollback")
    }

    fn do_suspend(&self) -> Result<(), TransactionError> {
        self.note("suspend")
    }

    fn do_resume(&self) -> Result<(), TransactionError> {
        self.note("resume")
    }
}

#[derive(Debug)]
struct MemoryFactory {
    name: &'static str,
    xa: bool,
    journal: Journal,
    next: AtomicUsize,
}

impl MemoryFactory {
    fn new(name: &'static str, xa: bool, journal: Journal) -> Self {
        Self {
            name,
            xa,
            journal,
            next: AtomicUsize::new(0),
        }
    }
}

impl TransactionFactory for MemoryFactory {
    fn begin(&self, _ctx: &RuntimeContext) -> Result<TxHandle, TransactionError> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let label = format!("{}-{n}", self.name);
        let tx = MemoryTransaction::new(label, self.xa, self.journal.clone());
        tx.begin()?;
        Ok(tx as TxHandle)
    }
}

#[derive(Debug)]
struct JournalListener(Journal);

impl NotificationListener for JournalListener {
    fn on_notification(&self, notification: &ExecutionNotification<'_>) -> Result<()> {
        let entry = match notification {
            ExecutionNotification::PreInvoke { processor, .. } => format!("pre:{processor}"),
            ExecutionNotification::PostInvoke {
                processor,
                failure: None,
                ..
            } => format!("post:{processor}:ok"),
            ExecutionNotification::PostInvoke {
                processor,
                failure: Some(failure),
                ..
            } => format!("post:{processor}:{}", failure.kind()),
        };
        self.0.push(entry);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Report {
    node_id: String,
    template: TemplateConfig,
    outcome: String,
    payload: Option<Value>,
    journal: Vec<String>,
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let config = RuntimeConfig::parse();
    init_logging(&config);

    let journal = Journal::default();
    let runtime = config
        .runtime()
        .with_listener(Arc::new(JournalListener(journal.clone())));

    let factories = FactoryRegistry::new();
    for (name, xa) in [("memory", false), ("memory-xa", true)] {
        factories.register(name, Arc::new(MemoryFactory::new(name, xa, journal.clone())));
    }

    let template_config = match &config.template {
        Some(json) => TemplateConfig::from_json(json).context("invalid --template")?,
        None => TemplateConfig {
            action: TransactionAction::BeginOrJoin,
            factory: Some("memory".to_string()),
            ..TemplateConfig::default()
        },
    };

    let handler_journal = journal.clone();
    let handler = Arc::new(move |failure: &ProcessingFailure, event: &MessageEvent| {
        handler_journal.push(format!("handler:{}", failure.kind()));
        event.clone().with_property("failure", failure.kind().as_str().to_string())
    });
    let template = template_config
        .build(&runtime, &factories, handler)
        .context("building execution template")?;

    let registry = Arc::new(TransactionRegistry::new());
    let mut worker = registry.attach();
    bind_ambient(config.ambient.as_deref(), &mut worker, &journal)?;

    let event = MessageEvent::new("demo", "payload");
    let fail_with = config.fail_with.clone().map(FailureKind::new);
    tracing::info!(node = %runtime.node_id, action = %template_config.action, "running scenario");

    let result = template.execute(&mut worker, &event, |w| {
        let current = w
            .current()
            .map_or_else(|| "none".to_string(), |tx| tx.id().to_string());
        journal.push(format!("callback:tx={current}"));
        match fail_with {
            Some(kind) => Err(Fault::msg(kind, "demo failure").into()),
            None => Ok(event.with_payload("processed")),
        }
    });

    finish_ambient(&mut worker, &journal)?;

    let (outcome, payload) = match result {
        Ok(out) => ("ok".to_string(), Some(out.payload)),
        Err(err) => {
            tracing::warn!(error = %err, "scenario failed");
            (err.to_string(), err.failure().map(|f| f.event().payload.clone()))
        }
    };
    let report = Report {
        node_id: runtime.node_id.clone(),
        template: template_config,
        outcome,
        payload,
        journal: journal.entries(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_logging(config: &RuntimeConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn bind_ambient(kind: Option<&str>, worker: &mut WorkerContext, journal: &Journal) -> Result<()> {
    let xa = match kind {
        None => return Ok(()),
        Some("local") => false,
        Some("xa") => true,
        Some(other) => bail!("unknown ambient kind `{other}` (expected `local` or `xa`)"),
    };
    let tx = MemoryTransaction::new("ambient".to_string(), xa, journal.clone());
    tx.begin()?;
    worker.bind(tx)?;
    Ok(())
}

/// Resolves whatever the scenario left bound, as the enclosing scope would.
fn finish_ambient(worker: &mut WorkerContext, journal: &Journal) -> Result<()> {
    let Some(tx) = worker.current() else {
        return Ok(());
    };
    worker.unbind(&tx)?;
    if tx.status().is_terminal() {
        return Ok(());
    }
    if tx.is_rollback_only() {
        tx.rollback()?;
    } else {
        tx.commit()?;
    }
    journal.push("ambient scope closed");
    Ok(())
}
