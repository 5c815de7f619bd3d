//! Transaction abstraction.
//!
//! [`Transaction`] is implemented by connectors (JMS session, JDBC-style
//! connection, XA branch, ...). Implementors embed a [`TransactionCore`] and
//! supply the `do_*` hooks; the provided methods enforce the state machine:
//!
//! ```text
//! NotStarted --begin--> Active --commit---> Committed
//!                       |  ^   --rollback-> RolledBack
//!               suspend |  | resume
//!                       v  |
//!                     Suspended --rollback-> RolledBack
//! ```
//!
//! The rollback-only flag is monotonic: once set it is never cleared.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::TransactionError;

/// Shared handle to a transaction. Identity is `Arc::ptr_eq`.
pub type TxHandle = Arc<dyn Transaction>;

/// Opaque handle to a resource enlisted in a transaction.
pub type ResourceHandle = Arc<dyn Any + Send + Sync>;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    NotStarted,
    Active,
    Suspended,
    Committed,
    RolledBack,
}

impl TransactionStatus {
    /// Committed or rolled back.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TransactionCore
// ---------------------------------------------------------------------------

/// State shared by every transaction implementation.
pub struct TransactionCore {
    id: Uuid,
    xa: bool,
    status: Mutex<TransactionStatus>,
    rollback_only: AtomicBool,
    resources: DashMap<String, ResourceHandle>,
}

impl TransactionCore {
    /// Creates the state of a transaction that has not begun yet.
    #[must_use]
    pub fn new(xa: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            xa,
            status: Mutex::new(TransactionStatus::NotStarted),
            rollback_only: AtomicBool::new(false),
            resources: DashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn is_xa(&self) -> bool {
        self.xa
    }

    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::Acquire)
    }

    pub fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::Release);
    }

    /// Runs `hook` if the transaction is in one of `from`, then moves to `to`.
    ///
    /// The status lock is not held while the hook runs, so hooks may query
    /// the transaction. A failing hook leaves the status unchanged.
    ///
    /// # Errors
    ///
    /// [`TransactionError::InvalidTransition`] when the current status is not
    /// in `from`; otherwise whatever the hook returns.
    pub fn transition(
        &self,
        operation: &'static str,
        from: &[TransactionStatus],
        to: TransactionStatus,
        hook: impl FnOnce() -> Result<(), TransactionError>,
    ) -> Result<(), TransactionError> {
        let status = self.status();
        if !from.contains(&status) {
            return Err(TransactionError::InvalidTransition {
                id: self.id,
                operation,
                status,
            });
        }
        hook()?;
        *self.status.lock() = to;
        tracing::debug!(
            tx = %self.id,
            operation,
            from = %status,
            to = %to,
            "transaction transition"
        );
        Ok(())
    }

    fn bind_resource(&self, key: String, resource: ResourceHandle) -> Result<(), TransactionError> {
        match self.resources.entry(key) {
            Entry::Occupied(entry) => Err(TransactionError::ResourceAlreadyBound {
                id: self.id,
                key: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(resource);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for TransactionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCore")
            .field("id", &self.id)
            .field("xa", &self.xa)
            .field("status", &self.status())
            .field("rollback_only", &self.is_rollback_only())
            .field("resources", &self.resources.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A unit of work over one or more resources.
///
/// Used as [`TxHandle`] (`Arc<dyn Transaction>`); all methods take `&self`.
pub trait Transaction: Send + Sync + fmt::Debug {
    /// Shared state backing the provided methods.
    fn core(&self) -> &TransactionCore;

    /// Starts the unit of work on the underlying resource.
    fn do_begin(&self) -> Result<(), TransactionError> {
        Ok(())
    }

    /// Makes the work durable.
    fn do_commit(&self) -> Result<(), TransactionError>;

    /// Discards the work.
    fn do_rollback(&self) -> Result<(), TransactionError>;

    /// Detaches the resource from the current worker (XA only).
    fn do_suspend(&self) -> Result<(), TransactionError> {
        Ok(())
    }

    /// Re-attaches a suspended resource (XA only).
    fn do_resume(&self) -> Result<(), TransactionError> {
        Ok(())
    }

    fn id(&self) -> Uuid {
        self.core().id()
    }

    fn is_xa(&self) -> bool {
        self.core().is_xa()
    }

    fn status(&self) -> TransactionStatus {
        self.core().status()
    }

    fn is_rollback_only(&self) -> bool {
        self.core().is_rollback_only()
    }

    fn set_rollback_only(&self) {
        self.core().set_rollback_only();
    }

    /// # Errors
    ///
    /// Fails unless the transaction has not started, or if the hook fails.
    fn begin(&self) -> Result<(), TransactionError> {
        self.core().transition(
            "begin",
            &[TransactionStatus::NotStarted],
            TransactionStatus::Active,
            || self.do_begin(),
        )
    }

    /// # Errors
    ///
    /// Fails if the transaction is rollback-only, not active, or the hook fails.
    fn commit(&self) -> Result<(), TransactionError> {
        if self.is_rollback_only() {
            return Err(TransactionError::RollbackOnly { id: self.id() });
        }
        self.core().transition(
            "commit",
            &[TransactionStatus::Active],
            TransactionStatus::Committed,
            || self.do_commit(),
        )
    }

    /// # Errors
    ///
    /// Fails if the transaction is neither active nor suspended, or the hook fails.
    fn rollback(&self) -> Result<(), TransactionError> {
        self.core().transition(
            "rollback",
            &[TransactionStatus::Active, TransactionStatus::Suspended],
            TransactionStatus::RolledBack,
            || self.do_rollback(),
        )
    }

    /// # Errors
    ///
    /// Fails for non-XA transactions, when not active, or if the hook fails.
    fn suspend(&self) -> Result<(), TransactionError> {
        if !self.is_xa() {
            return Err(TransactionError::SuspendNotSupported { id: self.id() });
        }
        self.core().transition(
            "suspend",
            &[TransactionStatus::Active],
            TransactionStatus::Suspended,
            || self.do_suspend(),
        )
    }

    /// # Errors
    ///
    /// Fails when not suspended, or if the hook fails.
    fn resume(&self) -> Result<(), TransactionError> {
        self.core().transition(
            "resume",
            &[TransactionStatus::Suspended],
            TransactionStatus::Active,
            || self.do_resume(),
        )
    }

    /// Enlists `resource` under `key`.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active or `key` is already bound.
    fn bind_resource(&self, key: &str, resource: ResourceHandle) -> Result<(), TransactionError> {
        let status = self.status();
        if status != TransactionStatus::Active {
            return Err(TransactionError::InvalidTransition {
                id: self.id(),
                operation: "bind resource",
                status,
            });
        }
        self.core().bind_resource(key.to_string(), resource)
    }

    fn resource(&self, key: &str) -> Option<ResourceHandle> {
        self.core().resources.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn has_resource(&self, key: &str) -> bool {
        self.core().resources.contains_key(key)
    }
}

/// Whether two handles refer to the same transaction instance.
#[must_use]
pub fn same_transaction(a: &TxHandle, b: &TxHandle) -> bool {
    Arc::ptr_eq(a, b)
}
