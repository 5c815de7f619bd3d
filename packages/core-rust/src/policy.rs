//! Transaction policies and the factories that back them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RuntimeContext;
use crate::error::{PolicyError, TransactionError};
use crate::transaction::TxHandle;

// ---------------------------------------------------------------------------
// TransactionAction
// ---------------------------------------------------------------------------

/// How a processing unit relates to the ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionAction {
    /// Run without a transaction. A local ambient transaction is resolved when
    /// the unit finishes; an XA one is suspended for its duration.
    None,
    /// Always begin a new transaction.
    AlwaysBegin,
    /// Require an ambient transaction and join it.
    AlwaysJoin,
    /// Join the ambient transaction, or begin one if there is none.
    BeginOrJoin,
    /// Join the ambient transaction if there is one.
    JoinIfPossible,
    /// Fail if an ambient transaction exists.
    Never,
    /// Leave whatever is bound untouched.
    Indifferent,
}

impl TransactionAction {
    pub const ALL: [TransactionAction; 7] = [
        Self::None,
        Self::AlwaysBegin,
        Self::AlwaysJoin,
        Self::BeginOrJoin,
        Self::JoinIfPossible,
        Self::Never,
        Self::Indifferent,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::AlwaysBegin => "ALWAYS_BEGIN",
            Self::AlwaysJoin => "ALWAYS_JOIN",
            Self::BeginOrJoin => "BEGIN_OR_JOIN",
            Self::JoinIfPossible => "JOIN_IF_POSSIBLE",
            Self::Never => "NEVER",
            Self::Indifferent => "INDIFFERENT",
        }
    }

    /// Whether a new transaction must be started given the ambient state.
    #[must_use]
    pub fn must_begin(self, ambient_present: bool) -> bool {
        match self {
            Self::AlwaysBegin => true,
            Self::BeginOrJoin => !ambient_present,
            _ => false,
        }
    }

    /// Whether this action can ever start a transaction (and so needs a factory).
    #[must_use]
    pub fn may_begin(self) -> bool {
        matches!(self, Self::AlwaysBegin | Self::BeginOrJoin)
    }

    /// Whether an ambient transaction present at entry is joined, and so
    /// receives failure dispositions in place.
    #[must_use]
    pub fn joins(self) -> bool {
        matches!(self, Self::AlwaysJoin | Self::BeginOrJoin | Self::JoinIfPossible)
    }

    /// Whether an ambient transaction must be set aside (suspended if XA,
    /// detached and resolved otherwise) before the unit runs.
    #[must_use]
    pub fn displaces_ambient(self) -> bool {
        matches!(self, Self::None | Self::AlwaysBegin)
    }
}

impl fmt::Display for TransactionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error from parsing an unknown action name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transaction action `{0}`")]
pub struct UnknownAction(pub String);

impl FromStr for TransactionAction {
    type Err = UnknownAction;

    /// Accepts `ALWAYS_BEGIN`, `always-begin`, `always_begin` and similar.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Creates transactions for one kind of resource. Supplied by connectors.
pub trait TransactionFactory: Send + Sync + fmt::Debug {
    /// Creates and begins a new transaction. The caller binds it.
    ///
    /// # Errors
    ///
    /// Returns a [`TransactionError`] if the resource refuses to start work.
    fn begin(&self, ctx: &RuntimeContext) -> Result<TxHandle, TransactionError>;

    /// Whether transactions from this factory actually guard work. When it
    /// returns `false`, templates never begin a transaction from it and run
    /// the unit as if none were needed.
    fn is_transacted(&self) -> bool {
        true
    }

    /// Downcast hook for factories that can join external transactions.
    fn as_external_aware(&self) -> Option<&dyn ExternalTransactionAwareFactory> {
        None
    }
}

/// A factory able to adopt a transaction started outside the runtime
/// (for example by an application server's transaction manager).
pub trait ExternalTransactionAwareFactory: TransactionFactory {
    /// Returns the external transaction for the current worker, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`TransactionError`] if the external manager cannot be queried.
    fn join_external(&self, ctx: &RuntimeContext) -> Result<Option<TxHandle>, TransactionError>;
}

// ---------------------------------------------------------------------------
// TransactionPolicy
// ---------------------------------------------------------------------------

/// Immutable description of a processing unit's transactional behavior.
#[derive(Debug, Clone)]
pub struct TransactionPolicy {
    action: TransactionAction,
    factory: Option<Arc<dyn TransactionFactory>>,
    interact_with_external: bool,
    rollback_filter: Option<String>,
    commit_filter: Option<String>,
}

impl TransactionPolicy {
    #[must_use]
    pub fn new(action: TransactionAction) -> Self {
        Self {
            action,
            factory: None,
            interact_with_external: false,
            rollback_filter: None,
            commit_filter: None,
        }
    }

    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn TransactionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    #[must_use]
    pub fn interact_with_external(mut self, enabled: bool) -> Self {
        self.interact_with_external = enabled;
        self
    }

    /// Failure kinds that roll the transaction back (kind filter syntax).
    #[must_use]
    pub fn rollback_on(mut self, filter: impl Into<String>) -> Self {
        self.rollback_filter = Some(filter.into());
        self
    }

    /// Failure kinds that commit the transaction despite the failure.
    #[must_use]
    pub fn commit_on(mut self, filter: impl Into<String>) -> Self {
        self.commit_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn action(&self) -> TransactionAction {
        self.action
    }

    #[must_use]
    pub fn factory(&self) -> Option<&Arc<dyn TransactionFactory>> {
        self.factory.as_ref()
    }

    #[must_use]
    pub fn interacts_with_external(&self) -> bool {
        self.interact_with_external
    }

    #[must_use]
    pub fn rollback_filter(&self) -> Option<&str> {
        self.rollback_filter.as_deref()
    }

    #[must_use]
    pub fn commit_filter(&self) -> Option<&str> {
        self.commit_filter.as_deref()
    }

    /// Checks that the policy can back a template.
    ///
    /// # Errors
    ///
    /// [`PolicyError::MissingFactory`] when the action may begin a transaction
    /// without a factory; [`PolicyError::ExternalWithoutFactory`] when external
    /// interaction is requested without a factory.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.factory.is_none() {
            if self.action.may_begin() {
                return Err(PolicyError::MissingFactory {
                    action: self.action,
                });
            }
            if self.interact_with_external {
                return Err(PolicyError::ExternalWithoutFactory);
            }
        }
        Ok(())
    }
}

impl Default for TransactionPolicy {
    /// `INDIFFERENT`: leave the ambient transaction alone.
    fn default() -> Self {
        Self::new(TransactionAction::Indifferent)
    }
}
