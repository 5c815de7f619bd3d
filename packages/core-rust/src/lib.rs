//! Relay core: message events, failure kinds, transactions and policies.

pub mod context;
pub mod error;
pub mod failure;
pub mod kind;
pub mod policy;
pub mod traits;
pub mod transaction;
pub mod types;

pub use context::RuntimeContext;
pub use error::{ExecutionError, IllegalTransactionState, PolicyError, TransactionError};
pub use failure::{CallbackError, Cause, Fault, PanicError, ProcessingFailure};
pub use kind::{FailureKind, KindError, KindFilter, KindHierarchy, KindPattern};
pub use policy::{
    ExternalTransactionAwareFactory, TransactionAction, TransactionFactory, TransactionPolicy,
    UnknownAction,
};
pub use traits::{
    DefaultExceptionHandler, ExceptionHandler, ExecutionNotification, NotificationListener,
};
pub use transaction::{
    same_transaction, ResourceHandle, Transaction, TransactionCore, TransactionStatus, TxHandle,
};
pub use types::{MessageEvent, Value};
