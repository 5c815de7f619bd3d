//! Counters published through the `metrics` facade.
//!
//! Nothing is recorded unless the embedding application installs a recorder.

pub const TRANSACTIONS_BEGUN: &str = "relay_transactions_begun_total";
pub const TRANSACTIONS_COMMITTED: &str = "relay_transactions_committed_total";
pub const TRANSACTIONS_ROLLED_BACK: &str = "relay_transactions_rolled_back_total";
pub const EXECUTIONS: &str = "relay_executions_total";

pub fn transaction_begun() {
    ::metrics::counter!(TRANSACTIONS_BEGUN).increment(1);
}

pub fn transaction_committed() {
    ::metrics::counter!(TRANSACTIONS_COMMITTED).increment(1);
}

pub fn transaction_rolled_back() {
    ::metrics::counter!(TRANSACTIONS_ROLLED_BACK).increment(1);
}

/// Counts one template execution by outcome: `ok`, `absorbed`, `failed`,
/// `fatal`, `illegal-state` or `lifecycle`.
pub fn execution(outcome: &'static str) {
    ::metrics::counter!(EXECUTIONS, "outcome" => outcome).increment(1);
}
