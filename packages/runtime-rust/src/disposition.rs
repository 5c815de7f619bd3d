//! Commit-or-rollback decision for a failed execution.

use std::fmt;

use relay_core::{FailureKind, KindError, KindFilter, KindHierarchy, TransactionPolicy};

/// What to do with a transaction after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    Rollback,
    Commit,
    /// Leave the transaction for another scope to resolve.
    None,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rollback => "rollback",
            Self::Commit => "commit",
            Self::None => "none",
        })
    }
}

/// Rollback and commit filters compiled once per template.
#[derive(Debug, Clone, Default)]
pub struct DispositionResolver {
    rollback: Option<KindFilter>,
    commit: Option<KindFilter>,
}

impl DispositionResolver {
    /// # Errors
    ///
    /// Returns [`KindError::InvalidPattern`] if either filter does not compile.
    pub fn compile(
        rollback: Option<&str>,
        commit: Option<&str>,
        kinds: &KindHierarchy,
    ) -> Result<Self, KindError> {
        Ok(Self {
            rollback: rollback.map(|f| KindFilter::compile(f, kinds)).transpose()?,
            commit: commit.map(|f| KindFilter::compile(f, kinds)).transpose()?,
        })
    }

    /// # Errors
    ///
    /// Returns [`KindError::InvalidPattern`] if a policy filter does not compile.
    pub fn for_policy(
        policy: &TransactionPolicy,
        kinds: &KindHierarchy,
    ) -> Result<Self, KindError> {
        Self::compile(policy.rollback_filter(), policy.commit_filter(), kinds)
    }

    #[must_use]
    pub fn has_filters(&self) -> bool {
        self.rollback.is_some() || self.commit.is_some()
    }

    /// Decides the disposition for a failure of `kind`.
    ///
    /// A matching rollback filter wins, then a rollback-only mark, then a
    /// matching commit filter. Without any filter the answer is rollback;
    /// with filters that do not match it is [`Disposition::None`].
    #[must_use]
    pub fn resolve(&self, kind: &FailureKind, rollback_only: bool) -> Disposition {
        if self.rollback.as_ref().is_some_and(|f| f.matches(kind)) {
            return Disposition::Rollback;
        }
        if rollback_only {
            return Disposition::Rollback;
        }
        if self.commit.as_ref().is_some_and(|f| f.matches(kind)) {
            return Disposition::Commit;
        }
        if self.has_filters() {
            Disposition::None
        } else {
            Disposition::Rollback
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn resolver(rollback: Option<&str>, commit: Option<&str>) -> DispositionResolver {
        DispositionResolver::compile(rollback, commit, &KindHierarchy::builtin()).unwrap()
    }

    #[test]
    fn no_filters_rolls_back() {
        let r = resolver(None, None);
        assert_eq!(r.resolve(&FailureKind::ROUTING, false), Disposition::Rollback);
    }

    #[test]
    fn rollback_filter_wins_over_commit_filter() {
        let r = resolver(Some("routing"), Some("processing+"));
        assert_eq!(r.resolve(&FailureKind::ROUTING, false), Disposition::Rollback);
        assert_eq!(
            r.resolve(&FailureKind::CONNECTIVITY, false),
            Disposition::Commit
        );
    }

    #[test]
    fn rollback_only_beats_commit_filter() {
        let r = resolver(None, Some("*"));
        assert_eq!(r.resolve(&FailureKind::ROUTING, true), Disposition::Rollback);
        assert_eq!(r.resolve(&FailureKind::ROUTING, false), Disposition::Commit);
    }

    #[test]
    fn unmatched_filters_leave_transaction_alone() {
        let r = resolver(Some("security"), Some("transformation"));
        assert_eq!(r.resolve(&FailureKind::ROUTING, false), Disposition::None);
    }

    #[test]
    fn hierarchy_pattern_covers_descendants() {
        let r = resolver(Some("transaction+"), None);
        assert_eq!(
            r.resolve(&FailureKind::TRANSACTION_LIFECYCLE, false),
            Disposition::Rollback
        );
        assert_eq!(r.resolve(&FailureKind::ROUTING, false), Disposition::None);
    }

    #[test]
    fn root_pattern_rolls_back_custom_kinds() {
        let r = resolver(Some("failure+"), Some("routing"));
        assert_eq!(
            r.resolve(&FailureKind::new("billing.declined"), false),
            Disposition::Rollback
        );
    }

    #[test]
    fn invalid_filter_is_rejected_at_compile() {
        let err =
            DispositionResolver::compile(Some("rout+ing"), None, &KindHierarchy::builtin())
                .unwrap_err();
        assert!(matches!(err, KindError::InvalidPattern { .. }));
    }

    proptest! {
        #[test]
        fn rollback_filter_match_never_commits(
            name in "[a-z]{1,8}",
            rollback_only in any::<bool>(),
            commit_all in any::<bool>(),
        ) {
            let commit = commit_all.then_some("*");
            let r = resolver(Some(name.as_str()), commit);
            let kind = FailureKind::new(name.clone());
            prop_assert_eq!(r.resolve(&kind, rollback_only), Disposition::Rollback);
        }

        #[test]
        fn rollback_only_never_commits(
            name in "[a-z]{1,8}",
            commit_all in any::<bool>(),
        ) {
            let r = resolver(None, commit_all.then_some("*"));
            prop_assert_eq!(r.resolve(&FailureKind::new(name), true), Disposition::Rollback);
        }
    }
}
