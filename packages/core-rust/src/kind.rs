//! Failure kinds and the patterns used to classify them.
//!
//! Every failure raised inside a flow carries a [`FailureKind`]: a dotted,
//! lower-case name such as `routing` or `transaction.lifecycle`. Kinds form a
//! tree described by a [`KindHierarchy`], rooted at [`FailureKind::FAILURE`].
//!
//! A [`KindFilter`] is a comma-separated list of patterns compiled against a
//! hierarchy snapshot. Three pattern styles are supported:
//!
//! | Pattern        | Matches                                          |
//! |----------------|--------------------------------------------------|
//! | `routing`      | exactly `routing`                                |
//! | `transaction*` | any kind whose name matches the wildcard         |
//! | `processing+`  | `processing` and every kind below it in the tree |
//!
//! A lone `*` matches every kind.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

/// Tag identifying the category of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailureKind(Cow<'static, str>);

impl FailureKind {
    /// Root of the hierarchy. Every kind descends from it.
    pub const FAILURE: FailureKind = FailureKind(Cow::Borrowed("failure"));
    /// Generic message-processing failure.
    pub const PROCESSING: FailureKind = FailureKind(Cow::Borrowed("processing"));
    /// A router could not deliver or select a route.
    pub const ROUTING: FailureKind = FailureKind(Cow::Borrowed("routing"));
    /// A transformer could not convert the payload.
    pub const TRANSFORMATION: FailureKind = FailureKind(Cow::Borrowed("transformation"));
    /// A connector lost or could not establish its connection.
    pub const CONNECTIVITY: FailureKind = FailureKind(Cow::Borrowed("connectivity"));
    /// Authentication or authorization was refused.
    pub const SECURITY: FailureKind = FailureKind(Cow::Borrowed("security"));
    /// Parent of all transaction-management failures.
    pub const TRANSACTION: FailureKind = FailureKind(Cow::Borrowed("transaction"));
    /// Policy and ambient transaction state do not agree.
    pub const ILLEGAL_TRANSACTION_STATE: FailureKind =
        FailureKind(Cow::Borrowed("transaction.illegal-state"));
    /// begin/commit/rollback/suspend/resume failed.
    pub const TRANSACTION_LIFECYCLE: FailureKind =
        FailureKind(Cow::Borrowed("transaction.lifecycle"));
    /// The callback panicked.
    pub const FATAL: FailureKind = FailureKind(Cow::Borrowed("fatal"));

    /// Creates a kind from its name.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The kind's name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from building a hierarchy or compiling a filter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KindError {
    #[error("unknown parent kind `{parent}` for `{kind}`")]
    UnknownParent { kind: String, parent: String },
    #[error("kind `{kind}` is already registered under `{existing}`")]
    Conflict { kind: String, existing: String },
    #[error("invalid kind pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

// ---------------------------------------------------------------------------
// KindHierarchy
// ---------------------------------------------------------------------------

/// Parent table for failure kinds.
///
/// Built once at startup and shared read-only afterwards. Kinds that were
/// never registered are treated as direct children of the root.
#[derive(Debug, Clone)]
pub struct KindHierarchy {
    /// child name -> parent name. The root has no entry.
    parents: HashMap<String, String>,
}

impl KindHierarchy {
    /// Hierarchy containing only the root kind.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            parents: HashMap::new(),
        }
    }

    /// Hierarchy with the built-in kinds registered.
    #[must_use]
    pub fn builtin() -> Self {
        let mut parents = HashMap::new();
        let root = FailureKind::FAILURE.as_str();
        for kind in [
            &FailureKind::PROCESSING,
            &FailureKind::SECURITY,
            &FailureKind::TRANSACTION,
            &FailureKind::FATAL,
        ] {
            parents.insert(kind.as_str().to_string(), root.to_string());
        }
        for kind in [
            &FailureKind::ROUTING,
            &FailureKind::TRANSFORMATION,
            &FailureKind::CONNECTIVITY,
        ] {
            parents.insert(
                kind.as_str().to_string(),
                FailureKind::PROCESSING.as_str().to_string(),
            );
        }
        for kind in [
            &FailureKind::ILLEGAL_TRANSACTION_STATE,
            &FailureKind::TRANSACTION_LIFECYCLE,
        ] {
            parents.insert(
                kind.as_str().to_string(),
                FailureKind::TRANSACTION.as_str().to_string(),
            );
        }
        Self { parents }
    }

    /// Registers `kind` under `parent`.
    ///
    /// Re-registering a kind under the same parent is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`KindError::UnknownParent`] if `parent` is not known, or
    /// [`KindError::Conflict`] if `kind` already has a different parent.
    pub fn register(&mut self, kind: &FailureKind, parent: &FailureKind) -> Result<(), KindError> {
        if !self.contains(parent) {
            return Err(KindError::UnknownParent {
                kind: kind.to_string(),
                parent: parent.to_string(),
            });
        }
        if let Some(existing) = self.parents.get(kind.as_str()) {
            if existing != parent.as_str() {
                return Err(KindError::Conflict {
                    kind: kind.to_string(),
                    existing: existing.clone(),
                });
            }
            return Ok(());
        }
        if kind == &FailureKind::FAILURE {
            return Err(KindError::Conflict {
                kind: kind.to_string(),
                existing: "<root>".to_string(),
            });
        }
        self.parents
            .insert(kind.as_str().to_string(), parent.as_str().to_string());
        Ok(())
    }

    /// Whether `kind` is the root or has been registered.
    #[must_use]
    pub fn contains(&self, kind: &FailureKind) -> bool {
        kind == &FailureKind::FAILURE || self.parents.contains_key(kind.as_str())
    }

    /// Parent of `kind`. Unregistered kinds report the root; the root has none.
    #[must_use]
    pub fn parent_of(&self, kind: &str) -> Option<&str> {
        if kind == FailureKind::FAILURE.as_str() {
            return None;
        }
        Some(
            self.parents
                .get(kind)
                .map_or(FailureKind::FAILURE.as_str(), String::as_str),
        )
    }

    /// Whether `kind` equals `ancestor` or descends from it.
    #[must_use]
    pub fn is_a(&self, kind: &FailureKind, ancestor: &FailureKind) -> bool {
        let mut current = Some(kind.as_str());
        while let Some(name) = current {
            if name == ancestor.as_str() {
                return true;
            }
            current = self.parent_of(name);
        }
        false
    }
}

impl Default for KindHierarchy {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// KindPattern / KindFilter
// ---------------------------------------------------------------------------

/// One compiled pattern of a [`KindFilter`].
#[derive(Debug, Clone)]
pub enum KindPattern {
    /// `*`
    Any,
    /// Exact name.
    Exact(String),
    /// Name with one or more `*` wildcards, compiled to an anchored regex.
    Wildcard(Regex),
    /// `kind+`: the named kind and everything the hierarchy places below it,
    /// unregistered kinds included.
    Subtree {
        root: FailureKind,
        hierarchy: Arc<KindHierarchy>,
    },
}

impl KindPattern {
    /// Compiles one pattern against `hierarchy`.
    ///
    /// # Errors
    ///
    /// Returns [`KindError::InvalidPattern`] for empty patterns, a `+` that is
    /// not the final character, or `+` combined with wildcards.
    pub fn compile(pattern: &str, hierarchy: &KindHierarchy) -> Result<Self, KindError> {
        let invalid = |reason: &str| KindError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(invalid("empty pattern"));
        }
        if pattern == "*" {
            return Ok(Self::Any);
        }
        if let Some(root) = pattern.strip_suffix('+') {
            if root.is_empty() || root.contains('+') || root.contains('*') {
                return Err(invalid("`+` must follow a plain kind name"));
            }
            return Ok(Self::Subtree {
                root: FailureKind::new(root.to_string()),
                hierarchy: Arc::new(hierarchy.clone()),
            });
        }
        if pattern.contains('+') {
            return Err(invalid("`+` is only allowed at the end"));
        }
        if pattern.contains('*') {
            let body = pattern
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let regex = Regex::new(&format!("^{body}$")).map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self::Wildcard(regex));
        }
        Ok(Self::Exact(pattern.to_string()))
    }

    /// Whether `kind` matches this pattern.
    #[must_use]
    pub fn matches(&self, kind: &FailureKind) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(name) => name == kind.as_str(),
            Self::Wildcard(regex) => regex.is_match(kind.as_str()),
            Self::Subtree { root, hierarchy } => hierarchy.is_a(kind, root),
        }
    }
}

/// Comma-separated list of [`KindPattern`]s; matches if any pattern matches.
#[derive(Debug, Clone)]
pub struct KindFilter {
    source: String,
    patterns: Vec<KindPattern>,
}

impl KindFilter {
    /// Compiles `source` against `hierarchy`.
    ///
    /// # Errors
    ///
    /// Returns the first [`KindError::InvalidPattern`] encountered.
    pub fn compile(source: &str, hierarchy: &KindHierarchy) -> Result<Self, KindError> {
        let patterns = source
            .split(',')
            .map(|p| KindPattern::compile(p, hierarchy))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source: source.to_string(),
            patterns,
        })
    }

    /// Whether any pattern matches `kind`.
    #[must_use]
    pub fn matches(&self, kind: &FailureKind) -> bool {
        self.patterns.iter().any(|p| p.matches(kind))
    }

    /// The filter text as configured.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn filter(source: &str) -> KindFilter {
        KindFilter::compile(source, &KindHierarchy::builtin()).unwrap()
    }

    #[test]
    fn builtin_hierarchy_links_children_to_parents() {
        let h = KindHierarchy::builtin();
        assert!(h.is_a(&FailureKind::ROUTING, &FailureKind::PROCESSING));
        assert!(h.is_a(&FailureKind::ROUTING, &FailureKind::FAILURE));
        assert!(h.is_a(&FailureKind::TRANSACTION_LIFECYCLE, &FailureKind::TRANSACTION));
        assert!(!h.is_a(&FailureKind::ROUTING, &FailureKind::TRANSACTION));
        assert!(!h.is_a(&FailureKind::PROCESSING, &FailureKind::ROUTING));
    }

    #[test]
    fn unregistered_kind_hangs_off_the_root() {
        let h = KindHierarchy::builtin();
        let custom = FailureKind::new("custom");
        assert_eq!(h.parent_of("custom"), Some("failure"));
        assert!(h.is_a(&custom, &FailureKind::FAILURE));
        assert!(!h.contains(&custom));
    }

    #[test]
    fn register_rejects_unknown_parent_and_conflicts() {
        let mut h = KindHierarchy::builtin();
        let jms = FailureKind::new("connectivity.jms");
        assert!(matches!(
            h.register(&jms, &FailureKind::new("nope")),
            Err(KindError::UnknownParent { .. })
        ));
        h.register(&jms, &FailureKind::CONNECTIVITY).unwrap();
        h.register(&jms, &FailureKind::CONNECTIVITY).unwrap();
        assert!(matches!(
            h.register(&jms, &FailureKind::ROUTING),
            Err(KindError::Conflict { .. })
        ));
        assert!(h.is_a(&jms, &FailureKind::PROCESSING));
    }

    #[test]
    fn exact_pattern_matches_only_that_kind() {
        let f = filter("routing");
        assert!(f.matches(&FailureKind::ROUTING));
        assert!(!f.matches(&FailureKind::PROCESSING));
        assert!(!f.matches(&FailureKind::new("routing.dlq")));
    }

    #[test]
    fn wildcard_patterns_match_by_name() {
        let f = filter("transaction*");
        assert!(f.matches(&FailureKind::TRANSACTION));
        assert!(f.matches(&FailureKind::TRANSACTION_LIFECYCLE));
        assert!(!f.matches(&FailureKind::ROUTING));

        let f = filter("*lifecycle");
        assert!(f.matches(&FailureKind::TRANSACTION_LIFECYCLE));
        assert!(!f.matches(&FailureKind::TRANSACTION));

        let f = filter("*.illegal*");
        assert!(f.matches(&FailureKind::ILLEGAL_TRANSACTION_STATE));
    }

    #[test]
    fn wildcard_escapes_regex_metacharacters() {
        let f = filter("a.b*");
        assert!(f.matches(&FailureKind::new("a.bc")));
        assert!(!f.matches(&FailureKind::new("axbc")));
    }

    #[test]
    fn subtree_pattern_matches_descendants() {
        let f = filter("processing+");
        assert!(f.matches(&FailureKind::PROCESSING));
        assert!(f.matches(&FailureKind::ROUTING));
        assert!(f.matches(&FailureKind::CONNECTIVITY));
        assert!(!f.matches(&FailureKind::SECURITY));
        assert!(!f.matches(&FailureKind::FAILURE));
    }

    #[test]
    fn subtree_of_unknown_kind_matches_itself() {
        let f = filter("custom+");
        assert!(f.matches(&FailureKind::new("custom")));
        assert!(!f.matches(&FailureKind::ROUTING));
    }

    #[test]
    fn root_subtree_matches_unregistered_kinds() {
        let h = KindHierarchy::builtin();
        let custom = FailureKind::new("custom");
        assert!(h.is_a(&custom, &FailureKind::FAILURE));
        assert!(filter("failure+").matches(&custom));
        assert!(!filter("processing+").matches(&custom));
    }

    #[test]
    fn subtree_follows_kinds_registered_below_it() {
        let mut h = KindHierarchy::builtin();
        let jms = FailureKind::new("connectivity.jms");
        h.register(&jms, &FailureKind::CONNECTIVITY).unwrap();
        let f = KindFilter::compile("processing+", &h).unwrap();
        assert!(f.matches(&jms));
        assert!(!filter("processing+").matches(&jms));
    }

    #[test]
    fn comma_separated_list_matches_any() {
        let f = filter("routing, security ,fatal");
        assert!(f.matches(&FailureKind::ROUTING));
        assert!(f.matches(&FailureKind::SECURITY));
        assert!(f.matches(&FailureKind::FATAL));
        assert!(!f.matches(&FailureKind::TRANSFORMATION));
        assert_eq!(f.source(), "routing, security ,fatal");
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        let h = KindHierarchy::builtin();
        for bad in ["", "routing,", "+", "a+b", "a*+", "rout+ing+"] {
            assert!(
                matches!(KindFilter::compile(bad, &h), Err(KindError::InvalidPattern { .. })),
                "pattern {bad:?} should be rejected"
            );
        }
    }

    proptest! {
        #[test]
        fn star_matches_every_kind(name in "[a-z][a-z.\\-]{0,20}") {
            prop_assert!(filter("*").matches(&FailureKind::new(name)));
        }

        #[test]
        fn exact_pattern_matches_itself(name in "[a-z][a-z.\\-]{0,20}") {
            let f = filter(&name);
            prop_assert!(f.matches(&FailureKind::new(name.clone())));
        }

        #[test]
        fn prefix_wildcard_agrees_with_starts_with(
            prefix in "[a-z]{1,6}",
            name in "[a-z.]{0,12}",
        ) {
            let f = filter(&format!("{prefix}*"));
            prop_assert_eq!(f.matches(&FailureKind::new(name.clone())), name.starts_with(&prefix));
        }
    }
}
