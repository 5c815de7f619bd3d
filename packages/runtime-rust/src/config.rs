//! Declarative template configuration and runtime defaults.

use std::sync::Arc;

use dashmap::DashMap;
use relay_core::{
    ExceptionHandler, PolicyError, RuntimeContext, TransactionAction, TransactionFactory,
    TransactionPolicy,
};
use serde::{Deserialize, Serialize};

use crate::template::ExecutionTemplate;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A template configuration could not be turned into a template.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed template configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no transaction factory registered as `{0}`")]
    UnknownFactory(String),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

// ---------------------------------------------------------------------------
// FactoryRegistry
// ---------------------------------------------------------------------------

/// Named transaction factories that configurations refer to.
#[derive(Debug, Default)]
pub struct FactoryRegistry {
    factories: DashMap<String, Arc<dyn TransactionFactory>>,
}

impl FactoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, returning the factory it replaced.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn TransactionFactory>,
    ) -> Option<Arc<dyn TransactionFactory>> {
        self.factories.insert(name.into(), factory)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn TransactionFactory>> {
        self.factories.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TemplateConfig
// ---------------------------------------------------------------------------

/// Serializable description of one execution template.
///
/// ```json
/// { "action": "always-begin", "factory": "jdbc", "rollback_filter": "processing+" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    /// Accepts the canonical names and their kebab/lowercase spellings.
    #[serde(default = "default_action", with = "action_name")]
    pub action: TransactionAction,
    #[serde(default)]
    pub interact_with_external: bool,
    /// Name in the [`FactoryRegistry`].
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub rollback_filter: Option<String>,
    #[serde(default)]
    pub commit_filter: Option<String>,
    #[serde(default)]
    pub absorb_failures: bool,
    #[serde(default)]
    pub processor: Option<String>,
}

fn default_action() -> TransactionAction {
    TransactionAction::Indifferent
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            action: default_action(),
            interact_with_external: false,
            factory: None,
            rollback_filter: None,
            commit_filter: None,
            absorb_failures: false,
            processor: None,
        }
    }
}

impl TemplateConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Json`] for malformed input or an unknown action name.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolves the factory name and assembles the policy.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownFactory`] if the named factory is not registered.
    pub fn policy(&self, factories: &FactoryRegistry) -> Result<TransactionPolicy, ConfigError> {
        let mut policy =
            TransactionPolicy::new(self.action).interact_with_external(self.interact_with_external);
        if let Some(name) = &self.factory {
            let factory = factories
                .get(name)
                .ok_or_else(|| ConfigError::UnknownFactory(name.clone()))?;
            policy = policy.with_factory(factory);
        }
        if let Some(filter) = &self.rollback_filter {
            policy = policy.rollback_on(filter.clone());
        }
        if let Some(filter) = &self.commit_filter {
            policy = policy.commit_on(filter.clone());
        }
        Ok(policy)
    }

    /// Builds the execution template this configuration describes.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownFactory`] or [`ConfigError::Policy`].
    pub fn build(
        &self,
        runtime: &RuntimeContext,
        factories: &FactoryRegistry,
        handler: Arc<dyn ExceptionHandler>,
    ) -> Result<ExecutionTemplate, ConfigError> {
        let policy = self.policy(factories)?;
        let template = if self.absorb_failures {
            ExecutionTemplate::create_absorbing(runtime, policy, handler)?
        } else {
            ExecutionTemplate::create(runtime, policy, handler)?
        };
        tracing::debug!(
            action = %self.action,
            factory = self.factory.as_deref().unwrap_or("-"),
            absorbing = self.absorb_failures,
            "template configured"
        );
        Ok(match &self.processor {
            Some(processor) => template.with_processor(processor.as_str()),
            None => template,
        })
    }
}

mod action_name {
    use relay_core::TransactionAction;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        action: &TransactionAction,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(action.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<TransactionAction, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

/// Log output format for the demo binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Process-level settings for `relay-demo`.
#[derive(Debug, Clone, clap::Parser)]
#[command(
    name = "relay-demo",
    about = "Run a transactional execution scenario against in-memory resources"
)]
pub struct RuntimeConfig {
    /// Node identifier reported in logs.
    #[arg(long, env = "RELAY_NODE_ID", default_value = "relay-local")]
    pub node_id: String,

    /// Tracing filter directive, e.g. `info` or `relay_runtime=debug`.
    #[arg(long, env = "RELAY_LOG", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Template configuration as inline JSON. Defaults to `BEGIN_OR_JOIN` on the
    /// in-memory factory.
    #[arg(long, env = "RELAY_TEMPLATE")]
    pub template: Option<String>,

    /// Make the callback fail with this failure kind.
    #[arg(long)]
    pub fail_with: Option<String>,

    /// Bind an ambient transaction (`local` or `xa`) before running.
    #[arg(long)]
    pub ambient: Option<String>,
}

impl RuntimeConfig {
    /// The runtime context for this process.
    #[must_use]
    pub fn runtime(&self) -> RuntimeContext {
        RuntimeContext::new(self.node_id.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::Parser;
    use relay_core::{FailureKind, Fault, MessageEvent};

    use super::*;
    use crate::testing::{RecordingHandler, StaticFactory};

    fn registry() -> FactoryRegistry {
        let registry = FactoryRegistry::new();
        registry.register("memory", Arc::new(StaticFactory::new(false)));
        registry
    }

    #[test]
    fn parses_action_aliases() {
        for (name, action) in [
            ("ALWAYS_BEGIN", TransactionAction::AlwaysBegin),
            ("always-begin", TransactionAction::AlwaysBegin),
            ("join_if_possible", TransactionAction::JoinIfPossible),
            ("Never", TransactionAction::Never),
        ] {
            let config = TemplateConfig::from_json(&format!(r#"{{"action":"{name}"}}"#)).unwrap();
            assert_eq!(config.action, action, "{name}");
        }
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config = TemplateConfig::from_json("{}").unwrap();
        assert_eq!(config, TemplateConfig::default());
        assert_eq!(config.action, TransactionAction::Indifferent);
    }

    #[test]
    fn rejects_unknown_action_and_fields() {
        let err = TemplateConfig::from_json(r#"{"action":"sometimes"}"#).unwrap_err();
        assert!(err.to_string().contains("sometimes"), "{err}");
        assert!(matches!(
            TemplateConfig::from_json(r#"{"retries":3}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn serializes_canonical_action_name() {
        let config = TemplateConfig {
            action: TransactionAction::BeginOrJoin,
            ..TemplateConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["action"], "BEGIN_OR_JOIN");
    }

    #[test]
    fn unknown_factory_is_reported() {
        let config =
            TemplateConfig::from_json(r#"{"action":"ALWAYS_BEGIN","factory":"jdbc"}"#).unwrap();
        let err = config
            .build(&RuntimeContext::default(), &registry(), Arc::new(RecordingHandler::new()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFactory(ref name) if name == "jdbc"));
    }

    #[test]
    fn policy_errors_surface() {
        let config = TemplateConfig::from_json(r#"{"action":"BEGIN_OR_JOIN"}"#).unwrap();
        let err = config
            .build(&RuntimeContext::default(), &registry(), Arc::new(RecordingHandler::new()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Policy(PolicyError::MissingFactory { .. })));
    }

    #[test]
    fn builds_working_template() {
        let config = TemplateConfig::from_json(
            r#"{
                "action": "always-begin",
                "factory": "memory",
                "commit_filter": "routing",
                "absorb_failures": true,
                "processor": "orders-in"
            }"#,
        )
        .unwrap();
        let factories = registry();
        let template = config
            .build(
                &RuntimeContext::default(),
                &factories,
                Arc::new(RecordingHandler::replying("fallback")),
            )
            .unwrap();
        assert_eq!(template.processor(), "orders-in");
        assert!(template.is_absorbing());
        assert_eq!(template.policy().commit_filter(), Some("routing"));

        let registry = Arc::new(crate::registry::TransactionRegistry::new());
        let mut worker = registry.attach();
        let event = MessageEvent::new("orders", "in");
        let out = template
            .execute(&mut worker, &event, |_| {
                Err(Fault::msg(FailureKind::ROUTING, "no route").into())
            })
            .unwrap();
        assert_eq!(out.payload, relay_core::Value::from("fallback"));
    }

    #[test]
    fn registry_replaces_by_name() {
        let factories = registry();
        let previous = factories.register("memory", Arc::new(StaticFactory::new(true)));
        assert!(previous.is_some());
        assert_eq!(factories.len(), 1);
        assert!(factories.get("missing").is_none());
    }

    #[test]
    fn runtime_config_parses_flags() {
        let config = RuntimeConfig::try_parse_from([
            "relay-demo",
            "--node-id",
            "n1",
            "--log-format",
            "json",
            "--ambient",
            "xa",
        ])
        .unwrap();
        assert_eq!(config.node_id, "n1");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.ambient.as_deref(), Some("xa"));
        assert_eq!(config.runtime().node_id, "n1");
    }
}
