//! Tool Registry - central registration of all tools and their policies.
//!
//! The registry is built once at startup through [`RegistryBuilder`] and is
//! immutable afterwards. Each entry binds a tool name to its adapter, its
//! compiled input/output schemas and its [`ToolPolicy`].

use rmcp::model::Tool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::contract::{ToolAdapter, ToolDefinition, TypedAdapter};
use super::rate_limit::RateLimit;
use super::schema::{Schema, SchemaError};

/// Default cache TTL for tools that do not declare one.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Per-tool runtime policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPolicy {
    /// Disabled tools are rejected before validation.
    pub enabled: bool,

    /// `None` means unlimited.
    pub rate_limit: Option<RateLimit>,

    /// Zero disables caching.
    pub cache_ttl: Duration,

    /// `None` falls back to the dispatcher's default timeout.
    pub timeout: Option<Duration>,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit: Some(RateLimit::per_hour(60)),
            cache_ttl: DEFAULT_CACHE_TTL,
            timeout: None,
        }
    }
}

impl ToolPolicy {
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, rate_limit: Option<RateLimit>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn caches(&self) -> bool {
        !self.cache_ttl.is_zero()
    }
}

/// Errors raised while building the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tool '{0}' is already registered")]
    Duplicate(String),

    #[error("Tool name must not be empty")]
    EmptyName,

    #[error("Invalid {which} schema for tool '{tool}': {source}")]
    Schema {
        tool: String,
        which: &'static str,
        #[source]
        source: SchemaError,
    },

    #[error("Input schema for tool '{0}' must be an object")]
    InputNotObject(String),
}

/// Identity and policy of one registered tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub policy: ToolPolicy,
}

impl ToolDescriptor {
    /// MCP metadata for this tool.
    pub fn to_tool(&self) -> Tool {
        let output_schema = match self.output_schema.to_json_schema() {
            Value::Object(map) if self.output_schema.as_object().is_some() => Some(Arc::new(map)),
            _ => None,
        };
        let input_schema = match self.input_schema.to_json_schema() {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        Tool {
            name: self.name.clone().into(),
            description: Some(self.description.clone().into()),
            input_schema: Arc::new(input_schema),
            annotations: None,
            output_schema,
            icons: None,
            meta: None,
            title: None,
        }
    }
}

/// A registered tool: descriptor plus adapter.
#[derive(Clone)]
pub struct ToolEntry {
    pub descriptor: Arc<ToolDescriptor>,
    pub adapter: Arc<dyn ToolAdapter>,
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Immutable table of registered tools.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    entries: HashMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a tool by name, enabled or not.
    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Descriptors of every registered tool, sorted by name.
    pub fn descriptors(&self) -> Vec<Arc<ToolDescriptor>> {
        let mut descriptors: Vec<_> = self
            .entries
            .values()
            .map(|e| e.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// MCP metadata for every enabled tool, sorted by name.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.descriptors()
            .iter()
            .filter(|d| d.policy.enabled)
            .map(|d| d.to_tool())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects tools before freezing them into a [`ToolRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, ToolEntry>,
}

impl RegistryBuilder {
    /// Register a typed tool with an explicit policy.
    pub fn register<T: ToolDefinition>(
        self,
        tool: T,
        policy: ToolPolicy,
    ) -> Result<Self, RegistryError> {
        self.register_adapter(Arc::new(TypedAdapter::new(tool)), policy)
    }

    /// Register a typed tool with its declared policy over the built-in defaults.
    pub fn register_default<T: ToolDefinition>(self, tool: T) -> Result<Self, RegistryError> {
        self.register(tool, T::default_policy(ToolPolicy::default()))
    }

    /// Register a JSON-level adapter.
    pub fn register_adapter(
        mut self,
        adapter: Arc<dyn ToolAdapter>,
        policy: ToolPolicy,
    ) -> Result<Self, RegistryError> {
        let name = adapter.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.entries.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        let input_schema = adapter.input_schema().map_err(|source| RegistryError::Schema {
            tool: name.clone(),
            which: "input",
            source,
        })?;
        if input_schema.as_object().is_none() {
            return Err(RegistryError::InputNotObject(name));
        }
        let output_schema = adapter.output_schema().map_err(|source| RegistryError::Schema {
            tool: name.clone(),
            which: "output",
            source,
        })?;

        debug!(
            tool = %name,
            enabled = policy.enabled,
            rate_limit = ?policy.rate_limit,
            cache_ttl = ?policy.cache_ttl,
            "Registering tool"
        );

        let descriptor = ToolDescriptor {
            name: name.clone(),
            description: adapter.description().to_string(),
            input_schema,
            output_schema,
            policy,
        };
        self.entries.insert(
            name,
            ToolEntry {
                descriptor: Arc::new(descriptor),
                adapter,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        info!("Tool registry built with {} tools", self.entries.len());
        ToolRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::contract::AdapterFailure;
    use crate::domains::tools::error::AdapterError;
    use crate::domains::tools::schema::ObjectSchema;
    use async_trait::async_trait;
    use schemars::JsonSchema;
    use serde_json::{Map, json};
    use tokio_test::{assert_err, assert_ok};

    #[derive(Deserialize, JsonSchema)]
    struct EchoParams {
        #[allow(dead_code)]
        text: String,
    }

    #[derive(Serialize, JsonSchema)]
    struct EchoOutput {
        text: String,
    }

    struct EchoTool;

    #[async_trait]
    impl ToolDefinition for EchoTool {
        const NAME: &'static str = "echo";
        const DESCRIPTION: &'static str = "Echo text back";
        type Params = EchoParams;
        type Output = EchoOutput;

        fn default_policy(base: ToolPolicy) -> ToolPolicy {
            base.rate_limit(None).cache_ttl(Duration::ZERO)
        }

        async fn execute(&self, params: EchoParams) -> Result<EchoOutput, AdapterError> {
            Ok(EchoOutput { text: params.text })
        }
    }

    struct ScalarInputTool;

    #[async_trait]
    impl ToolAdapter for ScalarInputTool {
        fn name(&self) -> &str {
            "scalar"
        }

        fn description(&self) -> &str {
            "Takes a bare string"
        }

        fn input_schema(&self) -> Result<Schema, SchemaError> {
            Ok(Schema::string())
        }

        fn output_schema(&self) -> Result<Schema, SchemaError> {
            Ok(Schema::Any)
        }

        async fn execute(&self, _arguments: Map<String, Value>) -> Result<Value, AdapterFailure> {
            Ok(json!(null))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = assert_ok!(ToolRegistry::builder().register_default(EchoTool)).build();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tool_names(), vec!["echo"]);

        let entry = registry.get("echo").unwrap();
        assert_eq!(entry.descriptor.description, "Echo text back");
        assert_eq!(entry.descriptor.policy.rate_limit, None);
        assert!(!entry.descriptor.policy.caches());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let err = ToolRegistry::builder()
            .register_default(EchoTool)
            .unwrap()
            .register_default(EchoTool)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "echo"));
    }

    #[test]
    fn test_non_object_input_schema_rejected() {
        let err = assert_err!(
            ToolRegistry::builder().register_adapter(Arc::new(ScalarInputTool), ToolPolicy::default())
        );
        assert!(matches!(err, RegistryError::InputNotObject(_)));
    }

    #[test]
    fn test_disabled_tools_hidden_from_listing() {
        let registry = ToolRegistry::builder()
            .register(EchoTool, ToolPolicy::default().enabled(false))
            .unwrap()
            .build();

        assert!(registry.contains("echo"));
        assert!(registry.list_tools().is_empty());
        assert_eq!(registry.descriptors().len(), 1);
    }

    #[test]
    fn test_to_tool_publishes_schemas() {
        let descriptor = ToolDescriptor {
            name: "lookup".to_string(),
            description: "Look something up".to_string(),
            input_schema: Schema::object(ObjectSchema::new().required("id", Schema::string())),
            output_schema: Schema::object(ObjectSchema::new().allow_additional()),
            policy: ToolPolicy::default(),
        };
        let tool = descriptor.to_tool();

        assert_eq!(tool.name, "lookup");
        assert_eq!(tool.input_schema.get("type"), Some(&json!("object")));
        assert_eq!(tool.input_schema.get("required"), Some(&json!(["id"])));
        assert!(tool.output_schema.is_some());
    }

    #[test]
    fn test_default_policy() {
        let policy = ToolPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.rate_limit, Some(RateLimit::per_hour(60)));
        assert_eq!(policy.cache_ttl, Duration::from_secs(300));
        assert!(policy.timeout.is_none());
    }
}
