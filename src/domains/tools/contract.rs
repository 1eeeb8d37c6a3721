//! The tool contract every adapter satisfies.
//!
//! Adapters are written against [`ToolDefinition`], which works with
//! strongly typed parameters and output. The registry stores them behind the
//! object-safe [`ToolAdapter`] trait, which speaks JSON. Plugin-style
//! adapters whose shape is only known at runtime may implement
//! [`ToolAdapter`] directly.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::error::AdapterError;
use super::registry::ToolPolicy;
use super::schema::{Schema, SchemaError};
use super::validator::integral_floats_to_integers;

/// A strongly typed tool adapter.
///
/// `execute` only ever receives parameters decoded from arguments that
/// already passed the input schema. Adapters must not rate limit or cache
/// on their own; the dispatcher does both.
#[async_trait]
pub trait ToolDefinition: Send + Sync + 'static {
    /// Unique tool name.
    const NAME: &'static str;

    /// Description shown to clients.
    const DESCRIPTION: &'static str;

    /// Decoded arguments.
    type Params: DeserializeOwned + JsonSchema + Send;

    /// Successful result.
    type Output: Serialize + JsonSchema + Send;

    /// Schema the arguments are validated against.
    fn input_schema() -> Result<Schema, SchemaError> {
        Schema::for_type::<Self::Params>()
    }

    /// Schema the result is validated against.
    fn output_schema() -> Result<Schema, SchemaError> {
        Schema::for_type::<Self::Output>()
    }

    /// The adapter family's policy, layered over the runtime defaults in
    /// `base`. Configuration overrides are applied on top of the result.
    fn default_policy(base: ToolPolicy) -> ToolPolicy {
        base
    }

    async fn execute(&self, params: Self::Params) -> Result<Self::Output, AdapterError>;
}

/// Failure of a JSON-level adapter call.
#[derive(Debug)]
pub enum AdapterFailure {
    /// The adapter itself failed.
    Adapter(AdapterError),
    /// The arguments could not be decoded into the adapter's parameters.
    Decode(String),
}

impl From<AdapterError> for AdapterFailure {
    fn from(err: AdapterError) -> Self {
        Self::Adapter(err)
    }
}

/// The object-safe, JSON-level tool contract stored by the registry.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> Result<Schema, SchemaError>;

    fn output_schema(&self) -> Result<Schema, SchemaError>;

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, AdapterFailure>;
}

/// Wraps a [`ToolDefinition`] as a [`ToolAdapter`].
pub struct TypedAdapter<T> {
    inner: T,
}

impl<T: ToolDefinition> TypedAdapter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: ToolDefinition> ToolAdapter for TypedAdapter<T> {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        T::DESCRIPTION
    }

    fn input_schema(&self) -> Result<Schema, SchemaError> {
        T::input_schema()
    }

    fn output_schema(&self) -> Result<Schema, SchemaError> {
        T::output_schema()
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, AdapterFailure> {
        let arguments = integral_floats_to_integers(Value::Object(arguments));
        let params: T::Params = serde_json::from_value(arguments)
            .map_err(|e| AdapterFailure::Decode(e.to_string()))?;
        let output = self.inner.execute(params).await?;
        serde_json::to_value(output).map_err(|e| {
            AdapterFailure::Adapter(AdapterError::internal(format!(
                "Failed to serialize output: {e}"
            )))
        })
    }
}
