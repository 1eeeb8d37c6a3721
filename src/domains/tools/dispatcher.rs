//! Invocation pipeline.
//!
//! Every call runs through the same sequence: lookup, input validation,
//! cache lookup, rate admission, execution under a timeout, output
//! validation and cache store. A failure at any stage ends the invocation
//! with a normalized [`ToolFailure`]; nothing is retried.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use super::cache::{self, CacheKey, CacheStats, ResponseCache};
use super::contract::AdapterFailure;
use super::error::{ErrorKind, ToolFailure};
use super::normalize::{RawFailure, normalize};
use super::rate_limit::RateLimiter;
use super::registry::ToolRegistry;
use super::validator::validate;

/// Timeout applied when neither the caller nor the tool sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One call attempt.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub request_time: DateTime<Utc>,
    /// Takes precedence over the tool's configured timeout.
    pub timeout: Option<Duration>,
}

impl InvocationRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            request_time: Utc::now(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Stage at which an invocation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStage {
    Lookup,
    InputValidation,
    RateLimit,
    Execution,
    OutputValidation,
}

impl InvocationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::InputValidation => "input_validation",
            Self::RateLimit => "rate_limit",
            Self::Execution => "execution",
            Self::OutputValidation => "output_validation",
        }
    }
}

/// The outcome returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success(Value),
    Failure(ToolFailure),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ToolFailure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.failure().map(|f| f.kind)
    }

    /// The `{ ok, data }` / `{ ok, kind, message, details }` envelope.
    pub fn to_envelope(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum Envelope<'a> {
    Success {
        ok: bool,
        data: &'a Value,
    },
    Failure {
        ok: bool,
        #[serde(flatten)]
        failure: &'a ToolFailure,
    },
}

impl Serialize for ExecutionResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success(data) => Envelope::Success { ok: true, data },
            Self::Failure(failure) => Envelope::Failure { ok: false, failure },
        }
        .serialize(serializer)
    }
}

/// Routes invocations to registered adapters, enforcing each tool's policy.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    cache: Arc<ResponseCache>,
    rate_limiter: RateLimiter,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_default_timeout(registry, DEFAULT_TIMEOUT)
    }

    pub fn with_default_timeout(registry: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            cache: Arc::new(ResponseCache::new()),
            rate_limiter: RateLimiter::new(),
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start the background task that purges expired cache entries.
    pub fn spawn_cache_sweeper(
        &self,
        every: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        cache::spawn_sweeper(self.cache.clone(), every, shutdown_rx)
    }

    /// Invoke `tool_name` with `arguments`.
    pub async fn invoke(&self, tool_name: &str, arguments: Map<String, Value>) -> ExecutionResult {
        self.dispatch(InvocationRequest::new(tool_name, arguments))
            .await
    }

    /// Invoke `tool_name` with a caller-supplied timeout.
    pub async fn invoke_with_timeout(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> ExecutionResult {
        self.dispatch(InvocationRequest::new(tool_name, arguments).with_timeout(timeout))
            .await
    }

    #[instrument(
        name = "invoke",
        skip_all,
        fields(tool = %request.tool_name, request_time = %request.request_time)
    )]
    pub async fn dispatch(&self, request: InvocationRequest) -> ExecutionResult {
        let tool = request.tool_name.as_str();
        match self.run(&request).await {
            Ok(value) => ExecutionResult::Success(value),
            Err((stage, raw)) => {
                let failure = normalize(tool, raw).with_detail("stage", stage.as_str());
                log_failure(tool, stage, &failure);
                ExecutionResult::Failure(failure)
            }
        }
    }

    async fn run(
        &self,
        request: &InvocationRequest,
    ) -> Result<Value, (InvocationStage, RawFailure)> {
        let tool = request.tool_name.as_str();

        let entry = self
            .registry
            .get(tool)
            .ok_or((InvocationStage::Lookup, RawFailure::UnknownTool))?;
        let descriptor = entry.descriptor.clone();
        let policy = &descriptor.policy;
        if !policy.enabled {
            return Err((InvocationStage::Lookup, RawFailure::DisabledTool));
        }

        let arguments = Value::Object(request.arguments.clone());
        validate(&descriptor.input_schema, &arguments).map_err(|violations| {
            (
                InvocationStage::InputValidation,
                RawFailure::InvalidArguments(violations),
            )
        })?;
        debug!("Arguments validated");

        let cache_key = policy
            .caches()
            .then(|| CacheKey::new(tool, &request.arguments));
        if let Some(key) = &cache_key {
            if let Some(value) = self.cache.get(key) {
                debug!(key = %key, "Cache hit");
                return Ok(value);
            }
        }

        if let Some(limit) = &policy.rate_limit {
            self.rate_limiter.admit(tool, limit).map_err(|rejected| {
                (
                    InvocationStage::RateLimit,
                    RawFailure::RateLimited {
                        retry_after: rejected.retry_after,
                    },
                )
            })?;
        }

        let limit = request
            .timeout
            .or(policy.timeout)
            .unwrap_or(self.default_timeout);
        let adapter = entry.adapter.clone();
        debug!(timeout = ?limit, "Executing");

        let execution = AssertUnwindSafe(adapter.execute(request.arguments.clone())).catch_unwind();
        let value = match tokio::time::timeout(limit, execution).await {
            Err(_) => return Err((InvocationStage::Execution, RawFailure::TimedOut(limit))),
            Ok(Err(panic)) => {
                return Err((
                    InvocationStage::Execution,
                    RawFailure::Panicked(panic_message(panic.as_ref())),
                ));
            }
            Ok(Ok(Err(AdapterFailure::Decode(message)))) => {
                return Err((
                    InvocationStage::Execution,
                    RawFailure::UndecodableArguments(message),
                ));
            }
            Ok(Ok(Err(AdapterFailure::Adapter(err)))) => {
                return Err((InvocationStage::Execution, RawFailure::Adapter(err)));
            }
            Ok(Ok(Ok(value))) => value,
        };

        validate(&descriptor.output_schema, &value).map_err(|violations| {
            (
                InvocationStage::OutputValidation,
                RawFailure::InvalidOutput(violations),
            )
        })?;

        if let Some(key) = cache_key {
            self.cache.put(key, value.clone(), policy.cache_ttl);
        }
        debug!("Invocation succeeded");
        Ok(value)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn log_failure(tool: &str, stage: InvocationStage, failure: &ToolFailure) {
    let kind = failure.kind.as_str();
    let stage = stage.as_str();
    match failure.kind {
        ErrorKind::Internal => {
            error!(tool, kind, stage, message = %failure.message, "Tool invocation failed");
        }
        _ => {
            warn!(tool, kind, stage, message = %failure.message, "Tool invocation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::contract::{ToolAdapter, ToolDefinition};
    use crate::domains::tools::definitions::TextStatsTool;
    use crate::domains::tools::error::AdapterError;
    use crate::domains::tools::rate_limit::RateLimit;
    use crate::domains::tools::registry::ToolPolicy;
    use crate::domains::tools::schema::{ObjectSchema, Schema, SchemaError};
    use async_trait::async_trait;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test arguments must be an object"),
        }
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct LookupParams {
        id: String,
        #[serde(default)]
        #[schemars(range(min = 1, max = 100))]
        limit: u32,
    }

    #[derive(Debug, Serialize, JsonSchema)]
    struct LookupOutput {
        id: String,
        call: usize,
    }

    /// Counts executions so tests can tell cache hits from real calls.
    struct LookupTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolDefinition for LookupTool {
        const NAME: &'static str = "lookup";
        const DESCRIPTION: &'static str = "Look up a record";
        type Params = LookupParams;
        type Output = LookupOutput;

        async fn execute(&self, params: LookupParams) -> Result<LookupOutput, AdapterError> {
            let _ = params.limit;
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if params.id == "down" {
                return Err(AdapterError::upstream(
                    "connect to postgres://svc:hunter2@db:5432 refused",
                ));
            }
            if params.id == "slow" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if params.id == "boom" {
                panic!("adapter exploded");
            }
            Ok(LookupOutput { id: params.id, call })
        }
    }

    /// Returns output that does not match its declared schema.
    struct MalformedTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolAdapter for MalformedTool {
        fn name(&self) -> &str {
            "malformed"
        }

        fn description(&self) -> &str {
            "Returns the wrong shape"
        }

        fn input_schema(&self) -> Result<Schema, SchemaError> {
            Ok(Schema::object(ObjectSchema::new()))
        }

        fn output_schema(&self) -> Result<Schema, SchemaError> {
            Ok(Schema::object(
                ObjectSchema::new().required("count", Schema::integer()),
            ))
        }

        async fn execute(&self, _arguments: Map<String, Value>) -> Result<Value, AdapterFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "count": "many" }))
        }
    }

    fn lookup_dispatcher(policy: ToolPolicy) -> (Dispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::builder()
            .register(
                LookupTool {
                    calls: calls.clone(),
                },
                policy,
            )
            .unwrap()
            .build();
        (Dispatcher::new(Arc::new(registry)), calls)
    }

    fn stage(result: &ExecutionResult) -> Option<&str> {
        result
            .failure()
            .and_then(|f| f.detail("stage"))
            .and_then(Value::as_str)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hits_do_not_count_against_rate_limit() {
        let policy = ToolPolicy::default()
            .rate_limit(Some(RateLimit::new(2, Duration::from_secs(60))))
            .cache_ttl(Duration::from_secs(30));
        let (dispatcher, calls) = lookup_dispatcher(policy);

        let first = dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await;
        assert_eq!(first.data(), Some(&json!({ "id": "a", "call": 1 })));

        tokio::time::advance(Duration::from_secs(5)).await;
        let second = dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await;
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.rate_limiter().window("lookup").unwrap().count, 1);

        let third = dispatcher.invoke("lookup", args(json!({ "id": "b" }))).await;
        assert_eq!(third.data(), Some(&json!({ "id": "b", "call": 2 })));

        let fourth = dispatcher.invoke("lookup", args(json!({ "id": "c" }))).await;
        assert_eq!(fourth.kind(), Some(ErrorKind::RateLimited));
        assert_eq!(stage(&fourth), Some("rate_limit"));
        let retry_ms = fourth.failure().unwrap().detail("retry_after_ms").unwrap();
        assert_eq!(retry_ms.as_u64(), Some(55_000));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = dispatcher.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.stores, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_window_resets_after_elapsing() {
        let policy = ToolPolicy::default()
            .rate_limit(Some(RateLimit::new(1, Duration::from_secs(60))))
            .cache_ttl(Duration::ZERO);
        let (dispatcher, _) = lookup_dispatcher(policy);

        assert!(dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await.is_success());
        let rejected = dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await;
        assert_eq!(rejected.kind(), Some(ErrorKind::RateLimited));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await.is_success());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let (dispatcher, _) = lookup_dispatcher(ToolPolicy::default());
        let result = dispatcher.invoke("nope", Map::new()).await;

        assert_eq!(result.kind(), Some(ErrorKind::NotFound));
        assert_eq!(stage(&result), Some("lookup"));
    }

    #[tokio::test]
    async fn test_disabled_tool_rejected_before_validation() {
        let (dispatcher, calls) = lookup_dispatcher(ToolPolicy::default().enabled(false));
        // Would fail validation if it got that far.
        let result = dispatcher.invoke("lookup", args(json!({ "bogus": 1 }))).await;

        assert_eq!(result.kind(), Some(ErrorKind::NotFound));
        assert_eq!(
            result.failure().unwrap().detail("disabled"),
            Some(&Value::Bool(true))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validation_collects_all_violations() {
        let (dispatcher, calls) = lookup_dispatcher(ToolPolicy::default());
        let result = dispatcher
            .invoke("lookup", args(json!({ "limit": 500, "lmit": 5 })))
            .await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Validation);
        assert_eq!(stage(&result), Some("input_validation"));
        let violations = failure.detail("violations").unwrap().as_array().unwrap();
        assert_eq!(violations.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(dispatcher.rate_limiter().window("lookup").is_none());
    }

    #[tokio::test]
    async fn test_upstream_failures_are_not_cached() {
        let (dispatcher, calls) = lookup_dispatcher(ToolPolicy::default());

        for _ in 0..2 {
            let result = dispatcher.invoke("lookup", args(json!({ "id": "down" }))).await;
            let failure = result.failure().unwrap();
            assert_eq!(failure.kind, ErrorKind::Upstream);
            assert!(!failure.message.contains("hunter2"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(dispatcher.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_adapter_times_out() {
        let (dispatcher, _) = lookup_dispatcher(ToolPolicy::default().timeout(Duration::from_secs(5)));
        let result = dispatcher.invoke("lookup", args(json!({ "id": "slow" }))).await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Timeout);
        assert_eq!(failure.detail("timeout_ms"), Some(&Value::from(5_000u64)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_timeout_takes_precedence() {
        let (dispatcher, _) = lookup_dispatcher(ToolPolicy::default().timeout(Duration::from_secs(60)));
        let result = dispatcher
            .invoke_with_timeout(
                "lookup",
                args(json!({ "id": "slow" })),
                Duration::from_millis(250),
            )
            .await;

        assert_eq!(
            result.failure().unwrap().detail("timeout_ms"),
            Some(&Value::from(250u64))
        );
    }

    #[tokio::test]
    async fn test_panics_become_internal() {
        let (dispatcher, _) = lookup_dispatcher(ToolPolicy::default());
        let result = dispatcher.invoke("lookup", args(json!({ "id": "boom" }))).await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Internal);
        assert!(failure.message.contains("adapter exploded"));
    }

    #[tokio::test]
    async fn test_invalid_output_is_internal_and_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::builder()
            .register_adapter(
                Arc::new(MalformedTool {
                    calls: calls.clone(),
                }),
                ToolPolicy::default(),
            )
            .unwrap()
            .build();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        for _ in 0..2 {
            let result = dispatcher.invoke("malformed", Map::new()).await;
            assert_eq!(result.kind(), Some(ErrorKind::Internal));
            assert_eq!(stage(&result), Some("output_validation"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(dispatcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_caches() {
        let (dispatcher, calls) = lookup_dispatcher(
            ToolPolicy::default()
                .rate_limit(None)
                .cache_ttl(Duration::ZERO),
        );

        for _ in 0..3 {
            assert!(dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await.is_success());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.cache_stats().stores, 0);
        assert!(dispatcher.rate_limiter().window("lookup").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_value_expires_after_ttl() {
        let (dispatcher, calls) = lookup_dispatcher(
            ToolPolicy::default()
                .rate_limit(None)
                .cache_ttl(Duration::from_secs(30)),
        );

        dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await;
        tokio::time::advance(Duration::from_secs(29)).await;
        dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let refreshed = dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await;
        assert_eq!(refreshed.data(), Some(&json!({ "id": "a", "call": 2 })));
    }

    #[tokio::test]
    async fn test_argument_order_shares_cache_entry() {
        let (dispatcher, calls) = lookup_dispatcher(ToolPolicy::default().rate_limit(None));

        dispatcher
            .invoke("lookup", args(json!({ "id": "a", "limit": 10 })))
            .await;
        dispatcher
            .invoke("lookup", args(json!({ "limit": 10, "id": "a" })))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_integral_float_argument_is_accepted() {
        let registry = ToolRegistry::builder()
            .register_default(TextStatsTool::new())
            .unwrap()
            .build();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let result = dispatcher
            .invoke("text_stats", args(json!({ "text": "a b a", "top_words": 2.0 })))
            .await;
        let data = result.data().unwrap();
        assert_eq!(data["words"], json!(3));
        assert_eq!(
            data["top_words"],
            json!([{ "word": "a", "count": 2 }, { "word": "b", "count": 1 }])
        );

        let rejected = dispatcher
            .invoke("text_stats", args(json!({ "text": "a", "top_words": 2.5 })))
            .await;
        assert_eq!(rejected.kind(), Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_ttl_beyond_clock_range_caches_forever() {
        let policy = ToolPolicy::default()
            .rate_limit(None)
            .cache_ttl(Duration::from_secs(u64::MAX));
        let (dispatcher, calls) = lookup_dispatcher(policy);

        let first = dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await;
        assert!(first.is_success());
        let second = dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await;
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_window_beyond_clock_range_keeps_rejecting() {
        let limit: RateLimit = "1/999999999999999d".parse().unwrap();
        let policy = ToolPolicy::default()
            .rate_limit(Some(limit))
            .cache_ttl(Duration::ZERO);
        let (dispatcher, _) = lookup_dispatcher(policy);

        assert!(dispatcher.invoke("lookup", args(json!({ "id": "a" }))).await.is_success());
        let limited = dispatcher.invoke("lookup", args(json!({ "id": "b" }))).await;
        assert_eq!(limited.kind(), Some(ErrorKind::RateLimited));
        let retry_ms = limited.failure().unwrap().detail("retry_after_ms").unwrap();
        assert_eq!(retry_ms, &json!(u64::MAX));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_invocations_counted_exactly() {
        let policy = ToolPolicy::default()
            .rate_limit(Some(RateLimit::per_hour(10)))
            .cache_ttl(Duration::ZERO);
        let (dispatcher, calls) = lookup_dispatcher(policy);
        let dispatcher = Arc::new(dispatcher);

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher
                        .invoke("lookup", args(json!({ "id": format!("id-{i}") })))
                        .await
                })
            })
            .collect();

        let mut succeeded = 0;
        let mut limited = 0;
        for handle in handles {
            match handle.await.unwrap().kind() {
                None => succeeded += 1,
                Some(ErrorKind::RateLimited) => limited += 1,
                Some(other) => panic!("unexpected failure kind {other}"),
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(limited, 40);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(dispatcher.rate_limiter().window("lookup").unwrap().count, 10);
    }

    #[test]
    fn test_envelope_shape() {
        let success = ExecutionResult::Success(json!({ "n": 1 }));
        assert_eq!(success.to_envelope(), json!({ "ok": true, "data": { "n": 1 } }));

        let failure = ExecutionResult::Failure(
            ToolFailure::new(ErrorKind::NotFound, "Tool not found: x").with_detail("tool", "x"),
        );
        assert_eq!(
            failure.to_envelope(),
            json!({
                "ok": false,
                "kind": "NotFound",
                "message": "Tool not found: x",
                "details": { "tool": "x" }
            })
        );

        let bare = ExecutionResult::Failure(ToolFailure::new(ErrorKind::Timeout, "late"));
        assert_eq!(
            bare.to_envelope(),
            json!({ "ok": false, "kind": "Timeout", "message": "late" })
        );
    }
}
