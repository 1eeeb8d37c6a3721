//! Configuration management for the tool server.
//!
//! Configuration is populated from defaults, then from `TOOLGATE_*`
//! environment variables (optionally loaded from a `.env` file).
//! Malformed values are logged and ignored, leaving the previous value in
//! effect.

use super::transport::TransportConfig;
use crate::domains::tools::{RateLimit, ToolPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Prefix shared by every recognized environment variable.
pub const ENV_PREFIX: &str = "TOOLGATE_";

const TOOL_PREFIX: &str = "TOOLGATE_TOOL_";

/// Main configuration structure for the tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Transport configuration.
    pub transport: TransportConfig,

    /// Defaults applied to every tool invocation.
    pub runtime: RuntimeConfig,

    /// Per-tool policy overrides.
    pub tools: ToolsConfig,

    /// Settings for the built-in adapters.
    pub adapters: AdaptersConfig,
}

/// Server identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,

    /// Whether to include timestamps in log output.
    pub with_timestamps: bool,
}

/// Runtime defaults for the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Timeout for tools that do not declare one.
    pub default_timeout: Duration,

    /// Rate limit for tools that do not declare one; `None` is unlimited.
    pub default_rate_limit: Option<RateLimit>,

    /// Cache TTL for tools that do not declare one.
    pub default_cache_ttl: Duration,

    /// How often expired cache entries are purged; zero disables the sweeper.
    pub cache_sweep_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let policy = ToolPolicy::default();
        Self {
            default_timeout: Duration::from_secs(30),
            default_rate_limit: policy.rate_limit,
            default_cache_ttl: policy.cache_ttl,
            cache_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RuntimeConfig {
    /// The policy every adapter's own defaults are layered over.
    pub fn base_policy(&self) -> ToolPolicy {
        ToolPolicy {
            enabled: true,
            rate_limit: self.default_rate_limit,
            cache_ttl: self.default_cache_ttl,
            timeout: None,
        }
    }
}

/// Policy fields overridden for a single tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOverride {
    pub enabled: Option<bool>,
    /// `Some(None)` turns rate limiting off.
    pub rate_limit: Option<Option<RateLimit>>,
    pub cache_ttl: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl ToolOverride {
    pub fn apply(&self, mut policy: ToolPolicy) -> ToolPolicy {
        if let Some(enabled) = self.enabled {
            policy.enabled = enabled;
        }
        if let Some(rate_limit) = self.rate_limit {
            policy.rate_limit = rate_limit;
        }
        if let Some(ttl) = self.cache_ttl {
            policy.cache_ttl = ttl;
        }
        if let Some(timeout) = self.timeout {
            policy.timeout = Some(timeout);
        }
        policy
    }
}

/// Per-tool overrides keyed by lower-cased tool name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub overrides: BTreeMap<String, ToolOverride>,
}

impl ToolsConfig {
    pub fn get(&self, tool: &str) -> Option<&ToolOverride> {
        self.overrides.get(&tool.to_lowercase())
    }

    fn entry(&mut self, tool: &str) -> &mut ToolOverride {
        self.overrides.entry(tool.to_lowercase()).or_default()
    }
}

/// Settings for the built-in adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptersConfig {
    pub http_fetch: HttpFetchConfig,
}

/// Settings for the `http_fetch` adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpFetchConfig {
    /// Hosts that may be fetched; empty allows any host.
    pub allowed_hosts: Vec<String>,

    /// Bodies longer than this are truncated.
    pub max_body_bytes: usize,

    pub user_agent: String,
}

impl Default for HttpFetchConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            max_body_bytes: 256 * 1024,
            user_agent: format!("toolgate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "toolgate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                with_timestamps: true,
            },
            transport: TransportConfig::default(),
            runtime: RuntimeConfig::default(),
            tools: ToolsConfig::default(),
            adapters: AdaptersConfig::default(),
        }
    }
}

/// A snapshot of `TOOLGATE_*` variables.
#[derive(Debug, Clone, Default)]
pub struct EnvVars {
    vars: BTreeMap<String, String>,
}

impl EnvVars {
    pub fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(k, _)| k.starts_with(ENV_PREFIX))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Parse `key` with `parse`, logging and discarding malformed values.
    pub fn parse<T>(&self, key: &str, parse: impl FnOnce(&str) -> Result<T, String>) -> Option<T> {
        let raw = self.get(key)?;
        match parse(raw) {
            Ok(value) => Some(value),
            Err(reason) => {
                warn!("Ignoring {}={:?}: {}", key, raw, reason);
                None
            }
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = EnvVars::new(vars);
        let mut config = Self::default();

        if let Some(name) = vars.get("TOOLGATE_SERVER_NAME") {
            config.server.name = name.to_string();
        }
        if let Some(level) = vars.get("TOOLGATE_LOG_LEVEL") {
            config.logging.level = level.to_string();
        }
        if let Some(with_timestamps) = vars.parse("TOOLGATE_LOG_TIMESTAMPS", parse_bool) {
            config.logging.with_timestamps = with_timestamps;
        }

        config.transport = TransportConfig::from_vars(&vars);
        config.runtime.apply_vars(&vars);
        config.adapters.http_fetch.apply_vars(&vars);
        config.tools = ToolsConfig::from_vars(&vars);

        config
    }

    /// Final policy for `tool`: configuration overrides over `base`.
    pub fn policy_for(&self, tool: &str, base: ToolPolicy) -> ToolPolicy {
        match self.tools.get(tool) {
            Some(overrides) => overrides.apply(base),
            None => base,
        }
    }
}

impl RuntimeConfig {
    fn apply_vars(&mut self, vars: &EnvVars) {
        if let Some(timeout) = vars.parse("TOOLGATE_DEFAULT_TIMEOUT", parse_positive_duration) {
            self.default_timeout = timeout;
        }
        if let Some(limit) = vars.parse("TOOLGATE_DEFAULT_RATE_LIMIT", parse_rate_limit) {
            self.default_rate_limit = limit;
        }
        if let Some(ttl) = vars.parse("TOOLGATE_DEFAULT_CACHE_TTL", parse_duration) {
            self.default_cache_ttl = ttl;
        }
        if let Some(every) = vars.parse("TOOLGATE_CACHE_SWEEP_INTERVAL", parse_duration) {
            self.cache_sweep_interval = every;
        }
    }
}

impl HttpFetchConfig {
    fn apply_vars(&mut self, vars: &EnvVars) {
        if let Some(hosts) = vars.get("TOOLGATE_HTTP_FETCH_ALLOWED_HOSTS") {
            self.allowed_hosts = hosts
                .split(',')
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(max) = vars.parse("TOOLGATE_HTTP_FETCH_MAX_BODY_BYTES", |v| {
            v.trim().parse::<usize>().map_err(|e| e.to_string())
        }) {
            self.max_body_bytes = max;
        }
        if let Some(user_agent) = vars.get("TOOLGATE_HTTP_FETCH_USER_AGENT") {
            self.user_agent = user_agent.to_string();
        }
    }
}

impl ToolsConfig {
    fn from_vars(vars: &EnvVars) -> Self {
        let mut tools = Self::default();

        for (key, _) in vars.iter() {
            let Some(rest) = key.strip_prefix(TOOL_PREFIX) else {
                continue;
            };

            if let Some(name) = rest.strip_suffix("_ENABLED") {
                if let Some(enabled) = vars.parse(key, parse_bool) {
                    tools.entry(name).enabled = Some(enabled);
                }
            } else if let Some(name) = rest.strip_suffix("_RATE_LIMIT") {
                if let Some(limit) = vars.parse(key, parse_rate_limit) {
                    tools.entry(name).rate_limit = Some(limit);
                }
            } else if let Some(name) = rest.strip_suffix("_CACHE_TTL") {
                if let Some(ttl) = vars.parse(key, parse_duration) {
                    tools.entry(name).cache_ttl = Some(ttl);
                }
            } else if let Some(name) = rest.strip_suffix("_TIMEOUT") {
                if let Some(timeout) = vars.parse(key, parse_positive_duration) {
                    tools.entry(name).timeout = Some(timeout);
                }
            } else {
                warn!("Ignoring unrecognized tool setting {}", key);
            }
        }

        tools
    }
}

/// Parse `500ms`, `30s`, `5m`, `1h`, `1d` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    if amount.is_empty() {
        return Err(format!("invalid duration '{value}'"));
    }
    let amount: u64 = amount
        .parse()
        .map_err(|_| format!("invalid duration '{value}'"))?;

    let duration = match unit.trim() {
        "" | "s" => Duration::from_secs(amount),
        "ms" => Duration::from_millis(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        "h" => Duration::from_secs(amount.saturating_mul(3600)),
        "d" => Duration::from_secs(amount.saturating_mul(86_400)),
        other => return Err(format!("unknown duration unit '{other}'")),
    };
    Ok(duration)
}

fn parse_positive_duration(value: &str) -> Result<Duration, String> {
    let duration = parse_duration(value)?;
    if duration.is_zero() {
        return Err("must be longer than zero".to_string());
    }
    Ok(duration)
}

/// Parse `<count>/<duration>` or `off`.
pub fn parse_rate_limit(value: &str) -> Result<Option<RateLimit>, String> {
    match value.trim().to_lowercase().as_str() {
        "off" | "none" | "unlimited" => Ok(None),
        other => other.parse().map(Some),
    }
}

pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests run serially
    static ENV_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration(" 45 ").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10w").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_parse_rate_limit_off() {
        assert_eq!(parse_rate_limit("off").unwrap(), None);
        assert_eq!(
            parse_rate_limit("120/1h").unwrap(),
            Some(RateLimit::per_hour(120))
        );
        assert!(parse_rate_limit("lots").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(Vec::<(String, String)>::new());
        assert_eq!(config.server.name, "toolgate");
        assert_eq!(config.runtime, RuntimeConfig::default());
        assert!(config.tools.overrides.is_empty());
        assert!(config.adapters.http_fetch.allowed_hosts.is_empty());
    }

    #[test]
    fn test_runtime_settings_from_vars() {
        let config = Config::from_vars([
            ("TOOLGATE_DEFAULT_TIMEOUT", "10s"),
            ("TOOLGATE_DEFAULT_RATE_LIMIT", "off"),
            ("TOOLGATE_DEFAULT_CACHE_TTL", "2m"),
            ("TOOLGATE_CACHE_SWEEP_INTERVAL", "0"),
            ("UNRELATED", "ignored"),
        ]);

        assert_eq!(config.runtime.default_timeout, Duration::from_secs(10));
        assert_eq!(config.runtime.default_rate_limit, None);
        assert_eq!(config.runtime.default_cache_ttl, Duration::from_secs(120));
        assert!(config.runtime.cache_sweep_interval.is_zero());

        let base = config.runtime.base_policy();
        assert_eq!(base.rate_limit, None);
        assert_eq!(base.cache_ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_malformed_values_keep_previous() {
        let config = Config::from_vars([
            ("TOOLGATE_DEFAULT_TIMEOUT", "0s"),
            ("TOOLGATE_DEFAULT_RATE_LIMIT", "many"),
            ("TOOLGATE_TOOL_LOOKUP_ENABLED", "maybe"),
        ]);

        assert_eq!(config.runtime, RuntimeConfig::default());
        assert!(config.tools.get("lookup").is_none());
    }

    #[test]
    fn test_tool_overrides_layer_over_base() {
        let config = Config::from_vars([
            ("TOOLGATE_TOOL_HTTP_FETCH_RATE_LIMIT", "5/1m"),
            ("TOOLGATE_TOOL_HTTP_FETCH_CACHE_TTL", "0"),
            ("TOOLGATE_TOOL_TEXT_STATS_ENABLED", "false"),
            ("TOOLGATE_TOOL_TEXT_STATS_TIMEOUT", "2s"),
        ]);

        let base = ToolPolicy::default();
        let fetch = config.policy_for("http_fetch", base.clone());
        assert_eq!(fetch.rate_limit, Some(RateLimit::per_minute(5)));
        assert!(!fetch.caches());
        assert!(fetch.enabled);

        let stats = config.policy_for("text_stats", base.clone());
        assert!(!stats.enabled);
        assert_eq!(stats.timeout, Some(Duration::from_secs(2)));
        assert_eq!(stats.rate_limit, base.rate_limit);

        assert_eq!(config.policy_for("other", base.clone()), base);
    }

    #[test]
    fn test_http_fetch_settings() {
        let config = Config::from_vars([
            ("TOOLGATE_HTTP_FETCH_ALLOWED_HOSTS", "Example.com, api.github.com,,"),
            ("TOOLGATE_HTTP_FETCH_MAX_BODY_BYTES", "1024"),
        ]);
        let fetch = &config.adapters.http_fetch;
        assert_eq!(fetch.allowed_hosts, vec!["example.com", "api.github.com"]);
        assert_eq!(fetch.max_body_bytes, 1024);
    }

    #[test]
    fn test_from_env_reads_process_environment() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("TOOLGATE_SERVER_NAME", "gate-under-test");
            std::env::set_var("TOOLGATE_TOOL_ECHO_CACHE_TTL", "15s");
        }
        let config = Config::from_env();
        assert_eq!(config.server.name, "gate-under-test");
        assert_eq!(
            config.tools.get("echo").and_then(|o| o.cache_ttl),
            Some(Duration::from_secs(15))
        );
        unsafe {
            std::env::remove_var("TOOLGATE_SERVER_NAME");
            std::env::remove_var("TOOLGATE_TOOL_ECHO_CACHE_TTL");
        }
    }
}
