//! HTTP fetch tool.
//!
//! Performs a GET or HEAD request through a client shared by every call.
//! The body is read up to a configured cap; bodies that are not UTF-8 are
//! returned base64-encoded. The host allow-list applies to every redirect
//! hop, not only to the requested URL.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::redirect::{Attempt, Policy};
use reqwest::{Client, ClientBuilder, Method, Url};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::config::HttpFetchConfig;
use crate::domains::tools::contract::ToolDefinition;
use crate::domains::tools::error::AdapterError;
use crate::domains::tools::rate_limit::RateLimit;
use crate::domains::tools::registry::ToolPolicy;

/// HTTP method to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum FetchMethod {
    #[default]
    Get,
    Head,
}

/// Parameters for fetching a URL.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HttpFetchParams {
    /// Absolute http(s) URL to fetch.
    #[schemars(length(min = 1, max = 2048))]
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default)]
    pub method: FetchMethod,
}

/// How the returned body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Utf8,
    Base64,
}

/// Structured output for a fetched URL.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct FetchResult {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub encoding: BodyEncoding,
    pub body: String,
    /// Number of body bytes returned.
    pub bytes: usize,
    /// Whether the body was cut at the size cap.
    pub truncated: bool,
}

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// A redirect pointed somewhere the allow-list does not cover.
#[derive(Debug, Error)]
#[error("redirect to '{url}' blocked: {reason}")]
struct RedirectBlocked {
    url: String,
    reason: String,
}

/// HTTP fetch tool implementation.
#[derive(Debug, Clone)]
pub struct HttpFetchTool {
    client: Client,
    allowed_hosts: Vec<String>,
    max_body_bytes: usize,
}

impl HttpFetchTool {
    pub fn new(config: &HttpFetchConfig) -> Result<Self, reqwest::Error> {
        Self::with_builder(Client::builder(), config)
    }

    /// Finish `builder` with this tool's user agent, timeouts and redirect
    /// rules, then build the tool around it.
    pub fn with_builder(
        builder: ClientBuilder,
        config: &HttpFetchConfig,
    ) -> Result<Self, reqwest::Error> {
        let allowed_hosts = config.allowed_hosts.clone();
        let redirects = allowed_hosts.clone();
        let client = builder
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::custom(move |attempt| follow_redirect(&redirects, attempt)))
            .build()?;

        Ok(Self {
            client,
            allowed_hosts,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Parse `raw` and check it against the scheme and host rules.
    pub fn check_url(&self, raw: &str) -> Result<Url, AdapterError> {
        let url = Url::parse(raw)
            .map_err(|e| AdapterError::invalid_arguments(format!("invalid url '{raw}': {e}")))?;
        check_target(&self.allowed_hosts, &url).map_err(AdapterError::invalid_arguments)?;
        Ok(url)
    }

    async fn read_body(
        &self,
        mut response: reqwest::Response,
    ) -> Result<(Vec<u8>, bool), AdapterError> {
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = self.max_body_bytes - body.len();
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                return Ok((body, true));
            }
            body.extend_from_slice(&chunk);
        }
        Ok((body, false))
    }
}

/// Scheme and host rules shared by the requested URL and redirect hops.
fn check_target(allowed_hosts: &[String], url: &Url) -> Result<(), String> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!(
            "unsupported scheme '{}': only http and https are allowed",
            url.scheme()
        ));
    }

    let host = url
        .host_str()
        .ok_or_else(|| "url has no host".to_string())?
        .to_lowercase();
    if !host_allowed(allowed_hosts, &host) {
        return Err(format!("host '{host}' is not in the allowed list"));
    }
    Ok(())
}

fn host_allowed(allowed_hosts: &[String], host: &str) -> bool {
    allowed_hosts.is_empty()
        || allowed_hosts.iter().any(|allowed| {
            host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
}

fn follow_redirect(allowed_hosts: &[String], attempt: Attempt<'_>) -> reqwest::redirect::Action {
    if attempt.previous().len() > MAX_REDIRECTS {
        return attempt.error("too many redirects");
    }
    match check_target(allowed_hosts, attempt.url()) {
        Ok(()) => attempt.follow(),
        Err(reason) => {
            let blocked = RedirectBlocked {
                url: attempt.url().to_string(),
                reason,
            };
            attempt.error(blocked)
        }
    }
}

/// Map a send failure, reporting a blocked redirect as a caller error.
fn send_error(err: reqwest::Error) -> AdapterError {
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(blocked) = cause.downcast_ref::<RedirectBlocked>() {
            warn!("{}", blocked);
            return AdapterError::invalid_arguments(blocked.to_string());
        }
        source = cause.source();
    }
    err.into()
}

/// Decode `bytes` as UTF-8, tolerating a character cut by truncation.
fn encode_body(bytes: Vec<u8>, truncated: bool) -> (BodyEncoding, String) {
    let err = match String::from_utf8(bytes) {
        Ok(text) => return (BodyEncoding::Utf8, text),
        Err(err) => err,
    };

    let utf8 = err.utf8_error();
    let mut bytes = err.into_bytes();
    if truncated && utf8.error_len().is_none() {
        bytes.truncate(utf8.valid_up_to());
        return match String::from_utf8(bytes) {
            Ok(text) => (BodyEncoding::Utf8, text),
            Err(err) => (BodyEncoding::Base64, STANDARD.encode(err.as_bytes())),
        };
    }
    (BodyEncoding::Base64, STANDARD.encode(&bytes))
}

#[async_trait]
impl ToolDefinition for HttpFetchTool {
    const NAME: &'static str = "http_fetch";

    const DESCRIPTION: &'static str = "Fetch an http(s) URL with GET or HEAD. Returns the status, \
        content type and body (UTF-8 text, or base64 for binary content). Large bodies are truncated.";

    type Params = HttpFetchParams;
    type Output = FetchResult;

    fn default_policy(base: ToolPolicy) -> ToolPolicy {
        base.rate_limit(Some(RateLimit::per_hour(60)))
            .cache_ttl(Duration::from_secs(300))
            .timeout(Duration::from_secs(20))
    }

    async fn execute(&self, params: HttpFetchParams) -> Result<FetchResult, AdapterError> {
        let url = self.check_url(&params.url)?;
        let method = match params.method {
            FetchMethod::Get => Method::GET,
            FetchMethod::Head => Method::HEAD,
        };
        info!("Fetching {} {}", method, url);

        let response = self
            .client
            .request(method, url)
            .send()
            .await
            .map_err(send_error)?;
        let status = response.status();
        let final_url = response.url().to_string();

        if status.is_server_error() {
            let mut details = Map::new();
            details.insert("status".into(), Value::from(status.as_u16()));
            details.insert("url".into(), Value::from(final_url));
            return Err(AdapterError::upstream_with(
                format!("server responded with {status}"),
                details,
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (bytes, truncated) = self.read_body(response).await?;
        let returned = bytes.len();
        let (encoding, body) = encode_body(bytes, truncated);
        debug!(status = status.as_u16(), bytes = returned, truncated, "Fetched");

        Ok(FetchResult {
            url: final_url,
            status: status.as_u16(),
            content_type,
            encoding,
            body,
            bytes: returned,
            truncated,
        })
    }
}
