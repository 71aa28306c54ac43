use super::{RawResponse, Transport};
use crate::error::ErrorContext;
use crate::types::{RequestDescriptor, TokenUsage};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Proxy;
use serde_json::{json, Map, Value};
use std::env;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenAI-compatible chat completions transport (OpenAI, OpenRouter, local gateways).
///
/// The descriptor payload becomes the user message; `model` and `system`
/// parameters are lifted into the request, every other parameter is passed
/// through as a top-level field.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    default_model: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        // Minimal production-friendly defaults (env-overridable).
        let timeout_secs = env::var("AI_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);
        Self::with_timeout(base_url, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join("chat/completions"))
            .map_err(|e| {
                Error::configuration_with_context(
                    "invalid transport base URL",
                    ErrorContext::new()
                        .with_field_path("transport.base_url")
                        .with_details(format!("{}: {}", base_url, e)),
                )
            })?;

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(
                env::var("AI_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            );
        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }
        let client = builder
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: None,
            default_model: None,
            timeout,
        })
    }

    /// OpenAI endpoint, key from `OPENAI_API_KEY`.
    pub fn openai() -> Result<Self> {
        Ok(Self::new(OPENAI_BASE_URL)?.with_api_key_opt(env::var("OPENAI_API_KEY").ok()))
    }

    /// OpenRouter endpoint, key from `OPENROUTER_API_KEY`.
    pub fn openrouter() -> Result<Self> {
        Ok(Self::new(OPENROUTER_BASE_URL)?.with_api_key_opt(env::var("OPENROUTER_API_KEY").ok()))
    }

    pub fn with_api_key(self, key: impl Into<String>) -> Self {
        self.with_api_key_opt(Some(key.into()))
    }

    fn with_api_key_opt(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Model used when the descriptor carries no `model` parameter.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn build_body(&self, descriptor: &RequestDescriptor) -> Value {
        let mut body = Map::new();
        let mut messages = Vec::new();
        if let Some(system) = descriptor.parameter("system").and_then(|v| v.as_str()) {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": descriptor.payload()}));

        if let Some(model) = descriptor
            .model()
            .map(str::to_string)
            .or_else(|| self.default_model.clone())
        {
            body.insert("model".into(), Value::String(model));
        }
        body.insert("messages".into(), Value::Array(messages));
        for (name, value) in descriptor.parameters() {
            if name != "model" && name != "system" {
                body.insert(name.clone(), value.clone());
            }
        }
        Value::Object(body)
    }

    /// Best-effort parsing of `Retry-After` (delta-seconds, fractional allowed).
    fn retry_after(headers: &HeaderMap) -> Option<Duration> {
        let raw = headers.get("retry-after")?.to_str().ok()?.trim();
        let secs: f64 = raw.parse().ok()?;
        (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
    }

    fn parse_completion(body: &str) -> Option<(String, Option<TokenUsage>, Option<String>)> {
        let json: Value = serde_json::from_str(body).ok()?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())?
            .to_string();
        let usage = json
            .get("usage")
            .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());
        let model = json
            .get("model")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Some((content, usage, model))
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                after: self.timeout,
            }
        } else if e.is_builder() || e.is_redirect() {
            Error::configuration_with_context(
                "invalid HTTP request",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("http_transport"),
            )
        } else {
            Error::transport(e.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, descriptor: &RequestDescriptor) -> Result<RawResponse> {
        let request_id = Uuid::new_v4().to_string();
        let mut req = self
            .client
            .post(self.endpoint.clone())
            .json(&self.build_body(descriptor))
            .header("x-request-id", &request_id);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;
        let status = resp.status().as_u16();
        let retry_after = Self::retry_after(resp.headers());
        let text = resp.text().await.map_err(|e| self.map_send_error(e))?;

        let mut raw = RawResponse::new(status, text);
        raw.retry_after = retry_after;
        if raw.is_success() {
            if let Some((content, usage, model)) = Self::parse_completion(&raw.body) {
                raw.body = content;
                raw.usage = usage;
                raw.model = model;
            }
        }
        Ok(raw)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
