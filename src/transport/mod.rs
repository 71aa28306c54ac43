//! 传输层：执行器通过注入的 `Transport` 发起实际的出站调用。
//!
//! Outbound transport capability.
//!
//! The executor never talks to the network itself; it is handed a
//! [`Transport`] and treats it as a black box returning either a
//! [`RawResponse`] (any HTTP status) or a transport-level error
//! (`Error::Transport`, `Error::Timeout`).

mod http;

pub use http::HttpTransport;

use crate::types::{RequestDescriptor, TokenUsage};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// What came back from one outbound attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Extracted completion text on success, raw response body otherwise.
    pub body: String,
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
            usage: None,
            model: None,
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn with_retry_after(mut self, after: Duration) -> Self {
        self.retry_after = Some(after);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one outbound call. Must not retry internally.
    async fn send(&self, descriptor: &RequestDescriptor) -> Result<RawResponse>;

    fn name(&self) -> &'static str;
}
