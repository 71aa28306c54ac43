//! Mock HTTP server setup for integration tests

use ai_response_cache::{ExecutorConfig, HttpTransport, RequestExecutor};
use mockito::{Mock, Server, ServerGuard};
use std::path::Path;
use std::sync::Arc;

pub const COMPLETIONS: &str = "/chat/completions";

/// Test fixture that manages a mock OpenAI-compatible server
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    /// Fast retry settings so failing scenarios finish quickly.
    pub fn config() -> ExecutorConfig {
        ExecutorConfig {
            base_delay_ms: 10,
            backoff_cap_ms: 50,
            attempt_timeout_ms: 5_000,
            ..ExecutorConfig::default()
        }
    }

    pub async fn executor(&self, config: ExecutorConfig) -> RequestExecutor {
        let transport = HttpTransport::new(&self.base_url)
            .unwrap()
            .with_api_key("sk-test");
        config.build_executor(Arc::new(transport)).await.unwrap()
    }

    pub async fn disk_executor(&self, dir: &Path) -> RequestExecutor {
        self.executor(Self::config().with_cache_dir(dir)).await
    }

    /// Successful completion answering with `content`, expected `hits` times.
    pub async fn mock_completion(&mut self, content: &str, hits: usize) -> Mock {
        let body = serde_json::json!({
            "model": "x-2024",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        });
        self.server
            .mock("POST", COMPLETIONS)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(hits)
            .create_async()
            .await
    }

    /// Error response with `status`, expected `hits` times.
    pub async fn mock_error(&mut self, status: usize, hits: usize) -> Mock {
        self.server
            .mock("POST", COMPLETIONS)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"upstream failure"}}"#)
            .expect(hits)
            .create_async()
            .await
    }

    /// 429 carrying a `Retry-After` header, expected once.
    pub async fn mock_rate_limited(&mut self, retry_after_secs: u64) -> Mock {
        self.server
            .mock("POST", COMPLETIONS)
            .with_status(429)
            .with_header("retry-after", &retry_after_secs.to_string())
            .with_body(r#"{"error":{"message":"rate limited"}}"#)
            .expect(1)
            .create_async()
            .await
    }
}
