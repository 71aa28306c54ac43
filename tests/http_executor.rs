//! End-to-end tests: executor + HTTP transport against a mock server.

mod support;

use ai_response_cache::{Error, ErrorClass, HttpTransport, RequestDescriptor};
use std::sync::Arc;
use support::MockServerFixture;

fn quantum() -> RequestDescriptor {
    RequestDescriptor::new("Explain quantum computing")
        .with_param("model", "x")
        .with_param("temperature", 0)
}

#[tokio::test]
async fn test_transient_failure_then_cached_success() {
    let mut fixture = MockServerFixture::new().await;
    let failing = fixture.mock_error(503, 1).await;
    let ok = fixture.mock_completion("Quantum computing is...", 1).await;
    let executor = fixture.executor(MockServerFixture::config()).await;

    let first = executor.execute(&quantum()).await.unwrap();
    assert_eq!(first.content, "Quantum computing is...");
    assert_eq!(first.attempts, 2);
    assert_eq!(first.usage.map(|u| u.total_tokens), Some(12));
    assert!(!first.cached);

    let second = executor.execute(&quantum()).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.content, first.content);

    failing.assert_async().await;
    ok.assert_async().await;

    let stats = executor.cache().stats().await.unwrap();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.size, 1);
    let metrics = executor.metrics();
    assert_eq!(metrics.transport_attempts, 2);
    assert_eq!(metrics.retry_attempts, 1);
}

#[tokio::test]
async fn test_bad_request_fails_without_retry() {
    let mut fixture = MockServerFixture::new().await;
    let bad = fixture.mock_error(400, 1).await;
    let executor = fixture.executor(MockServerFixture::config()).await;

    let err = executor.execute(&quantum()).await.unwrap_err();
    assert!(matches!(err, Error::Client { status: 400, .. }), "{err:?}");
    assert!(err.to_string().contains("upstream failure"));
    bad.assert_async().await;
    assert_eq!(executor.cache().stats().await.unwrap().size, 0);
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let mut fixture = MockServerFixture::new().await;
    let failing = fixture.mock_error(500, 3).await;
    let executor = fixture
        .executor(MockServerFixture::config().with_max_retries(2))
        .await;

    let err = executor.execute(&quantum()).await.unwrap_err();
    match &err {
        Error::RetriesExhausted { attempts, last } => {
            assert_eq!(*attempts, 3);
            assert_eq!(last.status(), Some(500));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(err.class(), ErrorClass::ServerError);
    failing.assert_async().await;
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let mut fixture = MockServerFixture::new().await;
    let limited = fixture.mock_rate_limited(0).await;
    let ok = fixture.mock_completion("after the limit", 1).await;
    let executor = fixture.executor(MockServerFixture::config()).await;

    let resp = executor.execute(&quantum()).await.unwrap();
    assert_eq!(resp.content, "after the limit");
    assert_eq!(resp.attempts, 2);
    limited.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_disk_cache_survives_executor_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut fixture = MockServerFixture::new().await;
    let ok = fixture.mock_completion("persisted answer", 1).await;

    {
        let executor = fixture.disk_executor(dir.path()).await;
        let resp = executor.execute(&quantum()).await.unwrap();
        assert!(!resp.cached);
        assert_eq!(executor.cache().backend_name(), "disk");
    }

    let restarted = fixture.disk_executor(dir.path()).await;
    let resp = restarted.execute(&quantum()).await.unwrap();
    assert!(resp.cached);
    assert_eq!(resp.content, "persisted answer");
    assert_eq!(resp.model.as_deref(), Some("x-2024"));
    ok.assert_async().await;

    assert!(restarted.invalidate(&quantum()).await.unwrap());
    assert_eq!(restarted.cache().stats().await.unwrap().size, 0);
}

#[tokio::test]
async fn test_malformed_api_key_fails_on_first_attempt() {
    let fixture = MockServerFixture::new().await;
    let transport = HttpTransport::new(&fixture.base_url)
        .unwrap()
        .with_api_key("bad\nkey");
    let executor = MockServerFixture::config()
        .build_executor(Arc::new(transport))
        .await
        .unwrap();

    let err = executor.execute(&quantum()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidRequest, "{err:?}");
    let metrics = executor.metrics();
    assert_eq!(metrics.transport_attempts, 1);
    assert_eq!(metrics.retry_attempts, 0);
    assert_eq!(metrics.failed, 1);
}
