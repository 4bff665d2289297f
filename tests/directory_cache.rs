//! Integration tests for the registry directory and the invoker,
//! against a mock registry.

use std::time::Duration;

use secrecy::SecretString;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use toolgate::error::ToolError;
use toolgate::sandbox::SandboxConfig;
use toolgate::{ClientConfig, Invoker, ToolDispatch};

fn installs_body(tool: &str, address: &str) -> serde_json::Value {
    serde_json::json!({
        "installs": [{
            "name": "demo",
            "binding": {"id": "b-1", "contentAddress": address},
            "servlet": {"slug": "u/demo", "meta": {"schema": {"tools": [
                {"name": tool, "description": "demo tool", "inputSchema": {"type": "object"}}
            ]}}},
            "settings": {"permissions": {"filesystem": {}, "network": {}}}
        }]
    })
}

fn invoker(server: &MockServer, refresh: Option<Duration>) -> Invoker {
    let config = ClientConfig::default()
        .with_base_url(server.uri())
        .with_tool_refresh(refresh);
    Invoker::new(
        &config,
        SecretString::from("session-123".to_string()),
        SandboxConfig::for_testing(),
    )
    .unwrap()
}

#[tokio::test]
async fn list_tools_reads_profile_installations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profiles/~/default/installations"))
        .and(header("cookie", "sessionId=session-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(installs_body("eval", "sha256:a")))
        .expect(1)
        .mount(&server)
        .await;

    let invoker = invoker(&server, Some(Duration::from_secs(3600)));
    let tools = invoker.list_tools().await.unwrap();

    assert_eq!(tools.len(), 1);
    assert_eq!(tools["eval"].description, "demo tool");

    // A second listing stays inside the TTL: still one fetch.
    invoker.list_tools().await.unwrap();
}

#[tokio::test]
async fn unknown_tool_fails_without_sandbox_work() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profiles/~/default/installations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(installs_body("eval", "sha256:a")))
        .mount(&server)
        .await;

    let invoker = invoker(&server, Some(Duration::from_secs(3600)));
    let err = invoker
        .call_tool("not-installed", serde_json::json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, ToolError::NotFound { name } if name == "not-installed"));
    assert_eq!(invoker.cached_plugins(), 0);
}

#[tokio::test]
async fn module_fetch_failure_is_recoverable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profiles/~/default/installations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(installs_body("eval", "sha256:a")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/c/sha256:a"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let invoker = invoker(&server, Some(Duration::from_secs(3600)));
    let err = invoker
        .call_tool("eval", serde_json::json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, ToolError::Registry(_)));
    // No instance was cached for the failed module.
    assert_eq!(invoker.cached_plugins(), 0);
}

#[tokio::test]
async fn invalid_module_bytes_fail_verification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profiles/~/default/installations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(installs_body("eval", "sha256:bad")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/c/sha256:bad"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"definitely not wasm".to_vec()))
        .mount(&server)
        .await;

    let invoker = invoker(&server, Some(Duration::from_secs(3600)));
    let err = invoker
        .call_tool("eval", serde_json::json!({}))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ToolError::Sandbox(toolgate::error::SandboxError::VerificationFailed(_))
    ));
    assert_eq!(invoker.cached_plugins(), 0);
}

#[tokio::test]
async fn repeat_calls_reuse_cached_instance_without_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profiles/~/default/installations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(installs_body("eval", "sha256:c")))
        .mount(&server)
        .await;
    // A well-formed component with no `call` export: compiles and caches,
    // then every invocation fails inside the sandbox.
    Mock::given(method("GET"))
        .and(path("/api/c/sha256:c"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"(component)".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let invoker = invoker(&server, Some(Duration::from_secs(3600)));

    for _ in 0..2 {
        let err = invoker
            .call_tool("eval", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Invocation { .. }));
    }

    // One module fetch, one live instance across both calls.
    assert_eq!(invoker.cached_plugins(), 1);
}

#[tokio::test]
async fn expired_snapshot_is_replaced_not_merged() {
    let server = MockServer::start().await;
    let first = Mock::given(method("GET"))
        .and(path("/api/profiles/~/default/installations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(installs_body("eval", "sha256:a")))
        .expect(1)
        .mount_as_scoped(&server)
        .await;

    let invoker = invoker(&server, Some(Duration::from_millis(20)));
    assert!(invoker.list_tools().await.unwrap().contains_key("eval"));
    drop(first);

    Mock::given(method("GET"))
        .and(path("/api/profiles/~/default/installations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(installs_body("fetch", "sha256:b")))
        .mount(&server)
        .await;

    tokio::time::sleep(Duration::from_millis(40)).await;

    let tools = invoker.list_tools().await.unwrap();
    assert!(tools.contains_key("fetch"));
    assert!(!tools.contains_key("eval"));

    // The removed tool is gone for calls too.
    let err = invoker
        .call_tool("eval", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::NotFound { .. }));
}

#[tokio::test]
async fn failed_refresh_keeps_serving_last_snapshot() {
    let server = MockServer::start().await;
    let ok = Mock::given(method("GET"))
        .and(path("/api/profiles/~/default/installations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(installs_body("eval", "sha256:a")))
        .expect(1)
        .mount_as_scoped(&server)
        .await;

    let invoker = invoker(&server, Some(Duration::from_millis(20)));
    invoker.list_tools().await.unwrap();
    drop(ok);

    Mock::given(method("GET"))
        .and(path("/api/profiles/~/default/installations"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    tokio::time::sleep(Duration::from_millis(40)).await;

    // The refresh error surfaces...
    assert!(invoker.list_tools().await.is_err());

    // ...but the last-good snapshot still resolves tools.
    let record = invoker.directory().resolve_tool("eval").await;
    assert!(record.is_some());
}
