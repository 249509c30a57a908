//! End-to-end scenarios against a real (in-process) session: nested
//! agent/tool spans, streaming, errors, and export retry against a local
//! stub OTLP/auth server. Uses `Session::init` directly (not the process
//! singleton in `lib.rs`) so scenarios can run concurrently without
//! stepping on each other's global state, mirroring the pattern the
//! session module's own tests already use.

use std::collections::HashMap;
use std::time::Duration;

use agentops::attributes::HostValue;
use agentops::config::Config;
use agentops::instrumentors::demo::{DemoClient, DemoInstrumentor};
use agentops::registry::Registry;
use agentops::semconv;
use agentops::session::Session;
use agentops::span::{SpanKind, SpanStatus};
use agentops::wrap::{CallInfo, Handler, WrapPoint};

fn test_config(api_key: &str) -> Config {
    let mut config = Config::from_env();
    config.auto_start_session = false;
    config.api_key = api_key.to_string();
    config
}

#[tokio::test]
async fn basic_llm_call_produces_a_span_with_request_and_response_attributes() {
    let session = Session::init(test_config("e2e-basic"));
    let instrumentor = DemoInstrumentor::new();
    instrumentor.complete_wrap.enable();
    let client = DemoClient::new("demo-model-1");

    let guard = session.start_trace_guarded("basic-call", HashMap::new());
    let result = instrumentor.complete(session.provider(), &client, "what is the capital of France?");
    assert_eq!(result.unwrap(), "demo response to: what is the capital of France?");
    guard.end(SpanStatus::Ok);

    let report = session.diagnose();
    assert_eq!(report.active_traces, 0);
    session.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn streaming_call_aggregates_chunks_and_records_ttft() {
    let session = Session::init(test_config("e2e-stream"));
    let instrumentor = DemoInstrumentor::new();
    let client = DemoClient::new("demo-model-1");

    let stream = instrumentor.stream_complete(session.handle(), &client, "stream this");
    let chunks: Vec<_> = stream.collect();
    assert!(chunks.iter().all(|c| c.is_ok()));
    assert!(!chunks.is_empty());

    session.shutdown(Duration::from_secs(1)).await;
    let report = session.diagnose();
    assert!(report.counters.spans_ended >= 1);
}

#[tokio::test]
async fn empty_prompt_produces_an_error_span() {
    let session = Session::init(test_config("e2e-error"));
    let instrumentor = DemoInstrumentor::new();
    instrumentor.complete_wrap.enable();
    let client = DemoClient::new("demo-model-1");

    let result = instrumentor.complete(session.provider(), &client, "");
    assert!(result.is_err());

    session.shutdown(Duration::from_secs(1)).await;
}

/// A tool-call handler nested inside an agent-run span, exercising parent/
/// child linkage through the ambient context the way a real agent
/// framework's "agent runs tools" hierarchy would (§3 span kinds).
struct ToolHandler;
impl Handler for ToolHandler {
    fn before(&self, call: &CallInfo) -> Vec<(String, HostValue)> {
        let mut out = Vec::new();
        for (name, value) in &call.args {
            if name == "query" {
                if let HostValue::Str(q) = value {
                    out.push((semconv::agent::TOOL_NAME.to_string(), HostValue::Str("search".to_string())));
                    out.push(("tool.query".to_string(), HostValue::Str(q.clone())));
                }
            }
        }
        out
    }
}

#[tokio::test]
async fn nested_agent_and_tool_spans_share_a_trace_id() {
    let session = Session::init(test_config("e2e-nested"));
    let tool_wrap = WrapPoint::new("demo_agent", "search_tool", SpanKind::Internal, "agent.{symbol}", ToolHandler);
    tool_wrap.enable();

    let guard = session.start_trace_guarded("agent-run", HashMap::new());
    let trace_id = guard.handle().trace_id;

    let _ctx = agentops::context::enter(agentops::context::TraceContext {
        trace_id,
        span_id: guard.handle().span_id,
        baggage: std::collections::BTreeMap::new(),
    });

    let call = CallInfo::new().with_arg("query", "weather in Paris");
    let outcome: Result<String, String> = tool_wrap.call_sync(
        session.provider(),
        call,
        |s: &String| agentops::attributes::HostValue::Str(s.clone()),
        || Ok("sunny".to_string()),
    );
    assert_eq!(outcome.unwrap(), "sunny");

    guard.end(SpanStatus::Ok);
    session.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn export_retries_against_a_flaky_stub_server_then_succeeds() {
    use axum::{extract::State, routing::post, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let attempts = Arc::new(AtomicUsize::new(0));

    async fn auth_handler() -> axum::Json<serde_json::Value> {
        axum::Json(serde_json::json!({ "token": "stub-token", "expires_in": 3600 }))
    }

    async fn traces_handler(State(attempts): State<Arc<AtomicUsize>>) -> axum::http::StatusCode {
        let count = attempts.fetch_add(1, Ordering::SeqCst);
        if count == 0 {
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        } else {
            axum::http::StatusCode::OK
        }
    }

    let app = Router::new()
        .route("/auth/token", post(auth_handler))
        .route("/v1/traces", post(traces_handler))
        .with_state(Arc::clone(&attempts));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut config = test_config("e2e-retry");
    config.api_endpoint = format!("http://{addr}");
    config.exporter_endpoint = format!("http://{addr}/v1/traces");

    let session = Session::init(config);
    let handle = session.start_trace("will-retry", HashMap::new());
    session.end_trace(handle, SpanStatus::Ok);

    session.shutdown(Duration::from_secs(5)).await;
    assert!(attempts.load(Ordering::SeqCst) >= 2, "expected at least one retry after the first 500");
}

#[tokio::test]
async fn shutdown_with_a_still_open_trace_finalizes_it_as_unset() {
    let session = Session::init(test_config("e2e-shutdown"));
    let _handle = session.start_trace("never-ended", HashMap::new());
    assert_eq!(session.active_trace_count(), 1);

    session.shutdown(Duration::from_secs(1)).await;
    assert_eq!(session.active_trace_count(), 0);
}

#[test]
fn registry_without_any_detected_instrumentors_stays_empty() {
    let registry = Registry::new();
    assert!(registry.names().is_empty());
}
