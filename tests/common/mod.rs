//! Shared helpers for integration tests: an in-process JSON-RPC tool server
//! and credential fixtures.

#![allow(dead_code)]

use std::net::TcpListener as StdTcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::runtime::Builder;
use tokio::sync::oneshot;

use agentix_core::auth::TokenIssuer;
use agentix_core::tools::ServerDescriptor;
use agentix_core::types::{AuthConfig, TargetId};

// =============================================================================
// Credentials
// =============================================================================

pub const SECRET: &str = "integration-test-secret";

pub fn auth_config() -> AuthConfig {
    AuthConfig {
        secret: SECRET.to_string(),
        ..AuthConfig::default()
    }
}

pub fn target(id: &str) -> TargetId {
    TargetId::from_string(id.to_string()).unwrap()
}

pub fn token(target_id: &str, permissions: &[&str]) -> String {
    TokenIssuer::new(auth_config())
        .unwrap()
        .issue(&target(target_id), permissions)
        .unwrap()
}

// =============================================================================
// Mock tool server
// =============================================================================

/// How a mock operation answers `tools/call`.
#[derive(Clone, Debug)]
pub enum Reply {
    Result(Value),
    RpcError(String),
    Status(u16),
    Slow(Duration, Value),
}

#[derive(Clone, Debug)]
pub struct MockTool {
    pub name: String,
    pub input_schema: Option<Value>,
    pub reply: Reply,
}

impl MockTool {
    pub fn new(name: &str, reply: Reply) -> Self {
        Self {
            name: name.to_string(),
            input_schema: None,
            reply,
        }
    }

    pub fn ok(name: &str, result: Value) -> Self {
        Self::new(name, Reply::Result(result))
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// One request as seen by the mock.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
    pub authorization: Option<String>,
}

impl RecordedCall {
    pub fn operation(&self) -> Option<&str> {
        self.params.get("name").and_then(Value::as_str)
    }

    pub fn arguments(&self) -> &Value {
        &self.params["arguments"]
    }
}

#[derive(Clone)]
struct MockState {
    tools: Arc<Vec<MockTool>>,
    fail_discovery: bool,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

/// Tool server on 127.0.0.1:<random>, stopped on drop.
pub struct MockServer {
    base_url: String,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    pub fn start(tools: Vec<MockTool>) -> Self {
        Self::spawn(tools, false)
    }

    /// Server whose `tools/list` answers HTTP 500.
    pub fn failing_discovery() -> Self {
        Self::spawn(Vec::new(), true)
    }

    fn spawn(tools: Vec<MockTool>, fail_discovery: bool) -> Self {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            tools: Arc::new(tools),
            fail_discovery,
            calls: Arc::clone(&calls),
        };
        let app = Router::new().route("/rpc", post(handle_rpc)).with_state(state);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let join = thread::spawn(move || {
            let runtime = Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                });
                let _ = server.await;
            });
        });

        Self {
            base_url: format!("http://{}", addr),
            calls,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn descriptor(&self, id: &str) -> ServerDescriptor {
        ServerDescriptor::http(id, self.base_url.clone())
            .unwrap()
            .with_timeout(5)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// `tools/call` requests only.
    pub fn tool_calls(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == "tools/call")
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

async fn handle_rpc(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let id = request["id"].clone();
    let params = request.get("params").cloned().unwrap_or(Value::Null);
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Ok(mut calls) = state.calls.lock() {
        calls.push(RecordedCall {
            method: method.clone(),
            params: params.clone(),
            authorization,
        });
    }

    match method.as_str() {
        "tools/list" => {
            if state.fail_discovery {
                return (StatusCode::INTERNAL_SERVER_ERROR, "discovery broken").into_response();
            }
            let tools: Vec<Value> = state
                .tools
                .iter()
                .map(|t| {
                    let mut entry = json!({"name": t.name, "description": format!("mock {}", t.name)});
                    if let Some(schema) = &t.input_schema {
                        entry["inputSchema"] = schema.clone();
                    }
                    entry
                })
                .collect();
            Json(json!({"jsonrpc": "2.0", "id": id, "result": {"tools": tools}})).into_response()
        }
        "tools/call" => {
            let name = params["name"].as_str().unwrap_or_default();
            let Some(tool) = state.tools.iter().find(|t| t.name == name) else {
                return (StatusCode::NOT_FOUND, "unknown tool").into_response();
            };
            match &tool.reply {
                Reply::Result(result) => {
                    Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response()
                }
                Reply::RpcError(message) => Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32000, "message": message}
                }))
                .into_response(),
                Reply::Status(code) => (
                    StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                    "mock failure",
                )
                    .into_response(),
                Reply::Slow(delay, result) => {
                    tokio::time::sleep(*delay).await;
                    Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response()
                }
            }
        }
        _ => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "method not found"}
        }))
        .into_response(),
    }
}

// =============================================================================
// Case-file fixtures
// =============================================================================

/// `consultar_expediente` result wrapping `record` the way record servers do.
pub fn record_result(record: Value) -> Value {
    json!({"content": [{"type": "text", "text": record.to_string()}]})
}

pub fn record_with_documents(kinds: &[&str]) -> Value {
    let documents: Vec<Value> = kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| json!({"id": format!("DOC-{}", i + 1), "tipo": kind}))
        .collect();
    json!({"id": "EXP-2024-001", "documentos": documents, "datos": {}})
}

/// Read and write operations of a case-file server.
pub fn case_file_tools(record: Value) -> Vec<MockTool> {
    vec![
        MockTool::ok("consultar_expediente", record_result(record)).with_schema(json!({
            "type": "object",
            "properties": {"expediente_id": {"type": "string"}},
            "required": ["expediente_id"]
        })),
        MockTool::ok("actualizar_datos", json!({"content": [{"type": "text", "text": "ok"}]}))
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "expediente_id": {"type": "string"},
                    "campo": {"type": "string"},
                    "valor": {}
                },
                "required": ["expediente_id", "campo", "valor"]
            })),
        MockTool::ok("añadir_anotacion", json!({"content": [{"type": "text", "text": "ok"}]})),
    ]
}

// =============================================================================
// Callback receiver
// =============================================================================

#[derive(Clone)]
struct ReceiverState {
    fail_first: usize,
    attempts: Arc<Mutex<usize>>,
    notices: Arc<Mutex<Vec<Value>>>,
}

/// Webhook endpoint that answers 503 to the first `fail_first` posts and
/// records every accepted body.
pub struct CallbackReceiver {
    base_url: String,
    attempts: Arc<Mutex<usize>>,
    notices: Arc<Mutex<Vec<Value>>>,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl CallbackReceiver {
    pub fn start(fail_first: usize) -> Self {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let attempts = Arc::new(Mutex::new(0));
        let notices = Arc::new(Mutex::new(Vec::new()));
        let state = ReceiverState {
            fail_first,
            attempts: Arc::clone(&attempts),
            notices: Arc::clone(&notices),
        };
        let app = Router::new()
            .route("/callback", post(handle_callback))
            .with_state(state);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let join = thread::spawn(move || {
            let runtime = Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                });
                let _ = server.await;
            });
        });

        Self {
            base_url: format!("http://{}", addr),
            attempts,
            notices,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }

    pub fn url(&self) -> String {
        format!("{}/callback", self.base_url)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().map(|a| *a).unwrap_or_default()
    }

    pub fn notices(&self) -> Vec<Value> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

impl Drop for CallbackReceiver {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

async fn handle_callback(State(state): State<ReceiverState>, Json(body): Json<Value>) -> StatusCode {
    let attempt = {
        let mut attempts = state.attempts.lock().unwrap();
        *attempts += 1;
        *attempts
    };
    if attempt <= state.fail_first {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    state.notices.lock().unwrap().push(body);
    StatusCode::OK
}
