//! JSON-RPC client for one tool server.
//!
//! The async and blocking calling conventions share the envelope builder and
//! the classification functions below, so HTTP statuses, transport faults
//! and JSON-RPC error members map to the same codes on both paths.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::routing::{ServerDescriptor, Transport};
use crate::types::{Error, ErrorCode, Result, ServerId};

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// One operation as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

// =============================================================================
// Client
// =============================================================================

/// Connection to one tool server, carrying the run's bearer credential.
///
/// HTTP clients are created lazily on first use and released by
/// [`ServerClient::close`].
pub struct ServerClient {
    descriptor: ServerDescriptor,
    rpc_url: String,
    token: String,
    next_id: AtomicU64,
    http: Mutex<Option<reqwest::Client>>,
    blocking: Mutex<Option<reqwest::blocking::Client>>,
    closed: AtomicBool,
}

impl fmt::Debug for ServerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerClient")
            .field("server_id", &self.descriptor.id)
            .field("rpc_url", &self.rpc_url)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ServerClient {
    pub fn new(descriptor: ServerDescriptor, token: impl Into<String>) -> Result<Self> {
        if descriptor.transport != Transport::Http {
            return Err(Error::config(format!(
                "server '{}' uses transport '{}', only http is dispatchable",
                descriptor.id, descriptor.transport
            )));
        }
        Ok(Self {
            rpc_url: descriptor.rpc_url(),
            descriptor,
            token: token.into(),
            next_id: AtomicU64::new(0),
            http: Mutex::new(None),
            blocking: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn server_id(&self) -> &ServerId {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.descriptor.timeout)
    }

    // ----- async -----

    /// Invoke `operation` with `arguments`; returns the `result` member.
    pub async fn call(&self, operation: &str, arguments: Value) -> Result<Value> {
        let params = json!({"name": operation, "arguments": arguments});
        self.post("tools/call", Some(params), operation).await
    }

    /// Discover the operations this server exposes.
    pub async fn list_operations(&self) -> Result<Vec<OperationInfo>> {
        let result = self.post("tools/list", None, "tools/list").await?;
        Ok(parse_operations(&self.descriptor.id, result))
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value> {
        self.post("resources/read", Some(json!({"uri": uri})), uri).await
    }

    async fn post(&self, method: &str, params: Option<Value>, context: &str) -> Result<Value> {
        let http = self.async_client()?;
        let request = self.envelope(method, params);

        let response = http
            .post(&self.rpc_url)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(&e, context))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&e, context))?;
        self.interpret(status.as_u16(), &body, context)
    }

    fn async_client(&self) -> Result<reqwest::Client> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let mut slot = self.http.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .timeout(self.timeout())
            .build()
            .map_err(|e| Error::internal(format!("http client build failed: {}", e)))?;
        *slot = Some(client.clone());
        Ok(client)
    }

    // ----- blocking -----

    /// Blocking [`ServerClient::call`]. Must not be called from an async
    /// context.
    pub fn call_blocking(&self, operation: &str, arguments: Value) -> Result<Value> {
        let params = json!({"name": operation, "arguments": arguments});
        self.post_blocking("tools/call", Some(params), operation)
    }

    /// Blocking [`ServerClient::list_operations`].
    pub fn list_operations_blocking(&self) -> Result<Vec<OperationInfo>> {
        let result = self.post_blocking("tools/list", None, "tools/list")?;
        Ok(parse_operations(&self.descriptor.id, result))
    }

    fn post_blocking(&self, method: &str, params: Option<Value>, context: &str) -> Result<Value> {
        let http = self.blocking_client()?;
        let request = self.envelope(method, params);

        let response = http
            .post(&self.rpc_url)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .map_err(|e| self.transport_error(&e, context))?;

        let status = response.status();
        let body = response
            .bytes()
            .map_err(|e| self.transport_error(&e, context))?;
        self.interpret(status.as_u16(), &body, context)
    }

    fn blocking_client(&self) -> Result<reqwest::blocking::Client> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let mut slot = self.blocking.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout())
            .build()
            .map_err(|e| Error::internal(format!("http client build failed: {}", e)))?;
        *slot = Some(client.clone());
        Ok(client)
    }

    // ----- lifecycle -----

    /// Release both HTTP clients. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(self.http.lock().unwrap_or_else(PoisonError::into_inner).take());

        // The blocking client owns a runtime that must not be dropped on an
        // async worker.
        let blocking = self
            .blocking
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = blocking {
            if let Err(e) = tokio::task::spawn_blocking(move || drop(client)).await {
                tracing::warn!(server_id = %self.descriptor.id, error = %e, "blocking_client_release_failed");
            }
        }
        tracing::debug!(server_id = %self.descriptor.id, "server_client_closed");
    }

    // ----- shared -----

    fn envelope<'a>(&self, method: &'a str, params: Option<Value>) -> JsonRpcRequest<'a> {
        JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            method,
            params,
        }
    }

    /// Turn a completed HTTP exchange into a result or a classified error.
    fn interpret(&self, status: u16, body: &[u8], context: &str) -> Result<Value> {
        if !(200..300).contains(&status) {
            return Err(self.status_error(status, &String::from_utf8_lossy(body), context));
        }
        let response: JsonRpcResponse = serde_json::from_slice(body).map_err(|e| {
            Error::tool(
                ErrorCode::ToolError,
                format!("malformed response for '{}' from '{}'", context, self.descriptor.id),
                e.to_string(),
            )
        })?;
        if let Some(error) = response.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(Error::tool(
                ErrorCode::ToolError,
                format!("error in '{}': {}", context, message),
                error.to_string(),
            ));
        }
        Ok(match response.result {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(result) => result,
        })
    }

    /// HTTP status classification.
    fn status_error(&self, status: u16, body: &str, context: &str) -> Error {
        let detail = body.to_string();
        match status {
            401 => Error::auth(ErrorCode::AuthInvalidToken, "credential rejected by tool server", detail),
            403 => Error::auth(
                ErrorCode::AuthPermissionDenied,
                "insufficient permissions for operation",
                detail,
            ),
            404 => Error::tool(
                ErrorCode::ToolNotFound,
                format!("operation '{}' not found on server", context),
                detail,
            ),
            409 => Error::tool(
                ErrorCode::Conflict,
                format!("concurrent modification conflict on {}", self.display_name()),
                detail,
            ),
            502..=504 => Error::connection(
                ErrorCode::ServerUnavailable,
                format!("tool server unavailable (HTTP {})", status),
                detail,
            ),
            _ => Error::tool(
                ErrorCode::ToolError,
                format!("error in '{}' (HTTP {})", context, status),
                detail,
            ),
        }
    }

    /// Transport fault classification.
    fn transport_error(&self, error: &reqwest::Error, context: &str) -> Error {
        if error.is_timeout() {
            Error::connection(
                ErrorCode::Timeout,
                format!(
                    "timeout in '{}' on server '{}' (>{}s)",
                    context, self.descriptor.id, self.descriptor.timeout
                ),
                error.to_string(),
            )
        } else if error.is_connect() {
            Error::connection(
                ErrorCode::ConnectionError,
                format!(
                    "cannot connect to server '{}': {}",
                    self.descriptor.id, self.descriptor.url
                ),
                error.to_string(),
            )
        } else {
            Error::connection(
                ErrorCode::ConnectionError,
                format!("unexpected transport error in '{}'", context),
                error.to_string(),
            )
        }
    }

    fn closed_error(&self) -> Error {
        Error::connection(
            ErrorCode::ConnectionError,
            format!("client for server '{}' is closed", self.descriptor.id),
            self.rpc_url.clone(),
        )
    }

    fn display_name(&self) -> &str {
        if self.descriptor.name.is_empty() {
            self.descriptor.id.as_str()
        } else {
            &self.descriptor.name
        }
    }
}

/// Extract `tools` from a `tools/list` result; nameless entries are skipped.
fn parse_operations(server_id: &ServerId, result: Value) -> Vec<OperationInfo> {
    let Some(Value::Array(tools)) = result.get("tools").cloned() else {
        return Vec::new();
    };
    tools
        .into_iter()
        .filter_map(|tool| match serde_json::from_value::<OperationInfo>(tool) {
            Ok(info) if !info.name.is_empty() => Some(info),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(server_id = %server_id, error = %e, "operation_entry_skipped");
                None
            }
        })
        .collect()
}
