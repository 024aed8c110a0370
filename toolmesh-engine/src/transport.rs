// Copyright 2025 Toolmesh (https://github.com/toolmesh)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Transport adapters.
//!
//! The engine talks to tool servers only through the narrow
//! [`TransportAdapter`] contract. Production transports form a closed set,
//! one per [`TransportKind`]: HTTP (external servers) and in-process
//! (built-in tools). The per-attempt deadline is enforced by the engine
//! around `invoke`; adapters classify their own failures into the error
//! taxonomy but never retry.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use toolmesh_core::{ServerConfig, ToolCallError, TransportKind};

/// Narrow contract between the engine and a tool server.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Invoke one tool on the given server.
    async fn invoke(
        &self,
        server: &ServerConfig,
        tool: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError>;
}

/// In-process tool handler.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Tool name this handler serves.
    fn name(&self) -> &str;

    /// Run the tool.
    async fn invoke(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolCallError>;
}

/// Handlers for built-in tools, keyed by tool name.
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    pub fn register(&self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, tool: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(tool).map(|h| h.clone())
    }

    pub fn list(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport for built-in tools served by in-process handlers.
pub struct InProcessTransport {
    handlers: Arc<HandlerRegistry>,
}

impl InProcessTransport {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl TransportAdapter for InProcessTransport {
    async fn invoke(
        &self,
        server: &ServerConfig,
        tool: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError> {
        let handler = self.handlers.get(tool).ok_or_else(|| {
            ToolCallError::connection_failed(
                &server.name,
                format!("No in-process handler registered for tool {}", tool),
            )
        })?;

        handler.invoke(params.clone()).await
    }
}

/// Transport for external tool servers spoken to over HTTP.
///
/// Requests are `POST {"tool": ..., "params": ...}` against the configured
/// endpoint. A 2xx response must carry a JSON body with a `result` field;
/// anything else is classified into the error taxonomy by status code.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for HttpTransport {
    async fn invoke(
        &self,
        server: &ServerConfig,
        tool: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError> {
        let (endpoint, headers) = match &server.transport {
            TransportKind::Http { endpoint, headers } => (endpoint, headers),
            TransportKind::InProcess => {
                return Err(ToolCallError::internal(format!(
                    "Server {} is not an HTTP server",
                    server.name
                )));
            }
        };

        let body = serde_json::json!({ "tool": tool, "params": params });

        let mut request = self
            .client
            .post(endpoint)
            .timeout(Duration::from_millis(server.timeout_ms))
            .json(&body);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ToolCallError::timeout(&server.name, server.timeout_ms)
            } else {
                ToolCallError::connection_failed(&server.name, e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| ToolCallError::connection_failed(&server.name, e.to_string()))?;
            let payload: serde_json::Value = serde_json::from_slice(&bytes).map_err(|_| {
                ToolCallError::invalid_response(format!(
                    "Server {} returned a non-JSON body for tool {}",
                    server.name, tool
                ))
            })?;

            return match payload.get("result") {
                Some(result) => Ok(result.clone()),
                None => Err(ToolCallError::invalid_response(format!(
                    "Server {} response for tool {} is missing the result field",
                    server.name, tool
                ))),
            };
        }

        Err(classify_http_status(&server.name, tool, status))
    }
}

/// Map a non-2xx invoke response onto the error taxonomy.
///
/// Only 5xx (and 429 throttling) is a server-health signal worth retrying;
/// the remaining 4xx mean the request itself was refused and retrying
/// against the same or a fallback server cannot help.
fn classify_http_status(
    server: &str,
    tool: &str,
    status: reqwest::StatusCode,
) -> ToolCallError {
    let err = if status.is_server_error() || status.as_u16() == 429 {
        ToolCallError::server_error(format!(
            "Server {} returned HTTP {} for tool {}",
            server, status, tool
        ))
    } else if status.is_client_error() {
        ToolCallError::invalid_request(format!(
            "Server {} rejected the request for tool {} ({})",
            server, tool, status
        ))
    } else {
        ToolCallError::invalid_response(format!(
            "Server {} returned unexpected HTTP {} for tool {}",
            server, status, tool
        ))
    };
    err.with_context("status", status.as_u16().to_string())
}

/// Production transport router: picks the concrete adapter from the
/// server's configured transport kind.
pub struct Transport {
    http: HttpTransport,
    in_process: InProcessTransport,
}

impl Transport {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            http: HttpTransport::new(),
            in_process: InProcessTransport::new(handlers),
        }
    }
}

#[async_trait]
impl TransportAdapter for Transport {
    async fn invoke(
        &self,
        server: &ServerConfig,
        tool: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError> {
        match &server.transport {
            TransportKind::Http { .. } => self.http.invoke(server, tool, params).await,
            TransportKind::InProcess => self.in_process.invoke(server, tool, params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolmesh_core::ErrorKind;

    struct UpperHandler;

    #[async_trait]
    impl ToolHandler for UpperHandler {
        fn name(&self) -> &str {
            "upper"
        }

        async fn invoke(
            &self,
            params: serde_json::Value,
        ) -> Result<serde_json::Value, ToolCallError> {
            let text = params
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolCallError::invalid_request("text parameter required"))?;
            Ok(serde_json::json!({ "text": text.to_uppercase() }))
        }
    }

    fn in_process_server(name: &str) -> ServerConfig {
        ServerConfig::new(name, TransportKind::InProcess)
    }

    #[tokio::test]
    async fn test_in_process_dispatch() {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(Arc::new(UpperHandler));
        let transport = InProcessTransport::new(handlers);

        let result = transport
            .invoke(
                &in_process_server("builtin"),
                "upper",
                &serde_json::json!({ "text": "hello" }),
            )
            .await
            .unwrap();

        assert_eq!(result, serde_json::json!({ "text": "HELLO" }));
    }

    #[tokio::test]
    async fn test_missing_handler_is_connection_failed() {
        let transport = InProcessTransport::new(Arc::new(HandlerRegistry::new()));

        let err = transport
            .invoke(
                &in_process_server("builtin"),
                "nonexistent",
                &serde_json::json!({}),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ConnectionFailed);
    }

    #[test]
    fn test_status_classification() {
        let kind = |code: u16| {
            classify_http_status("search", "web_search", reqwest::StatusCode::from_u16(code).unwrap())
                .kind
        };

        // 5xx and throttling are server-health signals, retryable by policy.
        assert_eq!(kind(500), ErrorKind::ServerError);
        assert_eq!(kind(503), ErrorKind::ServerError);
        assert_eq!(kind(429), ErrorKind::ServerError);

        // Other 4xx refusals must not burn the retry budget or the breaker.
        assert_eq!(kind(400), ErrorKind::InvalidRequest);
        assert_eq!(kind(403), ErrorKind::InvalidRequest);
        assert_eq!(kind(404), ErrorKind::InvalidRequest);
        assert_eq!(kind(422), ErrorKind::InvalidRequest);
        assert!(!kind(404).retryable());

        assert_eq!(kind(301), ErrorKind::InvalidResponse);
    }

    #[test]
    fn test_status_classification_keeps_status_context() {
        let err =
            classify_http_status("search", "web_search", reqwest::StatusCode::NOT_FOUND);
        assert_eq!(err.context.get("status").unwrap(), "404");
    }

    #[tokio::test]
    async fn test_handler_invalid_request_passthrough() {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(Arc::new(UpperHandler));
        let transport = InProcessTransport::new(handlers);

        let err = transport
            .invoke(
                &in_process_server("builtin"),
                "upper",
                &serde_json::json!({ "wrong": true }),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }
}
