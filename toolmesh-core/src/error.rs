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

//! Call error taxonomy
//!
//! Every failed tool call is described by a [`ToolCallError`] value carried
//! inside the result envelope. Errors never cross the registry/engine
//! boundary as panics or opaque exceptions: the engine classifies each
//! failure into one of the closed [`ErrorKind`] variants before deciding
//! whether to retry, trip the breaker, or fall back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of failure classes for a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Requested tool is absent from the registry
    ToolNotFound,
    /// Global concurrency limit reached; rejected without queueing
    Overloaded,
    /// The resolved server's circuit breaker is open
    CircuitOpen,
    /// Transport call exceeded its deadline
    Timeout,
    /// Server unreachable or failed to start
    ConnectionFailed,
    /// Server responded but indicated failure
    ServerError,
    /// Server responded with content the engine cannot parse
    InvalidResponse,
    /// Caller-supplied parameters rejected as malformed
    InvalidRequest,
    /// Unclassifiable runtime fault (including caught adapter panics)
    Internal,
}

impl ErrorKind {
    /// Whether the engine may retry this failure against the same server.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::ConnectionFailed | ErrorKind::ServerError
        )
    }

    /// Whether this failure counts toward the server's breaker threshold.
    ///
    /// `InvalidRequest` is the caller's fault, not a server health signal,
    /// so it never trips the breaker. The fast-fail kinds never reach a
    /// transport attempt in the first place.
    pub fn counts_toward_breaker(&self) -> bool {
        !matches!(
            self,
            ErrorKind::ToolNotFound
                | ErrorKind::Overloaded
                | ErrorKind::CircuitOpen
                | ErrorKind::InvalidRequest
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::ServerError => "server_error",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Structured error value for one failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolCallError {
    /// Failure class
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional context (server name, retry-after hints, status codes)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl ToolCallError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: HashMap::new(),
        }
    }

    /// Attach a context entry (builder style).
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::ToolNotFound,
            format!("Tool not found: {}", name),
        )
    }

    pub fn overloaded(max_concurrent: usize) -> Self {
        Self::new(
            ErrorKind::Overloaded,
            format!(
                "Concurrency limit of {} in-flight calls reached",
                max_concurrent
            ),
        )
    }

    pub fn circuit_open(server: &str, retry_after_ms: u64) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("Circuit open for server {}", server),
        )
        .with_context("server", server)
        .with_context("retry_after_ms", retry_after_ms.to_string())
    }

    pub fn timeout(server: &str, timeout_ms: u64) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Call to server {} timed out after {}ms", server, timeout_ms),
        )
        .with_context("server", server)
    }

    pub fn connection_failed(server: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, message).with_context("server", server)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidResponse, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Whether the engine may retry this failure against the same server.
    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Timeout.retryable());
        assert!(ErrorKind::ConnectionFailed.retryable());
        assert!(ErrorKind::ServerError.retryable());

        assert!(!ErrorKind::ToolNotFound.retryable());
        assert!(!ErrorKind::Overloaded.retryable());
        assert!(!ErrorKind::CircuitOpen.retryable());
        assert!(!ErrorKind::InvalidResponse.retryable());
        assert!(!ErrorKind::InvalidRequest.retryable());
        assert!(!ErrorKind::Internal.retryable());
    }

    #[test]
    fn test_breaker_accounting() {
        // Caller-input problems must not be charged to the server's health.
        assert!(!ErrorKind::InvalidRequest.counts_toward_breaker());
        assert!(ErrorKind::InvalidResponse.counts_toward_breaker());
        assert!(ErrorKind::Timeout.counts_toward_breaker());
        assert!(!ErrorKind::CircuitOpen.counts_toward_breaker());
    }

    #[test]
    fn test_error_context() {
        let err = ToolCallError::circuit_open("seq", 1500);
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
        assert_eq!(err.context.get("server").unwrap(), "seq");
        assert_eq!(err.context.get("retry_after_ms").unwrap(), "1500");
    }
}
