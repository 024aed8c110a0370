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

//! Execution result envelope
//!
//! One [`ExecutionResult`] per `execute` call, created once and never
//! mutated after return. The engine has no outbound telemetry side-channel;
//! callers that feed dashboards or cost analytics derive a [`CallEvent`]
//! from the result instead.

use crate::error::{ErrorKind, ToolCallError};
use serde::{Deserialize, Serialize};

/// Normalized outcome of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the call succeeded
    pub success: bool,
    /// Opaque payload on success
    pub result: Option<serde_json::Value>,
    /// Structured error on failure
    pub error: Option<ToolCallError>,
    /// Wall-clock duration of the whole call, including retries and fallback
    pub execution_time_ms: u64,
    /// Server that produced the final outcome (fallback server if routed)
    pub server_used: String,
    /// Whether the fallback server was tried
    pub fallback_used: bool,
    /// Total transport attempts across primary and fallback
    pub attempts: u32,
}

impl ExecutionResult {
    /// Build a success envelope.
    pub fn ok(
        result: serde_json::Value,
        server_used: impl Into<String>,
        execution_time_ms: u64,
        attempts: u32,
        fallback_used: bool,
    ) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            execution_time_ms,
            server_used: server_used.into(),
            fallback_used,
            attempts,
        }
    }

    /// Build a failure envelope.
    pub fn failed(
        error: ToolCallError,
        server_used: impl Into<String>,
        execution_time_ms: u64,
        attempts: u32,
        fallback_used: bool,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            execution_time_ms,
            server_used: server_used.into(),
            fallback_used,
            attempts,
        }
    }

    /// Failure class, if the call failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Per-call telemetry record for observability collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    pub tool_name: String,
    pub server_name: String,
    pub success: bool,
    pub execution_time_ms: u64,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl CallEvent {
    /// Derive the telemetry event for a completed call.
    pub fn from_result(tool_name: impl Into<String>, result: &ExecutionResult) -> Self {
        Self {
            tool_name: tool_name.into(),
            server_name: result.server_used.clone(),
            success: result.success,
            execution_time_ms: result.execution_time_ms,
            fallback_used: result.fallback_used,
            error_kind: result.error_kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_from_failed_result() {
        let result = ExecutionResult::failed(
            ToolCallError::timeout("seq", 5000),
            "backup",
            812,
            4,
            true,
        );

        let event = CallEvent::from_result("web_search", &result);
        assert_eq!(event.tool_name, "web_search");
        assert_eq!(event.server_name, "backup");
        assert!(!event.success);
        assert!(event.fallback_used);
        assert_eq!(event.error_kind, Some(ErrorKind::Timeout));
    }

    #[test]
    fn test_success_envelope() {
        let result =
            ExecutionResult::ok(serde_json::json!({ "hits": 3 }), "search-server", 42, 1, false);
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error_kind(), None);
    }
}
