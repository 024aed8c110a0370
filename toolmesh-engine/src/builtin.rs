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

//! Built-in tools served in-process.
//!
//! Built-ins take precedence over externally discovered tools of the same
//! name and are dispatched through [`crate::transport::InProcessTransport`]
//! on the reserved `builtin` server.

use crate::transport::{HandlerRegistry, ToolHandler};
use async_trait::async_trait;
use std::sync::Arc;
use toolmesh_core::{ToolCallError, ToolDefinition};

/// Name of the reserved in-process server.
pub const BUILTIN_SERVER: &str = "builtin";

/// Step-by-step reasoning scratchpad.
///
/// Accepts one numbered thought at a time and tells the caller whether more
/// are expected; the engine holds no reasoning state between calls.
pub struct ThinkHandler;

#[async_trait]
impl ToolHandler for ThinkHandler {
    fn name(&self) -> &str {
        "think"
    }

    async fn invoke(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolCallError> {
        let thought = params
            .get("thought")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolCallError::invalid_request("thought parameter required"))?;

        let thought_number = params
            .get("thought_number")
            .and_then(|v| v.as_u64())
            .unwrap_or(1);
        let total_thoughts = params
            .get("total_thoughts")
            .and_then(|v| v.as_u64())
            .unwrap_or(1);

        tracing::debug!(thought_number, total_thoughts, "recorded thought");

        Ok(serde_json::json!({
            "thought": thought,
            "thought_number": thought_number,
            "total_thoughts": total_thoughts,
            "next_thought_needed": thought_number < total_thoughts,
        }))
    }
}

/// Register all built-in handlers.
pub fn register_builtin_handlers(registry: &HandlerRegistry) {
    registry.register(Arc::new(ThinkHandler));
}

/// Definitions for the built-in tool set.
pub fn builtin_tools() -> Vec<ToolDefinition> {
    vec![ToolDefinition::builtin(
        "think",
        "Record one step of sequential reasoning and report whether more steps are expected",
        serde_json::json!({
            "type": "object",
            "properties": {
                "thought": { "type": "string" },
                "thought_number": { "type": "integer", "minimum": 1 },
                "total_thoughts": { "type": "integer", "minimum": 1 }
            },
            "required": ["thought"]
        }),
        BUILTIN_SERVER,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolmesh_core::ErrorKind;

    #[tokio::test]
    async fn test_think_reports_continuation() {
        let handler = ThinkHandler;

        let result = handler
            .invoke(serde_json::json!({
                "thought": "enumerate the options",
                "thought_number": 1,
                "total_thoughts": 3,
            }))
            .await
            .unwrap();

        assert_eq!(result["next_thought_needed"], serde_json::json!(true));

        let result = handler
            .invoke(serde_json::json!({
                "thought": "pick the second option",
                "thought_number": 3,
                "total_thoughts": 3,
            }))
            .await
            .unwrap();

        assert_eq!(result["next_thought_needed"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn test_think_requires_thought() {
        let err = ThinkHandler
            .invoke(serde_json::json!({ "thought_number": 1 }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_builtin_definitions_have_handlers() {
        let registry = HandlerRegistry::new();
        register_builtin_handlers(&registry);

        for tool in builtin_tools() {
            assert!(registry.get(&tool.name).is_some(), "missing handler for {}", tool.name);
            assert_eq!(tool.server_name, BUILTIN_SERVER);
        }
    }
}
