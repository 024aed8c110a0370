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

//! Tool Definition
//!
//! The merged metadata record for one invocable tool. Definitions are built
//! by the registry's discovery/merge pass and replaced wholesale on every
//! refresh; nothing mutates a definition in place after it is published.

use serde::{Deserialize, Serialize};

/// A named capability invocable with structured parameters.
///
/// `name` is the identity and must be unique across all sources after the
/// registry merge (see `toolmesh-engine::registry` for the precedence rule).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Globally unique tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema describing accepted parameters.
    ///
    /// Used for caller-side validation only; the engine passes parameters
    /// through without enforcing the schema.
    pub parameter_schema: serde_json::Value,
    /// Name of the server that provides this tool
    pub server_name: String,
    /// How the tool expects to be run (informational)
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Which discovery origin won the merge for this name
    #[serde(default)]
    pub source: ToolSource,
}

impl ToolDefinition {
    /// Create a definition for an externally discovered tool.
    pub fn external(
        name: impl Into<String>,
        description: impl Into<String>,
        parameter_schema: serde_json::Value,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema,
            server_name: server_name.into(),
            execution_mode: ExecutionMode::Immediate,
            source: ToolSource::External,
        }
    }

    /// Create a definition for a built-in tool served in-process.
    pub fn builtin(
        name: impl Into<String>,
        description: impl Into<String>,
        parameter_schema: serde_json::Value,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema,
            server_name: server_name.into(),
            execution_mode: ExecutionMode::Immediate,
            source: ToolSource::Builtin,
        }
    }

    /// Set the execution mode (builder style).
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }
}

/// How a tool expects to be executed.
///
/// Informational only: the engine applies the same timeout/retry/breaker
/// mechanics either way. Callers may use it to decide whether to await the
/// result inline or hand it to a background queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run synchronously within the calling operation
    #[default]
    Immediate,
    /// Intended for background/deferred execution
    Deferred,
}

/// Discovery origin of a tool definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    /// Statically configured, served in-process
    Builtin,
    /// Discovered from an external tool server via the definition cache
    #[default]
    External,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_definition_defaults() {
        let tool = ToolDefinition::external(
            "web_search",
            "Search the web",
            serde_json::json!({ "type": "object" }),
            "search-server",
        );

        assert_eq!(tool.name, "web_search");
        assert_eq!(tool.server_name, "search-server");
        assert_eq!(tool.execution_mode, ExecutionMode::Immediate);
        assert_eq!(tool.source, ToolSource::External);
    }

    #[test]
    fn test_serde_round_trip() {
        let tool = ToolDefinition::builtin(
            "think",
            "Step-by-step reasoning",
            serde_json::json!({ "type": "object", "properties": { "thought": { "type": "string" } } }),
            "builtin",
        )
        .with_execution_mode(ExecutionMode::Deferred);

        let json = serde_json::to_string(&tool).unwrap();
        let back: ToolDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tool);
    }
}
