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

//! Engine and server configuration.
//!
//! The execution engine consumes a validated [`EngineConfig`] and treats it
//! as immutable for its lifetime. Reload means building a new engine from a
//! freshly loaded config; nothing mutates server settings mid-call.

use crate::retry::RetryPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default bound on concurrent in-flight tool calls.
pub const DEFAULT_MAX_CONCURRENT: usize = 100;

/// How the engine reaches a tool server.
///
/// Closed set: one variant per transport kind, dispatched behind the
/// `TransportAdapter` trait in the engine crate. Connection details are
/// opaque to the engine; header values may carry credentials, which are
/// passed through unvalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportKind {
    /// Built-in tools dispatched to in-process handlers
    InProcess,
    /// External tool server spoken to over HTTP
    Http {
        /// Invocation endpoint (POST)
        endpoint: String,
        /// Extra headers, e.g. opaque auth tokens
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Circuit breaker policy for one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerPolicy {
    /// Consecutive failed runs before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting probes (ms)
    #[serde(default = "default_open_duration_ms")]
    pub open_duration_ms: u64,
    /// Concurrent probe calls admitted while half-open
    #[serde(default = "default_half_open_probe_count")]
    pub half_open_probe_count: u32,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_ms: default_open_duration_ms(),
            half_open_probe_count: default_half_open_probe_count(),
        }
    }
}

/// Configuration for one tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name; filled from the config map key on load
    #[serde(default)]
    pub name: String,

    /// Transport used to invoke tools on this server
    pub transport: TransportKind,

    /// Disabled servers are never called
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Per-attempt transport deadline (ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Server to try once if this one fails
    #[serde(default)]
    pub fallback_server: Option<String>,

    /// Breaker policy for this server
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerPolicy,
}

impl ServerConfig {
    /// Create a server config with defaults for the given transport.
    pub fn new(name: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            name: name.into(),
            transport,
            enabled: true,
            timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
            fallback_server: None,
            circuit_breaker: CircuitBreakerPolicy::default(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback_server = Some(fallback.into());
        self
    }

    pub fn with_circuit_breaker(mut self, policy: CircuitBreakerPolicy) -> Self {
        self.circuit_breaker = policy;
        self
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound on concurrent in-flight tool calls
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Path to the tool definition cache file
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Tool servers, keyed by name
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            cache_path: default_cache_path(),
            servers: HashMap::new(),
        }
    }
}

// Default values
fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_open_duration_ms() -> u64 {
    30_000
}

fn default_half_open_probe_count() -> u32 {
    1
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./toolmesh-data/tool_cache.json")
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.fill_server_names();
        Ok(config)
    }

    /// Load with priority: file > env > defaults.
    ///
    /// Supported environment variables:
    /// - TOOLMESH_MAX_CONCURRENT: in-flight call limit
    /// - TOOLMESH_CACHE_PATH: tool definition cache path
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        if let Ok(max) = std::env::var("TOOLMESH_MAX_CONCURRENT") {
            if let Ok(val) = max.parse() {
                config.max_concurrent = val;
            }
        }

        if let Ok(path) = std::env::var("TOOLMESH_CACHE_PATH") {
            config.cache_path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Register a server (builder style, for programmatic construction).
    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.servers.insert(server.name.clone(), server);
        self
    }

    /// Copy map keys into each server's `name` field.
    fn fill_server_names(&mut self) {
        for (key, server) in self.servers.iter_mut() {
            if server.name.is_empty() {
                server.name = key.clone();
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Checks positive limits and that every fallback target names a
    /// different, existing server.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }

        for (name, server) in &self.servers {
            if server.timeout_ms == 0 {
                anyhow::bail!("Server {} has a zero timeout", name);
            }
            if server.retry.max_attempts == 0 {
                anyhow::bail!("Server {} allows zero attempts", name);
            }
            if server.circuit_breaker.failure_threshold == 0 {
                anyhow::bail!("Server {} has a zero breaker threshold", name);
            }
            if server.circuit_breaker.half_open_probe_count == 0 {
                anyhow::bail!("Server {} admits zero half-open probes", name);
            }
            if let Some(fallback) = &server.fallback_server {
                if fallback == name {
                    anyhow::bail!("Server {} lists itself as fallback", name);
                }
                if !self.servers.contains_key(fallback) {
                    anyhow::bail!("Server {} falls back to unknown server {}", name, fallback);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_server(name: &str) -> ServerConfig {
        ServerConfig::new(
            name,
            TransportKind::Http {
                endpoint: format!("http://localhost:9000/{}", name),
                headers: HashMap::new(),
            },
        )
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert!(config.servers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fallback_must_exist() {
        let config = EngineConfig::default().with_server(http_server("primary").with_fallback("backup"));
        assert!(config.validate().is_err());

        let config = config.with_server(http_server("backup"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_self_fallback_rejected() {
        let config = EngineConfig::default().with_server(http_server("primary").with_fallback("primary"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_fills_names() {
        let toml_src = r#"
            max_concurrent = 8

            [servers.seq]
            transport = { kind = "in_process" }
            timeout_ms = 5000

            [servers.search]
            transport = { kind = "http", endpoint = "http://localhost:9001/invoke" }
            fallback_server = "seq"

            [servers.search.circuit_breaker]
            failure_threshold = 3
            open_duration_ms = 10000
            half_open_probe_count = 2
        "#;

        let mut config: EngineConfig = toml::from_str(toml_src).unwrap();
        config.fill_server_names();

        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.servers["seq"].name, "seq");
        assert_eq!(config.servers["seq"].timeout_ms, 5000);
        assert_eq!(
            config.servers["search"].circuit_breaker.failure_threshold,
            3
        );
        assert_eq!(
            config.servers["search"].fallback_server.as_deref(),
            Some("seq")
        );
        assert!(config.validate().is_ok());
    }
}
