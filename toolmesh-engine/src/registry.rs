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

//! Tool Registry - in-memory index over merged tool definitions.
//!
//! The registry holds exactly one immutable snapshot at a time. Refresh
//! builds a fresh map from the definition cache plus the built-in set and
//! swaps the `Arc` pointer; concurrent readers keep whatever snapshot they
//! resolved against and never observe a partially merged map.
//!
//! ## Collision precedence
//!
//! Tool names must be unique after merge. When sources collide:
//!
//! 1. Built-in tools always beat external ones.
//! 2. Among external servers, the most recently discovered entry
//!    (greatest `last_updated`) wins.
//! 3. Equal timestamps are broken by server name, lexicographically later
//!    name winning, so the merge stays deterministic.
//!
//! ## Failure semantics
//!
//! A failed cache load leaves the previous snapshot serving (stale but
//! available beats empty but fresh) and surfaces the error to the caller
//! so orchestration code can alert.

use crate::cache::{CacheError, ServerToolsEntry, ToolCache};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use toolmesh_core::{ExecutionMode, ToolDefinition};

/// Immutable view published by one refresh.
#[derive(Debug, Default)]
struct Snapshot {
    tools: HashMap<String, ToolDefinition>,
}

/// Registry metrics
#[derive(Debug, Default)]
struct RegistryMetrics {
    refreshes: AtomicU64,
    failed_refreshes: AtomicU64,
    lookups: AtomicU64,
}

/// In-memory tool index with bounded-staleness refresh.
pub struct ToolRegistry {
    cache: ToolCache,
    builtins: Vec<ToolDefinition>,
    snapshot: RwLock<Arc<Snapshot>>,
    metrics: RegistryMetrics,
}

impl ToolRegistry {
    /// Create a registry serving only the built-in tools.
    ///
    /// External definitions appear after the first [`ToolRegistry::refresh`].
    pub fn new(cache: ToolCache, builtins: Vec<ToolDefinition>) -> Self {
        let initial = Snapshot {
            tools: Self::merge(&builtins, &HashMap::new()),
        };
        Self {
            cache,
            builtins,
            snapshot: RwLock::new(Arc::new(initial)),
            metrics: RegistryMetrics::default(),
        }
    }

    /// Reload the definition cache and publish a new snapshot.
    ///
    /// On a load failure the previous snapshot stays in place and the
    /// error is returned; correctness-wise the refresh is a no-op.
    pub fn refresh(&self) -> Result<(), CacheError> {
        let external = match self.cache.load() {
            Ok(entries) => entries,
            Err(e) => {
                self.metrics.failed_refreshes.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    path = ?self.cache.path(),
                    error = %e,
                    "tool cache refresh failed, keeping last-known-good snapshot"
                );
                return Err(e);
            }
        };

        let merged = Self::merge(&self.builtins, &external);
        let tool_count = merged.len();

        let new_snapshot = Arc::new(Snapshot { tools: merged });
        *self.snapshot.write() = new_snapshot;

        self.metrics.refreshes.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            tools = tool_count,
            servers = external.len(),
            "tool registry refreshed"
        );
        Ok(())
    }

    /// Merge built-ins over external definitions.
    ///
    /// Externals are inserted in ascending `(last_updated, server_name)`
    /// order so that later (more recent) discoveries overwrite earlier
    /// ones; built-ins are inserted last and overwrite everything.
    fn merge(
        builtins: &[ToolDefinition],
        external: &HashMap<String, ServerToolsEntry>,
    ) -> HashMap<String, ToolDefinition> {
        let mut tools: HashMap<String, ToolDefinition> = HashMap::new();

        let mut servers: Vec<(&String, &ServerToolsEntry)> = external.iter().collect();
        servers.sort_by(|a, b| (a.1.last_updated, a.0).cmp(&(b.1.last_updated, b.0)));

        for (server_name, entry) in servers {
            for cached in &entry.tools {
                let definition = ToolDefinition::external(
                    &cached.name,
                    &cached.description,
                    cached.parameter_schema.clone(),
                    server_name,
                );
                if let Some(losing) = tools.insert(cached.name.clone(), definition) {
                    tracing::debug!(
                        tool = %cached.name,
                        winner = %server_name,
                        loser = %losing.server_name,
                        "tool name collision, most recent discovery wins"
                    );
                }
            }
        }

        for builtin in builtins {
            if let Some(losing) = tools.insert(builtin.name.clone(), builtin.clone()) {
                tracing::debug!(
                    tool = %builtin.name,
                    loser = %losing.server_name,
                    "tool name collision, built-in wins"
                );
            }
        }

        tools
    }

    /// All tools in the current snapshot. Never blocks on I/O.
    pub fn all_tools(&self) -> HashMap<String, ToolDefinition> {
        self.metrics.lookups.fetch_add(1, Ordering::Relaxed);
        self.current().tools.clone()
    }

    /// Tools filtered by execution mode.
    pub fn tools_by_mode(&self, mode: ExecutionMode) -> HashMap<String, ToolDefinition> {
        self.metrics.lookups.fetch_add(1, Ordering::Relaxed);
        self.current()
            .tools
            .iter()
            .filter(|(_, tool)| tool.execution_mode == mode)
            .map(|(name, tool)| (name.clone(), tool.clone()))
            .collect()
    }

    /// One tool by name.
    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.metrics.lookups.fetch_add(1, Ordering::Relaxed);
        self.current().tools.get(name).cloned()
    }

    /// True only if every named tool is present.
    pub fn has_tools(&self, names: &[&str]) -> bool {
        self.metrics.lookups.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.current();
        names.iter().all(|name| snapshot.tools.contains_key(*name))
    }

    /// Registry statistics.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            tool_count: self.current().tools.len(),
            refreshes: self.metrics.refreshes.load(Ordering::Relaxed),
            failed_refreshes: self.metrics.failed_refreshes.load(Ordering::Relaxed),
            lookups: self.metrics.lookups.load(Ordering::Relaxed),
        }
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }
}

/// Registry statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub tool_count: usize,
    pub refreshes: u64,
    pub failed_refreshes: u64,
    pub lookups: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedTool;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn cached(name: &str) -> CachedTool {
        CachedTool {
            name: name.to_string(),
            description: format!("{} tool", name),
            parameter_schema: serde_json::json!({ "type": "object" }),
        }
    }

    fn entry(tools: &[&str], ts: i64) -> ServerToolsEntry {
        ServerToolsEntry {
            tools: tools.iter().map(|n| cached(n)).collect(),
            last_updated: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    fn write_cache(dir: &TempDir, entries: &HashMap<String, ServerToolsEntry>) -> ToolCache {
        let cache = ToolCache::new(dir.path().join("tool_cache.json"));
        cache.store(entries).unwrap();
        ToolCache::new(cache.path().to_path_buf())
    }

    #[test]
    fn test_builtin_beats_external() {
        let dir = TempDir::new().unwrap();
        let mut entries = HashMap::new();
        entries.insert("external".to_string(), entry(&["think"], 100));
        let cache = write_cache(&dir, &entries);

        let builtin = ToolDefinition::builtin(
            "think",
            "Step-by-step reasoning",
            serde_json::json!({ "type": "object" }),
            "builtin",
        );
        let registry = ToolRegistry::new(cache, vec![builtin]);
        registry.refresh().unwrap();

        let tool = registry.get("think").unwrap();
        assert_eq!(tool.server_name, "builtin");
        assert_eq!(tool.source, toolmesh_core::ToolSource::Builtin);
    }

    #[test]
    fn test_most_recent_external_wins() {
        let dir = TempDir::new().unwrap();
        let mut entries = HashMap::new();
        entries.insert("old-server".to_string(), entry(&["web_search"], 100));
        entries.insert("new-server".to_string(), entry(&["web_search"], 200));
        let cache = write_cache(&dir, &entries);

        let registry = ToolRegistry::new(cache, vec![]);
        registry.refresh().unwrap();

        assert_eq!(registry.get("web_search").unwrap().server_name, "new-server");
    }

    #[test]
    fn test_timestamp_tie_broken_by_name() {
        let dir = TempDir::new().unwrap();
        let mut entries = HashMap::new();
        entries.insert("alpha".to_string(), entry(&["lookup"], 100));
        entries.insert("beta".to_string(), entry(&["lookup"], 100));
        let cache = write_cache(&dir, &entries);

        let registry = ToolRegistry::new(cache, vec![]);
        registry.refresh().unwrap();

        // Lexicographically later server name wins the tie.
        assert_eq!(registry.get("lookup").unwrap().server_name, "beta");
    }

    #[test]
    fn test_refresh_idempotent_without_change() {
        let dir = TempDir::new().unwrap();
        let mut entries = HashMap::new();
        entries.insert("srv".to_string(), entry(&["a", "b"], 100));
        let cache = write_cache(&dir, &entries);

        let registry = ToolRegistry::new(cache, vec![]);
        registry.refresh().unwrap();
        let first = registry.all_tools();
        registry.refresh().unwrap();
        let second = registry.all_tools();

        assert_eq!(first, second);
    }

    #[test]
    fn test_failed_refresh_keeps_prior_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut entries = HashMap::new();
        entries.insert("srv".to_string(), entry(&["web_search"], 100));
        let cache = write_cache(&dir, &entries);
        let path = cache.path().to_path_buf();

        let registry = ToolRegistry::new(cache, vec![]);
        registry.refresh().unwrap();
        assert!(registry.has_tools(&["web_search"]));

        std::fs::write(&path, "{ corrupted").unwrap();
        assert!(registry.refresh().is_err());

        // Prior snapshot unchanged.
        assert!(registry.has_tools(&["web_search"]));
        assert_eq!(registry.stats().failed_refreshes, 1);
    }

    #[test]
    fn test_has_tools_requires_all() {
        let dir = TempDir::new().unwrap();
        let mut entries = HashMap::new();
        entries.insert("srv".to_string(), entry(&["a", "b"], 100));
        let cache = write_cache(&dir, &entries);

        let registry = ToolRegistry::new(cache, vec![]);
        registry.refresh().unwrap();

        assert!(registry.has_tools(&["a", "b"]));
        assert!(!registry.has_tools(&["a", "missing"]));
        assert!(registry.has_tools(&[]));
    }

    #[test]
    fn test_tools_by_mode_filters() {
        let dir = TempDir::new().unwrap();
        let cache = ToolCache::new(dir.path().join("absent.json"));

        let immediate = ToolDefinition::builtin(
            "think",
            "",
            serde_json::json!({ "type": "object" }),
            "builtin",
        );
        let deferred = ToolDefinition::builtin(
            "index_repo",
            "",
            serde_json::json!({ "type": "object" }),
            "builtin",
        )
        .with_execution_mode(ExecutionMode::Deferred);

        let registry = ToolRegistry::new(cache, vec![immediate, deferred]);

        let deferred_tools = registry.tools_by_mode(ExecutionMode::Deferred);
        assert_eq!(deferred_tools.len(), 1);
        assert!(deferred_tools.contains_key("index_repo"));
    }
}
