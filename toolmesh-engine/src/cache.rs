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

//! Tool definition cache (disk format).
//!
//! Durable snapshot of discovered tool metadata, written by the discovery
//! process and read by the registry on refresh:
//!
//! ```json
//! {
//!   "search-server": {
//!     "tools": [
//!       { "name": "web_search", "description": "...", "parameter_schema": { ... } }
//!     ],
//!     "last_updated": "2025-06-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! A missing file is an empty external-tool set, not an error. Malformed
//! content is a typed error so the registry can retain its previous
//! snapshot and report the failure upward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cache read/write errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed cache content: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One tool as stored in the cache, before merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub parameter_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

/// Tools discovered from one server, with the discovery timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerToolsEntry {
    pub tools: Vec<CachedTool>,
    pub last_updated: DateTime<Utc>,
}

/// Handle to the on-disk cache file.
pub struct ToolCache {
    path: PathBuf,
}

impl ToolCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full cache.
    ///
    /// Missing file yields an empty map. I/O and parse failures are
    /// returned to the caller; the caller decides what to keep serving.
    pub fn load(&self) -> Result<HashMap<String, ServerToolsEntry>, CacheError> {
        if !self.path.exists() {
            tracing::debug!(path = ?self.path, "tool cache file absent, treating as empty");
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let entries = serde_json::from_str(&content)?;
        Ok(entries)
    }

    /// Write the full cache atomically (temp file + rename).
    ///
    /// Used by the discovery side; the registry never writes.
    pub fn store(&self, entries: &HashMap<String, ServerToolsEntry>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(path = ?self.path, servers = entries.len(), "tool cache written");
        Ok(())
    }
}
