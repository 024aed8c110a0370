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

//! Toolmesh Engine
//!
//! Tool registry and resilient execution runtime. Callers invoke a tool by
//! name; the engine resolves the owning server, applies timeout, retry,
//! circuit-breaker gating, fallback routing and admission control, and
//! returns a normalized result envelope.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Execution Engine                       │
//! ├──────────────────────────────────────────────────────────┤
//! │  admission ──► breaker gate ──► timeout ──► classify     │
//! │      │              │                          │         │
//! │      │              │            retry / fallback        │
//! │      ▼              ▼                          ▼         │
//! │  ┌─────────┐  ┌───────────┐        ┌──────────────────┐  │
//! │  │Semaphore│  │ per-server│        │ TransportAdapter │  │
//! │  └─────────┘  │  breakers │        │ (http/in-process)│  │
//! │               └───────────┘        └──────────────────┘  │
//! │                     │                                    │
//! │            ┌────────▼─────────┐      ┌────────────────┐  │
//! │            │   ToolRegistry   │◄─────│  ToolCache     │  │
//! │            │ (Arc snapshots)  │      │  (disk JSON)   │  │
//! │            └──────────────────┘      └────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Immutable snapshots**: the registry publishes one `Arc<Snapshot>`
//!    at a time; refresh builds a new map off to the side and swaps the
//!    pointer, so readers never see a partially merged view.
//!
//! 2. **Classify, then loop**: transport failures are mapped into the
//!    closed error taxonomy before any retry decision, keeping
//!    classification and control flow independently testable.
//!
//! 3. **Fast rejection**: admission and breaker checks reject synchronously
//!    with `Overloaded`/`CircuitOpen` rather than queueing, bounding caller
//!    latency and protecting failing servers from retry storms.

pub mod admission;
pub mod builtin;
pub mod cache;
pub mod executor;
pub mod registry;
pub mod transport;

pub use admission::{AdmissionController, AdmissionStats};
pub use builtin::{builtin_tools, register_builtin_handlers, ThinkHandler, BUILTIN_SERVER};
pub use cache::{CacheError, CachedTool, ServerToolsEntry, ToolCache};
pub use executor::{EngineStats, ExecutionEngine};
pub use registry::{RegistryStats, ToolRegistry};
pub use transport::{
    HandlerRegistry, HttpTransport, InProcessTransport, ToolHandler, Transport, TransportAdapter,
};
