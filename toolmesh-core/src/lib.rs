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

//! Toolmesh Core
//!
//! Domain types and pure state machines shared by the toolmesh runtime:
//! tool definitions, server configuration, the call error taxonomy, the
//! normalized result envelope, and the per-server circuit breaker.

pub mod breaker;
pub mod config;
pub mod definition;
pub mod error;
pub mod result;
pub mod retry;

pub use breaker::{BreakerRejection, BreakerSnapshot, BreakerState, CircuitBreaker, ProbePermit};
pub use config::{
    CircuitBreakerPolicy, EngineConfig, ServerConfig, TransportKind, DEFAULT_MAX_CONCURRENT,
};
pub use definition::{ExecutionMode, ToolDefinition, ToolSource};
pub use error::{ErrorKind, ToolCallError};
pub use result::{CallEvent, ExecutionResult};
pub use retry::RetryPolicy;
