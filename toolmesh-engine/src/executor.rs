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

//! Execution Engine.
//!
//! Resolves a tool to its owning server and runs the call under the full
//! failure policy: admission control, circuit-breaker gating, per-attempt
//! timeout, classify-then-retry with jittered backoff, one fallback hop,
//! and a normalized result envelope for every exit path.
//!
//! The admission permit is RAII and the transport call is isolated with
//! `catch_unwind`, so the slot is released exactly once even when an
//! adapter panics mid-call.

use crate::admission::{AdmissionController, AdmissionStats};
use crate::registry::ToolRegistry;
use crate::transport::TransportAdapter;
use anyhow::Result;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use toolmesh_core::{
    BreakerSnapshot, CircuitBreaker, EngineConfig, ExecutionResult, ServerConfig, ToolCallError,
};

/// Internal counters
#[derive(Debug, Default)]
struct EngineCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    overload_rejections: AtomicU64,
    circuit_rejections: AtomicU64,
    fallback_calls: AtomicU64,
}

/// Resilient tool execution engine.
pub struct ExecutionEngine {
    config: EngineConfig,
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn TransportAdapter>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    admission: AdmissionController,
    counters: EngineCounters,
}

impl ExecutionEngine {
    /// Build an engine from a validated configuration.
    ///
    /// One circuit breaker is created per configured server. Configuration
    /// is immutable afterwards; reload means building a new engine.
    pub fn new(
        config: EngineConfig,
        registry: Arc<ToolRegistry>,
        transport: Arc<dyn TransportAdapter>,
    ) -> Result<Self> {
        config.validate()?;

        let breakers = config
            .servers
            .iter()
            .map(|(name, server)| {
                (
                    name.clone(),
                    Arc::new(CircuitBreaker::new(name.clone(), server.circuit_breaker)),
                )
            })
            .collect();

        let admission = AdmissionController::new(config.max_concurrent);

        Ok(Self {
            config,
            registry,
            transport,
            breakers,
            admission,
            counters: EngineCounters::default(),
        })
    }

    /// Execute a tool by name.
    ///
    /// Always returns a complete [`ExecutionResult`]; no failure mode of a
    /// single call escapes as a panic or error.
    pub async fn execute(&self, tool_name: &str, params: serde_json::Value) -> ExecutionResult {
        let start = Instant::now();
        self.counters.calls.fetch_add(1, Ordering::Relaxed);

        // 1. Resolve. No transport, retry or breaker involvement on a miss.
        let Some(tool) = self.registry.get(tool_name) else {
            return self.finish(
                tool_name,
                ExecutionResult::failed(
                    ToolCallError::tool_not_found(tool_name),
                    "",
                    elapsed_ms(start),
                    0,
                    false,
                ),
            );
        };

        // 2. Admission: synchronous rejection, never a queued wait.
        let Some(_permit) = self.admission.try_acquire() else {
            self.counters
                .overload_rejections
                .fetch_add(1, Ordering::Relaxed);
            return self.finish(
                tool_name,
                ExecutionResult::failed(
                    ToolCallError::overloaded(self.admission.max_concurrent()),
                    "",
                    elapsed_ms(start),
                    0,
                    false,
                ),
            );
        };

        // 3-6. Primary run, then at most one fallback hop.
        let primary = tool.server_name.clone();
        let mut attempts = 0u32;

        let result = match self.run_on_server(&primary, tool_name, &params, &mut attempts).await {
            Ok(value) => {
                ExecutionResult::ok(value, primary, elapsed_ms(start), attempts, false)
            }
            Err(primary_err) => {
                let fallback = self
                    .config
                    .servers
                    .get(&primary)
                    .and_then(|s| s.fallback_server.clone())
                    // Bad parameters fail the same way everywhere.
                    .filter(|_| primary_err.kind != toolmesh_core::ErrorKind::InvalidRequest);

                match fallback {
                    Some(fallback_name) => {
                        self.counters.fallback_calls.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            tool = tool_name,
                            primary = %primary,
                            fallback = %fallback_name,
                            error = %primary_err,
                            "primary server failed, routing to fallback"
                        );

                        match self
                            .run_on_server(&fallback_name, tool_name, &params, &mut attempts)
                            .await
                        {
                            Ok(value) => ExecutionResult::ok(
                                value,
                                fallback_name,
                                elapsed_ms(start),
                                attempts,
                                true,
                            ),
                            Err(fallback_err) => ExecutionResult::failed(
                                fallback_err,
                                fallback_name,
                                elapsed_ms(start),
                                attempts,
                                true,
                            ),
                        }
                    }
                    None => ExecutionResult::failed(
                        primary_err,
                        primary,
                        elapsed_ms(start),
                        attempts,
                        false,
                    ),
                }
            }
        };

        self.finish(tool_name, result)
        // _permit drops here, releasing the admission slot exactly once.
    }

    /// One full run (breaker gate + retry loop) against a single server.
    async fn run_on_server(
        &self,
        server_name: &str,
        tool: &str,
        params: &serde_json::Value,
        attempts: &mut u32,
    ) -> Result<serde_json::Value, ToolCallError> {
        let Some(server) = self.config.servers.get(server_name) else {
            return Err(ToolCallError::connection_failed(
                server_name,
                format!("Server {} is not configured", server_name),
            ));
        };
        if !server.enabled {
            return Err(ToolCallError::connection_failed(
                server_name,
                format!("Server {} is disabled", server_name),
            ));
        }

        // Breakers are created per config entry, so this lookup cannot miss.
        let Some(breaker) = self.breakers.get(server_name) else {
            return Err(ToolCallError::internal(format!(
                "No circuit breaker for server {}",
                server_name
            )));
        };

        let _probe = match breaker.admit() {
            Ok(probe) => probe,
            Err(rejection) => {
                self.counters
                    .circuit_rejections
                    .fetch_add(1, Ordering::Relaxed);
                return Err(ToolCallError::circuit_open(
                    server_name,
                    rejection.retry_after.as_millis() as u64,
                ));
            }
        };

        let mut attempt = 0u32;
        let error = loop {
            attempt += 1;
            *attempts += 1;

            match self.attempt(server, tool, params).await {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    // Classification decides whether to loop; the breaker
                    // is not consulted again mid-sequence.
                    if err.retryable() && attempt < server.retry.max_attempts {
                        let delay = server.retry.delay_for_attempt(attempt);
                        tracing::debug!(
                            tool,
                            server = server_name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying after transient failure"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    break err;
                }
            }
        };

        // One breaker report per exhausted run, never per attempt.
        if error.kind.counts_toward_breaker() {
            breaker.record_failure();
        }
        Err(error)
    }

    /// One transport attempt under the server's deadline, panic-isolated.
    async fn attempt(
        &self,
        server: &ServerConfig,
        tool: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError> {
        let deadline = Duration::from_millis(server.timeout_ms);
        let call = AssertUnwindSafe(self.transport.invoke(server, tool, params)).catch_unwind();

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_panic)) => Err(ToolCallError::internal(format!(
                "Transport adapter panicked while calling server {}",
                server.name
            ))),
            Err(_) => Err(ToolCallError::timeout(&server.name, server.timeout_ms)),
        }
    }

    fn finish(&self, tool_name: &str, result: ExecutionResult) -> ExecutionResult {
        if result.success {
            tracing::debug!(
                tool = tool_name,
                server = %result.server_used,
                attempts = result.attempts,
                elapsed_ms = result.execution_time_ms,
                fallback = result.fallback_used,
                "tool call succeeded"
            );
        } else {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                tool = tool_name,
                server = %result.server_used,
                attempts = result.attempts,
                elapsed_ms = result.execution_time_ms,
                error = ?result.error_kind(),
                "tool call failed"
            );
        }
        result
    }

    /// The registry this engine resolves against.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Per-server breaker states, for the metrics surface.
    pub fn breaker_states(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect()
    }

    /// Admission statistics.
    pub fn admission_stats(&self) -> AdmissionStats {
        self.admission.stats()
    }

    /// Engine call statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            overload_rejections: self.counters.overload_rejections.load(Ordering::Relaxed),
            circuit_rejections: self.counters.circuit_rejections.load(Ordering::Relaxed),
            fallback_calls: self.counters.fallback_calls.load(Ordering::Relaxed),
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Engine call statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub calls: u64,
    pub failures: u64,
    pub overload_rejections: u64,
    pub circuit_rejections: u64,
    pub fallback_calls: u64,
}
