//! Structured observability hooks for exploration lifecycle events.
//!
//! This module provides:
//! - Batch-scoped tracing spans via `batch_span`
//! - Emission functions for batch, registry, agent and session events
//!
//! Lifecycle events are emitted at `info!`; degraded remote calls and
//! rejected definitions at `warn!`.

use tracing::{debug, info, warn};

/// Span covering one batch, tagged with session and agent.
///
/// Attach it to the batch future with `tracing::Instrument` so it stays
/// correct across await points.
///
/// # Example
///
/// ```ignore
/// engine.step(renderer, 5).instrument(batch_span(&session_id, "Agent CMA-ES")).await
/// ```
pub fn batch_span(session_id: &str, agent_name: &str) -> tracing::Span {
    tracing::info_span!(
        "paramex.batch",
        session_id = %session_id,
        agent_name = %agent_name
    )
}

pub fn emit_batch_started(session_id: &str, agent_name: &str, size: usize) {
    info!(
        event = "batch.started",
        session_id = %session_id,
        agent_name = %agent_name,
        size = size,
    );
}

/// Emit event: one step captured a sample.
pub fn emit_step_captured(session_id: &str, index: usize, size: usize) {
    info!(event = "batch.step_captured", session_id = %session_id, index = index, size = size);
}

/// Emit event: batch reached its size and was handed to persistence.
pub fn emit_batch_finished(session_id: &str, samples: usize, persisted: bool) {
    info!(
        event = "batch.finished",
        session_id = %session_id,
        samples = samples,
        persisted = persisted,
    );
}

pub fn emit_batch_reset(session_id: &str, discarded: usize) {
    info!(event = "batch.reset", session_id = %session_id, discarded = discarded);
}

/// Emit event: a definition failed validation and was dropped (warning level).
pub fn emit_parameter_rejected(name: &str, reason: &str) {
    warn!(event = "registry.rejected", parameter = %name, reason = %reason);
}

/// Emit event: a proposed value was not applied.
pub fn emit_proposal_filtered(name: &str, reason: &str) {
    debug!(event = "registry.proposal_filtered", parameter = %name, reason = %reason);
}

pub fn emit_schema_declared(parameters: usize, digest: &str) {
    info!(event = "registry.declared", parameters = parameters, digest = %digest);
}

/// Emit event: a remote call failed and was degraded to a no-op (warning level).
pub fn emit_remote_failure(agent_name: &str, operation: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "agent.remote_failure",
        agent_name = %agent_name,
        operation = %operation,
        error = %error,
    );
}

pub fn emit_agent_changed(session_id: &str, agent_name: &str) {
    info!(event = "agent.changed", session_id = %session_id, agent_name = %agent_name);
}

pub fn emit_time_warp(agent_name: &str, steps: f64) {
    info!(event = "agent.time_warp", agent_name = %agent_name, steps = steps);
}

/// Emit event: persistence failed; the batch is retained (warning level).
pub fn emit_save_failed(session_id: &str, samples: usize, error: &dyn std::fmt::Display) {
    warn!(
        event = "persistence.save_failed",
        session_id = %session_id,
        samples = samples,
        error = %error,
    );
}

pub fn emit_saved(session_id: &str, ids: &[u64]) {
    info!(event = "persistence.saved", session_id = %session_id, records = ids.len());
}

/// Emit event: the server stored fewer records than were sent; samples
/// without an image are dropped server side (warning level).
pub fn emit_samples_skipped(session_id: &str, sent: usize, stored: usize) {
    warn!(
        event = "persistence.samples_skipped",
        session_id = %session_id,
        sent = sent,
        stored = stored,
    );
}

pub fn emit_session_switched(namespace: &str, session_id: &str) {
    info!(event = "session.switched", namespace = %namespace, session_id = %session_id);
}

pub fn emit_session_created(namespace: &str, session_id: &str) {
    info!(event = "session.created", namespace = %namespace, session_id = %session_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_span_create() {
        let span = batch_span("test-session", "Agent Random");
        let _entered = span.enter();
    }
}
