//! Remote agent proxy
//!
//! Forwards play/update/time-warp to a named strategy on the explorer
//! server. Every call carries the current parameter definitions. Failures
//! (transport errors, error statuses, unexpected shapes) are logged and
//! treated as no-ops so the render loop keeps going.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use paramex_wire::protocol::{
    AgentChangeRequest, AgentPlayRequest, AgentTimeWarpRequest, AgentUpdateRequest,
};
use paramex_wire::{ExplorerClient, Metadata, ParamValue};

use super::{Agent, AgentContext, AgentProposal, LearningRecord};
use crate::metrics::METRICS;
use crate::obs;

pub struct RemoteAgent {
    strategy: String,
    client: ExplorerClient,
}

impl RemoteAgent {
    pub fn new(strategy: &str, client: ExplorerClient) -> Self {
        Self {
            strategy: strategy.to_string(),
            client,
        }
    }

    fn degrade(&self, operation: &str, error: &dyn std::fmt::Display) {
        METRICS.inc_remote_failures();
        obs::emit_remote_failure(&self.strategy, operation, error);
    }
}

#[async_trait]
impl Agent for RemoteAgent {
    fn name(&self) -> &str {
        &self.strategy
    }

    fn description(&self) -> String {
        format!(
            "Remote agent: delegates to the {:?} strategy on the explorer server",
            self.strategy
        )
    }

    async fn play(&mut self, ctx: &AgentContext<'_>) -> AgentProposal {
        let request = AgentPlayRequest {
            session_id: ctx.session_id.to_string(),
            agent_name: self.strategy.clone(),
            parameters_def: ctx.definitions.clone(),
        };
        match self.client.agent_play(&request).await {
            Ok(resp) => {
                let parameters = resp
                    .parameters
                    .iter()
                    .filter_map(|(name, raw)| {
                        ParamValue::from_json(raw).map(|v| (name.clone(), v))
                    })
                    .collect();
                let metadata = match resp.metadata {
                    Value::Object(map) => map,
                    _ => Metadata::new(),
                };
                AgentProposal {
                    parameters,
                    metadata,
                }
            }
            Err(err) => {
                self.degrade("play", &err);
                AgentProposal::default()
            }
        }
    }

    async fn update(&mut self, ctx: &AgentContext<'_>, records: &[LearningRecord]) {
        for record in records {
            let Some(score) = record.score.filter(|s| s.is_finite()) else {
                debug!(agent_name = %self.strategy, "skipping record without a finite score");
                continue;
            };
            let request = AgentUpdateRequest {
                session_id: ctx.session_id.to_string(),
                agent_name: self.strategy.clone(),
                parameters_def: ctx.definitions.clone(),
                parameters: record.parameters.clone(),
                metadata: record.metadata.clone(),
                score,
            };
            if let Err(err) = self.client.agent_update(&request).await {
                self.degrade("update", &err);
            }
        }
    }

    async fn time_warp(&mut self, ctx: &AgentContext<'_>, steps: f64) {
        if !steps.is_finite() {
            tracing::warn!(agent_name = %self.strategy, steps = steps, "time warp needs a finite step count");
            return;
        }
        let n_steps = steps.trunc();
        // i64::MAX as f64 rounds up to 2^63, which is already out of range.
        if n_steps < i64::MIN as f64 || n_steps >= i64::MAX as f64 {
            tracing::warn!(agent_name = %self.strategy, steps = steps, "time warp step count out of range");
            return;
        }
        let request = AgentTimeWarpRequest {
            session_id: ctx.session_id.to_string(),
            agent_name: self.strategy.clone(),
            parameters_def: ctx.definitions.clone(),
            n_steps: n_steps as i64,
        };
        if let Err(err) = self.client.agent_time_warp(&request).await {
            self.degrade("time_warp", &err);
        }
    }

    async fn activate(&mut self, ctx: &AgentContext<'_>) {
        let request = AgentChangeRequest {
            id: ctx.engine_id.to_string(),
            session_id: ctx.session_id.to_string(),
            agent_name: self.strategy.clone(),
            parameters_def: ctx.definitions.clone(),
        };
        if let Err(err) = self.client.agent_change(&request).await {
            self.degrade("change", &err);
        }
    }
}
