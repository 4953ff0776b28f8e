//! Agent abstraction
//!
//! Every agent exposes the same three capabilities:
//! - `play`: propose new values for (some of) the parameters
//! - `update`: learn from scored records, one at a time
//! - `time_warp`: move the agent's exploration counter
//!
//! Agents are untrusted: callers filter every proposal through the
//! registry before applying it.

mod random;
mod remote;

pub use random::{sample_parameter, LocalRandomAgent};
pub use remote::RemoteAgent;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use paramex_wire::{ImageRecord, Metadata, ParamValue, ParametersDef};

use crate::error::{ExplorerError, ExplorerResult};

/// Table name of the local random agent.
pub const LOCAL_RANDOM_AGENT: &str = "Agent Random";

/// Everything an agent may read about the engine during a call.
#[derive(Debug, Clone, Copy)]
pub struct AgentContext<'a> {
    /// Engine identifier (`paramexplorer-{namespace}`)
    pub engine_id: &'a str,
    pub session_id: &'a str,
    /// Current shape of the parameter space
    pub definitions: &'a ParametersDef,
}

/// Values proposed by an agent plus free-form metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentProposal {
    pub parameters: BTreeMap<String, ParamValue>,
    pub metadata: Metadata,
}

/// One scored outcome for an agent to learn from.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningRecord {
    /// Flattened `{name -> number}` parameter values
    pub parameters: BTreeMap<String, f64>,
    pub metadata: Value,
    /// Records without a finite score are skipped by `update`
    pub score: Option<f64>,
}

impl From<&ImageRecord> for LearningRecord {
    fn from(record: &ImageRecord) -> Self {
        Self {
            parameters: record.flat_parameters(),
            metadata: if record.metadata.is_null() {
                Value::Object(Metadata::new())
            } else {
                record.metadata.clone()
            },
            score: record.finite_score(),
        }
    }
}

/// Parameter-proposal strategy.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Strategy name, as sent in `agent_name`.
    fn name(&self) -> &str;

    fn description(&self) -> String;

    /// Propose new parameter values. Never fails: an agent that cannot
    /// produce a proposal returns an empty one.
    async fn play(&mut self, ctx: &AgentContext<'_>) -> AgentProposal;

    /// Learn from `records` in order, skipping records without a finite score.
    async fn update(&mut self, ctx: &AgentContext<'_>, records: &[LearningRecord]);

    /// Advance (or rewind, when negative) the exploration counter.
    /// Non-finite `steps` are rejected without effect.
    async fn time_warp(&mut self, ctx: &AgentContext<'_>, steps: f64);

    /// Called when the agent becomes the active one through an explicit change.
    async fn activate(&mut self, _ctx: &AgentContext<'_>) {}
}

/// Name-keyed agent table with one active entry.
///
/// Holds a separate local random agent for manual generation, so manual
/// samples never touch the state of the active agent.
pub struct AgentTable {
    agents: BTreeMap<String, Box<dyn Agent>>,
    active: String,
    manual: Box<dyn Agent>,
    manual_in_use: bool,
}

impl AgentTable {
    /// Table whose only entry is `default` under `name`, active.
    pub fn new(name: &str, default: Box<dyn Agent>, manual: Box<dyn Agent>) -> Self {
        let mut agents = BTreeMap::new();
        agents.insert(name.to_string(), default);
        Self {
            agents,
            active: name.to_string(),
            manual,
            manual_in_use: false,
        }
    }

    pub fn insert(&mut self, name: &str, agent: Box<dyn Agent>) {
        self.agents.insert(name.to_string(), agent);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Agent> {
        self.agents.get(name).map(|a| &**a)
    }

    pub fn set_active(&mut self, name: &str) -> ExplorerResult<()> {
        if !self.agents.contains_key(name) {
            return Err(ExplorerError::UnknownAgent(name.to_string()));
        }
        self.active = name.to_string();
        Ok(())
    }

    /// Table name of the active agent (ignores a manual substitution).
    pub fn active_name(&self) -> &str {
        &self.active
    }

    /// The agent that currently answers `play`.
    pub fn active_mut(&mut self) -> &mut dyn Agent {
        if self.manual_in_use {
            return &mut *self.manual;
        }
        match self.agents.get_mut(&self.active) {
            Some(agent) => &mut **agent,
            None => &mut *self.manual,
        }
    }

    pub fn active(&self) -> &dyn Agent {
        if self.manual_in_use {
            return &*self.manual;
        }
        match self.agents.get(&self.active) {
            Some(agent) => &**agent,
            None => &*self.manual,
        }
    }

    /// Substitute the manual random agent until `end_manual`.
    pub fn begin_manual(&mut self) {
        self.manual_in_use = true;
    }

    pub fn end_manual(&mut self) {
        self.manual_in_use = false;
    }

    pub fn manual_in_use(&self) -> bool {
        self.manual_in_use
    }
}
