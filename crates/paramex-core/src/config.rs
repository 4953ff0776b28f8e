//! Engine configuration
//!
//! Defaults are read from `PARAMEX_*` environment variables; builders
//! override individual fields.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use paramex_wire::{RemoteConfig, DEFAULT_SERVER_URL};

use crate::error::{ExplorerError, ExplorerResult};

/// Hard ceiling for the configurable batch maximum.
pub const BATCH_SIZE_CEILING: usize = 64;

/// Default batch maximum.
pub const DEFAULT_BATCH_SIZE_MAX: usize = 10;

/// Default namespace when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Explorer engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Explorer server URL
    pub server_url: String,
    /// Tool namespace; scopes session keys and the engine id
    pub namespace: String,
    /// Upper bound applied to every requested batch size
    pub batch_size_max: usize,
    /// Durable session store file (in-memory store when unset)
    pub session_file: Option<PathBuf>,
    /// Master seed of the local random agent
    pub seed: Option<String>,
    /// Remote agents: agent table name -> server strategy name
    pub remote_agents: BTreeMap<String, String>,
    /// Transport timeout
    pub timeout: Option<Duration>,
}

fn default_remote_agents() -> BTreeMap<String, String> {
    [
        ("Agent CMA-ES", "cma-es"),
        ("Agent Gaussian", "gaussian"),
        ("Agent Open-ended", "open-ended"),
    ]
    .into_iter()
    .map(|(label, strategy)| (label.to_string(), strategy.to_string()))
    .collect()
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        ExplorerConfig {
            server_url: std::env::var("PARAMEX_SERVER")
                .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string()),
            namespace: std::env::var("PARAMEX_NAMESPACE")
                .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string()),
            batch_size_max: std::env::var("PARAMEX_BATCH_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BATCH_SIZE_MAX),
            session_file: std::env::var("PARAMEX_SESSION_FILE").ok().map(PathBuf::from),
            seed: std::env::var("PARAMEX_SEED").ok(),
            remote_agents: default_remote_agents(),
            timeout: std::env::var("PARAMEX_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
        }
    }
}

impl ExplorerConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific server and namespace, ignoring the environment
    pub fn new(server_url: &str, namespace: &str) -> Self {
        ExplorerConfig {
            server_url: server_url.to_string(),
            namespace: namespace.to_string(),
            batch_size_max: DEFAULT_BATCH_SIZE_MAX,
            session_file: None,
            seed: None,
            remote_agents: default_remote_agents(),
            timeout: None,
        }
    }

    pub fn with_batch_size_max(mut self, max: usize) -> Self {
        self.batch_size_max = max;
        self
    }

    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    pub fn with_seed(mut self, seed: &str) -> Self {
        self.seed = Some(seed.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register an additional remote agent (or replace an existing label)
    pub fn with_remote_agent(mut self, label: &str, strategy: &str) -> Self {
        self.remote_agents
            .insert(label.to_string(), strategy.to_string());
        self
    }

    /// Drop every remote agent, leaving only the local random one
    pub fn without_remote_agents(mut self) -> Self {
        self.remote_agents.clear();
        self
    }

    /// Identifier sent as `id` on data endpoints
    pub fn engine_id(&self) -> String {
        format!("paramexplorer-{}", self.namespace)
    }

    /// Transport settings derived from this config
    pub fn remote_config(&self) -> RemoteConfig {
        let config = RemoteConfig::new(&self.server_url);
        match self.timeout {
            Some(timeout) => config.with_timeout(timeout),
            None => config,
        }
    }

    /// Reject out-of-range settings.
    pub fn validate(&self) -> ExplorerResult<()> {
        if self.batch_size_max <= 1 || self.batch_size_max > BATCH_SIZE_CEILING {
            return Err(ExplorerError::InvalidConfig(format!(
                "batch_size_max must be in 2..={BATCH_SIZE_CEILING}, got {}",
                self.batch_size_max
            )));
        }
        if self.server_url.trim().is_empty() {
            return Err(ExplorerError::InvalidConfig(
                "server_url must not be empty".to_string(),
            ));
        }
        if let Some((label, _)) = self
            .remote_agents
            .iter()
            .find(|(label, strategy)| label.trim().is_empty() || strategy.trim().is_empty())
        {
            return Err(ExplorerError::InvalidConfig(format!(
                "remote agent entry {label:?} needs a label and a strategy"
            )));
        }
        Ok(())
    }
}
