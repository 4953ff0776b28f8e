//! In-memory fake of the explorer server (testing only)
//!
//! `MemoryBackend` implements [`Transport`] and answers every endpoint the
//! way the real server does: records are stored per session with ids
//! starting at 1, `load_data` only returns scored records, and one fake
//! learner is kept per `(session_id, agent_name)`.
//!
//! Failures can be injected per endpoint, and every call is logged so tests
//! can assert on exactly what crossed the wire.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::WireError;
use crate::protocol::Endpoint;
use crate::schema::{
    flatten_numeric, schema_digest, ImageRecord, ParamValue, ParameterKind, ParametersDef,
    UNSCORED_SENTINEL,
};
use crate::transport::Transport;
use crate::WireResult;

/// Strategy names the fake learner accepts by default.
pub const DEFAULT_STRATEGIES: [&str; 4] = ["random", "cma-es", "gaussian", "open-ended"];

/// How an injected failure manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// No response at all
    Network,
    /// `status = "error"`
    ErrorStatus,
    /// A body without a status field
    Malformed,
}

/// One request received by the fake.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: Endpoint,
    pub body: Value,
}

/// Observable state of one fake learner.
#[derive(Debug, Clone, Default)]
pub struct FakeAgentState {
    /// Number of `agent/play` calls served
    pub plays: u64,
    /// `(flat parameters, score)` pairs received through `agent/update`
    pub updates: Vec<(std::collections::BTreeMap<String, f64>, f64)>,
    /// Exploration counter moved by `agent/time_warp`
    pub time: i64,
    /// Digest of the schema the learner was created for
    pub schema: String,
    /// Times the learner was (re)created for this key
    pub generation: u64,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    id: u64,
    parameters: Value,
    metadata: Value,
    score: Value,
    timestamp: Value,
    url: Option<String>,
}

impl StoredRecord {
    fn is_scored(&self) -> bool {
        self.score.as_f64() != Some(UNSCORED_SENTINEL)
    }

    fn to_image_record(&self) -> ImageRecord {
        ImageRecord {
            id: Some(self.id),
            score: self.score.as_f64(),
            parameters: self.parameters.clone(),
            metadata: self.metadata.clone(),
            timestamp: self.timestamp.clone(),
            url: self.url.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct BackendState {
    records: HashMap<String, Vec<StoredRecord>>,
    agents: HashMap<(String, String), FakeAgentState>,
    strategies: Vec<String>,
    failures: HashMap<Endpoint, FailureMode>,
    calls: Vec<RecordedCall>,
    play_override: Option<Value>,
}

/// In-memory explorer server.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<BackendState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_strategies(DEFAULT_STRATEGIES)
    }

    /// Create a backend that only knows the given strategy names.
    pub fn with_strategies<I, S>(strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = BackendState {
            strategies: strategies.into_iter().map(Into::into).collect(),
            ..BackendState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Make every subsequent call to `endpoint` fail.
    pub fn fail(&self, endpoint: Endpoint, mode: FailureMode) {
        self.state.lock().unwrap().failures.insert(endpoint, mode);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Answer `agent/play` with this raw `parameters` object instead of the fake learner's proposal.
    pub fn set_play_parameters(&self, parameters: Option<Value>) {
        self.state.lock().unwrap().play_override = parameters;
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Bodies of the calls received on one endpoint.
    pub fn calls_to(&self, endpoint: Endpoint) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .map(|c| c.body.clone())
            .collect()
    }

    /// All records of a session, scored or not.
    pub fn records(&self, session_id: &str) -> Vec<ImageRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(session_id)
            .map(|rs| rs.iter().map(StoredRecord::to_image_record).collect())
            .unwrap_or_default()
    }

    pub fn agent_state(&self, session_id: &str, agent_name: &str) -> Option<FakeAgentState> {
        self.state
            .lock()
            .unwrap()
            .agents
            .get(&(session_id.to_string(), agent_name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl Transport for MemoryBackend {
    async fn call(&self, endpoint: Endpoint, body: Value) -> WireResult<Value> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall {
            endpoint,
            body: body.clone(),
        });

        match state.failures.get(&endpoint) {
            Some(FailureMode::Network) => {
                return Err(WireError::Transport {
                    endpoint,
                    reason: "injected network failure".to_string(),
                })
            }
            Some(FailureMode::ErrorStatus) => return Ok(error("injected failure")),
            Some(FailureMode::Malformed) => return Ok(json!({ "unexpected": true })),
            None => {}
        }

        Ok(match endpoint {
            Endpoint::AgentPlay => state.agent_play(&body),
            Endpoint::AgentUpdate => state.agent_update(&body),
            Endpoint::AgentTimeWarp => state.agent_time_warp(&body),
            Endpoint::AgentChange => state.agent_change(&body),
            Endpoint::LoadData => state.load_data(&body),
            Endpoint::UpdateScore => state.update_score(&body),
            Endpoint::Save => state.save(&body),
        })
    }
}

fn error(message: &str) -> Value {
    json!({ "status": "error", "message": message })
}

fn str_field<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field).and_then(Value::as_str)
}

fn parse_defs(body: &Value) -> ParametersDef {
    body.get("parameters_def")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

impl BackendState {
    /// Look up the learner for `(session, agent)`, creating it when absent,
    /// when `force_new` is set, or when the schema actually changed.
    /// Re-declaring an unchanged schema is a no-op.
    fn learner(
        &mut self,
        body: &Value,
        force_new: bool,
    ) -> Result<(&mut FakeAgentState, ParametersDef), Value> {
        let session_id = str_field(body, "session_id").ok_or_else(|| error("session_id not set"))?;
        let agent_name = str_field(body, "agent_name").ok_or_else(|| error("agent_name not set"))?;
        if !self.strategies.iter().any(|s| s == agent_name) {
            return Err(error(&format!("Unknown agent name: {agent_name}")));
        }

        let defs = parse_defs(body);
        let digest = schema_digest(&defs);
        let key = (session_id.to_string(), agent_name.to_string());
        let entry = self.agents.entry(key).or_default();
        if force_new || entry.generation == 0 || entry.schema != digest {
            *entry = FakeAgentState {
                schema: digest,
                generation: entry.generation + 1,
                ..FakeAgentState::default()
            };
        }
        Ok((entry, defs))
    }

    fn agent_play(&mut self, body: &Value) -> Value {
        let play_override = self.play_override.clone();
        let (agent, defs) = match self.learner(body, false) {
            Ok(found) => found,
            Err(e) => return e,
        };
        let phase = agent.plays as i64 + agent.time;
        agent.plays += 1;

        let parameters = play_override.unwrap_or_else(|| {
            let proposal: serde_json::Map<String, Value> = defs
                .iter()
                .filter_map(|(name, def)| propose(&def.kind, phase).map(|v| (name.clone(), v)))
                .collect();
            Value::Object(proposal)
        });

        json!({
            "status": "ok",
            "parameters": parameters,
            "metadata": { "agent_name": str_field(body, "agent_name"), "pop_idx": agent.time },
        })
    }

    fn agent_update(&mut self, body: &Value) -> Value {
        let (agent, _) = match self.learner(body, false) {
            Ok(found) => found,
            Err(e) => return e,
        };
        let params = body
            .get("parameters")
            .map(flatten_numeric)
            .unwrap_or_default();
        let score = body.get("score").and_then(Value::as_f64).unwrap_or(f64::NAN);
        agent.updates.push((params, score));
        json!({ "status": "ok" })
    }

    fn agent_time_warp(&mut self, body: &Value) -> Value {
        let Some(n_steps) = body.get("n_steps") else {
            return error("n_steps not set");
        };
        let Some(n_steps) = n_steps.as_i64() else {
            return error("n_steps must be an integer");
        };
        match self.learner(body, false) {
            Ok((agent, _)) => {
                agent.time = agent.time.saturating_add(n_steps);
                json!({ "status": "ok" })
            }
            Err(e) => e,
        }
    }

    fn agent_change(&mut self, body: &Value) -> Value {
        match self.learner(body, true) {
            Ok(_) => json!({ "status": "ok" }),
            Err(e) => e,
        }
    }

    fn save(&mut self, body: &Value) -> Value {
        let Some(session_id) = str_field(body, "session_id") else {
            return error("param explorer id not set OR session_id not set");
        };
        let Some(batch) = body.get("batch_parameters").and_then(Value::as_array) else {
            return error("'batch_parameters' must be a list");
        };
        let metadata = body
            .get("batch_metadata")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let records = self.records.entry(session_id.to_string()).or_default();
        let mut ids = Vec::with_capacity(batch.len());
        for (i, entry) in batch.iter().enumerate() {
            let Some(fields) = entry.as_object() else {
                continue;
            };
            let mut parameters = fields.clone();
            let score = parameters.remove("score").unwrap_or(json!(UNSCORED_SENTINEL));
            let image = parameters.remove("image_data").filter(|v| !v.is_null());
            let timestamp = parameters.remove("image_timestamp").filter(|v| !v.is_null());
            // Records without an image are not stored.
            let (Some(_), Some(timestamp)) = (image, timestamp) else {
                continue;
            };

            let id = records.last().map(|r| r.id + 1).unwrap_or(1);
            records.push(StoredRecord {
                id,
                parameters: Value::Object(parameters),
                metadata: metadata.get(i).cloned().unwrap_or_else(|| json!({})),
                score,
                timestamp,
                url: Some(format!("memory://{session_id}/{id}.jpg")),
            });
            ids.push(id);
        }
        json!({ "status": "ok", "images_ids": ids })
    }

    fn load_data(&mut self, body: &Value) -> Value {
        let Some(session_id) = str_field(body, "session_id") else {
            return error("session_id not set");
        };
        let infos: Vec<ImageRecord> = self
            .records
            .get(session_id)
            .map(|rs| {
                rs.iter()
                    .filter(|r| r.is_scored())
                    .map(StoredRecord::to_image_record)
                    .collect()
            })
            .unwrap_or_default();
        json!({ "status": "ok", "imagesInfos": infos })
    }

    fn update_score(&mut self, body: &Value) -> Value {
        let (Some(session_id), Some(image_id), Some(score)) = (
            str_field(body, "session_id"),
            body.get("image_id").and_then(Value::as_u64),
            body.get("score").cloned(),
        ) else {
            return error("cannot find image_id or score in data");
        };
        let record = self
            .records
            .get_mut(session_id)
            .and_then(|rs| rs.iter_mut().find(|r| r.id == image_id));
        match record {
            Some(record) => {
                record.score = score;
                json!({ "status": "ok", "image_infos": record.to_image_record() })
            }
            None => error("no entry found"),
        }
    }
}

/// Deterministic proposal cycling through each parameter's domain.
fn propose(kind: &ParameterKind, phase: i64) -> Option<Value> {
    match kind {
        ParameterKind::Float { range: [min, max] } => {
            let t = phase.rem_euclid(4) as f64 / 4.0;
            Some(json!(min + (max - min) * t))
        }
        ParameterKind::Integer { range: [min, max] } => {
            let span = (max - min + 1).max(1);
            Some(json!(min + phase.rem_euclid(span)))
        }
        ParameterKind::Boolean { .. } => Some(json!(phase.rem_euclid(2) == 0)),
        ParameterKind::Choice { choices } => {
            if choices.is_empty() {
                return None;
            }
            let pick = &choices[phase.rem_euclid(choices.len() as i64) as usize];
            Some(match pick {
                ParamValue::Bool(b) => json!(b),
                ParamValue::Number(n) => json!(n),
                ParamValue::Text(s) => json!(s),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> Value {
        json!({
            "M": {"type": "float", "range": [0.0, 20.0], "freeze": false},
            "LAYERS": {"type": "integer", "range": [1, 40], "freeze": false}
        })
    }

    #[tokio::test]
    async fn test_play_requires_session_and_agent() {
        let backend = MemoryBackend::new();
        let resp = backend
            .call(Endpoint::AgentPlay, json!({"agent_name": "random"}))
            .await
            .unwrap();
        assert_eq!(resp["status"], "error");
        assert_eq!(resp["message"], "session_id not set");
    }

    #[tokio::test]
    async fn test_play_rejects_unknown_strategy() {
        let backend = MemoryBackend::new();
        let resp = backend
            .call(
                Endpoint::AgentPlay,
                json!({"session_id": "s", "agent_name": "nope", "parameters_def": defs()}),
            )
            .await
            .unwrap();
        assert_eq!(resp["status"], "error");
    }

    #[tokio::test]
    async fn test_unchanged_schema_redeclaration_keeps_learner() {
        let backend = MemoryBackend::new();
        let body = json!({"session_id": "s", "agent_name": "cma-es", "parameters_def": defs()});
        backend.call(Endpoint::AgentPlay, body.clone()).await.unwrap();
        backend.call(Endpoint::AgentPlay, body).await.unwrap();

        let state = backend.agent_state("s", "cma-es").unwrap();
        assert_eq!(state.plays, 2);
        assert_eq!(state.generation, 1);
    }

    #[tokio::test]
    async fn test_change_recreates_learner() {
        let backend = MemoryBackend::new();
        let body = json!({"id": "x", "session_id": "s", "agent_name": "gaussian", "parameters_def": defs()});
        backend.call(Endpoint::AgentPlay, body.clone()).await.unwrap();
        backend.call(Endpoint::AgentChange, body).await.unwrap();

        let state = backend.agent_state("s", "gaussian").unwrap();
        assert_eq!(state.plays, 0);
        assert_eq!(state.generation, 2);
    }

    #[tokio::test]
    async fn test_save_skips_imageless_and_load_returns_scored() {
        let backend = MemoryBackend::new();
        let resp = backend
            .call(
                Endpoint::Save,
                json!({
                    "id": "x",
                    "session_id": "s",
                    "batch_parameters": [
                        {"M": {"type": "float", "range": [0, 1], "value": 0.5}, "score": -1,
                         "image_data": "aGk=", "image_timestamp": 1},
                        {"M": {"type": "float", "range": [0, 1], "value": 0.6}, "score": 50},
                        {"M": {"type": "float", "range": [0, 1], "value": 0.7}, "score": 80,
                         "image_data": "aGk=", "image_timestamp": 2}
                    ],
                    "batch_metadata": [{}, {}, {"agent_name": "manual"}]
                }),
            )
            .await
            .unwrap();
        assert_eq!(resp["images_ids"], json!([1, 2]));

        let loaded = backend
            .call(Endpoint::LoadData, json!({"id": "x", "session_id": "s"}))
            .await
            .unwrap();
        let infos = loaded["imagesInfos"].as_array().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0]["id"], 2);
        assert_eq!(backend.records("s").len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = MemoryBackend::new();
        backend.fail(Endpoint::Save, FailureMode::Network);
        backend.fail(Endpoint::LoadData, FailureMode::Malformed);

        assert!(backend.call(Endpoint::Save, json!({})).await.is_err());
        let resp = backend.call(Endpoint::LoadData, json!({})).await.unwrap();
        assert!(resp.get("status").is_none());
        assert_eq!(backend.calls().len(), 2);

        backend.clear_failures();
        let resp = backend
            .call(Endpoint::LoadData, json!({"session_id": "s"}))
            .await
            .unwrap();
        assert_eq!(resp["status"], "ok");
    }
}
