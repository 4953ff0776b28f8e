//! Exploration engine context
//!
//! `ExplorerEngine` owns everything one exploration tool needs: the
//! registry and the owner store it writes into, the agent table, the batch
//! state machine, the session manager and the persistence gateway. It is
//! created once by the top-level driver and passed around by `&mut`, which
//! keeps steps strictly sequential.
//!
//! Rendering is delegated to a caller-supplied [`Renderer`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, Instrument};

use paramex_wire::{
    ExplorerClient, HttpTransport, ImageRecord, Metadata, ParamValue, ParameterProjection,
    ParametersDef, Sample, Score, Transport,
};

use crate::agent::{
    AgentContext, AgentTable, LearningRecord, LocalRandomAgent, RemoteAgent, LOCAL_RANDOM_AGENT,
};
use crate::batch::{BatchRun, BatchState, StepOutcome};
use crate::config::ExplorerConfig;
use crate::error::{validate_score, ExplorerError, ExplorerResult};
use crate::metrics::METRICS;
use crate::obs;
use crate::persistence::PersistenceGateway;
use crate::registry::{
    OwnerHandle, OwnerStore, ParameterGroup, ParameterRegistry, ParameterSpec, SnapshotOptions,
};
use crate::session::{FileSessionStore, MemorySessionStore, SessionManager, SessionStore};

/// What a render produced.
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// Base64-encoded artifact (e.g. a JPEG of the canvas)
    pub artifact: Option<String>,
    /// Artwork-level metadata, stored under `metadata["artwork"]`
    pub metadata: Option<Metadata>,
}

/// The external drawing routine.
#[async_trait]
pub trait Renderer: Send {
    /// Called before each play. Returning a handle rebinds every
    /// non-global parameter to that owner (a fresh artwork per step).
    fn prepare(&mut self, _store: &mut OwnerStore) -> Option<OwnerHandle> {
        None
    }

    /// Draw from the current values in `store`.
    async fn render(&mut self, store: &OwnerStore) -> RenderOutput;
}

/// Renderer that draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

#[async_trait]
impl Renderer for NullRenderer {
    async fn render(&mut self, _store: &OwnerStore) -> RenderOutput {
        RenderOutput::default()
    }
}

/// One row of the agent table, for display.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub name: String,
    pub strategy: String,
    pub description: String,
    pub active: bool,
}

pub struct ExplorerEngine {
    config: ExplorerConfig,
    engine_id: String,
    session_id: String,
    sessions: SessionManager,
    registry: ParameterRegistry,
    store: OwnerStore,
    agents: AgentTable,
    batch: BatchRun,
    gateway: PersistenceGateway,
    pending_manual: Option<(Sample, Metadata)>,
}

impl ExplorerEngine {
    /// Build an engine over an explicit transport and session store.
    ///
    /// Resolves (or creates) the session id and instantiates every agent:
    /// the local random agent under `"Agent Random"` (active) plus one
    /// remote agent per entry of `config.remote_agents`.
    pub fn new(
        config: ExplorerConfig,
        transport: Arc<dyn Transport>,
        session_store: Box<dyn SessionStore>,
    ) -> ExplorerResult<Self> {
        config.validate()?;
        let engine_id = config.engine_id();
        let client = ExplorerClient::new(transport);
        let sessions = SessionManager::new(session_store, &config.namespace);
        let session_id = sessions.get_session_id()?;

        let seed = config.seed.as_deref();
        let manual_seed = seed.map(|s| format!("{s}/manual"));
        let mut agents = AgentTable::new(
            LOCAL_RANDOM_AGENT,
            Box::new(LocalRandomAgent::new(seed)),
            Box::new(LocalRandomAgent::new(manual_seed.as_deref())),
        );
        for (label, strategy) in &config.remote_agents {
            agents.insert(label, Box::new(RemoteAgent::new(strategy, client.clone())));
        }

        obs::emit_session_switched(&config.namespace, &session_id);
        Ok(Self {
            gateway: PersistenceGateway::new(client, &engine_id),
            config,
            engine_id,
            session_id,
            sessions,
            registry: ParameterRegistry::new(),
            store: OwnerStore::new(),
            agents,
            batch: BatchRun::new(),
            pending_manual: None,
        })
    }

    /// Build an engine talking HTTP to `config.server_url`, with a file
    /// session store when `config.session_file` is set.
    pub fn from_config(config: ExplorerConfig) -> ExplorerResult<Self> {
        let transport = Arc::new(HttpTransport::new(config.remote_config())?);
        let store: Box<dyn SessionStore> = match &config.session_file {
            Some(path) => Box::new(FileSessionStore::new(path)),
            None => Box::new(MemorySessionStore::new()),
        };
        Self::new(config, transport, store)
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // -----------------------------------------------------------------------
    // Parameters
    // -----------------------------------------------------------------------

    /// Replace the parameter definitions; returns how many were accepted.
    pub fn register(&mut self, specs: BTreeMap<String, ParameterSpec>) -> usize {
        self.registry.register(specs, &mut self.store)
    }

    pub fn create_groups(&mut self, groups: Vec<ParameterGroup>) {
        self.registry.create_groups(groups);
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    pub fn store(&self) -> &OwnerStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut OwnerStore {
        &mut self.store
    }

    pub fn set_freeze(&mut self, name: &str, freeze: bool) -> ExplorerResult<()> {
        self.registry.set_freeze(name, freeze)
    }

    pub fn set_value(&mut self, name: &str, value: &ParamValue) -> ExplorerResult<()> {
        self.registry.set_value(&mut self.store, name, value)
    }

    pub fn value(&self, name: &str) -> Option<&ParamValue> {
        self.registry.value(&self.store, name)
    }

    pub fn snapshot(&self, opts: SnapshotOptions) -> BTreeMap<String, ParameterProjection> {
        self.registry.snapshot(&self.store, opts)
    }

    pub fn definitions_only(&self) -> ParametersDef {
        self.registry.definitions_only()
    }

    /// Re-apply the proposal recorded under `seed` by the local random agent.
    ///
    /// Returns the number of fields written.
    pub fn replay_seed(&mut self, seed: &str) -> usize {
        let values = LocalRandomAgent::replay(seed, &self.registry.definitions_only());
        let accepted = self.registry.filter_proposal(&values);
        self.registry.apply(&mut self.store, &accepted)
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.names().map(str::to_string).collect()
    }

    pub fn active_agent(&self) -> &str {
        self.agents.active_name()
    }

    pub fn agent_summaries(&self) -> Vec<AgentSummary> {
        self.agents
            .names()
            .filter_map(|name| {
                self.agents.get(name).map(|agent| AgentSummary {
                    name: name.to_string(),
                    strategy: agent.name().to_string(),
                    description: agent.description(),
                    active: name == self.agents.active_name(),
                })
            })
            .collect()
    }

    /// Select the active agent locally, without notifying the server.
    pub fn set_agent(&mut self, name: &str) -> ExplorerResult<()> {
        self.agents.set_active(name)
    }

    /// Select the active agent, ask it to start afresh for this session, then
    /// replay the session's scored records into it.
    pub async fn change_agent(&mut self, name: &str) -> ExplorerResult<()> {
        self.agents.set_active(name)?;
        let defs = self.registry.definitions_only();
        let ctx = AgentContext {
            engine_id: &self.engine_id,
            session_id: &self.session_id,
            definitions: &defs,
        };
        self.agents.active_mut().activate(&ctx).await;
        obs::emit_agent_changed(&self.session_id, name);
        self.update().await;
        Ok(())
    }

    /// Move the active agent's exploration counter.
    pub async fn time_warp(&mut self, steps: f64) {
        let defs = self.registry.definitions_only();
        let ctx = AgentContext {
            engine_id: &self.engine_id,
            session_id: &self.session_id,
            definitions: &defs,
        };
        obs::emit_time_warp(self.agents.active_name(), steps);
        self.agents.active_mut().time_warp(&ctx, steps).await;
    }

    /// Feed the session's scored records to the active agent.
    pub async fn update(&mut self) {
        let records = self.gateway.load_data(&self.session_id).await;
        self.learn(&records).await;
    }

    async fn learn(&mut self, records: &[ImageRecord]) {
        let learning: Vec<LearningRecord> = records.iter().map(LearningRecord::from).collect();
        let defs = self.registry.definitions_only();
        let ctx = AgentContext {
            engine_id: &self.engine_id,
            session_id: &self.session_id,
            definitions: &defs,
        };
        debug!(records = learning.len(), agent_name = %self.agents.active_name(), "updating agent");
        self.agents.active_mut().update(&ctx, &learning).await;
    }

    // -----------------------------------------------------------------------
    // Batch
    // -----------------------------------------------------------------------

    /// Idle → Running. Returns `false` while a finished batch awaits a save.
    pub fn run(&mut self) -> bool {
        self.batch.run()
    }

    /// Back to Idle, discarding unsaved samples.
    pub fn reset(&mut self) {
        let discarded = self.batch.reset();
        obs::emit_batch_reset(&self.session_id, discarded);
    }

    pub fn is_running(&self) -> bool {
        self.batch.is_running()
    }

    pub fn batch_state(&self) -> BatchState {
        self.batch.state()
    }

    pub fn batch(&self) -> &BatchRun {
        &self.batch
    }

    /// Run one play/apply/render/capture cycle of the current batch.
    ///
    /// `batch_size` is clamped to `[1, batch_size_max]`. On the last step
    /// the batch is saved; on success the agent learns from the session's
    /// records and the engine returns to Idle, on failure the samples stay
    /// pending (see [`save_batch`](Self::save_batch)).
    pub async fn step(
        &mut self,
        renderer: &mut dyn Renderer,
        batch_size: usize,
    ) -> ExplorerResult<StepOutcome> {
        if !self.batch.begin_step(batch_size, self.config.batch_size_max) {
            return Ok(StepOutcome::Idle);
        }
        if self.batch.index() == 0 {
            obs::emit_batch_started(&self.session_id, self.agents.active_name(), self.batch.size());
        }
        let span = obs::batch_span(&self.session_id, self.agents.active_name());
        let outcome = async move {
            let (sample, metadata) = self.capture(renderer).await;
            METRICS.inc_samples_captured();
            match self.batch.record(sample, metadata) {
                StepOutcome::Finished { samples, .. } => {
                    obs::emit_step_captured(&self.session_id, samples, samples);
                    let persisted = self.persist_batch().await.is_ok();
                    StepOutcome::Finished { samples, persisted }
                }
                outcome => {
                    if let StepOutcome::Progress { index, size } = outcome {
                        obs::emit_step_captured(&self.session_id, index, size);
                    }
                    outcome
                }
            }
        }
        .instrument(span)
        .await;
        Ok(outcome)
    }

    /// Drive a whole batch: `run()`, then step until finished, calling
    /// `on_progress(index, size)` and waiting `delay` between steps.
    pub async fn run_batch(
        &mut self,
        renderer: &mut dyn Renderer,
        batch_size: usize,
        delay: Duration,
        mut on_progress: impl FnMut(usize, usize) + Send,
    ) -> ExplorerResult<StepOutcome> {
        if !self.run() {
            return Ok(StepOutcome::Idle);
        }
        loop {
            match self.step(renderer, batch_size).await? {
                StepOutcome::Progress { index, size } => {
                    on_progress(index, size);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                done => return Ok(done),
            }
        }
    }

    /// Retry persistence of a finished batch whose save failed.
    ///
    /// Returns `Ok(false)` when nothing is pending.
    pub async fn save_batch(&mut self) -> ExplorerResult<bool> {
        if !self.batch.has_pending() {
            return Ok(false);
        }
        self.persist_batch().await?;
        Ok(true)
    }

    async fn persist_batch(&mut self) -> ExplorerResult<()> {
        let (samples, metadata) = self.batch.pending();
        let count = samples.len();
        let result = self.gateway.save(&self.session_id, samples, metadata).await;
        obs::emit_batch_finished(&self.session_id, count, result.is_ok());
        if result.is_ok() {
            self.batch.mark_persisted();
            METRICS.inc_batches_finished();
            self.update().await;
        }
        METRICS.flush();
        result.map(|_| ())
    }

    async fn capture(&mut self, renderer: &mut dyn Renderer) -> (Sample, Metadata) {
        if let Some(owner) = renderer.prepare(&mut self.store) {
            self.registry.rebind_owners(&mut self.store, owner);
        }
        let defs = self.registry.definitions_only();
        let ctx = AgentContext {
            engine_id: &self.engine_id,
            session_id: &self.session_id,
            definitions: &defs,
        };
        let proposal = self.agents.active_mut().play(&ctx).await;
        let accepted = self.registry.filter_proposal(&proposal.parameters);
        self.registry.apply(&mut self.store, &accepted);

        let output = renderer.render(&self.store).await;
        let image_timestamp = output
            .artifact
            .as_ref()
            .map(|_| chrono::Utc::now().timestamp_millis());
        let sample = Sample {
            parameters: self.registry.snapshot(&self.store, SnapshotOptions::default()),
            image_data: output.artifact,
            image_timestamp,
            score: Score::Unscored,
        };
        let mut metadata = proposal.metadata;
        if let Some(artwork) = output.metadata {
            metadata.insert("artwork".to_string(), Value::Object(artwork));
        }
        (sample, metadata)
    }

    // -----------------------------------------------------------------------
    // Manual samples and scoring
    // -----------------------------------------------------------------------

    /// Generate one sample with the manual random agent, leaving the active
    /// agent untouched. The sample stays pending until committed.
    pub async fn generate_manual(&mut self, renderer: &mut dyn Renderer) -> &Sample {
        self.agents.begin_manual();
        let (sample, mut metadata) = self.capture(renderer).await;
        self.agents.end_manual();
        metadata.insert("agent_name".to_string(), Value::from("manual"));
        let (sample, _) = self.pending_manual.insert((sample, metadata));
        sample
    }

    pub fn pending_manual(&self) -> Option<&Sample> {
        self.pending_manual.as_ref().map(|(sample, _)| sample)
    }

    /// Persist the pending manual sample with `score`, then attach the
    /// score to the stored record. Returns the record id.
    ///
    /// On a failed save the sample stays pending.
    pub async fn commit_manual(&mut self, score: f64) -> ExplorerResult<u64> {
        let score = validate_score(score)?;
        let (mut sample, metadata) = self
            .pending_manual
            .take()
            .ok_or(ExplorerError::NoPendingSample)?;
        sample.score = Score::Value(score);
        match self
            .gateway
            .save_single(&self.session_id, &sample, &metadata)
            .await
        {
            Ok(id) => {
                self.update_score(id, score).await?;
                Ok(id)
            }
            Err(err) => {
                self.pending_manual = Some((sample, metadata));
                Err(err)
            }
        }
    }

    /// Persist one parameter set immediately with a score.
    ///
    /// `values` override the current bound values; parameters it omits are
    /// captured as they stand. The server only stores records that carry an
    /// `artifact`.
    pub async fn save_single(
        &mut self,
        values: &BTreeMap<String, ParamValue>,
        artifact: Option<String>,
        score: f64,
        metadata: Metadata,
    ) -> ExplorerResult<u64> {
        let score = validate_score(score)?;
        let mut parameters = self.registry.snapshot(&self.store, SnapshotOptions::default());
        for (name, raw) in values {
            let def = self
                .registry
                .get(name)
                .ok_or_else(|| ExplorerError::UnknownParameter(name.clone()))?;
            let value = def.coerce(raw).map_err(|reason| ExplorerError::InvalidValue {
                name: name.clone(),
                reason,
            })?;
            if let Some(projection) = parameters.get_mut(name) {
                projection.value = Some(value);
            }
        }
        let image_timestamp = artifact
            .as_ref()
            .map(|_| chrono::Utc::now().timestamp_millis());
        let sample = Sample {
            parameters,
            image_data: artifact,
            image_timestamp,
            score: Score::Value(score),
        };
        self.gateway
            .save_single(&self.session_id, &sample, &metadata)
            .await
    }

    /// Attach a score to a stored record and let the active agent learn from it.
    ///
    /// Returns `Ok(None)` when the server did not accept the update.
    pub async fn update_score(
        &mut self,
        image_id: u64,
        score: f64,
    ) -> ExplorerResult<Option<ImageRecord>> {
        let score = validate_score(score)?;
        let record = self
            .gateway
            .update_score(&self.session_id, image_id, score)
            .await;
        if let Some(record) = &record {
            self.learn(std::slice::from_ref(record)).await;
        }
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Sessions and records
    // -----------------------------------------------------------------------

    /// Make `id` the active session. In-memory batch state and any pending
    /// manual sample are discarded; persisted records are untouched.
    pub fn switch_session(&mut self, id: &str) -> ExplorerResult<()> {
        self.sessions.set_session_id(id)?;
        self.session_id = id.to_string();
        self.batch.reset();
        self.pending_manual = None;
        obs::emit_session_switched(&self.config.namespace, id);
        Ok(())
    }

    /// Create and switch to a fresh session.
    pub fn new_session(&mut self) -> ExplorerResult<String> {
        let id = self.sessions.new_session()?;
        self.switch_session(&id)?;
        Ok(id)
    }

    pub fn known_sessions(&self) -> ExplorerResult<Vec<String>> {
        self.sessions.known_sessions()
    }

    /// Scored records of the active session (empty on failure).
    pub async fn load_data(&self) -> Vec<ImageRecord> {
        self.gateway.load_data(&self.session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paramex_wire::fakes::MemoryBackend;
    use paramex_wire::Endpoint;

    fn engine() -> (Arc<MemoryBackend>, ExplorerEngine) {
        let backend = Arc::new(MemoryBackend::new());
        let config = ExplorerConfig::new("http://unused", "unit").with_seed("unit-seed");
        let engine =
            ExplorerEngine::new(config, backend.clone(), Box::new(MemorySessionStore::new()))
                .unwrap();
        (backend, engine)
    }

    fn specs() -> BTreeMap<String, ParameterSpec> {
        let mut specs = BTreeMap::new();
        specs.insert("M".to_string(), ParameterSpec::float(0.0, 20.0));
        specs.insert("N1".to_string(), ParameterSpec::float(0.001, 20.0));
        specs
    }

    struct ArtRenderer {
        owners: usize,
    }

    #[async_trait]
    impl Renderer for ArtRenderer {
        fn prepare(&mut self, store: &mut OwnerStore) -> Option<OwnerHandle> {
            self.owners += 1;
            Some(store.create_owner())
        }

        async fn render(&mut self, _store: &OwnerStore) -> RenderOutput {
            let mut metadata = Metadata::new();
            metadata.insert("palette".into(), Value::from("warm"));
            RenderOutput {
                artifact: Some("aGVsbG8=".into()),
                metadata: Some(metadata),
            }
        }
    }

    #[test]
    fn test_agent_table_from_config() {
        let (_backend, engine) = engine();
        assert_eq!(engine.active_agent(), LOCAL_RANDOM_AGENT);
        assert_eq!(
            engine.agent_names(),
            vec![
                "Agent CMA-ES",
                "Agent Gaussian",
                "Agent Open-ended",
                LOCAL_RANDOM_AGENT
            ]
        );
        let summaries = engine.agent_summaries();
        assert!(summaries
            .iter()
            .any(|s| s.active && s.strategy == "random"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let config = ExplorerConfig::new("http://unused", "unit").with_batch_size_max(1);
        let result = ExplorerEngine::new(config, backend, Box::new(MemorySessionStore::new()));
        assert!(matches!(result, Err(ExplorerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_step_without_run_is_idle() {
        let (backend, mut engine) = engine();
        engine.register(specs());
        let outcome = engine.step(&mut NullRenderer, 3).await.unwrap();
        assert_eq!(outcome, StepOutcome::Idle);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_artwork_metadata_and_artifact_are_captured() {
        let (backend, mut engine) = engine();
        engine.register(specs());
        engine.run();
        let mut renderer = ArtRenderer { owners: 0 };
        engine.step(&mut renderer, 1).await.unwrap();

        let saves = backend.calls_to(Endpoint::Save);
        assert_eq!(saves.len(), 1);
        let metadata = &saves[0]["batch_metadata"][0];
        assert_eq!(metadata["artwork"]["palette"], "warm");
        assert_eq!(metadata["agent_name"], "random");
        assert!(saves[0]["batch_parameters"][0]["image_timestamp"].is_i64());
        assert_eq!(renderer.owners, 1);
    }

    #[tokio::test]
    async fn test_manual_generation_keeps_active_agent() {
        let (backend, mut engine) = engine();
        engine.register(specs());
        engine.change_agent("Agent CMA-ES").await.unwrap();

        let mut renderer = ArtRenderer { owners: 0 };
        let sample = engine.generate_manual(&mut renderer).await.clone();
        assert_eq!(sample.parameters.len(), 2);
        assert!(backend.calls_to(Endpoint::AgentPlay).is_empty());
        assert_eq!(engine.active_agent(), "Agent CMA-ES");

        let id = engine.commit_manual(72.0).await.unwrap();
        assert!(engine.pending_manual().is_none());
        let saves = backend.calls_to(Endpoint::Save);
        assert_eq!(saves[0]["batch_metadata"][0]["agent_name"], "manual");
        assert_eq!(saves[0]["batch_parameters"][0]["score"], 72.0);
        let updates = backend.calls_to(Endpoint::UpdateScore);
        assert_eq!(updates[0]["image_id"], id);

        assert!(matches!(
            engine.commit_manual(50.0).await,
            Err(ExplorerError::NoPendingSample)
        ));
    }

    #[tokio::test]
    async fn test_per_step_owners_do_not_accumulate() {
        let (_backend, mut engine) = engine();
        let mut renderer = ArtRenderer { owners: 0 };
        let owner = renderer.prepare(engine.store_mut()).unwrap();
        let mut specs = specs();
        for spec in specs.values_mut() {
            *spec = spec.clone().with_owner(owner);
        }
        engine.register(specs);

        for _ in 0..20 {
            engine
                .run_batch(&mut renderer, 5, Duration::ZERO, |_, _| {})
                .await
                .unwrap();
            assert!(engine.store().len() <= 2);
        }
        assert_eq!(renderer.owners, 101);
    }

    #[tokio::test]
    async fn test_commit_rejects_out_of_range_score() {
        let (_backend, mut engine) = engine();
        engine.register(specs());
        engine.generate_manual(&mut NullRenderer).await;
        assert!(matches!(
            engine.commit_manual(101.0).await,
            Err(ExplorerError::InvalidScore(_))
        ));
        assert!(engine.pending_manual().is_some());
    }

    #[tokio::test]
    async fn test_replay_seed_reapplies_values() {
        let (_backend, mut engine) = engine();
        engine.register(specs());
        engine.run();
        engine.step(&mut NullRenderer, 2).await.unwrap();
        let seed = engine.batch().pending().1[0]["seed"]
            .as_str()
            .unwrap()
            .to_string();
        let m = engine.value("M").cloned();

        engine.set_value("M", &ParamValue::Number(19.5)).unwrap();
        assert_eq!(engine.replay_seed(&seed), 2);
        assert_eq!(engine.value("M").cloned(), m);
    }
}
