//! End-to-end behavior of `ExplorerEngine` against the in-memory server.
//!
//! Covers batch orchestration, frozen parameters, scoring, session scoping
//! and the degraded paths taken when the server misbehaves.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paramex_core::{
    BatchState, ExplorerConfig, ExplorerEngine, FileSessionStore, MemorySessionStore,
    NullRenderer, OwnerStore, ParameterSpec, RenderOutput, Renderer, StepOutcome,
};
use paramex_wire::fakes::{FailureMode, MemoryBackend};
use paramex_wire::{Endpoint, ParamValue};
use tracing_test::traced_test;

fn config() -> ExplorerConfig {
    ExplorerConfig::new("http://unused", "contract").with_seed("contract-seed")
}

fn setup() -> (Arc<MemoryBackend>, ExplorerEngine) {
    let backend = Arc::new(MemoryBackend::new());
    let engine =
        ExplorerEngine::new(config(), backend.clone(), Box::new(MemorySessionStore::new()))
            .unwrap();
    (backend, engine)
}

fn artwork_specs() -> BTreeMap<String, ParameterSpec> {
    let mut specs = BTreeMap::new();
    specs.insert("M".to_string(), ParameterSpec::float(0.0, 20.0));
    specs.insert("N1".to_string(), ParameterSpec::float(0.001, 20.0));
    specs.insert("sides".to_string(), ParameterSpec::integer(3, 12));
    specs
}

const ARTIFACT: &str = "aGVsbG8=";

/// Renders every sample to the same tiny artifact.
struct StubRenderer;

#[async_trait]
impl Renderer for StubRenderer {
    async fn render(&mut self, _store: &OwnerStore) -> RenderOutput {
        RenderOutput {
            artifact: Some(ARTIFACT.to_string()),
            metadata: None,
        }
    }
}

fn artifact() -> Option<String> {
    Some(ARTIFACT.to_string())
}

async fn run_batch(engine: &mut ExplorerEngine, size: usize) -> (StepOutcome, Vec<usize>) {
    let mut progress = Vec::new();
    let outcome = engine
        .run_batch(&mut StubRenderer, size, Duration::ZERO, |index, _| {
            progress.push(index)
        })
        .await
        .unwrap();
    (outcome, progress)
}

#[tokio::test]
async fn batch_of_five_is_saved_once_unscored() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());
    engine.change_agent("Agent CMA-ES").await.unwrap();

    let (outcome, progress) = run_batch(&mut engine, 5).await;
    assert_eq!(
        outcome,
        StepOutcome::Finished {
            samples: 5,
            persisted: true
        }
    );
    assert_eq!(progress, vec![1, 2, 3, 4]);
    assert_eq!(backend.calls_to(Endpoint::AgentPlay).len(), 5);

    let saves = backend.calls_to(Endpoint::Save);
    assert_eq!(saves.len(), 1);
    let batch = saves[0]["batch_parameters"].as_array().unwrap();
    assert_eq!(batch.len(), 5);
    assert!(batch.iter().all(|s| s["score"] == -1.0));
    assert_eq!(saves[0]["batch_metadata"][0]["agent_name"], "cma-es");
    assert_eq!(saves[0]["session_id"], engine.session_id());

    assert_eq!(engine.batch_state(), BatchState::Idle);
    assert!(!engine.batch().has_pending());
    assert_eq!(backend.records(engine.session_id()).len(), 5);
}

#[tokio::test]
async fn batch_size_is_clamped_to_configured_max() {
    let backend = Arc::new(MemoryBackend::new());
    let mut engine = ExplorerEngine::new(
        config().with_batch_size_max(3),
        backend.clone(),
        Box::new(MemorySessionStore::new()),
    )
    .unwrap();
    engine.register(artwork_specs());

    let (outcome, _) = run_batch(&mut engine, 50).await;
    assert_eq!(
        outcome,
        StepOutcome::Finished {
            samples: 3,
            persisted: true
        }
    );
}

#[tokio::test]
async fn frozen_parameter_is_never_changed_by_agents() {
    let (backend, mut engine) = setup();
    let mut specs = artwork_specs();
    specs.insert(
        "M".to_string(),
        ParameterSpec::float(0.0, 20.0).frozen().with_value(7.0),
    );
    engine.register(specs);
    engine.change_agent("Agent Gaussian").await.unwrap();

    run_batch(&mut engine, 4).await;
    engine.set_agent("Agent Random").unwrap();
    run_batch(&mut engine, 4).await;

    assert_eq!(engine.value("M"), Some(&ParamValue::Number(7.0)));
    for save in backend.calls_to(Endpoint::Save) {
        for sample in save["batch_parameters"].as_array().unwrap() {
            assert_eq!(sample["M"]["value"], 7.0);
            assert_eq!(sample["M"]["freeze"], true);
        }
    }
}

#[tokio::test]
async fn save_single_then_update_score() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());

    let mut values = BTreeMap::new();
    values.insert("M".to_string(), ParamValue::Number(1.2));
    values.insert("N1".to_string(), ParamValue::Number(3.4));
    let id = engine
        .save_single(&values, artifact(), 87.0, Default::default())
        .await
        .unwrap();
    assert_eq!(id, 1);

    let stored = &backend.records(engine.session_id())[0];
    assert_eq!(stored.parameters["M"]["value"], 1.2);
    assert_eq!(stored.score, Some(87.0));

    let record = engine.update_score(id, 90.0).await.unwrap().unwrap();
    assert_eq!(record.score, Some(90.0));

    assert!(engine.update_score(id, 150.0).await.is_err());
    assert_eq!(engine.update_score(99, 50.0).await.unwrap(), None);
}

#[tokio::test]
async fn save_single_rejects_unknown_parameter() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());
    let mut values = BTreeMap::new();
    values.insert("missing".to_string(), ParamValue::Number(1.0));
    assert!(engine
        .save_single(&values, artifact(), 50.0, Default::default())
        .await
        .is_err());
    assert!(backend.calls_to(Endpoint::Save).is_empty());
}

#[tokio::test]
async fn records_are_scoped_to_their_session() {
    let (_backend, mut engine) = setup();
    engine.register(artwork_specs());
    let first = engine.session_id().to_string();
    engine
        .save_single(&BTreeMap::new(), artifact(), 60.0, Default::default())
        .await
        .unwrap();
    assert_eq!(engine.load_data().await.len(), 1);

    let second = engine.new_session().unwrap();
    assert_ne!(first, second);
    assert!(engine.load_data().await.is_empty());
    assert_eq!(engine.known_sessions().unwrap(), vec![first.clone(), second]);

    engine.switch_session(&first).unwrap();
    assert_eq!(engine.load_data().await.len(), 1);
}

#[tokio::test]
async fn failed_save_retains_batch_until_retried() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());
    backend.fail(Endpoint::Save, FailureMode::ErrorStatus);

    let (outcome, _) = run_batch(&mut engine, 2).await;
    assert_eq!(
        outcome,
        StepOutcome::Finished {
            samples: 2,
            persisted: false
        }
    );
    assert_eq!(engine.batch_state(), BatchState::Finished);
    assert!(!engine.run());
    assert_eq!(engine.batch().pending().0.len(), 2);

    assert!(engine.save_batch().await.is_err());
    assert_eq!(engine.batch_state(), BatchState::Finished);

    backend.clear_failures();
    assert!(engine.save_batch().await.unwrap());
    assert_eq!(engine.batch_state(), BatchState::Idle);
    assert_eq!(backend.records(engine.session_id()).len(), 2);
    assert!(!engine.save_batch().await.unwrap());
}

#[tokio::test]
async fn reset_discards_unsaved_batch() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());
    backend.fail(Endpoint::Save, FailureMode::Network);
    run_batch(&mut engine, 2).await;

    engine.reset();
    assert_eq!(engine.batch_state(), BatchState::Idle);
    assert!(engine.run());
}

#[tokio::test]
async fn remote_play_failure_leaves_values_untouched() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());
    engine.change_agent("Agent CMA-ES").await.unwrap();
    engine.set_value("M", &ParamValue::Number(4.5)).unwrap();
    backend.fail(Endpoint::AgentPlay, FailureMode::Network);

    let (outcome, _) = run_batch(&mut engine, 2).await;
    assert!(matches!(outcome, StepOutcome::Finished { samples: 2, .. }));
    assert_eq!(engine.value("M"), Some(&ParamValue::Number(4.5)));
}

#[tokio::test]
async fn malformed_proposal_entries_are_filtered() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());
    engine.change_agent("Agent CMA-ES").await.unwrap();
    backend.set_play_parameters(Some(serde_json::json!({
        "M": "not a number",
        "N1": 2.5,
        "sides": 4.4,
        "unknown": 1.0,
    })));
    engine.set_value("M", &ParamValue::Number(4.5)).unwrap();

    run_batch(&mut engine, 2).await;
    assert_eq!(engine.value("M"), Some(&ParamValue::Number(4.5)));
    assert_eq!(engine.value("N1"), Some(&ParamValue::Number(2.5)));
    assert_eq!(engine.value("sides"), Some(&ParamValue::Number(4.0)));
}

#[tokio::test]
async fn update_sends_one_call_per_scored_record() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());
    engine.change_agent("Agent Open-ended").await.unwrap();

    run_batch(&mut engine, 2).await;
    assert!(backend.calls_to(Endpoint::AgentUpdate).is_empty());

    for score in [40.0, 80.0] {
        engine
            .save_single(&BTreeMap::new(), artifact(), score, Default::default())
            .await
            .unwrap();
    }
    engine.update().await;

    let updates = backend.calls_to(Endpoint::AgentUpdate);
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0]["score"], 40.0);
    assert_eq!(updates[1]["score"], 80.0);
    let state = backend
        .agent_state(engine.session_id(), "open-ended")
        .unwrap();
    assert_eq!(state.updates.len(), 2);
}

#[tokio::test]
async fn change_agent_replays_scored_records() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());
    for score in [40.0, 80.0] {
        engine
            .save_single(&BTreeMap::new(), artifact(), score, Default::default())
            .await
            .unwrap();
    }

    engine.change_agent("Agent CMA-ES").await.unwrap();
    engine.change_agent("Agent CMA-ES").await.unwrap();

    let state = backend.agent_state(engine.session_id(), "cma-es").unwrap();
    assert_eq!(state.generation, 2);
    assert_eq!(state.updates.len(), 2);
    assert_eq!(backend.calls_to(Endpoint::AgentUpdate).len(), 4);
}

#[tokio::test]
#[traced_test]
async fn batch_without_artifacts_is_not_stored() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());

    let outcome = engine
        .run_batch(&mut NullRenderer, 3, Duration::ZERO, |_, _| {})
        .await
        .unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Finished {
            samples: 3,
            persisted: true
        }
    );
    assert_eq!(backend.calls_to(Endpoint::Save).len(), 1);
    assert!(backend.records(engine.session_id()).is_empty());
    assert!(logs_contain("persistence.samples_skipped"));
}

#[tokio::test]
async fn switching_session_discards_pending_work() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());
    let first = engine.session_id().to_string();
    let other = engine.new_session().unwrap();
    engine.switch_session(&first).unwrap();

    backend.fail(Endpoint::Save, FailureMode::ErrorStatus);
    run_batch(&mut engine, 2).await;
    assert_eq!(engine.batch_state(), BatchState::Finished);
    engine.generate_manual(&mut StubRenderer).await;
    assert!(engine.pending_manual().is_some());

    engine.switch_session(&other).unwrap();

    assert_eq!(engine.batch_state(), BatchState::Idle);
    assert!(!engine.batch().has_pending());
    assert!(engine.pending_manual().is_none());

    backend.clear_failures();
    assert!(!engine.save_batch().await.unwrap());
    assert!(backend.records(&other).is_empty());
}

#[tokio::test]
async fn time_warp_rejects_non_finite_steps() {
    let (backend, mut engine) = setup();
    engine.register(artwork_specs());
    engine.change_agent("Agent CMA-ES").await.unwrap();

    engine.time_warp(f64::NAN).await;
    engine.time_warp(f64::INFINITY).await;
    assert!(backend.calls_to(Endpoint::AgentTimeWarp).is_empty());

    engine.time_warp(3.7).await;
    let warps = backend.calls_to(Endpoint::AgentTimeWarp);
    assert_eq!(warps.len(), 1);
    assert_eq!(warps[0]["n_steps"], 3);
    let state = backend.agent_state(engine.session_id(), "cma-es").unwrap();
    assert_eq!(state.time, 3);
}

#[tokio::test]
async fn unknown_agent_is_rejected() {
    let (_backend, mut engine) = setup();
    assert!(engine.change_agent("Agent Nope").await.is_err());
    assert_eq!(engine.active_agent(), "Agent Random");
}

#[tokio::test]
#[traced_test]
async fn invalid_definition_is_dropped_with_warning() {
    let (_backend, mut engine) = setup();
    let mut specs = artwork_specs();
    specs.insert(
        "broken".to_string(),
        serde_json::from_value(serde_json::json!({ "type": "float" })).unwrap(),
    );

    assert_eq!(engine.register(specs), 3);
    assert!(engine.registry().get("broken").is_none());
    assert!(logs_contain("registry.rejected"));
    assert!(logs_contain("broken"));
}

#[tokio::test]
async fn session_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let backend = Arc::new(MemoryBackend::new());

    let first = ExplorerEngine::new(
        config(),
        backend.clone(),
        Box::new(FileSessionStore::new(&path)),
    )
    .unwrap();
    let id = first.session_id().to_string();
    drop(first);

    let second =
        ExplorerEngine::new(config(), backend, Box::new(FileSessionStore::new(&path))).unwrap();
    assert_eq!(second.session_id(), id);
    assert_eq!(second.known_sessions().unwrap(), vec![id]);
}
