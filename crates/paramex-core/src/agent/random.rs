//! Local random agent
//!
//! Samples every unfrozen parameter independently. Each proposal draws from
//! its own generator, seeded from a master generator; the per-sample seed is
//! recorded in the metadata so the proposal can be replayed exactly.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use paramex_wire::{ParamValue, ParameterKind, ParametersDef};

use super::{Agent, AgentContext, AgentProposal, LearningRecord};
use crate::prng::Prng;

/// Strategy name reported in metadata.
const RANDOM_STRATEGY: &str = "random";

/// Draw one value for a parameter of the given kind.
pub fn sample_parameter(kind: &ParameterKind, rng: &mut Prng) -> Option<ParamValue> {
    match kind {
        ParameterKind::Float { range } => Some(ParamValue::Number(rng.random_num(range[0], range[1]))),
        ParameterKind::Integer { range } => {
            Some(ParamValue::Number(rng.random_int(range[0], range[1]) as f64))
        }
        ParameterKind::Boolean { threshold } => {
            Some(ParamValue::Bool(rng.random_bool(threshold.unwrap_or(0.5))))
        }
        ParameterKind::Choice { choices } => rng.random_choice(choices).cloned(),
    }
}

pub struct LocalRandomAgent {
    master: Prng,
}

impl LocalRandomAgent {
    /// Agent with a fixed master seed, or a fresh random one.
    pub fn new(seed: Option<&str>) -> Self {
        let master = match seed {
            Some(seed) => Prng::new(seed),
            None => Prng::from_entropy(),
        };
        Self { master }
    }

    pub fn master_seed(&self) -> &str {
        self.master.seed()
    }

    /// Reproduce the values of a proposal from its recorded seed.
    pub fn replay(seed: &str, definitions: &ParametersDef) -> BTreeMap<String, ParamValue> {
        let mut rng = Prng::new(seed);
        definitions
            .iter()
            .filter(|(_, def)| !def.freeze)
            .filter_map(|(name, def)| {
                sample_parameter(&def.kind, &mut rng).map(|v| (name.clone(), v))
            })
            .collect()
    }

    fn next_sample_seed(&mut self) -> String {
        let words: Vec<u32> = (0..4)
            .map(|_| (self.master.random_dec() * 4_294_967_296.0) as u32)
            .collect();
        format!(
            "0x{:08x}{:08x}{:08x}{:08x}",
            words[0], words[1], words[2], words[3]
        )
    }
}

#[async_trait]
impl Agent for LocalRandomAgent {
    fn name(&self) -> &str {
        RANDOM_STRATEGY
    }

    fn description(&self) -> String {
        "Local random agent: samples each unfrozen parameter uniformly from its range or choices"
            .to_string()
    }

    async fn play(&mut self, ctx: &AgentContext<'_>) -> AgentProposal {
        let seed = self.next_sample_seed();
        let parameters = Self::replay(&seed, ctx.definitions);
        let mut metadata = paramex_wire::Metadata::new();
        metadata.insert("agent_name".to_string(), Value::from(RANDOM_STRATEGY));
        metadata.insert("seed".to_string(), Value::from(seed));
        AgentProposal {
            parameters,
            metadata,
        }
    }

    async fn update(&mut self, _ctx: &AgentContext<'_>, records: &[LearningRecord]) {
        debug!(records = records.len(), "random agent ignores updates");
    }

    async fn time_warp(&mut self, _ctx: &AgentContext<'_>, steps: f64) {
        debug!(steps = steps, "random agent has no exploration counter");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paramex_wire::ParameterProjection;

    fn def(kind: ParameterKind, freeze: bool) -> ParameterProjection {
        ParameterProjection {
            kind,
            freeze,
            value: None,
            step: None,
            label: None,
            labels: None,
            owner: None,
        }
    }

    fn space() -> ParametersDef {
        let mut defs = ParametersDef::new();
        defs.insert("M".into(), def(ParameterKind::Float { range: [0.0, 20.0] }, false));
        defs.insert("N".into(), def(ParameterKind::Integer { range: [1, 40] }, false));
        defs.insert("on".into(), def(ParameterKind::Boolean { threshold: None }, false));
        defs.insert(
            "shape".into(),
            def(
                ParameterKind::Choice {
                    choices: vec!["circle".into(), "square".into()],
                },
                false,
            ),
        );
        defs.insert("F".into(), def(ParameterKind::Float { range: [0.0, 1.0] }, true));
        defs
    }

    fn ctx(defs: &ParametersDef) -> AgentContext<'_> {
        AgentContext {
            engine_id: "paramexplorer-test",
            session_id: "s1",
            definitions: defs,
        }
    }

    #[tokio::test]
    async fn test_play_samples_each_unfrozen_parameter_in_range() {
        let defs = space();
        let mut agent = LocalRandomAgent::new(Some("fixed"));
        for _ in 0..200 {
            let proposal = agent.play(&ctx(&defs)).await;
            assert!(!proposal.parameters.contains_key("F"));
            let m = proposal.parameters["M"].as_f64().unwrap();
            assert!((0.0..20.0).contains(&m));
            let n = proposal.parameters["N"].as_f64().unwrap();
            assert!((1.0..=40.0).contains(&n) && n.fract() == 0.0);
            assert!(matches!(proposal.parameters["on"], ParamValue::Bool(_)));
            assert!(["circle", "square"]
                .iter()
                .any(|c| proposal.parameters["shape"] == ParamValue::from(*c)));
            assert_eq!(proposal.metadata["agent_name"], "random");
        }
    }

    #[tokio::test]
    async fn test_recorded_seed_replays_proposal() {
        let defs = space();
        let mut agent = LocalRandomAgent::new(None);
        let proposal = agent.play(&ctx(&defs)).await;
        let seed = proposal.metadata["seed"].as_str().unwrap();
        assert_eq!(LocalRandomAgent::replay(seed, &defs), proposal.parameters);
    }

    #[tokio::test]
    async fn test_same_master_seed_same_proposals() {
        let defs = space();
        let mut a = LocalRandomAgent::new(Some("master"));
        let mut b = LocalRandomAgent::new(Some("master"));
        for _ in 0..10 {
            assert_eq!(a.play(&ctx(&defs)).await, b.play(&ctx(&defs)).await);
        }
    }

    #[test]
    fn test_boolean_threshold_is_probability_of_true() {
        let mut rng = Prng::new("bool-threshold");
        let kind = ParameterKind::Boolean {
            threshold: Some(0.9),
        };
        let trues = (0..10_000)
            .filter(|_| sample_parameter(&kind, &mut rng) == Some(ParamValue::Bool(true)))
            .count();
        assert!((8_800..=9_200).contains(&trues), "trues = {trues}");
    }
}
