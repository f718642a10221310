//! Search configuration
//!
//! Options are plain serde structs with defaults, loadable from a JSON file.
//! `build_selector` turns them into a ready path selector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::cfg::SharedBlockGraph;
use crate::error::{Result, SchedulerError};
use crate::predictor::{InferenceSession, Predictor};
use crate::ps::{
    AiPathSelector, PathSelector, QueuePathSelector, SequentialPathSelector, StepCounter,
};
use crate::state::ExecutionState;

/// Environment variable overriding [`SearchOptions::steps_to_switch`]
pub const STEPS_TO_SWITCH_ENV: &str = "GUIDED_SEARCH_STEPS_TO_SWITCH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Bfs,
    Dfs,
    /// Model-guided selection through a predictor
    Guided,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Bfs => write!(f, "bfs"),
            Strategy::Dfs => write!(f, "dfs"),
            Strategy::Guided => write!(f, "guided"),
        }
    }
}

/// Execution provider requested from the inference backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    #[default]
    Cpu,
    Gpu,
}

impl InferenceMode {
    pub fn provider(&self) -> &'static str {
        match self {
            InferenceMode::Cpu => "CPU",
            InferenceMode::Gpu => "GPU",
        }
    }
}

/// Which snapshots the guided selector hands to its predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    /// Full snapshots for models, deltas for oracles after their first call
    #[default]
    Auto,
    AlwaysFull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Selectors to run in order; more than one builds a sequential selector
    pub strategies: Vec<Strategy>,
    /// Peeks before the sequential selector moves to the next strategy
    pub steps_to_switch: u64,
    pub inference_mode: InferenceMode,
    pub snapshot: SnapshotPolicy,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            strategies: vec![Strategy::Guided],
            steps_to_switch: 1000,
            inference_mode: InferenceMode::Cpu,
            snapshot: SnapshotPolicy::Auto,
        }
    }
}

impl SearchOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| SchedulerError::Configuration(format!("invalid search options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "loaded search options");
        Self::from_json_str(&json)
    }

    pub fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_steps_to_switch(mut self, steps: u64) -> Self {
        self.steps_to_switch = steps;
        self
    }

    /// Apply `GUIDED_SEARCH_STEPS_TO_SWITCH` when set
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(STEPS_TO_SWITCH_ENV) {
            self.steps_to_switch = raw.trim().parse().map_err(|_| {
                SchedulerError::Configuration(format!(
                    "{} must be a non-negative integer, got {:?}",
                    STEPS_TO_SWITCH_ENV, raw
                ))
            })?;
            debug!(steps_to_switch = self.steps_to_switch, "applied environment override");
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.strategies.is_empty() {
            return Err(SchedulerError::Configuration(
                "at least one strategy is required".to_string(),
            ));
        }
        let guided = self
            .strategies
            .iter()
            .filter(|s| **s == Strategy::Guided)
            .count();
        if guided > 1 {
            return Err(SchedulerError::Configuration(
                "only one guided strategy can share a predictor".to_string(),
            ));
        }
        if self.strategies.len() > 1 && self.steps_to_switch == 0 {
            return Err(SchedulerError::Configuration(
                "steps_to_switch must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_guided(&self) -> bool {
        self.strategies.contains(&Strategy::Guided)
    }

    /// Wrap a loaded model in a predictor running on the configured provider
    pub fn model_predictor(&self, session: impl InferenceSession + 'static) -> Predictor {
        Predictor::model(session, self.inference_mode)
    }
}

/// Assemble the selector described by `options`
///
/// A single strategy yields that selector; several are chained in a
/// [`SequentialPathSelector`]. The predictor is consumed by the guided
/// strategy and must be present when one is configured.
pub fn build_selector<S>(
    options: &SearchOptions,
    graph: SharedBlockGraph,
    steps: StepCounter,
    predictor: Option<Predictor>,
) -> Result<Box<dyn PathSelector<S>>>
where
    S: ExecutionState + Clone + 'static,
{
    options.validate()?;
    if predictor.is_some() && !options.is_guided() {
        warn!("predictor supplied but no guided strategy configured; it will be dropped");
    }

    let mut predictor = predictor;
    let mut children: Vec<Box<dyn PathSelector<S>>> = Vec::with_capacity(options.strategies.len());
    for strategy in &options.strategies {
        let child: Box<dyn PathSelector<S>> = match strategy {
            Strategy::Bfs => Box::new(QueuePathSelector::bfs()),
            Strategy::Dfs => Box::new(QueuePathSelector::dfs()),
            Strategy::Guided => {
                let predictor = predictor.take().ok_or_else(|| {
                    SchedulerError::Configuration(
                        "guided strategy requires a predictor".to_string(),
                    )
                })?;
                Box::new(
                    AiPathSelector::new(graph.clone(), steps.clone(), predictor)
                        .with_snapshot_policy(options.snapshot),
                )
            }
        };
        children.push(child);
    }

    let names: Vec<String> = options.strategies.iter().map(|s| s.to_string()).collect();
    info!(
        strategies = %names.join(","),
        steps_to_switch = options.steps_to_switch,
        "built path selector"
    );

    if children.len() == 1 {
        return children
            .pop()
            .ok_or_else(|| SchedulerError::Configuration("no strategy configured".to_string()));
    }
    Ok(Box::new(SequentialPathSelector::new(
        children,
        options.steps_to_switch,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BlockGraph, InMemoryLoader};
    use crate::game::{GameState, Tensor};
    use crate::predictor::model::Outputs;
    use crate::state::Statement;
    use crate::StateId;
    use std::io::Write;

    #[derive(Debug, Clone)]
    struct Idle(StateId);

    impl ExecutionState for Idle {
        fn id(&self) -> StateId {
            self.0
        }
        fn last_statement(&self) -> Option<Statement> {
            None
        }
        fn fork_depth(&self) -> u32 {
            0
        }
        fn is_exceptional(&self) -> bool {
            false
        }
        fn is_satisfiable(&self) -> bool {
            true
        }
    }

    fn oracle() -> Predictor {
        Predictor::oracle(|msg: &GameState| -> anyhow::Result<StateId> {
            Ok(msg.states.last().map(|s| s.id).unwrap_or(0))
        })
    }

    fn empty_session(_inputs: &[(&'static str, Tensor)]) -> anyhow::Result<Outputs> {
        Ok(Default::default())
    }

    #[test]
    fn test_defaults() {
        let options = SearchOptions::default();
        assert_eq!(options.strategies, vec![Strategy::Guided]);
        assert_eq!(options.steps_to_switch, 1000);
        assert_eq!(options.inference_mode, InferenceMode::Cpu);
        assert_eq!(options.snapshot, SnapshotPolicy::Auto);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options = SearchOptions::from_json_str(
            r#"{"strategies": ["bfs", "guided"], "inference_mode": "gpu"}"#,
        )
        .unwrap();
        assert_eq!(options.strategies, vec![Strategy::Bfs, Strategy::Guided]);
        assert_eq!(options.inference_mode, InferenceMode::Gpu);
        assert_eq!(options.steps_to_switch, 1000);
    }

    #[test]
    fn test_invalid_json_is_configuration_error() {
        let err = SearchOptions::from_json_str(r#"{"strategies": ["random"]}"#).unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_bad_combinations() {
        let empty = SearchOptions::default().with_strategies(vec![]);
        assert!(empty.validate().is_err());

        let twice =
            SearchOptions::default().with_strategies(vec![Strategy::Guided, Strategy::Guided]);
        assert!(twice.validate().is_err());

        let zero = SearchOptions::default()
            .with_strategies(vec![Strategy::Dfs, Strategy::Guided])
            .with_steps_to_switch(0);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"strategies": ["dfs"], "snapshot": "always_full"}}"#).unwrap();

        let options = SearchOptions::from_file(file.path()).unwrap();
        assert_eq!(options.strategies, vec![Strategy::Dfs]);
        assert_eq!(options.snapshot, SnapshotPolicy::AlwaysFull);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SearchOptions::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
    }

    #[test]
    fn test_env_override() {
        let options = SearchOptions::default()
            .with_overrides_from(|key| (key == STEPS_TO_SWITCH_ENV).then(|| "25".to_string()))
            .unwrap();
        assert_eq!(options.steps_to_switch, 25);

        let err = SearchOptions::default()
            .with_overrides_from(|_| Some("soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));

        let untouched = SearchOptions::default().with_overrides_from(|_| None).unwrap();
        assert_eq!(untouched.steps_to_switch, 1000);
    }

    #[test]
    fn test_build_single_queue_selector() {
        let graph = BlockGraph::new(InMemoryLoader::new()).into_shared();
        let options = SearchOptions::default().with_strategies(vec![Strategy::Dfs]);
        let mut ps = build_selector::<Idle>(&options, graph, StepCounter::new(), None).unwrap();

        ps.add(&[Idle(1), Idle(2)]).unwrap();
        assert_eq!(ps.peek().unwrap().0, 2);
    }

    #[test]
    fn test_guided_requires_predictor() {
        let graph = BlockGraph::new(InMemoryLoader::new()).into_shared();
        let options = SearchOptions::default();
        let result = build_selector::<Idle>(&options, graph, StepCounter::new(), None);
        assert!(matches!(result, Err(SchedulerError::Configuration(_))));
    }

    #[test]
    fn test_model_predictor_uses_configured_mode() {
        let options = SearchOptions::from_json_str(r#"{"inference_mode": "gpu"}"#).unwrap();
        let predictor = options.model_predictor(empty_session);
        match &predictor {
            Predictor::Model(model) => assert_eq!(model.mode(), InferenceMode::Gpu),
            Predictor::Oracle(_) => panic!("expected a model predictor"),
        }

        let cpu = SearchOptions::default().model_predictor(empty_session);
        assert_eq!(format!("{:?}", cpu), "Model(Cpu)");
    }

    #[test]
    fn test_is_guided() {
        assert!(SearchOptions::default().is_guided());
        let queue = SearchOptions::default().with_strategies(vec![Strategy::Bfs]);
        assert!(!queue.is_guided());

        // A predictor without a guided strategy is dropped, not an error
        let graph = BlockGraph::new(InMemoryLoader::new()).into_shared();
        let mut ps =
            build_selector::<Idle>(&queue, graph, StepCounter::new(), Some(oracle())).unwrap();
        ps.add(&[Idle(4)]).unwrap();
        assert_eq!(ps.peek().unwrap().0, 4);
    }

    #[test]
    fn test_build_sequential_selector() {
        let graph = BlockGraph::new(InMemoryLoader::new()).into_shared();
        let options = SearchOptions::default()
            .with_strategies(vec![Strategy::Bfs, Strategy::Guided])
            .with_steps_to_switch(2);
        let mut ps =
            build_selector::<Idle>(&options, graph, StepCounter::new(), Some(oracle())).unwrap();

        ps.add(&[Idle(1), Idle(2), Idle(3)]).unwrap();
        assert_eq!(ps.peek().unwrap().0, 1);
        assert_eq!(ps.peek().unwrap().0, 3);
    }
}
