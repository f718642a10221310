// Predictors choose the next state from a game snapshot
//
// Only two kinds exist, and the selector builds full or delta snapshots
// depending on which one it drives, so they form a closed enum.

pub mod model;
pub mod oracle;

pub use model::{InferenceSession, ModelPredictor};
pub use oracle::{JsonLinesOracle, Oracle, OraclePredictor};

use std::fmt;

use crate::config::InferenceMode;
use crate::error::Result;
use crate::game::Game;
use crate::StateId;

pub enum Predictor {
    /// Local ranking model; always receives full snapshots
    Model(ModelPredictor),
    /// Interactive decision-maker; receives deltas after its first call
    Oracle(OraclePredictor),
}

impl Predictor {
    pub fn model(session: impl InferenceSession + 'static, mode: InferenceMode) -> Self {
        Predictor::Model(ModelPredictor::new(session, mode))
    }

    pub fn oracle(oracle: impl Oracle + 'static) -> Self {
        Predictor::Oracle(OraclePredictor::new(oracle))
    }

    /// Pick a state id from the snapshot
    pub fn predict_state(&mut self, game: &Game<'_>) -> Result<StateId> {
        match self {
            Predictor::Model(model) => model.predict_state(game),
            Predictor::Oracle(oracle) => oracle.predict_state(game),
        }
    }

    /// Whether the predictor mirrors the game and can take deltas
    pub fn accepts_deltas(&self) -> bool {
        matches!(self, Predictor::Oracle(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Predictor::Model(_) => "model",
            Predictor::Oracle(_) => "oracle",
        }
    }
}

impl fmt::Debug for Predictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predictor::Model(model) => f.debug_tuple("Model").field(&model.mode()).finish(),
            Predictor::Oracle(_) => f.write_str("Oracle"),
        }
    }
}
