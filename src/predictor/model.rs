//! Predictor backed by a local ranking model
//!
//! The model runtime itself lives outside this crate. It is reached through
//! [`InferenceSession`], which maps the named input tensors of a
//! [`RankingRequest`] to named outputs; `"out"` must hold one row of scores
//! per state.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::InferenceMode;
use crate::error::{Result, SchedulerError};
use crate::game::tensor::OUTPUT;
use crate::game::{Game, RankingRequest, Tensor};
use crate::StateId;

/// Named output tensors of one inference run
pub type Outputs = HashMap<String, Tensor>;

/// One loaded model, ready to run
pub trait InferenceSession {
    fn run(&mut self, inputs: &[(&'static str, Tensor)]) -> anyhow::Result<Outputs>;
}

impl<F> InferenceSession for F
where
    F: FnMut(&[(&'static str, Tensor)]) -> anyhow::Result<Outputs>,
{
    fn run(&mut self, inputs: &[(&'static str, Tensor)]) -> anyhow::Result<Outputs> {
        self(inputs)
    }
}

pub struct ModelPredictor {
    session: Box<dyn InferenceSession>,
    mode: InferenceMode,
}

impl ModelPredictor {
    pub fn new(session: impl InferenceSession + 'static, mode: InferenceMode) -> Self {
        info!(mode = ?mode, "using {} execution provider", mode.provider());
        Self {
            session: Box::new(session),
            mode,
        }
    }

    pub fn mode(&self) -> InferenceMode {
        self.mode
    }

    pub fn predict_state(&mut self, game: &Game<'_>) -> Result<StateId> {
        let request = RankingRequest::encode(game);
        let outputs = self
            .session
            .run(&request.inputs)
            .map_err(SchedulerError::Predictor)?;
        let scores = outputs.get(OUTPUT).ok_or_else(|| {
            SchedulerError::InvariantViolation(format!("model produced no `{}` tensor", OUTPUT))
        })?;

        let chosen = request.select(scores)?;
        debug!(
            state = chosen,
            states = request.state_ids.len(),
            blocks = game.blocks.len(),
            "model picked state"
        );
        Ok(chosen)
    }
}
