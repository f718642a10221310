//! Predictor backed by an interactive oracle
//!
//! From the selector's point of view an oracle is a function from a
//! [`GameState`] message to a state id. How the message travels is up to the
//! [`Oracle`] implementation; [`JsonLinesOracle`] speaks newline-delimited
//! JSON over any reader/writer pair.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::game::{Game, GameState};
use crate::StateId;

/// External decision-maker
pub trait Oracle {
    fn predict(&mut self, game: &GameState) -> anyhow::Result<StateId>;
}

impl<F> Oracle for F
where
    F: FnMut(&GameState) -> anyhow::Result<StateId>,
{
    fn predict(&mut self, game: &GameState) -> anyhow::Result<StateId> {
        self(game)
    }
}

pub struct OraclePredictor {
    oracle: Box<dyn Oracle>,
}

impl OraclePredictor {
    pub fn new(oracle: impl Oracle + 'static) -> Self {
        Self {
            oracle: Box::new(oracle),
        }
    }

    pub fn predict_state(&mut self, game: &Game<'_>) -> Result<StateId> {
        let message = GameState::from_game(game);
        let chosen = self
            .oracle
            .predict(&message)
            .map_err(SchedulerError::Predictor)?;
        debug!(
            state = chosen,
            kind = ?game.kind,
            vertices = message.graph_vertices.len(),
            states = message.states.len(),
            "oracle picked state"
        );
        Ok(chosen)
    }
}

/// Message sent to the oracle
#[derive(Debug, Serialize)]
#[serde(tag = "messageType", content = "messageBody")]
pub enum OutgoingMessage<'a> {
    ReadyForNextStep(&'a GameState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStep {
    pub state_id: StateId,
}

/// Message read back from the oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType", content = "messageBody")]
pub enum IncomingMessage {
    Step(GameStep),
}

/// Oracle reached over newline-delimited JSON
///
/// Each decision writes one `ReadyForNextStep` line and blocks until a `Step`
/// line arrives. Blank lines are skipped. No timeout is applied here; wrap
/// the reader in one that enforces a deadline if the peer may hang.
pub struct JsonLinesOracle<R, W> {
    reader: R,
    writer: W,
    line: String,
}

impl<R: BufRead, W: Write> JsonLinesOracle<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: String::new(),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: BufRead, W: Write> Oracle for JsonLinesOracle<R, W> {
    fn predict(&mut self, game: &GameState) -> anyhow::Result<StateId> {
        serde_json::to_writer(&mut self.writer, &OutgoingMessage::ReadyForNextStep(game))
            .context("failed to encode game state")?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().context("failed to send game state")?;

        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .context("failed to read oracle reply")?;
            if read == 0 {
                anyhow::bail!("oracle closed the session");
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let IncomingMessage::Step(step) = serde_json::from_str(trimmed)
                .with_context(|| format!("malformed oracle reply: {}", trimmed))?;
            return Ok(step.state_id);
        }
    }
}
