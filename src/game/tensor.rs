//! Ranking request: a game snapshot encoded as named tensors
//!
//! The layout is fixed by the trained models that consume it: eight inputs
//! in a fixed order, 7 features per block, 7 per state, and 2 attributes per
//! history edge. Block and state ids are remapped to dense 0-based indices
//! local to the snapshot; edges leading outside the snapshot are dropped.
//!
//! | input                                  | dtype | shape    |
//! |----------------------------------------|-------|----------|
//! | `game_vertex`                          | f32   | `[B, 7]` |
//! | `state_vertex`                         | f32   | `[S, 7]` |
//! | `gamevertex_to_gamevertex_index`       | i64   | `[2, E]` |
//! | `gamevertex_to_gamevertex_type`        | i64   | `[E]`    |
//! | `gamevertex_history_statevertex_index` | i64   | `[2, H]` |
//! | `gamevertex_history_statevertex_attrs` | i64   | `[H, 2]` |
//! | `gamevertex_in_statevertex`            | i64   | `[2, P]` |
//! | `statevertex_parentof_statevertex`     | i64   | `[2, C]` |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cfg::{BasicBlock, BlockId, EdgeKind};
use crate::error::{Result, SchedulerError};
use crate::game::Game;
use crate::StateId;

pub const NUM_VERTEX_ATTRIBUTES: usize = 7;
pub const NUM_STATE_ATTRIBUTES: usize = 7;
pub const NUM_HISTORY_EDGE_ATTRIBUTES: usize = 2;

pub const GAME_VERTEX: &str = "game_vertex";
pub const STATE_VERTEX: &str = "state_vertex";
pub const VERTEX_EDGE_INDEX: &str = "gamevertex_to_gamevertex_index";
pub const VERTEX_EDGE_TYPE: &str = "gamevertex_to_gamevertex_type";
pub const HISTORY_EDGE_INDEX: &str = "gamevertex_history_statevertex_index";
pub const HISTORY_EDGE_ATTRS: &str = "gamevertex_history_statevertex_attrs";
pub const VERTEX_IN_STATE: &str = "gamevertex_in_statevertex";
pub const STATE_PARENT_OF: &str = "statevertex_parentof_statevertex";

/// Name of the model output holding one row of scores per state
pub const OUTPUT: &str = "out";

/// Input names in the order models expect them
pub const INPUT_NAMES: [&str; 8] = [
    GAME_VERTEX,
    STATE_VERTEX,
    VERTEX_EDGE_INDEX,
    VERTEX_EDGE_TYPE,
    HISTORY_EDGE_INDEX,
    HISTORY_EDGE_ATTRS,
    VERTEX_IN_STATE,
    STATE_PARENT_OF,
];

/// Dense row-major tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tensor {
    F32 { shape: Vec<usize>, data: Vec<f32> },
    I64 { shape: Vec<usize>, data: Vec<i64> },
}

impl Tensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::F32 { shape, .. } | Tensor::I64 { shape, .. } => shape,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Tensor::F32 { data, .. } => Some(data),
            Tensor::I64 { .. } => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            Tensor::I64 { data, .. } => Some(data),
            Tensor::F32 { .. } => None,
        }
    }
}

/// Pairs of local indices laid out as a `[2, N]` tensor
#[derive(Default)]
struct EdgeIndex {
    from: Vec<i64>,
    to: Vec<i64>,
}

impl EdgeIndex {
    fn push(&mut self, from: usize, to: usize) {
        self.from.push(from as i64);
        self.to.push(to as i64);
    }

    fn into_tensor(self) -> Tensor {
        let n = self.from.len();
        let mut data = self.from;
        data.extend(self.to);
        Tensor::I64 {
            shape: vec![2, n],
            data,
        }
    }
}

fn flag(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn vertex_features(block: &BasicBlock) -> [f32; NUM_VERTEX_ATTRIBUTES] {
    [
        flag(block.in_coverage_zone),
        block.size() as f32,
        flag(block.covered_by_test),
        flag(block.visited_by_state),
        flag(block.touched_by_state),
        flag(block.contains_call),
        flag(block.contains_throw),
    ]
}

/// Encoded snapshot plus the mapping back from local state indices
#[derive(Debug, Clone)]
pub struct RankingRequest {
    pub inputs: Vec<(&'static str, Tensor)>,
    /// State id at each local state index
    pub state_ids: Vec<StateId>,
}

impl RankingRequest {
    pub fn encode(game: &Game<'_>) -> Self {
        let vertex_index: HashMap<BlockId, usize> = game
            .blocks
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let state_ids: Vec<StateId> = game.states.iter().map(|w| w.id()).collect();
        let state_index: HashMap<StateId, usize> = state_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut vertices = Vec::with_capacity(game.blocks.len() * NUM_VERTEX_ATTRIBUTES);
        for block in game.vertices() {
            vertices.extend_from_slice(&vertex_features(block));
        }

        let mut states = Vec::with_capacity(game.states.len() * NUM_STATE_ATTRIBUTES);
        for wrapper in &game.states {
            // -1 marks a state whose block is not part of the snapshot
            let position = wrapper
                .current_block()
                .and_then(|b| vertex_index.get(&b))
                .map(|&v| v as f32)
                .unwrap_or(-1.0);
            states.extend_from_slice(&[
                position,
                wrapper.path_condition_size() as f32,
                wrapper.visited_again_vertices() as f32,
                wrapper.visited_not_covered_vertices_in_zone() as f32,
                wrapper.visited_not_covered_vertices_out_of_zone() as f32,
                wrapper.step_when_moved_last_time() as f32,
                wrapper.instructions_visited_in_current_block() as f32,
            ]);
        }

        let mut edges = EdgeIndex::default();
        let mut edge_types = Vec::new();
        for (from, &id) in game.blocks.iter().enumerate() {
            for kind in EdgeKind::GAME_KINDS {
                let code = match kind.type_code() {
                    Some(code) => code,
                    None => continue,
                };
                for target in game.graph.related(id, kind) {
                    if let Some(&to) = vertex_index.get(&target) {
                        edges.push(from, to);
                        edge_types.push(code);
                    }
                }
            }
        }

        let mut history = EdgeIndex::default();
        let mut history_attrs = Vec::new();
        let mut positions = EdgeIndex::default();
        let mut parent_of = EdgeIndex::default();
        for (s, wrapper) in game.states.iter().enumerate() {
            for entry in wrapper.history().values() {
                if let Some(&v) = vertex_index.get(&entry.block) {
                    history.push(v, s);
                    history_attrs.push(entry.visits as i64);
                    history_attrs.push(entry.step_when_visited_last_time as i64);
                }
            }
            if let Some(&v) = wrapper.current_block().and_then(|b| vertex_index.get(&b)) {
                positions.push(v, s);
            }
            for child in wrapper.children() {
                if let Some(&c) = state_index.get(child) {
                    parent_of.push(s, c);
                }
            }
        }

        let num_edges = edge_types.len();
        let num_history = history_attrs.len() / NUM_HISTORY_EDGE_ATTRIBUTES;
        let inputs = vec![
            (
                GAME_VERTEX,
                Tensor::F32 {
                    shape: vec![game.blocks.len(), NUM_VERTEX_ATTRIBUTES],
                    data: vertices,
                },
            ),
            (
                STATE_VERTEX,
                Tensor::F32 {
                    shape: vec![game.states.len(), NUM_STATE_ATTRIBUTES],
                    data: states,
                },
            ),
            (VERTEX_EDGE_INDEX, edges.into_tensor()),
            (
                VERTEX_EDGE_TYPE,
                Tensor::I64 {
                    shape: vec![num_edges],
                    data: edge_types,
                },
            ),
            (HISTORY_EDGE_INDEX, history.into_tensor()),
            (
                HISTORY_EDGE_ATTRS,
                Tensor::I64 {
                    shape: vec![num_history, NUM_HISTORY_EDGE_ATTRIBUTES],
                    data: history_attrs,
                },
            ),
            (VERTEX_IN_STATE, positions.into_tensor()),
            (STATE_PARENT_OF, parent_of.into_tensor()),
        ];

        Self { inputs, state_ids }
    }

    pub fn input(&self, name: &str) -> Option<&Tensor> {
        self.inputs.iter().find(|(n, _)| *n == name).map(|(_, t)| t)
    }

    /// Pick the state with the highest summed score
    ///
    /// `scores` must hold one row per encoded state. Each row is summed over
    /// whatever output channels the model emits; the first maximum wins.
    pub fn select(&self, scores: &Tensor) -> Result<StateId> {
        let data = scores.as_f32().ok_or_else(|| {
            SchedulerError::InvariantViolation("model output is not a float tensor".to_string())
        })?;
        let rows = scores.shape().first().copied().unwrap_or(0);
        if rows != self.state_ids.len() {
            return Err(SchedulerError::InvariantViolation(format!(
                "model scored {} states, snapshot has {}",
                rows,
                self.state_ids.len()
            )));
        }
        let width = scores.shape().iter().skip(1).product::<usize>();
        if data.len() != rows * width {
            return Err(SchedulerError::InvariantViolation(format!(
                "model output holds {} values, shape {:?} needs {}",
                data.len(),
                scores.shape(),
                rows * width
            )));
        }

        let sums: Vec<f32> = if width == 0 {
            vec![0.0; rows]
        } else {
            data.chunks(width).map(|row| row.iter().sum()).collect()
        };
        argmax_first(&sums)
            .map(|idx| self.state_ids[idx])
            .ok_or_else(|| SchedulerError::InvariantViolation("model scored no states".to_string()))
    }
}

/// Index of the first maximum, ignoring NaN scores
///
/// `None` when no value is a number.
pub fn argmax_first(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, top)) => value > top,
        };
        if better {
            best = Some((idx, value));
        }
    }
    best.map(|(idx, _)| idx)
}
