//! Game message exchanged with an interactive oracle
//!
//! Unlike the ranking request, the message keeps original block and state
//! ids: the oracle mirrors the game on its side and applies deltas by id.

use serde::{Deserialize, Serialize};

use crate::cfg::{BasicBlock, EdgeKind};
use crate::game::Game;
use crate::state::{HistoryEntry, StateWrapper};
use crate::StateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateHistoryElem {
    pub graph_vertex_id: u64,
    pub num_of_visits: u32,
    pub step_when_visited_last_time: u64,
}

impl From<&HistoryEntry> for StateHistoryElem {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            graph_vertex_id: entry.block as u64,
            num_of_visits: entry.visits,
            step_when_visited_last_time: entry.step_when_visited_last_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub id: StateId,
    /// Current block id, `null` for a forked state that has not moved yet
    pub position: Option<u64>,
    pub path_condition_size: u32,
    pub visited_again_vertices: u32,
    pub visited_not_covered_vertices_in_zone: u32,
    pub visited_not_covered_vertices_out_of_zone: u32,
    pub step_when_moved_last_time: u64,
    pub instructions_visited_in_current_block: u32,
    pub history: Vec<StateHistoryElem>,
    pub children: Vec<StateId>,
}

impl From<&StateWrapper> for State {
    fn from(wrapper: &StateWrapper) -> Self {
        Self {
            id: wrapper.id(),
            position: wrapper.current_block().map(|block| block as u64),
            path_condition_size: wrapper.path_condition_size(),
            visited_again_vertices: wrapper.visited_again_vertices(),
            visited_not_covered_vertices_in_zone: wrapper.visited_not_covered_vertices_in_zone(),
            visited_not_covered_vertices_out_of_zone: wrapper
                .visited_not_covered_vertices_out_of_zone(),
            step_when_moved_last_time: wrapper.step_when_moved_last_time(),
            instructions_visited_in_current_block: wrapper.instructions_visited_in_current_block(),
            history: wrapper.history().values().map(StateHistoryElem::from).collect(),
            children: wrapper.children().iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMapVertex {
    pub id: u64,
    pub in_coverage_zone: bool,
    pub basic_block_size: u32,
    pub covered_by_test: bool,
    pub visited_by_state: bool,
    pub touched_by_state: bool,
    pub contains_call: bool,
    pub contains_throw: bool,
    pub states: Vec<StateId>,
}

impl From<&BasicBlock> for GameMapVertex {
    fn from(block: &BasicBlock) -> Self {
        Self {
            id: block.id as u64,
            in_coverage_zone: block.in_coverage_zone,
            basic_block_size: block.size() as u32,
            covered_by_test: block.covered_by_test,
            visited_by_state: block.visited_by_state,
            touched_by_state: block.touched_by_state,
            contains_call: block.contains_call,
            contains_throw: block.contains_throw,
            states: block.states.iter().copied().collect(),
        }
    }
}

/// Edge type code: 0 successor, 1 call, 2 return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEdgeLabel {
    pub token: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMapEdge {
    pub vertex_from: u64,
    pub vertex_to: u64,
    pub label: GameEdgeLabel,
}

/// Structured game snapshot sent to an oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub graph_vertices: Vec<GameMapVertex>,
    pub states: Vec<State>,
    pub map: Vec<GameMapEdge>,
}

impl GameState {
    pub fn from_game(game: &Game<'_>) -> Self {
        let mut map = Vec::new();
        for &id in &game.blocks {
            for kind in EdgeKind::GAME_KINDS {
                let token = match kind.type_code() {
                    Some(token) => token,
                    None => continue,
                };
                for target in game.graph.related(id, kind) {
                    map.push(GameMapEdge {
                        vertex_from: id as u64,
                        vertex_to: target as u64,
                        label: GameEdgeLabel { token },
                    });
                }
            }
        }

        Self {
            graph_vertices: game.vertices().map(GameMapVertex::from).collect(),
            states: game.states.iter().map(|w| State::from(*w)).collect(),
            map,
        }
    }
}
