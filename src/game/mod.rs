// Game snapshots handed to predictors
//
// A snapshot is the view of blocks, tracked states and graph edges for one
// decision round. Full snapshots carry everything; deltas carry only what
// changed since the previous round, for predictors that mirror the game.

pub mod message;
pub mod tensor;

pub use message::{GameEdgeLabel, GameMapEdge, GameMapVertex, GameState, State, StateHistoryElem};
pub use tensor::{RankingRequest, Tensor};

use serde::{Deserialize, Serialize};

use crate::cfg::{BasicBlock, BlockGraph, BlockId};
use crate::state::StateWrapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotKind {
    Full,
    Delta,
}

/// Blocks and states visible in one decision round
#[derive(Debug, Clone)]
pub struct Game<'a> {
    pub kind: SnapshotKind,
    pub blocks: Vec<BlockId>,
    pub states: Vec<&'a StateWrapper>,
    pub graph: &'a BlockGraph,
}

impl<'a> Game<'a> {
    /// Snapshot of every block in the graph and every given state
    pub fn full(graph: &'a BlockGraph, states: impl IntoIterator<Item = &'a StateWrapper>) -> Self {
        Self {
            kind: SnapshotKind::Full,
            blocks: graph.block_ids().collect(),
            states: states.into_iter().collect(),
            graph,
        }
    }

    /// Snapshot of the given changed blocks and states
    pub fn delta(
        graph: &'a BlockGraph,
        blocks: impl IntoIterator<Item = BlockId>,
        states: impl IntoIterator<Item = &'a StateWrapper>,
    ) -> Self {
        let mut blocks: Vec<BlockId> = blocks.into_iter().filter(|&id| id < graph.len()).collect();
        blocks.sort_unstable();
        blocks.dedup();
        Self {
            kind: SnapshotKind::Delta,
            blocks,
            states: states.into_iter().collect(),
            graph,
        }
    }

    /// Visible blocks, in snapshot order
    pub fn vertices(&self) -> impl Iterator<Item = &'a BasicBlock> + '_ {
        let graph = self.graph;
        self.blocks.iter().filter_map(move |&id| graph.block(id))
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
