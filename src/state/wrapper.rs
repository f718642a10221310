//! Per-state bookkeeping kept by the model-guided selector
//!
//! A wrapper lives from the moment its state enters the pool until the state
//! leaves it. Forked wrappers start from a value copy of their parent's
//! history, so siblings diverge independently.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::cfg::{BlockGraph, BlockId};
use crate::error::Result;
use crate::state::ExecutionState;
use crate::StateId;

/// Visit record of one block on a state's path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub block: BlockId,
    pub visits: u32,
    pub step_when_visited_last_time: u64,
}

impl HistoryEntry {
    fn new(block: BlockId) -> Self {
        Self {
            block,
            visits: 0,
            step_when_visited_last_time: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateWrapper {
    id: StateId,
    parent: Option<StateId>,
    children: BTreeSet<StateId>,
    parent_path_condition_size: u32,
    path_condition_size: u32,
    current_block: Option<BlockId>,
    instructions_visited_in_current_block: u32,
    step_when_moved_last_time: u64,
    history: BTreeMap<BlockId, HistoryEntry>,
    visited_again_vertices: u32,
    visited_not_covered_vertices_in_zone: u32,
    visited_not_covered_vertices_out_of_zone: u32,
}

impl StateWrapper {
    /// Wrapper for the initial state of a search
    pub fn root(id: StateId, steps: u64) -> Self {
        Self {
            id,
            parent: None,
            children: BTreeSet::new(),
            parent_path_condition_size: 0,
            path_condition_size: 0,
            current_block: None,
            instructions_visited_in_current_block: 0,
            step_when_moved_last_time: steps,
            history: BTreeMap::new(),
            visited_again_vertices: 0,
            visited_not_covered_vertices_in_zone: 0,
            visited_not_covered_vertices_out_of_zone: 0,
        }
    }

    /// Wrapper for a state forked from this one
    ///
    /// The child inherits the path condition size and a copy of the history.
    /// Registering the child in `children` is left to the caller, which owns
    /// both wrappers.
    pub fn fork(&self, id: StateId, steps: u64) -> Self {
        let mut child = Self::root(id, steps);
        child.parent = Some(self.id);
        child.parent_path_condition_size = self.path_condition_size;
        child.path_condition_size = self.path_condition_size;
        child.history = self.history.clone();
        child.visited_again_vertices = self.visited_again_vertices;
        child.visited_not_covered_vertices_in_zone = self.visited_not_covered_vertices_in_zone;
        child.visited_not_covered_vertices_out_of_zone =
            self.visited_not_covered_vertices_out_of_zone;
        child
    }

    /// Advance the wrapper after its state executed one more statement
    ///
    /// Moves the state's id between block occupant sets when the block
    /// changes, updates the history entry of the current block, and flags the
    /// block as touched (on its first statement) or visited (on its last).
    pub fn update<S: ExecutionState + ?Sized>(
        &mut self,
        state: &S,
        graph: &mut BlockGraph,
        steps: u64,
    ) -> Result<()> {
        let stmt = match state.last_statement() {
            Some(stmt) => stmt,
            None => return Ok(()),
        };
        let block = graph.block_of(&stmt)?;
        let index = stmt.original().index;

        if self.current_block != Some(block) {
            if let Some(old) = self.current_block.and_then(|old| graph.block_mut(old)) {
                old.states.remove(&self.id);
            }
            self.current_block = Some(block);
            self.instructions_visited_in_current_block = 0;
        }
        self.path_condition_size = self.parent_path_condition_size + state.fork_depth();
        self.instructions_visited_in_current_block += 1;
        self.step_when_moved_last_time = steps;

        let entry = self
            .history
            .entry(block)
            .or_insert_with(|| HistoryEntry::new(block));
        if let Some(b) = graph.block_mut(block) {
            b.states.insert(self.id);
            if b.is_first(index) {
                entry.visits += 1;
                b.touched_by_state = true;
            }
            if b.is_last(index) {
                b.visited_by_state = true;
                entry.step_when_visited_last_time = steps;
            }
        }

        self.refresh_counters(graph);
        Ok(())
    }

    /// Recompute the aggregate history counters
    ///
    /// Coverage flags can change outside of [`StateWrapper::update`], so
    /// snapshot assembly calls this before reading the counters.
    pub fn refresh_counters(&mut self, graph: &BlockGraph) {
        let mut again = 0;
        let mut in_zone = 0;
        let mut out_of_zone = 0;
        for entry in self.history.values() {
            if entry.visits > 1 {
                again += 1;
            }
            if let Some(block) = graph.block(entry.block) {
                if !block.covered_by_test {
                    if block.in_coverage_zone {
                        in_zone += 1;
                    } else {
                        out_of_zone += 1;
                    }
                }
            }
        }
        self.visited_again_vertices = again;
        self.visited_not_covered_vertices_in_zone = in_zone;
        self.visited_not_covered_vertices_out_of_zone = out_of_zone;
    }

    /// Take the state's id out of its current block's occupant set
    pub fn leave_block(&mut self, graph: &mut BlockGraph) {
        if let Some(block) = self.current_block.and_then(|b| graph.block_mut(b)) {
            block.states.remove(&self.id);
        }
    }

    pub fn add_child(&mut self, child: StateId) {
        self.children.insert(child);
    }

    pub fn remove_child(&mut self, child: StateId) -> bool {
        self.children.remove(&child)
    }

    pub fn detach_from_parent(&mut self) {
        self.parent = None;
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn parent(&self) -> Option<StateId> {
        self.parent
    }

    pub fn children(&self) -> &BTreeSet<StateId> {
        &self.children
    }

    /// Block the state sits in; `None` until its first update
    pub fn current_block(&self) -> Option<BlockId> {
        self.current_block
    }

    pub fn path_condition_size(&self) -> u32 {
        self.path_condition_size
    }

    pub fn instructions_visited_in_current_block(&self) -> u32 {
        self.instructions_visited_in_current_block
    }

    pub fn step_when_moved_last_time(&self) -> u64 {
        self.step_when_moved_last_time
    }

    pub fn history(&self) -> &BTreeMap<BlockId, HistoryEntry> {
        &self.history
    }

    pub fn visited_again_vertices(&self) -> u32 {
        self.visited_again_vertices
    }

    pub fn visited_not_covered_vertices_in_zone(&self) -> u32 {
        self.visited_not_covered_vertices_in_zone
    }

    pub fn visited_not_covered_vertices_out_of_zone(&self) -> u32 {
        self.visited_not_covered_vertices_out_of_zone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{InMemoryLoader, MethodCfg, MethodId, RawInst};
    use crate::state::{InstRef, Statement};

    const M: MethodId = MethodId(0);

    struct FakeState {
        id: StateId,
        last: Option<usize>,
        depth: u32,
    }

    impl ExecutionState for FakeState {
        fn id(&self) -> StateId {
            self.id
        }
        fn last_statement(&self) -> Option<Statement> {
            self.last.map(|idx| Statement::Inst(InstRef::new(M, idx)))
        }
        fn fork_depth(&self) -> u32 {
            self.depth
        }
        fn is_exceptional(&self) -> bool {
            false
        }
        fn is_satisfiable(&self) -> bool {
            true
        }
    }

    /// Blocks: 0 = [0..1] (branch to 2 or 4), 1 = [2..3], 2 = [4]
    fn create_graph() -> BlockGraph {
        let cfg = MethodCfg::new(
            M,
            "m",
            vec![
                RawInst::plain(1),
                RawInst::branch(vec![2, 4]),
                RawInst::plain(3),
                RawInst::ret(),
                RawInst::ret(),
            ],
        );
        let mut graph = BlockGraph::new(InMemoryLoader::new());
        graph.register_method(&cfg);
        graph
    }

    fn step(wrapper: &mut StateWrapper, graph: &mut BlockGraph, idx: usize, steps: u64) {
        let state = FakeState {
            id: wrapper.id(),
            last: Some(idx),
            depth: 0,
        };
        wrapper.update(&state, graph, steps).unwrap();
    }

    #[test]
    fn test_update_walks_through_block() {
        let mut graph = create_graph();
        let mut w = StateWrapper::root(1, 0);

        step(&mut w, &mut graph, 0, 1);
        assert_eq!(w.current_block(), Some(0));
        assert_eq!(w.instructions_visited_in_current_block(), 1);
        assert!(graph.block(0).unwrap().touched_by_state);
        assert!(!graph.block(0).unwrap().visited_by_state);
        assert_eq!(w.history()[&0].visits, 1);

        step(&mut w, &mut graph, 1, 2);
        assert_eq!(w.instructions_visited_in_current_block(), 2);
        assert!(graph.block(0).unwrap().visited_by_state);
        assert_eq!(w.history()[&0].step_when_visited_last_time, 2);
        assert_eq!(w.step_when_moved_last_time(), 2);
    }

    #[test]
    fn test_block_change_moves_occupant() {
        let mut graph = create_graph();
        let mut w = StateWrapper::root(7, 0);

        step(&mut w, &mut graph, 1, 1);
        assert!(graph.block(0).unwrap().states.contains(&7));

        step(&mut w, &mut graph, 2, 2);
        assert_eq!(w.current_block(), Some(1));
        assert_eq!(w.instructions_visited_in_current_block(), 1);
        assert!(!graph.block(0).unwrap().states.contains(&7));
        assert!(graph.block(1).unwrap().states.contains(&7));

        w.leave_block(&mut graph);
        assert!(graph.block(1).unwrap().states.is_empty());
    }

    #[test]
    fn test_revisit_counts_visited_again() {
        let mut graph = create_graph();
        let mut w = StateWrapper::root(1, 0);

        step(&mut w, &mut graph, 2, 1);
        step(&mut w, &mut graph, 4, 2);
        step(&mut w, &mut graph, 2, 3);
        assert_eq!(w.history()[&1].visits, 2);
        assert_eq!(w.visited_again_vertices(), 1);
    }

    #[test]
    fn test_counters_follow_coverage_flags() {
        let mut graph = create_graph();
        graph.set_coverage_zone(M);
        let mut w = StateWrapper::root(1, 0);

        step(&mut w, &mut graph, 0, 1);
        step(&mut w, &mut graph, 2, 2);
        assert_eq!(w.visited_not_covered_vertices_in_zone(), 2);
        assert_eq!(w.visited_not_covered_vertices_out_of_zone(), 0);

        graph.mark_covered_by_test(0);
        w.refresh_counters(&graph);
        assert_eq!(w.visited_not_covered_vertices_in_zone(), 1);

        graph.clear_coverage_zone();
        w.refresh_counters(&graph);
        assert_eq!(w.visited_not_covered_vertices_in_zone(), 0);
        assert_eq!(w.visited_not_covered_vertices_out_of_zone(), 1);
    }

    #[test]
    fn test_path_condition_size_adds_parent_base() {
        let mut graph = create_graph();
        let mut parent = StateWrapper::root(1, 0);
        let state = FakeState {
            id: 1,
            last: Some(0),
            depth: 3,
        };
        parent.update(&state, &mut graph, 1).unwrap();
        assert_eq!(parent.path_condition_size(), 3);

        let mut child = parent.fork(2, 1);
        let child_state = FakeState {
            id: 2,
            last: Some(1),
            depth: 2,
        };
        child.update(&child_state, &mut graph, 2).unwrap();
        assert_eq!(child.path_condition_size(), 5);
        assert_eq!(child.parent(), Some(1));
    }

    #[test]
    fn test_fork_copies_history() {
        let mut graph = create_graph();
        let mut parent = StateWrapper::root(1, 0);
        step(&mut parent, &mut graph, 0, 1);
        step(&mut parent, &mut graph, 1, 2);

        let mut left = parent.fork(2, 2);
        let mut right = parent.fork(3, 2);

        step(&mut left, &mut graph, 2, 3);
        step(&mut right, &mut graph, 4, 3);
        step(&mut right, &mut graph, 0, 4);

        assert!(left.history().contains_key(&1));
        assert!(!left.history().contains_key(&2));
        assert_eq!(left.history()[&0].visits, 1);

        assert!(right.history().contains_key(&2));
        assert!(!right.history().contains_key(&1));
        assert_eq!(right.history()[&0].visits, 2);

        assert_eq!(parent.history().len(), 1);
        assert_eq!(parent.history()[&0].visits, 1);
    }

    #[test]
    fn test_update_without_statement_is_noop() {
        let mut graph = create_graph();
        let mut w = StateWrapper::root(1, 5);
        let state = FakeState {
            id: 1,
            last: None,
            depth: 0,
        };
        w.update(&state, &mut graph, 9).unwrap();
        assert_eq!(w.current_block(), None);
        assert_eq!(w.step_when_moved_last_time(), 5);
    }

    #[test]
    fn test_update_outside_graph_fails() {
        let mut graph = create_graph();
        let mut w = StateWrapper::root(1, 0);
        let state = FakeState {
            id: 1,
            last: Some(40),
            depth: 0,
        };
        assert!(w.update(&state, &mut graph, 1).is_err());
    }
}
