//! Model-guided path selector
//!
//! Keeps a [`StateWrapper`] per tracked state, records which blocks and
//! states changed between decisions, and asks a [`Predictor`] to pick the
//! next state from a game snapshot.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

use crate::cfg::{BlockId, SharedBlockGraph};
use crate::config::SnapshotPolicy;
use crate::error::{Result, SchedulerError};
use crate::game::{Game, SnapshotKind};
use crate::predictor::Predictor;
use crate::ps::{PathSelector, StepCounter};
use crate::state::{ExecutionState, StateWrapper};
use crate::StateId;

#[derive(Debug)]
struct Tracked<S> {
    state: S,
    wrapper: StateWrapper,
}

#[derive(Debug)]
pub struct AiPathSelector<S> {
    graph: SharedBlockGraph,
    steps: StepCounter,
    predictor: Predictor,
    policy: SnapshotPolicy,
    // Ordered by id so snapshot rows, and thus score ties, are deterministic
    tracked: BTreeMap<StateId, Tracked<S>>,
    last_peeked: Option<StateId>,
    touched_states: BTreeSet<StateId>,
    touched_blocks: BTreeSet<BlockId>,
    block_watermark: usize,
    has_predicted: bool,
}

impl<S: ExecutionState + Clone> AiPathSelector<S> {
    pub fn new(graph: SharedBlockGraph, steps: StepCounter, predictor: Predictor) -> Self {
        Self {
            graph,
            steps,
            predictor,
            policy: SnapshotPolicy::Auto,
            tracked: BTreeMap::new(),
            last_peeked: None,
            touched_states: BTreeSet::new(),
            touched_blocks: BTreeSet::new(),
            block_watermark: 0,
            has_predicted: false,
        }
    }

    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn wrapper(&self, id: StateId) -> Option<&StateWrapper> {
        self.tracked.get(&id).map(|t| &t.wrapper)
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    /// Blocks changed since the last snapshot was handed out
    pub fn touched_blocks(&self) -> &BTreeSet<BlockId> {
        &self.touched_blocks
    }

    /// States changed since the last snapshot was handed out
    pub fn touched_states(&self) -> &BTreeSet<StateId> {
        &self.touched_states
    }

    /// Snapshot kind the next prediction will receive
    pub fn next_snapshot_kind(&self) -> SnapshotKind {
        let full = self.policy == SnapshotPolicy::AlwaysFull
            || !self.predictor.accepts_deltas()
            || !self.has_predicted;
        if full {
            SnapshotKind::Full
        } else {
            SnapshotKind::Delta
        }
    }

    fn predict(&mut self) -> Result<StateId> {
        let kind = self.next_snapshot_kind();
        let graph = self.graph.borrow();
        for tracked in self.tracked.values_mut() {
            tracked.wrapper.refresh_counters(&graph);
        }
        let new_blocks = graph.drain_new_blocks(&mut self.block_watermark);

        let tracked = &self.tracked;
        let game = match kind {
            SnapshotKind::Full => Game::full(&graph, tracked.values().map(|t| &t.wrapper)),
            SnapshotKind::Delta => Game::delta(
                &graph,
                self.touched_blocks.iter().copied().chain(new_blocks),
                self.touched_states
                    .iter()
                    .filter_map(|id| tracked.get(id))
                    .map(|t| &t.wrapper),
            ),
        };
        debug!(
            kind = ?game.kind,
            blocks = game.blocks.len(),
            states = game.states.len(),
            predictor = self.predictor.kind(),
            "built game snapshot"
        );

        let chosen = self.predictor.predict_state(&game)?;
        self.has_predicted = true;
        self.touched_blocks.clear();
        self.touched_states.clear();
        Ok(chosen)
    }
}

impl<S: ExecutionState + Clone> PathSelector<S> for AiPathSelector<S> {
    fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    fn peek(&mut self) -> Result<S> {
        let chosen = match self.tracked.len() {
            0 => return Err(SchedulerError::EmptyPool),
            // Initial state: nothing to rank yet
            1 => self
                .tracked
                .keys()
                .next()
                .copied()
                .ok_or(SchedulerError::EmptyPool)?,
            _ => self.predict()?,
        };

        let state = match self.tracked.get(&chosen) {
            Some(tracked) => tracked.state.clone(),
            None => return Err(SchedulerError::untracked_state(chosen)),
        };
        trace!(state = chosen, "peeked state");
        self.last_peeked = Some(chosen);
        Ok(state)
    }

    fn add(&mut self, states: &[S]) -> Result<()> {
        let steps = self.steps.get();
        let parent = self.last_peeked.filter(|id| self.tracked.contains_key(id));

        let mut added = 0usize;
        for state in states {
            let id = state.id();
            if self.tracked.contains_key(&id) {
                trace!(state = id, "state already tracked");
                continue;
            }
            let wrapper = match parent.and_then(|p| self.tracked.get_mut(&p)) {
                Some(p) => {
                    p.wrapper.add_child(id);
                    p.wrapper.fork(id, steps)
                }
                None => StateWrapper::root(id, steps),
            };
            self.tracked.insert(
                id,
                Tracked {
                    state: state.clone(),
                    wrapper,
                },
            );
            self.touched_states.insert(id);
            added += 1;
        }

        if added > 0 {
            if let Some(p) = parent {
                self.touched_states.insert(p);
            }
        }
        let graph = self.graph.borrow();
        self.touched_blocks
            .extend(graph.drain_new_blocks(&mut self.block_watermark));
        debug!(added, parent = ?parent, tracked = self.tracked.len(), "added states");
        Ok(())
    }

    fn remove(&mut self, state: &S) -> Result<()> {
        let id = state.id();
        let mut removed = match self.tracked.remove(&id) {
            Some(tracked) => tracked,
            None => {
                trace!(state = id, "remove for untracked state ignored");
                return Ok(());
            }
        };

        if let Some(parent) = removed.wrapper.parent() {
            if let Some(p) = self.tracked.get_mut(&parent) {
                p.wrapper.remove_child(id);
                self.touched_states.insert(parent);
            }
        }
        for child in removed.wrapper.children() {
            if let Some(c) = self.tracked.get_mut(child) {
                c.wrapper.detach_from_parent();
                self.touched_states.insert(*child);
            }
        }

        let mut graph = self.graph.borrow_mut();
        removed.wrapper.leave_block(&mut graph);
        if let Some(block) = removed.wrapper.current_block() {
            self.touched_blocks.insert(block);
        }
        if removed.state.is_satisfiable() {
            self.touched_blocks
                .extend(removed.wrapper.history().keys().copied());
        }

        self.touched_states.remove(&id);
        if self.last_peeked == Some(id) {
            self.last_peeked = None;
        }
        debug!(state = id, tracked = self.tracked.len(), "removed state");
        Ok(())
    }

    fn update(&mut self, state: &S) -> Result<()> {
        let id = state.id();
        let tracked = match self.tracked.get_mut(&id) {
            Some(tracked) => tracked,
            None => {
                trace!(state = id, "update for untracked state ignored");
                return Ok(());
            }
        };

        let mut graph = self.graph.borrow_mut();
        let before = tracked.wrapper.current_block();
        tracked.wrapper.update(state, &mut graph, self.steps.get())?;
        tracked.state = state.clone();

        let after = tracked.wrapper.current_block();
        if before != after {
            self.touched_blocks.extend(before);
        }
        self.touched_blocks.extend(after);
        self.touched_states.insert(id);
        Ok(())
    }
}
