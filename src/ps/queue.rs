//! Breadth-first and depth-first selectors
//!
//! Used on their own or as the unlock phase ahead of the model-guided
//! selector in a sequential composition. BFS rotates: an updated state
//! goes to the back of the queue, so every queued state advances one step
//! in turn. DFS keeps the updated state where it is.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

use crate::error::{Result, SchedulerError};
use crate::ps::PathSelector;
use crate::state::ExecutionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueMode {
    /// Oldest state first
    Bfs,
    /// Newest state first
    Dfs,
}

#[derive(Debug, Clone)]
pub struct QueuePathSelector<S> {
    mode: QueueMode,
    queue: VecDeque<S>,
}

impl<S: ExecutionState + Clone> QueuePathSelector<S> {
    pub fn new(mode: QueueMode) -> Self {
        Self {
            mode,
            queue: VecDeque::new(),
        }
    }

    pub fn bfs() -> Self {
        Self::new(QueueMode::Bfs)
    }

    pub fn dfs() -> Self {
        Self::new(QueueMode::Dfs)
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<S: ExecutionState + Clone> PathSelector<S> for QueuePathSelector<S> {
    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn peek(&mut self) -> Result<S> {
        let head = match self.mode {
            QueueMode::Bfs => self.queue.front(),
            QueueMode::Dfs => self.queue.back(),
        };
        head.cloned().ok_or(SchedulerError::EmptyPool)
    }

    fn add(&mut self, states: &[S]) -> Result<()> {
        for state in states {
            if self.queue.iter().any(|s| s.id() == state.id()) {
                trace!(state = state.id(), "state already queued");
                continue;
            }
            self.queue.push_back(state.clone());
        }
        Ok(())
    }

    fn remove(&mut self, state: &S) -> Result<()> {
        let id = state.id();
        match self.queue.iter().position(|s| s.id() == id) {
            Some(pos) => {
                self.queue.remove(pos);
            }
            None => trace!(state = id, "remove for untracked state ignored"),
        }
        Ok(())
    }

    fn update(&mut self, state: &S) -> Result<()> {
        let id = state.id();
        let pos = match self.queue.iter().position(|s| s.id() == id) {
            Some(pos) => pos,
            None => {
                trace!(state = id, "update for untracked state ignored");
                return Ok(());
            }
        };
        match self.mode {
            QueueMode::Bfs => {
                self.queue.remove(pos);
                self.queue.push_back(state.clone());
            }
            QueueMode::Dfs => self.queue[pos] = state.clone(),
        }
        Ok(())
    }
}
