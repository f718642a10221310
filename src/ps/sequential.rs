//! Sequential composition of path selectors
//!
//! All children see every `add`, `remove` and `update`, so whichever one is
//! active has current bookkeeping. Only `peek` is routed: the first
//! `steps_to_switch - 1` peeks use the first child, and the peek that brings
//! the counter to `steps_to_switch` moves the cursor to the next child for
//! good. The switch happens once, however many children there are.

use tracing::{info, trace};

use crate::error::{Result, SchedulerError};
use crate::ps::PathSelector;

pub struct SequentialPathSelector<S> {
    children: Vec<Box<dyn PathSelector<S>>>,
    steps_to_switch: u64,
    peeks: u64,
    active: usize,
}

impl<S> SequentialPathSelector<S> {
    pub fn new(children: Vec<Box<dyn PathSelector<S>>>, steps_to_switch: u64) -> Result<Self> {
        if children.len() < 2 {
            return Err(SchedulerError::Configuration(format!(
                "sequential selector needs at least 2 children, got {}",
                children.len()
            )));
        }
        if steps_to_switch == 0 {
            return Err(SchedulerError::Configuration(
                "steps_to_switch must be positive".to_string(),
            ));
        }
        Ok(Self {
            children,
            steps_to_switch,
            peeks: 0,
            active: 0,
        })
    }

    /// Index of the child that served the latest peek
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn peeks(&self) -> u64 {
        self.peeks
    }

}

impl<S> PathSelector<S> for SequentialPathSelector<S> {
    fn is_empty(&self) -> bool {
        self.children.iter().all(|child| child.is_empty())
    }

    fn peek(&mut self) -> Result<S> {
        self.peeks += 1;
        if self.peeks == self.steps_to_switch {
            let next = (self.active + 1) % self.children.len();
            info!(
                from = self.active,
                to = next,
                peeks = self.peeks,
                "switching path selector"
            );
            self.active = next;
        }
        self.children[self.active].peek()
    }

    fn add(&mut self, states: &[S]) -> Result<()> {
        for child in &mut self.children {
            child.add(states)?;
        }
        Ok(())
    }

    fn remove(&mut self, state: &S) -> Result<()> {
        for child in &mut self.children {
            child.remove(state)?;
        }
        Ok(())
    }

    fn update(&mut self, state: &S) -> Result<()> {
        for child in &mut self.children {
            child.update(state)?;
        }
        trace!(active = self.active, "broadcast update");
        Ok(())
    }
}

impl<S> std::fmt::Debug for SequentialPathSelector<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialPathSelector")
            .field("children", &self.children.len())
            .field("steps_to_switch", &self.steps_to_switch)
            .field("peeks", &self.peeks)
            .field("active", &self.active)
            .finish()
    }
}
