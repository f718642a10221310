// Path selectors: the scheduler contract driven by the interpreter loop
//
// The interpreter asks for the next state with `peek`, and reports forks,
// terminations and steps through `add`, `remove` and `update`. Selectors
// keep no reference into the interpreter; they clone the handles they are
// given.

pub mod ai;
pub mod queue;
pub mod sequential;

pub use ai::AiPathSelector;
pub use queue::{QueueMode, QueuePathSelector};
pub use sequential::SequentialPathSelector;

use std::cell::Cell;
use std::rc::Rc;

use crate::error::Result;

/// Scheduler contract between the interpreter and a search strategy
pub trait PathSelector<S> {
    /// True when no state is tracked
    fn is_empty(&self) -> bool;

    /// Choose the state to advance next
    ///
    /// Fails with [`crate::SchedulerError::EmptyPool`] when nothing is tracked.
    fn peek(&mut self) -> Result<S>;

    /// Track states forked off the most recently peeked one
    fn add(&mut self, states: &[S]) -> Result<()>;

    /// Stop tracking a state; unknown states are ignored
    fn remove(&mut self, state: &S) -> Result<()>;

    /// The state advanced one step; unknown states are ignored
    fn update(&mut self, state: &S) -> Result<()>;
}

impl<S, P: PathSelector<S> + ?Sized> PathSelector<S> for Box<P> {
    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn peek(&mut self) -> Result<S> {
        (**self).peek()
    }

    fn add(&mut self, states: &[S]) -> Result<()> {
        (**self).add(states)
    }

    fn remove(&mut self, state: &S) -> Result<()> {
        (**self).remove(state)
    }

    fn update(&mut self, state: &S) -> Result<()> {
        (**self).update(state)
    }
}

/// Global step counter shared by the interpreter and its selectors
///
/// Clones observe the same count. The interpreter ticks it once per
/// executed statement.
#[derive(Debug, Clone, Default)]
pub struct StepCounter(Rc<Cell<u64>>);

impl StepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    /// Advance by one and return the new count
    pub fn tick(&self) -> u64 {
        let next = self.0.get() + 1;
        self.0.set(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_counter_is_shared() {
        let steps = StepCounter::new();
        let view = steps.clone();

        assert_eq!(steps.tick(), 1);
        assert_eq!(steps.tick(), 2);
        assert_eq!(view.get(), 2);
    }
}
