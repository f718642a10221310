// Execution states as seen by the scheduler
//
// The interpreter owns its states. The scheduler only reads an id, the
// statement executed last, the fork depth and two predicates, and keeps its
// own bookkeeping in a StateWrapper per live state.

pub mod wrapper;

pub use wrapper::{HistoryEntry, StateWrapper};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cfg::MethodId;
use crate::StateId;

/// Position of an original instruction inside its method
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstRef {
    pub method: MethodId,
    pub index: usize,
}

impl InstRef {
    pub fn new(method: MethodId, index: usize) -> Self {
        Self { method, index }
    }
}

impl fmt::Display for InstRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method, self.index)
    }
}

/// Interpreter-level statement
///
/// The interpreter steps through a few synthetic statements that have no
/// counterpart in the loaded bytecode. Each of them stands in for an
/// original instruction, which is what block lookup uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Statement {
    Inst(InstRef),
    /// Synthetic method entry point placed before `entry`
    MethodEntry { entry: InstRef },
    /// Call executed concretely instead of being stepped into
    ConcreteCall { call: InstRef },
}

impl Statement {
    /// The loaded instruction this statement maps to
    pub fn original(&self) -> InstRef {
        match self {
            Statement::Inst(inst) => *inst,
            Statement::MethodEntry { entry } => *entry,
            Statement::ConcreteCall { call } => *call,
        }
    }
}

impl From<InstRef> for Statement {
    fn from(inst: InstRef) -> Self {
        Statement::Inst(inst)
    }
}

/// Read-only view of an interpreter state
pub trait ExecutionState {
    fn id(&self) -> StateId;

    /// Statement executed by the most recent step, `None` before the first step
    fn last_statement(&self) -> Option<Statement>;

    /// Number of fork points on the state's own path
    fn fork_depth(&self) -> u32;

    fn is_exceptional(&self) -> bool;

    /// Whether the state's path condition is satisfiable
    fn is_satisfiable(&self) -> bool;
}

impl<T: ExecutionState + ?Sized> ExecutionState for std::rc::Rc<T> {
    fn id(&self) -> StateId {
        (**self).id()
    }

    fn last_statement(&self) -> Option<Statement> {
        (**self).last_statement()
    }

    fn fork_depth(&self) -> u32 {
        (**self).fork_depth()
    }

    fn is_exceptional(&self) -> bool {
        (**self).is_exceptional()
    }

    fn is_satisfiable(&self) -> bool {
        (**self).is_satisfiable()
    }
}
