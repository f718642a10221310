// Guided Search: directed path selection for symbolic execution
//
// Tracks the states of a symbolic-execution run over an incrementally built
// block graph and picks the next state to advance, either with a local
// ranking model or with an external oracle.

pub mod cfg;
pub mod config;
pub mod error;
pub mod game;
pub mod predictor;
pub mod ps;
pub mod state;

/// Identifier of an execution state, unique within a run
pub type StateId = u32;

pub use cfg::{BasicBlock, BlockGraph, BlockId, MethodId, SharedBlockGraph};
pub use config::{build_selector, InferenceMode, SearchOptions, SnapshotPolicy, Strategy};
pub use error::{Result, SchedulerError};
pub use game::{Game, SnapshotKind};
pub use predictor::Predictor;
pub use ps::{
    AiPathSelector, PathSelector, QueueMode, QueuePathSelector, SequentialPathSelector, StepCounter,
};
pub use state::{ExecutionState, Statement, StateWrapper};
