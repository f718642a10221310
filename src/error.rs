//! Error taxonomy for the scheduler
//!
//! Fatal conditions (a broken invariant upstream, a misconfigured
//! selector, a failing predictor) surface as [`SchedulerError`] and end the
//! search run. Notifications about states the scheduler no longer tracks are
//! not errors at all; the selectors swallow them.

use thiserror::Error;

use crate::cfg::MethodId;
use crate::state::InstRef;
use crate::StateId;

/// Errors raised by the block graph, the selectors and the predictors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No registered block owns the instruction
    #[error("instruction {inst} does not belong to any block")]
    NotFound { inst: InstRef },

    /// The loader has no CFG for the method
    #[error("no control-flow graph available for method {method}")]
    UnknownMethod { method: MethodId },

    /// The loader failed while producing a method CFG
    #[error("failed to load control-flow graph for method {method}")]
    Load {
        method: MethodId,
        #[source]
        source: anyhow::Error,
    },

    /// A predictor broke its contract
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("peek called on an empty state pool")]
    EmptyPool,

    /// The inference backend or the oracle transport failed
    #[error("predictor failed")]
    Predictor(#[source] anyhow::Error),
}

impl SchedulerError {
    /// Predictor picked a state the selector does not track
    pub fn untracked_state(id: StateId) -> Self {
        SchedulerError::InvariantViolation(format!(
            "predictor chose state {}, which is not tracked",
            id
        ))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
