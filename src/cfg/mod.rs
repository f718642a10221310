// CFG data structures shared by the block graph and the selectors
//
// Raw method CFGs come from an external loader as instruction lists. The
// block graph cuts them into basic blocks and links blocks across methods as
// the interpreter resolves calls.

pub mod analysis;
pub mod block_graph;
pub mod edge;
pub mod loader;
pub mod split;

pub use analysis::{find_exits, is_exit_instruction};
pub use block_graph::{BlockGraph, SharedBlockGraph};
pub use edge::EdgeKind;
pub use loader::{CfgLoader, InMemoryLoader};
pub use split::split_blocks;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::StateId;

/// Block identifier, dense within one [`BlockGraph`]
pub type BlockId = usize;

/// Method identifier assigned by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Instruction classification relevant to block boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstKind {
    /// Falls through to its single successor
    Plain,
    /// Conditional or unconditional jump
    Branch,
    /// Invokes another method; always ends a block
    Call,
    /// Raises an exception; always ends a block
    Throw,
    Return,
}

/// One instruction of a raw method CFG
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInst {
    pub kind: InstKind,
    /// Indices of instructions control may flow to next
    pub successors: Vec<usize>,
    /// Indices of handler instructions catching exceptions raised here
    pub catchers: Vec<usize>,
}

impl RawInst {
    pub fn new(kind: InstKind, successors: Vec<usize>) -> Self {
        Self {
            kind,
            successors,
            catchers: Vec::new(),
        }
    }

    pub fn plain(next: usize) -> Self {
        Self::new(InstKind::Plain, vec![next])
    }

    pub fn branch(targets: Vec<usize>) -> Self {
        Self::new(InstKind::Branch, targets)
    }

    pub fn call(next: usize) -> Self {
        Self::new(InstKind::Call, vec![next])
    }

    pub fn throw() -> Self {
        Self::new(InstKind::Throw, vec![])
    }

    pub fn ret() -> Self {
        Self::new(InstKind::Return, vec![])
    }

    pub fn with_catchers(mut self, catchers: Vec<usize>) -> Self {
        self.catchers = catchers;
        self
    }
}

/// Raw control-flow graph of a single method, as produced by the loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCfg {
    pub method: MethodId,
    pub name: String,
    pub instructions: Vec<RawInst>,
}

impl MethodCfg {
    pub fn new(method: MethodId, name: impl Into<String>, instructions: Vec<RawInst>) -> Self {
        Self {
            method,
            name: name.into(),
            instructions,
        }
    }
}

/// Basic block: a maximal straight-line run of one method's instructions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub method: MethodId,
    /// Index of the first instruction
    pub start: usize,
    /// Index of the last instruction (inclusive)
    pub end: usize,
    pub in_coverage_zone: bool,
    pub covered_by_test: bool,
    pub visited_by_state: bool,
    pub touched_by_state: bool,
    pub contains_call: bool,
    pub contains_throw: bool,
    /// States currently positioned in this block
    pub states: BTreeSet<StateId>,
}

impl BasicBlock {
    /// Instruction count
    pub fn size(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }

    pub fn is_first(&self, index: usize) -> bool {
        index == self.start
    }

    pub fn is_last(&self, index: usize) -> bool {
        index == self.end
    }
}
