//! Split a raw method CFG into basic block ranges

use std::collections::BTreeSet;

use crate::cfg::analysis::ends_block;
use crate::cfg::MethodCfg;

/// Instruction range of a block before it is registered in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: usize,
    /// Inclusive
    pub end: usize,
}

/// Compute the basic block ranges of a method
///
/// Leaders are the entry instruction, every jump target, every handler
/// start, and every instruction following one that ends a block (branches,
/// calls, throws, returns and non-sequential plain instructions). The
/// resulting ranges partition the instruction list and are sorted by start.
pub fn split_blocks(cfg: &MethodCfg) -> Vec<BlockRange> {
    let len = cfg.instructions.len();
    if len == 0 {
        return vec![];
    }

    let mut leaders = BTreeSet::new();
    leaders.insert(0);

    for (idx, inst) in cfg.instructions.iter().enumerate() {
        // A sequential plain instruction's successor is just its fall-through
        if ends_block(cfg, idx) {
            leaders.extend(inst.successors.iter().copied().filter(|&t| t < len));
            if idx + 1 < len {
                leaders.insert(idx + 1);
            }
        }
        leaders.extend(inst.catchers.iter().copied().filter(|&t| t < len));
    }

    let starts: Vec<usize> = leaders.into_iter().collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).map(|next| next - 1).unwrap_or(len - 1);
            BlockRange { start, end }
        })
        .collect()
}
