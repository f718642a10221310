//! Raw CFG analysis: exit detection and block boundary classification

use crate::cfg::{InstKind, MethodCfg};

/// Check if an instruction leaves the method
///
/// Returns and throws both end execution of the method, so both feed
/// return-of edges once the method is called.
pub fn is_exit_instruction(cfg: &MethodCfg, index: usize) -> bool {
    cfg.instructions
        .get(index)
        .map(|inst| matches!(inst.kind, InstKind::Return | InstKind::Throw))
        .unwrap_or(false)
}

/// Find all exit instructions of a method
pub fn find_exits(cfg: &MethodCfg) -> Vec<usize> {
    (0..cfg.instructions.len())
        .filter(|&idx| is_exit_instruction(cfg, idx))
        .collect()
}

/// Check if the instruction must be the last one of its block
///
/// Calls and throws always terminate a block, as does anything that does
/// not simply fall through to the next instruction.
pub fn ends_block(cfg: &MethodCfg, index: usize) -> bool {
    let inst = match cfg.instructions.get(index) {
        Some(inst) => inst,
        None => return true,
    };
    match inst.kind {
        InstKind::Call | InstKind::Throw | InstKind::Return | InstKind::Branch => true,
        InstKind::Plain => inst.successors.as_slice() != [index + 1],
    }
}
