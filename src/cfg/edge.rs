//! Edge kind classification for block graph edges

use serde::{Deserialize, Serialize};

/// Relation a block graph edge belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Intra-procedural control flow
    Successor,
    /// Call block to the callee's entry block
    Call,
    /// Callee exit block to the call's return site
    Return,
    /// Throwing block to the handler block catching it
    Catch,
}

impl EdgeKind {
    /// Type code used by the model and the oracle protocol
    ///
    /// Catch edges are not part of the exchanged game and have no code.
    pub fn type_code(&self) -> Option<i64> {
        match self {
            EdgeKind::Successor => Some(0),
            EdgeKind::Call => Some(1),
            EdgeKind::Return => Some(2),
            EdgeKind::Catch => None,
        }
    }

    /// Kinds exchanged with predictors, in encoding order
    pub const GAME_KINDS: [EdgeKind; 3] = [EdgeKind::Successor, EdgeKind::Call, EdgeKind::Return];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes() {
        assert_eq!(EdgeKind::Successor.type_code(), Some(0));
        assert_eq!(EdgeKind::Call.type_code(), Some(1));
        assert_eq!(EdgeKind::Return.type_code(), Some(2));
        assert_eq!(EdgeKind::Catch.type_code(), None);
    }

    #[test]
    fn test_game_kinds_are_coded() {
        for kind in EdgeKind::GAME_KINDS {
            assert!(kind.type_code().is_some());
        }
    }
}
