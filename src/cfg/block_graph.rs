//! Incrementally built inter-procedural block graph
//!
//! Blocks are created the first time a method is registered and are never
//! removed. Intra-procedural successor edges and catch edges are derived once,
//! when the method's blocks are cut. Call and return edges are added lazily,
//! only for calls the interpreter actually resolves, so the graph reflects
//! observed calls rather than every statically possible one.
//!
//! # Examples
//!
//! ```
//! use guided_search::cfg::{BlockGraph, InMemoryLoader, MethodCfg, MethodId, RawInst};
//! use guided_search::state::{InstRef, Statement};
//!
//! # fn main() -> guided_search::Result<()> {
//! let main = MethodCfg::new(MethodId(0), "main", vec![RawInst::call(1), RawInst::ret()]);
//! let helper = MethodCfg::new(MethodId(1), "helper", vec![RawInst::ret()]);
//! let loader = InMemoryLoader::new().with_method(main).with_method(helper);
//!
//! let mut graph = BlockGraph::new(loader);
//! graph.add_method(MethodId(0))?;
//! graph.add_call(
//!     &Statement::Inst(InstRef::new(MethodId(0), 0)),
//!     &Statement::Inst(InstRef::new(MethodId(0), 1)),
//!     &Statement::Inst(InstRef::new(MethodId(1), 0)),
//! )?;
//!
//! assert_eq!(graph.callees(0), vec![2]);
//! # Ok(())
//! # }
//! ```

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::rc::Rc;
use tracing::{debug, trace};

use crate::cfg::analysis::find_exits;
use crate::cfg::split::split_blocks;
use crate::cfg::{BasicBlock, BlockId, CfgLoader, EdgeKind, InstKind, MethodCfg, MethodId};
use crate::error::{Result, SchedulerError};
use crate::state::{InstRef, Statement};

/// Block graph shared between the interpreter and the selectors
pub type SharedBlockGraph = Rc<RefCell<BlockGraph>>;

/// Blocks of one registered method
#[derive(Debug, Clone)]
struct MethodBlocks {
    name: String,
    /// Sorted by start instruction index
    blocks: Vec<BlockId>,
    exits: Vec<BlockId>,
}

/// Basic blocks of every discovered method plus the relations between them
pub struct BlockGraph {
    graph: DiGraph<BasicBlock, EdgeKind>,
    methods: HashMap<MethodId, MethodBlocks>,
    zone: HashSet<MethodId>,
    loader: Box<dyn CfgLoader>,
}

impl fmt::Debug for BlockGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockGraph")
            .field("blocks", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("methods", &self.methods.len())
            .finish()
    }
}

impl BlockGraph {
    pub fn new(loader: impl CfgLoader + 'static) -> Self {
        Self {
            graph: DiGraph::new(),
            methods: HashMap::new(),
            zone: HashSet::new(),
            loader: Box::new(loader),
        }
    }

    /// Wrap the graph for sharing with selectors
    pub fn into_shared(self) -> SharedBlockGraph {
        Rc::new(RefCell::new(self))
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Register a method, cutting its CFG into blocks
    ///
    /// Idempotent: a method already registered is left untouched.
    pub fn add_method(&mut self, method: MethodId) -> Result<()> {
        if self.methods.contains_key(&method) {
            return Ok(());
        }

        let cfg = self
            .loader
            .load(method)
            .map_err(|source| SchedulerError::Load { method, source })?
            .ok_or(SchedulerError::UnknownMethod { method })?;

        self.insert_method(&cfg);
        Ok(())
    }

    /// Register a method from a CFG the caller already holds
    ///
    /// Idempotent like [`BlockGraph::add_method`].
    pub fn register_method(&mut self, cfg: &MethodCfg) {
        if !self.methods.contains_key(&cfg.method) {
            self.insert_method(cfg);
        }
    }

    fn insert_method(&mut self, cfg: &MethodCfg) {
        let in_zone = self.zone.contains(&cfg.method);
        let ranges = split_blocks(cfg);

        let mut blocks = Vec::with_capacity(ranges.len());
        for range in &ranges {
            let last = &cfg.instructions[range.end];
            let id = self.graph.node_count();
            self.graph.add_node(BasicBlock {
                id,
                method: cfg.method,
                start: range.start,
                end: range.end,
                in_coverage_zone: in_zone,
                covered_by_test: false,
                visited_by_state: false,
                touched_by_state: false,
                contains_call: last.kind == InstKind::Call,
                contains_throw: last.kind == InstKind::Throw,
                states: Default::default(),
            });
            blocks.push(id);
        }

        // Successor and catch edges never change after this point
        for &id in &blocks {
            let block = &self.graph[NodeIndex::new(id)];
            let (start, end) = (block.start, block.end);

            for &target in &cfg.instructions[end].successors {
                if let Some(to) = self.lookup(&blocks, target) {
                    self.link(id, to, EdgeKind::Successor);
                }
            }

            for inst in &cfg.instructions[start..=end] {
                for &handler in &inst.catchers {
                    if let Some(to) = self.lookup(&blocks, handler) {
                        self.link(id, to, EdgeKind::Catch);
                    }
                }
            }
        }

        let exits: Vec<BlockId> = find_exits(cfg)
            .into_iter()
            .filter_map(|idx| self.lookup(&blocks, idx))
            .collect();

        debug!(
            method = %cfg.method,
            name = %cfg.name,
            blocks = blocks.len(),
            exits = exits.len(),
            "registered method"
        );

        self.methods.insert(
            cfg.method,
            MethodBlocks {
                name: cfg.name.clone(),
                blocks,
                exits,
            },
        );
    }

    /// Record a call resolved by the interpreter
    ///
    /// Registers the callee first, then links the call block to the callee's
    /// entry block and every callee exit block to the return site's block.
    /// The caller's method must already be registered.
    pub fn add_call(
        &mut self,
        call_site: &Statement,
        return_site: &Statement,
        entry_point: &Statement,
    ) -> Result<()> {
        let callee = entry_point.original().method;
        self.add_method(callee)?;

        let call_block = self.block_of(call_site)?;
        let entry_block = self.block_of(entry_point)?;
        let return_block = self.block_of(return_site)?;

        self.link(call_block, entry_block, EdgeKind::Call);

        let exits = self
            .methods
            .get(&callee)
            .map(|m| m.exits.clone())
            .unwrap_or_default();
        for exit in exits {
            self.link(exit, return_block, EdgeKind::Return);
        }

        trace!(
            call_block,
            entry_block,
            return_block,
            callee = %callee,
            "linked call"
        );
        Ok(())
    }

    /// Add an edge unless an edge of the same kind already connects the blocks
    fn link(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) -> bool {
        let (a, b) = (NodeIndex::new(from), NodeIndex::new(to));
        if self.graph.edges_connecting(a, b).any(|e| *e.weight() == kind) {
            return false;
        }
        self.graph.add_edge(a, b, kind);
        true
    }

    /// Binary search a sorted block list for the block owning `index`
    fn lookup(&self, blocks: &[BlockId], index: usize) -> Option<BlockId> {
        let pos = blocks.partition_point(|&id| self.graph[NodeIndex::new(id)].start <= index);
        let candidate = *blocks.get(pos.checked_sub(1)?)?;
        if self.graph[NodeIndex::new(candidate)].contains(index) {
            Some(candidate)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Find the block owning a statement
    ///
    /// Synthetic statements are mapped back to their original instruction.
    /// Fails with [`SchedulerError::NotFound`] when the instruction lies
    /// outside every registered method.
    pub fn block_of(&self, stmt: &Statement) -> Result<BlockId> {
        let inst = stmt.original();
        self.methods
            .get(&inst.method)
            .and_then(|m| self.lookup(&m.blocks, inst.index))
            .ok_or(SchedulerError::NotFound { inst })
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.graph.node_weight(NodeIndex::new(id))
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.graph.node_weight_mut(NodeIndex::new(id))
    }

    /// All blocks, in id order
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.graph.node_weights()
    }

    pub fn block_ids(&self) -> Range<BlockId> {
        0..self.graph.node_count()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Blocks created since `watermark`; advances the watermark
    ///
    /// Block ids are dense and monotonic, so each consumer keeps its own
    /// watermark and several selectors can share one graph.
    pub fn drain_new_blocks(&self, watermark: &mut usize) -> Range<BlockId> {
        let end = self.graph.node_count();
        let start = (*watermark).min(end);
        *watermark = end;
        start..end
    }

    pub fn contains_method(&self, method: MethodId) -> bool {
        self.methods.contains_key(&method)
    }

    pub fn method_name(&self, method: MethodId) -> Option<&str> {
        self.methods.get(&method).map(|m| m.name.as_str())
    }

    /// Blocks of a method sorted by start index
    pub fn method_blocks(&self, method: MethodId) -> &[BlockId] {
        self.methods
            .get(&method)
            .map(|m| m.blocks.as_slice())
            .unwrap_or(&[])
    }

    pub fn entry_of(&self, method: MethodId) -> Option<BlockId> {
        self.method_blocks(method).first().copied()
    }

    pub fn exits_of(&self, method: MethodId) -> &[BlockId] {
        self.methods
            .get(&method)
            .map(|m| m.exits.as_slice())
            .unwrap_or(&[])
    }

    /// Instructions of a block, in order
    pub fn statements_of(&self, id: BlockId) -> Vec<InstRef> {
        self.block(id)
            .map(|b| (b.start..=b.end).map(|idx| InstRef::new(b.method, idx)).collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------

    fn neighbors(&self, id: BlockId, kind: EdgeKind, direction: Direction) -> Vec<BlockId> {
        if id >= self.graph.node_count() {
            return vec![];
        }
        let mut out: Vec<BlockId> = self
            .graph
            .edges_directed(NodeIndex::new(id), direction)
            .filter(|e| *e.weight() == kind)
            .map(|e| match direction {
                Direction::Outgoing => e.target().index(),
                Direction::Incoming => e.source().index(),
            })
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Intra-procedural successors
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.neighbors(id, EdgeKind::Successor, Direction::Outgoing)
    }

    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.neighbors(id, EdgeKind::Successor, Direction::Incoming)
    }

    /// Entry blocks of methods observed being called from this block
    pub fn callees(&self, id: BlockId) -> Vec<BlockId> {
        self.neighbors(id, EdgeKind::Call, Direction::Outgoing)
    }

    /// Call blocks observed calling the method this entry block starts
    pub fn callers(&self, id: BlockId) -> Vec<BlockId> {
        self.neighbors(id, EdgeKind::Call, Direction::Incoming)
    }

    /// Return sites this exit block returns to
    pub fn return_of(&self, id: BlockId) -> Vec<BlockId> {
        self.neighbors(id, EdgeKind::Return, Direction::Outgoing)
    }

    /// Handler blocks catching exceptions raised in this block
    pub fn catchers(&self, id: BlockId) -> Vec<BlockId> {
        self.neighbors(id, EdgeKind::Catch, Direction::Outgoing)
    }

    /// Blocks whose exceptions this handler block catches
    pub fn throwers(&self, id: BlockId) -> Vec<BlockId> {
        self.neighbors(id, EdgeKind::Catch, Direction::Incoming)
    }

    /// Neighbors by relation kind
    pub fn related(&self, id: BlockId, kind: EdgeKind) -> Vec<BlockId> {
        self.neighbors(id, kind, Direction::Outgoing)
    }

    // ------------------------------------------------------------------
    // Coverage flags
    // ------------------------------------------------------------------

    /// Put every block of `method` into the coverage zone
    ///
    /// Applies to blocks registered later for the same method too.
    pub fn set_coverage_zone(&mut self, method: MethodId) {
        self.zone.insert(method);
        for id in self.method_blocks(method).to_vec() {
            if let Some(block) = self.block_mut(id) {
                block.in_coverage_zone = true;
            }
        }
    }

    pub fn clear_coverage_zone(&mut self) {
        self.zone.clear();
        for block in self.graph.node_weights_mut() {
            block.in_coverage_zone = false;
        }
    }

    pub fn mark_covered_by_test(&mut self, id: BlockId) {
        if let Some(block) = self.block_mut(id) {
            block.covered_by_test = true;
        }
    }

    pub fn reset_coverage(&mut self) {
        for block in self.graph.node_weights_mut() {
            block.covered_by_test = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{InMemoryLoader, RawInst};

    const MAIN: MethodId = MethodId(0);
    const CALLEE: MethodId = MethodId(1);

    fn at(method: MethodId, index: usize) -> Statement {
        Statement::Inst(InstRef::new(method, index))
    }

    /// main: 0 plain, 1 call, 2 plain, 3 return  -> blocks [0..1] [2..3]
    /// callee: 0 branch(1,2), 1 return, 2 throw  -> blocks [0] [1] [2]
    fn create_test_graph() -> BlockGraph {
        let main = MethodCfg::new(
            MAIN,
            "main",
            vec![
                RawInst::plain(1),
                RawInst::call(2),
                RawInst::plain(3),
                RawInst::ret(),
            ],
        );
        let callee = MethodCfg::new(
            CALLEE,
            "callee",
            vec![RawInst::branch(vec![1, 2]), RawInst::ret(), RawInst::throw()],
        );
        BlockGraph::new(InMemoryLoader::new().with_method(main).with_method(callee))
    }

    #[test]
    fn test_add_method_is_idempotent() {
        let mut graph = create_test_graph();
        graph.add_method(MAIN).unwrap();
        let count = graph.len();
        graph.add_method(MAIN).unwrap();
        assert_eq!(graph.len(), count);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_unknown_method() {
        let mut graph = create_test_graph();
        let err = graph.add_method(MethodId(9)).unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownMethod { method } if method == MethodId(9)));
    }

    #[test]
    fn test_loader_failure_is_reported() {
        let loader = |_m: MethodId| -> anyhow::Result<Option<MethodCfg>> {
            anyhow::bail!("broken jar")
        };
        let mut graph = BlockGraph::new(loader);
        let err = graph.add_method(MAIN).unwrap_err();
        assert!(matches!(err, SchedulerError::Load { .. }));
    }

    #[test]
    fn test_block_of_every_instruction() {
        let mut graph = create_test_graph();
        graph.add_method(MAIN).unwrap();

        assert_eq!(graph.block_of(&at(MAIN, 0)).unwrap(), 0);
        assert_eq!(graph.block_of(&at(MAIN, 1)).unwrap(), 0);
        assert_eq!(graph.block_of(&at(MAIN, 2)).unwrap(), 1);
        assert_eq!(graph.block_of(&at(MAIN, 3)).unwrap(), 1);
    }

    #[test]
    fn test_block_of_synthetic_statement() {
        let mut graph = create_test_graph();
        graph.add_method(MAIN).unwrap();
        let stmt = Statement::MethodEntry {
            entry: InstRef::new(MAIN, 0),
        };
        assert_eq!(graph.block_of(&stmt).unwrap(), 0);
    }

    #[test]
    fn test_block_of_outside_registered_methods() {
        let mut graph = create_test_graph();
        graph.add_method(MAIN).unwrap();

        let err = graph.block_of(&at(CALLEE, 0)).unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound { .. }));
        let err = graph.block_of(&at(MAIN, 4)).unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound { .. }));
    }

    #[test]
    fn test_call_block_flags() {
        let mut graph = create_test_graph();
        graph.add_method(MAIN).unwrap();
        graph.add_method(CALLEE).unwrap();

        assert!(graph.block(0).unwrap().contains_call);
        assert!(!graph.block(1).unwrap().contains_call);
        assert!(graph.block(4).unwrap().contains_throw);
        assert_eq!(graph.block(0).unwrap().size(), 2);
    }

    #[test]
    fn test_successors_and_predecessors() {
        let mut graph = create_test_graph();
        graph.add_method(CALLEE).unwrap();

        assert_eq!(graph.successors(0), vec![1, 2]);
        assert_eq!(graph.predecessors(1), vec![0]);
        assert!(graph.successors(1).is_empty());
        assert!(graph.successors(99).is_empty());
    }

    #[test]
    fn test_add_call_links_entry_and_exits() {
        let mut graph = create_test_graph();
        graph.add_method(MAIN).unwrap();
        graph
            .add_call(&at(MAIN, 1), &at(MAIN, 2), &at(CALLEE, 0))
            .unwrap();

        assert!(graph.contains_method(CALLEE));
        assert_eq!(graph.callees(0), vec![2]);
        assert_eq!(graph.callers(2), vec![0]);
        // Both the return and the throw exit go back to the return site
        assert_eq!(graph.return_of(3), vec![1]);
        assert_eq!(graph.return_of(4), vec![1]);
    }

    #[test]
    fn test_add_call_twice_does_not_duplicate_edges() {
        let mut graph = create_test_graph();
        graph.add_method(MAIN).unwrap();
        for _ in 0..2 {
            graph
                .add_call(&at(MAIN, 1), &at(MAIN, 2), &at(CALLEE, 0))
                .unwrap();
        }
        assert_eq!(graph.graph.edges_connecting(NodeIndex::new(0), NodeIndex::new(2)).count(), 1);
    }

    #[test]
    fn test_catch_edges() {
        let cfg = MethodCfg::new(
            MAIN,
            "guarded",
            vec![
                RawInst::plain(1).with_catchers(vec![3]),
                RawInst::plain(2),
                RawInst::ret(),
                RawInst::ret(),
            ],
        );
        let mut graph = BlockGraph::new(InMemoryLoader::new());
        graph.register_method(&cfg);

        let thrower = graph.block_of(&at(MAIN, 0)).unwrap();
        let handler = graph.block_of(&at(MAIN, 3)).unwrap();
        assert_eq!(graph.catchers(thrower), vec![handler]);
        assert_eq!(graph.throwers(handler), vec![thrower]);
    }

    #[test]
    fn test_drain_new_blocks() {
        let mut graph = create_test_graph();
        let mut watermark = 0;

        graph.add_method(MAIN).unwrap();
        assert_eq!(graph.drain_new_blocks(&mut watermark), 0..2);
        assert_eq!(graph.drain_new_blocks(&mut watermark), 2..2);

        graph.add_method(CALLEE).unwrap();
        assert_eq!(graph.drain_new_blocks(&mut watermark), 2..5);
    }

    #[test]
    fn test_coverage_zone_applies_to_later_blocks() {
        let mut graph = create_test_graph();
        graph.set_coverage_zone(CALLEE);
        graph.add_method(MAIN).unwrap();
        graph.add_method(CALLEE).unwrap();

        assert!(!graph.block(0).unwrap().in_coverage_zone);
        assert!(graph.block(2).unwrap().in_coverage_zone);

        graph.clear_coverage_zone();
        assert!(!graph.block(2).unwrap().in_coverage_zone);
    }

    #[test]
    fn test_covered_by_test_reset() {
        let mut graph = create_test_graph();
        graph.add_method(MAIN).unwrap();
        graph.mark_covered_by_test(1);
        assert!(graph.block(1).unwrap().covered_by_test);
        graph.reset_coverage();
        assert!(!graph.block(1).unwrap().covered_by_test);
    }

    #[test]
    fn test_statements_of() {
        let mut graph = create_test_graph();
        graph.add_method(MAIN).unwrap();
        assert_eq!(
            graph.statements_of(1),
            vec![InstRef::new(MAIN, 2), InstRef::new(MAIN, 3)]
        );
        assert!(graph.statements_of(42).is_empty());
    }

    #[test]
    fn test_entry_and_exits_of() {
        let mut graph = create_test_graph();
        graph.add_method(CALLEE).unwrap();
        assert_eq!(graph.entry_of(CALLEE), Some(0));
        assert_eq!(graph.exits_of(CALLEE), &[1, 2]);
        assert_eq!(graph.method_name(CALLEE), Some("callee"));
        assert!(graph.exits_of(MAIN).is_empty());
    }
}
