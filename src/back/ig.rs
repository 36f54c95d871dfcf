//! The interference graph: one node per variable symbol, edges between
//! symbols that are live simultaneously.

use crate::back::cfg::Cfg;
use crate::back::symtab::SymTab;
use crate::back::x86::Slot;
use crate::common::SymbolId;

/// Interference graph node.
#[derive(Clone, Debug)]
pub struct IgNode {
    /// Symbols this node represents; grows on coalescing, empty when the
    /// node was merged away.
    syms: Vec<SymbolId>,
    /// Indices of neighboring nodes; handles, since the node vector
    /// resizes.
    neighbors: Vec<usize>,
    /// Performance impact if this variable is not in a register;
    /// lower = less impact.
    spill_cost: u64,
    /// Register preference score per slot.
    reg_pref: [i32; Slot::COUNT],
}

impl IgNode {
    fn new(sym: SymbolId) -> IgNode {
        IgNode {
            syms: vec![sym],
            neighbors: Vec::new(),
            spill_cost: 0,
            reg_pref: [0; Slot::COUNT],
        }
    }

    pub fn syms(&self) -> &[SymbolId] {
        &self.syms
    }

    /// Whether the node was merged into another by coalescing.
    pub fn is_merged(&self) -> bool {
        self.syms.is_empty()
    }

    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }

    pub fn cost(&self) -> u64 {
        self.spill_cost
    }

    pub fn add_cost(&mut self, cost: u64) {
        self.spill_cost += cost;
    }

    pub fn reg_pref(&self, slot: Slot) -> i32 {
        self.reg_pref[slot.index()]
    }

    pub fn inc_reg_pref(&mut self, slot: Slot, score: i32) {
        self.reg_pref[slot.index()] += score;
    }
}

/// The interference graph of one function.
#[derive(Debug, Default)]
pub struct Ig {
    nodes: Vec<IgNode>,
}

impl Ig {
    pub fn new() -> Ig {
        Ig::default()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, i: usize) -> &IgNode {
        &self.nodes[i]
    }

    pub fn node_mut(&mut self, i: usize) -> &mut IgNode {
        &mut self.nodes[i]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &IgNode> {
        self.nodes.iter()
    }

    /// The node currently representing a symbol.
    pub fn node_of(&self, sym: SymbolId) -> usize {
        self.nodes
            .iter()
            .position(|n| n.syms.contains(&sym))
            .unwrap_or_else(|| panic!("no interference graph node for symbol {sym:?}"))
    }

    /// Creates unlinked nodes for every variable in the symbol table.
    /// Requires the symbol table contents to be final.
    pub fn create_nodes(&mut self, symtab: &SymTab) {
        debug_assert!(self.nodes.is_empty(), "interference graph nodes already exist");
        for (id, sym) in symtab.iter() {
            if sym.is_var() {
                self.nodes.push(IgNode::new(id));
            }
        }
    }

    pub fn has_link(&self, a: usize, b: usize) -> bool {
        self.nodes[a].neighbors.contains(&b)
    }

    /// Adds a symmetric edge between two nodes.
    pub fn link(&mut self, a: usize, b: usize) {
        debug_assert_ne!(a, b, "cannot link node to self");
        if !self.nodes[a].neighbors.contains(&b) {
            self.nodes[a].neighbors.push(b);
        }
        if !self.nodes[b].neighbors.contains(&a) {
            self.nodes[b].neighbors.push(a);
        }
    }

    fn unlink_one_way(&mut self, from: usize, to: usize) {
        self.nodes[from].neighbors.retain(|&n| n != to);
    }

    /// Adds edges between every defined symbol and the symbols live
    /// after its definition.  Requires per-statement liveness.
    pub fn compute_edges(&mut self, cfg: &Cfg, symtab: &SymTab) {
        for blk in cfg.blocks() {
            for stat in blk.pasm() {
                let Some(def) = stat.def() else {
                    continue;
                };
                debug_assert!(symtab.is_var(def), "assigned symbol should be variable");
                let node = self.node_of(def);
                for &other in stat.live_out() {
                    if other == def {
                        continue;
                    }
                    let other_node = self.node_of(other);
                    if node != other_node {
                        self.link(node, other_node);
                    }
                }
            }
        }
    }

    /// Merges node `dst` into node `src`: neighbors are unioned (with
    /// back links fixed up), represented symbols move over, and `dst`
    /// is left empty.  The caller guarantees the nodes are not adjacent.
    pub fn merge(&mut self, src: usize, dst: usize) {
        debug_assert!(!self.has_link(src, dst), "cannot merge adjacent nodes");
        let dst_neighbors = std::mem::take(&mut self.nodes[dst].neighbors);
        for n in dst_neighbors {
            self.link(src, n);
            self.unlink_one_way(n, dst);
        }
        let dst_syms = std::mem::take(&mut self.nodes[dst].syms);
        self.nodes[src].syms.extend(dst_syms);
    }
}
