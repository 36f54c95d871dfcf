//! The control flow graph: basic blocks of IL and pseudo-assembly,
//! block-level and statement-level liveness, and loop depth estimation.

use crate::back::pasm::PasmStatement;
use crate::back::symtab::SymTab;
use crate::common::{Set, SymbolId};
use crate::error::{ErrorCode, Result};
use crate::middle::il::IlStatement;

/// Maximum links out of a block to other blocks: fall-through and jump.
pub const MAX_BLOCK_LINK: usize = 2;

/// Passes the dataflow solver may take before giving up.
pub const MAX_LIVENESS_PASSES: usize = 10;

/// Blocks are formed by partitioning IL statements according to the
/// rules:
///   1. Control always enters at the start of the block
///   2. Control always leaves at the last statement or end of the block
#[derive(Debug, Default)]
pub struct Block {
    /// Labels at the entry of this block.
    labels: Vec<SymbolId>,
    il: Vec<IlStatement>,
    pasm: Vec<PasmStatement>,

    /// Symbols used, defined by this block.
    use_: Set<SymbolId>,
    def: Set<SymbolId>,
    /// Liveness IN[B] (needed entering block) and OUT[B] (needed exiting
    /// block).
    in_: Set<SymbolId>,
    out: Set<SymbolId>,

    /// Loop nesting depth of block, 0 if not nested in any loop.
    depth: u32,

    /// Successor block indices; handles, since the block vector resizes.
    succ: [Option<usize>; MAX_BLOCK_LINK],
}

impl Block {
    pub fn labels(&self) -> &[SymbolId] {
        &self.labels
    }

    pub fn add_label(&mut self, lab: SymbolId) {
        self.labels.push(lab);
    }

    pub fn il(&self) -> &[IlStatement] {
        &self.il
    }

    pub fn push_il(&mut self, stat: IlStatement) {
        self.il.push(stat);
    }

    pub fn pasm(&self) -> &[PasmStatement] {
        &self.pasm
    }

    pub fn pasm_mut(&mut self) -> &mut Vec<PasmStatement> {
        &mut self.pasm
    }

    pub fn push_pasm(&mut self, stat: PasmStatement) {
        self.pasm.push(stat);
    }

    pub fn use_set(&self) -> &Set<SymbolId> {
        &self.use_
    }

    pub fn def_set(&self) -> &Set<SymbolId> {
        &self.def
    }

    pub fn live_in(&self) -> &Set<SymbolId> {
        &self.in_
    }

    pub fn live_out(&self) -> &Set<SymbolId> {
        &self.out
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn succ(&self) -> impl Iterator<Item = usize> + '_ {
        self.succ.iter().flatten().copied()
    }

    fn link(&mut self, target: usize) {
        for slot in self.succ.iter_mut() {
            if slot.is_none() {
                *slot = Some(target);
                return;
            }
        }
        panic!("too many links out of block");
    }
}

/// The control flow graph of one function.
#[derive(Debug, Default)]
pub struct Cfg {
    blocks: Vec<Block>,
}

impl Cfg {
    pub fn new() -> Cfg {
        Cfg::default()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, i: usize) -> &Block {
        &self.blocks[i]
    }

    pub fn block_mut(&mut self, i: usize) -> &mut Block {
        &mut self.blocks[i]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Adds a new, unlinked block; returns its index.
    pub fn new_block(&mut self) -> usize {
        self.blocks.push(Block::default());
        self.blocks.len() - 1
    }

    /// Adds a new block and links the previous tail block to it.
    pub fn link_new_block(&mut self) -> usize {
        let new = self.new_block();
        self.blocks[new - 1].link(new);
        new
    }

    /// Appends an IL statement to the latest block.
    pub fn append_latest(&mut self, stat: IlStatement) {
        let blk = self
            .blocks
            .last_mut()
            .expect("statement outside any block");
        blk.push_il(stat);
    }

    /// Whether the latest block already holds statements.
    pub fn latest_has_il(&self) -> bool {
        self.blocks.last().is_some_and(|b| !b.il.is_empty())
    }

    /// Finds the first block whose entry labels contain the given label.
    pub fn find_labelled(&self, lab: SymbolId) -> Option<usize> {
        self.blocks.iter().position(|b| b.labels.contains(&lab))
    }

    /// Links jump-terminated blocks to their destination blocks.
    pub fn link_jump_dest(&mut self, symtab: &SymTab) -> Result<()> {
        for i in 0..self.blocks.len() {
            let Some(last) = self.blocks[i].il.last() else {
                continue;
            };
            if !last.op.is_jump() {
                continue;
            }
            let lab = last.arg(0);
            match self.find_labelled(lab) {
                Some(target) => self.blocks[i].link(target),
                None => {
                    log::error!(
                        "could not find jump label {}",
                        symtab.get(lab).name()
                    );
                    return Err(ErrorCode::InvalidLabel);
                }
            }
        }
        Ok(())
    }

    /// Computes use/def for each block with a single backward pass over
    /// its pseudo-assembly.
    fn compute_use_def(&mut self, symtab: &SymTab) {
        for blk in &mut self.blocks {
            for i in (0..blk.pasm.len()).rev() {
                // Defined symbols enter def(B) and leave use(B); used
                // symbols then enter use(B)
                if let Some(d) = blk.pasm[i].def() {
                    debug_assert!(symtab.is_var(d), "assigned symbol should be variable");
                    blk.def.insert(d);
                    blk.use_.remove(&d);
                }
                for u in blk.pasm[i].var_uses(symtab) {
                    blk.use_.insert(u);
                }
            }
        }
    }

    /// Depth-first traversal computing IN[B]/OUT[B].
    ///
    /// status per block: 0 = not traversed, 1 = traversed,
    /// 2 = traversed and modified.
    fn liveness_traverse(&mut self, status: &mut [u8], idx: usize) {
        status[idx] = 1;

        for k in 0..MAX_BLOCK_LINK {
            let Some(next) = self.blocks[idx].succ[k] else {
                continue;
            };
            if status[next] == 0 {
                self.liveness_traverse(status, next);
            }

            // OUT[B] = union over successors S of IN[S];
            // IN[B] = use(B) union (OUT[B] - def(B)).
            // use(B) was seeded into IN[B], so only OUT growth can change
            // IN, and OUT growth alone signals modification.
            let in_next: Vec<SymbolId> = self.blocks[next].in_.iter().copied().collect();
            let blk = &mut self.blocks[idx];
            let old_out = blk.out.len();
            for s in in_next {
                blk.out.insert(s);
                if !blk.def.contains(&s) {
                    blk.in_.insert(s);
                }
            }
            if blk.out.len() != old_out {
                status[idx] = 2;
            }
        }
    }

    /// Computes live-variable information for blocks and statements.
    /// Requires pseudo-assembly in blocks.
    pub fn compute_liveness(&mut self, symtab: &SymTab) {
        if self.blocks.is_empty() {
            return;
        }

        self.compute_use_def(symtab);

        // Seed IN[B] with use(B).  This cannot happen while use/def is
        // still being discovered.
        for blk in &mut self.blocks {
            blk.in_.extend(blk.use_.iter().copied());
        }

        // The graph is cyclic, so traverse repeatedly until the sets are
        // stable, bounded to catch divergence
        let mut stable = false;
        for _ in 0..MAX_LIVENESS_PASSES {
            let mut status = vec![0u8; self.blocks.len()];
            self.liveness_traverse(&mut status, 0);
            if status.iter().all(|&s| s != 2) {
                stable = true;
                break;
            }
        }
        if !stable {
            panic!("liveness did not stabilize after {MAX_LIVENESS_PASSES} passes");
        }

        // Liveness before/after each statement, walking each block
        // backwards from OUT[B]
        for blk in &mut self.blocks {
            let mut live = blk.out.clone();
            for stat in blk.pasm.iter_mut().rev() {
                stat.set_live_out(live.clone());
                if let Some(d) = stat.def() {
                    live.remove(&d);
                }
                for u in stat.var_uses(symtab) {
                    live.insert(u);
                }
                stat.set_live_in(live.clone());
            }
        }
    }

    /// Depth-first traversal computing loop nesting depth.
    ///
    /// A cycle is found when the current block is already on the path;
    /// every path block from the re-entered block onward is one level
    /// deeper.  Reaching a fully visited off-path block propagates its
    /// depth backward along the path, stopping at the first fully
    /// visited path block.  This is a deliberate under-approximation.
    fn loop_depth_traverse(&mut self, status: &mut [bool], path: &mut Vec<usize>, idx: usize) {
        if let Some(pos) = path.iter().position(|&b| b == idx) {
            for k in pos..path.len() {
                self.blocks[path[k]].depth += 1;
            }
            status[idx] = true;
            return;
        }

        if status[idx] {
            let depth = self.blocks[idx].depth;
            for &back in path.iter().rev() {
                if status[back] {
                    break;
                }
                if self.blocks[back].depth < depth {
                    self.blocks[back].depth = depth;
                }
            }
            return;
        }

        path.push(idx);
        for k in 0..MAX_BLOCK_LINK {
            if let Some(next) = self.blocks[idx].succ[k] {
                self.loop_depth_traverse(status, path, next);
            }
        }
        path.pop();
        status[idx] = true;
    }

    /// Computes the loop nesting depth for every block.
    pub fn compute_loop_depth(&mut self) {
        if self.blocks.is_empty() {
            return;
        }
        let mut status = vec![false; self.blocks.len()];
        let mut path = Vec::with_capacity(self.blocks.len());
        self.loop_depth_traverse(&mut status, &mut path, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::pasm::{OpFlags, PasmOperand, PasmStatement};
    use crate::back::symtab::ValueCat;
    use crate::back::x86::AsmOp;
    use crate::common::Name;
    use crate::middle::il::{IlOp, IlStatement};
    use crate::middle::types::Type;

    fn tab(vars: &[&str]) -> SymTab {
        let mut tab = SymTab::new();
        for v in vars {
            tab.add(
                Type::parse("i32").unwrap(),
                Name::from(v.to_string()),
                ValueCat::Lvalue,
            )
            .unwrap();
        }
        tab
    }

    fn mov(dst: u32, src: u32) -> PasmStatement {
        PasmStatement::new(
            AsmOp::Mov,
            vec![
                (PasmOperand::Sym(SymbolId(dst)), OpFlags::NONE),
                (PasmOperand::Sym(SymbolId(src)), OpFlags::NONE),
            ],
        )
    }

    #[test]
    fn use_def_kills_across_statements() {
        // x = y; z = x  =>  use {y}, def {x, z}
        let symtab = tab(&["x", "y", "z"]);
        let mut cfg = Cfg::new();
        let b = cfg.new_block();
        cfg.block_mut(b).push_pasm(mov(0, 1));
        cfg.block_mut(b).push_pasm(mov(2, 0));
        cfg.compute_liveness(&symtab);

        let blk = cfg.block(b);
        assert!(blk.use_set().contains(&SymbolId(1)));
        assert!(!blk.use_set().contains(&SymbolId(0)));
        assert!(blk.def_set().contains(&SymbolId(0)));
        assert!(blk.def_set().contains(&SymbolId(2)));
        assert!(blk.def_set().is_disjoint(blk.live_in()));
    }

    #[test]
    fn dataflow_equations_hold() {
        // Diamond: b0 -> b1 -> b3, b0 -> b2 -> b3; b3 uses what b1/b2
        // define and what b0 defines.
        let symtab = tab(&["a", "b", "c"]);
        let mut cfg = Cfg::new();
        let b0 = cfg.new_block();
        let b1 = cfg.new_block();
        let b2 = cfg.new_block();
        let b3 = cfg.new_block();
        cfg.block_mut(b0).link(b1);
        cfg.block_mut(b0).link(b2);
        cfg.block_mut(b1).link(b3);
        cfg.block_mut(b2).link(b3);

        cfg.block_mut(b0).push_pasm(mov(0, 1)); // a = b
        cfg.block_mut(b1).push_pasm(mov(1, 0)); // b = a
        cfg.block_mut(b2).push_pasm(mov(1, 2)); // b = c
        cfg.block_mut(b3).push_pasm(mov(2, 1)); // c = b

        cfg.compute_liveness(&symtab);

        for i in 0..cfg.len() {
            let blk = cfg.block(i);
            // OUT[B] = union of successor INs
            let mut want = Set::new();
            for s in blk.succ() {
                want.extend(cfg.block(s).live_in().iter().copied());
            }
            assert_eq!(blk.live_out(), &want, "OUT mismatch in block {i}");
            // IN[B] = use(B) union (OUT[B] - def(B))
            let mut in_want: Set<SymbolId> = blk.use_set().clone();
            in_want.extend(blk.live_out().difference(blk.def_set()).copied());
            assert_eq!(blk.live_in(), &in_want, "IN mismatch in block {i}");
        }
    }

    #[test]
    fn statement_liveness_equation_holds() {
        let symtab = tab(&["x", "y", "z"]);
        let mut cfg = Cfg::new();
        let b = cfg.new_block();
        cfg.block_mut(b).push_pasm(mov(0, 1));
        cfg.block_mut(b).push_pasm(mov(2, 0));
        cfg.compute_liveness(&symtab);

        for stat in cfg.block(b).pasm() {
            // live_in = (live_out - def) union use
            let mut want = stat.live_out().clone();
            if let Some(d) = stat.def() {
                want.remove(&d);
            }
            want.extend(stat.var_uses(&symtab));
            assert_eq!(stat.live_in(), &want);
        }
    }

    #[test]
    fn liveness_through_a_loop() {
        // b0 -> b1 <-> b1 is a self loop using x, then b2 returns y.
        let symtab = tab(&["x", "y"]);
        let mut cfg = Cfg::new();
        let b0 = cfg.new_block();
        let b1 = cfg.new_block();
        let b2 = cfg.new_block();
        cfg.block_mut(b0).link(b1);
        cfg.block_mut(b1).link(b2);
        cfg.block_mut(b1).link(b1);

        cfg.block_mut(b0).push_pasm(mov(0, 1)); // x = y
        cfg.block_mut(b1).push_pasm(mov(0, 0)); // x = x
        cfg.block_mut(b2).push_pasm(mov(1, 0)); // y = x

        cfg.compute_liveness(&symtab);
        // x must be live around the loop
        assert!(cfg.block(b1).live_in().contains(&SymbolId(0)));
        assert!(cfg.block(b1).live_out().contains(&SymbolId(0)));
        assert!(cfg.block(b0).live_out().contains(&SymbolId(0)));
    }

    #[test]
    fn loop_depth_nesting() {
        // b0 -> b1 -> b2 -> b2 (inner self loop), b2 -> b1 (outer back
        // edge), b1 -> b3 exit.
        let mut cfg = Cfg::new();
        let b0 = cfg.new_block();
        let b1 = cfg.new_block();
        let b2 = cfg.new_block();
        let b3 = cfg.new_block();
        cfg.block_mut(b0).link(b1);
        cfg.block_mut(b1).link(b2);
        cfg.block_mut(b2).link(b2);
        cfg.block_mut(b2).link(b1);
        cfg.block_mut(b1).link(b3);
        cfg.compute_loop_depth();

        assert_eq!(cfg.block(b0).depth(), 0);
        assert!(cfg.block(b2).depth() >= 2, "inner loop at depth 2");
        assert!(cfg.block(b1).depth() >= 1);
        assert_eq!(cfg.block(b3).depth(), 0);
    }

    #[test]
    fn jump_links_resolve_labels() {
        let mut symtab = SymTab::new();
        let lab = symtab
            .add(Type::label(), Name::from("l0".to_string()), ValueCat::NonLvalue)
            .unwrap();
        let mut cfg = Cfg::new();
        let b0 = cfg.new_block();
        cfg.append_latest(IlStatement {
            op: IlOp::Jmp,
            args: vec![lab],
        });
        let b1 = cfg.new_block();
        cfg.block_mut(b1).add_label(lab);

        cfg.link_jump_dest(&symtab).unwrap();
        assert!(cfg.block(b0).succ().any(|s| s == b1));
    }

    #[test]
    fn missing_label_is_an_error() {
        let mut symtab = SymTab::new();
        let lab = symtab
            .add(Type::label(), Name::from("l0".to_string()), ValueCat::NonLvalue)
            .unwrap();
        let mut cfg = Cfg::new();
        cfg.new_block();
        cfg.append_latest(IlStatement {
            op: IlOp::Jmp,
            args: vec![lab],
        });
        assert_eq!(cfg.link_jump_dest(&symtab), Err(ErrorCode::InvalidLabel));
    }
}
