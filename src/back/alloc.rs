//! The register allocator: precoloring, move coalescing, register
//! preference scoring, spill-cost accumulation, and graph coloring.

use crate::back::cfg::Cfg;
use crate::back::ig::Ig;
use crate::back::pasm::{PasmOperand, PasmStatement};
use crate::back::symtab::SymTab;
use crate::back::x86::{AsmOp, Location, Register, Slot, COPY_DST, COPY_SRC, PALETTE};
use crate::common::{Set, SymbolId};

/// Forces symbols whose address is taken onto the stack.
///
/// Must run to completion before coalescing begins, otherwise a symbol
/// that belongs on the stack can first be coalesced with a
/// register-resident one.
pub fn precolor(cfg: &mut Cfg, symtab: &mut SymTab) {
    for i in 0..cfg.len() {
        let mut j = 0;
        while j < cfg.block(i).pasm().len() {
            let stat = &cfg.block(i).pasm()[j];
            if stat.op() == AsmOp::Lea {
                // The addressed operand cannot be a register
                let id = match stat.operand(1) {
                    PasmOperand::Sym(id) => id,
                    other => panic!("lea of non-symbol operand {other:?}"),
                };
                let sym = symtab.get_mut(id);

                // A function parameter arrives in a register; copy it to
                // its new stack home before the address is formed
                if sym.location().is_register() {
                    let reg = sym.register();
                    let mov = PasmStatement::new(
                        AsmOp::Mov,
                        vec![
                            (PasmOperand::Sym(id), Default::default()),
                            (PasmOperand::Reg(reg), Default::default()),
                        ],
                    );
                    cfg.block_mut(i).pasm_mut().insert(j, mov);
                    j += 1;
                    symtab.get_mut(id).set_location(Location::Stack);
                } else {
                    sym.set_location(Location::Stack);
                }
            }
            j += 1;
        }
    }
}

/// Coalesces one copy statement if its source and destination do not
/// interfere, merging the destination node into the source node.
fn coalesce_stat(stat: &PasmStatement, ig: &mut Ig, symtab: &mut SymTab, verbose: bool) {
    if !stat.op().is_copy() {
        return;
    }
    let (PasmOperand::Sym(dst), PasmOperand::Sym(src)) =
        (stat.operand(COPY_DST), stat.operand(COPY_SRC))
    else {
        return;
    };
    // Coalescing a move to self would try to self-link the node
    if src == dst {
        return;
    }
    // Non-variables have no location to share
    if !symtab.is_var(src) {
        return;
    }
    let src_node = ig.node_of(src);
    let dst_node = ig.node_of(dst);
    if ig.has_link(src_node, dst_node) {
        return;
    }

    let src_loc = symtab.get(ig.node(src_node).syms()[0]).location();
    let dst_loc = symtab.get(ig.node(dst_node).syms()[0]).location();
    // Stack symbols keep distinct slots and cannot share
    if src_loc == Location::Stack || dst_loc == Location::Stack {
        return;
    }
    let loc = match (src_loc, dst_loc) {
        (Location::None, other) => other,
        (other, Location::None) => other,
        (a, b) if a == b => a,
        // Precolored to different locations
        _ => return,
    };

    ig.merge(src_node, dst_node);
    for &id in ig.node(src_node).syms() {
        symtab.get_mut(id).set_location(loc);
    }

    if verbose {
        eprintln!(
            "coalesce {} -> {}",
            symtab.get(dst).name(),
            symtab.get(src).name()
        );
    }
}

/// Tracks save/restore windows to score register preferences.
///
/// A `push`/`pop` pair of the same register brackets a window; every
/// symbol live anywhere inside it loses a point of preference for that
/// register, steering the allocator away from assignments that force
/// extra saves.
fn reg_pref_stat(
    blk_stats: &[PasmStatement],
    j: usize,
    push_stack: &mut Vec<usize>,
    ig: &mut Ig,
) {
    let stat = &blk_stats[j];
    if stat.op().is_push() {
        push_stack.push(j);
        return;
    }
    if !stat.op().is_pop() || push_stack.is_empty() {
        return;
    }
    let pushed = *push_stack.last().unwrap();
    // Only save/restore of the same physical register forms a window
    match (blk_stats[pushed].operand(0), stat.operand(0)) {
        (PasmOperand::Reg(a), PasmOperand::Reg(b)) if a == b => {}
        _ => return,
    }
    let reg: Register = match blk_stats[pushed].operand(0) {
        PasmOperand::Reg(r) => r,
        _ => unreachable!(),
    };

    // Union the symbols live from the statement after the push through
    // the pop; the pop is included so definitions on the statement
    // before it are seen
    let mut live: Set<SymbolId> = Set::new();
    for stat in &blk_stats[pushed + 1..=j] {
        live.extend(stat.live_in().iter().copied());
    }
    for id in live {
        let node = ig.node_of(id);
        ig.node_mut(node).inc_reg_pref(reg.slot, -1);
    }
    push_stack.pop();
}

/// Runs the per-statement coalescing and preference passes, in block
/// order.  Save/restore windows are traced per block only, to avoid the
/// complexities of crossing blocks.
pub fn coalesce_and_score(cfg: &Cfg, ig: &mut Ig, symtab: &mut SymTab, verbose: bool) {
    for i in 0..cfg.len() {
        let mut push_stack = Vec::new();
        for j in 0..cfg.block(i).pasm().len() {
            reg_pref_stat(cfg.block(i).pasm(), j, &mut push_stack, ig);
            coalesce_stat(&cfg.block(i).pasm()[j], ig, symtab, verbose);
        }
    }
}

/// Accumulates spill cost: every use of a variable at loop depth d is
/// worth 10^d.
pub fn compute_spill_cost(cfg: &Cfg, ig: &mut Ig, symtab: &SymTab) {
    for blk in cfg.blocks() {
        let weight = 10u64.pow(blk.depth());
        for stat in blk.pasm() {
            for id in stat.var_uses(symtab) {
                let node = ig.node_of(id);
                ig.node_mut(node).add_cost(weight);
            }
        }
    }
}

/// Assigns a register slot to every colorable node, or marks it spilled.
///
/// Nodes are visited from highest spill cost to lowest.  A node with no
/// free slot spills itself: its neighbors were assigned earlier and so
/// carry a higher cost, and colored nodes never give a register back,
/// which keeps spill decisions final for the function.
pub fn color(ig: &Ig, symtab: &mut SymTab) {
    let mut order: Vec<usize> = (0..ig.len()).collect();
    order.sort_by_key(|&i| ig.node(i).cost());

    for &i in order.iter().rev() {
        let node = ig.node(i);
        if node.is_merged() {
            continue;
        }
        // Precolored nodes keep their location; every symbol of a node
        // shares one location, so the first is enough to inspect
        if symtab.get(node.syms()[0]).location() != Location::None {
            continue;
        }

        let mut used = [false; PALETTE.len()];
        for &n in node.neighbors() {
            let neighbor = ig.node(n);
            debug_assert!(!neighbor.is_merged(), "neighbor node has no symbols");
            if let Location::Slot(slot) = symtab.get(neighbor.syms()[0]).location() {
                if let Some(k) = PALETTE.iter().position(|&p| p == slot) {
                    used[k] = true;
                }
            }
        }

        // Free slot with the highest preference score; ties go to the
        // lowest slot index
        let mut best: Option<(Slot, i32)> = None;
        for (k, &slot) in PALETTE.iter().enumerate() {
            if used[k] {
                continue;
            }
            let score = node.reg_pref(slot);
            match best {
                None => best = Some((slot, score)),
                Some((_, top)) if score > top => best = Some((slot, score)),
                _ => {}
            }
        }

        let loc = match best {
            Some((slot, _)) => Location::Slot(slot),
            None => Location::Stack,
        };
        for &id in node.syms() {
            symtab.get_mut(id).set_location(loc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::pasm::OpFlags;
    use crate::back::symtab::ValueCat;
    use crate::back::x86::Slot;
    use crate::common::Name;
    use crate::middle::types::Type;

    fn tab(n: usize) -> SymTab {
        let mut tab = SymTab::new();
        for i in 0..n {
            tab.add(
                Type::parse("i32").unwrap(),
                Name::from(format!("v{i}")),
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

    fn fresh_ig(symtab: &SymTab) -> Ig {
        let mut ig = Ig::new();
        ig.create_nodes(symtab);
        ig
    }

    #[test]
    fn coalesce_merges_disjoint_lifetimes() {
        let mut symtab = tab(2);
        let mut ig = fresh_ig(&symtab);
        let stat = mov(0, 1);
        coalesce_stat(&stat, &mut ig, &mut symtab, false);
        assert_eq!(ig.node_of(SymbolId(0)), ig.node_of(SymbolId(1)));
    }

    #[test]
    fn coalesce_refuses_interfering_nodes() {
        let mut symtab = tab(2);
        let mut ig = fresh_ig(&symtab);
        ig.link(0, 1);
        let stat = mov(0, 1);
        coalesce_stat(&stat, &mut ig, &mut symtab, false);
        assert_ne!(ig.node_of(SymbolId(0)), ig.node_of(SymbolId(1)));
    }

    #[test]
    fn coalesce_refuses_conflicting_precolors() {
        let mut symtab = tab(2);
        symtab
            .get_mut(SymbolId(0))
            .set_location(Location::Slot(Slot::A));
        symtab
            .get_mut(SymbolId(1))
            .set_location(Location::Slot(Slot::B));
        let mut ig = fresh_ig(&symtab);
        coalesce_stat(&mov(0, 1), &mut ig, &mut symtab, false);
        assert_ne!(ig.node_of(SymbolId(0)), ig.node_of(SymbolId(1)));
    }

    #[test]
    fn coalesce_adopts_concrete_location() {
        let mut symtab = tab(2);
        symtab
            .get_mut(SymbolId(1))
            .set_location(Location::Slot(Slot::Di));
        let mut ig = fresh_ig(&symtab);
        coalesce_stat(&mov(0, 1), &mut ig, &mut symtab, false);
        assert_eq!(
            symtab.get(SymbolId(0)).location(),
            Location::Slot(Slot::Di)
        );
    }

    #[test]
    fn coalesce_skips_stack_residents() {
        let mut symtab = tab(2);
        symtab.get_mut(SymbolId(1)).set_location(Location::Stack);
        let mut ig = fresh_ig(&symtab);
        coalesce_stat(&mov(0, 1), &mut ig, &mut symtab, false);
        assert_ne!(ig.node_of(SymbolId(0)), ig.node_of(SymbolId(1)));
    }

    #[test]
    fn color_respects_neighbors() {
        let mut symtab = tab(3);
        let mut ig = fresh_ig(&symtab);
        ig.link(0, 1);
        ig.link(0, 2);
        ig.link(1, 2);
        color(&ig, &mut symtab);

        let locs: Vec<Location> = (0..3)
            .map(|i| symtab.get(SymbolId(i)).location())
            .collect();
        for loc in &locs {
            assert!(loc.is_register());
        }
        assert_ne!(locs[0], locs[1]);
        assert_ne!(locs[0], locs[2]);
        assert_ne!(locs[1], locs[2]);
    }

    #[test]
    fn clique_larger_than_palette_spills() {
        let n = PALETTE.len() + 3;
        let mut symtab = tab(n);
        let mut ig = fresh_ig(&symtab);
        for a in 0..n {
            for b in a + 1..n {
                ig.link(a, b);
            }
        }
        color(&ig, &mut symtab);

        let spilled = (0..n)
            .filter(|&i| symtab.get(SymbolId(i as u32)).location() == Location::Stack)
            .count();
        assert_eq!(spilled, 3);
        // And no two register residents share a slot
        for a in 0..n {
            for b in a + 1..n {
                let la = symtab.get(SymbolId(a as u32)).location();
                let lb = symtab.get(SymbolId(b as u32)).location();
                if la.is_register() {
                    assert_ne!(la, lb);
                }
            }
        }
    }

    #[test]
    fn lowest_cost_node_spills() {
        let n = PALETTE.len() + 1;
        let mut symtab = tab(n);
        let mut ig = fresh_ig(&symtab);
        for a in 0..n {
            for b in a + 1..n {
                ig.link(a, b);
            }
        }
        // Node 3 is the cheapest; everyone else is hot
        for i in 0..n {
            ig.node_mut(i).add_cost(if i == 3 { 1 } else { 100 });
        }
        color(&ig, &mut symtab);
        assert_eq!(symtab.get(SymbolId(3)).location(), Location::Stack);
    }

    #[test]
    fn preference_breaks_ties() {
        let mut symtab = tab(1);
        let mut ig = fresh_ig(&symtab);
        ig.node_mut(0).inc_reg_pref(Slot::A, -1);
        ig.node_mut(0).inc_reg_pref(Slot::B, -1);
        color(&ig, &mut symtab);
        // a and b are penalized, c is the first clean slot
        assert_eq!(
            symtab.get(SymbolId(0)).location(),
            Location::Slot(Slot::C)
        );
    }

    #[test]
    fn precolor_forces_lea_operand_to_stack() {
        let mut symtab = tab(2);
        let mut cfg = Cfg::new();
        let b = cfg.new_block();
        cfg.block_mut(b).push_pasm(PasmStatement::new(
            AsmOp::Lea,
            vec![
                (PasmOperand::Sym(SymbolId(0)), OpFlags::NONE),
                (PasmOperand::Sym(SymbolId(1)), OpFlags::NONE),
            ],
        ));
        precolor(&mut cfg, &mut symtab);
        assert_eq!(symtab.get(SymbolId(1)).location(), Location::Stack);
        assert_eq!(cfg.block(b).pasm().len(), 1);
    }

    #[test]
    fn precolor_copies_parameter_out_of_register() {
        let mut symtab = tab(2);
        symtab
            .get_mut(SymbolId(1))
            .set_location(Location::Slot(Slot::Di));
        let mut cfg = Cfg::new();
        let b = cfg.new_block();
        cfg.block_mut(b).push_pasm(PasmStatement::new(
            AsmOp::Lea,
            vec![
                (PasmOperand::Sym(SymbolId(0)), OpFlags::NONE),
                (PasmOperand::Sym(SymbolId(1)), OpFlags::NONE),
            ],
        ));
        precolor(&mut cfg, &mut symtab);

        assert_eq!(symtab.get(SymbolId(1)).location(), Location::Stack);
        let stats = cfg.block(b).pasm();
        assert_eq!(stats.len(), 2);
        // mov %sym, <param-reg> lands before the lea
        assert_eq!(stats[0].op(), AsmOp::Mov);
        assert_eq!(stats[0].operand(0), PasmOperand::Sym(SymbolId(1)));
        assert_eq!(
            stats[0].operand(1),
            PasmOperand::Reg(Register::new(Slot::Di, 4))
        );
        assert_eq!(stats[1].op(), AsmOp::Lea);
    }
}
