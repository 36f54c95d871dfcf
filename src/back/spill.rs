//! Spill code: reloads stack-resident operands through temporary
//! registers where the instruction's addressing modes demand a register.

use crate::back::cfg::Cfg;
use crate::back::pasm::{OpFlags, PasmOperand, PasmStatement, RegOrSym};
use crate::back::symtab::SymTab;
use crate::back::x86::{AsmOp, Location, OpClass, Register, MAX_ASM_OP, PALETTE};

/// A reload requirement found while scoring an addressing mode.
#[derive(Clone, Copy, Debug)]
enum Reload {
    /// The whole operand must move into a register.
    Operand(usize),
    /// Only the index component of a memory operand must.
    OffsetIndex(usize),
}

/// Scores one addressing mode; returns the reloads it would need, or
/// None if the mode cannot encode the statement at all.
fn score_mode(
    stat: &PasmStatement,
    mode: &[OpClass],
    symtab: &SymTab,
) -> Option<Vec<Reload>> {
    let mut reloads = Vec::new();
    for l in 0..stat.op_count() {
        match stat.operand(l) {
            // An explicitly specified register is assumed to form a
            // valid addressing mode
            PasmOperand::Reg(_) => {}
            PasmOperand::Sym(id) => {
                let cls = mode[l];
                match symtab.get(id).location() {
                    Location::Stack => {
                        if !cls.contains(OpClass::M) {
                            // The reload target is a register
                            if !cls.contains(OpClass::R) {
                                return None;
                            }
                            reloads.push(Reload::Operand(l));
                        }
                    }
                    Location::Constant => {
                        if !cls.contains(OpClass::I) {
                            return None;
                        }
                    }
                    Location::Slot(_) => {
                        if !cls.contains(OpClass::R) {
                            return None;
                        }
                    }
                    // Labels and other storage-free symbols
                    Location::None => {}
                }
            }
            PasmOperand::Offset { base, index } => {
                debug_assert_eq!(
                    symtab.get(base).location(),
                    Location::Stack,
                    "memory operand base must live on the stack"
                );
                if !mode[l].contains(OpClass::M) {
                    return None;
                }
                // The index participates in the address and must be a
                // register or constant
                if let RegOrSym::Sym(id) = index {
                    if symtab.get(id).location() == Location::Stack {
                        reloads.push(Reload::OffsetIndex(l));
                    }
                }
            }
        }
    }
    Some(reloads)
}

/// Materializes loads and stores around every use of a stack-resident
/// operand that the chosen addressing mode cannot take from memory.
///
/// A reloaded use becomes `push t; mov t, sym; <stmt>; pop t`; a
/// reloaded definition stores back before the pop.
pub fn insert_spill_code(cfg: &mut Cfg, symtab: &SymTab) {
    for i in 0..cfg.len() {
        let mut j = 0;
        while j < cfg.block(i).pasm().len() {
            let stat = &cfg.block(i).pasm()[j];

            // Pick the addressing mode needing the fewest reloads
            let mut best: Option<Vec<Reload>> = None;
            for mode in stat.op().modes() {
                if let Some(reloads) = score_mode(stat, mode, symtab) {
                    let better = match &best {
                        None => true,
                        Some(b) => reloads.len() < b.len(),
                    };
                    if better {
                        best = Some(reloads);
                    }
                }
            }
            let reloads = best.unwrap_or_else(|| {
                panic!("no addressing mode fits {:?}", stat.op())
            });
            debug_assert!(reloads.len() <= MAX_ASM_OP);

            let def = stat.def();
            let mut pool = PALETTE.iter();
            // Index of the statement once spill code is in place
            let mut j_stat = j;

            for reload in reloads {
                let (l, id) = match reload {
                    Reload::Operand(l) => match cfg.block(i).pasm()[j_stat].operand(l) {
                        PasmOperand::Sym(id) => (l, id),
                        other => unreachable!("reload of {other:?}"),
                    },
                    Reload::OffsetIndex(l) => match cfg.block(i).pasm()[j_stat].operand(l) {
                        PasmOperand::Offset {
                            index: RegOrSym::Sym(id),
                            ..
                        } => (l, id),
                        other => unreachable!("reload of {other:?}"),
                    },
                };
                let slot = *pool
                    .next()
                    .unwrap_or_else(|| panic!("out of registers for spill code"));
                let bytes = symtab.get(id).bytes() as u8;
                let temp = Register::new(slot, bytes);

                // Rewrite the operand to the reloaded register
                let is_def = def == Some(id);
                {
                    let stat = &mut cfg.block_mut(i).pasm_mut()[j_stat];
                    match reload {
                        Reload::Operand(_) => stat.set_operand(l, PasmOperand::Reg(temp)),
                        Reload::OffsetIndex(_) => {
                            if let PasmOperand::Offset { base, .. } = stat.operand(l) {
                                stat.set_operand(
                                    l,
                                    PasmOperand::Offset {
                                        base,
                                        index: RegOrSym::Reg(temp),
                                    },
                                );
                            }
                        }
                    }
                }

                // x64 pushes the full 8 byte register
                let push = one_op(AsmOp::Push, PasmOperand::Reg(temp.resize(8)));
                let pop = one_op(AsmOp::Pop, PasmOperand::Reg(temp.resize(8)));
                let load = two_op(
                    AsmOp::Mov,
                    PasmOperand::Reg(temp),
                    PasmOperand::Sym(id),
                );

                let pasm = cfg.block_mut(i).pasm_mut();
                if is_def {
                    let save = two_op(
                        AsmOp::Mov,
                        PasmOperand::Sym(id),
                        PasmOperand::Reg(temp),
                    );
                    pasm.insert(j_stat + 1, pop);
                    pasm.insert(j_stat + 1, save);
                    pasm.insert(j_stat, load);
                    pasm.insert(j_stat, push);
                    j_stat += 2;
                    j += 4;
                } else {
                    pasm.insert(j_stat + 1, pop);
                    pasm.insert(j_stat, load);
                    pasm.insert(j_stat, push);
                    j_stat += 2;
                    j += 3;
                }
            }
            j += 1;
        }
    }
}

fn one_op(op: AsmOp, a: PasmOperand) -> PasmStatement {
    PasmStatement::new(op, vec![(a, OpFlags::NONE)])
}

fn two_op(op: AsmOp, a: PasmOperand, b: PasmOperand) -> PasmStatement {
    PasmStatement::new(op, vec![(a, OpFlags::NONE), (b, OpFlags::NONE)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::symtab::ValueCat;
    use crate::back::x86::Slot;
    use crate::common::{Name, SymbolId};
    use crate::middle::types::Type;

    fn tab(locs: &[(&str, Location)]) -> SymTab {
        let mut tab = SymTab::new();
        for (n, loc) in locs {
            let id = tab
                .add(
                    Type::parse("i32").unwrap(),
                    Name::from(n.to_string()),
                    ValueCat::Lvalue,
                )
                .unwrap();
            tab.get_mut(id).set_location(*loc);
        }
        tab
    }

    fn cfg_with(stat: PasmStatement) -> Cfg {
        let mut cfg = Cfg::new();
        let b = cfg.new_block();
        cfg.block_mut(b).push_pasm(stat);
        cfg
    }

    #[test]
    fn stack_source_of_mov_needs_no_reload() {
        // mov reg <- mem is a legal encoding
        let symtab = tab(&[
            ("x", Location::Slot(Slot::B)),
            ("y", Location::Stack),
        ]);
        let mut cfg = cfg_with(two_op(
            AsmOp::Mov,
            PasmOperand::Sym(SymbolId(0)),
            PasmOperand::Sym(SymbolId(1)),
        ));
        insert_spill_code(&mut cfg, &symtab);
        assert_eq!(cfg.block(0).pasm().len(), 1);
    }

    #[test]
    fn mem_mem_mov_reloads_one_side() {
        let symtab = tab(&[("x", Location::Stack), ("y", Location::Stack)]);
        let mut cfg = cfg_with(two_op(
            AsmOp::Mov,
            PasmOperand::Sym(SymbolId(0)),
            PasmOperand::Sym(SymbolId(1)),
        ));
        insert_spill_code(&mut cfg, &symtab);

        // The destination reloads through the first pool register and is
        // a definition, so it stores back before the pop
        let ops: Vec<AsmOp> = cfg.block(0).pasm().iter().map(|s| s.op()).collect();
        assert_eq!(
            ops,
            vec![AsmOp::Push, AsmOp::Mov, AsmOp::Mov, AsmOp::Mov, AsmOp::Pop]
        );
        let reloaded = &cfg.block(0).pasm()[2];
        assert_eq!(
            reloaded.operand(0),
            PasmOperand::Reg(Register::new(Slot::A, 4))
        );
        let save = &cfg.block(0).pasm()[3];
        assert_eq!(save.operand(0), PasmOperand::Sym(SymbolId(0)));
    }

    #[test]
    fn spilled_def_stores_back() {
        // sete on a stack byte is legal; idiv on a stack operand is too,
        // so force a def reload with movzx (register destination only)
        let symtab = tab(&[("x", Location::Stack), ("y", Location::Slot(Slot::B))]);
        let mut cfg = cfg_with(two_op(
            AsmOp::Movzx,
            PasmOperand::Sym(SymbolId(0)),
            PasmOperand::Sym(SymbolId(1)),
        ));
        insert_spill_code(&mut cfg, &symtab);

        let ops: Vec<AsmOp> = cfg.block(0).pasm().iter().map(|s| s.op()).collect();
        assert_eq!(
            ops,
            vec![AsmOp::Push, AsmOp::Mov, AsmOp::Movzx, AsmOp::Mov, AsmOp::Pop]
        );
        // Store back: mov sym, temp
        let save = &cfg.block(0).pasm()[3];
        assert_eq!(save.operand(0), PasmOperand::Sym(SymbolId(0)));
    }

    #[test]
    fn constant_operands_pass_through() {
        let mut symtab = SymTab::new();
        let x = symtab
            .add(
                Type::parse("i32").unwrap(),
                Name::from("x".to_string()),
                ValueCat::Lvalue,
            )
            .unwrap();
        symtab.get_mut(x).set_location(Location::Stack);
        let k = symtab.lookup("5").unwrap();

        let mut cfg = cfg_with(two_op(
            AsmOp::Mov,
            PasmOperand::Sym(x),
            PasmOperand::Sym(k),
        ));
        insert_spill_code(&mut cfg, &symtab);
        // mov mem, imm is legal; nothing inserted
        assert_eq!(cfg.block(0).pasm().len(), 1);
    }

    #[test]
    fn offset_index_on_stack_is_reloaded() {
        let symtab = tab(&[
            ("arr", Location::Stack),
            ("i", Location::Stack),
            ("v", Location::Slot(Slot::B)),
        ]);
        let mut cfg = cfg_with(two_op(
            AsmOp::Mov,
            PasmOperand::Offset {
                base: SymbolId(0),
                index: RegOrSym::Sym(SymbolId(1)),
            },
            PasmOperand::Sym(SymbolId(2)),
        ));
        insert_spill_code(&mut cfg, &symtab);

        let ops: Vec<AsmOp> = cfg.block(0).pasm().iter().map(|s| s.op()).collect();
        assert_eq!(
            ops,
            vec![AsmOp::Push, AsmOp::Mov, AsmOp::Mov, AsmOp::Pop]
        );
        match cfg.block(0).pasm()[2].operand(0) {
            PasmOperand::Offset { index, .. } => {
                assert_eq!(index, RegOrSym::Reg(Register::new(Slot::A, 4)));
            }
            other => panic!("expected offset operand, got {other:?}"),
        }
    }
}
