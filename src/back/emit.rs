//! The peephole cleanup and the final assembly printer.

use std::io::Write;

use crate::back::cfg::Cfg;
use crate::back::pasm::{PasmOperand, PasmStatement, RegOrSym};
use crate::back::symtab::SymTab;
use crate::back::x86::{size_directive, AsmOp, Location};
use crate::error::Result;

/// Spaces from start of line to start of an assembly instruction.
const INS_INDENT: usize = 8;
/// Spaces from start of line to start of assembly operands.
const OP_INDENT: usize = 24;
/// Column where in-line comments begin.
const COMMENT_INDENT: usize = 43;

/// Removes `mov` statements whose operands resolve to the same physical
/// location with identical dereference behavior.
pub fn peephole(cfg: &mut Cfg, symtab: &SymTab) {
    for i in 0..cfg.len() {
        cfg.block_mut(i).pasm_mut().retain(|stat| {
            !is_removable_mov(stat, symtab)
        });
    }
}

fn is_removable_mov(stat: &PasmStatement, symtab: &SymTab) -> bool {
    if stat.op() != AsmOp::Mov {
        return false;
    }
    let mut loc = [Location::None; 2];
    let mut deref = [false; 2];
    for k in 0..2 {
        loc[k] = match stat.operand(k) {
            PasmOperand::Reg(r) => Location::Slot(r.slot),
            PasmOperand::Sym(id) => symtab.get(id).location(),
            // Memory operands are never self-copies
            PasmOperand::Offset { .. } => return false,
        };
        deref[k] = stat.flags(k).deref;
    }
    // Stack and constant locations are not comparable slots
    if !loc[0].is_register() || !loc[1].is_register() {
        return false;
    }
    // Must either both dereference or both not
    if deref[0] != deref[1] {
        return false;
    }
    loc[0] == loc[1]
}

/// Emits the `_start` shim: reads argc/argv off the initial stack,
/// calls `f@main`, and exits via syscall.
pub fn emit_start_shim(out: &mut impl Write) -> Result<()> {
    out.write_all(
        concat!(
            "\n",
            "    global _start\n",
            "_start:\n",
            "    mov             rdi, QWORD [rsp]\n",
            "    mov             rsi, QWORD [rsp+8]\n",
            "    call            f@main\n",
            "    mov             rdi, rax\n",
            "    mov             rax, 60\n",
            "    syscall\n",
        )
        .as_bytes(),
    )?;
    Ok(())
}

/// Prints the function: label, prologue, blocks, and statements with
/// physical operands.  Requires register allocation and spill code.
pub fn emit_function(
    cfg: &Cfg,
    symtab: &SymTab,
    func_name: &str,
    out: &mut impl Write,
) -> Result<()> {
    // Function labels always carry the f@ prefix
    writeln!(out, "f@{func_name}:")?;
    writeln!(out, "push rbp")?;
    writeln!(out, "mov rbp,rsp")?;

    // Reserve stack space
    let stack_bytes = symtab.stack_bytes();
    if stack_bytes != 0 {
        writeln!(out, "sub rsp,{stack_bytes}")?;
    }

    let mut emitted_any = false;
    for (i, blk) in cfg.blocks().enumerate() {
        writeln!(out, "{:w$}; Block {i}", "", w = COMMENT_INDENT)?;

        for &lab in blk.labels() {
            writeln!(out, "{}:", symtab.get(lab).name())?;
        }

        for stat in blk.pasm() {
            emitted_any = true;
            let ins = stat.op().to_string();
            write!(out, "{:w$}{ins}", "", w = INS_INDENT)?;
            if stat.op_count() > 0 {
                // At least one space separates instruction and operands
                let pad = OP_INDENT.saturating_sub(INS_INDENT + ins.len()).max(1);
                write!(out, "{:pad$}", "")?;
                for k in 0..stat.op_count() {
                    if k != 0 {
                        write!(out, ", ")?;
                    }
                    emit_operand(stat, k, symtab, out)?;
                }
            }
            writeln!(out)?;
        }
    }

    // A function with no statements at all still tears its frame down
    if !emitted_any {
        writeln!(out, "{:w$}leave", "", w = INS_INDENT)?;
        writeln!(out, "{:w$}ret", "", w = INS_INDENT)?;
    }
    Ok(())
}

/// Prints one operand: registers by their width-correct mnemonic, stack
/// symbols as `SIZE [rbp±offset]`, constants and labels by name, and
/// dereferences wrapped in `[ ]` with a size directive from the pointee.
fn emit_operand(
    stat: &PasmStatement,
    i: usize,
    symtab: &SymTab,
    out: &mut impl Write,
) -> Result<()> {
    let flags = stat.flags(i);

    match stat.operand(i) {
        PasmOperand::Reg(reg) => {
            let reg = match flags.size_override {
                Some(bytes) => reg.resize(bytes),
                None => reg,
            };
            if flags.deref {
                write!(out, "[{reg}]")?;
            } else {
                write!(out, "{reg}")?;
            }
        }
        PasmOperand::Sym(id) => {
            let sym = symtab.get(id);
            let bytes = match flags.size_override {
                Some(b) => u32::from(b),
                None => sym.bytes(),
            };
            match sym.location() {
                Location::Stack => {
                    debug_assert!(!flags.deref, "cannot dereference a stack symbol");
                    let offset = symtab.stack_offset(id);
                    let dir = size_directive(bytes);
                    if offset < 0 {
                        write!(out, "{dir} [rbp-{}]", -offset)?;
                    } else {
                        write!(out, "{dir} [rbp+{offset}]")?;
                    }
                }
                Location::Constant => {
                    debug_assert!(!flags.deref, "cannot dereference a constant");
                    write!(out, "{}", sym.name())?;
                }
                Location::Slot(_) => {
                    let reg = sym.register().resize(bytes as u8);
                    if flags.deref {
                        // The size directive is the size of the pointed
                        // to type: int* p; *p = 100 moves a DWORD
                        let pointee = sym.ty().point_to().bytes();
                        write!(out, "{} [{reg}]", size_directive(pointee))?;
                    } else {
                        write!(out, "{reg}")?;
                    }
                }
                Location::None => {
                    // Labels and function names are printed bare
                    write!(out, "{}", sym.name())?;
                }
            }
        }
        PasmOperand::Offset { base, index } => {
            let base_sym = symtab.get(base);
            debug_assert_eq!(base_sym.location(), Location::Stack);
            let element = base_sym.ty().point_to().bytes();
            let offset = symtab.stack_offset(base);
            let dir = size_directive(element);
            write!(out, "{dir} [rbp+")?;
            match index {
                RegOrSym::Reg(reg) => write!(out, "{reg}")?,
                RegOrSym::Sym(id) => {
                    let idx = symtab.get(id);
                    if idx.is_constant() {
                        write!(out, "{}", idx.name())?;
                    } else {
                        write!(out, "{}", idx.register())?;
                    }
                }
            }
            if offset < 0 {
                write!(out, "-{}]", -offset)?;
            } else if offset > 0 {
                write!(out, "+{offset}]")?;
            } else {
                write!(out, "]")?;
            }
        }
    }
    Ok(())
}
