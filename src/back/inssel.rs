//! The pattern-directed instruction selector.
//!
//! Every IL opcode owns an ordered list of cases.  A case pairs a
//! constraint string with the pseudo-assembly templates it expands to.
//! Cases are listed in non-decreasing cost order, so the first case
//! whose constraint accepts the statement's operands is the chosen one.
//!
//! Constraint strings hold one or more alternatives separated by
//! spaces; any alternative matching accepts the case.  An alternative
//! is a sequence of per-argument descriptors in IL argument order:
//!
//! ```text
//!   class [sign] [size]
//!     class: s = register/memory symbol, a = array, i = immediate,
//!            l = label
//!     sign:  u = unsigned, U = signed (absent: either)
//!     size:  required byte size, 1-9
//! ```
//!
//! For example `su1i2 s3s4` accepts a 1-byte unsigned symbol with a
//! 2-byte immediate, or a 3-byte symbol with a 4-byte symbol.

use crate::back::pasm::{OpFlags, PasmOperand, PasmStatement, RegOrSym};
use crate::back::symtab::SymTab;
use crate::back::x86::{AsmOp, Register, Slot, RAX, RDX};
use crate::error::Result;
use crate::middle::il::{IlOp, IlStatement};

/// Operand descriptor of a replacement template.
#[derive(Clone, Copy, Debug)]
pub enum TemplateOp {
    /// A fresh temporary, typed like the referenced IL argument.  One
    /// temporary is allocated per macro expansion and reused by later
    /// references.
    New(usize),
    /// The i-th IL argument's symbol.
    Virtual(usize),
    /// A register slot, sized from the first IL argument with storage.
    Location(Slot),
    /// A concrete register, emitted verbatim.
    Physical(Register),
    /// Memory operand `[base + offset]` built from two IL arguments.
    Offset(usize, usize),
}

/// One pseudo-assembly template of a case.
#[derive(Clone, Copy, Debug)]
pub struct Replacement {
    pub op: AsmOp,
    pub ops: &'static [(TemplateOp, OpFlags)],
}

/// One constraint alternative set and its replacement sequence.
#[derive(Clone, Copy, Debug)]
pub struct MacroCase {
    pub constraint: &'static str,
    pub replace: &'static [Replacement],
}

/// All cases for one IL opcode.
#[derive(Clone, Copy, Debug)]
pub struct InsSelMacro {
    pub il: IlOp,
    pub cases: &'static [MacroCase],
}

/// Matches one constraint alternative against the statement arguments.
fn alternative_matches(alt: &str, stat: &IlStatement, symtab: &SymTab) -> bool {
    let bytes = alt.as_bytes();
    let mut i = 0;
    for k in 0..stat.argc() {
        let Some(&class) = bytes.get(i) else {
            // Constraint ended before the arguments did
            return false;
        };
        i += 1;

        let mut must_signed = false;
        let mut must_unsigned = false;
        match bytes.get(i) {
            Some(b'u') => {
                must_unsigned = true;
                i += 1;
            }
            Some(b'U') => {
                must_signed = true;
                i += 1;
            }
            _ => {}
        }

        let mut size: Option<u32> = None;
        if let Some(c) = bytes.get(i) {
            if c.is_ascii_digit() {
                size = Some(u32::from(c - b'0'));
                i += 1;
            }
        }

        let sym = symtab.get(stat.arg(k));
        if let Some(want) = size {
            if sym.bytes() != want {
                return false;
            }
        }
        let class_ok = match class {
            b'i' => sym.is_constant(),
            b'l' => sym.is_label(),
            b's' => sym.is_var(),
            b'a' => sym.is_var() && sym.ty().is_array(),
            c => panic!("invalid constraint character {}", c as char),
        };
        if !class_ok {
            return false;
        }
        if must_signed || must_unsigned {
            let Some(ts) = sym.ty().spec() else {
                return false;
            };
            if must_signed && !ts.is_signed() {
                return false;
            }
            if must_unsigned && !ts.is_unsigned() {
                return false;
            }
        }
    }
    // The alternative must be fully consumed as well
    i == alt.len()
}

/// Finds the lowest-cost macro case accepting the statement.
pub fn find_case(stat: &IlStatement, symtab: &SymTab) -> Option<&'static MacroCase> {
    let mac = MACROS.iter().find(|m| m.il == stat.op)?;
    for case in mac.cases {
        if case
            .constraint
            .split(' ')
            .any(|alt| alternative_matches(alt, stat, symtab))
        {
            return Some(case);
        }
    }
    None
}

/// Expands the chosen case into pseudo-assembly statements.
pub fn expand(
    case: &MacroCase,
    stat: &IlStatement,
    symtab: &mut SymTab,
) -> Result<Vec<PasmStatement>> {
    // One fresh temporary is shared by every New reference within this
    // macro instance
    let mut created = None;
    let mut out = Vec::with_capacity(case.replace.len());

    for repl in case.replace {
        let mut ops = Vec::with_capacity(repl.ops.len());
        for &(top, flags) in repl.ops {
            let operand = match top {
                TemplateOp::New(arg) => {
                    let id = match created {
                        Some(id) => id,
                        None => {
                            let ty = symtab.get(stat.arg(arg)).ty().clone();
                            debug_assert!(ty.bytes() > 0, "temporary of zero bytes");
                            let id = symtab.add_temporary(ty)?;
                            created = Some(id);
                            id
                        }
                    };
                    PasmOperand::Sym(id)
                }
                TemplateOp::Virtual(arg) => PasmOperand::Sym(stat.arg(arg)),
                TemplateOp::Location(slot) => {
                    // Sized from the first IL argument with storage
                    let bytes = stat
                        .args
                        .iter()
                        .map(|&a| symtab.get(a).bytes())
                        .find(|&b| b != 0)
                        .expect("failed to calculate size for register");
                    PasmOperand::Reg(Register::new(slot, bytes as u8))
                }
                TemplateOp::Physical(reg) => PasmOperand::Reg(reg),
                TemplateOp::Offset(base, index) => PasmOperand::Offset {
                    base: stat.arg(base),
                    index: RegOrSym::Sym(stat.arg(index)),
                },
            };
            ops.push((operand, flags));
        }
        out.push(PasmStatement::new(repl.op, ops));
    }
    Ok(out)
}

// ============================================================
// The macro table.  Cases are sorted in increasing cost.

use AsmOp::*;
use TemplateOp::{Location, New, Offset, Physical, Virtual};

const N: OpFlags = OpFlags::NONE;
const D: OpFlags = OpFlags::DEREF;
const S1: OpFlags = OpFlags::size(1);
const S2: OpFlags = OpFlags::size(2);
const S4: OpFlags = OpFlags::size(4);

const fn r0(op: AsmOp) -> Replacement {
    Replacement { op, ops: &[] }
}

macro_rules! r1 {
    ($op:expr, $a:expr, $fa:expr) => {
        Replacement {
            op: $op,
            ops: &[($a, $fa)],
        }
    };
}

macro_rules! r2 {
    ($op:expr, $a:expr, $fa:expr, $b:expr, $fb:expr) => {
        Replacement {
            op: $op,
            ops: &[($a, $fa), ($b, $fb)],
        }
    };
}

/// Cases shared by div and mod: dividend through rax, remainder in rdx,
/// both saved around the operation.  `result` picks the slot the result
/// is copied out of.
macro_rules! divmod_case {
    ($constraint:expr, direct, $result:expr) => {
        MacroCase {
            constraint: $constraint,
            replace: &[
                r1!(Push, Physical(RAX), N),
                r1!(Push, Physical(RDX), N),
                r2!(Xor, Location(Slot::D), N, Location(Slot::D), N),
                r2!(Mov, Location(Slot::A), N, Virtual(1), N),
                r1!(Idiv, Virtual(2), N),
                r2!(Mov, Virtual(0), N, Location($result), N),
                r1!(Pop, Physical(RDX), N),
                r1!(Pop, Physical(RAX), N),
            ],
        }
    };
    ($constraint:expr, reloaded, $result:expr) => {
        MacroCase {
            constraint: $constraint,
            replace: &[
                r1!(Push, Physical(RAX), N),
                r1!(Push, Physical(RDX), N),
                r2!(Xor, Location(Slot::D), N, Location(Slot::D), N),
                r2!(Mov, Location(Slot::A), N, Virtual(1), N),
                r2!(Mov, New(0), N, Virtual(2), N),
                r1!(Idiv, New(0), N),
                r2!(Mov, Virtual(0), N, Location($result), N),
                r1!(Pop, Physical(RDX), N),
                r1!(Pop, Physical(RAX), N),
            ],
        }
    };
}

/// Compare cases: zero the destination, compare, then set the low byte.
macro_rules! cmp_case {
    ($constraint:expr, $set:expr) => {
        MacroCase {
            constraint: $constraint,
            replace: &[
                r2!(Xor, Virtual(0), N, Virtual(0), N),
                r2!(Cmp, Virtual(1), N, Virtual(2), N),
                r1!($set, Virtual(0), S1),
            ],
        }
    };
    ($constraint:expr, reloaded, $set:expr) => {
        MacroCase {
            constraint: $constraint,
            replace: &[
                r2!(Mov, New(0), N, Virtual(1), N),
                r2!(Xor, Virtual(0), N, Virtual(0), N),
                r2!(Cmp, New(0), N, Virtual(2), N),
                r1!($set, Virtual(0), S1),
            ],
        }
    };
}

pub static MACROS: &[InsSelMacro] = &[
    InsSelMacro {
        il: IlOp::Add,
        cases: &[
            MacroCase {
                constraint: "sss ssi",
                replace: &[
                    r2!(Mov, Virtual(0), N, Virtual(1), N),
                    r2!(Add, Virtual(0), N, Virtual(2), N),
                ],
            },
            MacroCase {
                constraint: "sis sii",
                replace: &[
                    r2!(Mov, Virtual(0), N, Virtual(2), N),
                    r2!(Add, Virtual(0), N, Virtual(1), N),
                ],
            },
        ],
    },
    InsSelMacro {
        il: IlOp::Ce,
        cases: &[
            cmp_case!("sss ssi", Sete),
            cmp_case!("sis", reloaded, Sete),
        ],
    },
    InsSelMacro {
        il: IlOp::Cl,
        cases: &[
            cmp_case!("ssUsU ssUiU", Setl),
            cmp_case!("siUsU", reloaded, Setl),
            cmp_case!("ssusu ssuiu", Setb),
            cmp_case!("siusu", reloaded, Setb),
        ],
    },
    InsSelMacro {
        il: IlOp::Cle,
        cases: &[
            cmp_case!("ssUsU ssUiU", Setle),
            cmp_case!("siUsU", reloaded, Setle),
            cmp_case!("ssusu ssuiu", Setbe),
            cmp_case!("siusu", reloaded, Setbe),
        ],
    },
    InsSelMacro {
        il: IlOp::Cne,
        cases: &[
            cmp_case!("sss ssi", Setne),
            cmp_case!("sis", reloaded, Setne),
        ],
    },
    InsSelMacro {
        il: IlOp::Div,
        cases: &[
            divmod_case!("sss sis", direct, Slot::A),
            divmod_case!("ssi sii", reloaded, Slot::A),
        ],
    },
    InsSelMacro {
        il: IlOp::Jmp,
        cases: &[MacroCase {
            constraint: "l",
            replace: &[r1!(Jmp, Virtual(0), N)],
        }],
    },
    InsSelMacro {
        il: IlOp::Jnz,
        cases: &[
            MacroCase {
                constraint: "ls",
                replace: &[
                    r2!(Test, Virtual(1), N, Virtual(1), N),
                    r1!(Jnz, Virtual(0), N),
                ],
            },
            MacroCase {
                constraint: "li",
                replace: &[
                    r2!(Mov, New(1), N, Virtual(1), N),
                    r2!(Test, New(1), N, New(1), N),
                    r1!(Jnz, Virtual(0), N),
                ],
            },
        ],
    },
    InsSelMacro {
        il: IlOp::Jz,
        cases: &[
            MacroCase {
                constraint: "ls",
                replace: &[
                    r2!(Test, Virtual(1), N, Virtual(1), N),
                    r1!(Jz, Virtual(0), N),
                ],
            },
            MacroCase {
                constraint: "li",
                replace: &[
                    r2!(Mov, New(1), N, Virtual(1), N),
                    r2!(Test, New(1), N, New(1), N),
                    r1!(Jz, Virtual(0), N),
                ],
            },
        ],
    },
    InsSelMacro {
        il: IlOp::Mad,
        cases: &[MacroCase {
            constraint: "ss",
            replace: &[r2!(Lea, Virtual(0), N, Virtual(1), N)],
        }],
    },
    InsSelMacro {
        il: IlOp::Mfi,
        cases: &[
            MacroCase {
                constraint: "sas sai",
                replace: &[r2!(Mov, Virtual(0), N, Offset(1, 2), N)],
            },
            MacroCase {
                constraint: "sss ssi",
                replace: &[
                    r2!(Mov, New(1), N, Virtual(1), N),
                    r2!(Add, New(1), N, Virtual(2), N),
                    r2!(Mov, Virtual(0), N, New(1), D),
                ],
            },
        ],
    },
    InsSelMacro {
        il: IlOp::Mod,
        cases: &[
            divmod_case!("sss sis", direct, Slot::D),
            divmod_case!("ssi sii", reloaded, Slot::D),
        ],
    },
    InsSelMacro {
        il: IlOp::Mov,
        cases: &[MacroCase {
            constraint: "ss si",
            replace: &[r2!(Mov, Virtual(0), N, Virtual(1), N)],
        }],
    },
    InsSelMacro {
        il: IlOp::Mtc,
        cases: &[
            // Widening: sign extend signed <- signed
            MacroCase {
                constraint: "sU2sU1 sU4sU1 sU8sU1 sU4sU2 sU8sU2 sU8sU4",
                replace: &[r2!(Movsx, Virtual(0), N, Virtual(1), N)],
            },
            // Zero extend signed <- unsigned and unsigned <- any
            MacroCase {
                constraint: "sU2su1 sU4su1 sU8su1 sU4su2 sU8su2 \
                             su2s1 su4s1 su8s1 su4s2 su8s2",
                replace: &[r2!(Movzx, Virtual(0), N, Virtual(1), N)],
            },
            // mov qword <- dword zero extends
            MacroCase {
                constraint: "sU8su4 su8s4",
                replace: &[r2!(Mov, Virtual(0), N, Virtual(1), N)],
            },
            // Narrowing accesses the lower part of the register
            MacroCase {
                constraint: "s1s2 s1s4 s1s8",
                replace: &[r2!(Mov, Virtual(0), S1, Virtual(1), S1)],
            },
            MacroCase {
                constraint: "s2s4 s2s8",
                replace: &[r2!(Mov, Virtual(0), S2, Virtual(1), S2)],
            },
            MacroCase {
                constraint: "s4s8",
                replace: &[r2!(Mov, Virtual(0), S4, Virtual(1), S4)],
            },
            // Same size needs no extension; constant conversions are
            // done by the assembler
            MacroCase {
                constraint: "ss si",
                replace: &[r2!(Mov, Virtual(0), N, Virtual(1), N)],
            },
        ],
    },
    InsSelMacro {
        il: IlOp::Mti,
        cases: &[
            MacroCase {
                constraint: "ass asi ais aii",
                replace: &[r2!(Mov, Offset(0, 1), N, Virtual(2), N)],
            },
            MacroCase {
                constraint: "sss ssi sis sii",
                replace: &[
                    r2!(Mov, New(0), N, Virtual(0), N),
                    r2!(Add, New(0), N, Virtual(1), N),
                    r2!(Mov, New(0), D, Virtual(2), N),
                ],
            },
        ],
    },
    InsSelMacro {
        il: IlOp::Mul,
        cases: &[
            MacroCase {
                constraint: "sss ssi",
                replace: &[
                    r2!(Mov, Virtual(0), N, Virtual(1), N),
                    r2!(Imul, Virtual(0), N, Virtual(2), N),
                ],
            },
            MacroCase {
                constraint: "sis sii",
                replace: &[
                    r2!(Mov, Virtual(0), N, Virtual(2), N),
                    r2!(Imul, Virtual(0), N, Virtual(1), N),
                ],
            },
        ],
    },
    InsSelMacro {
        il: IlOp::Not,
        cases: &[
            MacroCase {
                constraint: "ss",
                replace: &[
                    r2!(Xor, Virtual(0), N, Virtual(0), N),
                    r2!(Test, Virtual(1), N, Virtual(1), N),
                    r1!(Setz, Virtual(0), S1),
                ],
            },
            MacroCase {
                constraint: "si",
                replace: &[
                    r2!(Mov, New(0), N, Virtual(1), N),
                    r2!(Xor, Virtual(0), N, Virtual(0), N),
                    r2!(Test, New(0), N, New(0), N),
                    r1!(Setz, Virtual(0), S1),
                ],
            },
        ],
    },
    InsSelMacro {
        il: IlOp::Ret,
        cases: &[MacroCase {
            constraint: "s i",
            replace: &[
                r2!(Mov, Location(Slot::A), N, Virtual(0), N),
                r0(Leave),
                r0(Ret),
            ],
        }],
    },
    InsSelMacro {
        il: IlOp::Sub,
        cases: &[
            MacroCase {
                constraint: "sss ssi",
                replace: &[
                    r2!(Mov, Virtual(0), N, Virtual(1), N),
                    r2!(Sub, Virtual(0), N, Virtual(2), N),
                ],
            },
            MacroCase {
                constraint: "sis sii",
                replace: &[
                    r2!(Mov, New(0), N, Virtual(1), N),
                    r2!(Sub, New(0), N, Virtual(2), N),
                    r2!(Mov, Virtual(0), N, New(0), N),
                ],
            },
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::symtab::ValueCat;
    use crate::common::Name;
    use crate::middle::types::Type;

    fn tab() -> SymTab {
        let mut tab = SymTab::new();
        for (ty, n) in [
            ("i32", "x"),
            ("i32", "y"),
            ("u32", "ux"),
            ("void", "l0"),
            ("i64", "w"),
            ("i32[4]", "arr"),
        ] {
            tab.add(Type::parse(ty).unwrap(), Name::from(n.to_string()), ValueCat::Lvalue)
                .unwrap();
        }
        tab
    }

    fn stat(tab: &mut SymTab, op: IlOp, args: &[&str]) -> IlStatement {
        IlStatement {
            op,
            args: args.iter().map(|&a| tab.lookup(a).unwrap()).collect(),
        }
    }

    #[test]
    fn matches_symbol_and_immediate_classes() {
        let mut tab = tab();
        let sss = stat(&mut tab, IlOp::Add, &["x", "y", "x"]);
        assert!(alternative_matches("sss", &sss, &tab));
        assert!(!alternative_matches("ssi", &sss, &tab));

        let ssi = stat(&mut tab, IlOp::Add, &["x", "y", "3"]);
        assert!(alternative_matches("ssi", &ssi, &tab));
        assert!(!alternative_matches("sss", &ssi, &tab));
    }

    #[test]
    fn sign_and_size_constraints() {
        let mut tab = tab();
        let s = stat(&mut tab, IlOp::Mtc, &["w", "x"]);
        // i64 <- i32: signed widen
        assert!(alternative_matches("sU8sU4", &s, &tab));
        assert!(!alternative_matches("su8su4", &s, &tab));
        assert!(!alternative_matches("sU4sU4", &s, &tab));

        let u = stat(&mut tab, IlOp::Mtc, &["w", "ux"]);
        assert!(alternative_matches("sU8su4", &u, &tab));
    }

    #[test]
    fn label_class() {
        let mut tab = tab();
        let j = stat(&mut tab, IlOp::Jmp, &["l0"]);
        assert!(alternative_matches("l", &j, &tab));
        assert!(!alternative_matches("s", &j, &tab));
    }

    #[test]
    fn array_class() {
        let mut tab = tab();
        let m = stat(&mut tab, IlOp::Mfi, &["x", "arr", "1"]);
        assert!(alternative_matches("sai", &m, &tab));
        assert!(!alternative_matches("sai", &stat(&mut tab, IlOp::Mfi, &["x", "y", "1"]), &tab));
    }

    #[test]
    fn overlong_alternative_rejected() {
        let mut tab = tab();
        let m = stat(&mut tab, IlOp::Mov, &["x", "y"]);
        assert!(alternative_matches("ss", &m, &tab));
        assert!(!alternative_matches("sss", &m, &tab));
        assert!(!alternative_matches("s", &m, &tab));
    }

    #[test]
    fn first_matching_case_wins() {
        let mut tab = tab();
        // mtc i64 <- u32: no movzx r64 form exists, a plain mov zero
        // extends, and the catch-all ss case must not shadow it
        let s = stat(&mut tab, IlOp::Mtc, &["w", "ux"]);
        let case = find_case(&s, &tab).unwrap();
        assert_eq!(case.replace.len(), 1);
        assert_eq!(case.replace[0].op, AsmOp::Mov);
        assert!(matches!(case.replace[0].ops[0].1, OpFlags { size_override: None, .. }));
    }

    #[test]
    fn expansion_reuses_one_temporary() {
        let mut tab = tab();
        // jnz with an immediate condition reloads it into one temp
        let s = stat(&mut tab, IlOp::Jnz, &["l0", "5"]);
        let case = find_case(&s, &tab).unwrap();
        let before = tab.len();
        let pasm = expand(case, &s, &mut tab).unwrap();
        assert_eq!(tab.len(), before + 1);
        assert_eq!(pasm.len(), 3);
        let tmp = match pasm[0].operand(0) {
            PasmOperand::Sym(id) => id,
            other => panic!("expected temp, got {other:?}"),
        };
        assert_eq!(pasm[1].operand(0), PasmOperand::Sym(tmp));
        assert_eq!(pasm[1].operand(1), PasmOperand::Sym(tmp));
    }

    #[test]
    fn location_operand_sized_from_first_storage_arg() {
        let mut tab = tab();
        let s = stat(&mut tab, IlOp::Ret, &["w"]);
        let case = find_case(&s, &tab).unwrap();
        let pasm = expand(case, &s, &mut tab).unwrap();
        assert_eq!(
            pasm[0].operand(0),
            PasmOperand::Reg(Register::new(Slot::A, 8))
        );
        assert_eq!(pasm[1].op(), AsmOp::Leave);
        assert_eq!(pasm[2].op(), AsmOp::Ret);
    }

    #[test]
    fn every_case_expands() {
        // No macro case may reference an operand template kind the
        // expander cannot resolve; spot check arithmetic and memory ops.
        let mut tab = tab();
        for (op, args) in [
            (IlOp::Add, vec!["x", "y", "3"]),
            (IlOp::Div, vec!["x", "y", "x"]),
            (IlOp::Mod, vec!["x", "y", "7"]),
            (IlOp::Mti, vec!["arr", "1", "x"]),
            (IlOp::Mfi, vec!["x", "arr", "1"]),
            (IlOp::Not, vec!["x", "y"]),
        ] {
            let s = stat(&mut tab, op, &args);
            let case = find_case(&s, &tab).unwrap_or_else(|| panic!("no case for {op}"));
            expand(case, &s, &mut tab).unwrap();
        }
    }

    #[test]
    fn unmatched_statement_has_no_case() {
        let mut tab = tab();
        // mad with an immediate source has no case
        let s = stat(&mut tab, IlOp::Mad, &["x", "5"]);
        assert!(find_case(&s, &tab).is_none());
    }
}
