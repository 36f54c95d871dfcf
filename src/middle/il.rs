//! Opcodes and statements of the intermediate language.

use derive_more::Display;

use crate::common::SymbolId;
use crate::error::ErrorCode;

/// The IL opcode set.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IlOp {
    #[display("add")]
    Add,
    #[display("ce")]
    Ce,
    #[display("cl")]
    Cl,
    #[display("cle")]
    Cle,
    #[display("cne")]
    Cne,
    #[display("def")]
    Def,
    #[display("div")]
    Div,
    #[display("func")]
    Func,
    #[display("jmp")]
    Jmp,
    #[display("jnz")]
    Jnz,
    #[display("jz")]
    Jz,
    #[display("lab")]
    Lab,
    #[display("mad")]
    Mad,
    #[display("mfi")]
    Mfi,
    #[display("mod")]
    Mod,
    #[display("mov")]
    Mov,
    #[display("mtc")]
    Mtc,
    #[display("mti")]
    Mti,
    #[display("mul")]
    Mul,
    #[display("not")]
    Not,
    #[display("ret")]
    Ret,
    #[display("sub")]
    Sub,
}

impl IlOp {
    pub fn from_str(s: &str) -> Option<IlOp> {
        use IlOp::*;
        let op = match s {
            "add" => Add,
            "ce" => Ce,
            "cl" => Cl,
            "cle" => Cle,
            "cne" => Cne,
            "def" => Def,
            "div" => Div,
            "func" => Func,
            "jmp" => Jmp,
            "jnz" => Jnz,
            "jz" => Jz,
            "lab" => Lab,
            "mad" => Mad,
            "mfi" => Mfi,
            "mod" => Mod,
            "mov" => Mov,
            "mtc" => Mtc,
            "mti" => Mti,
            "mul" => Mul,
            "not" => Not,
            "ret" => Ret,
            "sub" => Sub,
            _ => return None,
        };
        Some(op)
    }

    /// Whether this opcode transfers control to a label.
    pub fn is_jump(self) -> bool {
        matches!(self, IlOp::Jmp | IlOp::Jnz | IlOp::Jz)
    }

    /// Whether statements with this opcode belong in the control flow
    /// graph.  Declarations and markers do not.
    pub fn in_cfg(self) -> bool {
        !matches!(self, IlOp::Def | IlOp::Func | IlOp::Lab)
    }

    /// Validates the argument count for this opcode.
    pub fn check_arity(self, argc: usize) -> Result<(), ErrorCode> {
        use IlOp::*;
        let ok = match self {
            Add | Ce | Cl | Cle | Cne | Div | Mfi | Mod | Mti | Mul | Sub => argc == 3,
            Jnz | Jz | Mad | Mov | Mtc | Not => argc == 2,
            Def | Jmp | Lab | Ret => argc == 1,
            Func => argc >= 2,
        };
        if ok {
            Ok(())
        } else {
            log::error!("bad argument count {argc} for {self}");
            Err(ErrorCode::BadArgs)
        }
    }
}

/// One three-address statement with its operands resolved to symbol
/// handles.
#[derive(Clone, Debug)]
pub struct IlStatement {
    pub op: IlOp,
    pub args: Vec<SymbolId>,
}

impl IlStatement {
    pub fn arg(&self, i: usize) -> SymbolId {
        self.args[i]
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }
}
