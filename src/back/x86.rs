//! x86-64 specifics: register slots, sized registers, the pseudo-assembly
//! opcode set, and the addressing modes each instruction accepts.

use bitflags::bitflags;
use derive_more::Display;

/// A register slot names one architectural register across all of its
/// access widths, e.g. `A` covers al/ax/eax/rax.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    #[display("a")]
    A,
    #[display("b")]
    B,
    #[display("c")]
    C,
    #[display("d")]
    D,
    #[display("si")]
    Si,
    #[display("di")]
    Di,
    #[display("bp")]
    Bp,
    #[display("sp")]
    Sp,
    #[display("8")]
    R8,
    #[display("9")]
    R9,
    #[display("10")]
    R10,
    #[display("11")]
    R11,
    #[display("12")]
    R12,
    #[display("13")]
    R13,
    #[display("14")]
    R14,
    #[display("15")]
    R15,
}

impl Slot {
    pub const COUNT: usize = 16;

    pub const ALL: [Slot; Slot::COUNT] = [
        Slot::A,
        Slot::B,
        Slot::C,
        Slot::D,
        Slot::Si,
        Slot::Di,
        Slot::Bp,
        Slot::Sp,
        Slot::R8,
        Slot::R9,
        Slot::R10,
        Slot::R11,
        Slot::R12,
        Slot::R13,
        Slot::R14,
        Slot::R15,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// The slots the allocator may hand out.  bp and sp are reserved for the
/// frame.
pub const PALETTE: [Slot; 14] = [
    Slot::A,
    Slot::B,
    Slot::C,
    Slot::D,
    Slot::Si,
    Slot::Di,
    Slot::R8,
    Slot::R9,
    Slot::R10,
    Slot::R11,
    Slot::R12,
    Slot::R13,
    Slot::R14,
    Slot::R15,
];

/// System V integer argument registers, in passing order.
pub const ARG_SLOTS: [Slot; 6] = [Slot::Di, Slot::Si, Slot::D, Slot::C, Slot::R8, Slot::R9];

const NAMES_1: [&str; Slot::COUNT] = [
    "al", "bl", "cl", "dl", "sil", "dil", "bpl", "spl", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];
const NAMES_2: [&str; Slot::COUNT] = [
    "ax", "bx", "cx", "dx", "si", "di", "bp", "sp", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w",
    "r14w", "r15w",
];
const NAMES_4: [&str; Slot::COUNT] = [
    "eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "r8d", "r9d", "r10d", "r11d", "r12d",
    "r13d", "r14d", "r15d",
];
const NAMES_8: [&str; Slot::COUNT] = [
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

/// A concrete register: a slot accessed at a specific width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Register {
    pub slot: Slot,
    pub bytes: u8,
}

impl Register {
    pub const fn new(slot: Slot, bytes: u8) -> Register {
        Register { slot, bytes }
    }

    /// Assembler mnemonic for this slot at this width.
    pub fn name(self) -> &'static str {
        let i = self.slot.index();
        match self.bytes {
            1 => NAMES_1[i],
            2 => NAMES_2[i],
            4 => NAMES_4[i],
            8 => NAMES_8[i],
            n => panic!("bad register byte size {n}"),
        }
    }

    /// The same slot at a different width.
    pub fn resize(self, bytes: u8) -> Register {
        Register::new(self.slot, bytes)
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub const RAX: Register = Register::new(Slot::A, 8);
pub const RDX: Register = Register::new(Slot::D, 8);

/// Where a symbol lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// Not yet decided (pre-allocation).
    None,
    /// A numeric constant; never receives storage.
    Constant,
    /// Spilled to the stack frame.
    Stack,
    /// Resident in a register slot.
    Slot(Slot),
}

impl Location {
    pub fn slot(self) -> Option<Slot> {
        match self {
            Location::Slot(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_register(self) -> bool {
        matches!(self, Location::Slot(_))
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::None => f.write_str("none"),
            Location::Constant => f.write_str("constant"),
            Location::Stack => f.write_str("stack"),
            Location::Slot(s) => write!(f, "{s}"),
        }
    }
}

/// Size directive used to access bytes from a memory location.
pub fn size_directive(bytes: u32) -> &'static str {
    match bytes {
        1 => "BYTE",
        2 => "WORD",
        4 => "DWORD",
        8 => "QWORD",
        n => panic!("bad byte size {n} for size directive"),
    }
}

/// Maximum operands for an assembly instruction.
pub const MAX_ASM_OP: usize = 2;

/// The x86 opcodes pseudo-assembly is built from.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AsmOp {
    #[display("add")]
    Add,
    #[display("cmp")]
    Cmp,
    #[display("idiv")]
    Idiv,
    #[display("imul")]
    Imul,
    #[display("jmp")]
    Jmp,
    #[display("jnz")]
    Jnz,
    #[display("jz")]
    Jz,
    #[display("lea")]
    Lea,
    #[display("leave")]
    Leave,
    #[display("mov")]
    Mov,
    #[display("movsx")]
    Movsx,
    #[display("movzx")]
    Movzx,
    #[display("pop")]
    Pop,
    #[display("push")]
    Push,
    #[display("ret")]
    Ret,
    #[display("setb")]
    Setb,
    #[display("setbe")]
    Setbe,
    #[display("sete")]
    Sete,
    #[display("setl")]
    Setl,
    #[display("setle")]
    Setle,
    #[display("setne")]
    Setne,
    #[display("setz")]
    Setz,
    #[display("sub")]
    Sub,
    #[display("test")]
    Test,
    #[display("xor")]
    Xor,
}

bitflags! {
    /// Operand classes an instruction position accepts.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpClass: u8 {
        const R = 1 << 0;
        const M = 1 << 1;
        const I = 1 << 2;
    }
}

const R: OpClass = OpClass::R;
const RM: OpClass = OpClass::R.union(OpClass::M);
const RI: OpClass = OpClass::R.union(OpClass::I);
const RMI: OpClass = OpClass::R.union(OpClass::M).union(OpClass::I);
const ANY: OpClass = OpClass::all();

/// An addressing mode: the operand classes one legal encoding accepts,
/// one entry per operand position.
pub type AddressMode = &'static [OpClass];

impl AsmOp {
    pub fn is_push(self) -> bool {
        self == AsmOp::Push
    }

    pub fn is_pop(self) -> bool {
        self == AsmOp::Pop
    }

    /// Whether this opcode copies its source operand to its destination.
    pub fn is_copy(self) -> bool {
        self == AsmOp::Mov
    }

    /// The addressing modes this instruction accepts.  Spill code picks
    /// the mode that reloads the fewest operands.
    pub fn modes(self) -> &'static [AddressMode] {
        use AsmOp::*;
        match self {
            Add | Cmp | Mov | Sub | Xor => &[&[R, RMI], &[OpClass::M, RI]],
            Movsx | Movzx => &[&[R, RM]],
            Imul => &[&[R, RMI]],
            Idiv => &[&[RM]],
            Push => &[&[RMI]],
            Pop => &[&[RM]],
            Setb | Setbe | Sete | Setl | Setle | Setne | Setz => &[&[RM]],
            Test => &[&[RM, RI]],
            Lea => &[&[R, OpClass::M]],
            Jmp | Jnz | Jz => &[&[ANY]],
            Leave | Ret => &[&[]],
        }
    }
}

/// Index of the source operand of a copy instruction.
pub const COPY_SRC: usize = 1;
/// Index of the destination operand of a copy instruction.
pub const COPY_DST: usize = 0;
