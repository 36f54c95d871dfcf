//! The back end: x86-64 pseudo-assembly, analysis, register allocation,
//! and emission.

pub mod alloc;
pub mod cfg;
pub mod codegen;
pub mod debug;
pub mod emit;
pub mod ig;
pub mod inssel;
pub mod pasm;
pub mod spill;
pub mod symtab;
pub mod x86;

pub use codegen::{generate, Codegen, DebugFlags};
