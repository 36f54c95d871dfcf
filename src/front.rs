//! The front end: reading textual IL into raw statements.

pub mod lex;
pub mod parse;

pub use lex::*;
pub use parse::*;
