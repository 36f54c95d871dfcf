//! The machine-independent model of the intermediate language.

pub mod il;
pub mod types;

pub use il::*;
pub use types::*;
