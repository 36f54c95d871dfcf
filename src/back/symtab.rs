//! The symbol table: name, type, value category, and assigned storage
//! location for every symbol of the function being generated.
//!
//! Symbols live from the statement that introduces them until
//! `clear`, which resets the table together with the rest of the
//! per-function state.

use crate::back::x86::{Location, Register};
use crate::common::{Name, SymbolId};
use crate::error::{ErrorCode, Result};
use crate::middle::types::{Type, TypeSpec};

/// Max symbols per function scope.
pub const MAX_SCOPE_LEN: usize = 500;

/// Value category a symbol was declared with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueCat {
    Lvalue,
    NonLvalue,
}

#[derive(Clone, Debug)]
pub struct Symbol {
    name: Name,
    ty: Type,
    vc: ValueCat,
    loc: Location,
}

/// Returns whether a symbol name denotes a numeric constant.
/// `-` covers negative numbers.
pub fn name_is_constant(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_digit() || c == '-')
}

impl Symbol {
    pub fn name(&self) -> Name {
        self.name
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn value_cat(&self) -> ValueCat {
        self.vc
    }

    pub fn location(&self) -> Location {
        self.loc
    }

    pub fn set_location(&mut self, loc: Location) {
        self.loc = loc;
    }

    pub fn bytes(&self) -> u32 {
        self.ty.bytes()
    }

    /// The register holding this symbol, at the symbol's width.
    pub fn register(&self) -> Register {
        match self.loc {
            Location::Slot(slot) => Register::new(slot, self.bytes() as u8),
            other => panic!("symbol {} not in a register ({other})", self.name),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.loc == Location::Constant
    }

    pub fn is_label(&self) -> bool {
        self.ty == Type::label() && !self.ty.is_array()
    }

    /// Whether the symbol is a variable which requires storage.
    pub fn is_var(&self) -> bool {
        !self.is_label() && !self.is_constant() && !self.ty.is_function()
    }
}

/// Symbol table for the function currently being generated; earliest
/// symbol first.
#[derive(Debug, Default)]
pub struct SymTab {
    syms: Vec<Symbol>,
    /// Used to create unique compiler generated symbols.
    temp_num: u32,
}

impl SymTab {
    pub fn new() -> SymTab {
        SymTab::default()
    }

    pub fn clear(&mut self) {
        self.syms.clear();
        self.temp_num = 0;
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.syms[id.index()]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.syms[id.index()]
    }

    pub fn is_var(&self, id: SymbolId) -> bool {
        self.get(id).is_var()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.syms
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    /// Adds a symbol, erroring if the scope is full.  Duplicate names are
    /// a front-end defect.
    pub fn add(&mut self, ty: Type, name: Name, vc: ValueCat) -> Result<SymbolId> {
        debug_assert!(self.find(name.as_str()).is_none(), "duplicate symbol {name}");
        if self.syms.len() >= MAX_SCOPE_LEN {
            log::error!("too many symbols in scope adding {name}");
            return Err(ErrorCode::ScopeLenExceed);
        }
        // Arrays are addressed through memory operands, so they always
        // get a stack home.
        let loc = if ty.is_array() {
            Location::Stack
        } else {
            Location::None
        };
        self.syms.push(Symbol { name, ty, vc, loc });
        Ok(SymbolId(self.syms.len() as u32 - 1))
    }

    /// Creates a new compiler generated symbol of the given type.
    pub fn add_temporary(&mut self, ty: Type) -> Result<SymbolId> {
        // Double t marks names minted by the assembly generator
        let name = Name::from(format!("__tt{}", self.temp_num));
        self.temp_num += 1;
        self.add(ty, name, ValueCat::NonLvalue)
    }

    pub fn find(&self, name: &str) -> Option<SymbolId> {
        self.syms
            .iter()
            .position(|s| s.name.as_str() == name)
            .map(|i| SymbolId(i as u32))
    }

    /// Resolves a name to a symbol handle.  Constants always exist: they
    /// are added to the table on first reference.
    pub fn lookup(&mut self, name: &str) -> Result<SymbolId> {
        if let Some(id) = self.find(name) {
            return Ok(id);
        }
        if name_is_constant(name) {
            // Size of the constant is not computed; assume integer
            let id = self.add(
                Type::scalar(TypeSpec::I32),
                Name::from(name.to_string()),
                ValueCat::NonLvalue,
            )?;
            self.get_mut(id).set_location(Location::Constant);
            return Ok(id);
        }
        log::error!("cannot find symbol {name}");
        Err(ErrorCode::UnknownSym)
    }

    /// Offset from the base pointer to access a stack-resident symbol.
    pub fn stack_offset(&self, id: SymbolId) -> i32 {
        let mut offset = 0i32;
        for sym in &self.syms[..=id.index()] {
            if sym.loc == Location::Stack {
                offset -= sym.bytes() as i32;
            }
        }
        offset
    }

    /// Total bytes of stack the current function reserves.
    pub fn stack_bytes(&self) -> u32 {
        self.syms
            .iter()
            .filter(|s| s.loc == Location::Stack)
            .map(Symbol::bytes)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::x86::Slot;

    fn name(s: &str) -> Name {
        Name::from(s.to_string())
    }

    fn tab_with(names: &[(&str, &str)]) -> SymTab {
        let mut tab = SymTab::new();
        for (ty, n) in names {
            tab.add(Type::parse(ty).unwrap(), name(n), ValueCat::Lvalue)
                .unwrap();
        }
        tab
    }

    #[test]
    fn constants_are_deduplicated() {
        let mut tab = SymTab::new();
        let a = tab.lookup("42").unwrap();
        let b = tab.lookup("42").unwrap();
        assert_eq!(a, b);
        assert!(tab.get(a).is_constant());
        assert!(!tab.get(a).is_var());

        let n = tab.lookup("-7").unwrap();
        assert!(tab.get(n).is_constant());
    }

    #[test]
    fn unknown_names_error() {
        let mut tab = SymTab::new();
        assert_eq!(tab.lookup("ghost"), Err(ErrorCode::UnknownSym));
    }

    #[test]
    fn labels_and_vars() {
        let tab = tab_with(&[("void", "l0"), ("i32", "x")]);
        let l = tab.find("l0").unwrap();
        let x = tab.find("x").unwrap();
        assert!(tab.get(l).is_label());
        assert!(!tab.get(l).is_var());
        assert!(tab.get(x).is_var());
    }

    #[test]
    fn stack_offsets_accumulate() {
        let mut tab = tab_with(&[("i32", "a"), ("i64", "b"), ("i16", "c")]);
        for n in ["a", "b", "c"] {
            let id = tab.find(n).unwrap();
            tab.get_mut(id).set_location(Location::Stack);
        }
        assert_eq!(tab.stack_offset(tab.find("a").unwrap()), -4);
        assert_eq!(tab.stack_offset(tab.find("b").unwrap()), -12);
        assert_eq!(tab.stack_offset(tab.find("c").unwrap()), -14);
        assert_eq!(tab.stack_bytes(), 14);
    }

    #[test]
    fn register_access_uses_symbol_width() {
        let mut tab = tab_with(&[("i32", "x")]);
        let x = tab.find("x").unwrap();
        tab.get_mut(x).set_location(Location::Slot(Slot::Di));
        assert_eq!(tab.get(x).register().name(), "edi");
    }

    #[test]
    fn arrays_start_on_the_stack() {
        let tab = tab_with(&[("i32[8]", "arr")]);
        let a = tab.find("arr").unwrap();
        assert_eq!(tab.get(a).location(), Location::Stack);
        assert_eq!(tab.get(a).bytes(), 32);
    }

    #[test]
    fn temporaries_get_fresh_names() {
        let mut tab = SymTab::new();
        let t0 = tab.add_temporary(Type::parse("i32").unwrap()).unwrap();
        let t1 = tab.add_temporary(Type::parse("i32").unwrap()).unwrap();
        assert_ne!(t0, t1);
        assert_eq!(tab.get(t0).name().as_str(), "__tt0");
        assert_eq!(tab.get(t1).name().as_str(), "__tt1");
    }
}
