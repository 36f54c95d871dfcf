//! The code generator driver: consumes raw IL statements, builds the
//! control flow graph, and runs each function through instruction
//! selection, register allocation, and emission.

use std::io::Write;

use crate::back::{alloc, debug, emit, inssel, spill};
use crate::back::cfg::Cfg;
use crate::back::ig::Ig;
use crate::back::symtab::{SymTab, ValueCat};
use crate::back::x86::{Location, ARG_SLOTS};
use crate::common::{Name, SymbolId};
use crate::error::{ErrorCode, Result};
use crate::front::parse::{parse_decl, parse_line, RawStatement};
use crate::middle::il::{IlOp, IlStatement};
use crate::middle::types::Type;

/// Which internal dumps to print to standard error.
#[derive(Clone, Copy, Debug, Default)]
pub struct DebugFlags {
    /// Dump the control flow graph after liveness.
    pub print_cfg: bool,
    /// Dump the interference graph after coloring.
    pub print_ig: bool,
    /// Verbose allocator info.
    pub print_info: bool,
    /// Dump the symbol table on exit.
    pub print_symtab: bool,
}

/// Per-run state of the code generator.  Per-function state (symbol
/// table, control flow graph, interference graph) is reset when the
/// next `func` statement arrives.
pub struct Codegen<W: Write> {
    out: W,
    flags: DebugFlags,
    symtab: SymTab,
    cfg: Cfg,
    ig: Ig,
    /// Name of the function currently being read, once one was seen.
    func_name: Option<String>,
}

impl<W: Write> Codegen<W> {
    pub fn new(out: W, flags: DebugFlags) -> Codegen<W> {
        Codegen {
            out,
            flags,
            symtab: SymTab::new(),
            cfg: Cfg::new(),
            ig: Ig::new(),
            func_name: None,
        }
    }

    /// Parses the IL and generates assembly for every function.
    pub fn run(&mut self, input: &str) -> Result<()> {
        for line in input.lines() {
            let raw = parse_line(line)?;
            self.statement(raw)?;
        }
        // End of input finalizes the last function
        self.finish_func()?;

        if self.flags.print_symtab {
            debug::print_symtab(&self.symtab);
        }
        self.out.flush()?;
        Ok(())
    }

    fn statement(&mut self, raw: RawStatement) -> Result<()> {
        match raw.op {
            IlOp::Def => {
                let (ty, name) = parse_decl(raw.args[0])?;
                self.symtab.add(ty, name, ValueCat::Lvalue)?;
                Ok(())
            }
            IlOp::Func => self.begin_func(&raw.args),
            IlOp::Lab => self.label(raw.args[0]),
            op => {
                debug_assert!(op.in_cfg());
                if self.cfg.is_empty() {
                    log::error!("{op} statement outside a function");
                    return Err(ErrorCode::InvalidIns);
                }
                let mut args = Vec::with_capacity(raw.args.len());
                for &arg in &raw.args {
                    args.push(self.symtab.lookup(arg)?);
                }
                self.cfg.append_latest(IlStatement { op, args });

                // The statement is appended first, then the block after
                // it is opened.  Fall-through links exist only for
                // conditional jumps.
                match op {
                    IlOp::Jmp | IlOp::Ret => {
                        self.cfg.new_block();
                    }
                    IlOp::Jnz | IlOp::Jz => {
                        self.cfg.link_new_block();
                    }
                    _ => {}
                }
                Ok(())
            }
        }
    }

    fn label(&mut self, name: &str) -> Result<()> {
        if self.cfg.is_empty() {
            log::error!("lab statement outside a function");
            return Err(ErrorCode::InvalidIns);
        }
        let Some(lab) = self.symtab.find(name) else {
            log::error!("cannot find label {name}");
            return Err(ErrorCode::UnknownSym);
        };
        // Consecutive labels share one block
        if self.cfg.latest_has_il() {
            self.cfg.link_new_block();
        }
        let tail = self.cfg.len() - 1;
        self.cfg.block_mut(tail).add_label(lab);
        Ok(())
    }

    /// Finalizes the previous function, resets per-function state, and
    /// records the new function's name and parameters.
    fn begin_func(&mut self, args: &[&str]) -> Result<()> {
        self.finish_func()?;
        self.symtab.clear();
        self.cfg.clear();
        self.ig.clear();
        self.cfg.new_block();

        let name = args[0];
        let is_main = name == "main";
        if is_main && args.len() != 4 {
            log::error!("main requires name, return type, argc, argv");
            return Err(ErrorCode::BadMain);
        }

        let ret = Type::parse(args[1])?;
        self.symtab.add(
            Type::function(ret),
            Name::from(name.to_string()),
            ValueCat::NonLvalue,
        )?;

        // Parameters arrive in the System V integer argument registers
        for (i, decl) in args[2..].iter().enumerate() {
            let Some(&slot) = ARG_SLOTS.get(i) else {
                log::error!("too many parameters for {name}");
                return Err(ErrorCode::BadArgs);
            };
            let (ty, pname) = parse_decl(decl)?;
            let id = self.symtab.add(ty, pname, ValueCat::Lvalue)?;
            self.symtab.get_mut(id).set_location(Location::Slot(slot));
        }

        if is_main {
            emit::emit_start_shim(&mut self.out)?;
        }
        self.func_name = Some(name.to_string());
        Ok(())
    }

    /// Runs the pipeline over the function read so far and emits its
    /// assembly.  Does nothing before the first `func`.
    fn finish_func(&mut self) -> Result<()> {
        let Some(name) = self.func_name.take() else {
            return Ok(());
        };
        self.cfg.link_jump_dest(&self.symtab)?;
        self.select_instructions()?;
        self.allocate_registers();
        emit::peephole(&mut self.cfg, &self.symtab);
        spill::insert_spill_code(&mut self.cfg, &self.symtab);
        emit::emit_function(&self.cfg, &self.symtab, &name, &mut self.out)?;
        Ok(())
    }

    /// Expands every IL statement in every block into pseudo-assembly.
    fn select_instructions(&mut self) -> Result<()> {
        for i in 0..self.cfg.len() {
            for j in 0..self.cfg.block(i).il().len() {
                let stat = self.cfg.block(i).il()[j].clone();
                let case = inssel::find_case(&stat, &self.symtab).unwrap_or_else(|| {
                    panic!(
                        "no instruction selection case for {} {}",
                        stat.op,
                        self.statement_args(&stat)
                    )
                });
                let pasm = inssel::expand(case, &stat, &mut self.symtab)?;
                for p in pasm {
                    self.cfg.block_mut(i).push_pasm(p);
                }
            }
        }
        Ok(())
    }

    fn statement_args(&self, stat: &IlStatement) -> String {
        stat.args
            .iter()
            .map(|&a: &SymbolId| self.symtab.get(a).name().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Computes the register assignment for every symbol.
    fn allocate_registers(&mut self) {
        self.cfg.compute_liveness(&self.symtab);
        self.cfg.compute_loop_depth();
        if self.flags.print_cfg {
            debug::print_cfg(&self.cfg, &self.symtab);
        }

        self.ig.create_nodes(&self.symtab);
        self.ig.compute_edges(&self.cfg, &self.symtab);

        // Precoloring must finish before any coalescing, or a symbol
        // that belongs on the stack can be coalesced into a register
        // first
        alloc::precolor(&mut self.cfg, &mut self.symtab);
        alloc::coalesce_and_score(
            &self.cfg,
            &mut self.ig,
            &mut self.symtab,
            self.flags.print_info,
        );
        alloc::compute_spill_cost(&self.cfg, &mut self.ig, &self.symtab);
        alloc::color(&self.ig, &mut self.symtab);

        if self.flags.print_ig {
            debug::print_ig(&self.ig, &self.symtab);
        }
    }
}

/// Generates assembly for a whole IL input into `out`.
pub fn generate(input: &str, out: &mut impl Write, flags: DebugFlags) -> Result<()> {
    Codegen::new(out, flags).run(input)
}
