//! Debug dumps of the generator's data structures, printed to standard
//! error when the matching CLI switches are set.

use crate::back::cfg::Cfg;
use crate::back::ig::Ig;
use crate::back::pasm::{PasmOperand, PasmStatement, RegOrSym};
use crate::back::symtab::SymTab;
use crate::common::{Set, SymbolId};

fn names(symtab: &SymTab, ids: impl IntoIterator<Item = SymbolId>) -> String {
    ids.into_iter()
        .map(|id| symtab.get(id).name().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn set_names(symtab: &SymTab, ids: &Set<SymbolId>) -> String {
    names(symtab, ids.iter().copied())
}

pub fn print_symtab(symtab: &SymTab) {
    eprintln!("Symbol table: [{}]", symtab.len());
    for (_, sym) in symtab.iter() {
        eprintln!("  {} {} ({})", sym.ty(), sym.name(), sym.location());
    }
}

fn pasm_operand(symtab: &SymTab, stat: &PasmStatement, i: usize) -> String {
    match stat.operand(i) {
        PasmOperand::Reg(reg) => reg.to_string(),
        PasmOperand::Sym(id) => format!("%{}", symtab.get(id).name()),
        PasmOperand::Offset { base, index } => {
            let idx = match index {
                RegOrSym::Reg(reg) => reg.to_string(),
                RegOrSym::Sym(id) => format!("%{}", symtab.get(id).name()),
            };
            format!("[%{}+{idx}]", symtab.get(base).name())
        }
    }
}

pub fn print_cfg(cfg: &Cfg, symtab: &SymTab) {
    eprintln!("Control flow graph [{}]", cfg.len());
    for i in 0..cfg.len() {
        let blk = cfg.block(i);
        eprintln!("  Block {i}");

        if !blk.labels().is_empty() {
            eprintln!(
                "    Labels: {}",
                names(symtab, blk.labels().iter().copied())
            );
        }
        eprintln!("    Loop depth: {}", blk.depth());

        eprintln!("    Liveness");
        eprintln!("      use: {}", set_names(symtab, blk.use_set()));
        eprintln!("      def: {}", set_names(symtab, blk.def_set()));
        eprintln!("      IN:  {}", set_names(symtab, blk.live_in()));
        eprintln!("      OUT: {}", set_names(symtab, blk.live_out()));

        eprintln!("    IL:");
        for (j, stat) in blk.il().iter().enumerate() {
            eprintln!(
                "    {j} {} {}",
                stat.op,
                stat.args
                    .iter()
                    .map(|&a| symtab.get(a).name().to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            );
        }

        eprintln!("    Pseudo-assembly:");
        for (j, stat) in blk.pasm().iter().enumerate() {
            let ops = (0..stat.op_count())
                .map(|k| pasm_operand(symtab, stat, k))
                .collect::<Vec<_>>()
                .join(",");
            eprintln!("    {j} {} {ops}", stat.op());
            eprintln!("      Live in:  {}", set_names(symtab, stat.live_in()));
            eprintln!("      Live out: {}", set_names(symtab, stat.live_out()));
        }

        let succ: Vec<String> = blk.succ().map(|s| s.to_string()).collect();
        eprintln!("    -> {}", succ.join(" "));
    }
}

pub fn print_ig(ig: &Ig, symtab: &SymTab) {
    eprintln!("Interference graph [{}]", ig.len());
    for i in 0..ig.len() {
        let node = ig.node(i);
        // Omit nodes which were coalesced away
        if node.is_merged() {
            continue;
        }
        eprintln!(
            "  Node {i} {}",
            names(symtab, node.syms().iter().copied())
        );
        eprintln!("    Spill cost {}", node.cost());
        eprintln!(
            "    Neighbors [{}] {}",
            node.neighbors().len(),
            node.neighbors()
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
    }
}
