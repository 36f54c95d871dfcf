//! The code generator binary: reads a textual IL file and writes x86-64
//! assembly.
//!
//! Run with `--help` for more info.

use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;

use clap::Parser;

use ilc::back::{generate, DebugFlags};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input IL file
    file: String,
    /// the output assembly file
    #[arg(short, default_value = "imm3")]
    o: String,
    /// dump the control flow graph after liveness
    #[arg(long = "dprint-cfg", default_value_t = false)]
    dprint_cfg: bool,
    /// dump the interference graph after coloring
    #[arg(long = "dprint-ig", default_value_t = false)]
    dprint_ig: bool,
    /// verbose allocator info
    #[arg(long = "dprint-info", default_value_t = false)]
    dprint_info: bool,
    /// dump the symbol table on exit
    #[arg(long = "dprint-symtab", default_value_t = false)]
    dprint_symtab: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let input = match std::fs::read_to_string(&args.file) {
        Ok(input) => input,
        Err(err) => {
            eprintln!("failed to open input file {}: {err}", args.file);
            return ExitCode::FAILURE;
        }
    };
    let out = match File::create(&args.o) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("failed to open output file {}: {err}", args.o);
            return ExitCode::FAILURE;
        }
    };

    let flags = DebugFlags {
        print_cfg: args.dprint_cfg,
        print_ig: args.dprint_ig,
        print_info: args.dprint_info,
        print_symtab: args.dprint_symtab,
    };

    // On error, partial output may have been written and is invalid
    let mut writer = BufWriter::new(out);
    match generate(&input, &mut writer, flags) {
        Ok(()) => ExitCode::SUCCESS,
        Err(ecode) => {
            eprintln!("error during parsing: {} {ecode}", ecode.code());
            ExitCode::from(ecode.code())
        }
    }
}
