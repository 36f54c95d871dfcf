//! The line lexer.
//!
//! Input is line oriented: `<opcode> <arg>(,<arg>)*` or a bare opcode.
//! A single space separates the opcode from the first argument;
//! arguments are comma separated with no spaces.  The lexer is a two
//! state machine, reading the opcode until the separating space and the
//! argument text after it.

use crate::error::{ErrorCode, Result};

/// Instruction buffer size, including the terminator slot.
pub const MAX_INSTRUCTION_LEN: usize = 256;
/// Argument buffer size shared by all arguments of one line.
pub const MAX_ARG_LEN: usize = 2048;
/// Maximum arguments on one line.
pub const MAX_ARGS: usize = 256;

/// One lexed line: the opcode text and its argument texts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line<'a> {
    pub opcode: &'a str,
    pub args: Vec<&'a str>,
}

/// Splits one input line into opcode and arguments, enforcing the
/// buffer limits.
pub fn split_line(line: &str) -> Result<Line<'_>> {
    let (opcode, rest) = match line.split_once(' ') {
        Some((op, rest)) => (op, Some(rest)),
        None => (line, None),
    };
    if opcode.len() + 1 > MAX_INSTRUCTION_LEN {
        log::error!(
            "instruction too long: {}...",
            opcode.get(..32).unwrap_or(opcode)
        );
        return Err(ErrorCode::InsBufExceed);
    }

    let mut args = Vec::new();
    if let Some(rest) = rest {
        // All arguments of a line share one bounded buffer
        let mut used = 0;
        for arg in rest.split(',') {
            if args.len() >= MAX_ARGS {
                log::error!("too many arguments on line");
                return Err(ErrorCode::ArgBufExceed);
            }
            used += arg.len() + 1;
            if used > MAX_ARG_LEN {
                log::error!("argument text too long");
                return Err(ErrorCode::ArgBufExceed);
            }
            args.push(arg);
        }
    }
    Ok(Line { opcode, args })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_only() {
        let line = split_line("ret").unwrap();
        assert_eq!(line.opcode, "ret");
        assert!(line.args.is_empty());
    }

    #[test]
    fn opcode_with_args() {
        let line = split_line("add x,y,1").unwrap();
        assert_eq!(line.opcode, "add");
        assert_eq!(line.args, vec!["x", "y", "1"]);
    }

    #[test]
    fn declaration_arg_keeps_inner_space() {
        // Only the first space separates; later spaces belong to the
        // argument text (type-prefixed declarations)
        let line = split_line("def i32 x").unwrap();
        assert_eq!(line.opcode, "def");
        assert_eq!(line.args, vec!["i32 x"]);

        let line = split_line("func f,i32,i32 a,i32 b").unwrap();
        assert_eq!(line.args, vec!["f", "i32", "i32 a", "i32 b"]);
    }

    #[test]
    fn oversized_opcode_rejected() {
        let long = "x".repeat(MAX_INSTRUCTION_LEN);
        assert_eq!(split_line(&long), Err(ErrorCode::InsBufExceed));
    }

    #[test]
    fn oversized_args_rejected() {
        let line = format!("mov {},y", "x".repeat(MAX_ARG_LEN));
        assert_eq!(split_line(&line), Err(ErrorCode::ArgBufExceed));

        let many = format!("mov {}", vec!["a"; MAX_ARGS + 1].join(","));
        assert_eq!(split_line(&many), Err(ErrorCode::ArgBufExceed));
    }
}
