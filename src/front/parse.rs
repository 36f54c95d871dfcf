//! The statement parser: opcode lookup, arity checking, and declaration
//! parsing.

use crate::common::Name;
use crate::error::{ErrorCode, Result};
use crate::front::lex;
use crate::middle::il::IlOp;
use crate::middle::types::Type;

/// One parsed statement, arguments still textual.
#[derive(Clone, Debug)]
pub struct RawStatement<'a> {
    pub op: IlOp,
    pub args: Vec<&'a str>,
}

/// Parses one input line into a raw statement.
pub fn parse_line(line: &str) -> Result<RawStatement<'_>> {
    let lexed = lex::split_line(line)?;
    let op = IlOp::from_str(lexed.opcode).ok_or_else(|| {
        log::error!("unrecognized instruction {}", lexed.opcode);
        ErrorCode::InvalidIns
    })?;
    op.check_arity(lexed.args.len())?;
    Ok(RawStatement {
        op,
        args: lexed.args,
    })
}

/// Extracts the type and the name from a declaration argument,
/// formatted `<typename>[*...][\[N\]] <identifier>`.
pub fn parse_decl(arg: &str) -> Result<(Type, Name)> {
    let Some((ty, name)) = arg.split_once(' ') else {
        log::error!("declaration without a name: {arg}");
        return Err(ErrorCode::InvalidInsOp);
    };
    if name.is_empty() || name.contains(' ') {
        log::error!("malformed declaration name: {arg}");
        return Err(ErrorCode::InvalidInsOp);
    }
    let ty = Type::parse(ty).map_err(|e| {
        log::error!("malformed declaration type: {arg}");
        e
    })?;
    Ok((ty, Name::from(name.to_string())))
}
