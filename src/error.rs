//! Error kinds surfaced by the code generator.
//!
//! All errors are surfaced to the top; none are recovered locally.  The
//! first error aborts the current function and the process, and the
//! process exit code equals the numeric value of the kind.

use thiserror::Error;

/// Every way a run can fail, in stable numeric order.
///
/// `NoError` exists so that the discriminant doubles as the process exit
/// code on every path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[repr(u8)]
pub enum ErrorCode {
    #[error("NoError")]
    NoError = 0,
    /// Opcode longer than the instruction buffer.
    #[error("InsBufExceed")]
    InsBufExceed = 1,
    /// Argument text longer than the argument buffer, or too many
    /// arguments on one line.
    #[error("ArgBufExceed")]
    ArgBufExceed = 2,
    /// Too many symbols in one function scope.
    #[error("ScopeLenExceed")]
    ScopeLenExceed = 3,
    /// Unrecognized opcode.
    #[error("InvalidIns")]
    InvalidIns = 4,
    /// Malformed operand, e.g. an unparsable declaration.
    #[error("InvalidInsOp")]
    InvalidInsOp = 5,
    /// Jump to a label no block carries.
    #[error("InvalidLabel")]
    InvalidLabel = 6,
    /// Wrong argument count for an opcode.
    #[error("BadArgs")]
    BadArgs = 7,
    /// `main` declared with the wrong shape.
    #[error("BadMain")]
    BadMain = 8,
    #[error("WriteFailed")]
    WriteFailed = 9,
    #[error("SeekFailed")]
    SeekFailed = 10,
    #[error("OutOfMemory")]
    OutOfMemory = 11,
    /// Reference to a name the symbol table does not hold.
    #[error("UnknownSym")]
    UnknownSym = 12,
}

impl ErrorCode {
    /// Numeric value used as the process exit code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

pub type Result<T> = std::result::Result<T, ErrorCode>;

impl From<std::io::Error> for ErrorCode {
    fn from(err: std::io::Error) -> Self {
        log::error!("write failed: {err}");
        ErrorCode::WriteFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::NoError.code(), 0);
        assert_eq!(ErrorCode::InvalidLabel.code(), 6);
        assert_eq!(ErrorCode::UnknownSym.code(), 12);
    }

    #[test]
    fn names_are_stable() {
        assert_eq!(ErrorCode::InvalidIns.to_string(), "InvalidIns");
        assert_eq!(ErrorCode::BadMain.to_string(), "BadMain");
    }
}
