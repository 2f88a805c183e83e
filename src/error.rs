//! Fatal error taxonomy.
//!
//! The reference compiler this is modeled on reports these conditions
//! by unwinding through a C `longjmp`; a single-pass Rust compiler has
//! no equivalent and instead returns `Result<_, Error>` from every
//! fallible entry point, which the caller (the parser, in the full
//! front end) propagates with `?`. Every variant here is something a
//! user's source program can trigger — none of them are internal
//! invariant violations, which are `debug_assert!`s elsewhere in this
//! crate instead.

use span::Line;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError, PartialEq, Eq, Clone)]
pub enum Error {
  #[error("function body uses more than 255 registers")]
  TooManyRegisters,

  #[error("function has more than 2^18 constants")]
  TooManyConstants,

  #[error("function has more than 255 local variables")]
  TooManyLocalVariables,

  #[error("function has more than 255 upvalues")]
  TooManyUpvalues,

  #[error("function has more than 255 parameters")]
  TooManyParams,

  #[error("functions nested too deeply")]
  FunctionNestingTooDeep,

  #[error("table constructor has too many fields for a single batch and overflowed Ax encoding")]
  ConstructorFieldOverflow,

  #[error("break statement outside of a loop")]
  BreakOutsideLoop,

  #[error("chunk has more than 2^18 instructions")]
  CodeTooLong,

  #[error("control structure too long")]
  ControlStructureTooLong,
}

/// Errors the chunk loader (`bytecode::undump`) can raise when the
/// byte stream it is handed is not a well-formed dump produced by
/// [`crate::bytecode::dump`].
#[derive(Debug, ThisError, PartialEq, Eq, Clone)]
pub enum LoadError {
  #[error("not a bytecode chunk: bad signature")]
  BadSignature,

  #[error("bytecode version mismatch: expected {expected:#04x}, found {found:#04x}")]
  VersionMismatch { expected: u8, found: u8 },

  #[error("bytecode format mismatch: expected {expected:#04x}, found {found:#04x}")]
  FormatMismatch { expected: u8, found: u8 },

  #[error("bytecode was produced on an incompatible platform (size markers differ)")]
  IncompatiblePlatform,

  #[error("corrupt bytecode: {0}")]
  Corrupt(&'static str),

  #[error("unexpected end of bytecode stream")]
  UnexpectedEof,
}

impl From<std::io::Error> for LoadError {
  fn from(_: std::io::Error) -> Self {
    LoadError::UnexpectedEof
  }
}

/// A fatal compile error together with the source line it occurred on,
/// rendered by [`weft_diag`] for user-facing output.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct LocatedError {
  pub line: Line,
  pub error: Error,
}

impl LocatedError {
  pub fn new(line: impl Into<Line>, error: Error) -> Self {
    LocatedError {
      line: line.into(),
      error,
    }
  }

  /// Render this error the way an embedder (REPL, CLI, test harness)
  /// should show it to a user, handing formatting off to `weft_diag`
  /// rather than this crate's own `Display` impl.
  pub fn to_report(&self) -> diag::Report {
    diag::Report::error()
      .message(self.error.to_string())
      .line(self.line)
      .build()
  }
}

impl std::fmt::Display for LocatedError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} (line {})", self.error, self.line)
  }
}

impl std::error::Error for LocatedError {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn located_error_displays_line() {
    let e = LocatedError::new(12, Error::TooManyRegisters);
    assert_eq!(
      e.to_string(),
      "function body uses more than 255 registers (line 12)"
    );
  }

  #[test]
  fn version_mismatch_formats_hex() {
    let e = LoadError::VersionMismatch {
      expected: 0x53,
      found: 0x01,
    };
    assert_eq!(
      e.to_string(),
      "bytecode version mismatch: expected 0x53, found 0x01"
    );
  }

  #[test]
  fn to_report_carries_the_line_through() {
    let e = LocatedError::new(12, Error::BreakOutsideLoop);
    let rendered = e.to_report().emit_to_string().unwrap();
    assert!(rendered.contains("break statement outside of a loop"));
    assert!(rendered.contains("line 12"));
  }
}
