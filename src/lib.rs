//! Single-pass register-based code generator for a dynamically-typed
//! scripting language.
//!
//! This crate is the middle of a three-stage front end (lexer → parser
//! → codegen) and is usable on its own: a caller drives [`Compiler`]
//! the way a recursive-descent parser would, one expression fragment
//! at a time, and reads the finished [`proto::Prototype`] back out.
//! Lexing, parsing, string interning, and execution are all out of
//! scope and expected to live in sibling crates.

pub mod bytecode;
pub mod emit;
pub mod error;
pub mod instruction;
pub mod proto;
pub mod value;

use beef::lean::Cow;
use span::Line;

use emit::FuncBuilder;
use error::{Error, LocatedError};
use proto::{Prototype, UpvalDesc};

/// Drives code generation for one compilation unit (one chunk and
/// every function literal nested inside it), owning the stack of
/// [`FuncBuilder`]s that represents "which function body is currently
/// being emitted into."
pub struct Compiler<'src> {
  stack: Vec<FuncBuilder<'src>>,
  source: Cow<'src, str>,
}

/// Hard cap on how many function literals may be nested inside one
/// another before compilation gives up rather than risk overflowing
/// the host stack walking that nesting recursively (`resolve_upvalue`
/// recurses one frame per enclosing function). Disabled by the
/// `check-recursion-limit` feature being turned off, for embedders
/// that have already bounded nesting depth in their own parser.
#[cfg(feature = "check-recursion-limit")]
const MAX_FUNCTION_NESTING: usize = 200;

impl<'src> Compiler<'src> {
  pub fn new(source: impl Into<Cow<'src, str>>) -> Self {
    Compiler {
      stack: Vec::new(),
      source: source.into(),
    }
  }

  /// Begin a chunk or function literal. The outermost call (for the
  /// chunk itself) implicitly declares the `_ENV` upvalue every global
  /// access is compiled as indexing into.
  pub fn enter_function(
    &mut self,
    num_params: u8,
    is_vararg: bool,
    line_defined: Line,
  ) -> Result<(), LocatedError> {
    #[cfg(feature = "check-recursion-limit")]
    if self.stack.len() >= MAX_FUNCTION_NESTING {
      return Err(LocatedError::new(line_defined, Error::FunctionNestingTooDeep));
    }
    let mut f = FuncBuilder::new(num_params, is_vararg, self.source.clone(), line_defined);
    if self.stack.is_empty() {
      f.add_upvalue(
        "_ENV",
        UpvalDesc {
          in_stack: true,
          index: 0,
        },
      )
      .map_err(|e| LocatedError::new(line_defined, e))?;
    }
    self.stack.push(f);
    Ok(())
  }

  /// Current (innermost) function's builder, for the parser to drive
  /// expression/statement lowering through.
  pub fn current(&mut self) -> &mut FuncBuilder<'src> {
    self.stack.last_mut().expect("enter_function was not called")
  }

  /// Finish the innermost function, registering its prototype in the
  /// enclosing function's nested-prototype vector (or, for the
  /// outermost call, returning it as the chunk's main prototype).
  pub fn leave_function(&mut self, last_line: Line) -> Result<Option<Prototype<'src>>, LocatedError> {
    let mut f = self.stack.pop().expect("enter_function was not called");
    f.set_last_line(last_line);
    let proto = f.finish();
    match self.stack.last_mut() {
      Some(parent) => {
        parent
          .add_proto(proto)
          .map_err(|e| LocatedError::new(last_line, e))?;
        Ok(None)
      }
      None => Ok(Some(proto)),
    }
  }

  pub fn depth(&self) -> usize {
    self.stack.len()
  }
}
