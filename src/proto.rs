//! The finished function prototype, and the debug-info side tables
//! that ride along with it through the dump/undump wire format.
//!
//! The codegen builds a [`Prototype`] bottom-up: nested functions
//! finish (and are pushed onto `protos`) before the enclosing
//! function's own `RETURN` is emitted, so by the time a `Prototype` is
//! constructed every field is already final — there is no "under
//! construction" variant of this type itself; `emit::FuncBuilder` is
//! the under-construction state and this is what it resolves into.

use span::Line;

use crate::instruction::Instruction;
use crate::value::Constant;

/// One upvalue slot on a child prototype, recording where the parent
/// should capture it from: either one of the parent's own active
/// locals (`in_stack = true`, `index` is a register) or one of the
/// parent's own upvalues (`in_stack = false`, `index` is an upvalue
/// index). This is `lundump.c`'s `(instack, idx)` pair, carried on the
/// child rather than as trailing `CLOSURE`-adjacent pseudo-instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpvalDesc {
  pub in_stack: bool,
  pub index: u8,
}

/// Debug-only record of a local variable's name and the instruction
/// range over which its register held that variable. Unused by the
/// VM; kept purely for the disassembler and for round-tripping the
/// dump format, which allocates space for it (§6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVarInfo<'src> {
  pub name: beef::lean::Cow<'src, str>,
  pub start_pc: u32,
  pub end_pc: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prototype<'src> {
  pub source: beef::lean::Cow<'src, str>,
  pub line_defined: Line,
  pub last_line_defined: Line,
  pub num_params: u8,
  pub is_vararg: bool,
  pub max_stack_size: u8,

  pub code: Vec<Instruction>,
  pub lines: Vec<Line>,
  pub constants: Vec<Constant<'src>>,
  pub protos: Vec<Prototype<'src>>,
  pub upvalues: Vec<UpvalDesc>,
  pub upvalue_names: Vec<beef::lean::Cow<'src, str>>,
  pub locals: Vec<LocalVarInfo<'src>>,
}

impl<'src> Prototype<'src> {
  /// The `nparams + (1 if is_vararg)`-adjusted lower bound every
  /// register allocation must respect (spec §4.1): parameters occupy
  /// registers `0..num_params` before any code runs.
  pub fn param_registers(&self) -> u8 {
    self.num_params
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn empty_proto() -> Prototype<'static> {
    Prototype {
      source: beef::lean::Cow::borrowed("test"),
      line_defined: Line(0),
      last_line_defined: Line(0),
      num_params: 2,
      is_vararg: false,
      max_stack_size: 2,
      code: Vec::new(),
      lines: Vec::new(),
      constants: Vec::new(),
      protos: Vec::new(),
      upvalues: Vec::new(),
      upvalue_names: Vec::new(),
      locals: Vec::new(),
    }
  }

  #[test]
  fn param_registers_matches_num_params() {
    assert_eq!(empty_proto().param_registers(), 2);
  }
}
