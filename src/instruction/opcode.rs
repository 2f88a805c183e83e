//! The fixed opcode set this code generator emits.
//!
//! Each opcode is annotated with which instruction format it uses and
//! whether it is a "T-mode" test instruction, i.e. one that is always
//! immediately followed by exactly one `JMP` and controls whether that
//! jump is taken (spec §4.4, "Control-jump semantics").

macro_rules! opcodes {
  ( $( $name:ident => $display:literal ),+ $(,)? ) => {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    #[repr(u32)]
    pub enum Op {
      $( $name, )+
    }

    impl Op {
      pub const COUNT: usize = [ $( stringify!($name) ),+ ].len();

      pub fn name(self) -> &'static str {
        match self {
          $( Op::$name => $display, )+
        }
      }

      pub fn from_u32(v: u32) -> Option<Op> {
        const TABLE: &[Op] = &[ $( Op::$name ),+ ];
        TABLE.get(v as usize).copied()
      }
    }
  };
}

opcodes! {
  // loads/moves
  Move => "MOVE", LoadK => "LOADK", LoadKx => "LOADKX",
  LoadBool => "LOADBOOL", LoadNil => "LOADNIL",
  // upvalues / tables / globals-as-upvalue(_ENV)
  GetUpval => "GETUPVAL", SetUpval => "SETUPVAL",
  GetTabUp => "GETTABUP", SetTabUp => "SETTABUP",
  GetTable => "GETTABLE", SetTable => "SETTABLE",
  NewTable => "NEWTABLE", SelfOp => "SELF",
  // arithmetic (binary, RK operands)
  Add => "ADD", Sub => "SUB", Mul => "MUL", Mod => "MOD", Pow => "POW",
  Div => "DIV", IDiv => "IDIV",
  BAnd => "BAND", BOr => "BOR", BXor => "BXOR", Shl => "SHL", Shr => "SHR",
  // unary (register/accumulator operand)
  Unm => "UNM", BNot => "BNOT", Not => "NOT", Len => "LEN",
  // string
  Concat => "CONCAT",
  // control flow
  Jmp => "JMP", Eq => "EQ", Lt => "LT", Le => "LE",
  Test => "TEST", TestSet => "TESTSET",
  // calls / returns / varargs
  Call => "CALL", TailCall => "TAILCALL", Return => "RETURN", Vararg => "VARARG",
  // closures
  Closure => "CLOSURE",
  // table constructor batching
  SetList => "SETLIST",
  // extended-immediate payload for LoadKx / SetList with an oversized
  // flush index
  ExtraArg => "EXTRAARG",
}

impl Op {
  /// True for the handful of opcodes that are always immediately
  /// followed by a `JMP` and control whether it is taken.
  pub fn is_test_mode(self) -> bool {
    matches!(self, Op::Eq | Op::Lt | Op::Le | Op::Test | Op::TestSet)
  }

}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_match_mnemonics() {
    assert_eq!(Op::LoadK.name(), "LOADK");
    assert_eq!(Op::TestSet.name(), "TESTSET");
    assert_eq!(Op::SelfOp.name(), "SELF");
  }

  #[test]
  fn from_u32_roundtrips_all_opcodes() {
    for i in 0..Op::COUNT as u32 {
      let op = Op::from_u32(i).unwrap();
      assert_eq!(op as u32, i);
    }
    assert!(Op::from_u32(Op::COUNT as u32).is_none());
  }

  #[test]
  fn test_mode_opcodes_match_spec() {
    assert!(Op::TestSet.is_test_mode());
    assert!(!Op::Jmp.is_test_mode());
  }
}
