pub mod opcode;
pub mod operands;

pub use opcode::Op;
pub use operands::{
  bx_to_sbx, is_rk_constant, rk_constant, rk_index, sbx_to_bx, Word, MAXARG_A, MAXARG_AX,
  MAXARG_B, MAXARG_BX, MAXARG_C, MAXARG_SBX, MAXINDEXRK, NO_JUMP, RK_FLAG,
};

/// One emitted instruction: an opcode paired with its packed operand
/// word. `Op` is kept alongside the raw `Word` (rather than re-derived
/// from it on every access) because the emitter and jump-patch code
/// need to branch on opcode identity constantly and a bare `u32 -> Op`
/// decode on every access would be wasteful for no benefit, since the
/// two are always constructed together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
  pub op: Op,
  pub word: Word,
}

impl Instruction {
  #[inline]
  pub fn abc(op: Op, a: u32, b: u32, c: u32) -> Self {
    Instruction {
      op,
      word: Word::abc(op as u32, a, b, c),
    }
  }

  #[inline]
  pub fn abx(op: Op, a: u32, bx: u32) -> Self {
    Instruction {
      op,
      word: Word::abx(op as u32, a, bx),
    }
  }

  #[inline]
  pub fn asbx(op: Op, a: u32, sbx: i32) -> Self {
    Instruction {
      op,
      word: Word::asbx(op as u32, a, sbx),
    }
  }

  #[inline]
  pub fn ax(op: Op, ax: u32) -> Self {
    Instruction {
      op,
      word: Word::ax(op as u32, ax),
    }
  }

  #[inline]
  pub fn a(&self) -> u32 {
    self.word.a()
  }
  #[inline]
  pub fn b(&self) -> u32 {
    self.word.b()
  }
  #[inline]
  pub fn c(&self) -> u32 {
    self.word.c()
  }
  #[inline]
  pub fn bx(&self) -> u32 {
    self.word.bx()
  }
  #[inline]
  pub fn sbx(&self) -> i32 {
    self.word.sbx()
  }
  #[inline]
  pub fn ax_field(&self) -> u32 {
    self.word.ax_field()
  }

  #[inline]
  pub fn set_a(&mut self, a: u32) {
    self.word.set_a(a);
  }
  #[inline]
  pub fn set_b(&mut self, b: u32) {
    self.word.set_b(b);
  }
  #[inline]
  pub fn set_c(&mut self, c: u32) {
    self.word.set_c(c);
  }
  #[inline]
  pub fn set_sbx(&mut self, sbx: i32) {
    self.word.set_sbx(sbx);
  }

  /// Encode the raw 32-bit word as little-endian bytes, the wire layout
  /// used by the dump/undump format.
  pub fn to_le_bytes(self) -> [u8; 4] {
    self.word.0.to_le_bytes()
  }

  pub fn from_parts(op: u32, raw: u32) -> Option<Self> {
    let op = Op::from_u32(op)?;
    Some(Instruction { op, word: Word(raw) })
  }
}
