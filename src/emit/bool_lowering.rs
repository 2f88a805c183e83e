//! Short-circuit boolean lowering.
//!
//! `and`/`or`/`not` and the relational operators never unconditionally
//! compute a boolean value in a register: they thread jump lists
//! (§4.6) that later discharge into a register only if some later
//! consumer actually needs one (an `if`/`while` condition never does —
//! it just needs the jumps). `goiftrue`/`goiffalse` are the two
//! entry points the parser calls while lowering `and`/`or`;
//! `jumponcond` is the shared primitive both build on.

use span::Line;

use super::desc::{ExpDesc, Kind};
use super::jumps;
use super::FuncBuilder;
use crate::error::Error;
use crate::instruction::{Op, NO_JUMP};

impl<'src> FuncBuilder<'src> {
  /// Emit the conditional-jump pair (a test instruction plus the `JMP`
  /// that follows it) that jumps when `e`'s value, interpreted as a
  /// boolean, equals `cond`. Reuses an existing `NOT e'` compilation by
  /// stripping the `NOT` and inverting the condition instead of
  /// testing the negated value, matching the reference compiler's
  /// `jumponcond`.
  fn jumponcond(&mut self, e: &mut ExpDesc, cond: bool, line: Line) -> Result<i32, Error> {
    if let Kind::Relocable(pc) = e.kind {
      if pc as usize + 1 == self.code_slice().len() && self.code_slice()[pc as usize].op == Op::Not
      {
        let operand = self.code_slice()[pc as usize].b();
        self.pop_last_instruction();
        return self.cond_jump(Op::Test, 0, operand, (!cond) as u32, line);
      }
    }
    let reg = self.exp2anyreg(e, line)?;
    self.free_exp_reg(reg);
    self.cond_jump(Op::TestSet, jumps::NO_REG, reg as u32, cond as u32, line)
  }

  fn free_exp_reg(&mut self, reg: u8) {
    if reg >= self.regs().nactvar() {
      self.regs_mut().free_reg(reg);
    }
  }

  /// Emit `op a b c` followed immediately by an unresolved `JMP`,
  /// returning the `JMP`'s pc (the standard "test, then branch on it"
  /// pairing every T-mode opcode uses).
  fn cond_jump(&mut self, op: Op, a: u32, b: u32, c: u32, line: Line) -> Result<i32, Error> {
    self.code_abc(op, a, b, c, line)?;
    self.jump(line)
  }

  /// Lower the left side of `and`: if `e` is false, short-circuit
  /// straight to the end of the `and` chain (threaded onto `e.f`);
  /// otherwise fall through into the right-hand side. Matches
  /// `luaK_goiftrue`.
  pub fn goiftrue(&mut self, e: &mut ExpDesc, line: Line) -> Result<(), Error> {
    self.discharge_vars(e, line)?;
    let pc = match e.kind {
      Kind::Constant(_) | Kind::Bool(true) => NO_JUMP,
      Kind::JumpValue(pc) => {
        jumps::invert_jump_condition(self.code_slice_mut(), pc - 1);
        pc
      }
      _ => self.jumponcond(e, false, line)?,
    };
    e.f = jumps::concat(self.code_slice_mut(), e.f, pc);
    self.patch_bool_true_list(e.t)?;
    e.t = NO_JUMP;
    Ok(())
  }

  /// Lower the left side of `or`: if `e` is true, short-circuit to the
  /// end of the `or` chain; otherwise fall through. Matches
  /// `luaK_goiffalse`.
  pub fn goiffalse(&mut self, e: &mut ExpDesc, line: Line) -> Result<(), Error> {
    self.discharge_vars(e, line)?;
    let pc = match e.kind {
      Kind::Bool(false) | Kind::Nil => NO_JUMP,
      Kind::JumpValue(pc) => pc,
      _ => self.jumponcond(e, true, line)?,
    };
    e.t = jumps::concat(self.code_slice_mut(), e.t, pc);
    self.patch_bool_true_list(e.f)?;
    e.f = NO_JUMP;
    Ok(())
  }

  fn patch_bool_true_list(&mut self, list: i32) -> Result<(), Error> {
    if list != NO_JUMP {
      self.mark_jump_target();
      let here = self.pc();
      self.patch_list(list, here)?;
    }
    Ok(())
  }

  /// Lower `not e`: flips constant booleans immediately, swaps
  /// true/false jump lists for anything that already carries jumps,
  /// and otherwise falls back to a real `NOT` instruction.
  pub fn code_not(&mut self, mut e: ExpDesc, line: Line) -> Result<ExpDesc, Error> {
    self.discharge_vars(&mut e, line)?;
    match e.kind {
      Kind::Nil | Kind::Bool(false) => Ok(ExpDesc::boolean(true)),
      Kind::Constant(_) | Kind::Bool(true) => Ok(ExpDesc::boolean(false)),
      Kind::JumpValue(pc) => {
        std::mem::swap(&mut e.t, &mut e.f);
        Ok(ExpDesc {
          kind: Kind::JumpValue(pc),
          t: e.t,
          f: e.f,
        })
      }
      _ => {
        let reg = self.exp2anyreg(&mut e, line)?;
        self.free_exp_reg(reg);
        let pc = self.code_abc(Op::Not, 0, reg as u32, 0, line)?;
        let mut result = ExpDesc::new(Kind::Relocable(pc as u32));
        std::mem::swap(&mut result.t, &mut e.f);
        std::mem::swap(&mut result.f, &mut e.t);
        Ok(result)
      }
    }
  }

  /// Finish an `and e1 e2` whose left side has already gone through
  /// [`Self::goiftrue`]: merge `e1`'s false-jumps into `e2`'s, since
  /// either one failing makes the whole conjunction false.
  pub fn and_op(&mut self, e1: &ExpDesc, e2: &mut ExpDesc) {
    e2.f = jumps::concat(self.code_slice_mut(), e1.f, e2.f);
  }

  /// Finish an `or e1 e2`: merge `e1`'s true-jumps into `e2`'s.
  pub fn or_op(&mut self, e1: &ExpDesc, e2: &mut ExpDesc) {
    e2.t = jumps::concat(self.code_slice_mut(), e1.t, e2.t);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use beef::lean::Cow;

  fn new_builder() -> FuncBuilder<'static> {
    FuncBuilder::new(1, false, Cow::borrowed("test"), Line(1))
  }

  #[test]
  fn goiftrue_on_true_constant_never_jumps_false() {
    let mut f = new_builder();
    let mut e = ExpDesc::boolean(true);
    f.goiftrue(&mut e, Line(1)).unwrap();
    assert_eq!(e.f, NO_JUMP);
  }

  #[test]
  fn goiffalse_on_false_constant_never_jumps_true() {
    let mut f = new_builder();
    let mut e = ExpDesc::boolean(false);
    f.goiffalse(&mut e, Line(1)).unwrap();
    assert_eq!(e.t, NO_JUMP);
  }

  #[test]
  fn not_on_literal_true_yields_literal_false() {
    let f_ = new_builder();
    let mut f = f_;
    let e = f.code_not(ExpDesc::boolean(true), Line(1)).unwrap();
    assert_eq!(e.kind, Kind::Bool(false));
  }

  #[test]
  fn goiftrue_on_local_emits_testset_and_jmp() {
    let mut f = new_builder();
    let mut e = ExpDesc::new(Kind::NonRelocable(0));
    f.goiftrue(&mut e, Line(1)).unwrap();
    assert_eq!(f.code_slice()[0].op, Op::TestSet);
    assert_eq!(f.code_slice()[1].op, Op::Jmp);
  }
}
