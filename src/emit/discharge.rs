//! Expression discharge: turning an [`ExpDesc`] into an actual value
//! sitting in a register, as late as possible.
//!
//! Every discharge step here mirrors a function of the same shape in
//! the reference compiler (`luaK_dischargevars`, `luaK_exp2reg`, and
//! so on); the names are kept close to that lineage because they are
//! also the names used in the comments throughout `bool_lowering.rs`
//! and `arith.rs`, which call back into these.

use span::Line;

use super::desc::{ExpDesc, Kind};
use super::jumps;
use super::FuncBuilder;
use crate::error::Error;
use crate::instruction::{Op, NO_JUMP};

impl<'src> FuncBuilder<'src> {
  /// Resolve any `Kind` that still requires an instruction to produce
  /// its value into a register (`Upvalue`, `Indexed`) into
  /// [`Kind::Relocable`]. Already-resident kinds pass through
  /// unchanged.
  pub fn discharge_vars(&mut self, e: &mut ExpDesc, line: Line) -> Result<(), Error> {
    match e.kind {
      Kind::Upvalue(idx) => {
        let pc = self.code_abc(Op::GetUpval, 0, idx as u32, 0, line)?;
        e.kind = Kind::Relocable(pc as u32);
      }
      Kind::Indexed {
        table,
        key,
        via_upvalue,
      } => {
        let op = if via_upvalue {
          Op::GetTabUp
        } else {
          Op::GetTable
        };
        let pc = self.code_abc(op, 0, table, key, line)?;
        self.free_operand(table);
        self.free_operand(key);
        e.kind = Kind::Relocable(pc as u32);
      }
      Kind::Call(_) | Kind::Vararg(_) => {
        self.set_one_return(e);
      }
      _ => {}
    }
    Ok(())
  }

  /// Free `operand` if it names a plain register rather than an RK
  /// constant slot.
  fn free_operand(&mut self, operand: u32) {
    if !crate::instruction::is_rk_constant(operand) {
      let reg = operand as u8;
      if reg >= self.regs().nactvar() {
        self.regs_mut().free_reg(reg);
      }
    }
  }

  /// Place `e`'s value into `reg`, emitting whatever instruction is
  /// needed for its current `Kind`, and update `e` to
  /// `Kind::NonRelocable(reg)`. Does not touch `e.t`/`e.f`; callers
  /// that need the boolean trampoline handled go through
  /// [`Self::exp2reg`] instead.
  pub fn discharge_to_reg(&mut self, e: &mut ExpDesc, reg: u8, line: Line) -> Result<(), Error> {
    self.discharge_vars(e, line)?;
    match e.kind {
      Kind::Void | Kind::JumpValue(_) => {}
      Kind::Nil => {
        self.nil(reg, 1, line)?;
      }
      Kind::Bool(b) => {
        self.code_abc(Op::LoadBool, reg as u32, b as u32, 0, line)?;
      }
      Kind::Constant(idx) => {
        self.codek(reg, idx, line)?;
      }
      Kind::NonRelocable(src) => {
        if src != reg {
          self.code_abc(Op::Move, reg as u32, src as u32, 0, line)?;
        }
      }
      Kind::Relocable(pc) => {
        self.code_slice_mut()[pc as usize].set_a(reg as u32);
      }
      Kind::Call(_) | Kind::Vararg(_) | Kind::Upvalue(_) | Kind::Indexed { .. } => {
        unreachable!("discharge_vars already resolved this kind")
      }
    }
    e.kind = Kind::NonRelocable(reg);
    Ok(())
  }

  /// Full discharge: place `e` into `reg`, and if it carries pending
  /// boolean jumps, materialize the `LOADBOOL` trampoline so that
  /// *every* path into `reg` — fallthrough, true-jump, false-jump — is
  /// accounted for (spec §4.6).
  pub fn exp2reg(&mut self, e: &mut ExpDesc, reg: u8, line: Line) -> Result<(), Error> {
    let jump_value_pc = if let Kind::JumpValue(pc) = e.kind {
      Some(pc)
    } else {
      None
    };
    self.discharge_to_reg(e, reg, line)?;
    if let Some(pc) = jump_value_pc {
      e.t = jumps::concat(self.code_slice_mut(), e.t, pc);
    }

    if e.has_jumps() {
      let mut p_f = NO_JUMP;
      let mut p_t = NO_JUMP;
      if jumps::needs_value(self.code_slice(), e.t) || jumps::needs_value(self.code_slice(), e.f) {
        let fj = if jump_value_pc.is_some() {
          NO_JUMP
        } else {
          self.jump(line)?
        };
        p_f = self.code_abc(Op::LoadBool, reg as u32, 0, 1, line)?;
        p_t = self.code_abc(Op::LoadBool, reg as u32, 1, 0, line)?;
        self.patch_list_to(fj, self.pc())?;
      }
      let here = self.pc();
      self.patch_list_with(e.f, here, reg as u32, p_f)?;
      self.patch_list_with(e.t, here, reg as u32, p_t)?;
      self.mark_jump_target();
    }

    e.t = NO_JUMP;
    e.f = NO_JUMP;
    e.kind = Kind::NonRelocable(reg);
    Ok(())
  }

  fn patch_list_to(&mut self, list: i32, target: i32) -> Result<(), Error> {
    if list != NO_JUMP {
      jumps::patch_list(self.code_slice_mut(), list, target, jumps::NO_REG, target)?;
    }
    Ok(())
  }

  /// Patch every node of `list` either to `target_if_value_set`
  /// (already deposited through a rewritten `TESTSET`) or to
  /// `target_loadbool` (needs the trampoline emitted above).
  fn patch_list_with(
    &mut self,
    list: i32,
    target_if_value_set: i32,
    reg: u32,
    target_loadbool: i32,
  ) -> Result<(), Error> {
    if list != NO_JUMP {
      jumps::patch_list(self.code_slice_mut(), list, target_if_value_set, reg, target_loadbool)?;
    }
    Ok(())
  }

  pub fn exp2nextreg(&mut self, e: &mut ExpDesc, line: Line) -> Result<u8, Error> {
    self.discharge_vars(e, line)?;
    self.free_exp(e);
    let reg = self.regs_mut().reserve(1)?;
    self.exp2reg(e, reg, line)?;
    Ok(reg)
  }

  pub fn exp2anyreg(&mut self, e: &mut ExpDesc, line: Line) -> Result<u8, Error> {
    self.discharge_vars(e, line)?;
    if let Kind::NonRelocable(reg) = e.kind {
      if !e.has_jumps() {
        return Ok(reg);
      }
      if reg >= self.regs().nactvar() {
        self.exp2reg(e, reg, line)?;
        return Ok(reg);
      }
    }
    self.exp2nextreg(e, line)
  }

  pub fn exp2val(&mut self, e: &mut ExpDesc, line: Line) -> Result<(), Error> {
    if e.has_jumps() {
      self.exp2anyreg(e, line)?;
      Ok(())
    } else {
      self.discharge_vars(e, line)
    }
  }

  /// Produce an RK operand for `e`: a constant-pool index with the RK
  /// flag set if `e` is foldable into the constant pool and there is
  /// still room in the 8-bit RK index space, otherwise a plain
  /// register holding the discharged value.
  pub fn exp2rk(&mut self, e: &mut ExpDesc, line: Line) -> Result<u32, Error> {
    self.exp2val(e, line)?;
    if e.is_constant_foldable() {
      let idx = match e.kind {
        Kind::Nil => self.constants_mut().add_nil()?,
        Kind::Bool(b) => self.constants_mut().add_bool(b)?,
        Kind::Constant(idx) => idx,
        _ => unreachable!(),
      };
      if idx <= crate::instruction::MAXINDEXRK {
        return Ok(crate::instruction::rk_constant(idx));
      }
    }
    Ok(self.exp2anyreg(e, line)? as u32)
  }

  fn free_exp(&mut self, e: &ExpDesc) {
    if let Kind::NonRelocable(reg) = e.kind {
      if reg >= self.regs().nactvar() {
        self.regs_mut().free_reg(reg);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use beef::lean::Cow;

  fn new_builder() -> FuncBuilder<'static> {
    FuncBuilder::new(0, false, Cow::borrowed("test"), Line(1))
  }

  #[test]
  fn constant_discharges_to_loadk() {
    let mut f = new_builder();
    let idx = f.constants_mut().add_int(42).unwrap();
    let mut e = ExpDesc::new(Kind::Constant(idx));
    let reg = f.exp2nextreg(&mut e, Line(1)).unwrap();
    assert_eq!(reg, 0);
    let inst = f.code_slice()[0];
    assert_eq!(inst.op, Op::LoadK);
    assert_eq!(inst.a(), 0);
    assert_eq!(inst.bx(), idx);
  }

  #[test]
  fn relocable_patches_its_own_instruction() {
    let mut f = new_builder();
    let pc = f.code_abc(Op::GetUpval, 0, 0, 0, Line(1)).unwrap();
    let mut e = ExpDesc::new(Kind::Relocable(pc as u32));
    let reg = f.exp2nextreg(&mut e, Line(1)).unwrap();
    assert_eq!(f.code_slice()[pc as usize].a(), reg as u32);
  }

  #[test]
  fn nonrelocable_in_place_skips_move() {
    let mut f = new_builder();
    f.regs_mut().reserve(1).unwrap();
    f.regs_mut().activate_locals(1);
    let mut e = ExpDesc::new(Kind::NonRelocable(0));
    let reg = f.exp2anyreg(&mut e, Line(1)).unwrap();
    assert_eq!(reg, 0);
    assert!(f.code_slice().is_empty());
  }

  #[test]
  fn vararg_discharges_to_single_result() {
    let mut f = new_builder();
    let pc = f.code_abc(Op::Vararg, 0, 1, 0, Line(1)).unwrap();
    let mut e = ExpDesc::new(Kind::Vararg(pc as u32));
    let reg = f.exp2nextreg(&mut e, Line(1)).unwrap();
    assert_eq!(f.code_slice()[pc as usize].op, Op::Vararg);
    assert_eq!(f.code_slice()[pc as usize].b(), 2, "narrowed to exactly one result");
    assert_eq!(f.code_slice()[pc as usize].a(), reg as u32);
  }

  #[test]
  fn small_constant_folds_into_rk_operand() {
    let mut f = new_builder();
    let idx = f.constants_mut().add_int(7).unwrap();
    let mut e = ExpDesc::new(Kind::Constant(idx));
    let rk = f.exp2rk(&mut e, Line(1)).unwrap();
    assert!(crate::instruction::is_rk_constant(rk));
    assert_eq!(crate::instruction::rk_index(rk), idx);
  }
}
