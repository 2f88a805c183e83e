//! Arithmetic, comparison, and string concatenation lowering.
//!
//! Binary arithmetic first tries to fold both operands at compile
//! time; only if that fails (non-constant operand, or a fold that
//! would have to materialize a NaN) does it fall through to emitting
//! the real opcode with RK operands. Comparisons additionally swap
//! their operands for `>`/`>=`, since the instruction set only has
//! `LT`/`LE` (spec §4.7: "no dedicated greater-than opcodes").

use span::Line;

use super::desc::{ExpDesc, Kind};
use super::FuncBuilder;
use crate::error::Error;
use crate::instruction::Op;
use crate::value::FiniteFloat;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Mod,
  Pow,
  Div,
  IDiv,
  BAnd,
  BOr,
  BXor,
  Shl,
  Shr,
  Concat,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
  Neg,
  BNot,
  Len,
}

fn opcode_for(op: BinOp) -> Op {
  match op {
    BinOp::Add => Op::Add,
    BinOp::Sub => Op::Sub,
    BinOp::Mul => Op::Mul,
    BinOp::Mod => Op::Mod,
    BinOp::Pow => Op::Pow,
    BinOp::Div => Op::Div,
    BinOp::IDiv => Op::IDiv,
    BinOp::BAnd => Op::BAnd,
    BinOp::BOr => Op::BOr,
    BinOp::BXor => Op::BXor,
    BinOp::Shl => Op::Shl,
    BinOp::Shr => Op::Shr,
    BinOp::Eq | BinOp::Ne => Op::Eq,
    BinOp::Lt | BinOp::Gt => Op::Lt,
    BinOp::Le | BinOp::Ge => Op::Le,
    BinOp::Concat => Op::Concat,
  }
}

/// Fold two already-resolved numeric literals (int or float). Integer
/// operands fold to an integer result except `/` and `^`, which always
/// produce a float (matching the source language's numeric tower); any
/// operator that would divide/mod by zero or produce NaN bails out by
/// returning `None`, leaving the real instruction to raise the runtime
/// error instead.
pub fn fold_constants(op: BinOp, lhs: &ConstNum, rhs: &ConstNum) -> Option<ConstNum> {
  use ConstNum::{Float, Int};
  match op {
    BinOp::Add => match (lhs, rhs) {
      (Int(a), Int(b)) => Some(Int(a.wrapping_add(*b))),
      _ => checked_float(lhs.as_f64() + rhs.as_f64()),
    },
    BinOp::Sub => match (lhs, rhs) {
      (Int(a), Int(b)) => Some(Int(a.wrapping_sub(*b))),
      _ => checked_float(lhs.as_f64() - rhs.as_f64()),
    },
    BinOp::Mul => match (lhs, rhs) {
      (Int(a), Int(b)) => Some(Int(a.wrapping_mul(*b))),
      _ => checked_float(lhs.as_f64() * rhs.as_f64()),
    },
    BinOp::Mod => match (lhs, rhs) {
      (Int(a), Int(b)) if *b != 0 => Some(Int(floor_mod_i64(*a, *b))),
      _ if rhs.as_f64() != 0.0 => {
        let (a, b) = (lhs.as_f64(), rhs.as_f64());
        checked_float(a - (a / b).floor() * b)
      }
      _ => None,
    },
    BinOp::IDiv => match (lhs, rhs) {
      (Int(a), Int(b)) if *b != 0 => Some(Int(floor_div_i64(*a, *b))),
      _ if rhs.as_f64() != 0.0 => checked_float((lhs.as_f64() / rhs.as_f64()).floor()),
      _ => None,
    },
    BinOp::Div => checked_float(lhs.as_f64() / rhs.as_f64()),
    BinOp::Pow => checked_float(lhs.as_f64().powf(rhs.as_f64())),
    BinOp::BAnd | BinOp::BOr | BinOp::BXor | BinOp::Shl | BinOp::Shr => {
      let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64()) else {
        return None;
      };
      Some(Int(match op {
        BinOp::BAnd => a & b,
        BinOp::BOr => a | b,
        BinOp::BXor => a ^ b,
        BinOp::Shl => shift_left(a, b),
        BinOp::Shr => shift_left(a, -b),
        _ => unreachable!(),
      }))
    }
    _ => None,
  }
}

/// Floor division (`a / b` rounded toward negative infinity), matching
/// the source language's `//` rather than Rust's truncating `/` or
/// `div_euclid`'s always-nonnegative-remainder convention.
fn floor_div_i64(a: i64, b: i64) -> i64 {
  let q = a.wrapping_div(b);
  let r = a.wrapping_rem(b);
  if r != 0 && (r < 0) != (b < 0) {
    q - 1
  } else {
    q
  }
}

/// `a - floor(a / b) * b`, the modulo that pairs with [`floor_div_i64`]
/// (result takes the sign of `b`, unlike Rust's `%`).
fn floor_mod_i64(a: i64, b: i64) -> i64 {
  let r = a.wrapping_rem(b);
  if r != 0 && (r < 0) != (b < 0) {
    r.wrapping_add(b)
  } else {
    r
  }
}

fn shift_left(a: i64, n: i64) -> i64 {
  if n <= -64 || n >= 64 {
    0
  } else if n >= 0 {
    ((a as u64) << n) as i64
  } else {
    ((a as u64) >> -n) as i64
  }
}

/// Wrap a folded float result, rejecting both NaN and exact zero (spec
/// §4.7/§9(b): a folded `-0.0` must not collapse into `0.0`, so the
/// folder bails out entirely and lets the real instruction produce the
/// signed zero at runtime instead). Integer-zero results are unaffected
/// by this — they go through `ConstNum::Int` directly, never this path.
fn checked_float(v: f64) -> Option<ConstNum> {
  if v == 0.0 {
    return None;
  }
  FiniteFloat::new(v).map(ConstNum::Float)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstNum {
  Int(i64),
  Float(FiniteFloat),
}

impl ConstNum {
  fn as_f64(&self) -> f64 {
    match self {
      ConstNum::Int(i) => *i as f64,
      ConstNum::Float(f) => f.get(),
    }
  }

  fn as_i64(&self) -> Option<i64> {
    match self {
      ConstNum::Int(i) => Some(*i),
      ConstNum::Float(f) => {
        let v = f.get();
        (v.fract() == 0.0 && v.is_finite()).then(|| v as i64)
      }
    }
  }
}

impl<'src> FuncBuilder<'src> {
  /// Lower a binary operator application. `lhs`/`rhs` have already had
  /// their subexpressions emitted; this only handles the combining
  /// step (fold, or emit the real instruction with RK operands).
  pub fn binop(
    &mut self,
    op: BinOp,
    mut lhs: ExpDesc,
    mut rhs: ExpDesc,
    line: Line,
  ) -> Result<ExpDesc, Error> {
    if let (Some(a), Some(b)) = (self.as_const_num(&lhs), self.as_const_num(&rhs)) {
      if let Some(result) = fold_constants(op, &a, &b) {
        return Ok(self.const_num_expr(result)?);
      }
    }

    let (op, swap) = match op {
      BinOp::Gt => (BinOp::Lt, true),
      BinOp::Ge => (BinOp::Le, true),
      other => (other, false),
    };
    if swap {
      std::mem::swap(&mut lhs, &mut rhs);
    }

    match op {
      BinOp::Concat => self.concat(lhs, rhs, line),
      BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le => {
        let expect = !matches!(op, BinOp::Ne);
        let a = self.exp2rk(&mut lhs, line)?;
        let b = self.exp2rk(&mut rhs, line)?;
        self.free_rk_pair(a, b);
        self.code_abc(opcode_for(op), expect as u32, a, b, line)?;
        let jmp_pc = self.jump(line)?;
        Ok(ExpDesc::new(Kind::JumpValue(jmp_pc)))
      }
      _ => {
        let a = self.exp2rk(&mut lhs, line)?;
        let b = self.exp2rk(&mut rhs, line)?;
        self.free_rk_pair(a, b);
        let pc = self.code_abc(opcode_for(op), 0, a, b, line)?;
        Ok(ExpDesc::new(Kind::Relocable(pc as u32)))
      }
    }
  }

  pub fn unop(&mut self, op: UnOp, mut e: ExpDesc, line: Line) -> Result<ExpDesc, Error> {
    if let Some(n) = self.as_const_num(&e) {
      let folded = match op {
        UnOp::Neg => match n {
          ConstNum::Int(i) => Some(ConstNum::Int(i.wrapping_neg())),
          ConstNum::Float(f) => checked_float(-f.get()),
        },
        UnOp::BNot => n.as_i64().map(|i| ConstNum::Int(!i)),
        UnOp::Len => None,
      };
      if let Some(folded) = folded {
        return self.const_num_expr(folded);
      }
    }
    let reg = self.exp2anyreg(&mut e, line)?;
    self.free_rk_pair(reg as u32, reg as u32);
    let op = match op {
      UnOp::Neg => Op::Unm,
      UnOp::BNot => Op::BNot,
      UnOp::Len => Op::Len,
    };
    let pc = self.code_abc(op, 0, reg as u32, 0, line)?;
    Ok(ExpDesc::new(Kind::Relocable(pc as u32)))
  }

  /// Force the left operand of a `..` application onto the register
  /// stack. The parser must call this on `e1` before compiling `e2`,
  /// the way `luaK_infix`'s `OPR_CONCAT` case does — reserving `e1`'s
  /// register first is what lets `e2`, if it turns out to itself be a
  /// concatenation, allocate its own operands directly above it.
  pub fn concat_infix(&mut self, e: &mut ExpDesc, line: Line) -> Result<(), Error> {
    self.exp2nextreg(e, line)?;
    Ok(())
  }

  /// `a .. b .. c` compiles to a single `CONCAT` spanning every operand
  /// register when the right-hand side turns out to already be an
  /// (undischarged) concatenation sitting directly above `lhs` — the
  /// peephole fusion in spec §4.7. Crucially this checks `rhs` before
  /// forcing it into a register: once discharged it would no longer be
  /// distinguishable from any other value sitting in a register, and
  /// the fusion opportunity would be lost.
  fn concat(&mut self, mut lhs: ExpDesc, mut rhs: ExpDesc, line: Line) -> Result<ExpDesc, Error> {
    let lhs_reg = self.exp2nextreg(&mut lhs, line)?;
    self.exp2val(&mut rhs, line)?;

    if let Kind::Relocable(rhs_pc) = rhs.kind {
      let inst = self.code_slice()[rhs_pc as usize];
      if inst.op == Op::Concat && inst.b() == lhs_reg as u32 + 1 {
        self.free_if_temp(lhs_reg);
        self.code_slice_mut()[rhs_pc as usize].set_b(lhs_reg as u32);
        return Ok(ExpDesc::new(Kind::Relocable(rhs_pc)));
      }
    }

    let rhs_reg = self.exp2nextreg(&mut rhs, line)?;
    self.regs_mut().free_reg(rhs_reg);
    self.regs_mut().free_reg(lhs_reg);
    let pc = self.code_abc(Op::Concat, 0, lhs_reg as u32, rhs_reg as u32, line)?;
    Ok(ExpDesc::new(Kind::Relocable(pc as u32)))
  }

  fn free_rk_pair(&mut self, a: u32, b: u32) {
    let a_is_reg = !crate::instruction::is_rk_constant(a);
    let b_is_reg = !crate::instruction::is_rk_constant(b);
    match (a_is_reg, b_is_reg) {
      (true, true) => self.regs_mut().free_regs(a as u8, b as u8),
      (true, false) => self.free_if_temp(a as u8),
      (false, true) => self.free_if_temp(b as u8),
      (false, false) => {}
    }
  }

  fn free_if_temp(&mut self, reg: u8) {
    if reg >= self.regs().nactvar() {
      self.regs_mut().free_reg(reg);
    }
  }

  fn as_const_num(&self, e: &ExpDesc) -> Option<ConstNum> {
    if e.has_jumps() {
      return None;
    }
    match e.kind {
      Kind::Constant(idx) => match self.constants_entry(idx) {
        crate::value::Constant::Int(i) => Some(ConstNum::Int(i)),
        crate::value::Constant::Number(f) => Some(ConstNum::Float(f)),
        _ => None,
      },
      _ => None,
    }
  }

  fn constants_entry(&self, idx: u32) -> crate::value::Constant<'src> {
    self.constants_entries()[idx as usize].clone()
  }

  fn const_num_expr(&mut self, n: ConstNum) -> Result<ExpDesc, Error> {
    let idx = match n {
      ConstNum::Int(i) => self.constants_mut().add_int(i)?,
      ConstNum::Float(f) => self.constants_mut().add_number(f)?,
    };
    Ok(ExpDesc::new(Kind::Constant(idx)))
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
  fn folds_integer_addition() {
    let mut f = new_builder();
    let one = f.constants_mut().add_int(1).unwrap();
    let two = f.constants_mut().add_int(2).unwrap();
    let lhs = ExpDesc::new(Kind::Constant(one));
    let rhs = ExpDesc::new(Kind::Constant(two));
    let result = f.binop(BinOp::Add, lhs, rhs, Line(1)).unwrap();
    assert!(f.code_slice().is_empty(), "folded add should emit no ADD");
    match result.kind {
      Kind::Constant(idx) => {
        assert_eq!(f.constants_entry(idx), crate::value::Constant::Int(3));
      }
      other => panic!("expected folded constant, got {other:?}"),
    }
  }

  #[test]
  fn does_not_fold_float_result_of_exact_zero() {
    let mut f = new_builder();
    let two = f.constants_mut().add_number(FiniteFloat::new(2.0).unwrap()).unwrap();
    let lhs = ExpDesc::new(Kind::Constant(two));
    let rhs = ExpDesc::new(Kind::Constant(two));
    let result = f.binop(BinOp::Sub, lhs, rhs, Line(1)).unwrap();
    assert!(matches!(result.kind, Kind::Relocable(_)), "2.0 - 2.0 must not fold to a 0.0 constant");
    assert_eq!(f.code_slice()[0].op, Op::Sub);
  }

  #[test]
  fn still_folds_integer_zero_result() {
    let mut f = new_builder();
    let one = f.constants_mut().add_int(1).unwrap();
    let lhs = ExpDesc::new(Kind::Constant(one));
    let rhs = ExpDesc::new(Kind::Constant(one));
    let result = f.binop(BinOp::Sub, lhs, rhs, Line(1)).unwrap();
    match result.kind {
      Kind::Constant(idx) => assert_eq!(f.constants_entry(idx), crate::value::Constant::Int(0)),
      other => panic!("expected folded constant, got {other:?}"),
    }
  }

  #[test]
  fn does_not_fold_division_by_zero() {
    let mut f = new_builder();
    let one = f.constants_mut().add_int(1).unwrap();
    let zero = f.constants_mut().add_int(0).unwrap();
    let lhs = ExpDesc::new(Kind::Constant(one));
    let rhs = ExpDesc::new(Kind::Constant(zero));
    let result = f.binop(BinOp::Div, lhs, rhs, Line(1)).unwrap();
    assert!(matches!(result.kind, Kind::Relocable(_)));
    assert_eq!(f.code_slice()[0].op, Op::Div);
  }

  #[test]
  fn comparison_produces_jump_value() {
    let mut f = new_builder();
    f.regs_mut().reserve(2).unwrap();
    f.regs_mut().activate_locals(2);
    let lhs = ExpDesc::new(Kind::NonRelocable(0));
    let rhs = ExpDesc::new(Kind::NonRelocable(1));
    let result = f.binop(BinOp::Lt, lhs, rhs, Line(1)).unwrap();
    assert!(matches!(result.kind, Kind::JumpValue(_)));
    assert_eq!(f.code_slice()[0].op, Op::Lt);
    assert_eq!(f.code_slice()[1].op, Op::Jmp);
  }

  /// `a .. b .. c`, parsed right-associatively as `a .. (b .. c)` the
  /// way the grammar's `..` precedence dictates, should still end up as
  /// one `CONCAT` spanning all three registers rather than two nested
  /// ones.
  #[test]
  fn three_way_concat_fuses_into_one_instruction() {
    let mut f = FuncBuilder::new(0, false, Cow::borrowed("test"), Line(1));
    let ua = f
      .add_upvalue("a", crate::proto::UpvalDesc { in_stack: false, index: 0 })
      .unwrap();
    let ub = f
      .add_upvalue("b", crate::proto::UpvalDesc { in_stack: false, index: 1 })
      .unwrap();
    let uc = f
      .add_upvalue("c", crate::proto::UpvalDesc { in_stack: false, index: 2 })
      .unwrap();

    let mut ea = ExpDesc::new(Kind::Upvalue(ua));
    f.concat_infix(&mut ea, Line(1)).unwrap();

    let mut eb = ExpDesc::new(Kind::Upvalue(ub));
    f.concat_infix(&mut eb, Line(1)).unwrap();
    let ec = ExpDesc::new(Kind::Upvalue(uc));
    let bc = f.binop(BinOp::Concat, eb, ec, Line(1)).unwrap();

    let abc = f.binop(BinOp::Concat, ea, bc, Line(1)).unwrap();

    let concats = f.code_slice().iter().filter(|i| i.op == Op::Concat).count();
    assert_eq!(concats, 1, "fused chain should emit exactly one CONCAT");
    match abc.kind {
      Kind::Relocable(pc) => {
        assert_eq!(f.code_slice()[pc as usize].b(), 0);
        assert_eq!(f.code_slice()[pc as usize].c(), 2);
      }
      other => panic!("expected Relocable, got {other:?}"),
    }
  }
}
