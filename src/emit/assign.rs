//! Assignment, indexing, method self-calls, and table constructors.

use span::Line;

use super::desc::{ExpDesc, Kind};
use super::FuncBuilder;
use crate::error::Error;
use crate::instruction::{is_rk_constant, Op};

/// Number of array-part table-constructor fields to buffer before
/// flushing a `SETLIST`, mirroring the reference format's batching
/// constant so a dump of either implementation disassembles to the
/// same instruction count for the same source.
pub const FIELDS_PER_FLUSH: u32 = 50;

impl<'src> FuncBuilder<'src> {
  /// Open a table constructor: emit `NEWTABLE` and return a `Relocable`
  /// descriptor the parser discharges to a register before compiling
  /// the constructor's fields against it. `narray`/`nhash` are
  /// size-hint field counts already known syntactically (how many
  /// positional/keyed fields the constructor has), clamped into the
  /// instruction's `B`/`C` operands rather than encoded through a
  /// floating-point byte scheme, since an oversized hint only costs the
  /// VM an extra rehash and is not itself a compile error.
  pub fn new_table(&mut self, narray: u32, nhash: u32, line: Line) -> Result<ExpDesc, Error> {
    let b = narray.min(crate::instruction::MAXARG_B);
    let c = nhash.min(crate::instruction::MAXARG_C);
    let pc = self.code_abc(Op::NewTable, 0, b, c, line)?;
    Ok(ExpDesc::new(Kind::Relocable(pc as u32)))
  }

  /// Build an `ExpDesc::Indexed` descriptor for `table[key]`, choosing
  /// `GETTABUP`/`SETTABUP` when `table` is itself an upvalue (the case
  /// for every global access, which is compiled as indexing the
  /// `_ENV` upvalue) and `GETTABLE`/`SETTABLE` otherwise.
  pub fn indexed(&mut self, mut table: ExpDesc, mut key: ExpDesc, line: Line) -> Result<ExpDesc, Error> {
    let via_upvalue = matches!(table.kind, Kind::Upvalue(_));
    let table_operand = if via_upvalue {
      match table.kind {
        Kind::Upvalue(idx) => idx as u32,
        _ => unreachable!(),
      }
    } else {
      self.exp2anyreg(&mut table, line)? as u32
    };
    let key_operand = self.exp2rk(&mut key, line)?;
    Ok(ExpDesc::new(Kind::Indexed {
      table: table_operand,
      key: key_operand,
      via_upvalue,
    }))
  }

  /// Assign `value` into the variable/slot described by `target`.
  /// `target` must already have been resolved by the parser into one
  /// of `NonRelocable` (local), `Upvalue`, or `Indexed` (global or
  /// table field) — anything else is a compile-time "cannot assign"
  /// error the parser is responsible for rejecting before calling
  /// this.
  pub fn store_var(&mut self, target: &ExpDesc, mut value: ExpDesc, line: Line) -> Result<(), Error> {
    match target.kind {
      Kind::NonRelocable(reg) => {
        self.exp2reg(&mut value, reg, line)?;
      }
      Kind::Upvalue(idx) => {
        let reg = self.exp2anyreg(&mut value, line)?;
        self.code_abc(Op::SetUpval, reg as u32, idx as u32, 0, line)?;
        self.free_temp(reg);
      }
      Kind::Indexed {
        table,
        key,
        via_upvalue,
      } => {
        let value_operand = self.exp2rk(&mut value, line)?;
        let op = if via_upvalue {
          Op::SetTabUp
        } else {
          Op::SetTable
        };
        self.code_abc(op, table, key, value_operand, line)?;
        self.free_rk(table);
        self.free_rk(key);
        self.free_rk(value_operand);
      }
      _ => unreachable!("parser produced a non-assignable target"),
    }
    Ok(())
  }

  fn free_temp(&mut self, reg: u8) {
    if reg >= self.regs().nactvar() {
      self.regs_mut().free_reg(reg);
    }
  }

  fn free_rk(&mut self, operand: u32) {
    if !is_rk_constant(operand) {
      self.free_temp(operand as u8);
    }
  }

  /// `obj:method(args)` sugar: copy `obj` into a fresh register, fetch
  /// `method` from it into the register above, leaving both set up for
  /// the ensuing `CALL` with `obj` as the implicit first argument —
  /// this is the one place the instruction set dedicates a whole
  /// opcode (`SELF`) to what would otherwise be a `MOVE` + `GETTABLE`
  /// pair, because the VM needs both results adjacent on the stack.
  pub fn self_call(&mut self, mut obj: ExpDesc, method_name_const: u32, line: Line) -> Result<ExpDesc, Error> {
    let obj_reg = self.exp2anyreg(&mut obj, line)?;
    self.free_temp(obj_reg);
    let base = self.regs_mut().reserve(2)?;
    self.code_abc(
      Op::SelfOp,
      base as u32,
      obj_reg as u32,
      crate::instruction::rk_constant(method_name_const),
      line,
    )?;
    Ok(ExpDesc::new(Kind::NonRelocable(base)))
  }

  /// Adjust a `Call`/`Vararg` descriptor to request exactly `n`
  /// results (`luaK_setreturns`); `n == -1` requests "all results",
  /// used when the call is the last expression in an argument list or
  /// return statement. `CALL` stores the count in `C`, a field the
  /// instruction already owns; `VARARG` stores it in `B` instead and,
  /// unlike `CALL`, must also claim a fresh register at `A` for its own
  /// result — a `VARARG` with a pending result count doesn't already sit
  /// in a register the way an in-progress `CALL` does.
  pub fn set_returns(&mut self, e: &mut ExpDesc, n: i32) -> Result<(), Error> {
    let b = if n < 0 { 0 } else { (n as u32) + 1 };
    match e.kind {
      Kind::Call(pc) => {
        self.code_slice_mut()[pc as usize].set_c(b);
      }
      Kind::Vararg(pc) => {
        self.code_slice_mut()[pc as usize].set_b(b);
        let reg = self.regs_mut().reserve(1)?;
        self.code_slice_mut()[pc as usize].set_a(reg as u32);
      }
      _ => {}
    }
    Ok(())
  }

  /// Narrow a `Call`/`Vararg` descriptor to exactly one result and
  /// discharge it into its own register, used whenever such an
  /// expression appears somewhere only a single value is meaningful
  /// (e.g. as a non-final element of an argument list).
  pub fn set_one_return(&mut self, e: &mut ExpDesc) {
    match e.kind {
      Kind::Call(pc) => {
        self.code_slice_mut()[pc as usize].set_c(2);
        e.kind = Kind::NonRelocable(self.code_slice()[pc as usize].a() as u8);
      }
      Kind::Vararg(pc) => {
        self.code_slice_mut()[pc as usize].set_b(2);
        e.kind = Kind::Relocable(pc as u32);
      }
      _ => {}
    }
  }

  /// Flush `count` pending array-constructor fields already sitting in
  /// the `count` registers above `table_reg`, emitting the
  /// `EXTRAARG`-prefixed form when `flush_index` is too large to fit
  /// in `SETLIST`'s own `C` operand (spec §4.8's overflow path).
  pub fn set_list(&mut self, table_reg: u8, flush_index: u32, count: u32, line: Line) -> Result<(), Error> {
    if count == 0 {
      return Ok(());
    }
    if flush_index <= crate::instruction::MAXARG_C {
      self.code_abc(Op::SetList, table_reg as u32, count, flush_index, line)?;
    } else {
      self.code_abc(Op::SetList, table_reg as u32, count, 0, line)?;
      self.code_ax(Op::ExtraArg, flush_index, line)?;
    }
    Ok(())
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
  fn store_var_into_local_discharges_in_place() {
    let mut f = new_builder();
    let reg = f.declare_local("x").unwrap();
    let target = ExpDesc::new(Kind::NonRelocable(reg));
    let value = ExpDesc::boolean(true);
    f.store_var(&target, value, Line(1)).unwrap();
    assert_eq!(f.code_slice()[0].op, Op::LoadBool);
    assert_eq!(f.code_slice()[0].a(), reg as u32);
  }

  #[test]
  fn indexed_via_upvalue_uses_tabup_key() {
    let mut f = new_builder();
    let env = f
      .add_upvalue("_ENV", crate::proto::UpvalDesc { in_stack: true, index: 0 })
      .unwrap();
    let table = ExpDesc::new(Kind::Upvalue(env));
    let name_const = f.constants_mut().add_str("x").unwrap();
    let key = ExpDesc::new(Kind::Constant(name_const));
    let indexed = f.indexed(table, key, Line(1)).unwrap();
    match indexed.kind {
      Kind::Indexed { via_upvalue, .. } => assert!(via_upvalue),
      other => panic!("expected Indexed, got {other:?}"),
    }
  }

  #[test]
  fn new_table_emits_relocable_newtable() {
    let mut f = new_builder();
    let e = f.new_table(3, 1, Line(1)).unwrap();
    assert_eq!(f.code_slice()[0].op, Op::NewTable);
    assert_eq!(f.code_slice()[0].b(), 3);
    assert_eq!(f.code_slice()[0].c(), 1);
    match e.kind {
      Kind::Relocable(pc) => assert_eq!(pc, 0),
      other => panic!("expected Relocable, got {other:?}"),
    }
  }

  #[test]
  fn set_returns_on_vararg_claims_a_register_and_sets_b() {
    let mut f = new_builder();
    let pc = f.code_abc(Op::Vararg, 0, 1, 0, Line(1)).unwrap();
    let mut e = ExpDesc::new(Kind::Vararg(pc as u32));
    f.set_returns(&mut e, 3).unwrap();
    assert_eq!(f.code_slice()[pc as usize].b(), 4);
    assert_eq!(f.code_slice()[pc as usize].a(), 0);
    assert_eq!(f.regs().freereg(), 1, "vararg result claims its own register");
  }

  #[test]
  fn set_returns_on_call_only_touches_c() {
    let mut f = new_builder();
    let pc = f.code_abc(Op::Call, 0, 1, 0, Line(1)).unwrap();
    let mut e = ExpDesc::new(Kind::Call(pc as u32));
    f.set_returns(&mut e, -1).unwrap();
    assert_eq!(f.code_slice()[pc as usize].c(), 0, "MULTRET encodes as 0");
    assert_eq!(f.regs().freereg(), 0, "a call's result already sits in its own A register");
  }

  #[test]
  fn set_list_overflow_emits_extraarg() {
    let mut f = new_builder();
    f.set_list(0, 400, FIELDS_PER_FLUSH, Line(1)).unwrap();
    assert_eq!(f.code_slice()[0].op, Op::SetList);
    assert_eq!(f.code_slice()[0].c(), 0);
    assert_eq!(f.code_slice()[1].op, Op::ExtraArg);
    assert_eq!(f.code_slice()[1].ax_field(), 400);
  }
}
