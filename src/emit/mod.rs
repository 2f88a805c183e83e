//! The single-pass function builder.
//!
//! `FuncBuilder` is the one piece of mutable state threaded through
//! every codegen call for a function body: the register file, the
//! constant pool, the code buffer, and the active-scope symbol tables.
//! It is pushed onto a stack (`Codegen::builders`) when a nested
//! function literal is entered and popped (finished into a
//! [`Prototype`]) when that literal's body is done, mirroring how the
//! reference architecture threads one `Function` per nesting level
//! through its own emitter.

pub mod arith;
pub mod assign;
pub mod bool_lowering;
pub mod constpool;
pub mod desc;
pub mod discharge;
pub mod jumps;
pub mod regalloc;

use beef::lean::Cow;
use indexmap::IndexMap;
use span::Line;

use crate::error::Error;
use crate::instruction::{Instruction, Op, NO_JUMP};
use crate::proto::{LocalVarInfo, Prototype, UpvalDesc};
use crate::value::Constant;

pub use desc::{ExpDesc, Kind};

use constpool::ConstantPool;
use regalloc::RegisterFile;

#[derive(Clone, Copy)]
struct LocalSlot {
  register: u8,
  start_pc: u32,
}

pub struct FuncBuilder<'src> {
  code: Vec<Instruction>,
  lines: Vec<Line>,
  constants: ConstantPool<'src>,
  regs: RegisterFile,

  locals: IndexMap<Cow<'src, str>, LocalSlot>,
  finished_locals: Vec<LocalVarInfo<'src>>,
  block_marks: Vec<usize>,

  upvalues: IndexMap<Cow<'src, str>, UpvalDesc>,
  protos: Vec<Prototype<'src>>,

  num_params: u8,
  is_vararg: bool,
  source: Cow<'src, str>,
  line_defined: Line,
  last_line_defined: Line,

  /// pc of the last instruction that is a known jump target, used to
  /// avoid threading a fresh `JMP` onto the pending-jump list when the
  /// previous instruction already can't fall through to it (mirrors
  /// `lasttarget` in the reference source).
  last_target: i32,
  /// Jumps already emitted whose target is "the next instruction,
  /// whatever it turns out to be" — resolved the moment [`Self::code`]
  /// appends that next instruction.
  jpc: i32,
}

impl<'src> FuncBuilder<'src> {
  pub fn new(num_params: u8, is_vararg: bool, source: Cow<'src, str>, line_defined: Line) -> Self {
    FuncBuilder {
      code: Vec::new(),
      lines: Vec::new(),
      constants: ConstantPool::new(),
      regs: RegisterFile::new(num_params),
      locals: IndexMap::new(),
      finished_locals: Vec::new(),
      block_marks: Vec::new(),
      upvalues: IndexMap::new(),
      protos: Vec::new(),
      num_params,
      is_vararg,
      source,
      line_defined,
      last_line_defined: line_defined,
      last_target: NO_JUMP,
      jpc: NO_JUMP,
    }
  }

  pub fn pc(&self) -> i32 {
    self.code.len() as i32
  }

  pub fn regs(&self) -> &RegisterFile {
    &self.regs
  }

  pub fn regs_mut(&mut self) -> &mut RegisterFile {
    &mut self.regs
  }

  pub fn constants_mut(&mut self) -> &mut ConstantPool<'src> {
    &mut self.constants
  }

  pub fn constants_entries(&self) -> &[Constant<'src>] {
    self.constants.entries()
  }

  pub fn code_slice(&self) -> &[Instruction] {
    &self.code
  }

  pub fn code_slice_mut(&mut self) -> &mut [Instruction] {
    &mut self.code
  }

  /// Append `inst`, first discharging any pending jump list (`jpc`)
  /// onto this about-to-exist instruction's pc, exactly as the
  /// reference compiler's `luaK_code` does before every emission.
  fn code(&mut self, inst: Instruction, line: Line) -> Result<i32, Error> {
    if self.jpc != NO_JUMP {
      let target = self.pc();
      jumps::patch_list(&mut self.code, self.jpc, target, jumps::NO_REG, target)?;
      self.jpc = NO_JUMP;
    }
    self.code.push(inst);
    self.lines.push(line);
    Ok(self.pc() - 1)
  }

  pub fn code_abc(&mut self, op: Op, a: u32, b: u32, c: u32, line: Line) -> Result<i32, Error> {
    self.code(Instruction::abc(op, a, b, c), line)
  }

  pub fn code_abx(&mut self, op: Op, a: u32, bx: u32, line: Line) -> Result<i32, Error> {
    self.code(Instruction::abx(op, a, bx), line)
  }

  pub fn code_asbx(&mut self, op: Op, a: u32, sbx: i32, line: Line) -> Result<i32, Error> {
    self.code(Instruction::asbx(op, a, sbx), line)
  }

  pub fn code_ax(&mut self, op: Op, ax: u32, line: Line) -> Result<i32, Error> {
    self.code(Instruction::ax(op, ax), line)
  }

  /// Load constant-pool index `k` into `reg`, choosing `LOADK` when `k`
  /// fits in `Bx` and falling back to `LOADKX` plus a trailing
  /// `EXTRAARG` carrying the true index otherwise (`luaK_codek`).
  pub fn codek(&mut self, reg: u8, k: u32, line: Line) -> Result<i32, Error> {
    if k <= crate::instruction::MAXARG_BX {
      self.code_abx(Op::LoadK, reg as u32, k, line)
    } else {
      let pc = self.code_abx(Op::LoadKx, reg as u32, 0, line)?;
      self.code_ax(Op::ExtraArg, k, line)?;
      Ok(pc)
    }
  }

  /// Emit `JMP`, threading it onto the generator's pending jump chain
  /// rather than the caller's own list, used for unconditional control
  /// flow that doesn't originate from a boolean expression (`break`,
  /// `goto`, the fallthrough jump at the end of an `if` branch).
  pub fn jump(&mut self, line: Line) -> Result<i32, Error> {
    let pc = self.code_asbx(Op::Jmp, 0, NO_JUMP, line)?;
    self.jpc = jumps::concat(&mut self.code, self.jpc, pc);
    Ok(pc)
  }

  pub fn patch_to_here(&mut self, list: i32) -> Result<(), Error> {
    let here = self.pc();
    self.jpc = jumps::concat(&mut self.code, self.jpc, list);
    jumps::patch_list(&mut self.code, self.jpc, here, jumps::NO_REG, here)?;
    self.jpc = NO_JUMP;
    Ok(())
  }

  pub fn patch_list(&mut self, list: i32, target: i32) -> Result<(), Error> {
    jumps::patch_list(&mut self.code, list, target, jumps::NO_REG, target)
  }

  /// Mark every jump in `list` as closing open upvalues down to stack
  /// level `level` on the way out, used when a loop/block exit jumps
  /// past locals that are captured by a still-live closure.
  pub fn patch_close(&mut self, list: i32, level: u8) {
    jumps::patchclose(&mut self.code, list, level as u32);
  }

  /// Retroactively overwrite the line number attributed to the most
  /// recently emitted instruction (`luaK_fixline`), used when the
  /// parser only learns an expression's true source line after already
  /// having emitted its instruction.
  pub fn fixline(&mut self, line: Line) {
    if let Some(last) = self.lines.last_mut() {
      *last = line;
    }
  }

  /// Emit `LOADNIL`, merging with an immediately preceding `LOADNIL`
  /// whose range is adjacent or overlapping rather than emitting a
  /// second instruction — the one dead-code peephole the distillation
  /// keeps in scope.
  pub fn nil(&mut self, from: u8, n: u8, line: Line) -> Result<(), Error> {
    if n == 0 {
      return Ok(());
    }
    let prev_pc = self.code.len() as i32 - 1;
    if let Some(last) = self.code.last_mut() {
      if last.op == Op::LoadNil && self.last_target != prev_pc {
        let prev_from = last.a() as u8;
        // `last.b()` stores `n - 1`, so this is the range's exclusive
        // upper bound, matching `new_to` below.
        let prev_to = prev_from + last.b() as u8 + 1;
        let new_to = from + n;
        if from <= prev_to && prev_from <= new_to {
          let merged_from = prev_from.min(from);
          let merged_to = prev_to.max(new_to);
          last.set_a(merged_from as u32);
          last.set_b((merged_to - merged_from).saturating_sub(1) as u32);
          return Ok(());
        }
      }
    }
    self.code_abc(Op::LoadNil, from as u32, n.saturating_sub(1) as u32, 0, line)?;
    Ok(())
  }

  pub fn ret(&mut self, first: u8, nresults: i32, line: Line) -> Result<i32, Error> {
    let b = if nresults < 0 {
      0
    } else {
      (nresults as u32) + 1
    };
    self.code_abc(Op::Return, first as u32, b, 0, line)
  }

  pub fn mark_jump_target(&mut self) {
    self.last_target = self.pc();
  }

  /// Discard the most recently emitted instruction, used by the `not`
  /// lowering's NOT-of-NOT and comparison-swap peepholes which replace
  /// an already-emitted instruction with a differently-parameterized
  /// one rather than layering on top of it.
  pub fn pop_last_instruction(&mut self) {
    self.code.pop();
    self.lines.pop();
  }

  // -- locals --------------------------------------------------------

  pub fn enter_block(&mut self) {
    self.block_marks.push(self.locals.len());
  }

  pub fn leave_block(&mut self) -> Result<(), Error> {
    let mark = self.block_marks.pop().unwrap_or(0);
    let level = if mark == 0 {
      self.num_params
    } else {
      self.locals.get_index(mark - 1).map(|(_, s)| s.register + 1).unwrap_or(self.num_params)
    };
    while self.locals.len() > mark {
      if let Some((name, slot)) = self.locals.pop() {
        self.finished_locals.push(LocalVarInfo {
          name,
          start_pc: slot.start_pc,
          end_pc: self.pc() as u32,
        });
      }
    }
    self.regs.close_scope(level);
    Ok(())
  }

  pub fn declare_local(&mut self, name: impl Into<Cow<'src, str>>) -> Result<u8, Error> {
    let register = self.regs.reserve(1)?;
    self.regs.activate_locals(1);
    let start_pc = self.pc() as u32;
    self.locals.insert(name.into(), LocalSlot { register, start_pc });
    Ok(register)
  }

  pub fn resolve_local(&self, name: &str) -> Option<u8> {
    self.locals.get(name).map(|s| s.register)
  }

  pub fn resolve_upvalue(&self, name: &str) -> Option<u8> {
    self.upvalues.get_index_of(name).map(|i| i as u8)
  }

  pub fn add_upvalue(&mut self, name: impl Into<Cow<'src, str>>, desc: UpvalDesc) -> Result<u8, Error> {
    let name = name.into();
    if let Some(idx) = self.upvalues.get_index_of(name.as_ref()) {
      return Ok(idx as u8);
    }
    let idx = self.upvalues.len();
    if idx > u8::MAX as usize {
      return Err(Error::TooManyUpvalues);
    }
    self.upvalues.insert(name, desc);
    Ok(idx as u8)
  }

  pub fn add_proto(&mut self, proto: Prototype<'src>) -> Result<u32, Error> {
    self.protos.push(proto);
    Ok((self.protos.len() - 1) as u32)
  }

  /// Emit `CLOSURE Bx`, instantiating a closure over the `proto_index`th
  /// nested prototype (as registered by [`Self::add_proto`]). The
  /// closure's upvalues are not trailing pseudo-instructions here — they
  /// ride on the child `Prototype`'s own `upvalues` vector as
  /// `(in_stack, index)` pairs, which the VM reads back when it executes
  /// this instruction.
  pub fn closure(&mut self, proto_index: u32, line: Line) -> Result<ExpDesc, Error> {
    let pc = self.code_abx(Op::Closure, 0, proto_index, line)?;
    Ok(ExpDesc::new(Kind::Relocable(pc as u32)))
  }

  pub fn set_last_line(&mut self, line: Line) {
    self.last_line_defined = line;
  }

  pub fn finish(mut self) -> Prototype<'src> {
    while !self.block_marks.is_empty() {
      let _ = self.leave_block();
    }
    let end_pc = self.pc() as u32;
    while let Some((name, slot)) = self.locals.pop() {
      self.finished_locals.push(LocalVarInfo {
        name,
        start_pc: slot.start_pc,
        end_pc,
      });
    }
    let mut locals = self.finished_locals;
    locals.sort_by_key(|l| l.start_pc);
    let upvalue_names = self.upvalues.keys().cloned().collect();
    let upvalues = self.upvalues.values().copied().collect();
    Prototype {
      source: self.source,
      line_defined: self.line_defined,
      last_line_defined: self.last_line_defined,
      num_params: self.num_params,
      is_vararg: self.is_vararg,
      max_stack_size: self.regs.max_stack_size(),
      code: self.code,
      lines: self.lines,
      constants: self.constants.entries().to_vec(),
      protos: self.protos,
      upvalues,
      upvalue_names,
      locals,
    }
  }
}

/// Intern a literal expression's value as a constant-pool entry and
/// wrap it in the matching [`ExpDesc`] kind, used by the parser's
/// literal-lowering call sites (`Codegen::literal_nil`, etc., in the
/// full front end).
pub fn constant_expr<'src>(
  pool: &mut ConstantPool<'src>,
  value: Constant<'src>,
) -> Result<ExpDesc, Error> {
  let idx = pool.add(value)?;
  Ok(ExpDesc::new(Kind::Constant(idx)))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn new_builder() -> FuncBuilder<'static> {
    FuncBuilder::new(0, false, Cow::borrowed("test"), Line(1))
  }

  #[test]
  fn nil_peephole_merges_adjacent_ranges() {
    let mut f = new_builder();
    f.regs_mut().reserve(4).unwrap();
    f.nil(0, 2, Line(1)).unwrap();
    f.nil(2, 2, Line(1)).unwrap();
    assert_eq!(f.code_slice().len(), 1);
    let inst = f.code_slice()[0];
    assert_eq!(inst.a(), 0);
    assert_eq!(inst.b(), 3);
  }

  #[test]
  fn nil_peephole_keeps_the_wider_range_when_the_new_one_nests_inside_it() {
    let mut f = new_builder();
    f.regs_mut().reserve(4).unwrap();
    f.nil(0, 4, Line(1)).unwrap();
    f.nil(1, 2, Line(1)).unwrap();
    assert_eq!(f.code_slice().len(), 1);
    let inst = f.code_slice()[0];
    assert_eq!(inst.a(), 0);
    assert_eq!(inst.b(), 3, "register 3 from the first LOADNIL must not be dropped");
  }

  #[test]
  fn declare_local_reserves_and_activates_a_register() {
    let mut f = new_builder();
    let r = f.declare_local("x").unwrap();
    assert_eq!(r, 0);
    assert_eq!(f.resolve_local("x"), Some(0));
    assert_eq!(f.regs().nactvar(), 1);
  }

  #[test]
  fn leave_block_frees_locals_declared_inside_it() {
    let mut f = new_builder();
    f.enter_block();
    f.declare_local("x").unwrap();
    f.declare_local("y").unwrap();
    assert_eq!(f.regs().nactvar(), 2);
    f.leave_block().unwrap();
    assert_eq!(f.regs().nactvar(), 0);
    assert_eq!(f.resolve_local("x"), None);
  }

  #[test]
  fn add_upvalue_dedups_by_name() {
    let mut f = new_builder();
    let a = f
      .add_upvalue("x", UpvalDesc { in_stack: true, index: 0 })
      .unwrap();
    let b = f
      .add_upvalue("x", UpvalDesc { in_stack: true, index: 0 })
      .unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn codek_emits_loadk_within_bx_range() {
    let mut f = new_builder();
    f.codek(0, 7, Line(1)).unwrap();
    assert_eq!(f.code_slice()[0].op, Op::LoadK);
    assert_eq!(f.code_slice()[0].bx(), 7);
  }

  #[test]
  fn codek_emits_loadkx_and_extraarg_beyond_bx_range() {
    let mut f = new_builder();
    let k = crate::instruction::MAXARG_BX + 1;
    f.codek(0, k, Line(1)).unwrap();
    assert_eq!(f.code_slice()[0].op, Op::LoadKx);
    assert_eq!(f.code_slice()[0].bx(), 0);
    assert_eq!(f.code_slice()[1].op, Op::ExtraArg);
    assert_eq!(f.code_slice()[1].ax_field(), k);
  }

  #[test]
  fn closure_emits_abx_indexing_the_registered_proto() {
    let mut f = new_builder();
    let nested = FuncBuilder::new(0, false, Cow::borrowed("test"), Line(2)).finish();
    let idx = f.add_proto(nested).unwrap();
    let e = f.closure(idx, Line(2)).unwrap();
    assert_eq!(f.code_slice()[0].op, Op::Closure);
    assert_eq!(f.code_slice()[0].bx(), idx);
    match e.kind {
      Kind::Relocable(pc) => assert_eq!(pc, 0),
      other => panic!("expected Relocable, got {other:?}"),
    }
  }

  #[test]
  fn patch_close_writes_biased_level_into_every_jump() {
    let mut f = new_builder();
    let a = f.jump(Line(1)).unwrap();
    f.patch_close(a, 2);
    assert_eq!(f.code_slice()[a as usize].a(), 3, "level is biased by +1 so 0 stays \"no close\"");
  }

  #[test]
  fn fixline_overwrites_the_last_instructions_line() {
    let mut f = new_builder();
    f.code_abc(Op::Move, 0, 0, 0, Line(1)).unwrap();
    f.fixline(Line(42));
    assert_eq!(f.lines[0], Line(42));
  }

  #[test]
  fn finish_records_max_stack_size() {
    let mut f = new_builder();
    f.declare_local("x").unwrap();
    f.declare_local("y").unwrap();
    let proto = f.finish();
    assert_eq!(proto.max_stack_size, 2);
    assert_eq!(proto.locals.len(), 2);
  }
}
