//! Text disassembler for a finished [`Prototype`], used by snapshot
//! tests to pin down what a given source fragment compiles to without
//! asserting on raw instruction words.

use std::fmt::Write;

use crate::instruction::{is_rk_constant, rk_index, Op};
use crate::proto::Prototype;
use crate::value::Constant;

fn format_constant(c: &Constant<'_>) -> String {
  match c {
    Constant::Nil => "nil".to_string(),
    Constant::Bool(b) => b.to_string(),
    Constant::Int(i) => i.to_string(),
    Constant::Number(f) => format!("{}", f.get()),
    Constant::Str(s) => format!("{s:?}"),
  }
}

fn operand_rk(pool: &[Constant<'_>], field: u32) -> String {
  if is_rk_constant(field) {
    let idx = rk_index(field);
    format!("K{idx}({})", format_constant(&pool[idx as usize]))
  } else {
    format!("R{field}")
  }
}

fn format_instruction(proto: &Prototype<'_>, pc: usize) -> String {
  let inst = proto.code[pc];
  let line = proto.lines.get(pc).copied().unwrap_or_default();
  let mut out = format!("{pc:>4}  [{line}]  {:<10}", inst.op.name());
  match inst.op {
    Op::Jmp => {
      let _ = write!(out, "{:>4} ; to {}", inst.sbx(), pc as i32 + 1 + inst.sbx());
    }
    Op::LoadK => {
      let idx = inst.bx();
      let _ = write!(
        out,
        "R{} K{idx}({})",
        inst.a(),
        format_constant(&proto.constants[idx as usize])
      );
    }
    Op::Eq | Op::Lt | Op::Le => {
      let _ = write!(
        out,
        "{} {} {}",
        inst.a(),
        operand_rk(&proto.constants, inst.b()),
        operand_rk(&proto.constants, inst.c())
      );
    }
    Op::Add
    | Op::Sub
    | Op::Mul
    | Op::Mod
    | Op::Pow
    | Op::Div
    | Op::IDiv
    | Op::BAnd
    | Op::BOr
    | Op::BXor
    | Op::Shl
    | Op::Shr
    | Op::GetTable
    | Op::SetTable
    | Op::GetTabUp
    | Op::SetTabUp => {
      let _ = write!(
        out,
        "R{} {} {}",
        inst.a(),
        operand_rk(&proto.constants, inst.b()),
        operand_rk(&proto.constants, inst.c())
      );
    }
    Op::Move | Op::Unm | Op::BNot | Op::Not | Op::Len | Op::GetUpval | Op::SetUpval => {
      let _ = write!(out, "R{} R{}", inst.a(), inst.b());
    }
    Op::Return | Op::Call | Op::TailCall | Op::Vararg => {
      let _ = write!(out, "R{} B={} C={}", inst.a(), inst.b(), inst.c());
    }
    Op::Closure => {
      let _ = write!(out, "R{} proto[{}]", inst.a(), inst.bx());
    }
    _ => {
      let _ = write!(out, "A={} B={} C={}", inst.a(), inst.b(), inst.c());
    }
  }
  out
}

/// Render `proto`'s code, its constant pool, and (recursively) each
/// nested prototype as plain text.
pub fn disassemble(proto: &Prototype<'_>) -> String {
  let mut out = String::new();
  disassemble_into(proto, 0, &mut out);
  out
}

fn disassemble_into(proto: &Prototype<'_>, depth: usize, out: &mut String) {
  let indent = "  ".repeat(depth);
  let _ = writeln!(
    out,
    "{indent}function <{}:{}-{}> ({} params, {} upvalues, {} instructions)",
    proto.source,
    proto.line_defined,
    proto.last_line_defined,
    proto.num_params,
    proto.upvalues.len(),
    proto.code.len()
  );
  for pc in 0..proto.code.len() {
    let _ = writeln!(out, "{indent}{}", format_instruction(proto, pc));
  }
  for (i, c) in proto.constants.iter().enumerate() {
    let _ = writeln!(out, "{indent}constant K{i}: {}", format_constant(c));
  }
  for child in &proto.protos {
    disassemble_into(child, depth + 1, out);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use beef::lean::Cow;
  use span::Line;

  #[test]
  fn disassembles_a_single_return() {
    let proto = Prototype {
      source: Cow::borrowed("chunk"),
      line_defined: Line(0),
      last_line_defined: Line(1),
      num_params: 0,
      is_vararg: false,
      max_stack_size: 1,
      code: vec![crate::instruction::Instruction::abc(Op::Return, 0, 1, 0)],
      lines: vec![Line(1)],
      constants: Vec::new(),
      protos: Vec::new(),
      upvalues: Vec::new(),
      upvalue_names: Vec::new(),
      locals: Vec::new(),
    };
    let text = disassemble(&proto);
    assert!(text.contains("RETURN"));
    assert!(text.contains("function <chunk:0-1>"));
  }
}
