//! Deserialize the bit-exact wire format written by
//! [`super::dump::dump`] back into a [`Prototype`].
//!
//! Every value read back is cross-checked against what the writer
//! would have produced on this platform (instruction/integer/float
//! width, the two reference constants) before any function body is
//! parsed, so a foreign or corrupt chunk is rejected immediately
//! instead of misinterpreting its bytes as a well-formed one.

use beef::lean::Cow;
use span::Line;

use crate::error::LoadError;
use crate::instruction::Instruction;
use crate::proto::{LocalVarInfo, Prototype, UpvalDesc};
use crate::value::{Constant, FiniteFloat};

use super::{ConstTag, FORMAT, LUAC_DATA, SIGNATURE, TEST_FLOAT, TEST_INT, VERSION};

struct Reader<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  fn new(bytes: &'a [u8]) -> Self {
    Reader { bytes, pos: 0 }
  }

  fn take(&mut self, n: usize) -> Result<&'a [u8], LoadError> {
    let end = self.pos.checked_add(n).ok_or(LoadError::UnexpectedEof)?;
    let slice = self.bytes.get(self.pos..end).ok_or(LoadError::UnexpectedEof)?;
    self.pos = end;
    Ok(slice)
  }

  fn u8(&mut self) -> Result<u8, LoadError> {
    Ok(self.take(1)?[0])
  }

  fn u32(&mut self) -> Result<u32, LoadError> {
    let b = self.take(4)?;
    Ok(u32::from_le_bytes(b.try_into().unwrap()))
  }

  fn i64(&mut self) -> Result<i64, LoadError> {
    let b = self.take(8)?;
    Ok(i64::from_le_bytes(b.try_into().unwrap()))
  }

  fn f64(&mut self) -> Result<f64, LoadError> {
    let b = self.take(8)?;
    Ok(f64::from_le_bytes(b.try_into().unwrap()))
  }

  fn string(&mut self) -> Result<String, LoadError> {
    let first = self.u8()?;
    let tagged_len = if first == 0xff {
      let b = self.take(8)?;
      u64::from_le_bytes(b.try_into().unwrap()) as usize
    } else if first == 0 {
      return Ok(String::new());
    } else {
      first as usize
    };
    let len = tagged_len - 1;
    let bytes = self.take(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| LoadError::Corrupt("string is not valid UTF-8"))
  }

  fn header(&mut self) -> Result<(), LoadError> {
    let sig = self.take(4)?;
    if sig != SIGNATURE {
      return Err(LoadError::BadSignature);
    }
    let version = self.u8()?;
    if version != VERSION {
      return Err(LoadError::VersionMismatch {
        expected: VERSION,
        found: version,
      });
    }
    let format = self.u8()?;
    if format != FORMAT {
      return Err(LoadError::FormatMismatch {
        expected: FORMAT,
        found: format,
      });
    }
    let data = self.take(6)?;
    if data != LUAC_DATA {
      return Err(LoadError::Corrupt("corrupted by a text-mode transfer"));
    }
    let sizeof_int = self.u8()?;
    let sizeof_size_t = self.u8()?;
    let inst_size = self.u8()?;
    let int_size = self.u8()?;
    let float_size = self.u8()?;
    if sizeof_int as usize != std::mem::size_of::<i32>()
      || sizeof_size_t as usize != std::mem::size_of::<usize>()
      || inst_size as usize != std::mem::size_of::<u32>()
      || int_size as usize != std::mem::size_of::<i64>()
      || float_size as usize != std::mem::size_of::<f64>()
    {
      return Err(LoadError::IncompatiblePlatform);
    }
    let test_int = self.i64()?;
    let test_float = self.f64()?;
    if test_int != TEST_INT || test_float != TEST_FLOAT {
      return Err(LoadError::IncompatiblePlatform);
    }
    Ok(())
  }

  fn constant(&mut self) -> Result<Constant<'static>, LoadError> {
    let tag = ConstTag::from_u8(self.u8()?).ok_or(LoadError::Corrupt("unknown constant tag"))?;
    Ok(match tag {
      ConstTag::Nil => Constant::Nil,
      ConstTag::False => Constant::Bool(false),
      ConstTag::True => Constant::Bool(true),
      ConstTag::Int => Constant::Int(self.i64()?),
      ConstTag::Number => {
        let v = self.f64()?;
        let f = FiniteFloat::new(v).ok_or(LoadError::Corrupt("NaN numeric constant"))?;
        Constant::Number(f)
      }
      ConstTag::Str => Constant::Str(Cow::owned(self.string()?)),
    })
  }

  fn function(&mut self) -> Result<Prototype<'static>, LoadError> {
    let source = Cow::owned(self.string()?);
    let line_defined = Line(self.u32()?);
    let last_line_defined = Line(self.u32()?);
    let num_params = self.u8()?;
    let is_vararg = self.u8()? != 0;
    let max_stack_size = self.u8()?;

    let code_len = self.u32()? as usize;
    let mut code = Vec::with_capacity(code_len);
    for _ in 0..code_len {
      let raw = self.u32()?;
      let op = raw & ((1 << crate::instruction::operands::OP_BITS) - 1);
      let inst = Instruction::from_parts(op, raw)
        .ok_or(LoadError::Corrupt("unknown opcode in instruction stream"))?;
      code.push(inst);
    }

    let lines_len = self.u32()? as usize;
    let mut lines = Vec::with_capacity(lines_len);
    for _ in 0..lines_len {
      lines.push(Line(self.u32()?));
    }

    let const_len = self.u32()? as usize;
    let mut constants = Vec::with_capacity(const_len);
    for _ in 0..const_len {
      constants.push(self.constant()?);
    }

    let upval_len = self.u32()? as usize;
    let mut upvalues = Vec::with_capacity(upval_len);
    for _ in 0..upval_len {
      let in_stack = self.u8()? != 0;
      let index = self.u8()?;
      upvalues.push(UpvalDesc { in_stack, index });
    }

    let proto_len = self.u32()? as usize;
    let mut protos = Vec::with_capacity(proto_len);
    for _ in 0..proto_len {
      protos.push(self.function()?);
    }

    let locals_len = self.u32()? as usize;
    let mut locals = Vec::with_capacity(locals_len);
    for _ in 0..locals_len {
      let name = Cow::owned(self.string()?);
      let start_pc = self.u32()?;
      let end_pc = self.u32()?;
      locals.push(LocalVarInfo {
        name,
        start_pc,
        end_pc,
      });
    }

    let upvalue_names_len = self.u32()? as usize;
    let mut upvalue_names = Vec::with_capacity(upvalue_names_len);
    for _ in 0..upvalue_names_len {
      upvalue_names.push(Cow::owned(self.string()?));
    }

    Ok(Prototype {
      source,
      line_defined,
      last_line_defined,
      num_params,
      is_vararg,
      max_stack_size,
      code,
      lines,
      constants,
      protos,
      upvalues,
      upvalue_names,
      locals,
    })
  }
}

/// Read a chunk previously produced by [`super::dump::dump`].
pub fn undump(bytes: &[u8]) -> Result<Prototype<'static>, LoadError> {
  let mut r = Reader::new(bytes);
  r.header()?;
  let nupvalues = r.u8()?;
  let proto = r.function()?;
  if proto.upvalues.len() != nupvalues as usize {
    return Err(LoadError::Corrupt("top-level upvalue count does not match main prototype"));
  }
  Ok(proto)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::dump::dump;

  fn sample_proto() -> Prototype<'static> {
    let mut constants = Vec::new();
    constants.push(Constant::Int(42));
    constants.push(Constant::str("hello"));
    Prototype {
      source: Cow::borrowed("=chunk"),
      line_defined: Line(0),
      last_line_defined: Line(10),
      num_params: 1,
      is_vararg: false,
      max_stack_size: 3,
      code: vec![Instruction::abc(crate::instruction::Op::Return, 0, 1, 0)],
      lines: vec![Line(10)],
      constants,
      protos: Vec::new(),
      upvalues: vec![UpvalDesc {
        in_stack: true,
        index: 0,
      }],
      upvalue_names: vec![Cow::borrowed("_ENV")],
      locals: vec![LocalVarInfo {
        name: Cow::borrowed("self"),
        start_pc: 0,
        end_pc: 1,
      }],
    }
  }

  #[test]
  fn roundtrips_a_sample_prototype() {
    let proto = sample_proto();
    let bytes = dump(&proto);
    let loaded = undump(&bytes).unwrap();
    assert_eq!(loaded.num_params, proto.num_params);
    assert_eq!(loaded.max_stack_size, proto.max_stack_size);
    assert_eq!(loaded.code, proto.code);
    assert_eq!(loaded.constants, proto.constants);
    assert_eq!(loaded.upvalues, proto.upvalues);
    assert_eq!(loaded.locals, proto.locals);
  }

  #[test]
  fn rejects_bad_signature() {
    let mut bytes = dump(&sample_proto());
    bytes[0] = 0x00;
    assert_eq!(undump(&bytes), Err(LoadError::BadSignature));
  }

  #[test]
  fn rejects_version_mismatch() {
    let mut bytes = dump(&sample_proto());
    bytes[4] = 0x99;
    assert_eq!(
      undump(&bytes),
      Err(LoadError::VersionMismatch {
        expected: VERSION,
        found: 0x99
      })
    );
  }

  #[test]
  fn truncated_stream_is_unexpected_eof() {
    let bytes = dump(&sample_proto());
    let truncated = &bytes[..bytes.len() - 5];
    assert_eq!(undump(truncated), Err(LoadError::UnexpectedEof));
  }
}
