//! Serialize a finished [`Prototype`] to the bit-exact wire format.
//!
//! Every multi-byte integer is written little-endian, and every string
//! uses the reference format's length-prefix convention: a length of
//! zero means the empty string; lengths that fit in a byte minus one
//! are written as a single length byte (`len + 1`); longer strings are
//! preceded by `0xFF` and then an 8-byte length, matching
//! `lundump.c`'s `LoadString`/`DumpString` escape so very long strings
//! don't have to pay the 8-byte tag in the common case.

use crate::proto::Prototype;

use super::{ConstTag, FORMAT, LUAC_DATA, SIGNATURE, TEST_FLOAT, TEST_INT, VERSION};

pub struct Writer {
  buf: Vec<u8>,
}

impl Writer {
  fn new() -> Self {
    Writer { buf: Vec::new() }
  }

  fn u8(&mut self, b: u8) {
    self.buf.push(b);
  }

  fn bytes(&mut self, b: &[u8]) {
    self.buf.extend_from_slice(b);
  }

  fn u32(&mut self, v: u32) {
    self.bytes(&v.to_le_bytes());
  }

  fn i64(&mut self, v: i64) {
    self.bytes(&v.to_le_bytes());
  }

  fn f64(&mut self, v: f64) {
    self.bytes(&v.to_le_bytes());
  }

  fn string(&mut self, s: &str) {
    let len = s.len();
    if len == 0 {
      self.u8(0);
      return;
    }
    let tagged = len + 1;
    if tagged < 0xff {
      self.u8(tagged as u8);
    } else {
      self.u8(0xff);
      self.bytes(&(tagged as u64).to_le_bytes());
    }
    self.bytes(s.as_bytes());
  }

  fn header(&mut self) {
    self.bytes(&SIGNATURE);
    self.u8(VERSION);
    self.u8(FORMAT);
    self.bytes(&LUAC_DATA);
    self.u8(std::mem::size_of::<i32>() as u8); // int width
    self.u8(std::mem::size_of::<usize>() as u8); // size_t width
    self.u8(std::mem::size_of::<u32>() as u8); // instruction width
    self.u8(std::mem::size_of::<i64>() as u8); // integer width
    self.u8(std::mem::size_of::<f64>() as u8); // float width
    self.i64(TEST_INT);
    self.f64(TEST_FLOAT);
  }

  fn function(&mut self, proto: &Prototype<'_>) {
    self.string(proto.source.as_ref());
    self.u32(proto.line_defined.into());
    self.u32(proto.last_line_defined.into());
    self.u8(proto.num_params);
    self.u8(proto.is_vararg as u8);
    self.u8(proto.max_stack_size);

    self.u32(proto.code.len() as u32);
    for inst in &proto.code {
      self.bytes(&inst.to_le_bytes());
    }

    self.u32(proto.lines.len() as u32);
    for line in &proto.lines {
      self.u32((*line).into());
    }

    self.u32(proto.constants.len() as u32);
    for c in &proto.constants {
      self.constant(c);
    }

    self.u32(proto.upvalues.len() as u32);
    for up in &proto.upvalues {
      self.u8(up.in_stack as u8);
      self.u8(up.index);
    }

    self.u32(proto.protos.len() as u32);
    for child in &proto.protos {
      self.function(child);
    }

    self.u32(proto.locals.len() as u32);
    for local in &proto.locals {
      self.string(local.name.as_ref());
      self.u32(local.start_pc);
      self.u32(local.end_pc);
    }

    self.u32(proto.upvalue_names.len() as u32);
    for name in &proto.upvalue_names {
      self.string(name.as_ref());
    }
  }

  fn constant(&mut self, c: &crate::value::Constant<'_>) {
    use crate::value::Constant;
    match c {
      Constant::Nil => self.u8(ConstTag::Nil as u8),
      Constant::Bool(false) => self.u8(ConstTag::False as u8),
      Constant::Bool(true) => self.u8(ConstTag::True as u8),
      Constant::Int(i) => {
        self.u8(ConstTag::Int as u8);
        self.i64(*i);
      }
      Constant::Number(f) => {
        self.u8(ConstTag::Number as u8);
        self.f64(f.get());
      }
      Constant::Str(s) => {
        self.u8(ConstTag::Str as u8);
        self.string(s.as_ref());
      }
    }
  }
}

/// Dump `proto` (the outermost, "main" function) to a byte vector.
pub fn dump(proto: &Prototype<'_>) -> Vec<u8> {
  let mut w = Writer::new();
  w.header();
  // Written once, ahead of the recursive function record, so a loader
  // knows how many upvalues to prime the main chunk's closure with
  // (normally just `_ENV`) before it has parsed anything else.
  w.u8(proto.upvalues.len() as u8);
  w.function(proto);
  w.buf
}
