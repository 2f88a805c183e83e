//! Constant pool deduplication.
//!
//! Every literal the function body references is interned here
//! exactly once: a second occurrence of the same value reuses the
//! first's index instead of appending a duplicate. The dedup key must
//! distinguish an integer `1` from a float `1.0` — they fold to
//! different `Constant` variants and must occupy different slots, since
//! the VM's arithmetic opcodes behave differently depending on which
//! one a register or RK operand holds.

use indexmap::IndexMap;

use crate::error::Error;
use crate::instruction::MAXARG_AX;
use crate::value::{Constant, FiniteFloat};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Key<'src> {
  Nil,
  Bool(bool),
  Int(i64),
  Number(u64),
  Str(&'src str),
}

fn key_for<'src>(c: &'src Constant<'src>) -> Key<'src> {
  match c {
    Constant::Nil => Key::Nil,
    Constant::Bool(b) => Key::Bool(*b),
    Constant::Int(i) => Key::Int(*i),
    Constant::Number(f) => Key::Number(f.get().to_bits()),
    Constant::Str(s) => Key::Str(s.as_ref()),
  }
}

/// `'src` borrows string constants straight from the source text;
/// `'pool` is the lifetime of the pool itself, which the `Str` key
/// borrows into — a `ConstantPool` is therefore self-referential only
/// in the sense that its `IndexMap` keys borrow from the same
/// `Constant` values stored in `entries`, which is why `key_for` is
/// recomputed from `entries` rather than cached independently.
pub struct ConstantPool<'src> {
  entries: Vec<Constant<'src>>,
  index: IndexMap<KeyOwned, u32>,
}

/// An owned copy of [`Key`], used as the actual map key so the map
/// does not borrow from `entries` while `entries` is being mutated.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum KeyOwned {
  Nil,
  Bool(bool),
  Int(i64),
  Number(u64),
  Str(String),
}

fn owned_key(c: &Constant<'_>) -> KeyOwned {
  match key_for(c) {
    Key::Nil => KeyOwned::Nil,
    Key::Bool(b) => KeyOwned::Bool(b),
    Key::Int(i) => KeyOwned::Int(i),
    Key::Number(bits) => KeyOwned::Number(bits),
    Key::Str(s) => KeyOwned::Str(s.to_owned()),
  }
}

impl<'src> ConstantPool<'src> {
  pub fn new() -> Self {
    ConstantPool {
      entries: Vec::new(),
      index: IndexMap::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn entries(&self) -> &[Constant<'src>] {
    &self.entries
  }

  /// Intern `value`, returning its index in the pool. Structurally
  /// equal values (by the dedup key above) are never inserted twice.
  /// Indices beyond `MAXARG_BX` still fit — `codek` falls back to
  /// `LOADKX` plus an `EXTRAARG` carrying the full index — so the cap
  /// here is `MAXARG_AX`, the largest index `EXTRAARG` itself can carry.
  pub fn add(&mut self, value: Constant<'src>) -> Result<u32, Error> {
    let key = owned_key(&value);
    if let Some(&idx) = self.index.get(&key) {
      return Ok(idx);
    }
    let idx = self.entries.len() as u32;
    if idx > MAXARG_AX {
      return Err(Error::TooManyConstants);
    }
    self.entries.push(value);
    self.index.insert(key, idx);
    Ok(idx)
  }

  pub fn add_nil(&mut self) -> Result<u32, Error> {
    self.add(Constant::Nil)
  }

  pub fn add_bool(&mut self, b: bool) -> Result<u32, Error> {
    self.add(Constant::Bool(b))
  }

  pub fn add_int(&mut self, i: i64) -> Result<u32, Error> {
    self.add(Constant::Int(i))
  }

  pub fn add_number(&mut self, f: FiniteFloat) -> Result<u32, Error> {
    self.add(Constant::Number(f))
  }

  pub fn add_str(&mut self, s: impl Into<beef::lean::Cow<'src, str>>) -> Result<u32, Error> {
    self.add(Constant::str(s))
  }
}

impl<'src> Default for ConstantPool<'src> {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn duplicate_strings_share_one_slot() {
    let mut pool = ConstantPool::new();
    let a = pool.add_str("foo").unwrap();
    let b = pool.add_str("foo".to_string()).unwrap();
    assert_eq!(a, b);
    assert_eq!(pool.len(), 1);
  }

  #[test]
  fn int_and_float_of_same_magnitude_are_distinct() {
    let mut pool = ConstantPool::new();
    let i = pool.add_int(1).unwrap();
    let f = pool.add_number(FiniteFloat::new(1.0).unwrap()).unwrap();
    assert_ne!(i, f);
    assert_eq!(pool.len(), 2);
  }

  #[test]
  fn positive_and_negative_zero_are_distinct() {
    let mut pool = ConstantPool::new();
    let pos = pool.add_number(FiniteFloat::new(0.0).unwrap()).unwrap();
    let neg = pool.add_number(FiniteFloat::new(-0.0).unwrap()).unwrap();
    assert_ne!(pos, neg);
  }

  #[test]
  fn indices_are_assigned_in_insertion_order() {
    let mut pool = ConstantPool::new();
    assert_eq!(pool.add_int(10).unwrap(), 0);
    assert_eq!(pool.add_int(20).unwrap(), 1);
    assert_eq!(pool.add_int(10).unwrap(), 0);
  }
}
