//! Register-stack discipline.
//!
//! Registers are not allocated from a free list: the code generator
//! maintains a single high-water mark, `freereg`, and always reserves
//! the next `n` contiguous registers above it. Locals occupy the
//! bottom `nactvar` registers permanently (until their scope ends);
//! everything above `nactvar` is temporary working space that gets
//! freed, in strict LIFO order, as each subexpression finishes using
//! it. This stack discipline (not a general allocator) is what makes a
//! single-pass compiler's register assignment decidable without
//! lookahead.

use crate::error::Error;
use crate::instruction::MAXARG_A;

#[derive(Debug)]
pub struct RegisterFile {
  /// Number of currently active local variables; registers
  /// `0..nactvar` are locals and are never reused as temporaries.
  nactvar: u8,
  /// One past the highest register currently in use by a live
  /// temporary. The next reservation starts here.
  freereg: u8,
  /// High-water mark across the whole function, recorded into the
  /// finished prototype as `max_stack_size`.
  max_stack_size: u8,
}

impl RegisterFile {
  pub fn new(num_params: u8) -> Self {
    RegisterFile {
      nactvar: num_params,
      freereg: num_params,
      max_stack_size: num_params,
    }
  }

  pub fn nactvar(&self) -> u8 {
    self.nactvar
  }

  pub fn freereg(&self) -> u8 {
    self.freereg
  }

  pub fn max_stack_size(&self) -> u8 {
    self.max_stack_size
  }

  /// Ensure `freereg + extra` registers are addressable, raising
  /// [`Error::TooManyRegisters`] if that would exceed what an 8-bit
  /// register field (`MAXARG_A`) can name.
  pub fn check_stack(&mut self, extra: u8) -> Result<(), Error> {
    let needed = self.freereg as u32 + extra as u32;
    if needed >= MAXARG_A {
      return Err(Error::TooManyRegisters);
    }
    if needed as u8 > self.max_stack_size {
      self.max_stack_size = needed as u8;
    }
    Ok(())
  }

  /// Reserve `n` contiguous registers above the current `freereg` and
  /// return the first one. The caller is responsible for emitting
  /// whatever instruction(s) populate them.
  pub fn reserve(&mut self, n: u8) -> Result<u8, Error> {
    self.check_stack(n)?;
    let first = self.freereg;
    self.freereg += n;
    Ok(first)
  }

  /// Release one temporary register. Only valid for the topmost
  /// temporary (`reg == freereg - 1`) and only when it is not a local
  /// (`reg >= nactvar`); releasing anything else would violate the
  /// stack discipline and is a bug in the caller, not a user-facing
  /// error.
  pub fn free_reg(&mut self, reg: u8) {
    if reg >= self.nactvar {
      debug_assert_eq!(
        reg,
        self.freereg - 1,
        "registers must be freed in strict LIFO order"
      );
      self.freereg -= 1;
    }
  }

  /// Free two registers, highest first, as required whenever two
  /// subexpression results are consumed together (spec §4.7: "frees
  /// the higher-numbered register first").
  pub fn free_regs(&mut self, a: u8, b: u8) {
    if a > b {
      self.free_reg(a);
      self.free_reg(b);
    } else {
      self.free_reg(b);
      self.free_reg(a);
    }
  }

  /// Commit `n` freshly reserved registers as active locals, called
  /// once their declaring statement finishes (e.g. `local x = ...`).
  pub fn activate_locals(&mut self, n: u8) {
    self.nactvar += n;
  }

  /// Pop every local above `level` and rewind `freereg` to match,
  /// called when a block scope closes.
  pub fn close_scope(&mut self, level: u8) {
    self.nactvar = level;
    self.freereg = level;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn params_occupy_the_bottom_registers() {
    let r = RegisterFile::new(3);
    assert_eq!(r.nactvar(), 3);
    assert_eq!(r.freereg(), 3);
  }

  #[test]
  fn reserve_then_free_is_lifo() {
    let mut r = RegisterFile::new(0);
    let a = r.reserve(1).unwrap();
    let b = r.reserve(1).unwrap();
    assert_eq!((a, b), (0, 1));
    r.free_reg(b);
    r.free_reg(a);
    assert_eq!(r.freereg(), 0);
  }

  #[test]
  fn max_stack_size_tracks_high_water_mark() {
    let mut r = RegisterFile::new(0);
    r.reserve(5).unwrap();
    r.close_scope(0);
    assert_eq!(r.max_stack_size(), 5);
    assert_eq!(r.freereg(), 0);
  }

  #[test]
  fn too_many_registers_errors() {
    let mut r = RegisterFile::new(0);
    r.freereg = 250;
    r.max_stack_size = 250;
    assert!(r.reserve(10).is_err());
  }

  #[test]
  fn check_stack_rejects_exactly_the_register_limit() {
    let mut r = RegisterFile::new(0);
    r.freereg = 254;
    r.max_stack_size = 254;
    assert!(r.reserve(1).is_err(), "255 registers must already fail, not only 256+");
  }

  #[test]
  fn free_regs_releases_higher_numbered_first() {
    let mut r = RegisterFile::new(0);
    let a = r.reserve(1).unwrap();
    let b = r.reserve(1).unwrap();
    r.free_regs(a, b);
    assert_eq!(r.freereg(), 0);
  }
}
