//! Source line tracking used by the weft code generator.
//!
//! Unlike a byte-range span, every instruction the code generator emits is
//! tagged with a single source line number, because the line-info vector
//! generated here is not used for highlighting ranges of source text: it is
//! read back by the bytecode dump/undump format and by the VM for error
//! reporting, both of which only ever need "which line is the current
//! instruction on".

use std::ops::{Deref, DerefMut};

/// A 1-based source line number. Line `0` is used internally for
/// synthetic instructions that have no corresponding source text (for
/// example, the implicit `return` appended to a function body).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Line(pub u32);

impl Line {
  pub const SYNTHETIC: Line = Line(0);

  pub fn is_synthetic(&self) -> bool {
    self.0 == 0
  }
}

impl From<u32> for Line {
  fn from(value: u32) -> Self {
    Line(value)
  }
}

impl From<Line> for u32 {
  fn from(value: Line) -> Self {
    value.0
  }
}

impl std::fmt::Display for Line {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A value paired with the source line it originated from.
///
/// Used by test harnesses that stand in for the parser to attach line
/// numbers to the fragments they feed into the code generator.
#[derive(Clone, Copy, Default)]
pub struct Spanned<T> {
  pub line: Line,
  value: T,
}

impl<T> Spanned<T> {
  pub fn new(line: impl Into<Line>, value: T) -> Spanned<T> {
    Spanned {
      line: line.into(),
      value,
    }
  }

  pub fn into_inner(self) -> T {
    self.value
  }

  #[inline]
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
    Spanned {
      line: self.line,
      value: f(self.value),
    }
  }
}

impl<T> Deref for Spanned<T> {
  type Target = T;

  fn deref(&self) -> &Self::Target {
    &self.value
  }
}

impl<T> DerefMut for Spanned<T> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.value
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn synthetic_line_is_zero() {
    assert!(Line::SYNTHETIC.is_synthetic());
    assert!(!Line(1).is_synthetic());
  }

  #[test]
  fn spanned_derefs_to_value() {
    let s = Spanned::new(3, 42i32);
    assert_eq!(*s, 42);
    assert_eq!(s.line, Line(3));
  }
}
