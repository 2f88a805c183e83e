//! Diagnostic reporting for weft.
//!
//! The compiler and the bytecode serializer both need to surface fatal
//! errors to whatever embeds them (a REPL, a test harness, a CLI). This
//! crate gives them one consistent, colorized shape to report through,
//! modeled as a small typestate builder so a [`Report`] can't be built
//! without a message and a level.

use std::fmt;
use std::fmt::Write as _;

use owo_colors::OwoColorize;
use span::Line;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
  Error,
  Warning,
}

impl Level {
  fn label(self) -> &'static str {
    match self {
      Level::Error => "error",
      Level::Warning => "warning",
    }
  }
}

#[derive(Clone)]
pub struct ReportBuilder<Msg> {
  level: Level,
  message: Msg,
  line: Option<Line>,
  color: bool,
}

impl ReportBuilder<()> {
  pub fn message(self, message: impl Into<String>) -> ReportBuilder<String> {
    ReportBuilder {
      level: self.level,
      message: message.into(),
      line: self.line,
      color: self.color,
    }
  }
}

impl<Msg> ReportBuilder<Msg> {
  pub fn line(mut self, line: impl Into<Line>) -> Self {
    self.line = Some(line.into());
    self
  }

  pub fn color(mut self, enabled: bool) -> Self {
    self.color = enabled;
    self
  }
}

impl ReportBuilder<String> {
  pub fn build(self) -> Report {
    Report {
      level: self.level,
      message: self.message,
      line: self.line,
      color: self.color,
    }
  }
}

pub struct Report {
  level: Level,
  message: String,
  line: Option<Line>,
  color: bool,
}

impl Report {
  pub fn error() -> ReportBuilder<()> {
    ReportBuilder {
      level: Level::Error,
      message: (),
      line: None,
      color: true,
    }
  }

  pub fn warning() -> ReportBuilder<()> {
    ReportBuilder {
      level: Level::Warning,
      message: (),
      line: None,
      color: true,
    }
  }

  pub fn emit<W: ?Sized + fmt::Write>(&self, w: &mut W) -> fmt::Result {
    let label = self.level.label();
    match (self.level, self.color) {
      (Level::Error, true) => write!(w, "{}", label.red().bold())?,
      (Level::Warning, true) => write!(w, "{}", label.yellow().bold())?,
      (_, false) => write!(w, "{label}")?,
    }
    write!(w, ": {}", self.message)?;
    if let Some(line) = self.line {
      if !line.is_synthetic() {
        write!(w, " (line {line})")?;
      }
    }
    Ok(())
  }

  pub fn emit_to_string(&self) -> Result<String, fmt::Error> {
    let mut out = String::new();
    self.emit(&mut out)?;
    Ok(out)
  }
}

impl fmt::Display for Report {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut buf = String::new();
    self.emit(&mut buf).map_err(|_| fmt::Error)?;
    f.write_str(&buf)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn formats_message_with_line() {
    let report = Report::error()
      .message("control structure too long")
      .line(12)
      .color(false)
      .build();
    assert_eq!(
      report.emit_to_string().unwrap(),
      "error: control structure too long (line 12)"
    );
  }

  #[test]
  fn omits_synthetic_line() {
    let report = Report::error()
      .message("too many constants")
      .color(false)
      .build();
    assert_eq!(
      report.emit_to_string().unwrap(),
      "error: too many constants"
    );
  }
}
