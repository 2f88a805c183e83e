//! Bit-exact bytecode wire format: the `dump`/`undump` pair that
//! serializes a finished [`crate::proto::Prototype`] to bytes and
//! reads it back, plus a disassembler for inspecting either side by
//! eye.

pub mod disasm;
pub mod dump;
pub mod undump;

pub use dump::dump;
pub use undump::undump;

/// `"\x1bLua"` — identifies the stream as this format's bytecode
/// rather than source text (source text cannot start with `\x1b`, the
/// same trick the reference format uses).
pub const SIGNATURE: [u8; 4] = [0x1b, b'L', b'u', b'a'];

/// Bumped whenever the instruction encoding or header layout changes
/// in a way old loaders cannot read.
pub const VERSION: u8 = 0x01;

/// Reserved for future variant formats (compressed, debug-info-free,
/// ...); `0` is the only format this crate currently emits or accepts.
pub const FORMAT: u8 = 0x00;

/// Written right after the signature/version/format bytes so a loader
/// can detect a stream that was corrupted by a text-mode transfer
/// (CR/LF translation or an embedded end-of-file marker) before trying
/// to interpret anything else.
pub const LUAC_DATA: [u8; 6] = [0x19, 0x93, 0x0d, 0x0a, 0x1a, 0x0a];

/// Reference values embedded in the header and checked against the
/// loader's own encoding of them, so a mismatched integer/float
/// format (endianness, width) is caught immediately rather than
/// producing silently-wrong numbers deep in a function body.
pub const TEST_INT: i64 = 0x5678;
pub const TEST_FLOAT: f64 = 370.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConstTag {
  Nil = 0,
  False = 1,
  True = 2,
  Int = 3,
  Number = 4,
  Str = 5,
}

impl ConstTag {
  pub(crate) fn from_u8(b: u8) -> Option<Self> {
    match b {
      0 => Some(ConstTag::Nil),
      1 => Some(ConstTag::False),
      2 => Some(ConstTag::True),
      3 => Some(ConstTag::Int),
      4 => Some(ConstTag::Number),
      5 => Some(ConstTag::Str),
      _ => None,
    }
  }
}
