//! Cell and style value types for the terminal grid.
//!
//! A cell is one drawable grid unit: a UTF-8 sequence of up to four bytes
//! plus the style it was written with. Cells are plain value objects with
//! structural equality, which is what lets whole paragraphs be hashed and
//! deduplicated byte-for-byte.

use bitflags::bitflags;

/// A single UTF-8 encoded code point, at most four bytes.
///
/// The length is not stored; it is derived from the lead byte, so a `Seq`
/// is a fixed 4-byte value that can be compared and hashed directly.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Seq {
    pub bytes: [u8; 4],
}

impl Seq {
    /// A single ASCII byte.
    #[inline]
    pub const fn ascii(b: u8) -> Self {
        Self {
            bytes: [b, 0, 0, 0],
        }
    }

    /// Builds a sequence from a decoded buffer. `len` must be 1..=4 and
    /// must match the lead byte.
    #[inline]
    pub fn new(bytes: [u8; 4]) -> Self {
        Self { bytes }
    }

    /// The lead byte.
    #[inline]
    pub fn lead(&self) -> u8 {
        self.bytes[0]
    }

    /// Sequence length in bytes, derived from the lead byte.
    #[inline]
    pub fn len(&self) -> usize {
        lead_length(self.bytes[0])
    }

    /// The encoded bytes, without trailing zero padding.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }
}

impl std::fmt::Debug for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(self.as_bytes()) {
            Ok(s) => write!(f, "Seq({:?})", s),
            Err(_) => write!(f, "Seq({:02x?})", self.as_bytes()),
        }
    }
}

/// Length of a UTF-8 sequence from its lead byte. Invalid leads count as 1
/// so that a corrupt cell still renders as a single unit.
#[inline]
pub fn lead_length(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

/// A terminal colour.
///
/// Indexed colours go through the palette; the default sentinels resolve to
/// the palette's default foreground/background and survive fg/bg swaps
/// (reverse video, inverse attribute) with their meaning intact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    /// The palette's default foreground.
    DefaultFg,
    /// The palette's default background.
    DefaultBg,
    /// Palette index 0..=255.
    Indexed(u8),
    /// Direct 24-bit colour.
    Rgb(u8, u8, u8),
}

bitflags! {
    /// Style attribute set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Attrs: u8 {
        const BOLD      = 1 << 0;
        const FAINT     = 1 << 1;
        const ITALIC    = 1 << 2;
        const UNDERLINE = 1 << 3;
        const BLINK     = 1 << 4;
        const INVERSE   = 1 << 5;
        const CONCEAL   = 1 << 6;
    }
}

/// The rendering style of a cell: colours plus attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Style {
    pub fg: Color,
    pub bg: Color,
    pub attrs: Attrs,
}

impl Style {
    /// The default style: default colours, no attributes.
    #[inline]
    pub const fn normal() -> Self {
        Self {
            fg: Color::DefaultFg,
            bg: Color::DefaultBg,
            attrs: Attrs::empty(),
        }
    }
}

impl Default for Style {
    fn default() -> Self {
        Self::normal()
    }
}

/// One grid unit: a UTF-8 sequence and its style.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cell {
    pub seq: Seq,
    pub style: Style,
}

impl Cell {
    /// A blank cell (single space) in the given style.
    #[inline]
    pub const fn blank(style: Style) -> Self {
        Self {
            seq: Seq::ascii(b' '),
            style,
        }
    }

    /// A cell holding an ASCII character.
    #[inline]
    pub const fn ascii(b: u8, style: Style) -> Self {
        Self {
            seq: Seq::ascii(b),
            style,
        }
    }

    /// A cell holding a decoded UTF-8 sequence.
    #[inline]
    pub fn utf8(seq: Seq, style: Style) -> Self {
        Self { seq, style }
    }

    /// True if this cell is a blank in the default style.
    #[inline]
    pub fn is_blank(&self) -> bool {
        *self == Cell::blank(Style::normal())
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::blank(Style::normal())
    }
}

/// A position in the active grid: row then column, both zero-based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pos {
    pub row: u16,
    pub col: u16,
}

impl Pos {
    #[inline]
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }

    #[inline]
    pub fn at_col(self, col: u16) -> Self {
        Self { col, ..self }
    }

    #[inline]
    pub fn at_row(self, row: u16) -> Self {
        Self { row, ..self }
    }

    #[inline]
    pub fn left(self, n: u16) -> Self {
        Self {
            col: self.col.saturating_sub(n),
            ..self
        }
    }

    #[inline]
    pub fn right(self, n: u16) -> Self {
        Self {
            col: self.col.saturating_add(n),
            ..self
        }
    }

    #[inline]
    pub fn up(self, n: u16) -> Self {
        Self {
            row: self.row.saturating_sub(n),
            ..self
        }
    }

    #[inline]
    pub fn down(self, n: u16) -> Self {
        Self {
            row: self.row.saturating_add(n),
            ..self
        }
    }
}
