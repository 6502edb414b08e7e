//! Terminal mode set and character substitution tables.

use crate::cell::Seq;
use bitflags::bitflags;

bitflags! {
    /// The terminal mode bitset.
    ///
    /// Set/reset through `CSI h`/`CSI l` (public and private tables), the
    /// keypad escapes, and a few controls; consulted all over the
    /// controller.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modes: u32 {
        const AUTO_WRAP        = 1 << 0;
        const SHOW_CURSOR      = 1 << 1;
        const AUTO_REPEAT      = 1 << 2;
        const ALT_SENDS_ESC    = 1 << 3;
        const INSERT           = 1 << 4;
        const CR_ON_LF         = 1 << 5;
        const ECHO             = 1 << 6;
        const KBDLOCK          = 1 << 7;
        const REVERSE          = 1 << 8;
        const APPKEYPAD        = 1 << 9;
        const APPCURSOR        = 1 << 10;
        const MOUSE_BUTTON     = 1 << 11;
        const MOUSE_MOTION     = 1 << 12;
        const MOUSE_SGR        = 1 << 13;
        const BRACKETED_PASTE  = 1 << 14;
        const DELETE_SENDS_DEL = 1 << 15;
        const ORIGIN           = 1 << 16;
    }
}

impl Modes {
    /// The modes set after power-up and after RIS.
    pub fn initial() -> Self {
        Modes::AUTO_WRAP | Modes::SHOW_CURSOR | Modes::AUTO_REPEAT | Modes::ALT_SENDS_ESC
    }

    #[inline]
    pub fn set_to(&mut self, mode: Modes, value: bool) {
        self.set(mode, value);
    }
}

/// Which character set selector is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CharSet {
    #[default]
    G0,
    G1,
}

/// A character substitution table: 7-bit codes to replacement sequences.
///
/// Applied to single-byte printables only; multi-byte input bypasses the
/// tables entirely.
#[derive(Debug, PartialEq, Eq)]
pub struct CharSub {
    table: &'static [(u8, &'static str)],
}

impl CharSub {
    /// The replacement for `ascii`, if the table has one.
    pub fn translate(&self, ascii: u8) -> Option<Seq> {
        for &(m, replacement) in self.table {
            if m == ascii {
                let bytes = replacement.as_bytes();
                let mut seq = [0u8; 4];
                seq[..bytes.len()].copy_from_slice(bytes);
                return Some(Seq::new(seq));
            }
        }
        None
    }
}

/// US-ASCII: the identity table.
pub static CS_US: CharSub = CharSub { table: &[] };

/// United Kingdom: `#` becomes the pound sign.
pub static CS_UK: CharSub = CharSub {
    table: &[(b'#', "£")],
};

/// DEC special graphics (line drawing).
pub static CS_SPECIAL: CharSub = CharSub {
    table: &[
        (b'`', "\u{2666}"), // diamond
        (b'a', "\u{2592}"), // checker board
        (b'b', "\u{2409}"), // HT
        (b'c', "\u{240C}"), // FF
        (b'd', "\u{240D}"), // CR
        (b'e', "\u{240A}"), // LF
        (b'f', "\u{00B0}"), // degree
        (b'g', "\u{00B1}"), // plus/minus
        (b'h', "\u{2424}"), // NL
        (b'i', "\u{240B}"), // VT
        (b'j', "\u{2518}"), // corner lower-right
        (b'k', "\u{2510}"), // corner upper-right
        (b'l', "\u{250C}"), // corner upper-left
        (b'm', "\u{2514}"), // corner lower-left
        (b'n', "\u{253C}"), // cross
        (b'o', "\u{23BA}"), // scan line 1
        (b'p', "\u{23BB}"), // scan line 3
        (b'q', "\u{2500}"), // scan line 5 (horizontal rule)
        (b'r', "\u{23BC}"), // scan line 7
        (b's', "\u{23BD}"), // scan line 9
        (b't', "\u{251C}"), // tee right
        (b'u', "\u{2524}"), // tee left
        (b'v', "\u{2534}"), // tee up
        (b'w', "\u{252C}"), // tee down
        (b'x', "\u{2502}"), // vertical bar
        (b'y', "\u{2264}"), // less-or-equal
        (b'z', "\u{2265}"), // greater-or-equal
        (b'{', "\u{03C0}"), // pi
        (b'|', "\u{2260}"), // not equal
        (b'}', "£"),        // pound
        (b'~', "\u{22C5}"), // dot
    ],
};
