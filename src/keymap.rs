//! Keysym to pty byte-stream encoding.
//!
//! Translates key presses into the byte sequences an application expects,
//! honouring the cursor-key and keypad application modes, linefeed/newline
//! mode, the delete-sends-DEL switch, and alt-as-ESC prefixing.

use bitflags::bitflags;

bitflags! {
    /// Keyboard modifier state as delivered by the windowing layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mods: u8 {
        const SHIFT   = 1 << 0;
        const ALT     = 1 << 1;
        const CONTROL = 1 << 2;
        const SUPER   = 1 << 3;
    }
}

impl Mods {
    /// xterm-style modifier parameter: 1 + bitfield, or None when no
    /// modifier is held.
    pub fn encode(self) -> Option<u8> {
        let mut bits = 0u8;
        if self.contains(Mods::SHIFT) {
            bits |= 1;
        }
        if self.contains(Mods::ALT) {
            bits |= 2;
        }
        if self.contains(Mods::CONTROL) {
            bits |= 4;
        }
        if bits == 0 {
            None
        } else {
            Some(1 + bits)
        }
    }
}

/// Abstract key symbol. The windowing layer maps its native keysyms onto
/// this before calling into the terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySym {
    Char(char),
    Escape,
    Enter,
    Tab,
    Backspace,
    Insert,
    Delete,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    F(u8),
    KpEnter,
    Kp(char),
}

/// Mode switches that affect the encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyMapModes {
    pub app_keypad: bool,
    pub app_cursor: bool,
    pub cr_on_lf: bool,
    pub delete_sends_del: bool,
    pub alt_sends_esc: bool,
}

/// The keysym translator.
#[derive(Default)]
pub struct KeyMap;

impl KeyMap {
    pub fn new() -> Self {
        Self
    }

    /// Encodes a key press into `out`. Returns false when the key produces
    /// no bytes (bare modifier, unbound key).
    pub fn convert(&self, sym: KeySym, mods: Mods, modes: KeyMapModes, out: &mut Vec<u8>) -> bool {
        out.clear();
        let mod_param = mods.encode();

        match sym {
            KeySym::Char(c) => self.encode_char(c, mods, modes, out),
            KeySym::Escape => {
                if mods.contains(Mods::ALT) && modes.alt_sends_esc {
                    out.push(0x1B);
                }
                out.push(0x1B);
            }
            KeySym::Enter | KeySym::KpEnter => {
                if mods.contains(Mods::ALT) && modes.alt_sends_esc {
                    out.push(0x1B);
                }
                out.push(0x0D);
                if modes.cr_on_lf {
                    out.push(0x0A);
                }
            }
            KeySym::Tab => {
                if mods.contains(Mods::SHIFT) {
                    // Shift+Tab is CBT.
                    out.extend_from_slice(b"\x1b[Z");
                } else {
                    if mods.contains(Mods::ALT) && modes.alt_sends_esc {
                        out.push(0x1B);
                    }
                    out.push(0x09);
                }
            }
            KeySym::Backspace => {
                if mods.contains(Mods::ALT) && modes.alt_sends_esc {
                    out.push(0x1B);
                }
                out.push(if mods.contains(Mods::CONTROL) { 0x08 } else { 0x7F });
            }
            KeySym::Delete => {
                if modes.delete_sends_del {
                    out.push(0x7F);
                } else {
                    encode_tilde(3, mod_param, out);
                }
            }
            KeySym::Insert => encode_tilde(2, mod_param, out),
            KeySym::PageUp => encode_tilde(5, mod_param, out),
            KeySym::PageDown => encode_tilde(6, mod_param, out),
            KeySym::Up => encode_cursor(b'A', mod_param, modes.app_cursor, out),
            KeySym::Down => encode_cursor(b'B', mod_param, modes.app_cursor, out),
            KeySym::Right => encode_cursor(b'C', mod_param, modes.app_cursor, out),
            KeySym::Left => encode_cursor(b'D', mod_param, modes.app_cursor, out),
            KeySym::Home => encode_cursor(b'H', mod_param, modes.app_cursor, out),
            KeySym::End => encode_cursor(b'F', mod_param, modes.app_cursor, out),
            KeySym::F(n) => encode_function(n, mod_param, out),
            KeySym::Kp(c) => {
                if modes.app_keypad {
                    // SS3-prefixed application keypad codes.
                    let code = match c {
                        '+' => b'k',
                        '-' => b'm',
                        '*' => b'j',
                        '/' => b'o',
                        '.' => b'n',
                        '0'..='9' => b'p' + (c as u8 - b'0'),
                        _ => {
                            return false;
                        }
                    };
                    out.extend_from_slice(&[0x1B, b'O', code]);
                } else {
                    self.encode_char(c, mods, modes, out);
                }
            }
        }

        !out.is_empty()
    }

    fn encode_char(&self, c: char, mods: Mods, modes: KeyMapModes, out: &mut Vec<u8>) {
        // Ctrl folds letters (and a few symbols) into C0 controls.
        if mods.contains(Mods::CONTROL) {
            let folded = match c {
                'a'..='z' => Some(c as u8 - b'a' + 1),
                'A'..='Z' => Some(c as u8 - b'A' + 1),
                ' ' | '@' => Some(0x00),
                '[' => Some(0x1B),
                '\\' => Some(0x1C),
                ']' => Some(0x1D),
                '^' => Some(0x1E),
                '_' => Some(0x1F),
                _ => None,
            };
            if let Some(code) = folded {
                if mods.contains(Mods::ALT) && modes.alt_sends_esc {
                    out.push(0x1B);
                }
                out.push(code);
                return;
            }
        }

        if mods.contains(Mods::ALT) && modes.alt_sends_esc {
            out.push(0x1B);
        }
        let mut buf = [0u8; 4];
        out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }
}

/// Arrow/Home/End: CSI letter normally, SS3 letter in application cursor
/// mode, `CSI 1 ; mod letter` whenever a modifier is held.
fn encode_cursor(letter: u8, mod_param: Option<u8>, app_cursor: bool, out: &mut Vec<u8>) {
    match mod_param {
        Some(m) => {
            out.extend_from_slice(b"\x1b[1;");
            push_decimal(m as u32, out);
            out.push(letter);
        }
        None if app_cursor => out.extend_from_slice(&[0x1B, b'O', letter]),
        None => out.extend_from_slice(&[0x1B, b'[', letter]),
    }
}

/// F1..F4 use SS3 finals, F5.. use `CSI n ~`.
fn encode_function(n: u8, mod_param: Option<u8>, out: &mut Vec<u8>) {
    match n {
        1..=4 => {
            let letter = b'P' + (n - 1);
            match mod_param {
                Some(m) => {
                    out.extend_from_slice(b"\x1b[1;");
                    push_decimal(m as u32, out);
                    out.push(letter);
                }
                None => out.extend_from_slice(&[0x1B, b'O', letter]),
            }
        }
        5..=12 => {
            const CODES: [u8; 8] = [15, 17, 18, 19, 20, 21, 23, 24];
            encode_tilde(CODES[(n - 5) as usize], mod_param, out);
        }
        _ => log::debug!("unbound function key F{}", n),
    }
}

/// `CSI number [; mod] ~`
fn encode_tilde(number: u8, mod_param: Option<u8>, out: &mut Vec<u8>) {
    out.extend_from_slice(b"\x1b[");
    push_decimal(number as u32, out);
    if let Some(m) = mod_param {
        out.push(b';');
        push_decimal(m as u32, out);
    }
    out.push(b'~');
}

fn push_decimal(value: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(value.to_string().as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(sym: KeySym, mods: Mods, modes: KeyMapModes) -> Vec<u8> {
        let mut out = Vec::new();
        KeyMap::new().convert(sym, mods, modes, &mut out);
        out
    }

    #[test]
    fn plain_char() {
        assert_eq!(
            convert(KeySym::Char('a'), Mods::empty(), KeyMapModes::default()),
            b"a"
        );
    }

    #[test]
    fn ctrl_char_folds() {
        assert_eq!(
            convert(KeySym::Char('c'), Mods::CONTROL, KeyMapModes::default()),
            vec![0x03]
        );
        assert_eq!(
            convert(KeySym::Char(' '), Mods::CONTROL, KeyMapModes::default()),
            vec![0x00]
        );
    }

    #[test]
    fn alt_prefixes_escape() {
        let modes = KeyMapModes {
            alt_sends_esc: true,
            ..Default::default()
        };
        assert_eq!(convert(KeySym::Char('x'), Mods::ALT, modes), vec![0x1B, b'x']);

        let no_esc = KeyMapModes::default();
        assert_eq!(convert(KeySym::Char('x'), Mods::ALT, no_esc), b"x");
    }

    #[test]
    fn arrows_respect_app_cursor() {
        let normal = KeyMapModes::default();
        assert_eq!(convert(KeySym::Up, Mods::empty(), normal), b"\x1b[A");

        let app = KeyMapModes {
            app_cursor: true,
            ..Default::default()
        };
        assert_eq!(convert(KeySym::Up, Mods::empty(), app), b"\x1bOA");

        // Modifiers force the CSI form regardless of mode.
        assert_eq!(convert(KeySym::Up, Mods::SHIFT, app), b"\x1b[1;2A");
    }

    #[test]
    fn delete_modes() {
        assert_eq!(
            convert(KeySym::Delete, Mods::empty(), KeyMapModes::default()),
            b"\x1b[3~"
        );
        let del = KeyMapModes {
            delete_sends_del: true,
            ..Default::default()
        };
        assert_eq!(convert(KeySym::Delete, Mods::empty(), del), vec![0x7F]);
    }

    #[test]
    fn enter_with_cr_on_lf() {
        let modes = KeyMapModes {
            cr_on_lf: true,
            ..Default::default()
        };
        assert_eq!(convert(KeySym::Enter, Mods::empty(), modes), b"\r\n");
        assert_eq!(
            convert(KeySym::Enter, Mods::empty(), KeyMapModes::default()),
            b"\r"
        );
    }

    #[test]
    fn function_keys() {
        assert_eq!(
            convert(KeySym::F(1), Mods::empty(), KeyMapModes::default()),
            b"\x1bOP"
        );
        assert_eq!(
            convert(KeySym::F(5), Mods::empty(), KeyMapModes::default()),
            b"\x1b[15~"
        );
        assert_eq!(
            convert(KeySym::F(12), Mods::CONTROL, KeyMapModes::default()),
            b"\x1b[24;5~"
        );
    }

    #[test]
    fn shift_tab_is_cbt() {
        assert_eq!(
            convert(KeySym::Tab, Mods::SHIFT, KeyMapModes::default()),
            b"\x1b[Z"
        );
    }

    #[test]
    fn keypad_application_mode() {
        let app = KeyMapModes {
            app_keypad: true,
            ..Default::default()
        };
        assert_eq!(convert(KeySym::Kp('0'), Mods::empty(), app), b"\x1bOp");
        assert_eq!(convert(KeySym::Kp('+'), Mods::empty(), app), b"\x1bOk");
        assert_eq!(
            convert(KeySym::Kp('5'), Mods::empty(), KeyMapModes::default()),
            b"5"
        );
    }
}
