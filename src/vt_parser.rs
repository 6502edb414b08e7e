//! VT escape sequence parser.
//!
//! Consumes decoded UTF-8 sequences one at a time and produces typed
//! events. The state machine follows the VT500-series parser: GROUND,
//! ESC, ESC intermediate, CSI entry/param, OSC string and DCS passthrough.
//! CAN and SUB abort any sequence and return to GROUND without dispatch.
//!
//! The controller drives a single `match` over [`Event`] variants; no
//! callback plumbing, no exceptions-as-control-flow.

use crate::cell::Seq;

/// Maximum number of CSI parameters retained. Further parameters are
/// parsed and silently discarded.
pub const MAX_CSI_PARAMS: usize = 16;

/// Maximum digits accumulated per parameter; the value saturates.
const MAX_PARAM_DIGITS: u32 = 16;

/// Maximum length of an OSC or DCS string body before the sequence is
/// abandoned.
const MAX_STRING_LEN: usize = 32 * 1024;

const ESC: u8 = 0x1B;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1A;
const BEL: u8 = 0x07;
const ST_C1: u8 = 0x9C;

/// A parsed terminal input event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A printable code point.
    Normal(Seq),
    /// A C0 control character.
    Control(u8),
    /// A single-byte escape: the final character after ESC.
    Escape(u8),
    /// A CSI sequence: optional `?` private marker, parameters, final byte.
    Csi {
        private: bool,
        args: Vec<i32>,
        code: u8,
    },
    /// An OSC sequence, arguments split on `;`.
    Osc(Vec<String>),
    /// A DCS sequence body, raw.
    Dcs(Vec<u8>),
    /// A two-byte escape with a leading intermediate from `# ( )`.
    Special { lead: u8, code: u8 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
enum State {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate(u8),
    CsiEntry,
    CsiParam,
    OscString,
    DcsPassthrough,
}

/// The parser state machine.
#[derive(Default)]
pub struct Parser {
    state: State,
    private: bool,
    args: Vec<i32>,
    accumulator: i64,
    digits: u32,
    /// True once any digit or separator has been seen for the current
    /// parameter, so a final byte knows whether to commit it.
    arg_open: bool,
    string_buf: Vec<u8>,
    /// Set when ESC is seen inside an OSC/DCS string; the next byte decides
    /// between ST and a fresh escape sequence.
    string_esc: bool,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no sequence is in progress.
    #[inline]
    pub fn is_ground(&self) -> bool {
        self.state == State::Ground
    }

    /// Abort any sequence in progress.
    pub fn reset(&mut self) {
        self.state = State::Ground;
        self.string_buf.clear();
        self.string_esc = false;
    }

    /// Feed one decoded sequence; returns at most one event.
    pub fn consume(&mut self, seq: Seq) -> Option<Event> {
        if seq.len() > 1 {
            return self.consume_multibyte(seq);
        }
        self.consume_byte(seq.lead())
    }

    fn consume_multibyte(&mut self, seq: Seq) -> Option<Event> {
        match self.state {
            State::Ground => Some(Event::Normal(seq)),
            State::OscString | State::DcsPassthrough => {
                self.string_push(seq.as_bytes());
                None
            }
            _ => {
                // A multi-byte code point cannot occur inside an escape
                // sequence; drop the sequence and print the character.
                log::debug!("multibyte code point inside escape sequence");
                self.reset();
                Some(Event::Normal(seq))
            }
        }
    }

    fn consume_byte(&mut self, byte: u8) -> Option<Event> {
        // CAN and SUB cancel from any state without dispatch.
        if byte == CAN || byte == SUB {
            self.reset();
            return None;
        }

        match self.state {
            State::Ground => self.ground(byte),
            State::Escape => self.escape(byte),
            State::EscapeIntermediate(lead) => {
                self.state = State::Ground;
                Some(Event::Special { lead, code: byte })
            }
            State::CsiEntry | State::CsiParam => self.csi(byte),
            State::OscString => self.osc(byte),
            State::DcsPassthrough => self.dcs(byte),
        }
    }

    fn ground(&mut self, byte: u8) -> Option<Event> {
        match byte {
            ESC => {
                self.state = State::Escape;
                None
            }
            0x00..=0x1F | 0x7F => Some(Event::Control(byte)),
            _ => Some(Event::Normal(Seq::ascii(byte))),
        }
    }

    fn escape(&mut self, byte: u8) -> Option<Event> {
        match byte {
            b'[' => {
                self.state = State::CsiEntry;
                self.private = false;
                self.args.clear();
                self.accumulator = 0;
                self.digits = 0;
                self.arg_open = false;
                None
            }
            b']' => {
                self.state = State::OscString;
                self.string_buf.clear();
                self.string_esc = false;
                None
            }
            b'P' => {
                self.state = State::DcsPassthrough;
                self.string_buf.clear();
                self.string_esc = false;
                None
            }
            b'#' | b'(' | b')' => {
                self.state = State::EscapeIntermediate(byte);
                None
            }
            b'\\' => {
                // Stray ST outside a string.
                self.state = State::Ground;
                None
            }
            ESC => None, // restart the escape
            0x00..=0x1F => Some(Event::Control(byte)),
            _ => {
                self.state = State::Ground;
                Some(Event::Escape(byte))
            }
        }
    }

    fn csi(&mut self, byte: u8) -> Option<Event> {
        match byte {
            b'?' if self.state == State::CsiEntry => {
                self.private = true;
                self.state = State::CsiParam;
                None
            }
            b'0'..=b'9' => {
                self.state = State::CsiParam;
                self.arg_open = true;
                if self.digits < MAX_PARAM_DIGITS {
                    self.accumulator = self.accumulator * 10 + i64::from(byte - b'0');
                    self.digits += 1;
                }
                None
            }
            // A colon separates sub-parameters; treated like a semicolon.
            b';' | b':' => {
                self.state = State::CsiParam;
                self.commit_arg();
                self.arg_open = true;
                None
            }
            0x40..=0x7E => {
                if self.arg_open {
                    self.commit_arg();
                }
                self.state = State::Ground;
                Some(Event::Csi {
                    private: self.private,
                    args: std::mem::take(&mut self.args),
                    code: byte,
                })
            }
            // Intermediates and other private markers carry no sequence we
            // dispatch on; keep collecting parameters.
            0x20..=0x2F | b'<' | b'=' | b'>' => None,
            0x00..=0x1F => Some(Event::Control(byte)),
            _ => {
                log::debug!("invalid CSI byte: {:02x}", byte);
                self.state = State::Ground;
                None
            }
        }
    }

    fn commit_arg(&mut self) {
        if self.args.len() < MAX_CSI_PARAMS {
            let clamped = self.accumulator.min(i64::from(i32::MAX)) as i32;
            self.args.push(clamped);
        }
        self.accumulator = 0;
        self.digits = 0;
    }

    fn osc(&mut self, byte: u8) -> Option<Event> {
        if self.string_esc {
            self.string_esc = false;
            if byte == b'\\' {
                return self.dispatch_osc();
            }
            // ESC followed by anything else: the string was never
            // terminated, so it is abandoned without dispatch and the new
            // escape sequence proceeds.
            log::debug!("OSC abandoned by new escape sequence");
            self.string_buf.clear();
            self.state = State::Escape;
            return self.consume_byte(byte);
        }

        match byte {
            BEL | ST_C1 => self.dispatch_osc(),
            ESC => {
                self.string_esc = true;
                None
            }
            _ => {
                self.string_push(&[byte]);
                None
            }
        }
    }

    fn dispatch_osc(&mut self) -> Option<Event> {
        self.state = State::Ground;
        let buf = std::mem::take(&mut self.string_buf);
        let args = buf
            .split(|&b| b == b';')
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect();
        Some(Event::Osc(args))
    }

    fn dcs(&mut self, byte: u8) -> Option<Event> {
        if self.string_esc {
            self.string_esc = false;
            if byte == b'\\' {
                self.state = State::Ground;
                return Some(Event::Dcs(std::mem::take(&mut self.string_buf)));
            }
            log::debug!("DCS abandoned by new escape sequence");
            self.string_buf.clear();
            self.state = State::Escape;
            return self.consume_byte(byte);
        }

        match byte {
            ST_C1 => {
                self.state = State::Ground;
                Some(Event::Dcs(std::mem::take(&mut self.string_buf)))
            }
            ESC => {
                self.string_esc = true;
                None
            }
            _ => {
                self.string_push(&[byte]);
                None
            }
        }
    }

    fn string_push(&mut self, bytes: &[u8]) {
        if self.string_buf.len() + bytes.len() > MAX_STRING_LEN {
            log::debug!("string sequence too long, abandoning");
            self.reset();
            return;
        }
        self.string_buf.extend_from_slice(bytes);
    }
}

/// The nth argument, or `fallback` if missing.
#[inline]
pub fn nth_arg(args: &[i32], n: usize, fallback: i32) -> i32 {
    args.get(n).copied().unwrap_or(fallback)
}

/// The nth argument, with `fallback` substituted for both missing and zero
/// values (most CSI counts treat 0 as 1).
#[inline]
pub fn nth_arg_non_zero(args: &[i32], n: usize, fallback: i32) -> i32 {
    let arg = nth_arg(args, n, fallback);
    if arg != 0 {
        arg
    } else {
        fallback
    }
}
