//! vtcore - the core of a VT-compatible terminal emulator.
//!
//! Consumes the byte stream of a pty child, interprets ECMA-48 / DEC VT /
//! xterm control sequences, maintains the screen state (active grid plus a
//! reflow-capable, deduplicated scroll-back), accepts user input, and emits
//! drawing primitives to an abstract renderer plus reply bytes to the pty.
//!
//! Windowing, fonts, pty spawning and configuration UI live in the
//! embedder; this crate ends at the [`buffer::Renderer`],
//! [`terminal::Observer`] and [`pty::Tty`] traits.

pub mod buffer;
pub mod cell;
pub mod color;
pub mod config;
pub mod dedupe;
pub mod keymap;
pub mod modes;
pub mod pty;
pub mod terminal;
pub mod utf8;
pub mod vt_parser;
