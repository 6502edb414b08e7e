//! The terminal controller.
//!
//! Glues the UTF-8 decoder and VT parser to buffer mutations, owns the
//! mode set and the primary/alternate buffer pair, encodes keyboard and
//! mouse input back to the pty, and drives render dispatch over the
//! damaged viewport.

use crate::buffer::{Buffer, Renderer};
use crate::cell::{Attrs, Color, Pos, Seq};
use crate::config::{Config, ResizeStrategy};
use crate::dedupe::Deduper;
use crate::keymap::{KeyMap, KeyMapModes, KeySym, Mods};
use crate::modes::{CharSet, Modes, CS_SPECIAL, CS_UK, CS_US};
use crate::pty::{Tty, TtyError};
use crate::utf8;
use crate::vt_parser::{nth_arg, nth_arg_non_zero, Event, Parser};
use std::cell::RefCell;
use std::rc::Rc;

/// Application-facing notifications.
pub trait Observer {
    /// Selected text is ready for the clipboard (`true`) or the primary
    /// selection (`false`).
    fn copy(&mut self, text: &str, clipboard: bool);
    /// The terminal requests a paste from the clipboard or primary
    /// selection.
    fn paste(&mut self, clipboard: bool);
    fn set_title(&mut self, title: &str);
    fn reset_title(&mut self);
    fn set_icon_name(&mut self, name: &str);
    fn bell(&mut self);
    /// DECCOLM asked for a different geometry; the embedder resizes the
    /// window and calls [`Terminal::resize`] after the current event.
    fn resize_buffer(&mut self, rows: u16, cols: u16);
    /// One-shot: the child is gone. Further reads are no-ops.
    fn child_exited(&mut self, status: i32);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    Left,
    Middle,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollDir {
    Up,
    Down,
}

#[derive(Clone, Copy)]
enum MouseReport {
    Press,
    Motion,
    Release,
}

const BUFSIZ: usize = 8192;

/// The terminal: controller state plus the buffer pair.
pub struct Terminal<T: Tty> {
    tty: T,
    pri: Buffer,
    alt: Buffer,
    alt_active: bool,
    modes: Modes,
    key_map: KeyMap,
    /// Spillover for writes the pty would not accept.
    write_buffer: Vec<u8>,
    /// Writes are silently discarded after a fatal pty error.
    dump_writes: bool,
    child_exited: bool,
    utf8: utf8::Machine,
    parser: Parser,
    /// Reentrancy guard around read/flush/dispatch.
    dispatching: bool,
    pressed: Option<Button>,
    pointer: Pos,
    scroll_on_tty_output: bool,
    scroll_on_tty_key_press: bool,
    scroll_on_paste: bool,
    /// Bytes consumed per read() call; stands in for a frame timer.
    read_limit: usize,
}

impl<T: Tty> Terminal<T> {
    pub fn new(config: &Config, tty: T, rows: u16, cols: u16) -> Self {
        assert!(rows > 0 && cols > 0, "zero-sized terminal");
        let deduper = Rc::new(RefCell::new(Deduper::new()));
        let pri = Buffer::new(
            deduper.clone(),
            rows,
            cols,
            config.history_limit(),
            config.cut_chars.clone(),
        );
        let alt = Buffer::new(deduper, rows, cols, 0, config.cut_chars.clone());

        Self {
            tty,
            pri,
            alt,
            alt_active: false,
            modes: Modes::initial(),
            key_map: KeyMap::new(),
            write_buffer: Vec::new(),
            dump_writes: false,
            child_exited: false,
            utf8: utf8::Machine::new(),
            parser: Parser::new(),
            dispatching: false,
            pressed: None,
            pointer: Pos::default(),
            scroll_on_tty_output: config.scroll_on_tty_output,
            scroll_on_tty_key_press: config.scroll_on_tty_key_press,
            scroll_on_paste: config.scroll_on_paste,
            read_limit: (4 << 20) / config.frames_per_second.max(1) as usize,
        }
    }

    pub fn rows(&self) -> u16 {
        self.buffer().rows()
    }

    pub fn cols(&self) -> u16 {
        self.buffer().cols()
    }

    pub fn modes(&self) -> Modes {
        self.modes
    }

    pub fn buffer(&self) -> &Buffer {
        if self.alt_active {
            &self.alt
        } else {
            &self.pri
        }
    }

    fn buffer_mut(&mut self) -> &mut Buffer {
        if self.alt_active {
            &mut self.alt
        } else {
            &mut self.pri
        }
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    /// Resizes both buffers and the pty. The sole operation permitted
    /// while a dispatch is in progress (DECCOLM arrives mid-parse).
    pub fn resize(&mut self, rows: u16, cols: u16, strategy: ResizeStrategy) {
        assert!(rows > 0 && cols > 0, "zero-sized resize");
        match strategy {
            ResizeStrategy::Reflow => self.pri.resize_reflow(rows, cols),
            ResizeStrategy::Clip => self.pri.resize_clip(rows, cols),
        }
        // The alternate screen has no history to reflow.
        self.alt.resize_clip(rows, cols);
        if let Err(e) = self.tty.resize(rows, cols) {
            log::warn!("pty resize failed: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // I/O
    // ------------------------------------------------------------------

    /// Pulls up to one frame's worth of bytes from the pty and feeds them
    /// through the decoder and parser. Returns once the pty would block,
    /// the budget is spent, or the child exits.
    pub fn read<O: Observer>(&mut self, observer: &mut O) {
        debug_assert!(!self.dispatching, "nested read");
        if self.dispatching || self.child_exited {
            return;
        }
        self.dispatching = true;

        let mut budget = self.read_limit;
        let mut buf = [0u8; BUFSIZ];
        loop {
            match self.tty.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.process_bytes(&buf[..n], observer);
                    budget = budget.saturating_sub(n);
                    if budget == 0 {
                        break;
                    }
                }
                Err(TtyError::Exited(status)) => {
                    self.child_exited = true;
                    self.dump_writes = true;
                    observer.child_exited(status);
                    break;
                }
                Err(TtyError::Io(e)) => {
                    log::error!("pty read error: {}", e);
                    self.child_exited = true;
                    self.dump_writes = true;
                    observer.child_exited(-1);
                    break;
                }
            }
        }

        if self.scroll_on_tty_output {
            self.buffer_mut().scroll_bottom_history();
        }

        self.dispatching = false;
    }

    fn process_bytes<O: Observer>(&mut self, bytes: &[u8], observer: &mut O) {
        let mut machine = std::mem::take(&mut self.utf8);
        let mut parser = std::mem::take(&mut self.parser);
        for &byte in bytes {
            match machine.consume(byte) {
                utf8::State::Accept => {
                    if let Some(event) = parser.consume(machine.seq()) {
                        self.dispatch_event(event, observer);
                    }
                }
                utf8::State::Reject => {
                    log::debug!("rejecting invalid UTF-8 byte {:02x}", byte);
                }
                utf8::State::Continue => {}
            }
        }
        self.utf8 = machine;
        self.parser = parser;
    }

    /// Queues bytes for the pty, writing immediately when possible.
    fn write(&mut self, data: &[u8]) {
        if self.dump_writes {
            return;
        }
        if !self.write_buffer.is_empty() {
            // An earlier write would have blocked; keep queueing until the
            // next flush.
            self.write_buffer.extend_from_slice(data);
            return;
        }
        let mut remaining = data;
        while !remaining.is_empty() {
            match self.tty.write(remaining) {
                Ok(0) => break,
                Ok(n) => remaining = &remaining[n..],
                Err(e) => {
                    log::error!("pty write error: {}", e);
                    self.dump_writes = true;
                    self.write_buffer.clear();
                    return;
                }
            }
        }
        self.write_buffer.extend_from_slice(remaining);
    }

    pub fn needs_flush(&self) -> bool {
        !self.write_buffer.is_empty()
    }

    /// Drains the write queue. Call on writable-readiness.
    pub fn flush(&mut self) {
        debug_assert!(!self.dispatching, "flush during dispatch");
        while !self.write_buffer.is_empty() {
            match self.tty.write(&self.write_buffer) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buffer.drain(..n);
                }
                Err(e) => {
                    log::error!("pty write error: {}", e);
                    self.dump_writes = true;
                    self.write_buffer.clear();
                    break;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Emits one frame to the renderer. Skipped (damage preserved) when
    /// the renderer reports it is not ready.
    pub fn dispatch<R: Renderer>(&mut self, focused: bool, renderer: &mut R) {
        debug_assert!(!self.dispatching, "nested dispatch");
        if self.dispatching {
            return;
        }
        self.dispatching = true;

        if !renderer.fix_damage_begin() {
            self.dispatching = false;
            return;
        }

        let reverse = self.modes.contains(Modes::REVERSE);
        let show_cursor = self.modes.contains(Modes::SHOW_CURSOR);
        let scrollbar = self.buffer().bar_damage();
        let buffer = if self.alt_active {
            &mut self.alt
        } else {
            &mut self.pri
        };
        buffer.dispatch(reverse, show_cursor, focused, renderer);
        if scrollbar {
            renderer.draw_scrollbar(
                buffer.total_rows(),
                buffer.history_offset(),
                buffer.rows(),
            );
        }
        let region = buffer.accumulate_damage();
        renderer.fix_damage_end(region, scrollbar);
        buffer.reset_damage();

        self.dispatching = false;
    }

    /// Forces a full redraw on the next dispatch (exposure).
    pub fn damage_viewport(&mut self) {
        self.buffer_mut().damage_viewport(true);
    }

    // ------------------------------------------------------------------
    // User input
    // ------------------------------------------------------------------

    pub fn key_press<O: Observer>(&mut self, sym: KeySym, mods: Mods, observer: &mut O) {
        if self.handle_key_binding(sym, mods, observer) {
            return;
        }
        if self.modes.contains(Modes::KBDLOCK) {
            return;
        }
        if self.scroll_on_tty_key_press {
            self.buffer_mut().scroll_bottom_history();
        }
        let key_modes = KeyMapModes {
            app_keypad: self.modes.contains(Modes::APPKEYPAD),
            app_cursor: self.modes.contains(Modes::APPCURSOR),
            cr_on_lf: self.modes.contains(Modes::CR_ON_LF),
            delete_sends_del: self.modes.contains(Modes::DELETE_SENDS_DEL),
            alt_sends_esc: self.modes.contains(Modes::ALT_SENDS_ESC),
        };
        let mut bytes = Vec::new();
        if self.key_map.convert(sym, mods, key_modes, &mut bytes) {
            self.write(&bytes);
        }
    }

    fn handle_key_binding<O: Observer>(
        &mut self,
        sym: KeySym,
        mods: Mods,
        observer: &mut O,
    ) -> bool {
        if mods.contains(Mods::SHIFT | Mods::CONTROL) {
            match sym {
                KeySym::Char('c') | KeySym::Char('C') => {
                    if let Some(text) = self.buffer().selected_text() {
                        observer.copy(&text, true);
                    }
                    return true;
                }
                KeySym::Char('x') | KeySym::Char('X') => {
                    if let Some(text) = self.buffer().selected_text() {
                        observer.copy(&text, false);
                    }
                    return true;
                }
                KeySym::Char('v') | KeySym::Char('V') => {
                    observer.paste(true);
                    return true;
                }
                _ => {}
            }
        }

        if mods.contains(Mods::SHIFT) {
            let page = self.rows();
            return match sym {
                KeySym::Up => {
                    self.buffer_mut().scroll_up_history(1);
                    true
                }
                KeySym::Down => {
                    self.buffer_mut().scroll_down_history(1);
                    true
                }
                KeySym::PageUp => {
                    self.buffer_mut().scroll_up_history(page);
                    true
                }
                KeySym::PageDown => {
                    self.buffer_mut().scroll_down_history(page);
                    true
                }
                KeySym::Home => {
                    self.buffer_mut().scroll_top_history();
                    true
                }
                KeySym::End => {
                    self.buffer_mut().scroll_bottom_history();
                    true
                }
                KeySym::F(9) => {
                    self.buffer().dump();
                    true
                }
                _ => false,
            };
        }

        false
    }

    pub fn button_press<O: Observer>(
        &mut self,
        button: Button,
        count: u8,
        mods: Mods,
        pos: Pos,
        observer: &mut O,
    ) {
        if self.mouse_reporting() {
            self.send_mouse_report(MouseReport::Press, button, mods, pos);
        } else {
            match button {
                Button::Left => {
                    if count <= 1 {
                        self.buffer_mut().mark_selection(pos);
                    } else {
                        self.buffer_mut().expand_selection(pos, count.min(3));
                    }
                }
                Button::Middle => observer.paste(false),
                Button::Right => self.buffer_mut().adjust_selection(pos),
            }
        }
        self.pressed = Some(button);
        self.pointer = pos;
    }

    pub fn button_motion(&mut self, mods: Mods, pos: Pos) {
        let Some(button) = self.pressed else { return };
        if self.modes.contains(Modes::MOUSE_MOTION) {
            self.send_mouse_report(MouseReport::Motion, button, mods, pos);
        } else if !self.mouse_reporting() && button == Button::Left {
            self.buffer_mut().delimit_selection(pos, false);
        }
        self.pointer = pos;
    }

    pub fn button_release<O: Observer>(&mut self, mods: Mods, observer: &mut O) {
        let Some(button) = self.pressed.take() else {
            return;
        };
        if self.mouse_reporting() {
            let pos = self.pointer;
            self.send_mouse_report(MouseReport::Release, button, mods, pos);
        } else if button == Button::Left {
            if let Some(text) = self.buffer().selected_text() {
                observer.copy(&text, false);
            }
        }
    }

    /// Wheel scrolling moves the local viewport a quarter screen; it is
    /// not forwarded to the application.
    pub fn scroll_wheel(&mut self, dir: ScrollDir) {
        let step = (self.rows() / 4).max(1);
        match dir {
            ScrollDir::Up => self.buffer_mut().scroll_up_history(step),
            ScrollDir::Down => self.buffer_mut().scroll_down_history(step),
        };
    }

    pub fn clear_selection(&mut self) {
        self.buffer_mut().clear_selection();
    }

    /// Drops the scroll-back of the primary buffer.
    pub fn clear_history(&mut self) {
        self.pri.clear_history();
    }

    pub fn paste(&mut self, data: &[u8]) {
        if self.scroll_on_paste {
            self.buffer_mut().scroll_bottom_history();
        }
        if self.modes.contains(Modes::BRACKETED_PASTE) {
            self.write(b"\x1b[200~");
        }
        self.write(data);
        if self.modes.contains(Modes::BRACKETED_PASTE) {
            self.write(b"\x1b[201~");
        }
    }

    // Search passthrough: the embedder drives the search UI.

    pub fn begin_search(&mut self, pattern: &str) -> bool {
        self.buffer_mut().begin_search(pattern)
    }

    pub fn set_search_pattern(&mut self, pattern: &str) -> bool {
        self.buffer_mut().set_search_pattern(pattern)
    }

    pub fn next_search(&mut self) {
        self.buffer_mut().next_search();
    }

    pub fn prev_search(&mut self) {
        self.buffer_mut().prev_search();
    }

    pub fn end_search(&mut self) {
        self.buffer_mut().end_search();
    }

    fn mouse_reporting(&self) -> bool {
        self.modes
            .intersects(Modes::MOUSE_BUTTON | Modes::MOUSE_MOTION)
    }

    fn send_mouse_report(&mut self, kind: MouseReport, button: Button, mods: Mods, pos: Pos) {
        let mut b: u16 = match button {
            Button::Left => 0,
            Button::Middle => 1,
            Button::Right => 2,
        };
        if let MouseReport::Motion = kind {
            b += 32;
        }
        if mods.contains(Mods::SHIFT) {
            b += 4;
        }
        if mods.contains(Mods::ALT) {
            b += 8;
        }
        if mods.contains(Mods::CONTROL) {
            b += 16;
        }

        let mut out = Vec::with_capacity(16);
        if self.modes.contains(Modes::MOUSE_SGR) {
            let final_byte = match kind {
                MouseReport::Release => b'm',
                _ => b'M',
            };
            out.extend_from_slice(
                format!("\x1b[<{};{};{}{}", b, pos.col + 1, pos.row + 1, final_byte as char)
                    .as_bytes(),
            );
        } else {
            if pos.row >= 223 || pos.col >= 223 {
                return; // not representable in the legacy encoding
            }
            if let MouseReport::Release = kind {
                b = 3;
            }
            out.extend_from_slice(b"\x1b[M");
            out.push(32 + b as u8);
            out.push(32 + pos.col as u8 + 1);
            out.push(32 + pos.row as u8 + 1);
        }
        self.write(&out);
    }

    // ------------------------------------------------------------------
    // Event dispatch
    // ------------------------------------------------------------------

    fn dispatch_event<O: Observer>(&mut self, event: Event, observer: &mut O) {
        match event {
            Event::Normal(seq) => self.normal(seq),
            Event::Control(c) => self.control(c, observer),
            Event::Escape(c) => self.escape(c, observer),
            Event::Csi {
                private,
                args,
                code,
            } => self.csi(private, &args, code, observer),
            Event::Osc(args) => self.osc(&args, observer),
            Event::Dcs(data) => {
                log::debug!("ignoring DCS ({} bytes)", data.len());
            }
            Event::Special { lead, code } => self.special(lead, code),
        }
    }

    fn normal(&mut self, seq: Seq) {
        let seq = if seq.len() == 1 {
            self.buffer().translate(seq.lead()).unwrap_or(seq)
        } else {
            seq
        };
        let auto_wrap = self.modes.contains(Modes::AUTO_WRAP);
        let insert = self.modes.contains(Modes::INSERT);
        self.buffer_mut().write(seq, auto_wrap, insert);
    }

    fn control<O: Observer>(&mut self, c: u8, observer: &mut O) {
        match c {
            0x07 => observer.bell(),
            0x09 => self.buffer_mut().tab_forward(1),
            0x08 => {
                let auto_wrap = self.modes.contains(Modes::AUTO_WRAP);
                self.buffer_mut().backspace(auto_wrap);
            }
            0x0D => {
                let pos = self.buffer().cursor_pos().at_col(0);
                self.buffer_mut().move_cursor(pos, false);
            }
            0x0A | 0x0B | 0x0C => {
                let reset_col = self.modes.contains(Modes::CR_ON_LF);
                self.buffer_mut().forward_index(reset_col);
            }
            0x0E => self.buffer_mut().use_charset(CharSet::G1),
            0x0F => self.buffer_mut().use_charset(CharSet::G0),
            // ENQ, NUL, XON, XOFF and DEL are accepted silently.
            0x05 | 0x00 | 0x11 | 0x13 | 0x7F => {}
            _ => log::trace!("ignored control char {:02x}", c),
        }
    }

    fn escape<O: Observer>(&mut self, c: u8, observer: &mut O) {
        match c {
            b'D' => self.buffer_mut().forward_index(false), // IND
            b'E' => self.buffer_mut().forward_index(true),  // NEL
            b'H' => self.buffer_mut().set_tab(),            // HTS
            b'M' => self.buffer_mut().reverse_index(),      // RI
            b'Z' => log::debug!("DECID ignored"),
            b'c' => self.reset_all(observer), // RIS
            b'=' => self.modes.insert(Modes::APPKEYPAD),
            b'>' => self.modes.remove(Modes::APPKEYPAD),
            b'7' => self.buffer_mut().save_cursor(),
            b'8' => self.buffer_mut().restore_cursor(),
            _ => log::debug!("unknown escape: ESC {:02x}", c),
        }
    }

    fn special(&mut self, lead: u8, code: u8) {
        match lead {
            b'#' => match code {
                b'8' => self.buffer_mut().screen_alignment(), // DECALN
                b'5' => {}                                    // single width
                _ => log::debug!("unhandled ESC # {}", code as char),
            },
            b'(' | b')' => {
                let charset = if lead == b'(' { CharSet::G0 } else { CharSet::G1 };
                let sub = match code {
                    b'0' => &CS_SPECIAL,
                    b'A' => &CS_UK,
                    b'B' => &CS_US,
                    _ => {
                        log::debug!("unknown character set {}", code as char);
                        return;
                    }
                };
                self.buffer_mut().set_char_sub(charset, sub);
            }
            _ => log::debug!("unhandled special ESC {} {}", lead as char, code as char),
        }
    }

    fn csi<O: Observer>(&mut self, private: bool, args: &[i32], code: u8, observer: &mut O) {
        match code {
            b'@' => {
                // ICH
                let max = self.cols() - self.buffer().cursor_pos().col;
                let count = nth_arg_non_zero(args, 0, 1).clamp(1, i32::from(max));
                self.buffer_mut().insert_cells(count as u16);
            }
            b'A' => self.move_rel(-nth_arg_non_zero(args, 0, 1), 0), // CUU
            b'B' => self.move_rel(nth_arg_non_zero(args, 0, 1), 0),  // CUD
            b'C' => self.move_rel(0, nth_arg_non_zero(args, 0, 1)),  // CUF
            b'D' => self.move_rel(0, -nth_arg_non_zero(args, 0, 1)), // CUB
            b'E' => {
                // CNL
                self.move_rel(nth_arg_non_zero(args, 0, 1), 0);
                let pos = self.buffer().cursor_pos().at_col(0);
                self.buffer_mut().move_cursor(pos, false);
            }
            b'F' => {
                // CPL
                self.move_rel(-nth_arg_non_zero(args, 0, 1), 0);
                let pos = self.buffer().cursor_pos().at_col(0);
                self.buffer_mut().move_cursor(pos, false);
            }
            b'G' => {
                // CHA
                let col = (nth_arg_non_zero(args, 0, 1) - 1).max(0) as u16;
                let pos = self.buffer().cursor_pos().at_col(col);
                self.buffer_mut().move_cursor(pos, false);
            }
            b'H' | b'f' => {
                // CUP / HVP
                let row = (nth_arg(args, 0, 1).max(1) - 1) as u16;
                let col = (nth_arg(args, 1, 1).max(1) - 1) as u16;
                let origin = self.modes.contains(Modes::ORIGIN);
                self.buffer_mut().move_cursor(Pos::new(row, col), origin);
            }
            b'I' => {
                // CHT
                let count = nth_arg_non_zero(args, 0, 1).max(1) as u16;
                self.buffer_mut().tab_forward(count);
            }
            b'J' => match nth_arg(args, 0, 0) {
                1 => {
                    self.buffer_mut().clear_above();
                    self.buffer_mut().clear_line_left();
                }
                2 => {
                    self.buffer_mut().clear();
                    self.buffer_mut().move_cursor(Pos::default(), false);
                }
                _ => {
                    self.buffer_mut().clear_line_right();
                    self.buffer_mut().clear_below();
                }
            },
            b'K' => match nth_arg(args, 0, 0) {
                1 => self.buffer_mut().clear_line_left(),
                2 => self.buffer_mut().clear_line(),
                _ => self.buffer_mut().clear_line_right(),
            },
            b'L' => {
                // IL, only inside the margin
                if self.cursor_in_margins() {
                    let count = nth_arg_non_zero(args, 0, 1).max(1) as u16;
                    self.buffer_mut().insert_lines(count);
                }
            }
            b'M' => {
                // DL
                if self.cursor_in_margins() {
                    let count = nth_arg_non_zero(args, 0, 1).max(1) as u16;
                    self.buffer_mut().erase_lines(count);
                }
            }
            b'P' => {
                // DCH
                let max = self.cols() - self.buffer().cursor_pos().col;
                let count = nth_arg_non_zero(args, 0, 1).clamp(1, i32::from(max));
                self.buffer_mut().erase_cells(count as u16);
            }
            b'S' => {
                let count = nth_arg_non_zero(args, 0, 1).max(1) as u16;
                self.buffer_mut().scroll_up_margins(count);
            }
            b'T' => {
                let count = nth_arg_non_zero(args, 0, 1).max(1) as u16;
                self.buffer_mut().scroll_down_margins(count);
            }
            b'X' => {
                // ECH
                let count = nth_arg_non_zero(args, 0, 1).max(1) as u16;
                self.buffer_mut().blank_cells(count);
            }
            b'Z' => {
                // CBT
                let count = nth_arg_non_zero(args, 0, 1).max(1) as u16;
                self.buffer_mut().tab_backward(count);
            }
            b'`' => {
                // HPA
                let col = (nth_arg_non_zero(args, 0, 1) - 1).max(0) as u16;
                let pos = self.buffer().cursor_pos().at_col(col);
                self.buffer_mut().move_cursor(pos, false);
            }
            b'c' => {
                // Primary DA
                self.write(b"\x1b[?6c");
            }
            b'd' => {
                // VPA
                let row = (nth_arg(args, 0, 1).max(1) - 1) as u16;
                let col = self.buffer().cursor_pos().col;
                let origin = self.modes.contains(Modes::ORIGIN);
                self.buffer_mut().move_cursor(Pos::new(row, col), origin);
            }
            b'g' => match nth_arg(args, 0, 0) {
                0 => self.buffer_mut().unset_tab(),
                3 => self.buffer_mut().clear_tabs(),
                other => log::debug!("unhandled TBC selector {}", other),
            },
            b'h' => self.process_modes(private, true, args, observer),
            b'l' => self.process_modes(private, false, args, observer),
            b'm' => {
                if args.is_empty() {
                    self.process_attributes(&[0]);
                } else {
                    self.process_attributes(args);
                }
            }
            b'n' => match nth_arg(args, 0, 0) {
                5 => self.write(b"\x1b[0n"),
                6 => {
                    let pos = self.buffer().cursor_pos();
                    let mut row = pos.row;
                    if self.modes.contains(Modes::ORIGIN) {
                        row -= self.buffer().margin_begin();
                    }
                    let reply = format!("\x1b[{};{}R", row + 1, pos.col + 1);
                    self.write(reply.as_bytes());
                }
                other => log::debug!("unhandled DSR {}", other),
            },
            b'r' => {
                // DECSTBM
                if private {
                    log::debug!("unhandled private CSI r");
                    return;
                }
                let origin = self.modes.contains(Modes::ORIGIN);
                if args.is_empty() {
                    self.buffer_mut().reset_margins();
                } else {
                    let rows = i32::from(self.rows());
                    let cursor_row = i32::from(self.buffer().cursor_pos().row);
                    let top = (nth_arg_non_zero(args, 0, 1) - 1).clamp(0, rows - 1);
                    let bottom =
                        (nth_arg_non_zero(args, 1, cursor_row + 1) - 1).clamp(0, rows - 1);
                    if bottom > top {
                        self.buffer_mut().set_margins(top as u16, bottom as u16 + 1);
                    } else {
                        self.buffer_mut().reset_margins();
                    }
                }
                self.buffer_mut().move_cursor(Pos::default(), origin);
            }
            b's' => self.buffer_mut().save_cursor(),
            b'u' => self.buffer_mut().restore_cursor(),
            b't' => log::debug!("window op {:?} accepted as no-op", args.first()),
            _ => log::debug!(
                "unimplemented CSI {}{:?} {}",
                if private { "? " } else { "" },
                args,
                code as char
            ),
        }
    }

    fn move_rel(&mut self, d_row: i32, d_col: i32) {
        self.buffer_mut().move_cursor_rel(d_row, d_col);
    }

    fn cursor_in_margins(&self) -> bool {
        let row = self.buffer().cursor_pos().row;
        row >= self.buffer().margin_begin() && row < self.buffer().margin_end()
    }

    fn osc<O: Observer>(&mut self, args: &[String], observer: &mut O) {
        let Some(selector) = args.first().and_then(|s| s.parse::<i32>().ok()) else {
            log::debug!("malformed OSC {:?}", args.first());
            return;
        };
        match selector {
            0 => {
                if let Some(text) = args.get(1) {
                    observer.set_icon_name(text);
                    observer.set_title(text);
                }
            }
            1 => {
                if let Some(text) = args.get(1) {
                    observer.set_icon_name(text);
                }
            }
            2 => {
                if let Some(text) = args.get(1) {
                    observer.set_title(text);
                }
            }
            other => log::debug!("unhandled OSC {}", other),
        }
    }

    /// SGR. Parameters apply left to right; extended colour introducers
    /// with missing trailing parameters abort the remainder.
    fn process_attributes(&mut self, args: &[i32]) {
        let buffer = if self.alt_active {
            &mut self.alt
        } else {
            &mut self.pri
        };
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                0 => buffer.reset_style(),
                1 => buffer.set_attr(Attrs::BOLD),
                2 => buffer.set_attr(Attrs::FAINT),
                3 => buffer.set_attr(Attrs::ITALIC),
                4 => buffer.set_attr(Attrs::UNDERLINE),
                5 | 6 => buffer.set_attr(Attrs::BLINK),
                7 => buffer.set_attr(Attrs::INVERSE),
                8 => buffer.set_attr(Attrs::CONCEAL),
                21 => buffer.unset_attr(Attrs::BOLD),
                22 => {
                    buffer.unset_attr(Attrs::BOLD);
                    buffer.unset_attr(Attrs::FAINT);
                }
                23 => buffer.unset_attr(Attrs::ITALIC),
                24 => buffer.unset_attr(Attrs::UNDERLINE),
                25 => buffer.unset_attr(Attrs::BLINK),
                27 => buffer.unset_attr(Attrs::INVERSE),
                28 => buffer.unset_attr(Attrs::CONCEAL),
                v @ 30..=37 => buffer.set_fg(Color::Indexed((v - 30) as u8)),
                38 => match Self::extended_color(args, &mut i) {
                    Some(color) => buffer.set_fg(color),
                    None => return, // deficient parameters abort
                },
                39 => buffer.set_fg(Color::DefaultFg),
                v @ 40..=47 => buffer.set_bg(Color::Indexed((v - 40) as u8)),
                48 => match Self::extended_color(args, &mut i) {
                    Some(color) => buffer.set_bg(color),
                    None => return,
                },
                49 => buffer.set_bg(Color::DefaultBg),
                v @ 90..=97 => buffer.set_fg(Color::Indexed((v - 90 + 8) as u8)),
                v @ 100..=107 => buffer.set_bg(Color::Indexed((v - 100 + 8) as u8)),
                other => log::debug!("unhandled SGR attribute {}", other),
            }
            i += 1;
        }
    }

    /// Parses `38;5;n`, `38;2;r;g;b` (and the `48;` forms) starting at the
    /// introducer index. Advances `i` past the consumed parameters; returns
    /// None when the trailing parameters are missing or out of range.
    fn extended_color(args: &[i32], i: &mut usize) -> Option<Color> {
        match args.get(*i + 1)? {
            5 => {
                let value = *args.get(*i + 2)?;
                *i += 2;
                if (0..256).contains(&value) {
                    Some(Color::Indexed(value as u8))
                } else {
                    log::debug!("colour index out of range: {}", value);
                    None
                }
            }
            2 => {
                let r = *args.get(*i + 2)?;
                let g = *args.get(*i + 3)?;
                let b = *args.get(*i + 4)?;
                *i += 4;
                Some(Color::Rgb(
                    r.clamp(0, 255) as u8,
                    g.clamp(0, 255) as u8,
                    b.clamp(0, 255) as u8,
                ))
            }
            other => {
                log::debug!("unhandled colour introducer {}", other);
                None
            }
        }
    }

    fn process_modes<O: Observer>(
        &mut self,
        private: bool,
        set: bool,
        args: &[i32],
        observer: &mut O,
    ) {
        for &arg in args {
            if private {
                self.process_private_mode(arg, set, observer);
            } else {
                match arg {
                    0 => {}
                    2 => self.modes.set_to(Modes::KBDLOCK, set),
                    4 => self.modes.set_to(Modes::INSERT, set),
                    12 => self.modes.set_to(Modes::ECHO, set),
                    20 => self.modes.set_to(Modes::CR_ON_LF, set),
                    other => log::debug!("unknown ANSI mode {}", other),
                }
            }
        }
    }

    fn process_private_mode<O: Observer>(&mut self, arg: i32, set: bool, observer: &mut O) {
        match arg {
            1 => self.modes.set_to(Modes::APPCURSOR, set),
            2 => {
                // DECANM (VT52 mode) is not implemented; the charsets are
                // reset as the hardware does.
                log::debug!("DECANM not implemented");
                let buffer = self.buffer_mut();
                buffer.set_char_sub(CharSet::G0, &CS_US);
                buffer.set_char_sub(CharSet::G1, &CS_US);
                buffer.use_charset(CharSet::G0);
            }
            3 => {
                // DECCOLM: geometry changes go through the embedder.
                let cols = if set { 132 } else { 80 };
                observer.resize_buffer(24, cols);
            }
            5 => {
                // DECSCNM: everything on screen changes colour.
                if self.modes.contains(Modes::REVERSE) != set {
                    self.modes.set_to(Modes::REVERSE, set);
                    self.buffer_mut().damage_viewport(true);
                }
            }
            6 => {
                self.modes.set_to(Modes::ORIGIN, set);
                self.buffer_mut().move_cursor(Pos::default(), set);
            }
            7 => self.modes.set_to(Modes::AUTO_WRAP, set),
            8 => self.modes.set_to(Modes::AUTO_REPEAT, set),
            12 => {} // cursor blink, accepted
            25 => {
                self.modes.set_to(Modes::SHOW_CURSOR, set);
                self.buffer_mut().damage_cursor();
            }
            1000 => {
                self.modes.set_to(Modes::MOUSE_BUTTON, set);
                self.modes.remove(Modes::MOUSE_MOTION);
            }
            1002 => {
                self.modes.set_to(Modes::MOUSE_MOTION, set);
                self.modes.remove(Modes::MOUSE_BUTTON);
            }
            1006 => self.modes.set_to(Modes::MOUSE_SGR, set),
            1037 => self.modes.set_to(Modes::DELETE_SENDS_DEL, set),
            1039 => self.modes.set_to(Modes::ALT_SENDS_ESC, set),
            47 | 1047 => self.switch_screen(set, false),
            1048 => {
                if set {
                    self.buffer_mut().save_cursor();
                } else {
                    self.buffer_mut().restore_cursor();
                }
            }
            1049 => self.switch_screen(set, true),
            2004 => self.modes.set_to(Modes::BRACKETED_PASTE, set),
            other => log::debug!("unknown private mode {}", other),
        }
    }

    /// 47/1047/1049 alternate-screen switching. `with_cursor` adds the
    /// 1048 save/restore of the primary cursor and clears the alternate
    /// screen on entry.
    fn switch_screen(&mut self, set: bool, with_cursor: bool) {
        if set {
            if self.alt_active {
                // Re-entering 1049 clears again.
                if with_cursor {
                    self.alt.reset();
                }
            } else {
                if with_cursor {
                    self.pri.save_cursor();
                    self.alt.reset();
                }
                // The shared-cursor convention: the position carries over.
                let pos = self.pri.cursor_pos();
                self.alt_active = true;
                self.alt.move_cursor(pos, false);
            }
        } else if self.alt_active {
            // Whatever the application left behind is discarded.
            self.alt.reset();
            self.alt_active = false;
            if with_cursor {
                self.pri.restore_cursor();
            }
        }
        self.buffer_mut().damage_viewport(true);
    }

    fn reset_all<O: Observer>(&mut self, observer: &mut O) {
        self.pri.reset();
        self.alt.reset();
        self.alt_active = false;
        self.modes = Modes::initial();
        observer.reset_title();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Region;
    use crate::cell::Style;

    /// In-memory pty: reads drain `input`, writes land in `output`.
    struct TestTty {
        input: Vec<u8>,
        output: Vec<u8>,
        exited: Option<i32>,
    }

    impl TestTty {
        fn new() -> Self {
            Self {
                input: Vec::new(),
                output: Vec::new(),
                exited: None,
            }
        }
    }

    impl Tty for TestTty {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TtyError> {
            if let Some(status) = self.exited {
                return Err(TtyError::Exited(status));
            }
            if self.input.is_empty() {
                return Ok(0);
            }
            let n = self.input.len().min(buf.len());
            buf[..n].copy_from_slice(&self.input[..n]);
            self.input.drain(..n);
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, TtyError> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn resize(&mut self, _rows: u16, _cols: u16) -> Result<(), TtyError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestObserver {
        titles: Vec<String>,
        icon_names: Vec<String>,
        title_resets: usize,
        bells: usize,
        copies: Vec<(String, bool)>,
        pastes: Vec<bool>,
        resizes: Vec<(u16, u16)>,
        exits: Vec<i32>,
    }

    impl Observer for TestObserver {
        fn copy(&mut self, text: &str, clipboard: bool) {
            self.copies.push((text.to_string(), clipboard));
        }
        fn paste(&mut self, clipboard: bool) {
            self.pastes.push(clipboard);
        }
        fn set_title(&mut self, title: &str) {
            self.titles.push(title.to_string());
        }
        fn reset_title(&mut self) {
            self.title_resets += 1;
        }
        fn set_icon_name(&mut self, name: &str) {
            self.icon_names.push(name.to_string());
        }
        fn bell(&mut self) {
            self.bells += 1;
        }
        fn resize_buffer(&mut self, rows: u16, cols: u16) {
            self.resizes.push((rows, cols));
        }
        fn child_exited(&mut self, status: i32) {
            self.exits.push(status);
        }
    }

    /// Renderer that only brackets frames; used to consume damage.
    struct NullRenderer;

    impl Renderer for NullRenderer {
        fn draw_bg(&mut self, _: Pos, _: u16, _: Color) {}
        fn draw_fg(&mut self, _: Pos, _: u16, _: Color, _: Attrs, _: &[u8]) {}
        fn draw_cursor(&mut self, _: Pos, _: Color, _: Color, _: Attrs, _: &[u8], _: bool, _: bool) {
        }
        fn draw_selection(&mut self, _: Pos, _: Pos, _: bool, _: bool) {}
        fn draw_scrollbar(&mut self, _: usize, _: usize, _: u16) {}
        fn fix_damage_begin(&mut self) -> bool {
            true
        }
        fn fix_damage_end(&mut self, _: Region, _: bool) {}
    }

    fn new_terminal(rows: u16, cols: u16) -> Terminal<TestTty> {
        Terminal::new(&Config::default(), TestTty::new(), rows, cols)
    }

    fn feed(term: &mut Terminal<TestTty>, observer: &mut TestObserver, bytes: &[u8]) {
        term.tty.input.extend_from_slice(bytes);
        term.read(observer);
    }

    fn row_text(term: &Terminal<TestTty>, row: i64) -> String {
        let mut out = String::new();
        let mut cells = Vec::new();
        term.buffer().fetch_line(row, &mut cells);
        for cell in cells {
            out.push_str(std::str::from_utf8(cell.seq.as_bytes()).unwrap_or(" "));
        }
        out.trim_end().to_string()
    }

    #[test]
    fn home_and_overwrite() {
        // "ab" ESC[H "XY" leaves row 0 as "XY" with the cursor at (0,2).
        let mut term = new_terminal(24, 80);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"ab\x1b[HXY");
        assert_eq!(row_text(&term, 0), "XY");
        assert_eq!(term.buffer().cursor_pos(), Pos::new(0, 2));
    }

    #[test]
    fn clear_and_write_damages_only_touched_row() {
        let mut term = new_terminal(24, 80);
        let mut obs = TestObserver::default();
        // Consume the initial full-screen damage.
        term.dispatch(true, &mut NullRenderer);
        feed(&mut term, &mut obs, b"\x1b[2J\x1b[1;1HHELLO");
        let region = term.buffer().accumulate_damage();
        assert_eq!(region.begin.row, 0);
        assert_eq!(region.end.row, 1);
        assert!(region.end.col >= 5);
        assert_eq!(row_text(&term, 0), "HELLO");
    }

    #[test]
    fn alternate_screen_round_trip() {
        let mut term = new_terminal(5, 20);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"shell$ ");
        let cursor = term.buffer().cursor_pos();

        feed(&mut term, &mut obs, b"\x1b[?1049h");
        assert!(term.alt_active);
        // The alternate screen starts cleared; writes stay out of history.
        assert_eq!(row_text(&term, 0), "");
        feed(&mut term, &mut obs, b"fullscreen\r\napp");
        assert_eq!(term.buffer().historical_rows(), 0);

        feed(&mut term, &mut obs, b"\x1b[?1049l");
        assert!(!term.alt_active);
        assert_eq!(row_text(&term, 0), "shell$");
        assert_eq!(term.buffer().cursor_pos(), cursor);
    }

    #[test]
    fn scroll_into_history_via_controller() {
        let mut term = new_terminal(3, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"A\r\nB\r\nC\r\nD");
        assert_eq!(term.buffer().historical_rows(), 1);
        assert_eq!(row_text(&term, -1), "A");
        assert_eq!(row_text(&term, 0), "B");
        assert_eq!(row_text(&term, 2), "D");
    }

    #[test]
    fn autowrap_scenario() {
        let mut term = new_terminal(24, 4);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"ABCDE");
        assert_eq!(row_text(&term, 0), "ABCD");
        assert_eq!(row_text(&term, 1), "E");
        assert_eq!(term.buffer().cursor_pos(), Pos::new(1, 1));
    }

    #[test]
    fn dsr_cursor_position_report() {
        // Cursor at (4, 9) reports "ESC[5;10R".
        let mut term = new_terminal(24, 80);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[5;10H\x1b[6n");
        assert_eq!(term.tty.output, b"\x1b[5;10R");
    }

    #[test]
    fn dsr_with_origin_mode() {
        let mut term = new_terminal(24, 80);
        let mut obs = TestObserver::default();
        // Margins at rows 3..10; origin mode makes CUP margin-relative.
        feed(&mut term, &mut obs, b"\x1b[3;10r\x1b[?6h\x1b[1;1H");
        assert_eq!(term.buffer().cursor_pos(), Pos::new(2, 0));
        feed(&mut term, &mut obs, b"\x1b[6n");
        assert_eq!(term.tty.output, b"\x1b[1;1R");
    }

    #[test]
    fn device_attributes_reply() {
        let mut term = new_terminal(24, 80);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[c");
        assert_eq!(term.tty.output, b"\x1b[?6c");
    }

    #[test]
    fn device_ok_reply() {
        let mut term = new_terminal(24, 80);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[5n");
        assert_eq!(term.tty.output, b"\x1b[0n");
    }

    #[test]
    fn sgr_attribute_order_is_irrelevant() {
        let mut styles = Vec::new();
        for input in [&b"\x1b[1;3;4m"[..], b"\x1b[3;4;1m", b"\x1b[4;1;3m"] {
            let mut term = new_terminal(4, 10);
            let mut obs = TestObserver::default();
            feed(&mut term, &mut obs, input);
            styles.push(term.buffer().style());
        }
        assert_eq!(styles[0], styles[1]);
        assert_eq!(styles[1], styles[2]);
        assert!(styles[0].attrs.contains(Attrs::BOLD | Attrs::ITALIC | Attrs::UNDERLINE));
    }

    #[test]
    fn sgr_colors() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[31;44m");
        assert_eq!(term.buffer().style().fg, Color::Indexed(1));
        assert_eq!(term.buffer().style().bg, Color::Indexed(4));

        feed(&mut term, &mut obs, b"\x1b[38;5;208m");
        assert_eq!(term.buffer().style().fg, Color::Indexed(208));

        feed(&mut term, &mut obs, b"\x1b[48;2;10;20;30m");
        assert_eq!(term.buffer().style().bg, Color::Rgb(10, 20, 30));

        feed(&mut term, &mut obs, b"\x1b[39;49m");
        assert_eq!(term.buffer().style().fg, Color::DefaultFg);
        assert_eq!(term.buffer().style().bg, Color::DefaultBg);
    }

    #[test]
    fn sgr_deficient_extended_color_aborts() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        // The out-of-range colour aborts the sequence; the trailing "4"
        // must not take effect.
        feed(&mut term, &mut obs, b"\x1b[38;5;300;4m");
        assert!(!term.buffer().style().attrs.contains(Attrs::UNDERLINE));
        assert_eq!(term.buffer().style().fg, Color::DefaultFg);
        // A well-formed tail applies normally.
        feed(&mut term, &mut obs, b"\x1b[38;5;42;4m");
        assert_eq!(term.buffer().style().fg, Color::Indexed(42));
        assert!(term.buffer().style().attrs.contains(Attrs::UNDERLINE));
    }

    #[test]
    fn sgr_bright_colors() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[97;100m");
        assert_eq!(term.buffer().style().fg, Color::Indexed(15));
        assert_eq!(term.buffer().style().bg, Color::Indexed(8));
    }

    #[test]
    fn bell_and_title() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x07\x1b]2;hello world\x07\x1b]1;icon\x07");
        assert_eq!(obs.bells, 1);
        assert_eq!(obs.titles, vec!["hello world"]);
        assert_eq!(obs.icon_names, vec!["icon"]);
    }

    #[test]
    fn full_reset_restores_defaults() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[?25l\x1b[4h\x1b[1mtext\x1bc");
        assert_eq!(term.modes(), Modes::initial());
        assert_eq!(row_text(&term, 0), "");
        assert_eq!(term.buffer().style(), Style::normal());
        assert_eq!(obs.title_resets, 1);
    }

    #[test]
    fn deccolm_requests_resize() {
        let mut term = new_terminal(24, 80);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[?3h");
        assert_eq!(obs.resizes, vec![(24, 132)]);
        feed(&mut term, &mut obs, b"\x1b[?3l");
        assert_eq!(obs.resizes, vec![(24, 132), (24, 80)]);
    }

    #[test]
    fn charset_special_graphics() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b(0q\x1b(Bq");
        assert_eq!(row_text(&term, 0), "\u{2500}q");
    }

    #[test]
    fn shift_out_shift_in() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        // Designate SPECIAL into G1, then SO selects it and SI leaves.
        feed(&mut term, &mut obs, b"\x1b)0\x0eq\x0fq");
        assert_eq!(row_text(&term, 0), "\u{2500}q");
    }

    #[test]
    fn insert_mode_shifts() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"BC\x1b[1;1H\x1b[4hA");
        assert_eq!(row_text(&term, 0), "ABC");
    }

    #[test]
    fn bracketed_paste_wraps() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[?2004h");
        term.paste(b"data");
        assert_eq!(term.tty.output, b"\x1b[200~data\x1b[201~");

        term.tty.output.clear();
        feed(&mut term, &mut obs, b"\x1b[?2004l");
        term.paste(b"data");
        assert_eq!(term.tty.output, b"data");
    }

    #[test]
    fn mouse_legacy_encoding() {
        let mut term = new_terminal(24, 80);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[?1000h");
        term.button_press(Button::Left, 1, Mods::empty(), Pos::new(4, 9), &mut obs);
        assert_eq!(term.tty.output, &[0x1b, b'[', b'M', 32, 32 + 10, 32 + 5]);
        term.tty.output.clear();
        term.button_release(Mods::empty(), &mut obs);
        assert_eq!(term.tty.output, &[0x1b, b'[', b'M', 32 + 3, 32 + 10, 32 + 5]);
    }

    #[test]
    fn mouse_legacy_drops_far_coordinates() {
        let mut term = new_terminal(300, 300);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[?1000h");
        term.button_press(Button::Left, 1, Mods::empty(), Pos::new(250, 10), &mut obs);
        assert!(term.tty.output.is_empty());
    }

    #[test]
    fn mouse_sgr_encoding() {
        let mut term = new_terminal(24, 80);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[?1000h\x1b[?1006h");
        term.button_press(Button::Right, 1, Mods::CONTROL, Pos::new(4, 9), &mut obs);
        assert_eq!(term.tty.output, b"\x1b[<18;10;5M");
        term.tty.output.clear();
        term.button_release(Mods::empty(), &mut obs);
        assert_eq!(term.tty.output, b"\x1b[<2;10;5m");
    }

    #[test]
    fn mouse_modes_exclusive() {
        let mut term = new_terminal(24, 80);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[?1000h\x1b[?1002h");
        assert!(term.modes().contains(Modes::MOUSE_MOTION));
        assert!(!term.modes().contains(Modes::MOUSE_BUTTON));
        feed(&mut term, &mut obs, b"\x1b[?1000h");
        assert!(term.modes().contains(Modes::MOUSE_BUTTON));
        assert!(!term.modes().contains(Modes::MOUSE_MOTION));
    }

    #[test]
    fn selection_and_copy_on_release() {
        let mut term = new_terminal(4, 20);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"hello world");
        term.button_press(Button::Left, 1, Mods::empty(), Pos::new(0, 0), &mut obs);
        term.button_motion(Mods::empty(), Pos::new(0, 4));
        term.button_release(Mods::empty(), &mut obs);
        assert_eq!(obs.copies, vec![("hello".to_string(), false)]);
    }

    #[test]
    fn ctrl_shift_clipboard_bindings() {
        let mut term = new_terminal(4, 20);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"text");
        term.button_press(Button::Left, 1, Mods::empty(), Pos::new(0, 0), &mut obs);
        term.button_motion(Mods::empty(), Pos::new(0, 3));
        term.button_release(Mods::empty(), &mut obs);
        obs.copies.clear();

        term.key_press(KeySym::Char('c'), Mods::SHIFT | Mods::CONTROL, &mut obs);
        assert_eq!(obs.copies, vec![("text".to_string(), true)]);
        term.key_press(KeySym::Char('v'), Mods::SHIFT | Mods::CONTROL, &mut obs);
        assert_eq!(obs.pastes, vec![true]);
        // Nothing was written to the pty for either binding.
        assert_eq!(term.tty.output, b"");
    }

    #[test]
    fn shift_pageup_scrolls_history() {
        let mut term = new_terminal(2, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"a\r\nb\r\nc\r\nd");
        assert!(term.buffer().historical_rows() > 0);
        term.key_press(KeySym::PageUp, Mods::SHIFT, &mut obs);
        assert!(term.buffer().scroll_offset() > 0);
        assert_eq!(term.tty.output, b""); // handled locally
        term.key_press(KeySym::End, Mods::SHIFT, &mut obs);
        assert_eq!(term.buffer().scroll_offset(), 0);
    }

    #[test]
    fn key_press_writes_to_pty() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        term.key_press(KeySym::Char('l'), Mods::empty(), &mut obs);
        term.key_press(KeySym::Enter, Mods::empty(), &mut obs);
        assert_eq!(term.tty.output, b"l\r");
    }

    #[test]
    fn app_cursor_mode_changes_arrows() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        term.key_press(KeySym::Up, Mods::empty(), &mut obs);
        assert_eq!(term.tty.output, b"\x1b[A");
        term.tty.output.clear();
        feed(&mut term, &mut obs, b"\x1b[?1h");
        term.key_press(KeySym::Up, Mods::empty(), &mut obs);
        assert_eq!(term.tty.output, b"\x1bOA");
    }

    #[test]
    fn child_exit_is_one_shot() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        term.tty.exited = Some(3);
        term.read(&mut obs);
        term.read(&mut obs);
        assert_eq!(obs.exits, vec![3]);
        // Writes are dumped after exit.
        term.key_press(KeySym::Char('x'), Mods::empty(), &mut obs);
        assert_eq!(term.tty.output, b"");
    }

    #[test]
    fn margins_and_scroll_region() {
        let mut term = new_terminal(5, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"0\r\n1\r\n2\r\n3\r\n4");
        // Margins rows 2..4 (1-based), scroll up inside them.
        feed(&mut term, &mut obs, b"\x1b[2;4r\x1b[S");
        assert_eq!(row_text(&term, 0), "0");
        assert_eq!(row_text(&term, 1), "2");
        assert_eq!(row_text(&term, 2), "3");
        assert_eq!(row_text(&term, 3), "");
        assert_eq!(row_text(&term, 4), "4");
        assert_eq!(term.buffer().historical_rows(), 0);
    }

    #[test]
    fn insert_delete_lines_outside_margins_ignored() {
        let mut term = new_terminal(5, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"a\r\nb\r\nc\r\nd\r\ne");
        // Margins rows 2..4; park the cursor outside and try IL.
        feed(&mut term, &mut obs, b"\x1b[2;4r\x1b[5;1H\x1b[L");
        assert_eq!(row_text(&term, 4), "e");
        assert_eq!(row_text(&term, 1), "b");
    }

    #[test]
    fn reverse_video_damages_everything() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        term.dispatch(true, &mut NullRenderer);
        feed(&mut term, &mut obs, b"\x1b[?5h");
        let region = term.buffer().accumulate_damage();
        assert_eq!(region.begin, Pos::new(0, 0));
        assert_eq!(region.end, Pos::new(4, 10));
    }

    #[test]
    fn tab_control_advances() {
        let mut term = new_terminal(4, 20);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\tx");
        assert_eq!(term.buffer().cursor_pos(), Pos::new(0, 9));
        assert_eq!(row_text(&term, 0), "        x");
    }

    #[test]
    fn tab_set_and_clear() {
        let mut term = new_terminal(4, 40);
        let mut obs = TestObserver::default();
        // Clear all stops, set one at column 5 (1-based 6).
        feed(&mut term, &mut obs, b"\x1b[3g\x1b[1;6H\x1bH\x1b[1;1H\t");
        assert_eq!(term.buffer().cursor_pos().col, 5);
        feed(&mut term, &mut obs, b"\t");
        assert_eq!(term.buffer().cursor_pos().col, 39); // no more stops
    }

    #[test]
    fn save_restore_cursor_escapes() {
        let mut term = new_terminal(6, 20);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[3;7H\x1b7\x1b[1;1H\x1b8");
        assert_eq!(term.buffer().cursor_pos(), Pos::new(2, 6));
        feed(&mut term, &mut obs, b"\x1b[5;5H\x1b[s\x1b[1;1H\x1b[u");
        assert_eq!(term.buffer().cursor_pos(), Pos::new(4, 4));
    }

    #[test]
    fn window_ops_are_noops() {
        let mut term = new_terminal(4, 10);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b[22;0t\x1b[8;30;100tok");
        assert_eq!(row_text(&term, 0), "ok");
    }

    #[test]
    fn decaln_fills_screen() {
        let mut term = new_terminal(2, 3);
        let mut obs = TestObserver::default();
        feed(&mut term, &mut obs, b"\x1b#8");
        assert_eq!(row_text(&term, 0), "EEE");
        assert_eq!(row_text(&term, 1), "EEE");
    }

    #[test]
    fn flush_drains_queue() {
        let mut term = new_terminal(4, 10);
        term.write_buffer.extend_from_slice(b"queued");
        assert!(term.needs_flush());
        term.flush();
        assert!(!term.needs_flush());
        assert_eq!(term.tty.output, b"queued");
    }
}
