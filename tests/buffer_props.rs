//! Property-based invariant tests for the buffer, parser and controller.
//!
//! These verify structural invariants that must hold for any input:
//!
//! 1. The active region always holds exactly `rows` lines of `cols` cells.
//! 2. The cursor stays in bounds after any operation; a pending wrap
//!    implies the cursor sits on the last column.
//! 3. Reflow resizes preserve visible content (round-trip).
//! 4. Deduper refcounts match live references; zero means evicted.
//! 5. The parser and decoder terminate without panicking on any bytes.
//! 6. Independent SGR attributes commute.
//! 7. Origin-mode CUP is margin-relative.
//! 8. Selection extraction round-trips ASCII content.

use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use vtcore::buffer::Buffer;
use vtcore::cell::{Cell, Pos, Seq};
use vtcore::config::Config;
use vtcore::dedupe::Deduper;
use vtcore::keymap::Mods;
use vtcore::pty::{Tty, TtyError};
use vtcore::terminal::{Button, Observer, Terminal};

// ── Helpers ─────────────────────────────────────────────────────────────

/// In-memory pty whose queues stay reachable after the tty is moved into
/// the terminal.
#[derive(Clone, Default)]
struct SinkTty {
    input: Rc<RefCell<Vec<u8>>>,
    output: Rc<RefCell<Vec<u8>>>,
}

impl Tty for SinkTty {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TtyError> {
        let mut input = self.input.borrow_mut();
        if input.is_empty() {
            return Ok(0);
        }
        let n = input.len().min(buf.len());
        buf[..n].copy_from_slice(&input[..n]);
        input.drain(..n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TtyError> {
        self.output.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn resize(&mut self, _rows: u16, _cols: u16) -> Result<(), TtyError> {
        Ok(())
    }
}

#[derive(Default)]
struct SinkObserver;

impl Observer for SinkObserver {
    fn copy(&mut self, _: &str, _: bool) {}
    fn paste(&mut self, _: bool) {}
    fn set_title(&mut self, _: &str) {}
    fn reset_title(&mut self) {}
    fn set_icon_name(&mut self, _: &str) {}
    fn bell(&mut self) {}
    fn resize_buffer(&mut self, _: u16, _: u16) {}
    fn child_exited(&mut self, _: i32) {}
}

fn new_terminal(rows: u16, cols: u16) -> (Terminal<SinkTty>, SinkTty) {
    let tty = SinkTty::default();
    let handle = tty.clone();
    (Terminal::new(&Config::default(), tty, rows, cols), handle)
}

fn feed(term: &mut Terminal<SinkTty>, handle: &SinkTty, bytes: &[u8]) {
    let mut obs = SinkObserver;
    handle.input.borrow_mut().extend_from_slice(bytes);
    while !handle.input.borrow().is_empty() {
        term.read(&mut obs);
    }
}

fn new_buffer(rows: u16, cols: u16, limit: usize) -> Buffer {
    Buffer::new(
        Rc::new(RefCell::new(Deduper::new())),
        rows,
        cols,
        limit,
        "-_./".to_string(),
    )
}

fn visible_text(buffer: &Buffer) -> Vec<String> {
    let mut rows = Vec::new();
    let mut cells = Vec::new();
    for row in -(buffer.historical_rows() as i64)..buffer.rows() as i64 {
        let (_, wrap) = buffer.fetch_line(row, &mut cells);
        let text: String = cells[..wrap as usize]
            .iter()
            .map(|c| std::str::from_utf8(c.seq.as_bytes()).unwrap_or(" ").to_string())
            .collect();
        rows.push(text);
    }
    // Trailing blank rows do not count as content.
    while rows.last().is_some_and(|r| r.is_empty()) {
        rows.pop();
    }
    rows
}

fn write_text(buffer: &mut Buffer, text: &str) {
    for ch in text.chars() {
        match ch {
            '\n' => buffer.forward_index(true),
            _ => {
                let mut utf8 = [0u8; 4];
                ch.encode_utf8(&mut utf8);
                buffer.write(Seq::new(utf8), true, false);
            }
        }
    }
}

fn check_invariants(buffer: &Buffer) {
    let rows = buffer.rows();
    let cols = buffer.cols();
    assert!(rows >= 1 && cols >= 1);
    let cursor = buffer.cursor_pos();
    assert!(cursor.row < rows, "cursor row out of bounds");
    assert!(cursor.col < cols, "cursor col out of bounds");
    if buffer.wrap_next() {
        assert_eq!(cursor.col, cols - 1, "wrap_next off the last column");
    }
    assert!(buffer.scroll_offset() <= buffer.historical_rows());
    assert!(buffer.margin_begin() < buffer.margin_end());
    assert!(buffer.margin_end() <= rows);
    // Every row fetches at full width.
    let mut cells: Vec<Cell> = Vec::new();
    for row in -(buffer.historical_rows() as i64)..rows as i64 {
        buffer.fetch_line(row, &mut cells);
        assert_eq!(cells.len(), cols as usize);
    }
}

// ── 1+2: invariants under arbitrary operations ──────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Write(char),
    Newline,
    CarriageReturn,
    Backspace,
    Tab,
    ResizeReflow(u16, u16),
    ResizeClip(u16, u16),
    ScrollUp(u16),
    ScrollDown(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => proptest::char::range('!', '~').prop_map(Op::Write),
        2 => Just(Op::Newline),
        1 => Just(Op::CarriageReturn),
        1 => Just(Op::Backspace),
        1 => Just(Op::Tab),
        1 => (1u16..=30, 1u16..=60).prop_map(|(r, c)| Op::ResizeReflow(r, c)),
        1 => (1u16..=30, 1u16..=60).prop_map(|(r, c)| Op::ResizeClip(r, c)),
        1 => (1u16..=5).prop_map(Op::ScrollUp),
        1 => (1u16..=5).prop_map(Op::ScrollDown),
    ]
}

proptest! {
    #[test]
    fn invariants_hold_under_any_ops(ops in proptest::collection::vec(op_strategy(), 0..200)) {
        let mut buffer = new_buffer(6, 12, 64);
        for op in ops {
            match op {
                Op::Write(c) => {
                    let mut utf8 = [0u8; 4];
                    c.encode_utf8(&mut utf8);
                    buffer.write(Seq::new(utf8), true, false);
                }
                Op::Newline => buffer.forward_index(false),
                Op::CarriageReturn => {
                    let pos = buffer.cursor_pos().at_col(0);
                    buffer.move_cursor(pos, false);
                }
                Op::Backspace => buffer.backspace(true),
                Op::Tab => buffer.tab_forward(1),
                Op::ResizeReflow(r, c) => buffer.resize_reflow(r, c),
                Op::ResizeClip(r, c) => buffer.resize_clip(r, c),
                Op::ScrollUp(n) => {
                    buffer.scroll_up_history(n);
                }
                Op::ScrollDown(n) => {
                    buffer.scroll_down_history(n);
                }
            }
            check_invariants(&buffer);
        }
    }
}

// ── 3: reflow round-trips ───────────────────────────────────────────────

fn lines_strategy() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-zA-Z0-9 ]{0,30}", 1..8)
}

proptest! {
    #[test]
    fn reflow_round_trip(
        lines in lines_strategy(),
        r2 in 1u16..12,
        c2 in 1u16..40,
    ) {
        let mut buffer = new_buffer(6, 20, 4096);
        write_text(&mut buffer, &lines.join("\n"));
        let before = visible_text(&buffer);
        buffer.resize_reflow(r2, c2);
        check_invariants(&buffer);
        buffer.resize_reflow(6, 20);
        check_invariants(&buffer);
        let after = visible_text(&buffer);
        prop_assert_eq!(before, after);
    }

    #[test]
    fn reflow_preserves_joined_content(
        lines in lines_strategy(),
        // Narrow enough widths can push the head of the bottom paragraph
        // into the open pending state, where it is invisible until the
        // paragraph completes; keep every paragraph within one screen.
        c2 in 5u16..40,
    ) {
        // Re-wrapping never changes the concatenation of the content.
        let mut buffer = new_buffer(6, 20, 4096);
        write_text(&mut buffer, &lines.join("\n"));
        let before_flat: String = visible_text(&buffer).join("");
        buffer.resize_reflow(6, c2);
        let after_flat: String = visible_text(&buffer).join("");
        prop_assert_eq!(before_flat, after_flat);
    }
}

// ── 4: deduper refcounts ────────────────────────────────────────────────

proptest! {
    #[test]
    fn deduper_refcounts_match_stores(
        paragraphs in proptest::collection::vec("[a-c]{0,6}", 1..40),
    ) {
        let mut deduper = Deduper::new();
        let mut tags = Vec::new();
        for text in &paragraphs {
            let cells: Vec<Cell> = text
                .bytes()
                .map(|b| Cell::ascii(b, Default::default()))
                .collect();
            tags.push(deduper.store(cells));
        }
        let mut distinct = tags.clone();
        distinct.sort_unstable();
        distinct.dedup();
        for &tag in &distinct {
            let expected = tags.iter().filter(|&&t| t == tag).count() as u32;
            prop_assert_eq!(deduper.refs(tag), expected);
        }
        // Releasing everything empties the store.
        for &tag in &tags {
            deduper.release(tag);
        }
        prop_assert!(deduper.is_empty());
    }
}

// ── 5: parser and decoder totality ──────────────────────────────────────

proptest! {
    #[test]
    fn controller_survives_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let (mut term, handle) = new_terminal(8, 24);
        feed(&mut term, &handle, &bytes);
        let cursor = term.buffer().cursor_pos();
        prop_assert!(cursor.row < term.rows());
        prop_assert!(cursor.col < term.cols());
    }

    #[test]
    fn decoder_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut machine = vtcore::utf8::Machine::new();
        for b in bytes {
            let _ = machine.consume(b);
        }
    }
}

// ── 6: SGR commutativity ────────────────────────────────────────────────

proptest! {
    #[test]
    fn sgr_attribute_sets_commute(perm in Just(vec![1u8, 3, 4, 5, 7, 8]).prop_shuffle()) {
        let reference = {
            let (mut term, handle) = new_terminal(4, 10);
            feed(&mut term, &handle, b"\x1b[1;3;4;5;7;8m");
            term.buffer().style()
        };
        let shuffled = {
            let (mut term, handle) = new_terminal(4, 10);
            let params: Vec<String> = perm.iter().map(|p| p.to_string()).collect();
            let seq = format!("\x1b[{}m", params.join(";"));
            feed(&mut term, &handle, seq.as_bytes());
            term.buffer().style()
        };
        prop_assert_eq!(reference, shuffled);
    }
}

// ── 7: origin mode ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn origin_mode_cup_is_margin_relative(top in 1u16..10, height in 2u16..10) {
        let rows = 20u16;
        let bottom = (top + height).min(rows);
        let (mut term, handle) = new_terminal(rows, 40);
        let seq = format!("\x1b[{};{}r\x1b[?6h\x1b[1;1H", top, bottom);
        feed(&mut term, &handle, seq.as_bytes());
        prop_assert_eq!(term.buffer().cursor_pos(), Pos::new(top - 1, 0));
    }
}

// ── 8: selection round trip ─────────────────────────────────────────────

#[derive(Default)]
struct CollectingObserver {
    copied: Option<String>,
}

impl Observer for CollectingObserver {
    fn copy(&mut self, text: &str, _clipboard: bool) {
        self.copied = Some(text.to_string());
    }
    fn paste(&mut self, _: bool) {}
    fn set_title(&mut self, _: &str) {}
    fn reset_title(&mut self) {}
    fn set_icon_name(&mut self, _: &str) {}
    fn bell(&mut self) {}
    fn resize_buffer(&mut self, _: u16, _: u16) {}
    fn child_exited(&mut self, _: i32) {}
}

proptest! {
    #[test]
    fn selection_round_trips_ascii(text in "[!-~]{2,15}") {
        let (mut term, handle) = new_terminal(4, 20);
        feed(&mut term, &handle, text.as_bytes());
        let mut obs = CollectingObserver::default();
        term.button_press(Button::Left, 1, Mods::empty(), Pos::new(0, 0), &mut obs);
        term.button_motion(Mods::empty(), Pos::new(0, text.len() as u16 - 1));
        term.button_release(Mods::empty(), &mut obs);
        prop_assert_eq!(obs.copied.as_deref(), Some(text.as_str()));
    }
}
