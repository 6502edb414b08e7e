//! The terminal cell buffer.
//!
//! The buffer is the in-memory representation of the on-screen data: a
//! mutable "active" grid of `rows x cols` cells plus an immutable
//! scroll-back history. Historical data is stored as *paragraphs* (the
//! concatenation of continuation-wrapped rows) interned in a shared
//! [`Deduper`]; the history deque holds lightweight [`HLine`] references
//! mapping grid rows onto paragraph segments at the current width.
//!
//! Because paragraphs never change, a reflowing resize only rebuilds the
//! segment index: each paragraph is re-split at the new width and the
//! bottom of the result is materialized back into the active region.
//!
//! A paragraph whose trailing rows are still on screen is accumulated in
//! `pending` until its final (non-continued) row is pushed out; only then
//! is it interned and indexed. The same mechanism absorbs partially
//! re-materialized paragraphs during resize, which is what makes
//! resize round-trips content-preserving.

use crate::cell::{Attrs, Cell, Color, Pos, Seq, Style};
use crate::dedupe::{Deduper, Tag};
use crate::modes::{CharSet, CharSub, CS_US};
use regex::Regex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Absolute position: non-negative rows index the active region top-down,
/// negative rows index history bottom-up (-1 is the last historical row).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct APos {
    pub row: i64,
    pub col: u16,
}

impl APos {
    pub fn new(row: i64, col: u16) -> Self {
        Self { row, col }
    }
}

/// A historical line: a segment of an interned paragraph.
///
/// `index` is the position in the tag deque, offset by `lost_tags` so that
/// stored values stay stable while old tags are dropped from the front.
#[derive(Clone, Copy, Debug)]
struct HLine {
    index: u32,
    seqnum: u32,
}

/// An active line directly holds its cells.
#[derive(Clone, Debug)]
struct ALine {
    cells: Vec<Cell>,
    /// Does this line continue on the next row?
    cont: bool,
    /// First column after the last written cell; the wrap anchor.
    wrap: u16,
}

impl ALine {
    fn blank(cols: u16, style: Style) -> Self {
        Self {
            cells: vec![Cell::blank(style); cols as usize],
            cont: false,
            wrap: 0,
        }
    }

    fn resize(&mut self, cols: u16) {
        self.cont = false;
        self.wrap = self.wrap.min(cols);
        self.cells.resize(cols as usize, Cell::blank(Style::normal()));
    }

    fn clear(&mut self, style: Style) {
        self.cont = false;
        self.wrap = 0;
        self.cells.fill(Cell::blank(style));
    }

    fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.is_blank())
    }
}

/// Per-viewport-row damage: a half-open column range.
#[derive(Clone, Copy, Debug, Default)]
struct Damage {
    begin: u16,
    end: u16,
}

impl Damage {
    fn add(&mut self, begin: u16, end: u16) {
        debug_assert!(begin <= end);
        if begin == end {
            return;
        }
        if self.begin == self.end {
            self.begin = begin;
            self.end = end;
        } else {
            self.begin = self.begin.min(begin);
            self.end = self.end.max(end);
        }
    }

    fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    fn reset(&mut self) {
        *self = Damage::default();
    }
}

/// The damaged rectangle of a frame, in viewport coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Region {
    pub begin: Pos,
    pub end: Pos,
}

/// The cursor, including its character-set state.
#[derive(Clone)]
pub struct Cursor {
    pub pos: Pos,
    pub style: Style,
    pub wrap_next: bool,
    pub charset: CharSet,
    pub g0: &'static CharSub,
    pub g1: &'static CharSub,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            pos: Pos::default(),
            style: Style::normal(),
            wrap_next: false,
            charset: CharSet::G0,
            g0: &CS_US,
            g1: &CS_US,
        }
    }
}

/// Drawing sink for [`Buffer::dispatch`]. One frame is bracketed by
/// `fix_damage_begin`/`fix_damage_end`; a `false` from begin skips the
/// frame and preserves damage.
pub trait Renderer {
    fn draw_bg(&mut self, pos: Pos, count: u16, color: Color);
    fn draw_fg(&mut self, pos: Pos, count: u16, color: Color, attrs: Attrs, bytes: &[u8]);
    #[allow(clippy::too_many_arguments)]
    fn draw_cursor(
        &mut self,
        pos: Pos,
        fg: Color,
        bg: Color,
        attrs: Attrs,
        bytes: &[u8],
        wrap_next: bool,
        focused: bool,
    );
    fn draw_selection(&mut self, begin: Pos, end: Pos, topless: bool, bottomless: bool);
    fn draw_scrollbar(&mut self, total_rows: usize, history_offset: usize, visible_rows: u16);
    fn fix_damage_begin(&mut self) -> bool;
    fn fix_damage_end(&mut self, damage: Region, scrollbar: bool);
}

struct Selection {
    mark: APos,
    delim: APos,
}

struct Search {
    pattern: Regex,
    /// Buffer row of the first row of the paragraph holding the focused
    /// match.
    para_row: i64,
    /// Match spans within that paragraph, in buffer coordinates,
    /// left-to-right. Endpoints are inclusive.
    matches: Vec<(APos, APos)>,
    current: usize,
    /// False until the first match is found.
    valid: bool,
}

/// Number of segments a paragraph of `len` cells occupies at width `cols`.
/// An empty paragraph still occupies one (blank) row.
fn segment_count(len: usize, cols: u16) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(cols as usize)
    }
}

/// The buffer: active grid, history, cursor, tabs, selection, search.
pub struct Buffer {
    deduper: Rc<RefCell<Deduper>>,
    /// The paragraph history, oldest first.
    tags: VecDeque<Tag>,
    /// Incremented for each tag dropped from the front.
    lost_tags: u32,
    /// Paragraph being assembled from evicted rows; interned when its
    /// non-continued final row arrives.
    pending: Vec<Cell>,
    /// Historical paragraph segments, indexable by row.
    history: VecDeque<HLine>,
    /// The active region, exactly `rows` lines.
    active: VecDeque<ALine>,
    /// Per-viewport-row damage.
    damage: Vec<Damage>,
    /// True at each tab stop column.
    tabs: Vec<bool>,
    /// Rows of history shown above the active region; 0 = bottom.
    scroll_offset: usize,
    history_limit: usize,
    cols: u16,
    /// Margin rows: [margin_begin, margin_end).
    margin_begin: u16,
    margin_end: u16,
    /// Does the scrollbar need redrawing?
    bar_damage: bool,
    selection: Option<Selection>,
    cursor: Cursor,
    saved_cursor: Cursor,
    search: Option<Search>,
    /// Non-alphanumeric characters that still extend a word selection.
    cut_chars: String,
}

impl Buffer {
    pub fn new(
        deduper: Rc<RefCell<Deduper>>,
        rows: u16,
        cols: u16,
        history_limit: usize,
        cut_chars: String,
    ) -> Self {
        assert!(rows > 0 && cols > 0, "zero-sized buffer");
        let active: VecDeque<ALine> = (0..rows)
            .map(|_| ALine::blank(cols, Style::normal()))
            .collect();
        let mut buffer = Self {
            deduper,
            tags: VecDeque::new(),
            lost_tags: 0,
            pending: Vec::new(),
            history: VecDeque::new(),
            active,
            damage: vec![Damage::default(); rows as usize],
            tabs: Vec::new(),
            scroll_offset: 0,
            history_limit,
            cols,
            margin_begin: 0,
            margin_end: rows,
            bar_damage: true,
            selection: None,
            cursor: Cursor::default(),
            saved_cursor: Cursor::default(),
            search: None,
            cut_chars,
        };
        buffer.reset_tabs();
        buffer.damage_viewport(true);
        buffer
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    pub fn rows(&self) -> u16 {
        self.active.len() as u16
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    /// Wrapped rows in the scroll-back history.
    pub fn historical_rows(&self) -> usize {
        self.history.len()
    }

    pub fn total_rows(&self) -> usize {
        self.history.len() + self.active.len()
    }

    /// Viewport offset from the start of history.
    pub fn history_offset(&self) -> usize {
        self.history.len() - self.scroll_offset
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn bar_damage(&self) -> bool {
        self.bar_damage
    }

    pub fn margin_begin(&self) -> u16 {
        self.margin_begin
    }

    pub fn margin_end(&self) -> u16 {
        self.margin_end
    }

    fn margins_are_full(&self) -> bool {
        self.margin_begin == 0 && self.margin_end == self.rows()
    }

    // ------------------------------------------------------------------
    // Cursor
    // ------------------------------------------------------------------

    pub fn cursor_pos(&self) -> Pos {
        self.cursor.pos
    }

    pub fn wrap_next(&self) -> bool {
        self.cursor.wrap_next
    }

    pub fn style(&self) -> Style {
        self.cursor.style
    }

    pub fn set_attr(&mut self, attr: Attrs) {
        self.cursor.style.attrs.insert(attr);
    }

    pub fn unset_attr(&mut self, attr: Attrs) {
        self.cursor.style.attrs.remove(attr);
    }

    pub fn set_fg(&mut self, color: Color) {
        self.cursor.style.fg = color;
    }

    pub fn set_bg(&mut self, color: Color) {
        self.cursor.style.bg = color;
    }

    pub fn reset_style(&mut self) {
        self.cursor.style = Style::normal();
    }

    /// Home the cursor and reset its style and character sets.
    pub fn reset_cursor(&mut self) {
        self.damage_cursor();
        self.cursor = Cursor::default();
    }

    pub fn save_cursor(&mut self) {
        self.saved_cursor = self.cursor.clone();
    }

    pub fn restore_cursor(&mut self) {
        self.damage_cursor();
        self.cursor = self.saved_cursor.clone();
        // The saved position may be stale after a resize.
        self.cursor.pos.row = self.cursor.pos.row.min(self.rows() - 1);
        self.cursor.pos.col = self.cursor.pos.col.min(self.cols - 1);
        if self.cursor.wrap_next && self.cursor.pos.col != self.cols - 1 {
            self.cursor.wrap_next = false;
        }
        self.damage_cursor();
    }

    /// Absolute cursor motion. With `origin` the row is relative to the
    /// margin and confined to it.
    pub fn move_cursor(&mut self, pos: Pos, origin: bool) {
        self.damage_cursor();
        let row = if origin {
            (pos.row.saturating_add(self.margin_begin))
                .clamp(self.margin_begin, self.margin_end - 1)
        } else {
            pos.row.min(self.rows() - 1)
        };
        self.cursor.pos.row = row;
        self.cursor.pos.col = pos.col.min(self.cols - 1);
        self.cursor.wrap_next = false;
        self.damage_cursor();
    }

    /// Relative cursor motion, clamped at the screen edges.
    pub fn move_cursor_rel(&mut self, d_row: i32, d_col: i32) {
        let row = i32::from(self.cursor.pos.row)
            .saturating_add(d_row)
            .clamp(0, i32::from(self.rows()) - 1);
        let col = i32::from(self.cursor.pos.col)
            .saturating_add(d_col)
            .clamp(0, i32::from(self.cols) - 1);
        self.move_cursor(Pos::new(row as u16, col as u16), false);
    }

    // ------------------------------------------------------------------
    // Character sets
    // ------------------------------------------------------------------

    pub fn use_charset(&mut self, charset: CharSet) {
        self.cursor.charset = charset;
    }

    pub fn set_char_sub(&mut self, charset: CharSet, sub: &'static CharSub) {
        match charset {
            CharSet::G0 => self.cursor.g0 = sub,
            CharSet::G1 => self.cursor.g1 = sub,
        }
    }

    /// Applies the active substitution table to a single-byte character.
    pub fn translate(&self, ascii: u8) -> Option<Seq> {
        let sub = match self.cursor.charset {
            CharSet::G0 => self.cursor.g0,
            CharSet::G1 => self.cursor.g1,
        };
        sub.translate(ascii)
    }

    // ------------------------------------------------------------------
    // Tabs
    // ------------------------------------------------------------------

    pub fn set_tab(&mut self) {
        let col = self.cursor.pos.col as usize;
        self.tabs[col] = true;
    }

    pub fn unset_tab(&mut self) {
        let col = self.cursor.pos.col as usize;
        self.tabs[col] = false;
    }

    pub fn clear_tabs(&mut self) {
        self.tabs.fill(false);
    }

    pub fn reset_tabs(&mut self) {
        self.tabs = (0..self.cols as usize).map(|i| i % 8 == 0).collect();
    }

    pub fn tab_forward(&mut self, count: u16) {
        let mut col = self.cursor.pos.col;
        let mut remaining = count;
        while remaining != 0 {
            if col + 1 >= self.cols {
                col = self.cols - 1;
                break;
            }
            col += 1;
            if self.tabs[col as usize] {
                remaining -= 1;
            }
        }
        self.move_cursor(self.cursor.pos.at_col(col), false);
    }

    pub fn tab_backward(&mut self, count: u16) {
        let mut col = self.cursor.pos.col;
        let mut remaining = count;
        while remaining != 0 && col > 0 {
            col -= 1;
            if self.tabs[col as usize] {
                remaining -= 1;
            }
        }
        self.move_cursor(self.cursor.pos.at_col(col), false);
    }

    // ------------------------------------------------------------------
    // Margins
    // ------------------------------------------------------------------

    pub fn set_margins(&mut self, begin: u16, end: u16) {
        debug_assert!(begin < end && end <= self.rows());
        self.margin_begin = begin;
        self.margin_end = end;
    }

    pub fn reset_margins(&mut self) {
        self.margin_begin = 0;
        self.margin_end = self.rows();
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Writes one cell at the cursor, handling pending wrap and insert
    /// mode, then advances or arms `wrap_next`.
    pub fn write(&mut self, seq: Seq, auto_wrap: bool, insert: bool) {
        if self.cursor.wrap_next && auto_wrap {
            debug_assert_eq!(self.cursor.pos.col, self.cols - 1);
            let row = self.cursor.pos.row;
            self.active[row as usize].cont = true;
            self.damage_cursor();
            self.cursor.pos.col = 0;
            self.cursor.wrap_next = false;
            if row == self.margin_end - 1 {
                self.add_line();
            } else {
                self.cursor.pos.row += 1;
            }
        }
        // With auto-wrap off a pending wrap just overwrites the last
        // column again.

        let pos = self.cursor.pos;
        if insert {
            self.shift_cells_right(pos, 1);
        }

        let style = self.cursor.style;
        let line = &mut self.active[pos.row as usize];
        line.cells[pos.col as usize] = Cell::utf8(seq, style);
        line.wrap = line.wrap.max(pos.col + 1);
        let damage_end = if insert { self.cols } else { pos.col + 1 };
        self.damage_span(pos.row, pos.col, damage_end);

        if pos.col == self.cols - 1 {
            self.cursor.wrap_next = true;
        } else {
            self.cursor.pos.col += 1;
        }
    }

    /// BS. With auto-wrap, backing over column 0 re-enters the previous
    /// row (not above the margin).
    pub fn backspace(&mut self, auto_wrap: bool) {
        if self.cursor.wrap_next {
            self.cursor.wrap_next = false;
            return;
        }
        if self.cursor.pos.col == 0 {
            if auto_wrap && self.cursor.pos.row > self.margin_begin {
                let pos = Pos::new(self.cursor.pos.row - 1, self.cols - 1);
                self.move_cursor(pos, false);
            }
        } else {
            let pos = self.cursor.pos.left(1);
            self.move_cursor(pos, false);
        }
    }

    /// LF/IND/NEL: move down within the margin, scrolling at the bottom.
    pub fn forward_index(&mut self, reset_col: bool) {
        if reset_col {
            self.damage_cursor();
            self.cursor.pos.col = 0;
            self.cursor.wrap_next = false;
        }
        if self.cursor.pos.row == self.margin_end - 1 {
            self.add_line();
        } else if self.cursor.pos.row < self.rows() - 1 {
            let pos = self.cursor.pos.down(1);
            self.move_cursor(pos, false);
        }
    }

    /// RI: move up within the margin, scrolling down at the top.
    pub fn reverse_index(&mut self) {
        if self.cursor.pos.row == self.margin_begin {
            self.insert_lines_at(self.margin_begin, 1);
        } else if self.cursor.pos.row > 0 {
            let pos = self.cursor.pos.up(1);
            self.move_cursor(pos, false);
        }
    }

    /// Scrolls the margin region up one row. With full margins the evicted
    /// top row is pushed towards history.
    fn add_line(&mut self) {
        if self.margins_are_full() && self.history_limit > 0 {
            self.bump();
            let style = self.cursor.style;
            self.active.push_back(ALine::blank(self.cols, style));
            self.shift_rows(-1);
            self.damage_rows(0, self.rows());
            self.bar_damage = true;
        } else {
            // Margin-local scroll, or the alternate buffer: the top line
            // of the region is discarded.
            self.erase_lines_at(self.margin_begin, 1);
        }
    }

    /// Moves the top active line into the pending paragraph; interns the
    /// paragraph when the line does not continue.
    fn bump(&mut self) {
        let line = self.active.pop_front().expect("active region empty");
        let take = if line.cont {
            self.cols as usize
        } else {
            line.wrap as usize
        };
        self.pending.extend_from_slice(&line.cells[..take]);
        if !line.cont {
            self.finalize_pending();
        }
    }

    fn finalize_pending(&mut self) {
        let para = std::mem::take(&mut self.pending);
        let len = para.len();
        let tag = self.deduper.borrow_mut().store(para);
        let index = self.lost_tags + self.tags.len() as u32;
        self.tags.push_back(tag);
        for seqnum in 0..segment_count(len, self.cols) {
            self.history.push_back(HLine {
                index,
                seqnum: seqnum as u32,
            });
        }
        self.enforce_history_limit();
    }

    fn enforce_history_limit(&mut self) {
        while self.history.len() > self.history_limit {
            let dropped = self.history.pop_front().expect("history empty");
            // Once no remaining segment references the front tag, the tag
            // itself is retired and its paragraph reference released.
            let front_gone = match self.history.front() {
                Some(next) => next.index != dropped.index,
                None => true,
            };
            if front_gone {
                let tag = self.tags.pop_front().expect("tag deque empty");
                self.lost_tags += 1;
                self.deduper.borrow_mut().release(tag);
            }
            self.bar_damage = true;
            // The viewport must stay within history.
            self.scroll_offset = self.scroll_offset.min(self.history.len());
        }
    }

    // ------------------------------------------------------------------
    // Cell edits
    // ------------------------------------------------------------------

    /// Writes a cell directly (alignment pattern, tests).
    pub fn set_cell(&mut self, pos: Pos, cell: Cell) {
        debug_assert!(pos.row < self.rows() && pos.col < self.cols);
        let line = &mut self.active[pos.row as usize];
        line.cells[pos.col as usize] = cell;
        line.wrap = line.wrap.max(pos.col + 1);
        self.damage_span(pos.row, pos.col, pos.col + 1);
    }

    fn shift_cells_right(&mut self, pos: Pos, n: u16) {
        let n = n.min(self.cols - pos.col);
        let line = &mut self.active[pos.row as usize];
        let col = pos.col as usize;
        line.cells[col..].rotate_right(n as usize);
        let style = self.cursor.style;
        line.cells[col..col + n as usize].fill(Cell::blank(style));
        self.damage_span(pos.row, pos.col, self.cols);
    }

    /// ICH: open a gap at the cursor, shifting the tail right.
    pub fn insert_cells(&mut self, n: u16) {
        self.shift_cells_right(self.cursor.pos, n);
    }

    /// DCH: close a gap at the cursor, blank-filling the tail.
    pub fn erase_cells(&mut self, n: u16) {
        let pos = self.cursor.pos;
        let n = n.min(self.cols - pos.col);
        let style = self.cursor.style;
        let line = &mut self.active[pos.row as usize];
        let col = pos.col as usize;
        line.cells[col..].rotate_left(n as usize);
        let fill_from = self.cols - n;
        line.cells[fill_from as usize..].fill(Cell::blank(style));
        self.damage_span(pos.row, pos.col, self.cols);
    }

    /// ECH: blank cells in place without shifting.
    pub fn blank_cells(&mut self, n: u16) {
        let pos = self.cursor.pos;
        let n = n.min(self.cols - pos.col);
        let style = self.cursor.style;
        let line = &mut self.active[pos.row as usize];
        let col = pos.col as usize;
        line.cells[col..col + n as usize].fill(Cell::blank(style));
        self.damage_span(pos.row, pos.col, pos.col + n);
    }

    // ------------------------------------------------------------------
    // Clears
    // ------------------------------------------------------------------

    pub fn clear_line(&mut self) {
        let style = self.cursor.style;
        let row = self.cursor.pos.row;
        self.active[row as usize].clear(style);
        self.damage_span(row, 0, self.cols);
    }

    /// EL1: clear from the start of the line through the cursor.
    pub fn clear_line_left(&mut self) {
        let style = self.cursor.style;
        let row = self.cursor.pos.row;
        let end = self.cursor.pos.col + 1;
        let line = &mut self.active[row as usize];
        line.cells[..end as usize].fill(Cell::blank(style));
        line.cont = false;
        self.damage_span(row, 0, end);
    }

    /// EL0: clear from the cursor to the end of the line.
    pub fn clear_line_right(&mut self) {
        let style = self.cursor.style;
        let row = self.cursor.pos.row;
        let begin = self.cursor.pos.col;
        let line = &mut self.active[row as usize];
        line.cells[begin as usize..].fill(Cell::blank(style));
        line.cont = false;
        line.wrap = line.wrap.min(begin);
        self.damage_span(row, begin, self.cols);
    }

    /// Clears the whole active region.
    pub fn clear(&mut self) {
        let end = self.rows();
        self.clear_row_range(0, end);
    }

    /// Clears rows above the cursor row.
    pub fn clear_above(&mut self) {
        let end = self.cursor.pos.row;
        self.clear_row_range(0, end);
    }

    /// Clears rows below the cursor row.
    pub fn clear_below(&mut self) {
        let begin = self.cursor.pos.row + 1;
        let end = self.rows();
        self.clear_row_range(begin, end);
    }

    /// Blank-fills whole rows. A row that is already uniformly blank in
    /// the fill style is left undamaged, so clearing an empty screen does
    /// not force a redraw.
    fn clear_row_range(&mut self, begin: u16, end: u16) {
        let blank = Cell::blank(self.cursor.style);
        for row in begin..end {
            let line = &mut self.active[row as usize];
            if line.cells.iter().all(|c| *c == blank) {
                continue;
            }
            line.cells.fill(blank);
            self.damage_span(row, 0, self.cols);
        }
    }

    // ------------------------------------------------------------------
    // Line edits
    // ------------------------------------------------------------------

    /// IL at the cursor row. The caller checks the cursor is inside the
    /// margin.
    pub fn insert_lines(&mut self, n: u16) {
        let row = self.cursor.pos.row;
        debug_assert!(row >= self.margin_begin && row < self.margin_end);
        let n = n.min(self.margin_end - row);
        self.insert_lines_at(row, n);
    }

    /// DL at the cursor row.
    pub fn erase_lines(&mut self, n: u16) {
        let row = self.cursor.pos.row;
        debug_assert!(row >= self.margin_begin && row < self.margin_end);
        let n = n.min(self.margin_end - row);
        self.erase_lines_at(row, n);
    }

    /// SU: scroll the margin region up, independent of the cursor.
    pub fn scroll_up_margins(&mut self, n: u16) {
        let n = n.min(self.margin_end - self.margin_begin);
        self.erase_lines_at(self.margin_begin, n);
    }

    /// SD: scroll the margin region down.
    pub fn scroll_down_margins(&mut self, n: u16) {
        let n = n.min(self.margin_end - self.margin_begin);
        self.insert_lines_at(self.margin_begin, n);
    }

    fn insert_lines_at(&mut self, row: u16, n: u16) {
        let style = self.cursor.style;
        for _ in 0..n {
            self.active.remove(self.margin_end as usize - 1);
            self.active.insert(row as usize, ALine::blank(self.cols, style));
        }
        // A continuation into the shifted region no longer holds.
        if row > 0 {
            self.active[row as usize - 1].cont = false;
        }
        self.damage_rows(row, self.margin_end);
    }

    fn erase_lines_at(&mut self, row: u16, n: u16) {
        let style = self.cursor.style;
        for _ in 0..n {
            self.active.remove(row as usize);
            self.active
                .insert(self.margin_end as usize - 1, ALine::blank(self.cols, style));
        }
        if row > 0 {
            self.active[row as usize - 1].cont = false;
        }
        self.damage_rows(row, self.margin_end);
    }

    /// DECALN: fill the screen with `E`.
    pub fn screen_alignment(&mut self) {
        let style = self.cursor.style;
        let cols = self.cols;
        for line in &mut self.active {
            line.cells.fill(Cell::ascii(b'E', style));
            line.cont = false;
            line.wrap = cols;
        }
        self.damage_rows(0, self.rows());
    }

    /// Full reset: clears everything, homes the cursor, resets margins and
    /// tabs. History is kept.
    pub fn reset(&mut self) {
        self.clear_selection();
        self.end_search();
        for line in &mut self.active {
            line.clear(Style::normal());
        }
        self.reset_cursor();
        self.saved_cursor = Cursor::default();
        self.reset_margins();
        self.reset_tabs();
        self.scroll_offset = 0;
        self.damage_viewport(true);
    }

    // ------------------------------------------------------------------
    // History scrolling
    // ------------------------------------------------------------------

    pub fn scroll_up_history(&mut self, rows: u16) -> bool {
        let offset = (self.scroll_offset + rows as usize).min(self.history.len());
        self.set_scroll_offset(offset)
    }

    pub fn scroll_down_history(&mut self, rows: u16) -> bool {
        let offset = self.scroll_offset.saturating_sub(rows as usize);
        self.set_scroll_offset(offset)
    }

    pub fn scroll_top_history(&mut self) -> bool {
        self.set_scroll_offset(self.history.len())
    }

    pub fn scroll_bottom_history(&mut self) -> bool {
        self.set_scroll_offset(0)
    }

    fn set_scroll_offset(&mut self, offset: usize) -> bool {
        if offset == self.scroll_offset {
            return false;
        }
        self.scroll_offset = offset;
        self.damage_viewport(true);
        true
    }

    /// Drops the entire scroll-back.
    pub fn clear_history(&mut self) {
        self.clear_selection();
        self.end_search();
        self.history.clear();
        self.lost_tags += self.tags.len() as u32;
        let mut deduper = self.deduper.borrow_mut();
        for tag in self.tags.drain(..) {
            deduper.release(tag);
        }
        drop(deduper);
        self.pending.clear();
        self.scroll_offset = 0;
        self.damage_viewport(true);
    }

    // ------------------------------------------------------------------
    // Resizing
    // ------------------------------------------------------------------

    /// Reflowing resize: paragraphs are preserved and re-segmented at the
    /// new width; the bottom of the result becomes the new active region.
    pub fn resize_reflow(&mut self, rows: u16, cols: u16) {
        assert!(rows > 0 && cols > 0, "resize to zero");
        self.clear_selection();
        self.end_search();
        self.scroll_offset = 0;

        // 1+2: push the interesting part of the active region (everything
        // up to the cursor row or the last non-blank row) into paragraph
        // form. Blank rows below are dropped.
        let cursor_row = self.cursor.pos.row as usize;
        let mut last = cursor_row;
        for r in (0..self.active.len()).rev() {
            if r > last && !self.active[r].is_blank() {
                last = r;
                break;
            }
        }
        let mut cursor_ref = None;
        for r in 0..=last {
            if r == cursor_row {
                cursor_ref = Some((
                    self.lost_tags + self.tags.len() as u32,
                    self.pending.len() + self.cursor.pos.col as usize,
                ));
            }
            self.bump();
        }
        self.active.clear();
        // A trailing continuation cannot happen on the bottom row, but a
        // force-close keeps the buffer consistent if it ever does.
        if !self.pending.is_empty() {
            self.finalize_pending();
        }

        // 3: re-segment every paragraph at the new width.
        self.cols = cols;
        self.rebuild_history();

        // Cursor in global row coordinates over the rebuilt history.
        let total = self.history.len();
        let cursor_global = cursor_ref.and_then(|(stored_index, offset)| {
            if stored_index < self.lost_tags {
                return None; // paragraph fell off the history limit
            }
            let rows_before = self
                .history
                .iter()
                .take_while(|h| h.index < stored_index)
                .count();
            let ord = (stored_index - self.lost_tags) as usize;
            let len = self.deduper.borrow().lookup(self.tags[ord]).len();
            let segs = segment_count(len, cols);
            let seg = (offset / cols as usize).min(segs - 1);
            let col = (offset - seg * cols as usize).min(cols as usize - 1);
            Some((rows_before + seg, col as u16))
        });

        // 4: materialize the tail of history into the active region.
        self.materialize_active(rows);

        // 5: translate the cursor back. The active region shows the last
        // `content` of the `total` rebuilt rows.
        let content = (rows as usize).min(total);
        match cursor_global {
            Some((global, col)) => {
                let top = total - content;
                let row = global.saturating_sub(top).min(rows as usize - 1);
                self.cursor.pos = Pos::new(row as u16, col);
            }
            None => self.cursor.pos = Pos::default(),
        }
        self.cursor.wrap_next = false;
        self.saved_cursor.pos.row = self.saved_cursor.pos.row.min(rows - 1);
        self.saved_cursor.pos.col = self.saved_cursor.pos.col.min(cols - 1);
        self.saved_cursor.wrap_next = false;

        self.finish_resize(rows);
    }

    /// Clipping resize: rows and columns are truncated or padded in place;
    /// wrapped structure in the active region is not recovered.
    pub fn resize_clip(&mut self, rows: u16, cols: u16) {
        assert!(rows > 0 && cols > 0, "resize to zero");
        self.clear_selection();
        self.end_search();
        self.scroll_offset = 0;

        self.cols = cols;
        for line in &mut self.active {
            line.resize(cols);
        }
        while self.active.len() > rows as usize {
            self.active.pop_back();
        }
        while self.active.len() < rows as usize {
            self.active.push_back(ALine::blank(cols, Style::normal()));
        }
        // Segment indexes depend on the width.
        self.rebuild_history();

        self.cursor.pos.row = self.cursor.pos.row.min(rows - 1);
        self.cursor.pos.col = self.cursor.pos.col.min(cols - 1);
        self.cursor.wrap_next = false;
        self.saved_cursor.pos.row = self.saved_cursor.pos.row.min(rows - 1);
        self.saved_cursor.pos.col = self.saved_cursor.pos.col.min(cols - 1);
        self.saved_cursor.wrap_next = false;

        self.finish_resize(rows);
    }

    fn finish_resize(&mut self, rows: u16) {
        self.margin_begin = 0;
        self.margin_end = rows;
        self.damage = vec![Damage::default(); rows as usize];
        self.reset_tabs();
        self.scroll_offset = self.scroll_offset.min(self.history.len());
        self.damage_viewport(true);
        debug_assert_eq!(self.active.len(), rows as usize);
    }

    /// Rebuilds the HLine index from the tag deque at the current width.
    fn rebuild_history(&mut self) {
        self.history.clear();
        let deduper = self.deduper.borrow();
        for (i, &tag) in self.tags.iter().enumerate() {
            let len = deduper.lookup(tag).len();
            let index = self.lost_tags + i as u32;
            for seqnum in 0..segment_count(len, self.cols) {
                self.history.push_back(HLine {
                    index,
                    seqnum: seqnum as u32,
                });
            }
        }
        drop(deduper);
        self.enforce_history_limit();
    }

    /// Pulls rows from the back of history into the (empty) active region
    /// until it holds `rows` lines, then pads with blanks. A paragraph
    /// needed only partially has its unshown prefix moved back into
    /// `pending`, where the continuation rows now at the top of the screen
    /// will rejoin it when they are next evicted.
    fn materialize_active(&mut self, rows: u16) {
        debug_assert!(self.active.is_empty());
        debug_assert!(self.pending.is_empty());

        while self.active.len() < rows as usize {
            let hline = match self.history.pop_back() {
                Some(h) => h,
                None => break,
            };
            let ord = (hline.index - self.lost_tags) as usize;
            let tag = self.tags[ord];
            let (line, _segs) = self.materialize_segment(tag, hline.seqnum as usize);
            self.active.push_front(line);

            let tag_has_more = matches!(self.history.back(), Some(h) if h.index == hline.index);
            if !tag_has_more {
                // The tag has no segments left in history: retire it. Any
                // cells before the first materialized segment (a history
                // limit already truncated them) reopen as pending so the
                // continuation rows can rejoin them.
                debug_assert_eq!(ord, self.tags.len() - 1);
                let tag = self.tags.pop_back().expect("tag deque empty");
                self.restore_prefix(tag, hline.seqnum as usize);
                self.deduper.borrow_mut().release(tag);
                if hline.seqnum > 0 {
                    // Nothing may be materialized above an open pending.
                    break;
                }
            } else if self.active.len() == rows as usize {
                // The screen is full mid-paragraph: the unshown prefix
                // becomes the open pending paragraph.
                while matches!(self.history.back(), Some(h) if h.index == hline.index) {
                    self.history.pop_back();
                }
                let tag = self.tags.pop_back().expect("tag deque empty");
                self.restore_prefix(tag, hline.seqnum as usize);
                self.deduper.borrow_mut().release(tag);
            }
        }

        let style = Style::normal();
        while self.active.len() < rows as usize {
            self.active.push_back(ALine::blank(self.cols, style));
        }
    }

    /// Moves the first `seqnum` segments of a paragraph into `pending`.
    fn restore_prefix(&mut self, tag: Tag, seqnum: usize) {
        if seqnum == 0 {
            return;
        }
        let prefix_len = seqnum * self.cols as usize;
        let deduper = self.deduper.borrow();
        self.pending.extend_from_slice(&deduper.lookup(tag)[..prefix_len]);
    }

    fn materialize_segment(&self, tag: Tag, seqnum: usize) -> (ALine, usize) {
        let deduper = self.deduper.borrow();
        let para = deduper.lookup(tag);
        let segs = segment_count(para.len(), self.cols);
        let begin = seqnum * self.cols as usize;
        let end = (begin + self.cols as usize).min(para.len());
        let mut cells = para[begin..end].to_vec();
        let wrap = cells.len() as u16;
        cells.resize(self.cols as usize, Cell::blank(Style::normal()));
        (
            ALine {
                cells,
                cont: seqnum + 1 < segs,
                wrap,
            },
            segs,
        )
    }

    // ------------------------------------------------------------------
    // Line access
    // ------------------------------------------------------------------

    /// Copies the line at a buffer row (negative = history) into `out`.
    /// Returns its continuation flag and wrap anchor.
    pub fn fetch_line(&self, row: i64, out: &mut Vec<Cell>) -> (bool, u16) {
        out.clear();
        if row >= 0 {
            let line = &self.active[row as usize];
            out.extend_from_slice(&line.cells);
            (line.cont, line.wrap)
        } else {
            let idx = (self.history.len() as i64 + row) as usize;
            let hline = self.history[idx];
            let ord = (hline.index - self.lost_tags) as usize;
            let deduper = self.deduper.borrow();
            let para = deduper.lookup(self.tags[ord]);
            let segs = segment_count(para.len(), self.cols);
            let begin = hline.seqnum as usize * self.cols as usize;
            let end = (begin + self.cols as usize).min(para.len());
            out.extend_from_slice(&para[begin..end]);
            let wrap = out.len() as u16;
            out.resize(self.cols as usize, Cell::blank(Style::normal()));
            (hline.seqnum as usize + 1 < segs, wrap)
        }
    }

    /// Continuation flag of a buffer row without copying cells.
    fn row_cont(&self, row: i64) -> bool {
        if row >= 0 {
            self.active[row as usize].cont
        } else {
            let idx = (self.history.len() as i64 + row) as usize;
            let hline = self.history[idx];
            let ord = (hline.index - self.lost_tags) as usize;
            let deduper = self.deduper.borrow();
            let len = deduper.lookup(self.tags[ord]).len();
            (hline.seqnum as usize + 1) < segment_count(len, self.cols)
        }
    }

    fn first_row(&self) -> i64 {
        -(self.history.len() as i64)
    }

    fn last_row(&self) -> i64 {
        self.active.len() as i64 - 1
    }

    // ------------------------------------------------------------------
    // Damage
    // ------------------------------------------------------------------

    fn damage_span(&mut self, active_row: u16, begin: u16, end: u16) {
        let vrow = active_row as usize + self.scroll_offset;
        if vrow < self.damage.len() {
            self.damage[vrow].add(begin, end);
        }
    }

    fn damage_rows(&mut self, begin: u16, end: u16) {
        for row in begin..end {
            self.damage_span(row, 0, self.cols);
        }
    }

    /// Damages the cell under the cursor (needed when the cursor moves or
    /// its visibility toggles).
    pub fn damage_cursor(&mut self) {
        let pos = self.cursor.pos;
        self.damage_span(pos.row, pos.col, pos.col + 1);
    }

    /// Damages the whole viewport, optionally the scrollbar too.
    pub fn damage_viewport(&mut self, scrollbar: bool) {
        for damage in &mut self.damage {
            damage.add(0, self.cols);
        }
        if scrollbar {
            self.bar_damage = true;
        }
    }

    /// Damages the viewport rows showing the active region.
    pub fn damage_active(&mut self) {
        self.damage_rows(0, self.rows());
    }

    /// The damaged rectangle accumulated since the last reset.
    pub fn accumulate_damage(&self) -> Region {
        let mut region = Region::default();
        let mut any = false;
        for (row, damage) in self.damage.iter().enumerate() {
            if damage.is_empty() {
                continue;
            }
            if !any {
                region.begin = Pos::new(row as u16, damage.begin);
                region.end = Pos::new(row as u16 + 1, damage.end);
                any = true;
            } else {
                region.begin.col = region.begin.col.min(damage.begin);
                region.end.col = region.end.col.max(damage.end);
                region.end.row = row as u16 + 1;
            }
        }
        region
    }

    /// Called after the renderer consumed a frame.
    pub fn reset_damage(&mut self) {
        for damage in &mut self.damage {
            damage.reset();
        }
        self.bar_damage = false;
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn viewport_to_apos(&self, pos: Pos) -> APos {
        APos::new(pos.row as i64 - self.scroll_offset as i64, pos.col)
    }

    /// Begins a selection at a viewport position.
    pub fn mark_selection(&mut self, pos: Pos) {
        self.damage_selection();
        let apos = self.viewport_to_apos(pos);
        self.selection = Some(Selection {
            mark: apos,
            delim: apos,
        });
    }

    /// Extends the selection to a viewport position. `initial` restarts
    /// the delimiter from the mark.
    pub fn delimit_selection(&mut self, pos: Pos, initial: bool) {
        let apos = self.viewport_to_apos(pos);
        self.damage_selection();
        if let Some(selection) = &mut self.selection {
            if initial {
                selection.delim = selection.mark;
            }
            selection.delim = apos;
        } else {
            self.selection = Some(Selection {
                mark: apos,
                delim: apos,
            });
        }
        self.damage_selection();
    }

    /// Snaps the selection around a position: level 1 selects the cell,
    /// 2 the word (per the cut-chars set), 3 the whole logical line.
    pub fn expand_selection(&mut self, pos: Pos, level: u8) {
        self.damage_selection();
        let apos = self.viewport_to_apos(pos);
        if apos.row < self.first_row() || apos.row > self.last_row() {
            return;
        }
        let (begin, end) = match level {
            2 => self.word_extent(apos),
            3 => self.line_extent(apos),
            _ => (apos, apos),
        };
        self.selection = Some(Selection {
            mark: begin,
            delim: end,
        });
        self.damage_selection();
    }

    /// Moves the nearer selection endpoint to a position (right-click
    /// adjust).
    pub fn adjust_selection(&mut self, pos: Pos) {
        let apos = self.viewport_to_apos(pos);
        self.damage_selection();
        if let Some(selection) = &mut self.selection {
            let (begin, end) = if selection.mark <= selection.delim {
                (selection.mark, selection.delim)
            } else {
                (selection.delim, selection.mark)
            };
            if apos <= begin {
                selection.mark = apos;
                selection.delim = end;
            } else {
                selection.mark = begin;
                selection.delim = apos;
            }
        }
        self.damage_selection();
    }

    pub fn clear_selection(&mut self) {
        self.damage_selection();
        self.selection = None;
    }

    fn damage_selection(&mut self) {
        let Some((begin, end)) = self.normalized_selection() else {
            return;
        };
        let first = (begin.row + self.scroll_offset as i64).max(0);
        let last = (end.row + self.scroll_offset as i64).min(self.damage.len() as i64 - 1);
        for vrow in first..=last {
            if vrow >= 0 && (vrow as usize) < self.damage.len() {
                self.damage[vrow as usize].add(0, self.cols);
            }
        }
    }

    fn normalized_selection(&self) -> Option<(APos, APos)> {
        let selection = self.selection.as_ref()?;
        if selection.mark == selection.delim {
            return None;
        }
        let (begin, end) = if selection.mark <= selection.delim {
            (selection.mark, selection.delim)
        } else {
            (selection.delim, selection.mark)
        };
        // Clamp away rows that have fallen off the history limit.
        let first = self.first_row();
        if end.row < first {
            return None;
        }
        let begin = if begin.row < first {
            APos::new(first, 0)
        } else {
            begin
        };
        Some((begin, end))
    }

    /// The selected region in viewport coordinates, with flags telling
    /// whether it continues off-screen.
    pub fn selected_area(&self) -> Option<(Pos, Pos, bool, bool)> {
        let (begin, end) = self.normalized_selection()?;
        let rows = self.damage.len() as i64;
        let begin_v = begin.row + self.scroll_offset as i64;
        let end_v = end.row + self.scroll_offset as i64;
        if end_v < 0 || begin_v >= rows {
            return None;
        }
        let topless = begin_v < 0;
        let bottomless = end_v >= rows;
        let begin_pos = if topless {
            Pos::new(0, 0)
        } else {
            Pos::new(begin_v as u16, begin.col)
        };
        let end_pos = if bottomless {
            Pos::new(rows as u16 - 1, self.cols - 1)
        } else {
            Pos::new(end_v as u16, end.col)
        };
        Some((begin_pos, end_pos, topless, bottomless))
    }

    /// Extracts the selected text. Newlines separate rows that do not
    /// continue; trailing blanks of non-continued rows are skipped.
    pub fn selected_text(&self) -> Option<String> {
        let (begin, end) = self.normalized_selection()?;
        let mut text = String::new();
        let mut cells = Vec::new();
        for row in begin.row..=end.row {
            if row > self.last_row() {
                break;
            }
            let (cont, wrap) = self.fetch_line(row, &mut cells);
            let first = if row == begin.row { begin.col } else { 0 };
            let last = if row == end.row {
                end.col + 1
            } else {
                self.cols
            };
            let last = if cont { last } else { last.min(wrap) };
            for cell in cells
                .iter()
                .take(last as usize)
                .skip(first as usize)
            {
                match std::str::from_utf8(cell.seq.as_bytes()) {
                    Ok(s) => text.push_str(s),
                    Err(_) => text.push(' '),
                }
            }
            if row != end.row && !cont {
                text.push('\n');
            }
        }
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn is_word_char(&self, cell: &Cell) -> bool {
        match std::str::from_utf8(cell.seq.as_bytes()) {
            Ok(s) => s
                .chars()
                .next()
                .map(|c| c.is_alphanumeric() || self.cut_chars.contains(c))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn word_extent(&self, apos: APos) -> (APos, APos) {
        let mut cells = Vec::new();
        self.fetch_line(apos.row, &mut cells);
        if !self.is_word_char(&cells[apos.col as usize]) {
            return (apos, apos);
        }

        // Walk left, following continuations onto previous rows.
        let mut begin = apos;
        loop {
            if begin.col == 0 {
                let prev = begin.row - 1;
                if prev < self.first_row() || !self.row_cont(prev) {
                    break;
                }
                self.fetch_line(prev, &mut cells);
                if !self.is_word_char(&cells[self.cols as usize - 1]) {
                    break;
                }
                begin = APos::new(prev, self.cols - 1);
            } else {
                self.fetch_line(begin.row, &mut cells);
                if !self.is_word_char(&cells[begin.col as usize - 1]) {
                    break;
                }
                begin.col -= 1;
            }
        }

        // Walk right.
        let mut end = apos;
        loop {
            if end.col + 1 == self.cols {
                if !self.row_cont(end.row) || end.row + 1 > self.last_row() {
                    break;
                }
                self.fetch_line(end.row + 1, &mut cells);
                if !self.is_word_char(&cells[0]) {
                    break;
                }
                end = APos::new(end.row + 1, 0);
            } else {
                self.fetch_line(end.row, &mut cells);
                if !self.is_word_char(&cells[end.col as usize + 1]) {
                    break;
                }
                end.col += 1;
            }
        }

        (begin, end)
    }

    fn line_extent(&self, apos: APos) -> (APos, APos) {
        let begin_row = self.para_start(apos.row);
        let mut end_row = apos.row;
        while self.row_cont(end_row) && end_row < self.last_row() {
            end_row += 1;
        }
        (
            APos::new(begin_row, 0),
            APos::new(end_row, self.cols - 1),
        )
    }

    /// First row of the paragraph containing `row`.
    fn para_start(&self, row: i64) -> i64 {
        let mut row = row;
        while row > self.first_row() && self.row_cont(row - 1) {
            row -= 1;
        }
        row
    }

    /// Shifts content-anchored positions when a row moves into history.
    fn shift_rows(&mut self, delta: i64) {
        if let Some(selection) = &mut self.selection {
            selection.mark.row += delta;
            selection.delim.row += delta;
        }
        if let Some(search) = &mut self.search {
            search.para_row += delta;
            for (begin, end) in &mut search.matches {
                begin.row += delta;
                end.row += delta;
            }
        }
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    pub fn is_searching(&self) -> bool {
        self.search.is_some()
    }

    pub fn search_pattern(&self) -> Option<&str> {
        self.search.as_ref().map(|s| s.pattern.as_str())
    }

    /// Begins a search and focuses the nearest match above the bottom of
    /// the screen. Returns false when the pattern does not compile.
    pub fn begin_search(&mut self, pattern: &str) -> bool {
        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("bad search pattern {:?}: {}", pattern, e);
                return false;
            }
        };
        let start = self.para_start((self.rows() as i64 - 2).max(self.first_row()).min(self.last_row()));
        self.search = Some(Search {
            pattern: regex,
            para_row: start,
            matches: Vec::new(),
            current: 0,
            valid: false,
        });
        self.refresh_search_matches();
        // Focus the last match at or above the starting paragraph, walking
        // upward until one is found.
        if let Some(search) = &self.search {
            if !search.matches.is_empty() {
                let last = search.matches.len() - 1;
                self.focus_search_match(last);
                return true;
            }
        }
        self.prev_search();
        true
    }

    /// Replaces the pattern, keeping the iterator position.
    pub fn set_search_pattern(&mut self, pattern: &str) -> bool {
        if self.search.is_none() {
            return self.begin_search(pattern);
        }
        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("bad search pattern {:?}: {}", pattern, e);
                return false;
            }
        };
        if let Some(search) = &mut self.search {
            search.pattern = regex;
            search.valid = false;
        }
        self.refresh_search_matches();
        if let Some(search) = &self.search {
            if !search.matches.is_empty() {
                let last = search.matches.len() - 1;
                self.focus_search_match(last);
                return true;
            }
        }
        self.prev_search();
        true
    }

    /// Moves to the previous (older, upward) match. Saturates at the top.
    pub fn prev_search(&mut self) {
        let Some(search) = &self.search else { return };
        let (valid, current, para_row) = (search.valid, search.current, search.para_row);
        if valid && current > 0 {
            self.focus_search_match(current - 1);
            return;
        }
        // Walk paragraphs upward.
        let mut row = para_row;
        let first = self.first_row();
        loop {
            if row <= first {
                return; // saturate
            }
            row = self.para_start(row - 1);
            if let Some(search) = &mut self.search {
                search.para_row = row;
            }
            self.refresh_search_matches();
            if let Some(search) = &self.search {
                if !search.matches.is_empty() {
                    let last = search.matches.len() - 1;
                    self.focus_search_match(last);
                    return;
                }
            }
        }
    }

    /// Moves to the next (newer, downward) match. Saturates at the bottom.
    pub fn next_search(&mut self) {
        let Some(search) = &self.search else { return };
        let (valid, current, count, para_row) = (
            search.valid,
            search.current,
            search.matches.len(),
            search.para_row,
        );
        if valid && current + 1 < count {
            self.focus_search_match(current + 1);
            return;
        }
        let mut row = para_row;
        let last = self.last_row();
        loop {
            // Advance past the current paragraph.
            while self.row_cont(row) && row < last {
                row += 1;
            }
            row += 1;
            if row > last {
                return; // saturate
            }
            if let Some(search) = &mut self.search {
                search.para_row = row;
            }
            self.refresh_search_matches();
            if let Some(search) = &self.search {
                if !search.matches.is_empty() {
                    self.focus_search_match(0);
                    return;
                }
            }
        }
    }

    pub fn end_search(&mut self) {
        if self.search.take().is_some() {
            self.clear_selection();
            self.damage_viewport(false);
        }
    }

    /// Recomputes the match spans for the paragraph at `search.para_row`.
    fn refresh_search_matches(&mut self) {
        let Some(search) = &self.search else { return };
        let para_row = search.para_row;

        // Assemble the paragraph text with a byte-offset map back to
        // cell positions.
        let mut text = String::new();
        let mut positions = Vec::new(); // byte offset -> APos, per cell
        let mut cells = Vec::new();
        let mut row = para_row;
        loop {
            let (cont, wrap) = self.fetch_line(row, &mut cells);
            let take = if cont { self.cols } else { wrap };
            for (col, cell) in cells.iter().take(take as usize).enumerate() {
                if let Ok(s) = std::str::from_utf8(cell.seq.as_bytes()) {
                    positions.push((text.len(), APos::new(row, col as u16)));
                    text.push_str(s);
                }
            }
            if !cont || row >= self.last_row() {
                break;
            }
            row += 1;
        }

        let pattern = self.search.as_ref().map(|s| s.pattern.clone());
        let Some(pattern) = pattern else { return };
        let mut matches = Vec::new();
        for found in pattern.find_iter(&text) {
            if found.start() == found.end() {
                continue; // ignore empty matches
            }
            let begin = match positions.binary_search_by_key(&found.start(), |&(o, _)| o) {
                Ok(i) => positions[i].1,
                Err(_) => continue, // match begins mid-cell; skip
            };
            // Last cell whose offset is below the match end.
            let end_idx = match positions.binary_search_by_key(&found.end(), |&(o, _)| o) {
                Ok(i) => i.saturating_sub(1),
                Err(i) => i.saturating_sub(1),
            };
            let end = positions[end_idx].1;
            matches.push((begin, end));
        }

        if let Some(search) = &mut self.search {
            search.matches = matches;
            search.valid = false;
        }
    }

    /// Selects match `index` and scrolls it into view.
    fn focus_search_match(&mut self, index: usize) {
        let Some(search) = &mut self.search else { return };
        search.current = index;
        search.valid = true;
        let (begin, end) = search.matches[index];
        self.selection = Some(Selection {
            mark: begin,
            delim: end,
        });

        // Auto-scroll so the match is visible.
        let rows = self.rows() as i64;
        let vrow = begin.row + self.scroll_offset as i64;
        if vrow < 0 {
            let offset = (-begin.row) as usize;
            self.set_scroll_offset(offset.min(self.history.len()));
        } else if vrow >= rows {
            let offset = self.scroll_offset as i64 - (vrow - rows + 1);
            self.set_scroll_offset(offset.max(0) as usize);
        }
        self.damage_viewport(false);
    }

    // ------------------------------------------------------------------
    // Render dispatch
    // ------------------------------------------------------------------

    /// Walks the damaged viewport rows and emits background fills, style
    /// runs, the cursor and the selection. The caller brackets the frame
    /// and decides about the scrollbar.
    pub fn dispatch<R: Renderer + ?Sized>(
        &mut self,
        reverse: bool,
        show_cursor: bool,
        focused: bool,
        renderer: &mut R,
    ) {
        let rows = self.damage.len();
        let mut cells = Vec::with_capacity(self.cols as usize);
        let mut run = Vec::with_capacity(self.cols as usize * 4);

        for vrow in 0..rows {
            let damage = self.damage[vrow];
            if damage.is_empty() {
                continue;
            }
            let brow = vrow as i64 - self.scroll_offset as i64;
            if brow < self.first_row() {
                continue;
            }
            self.fetch_line(brow, &mut cells);

            // Background runs.
            let mut run_begin = damage.begin;
            let mut run_bg = None;
            for col in damage.begin..damage.end {
                let mut style = cells[col as usize].style;
                if reverse {
                    std::mem::swap(&mut style.fg, &mut style.bg);
                }
                match run_bg {
                    Some(bg) if bg == style.bg => {}
                    Some(bg) => {
                        renderer.draw_bg(Pos::new(vrow as u16, run_begin), col - run_begin, bg);
                        run_begin = col;
                        run_bg = Some(style.bg);
                    }
                    None => run_bg = Some(style.bg),
                }
            }
            if let Some(bg) = run_bg {
                renderer.draw_bg(
                    Pos::new(vrow as u16, run_begin),
                    damage.end - run_begin,
                    bg,
                );
            }

            // Foreground runs: consecutive cells with identical style.
            run.clear();
            let mut run_begin = damage.begin;
            let mut run_style: Option<Style> = None;
            for col in damage.begin..damage.end {
                let cell = &cells[col as usize];
                let mut style = cell.style;
                if reverse {
                    std::mem::swap(&mut style.fg, &mut style.bg);
                }
                match run_style {
                    Some(current) if current == style => {}
                    Some(current) => {
                        renderer.draw_fg(
                            Pos::new(vrow as u16, run_begin),
                            col - run_begin,
                            current.fg,
                            current.attrs,
                            &run,
                        );
                        run.clear();
                        run_begin = col;
                        run_style = Some(style);
                    }
                    None => run_style = Some(style),
                }
                run.extend_from_slice(cell.seq.as_bytes());
            }
            if let Some(style) = run_style {
                renderer.draw_fg(
                    Pos::new(vrow as u16, run_begin),
                    damage.end - run_begin,
                    style.fg,
                    style.attrs,
                    &run,
                );
            }
        }

        if show_cursor && (self.cursor.pos.row as usize) + self.scroll_offset < rows {
            let pos = Pos::new(
                self.cursor.pos.row + self.scroll_offset as u16,
                self.cursor.pos.col,
            );
            let cell = self.active[self.cursor.pos.row as usize].cells[pos.col as usize];
            let mut style = cell.style;
            if reverse {
                std::mem::swap(&mut style.fg, &mut style.bg);
            }
            // The cursor cell is part of the emitted frame even when the
            // row itself was clean.
            self.damage[pos.row as usize].add(pos.col, pos.col + 1);
            renderer.draw_cursor(
                pos,
                style.fg,
                style.bg,
                style.attrs,
                cell.seq.as_bytes(),
                self.cursor.wrap_next,
                focused,
            );
        }

        if let Some((begin, end, topless, bottomless)) = self.selected_area() {
            renderer.draw_selection(begin, end, topless, bottomless);
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Logs a summary of the buffer state.
    pub fn dump(&self) {
        log::debug!(
            "buffer: {}x{}, history {} rows / {} paragraphs (lost {}), offset {}, margins [{}, {})",
            self.rows(),
            self.cols,
            self.history.len(),
            self.tags.len(),
            self.lost_tags,
            self.scroll_offset,
            self.margin_begin,
            self.margin_end,
        );
        self.deduper.borrow().dump();
    }

    /// Test support: the text of an active row up to its wrap anchor.
    #[cfg(test)]
    fn active_text(&self, row: u16) -> String {
        let line = &self.active[row as usize];
        line.cells[..line.wrap as usize]
            .iter()
            .map(|c| std::str::from_utf8(c.seq.as_bytes()).unwrap_or(" ").to_string())
            .collect()
    }

    /// Test support: the text of a buffer row (negative = history).
    #[cfg(test)]
    fn row_text(&self, row: i64) -> String {
        let mut cells = Vec::new();
        let (_, wrap) = self.fetch_line(row, &mut cells);
        cells[..wrap as usize]
            .iter()
            .map(|c| std::str::from_utf8(c.seq.as_bytes()).unwrap_or(" ").to_string())
            .collect()
    }
}
