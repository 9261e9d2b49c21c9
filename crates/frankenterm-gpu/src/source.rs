//! Read access to the terminal buffer.
//!
//! The pipeline never owns terminal state; it reads cells through
//! [`TerminalSource`] for the rows it was asked to redraw. [`CellGrid`] is a
//! plain in-memory implementation for hosts that keep their own grid and for
//! tests.

use unicode_width::UnicodeWidthChar;

use crate::attrs::{CODEPOINT_MASK, NULL_CELL_CODE};

/// Cursor position and visibility, in buffer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorState {
    /// Column; may equal `cols` right after printing in the last column.
    pub x: u32,
    /// Absolute buffer line.
    pub y: u32,
    /// DECTCEM hidden.
    pub hidden: bool,
    /// The terminal has positioned the cursor at least once.
    pub initialized: bool,
}

/// One cell as read from the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceCell<'a> {
    /// Full text of the cell; more than one scalar for combined characters.
    pub chars: &'a str,
    /// Codepoint used for single-character atlas lookups.
    pub code: u32,
    /// Column width (0 for the trailing half of a wide character).
    pub width: u32,
    pub fg: u32,
    pub bg: u32,
    pub ext: u32,
}

impl SourceCell<'static> {
    pub const NULL: Self = Self {
        chars: "",
        code: NULL_CELL_CODE,
        width: 1,
        fg: 0,
        bg: 0,
        ext: 0,
    };
}

/// Buffer accessor used by the update pass.
pub trait TerminalSource {
    fn cols(&self) -> u32;

    fn rows(&self) -> u32;

    /// Absolute line shown in the first viewport row.
    fn viewport_y(&self) -> u32;

    fn cursor(&self) -> CursorState;

    /// Cell at absolute `line`, column `col`.
    fn cell(&self, line: u32, col: u32) -> SourceCell<'_>;

    /// Column ranges `[start, end)` on `line` that render as one joined glyph
    /// (ligatures), sorted and non-overlapping.
    fn joined_ranges(&self, _line: u32) -> Vec<(u32, u32)> {
        Vec::new()
    }

    /// Text of columns `[start, end)` on `line`.
    fn text_range(&self, line: u32, start: u32, end: u32) -> String {
        (start..end).map(|col| self.cell(line, col).chars).collect()
    }
}

/// One stored grid cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
    pub chars: String,
    pub width: u32,
    pub fg: u32,
    pub bg: u32,
    pub ext: u32,
}

impl Default for GridCell {
    fn default() -> Self {
        Self {
            chars: String::new(),
            width: 1,
            fg: 0,
            bg: 0,
            ext: 0,
        }
    }
}

impl GridCell {
    /// Codepoint of the last scalar (combining marks follow their base).
    #[must_use]
    pub fn code(&self) -> u32 {
        self.chars
            .chars()
            .next_back()
            .map_or(NULL_CELL_CODE, |c| c as u32 & CODEPOINT_MASK)
    }
}

/// In-memory grid with scrollback.
#[derive(Debug, Clone)]
pub struct CellGrid {
    cols: u32,
    rows: u32,
    lines: Vec<Vec<GridCell>>,
    viewport_y: u32,
    cursor: CursorState,
    joined: Vec<(u32, Vec<(u32, u32)>)>,
}

impl CellGrid {
    /// Blank grid with exactly `rows` lines and no scrollback.
    #[must_use]
    pub fn new(cols: u32, rows: u32) -> Self {
        Self::with_lines(cols, rows, rows)
    }

    /// Blank grid holding `total_lines` (>= `rows`) buffer lines.
    #[must_use]
    pub fn with_lines(cols: u32, rows: u32, total_lines: u32) -> Self {
        debug_assert!(cols > 0 && rows > 0, "grid must be non-empty");
        let total = total_lines.max(rows);
        Self {
            cols,
            rows,
            lines: (0..total).map(|_| blank_line(cols)).collect(),
            viewport_y: 0,
            cursor: CursorState {
                initialized: true,
                ..CursorState::default()
            },
            joined: Vec::new(),
        }
    }

    #[must_use]
    pub fn total_lines(&self) -> u32 {
        self.lines.len() as u32
    }

    /// Resize the visible area; lines are truncated or padded with blanks.
    pub fn resize(&mut self, cols: u32, rows: u32) {
        self.cols = cols;
        self.rows = rows;
        for line in &mut self.lines {
            line.resize(cols as usize, GridCell::default());
        }
        while (self.lines.len() as u32) < rows {
            self.lines.push(blank_line(cols));
        }
        self.viewport_y = self.viewport_y.min(self.total_lines() - rows);
        self.cursor.x = self.cursor.x.min(cols);
    }

    pub fn scroll_to(&mut self, viewport_y: u32) {
        self.viewport_y = viewport_y.min(self.total_lines() - self.rows);
    }

    pub fn set_cursor(&mut self, cursor: CursorState) {
        self.cursor = cursor;
    }

    pub fn set_cell(&mut self, line: u32, col: u32, cell: GridCell) {
        if let Some(slot) = self
            .lines
            .get_mut(line as usize)
            .and_then(|l| l.get_mut(col as usize))
        {
            *slot = cell;
        }
    }

    /// Write `text` starting at `col`, one grapheme base per cell. Zero-width
    /// scalars attach to the previous cell; wide characters occupy two cells
    /// with a width-0 placeholder. Returns the column after the last write.
    pub fn write_str(&mut self, line: u32, col: u32, text: &str, fg: u32, bg: u32) -> u32 {
        let mut x = col;
        let mut last: Option<u32> = None;
        for ch in text.chars() {
            let width = UnicodeWidthChar::width(ch).unwrap_or(0) as u32;
            if width == 0 {
                if let Some(prev) = last
                    && let Some(cell) = self.cell_mut(line, prev)
                {
                    cell.chars.push(ch);
                }
                continue;
            }
            if x + width > self.cols {
                break;
            }
            self.set_cell(
                line,
                x,
                GridCell {
                    chars: ch.to_string(),
                    width,
                    fg,
                    bg,
                    ext: 0,
                },
            );
            for pad in 1..width {
                self.set_cell(
                    line,
                    x + pad,
                    GridCell {
                        width: 0,
                        fg,
                        bg,
                        ..GridCell::default()
                    },
                );
            }
            last = Some(x);
            x += width;
        }
        x
    }

    /// Fill `[start, end)` of `line` with blanks carrying `fg`/`bg`.
    pub fn fill(&mut self, line: u32, start: u32, end: u32, fg: u32, bg: u32) {
        for col in start..end.min(self.cols) {
            self.set_cell(
                line,
                col,
                GridCell {
                    fg,
                    bg,
                    ..GridCell::default()
                },
            );
        }
    }

    /// Replace the joined (ligature) ranges reported for `line`.
    pub fn set_joined_ranges(&mut self, line: u32, ranges: Vec<(u32, u32)>) {
        self.joined.retain(|(l, _)| *l != line);
        if !ranges.is_empty() {
            self.joined.push((line, ranges));
        }
    }

    fn cell_mut(&mut self, line: u32, col: u32) -> Option<&mut GridCell> {
        self.lines
            .get_mut(line as usize)
            .and_then(|l| l.get_mut(col as usize))
    }
}

fn blank_line(cols: u32) -> Vec<GridCell> {
    vec![GridCell::default(); cols as usize]
}

impl TerminalSource for CellGrid {
    fn cols(&self) -> u32 {
        self.cols
    }

    fn rows(&self) -> u32 {
        self.rows
    }

    fn viewport_y(&self) -> u32 {
        self.viewport_y
    }

    fn cursor(&self) -> CursorState {
        self.cursor
    }

    fn cell(&self, line: u32, col: u32) -> SourceCell<'_> {
        let Some(cell) = self
            .lines
            .get(line as usize)
            .and_then(|l| l.get(col as usize))
        else {
            return SourceCell::NULL;
        };
        SourceCell {
            chars: &cell.chars,
            code: cell.code(),
            width: cell.width,
            fg: cell.fg,
            bg: cell.bg,
            ext: cell.ext,
        }
    }

    fn joined_ranges(&self, line: u32) -> Vec<(u32, u32)> {
        self.joined
            .iter()
            .find(|(l, _)| *l == line)
            .map(|(_, ranges)| ranges.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_str_handles_wide_and_combining() {
        let mut grid = CellGrid::new(10, 2);
        let end = grid.write_str(0, 0, "a\u{4E2D}e\u{301}", 1, 2);
        assert_eq!(end, 4);

        let a = grid.cell(0, 0);
        assert_eq!((a.chars, a.code, a.width), ("a", 'a' as u32, 1));

        let wide = grid.cell(0, 1);
        assert_eq!(wide.width, 2);
        let pad = grid.cell(0, 2);
        assert_eq!((pad.code, pad.width), (NULL_CELL_CODE, 0));

        let combined = grid.cell(0, 3);
        assert_eq!(combined.chars, "e\u{301}");
        assert_eq!(combined.code, 0x301);
    }

    #[test]
    fn write_str_stops_at_edge() {
        let mut grid = CellGrid::new(3, 1);
        assert_eq!(grid.write_str(0, 1, "\u{4E2D}\u{4E2D}", 0, 0), 3);
        assert_eq!(grid.cell(0, 1).width, 2);
    }

    #[test]
    fn out_of_range_reads_are_null() {
        let grid = CellGrid::new(2, 2);
        assert_eq!(grid.cell(9, 9), SourceCell::NULL);
    }

    #[test]
    fn text_range_and_joined_ranges() {
        let mut grid = CellGrid::new(8, 1);
        grid.write_str(0, 0, "a=>b", 0, 0);
        grid.set_joined_ranges(0, vec![(1, 3)]);
        assert_eq!(grid.text_range(0, 1, 3), "=>");
        assert_eq!(grid.joined_ranges(0), vec![(1, 3)]);
        grid.set_joined_ranges(0, Vec::new());
        assert!(grid.joined_ranges(0).is_empty());
    }

    #[test]
    fn scroll_is_clamped_to_scrollback() {
        let mut grid = CellGrid::with_lines(4, 3, 10);
        grid.scroll_to(100);
        assert_eq!(grid.viewport_y(), 7);
        grid.resize(4, 5);
        assert_eq!(grid.viewport_y(), 5);
    }
}
