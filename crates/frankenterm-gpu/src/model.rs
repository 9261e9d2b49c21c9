//! Render model: the per-cell diff cache.
//!
//! Each cell occupies four consecutive `u32`s (`code`, `bg`, `fg`, `ext`) in
//! one flat array indexed by `(row * cols + col) * 4`. The update pass writes
//! a cell only when one of those words differs, and only written cells are
//! forwarded to the glyph batcher.

use crate::attrs::NULL_CELL_CODE;
use crate::config::CursorStyle;
use crate::selection::SelectionRenderModel;

/// `u32` words per cell.
pub const INDICES_PER_CELL: usize = 4;
pub const CODE_OFFSET: usize = 0;
pub const BG_OFFSET: usize = 1;
pub const FG_OFFSET: usize = 2;
pub const EXT_OFFSET: usize = 3;

/// Cached words for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedCell {
    /// Codepoint, with `COMBINED_CHAR_BIT` set for multi-scalar cells.
    pub code: u32,
    pub bg: u32,
    pub fg: u32,
    pub ext: u32,
}

/// Cursor to draw this frame, viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorRenderModel {
    pub x: u32,
    pub y: u32,
    /// Cells covered (2 on a wide character).
    pub width: u32,
    pub style: CursorStyle,
    /// Bar width in CSS pixels.
    pub cursor_width: f32,
    pub dpr: f64,
}

#[derive(Debug, Clone)]
pub struct RenderModel {
    cols: u32,
    rows: u32,
    cells: Vec<u32>,
    line_lengths: Vec<u32>,
    pub cursor: Option<CursorRenderModel>,
    pub selection: SelectionRenderModel,
}

impl RenderModel {
    #[must_use]
    pub fn new(cols: u32, rows: u32) -> Self {
        let mut model = Self {
            cols: 0,
            rows: 0,
            cells: Vec::new(),
            line_lengths: Vec::new(),
            cursor: None,
            selection: SelectionRenderModel::new(),
        };
        model.resize(cols, rows);
        model
    }

    /// Reallocate for a new grid size; previous content is discarded.
    pub fn resize(&mut self, cols: u32, rows: u32) {
        debug_assert!(cols > 0 && rows > 0, "render model needs a non-empty grid");
        self.cols = cols;
        self.rows = rows;
        self.cells = vec![0; cols as usize * rows as usize * INDICES_PER_CELL];
        self.line_lengths = vec![0; rows as usize];
        self.cursor = None;
    }

    /// Zero every cell and line length without reallocating.
    pub fn clear(&mut self) {
        self.cells.fill(0);
        self.line_lengths.fill(0);
        self.cursor = None;
    }

    #[must_use]
    pub fn cols(&self) -> u32 {
        self.cols
    }

    #[must_use]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    #[inline]
    fn index(&self, row: u32, col: u32) -> usize {
        debug_assert!(row < self.rows && col < self.cols, "cell ({col}, {row}) out of range");
        (row as usize * self.cols as usize + col as usize) * INDICES_PER_CELL
    }

    /// Store `cell` if it differs from the cached entry. Returns whether the
    /// cache changed.
    #[inline]
    pub fn update(&mut self, row: u32, col: u32, cell: &ResolvedCell) -> bool {
        let i = self.index(row, col);
        let slot = &mut self.cells[i..i + INDICES_PER_CELL];
        if slot[CODE_OFFSET] == cell.code
            && slot[BG_OFFSET] == cell.bg
            && slot[FG_OFFSET] == cell.fg
            && slot[EXT_OFFSET] == cell.ext
        {
            return false;
        }
        slot[CODE_OFFSET] = cell.code;
        slot[BG_OFFSET] = cell.bg;
        slot[FG_OFFSET] = cell.fg;
        slot[EXT_OFFSET] = cell.ext;
        true
    }

    /// Unconditionally overwrite a cell.
    pub fn write(&mut self, row: u32, col: u32, cell: &ResolvedCell) {
        let i = self.index(row, col);
        self.cells[i + CODE_OFFSET] = cell.code;
        self.cells[i + BG_OFFSET] = cell.bg;
        self.cells[i + FG_OFFSET] = cell.fg;
        self.cells[i + EXT_OFFSET] = cell.ext;
    }

    /// Mark a cell covered by a joined glyph to its left.
    pub fn null_cell(&mut self, row: u32, col: u32, bg: u32, fg: u32, ext: u32) {
        self.write(
            row,
            col,
            &ResolvedCell {
                code: NULL_CELL_CODE,
                bg,
                fg,
                ext,
            },
        );
    }

    #[must_use]
    pub fn cell(&self, row: u32, col: u32) -> ResolvedCell {
        let i = self.index(row, col);
        ResolvedCell {
            code: self.cells[i + CODE_OFFSET],
            bg: self.cells[i + BG_OFFSET],
            fg: self.cells[i + FG_OFFSET],
            ext: self.cells[i + EXT_OFFSET],
        }
    }

    /// Flat cell words, row-major.
    #[must_use]
    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    /// Last non-null column + 1, per viewport row.
    #[must_use]
    pub fn line_lengths(&self) -> &[u32] {
        &self.line_lengths
    }

    pub fn set_line_length(&mut self, row: u32, len: u32) {
        debug_assert!(len <= self.cols);
        self.line_lengths[row as usize] = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: ResolvedCell = ResolvedCell {
        code: 'a' as u32,
        bg: 0x0100_0001,
        fg: 0,
        ext: 0,
    };

    #[test]
    fn update_is_idempotent() {
        let mut model = RenderModel::new(4, 2);
        assert!(model.update(1, 2, &RED));
        let before = model.cells().to_vec();
        assert!(!model.update(1, 2, &RED));
        assert_eq!(model.cells(), &before[..]);
        assert_eq!(model.cell(1, 2), RED);
    }

    #[test]
    fn any_field_change_is_detected() {
        let mut model = RenderModel::new(2, 1);
        model.update(0, 0, &RED);
        for changed in [
            ResolvedCell { code: 'b' as u32, ..RED },
            ResolvedCell { bg: 2, ..RED },
            ResolvedCell { fg: 3, ..RED },
            ResolvedCell { ext: 4, ..RED },
        ] {
            assert!(model.update(0, 0, &changed));
            model.write(0, 0, &RED);
        }
    }

    #[test]
    fn null_cell_keeps_colors() {
        let mut model = RenderModel::new(3, 1);
        model.update(0, 1, &RED);
        model.null_cell(0, 1, RED.bg, 5, 0);
        assert_eq!(
            model.cell(0, 1),
            ResolvedCell {
                code: 0,
                bg: RED.bg,
                fg: 5,
                ext: 0
            }
        );
    }

    #[test]
    fn resize_invalidates_cache() {
        let mut model = RenderModel::new(3, 3);
        for row in 0..3 {
            for col in 0..3 {
                model.update(row, col, &RED);
            }
        }
        model.resize(5, 2);
        assert_eq!(model.cells().len(), 5 * 2 * INDICES_PER_CELL);
        assert_eq!(model.line_lengths().len(), 2);
        for row in 0..2 {
            for col in 0..5 {
                assert!(model.update(row, col, &RED));
            }
        }
    }

    #[test]
    fn clear_zeroes_without_reallocating() {
        let mut model = RenderModel::new(2, 2);
        model.update(0, 1, &RED);
        model.set_line_length(0, 2);
        model.cursor = Some(CursorRenderModel {
            x: 0,
            y: 0,
            width: 1,
            style: CursorStyle::Bar,
            cursor_width: 1.0,
            dpr: 1.0,
        });
        let capacity = model.cells().len();
        model.clear();
        assert_eq!(model.cells().len(), capacity);
        assert!(model.cells().iter().all(|&w| w == 0));
        assert_eq!(model.line_lengths(), &[0, 0]);
        assert!(model.cursor.is_none());
    }
}
