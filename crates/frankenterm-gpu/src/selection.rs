//! Render-side snapshot of the active selection.
//!
//! The selection service owns hit-testing and buffer coordinates; the
//! renderer only needs a cheap per-cell "is this selected" test in viewport
//! coordinates, recomputed whenever the selection or the scroll offset moves.

/// A selection as reported by the host, in buffer coordinates
/// (`(col, absolute line)`), end exclusive on the column axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionSpan {
    pub start: (u32, u32),
    pub end: (u32, u32),
    /// Rectangular (alt-drag) selection.
    pub column_select_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionRenderModel {
    has_selection: bool,
    column_select_mode: bool,
    viewport_y: i64,
    viewport_start_row: i64,
    viewport_end_row: i64,
    viewport_capped_start_row: i64,
    viewport_capped_end_row: i64,
    start_col: u32,
    end_col: u32,
    span: Option<SelectionSpan>,
}

impl SelectionRenderModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn has_selection(&self) -> bool {
        self.has_selection
    }

    /// Last span passed to [`update`](Self::update), even when it is not
    /// visible in the viewport.
    #[must_use]
    pub fn span(&self) -> Option<SelectionSpan> {
        self.span
    }

    /// Recompute the viewport-relative rows for `span`.
    ///
    /// Empty spans and spans entirely outside the viewport clear the model.
    pub fn update(&mut self, span: Option<SelectionSpan>, viewport_y: u32, rows: u32) {
        let Some(sel) = span else {
            self.clear();
            return;
        };
        if sel.start == sel.end || rows == 0 {
            self.clear();
            self.span = Some(sel);
            return;
        }

        let viewport_y = i64::from(viewport_y);
        let viewport_start_row = i64::from(sel.start.1) - viewport_y;
        let viewport_end_row = i64::from(sel.end.1) - viewport_y;
        let capped_start = viewport_start_row.max(0);
        let capped_end = viewport_end_row.min(i64::from(rows) - 1);

        if capped_start >= i64::from(rows) || capped_end < 0 {
            self.clear();
            self.span = Some(sel);
            return;
        }

        *self = Self {
            has_selection: true,
            column_select_mode: sel.column_select_mode,
            viewport_y,
            viewport_start_row,
            viewport_end_row,
            viewport_capped_start_row: capped_start,
            viewport_capped_end_row: capped_end,
            start_col: sel.start.0,
            end_col: sel.end.0,
            span: Some(sel),
        };
    }

    /// Whether the cell at column `x` of absolute buffer line `line` is
    /// selected.
    #[must_use]
    pub fn is_cell_selected(&self, x: u32, line: u32) -> bool {
        if !self.has_selection {
            return false;
        }
        let y = i64::from(line) - self.viewport_y;

        if self.column_select_mode {
            let in_rows = y >= self.viewport_capped_start_row && y <= self.viewport_capped_end_row;
            return if self.start_col <= self.end_col {
                in_rows && x >= self.start_col && x < self.end_col
            } else {
                in_rows && x < self.start_col && x >= self.end_col
            };
        }

        let single_row = self.viewport_start_row == self.viewport_end_row;
        let multi_row = self.viewport_start_row < self.viewport_end_row;
        (y > self.viewport_start_row && y < self.viewport_end_row)
            || (single_row
                && y == self.viewport_start_row
                && x >= self.start_col
                && x < self.end_col)
            || (multi_row && y == self.viewport_end_row && x < self.end_col)
            || (multi_row && y == self.viewport_start_row && x >= self.start_col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: (u32, u32), end: (u32, u32)) -> Option<SelectionSpan> {
        Some(SelectionSpan {
            start,
            end,
            column_select_mode: false,
        })
    }

    #[test]
    fn single_row_is_half_open() {
        let mut model = SelectionRenderModel::new();
        model.update(span((2, 3), (5, 3)), 0, 10);
        assert!(!model.is_cell_selected(1, 3));
        assert!(model.is_cell_selected(2, 3));
        assert!(model.is_cell_selected(4, 3));
        assert!(!model.is_cell_selected(5, 3));
        assert!(!model.is_cell_selected(3, 2));
    }

    #[test]
    fn multi_row_selects_tail_middle_and_head() {
        let mut model = SelectionRenderModel::new();
        model.update(span((6, 1), (3, 3)), 0, 10);
        assert!(!model.is_cell_selected(5, 1));
        assert!(model.is_cell_selected(6, 1));
        assert!(model.is_cell_selected(79, 1));
        assert!(model.is_cell_selected(0, 2));
        assert!(model.is_cell_selected(79, 2));
        assert!(model.is_cell_selected(2, 3));
        assert!(!model.is_cell_selected(3, 3));
    }

    #[test]
    fn rows_out_of_order_select_nothing() {
        let mut model = SelectionRenderModel::new();
        model.update(span((2, 4), (5, 1)), 0, 10);
        assert!(model.has_selection());
        for line in 0..10 {
            for x in 0..8 {
                assert!(!model.is_cell_selected(x, line), "({x}, {line})");
            }
        }
    }

    #[test]
    fn column_mode_handles_reversed_columns() {
        let mut model = SelectionRenderModel::new();
        model.update(
            Some(SelectionSpan {
                start: (6, 1),
                end: (2, 3),
                column_select_mode: true,
            }),
            0,
            10,
        );
        assert!(model.is_cell_selected(2, 2));
        assert!(model.is_cell_selected(5, 1));
        assert!(!model.is_cell_selected(6, 2));
        assert!(!model.is_cell_selected(1, 2));
        assert!(!model.is_cell_selected(3, 4));
    }

    #[test]
    fn scroll_offset_applies_to_lines() {
        let mut model = SelectionRenderModel::new();
        model.update(span((0, 100), (4, 100)), 95, 10);
        assert!(model.is_cell_selected(0, 100));
        assert!(!model.is_cell_selected(0, 5));
    }

    #[test]
    fn offscreen_or_empty_clears() {
        let mut model = SelectionRenderModel::new();
        model.update(span((0, 50), (4, 50)), 0, 10);
        assert!(!model.has_selection());
        assert!(model.span().is_some());

        model.update(span((3, 3), (3, 3)), 0, 10);
        assert!(!model.has_selection());

        model.update(None, 0, 10);
        assert!(model.span().is_none());
    }
}
