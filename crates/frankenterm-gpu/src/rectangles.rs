//! Background and cursor rectangles.
//!
//! Backgrounds are re-derived for the whole grid whenever the update pass
//! changed any cell: merges depend on neighbours, so a single changed cell
//! can split or join spans anywhere on its row. Rectangle 0 is always the
//! full viewport in the theme background.
//!
//! The cursor has its own array of at most four rectangles, rebuilt every
//! frame from the model's cursor descriptor.

use crate::attrs::FgFlags;
use crate::config::CursorStyle;
use crate::dimensions::RenderDimensions;
use crate::instance::Vertices;
use crate::model::{BG_OFFSET, FG_OFFSET, INDICES_PER_CELL, RenderModel};
use crate::resolver::effective_background;
use crate::theme::ColorSet;

/// Floats per rectangle instance.
pub const INDICES_PER_RECTANGLE: usize = 8;

const INITIAL_RECTANGLE_CAPACITY: usize = 20;

/// Rectangles the cursor can need (outline: four edges).
pub const MAX_CURSOR_RECTANGLES: usize = 4;

#[derive(Debug, Clone)]
pub struct RectangleBatcher {
    vertices: Vertices,
    cursor_vertices: Vertices,
    bg_color: [f32; 4],
    cursor_color: [f32; 4],
    cols: u32,
    rows: u32,
    dims: RenderDimensions,
}

impl RectangleBatcher {
    #[must_use]
    pub fn new(theme: &ColorSet, cols: u32, rows: u32, dims: RenderDimensions) -> Self {
        let mut batcher = Self {
            vertices: Vertices::with_capacity(INITIAL_RECTANGLE_CAPACITY * INDICES_PER_RECTANGLE),
            cursor_vertices: Vertices::with_capacity(
                MAX_CURSOR_RECTANGLES * INDICES_PER_RECTANGLE,
            ),
            bg_color: theme.background.to_f32(),
            cursor_color: theme.cursor.to_f32(),
            cols,
            rows,
            dims,
        };
        batcher.update_viewport_rectangle();
        batcher
    }

    pub fn set_dimensions(&mut self, cols: u32, rows: u32, dims: RenderDimensions) {
        self.cols = cols;
        self.rows = rows;
        self.dims = dims;
    }

    /// Rewrite the viewport rectangle after a geometry change.
    pub fn handle_resize(&mut self) {
        self.update_viewport_rectangle();
    }

    pub fn update_theme(&mut self, theme: &ColorSet) {
        self.bg_color = theme.background.to_f32();
        self.cursor_color = theme.cursor.to_f32();
        self.update_viewport_rectangle();
    }

    /// Largest float count the background array can need: one rectangle per
    /// cell plus the viewport.
    fn max_floats(&self) -> usize {
        (self.cols as usize * self.rows as usize + 1) * INDICES_PER_RECTANGLE
    }

    fn update_viewport_rectangle(&mut self) {
        let device = self.dims.device;
        let color = self.bg_color;
        let (w, h) = (
            (self.cols * device.cell.width) as f32,
            (self.rows * device.cell.height) as f32,
        );
        self.write_rect(0, 0.0, 0.0, w, h, color);
        self.vertices.count = self.vertices.count.max(1);
    }

    /// Merge each row of the model into maximal same-key background spans.
    pub fn update_backgrounds(&mut self, model: &RenderModel, theme: &ColorSet) {
        debug_assert_eq!((model.cols(), model.rows()), (self.cols, self.rows));
        let cells = model.cells();
        let cols = self.cols as usize;
        let mut count = 1;

        for y in 0..self.rows {
            let mut start_x = 0;
            let mut current_bg = 0;
            let mut current_fg = 0;
            let mut current_inverse = false;
            for x in 0..self.cols {
                let i = (y as usize * cols + x as usize) * INDICES_PER_CELL;
                let bg = cells[i + BG_OFFSET];
                let fg = cells[i + FG_OFFSET];
                let inverse = fg & FgFlags::INVERSE.bits() != 0;
                if bg != current_bg || (fg != current_fg && (current_inverse || inverse)) {
                    if current_bg != 0 || (current_inverse && current_fg != 0) {
                        self.push_span(count, current_fg, current_bg, start_x, x, y, theme);
                        count += 1;
                    }
                    start_x = x;
                    current_bg = bg;
                    current_fg = fg;
                    current_inverse = inverse;
                }
            }
            if current_bg != 0 || (current_inverse && current_fg != 0) {
                self.push_span(count, current_fg, current_bg, start_x, self.cols, y, theme);
                count += 1;
            }
        }
        self.vertices.count = count;
    }

    #[allow(clippy::too_many_arguments)]
    fn push_span(
        &mut self,
        index: usize,
        fg: u32,
        bg: u32,
        start_x: u32,
        end_x: u32,
        y: u32,
        theme: &ColorSet,
    ) {
        let rgba = effective_background(bg, fg, theme);
        let [r, g, b, _] = rgba.to_f32();
        let cell = self.dims.device.cell;
        self.write_rect(
            index,
            (start_x * cell.width) as f32,
            (y * cell.height) as f32,
            ((end_x - start_x) * cell.width) as f32,
            cell.height as f32,
            [r, g, b, 1.0],
        );
    }

    /// Rebuild the cursor rectangles; block and hidden cursors draw none.
    pub fn update_cursor(&mut self, model: &RenderModel) {
        self.cursor_vertices.count = 0;
        let Some(cursor) = model.cursor else {
            return;
        };
        let cell = self.dims.device.cell;
        let (cw, ch) = (cell.width as f32, cell.height as f32);
        let dpr = cursor.dpr as f32;
        let x = cursor.x as f32 * cw;
        let y = cursor.y as f32 * ch;
        let span = cursor.width as f32 * cw;
        let color = self.cursor_color;

        let mut rects: [(f32, f32, f32, f32); MAX_CURSOR_RECTANGLES] = [(0.0, 0.0, 0.0, 0.0); 4];
        let mut n = 0;
        if matches!(cursor.style, CursorStyle::Bar | CursorStyle::Outline) {
            let width = if cursor.style == CursorStyle::Bar {
                dpr * cursor.cursor_width
            } else {
                dpr
            };
            rects[n] = (x, y, width, ch);
            n += 1;
        }
        if matches!(cursor.style, CursorStyle::Underline | CursorStyle::Outline) {
            rects[n] = (x, y + ch - dpr, span, dpr);
            n += 1;
        }
        if cursor.style == CursorStyle::Outline {
            rects[n] = (x, y, span, dpr);
            rects[n + 1] = (x + span - dpr, y, dpr, ch);
            n += 2;
        }

        let canvas = self.dims.device.canvas;
        let (cw, ch) = (canvas.width.max(1) as f32, canvas.height.max(1) as f32);
        for (i, (rx, ry, rw, rh)) in rects[..n].iter().enumerate() {
            let o = i * INDICES_PER_RECTANGLE;
            self.cursor_vertices.attributes[o..o + INDICES_PER_RECTANGLE].copy_from_slice(&[
                rx / cw,
                ry / ch,
                rw / cw,
                rh / ch,
                color[0],
                color[1],
                color[2],
                color[3],
            ]);
        }
        self.cursor_vertices.count = n;
    }

    fn write_rect(&mut self, index: usize, x: f32, y: f32, w: f32, h: f32, color: [f32; 4]) {
        let offset = index * INDICES_PER_RECTANGLE;
        let max = self.max_floats();
        self.vertices.ensure_len(offset + INDICES_PER_RECTANGLE, max);
        let canvas = self.dims.device.canvas;
        let (cw, ch) = (canvas.width.max(1) as f32, canvas.height.max(1) as f32);
        self.vertices.attributes[offset..offset + INDICES_PER_RECTANGLE].copy_from_slice(&[
            x / cw,
            y / ch,
            w / cw,
            h / ch,
            color[0],
            color[1],
            color[2],
            color[3],
        ]);
    }

    /// Live background instances, viewport first.
    #[must_use]
    pub fn backgrounds(&self) -> &[f32] {
        self.vertices.live(INDICES_PER_RECTANGLE)
    }

    #[must_use]
    pub fn background_count(&self) -> usize {
        self.vertices.count
    }

    /// Allocated background floats (grows, never shrinks).
    #[must_use]
    pub fn background_capacity(&self) -> usize {
        self.vertices.attributes.len()
    }

    #[must_use]
    pub fn cursor(&self) -> &[f32] {
        self.cursor_vertices.live(INDICES_PER_RECTANGLE)
    }

    #[must_use]
    pub fn cursor_count(&self) -> usize {
        self.cursor_vertices.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{Color, bg_word, fg_word};
    use crate::dimensions::{DimensionInput, FontMetrics};
    use crate::model::{CursorRenderModel, ResolvedCell};

    fn dims(cols: u32, rows: u32) -> RenderDimensions {
        RenderDimensions::compute(&DimensionInput {
            metrics: FontMetrics::new(10.0, 20.0),
            dpr: 1.0,
            line_height: 1.0,
            letter_spacing: 0.0,
            cols,
            rows,
        })
        .unwrap()
    }

    fn model_with_row(bgs: &[u32], fgs: &[u32]) -> RenderModel {
        let mut model = RenderModel::new(bgs.len() as u32, 1);
        for (x, (&bg, &fg)) in bgs.iter().zip(fgs).enumerate() {
            model.write(
                0,
                x as u32,
                &ResolvedCell {
                    code: 'x' as u32,
                    bg,
                    fg,
                    ext: 0,
                },
            );
        }
        model
    }

    #[test]
    fn viewport_rectangle_is_always_present() {
        let theme = ColorSet::default();
        let batcher = RectangleBatcher::new(&theme, 4, 2, dims(4, 2));
        assert_eq!(batcher.background_count(), 1);
        assert_eq!(&batcher.backgrounds()[..4], &[0.0, 0.0, 1.0, 1.0]);
        assert_eq!(&batcher.backgrounds()[4..], &theme.background.to_f32());
    }

    #[test]
    fn adjacent_equal_backgrounds_merge() {
        let theme = ColorSet::default();
        let red = bg_word(Color::Named(1), Default::default());
        let model = model_with_row(&[0, 0, red, red, red, 0], &[0; 6]);
        let mut batcher = RectangleBatcher::new(&theme, 6, 1, dims(6, 1));
        batcher.update_backgrounds(&model, &theme);

        assert_eq!(batcher.background_count(), 2);
        let span = &batcher.backgrounds()[8..16];
        assert_eq!(span[0], 2.0 / 6.0);
        assert_eq!(span[2], 3.0 / 6.0);
        assert_eq!(span[3], 1.0);
        assert_eq!(&span[4..], &theme.ansi(1).to_f32());
    }

    #[test]
    fn fg_change_splits_only_under_inverse() {
        let theme = ColorSet::default();
        let red = bg_word(Color::Named(1), Default::default());
        let fgs = [fg_word(Color::Named(2), Default::default()), fg_word(Color::Named(3), Default::default())];
        let plain = model_with_row(&[red, red], &fgs);
        let mut batcher = RectangleBatcher::new(&theme, 2, 1, dims(2, 1));
        batcher.update_backgrounds(&plain, &theme);
        assert_eq!(batcher.background_count(), 2);

        let inv = [
            fg_word(Color::Named(2), FgFlags::INVERSE),
            fg_word(Color::Named(3), FgFlags::INVERSE),
        ];
        let inverse = model_with_row(&[0, 0], &inv);
        batcher.update_backgrounds(&inverse, &theme);
        assert_eq!(batcher.background_count(), 3);
        assert_eq!(&batcher.backgrounds()[12..16], &theme.ansi(2).to_f32());
    }

    #[test]
    fn all_default_row_has_only_viewport() {
        let theme = ColorSet::default();
        let model = model_with_row(&[0; 5], &[0; 5]);
        let mut batcher = RectangleBatcher::new(&theme, 5, 1, dims(5, 1));
        batcher.update_backgrounds(&model, &theme);
        assert_eq!(batcher.background_count(), 1);
    }

    #[test]
    fn growth_is_geometric_and_capped() {
        let theme = ColorSet::default();
        let cols = 64;
        let bgs: Vec<u32> = (0..cols).map(|i| Color::Indexed((i % 2 + 1) as u8).encode()).collect();
        let model = model_with_row(&bgs, &vec![0; cols]);
        let mut batcher = RectangleBatcher::new(&theme, cols as u32, 1, dims(cols as u32, 1));
        assert_eq!(batcher.background_capacity(), 20 * INDICES_PER_RECTANGLE);
        batcher.update_backgrounds(&model, &theme);
        assert_eq!(batcher.background_count(), cols + 1);
        assert_eq!(batcher.background_capacity(), (cols + 1) * INDICES_PER_RECTANGLE);

        let blank = model_with_row(&vec![0; cols], &vec![0; cols]);
        batcher.update_backgrounds(&blank, &theme);
        assert_eq!(batcher.background_capacity(), (cols + 1) * INDICES_PER_RECTANGLE);
    }

    fn cursor_model(style: CursorStyle) -> RenderModel {
        let mut model = RenderModel::new(4, 2);
        model.cursor = Some(CursorRenderModel {
            x: 1,
            y: 1,
            width: 1,
            style,
            cursor_width: 2.0,
            dpr: 1.0,
        });
        model
    }

    #[test]
    fn cursor_style_rectangle_counts() {
        let theme = ColorSet::default();
        let mut batcher = RectangleBatcher::new(&theme, 4, 2, dims(4, 2));
        for (style, expected) in [
            (CursorStyle::Block, 0),
            (CursorStyle::Bar, 1),
            (CursorStyle::Underline, 1),
            (CursorStyle::Outline, 4),
            (CursorStyle::None, 0),
        ] {
            batcher.update_cursor(&cursor_model(style));
            assert_eq!(batcher.cursor_count(), expected, "{style:?}");
        }
        batcher.update_cursor(&RenderModel::new(4, 2));
        assert_eq!(batcher.cursor_count(), 0);
    }

    #[test]
    fn bar_and_underline_geometry() {
        let theme = ColorSet::default();
        let mut batcher = RectangleBatcher::new(&theme, 4, 2, dims(4, 2));
        batcher.update_cursor(&cursor_model(CursorStyle::Bar));
        // Canvas 40x40; cell 10x20 at (1, 1); bar 2px wide.
        assert_eq!(&batcher.cursor()[..4], &[10.0 / 40.0, 20.0 / 40.0, 2.0 / 40.0, 20.0 / 40.0]);

        batcher.update_cursor(&cursor_model(CursorStyle::Underline));
        assert_eq!(&batcher.cursor()[..4], &[10.0 / 40.0, 39.0 / 40.0, 10.0 / 40.0, 1.0 / 40.0]);
        assert_eq!(&batcher.cursor()[4..], &theme.cursor.to_f32());
    }
}
