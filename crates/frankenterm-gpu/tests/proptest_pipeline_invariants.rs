//! Property-based invariant tests for the render pipeline.
//!
//! Verifies:
//! 1. Diff idempotence: a second pass over an unchanged grid updates no cells
//! 2. Line lengths never exceed the column count and mark the last non-null cell
//! 3. Staged glyph instances equal the sum of line lengths
//! 4. Device geometry: canvas is an exact multiple of the cell, never empty
//! 5. CSS cell size is the device cell divided by the pixel ratio
//! 6. Background spans tile exactly the non-default cells of each row
//! 7. Background rectangles never exceed one per cell plus the viewport

use std::cell::RefCell;
use std::rc::Rc;

use frankenterm_gpu::atlas::AtlasConfig;
use frankenterm_gpu::attrs::bg_word;
use frankenterm_gpu::dimensions::DimensionInput;
use frankenterm_gpu::{
    AtlasCache, BackendKind, BgFlags, CellGrid, Color, CursorState, FixedGlyphAtlas, FontMetrics,
    FrameOutcome, FrameStats, GpuRenderer, HeadlessBackend, ManualTimers, RenderDimensions,
    RendererConfig, SharedAtlas, TerminalSource,
};
use proptest::prelude::*;

// ── Strategy helpers ──────────────────────────────────────────────────

const CELL_W: u32 = 8;
const CELL_H: u32 = 16;

fn grid_size() -> impl Strategy<Value = (u32, u32)> {
    (1u32..=16, 1u32..=8)
}

/// One row of cells: `None` is an empty cell, `Some((ch, bg))` a printable
/// ASCII character with a background palette index (0 = default).
fn arb_row(cols: u32) -> impl Strategy<Value = Vec<Option<(char, u8)>>> {
    proptest::collection::vec(
        proptest::option::of((proptest::char::range('!', '~'), 0u8..4)),
        cols as usize,
    )
}

fn arb_grid() -> impl Strategy<Value = (u32, u32, Vec<Vec<Option<(char, u8)>>>)> {
    grid_size().prop_flat_map(|(cols, rows)| {
        (
            Just(cols),
            Just(rows),
            proptest::collection::vec(arb_row(cols), rows as usize),
        )
    })
}

fn bg_for(index: u8) -> u32 {
    if index == 0 {
        0
    } else {
        bg_word(Color::Named(index), BgFlags::empty())
    }
}

fn build_grid(cols: u32, rows: u32, content: &[Vec<Option<(char, u8)>>]) -> CellGrid {
    let mut grid = CellGrid::new(cols, rows);
    grid.set_cursor(CursorState {
        hidden: true,
        initialized: true,
        ..CursorState::default()
    });
    for (y, row) in content.iter().enumerate() {
        for (x, cell) in row.iter().enumerate() {
            match cell {
                Some((ch, bg)) => {
                    grid.write_str(y as u32, x as u32, &ch.to_string(), 0, bg_for(*bg));
                }
                None => grid.fill(y as u32, x as u32, x as u32 + 1, 0, 0),
            }
        }
    }
    grid
}

fn renderer(cols: u32, rows: u32) -> (GpuRenderer, HeadlessBackend) {
    let factory = |config: &AtlasConfig| -> SharedAtlas {
        Rc::new(RefCell::new(FixedGlyphAtlas::new(config)))
    };
    let config = RendererConfig {
        cols,
        rows,
        metrics: FontMetrics::new(f64::from(CELL_W), f64::from(CELL_H)),
        ..RendererConfig::default()
    };
    let mut renderer = GpuRenderer::new(
        config,
        AtlasCache::new(),
        Box::new(factory),
        Box::new(ManualTimers::new()),
    )
    .expect("valid config");
    let backend = HeadlessBackend::new(BackendKind::WebGpu);
    renderer
        .attach_backend(Box::new(backend.clone()))
        .expect("attach");
    (renderer, backend)
}

fn render_all(renderer: &mut GpuRenderer, grid: &CellGrid) -> FrameStats {
    match renderer
        .render_rows(grid, 0, grid.rows() - 1)
        .expect("frame")
    {
        FrameOutcome::Rendered(stats) => stats,
        FrameOutcome::Deferred => panic!("frame deferred"),
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1-3. Diff cache and glyph staging
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    /// Rendering the same content twice changes nothing the second time.
    #[test]
    fn second_pass_is_a_no_op((cols, rows, content) in arb_grid()) {
        let grid = build_grid(cols, rows, &content);
        let (mut renderer, _) = renderer(cols, rows);
        render_all(&mut renderer, &grid);
        let before = renderer.model().cells().to_vec();

        let stats = render_all(&mut renderer, &grid);
        prop_assert_eq!(stats.updated_cells, 0);
        prop_assert_eq!(renderer.model().cells(), &before[..]);
    }

    /// Line lengths are bounded by the grid and point just past the last
    /// printed cell.
    #[test]
    fn line_lengths_track_last_printed_cell((cols, rows, content) in arb_grid()) {
        let grid = build_grid(cols, rows, &content);
        let (mut renderer, _) = renderer(cols, rows);
        render_all(&mut renderer, &grid);

        let lengths = renderer.model().line_lengths();
        prop_assert_eq!(lengths.len(), rows as usize);
        for (y, row) in content.iter().enumerate() {
            let expected = row
                .iter()
                .rposition(Option::is_some)
                .map_or(0, |x| x as u32 + 1);
            prop_assert!(lengths[y] <= cols);
            prop_assert_eq!(lengths[y], expected, "row {}", y);
        }
    }

    /// One glyph instance is staged per cell of each line prefix.
    #[test]
    fn staged_glyphs_match_line_lengths((cols, rows, content) in arb_grid()) {
        let grid = build_grid(cols, rows, &content);
        let (mut renderer, _) = renderer(cols, rows);
        let stats = render_all(&mut renderer, &grid);
        let total: u32 = renderer.model().line_lengths().iter().sum();
        prop_assert_eq!(stats.glyph_instances, total);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4-5. Geometry
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    /// The canvas is always a whole number of non-empty cells.
    #[test]
    fn canvas_is_whole_cells(
        char_width in 1.0f64..30.0,
        char_height in 1.0f64..40.0,
        dpr in 0.5f64..4.0,
        line_height in 1.0f64..2.5,
        letter_spacing in -4.0f64..8.0,
        (cols, rows) in grid_size(),
    ) {
        let dims = RenderDimensions::compute(&DimensionInput {
            metrics: FontMetrics::new(char_width, char_height),
            dpr,
            line_height,
            letter_spacing,
            cols,
            rows,
        })
        .expect("measured metrics");
        let device = dims.device;
        prop_assert!(device.cell.width >= 1 && device.cell.height >= 1);
        prop_assert_eq!(device.canvas.width, device.cell.width * cols);
        prop_assert_eq!(device.canvas.height, device.cell.height * rows);
        prop_assert!(device.char.height <= device.cell.height);
    }

    /// CSS cell size round-trips to device pixels exactly.
    #[test]
    fn css_cell_is_device_cell_over_dpr(
        char_width in 1.0f64..30.0,
        char_height in 1.0f64..40.0,
        dpr in 0.5f64..4.0,
    ) {
        let dims = RenderDimensions::compute(&DimensionInput {
            metrics: FontMetrics::new(char_width, char_height),
            dpr,
            line_height: 1.0,
            letter_spacing: 0.0,
            cols: 10,
            rows: 5,
        })
        .expect("measured metrics");
        let back = dims.css.cell.width * dpr;
        prop_assert!((back - f64::from(dims.device.cell.width)).abs() < 1e-9);
        let back = dims.css.cell.height * dpr;
        prop_assert!((back - f64::from(dims.device.cell.height)).abs() < 1e-9);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6-7. Background spans
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    /// Every non-default cell is covered by exactly one span of its color and
    /// default cells by none.
    #[test]
    fn spans_tile_non_default_cells((cols, rows, content) in arb_grid()) {
        let grid = build_grid(cols, rows, &content);
        let (mut renderer, backend) = renderer(cols, rows);
        let stats = render_all(&mut renderer, &grid);
        prop_assert!(stats.background_rects as usize <= (cols * rows) as usize + 1);

        let frame = backend.last_frame().expect("frame");
        let backgrounds = &frame.draws[0];
        let canvas_w = f64::from(cols * CELL_W);
        let canvas_h = f64::from(rows * CELL_H);

        let mut covered = vec![vec![0u32; cols as usize]; rows as usize];
        for i in 1..backgrounds.instance_count as usize {
            let rect = backgrounds.instance(i);
            let x0 = (f64::from(rect[0]) * canvas_w / f64::from(CELL_W)).round() as usize;
            let y = (f64::from(rect[1]) * canvas_h / f64::from(CELL_H)).round() as usize;
            let w = (f64::from(rect[2]) * canvas_w / f64::from(CELL_W)).round() as usize;
            prop_assert!(w >= 1);
            for x in x0..x0 + w {
                covered[y][x] += 1;
            }
        }

        for (y, row) in content.iter().enumerate() {
            for (x, cell) in row.iter().enumerate() {
                let painted = matches!(cell, Some((_, bg)) if *bg != 0);
                prop_assert_eq!(covered[y][x], u32::from(painted), "cell ({}, {})", x, y);
            }
        }
    }

    /// Adjacent spans on one row never share a color.
    #[test]
    fn adjacent_spans_differ((cols, rows, content) in arb_grid()) {
        let grid = build_grid(cols, rows, &content);
        let (mut renderer, backend) = renderer(cols, rows);
        render_all(&mut renderer, &grid);

        let frame = backend.last_frame().expect("frame");
        let backgrounds = &frame.draws[0];
        for i in 2..backgrounds.instance_count as usize {
            let prev = backgrounds.instance(i - 1);
            let next = backgrounds.instance(i);
            let touching = prev[1] == next[1] && (prev[0] + prev[2] - next[0]).abs() < 1e-5;
            if touching {
                prop_assert_ne!(&prev[4..], &next[4..]);
            }
        }
    }
}
