//! Pixel geometry.
//!
//! All GPU-side geometry is expressed in integer device pixels so glyphs and
//! background spans land on the same pixel grid at any device pixel ratio.
//! CSS sizes are derived from the device sizes, never the other way around.

/// Measured character box in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FontMetrics {
    pub char_width: f64,
    pub char_height: f64,
}

impl FontMetrics {
    #[must_use]
    pub const fn new(char_width: f64, char_height: f64) -> Self {
        Self {
            char_width,
            char_height,
        }
    }

    /// Metrics are only usable once the host has measured a glyph.
    #[must_use]
    pub fn is_measured(&self) -> bool {
        self.char_width > 0.0 && self.char_height > 0.0
    }
}

/// Inputs to [`RenderDimensions::compute`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionInput {
    pub metrics: FontMetrics,
    pub dpr: f64,
    pub line_height: f64,
    pub letter_spacing: f64,
    pub cols: u32,
    pub rows: u32,
}

/// Character box inside a cell, device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceChar {
    pub width: u32,
    pub height: u32,
    /// Horizontal offset of the glyph inside its cell.
    pub left: i32,
    /// Vertical offset of the glyph inside its cell.
    pub top: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceDimensions {
    pub char: DeviceChar,
    pub cell: DeviceSize,
    pub canvas: DeviceSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CssSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CssDimensions {
    /// Rounded canvas size for the element style.
    pub canvas: CssSize,
    /// Unrounded cell size (device cell / dpr).
    pub cell: CssSize,
}

/// Complete geometry for one grid size, font and pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderDimensions {
    pub device: DeviceDimensions,
    pub css: CssDimensions,
    pub dpr: f64,
}

impl RenderDimensions {
    /// Derive device and CSS geometry. Returns `None` until the font has been
    /// measured or when the pixel ratio is not positive.
    #[must_use]
    pub fn compute(input: &DimensionInput) -> Option<Self> {
        let dpr = input.dpr;
        if !input.metrics.is_measured() || !(dpr.is_finite() && dpr > 0.0) {
            return None;
        }

        let char_width = (input.metrics.char_width * dpr).floor().max(1.0);
        let char_height = (input.metrics.char_height * dpr).ceil().max(1.0);
        let cell_height = (char_height * input.line_height).floor().max(1.0);
        let char_top = if input.line_height == 1.0 {
            0.0
        } else {
            ((cell_height - char_height) / 2.0).round()
        };
        let cell_width = (char_width + input.letter_spacing.round()).max(1.0);
        let char_left = (input.letter_spacing / 2.0).floor();

        let cell = DeviceSize {
            width: cell_width as u32,
            height: cell_height as u32,
        };
        let canvas = DeviceSize {
            width: cell.width.saturating_mul(input.cols),
            height: cell.height.saturating_mul(input.rows),
        };

        Some(Self {
            device: DeviceDimensions {
                char: DeviceChar {
                    width: char_width as u32,
                    height: char_height as u32,
                    left: char_left as i32,
                    top: char_top as i32,
                },
                cell,
                canvas,
            },
            css: CssDimensions {
                canvas: CssSize {
                    width: (f64::from(canvas.width) / dpr).round(),
                    height: (f64::from(canvas.height) / dpr).round(),
                },
                cell: CssSize {
                    width: f64::from(cell.width) / dpr,
                    height: f64::from(cell.height) / dpr,
                },
            },
            dpr,
        })
    }

    /// Horizontal gap between the cell edge and a centered character box.
    #[must_use]
    pub fn left_cell_padding(&self) -> i32 {
        let gap = i64::from(self.device.cell.width) - i64::from(self.device.char.width);
        gap.div_euclid(2) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(char_width: f64, char_height: f64, dpr: f64) -> DimensionInput {
        DimensionInput {
            metrics: FontMetrics::new(char_width, char_height),
            dpr,
            line_height: 1.0,
            letter_spacing: 0.0,
            cols: 80,
            rows: 24,
        }
    }

    #[test]
    fn fractional_dpr_floors_width_and_ceils_height() {
        let dims = RenderDimensions::compute(&input(9.4, 17.2, 1.25)).unwrap();
        assert_eq!(dims.device.char.width, 11);
        assert_eq!(dims.device.cell.width, 11);
        assert_eq!(dims.device.char.height, 22);
        assert_eq!(dims.device.cell.height, 22);
        assert_eq!(dims.device.canvas.width, 880);
        assert_eq!(dims.css.canvas.width, (880.0f64 / 1.25).round());
        assert_eq!(dims.css.cell.width, 11.0 / 1.25);
        assert_eq!(dims.device.char.top, 0);
        assert_eq!(dims.device.char.left, 0);
    }

    #[test]
    fn line_height_centers_char_vertically() {
        let dims = RenderDimensions::compute(&DimensionInput {
            line_height: 1.5,
            ..input(8.0, 16.0, 1.0)
        })
        .unwrap();
        assert_eq!(dims.device.cell.height, 24);
        assert_eq!(dims.device.char.top, 4);
    }

    #[test]
    fn letter_spacing_widens_cell_and_offsets_char() {
        let dims = RenderDimensions::compute(&DimensionInput {
            letter_spacing: 4.0,
            ..input(8.0, 16.0, 1.0)
        })
        .unwrap();
        assert_eq!(dims.device.cell.width, 12);
        assert_eq!(dims.device.char.left, 2);
        assert_eq!(dims.left_cell_padding(), 2);
    }

    #[test]
    fn negative_letter_spacing_floors_left() {
        let dims = RenderDimensions::compute(&DimensionInput {
            letter_spacing: -1.0,
            ..input(8.0, 16.0, 1.0)
        })
        .unwrap();
        assert_eq!(dims.device.cell.width, 7);
        assert_eq!(dims.device.char.left, -1);
        assert_eq!(dims.left_cell_padding(), -1);
    }

    #[test]
    fn unmeasured_font_has_no_geometry() {
        assert!(RenderDimensions::compute(&input(0.0, 16.0, 1.0)).is_none());
        assert!(RenderDimensions::compute(&input(8.0, 16.0, 0.0)).is_none());
    }
}
