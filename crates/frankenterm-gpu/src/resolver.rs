//! Effective cell colors.
//!
//! Resolution happens once per visited cell, before the diff against the
//! render model, so every override (decorations, selection, block cursor)
//! becomes part of the cached `bg`/`fg` words and any change in them is
//! picked up by the diff like an ordinary attribute change.
//!
//! Overrides are always written as truecolor (`CM_RGB`). Stored words are
//! never mutated; the inverse flag is honored by consumers through
//! [`effective_background`] and [`effective_foreground`].

use crate::attrs::{
    BgFlags, CM_DEFAULT, CM_MASK, CM_P16, CM_P256, CM_RGB, FgFlags, PCOLOR_MASK, RGB_MASK,
};
use crate::selection::SelectionRenderModel;
use crate::source::SourceCell;
use crate::theme::{ColorSet, Rgba};

/// Resolved attribute words for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedColors {
    pub bg: u32,
    pub fg: u32,
    pub ext: u32,
}

/// Which side of the selection a decoration paints on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecorationLayer {
    /// Applied before the selection; selection colors win.
    Bottom,
    /// Applied after the selection.
    Top,
}

/// Color overrides contributed by decorations at one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorOverride {
    pub bg: Option<Rgba>,
    pub fg: Option<Rgba>,
}

impl ColorOverride {
    /// Later overrides replace earlier ones side by side.
    #[must_use]
    pub fn then(self, later: ColorOverride) -> Self {
        Self {
            bg: later.bg.or(self.bg),
            fg: later.fg.or(self.fg),
        }
    }
}

/// Registered decorations (search highlights, markers, ...).
pub trait DecorationSource {
    /// Combined overrides of every decoration on `layer` covering the cell.
    fn overrides_at(&self, col: u32, line: u32, layer: DecorationLayer) -> ColorOverride;
}

/// No decorations registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDecorations;

impl DecorationSource for NoDecorations {
    fn overrides_at(&self, _col: u32, _line: u32, _layer: DecorationLayer) -> ColorOverride {
        ColorOverride::default()
    }
}

/// One decoration covering columns `[start_col, end_col)` of an absolute line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoration {
    pub line: u32,
    pub start_col: u32,
    pub end_col: u32,
    pub layer: DecorationLayer,
    pub colors: ColorOverride,
}

/// Simple list-backed [`DecorationSource`]; later entries win.
#[derive(Debug, Clone, Default)]
pub struct DecorationSet {
    decorations: Vec<Decoration>,
}

impl DecorationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, decoration: Decoration) {
        self.decorations.push(decoration);
    }

    pub fn clear(&mut self) {
        self.decorations.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.decorations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decorations.is_empty()
    }
}

impl DecorationSource for DecorationSet {
    fn overrides_at(&self, col: u32, line: u32, layer: DecorationLayer) -> ColorOverride {
        self.decorations
            .iter()
            .filter(|d| d.layer == layer && d.line == line && col >= d.start_col && col < d.end_col)
            .fold(ColorOverride::default(), |acc, d| acc.then(d.colors))
    }
}

/// Everything the resolver reads besides the cell itself.
pub struct ResolveContext<'a> {
    pub theme: &'a ColorSet,
    pub selection: &'a SelectionRenderModel,
    pub decorations: &'a dyn DecorationSource,
    pub focused: bool,
}

/// Resolve decorations, selection and inverse partners for one cell.
///
/// The block cursor override is applied separately with
/// [`apply_block_cursor`] since it depends on the cursor's cell span.
#[must_use]
pub fn resolve(ctx: &ResolveContext<'_>, cell: &SourceCell<'_>, x: u32, line: u32) -> ResolvedColors {
    let mut result = ResolvedColors {
        bg: cell.bg,
        fg: cell.fg,
        ext: if cell.bg & BgFlags::HAS_EXTENDED.bits() != 0 {
            cell.ext
        } else {
            0
        },
    };

    let mut over = ctx
        .decorations
        .overrides_at(x, line, DecorationLayer::Bottom);

    let selected = ctx.selection.is_cell_selected(x, line);
    if selected {
        let selection_bg = if ctx.focused {
            ctx.theme.selection_background_opaque
        } else {
            ctx.theme.selection_inactive_background_opaque
        };
        over = over.then(ColorOverride {
            bg: Some(selection_bg),
            fg: ctx.theme.selection_foreground,
        });
    }

    over = over.then(ctx.decorations.overrides_at(x, line, DecorationLayer::Top));

    let mut bg = over.bg.map(|c| {
        let keep = if selected {
            !RGB_MASK & !BgFlags::DIM.bits()
        } else {
            !RGB_MASK
        };
        (cell.bg & keep) | c.rgb() | CM_RGB
    });
    let mut fg = over
        .fg
        .map(|c| (cell.fg & !RGB_MASK & !FgFlags::INVERSE.bits()) | c.rgb() | CM_RGB);

    // Under inverse, overriding one side alone would swap the override onto
    // the wrong side; resolve the partner from the cell's other color.
    if result.fg & FgFlags::INVERSE.bits() != 0 {
        let carry_fg = !(RGB_MASK | FgFlags::INVERSE.bits() | CM_MASK);
        let carry_bg = !(RGB_MASK | CM_MASK);
        if bg.is_some() && fg.is_none() {
            fg = Some(if result.bg & CM_MASK == CM_DEFAULT {
                (result.fg & carry_fg) | ctx.theme.background.rgb() | CM_RGB
            } else {
                (result.fg & carry_fg) | (result.bg & (RGB_MASK | CM_MASK))
            });
        } else if bg.is_none() && fg.is_some() {
            bg = Some(if result.fg & CM_MASK == CM_DEFAULT {
                (result.bg & carry_bg) | ctx.theme.foreground.rgb() | CM_RGB
            } else {
                (result.bg & carry_bg) | (result.fg & (RGB_MASK | CM_MASK))
            });
        }
    }

    if let Some(bg) = bg {
        result.bg = bg;
    }
    if let Some(fg) = fg {
        result.fg = fg;
    }
    result
}

/// Swap a cell covered by a block cursor to the cursor colors.
pub fn apply_block_cursor(result: &mut ResolvedColors, theme: &ColorSet) {
    result.fg = CM_RGB | theme.cursor_accent.rgb();
    result.bg = CM_RGB | theme.cursor.rgb();
}

/// Background paint color of a resolved cell, honoring inverse.
#[must_use]
pub fn effective_background(bg: u32, fg: u32, theme: &ColorSet) -> Rgba {
    if fg & FgFlags::INVERSE.bits() != 0 {
        word_color(fg, theme, theme.foreground)
    } else {
        word_color(bg, theme, theme.background)
    }
}

/// Foreground paint color of a resolved cell, honoring inverse.
#[must_use]
pub fn effective_foreground(bg: u32, fg: u32, theme: &ColorSet) -> Rgba {
    if fg & FgFlags::INVERSE.bits() != 0 {
        word_color(bg, theme, theme.background)
    } else {
        word_color(fg, theme, theme.foreground)
    }
}

fn word_color(word: u32, theme: &ColorSet, default: Rgba) -> Rgba {
    match word & CM_MASK {
        CM_P16 | CM_P256 => theme.ansi(word & PCOLOR_MASK),
        CM_RGB => Rgba::from_rgb(word & RGB_MASK),
        _ => default,
    }
}
