//! Glyph instances.
//!
//! One 11-float slot per grid cell, laid out row-major:
//!
//! | floats | meaning                                            |
//! |--------|----------------------------------------------------|
//! | 0..2   | bitmap offset from the cell origin, device pixels  |
//! | 2..4   | bitmap size, fraction of the canvas                |
//! | 4      | atlas page                                         |
//! | 5..7   | UV origin, fraction of the page                    |
//! | 7..9   | UV size, fraction of the page                      |
//! | 9..11  | cell position, fraction of the grid                |
//!
//! A zeroed slot (size 0) draws nothing. The cell position is written once
//! per grid size by [`GlyphBatcher::clear`] and never touched by updates.

use std::fmt;

use crate::atlas::{RasterizedGlyph, SharedAtlas};
use crate::attrs::NULL_CELL_CODE;
use crate::backend::{BackendError, GpuBackend, TextureHandle};
use crate::dimensions::RenderDimensions;
use crate::instance::stage_rows;

/// Floats per glyph instance.
pub const INDICES_PER_GLYPH: usize = 11;

/// First float of the cell position pair.
const CELL_POSITION_INDEX: usize = 9;

/// Everything the batcher needs to place one cell's glyph.
#[derive(Debug, Clone, Copy)]
pub struct GlyphCellUpdate<'a> {
    pub x: u32,
    pub y: u32,
    pub code: u32,
    pub bg: u32,
    pub fg: u32,
    pub ext: u32,
    pub chars: &'a str,
    pub width: u32,
    /// Resolved background of the cell to the left.
    pub last_bg: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageTexture {
    handle: TextureHandle,
    width: u32,
    height: u32,
    /// Page version last uploaded; `None` forces an upload.
    version: Option<u64>,
}

pub struct GlyphBatcher {
    cols: u32,
    rows: u32,
    attributes: Vec<f32>,
    staging: Vec<f32>,
    atlas: Option<SharedAtlas>,
    textures: Vec<Option<PageTexture>>,
    rescale_overlapping: bool,
}

impl fmt::Debug for GlyphBatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlyphBatcher")
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("has_atlas", &self.atlas.is_some())
            .field("textures", &self.textures)
            .field("rescale_overlapping", &self.rescale_overlapping)
            .finish_non_exhaustive()
    }
}

impl GlyphBatcher {
    #[must_use]
    pub fn new(cols: u32, rows: u32) -> Self {
        let mut batcher = Self {
            cols,
            rows,
            attributes: Vec::new(),
            staging: Vec::new(),
            atlas: None,
            textures: Vec::new(),
            rescale_overlapping: false,
        };
        batcher.clear();
        batcher
    }

    /// Switch atlases; every page is re-uploaded on the next sync.
    pub fn set_atlas(&mut self, atlas: SharedAtlas) {
        self.atlas = Some(atlas);
        for texture in self.textures.iter_mut().flatten() {
            texture.version = None;
        }
    }

    pub fn set_rescale_overlapping(&mut self, enabled: bool) {
        self.rescale_overlapping = enabled;
    }

    /// Reallocate for a new grid size.
    pub fn resize(&mut self, cols: u32, rows: u32) {
        self.cols = cols;
        self.rows = rows;
        self.clear();
    }

    /// Zero every slot and rewrite the cell positions.
    pub fn clear(&mut self) {
        let len = self.cols as usize * self.rows as usize * INDICES_PER_GLYPH;
        if self.attributes.len() == len {
            self.attributes.fill(0.0);
        } else {
            self.attributes = vec![0.0; len];
        }
        let (cols, rows) = (self.cols as f32, self.rows as f32);
        for (index, slot) in self.attributes.chunks_exact_mut(INDICES_PER_GLYPH).enumerate() {
            let x = index % self.cols as usize;
            let y = index / self.cols as usize;
            slot[CELL_POSITION_INDEX] = x as f32 / cols;
            slot[CELL_POSITION_INDEX + 1] = y as f32 / rows;
        }
    }

    /// Place (or erase) the glyph of one cell.
    pub fn update_cell(&mut self, dims: &RenderDimensions, cell: &GlyphCellUpdate<'_>) {
        debug_assert!(cell.x < self.cols && cell.y < self.rows);
        let i = (cell.y as usize * self.cols as usize + cell.x as usize) * INDICES_PER_GLYPH;
        let slot = &mut self.attributes[i..i + CELL_POSITION_INDEX];

        if cell.code == NULL_CELL_CODE {
            slot.fill(0.0);
            return;
        }
        let Some(atlas) = self.atlas.as_ref() else {
            return;
        };
        let mut atlas = atlas.borrow_mut();

        let glyph = if cell.chars.chars().nth(1).is_some() {
            atlas.rasterized_glyph_combined(cell.chars, cell.bg, cell.fg, cell.ext)
        } else {
            atlas.rasterized_glyph(cell.code, cell.bg, cell.fg, cell.ext)
        };
        let Some(glyph) = glyph else {
            slot.fill(0.0);
            return;
        };
        let page_width = atlas
            .pages()
            .get(glyph.texture_page as usize)
            .map_or(1.0, |page| page.width.max(1) as f32);

        write_glyph(slot, &glyph, dims, cell, page_width);

        let device = &dims.device;
        if self.rescale_overlapping
            && atlas.allows_rescaling(cell.code, cell.width, glyph.size.x, device.cell.width)
        {
            slot[2] = (device.cell.width as f32 - 1.0) / device.canvas.width.max(1) as f32;
        }
    }

    /// The slot of cell `(x, y)`.
    #[must_use]
    pub fn instance(&self, x: u32, y: u32) -> &[f32] {
        let i = (y as usize * self.cols as usize + x as usize) * INDICES_PER_GLYPH;
        &self.attributes[i..i + INDICES_PER_GLYPH]
    }

    /// Compact the populated prefix of every row for upload.
    pub fn stage(&mut self, line_lengths: &[u32]) -> &[f32] {
        stage_rows(
            &self.attributes,
            self.cols as usize,
            INDICES_PER_GLYPH,
            line_lengths,
            &mut self.staging,
        );
        &self.staging
    }

    /// Mirror atlas pages into backend textures: recreate on size change,
    /// upload on version change. Pages past the backend's bind slots are
    /// skipped.
    pub fn sync_atlas_textures(&mut self, backend: &mut dyn GpuBackend) -> Result<(), BackendError> {
        let Some(atlas) = self.atlas.as_ref() else {
            return Ok(());
        };
        let atlas = atlas.borrow();
        let max_pages = backend.capabilities().max_atlas_pages as usize;
        if self.textures.len() < max_pages {
            self.textures.resize(max_pages, None);
        }

        for (index, page) in atlas.pages().iter().enumerate().take(max_pages) {
            let slot = &mut self.textures[index];
            let stale = slot.is_some_and(|t| t.width != page.width || t.height != page.height);
            if stale && let Some(old) = slot.take() {
                backend.destroy_texture(old.handle);
            }
            if slot.is_none() {
                *slot = Some(PageTexture {
                    handle: backend.create_atlas_texture(index as u32, page.width, page.height)?,
                    width: page.width,
                    height: page.height,
                    version: None,
                });
            }
            let Some(texture) = slot.as_mut() else {
                continue;
            };
            if texture.version != Some(page.version) {
                backend.upload_atlas_page(texture.handle, page)?;
                texture.version = Some(page.version);
            }
        }
        Ok(())
    }

    /// Destroy every page texture.
    pub fn release_textures(&mut self, backend: &mut dyn GpuBackend) {
        for texture in self.textures.drain(..).flatten() {
            backend.destroy_texture(texture.handle);
        }
    }

    /// Drop texture handles without touching the device (after device loss).
    pub fn forget_textures(&mut self) {
        self.textures.clear();
    }

    /// Live page textures.
    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.iter().flatten().count()
    }
}

/// Fill floats `0..9` of a slot, clipping a glyph that would bleed into a
/// differently colored cell on its left.
fn write_glyph(
    slot: &mut [f32],
    glyph: &RasterizedGlyph,
    dims: &RenderDimensions,
    cell: &GlyphCellUpdate<'_>,
    page_width: f32,
) {
    let device = &dims.device;
    let canvas_w = device.canvas.width.max(1) as f32;
    let canvas_h = device.canvas.height.max(1) as f32;
    let left_padding = dims.left_cell_padding() as f32;

    let clip = if cell.bg != cell.last_bg && glyph.offset.x > left_padding {
        glyph.offset.x - left_padding
    } else {
        0.0
    };
    slot.copy_from_slice(&[
        -(glyph.offset.x - clip) + device.char.left as f32,
        -glyph.offset.y + device.char.top as f32,
        (glyph.size.x - clip) / canvas_w,
        glyph.size.y / canvas_h,
        glyph.texture_page as f32,
        glyph.texture_position_clip_space.x + clip / page_width,
        glyph.texture_position_clip_space.y,
        glyph.size_clip_space.x - clip / page_width,
        glyph.size_clip_space.y,
    ]);
}
