//! Texture atlas contract and the shared atlas cache.
//!
//! Rasterization belongs to the atlas implementation; the pipeline only asks
//! for glyph placements and mirrors atlas pages into GPU textures when their
//! version changes.
//!
//! Atlases are expensive, so renderers with identical font and color
//! configuration share one through an explicit [`AtlasCache`] handle. Each
//! renderer acquires under its own [`OwnerId`] and releases on dispose; an
//! atlas is dropped from the cache once its last owner is gone.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::theme::ColorSet;

/// Two-component float vector (pixels or clip-space fractions).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Placement of one rasterized glyph.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RasterizedGlyph {
    pub texture_page: u32,
    /// Top-left in page pixels.
    pub texture_position: Vec2,
    /// Top-left as a fraction of the page size.
    pub texture_position_clip_space: Vec2,
    /// Bitmap size in pixels.
    pub size: Vec2,
    /// Bitmap size as a fraction of the page size.
    pub size_clip_space: Vec2,
    /// Distance from the bitmap origin to the cell origin, pixels.
    pub offset: Vec2,
}

/// One RGBA8 atlas page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasPage {
    pub width: u32,
    pub height: u32,
    /// Bumped on every pixel change.
    pub version: u64,
    pub pixels: Vec<u8>,
}

impl AtlasPage {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            version: 0,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }
}

/// Rasterizer-backed glyph cache.
pub trait TextureAtlas {
    fn pages(&self) -> &[AtlasPage];

    /// Pre-rasterize common glyphs.
    fn warm_up(&mut self) {}

    /// Called at the start of every frame. Returns `true` when previously
    /// returned placements were invalidated (atlas reset or page merge) and
    /// every cell must be looked up again.
    fn begin_frame(&mut self) -> bool;

    /// Drop every cached glyph.
    fn clear_texture(&mut self);

    fn rasterized_glyph(&mut self, code: u32, bg: u32, fg: u32, ext: u32)
    -> Option<RasterizedGlyph>;

    fn rasterized_glyph_combined(
        &mut self,
        chars: &str,
        bg: u32,
        fg: u32,
        ext: u32,
    ) -> Option<RasterizedGlyph>;

    /// Whether a glyph wider than its cell may be squeezed to the cell width.
    fn allows_rescaling(&self, code: u32, width: u32, glyph_width: f32, cell_width: u32) -> bool {
        default_allows_rescaling(code, width, glyph_width, cell_width)
    }
}

/// Default rescale policy: single-width, non-ASCII glyphs that overflow the
/// cell by more than half its width, excluding emoji and icon fonts.
#[must_use]
pub fn default_allows_rescaling(code: u32, width: u32, glyph_width: f32, cell_width: u32) -> bool {
    width == 1
        && f64::from(glyph_width) > (f64::from(cell_width) * 1.5).ceil()
        && code > 0xFF
        && !is_emoji(code)
        && !is_powerline_glyph(code)
        && !is_nerd_font_glyph(code)
}

#[must_use]
pub fn is_emoji(code: u32) -> bool {
    matches!(
        code,
        0x1F600..=0x1F64F
            | 0x1F300..=0x1F5FF
            | 0x1F680..=0x1F6FF
            | 0x2600..=0x26FF
            | 0x2700..=0x27BF
            | 0xFE00..=0xFE0F
            | 0x1F900..=0x1F9FF
            | 0x1F1E6..=0x1F1FF
    )
}

#[must_use]
pub fn is_powerline_glyph(code: u32) -> bool {
    (0xE0A4..=0xE0D6).contains(&code)
}

/// Private use area, where patched icon fonts live.
#[must_use]
pub fn is_nerd_font_glyph(code: u32) -> bool {
    (0xE000..=0xF8FF).contains(&code)
}

/// Everything that changes rasterized output. Renderers with equal configs
/// share an atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasConfig {
    pub font_family: String,
    pub font_size: f32,
    pub font_weight: String,
    pub font_weight_bold: String,
    pub dpr: f64,
    pub device_cell_width: u32,
    pub device_cell_height: u32,
    pub device_char_width: u32,
    pub device_char_height: u32,
    pub letter_spacing: f32,
    pub line_height: f32,
    pub draw_bold_text_in_bright_colors: bool,
    pub minimum_contrast_ratio: f32,
    pub custom_glyphs: bool,
    pub max_texture_size: u32,
    pub colors: ColorSet,
}

pub type SharedAtlas = Rc<RefCell<dyn TextureAtlas>>;

/// Builds an atlas for a config the cache has not seen.
pub trait AtlasFactory {
    fn create(&mut self, config: &AtlasConfig) -> SharedAtlas;
}

impl<F> AtlasFactory for F
where
    F: FnMut(&AtlasConfig) -> SharedAtlas,
{
    fn create(&mut self, config: &AtlasConfig) -> SharedAtlas {
        self(config)
    }
}

/// Identity of an atlas user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

struct CacheEntry {
    config: AtlasConfig,
    atlas: SharedAtlas,
    owners: Vec<OwnerId>,
}

#[derive(Default)]
struct CacheState {
    entries: Vec<CacheEntry>,
    next_owner: u64,
}

/// Shared, single-threaded atlas cache. Cloning yields another handle to the
/// same cache.
#[derive(Clone, Default)]
pub struct AtlasCache {
    inner: Rc<RefCell<CacheState>>,
}

impl std::fmt::Debug for AtlasCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("AtlasCache")
            .field("entries", &state.entries.len())
            .finish()
    }
}

impl AtlasCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh owner identity.
    #[must_use]
    pub fn register_owner(&self) -> OwnerId {
        let mut state = self.inner.borrow_mut();
        state.next_owner += 1;
        OwnerId(state.next_owner)
    }

    /// Atlas for `config`, shared with other owners of an equal config.
    ///
    /// An owner holds at most one atlas: acquiring with a different config
    /// releases its previous entry first.
    pub fn acquire(
        &self,
        owner: OwnerId,
        config: &AtlasConfig,
        factory: &mut dyn AtlasFactory,
    ) -> SharedAtlas {
        let mut state = self.inner.borrow_mut();

        if let Some(entry) = state.entries.iter().find(|e| e.owners.contains(&owner))
            && entry.config == *config
        {
            return Rc::clone(&entry.atlas);
        }
        remove_owner(&mut state.entries, owner);

        if let Some(entry) = state.entries.iter_mut().find(|e| e.config == *config) {
            entry.owners.push(owner);
            return Rc::clone(&entry.atlas);
        }

        let atlas = factory.create(config);
        state.entries.push(CacheEntry {
            config: config.clone(),
            atlas: Rc::clone(&atlas),
            owners: vec![owner],
        });
        atlas
    }

    /// Drop `owner`'s claim; no-op when it holds nothing.
    pub fn release(&self, owner: OwnerId) {
        remove_owner(&mut self.inner.borrow_mut().entries, owner);
    }

    /// Number of distinct atlases alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owners sharing the atlas built for `config`.
    #[must_use]
    pub fn owner_count(&self, config: &AtlasConfig) -> usize {
        self.inner
            .borrow()
            .entries
            .iter()
            .find(|e| e.config == *config)
            .map_or(0, |e| e.owners.len())
    }
}

fn remove_owner(entries: &mut Vec<CacheEntry>, owner: OwnerId) {
    for entry in entries.iter_mut() {
        entry.owners.retain(|o| *o != owner);
    }
    entries.retain(|e| !e.owners.is_empty());
}

// ---------------------------------------------------------------------------
// Fixed-grid atlas
// ---------------------------------------------------------------------------

/// Bitmap shape reported for a glyph by [`FixedGlyphAtlas`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphShape {
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SlotKey {
    Code { code: u32, bg: u32, fg: u32, ext: u32 },
    Combined { chars: String, bg: u32, fg: u32, ext: u32 },
}

/// Deterministic atlas that hands out fixed-size slots on a grid and fills
/// them with a solid coverage mask instead of rasterizing a font.
///
/// Useful for headless hosts, replay and tests: placements depend only on
/// lookup order, and [`with_shape`](Self::with_shape) pins the bitmap shape
/// of specific codepoints. When all pages are full the atlas resets itself
/// and reports it from [`TextureAtlas::begin_frame`].
#[derive(Debug, Clone)]
pub struct FixedGlyphAtlas {
    page_size: u32,
    slot_width: u32,
    slot_height: u32,
    max_pages: usize,
    pages: Vec<AtlasPage>,
    slots: HashMap<SlotKey, RasterizedGlyph>,
    shapes: HashMap<u32, GlyphShape>,
    default_shape: GlyphShape,
    reset_pending: bool,
    next_version: u64,
}

impl FixedGlyphAtlas {
    /// Slots sized to the device character box of `config`.
    #[must_use]
    pub fn new(config: &AtlasConfig) -> Self {
        Self::with_geometry(
            config.device_char_width.max(1),
            config.device_char_height.max(1),
            config.max_texture_size.clamp(64, 2048),
            4,
        )
    }

    #[must_use]
    pub fn with_geometry(slot_width: u32, slot_height: u32, page_size: u32, max_pages: usize) -> Self {
        let page_size = page_size.max(slot_width).max(slot_height);
        Self {
            page_size,
            slot_width,
            slot_height,
            max_pages: max_pages.max(1),
            pages: vec![AtlasPage::new(page_size, page_size)],
            slots: HashMap::new(),
            shapes: HashMap::new(),
            default_shape: GlyphShape {
                width: slot_width,
                height: slot_height,
                offset_x: 0,
                offset_y: 0,
            },
            reset_pending: false,
            next_version: 1,
        }
    }

    /// Report `shape` for every lookup of `code`.
    #[must_use]
    pub fn with_shape(mut self, code: u32, shape: GlyphShape) -> Self {
        self.shapes.insert(code, shape);
        self
    }

    #[must_use]
    pub fn glyph_count(&self) -> usize {
        self.slots.len()
    }

    fn slots_per_page(&self) -> usize {
        ((self.page_size / self.slot_width) * (self.page_size / self.slot_height)) as usize
    }

    fn bump(&mut self, page: usize) {
        self.pages[page].version = self.next_version;
        self.next_version += 1;
    }

    fn reset(&mut self) {
        self.slots.clear();
        self.pages.truncate(1);
        self.pages[0].pixels.fill(0);
        self.bump(0);
        self.reset_pending = true;
    }

    fn insert(&mut self, key: SlotKey, code: u32) -> RasterizedGlyph {
        let per_page = self.slots_per_page().max(1);
        if self.slots.len() >= per_page * self.max_pages {
            self.reset();
        }
        let index = self.slots.len();
        let page = index / per_page;
        if page >= self.pages.len() {
            self.pages.push(AtlasPage::new(self.page_size, self.page_size));
        }
        let within = (index % per_page) as u32;
        let cols = self.page_size / self.slot_width;
        let px = (within % cols) * self.slot_width;
        let py = (within / cols) * self.slot_height;

        let shape = self.shapes.get(&code).copied().unwrap_or(self.default_shape);
        let blank = code == u32::from(b' ');
        let (w, h) = if blank {
            (0, 0)
        } else {
            (
                shape.width.min(self.page_size - px),
                shape.height.min(self.page_size - py),
            )
        };
        let stride = self.page_size as usize * 4;
        let pixels = &mut self.pages[page].pixels;
        for y in py..py + h {
            let row = y as usize * stride;
            for x in px..px + w {
                let i = row + x as usize * 4;
                pixels[i..i + 4].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
            }
        }
        self.bump(page);

        let size = self.page_size as f32;
        let glyph = RasterizedGlyph {
            texture_page: page as u32,
            texture_position: Vec2::new(px as f32, py as f32),
            texture_position_clip_space: Vec2::new(px as f32 / size, py as f32 / size),
            size: Vec2::new(w as f32, h as f32),
            size_clip_space: Vec2::new(w as f32 / size, h as f32 / size),
            offset: Vec2::new(shape.offset_x as f32, shape.offset_y as f32),
        };
        self.slots.insert(key, glyph);
        glyph
    }
}

impl TextureAtlas for FixedGlyphAtlas {
    fn pages(&self) -> &[AtlasPage] {
        &self.pages
    }

    fn warm_up(&mut self) {
        for code in 0x21..0x7F_u32 {
            self.rasterized_glyph(code, 0, 0, 0);
        }
    }

    fn begin_frame(&mut self) -> bool {
        std::mem::take(&mut self.reset_pending)
    }

    fn clear_texture(&mut self) {
        self.slots.clear();
        self.pages.truncate(1);
        self.pages[0].pixels.fill(0);
        self.bump(0);
    }

    fn rasterized_glyph(
        &mut self,
        code: u32,
        bg: u32,
        fg: u32,
        ext: u32,
    ) -> Option<RasterizedGlyph> {
        if char::from_u32(code).is_none() {
            return None;
        }
        let key = SlotKey::Code { code, bg, fg, ext };
        if let Some(glyph) = self.slots.get(&key) {
            return Some(*glyph);
        }
        Some(self.insert(key, code))
    }

    fn rasterized_glyph_combined(
        &mut self,
        chars: &str,
        bg: u32,
        fg: u32,
        ext: u32,
    ) -> Option<RasterizedGlyph> {
        let first = chars.chars().next()? as u32;
        let key = SlotKey::Combined {
            chars: chars.to_owned(),
            bg,
            fg,
            ext,
        };
        if let Some(glyph) = self.slots.get(&key) {
            return Some(*glyph);
        }
        Some(self.insert(key, first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(font_size: f32) -> AtlasConfig {
        AtlasConfig {
            font_family: "monospace".to_owned(),
            font_size,
            font_weight: "normal".to_owned(),
            font_weight_bold: "bold".to_owned(),
            dpr: 1.0,
            device_cell_width: 8,
            device_cell_height: 16,
            device_char_width: 8,
            device_char_height: 16,
            letter_spacing: 0.0,
            line_height: 1.0,
            draw_bold_text_in_bright_colors: true,
            minimum_contrast_ratio: 1.0,
            custom_glyphs: true,
            max_texture_size: 256,
            colors: ColorSet::default(),
        }
    }

    fn factory(created: Rc<RefCell<u32>>) -> impl FnMut(&AtlasConfig) -> SharedAtlas {
        move |config: &AtlasConfig| -> SharedAtlas {
            *created.borrow_mut() += 1;
            Rc::new(RefCell::new(FixedGlyphAtlas::new(config)))
        }
    }

    #[test]
    fn equal_configs_share_one_atlas() {
        let cache = AtlasCache::new();
        let created = Rc::new(RefCell::new(0));
        let mut make = factory(Rc::clone(&created));
        let a = cache.register_owner();
        let b = cache.register_owner();

        let atlas_a = cache.acquire(a, &config(15.0), &mut make);
        let atlas_b = cache.acquire(b, &config(15.0), &mut make);
        assert!(Rc::ptr_eq(&atlas_a, &atlas_b));
        assert_eq!(*created.borrow(), 1);
        assert_eq!(cache.owner_count(&config(15.0)), 2);

        // Re-acquiring the same config is stable.
        let again = cache.acquire(a, &config(15.0), &mut make);
        assert!(Rc::ptr_eq(&again, &atlas_a));
        assert_eq!(cache.owner_count(&config(15.0)), 2);
    }

    #[test]
    fn config_change_moves_owner_and_release_drops_entry() {
        let cache = AtlasCache::new();
        let created = Rc::new(RefCell::new(0));
        let mut make = factory(Rc::clone(&created));
        let a = cache.register_owner();
        let b = cache.register_owner();
        cache.acquire(a, &config(15.0), &mut make);
        cache.acquire(b, &config(15.0), &mut make);

        cache.acquire(a, &config(20.0), &mut make);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.owner_count(&config(15.0)), 1);

        cache.release(b);
        assert_eq!(cache.len(), 1);
        cache.release(a);
        assert!(cache.is_empty());
        cache.release(a);
        assert_eq!(*created.borrow(), 2);
    }

    #[test]
    fn rescale_policy_excludes_ascii_emoji_and_icons() {
        assert!(default_allows_rescaling(0x2192, 1, 20.0, 8));
        assert!(!default_allows_rescaling(0x2192, 1, 12.0, 8));
        assert!(!default_allows_rescaling(0x2192, 2, 20.0, 8));
        assert!(!default_allows_rescaling(u32::from(b'W'), 1, 20.0, 8));
        assert!(!default_allows_rescaling(0x1F600, 1, 20.0, 8));
        assert!(!default_allows_rescaling(0xE0B0, 1, 20.0, 8));
        assert!(!default_allows_rescaling(0xF101, 1, 20.0, 8));
    }

    #[test]
    fn fixed_atlas_reuses_slots_and_bumps_versions() {
        let mut atlas = FixedGlyphAtlas::with_geometry(8, 16, 64, 2);
        let v0 = atlas.pages()[0].version;
        let a = atlas.rasterized_glyph('a' as u32, 0, 0, 0).unwrap();
        assert!(atlas.pages()[0].version > v0);
        let v1 = atlas.pages()[0].version;
        assert_eq!(atlas.rasterized_glyph('a' as u32, 0, 0, 0), Some(a));
        assert_eq!(atlas.pages()[0].version, v1);

        let b = atlas.rasterized_glyph('b' as u32, 0, 0, 0).unwrap();
        assert_eq!(b.texture_position, Vec2::new(8.0, 0.0));
        assert_eq!(b.texture_position_clip_space, Vec2::new(0.125, 0.0));
        assert_eq!(b.size, Vec2::new(8.0, 16.0));
    }

    #[test]
    fn fixed_atlas_spills_to_new_page_then_resets() {
        // 64x64 page with 8x16 slots holds 32 glyphs; two pages hold 64.
        let mut atlas = FixedGlyphAtlas::with_geometry(8, 16, 64, 2);
        for code in 0..32 {
            atlas.rasterized_glyph(0x100 + code, 0, 0, 0);
        }
        let spill = atlas.rasterized_glyph(0x200, 0, 0, 0).unwrap();
        assert_eq!(spill.texture_page, 1);
        assert_eq!(atlas.pages().len(), 2);
        assert!(!atlas.begin_frame());

        for code in 0..31 {
            atlas.rasterized_glyph(0x300 + code, 0, 0, 0);
        }
        assert_eq!(atlas.glyph_count(), 64);
        let after = atlas.rasterized_glyph(0x400, 0, 0, 0).unwrap();
        assert_eq!(after.texture_page, 0);
        assert_eq!(atlas.pages().len(), 1);
        assert!(atlas.begin_frame());
        assert!(!atlas.begin_frame());
    }

    #[test]
    fn shapes_and_blank_glyphs() {
        let shape = GlyphShape {
            width: 12,
            height: 16,
            offset_x: 5,
            offset_y: 1,
        };
        let mut atlas = FixedGlyphAtlas::with_geometry(16, 16, 64, 1).with_shape('W' as u32, shape);
        let w = atlas.rasterized_glyph('W' as u32, 0, 0, 0).unwrap();
        assert_eq!(w.size, Vec2::new(12.0, 16.0));
        assert_eq!(w.offset, Vec2::new(5.0, 1.0));
        let space = atlas.rasterized_glyph(u32::from(b' '), 0, 0, 0).unwrap();
        assert_eq!(space.size, Vec2::default());
        assert!(atlas.rasterized_glyph(0xD800, 0, 0, 0).is_none());
        assert!(atlas.rasterized_glyph_combined("", 0, 0, 0).is_none());
    }
}
