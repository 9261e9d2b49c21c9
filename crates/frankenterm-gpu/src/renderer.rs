//! The render pipeline.
//!
//! [`GpuRenderer`] owns the diff model, both batchers, the blink manager and
//! the attached backend. The host drives it: it forwards terminal, DOM and
//! timer events to the `handle_*` methods, calls [`GpuRenderer::render_rows`]
//! for dirty row ranges, and drains [`RendererEvent`]s to learn which rows to
//! redraw next.
//!
//! A pass resolves every cell of the range, diffs it against the model,
//! forwards changed cells to the glyph batcher, re-derives background spans
//! if anything changed, rebuilds the cursor rectangles and then issues at
//! most three instanced draws (backgrounds, glyphs, cursor).

use std::fmt;
use std::rc::Rc;

use crate::atlas::{AtlasCache, AtlasConfig, AtlasFactory, OwnerId, SharedAtlas};
use crate::attrs::{COMBINED_CHAR_BIT, NULL_CELL_CODE};
use crate::backend::{BackendError, GpuBackend, InstanceLayout};
use crate::blink::{CursorBlinkStateManager, TimerHost, TimerId};
use crate::config::{ConfigError, CursorStyle, RendererOptions};
use crate::dimensions::{DimensionInput, FontMetrics, RenderDimensions};
use crate::glyphs::{GlyphBatcher, GlyphCellUpdate};
use crate::instance::InstanceBuffer;
use crate::model::{CursorRenderModel, RenderModel, ResolvedCell};
use crate::rectangles::RectangleBatcher;
use crate::resolver::{DecorationSet, ResolveContext, apply_block_cursor, resolve};
use crate::selection::SelectionSpan;
use crate::source::{SourceCell, TerminalSource};
use crate::theme::ColorSet;

/// Texture size assumed for atlas configs before a backend reports its
/// limits.
const DEFAULT_MAX_TEXTURE_SIZE: u32 = 4096;

/// Initial renderer state.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub cols: u32,
    pub rows: u32,
    /// CSS-pixel character box; zero until the font has been measured.
    pub metrics: FontMetrics,
    pub dpr: f64,
    pub focused: bool,
    pub options: RendererOptions,
    pub theme: ColorSet,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            metrics: FontMetrics::new(9.0, 17.0),
            dpr: 1.0,
            focused: true,
            options: RendererOptions::default(),
            theme: ColorSet::default(),
        }
    }
}

/// Notifications for the host, collected until [`GpuRenderer::drain_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererEvent {
    /// Rows `start..=end` (viewport) should be passed to `render_rows`.
    RequestRedraw { start: u32, end: u32 },
    /// The backend lost its device; call `restore_context` with a new one.
    ContextLoss,
    /// The renderer switched to a different shared atlas.
    AtlasChanged,
}

/// Counters for one rendered pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Background rectangles drawn, viewport included.
    pub background_rects: u32,
    pub cursor_rects: u32,
    pub glyph_instances: u32,
    /// Cells whose resolved words changed in this pass.
    pub updated_cells: u32,
    /// The whole viewport was re-resolved.
    pub full_redraw: bool,
}

/// Result of [`GpuRenderer::render_rows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered(FrameStats),
    /// Nothing was drawn: no usable backend or unmeasured font. A full
    /// redraw happens on the next successful pass.
    Deferred,
}

/// Frame errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererError {
    /// The device was lost during the frame; see [`RendererEvent::ContextLoss`].
    ContextLost,
    Backend(BackendError),
    /// The renderer was disposed.
    Disposed,
}

impl fmt::Display for RendererError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContextLost => write!(f, "GPU context lost"),
            Self::Backend(err) => write!(f, "backend error: {err}"),
            Self::Disposed => write!(f, "renderer disposed"),
        }
    }
}

impl std::error::Error for RendererError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for RendererError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::DeviceLost(_) => Self::ContextLost,
            other => Self::Backend(other),
        }
    }
}

pub struct GpuRenderer {
    options: RendererOptions,
    theme: ColorSet,
    cols: u32,
    rows: u32,
    metrics: FontMetrics,
    dpr: f64,
    focused: bool,
    dims: Option<RenderDimensions>,
    /// Backing-store size reported by the host, overriding the computed
    /// canvas size until the next resize.
    canvas_device_pixels: Option<(u32, u32)>,

    model: RenderModel,
    rectangles: RectangleBatcher,
    glyphs: GlyphBatcher,
    decorations: DecorationSet,
    background_buffer: InstanceBuffer,
    glyph_buffer: InstanceBuffer,
    cursor_buffer: InstanceBuffer,
    /// Backgrounds must be re-derived even if no cell changes.
    backgrounds_stale: bool,

    backend: Option<Box<dyn GpuBackend>>,
    atlas_cache: AtlasCache,
    atlas_factory: Box<dyn AtlasFactory>,
    atlas: Option<SharedAtlas>,
    owner: OwnerId,

    timers: Box<dyn TimerHost>,
    blink: Option<CursorBlinkStateManager>,

    events: Vec<RendererEvent>,
    viewport_y: u32,
    cursor_row: Option<u32>,
    pending_full_redraw: bool,
    context_lost: bool,
    disposed: bool,
}

impl fmt::Debug for GpuRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuRenderer")
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("dpr", &self.dpr)
            .field("focused", &self.focused)
            .field("dims", &self.dims)
            .field("backend", &self.backend.as_ref().map(|b| b.kind()))
            .field("context_lost", &self.context_lost)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl GpuRenderer {
    /// Build a detached renderer. No frame is drawn until a backend is
    /// attached with [`attach_backend`](Self::attach_backend).
    pub fn new(
        config: RendererConfig,
        atlas_cache: AtlasCache,
        atlas_factory: Box<dyn AtlasFactory>,
        mut timers: Box<dyn TimerHost>,
    ) -> Result<Self, ConfigError> {
        config.options.validate()?;
        debug_assert!(config.cols > 0 && config.rows > 0, "renderer needs a non-empty grid");

        let blink = config
            .options
            .cursor_blink
            .then(|| CursorBlinkStateManager::new(config.focused, timers.as_mut()));
        let owner = atlas_cache.register_owner();
        let mut glyphs = GlyphBatcher::new(config.cols, config.rows);
        glyphs.set_rescale_overlapping(config.options.rescale_overlapping_glyphs);

        let mut renderer = Self {
            rectangles: RectangleBatcher::new(
                &config.theme,
                config.cols,
                config.rows,
                RenderDimensions::default(),
            ),
            model: RenderModel::new(config.cols, config.rows),
            glyphs,
            decorations: DecorationSet::new(),
            background_buffer: InstanceBuffer::new(InstanceLayout::Rectangle),
            glyph_buffer: InstanceBuffer::new(InstanceLayout::Glyph),
            cursor_buffer: InstanceBuffer::new(InstanceLayout::Rectangle),
            backgrounds_stale: true,
            options: config.options,
            theme: config.theme,
            cols: config.cols,
            rows: config.rows,
            metrics: config.metrics,
            dpr: config.dpr,
            focused: config.focused,
            dims: None,
            canvas_device_pixels: None,
            backend: None,
            atlas_cache,
            atlas_factory,
            atlas: None,
            owner,
            timers,
            blink,
            events: Vec::new(),
            viewport_y: 0,
            cursor_row: None,
            pending_full_redraw: true,
            context_lost: false,
            disposed: false,
        };
        renderer.update_dimensions();
        renderer.rectangles.handle_resize();
        renderer.refresh_atlas();
        Ok(renderer)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn dimensions(&self) -> Option<&RenderDimensions> {
        self.dims.as_ref()
    }

    #[must_use]
    pub fn grid_size(&self) -> (u32, u32) {
        (self.cols, self.rows)
    }

    #[must_use]
    pub fn options(&self) -> &RendererOptions {
        &self.options
    }

    #[must_use]
    pub fn theme(&self) -> &ColorSet {
        &self.theme
    }

    #[must_use]
    pub fn model(&self) -> &RenderModel {
        &self.model
    }

    #[must_use]
    pub fn glyphs(&self) -> &GlyphBatcher {
        &self.glyphs
    }

    #[must_use]
    pub fn rectangles(&self) -> &RectangleBatcher {
        &self.rectangles
    }

    #[must_use]
    pub fn atlas(&self) -> Option<&SharedAtlas> {
        self.atlas.as_ref()
    }

    #[must_use]
    pub fn blink(&self) -> Option<&CursorBlinkStateManager> {
        self.blink.as_ref()
    }

    #[must_use]
    pub fn is_focused(&self) -> bool {
        self.focused
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    #[must_use]
    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Decorations consulted by the color resolver. Callers request a
    /// redraw of the affected rows after editing them.
    pub fn decorations_mut(&mut self) -> &mut DecorationSet {
        &mut self.decorations
    }

    /// Take every queued event.
    pub fn drain_events(&mut self) -> Vec<RendererEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Geometry
    // -----------------------------------------------------------------------

    /// Grid resize: every cached cell and instance is discarded.
    pub fn handle_resize(&mut self, cols: u32, rows: u32) {
        if self.disposed {
            return;
        }
        debug_assert!(cols > 0 && rows > 0, "resize to an empty grid");
        self.cols = cols;
        self.rows = rows;
        self.canvas_device_pixels = None;
        self.update_dimensions();
        self.model.resize(cols, rows);
        self.rectangles.handle_resize();
        self.glyphs.resize(cols, rows);
        self.refresh_atlas();
        self.apply_surface_size();
        self.clear_model(false);
        self.request_full_redraw();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            cols,
            rows,
            canvas_width = self.dims.map(|d| d.device.canvas.width),
            canvas_height = self.dims.map(|d| d.device.canvas.height),
            "renderer resized"
        );
    }

    /// New font measurement.
    pub fn handle_char_size_changed(&mut self, metrics: FontMetrics) {
        self.metrics = metrics;
        self.handle_resize(self.cols, self.rows);
    }

    pub fn handle_device_pixel_ratio_change(&mut self, dpr: f64) {
        if self.disposed || dpr == self.dpr {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(from = self.dpr, to = dpr, "device pixel ratio changed");
        self.dpr = dpr;
        self.handle_resize(self.cols, self.rows);
    }

    /// Backing-store size observed by the host (device pixels).
    pub fn handle_canvas_device_pixels(&mut self, width: u32, height: u32) {
        if self.disposed || width == 0 || height == 0 {
            return;
        }
        if self.canvas_device_pixels == Some((width, height)) {
            return;
        }
        self.canvas_device_pixels = Some((width, height));
        self.apply_surface_size();
        self.request_full_redraw();
    }

    fn update_dimensions(&mut self) {
        self.dims = RenderDimensions::compute(&DimensionInput {
            metrics: self.metrics,
            dpr: self.dpr,
            line_height: f64::from(self.options.line_height),
            letter_spacing: f64::from(self.options.letter_spacing),
            cols: self.cols,
            rows: self.rows,
        });
        self.rectangles
            .set_dimensions(self.cols, self.rows, self.dims.unwrap_or_default());
        self.backgrounds_stale = true;
    }

    fn surface_size(&self) -> Option<(u32, u32)> {
        self.canvas_device_pixels.or_else(|| {
            self.dims
                .map(|d| (d.device.canvas.width, d.device.canvas.height))
        })
    }

    fn apply_surface_size(&mut self) {
        let Some((width, height)) = self.surface_size() else {
            return;
        };
        let Some(backend) = self.backend.as_deref_mut() else {
            return;
        };
        match backend.configure_surface(width, height) {
            Ok(()) => {}
            Err(BackendError::DeviceLost(_msg)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(reason = %_msg, "device lost while configuring surface");
                self.handle_context_loss();
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, width, height, "surface configuration failed");
                self.pending_full_redraw = true;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Focus, selection, cursor
    // -----------------------------------------------------------------------

    pub fn handle_focus(&mut self) {
        if self.disposed {
            return;
        }
        self.focused = true;
        if let Some(blink) = self.blink.as_mut() {
            blink.resume(self.timers.as_mut());
        }
        self.request_full_redraw();
    }

    pub fn handle_blur(&mut self) {
        if self.disposed {
            return;
        }
        self.focused = false;
        if let Some(blink) = self.blink.as_mut() {
            blink.pause(self.timers.as_mut());
        }
        self.request_full_redraw();
    }

    pub fn handle_selection_changed(&mut self, span: Option<SelectionSpan>) {
        if self.disposed {
            return;
        }
        self.model.selection.update(span, self.viewport_y, self.rows);
        self.request_full_redraw();
    }

    /// Cursor moved or input arrived: keep the cursor solid for a while.
    pub fn handle_cursor_move(&mut self) {
        if let Some(blink) = self.blink.as_mut() {
            blink.restart_blink_animation(self.timers.as_mut());
        }
    }

    /// A timer from the [`TimerHost`] elapsed. Returns `false` for ids the
    /// renderer does not own.
    pub fn handle_timer(&mut self, id: TimerId) -> bool {
        let Some(blink) = self.blink.as_mut() else {
            return false;
        };
        if !blink.owns(id) {
            return false;
        }
        if blink.fire(self.timers.as_mut(), id) {
            self.request_cursor_redraw();
        }
        true
    }

    fn request_cursor_redraw(&mut self) {
        if let Some(row) = self.cursor_row {
            self.events
                .push(RendererEvent::RequestRedraw { start: row, end: row });
        }
    }

    fn request_full_redraw(&mut self) {
        self.events.push(RendererEvent::RequestRedraw {
            start: 0,
            end: self.rows - 1,
        });
    }

    // -----------------------------------------------------------------------
    // Options and theme
    // -----------------------------------------------------------------------

    pub fn handle_options_changed(&mut self, options: RendererOptions) -> Result<(), ConfigError> {
        if self.disposed {
            return Ok(());
        }
        options.validate()?;
        self.options = options;

        // Any option edit restarts blinking from a solid cursor.
        if let Some(mut blink) = self.blink.take() {
            blink.dispose(self.timers.as_mut());
        }
        if self.options.cursor_blink {
            self.blink = Some(CursorBlinkStateManager::new(
                self.focused,
                self.timers.as_mut(),
            ));
        }
        self.request_cursor_redraw();
        self.glyphs
            .set_rescale_overlapping(self.options.rescale_overlapping_glyphs);
        self.handle_resize(self.cols, self.rows);
        Ok(())
    }

    pub fn handle_theme_changed(&mut self, theme: ColorSet) {
        if self.disposed {
            return;
        }
        self.theme = theme;
        self.rectangles.update_theme(&self.theme);
        self.refresh_atlas();
        self.clear_model(true);
        self.request_full_redraw();
    }

    fn atlas_config(&self, dims: &RenderDimensions) -> AtlasConfig {
        let max_texture_size = self
            .backend
            .as_ref()
            .map_or(DEFAULT_MAX_TEXTURE_SIZE, |b| b.capabilities().max_texture_dimension);
        AtlasConfig {
            font_family: self.options.font_family.clone(),
            font_size: self.options.font_size,
            font_weight: self.options.font_weight.clone(),
            font_weight_bold: self.options.font_weight_bold.clone(),
            dpr: dims.dpr,
            device_cell_width: dims.device.cell.width,
            device_cell_height: dims.device.cell.height,
            device_char_width: dims.device.char.width,
            device_char_height: dims.device.char.height,
            letter_spacing: self.options.letter_spacing,
            line_height: self.options.line_height,
            draw_bold_text_in_bright_colors: self.options.draw_bold_text_in_bright_colors,
            minimum_contrast_ratio: self.options.minimum_contrast_ratio,
            custom_glyphs: self.options.custom_glyphs,
            max_texture_size,
            colors: self.theme.clone(),
        }
    }

    /// Acquire the shared atlas matching the current font, geometry and
    /// colors.
    fn refresh_atlas(&mut self) {
        let Some(dims) = self.dims else {
            return;
        };
        let config = self.atlas_config(&dims);
        let atlas = self
            .atlas_cache
            .acquire(self.owner, &config, self.atlas_factory.as_mut());
        let changed = self
            .atlas
            .as_ref()
            .is_none_or(|current| !Rc::ptr_eq(current, &atlas));
        if !changed {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            font_family = %config.font_family,
            font_size = config.font_size,
            dpr = config.dpr,
            "texture atlas changed"
        );
        atlas.borrow_mut().warm_up();
        self.glyphs.set_atlas(Rc::clone(&atlas));
        self.atlas = Some(atlas);
        self.events.push(RendererEvent::AtlasChanged);
    }

    // -----------------------------------------------------------------------
    // Clearing
    // -----------------------------------------------------------------------

    fn clear_model(&mut self, clear_glyphs: bool) {
        self.model.clear();
        if clear_glyphs {
            self.glyphs.clear();
        }
        self.backgrounds_stale = true;
    }

    /// Forget every cached cell (the terminal was reset).
    pub fn clear(&mut self) {
        if self.disposed {
            return;
        }
        self.clear_model(true);
        if let Some(blink) = self.blink.as_mut() {
            blink.restart_blink_animation(self.timers.as_mut());
        }
        self.request_full_redraw();
    }

    /// Drop every rasterized glyph and redraw from scratch.
    pub fn clear_texture_atlas(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(atlas) = self.atlas.as_ref() {
            atlas.borrow_mut().clear_texture();
        }
        self.clear_model(true);
        self.request_full_redraw();
    }

    // -----------------------------------------------------------------------
    // Backend lifecycle
    // -----------------------------------------------------------------------

    /// Attach (or replace) the backend. The model is cleared and a full
    /// redraw is requested.
    pub fn attach_backend(&mut self, backend: Box<dyn GpuBackend>) -> Result<(), RendererError> {
        if self.disposed {
            return Err(RendererError::Disposed);
        }
        self.release_backend();
        #[cfg(feature = "tracing")]
        tracing::info!(kind = %backend.kind(), ready = backend.is_ready(), "backend attached");

        self.backend = Some(backend);
        self.context_lost = false;
        if let Some((width, height)) = self.surface_size()
            && let Some(backend) = self.backend.as_deref_mut()
        {
            backend.configure_surface(width, height)?;
        }
        // Page limits may differ from the previous backend.
        self.refresh_atlas();
        self.clear_model(true);
        self.pending_full_redraw = true;
        self.request_full_redraw();
        Ok(())
    }

    /// The device went away: drop every device handle and wait for
    /// [`restore_context`](Self::restore_context).
    pub fn handle_context_loss(&mut self) {
        if self.disposed {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::warn!("GPU context lost");
        self.background_buffer.forget();
        self.glyph_buffer.forget();
        self.cursor_buffer.forget();
        self.glyphs.forget_textures();
        self.backend = None;
        self.context_lost = true;
        self.clear_model(true);
        self.pending_full_redraw = true;
        self.events.push(RendererEvent::ContextLoss);
    }

    pub fn restore_context(&mut self, backend: Box<dyn GpuBackend>) -> Result<(), RendererError> {
        #[cfg(feature = "tracing")]
        tracing::info!("restoring GPU context");
        self.attach_backend(backend)
    }

    fn release_backend(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };
        self.background_buffer.release(backend.as_mut());
        self.glyph_buffer.release(backend.as_mut());
        self.cursor_buffer.release(backend.as_mut());
        self.glyphs.release_textures(backend.as_mut());
        backend.release();
        #[cfg(feature = "tracing")]
        tracing::debug!(kind = %backend.kind(), "backend released");
    }

    /// Release timers, device objects and the atlas claim. Later calls do
    /// nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(blink) = self.blink.as_mut() {
            blink.dispose(self.timers.as_mut());
        }
        self.release_backend();
        self.atlas_cache.release(self.owner);
        self.atlas = None;
        self.events.clear();
        self.disposed = true;
        #[cfg(feature = "tracing")]
        tracing::debug!("renderer disposed");
    }

    // -----------------------------------------------------------------------
    // Frame
    // -----------------------------------------------------------------------

    /// Redraw viewport rows `start..=end` (clamped to the grid).
    pub fn render_rows(
        &mut self,
        source: &dyn TerminalSource,
        start: u32,
        end: u32,
    ) -> Result<FrameOutcome, RendererError> {
        if self.disposed {
            return Err(RendererError::Disposed);
        }
        debug_assert_eq!(
            (source.cols(), source.rows()),
            (self.cols, self.rows),
            "source and renderer disagree on grid size"
        );
        if self.backend.as_ref().is_some_and(|b| b.is_lost()) {
            #[cfg(feature = "tracing")]
            tracing::warn!("backend reports device loss");
            self.handle_context_loss();
            return Err(RendererError::ContextLost);
        }
        let ready = self.backend.as_ref().is_some_and(|b| b.is_ready());
        let Some(dims) = self.dims.filter(|_| ready && !self.context_lost) else {
            self.pending_full_redraw = true;
            #[cfg(feature = "tracing")]
            tracing::trace!(
                has_backend = self.backend.is_some(),
                measured = self.dims.is_some(),
                context_lost = self.context_lost,
                "frame deferred"
            );
            return Ok(FrameOutcome::Deferred);
        };

        let atlas_reset = self
            .atlas
            .as_ref()
            .is_some_and(|atlas| atlas.borrow_mut().begin_frame());
        if atlas_reset {
            self.clear_model(true);
        }
        let pending = std::mem::take(&mut self.pending_full_redraw);
        let full_redraw = atlas_reset || pending;
        let (start, end) = if full_redraw {
            (0, self.rows - 1)
        } else {
            (start, end)
        };
        let updated_cells = self.update_model(source, &dims, start, end);

        match self.draw_frame() {
            Ok(mut stats) => {
                stats.updated_cells = updated_cells;
                stats.full_redraw = full_redraw;
                Ok(FrameOutcome::Rendered(stats))
            }
            Err(BackendError::DeviceLost(_msg)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(reason = %_msg, "device lost during frame");
                self.handle_context_loss();
                Err(RendererError::ContextLost)
            }
            Err(err) => {
                self.pending_full_redraw = true;
                Err(RendererError::Backend(err))
            }
        }
    }

    /// Resolve and diff rows `start..=end`, feeding changes to the batchers.
    /// Returns the number of changed cells.
    fn update_model(
        &mut self,
        source: &dyn TerminalSource,
        dims: &RenderDimensions,
        start: u32,
        end: u32,
    ) -> u32 {
        let cols = self.cols;
        let rows = self.rows;
        let start = start.min(rows - 1);
        let end = end.min(rows - 1);

        let viewport_y = source.viewport_y();
        if viewport_y != self.viewport_y {
            self.viewport_y = viewport_y;
            let span = self.model.selection.span();
            self.model.selection.update(span, viewport_y, rows);
        }

        let cursor = source.cursor();
        let cursor_x = cursor.x.min(cols - 1);
        self.cursor_row = cursor
            .y
            .checked_sub(viewport_y)
            .filter(|row| *row < rows);
        let cursor_visible = cursor.initialized
            && !cursor.hidden
            && self.blink.as_ref().is_none_or(|b| b.is_cursor_visible());
        let cursor_style = self.options.active_cursor_style(self.focused);
        // A cursor on a row outside this pass survives if nothing about it moved.
        self.model.cursor = self.model.cursor.filter(|prev| {
            cursor_visible
                && !(start..=end).contains(&prev.y)
                && self.cursor_row == Some(prev.y)
                && prev.x == cursor_x
                && prev.style == cursor_style
                && prev.dpr == dims.dpr
        });

        let selection = self.model.selection.clone();
        let ctx = ResolveContext {
            theme: &self.theme,
            selection: &selection,
            decorations: &self.decorations,
            focused: self.focused,
        };

        let mut updated = 0;
        for y in start..=end {
            let line = y + viewport_y;
            let joined = source.joined_ranges(line);
            let mut joined = joined.iter().copied().peekable();
            self.model.set_line_length(y, 0);
            let mut last_bg = 0;
            let mut cursor_span: Option<(u32, u32)> = None;

            let mut x = 0;
            while x < cols {
                while joined.next_if(|&(r0, _)| r0 < x).is_some() {}
                let range = joined
                    .next_if(|&(r0, r1)| r0 == x && r1 > r0)
                    .map(|(r0, r1)| (r0, r1.min(cols)));

                let base = source.cell(line, x);
                let joined_text;
                let (cell, last_char_x) = match range {
                    Some((r0, r1)) => {
                        joined_text = source.text_range(line, r0, r1);
                        let code = joined_text
                            .chars()
                            .next_back()
                            .map_or(base.code, |c| c as u32);
                        let cell = SourceCell {
                            chars: &joined_text,
                            code,
                            width: r1 - r0,
                            ..base
                        };
                        (cell, r1 - 1)
                    }
                    None => (base, x),
                };

                let mut colors = resolve(&ctx, &cell, x, line);

                if cursor_visible && line == cursor.y {
                    if (x..=last_char_x).contains(&cursor_x) {
                        let width = if x == cursor_x { cell.width.max(1) } else { 1 };
                        self.model.cursor = Some(CursorRenderModel {
                            x: cursor_x,
                            y: line - viewport_y,
                            width,
                            style: cursor_style,
                            cursor_width: self.options.cursor_width,
                            dpr: dims.dpr,
                        });
                        cursor_span = Some((cursor_x, cursor_x + width - 1));
                    }
                    if cursor_style == CursorStyle::Block
                        && let Some((first, last)) = cursor_span
                        && x <= last
                        && last_char_x >= first
                    {
                        apply_block_cursor(&mut colors, &self.theme);
                    }
                }

                if cell.code != NULL_CELL_CODE {
                    self.model.set_line_length(y, x + 1);
                }

                let mut code = cell.code;
                if cell.chars.chars().nth(1).is_some() {
                    code |= COMBINED_CHAR_BIT;
                }
                let resolved = ResolvedCell {
                    code,
                    bg: colors.bg,
                    fg: colors.fg,
                    ext: colors.ext,
                };
                if self.model.update(y, x, &resolved) {
                    updated += 1;
                    self.glyphs.update_cell(
                        dims,
                        &GlyphCellUpdate {
                            x,
                            y,
                            code,
                            bg: colors.bg,
                            fg: colors.fg,
                            ext: colors.ext,
                            chars: cell.chars,
                            width: cell.width,
                            last_bg,
                        },
                    );
                    for covered in x + 1..=last_char_x {
                        self.glyphs.update_cell(
                            dims,
                            &GlyphCellUpdate {
                                x: covered,
                                y,
                                code: NULL_CELL_CODE,
                                bg: 0,
                                fg: 0,
                                ext: 0,
                                chars: "",
                                width: 0,
                                last_bg: 0,
                            },
                        );
                        self.model
                            .null_cell(y, covered, colors.bg, colors.fg, colors.ext);
                    }
                }
                last_bg = colors.bg;
                x = last_char_x + 1;
            }
        }

        if updated > 0 || self.backgrounds_stale {
            self.rectangles.update_backgrounds(&self.model, &self.theme);
            self.backgrounds_stale = false;
        }
        self.rectangles.update_cursor(&self.model);
        updated
    }

    /// Upload instances and issue the draws for one frame.
    fn draw_frame(&mut self) -> Result<FrameStats, BackendError> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(BackendError::DeviceLost("no backend".to_owned()));
        };
        self.glyphs.sync_atlas_textures(backend)?;
        backend.begin_frame(self.theme.background.to_f32())?;

        let background_rects = self
            .background_buffer
            .upload_and_draw(backend, self.rectangles.backgrounds())?;
        let staged = self.glyphs.stage(self.model.line_lengths());
        let glyph_instances = self.glyph_buffer.upload_and_draw(backend, staged)?;
        let cursor_rects = if self.rectangles.cursor_count() > 0 {
            self.cursor_buffer
                .upload_and_draw(backend, self.rectangles.cursor())?
        } else {
            0
        };
        backend.submit_frame()?;

        Ok(FrameStats {
            background_rects,
            cursor_rects,
            glyph_instances,
            updated_cells: 0,
            full_redraw: false,
        })
    }
}

impl Drop for GpuRenderer {
    fn drop(&mut self) {
        self.dispose();
    }
}
