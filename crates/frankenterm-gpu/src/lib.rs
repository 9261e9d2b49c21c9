#![forbid(unsafe_code)]

//! Incremental GPU render pipeline for FrankenTerm.
//!
//! `frankenterm-gpu` turns the visible rows of a terminal buffer into two
//! instanced draws per frame: run-length merged background rectangles and
//! atlas-textured glyph quads. Work is proportional to what changed.
//!
//! # Pipeline
//!
//! - **Model** ([`model`]): flat per-cell diff cache; unchanged cells are skipped.
//! - **Resolver** ([`resolver`]): inverse, dim, selection, decorations and
//!   block cursor folded into final color words.
//! - **Rectangles** ([`rectangles`]): background spans and cursor shapes.
//! - **Glyphs** ([`glyphs`]): one instance per cell, looked up in a shared
//!   [`atlas`], clipped to the cell box.
//! - **Blink** ([`blink`]): cursor blink state machine over an injected
//!   [`TimerHost`].
//! - **Dimensions** ([`dimensions`]): pixel-exact cell and canvas geometry for
//!   a device pixel ratio.
//! - **Backend** ([`backend`]): wgpu (WebGPU or WebGL2) on wasm32, a recording
//!   headless backend everywhere.
//!
//! [`GpuRenderer`] owns all of the above and is driven by host events.

pub mod atlas;
pub mod attrs;
pub mod backend;
pub mod blink;
pub mod config;
pub mod dimensions;
pub mod glyphs;
pub mod instance;
pub mod model;
pub mod rectangles;
pub mod renderer;
pub mod resolver;
pub mod selection;
pub mod source;
pub mod theme;

pub use atlas::{
    AtlasCache, AtlasConfig, AtlasFactory, AtlasPage, FixedGlyphAtlas, RasterizedGlyph,
    SharedAtlas, TextureAtlas,
};
pub use attrs::{BgFlags, Color, ColorMode, FgFlags};
#[cfg(target_arch = "wasm32")]
pub use backend::WgpuBackend;
pub use backend::{BackendError, BackendKind, GpuBackend, HeadlessBackend};
pub use blink::{CursorBlinkStateManager, ManualTimers, TimerHost, TimerId};
pub use config::{ConfigError, CursorStyle, RendererOptions};
pub use dimensions::{FontMetrics, RenderDimensions};
pub use renderer::{
    FrameOutcome, FrameStats, GpuRenderer, RendererConfig, RendererError, RendererEvent,
};
pub use resolver::{Decoration, DecorationLayer, DecorationSet};
pub use selection::SelectionSpan;
pub use source::{CellGrid, CursorState, GridCell, TerminalSource};
pub use theme::{ColorSet, Rgba};
