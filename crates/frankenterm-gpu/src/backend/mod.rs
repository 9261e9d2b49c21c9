//! Graphics backend abstraction.
//!
//! The batchers produce flat `f32` instance arrays; a [`GpuBackend`] owns the
//! device objects and turns those arrays into instanced draws. Two backends
//! exist: [`WgpuBackend`] (browser WebGPU or WebGL2 through wgpu, wasm32 only)
//! and [`HeadlessBackend`], which records everything for tests and replay.

mod headless;
#[cfg(target_arch = "wasm32")]
mod webgpu;

pub use headless::{HeadlessBackend, RecordedDraw, RecordedFrame};
#[cfg(target_arch = "wasm32")]
pub use webgpu::WgpuBackend;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::atlas::AtlasPage;

/// Which graphics API a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    WebGpu,
    WebGl2,
}

impl BackendKind {
    /// Kinds to try in order when `self` is preferred. WebGPU falls back to
    /// WebGL2; WebGL2 has nothing below it.
    #[must_use]
    pub const fn fallback_chain(self) -> &'static [BackendKind] {
        match self {
            Self::WebGpu => &[Self::WebGpu, Self::WebGl2],
            Self::WebGl2 => &[Self::WebGl2],
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebGpu => write!(f, "webgpu"),
            Self::WebGl2 => write!(f, "webgl2"),
        }
    }
}

/// Per-instance attribute layout of an instance buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceLayout {
    /// `x, y, w, h` (canvas fractions) then `r, g, b, a`.
    Rectangle,
    /// Offset (px), size (fractions), page, UV origin, UV size, cell position.
    Glyph,
}

impl InstanceLayout {
    /// Floats per instance.
    #[must_use]
    pub const fn stride(self) -> usize {
        match self {
            Self::Rectangle => crate::rectangles::INDICES_PER_RECTANGLE,
            Self::Glyph => crate::glyphs::INDICES_PER_GLYPH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub kind: BackendKind,
    pub max_texture_dimension: u32,
    /// Atlas pages the glyph pipeline can bind at once.
    pub max_atlas_pages: u32,
}

/// One instanced draw of a unit quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub layout: InstanceLayout,
    pub buffer: BufferHandle,
    pub instance_count: u32,
}

/// Backend failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Requested API or feature is not available; callers fall back to a
    /// different renderer.
    Unsupported(&'static str),
    /// Device or context lost; every handle is invalid.
    DeviceLost(String),
    /// Surface acquisition or configuration failed.
    Surface(String),
    OutOfMemory,
    /// Handle does not belong to this backend (or was destroyed).
    InvalidHandle,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::DeviceLost(msg) => write!(f, "GPU device lost: {msg}"),
            Self::Surface(msg) => write!(f, "surface error: {msg}"),
            Self::OutOfMemory => write!(f, "GPU out of memory"),
            Self::InvalidHandle => write!(f, "invalid GPU resource handle"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Device-side operations the pipeline needs.
///
/// Draws issued between [`begin_frame`](Self::begin_frame) and
/// [`submit_frame`](Self::submit_frame) execute in call order within one
/// render pass.
pub trait GpuBackend {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities;

    /// False while the device is still being acquired or after it was lost.
    fn is_ready(&self) -> bool;

    /// The device is gone for good; a new backend must be attached.
    fn is_lost(&self) -> bool;

    /// Resize the drawing surface, device pixels.
    fn configure_surface(&mut self, width: u32, height: u32) -> Result<(), BackendError>;

    fn create_instance_buffer(
        &mut self,
        layout: InstanceLayout,
        byte_len: u64,
    ) -> Result<BufferHandle, BackendError>;

    /// Upload `data` to the start of `buffer`.
    fn write_instance_buffer(&mut self, buffer: BufferHandle, data: &[f32])
    -> Result<(), BackendError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Texture bound as glyph page `page`.
    fn create_atlas_texture(
        &mut self,
        page: u32,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle, BackendError>;

    fn upload_atlas_page(
        &mut self,
        texture: TextureHandle,
        page: &AtlasPage,
    ) -> Result<(), BackendError>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Start a frame cleared to `clear` (normalized RGBA).
    fn begin_frame(&mut self, clear: [f32; 4]) -> Result<(), BackendError>;

    fn draw_instanced(&mut self, draw: DrawCall) -> Result<(), BackendError>;

    fn submit_frame(&mut self) -> Result<(), BackendError>;

    /// Free every device object. Handles are invalid afterwards.
    fn release(&mut self);
}

/// Serialize floats as little-endian bytes for buffer uploads.
#[must_use]
pub fn floats_to_bytes(data: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * 4);
    for value in data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_to_bytes_is_little_endian() {
        let bytes = floats_to_bytes(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(bytes[4..8].try_into().unwrap()), -2.5);
    }

    #[test]
    fn layout_strides() {
        assert_eq!(InstanceLayout::Rectangle.stride(), 8);
        assert_eq!(InstanceLayout::Glyph.stride(), 11);
    }

    #[test]
    fn preferred_kind_leads_the_fallback_chain() {
        assert_eq!(
            BackendKind::WebGpu.fallback_chain(),
            &[BackendKind::WebGpu, BackendKind::WebGl2]
        );
        assert_eq!(BackendKind::WebGl2.fallback_chain(), &[BackendKind::WebGl2]);
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&BackendKind::WebGl2).unwrap(), "\"webgl2\"");
        assert_eq!(BackendKind::WebGpu.to_string(), "webgpu");
    }
}
