//! Recording backend.
//!
//! Keeps buffers and textures as plain CPU copies and records every frame's
//! draws with a snapshot of the instance data they consumed. The handle is a
//! cheap clone over shared state, so a host can hand one clone to the
//! renderer and inspect frames through another.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{
    BackendCapabilities, BackendError, BackendKind, BufferHandle, DrawCall, GpuBackend,
    InstanceLayout, TextureHandle,
};
use crate::atlas::AtlasPage;

/// Frames retained by a new backend; see [`HeadlessBackend::set_frame_history`].
pub const DEFAULT_FRAME_HISTORY: usize = 16;

/// One draw as executed, with the instances it read.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub layout: InstanceLayout,
    pub instance_count: u32,
    pub instances: Vec<f32>,
}

impl RecordedDraw {
    /// Floats of instance `i`.
    #[must_use]
    pub fn instance(&self, i: usize) -> &[f32] {
        let stride = self.layout.stride();
        &self.instances[i * stride..(i + 1) * stride]
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordedFrame {
    pub clear: [f32; 4],
    pub draws: Vec<RecordedDraw>,
}

#[derive(Debug)]
struct HeadlessBuffer {
    layout: InstanceLayout,
    byte_len: u64,
    data: Vec<f32>,
}

#[derive(Debug)]
struct HeadlessTexture {
    page: u32,
    width: u32,
    height: u32,
    uploaded_version: Option<u64>,
}

#[derive(Debug)]
struct HeadlessState {
    kind: BackendKind,
    ready: bool,
    released: bool,
    lost: bool,
    lose_device_on_next_frame: bool,
    max_atlas_pages: u32,
    surface: (u32, u32),
    next_handle: u32,
    buffers: HashMap<u32, HeadlessBuffer>,
    textures: HashMap<u32, HeadlessTexture>,
    current: Option<RecordedFrame>,
    frames: Vec<RecordedFrame>,
    frame_history: usize,
    frames_submitted: usize,
    buffer_writes: u64,
    texture_uploads: u64,
}

#[derive(Debug, Clone)]
pub struct HeadlessBackend {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new(kind: BackendKind) -> Self {
        Self {
            state: Rc::new(RefCell::new(HeadlessState {
                kind,
                ready: true,
                released: false,
                lost: false,
                lose_device_on_next_frame: false,
                max_atlas_pages: 4,
                surface: (0, 0),
                next_handle: 0,
                buffers: HashMap::new(),
                textures: HashMap::new(),
                current: None,
                frames: Vec::new(),
                frame_history: DEFAULT_FRAME_HISTORY,
                frames_submitted: 0,
                buffer_writes: 0,
                texture_uploads: 0,
            })),
        }
    }

    /// Simulate asynchronous device acquisition.
    pub fn set_ready(&self, ready: bool) {
        self.state.borrow_mut().ready = ready;
    }

    /// Make the next `begin_frame` fail with [`BackendError::DeviceLost`].
    pub fn lose_device_on_next_frame(&self) {
        self.state.borrow_mut().lose_device_on_next_frame = true;
    }

    /// Lose the device now, between frames: every handle is dropped and the
    /// backend reports itself lost and not ready from here on.
    pub fn lose_device(&self) {
        Self::mark_lost(&mut self.state.borrow_mut());
    }

    fn mark_lost(state: &mut HeadlessState) {
        state.lost = true;
        state.buffers.clear();
        state.textures.clear();
        state.current = None;
    }

    /// Keep only the newest `limit` frames (at least one).
    pub fn set_frame_history(&self, limit: usize) {
        let mut state = self.state.borrow_mut();
        state.frame_history = limit.max(1);
        let excess = state.frames.len().saturating_sub(state.frame_history);
        state.frames.drain(..excess);
    }

    /// Retained frames, oldest first.
    #[must_use]
    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.state.borrow().frames.clone()
    }

    /// Frames submitted since creation, retained or not.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.state.borrow().frames_submitted
    }

    #[must_use]
    pub fn last_frame(&self) -> Option<RecordedFrame> {
        self.state.borrow().frames.last().cloned()
    }

    #[must_use]
    pub fn surface_size(&self) -> (u32, u32) {
        self.state.borrow().surface
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.state.borrow().textures.len()
    }

    /// Total `write_instance_buffer` calls.
    #[must_use]
    pub fn buffer_writes(&self) -> u64 {
        self.state.borrow().buffer_writes
    }

    /// Total `upload_atlas_page` calls.
    #[must_use]
    pub fn texture_uploads(&self) -> u64 {
        self.state.borrow().texture_uploads
    }

    /// `(page, width, height, uploaded version)` of every live texture,
    /// sorted by page.
    #[must_use]
    pub fn textures(&self) -> Vec<(u32, u32, u32, Option<u64>)> {
        let state = self.state.borrow();
        let mut out: Vec<_> = state
            .textures
            .values()
            .map(|t| (t.page, t.width, t.height, t.uploaded_version))
            .collect();
        out.sort_unstable_by_key(|t| t.0);
        out
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.state.borrow().released
    }

    fn alloc_handle(state: &mut HeadlessState) -> u32 {
        state.next_handle += 1;
        state.next_handle
    }
}

impl GpuBackend for HeadlessBackend {
    fn kind(&self) -> BackendKind {
        self.state.borrow().kind
    }

    fn capabilities(&self) -> BackendCapabilities {
        let state = self.state.borrow();
        BackendCapabilities {
            kind: state.kind,
            max_texture_dimension: 4096,
            max_atlas_pages: state.max_atlas_pages,
        }
    }

    fn is_ready(&self) -> bool {
        let state = self.state.borrow();
        state.ready && !state.released && !state.lost
    }

    fn is_lost(&self) -> bool {
        self.state.borrow().lost
    }

    fn configure_surface(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::Surface(format!(
                "zero-sized surface {width}x{height}"
            )));
        }
        self.state.borrow_mut().surface = (width, height);
        Ok(())
    }

    fn create_instance_buffer(
        &mut self,
        layout: InstanceLayout,
        byte_len: u64,
    ) -> Result<BufferHandle, BackendError> {
        let mut state = self.state.borrow_mut();
        let id = Self::alloc_handle(&mut state);
        state.buffers.insert(
            id,
            HeadlessBuffer {
                layout,
                byte_len,
                data: Vec::new(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_instance_buffer(
        &mut self,
        buffer: BufferHandle,
        data: &[f32],
    ) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        let buf = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle)?;
        if (data.len() * 4) as u64 > buf.byte_len {
            return Err(BackendError::OutOfMemory);
        }
        buf.data.clear();
        buf.data.extend_from_slice(data);
        state.buffer_writes += 1;
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.state.borrow_mut().buffers.remove(&buffer.0);
    }

    fn create_atlas_texture(
        &mut self,
        page: u32,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle, BackendError> {
        let mut state = self.state.borrow_mut();
        if page >= state.max_atlas_pages {
            return Err(BackendError::Unsupported("atlas page index exceeds bind slots"));
        }
        let id = Self::alloc_handle(&mut state);
        state.textures.insert(
            id,
            HeadlessTexture {
                page,
                width,
                height,
                uploaded_version: None,
            },
        );
        Ok(TextureHandle(id))
    }

    fn upload_atlas_page(
        &mut self,
        texture: TextureHandle,
        page: &AtlasPage,
    ) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        let tex = state
            .textures
            .get_mut(&texture.0)
            .ok_or(BackendError::InvalidHandle)?;
        if tex.width != page.width || tex.height != page.height {
            return Err(BackendError::Surface(format!(
                "page {}x{} does not fit texture {}x{}",
                page.width, page.height, tex.width, tex.height
            )));
        }
        tex.uploaded_version = Some(page.version);
        state.texture_uploads += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.state.borrow_mut().textures.remove(&texture.0);
    }

    fn begin_frame(&mut self, clear: [f32; 4]) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        if std::mem::take(&mut state.lose_device_on_next_frame) {
            Self::mark_lost(&mut state);
        }
        if state.lost {
            return Err(BackendError::DeviceLost("simulated context loss".to_owned()));
        }
        state.current = Some(RecordedFrame {
            clear,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw_instanced(&mut self, draw: DrawCall) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        let stride = draw.layout.stride();
        let instances = {
            let buf = state
                .buffers
                .get(&draw.buffer.0)
                .ok_or(BackendError::InvalidHandle)?;
            debug_assert_eq!(buf.layout, draw.layout);
            let len = (draw.instance_count as usize * stride).min(buf.data.len());
            buf.data[..len].to_vec()
        };
        let frame = state
            .current
            .as_mut()
            .ok_or_else(|| BackendError::Surface("draw outside of a frame".to_owned()))?;
        frame.draws.push(RecordedDraw {
            layout: draw.layout,
            instance_count: draw.instance_count,
            instances,
        });
        Ok(())
    }

    fn submit_frame(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        let frame = state
            .current
            .take()
            .ok_or_else(|| BackendError::Surface("submit without begin_frame".to_owned()))?;
        state.frames.push(frame);
        state.frames_submitted += 1;
        let excess = state.frames.len().saturating_sub(state.frame_history);
        state.frames.drain(..excess);
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.state.borrow_mut();
        state.buffers.clear();
        state.textures.clear();
        state.current = None;
        state.released = true;
    }
}
