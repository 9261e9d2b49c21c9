//! Instance arrays and their GPU buffers.
//!
//! CPU-side arrays grow geometrically (doubling, capped at the worst case for
//! the grid) and never shrink while the grid size is unchanged. GPU buffers
//! follow the same rule: they are recreated only when an upload would not
//! fit.

use crate::backend::{BackendError, BufferHandle, DrawCall, GpuBackend, InstanceLayout};

/// Growable float array holding `count` instances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vertices {
    pub attributes: Vec<f32>,
    pub count: usize,
}

impl Vertices {
    #[must_use]
    pub fn with_capacity(floats: usize) -> Self {
        Self {
            attributes: vec![0.0; floats],
            count: 0,
        }
    }

    /// Make room for `required` floats, doubling up to `max` floats.
    pub fn ensure_len(&mut self, required: usize, max: usize) {
        if self.attributes.len() >= required {
            return;
        }
        let mut len = self.attributes.len().max(1);
        while len < required {
            len = len.saturating_mul(2);
        }
        let len = len.min(max.max(required));
        self.attributes.resize(len, 0.0);
    }

    /// The live prefix for `stride` floats per instance.
    #[must_use]
    pub fn live(&self, stride: usize) -> &[f32] {
        &self.attributes[..self.count * stride]
    }
}

/// Compact the populated prefix of each row into `staging`.
///
/// `source` holds `cols` instances of `stride` floats per row; only the first
/// `line_lengths[y]` instances of row `y` are copied.
pub fn stage_rows(
    source: &[f32],
    cols: usize,
    stride: usize,
    line_lengths: &[u32],
    staging: &mut Vec<f32>,
) {
    staging.clear();
    for (y, &len) in line_lengths.iter().enumerate() {
        let start = y * cols * stride;
        let end = start + (len as usize).min(cols) * stride;
        if let Some(row) = source.get(start..end) {
            staging.extend_from_slice(row);
        }
    }
}

/// A device instance buffer that is recreated when it is too small.
#[derive(Debug)]
pub struct InstanceBuffer {
    layout: InstanceLayout,
    handle: Option<BufferHandle>,
    capacity_bytes: u64,
}

impl InstanceBuffer {
    #[must_use]
    pub const fn new(layout: InstanceLayout) -> Self {
        Self {
            layout,
            handle: None,
            capacity_bytes: 0,
        }
    }

    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Upload `data` and issue an instanced draw of `data.len() / stride`
    /// instances. Empty data draws nothing.
    pub fn upload_and_draw(
        &mut self,
        backend: &mut dyn GpuBackend,
        data: &[f32],
    ) -> Result<u32, BackendError> {
        let stride = self.layout.stride();
        let count = data.len() / stride;
        if count == 0 {
            return Ok(0);
        }
        let handle = self.ensure(backend, (data.len() * 4) as u64)?;
        backend.write_instance_buffer(handle, data)?;
        backend.draw_instanced(DrawCall {
            layout: self.layout,
            buffer: handle,
            instance_count: count as u32,
        })?;
        Ok(count as u32)
    }

    fn ensure(
        &mut self,
        backend: &mut dyn GpuBackend,
        required_bytes: u64,
    ) -> Result<BufferHandle, BackendError> {
        if let Some(handle) = self.handle
            && self.capacity_bytes >= required_bytes
        {
            return Ok(handle);
        }
        if let Some(old) = self.handle.take() {
            backend.destroy_buffer(old);
        }
        let size = required_bytes.max(self.capacity_bytes.saturating_mul(2));
        let handle = backend.create_instance_buffer(self.layout, size)?;
        self.handle = Some(handle);
        self.capacity_bytes = size;
        Ok(handle)
    }

    /// Destroy the device buffer.
    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(handle) = self.handle.take() {
            backend.destroy_buffer(handle);
        }
        self.capacity_bytes = 0;
    }

    /// Drop the handle without touching the device (after device loss).
    pub fn forget(&mut self) {
        self.handle = None;
        self.capacity_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, HeadlessBackend};

    #[test]
    fn vertices_double_until_capped() {
        let mut v = Vertices::with_capacity(16);
        v.ensure_len(17, 100);
        assert_eq!(v.attributes.len(), 32);
        v.ensure_len(70, 100);
        assert_eq!(v.attributes.len(), 100);
        v.ensure_len(10, 100);
        assert_eq!(v.attributes.len(), 100);
    }

    #[test]
    fn stage_rows_respects_line_lengths() {
        // 2 rows x 3 cols, stride 2.
        let source: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let mut staging = Vec::new();
        stage_rows(&source, 3, 2, &[1, 3], &mut staging);
        assert_eq!(staging, vec![0.0, 1.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
        stage_rows(&source, 3, 2, &[0, 0], &mut staging);
        assert!(staging.is_empty());
    }

    #[test]
    fn buffer_is_reused_until_it_overflows() {
        let probe = HeadlessBackend::new(BackendKind::WebGpu);
        let mut backend = probe.clone();
        let mut buf = InstanceBuffer::new(InstanceLayout::Rectangle);
        backend.begin_frame([0.0; 4]).unwrap();

        assert_eq!(buf.upload_and_draw(&mut backend, &[0.0; 8]).unwrap(), 1);
        assert_eq!(buf.capacity_bytes(), 32);
        assert_eq!(buf.upload_and_draw(&mut backend, &[0.0; 8]).unwrap(), 1);
        assert_eq!(probe.live_buffers(), 1);

        assert_eq!(buf.upload_and_draw(&mut backend, &[0.0; 24]).unwrap(), 3);
        assert_eq!(buf.capacity_bytes(), 96);
        assert_eq!(probe.live_buffers(), 1);

        assert_eq!(buf.upload_and_draw(&mut backend, &[]).unwrap(), 0);
        buf.release(&mut backend);
        assert_eq!(probe.live_buffers(), 0);
    }
}
