//! wgpu backend for the browser.
//!
//! One adapter type serves both graphics APIs: [`BackendKind::WebGpu`] asks
//! wgpu for the browser WebGPU backend, [`BackendKind::WebGl2`] for its GL
//! backend. Both pipelines draw a four-vertex unit quad per instance as a
//! triangle strip; the instance arrays produced by the batchers are bound
//! as per-instance vertex buffers unchanged.
//!
//! Draws are recorded between `begin_frame` and `submit_frame` and encoded
//! into a single render pass on submit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use web_sys::HtmlCanvasElement;

use super::{
    BackendCapabilities, BackendError, BackendKind, BufferHandle, DrawCall, GpuBackend,
    InstanceLayout, TextureHandle, floats_to_bytes,
};
use crate::atlas::AtlasPage;
use crate::config::RendererOptions;

/// Glyph page textures bound at once (bindings 2..6 of the glyph pipeline).
const MAX_ATLAS_PAGES: u32 = 4;

const UNIFORM_BYTES: u64 = 16;

/// Unit quad corners for a triangle strip.
const QUAD_CORNERS: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

const RECTANGLE_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![1 => Float32x4, 2 => Float32x4];

const GLYPH_ATTRIBUTES: [wgpu::VertexAttribute; 6] = wgpu::vertex_attr_array![
    1 => Float32x2,
    2 => Float32x2,
    3 => Float32,
    4 => Float32x2,
    5 => Float32x2,
    6 => Float32x2
];

// ---------------------------------------------------------------------------
// WGSL shaders (inline)
// ---------------------------------------------------------------------------

const RECTANGLE_SHADER_WGSL: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_main(
    @location(0) corner: vec2<f32>,
    @location(1) rect: vec4<f32>,
    @location(2) color: vec4<f32>,
) -> VertexOutput {
    let p = rect.xy + corner * rect.zw;
    var out: VertexOutput;
    out.position = vec4<f32>(p.x * 2.0 - 1.0, 1.0 - p.y * 2.0, 0.0, 1.0);
    out.color = color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

const GLYPH_SHADER_WGSL: &str = r#"
struct Uniforms {
    // Canvas size in device pixels.
    resolution: vec2<f32>,
    _pad: vec2<f32>,
};

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var atlas_sampler: sampler;
@group(0) @binding(2) var page0: texture_2d<f32>;
@group(0) @binding(3) var page1: texture_2d<f32>;
@group(0) @binding(4) var page2: texture_2d<f32>;
@group(0) @binding(5) var page3: texture_2d<f32>;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) @interpolate(flat) page: u32,
};

@vertex
fn vs_main(
    @location(0) corner: vec2<f32>,
    @location(1) offset: vec2<f32>,
    @location(2) size: vec2<f32>,
    @location(3) page: f32,
    @location(4) tex_pos: vec2<f32>,
    @location(5) tex_size: vec2<f32>,
    @location(6) cell_pos: vec2<f32>,
) -> VertexOutput {
    let origin = cell_pos + offset / uniforms.resolution;
    let p = origin + corner * size;
    var out: VertexOutput;
    out.position = vec4<f32>(p.x * 2.0 - 1.0, 1.0 - p.y * 2.0, 0.0, 1.0);
    out.uv = tex_pos + corner * tex_size;
    out.page = u32(page);
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    switch in.page {
        case 0u: { return textureSampleLevel(page0, atlas_sampler, in.uv, 0.0); }
        case 1u: { return textureSampleLevel(page1, atlas_sampler, in.uv, 0.0); }
        case 2u: { return textureSampleLevel(page2, atlas_sampler, in.uv, 0.0); }
        default: { return textureSampleLevel(page3, atlas_sampler, in.uv, 0.0); }
    }
}
"#;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

struct GpuBuffer {
    buffer: wgpu::Buffer,
    layout: InstanceLayout,
    byte_len: u64,
}

struct GpuTexture {
    page: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct PendingFrame {
    clear: [f32; 4],
    draws: Vec<DrawCall>,
}

pub struct WgpuBackend {
    kind: BackendKind,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    max_texture_dimension: u32,
    device_lost: Arc<AtomicBool>,

    rectangle_pipeline: wgpu::RenderPipeline,
    glyph_pipeline: wgpu::RenderPipeline,
    glyph_bind_group_layout: wgpu::BindGroupLayout,
    glyph_bind_group: Option<wgpu::BindGroup>,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    quad_buffer: wgpu::Buffer,
    placeholder_view: wgpu::TextureView,

    buffers: HashMap<u32, GpuBuffer>,
    textures: HashMap<u32, GpuTexture>,
    next_handle: u32,
    frame: Option<PendingFrame>,
    released: bool,
}

impl WgpuBackend {
    /// Initialize the backend named by `options.backend`, falling back along
    /// [`BackendKind::fallback_chain`] while the browser reports the kind as
    /// unsupported.
    pub async fn init_preferred(
        canvas: HtmlCanvasElement,
        options: &RendererOptions,
    ) -> Result<Self, BackendError> {
        let mut last = BackendError::Unsupported("no backend kind to try");
        for &kind in options.backend.fallback_chain() {
            match Self::init(canvas.clone(), kind).await {
                Ok(backend) => return Ok(backend),
                Err(BackendError::Unsupported(_reason)) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(%kind, reason = _reason, "backend unsupported, trying next");
                    last = BackendError::Unsupported(_reason);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last)
    }

    /// Acquire an adapter and device for `canvas` and build both pipelines.
    ///
    /// Fails with [`BackendError::Unsupported`] when the browser offers no
    /// adapter for `kind`; hosts fall back to the other kind.
    pub async fn init(
        canvas: HtmlCanvasElement,
        kind: BackendKind,
    ) -> Result<Self, BackendError> {
        let width = canvas.width().max(1);
        let height = canvas.height().max(1);
        let backends = match kind {
            BackendKind::WebGpu => wgpu::Backends::BROWSER_WEBGPU,
            BackendKind::WebGl2 => wgpu::Backends::GL,
        };
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(wgpu::SurfaceTarget::Canvas(canvas))
            .map_err(|e| BackendError::Surface(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| BackendError::Unsupported("no compatible GPU adapter"))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("frankenterm-gpu"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_webgl2_defaults(),
                ..Default::default()
            })
            .await
            .map_err(|e| BackendError::DeviceLost(e.to_string()))?;

        let device_lost = Arc::new(AtomicBool::new(false));
        {
            let flag = Arc::clone(&device_lost);
            device.set_device_lost_callback(move |_reason, _message| {
                flag.store(true, Ordering::Release);
            });
        }

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .first()
            .copied()
            .unwrap_or(wgpu::TextureFormat::Bgra8Unorm);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &surface_config);

        let rectangle_pipeline = create_rectangle_pipeline(&device, format);
        let glyph_bind_group_layout = create_glyph_bind_group_layout(&device);
        let glyph_pipeline = create_glyph_pipeline(&device, format, &glyph_bind_group_layout);

        let quad_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("unit_quad"),
            size: (QUAD_CORNERS.len() * 4) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&quad_buffer, 0, &floats_to_bytes(&QUAD_CORNERS));

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glyph_uniforms"),
            size: UNIFORM_BYTES,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(
            &uniform_buffer,
            0,
            &floats_to_bytes(&[width as f32, height as f32, 0.0, 0.0]),
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("glyph_atlas_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        // 1x1 placeholder bound to every page slot without an atlas texture.
        let placeholder = create_page_texture(&device, 1, 1);
        write_page_pixels(&queue, &placeholder, 1, 1, &[0, 0, 0, 0]);
        let placeholder_view = placeholder.create_view(&wgpu::TextureViewDescriptor::default());

        let max_texture_dimension = device.limits().max_texture_dimension_2d;

        #[cfg(feature = "tracing")]
        tracing::info!(%kind, ?format, width, height, max_texture_dimension, "wgpu backend ready");

        Ok(Self {
            kind,
            device,
            queue,
            surface,
            surface_config,
            max_texture_dimension,
            device_lost,
            rectangle_pipeline,
            glyph_pipeline,
            glyph_bind_group_layout,
            glyph_bind_group: None,
            sampler,
            uniform_buffer,
            quad_buffer,
            placeholder_view,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            next_handle: 0,
            frame: None,
            released: false,
        })
    }

    fn alloc_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn check_device(&self) -> Result<(), BackendError> {
        if self.device_lost.load(Ordering::Acquire) {
            return Err(BackendError::DeviceLost("device lost".to_owned()));
        }
        Ok(())
    }

    /// Bind the newest texture of each page slot, placeholders elsewhere.
    fn rebuild_glyph_bind_group(&mut self) {
        let mut views: [&wgpu::TextureView; MAX_ATLAS_PAGES as usize] =
            [&self.placeholder_view; MAX_ATLAS_PAGES as usize];
        let mut newest = [0_u32; MAX_ATLAS_PAGES as usize];
        for (id, texture) in &self.textures {
            let slot = texture.page as usize;
            if *id > newest[slot] {
                newest[slot] = *id;
                views[slot] = &texture.view;
            }
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("glyph_bg"),
            layout: &self.glyph_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(views[0]),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(views[1]),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(views[2]),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(views[3]),
                },
            ],
        });
        self.glyph_bind_group = Some(bind_group);
    }
}

impl GpuBackend for WgpuBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            kind: self.kind,
            max_texture_dimension: self.max_texture_dimension,
            max_atlas_pages: MAX_ATLAS_PAGES,
        }
    }

    fn is_ready(&self) -> bool {
        !self.released && !self.is_lost()
    }

    fn is_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }

    fn configure_surface(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        self.check_device()?;
        if width == 0 || height == 0 {
            return Err(BackendError::Surface(format!(
                "zero-sized surface {width}x{height}"
            )));
        }
        if width > self.max_texture_dimension || height > self.max_texture_dimension {
            return Err(BackendError::Surface(format!(
                "surface {width}x{height} exceeds {}",
                self.max_texture_dimension
            )));
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        self.queue.write_buffer(
            &self.uniform_buffer,
            0,
            &floats_to_bytes(&[width as f32, height as f32, 0.0, 0.0]),
        );
        Ok(())
    }

    fn create_instance_buffer(
        &mut self,
        layout: InstanceLayout,
        byte_len: u64,
    ) -> Result<BufferHandle, BackendError> {
        self.check_device()?;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(match layout {
                InstanceLayout::Rectangle => "rectangle_instances",
                InstanceLayout::Glyph => "glyph_instances",
            }),
            size: byte_len.max(4),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = self.alloc_handle();
        self.buffers.insert(
            id,
            GpuBuffer {
                buffer,
                layout,
                byte_len,
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_instance_buffer(
        &mut self,
        buffer: BufferHandle,
        data: &[f32],
    ) -> Result<(), BackendError> {
        let buf = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::InvalidHandle)?;
        if (data.len() * 4) as u64 > buf.byte_len {
            return Err(BackendError::OutOfMemory);
        }
        if !data.is_empty() {
            self.queue.write_buffer(&buf.buffer, 0, &floats_to_bytes(data));
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buf) = self.buffers.remove(&buffer.0) {
            buf.buffer.destroy();
        }
    }

    fn create_atlas_texture(
        &mut self,
        page: u32,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle, BackendError> {
        self.check_device()?;
        if page >= MAX_ATLAS_PAGES {
            return Err(BackendError::Unsupported("atlas page index exceeds bind slots"));
        }
        let texture = create_page_texture(&self.device, width.max(1), height.max(1));
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.alloc_handle();
        self.textures.insert(
            id,
            GpuTexture {
                page,
                texture,
                view,
                width: width.max(1),
                height: height.max(1),
            },
        );
        self.rebuild_glyph_bind_group();
        Ok(TextureHandle(id))
    }

    fn upload_atlas_page(
        &mut self,
        texture: TextureHandle,
        page: &AtlasPage,
    ) -> Result<(), BackendError> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::InvalidHandle)?;
        if tex.width != page.width || tex.height != page.height {
            return Err(BackendError::Surface(format!(
                "page {}x{} does not fit texture {}x{}",
                page.width, page.height, tex.width, tex.height
            )));
        }
        write_page_pixels(&self.queue, &tex.texture, page.width, page.height, &page.pixels);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(&texture.0) {
            tex.texture.destroy();
            self.rebuild_glyph_bind_group();
        }
    }

    fn begin_frame(&mut self, clear: [f32; 4]) -> Result<(), BackendError> {
        self.check_device()?;
        if self.glyph_bind_group.is_none() {
            self.rebuild_glyph_bind_group();
        }
        self.frame = Some(PendingFrame {
            clear,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw_instanced(&mut self, draw: DrawCall) -> Result<(), BackendError> {
        if !self.buffers.contains_key(&draw.buffer.0) {
            return Err(BackendError::InvalidHandle);
        }
        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| BackendError::Surface("draw outside of a frame".to_owned()))?;
        frame.draws.push(draw);
        Ok(())
    }

    fn submit_frame(&mut self) -> Result<(), BackendError> {
        self.check_device()?;
        let frame = self
            .frame
            .take()
            .ok_or_else(|| BackendError::Surface("submit without begin_frame".to_owned()))?;

        let output = self
            .surface
            .get_current_texture()
            .map_err(|e| BackendError::Surface(e.to_string()))?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame"),
            });

        {
            let [r, g, b, a] = frame.clear.map(f64::from);
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("terminal_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            pass.set_vertex_buffer(0, self.quad_buffer.slice(..));
            for draw in &frame.draws {
                let Some(buf) = self.buffers.get(&draw.buffer.0) else {
                    continue;
                };
                debug_assert_eq!(buf.layout, draw.layout);
                match draw.layout {
                    InstanceLayout::Rectangle => pass.set_pipeline(&self.rectangle_pipeline),
                    InstanceLayout::Glyph => {
                        let Some(bind_group) = self.glyph_bind_group.as_ref() else {
                            continue;
                        };
                        pass.set_pipeline(&self.glyph_pipeline);
                        pass.set_bind_group(0, bind_group, &[]);
                    }
                }
                pass.set_vertex_buffer(1, buf.buffer.slice(..));
                pass.draw(0..4, 0..draw.instance_count);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn release(&mut self) {
        for (_, buf) in self.buffers.drain() {
            buf.buffer.destroy();
        }
        for (_, tex) in self.textures.drain() {
            tex.texture.destroy();
        }
        self.glyph_bind_group = None;
        self.frame = None;
        self.released = true;
    }
}

// ---------------------------------------------------------------------------
// Pipeline construction
// ---------------------------------------------------------------------------

fn quad_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: 8,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &QUAD_ATTRIBUTES,
    }
}

fn instance_layout(layout: InstanceLayout) -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: (layout.stride() * 4) as u64,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: match layout {
            InstanceLayout::Rectangle => &RECTANGLE_ATTRIBUTES,
            InstanceLayout::Glyph => &GLYPH_ATTRIBUTES,
        },
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    label: &str,
    shader_source: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    layout: InstanceLayout,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(shader_source.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        immediate_size: 0,
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[quad_layout(), instance_layout(layout)],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

fn create_rectangle_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    create_pipeline(
        device,
        format,
        "rectangle_pipeline",
        RECTANGLE_SHADER_WGSL,
        &[],
        InstanceLayout::Rectangle,
    )
}

fn create_glyph_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    bind_group_layout: &wgpu::BindGroupLayout,
) -> wgpu::RenderPipeline {
    create_pipeline(
        device,
        format,
        "glyph_pipeline",
        GLYPH_SHADER_WGSL,
        &[bind_group_layout],
        InstanceLayout::Glyph,
    )
}

fn create_glyph_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let page_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("glyph_bgl"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            page_entry(2),
            page_entry(3),
            page_entry(4),
            page_entry(5),
        ],
    })
}

fn create_page_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("glyph_atlas_page"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

fn write_page_pixels(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    pixels: &[u8],
) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}
