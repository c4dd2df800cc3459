//! wgpu render backend. Outputs are rendered into offscreen colour
//! attachments; the embedder scans them out (or wraps this backend's
//! textures into its swapchain). Client shm buffers upload through the
//! queue; dmabuf and EGL-stream import require driver entry points wgpu
//! does not expose, so those buffers report as import failures and paint
//! the fallback colour.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::backend::{
    CompositingType, DrawParams, FrameTimings, PresentFeedback, RenderBackend, StreamingBuffer,
    TextureRef,
};
use crate::buffer::{ClientBuffer, ShmBuffer};
use crate::core::{OutputId, Rgba8Premul};
use crate::error::{LucentError, LucentResult};
use crate::output::Output;
use crate::quad::WindowQuadList;
use crate::region::{PixelRect, Region};
use crate::shader::{ShaderId, ShaderSource, ShaderTraits};
use crate::target::{RenderTargetId, RenderTargetInfo, TargetFormat};
use crate::texture::{SurfaceTextureProvider, Texture, TextureHandle};

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Vertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Uniforms {
    /// opacity, brightness, saturation, pad
    factors: [f32; 4],
    /// blur dir x, blur dir y, radius, sigma
    blur: [f32; 4],
    /// uniform colour (premultiplied)
    color: [f32; 4],
    /// texture size in texels, pad
    tex_size: [f32; 4],
}

struct Attachment {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct ClientTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct Pipelines {
    blend: wgpu::RenderPipeline,
    replace: wgpu::RenderPipeline,
    custom: bool,
}

type TextureRegistry = Rc<RefCell<BTreeMap<u64, ClientTexture>>>;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

fn make_attachment(device: &wgpu::Device, width: u32, height: u32) -> Attachment {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("lucent_attachment"),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Attachment { texture, view, width, height }
}

/// Generates the WGSL program for a built-in trait combination.
fn builtin_wgsl(traits: ShaderTraits) -> String {
    let mut fs_body = String::new();
    if traits.contains(ShaderTraits::UNIFORM_COLOR) {
        fs_body.push_str("    var px = params.color;\n");
    } else if traits.contains(ShaderTraits::BLUR_1D) {
        fs_body.push_str(
            r#"    var px = vec4<f32>(0.0);
    let radius = i32(params.blur.z);
    let sigma = max(params.blur.w, 0.0001);
    let step = params.blur.xy / max(params.tex_size.xy, vec2<f32>(1.0));
    var weight_sum = 0.0;
    for (var i = -radius; i <= radius; i = i + 1) {
        let x = f32(i);
        let w = exp(-x * x / (2.0 * sigma * sigma));
        px = px + textureSample(t_content, s_content, in.uv + x * step) * w;
        weight_sum = weight_sum + w;
    }
    px = px / max(weight_sum, 0.0001);
"#,
        );
    } else {
        fs_body.push_str("    var px = textureSample(t_content, s_content, in.uv);\n");
    }
    if traits.contains(ShaderTraits::ADJUST_SATURATION) {
        fs_body.push_str(
            r#"    let luma = dot(px.rgb, vec3<f32>(0.2126, 0.7152, 0.0722));
    px = vec4<f32>(mix(vec3<f32>(luma), px.rgb, params.factors.z), px.a);
"#,
        );
    }
    if traits.contains(ShaderTraits::MODULATE) {
        fs_body.push_str("    px = vec4<f32>(px.rgb * params.factors.y, px.a);\n");
        fs_body.push_str("    px = px * params.factors.x;\n");
    }
    format!(
        r#"struct Uniforms {{
    factors: vec4<f32>,
    blur: vec4<f32>,
    color: vec4<f32>,
    tex_size: vec4<f32>,
}}

struct VertexOutput {{
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}}

@group(0) @binding(0) var t_content: texture_2d<f32>;
@group(0) @binding(1) var s_content: sampler;
@group(0) @binding(2) var<uniform> params: Uniforms;

@vertex
fn vs_main(@location(0) pos: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {{
    var out: VertexOutput;
    out.position = vec4<f32>(pos, 0.0, 1.0);
    out.uv = uv;
    return out;
}}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {{
{fs_body}    return px;
}}
"#
    )
}

/// Uploads shm buffers into device textures through the shared registry so
/// draw calls can resolve a [`TextureHandle`] back to its view.
struct GpuTextureProvider {
    id: u64,
    device: wgpu::Device,
    queue: wgpu::Queue,
    registry: TextureRegistry,
    handle: Option<TextureHandle>,
}

impl GpuTextureProvider {
    fn upload(&mut self, shm: &ShmBuffer, full: bool, damage: &Region) -> LucentResult<()> {
        if shm.width == 0 || shm.height == 0 {
            return Err(LucentError::buffer_import("shm buffer has zero size"));
        }
        let needed = shm.stride as usize * (shm.height as usize - 1) + (shm.width * 4) as usize;
        if shm.data.len() < needed {
            return Err(LucentError::buffer_import("shm pool too small"));
        }

        let recreate = full
            || self
                .handle
                .as_ref()
                .map(|h| h.width != shm.width || h.height != shm.height)
                .unwrap_or(true);
        if recreate {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("lucent_surface"),
                size: wgpu::Extent3d {
                    width: shm.width,
                    height: shm.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Bgra8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.registry
                .borrow_mut()
                .insert(self.id, ClientTexture { texture, view });
            self.handle = Some(Texture::new_cpu(self.id, shm.width, shm.height, Vec::new()));
        }

        let registry = self.registry.borrow();
        let entry = registry
            .get(&self.id)
            .ok_or_else(|| LucentError::buffer_import("texture registry entry missing"))?;

        let rows: Vec<PixelRect> = if recreate || damage.is_empty() {
            vec![PixelRect::new(0, 0, shm.width as i32, shm.height as i32)]
        } else {
            damage.rects().to_vec()
        };
        for rect in rows {
            let Some(rect) =
                rect.intersection(PixelRect::new(0, 0, shm.width as i32, shm.height as i32))
            else {
                continue;
            };
            let y0 = rect.y as usize;
            let x0 = rect.x as usize;
            let offset = y0 * shm.stride as usize + x0 * 4;
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &entry.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x: rect.x as u32, y: rect.y as u32, z: 0 },
                    aspect: wgpu::TextureAspect::All,
                },
                &shm.data[offset..],
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(shm.stride),
                    rows_per_image: None,
                },
                wgpu::Extent3d {
                    width: rect.width as u32,
                    height: rect.height as u32,
                    depth_or_array_layers: 1,
                },
            );
        }
        Ok(())
    }
}

impl SurfaceTextureProvider for GpuTextureProvider {
    fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    fn texture(&self) -> Option<TextureHandle> {
        self.handle.clone()
    }

    fn create(&mut self, buffer: &ClientBuffer) -> LucentResult<()> {
        match buffer {
            ClientBuffer::Shm(shm) => self.upload(shm, true, &Region::new()),
            other => Err(LucentError::buffer_import(format!(
                "{} import is not available on this backend",
                other.kind_name()
            ))),
        }
    }

    fn update(&mut self, buffer: &ClientBuffer, damage: &Region) -> LucentResult<()> {
        match buffer {
            ClientBuffer::Shm(shm) => self.upload(shm, false, damage),
            other => Err(LucentError::buffer_import(format!(
                "{} import is not available on this backend",
                other.kind_name()
            ))),
        }
    }
}

pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    screens: BTreeMap<OutputId, Attachment>,
    bound_screen: Option<OutputId>,
    targets: BTreeMap<RenderTargetId, Attachment>,
    bound_target: Option<RenderTargetId>,
    pipelines: BTreeMap<ShaderId, Pipelines>,
    builtin_ids: BTreeMap<u32, ShaderId>,
    bind_group_layout: wgpu::BindGroupLayout,
    custom_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniforms: wgpu::Buffer,
    vertices: wgpu::Buffer,
    vertices_capacity: u64,
    white: ClientTexture,
    registry: TextureRegistry,
    stream: StreamingBuffer,
    timestamps: Option<wgpu::QuerySet>,
    timestamp_resolve: Option<wgpu::Buffer>,
    timestamp_read: Option<wgpu::Buffer>,
    next_shader: u64,
    next_texture: u64,
    next_target: u64,
    frame_started: Option<Instant>,
    last_timings: FrameTimings,
    stuck_frames: u32,
}

impl GpuBackend {
    pub fn new() -> LucentResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                LucentError::validation("no gpu adapter available")
            }
            other => LucentError::validation(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let timestamps_supported = adapter
            .features()
            .contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if timestamps_supported {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features,
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| LucentError::validation(format!("wgpu request_device failed: {e:?}")))?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("lucent_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lucent_uniforms"),
            size: std::mem::size_of::<Uniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let vertices_capacity = 4096;
        let vertices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lucent_stream_vertices"),
            size: vertices_capacity,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lucent_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: std::num::NonZeroU64::new(
                            std::mem::size_of::<Uniforms>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        let custom_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lucent_custom_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let white_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("lucent_white"),
            size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &white_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255, 255, 255, 255],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: None,
            },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );
        let white_view = white_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let (timestamps, timestamp_resolve, timestamp_read) = if timestamps_supported {
            let qs = device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("lucent_frame_timestamps"),
                ty: wgpu::QueryType::Timestamp,
                count: 2,
            });
            let resolve = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("lucent_timestamp_resolve"),
                size: 16,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let read = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("lucent_timestamp_read"),
                size: 16,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            (Some(qs), Some(resolve), Some(read))
        } else {
            (None, None, None)
        };

        Ok(Self {
            device,
            queue,
            screens: BTreeMap::new(),
            bound_screen: None,
            targets: BTreeMap::new(),
            bound_target: None,
            pipelines: BTreeMap::new(),
            builtin_ids: BTreeMap::new(),
            bind_group_layout,
            custom_layout,
            sampler,
            uniforms,
            vertices,
            vertices_capacity,
            white: ClientTexture { texture: white_texture, view: white_view },
            registry: Rc::new(RefCell::new(BTreeMap::new())),
            stream: StreamingBuffer::default(),
            timestamps,
            timestamp_resolve,
            timestamp_read,
            next_shader: 0,
            next_texture: 0,
            next_target: 0,
            frame_started: None,
            last_timings: FrameTimings::default(),
            stuck_frames: 0,
        })
    }

    pub fn streaming_buffer(&mut self) -> &mut StreamingBuffer {
        &mut self.stream
    }

    fn dest(&self) -> LucentResult<&Attachment> {
        match self.bound_target {
            Some(id) => self
                .targets
                .get(&id)
                .ok_or_else(|| LucentError::render_target("bound target was destroyed")),
            None => {
                let screen = self
                    .bound_screen
                    .ok_or_else(|| LucentError::validation("no screen bound"))?;
                self.screens
                    .get(&screen)
                    .ok_or_else(|| LucentError::validation("bound screen has no attachment"))
            }
        }
    }

    fn build_pipelines(&self, module: &wgpu::ShaderModule, custom: bool) -> Pipelines {
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("lucent_pl"),
                bind_group_layouts: &[if custom {
                    &self.custom_layout
                } else {
                    &self.bind_group_layout
                }],
                push_constant_ranges: &[],
            });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRIBUTES,
        };

        let make = |blend: wgpu::BlendState| {
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("lucent_pipeline"),
                    layout: Some(&layout),
                    vertex: wgpu::VertexState {
                        module,
                        entry_point: Some("vs_main"),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        buffers: std::slice::from_ref(&vertex_layout),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module,
                        entry_point: Some("fs_main"),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: wgpu::TextureFormat::Rgba8Unorm,
                            blend: Some(blend),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
        };

        Pipelines {
            blend: make(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
            replace: make(wgpu::BlendState::REPLACE),
            custom,
        }
    }

    fn builtin_shader_id(&mut self, traits: ShaderTraits) -> LucentResult<ShaderId> {
        if let Some(&id) = self.builtin_ids.get(&traits.bits()) {
            return Ok(id);
        }
        self.shader_from_source(&ShaderSource::Builtin(traits))
    }

    /// Uploads vertex data, growing the streaming vertex buffer as needed.
    fn upload_vertices(&mut self, verts: &[Vertex]) {
        let bytes: &[u8] = bytemuck::cast_slice(verts);
        if (bytes.len() as u64) > self.vertices_capacity {
            self.vertices_capacity = (bytes.len() as u64).next_power_of_two();
            self.vertices = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("lucent_stream_vertices"),
                size: self.vertices_capacity,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
        }
        self.queue.write_buffer(&self.vertices, 0, bytes);
    }

    fn resolve_view(&self, texture: &TextureRef<'_>) -> LucentResult<(wgpu::TextureView, f32, f32)> {
        match texture {
            TextureRef::Solid(_) => Ok((
                self.white.texture.create_view(&wgpu::TextureViewDescriptor::default()),
                1.0,
                1.0,
            )),
            TextureRef::Handle(handle) => {
                let registry = self.registry.borrow();
                let entry = registry.get(&handle.id).ok_or_else(|| {
                    LucentError::buffer_import("texture handle has no device texture")
                })?;
                Ok((
                    entry.texture.create_view(&wgpu::TextureViewDescriptor::default()),
                    handle.width as f32,
                    handle.height as f32,
                ))
            }
            TextureRef::Target(id) => {
                let att = self
                    .targets
                    .get(id)
                    .ok_or_else(|| LucentError::render_target("sampled target does not exist"))?;
                Ok((
                    att.texture.create_view(&wgpu::TextureViewDescriptor::default()),
                    att.width as f32,
                    att.height as f32,
                ))
            }
        }
    }
}

impl RenderBackend for GpuBackend {
    fn compositing_type(&self) -> CompositingType {
        CompositingType::Gpu
    }

    fn bind_screen(&mut self, output: &Output) -> LucentResult<()> {
        if !output.enabled {
            return Err(LucentError::output_removed(output.name.clone()));
        }
        let (w, h) = (output.device_width().max(1), output.device_height().max(1));
        let stale = self
            .screens
            .get(&output.id)
            .map(|a| a.width != w || a.height != h)
            .unwrap_or(true);
        if stale {
            let attachment = make_attachment(&self.device, w, h);
            self.screens.insert(output.id, attachment);
        }
        self.bound_screen = Some(output.id);
        self.bound_target = None;
        self.frame_started = Some(Instant::now());

        if let Some(qs) = &self.timestamps {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("lucent_frame_start"),
                });
            encoder.write_timestamp(qs, 0);
            self.queue.submit(Some(encoder.finish()));
        }
        Ok(())
    }

    fn present(
        &mut self,
        output: &Output,
        _damage: &Region,
        now: Duration,
    ) -> LucentResult<PresentFeedback> {
        if !output.enabled {
            return Err(LucentError::output_removed(output.name.clone()));
        }
        if self.bound_screen != Some(output.id) {
            return Err(LucentError::validation("present without a bound screen"));
        }

        let gpu = self.read_frame_gpu_time();
        let cpu = self
            .frame_started
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.last_timings = FrameTimings { cpu, gpu };
        if let Some(gpu) = gpu {
            if gpu > output.refresh * 4 {
                self.stuck_frames += 1;
            } else {
                self.stuck_frames = 0;
            }
        }
        Ok(PresentFeedback { timestamp: now })
    }

    fn make_texture(
        &mut self,
        _buffer: &ClientBuffer,
    ) -> LucentResult<Box<dyn SurfaceTextureProvider>> {
        self.next_texture += 1;
        Ok(Box::new(GpuTextureProvider {
            id: self.next_texture,
            device: self.device.clone(),
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            handle: None,
        }))
    }

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: TargetFormat,
    ) -> LucentResult<RenderTargetInfo> {
        if width == 0 || height == 0 {
            return Err(LucentError::render_target("zero-sized render target"));
        }
        self.next_target += 1;
        let id = RenderTargetId(self.next_target);
        self.targets.insert(id, make_attachment(&self.device, width, height));
        Ok(RenderTargetInfo { id, width, height, format })
    }

    fn destroy_render_target(&mut self, id: RenderTargetId) {
        self.targets.remove(&id);
        if self.bound_target == Some(id) {
            self.bound_target = None;
        }
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetId>) -> LucentResult<()> {
        if let Some(id) = target {
            if !self.targets.contains_key(&id) {
                return Err(LucentError::render_target("binding unknown target"));
            }
        }
        self.bound_target = target;
        Ok(())
    }

    fn blit(&mut self, source: RenderTargetId, dest: PixelRect) -> LucentResult<()> {
        if dest.is_empty() {
            return Ok(());
        }
        let quads = {
            let mut list = WindowQuadList::new();
            list.push(crate::quad::WindowQuad::from_rect(
                crate::quad::QuadKind::Contents,
                crate::core::ItemId(0),
                dest.to_logical(),
                kurbo::Rect::new(0.0, 0.0, 1.0, 1.0),
            ));
            list
        };
        let mut params = DrawParams::new(crate::core::Matrix4::IDENTITY);
        params.shader = Some(self.builtin_shader_id(ShaderTraits::MAP_TEXTURE)?);
        self.draw_quads(&quads, TextureRef::Target(source), &params)
    }

    fn blit_from_screen(&mut self, target: RenderTargetId, src: PixelRect) -> LucentResult<()> {
        let screen_id = self
            .bound_screen
            .ok_or_else(|| LucentError::validation("no screen bound"))?;
        let screen = self
            .screens
            .get(&screen_id)
            .ok_or_else(|| LucentError::validation("bound screen has no attachment"))?;
        let dst = self
            .targets
            .get(&target)
            .ok_or_else(|| LucentError::render_target("blit destination does not exist"))?;

        let clamped = src
            .intersection(PixelRect::new(0, 0, screen.width as i32, screen.height as i32))
            .unwrap_or(PixelRect::new(0, 0, 0, 0));
        if clamped.is_empty() {
            return Ok(());
        }
        let width = (clamped.width as u32).min(dst.width);
        let height = (clamped.height as u32).min(dst.height);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lucent_backdrop_copy"),
            });
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &screen.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: clamped.x as u32, y: clamped.y as u32, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn shader_from_source(&mut self, source: &ShaderSource) -> LucentResult<ShaderId> {
        let (wgsl, custom, traits_key) = match source {
            ShaderSource::Builtin(traits) => (builtin_wgsl(*traits), false, Some(traits.bits())),
            ShaderSource::Custom { vertex, fragment } => {
                (format!("{vertex}\n{fragment}"), true, None)
            }
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("lucent_shader"),
                source: wgpu::ShaderSource::Wgsl(wgsl.into()),
            });
        let pipelines = self.build_pipelines(&module, custom);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(LucentError::shader_compile(format!("{err}")));
        }
        self.next_shader += 1;
        let id = ShaderId(self.next_shader);
        self.pipelines.insert(id, pipelines);
        if let Some(bits) = traits_key {
            self.builtin_ids.insert(bits, id);
        }
        Ok(id)
    }

    fn draw_quads(
        &mut self,
        quads: &WindowQuadList,
        texture: TextureRef<'_>,
        params: &DrawParams,
    ) -> LucentResult<()> {
        if quads.is_empty() {
            return Ok(());
        }
        let shader = match (&texture, params.shader) {
            (TextureRef::Solid(_), _) => self.builtin_shader_id(ShaderTraits::UNIFORM_COLOR)?,
            (_, Some(id)) => id,
            (_, None) => {
                self.builtin_shader_id(ShaderTraits::MAP_TEXTURE | ShaderTraits::MODULATE)?
            }
        };

        let (dest_w, dest_h) = {
            let d = self.dest()?;
            (d.width, d.height)
        };

        // CPU-side transform to normalized device coordinates.
        self.stream.clear();
        for q in quads.iter() {
            let mapped: Vec<[f32; 4]> = q
                .verts
                .iter()
                .map(|v| {
                    let p = params.mvp.map_point(v.position);
                    [
                        (2.0 * p.x / f64::from(dest_w) - 1.0) as f32,
                        (1.0 - 2.0 * p.y / f64::from(dest_h)) as f32,
                        v.u as f32,
                        v.v as f32,
                    ]
                })
                .collect();
            for idx in [0usize, 1, 2, 0, 2, 3] {
                let m = mapped[idx];
                self.stream.push_vertex(m[0], m[1], m[2], m[3]);
            }
        }
        let verts: Vec<Vertex> = self
            .stream
            .data
            .chunks_exact(4)
            .map(|c| Vertex { pos: [c[0], c[1]], uv: [c[2], c[3]] })
            .collect();
        self.upload_vertices(&verts);

        let (view, tex_w, tex_h) = self.resolve_view(&texture)?;
        let solid = match texture {
            TextureRef::Solid(c) => c,
            _ => Rgba8Premul::TRANSPARENT,
        };
        let uniforms = Uniforms {
            factors: [
                params.opacity.clamp(0.0, 1.0) as f32,
                params.brightness.clamp(0.0, 1.0) as f32,
                params.saturation.clamp(0.0, 2.0) as f32,
                0.0,
            ],
            blur: [
                params.blur_direction.0 as f32,
                params.blur_direction.1 as f32,
                params.blur_radius as f32,
                params.blur_sigma as f32,
            ],
            color: [
                f32::from(solid.r) / 255.0,
                f32::from(solid.g) / 255.0,
                f32::from(solid.b) / 255.0,
                f32::from(solid.a) / 255.0,
            ],
            tex_size: [tex_w, tex_h, 0.0, 0.0],
        };
        self.queue
            .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let pipeline = self
            .pipelines
            .get(&shader)
            .ok_or_else(|| LucentError::shader_compile("unknown shader id"))?;
        let bind_group = if pipeline.custom {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("lucent_custom_bg"),
                layout: &self.custom_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            })
        } else {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("lucent_bg"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.uniforms.as_entire_binding(),
                    },
                ],
            })
        };

        let dest_view = &self.dest()?.view;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lucent_draw"),
            });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("lucent_quads"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: dest_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(&pipeline.blend);
            rp.set_vertex_buffer(0, self.vertices.slice(..));
            rp.set_bind_group(0, &bind_group, &[]);

            let clip_rects: Vec<PixelRect> = match &params.clip {
                Some(region) => region
                    .rects()
                    .iter()
                    .filter_map(|r| {
                        r.intersection(PixelRect::new(0, 0, dest_w as i32, dest_h as i32))
                    })
                    .collect(),
                None => vec![PixelRect::new(0, 0, dest_w as i32, dest_h as i32)],
            };
            for rect in clip_rects {
                rp.set_scissor_rect(
                    rect.x as u32,
                    rect.y as u32,
                    rect.width as u32,
                    rect.height as u32,
                );
                rp.draw(0..verts.len() as u32, 0..1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn clear(&mut self, region: &Region, color: Rgba8Premul) -> LucentResult<()> {
        if region.is_empty() {
            return Ok(());
        }
        let shader = self.builtin_shader_id(ShaderTraits::UNIFORM_COLOR)?;
        let (dest_w, dest_h) = {
            let d = self.dest()?;
            (d.width, d.height)
        };

        // Rect geometry in NDC, drawn with replace blending.
        self.stream.clear();
        for rect in region.rects() {
            let x0 = 2.0 * f64::from(rect.x) / f64::from(dest_w) - 1.0;
            let x1 = 2.0 * f64::from(rect.right()) / f64::from(dest_w) - 1.0;
            let y0 = 1.0 - 2.0 * f64::from(rect.y) / f64::from(dest_h);
            let y1 = 1.0 - 2.0 * f64::from(rect.bottom()) / f64::from(dest_h);
            let corners = [[x0, y0], [x1, y0], [x1, y1], [x0, y1]];
            for idx in [0usize, 1, 2, 0, 2, 3] {
                self.stream
                    .push_vertex(corners[idx][0] as f32, corners[idx][1] as f32, 0.0, 0.0);
            }
        }
        let verts: Vec<Vertex> = self
            .stream
            .data
            .chunks_exact(4)
            .map(|c| Vertex { pos: [c[0], c[1]], uv: [c[2], c[3]] })
            .collect();
        self.upload_vertices(&verts);

        let uniforms = Uniforms {
            factors: [1.0, 1.0, 1.0, 0.0],
            blur: [0.0; 4],
            color: [
                f32::from(color.r) / 255.0,
                f32::from(color.g) / 255.0,
                f32::from(color.b) / 255.0,
                f32::from(color.a) / 255.0,
            ],
            tex_size: [1.0, 1.0, 0.0, 0.0],
        };
        self.queue
            .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let pipeline = self
            .pipelines
            .get(&shader)
            .ok_or_else(|| LucentError::shader_compile("unknown shader id"))?;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lucent_clear_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.white.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniforms.as_entire_binding(),
                },
            ],
        });

        let dest_view = &self.dest()?.view;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lucent_clear"),
            });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("lucent_clear_rp"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: dest_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(&pipeline.replace);
            rp.set_vertex_buffer(0, self.vertices.slice(..));
            rp.set_bind_group(0, &bind_group, &[]);
            rp.draw(0..verts.len() as u32, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_pixel(&mut self, x: u32, y: u32) -> LucentResult<Rgba8Premul> {
        let dest = self.dest()?;
        if x >= dest.width || y >= dest.height {
            return Err(LucentError::validation("read_pixel out of bounds"));
        }
        let row = dest.height - 1 - y;

        let bytes_per_row = align_to(4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT).max(4);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lucent_pixel_readback"),
            size: u64::from(bytes_per_row),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lucent_pixel_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &dest.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y: row, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: None,
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| LucentError::validation(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| LucentError::validation("readback channel closed"))?
            .map_err(|e| LucentError::validation(format!("readback map failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let px = Rgba8Premul { r: mapped[0], g: mapped[1], b: mapped[2], a: mapped[3] };
        drop(mapped);
        buffer.unmap();
        Ok(px)
    }

    fn last_frame_timings(&self) -> FrameTimings {
        self.last_timings
    }

    fn gpu_looks_stuck(&self) -> bool {
        self.stuck_frames >= 3
    }

    fn reset_resources(&mut self) {
        self.targets.clear();
        self.bound_target = None;
        self.registry.borrow_mut().clear();
        self.pipelines.clear();
        self.builtin_ids.clear();
        self.stuck_frames = 0;
    }
}

impl GpuBackend {
    /// Resolves the frame's timestamp pair, if timer queries are available.
    fn read_frame_gpu_time(&mut self) -> Option<Duration> {
        let (qs, resolve, read) = match (&self.timestamps, &self.timestamp_resolve, &self.timestamp_read) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => return None,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lucent_frame_end"),
            });
        encoder.write_timestamp(qs, 1);
        encoder.resolve_query_set(qs, 0..2, resolve, 0);
        encoder.copy_buffer_to_buffer(resolve, 0, read, 0, 16);
        self.queue.submit(Some(encoder.finish()));

        let slice = read.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        if self.device.poll(wgpu::PollType::wait_indefinitely()).is_err() {
            return None;
        }
        if !matches!(rx.recv(), Ok(Ok(()))) {
            return None;
        }
        let mapped = slice.get_mapped_range();
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&mapped[..16]);
        drop(mapped);
        read.unmap();

        let start = u64::from_le_bytes(raw[0..8].try_into().ok()?);
        let end = u64::from_le_bytes(raw[8..16].try_into().ok()?);
        let period = f64::from(self.queue.get_timestamp_period());
        let nanos = (end.saturating_sub(start) as f64) * period;
        Some(Duration::from_nanos(nanos as u64))
    }
}
