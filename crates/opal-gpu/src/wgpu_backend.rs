use std::collections::HashMap;

use crate::{
    BlitDestination, BlitParams, ColorMask, DeviceCaps, DrawBuffers, DrawState, GpuError,
    RasterBackend, ScissorRect, StencilMode, TargetId,
};
use crate::stats::BackendStats;

const COLOR_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;
const DEPTH_ONLY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

#[derive(Debug)]
enum TargetKind {
    Color,
    Depth { stencil: bool },
}

#[derive(Debug)]
struct StoredTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    kind: TargetKind,
}

struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    offset: (i32, i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlitKey {
    format: wgpu::TextureFormat,
    mask: u8,
    stencil_gate: bool,
    wireframe: bool,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitUniforms {
    scale: [f32; 2],
    _pad: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceAcquireAction {
    /// Drop the frame and continue rendering.
    DropFrame,
    /// Reconfigure the surface and retry once.
    ReconfigureAndRetry,
    /// Treat the error as fatal.
    Fatal,
}

fn surface_acquire_action(err: &wgpu::SurfaceError) -> SurfaceAcquireAction {
    match err {
        wgpu::SurfaceError::Timeout => SurfaceAcquireAction::DropFrame,
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
            SurfaceAcquireAction::ReconfigureAndRetry
        }
        wgpu::SurfaceError::OutOfMemory => SurfaceAcquireAction::Fatal,
    }
}

/// Pick a surface format deterministically regardless of enumeration order.
///
/// The off-screen targets hold display-ready values, so linear formats come
/// first; an sRGB swapchain would re-encode already-encoded colors.
fn preferred_surface_format(formats: &[wgpu::TextureFormat]) -> wgpu::TextureFormat {
    for &preferred in [
        wgpu::TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::Rgba8UnormSrgb,
    ]
    .iter()
    {
        if formats.contains(&preferred) {
            return preferred;
        }
    }
    formats
        .first()
        .copied()
        .unwrap_or(wgpu::TextureFormat::Bgra8Unorm)
}

fn preferred_present_mode(modes: &[wgpu::PresentMode]) -> wgpu::PresentMode {
    if modes.contains(&wgpu::PresentMode::Fifo) {
        return wgpu::PresentMode::Fifo;
    }
    modes.first().copied().unwrap_or(wgpu::PresentMode::Fifo)
}

fn preferred_alpha_mode(modes: &[wgpu::CompositeAlphaMode]) -> wgpu::CompositeAlphaMode {
    if modes.contains(&wgpu::CompositeAlphaMode::Opaque) {
        return wgpu::CompositeAlphaMode::Opaque;
    }
    modes
        .first()
        .copied()
        .unwrap_or(wgpu::CompositeAlphaMode::Opaque)
}

fn negotiated_features(adapter: &wgpu::Adapter) -> wgpu::Features {
    let mut features = wgpu::Features::empty();
    if adapter
        .features()
        .contains(wgpu::Features::POLYGON_MODE_LINE)
    {
        features |= wgpu::Features::POLYGON_MODE_LINE;
    }
    features
}

fn map_color_writes(mask: ColorMask) -> wgpu::ColorWrites {
    let mut out = wgpu::ColorWrites::empty();
    if mask.contains(ColorMask::RED) {
        out |= wgpu::ColorWrites::RED;
    }
    if mask.contains(ColorMask::GREEN) {
        out |= wgpu::ColorWrites::GREEN;
    }
    if mask.contains(ColorMask::BLUE) {
        out |= wgpu::ColorWrites::BLUE;
    }
    if mask.contains(ColorMask::ALPHA) {
        out |= wgpu::ColorWrites::ALPHA;
    }
    out
}

fn padded_bytes_per_row(unpadded: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// `wgpu` implementation of [`RasterBackend`].
///
/// Target attachments and draw-buffer selection are tracked CPU-side; blit
/// passes, stencil/color clears, presentation, and readback are issued as
/// render passes and queue operations against the owned device.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCaps,

    targets: HashMap<u32, StoredTarget>,
    next_target: u32,

    color_attachments: [Option<TargetId>; 2],
    depth_attachment: Option<TargetId>,
    draw_buffers: DrawBuffers,
    state: DrawState,
    surface_bound: bool,

    surface: Option<SurfaceState>,
    pending_frame: Option<wgpu::SurfaceTexture>,
    /// Surface size reported in headless mode (no surface attached).
    nominal_surface_size: (u32, u32),

    blit_pipelines: HashMap<BlitKey, wgpu::RenderPipeline>,
    blit_layout: wgpu::BindGroupLayout,
    blit_shader: wgpu::ShaderModule,
    blit_uniforms: wgpu::Buffer,
    blit_sampler: wgpu::Sampler,

    stats: BackendStats,
}

impl WgpuBackend {
    /// Create a backend without a presentation surface.
    ///
    /// Intended for tests and offscreen rendering; [`BlitDestination::Surface`]
    /// blits and `recreate_surface` report `Unsupported`.
    pub async fn new_headless() -> Result<Self, GpuError> {
        let adapter = request_headless_adapter()
            .await
            .ok_or_else(|| GpuError::Backend("no suitable wgpu adapter found".into()))?;
        let (device, queue) = request_device(&adapter).await?;
        let caps = DeviceCaps::from_device(&device);
        Ok(Self::from_parts(device, queue, caps, None))
    }

    /// Create a backend presenting to an existing surface.
    pub async fn new_with_surface(
        instance: wgpu::Instance,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
        offset: (i32, i32),
    ) -> Result<Self, GpuError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| GpuError::Backend("no adapter compatible with the surface".into()))?;
        let (device, queue) = request_device(&adapter).await?;
        let caps = DeviceCaps::from_device(&device);

        let surface_caps = surface.get_capabilities(&adapter);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: preferred_surface_format(&surface_caps.formats),
            width: width.max(1),
            height: height.max(1),
            present_mode: preferred_present_mode(&surface_caps.present_modes),
            alpha_mode: preferred_alpha_mode(&surface_caps.alpha_modes),
            desired_maximum_frame_latency: 2,
            view_formats: Vec::new(),
        };
        surface.configure(&device, &config);

        Ok(Self::from_parts(
            device,
            queue,
            caps,
            Some(SurfaceState {
                surface,
                config,
                offset,
            }),
        ))
    }

    fn from_parts(
        device: wgpu::Device,
        queue: wgpu::Queue,
        caps: DeviceCaps,
        surface: Option<SurfaceState>,
    ) -> Self {
        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("opal-gpu.blit bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<BlitUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("opal-gpu.blit shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_WGSL.into()),
        });

        let blit_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("opal-gpu.blit uniforms"),
            size: std::mem::size_of::<BlitUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let blit_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("opal-gpu.blit sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let nominal_surface_size = surface
            .as_ref()
            .map(|s| (s.config.width, s.config.height))
            .unwrap_or((640, 480));

        Self {
            device,
            queue,
            caps,
            targets: HashMap::new(),
            next_target: 1,
            color_attachments: [None, None],
            depth_attachment: None,
            draw_buffers: DrawBuffers::Color0,
            state: DrawState::BASELINE,
            surface_bound: false,
            surface,
            pending_frame: None,
            nominal_surface_size,
            blit_pipelines: HashMap::new(),
            blit_layout,
            blit_shader,
            blit_uniforms,
            blit_sampler,
            stats: BackendStats::default(),
        }
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    /// Whether draws are currently routed at the visible surface.
    pub fn is_surface_bound(&self) -> bool {
        self.surface_bound
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn lookup(&self, id: TargetId) -> Result<&StoredTarget, GpuError> {
        self.targets
            .get(&id.as_raw())
            .ok_or(GpuError::UnknownTarget(id.as_raw()))
    }

    fn insert_target(&mut self, stored: StoredTarget) -> TargetId {
        let id = TargetId::from_raw(self.next_target);
        self.next_target += 1;
        self.targets.insert(id.as_raw(), stored);
        id
    }

    fn blit_pipeline(&mut self, key: BlitKey) -> &wgpu::RenderPipeline {
        let device = &self.device;
        let layout = &self.blit_layout;
        let shader = &self.blit_shader;
        self.blit_pipelines.entry(key).or_insert_with(|| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("opal-gpu.blit pipeline layout"),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("opal-gpu.blit pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: "vs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: "fs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: key.format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: map_color_writes(
                            ColorMask::from_bits_truncate(key.mask),
                        ),
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    polygon_mode: if key.wireframe {
                        wgpu::PolygonMode::Line
                    } else {
                        wgpu::PolygonMode::Fill
                    },
                    ..Default::default()
                },
                depth_stencil: key.stencil_gate.then(|| wgpu::DepthStencilState {
                    format: DEPTH_STENCIL_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: wgpu::CompareFunction::Always,
                    stencil: wgpu::StencilState {
                        front: wgpu::StencilFaceState {
                            compare: wgpu::CompareFunction::Equal,
                            fail_op: wgpu::StencilOperation::Keep,
                            depth_fail_op: wgpu::StencilOperation::Keep,
                            pass_op: wgpu::StencilOperation::Keep,
                        },
                        back: wgpu::StencilFaceState {
                            compare: wgpu::CompareFunction::Equal,
                            fail_op: wgpu::StencilOperation::Keep,
                            depth_fail_op: wgpu::StencilOperation::Keep,
                            pass_op: wgpu::StencilOperation::Keep,
                        },
                        read_mask: 0xff,
                        write_mask: 0,
                    },
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
        })
    }

    fn acquire_surface_frame(&mut self) -> Result<Option<wgpu::SurfaceTexture>, GpuError> {
        let surface = self
            .surface
            .as_ref()
            .ok_or(GpuError::Unsupported("surface blit in headless mode"))?;

        self.stats.inc_presents_attempted();
        match surface.surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => match surface_acquire_action(&err) {
                SurfaceAcquireAction::DropFrame => {
                    tracing::warn!("surface acquire timed out; dropping frame");
                    Ok(None)
                }
                SurfaceAcquireAction::ReconfigureAndRetry => {
                    surface.surface.configure(&self.device, &surface.config);
                    self.stats.inc_surface_reconfigures();
                    match surface.surface.get_current_texture() {
                        Ok(frame) => Ok(Some(frame)),
                        Err(err) => match surface_acquire_action(&err) {
                            SurfaceAcquireAction::Fatal => Err(GpuError::OutOfMemory),
                            _ => {
                                tracing::warn!(
                                    ?err,
                                    "surface acquire failed after reconfigure; dropping frame"
                                );
                                Ok(None)
                            }
                        },
                    }
                }
                SurfaceAcquireAction::Fatal => Err(GpuError::OutOfMemory),
            },
        }
    }

    fn depth_view_for_gate(&self) -> Result<&wgpu::TextureView, GpuError> {
        let id = self
            .depth_attachment
            .ok_or_else(|| GpuError::Backend("stencil-gated blit without depth attachment".into()))?;
        let stored = self.lookup(id)?;
        match stored.kind {
            TargetKind::Depth { stencil: true } => Ok(&stored.view),
            TargetKind::Depth { stencil: false } => Err(GpuError::Backend(
                "stencil-gated blit against a depth-only target".into(),
            )),
            TargetKind::Color => Err(GpuError::Backend(
                "color target attached as depth".into(),
            )),
        }
    }
}

async fn request_headless_adapter() -> Option<wgpu::Adapter> {
    // On Linux the GL backend is tried first; software Vulkan adapters seen
    // in CI crash under lavapipe/llvmpipe.
    if cfg!(target_os = "linux") {
        let gl_instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::GL,
            ..Default::default()
        });
        let adapter = gl_instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await;
        if adapter.is_some() {
            return adapter;
        }
    }
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
}

async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), GpuError> {
    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("opal-gpu backend"),
                required_features: negotiated_features(adapter),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        )
        .await
        .map_err(|err| GpuError::Backend(err.to_string()))
}

impl RasterBackend for WgpuBackend {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn create_color_target(
        &mut self,
        label: &'static str,
        width: u32,
        height: u32,
    ) -> Result<TargetId, GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::Backend(
                "target width/height must be non-zero".into(),
            ));
        }
        if width > self.caps.max_texture_dimension || height > self.caps.max_texture_dimension {
            return Err(GpuError::Backend(format!(
                "target {width}x{height} exceeds device limit {}",
                self.caps.max_texture_dimension
            )));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.insert_target(StoredTarget {
            texture,
            view,
            width,
            height,
            kind: TargetKind::Color,
        }))
    }

    fn create_depth_target(
        &mut self,
        label: &'static str,
        width: u32,
        height: u32,
        stencil: bool,
    ) -> Result<TargetId, GpuError> {
        if stencil && !self.caps.has_stencil {
            return Err(GpuError::Unsupported("depth+stencil target"));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: if stencil {
                DEPTH_STENCIL_FORMAT
            } else {
                DEPTH_ONLY_FORMAT
            },
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.insert_target(StoredTarget {
            texture,
            view,
            width,
            height,
            kind: TargetKind::Depth { stencil },
        }))
    }

    fn destroy_target(&mut self, id: TargetId) -> Result<(), GpuError> {
        let stored = self
            .targets
            .remove(&id.as_raw())
            .ok_or(GpuError::UnknownTarget(id.as_raw()))?;
        for slot in &mut self.color_attachments {
            if *slot == Some(id) {
                *slot = None;
            }
        }
        if self.depth_attachment == Some(id) {
            self.depth_attachment = None;
        }
        stored.texture.destroy();
        Ok(())
    }

    fn attach_color(&mut self, slot: u32, target: Option<TargetId>) -> Result<(), GpuError> {
        if slot as usize >= self.color_attachments.len() {
            return Err(GpuError::Backend(format!(
                "color attachment slot {slot} out of range"
            )));
        }
        if let Some(id) = target {
            let stored = self.lookup(id)?;
            if !matches!(stored.kind, TargetKind::Color) {
                return Err(GpuError::Backend(
                    "depth target attached to a color slot".into(),
                ));
            }
        }
        self.color_attachments[slot as usize] = target;
        Ok(())
    }

    fn attach_depth(&mut self, target: Option<TargetId>) -> Result<(), GpuError> {
        if let Some(id) = target {
            let stored = self.lookup(id)?;
            if !matches!(stored.kind, TargetKind::Depth { .. }) {
                return Err(GpuError::Backend("color target attached as depth".into()));
            }
        }
        self.depth_attachment = target;
        Ok(())
    }

    fn verify_framebuffer(&self) -> Result<(), GpuError> {
        let mut dims = None;
        let attached = self
            .color_attachments
            .iter()
            .flatten()
            .copied()
            .chain(self.depth_attachment);
        for id in attached {
            let stored = self.lookup(id)?;
            match dims {
                None => dims = Some((stored.width, stored.height)),
                Some(d) if d != (stored.width, stored.height) => {
                    return Err(GpuError::IncompleteFramebuffer(format!(
                        "attachment dimensions differ: {d:?} vs {}x{}",
                        stored.width, stored.height
                    )));
                }
                Some(_) => {}
            }
        }
        if dims.is_none() {
            return Err(GpuError::IncompleteFramebuffer("no attachments".into()));
        }
        Ok(())
    }

    fn set_draw_buffers(&mut self, buffers: DrawBuffers) {
        self.draw_buffers = buffers;
    }

    fn draw_buffers(&self) -> DrawBuffers {
        self.draw_buffers
    }

    fn bind_offscreen(&mut self) {
        self.surface_bound = false;
    }

    fn bind_surface(&mut self) {
        self.surface_bound = true;
    }

    fn reset_draw_state(&mut self) {
        let rect = self.state.scissor_rect;
        self.state = DrawState::BASELINE;
        self.state.scissor_rect = rect;
    }

    fn set_color_mask(&mut self, mask: ColorMask) {
        self.state.color_mask = mask;
    }

    fn set_depth(&mut self, test: bool, write: bool) {
        self.state.depth_test = test;
        self.state.depth_write = write;
    }

    fn set_cull(&mut self, enabled: bool) {
        self.state.cull = enabled;
    }

    fn set_blend(&mut self, enabled: bool) {
        self.state.blend = enabled;
    }

    fn set_programs_enabled(&mut self, enabled: bool) {
        self.state.programs = enabled;
    }

    fn set_scissor_test(&mut self, enabled: bool) {
        self.state.scissor_test = enabled;
    }

    fn set_scissor_rect(&mut self, rect: ScissorRect) {
        self.state.scissor_rect = Some(rect);
    }

    fn set_stencil(&mut self, mode: StencilMode) {
        self.state.stencil = mode;
    }

    fn draw_state(&self) -> DrawState {
        self.state
    }

    fn clear_stencil(&mut self) -> Result<(), GpuError> {
        let view = self.depth_view_for_gate()?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("opal-gpu.clear_stencil encoder"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("opal-gpu.clear_stencil pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(0),
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn clear_color(&mut self, rgba: [f64; 4]) -> Result<(), GpuError> {
        let id = self.color_attachments[0]
            .ok_or_else(|| GpuError::Backend("no color attachment to clear".into()))?;
        let view = &self.lookup(id)?.view;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("opal-gpu.clear_color encoder"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("opal-gpu.clear_color pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: rgba[0],
                        g: rgba[1],
                        b: rgba[2],
                        a: rgba[3],
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn blit(
        &mut self,
        src: TargetId,
        dst: BlitDestination,
        params: &BlitParams,
    ) -> Result<(), GpuError> {
        if params.wireframe && !self.caps.supports_wireframe {
            return Err(GpuError::Unsupported("wireframe polygon mode"));
        }

        let uniforms = BlitUniforms {
            scale: params.quad_scale,
            _pad: [0.0; 2],
        };
        self.queue
            .write_buffer(&self.blit_uniforms, 0, bytemuck::bytes_of(&uniforms));

        // Resolve the destination before borrowing views.
        let (frame, format, load, viewport) = match dst {
            BlitDestination::Offscreen => {
                let id = self.color_attachments[0]
                    .ok_or_else(|| GpuError::Backend("no color attachment to blit into".into()))?;
                if id == src {
                    return Err(GpuError::Backend(
                        "blit source is the current color attachment".into(),
                    ));
                }
                let stored = self.lookup(id)?;
                (
                    None,
                    COLOR_TARGET_FORMAT,
                    wgpu::LoadOp::Load,
                    (0.0, 0.0, stored.width as f32, stored.height as f32),
                )
            }
            BlitDestination::Surface => {
                let Some(frame) = self.acquire_surface_frame()? else {
                    // Dropped frame; skip the pass entirely.
                    return Ok(());
                };
                let surface = self.surface.as_ref().expect("surface exists when acquired");
                let (w, h) = (surface.config.width, surface.config.height);
                // Offsets position the render area inside the surface; the
                // viewport must stay within the frame.
                let vx = (surface.offset.0.max(0) as u32).min(w.saturating_sub(1));
                let vy = (surface.offset.1.max(0) as u32).min(h.saturating_sub(1));
                (
                    Some(frame),
                    surface.config.format,
                    wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    (vx as f32, vy as f32, (w - vx) as f32, (h - vy) as f32),
                )
            }
        };

        let key = BlitKey {
            format,
            mask: params.color_mask.bits(),
            stencil_gate: params.stencil_gate,
            wireframe: params.wireframe,
        };
        self.blit_pipeline(key);

        let frame_view = frame
            .as_ref()
            .map(|f| f.texture.create_view(&wgpu::TextureViewDescriptor::default()));
        let dst_view = match (&frame_view, dst) {
            (Some(view), _) => view,
            (None, _) => {
                let id = self.color_attachments[0].expect("checked above");
                &self.lookup(id)?.view
            }
        };

        let src_view = &self.lookup(src)?.view;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("opal-gpu.blit bind group"),
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.blit_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.blit_sampler),
                },
            ],
        });

        let depth_attachment = if params.stencil_gate {
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: self.depth_view_for_gate()?,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
            })
        } else {
            None
        };

        let pipeline = &self.blit_pipelines[&key];
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("opal-gpu.blit encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("opal-gpu.blit pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: dst_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            if params.stencil_gate {
                pass.set_stencil_reference(1);
            }
            pass.set_viewport(viewport.0, viewport.1, viewport.2, viewport.3, 0.0, 1.0);
            pass.draw(0..6, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        self.stats.inc_blit_passes();

        if let Some(frame) = frame {
            self.pending_frame = Some(frame);
        }
        Ok(())
    }

    fn surface_size(&self) -> (u32, u32) {
        match &self.surface {
            Some(s) => (s.config.width, s.config.height),
            None => self.nominal_surface_size,
        }
    }

    fn surface_offset(&self) -> (i32, i32) {
        match &self.surface {
            Some(s) => s.offset,
            None => (0, 0),
        }
    }

    fn recreate_surface(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        let Some(surface) = self.surface.as_mut() else {
            return Err(GpuError::Unsupported("recreate_surface in headless mode"));
        };
        let prev = (surface.config.width, surface.config.height);
        surface.config.width = width.max(1);
        surface.config.height = height.max(1);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        surface.surface.configure(&self.device, &surface.config);
        self.device.poll(wgpu::Maintain::Wait);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            surface.config.width = prev.0;
            surface.config.height = prev.1;
            return Err(GpuError::Surface(err.to_string()));
        }
        self.pending_frame = None;
        self.stats.inc_surface_reconfigures();
        Ok(())
    }

    fn present(&mut self) -> Result<(), GpuError> {
        match self.pending_frame.take() {
            Some(frame) => {
                frame.present();
                self.stats.inc_presents_succeeded();
                Ok(())
            }
            // Dropped or never-acquired frame; nothing to show.
            None => Ok(()),
        }
    }

    fn read_target_pixels(&mut self, id: TargetId) -> Result<Vec<u8>, GpuError> {
        let stored = self.lookup(id)?;
        if !matches!(stored.kind, TargetKind::Color) {
            return Err(GpuError::Backend("cannot read back a depth target".into()));
        }
        let (width, height) = (stored.width, stored.height);
        let unpadded_bpr = width * 4;
        let padded_bpr = padded_bytes_per_row(unpadded_bpr);
        let buffer_size = padded_bpr as u64 * height as u64;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("opal-gpu.readback buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("opal-gpu.readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &stored.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            sender.send(res).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);

        match pollster::block_on(receiver.receive()) {
            Some(Ok(())) => {}
            Some(Err(err)) => return Err(GpuError::Backend(err.to_string())),
            None => return Err(GpuError::Backend("readback channel closed".into())),
        }

        let mapped = slice.get_mapped_range();
        let mut pixels = vec![0u8; (unpadded_bpr as usize) * height as usize];
        for y in 0..height as usize {
            let src_off = y * padded_bpr as usize;
            let dst_off = y * unpadded_bpr as usize;
            pixels[dst_off..dst_off + unpadded_bpr as usize]
                .copy_from_slice(&mapped[src_off..src_off + unpadded_bpr as usize]);
        }
        drop(mapped);
        readback.unmap();

        Ok(pixels)
    }
}

const BLIT_WGSL: &str = r#"
struct BlitUniforms {
    scale: vec2<f32>,
    _pad: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: BlitUniforms;
@group(0) @binding(1) var src_tex: texture_2d<f32>;
@group(0) @binding(2) var src_samp: sampler;

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) idx: u32) -> VsOut {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>( 1.0, -1.0),
        vec2<f32>( 1.0,  1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>( 1.0,  1.0),
        vec2<f32>(-1.0,  1.0),
    );
    let c = corners[idx];
    var out: VsOut;
    out.pos = vec4<f32>(c * u.scale, 0.0, 1.0);
    out.uv = vec2<f32>((c.x + 1.0) * 0.5, (1.0 - c.y) * 0.5);
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(src_tex, src_samp, in.uv);
}
"#;
