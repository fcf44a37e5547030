//! Full-frame evaluation of the glass effect.
//!
//! Two backends produce the same picture: a CPU [`SoftwareRenderer`] that maps
//! [`evaluate_pixel`] over every output pixel, and a wgpu [`GpuRenderer`]
//! running the same algorithm in WGSL. [`Renderer`] picks one and falls back
//! to software when no adapter is available.

use std::num::NonZeroU32;
use std::sync::{mpsc, Arc};

use anyhow::{anyhow, bail, Context, Result};
use bytemuck::{Pod, Zeroable};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use wgpu::util::DeviceExt;

use crate::compositor::{evaluate_pixel, CompositorInputs, PixelSource};
use crate::schema::{Vec2, MAX_FRAME_SIDE};

pub const GLASS_SHADER: &str = include_str!("../shaders/wgsl/fluted_glass.wgsl");

/// Format of offscreen frames read back to the CPU.
pub const READBACK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Screen UV of the center of output pixel `(px, py)`, with `py = 0` the top row.
#[inline]
pub fn pixel_center_uv(px: u32, py: u32, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        (px as f32 + 0.5) / width as f32,
        1.0 - (py as f32 + 0.5) / height as f32,
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareRenderer;

impl SoftwareRenderer {
    /// Tightly packed RGBA8, top row first.
    pub fn render_frame_rgba<S: PixelSource + Sync + ?Sized>(
        &self,
        source: &S,
        inputs: &CompositorInputs,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        if width == 0 || height == 0 {
            bail!("frame dimensions must be positive, got {width}x{height}");
        }
        if width > MAX_FRAME_SIDE || height > MAX_FRAME_SIDE {
            bail!("frame {width}x{height} exceeds the {MAX_FRAME_SIDE}px side limit");
        }
        let row_bytes = width as usize * 4;
        let mut frame = vec![0_u8; row_bytes * height as usize];

        let render_row = |(py, row): (usize, &mut [u8])| {
            for (px, out) in row.chunks_exact_mut(4).enumerate() {
                let uv = pixel_center_uv(px as u32, py as u32, width, height);
                out.copy_from_slice(&evaluate_pixel(source, uv, inputs).to_rgba8());
            }
        };

        #[cfg(feature = "parallel")]
        frame
            .par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(render_row);
        #[cfg(not(feature = "parallel"))]
        frame.chunks_mut(row_bytes).enumerate().for_each(render_row);

        Ok(frame)
    }
}

/// Uniform block mirrored by `GlassUniform` in the WGSL shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq)]
pub struct GlassUniform {
    resolution_x: f32,
    resolution_y: f32,
    square_size: f32,
    distortion: f32,
    refraction: f32,
    magnification: f32,
    bumpiness: f32,
    bump_strength: f32,
    highlight: f32,
    zoom: f32,
    offset_x: f32,
    offset_y: f32,
    image_scale: f32,
    time: f32,
    enabled: u32,
    tiling: u32,
    opacity: f32,
    _padding: [f32; 3],
}

impl GlassUniform {
    pub fn new(inputs: &CompositorInputs, width: u32, height: u32) -> Self {
        let params = &inputs.params;
        Self {
            resolution_x: width as f32,
            resolution_y: height as f32,
            square_size: params.square_size,
            distortion: params.distortion,
            refraction: params.refraction,
            magnification: params.magnification,
            bumpiness: params.bumpiness,
            bump_strength: params.bump_strength,
            highlight: params.highlight,
            zoom: params.zoom,
            offset_x: inputs.offset.x,
            offset_y: inputs.offset.y,
            image_scale: inputs.image_scale,
            time: inputs.elapsed_time,
            enabled: u32::from(params.enabled),
            tiling: u32::from(inputs.tiling),
            opacity: params.opacity,
            _padding: [0.0; 3],
        }
    }
}

/// Adapter, device and queue shared by the renderer and, in the preview
/// window, the surface and overlay.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    pub async fn headless() -> Result<Self> {
        Self::request(wgpu::Instance::default(), None).await
    }

    pub async fn for_surface(instance: wgpu::Instance, surface: &wgpu::Surface<'_>) -> Result<Self> {
        Self::request(instance, Some(surface)).await
    }

    async fn request(
        instance: wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("crossflute-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    pub fn adapter_name(&self) -> String {
        self.adapter.get_info().name
    }
}

struct SourceTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
    serial: u64,
}

struct Offscreen {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback_buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    unpadded_bytes_per_row: u32,
    padded_bytes_per_row: u32,
}

pub struct GpuRenderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    target_format: wgpu::TextureFormat,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    last_uniform: Option<GlassUniform>,
    source: Option<SourceTexture>,
    offscreen: Option<Offscreen>,
}

impl GpuRenderer {
    pub fn new(context: &GpuContext, target_format: wgpu::TextureFormat) -> Result<Self> {
        let device = Arc::clone(&context.device);
        let queue = Arc::clone(&context.queue);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("crossflute-glass-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
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
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<GlassUniform>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("crossflute-glass-shader"),
            source: wgpu::ShaderSource::Wgsl(GLASS_SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("crossflute-glass-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("crossflute-glass-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
        });

        // Repeat addressing keeps scrolled and tiled lookups seamless.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("crossflute-source-sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("crossflute-glass-uniform"),
            contents: bytemuck::bytes_of(&GlassUniform::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Ok(Self {
            device,
            queue,
            target_format,
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
            last_uniform: None,
            source: None,
            offscreen: None,
        })
    }

    /// Draw one frame into `view`, which must have this renderer's target format.
    pub fn render_to_view<S: PixelSource + ?Sized>(
        &mut self,
        source: &S,
        inputs: &CompositorInputs,
        view: &wgpu::TextureView,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("crossflute-render-encoder"),
            });
        self.encode_pass(&mut encoder, source, inputs, view, width, height)?;
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    /// Draw one frame offscreen and read it back as tightly packed RGBA8.
    pub fn render_frame_rgba<S: PixelSource + ?Sized>(
        &mut self,
        source: &S,
        inputs: &CompositorInputs,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        if self.target_format != READBACK_FORMAT {
            bail!(
                "readback requires a {READBACK_FORMAT:?} pipeline, this renderer targets {:?}",
                self.target_format
            );
        }
        self.ensure_offscreen(width, height)?;
        let Some(offscreen) = self.offscreen.take() else {
            bail!("offscreen target missing");
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("crossflute-readback-encoder"),
            });
        let encoded = self.encode_pass(&mut encoder, source, inputs, &offscreen.view, width, height);
        if let Err(error) = encoded {
            self.offscreen = Some(offscreen);
            return Err(error);
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &offscreen.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &offscreen.readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(offscreen.padded_bytes_per_row),
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

        let frame = read_buffer(&self.device, &offscreen);
        self.offscreen = Some(offscreen);
        frame
    }

    fn encode_pass<S: PixelSource + ?Sized>(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        source: &S,
        inputs: &CompositorInputs,
        view: &wgpu::TextureView,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            bail!("frame dimensions must be positive, got {width}x{height}");
        }
        self.upload_source(source)?;

        let uniform = GlassUniform::new(inputs, width, height);
        if self.last_uniform != Some(uniform) {
            self.queue
                .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));
            self.last_uniform = Some(uniform);
        }

        let bind_group = &self
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("no source texture bound"))?
            .bind_group;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("crossflute-glass-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    /// Upload the source's current frame when its size or serial changed.
    fn upload_source<S: PixelSource + ?Sized>(&mut self, source: &S) -> Result<()> {
        let (width, height) = (source.width(), source.height());
        let serial = source.frame_serial();
        let needs_texture = match &self.source {
            Some(cached) if (cached.width, cached.height) == (width, height) => {
                if cached.serial == serial {
                    return Ok(());
                }
                false
            }
            _ => true,
        };

        let pixels = source
            .rgba8()
            .ok_or_else(|| anyhow!("source exposes no RGBA8 frame for GPU upload"))?;
        let max_dimension = self.device.limits().max_texture_dimension_2d;
        if width > max_dimension || height > max_dimension {
            bail!(
                "source {width}x{height} exceeds the GPU texture limit of {max_dimension}px; render with --software"
            );
        }

        if needs_texture {
            self.source = Some(self.create_source_texture(width, height, serial));
        }
        let Some(cached) = self.source.as_mut() else {
            bail!("source texture missing after creation");
        };

        let bytes_per_row = NonZeroU32::new(width.saturating_mul(4))
            .ok_or_else(|| anyhow!("source has invalid width {width}"))?;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &cached.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row.get()),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        cached.serial = serial;
        Ok(())
    }

    fn create_source_texture(&self, width: u32, height: u32, serial: u64) -> SourceTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("crossflute-source-texture"),
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
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("crossflute-glass-bind-group"),
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
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });
        SourceTexture {
            texture,
            bind_group,
            width,
            height,
            serial,
        }
    }

    fn ensure_offscreen(&mut self, width: u32, height: u32) -> Result<()> {
        if let Some(offscreen) = &self.offscreen {
            if (offscreen.width, offscreen.height) == (width, height) {
                return Ok(());
            }
        }
        if width == 0 || height == 0 {
            bail!("frame dimensions must be positive, got {width}x{height}");
        }
        let max_dimension = self.device.limits().max_texture_dimension_2d;
        if width > max_dimension || height > max_dimension {
            bail!(
                "frame {width}x{height} exceeds the GPU texture limit of {max_dimension}px; render with --software"
            );
        }

        let unpadded_bytes_per_row = width
            .checked_mul(4)
            .ok_or_else(|| anyhow!("frame width overflow when computing row bytes"))?;
        let padded_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("crossflute-render-target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: READBACK_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let readback_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("crossflute-readback-buffer"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        self.offscreen = Some(Offscreen {
            texture,
            view,
            readback_buffer,
            width,
            height,
            unpadded_bytes_per_row,
            padded_bytes_per_row,
        });
        Ok(())
    }
}

fn read_buffer(device: &wgpu::Device, offscreen: &Offscreen) -> Result<Vec<u8>> {
    let buffer_slice = offscreen.readback_buffer.slice(..);
    let (sender, receiver) = mpsc::channel();

    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    receiver
        .recv()
        .map_err(|_| anyhow!("failed receiving GPU map callback"))?
        .context("GPU buffer mapping failed")?;

    let unpadded = offscreen.unpadded_bytes_per_row as usize;
    let mapped = buffer_slice.get_mapped_range();
    let mut frame = vec![0_u8; unpadded * offscreen.height as usize];
    for (row_index, chunk) in mapped
        .chunks(offscreen.padded_bytes_per_row as usize)
        .take(offscreen.height as usize)
        .enumerate()
    {
        let dst_start = row_index * unpadded;
        frame[dst_start..dst_start + unpadded].copy_from_slice(&chunk[..unpadded]);
    }

    drop(mapped);
    offscreen.readback_buffer.unmap();
    Ok(frame)
}

enum Backend {
    Software(SoftwareRenderer),
    Gpu(Box<GpuRenderer>),
}

/// Frame renderer for export paths: GPU when available, software otherwise.
pub struct Renderer {
    backend: Backend,
    reason: String,
}

impl Renderer {
    pub fn new_software(reason: impl Into<String>) -> Self {
        Self {
            backend: Backend::Software(SoftwareRenderer),
            reason: reason.into(),
        }
    }

    /// Try a headless GPU backend and fall back to software with the failure
    /// recorded as the backend reason.
    pub async fn new() -> Self {
        let gpu = match GpuContext::headless().await {
            Ok(context) => GpuRenderer::new(&context, READBACK_FORMAT)
                .map(|renderer| (renderer, context.adapter_name())),
            Err(error) => Err(error),
        };
        match gpu {
            Ok((renderer, adapter)) => Self {
                backend: Backend::Gpu(Box::new(renderer)),
                reason: format!("adapter '{adapter}'"),
            },
            Err(error) => Self::new_software(format!("GPU unavailable: {error:#}")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Software(_) => "software",
            Backend::Gpu(_) => "gpu",
        }
    }

    pub fn backend_reason(&self) -> &str {
        &self.reason
    }

    pub fn render_frame_rgba<S: PixelSource + Sync + ?Sized>(
        &mut self,
        source: &S,
        inputs: &CompositorInputs,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        match &mut self.backend {
            Backend::Software(renderer) => renderer.render_frame_rgba(source, inputs, width, height),
            Backend::Gpu(renderer) => renderer.render_frame_rgba(source, inputs, width, height),
        }
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}
