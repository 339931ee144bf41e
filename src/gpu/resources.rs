// SPDX-License-Identifier: GPL-3.0-only

//! Render-pass plumbing shared by the GPU renderers
//!
//! Every pass in this crate is a full-screen triangle running one fragment
//! program into one color target. The helpers here build those pipelines,
//! manage resizable textures and read the final target back to the CPU.

use super::wgpu;
use crate::errors::{FilterError, FilterResult};
use image::RgbaImage;
use tracing::debug;

/// Format of every render target
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Vertex entry point for offscreen targets (framebuffer orientation)
pub const VS_OFFSCREEN: &str = "vs_offscreen";

/// Vertex entry point for the presented canvas (top-left origin)
pub const VS_CANVAS: &str = "vs_canvas";

/// Kinds of bindings a pass can declare, in binding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Texture,
    Sampler,
    Uniform,
}

impl Binding {
    fn layout_entry(self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            Binding::Texture => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            Binding::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            Binding::Uniform => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        };
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty,
            count: None,
        }
    }
}

/// Run `build` inside a validation error scope
///
/// Shader compilation and pipeline creation report failures asynchronously;
/// the scope turns them into a `ShaderBuild` error.
pub fn with_validation<T>(
    device: &wgpu::Device,
    what: &str,
    build: impl FnOnce() -> T,
) -> FilterResult<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(value),
        Some(e) => Err(FilterError::ShaderBuild(format!("{}: {}", what, e))),
    }
}

/// A full-screen pass: one render pipeline and its bind group layout
#[derive(Debug)]
pub struct FullscreenPass {
    label: &'static str,
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

impl FullscreenPass {
    pub fn new(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        vertex_entry: &'static str,
        bindings: &[Binding],
    ) -> FilterResult<Self> {
        with_validation(device, label, || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

            let entries: Vec<_> = bindings
                .iter()
                .enumerate()
                .map(|(index, binding)| binding.layout_entry(index as u32))
                .collect();
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some(vertex_entry),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

            Self {
                label,
                pipeline,
                layout,
            }
        })
    }

    /// Bind group for `resources`, given in the pass's binding order
    pub fn bind(
        &self,
        device: &wgpu::Device,
        resources: &[wgpu::BindingResource<'_>],
    ) -> wgpu::BindGroup {
        let entries: Vec<_> = resources
            .iter()
            .enumerate()
            .map(|(index, resource)| wgpu::BindGroupEntry {
                binding: index as u32,
                resource: resource.clone(),
            })
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: &self.layout,
            entries: &entries,
        })
    }

    /// Record the pass drawing into `target`
    pub fn draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        bind_group: &wgpu::BindGroup,
        target: &wgpu::TextureView,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(self.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

/// Clamp-to-edge sampler with the given filter
pub fn create_sampler(
    device: &wgpu::Device,
    label: &str,
    filter: wgpu::FilterMode,
) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        ..Default::default()
    })
}

/// Uniform buffer sized for `T`
pub fn create_uniform<T: bytemuck::Pod>(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: std::mem::size_of::<T>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// A 2-D texture whose storage is reallocated when its size changes
#[derive(Debug)]
pub struct GpuTexture {
    label: &'static str,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    allocations: u64,
}

impl GpuTexture {
    /// Texture sampled by passes and filled from the CPU
    pub fn upload_target(
        device: &wgpu::Device,
        label: &'static str,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        Self::new(
            device,
            label,
            format,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            width,
            height,
        )
    }

    /// Texture rendered into by one pass and sampled by the next
    pub fn render_target(device: &wgpu::Device, label: &'static str, width: u32, height: u32) -> Self {
        Self::new(
            device,
            label,
            TARGET_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            width,
            height,
        )
    }

    fn new(
        device: &wgpu::Device,
        label: &'static str,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        width: u32,
        height: u32,
    ) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let texture = Self::allocate(device, label, format, usage, width, height);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            label,
            format,
            usage,
            texture,
            view,
            width,
            height,
            allocations: 1,
        }
    }

    fn allocate(
        device: &wgpu::Device,
        label: &str,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        width: u32,
        height: u32,
    ) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        })
    }

    /// Reallocate storage if the size differs; returns true if it did
    pub fn ensure_size(&mut self, device: &wgpu::Device, width: u32, height: u32) -> bool {
        let (width, height) = (width.max(1), height.max(1));
        if (self.width, self.height) == (width, height) {
            return false;
        }

        debug!(label = self.label, width, height, "Reallocating texture storage");
        self.texture.destroy();
        self.texture = Self::allocate(device, self.label, self.format, self.usage, width, height);
        self.view = self.texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.width = width;
        self.height = height;
        self.allocations += 1;
        true
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Upload tightly packed texel rows covering the whole texture
    pub fn write(&self, queue: &wgpu::Queue, data: &[u8], bytes_per_texel: u32) {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * bytes_per_texel),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Upload an RGBA image, reallocating first if its size differs
    pub fn upload_rgba(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, image: &RgbaImage) {
        self.ensure_size(device, image.width(), image.height());
        self.write(queue, image.as_raw(), 4);
    }

    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Staging buffer for reading an RGBA render target back to the CPU
#[derive(Debug, Default)]
pub struct Readback {
    buffer: Option<wgpu::Buffer>,
    padded_bytes_per_row: u32,
    width: u32,
    height: u32,
}

impl Readback {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_size(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if self.buffer.is_some() && (self.width, self.height) == (width, height) {
            return;
        }
        if let Some(buffer) = self.buffer.take() {
            buffer.destroy();
        }

        self.padded_bytes_per_row = align_to(width * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging_buffer"),
            size: u64::from(self.padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        }));
        self.width = width;
        self.height = height;
    }

    /// Copy `source` into the staging buffer and wait for the result
    pub fn read(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        mut encoder: wgpu::CommandEncoder,
        source: &GpuTexture,
    ) -> FilterResult<RgbaImage> {
        let (width, height) = source.dimensions();
        self.ensure_size(device, width, height);
        let staging = self
            .buffer
            .as_ref()
            .ok_or_else(|| FilterError::Transform("readback buffer missing".into()))?;

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: source.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| FilterError::Transform(format!("GPU poll failed: {:?}", e)))?;
        rx.recv()
            .map_err(|e| FilterError::Transform(format!("Failed to map buffer: {}", e)))?
            .map_err(|e| FilterError::Transform(format!("Buffer map error: {:?}", e)))?;

        let row_bytes = width as usize * 4;
        let padded = self.padded_bytes_per_row as usize;
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in 0..height as usize {
                let start = row * padded;
                pixels.extend_from_slice(&mapped[start..start + row_bytes]);
            }
        }
        staging.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| FilterError::Transform("readback size mismatch".into()))
    }

    pub fn destroy(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.destroy();
        }
    }
}
