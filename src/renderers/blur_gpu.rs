// SPDX-License-Identifier: GPL-3.0-only

//! GPU full-screen blur
//!
//! The frame is uploaded, blurred horizontally into `ping` and vertically into
//! `pong` at 15% resolution, then drawn back at full size into `output`, which
//! is read back into the render surface.

use super::kernel::KernelCache;
use super::{BlurRenderer, blur_working_size, closed_error};
use crate::errors::FilterResult;
use crate::gpu::GpuContext;
use crate::gpu::resources::{
    Binding, FullscreenPass, GpuTexture, Readback, VS_CANVAS, VS_OFFSCREEN, create_sampler,
    create_uniform,
};
use crate::gpu::wgpu;
use crate::media::{Frame, RenderSurface};
use crate::shaders::{self, BlurParams};
use tracing::debug;

struct BlurResources {
    gpu: GpuContext,
    blur_pass: FullscreenPass,
    present_pass: FullscreenPass,
    sampler: wgpu::Sampler,
    horizontal_params: wgpu::Buffer,
    vertical_params: wgpu::Buffer,
    input: GpuTexture,
    ping: GpuTexture,
    pong: GpuTexture,
    output: GpuTexture,
    readback: Readback,
}

impl BlurResources {
    fn new(gpu: GpuContext) -> FilterResult<Self> {
        let device = &gpu.device;
        let blur_source = shaders::module_source(shaders::BLUR_FRAGMENT);
        let blur_pass = FullscreenPass::new(
            device,
            "blur_pass",
            &blur_source,
            VS_OFFSCREEN,
            &[Binding::Texture, Binding::Sampler, Binding::Uniform],
        )?;
        let present_source = shaders::module_source(shaders::PASSTHROUGH_FRAGMENT);
        let present_pass = FullscreenPass::new(
            device,
            "blur_present_pass",
            &present_source,
            VS_CANVAS,
            &[Binding::Texture, Binding::Sampler],
        )?;

        Ok(Self {
            sampler: create_sampler(device, "blur_linear_sampler", wgpu::FilterMode::Linear),
            horizontal_params: create_uniform::<BlurParams>(device, "blur_horizontal_params"),
            vertical_params: create_uniform::<BlurParams>(device, "blur_vertical_params"),
            input: GpuTexture::upload_target(
                device,
                "blur_input",
                wgpu::TextureFormat::Rgba8Unorm,
                1,
                1,
            ),
            ping: GpuTexture::render_target(device, "blur_ping", 1, 1),
            pong: GpuTexture::render_target(device, "blur_pong", 1, 1),
            output: GpuTexture::render_target(device, "blur_output", 1, 1),
            readback: Readback::new(),
            blur_pass,
            present_pass,
            gpu,
        })
    }

    fn destroy(&mut self) {
        self.readback.destroy();
        self.output.destroy();
        self.pong.destroy();
        self.ping.destroy();
        self.input.destroy();
        self.vertical_params.destroy();
        self.horizontal_params.destroy();
    }
}

/// Blur renderer running its passes on a dedicated wgpu device
pub struct GpuBlurRenderer {
    kernels: KernelCache,
    resources: Option<BlurResources>,
}

impl std::fmt::Debug for GpuBlurRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBlurRenderer")
            .field("kernels", &self.kernels.len())
            .field("closed", &self.resources.is_none())
            .finish()
    }
}

impl GpuBlurRenderer {
    /// Create a device and compile the blur programs
    pub fn new() -> FilterResult<Self> {
        let gpu = GpuContext::create("video_filters_blur")?;
        debug!(adapter = %gpu.info.adapter_name, "Compiling blur shaders");
        Ok(Self {
            kernels: KernelCache::new(),
            resources: Some(BlurResources::new(gpu)?),
        })
    }

    pub fn working_size(&self) -> Option<(u32, u32)> {
        self.resources.as_ref().map(|r| r.ping.dimensions())
    }
}

impl BlurRenderer for GpuBlurRenderer {
    fn backend_name(&self) -> &'static str {
        "gpu"
    }

    fn render(
        &mut self,
        frame: &Frame,
        radius: f64,
        surface: &mut RenderSurface,
    ) -> FilterResult<()> {
        let resources = self.resources.as_mut().ok_or_else(|| closed_error("blur"))?;
        let (width, height) = (frame.display_width(), frame.display_height());
        if width == 0 || height == 0 {
            return Ok(());
        }
        surface.ensure_size(width, height);

        let BlurResources {
            gpu,
            blur_pass,
            present_pass,
            sampler,
            horizontal_params,
            vertical_params,
            input,
            ping,
            pong,
            output,
            readback,
        } = resources;
        let (device, queue) = (&gpu.device, &gpu.queue);

        let (scaled_width, scaled_height) = blur_working_size(width, height);
        ping.ensure_size(device, scaled_width, scaled_height);
        pong.ensure_size(device, scaled_width, scaled_height);
        output.ensure_size(device, width, height);
        input.upload_rgba(device, queue, frame.picture());

        let kernel = self.kernels.get(radius);
        let texel_size = [1.0 / scaled_width as f32, 1.0 / scaled_height as f32];
        queue.write_buffer(
            horizontal_params,
            0,
            bytemuck::bytes_of(&BlurParams::new(texel_size, [1.0, 0.0], kernel)),
        );
        queue.write_buffer(
            vertical_params,
            0,
            bytemuck::bytes_of(&BlurParams::new(texel_size, [0.0, 1.0], kernel)),
        );

        let horizontal = blur_pass.bind(
            device,
            &[
                wgpu::BindingResource::TextureView(input.view()),
                wgpu::BindingResource::Sampler(sampler),
                horizontal_params.as_entire_binding(),
            ],
        );
        let vertical = blur_pass.bind(
            device,
            &[
                wgpu::BindingResource::TextureView(ping.view()),
                wgpu::BindingResource::Sampler(sampler),
                vertical_params.as_entire_binding(),
            ],
        );
        let present = present_pass.bind(
            device,
            &[
                wgpu::BindingResource::TextureView(pong.view()),
                wgpu::BindingResource::Sampler(sampler),
            ],
        );

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("blur_encoder"),
        });
        blur_pass.draw(&mut encoder, &horizontal, ping.view());
        blur_pass.draw(&mut encoder, &vertical, pong.view());
        present_pass.draw(&mut encoder, &present, output.view());

        let image = readback.read(device, queue, encoder, output)?;
        surface.present(image)
    }

    fn close(&mut self) {
        if let Some(mut resources) = self.resources.take() {
            resources.destroy();
            debug!("GPU blur renderer closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.resources.is_none()
    }
}

impl Drop for GpuBlurRenderer {
    fn drop(&mut self) {
        self.close();
    }
}
