// SPDX-License-Identifier: GPL-3.0-only

//! GPU compositor
//!
//! All passes of a frame are recorded into one command encoder and submitted
//! together with the readback of the composited canvas. Every pass that runs
//! in the same submission gets its own uniform buffer.

use super::{
    BackgroundLayer, BackgroundPixels, BackgroundSlot, BlurStage, CompositeRequest,
    CompositorRenderer, DEFAULT_LAYER, PingPong, background_blur_passes, background_blur_size,
    refine_params, state_params,
};
use crate::errors::{FilterError, FilterResult};
use crate::gpu::GpuContext;
use crate::gpu::resources::{
    Binding, FullscreenPass, GpuTexture, Readback, VS_CANVAS, VS_OFFSCREEN, create_sampler,
    create_uniform,
};
use crate::gpu::wgpu;
use crate::media::RenderSurface;
use crate::renderers::closed_error;
use crate::renderers::texture::MaskImage;
use crate::shaders::{self, BlendParams, MaskedBlurParams, RefineParams, StateParams};
use tracing::debug;

/// Segmentation masks are sampled as single-channel 8-bit textures
const MASK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

fn quantize_mask(mask: &MaskImage) -> Vec<u8> {
    mask.pixels()
        .map(|value| (value.0[0].clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect()
}

struct Passes {
    state_update: FullscreenPass,
    refine: FullscreenPass,
    masked_blur: FullscreenPass,
    blend: FullscreenPass,
    passthrough: FullscreenPass,
}

impl Passes {
    fn new(device: &wgpu::Device) -> FilterResult<Self> {
        use Binding::{Sampler, Texture, Uniform};

        Ok(Self {
            state_update: FullscreenPass::new(
                device,
                "state_update_pass",
                &shaders::module_source(shaders::STATE_UPDATE_FRAGMENT),
                VS_OFFSCREEN,
                &[Texture, Texture, Texture, Sampler, Uniform],
            )?,
            refine: FullscreenPass::new(
                device,
                "mask_refine_pass",
                &shaders::module_source(shaders::MASK_REFINE_FRAGMENT),
                VS_OFFSCREEN,
                &[Texture, Texture, Sampler, Sampler, Uniform],
            )?,
            masked_blur: FullscreenPass::new(
                device,
                "masked_blur_pass",
                &shaders::module_source(shaders::MASKED_BLUR_FRAGMENT),
                VS_OFFSCREEN,
                &[Texture, Texture, Sampler, Sampler, Uniform],
            )?,
            blend: FullscreenPass::new(
                device,
                "blend_pass",
                &shaders::module_source(shaders::BLEND_FRAGMENT),
                VS_CANVAS,
                &[Texture, Texture, Texture, Sampler, Sampler, Uniform],
            )?,
            passthrough: FullscreenPass::new(
                device,
                "passthrough_pass",
                &shaders::module_source(shaders::PASSTHROUGH_FRAGMENT),
                VS_CANVAS,
                &[Texture, Sampler],
            )?,
        })
    }
}

struct CompositorResources {
    gpu: GpuContext,
    passes: Passes,
    nearest: wgpu::Sampler,
    linear: wgpu::Sampler,
    state_params: wgpu::Buffer,
    refine_params: wgpu::Buffer,
    blur_params: [wgpu::Buffer; 4],
    blend_params: wgpu::Buffer,
    frame: GpuTexture,
    category: GpuTexture,
    confidence: GpuTexture,
    states: PingPong<GpuTexture>,
    refined: GpuTexture,
    blur_first: GpuTexture,
    blur_second: GpuTexture,
    output: GpuTexture,
    readback: Readback,
}

impl CompositorResources {
    fn new(gpu: GpuContext) -> FilterResult<Self> {
        let device = &gpu.device;
        let passes = Passes::new(device)?;
        let mask = |label| GpuTexture::upload_target(device, label, MASK_FORMAT, 1, 1);

        Ok(Self {
            nearest: create_sampler(device, "compositor_nearest", wgpu::FilterMode::Nearest),
            linear: create_sampler(device, "compositor_linear", wgpu::FilterMode::Linear),
            state_params: create_uniform::<StateParams>(device, "state_params"),
            refine_params: create_uniform::<RefineParams>(device, "refine_params"),
            blur_params: [
                create_uniform::<MaskedBlurParams>(device, "masked_blur_params_0"),
                create_uniform::<MaskedBlurParams>(device, "masked_blur_params_1"),
                create_uniform::<MaskedBlurParams>(device, "masked_blur_params_2"),
                create_uniform::<MaskedBlurParams>(device, "masked_blur_params_3"),
            ],
            blend_params: create_uniform::<BlendParams>(device, "blend_params"),
            frame: GpuTexture::upload_target(
                device,
                "compositor_frame",
                wgpu::TextureFormat::Rgba8Unorm,
                1,
                1,
            ),
            category: mask("category_mask"),
            confidence: mask("confidence_mask"),
            states: PingPong::new(
                GpuTexture::render_target(device, "mask_state_0", 1, 1),
                GpuTexture::render_target(device, "mask_state_1", 1, 1),
            ),
            refined: GpuTexture::render_target(device, "refined_mask", 1, 1),
            blur_first: GpuTexture::render_target(device, "background_blur_0", 1, 1),
            blur_second: GpuTexture::render_target(device, "background_blur_1", 1, 1),
            output: GpuTexture::render_target(device, "compositor_output", 1, 1),
            readback: Readback::new(),
            passes,
            gpu,
        })
    }

    fn destroy(&mut self) {
        self.readback.destroy();
        self.output.destroy();
        self.blur_second.destroy();
        self.blur_first.destroy();
        self.refined.destroy();
        for state in self.states.iter() {
            state.destroy();
        }
        self.confidence.destroy();
        self.category.destroy();
        self.frame.destroy();
        self.blend_params.destroy();
        for buffer in &self.blur_params {
            buffer.destroy();
        }
        self.refine_params.destroy();
        self.state_params.destroy();
    }
}

fn create_background(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    layer: &BackgroundLayer<'_>,
) -> FilterResult<GpuTexture> {
    let texture = match layer.pixels {
        BackgroundPixels::Color(color) => {
            let texture = GpuTexture::upload_target(
                device,
                "background_color",
                wgpu::TextureFormat::Rgba8Unorm,
                1,
                1,
            );
            texture.write(queue, &color, 4);
            texture
        }
        BackgroundPixels::Image(image) => {
            let mut texture = GpuTexture::upload_target(
                device,
                "background_image",
                wgpu::TextureFormat::Rgba8Unorm,
                image.width(),
                image.height(),
            );
            texture.upload_rgba(device, queue, image);
            texture
        }
    };
    Ok(texture)
}

/// Compositor running its passes on a dedicated wgpu device
pub struct GpuCompositor {
    resources: Option<CompositorResources>,
    background: BackgroundSlot<GpuTexture>,
    frames_composited: u64,
}

impl std::fmt::Debug for GpuCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuCompositor")
            .field("frames_composited", &self.frames_composited)
            .field("background", &self.background.identifier())
            .field("closed", &self.resources.is_none())
            .finish()
    }
}

impl GpuCompositor {
    /// Create a device and compile the compositor programs
    pub fn new() -> FilterResult<Self> {
        let gpu = GpuContext::create("video_filters_compositor")?;
        debug!(adapter = %gpu.info.adapter_name, "Compiling compositor shaders");
        Ok(Self {
            resources: Some(CompositorResources::new(gpu)?),
            background: BackgroundSlot::new(),
            frames_composited: 0,
        })
    }
}

impl CompositorRenderer for GpuCompositor {
    fn backend_name(&self) -> &'static str {
        "gpu"
    }

    fn render(
        &mut self,
        request: &CompositeRequest<'_>,
        surface: &mut RenderSurface,
    ) -> FilterResult<()> {
        let resources = self
            .resources
            .as_mut()
            .ok_or_else(|| closed_error("compositor"))?;
        let frame = request.frame;
        let (width, height) = (frame.display_width(), frame.display_height());
        if width == 0 || height == 0 {
            return Ok(());
        }
        surface.ensure_size(width, height);

        let CompositorResources {
            gpu,
            passes,
            nearest,
            linear,
            state_params: state_buffer,
            refine_params: refine_buffer,
            blur_params: blur_buffers,
            blend_params: blend_buffer,
            frame: frame_texture,
            category,
            confidence,
            states,
            refined,
            blur_first,
            blur_second,
            output,
            readback,
        } = resources;
        let (device, queue) = (&*gpu.device, &*gpu.queue);

        frame_texture.upload_rgba(device, queue, frame.picture());
        output.ensure_size(device, width, height);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("compositor_encoder"),
        });

        let Some(masks) = request.masks else {
            let bind_group = passes.passthrough.bind(
                device,
                &[
                    wgpu::BindingResource::TextureView(frame_texture.view()),
                    wgpu::BindingResource::Sampler(nearest),
                ],
            );
            passes.passthrough.draw(&mut encoder, &bind_group, output.view());
            let image = readback.read(device, queue, encoder, output)?;
            return surface.present(image);
        };

        let (mask_width, mask_height) = masks.dimensions();
        category.ensure_size(device, mask_width, mask_height);
        category.write(queue, &quantize_mask(&masks.category), 1);
        confidence.ensure_size(device, mask_width, mask_height);
        confidence.write(queue, &quantize_mask(&masks.confidence), 1);

        let layer = request.background.unwrap_or(DEFAULT_LAYER);
        if !request.blur.is_active() {
            self.background.update(
                &layer,
                |layer| create_background(device, queue, layer),
                |texture, layer| {
                    if let BackgroundPixels::Image(image) = layer.pixels {
                        texture.upload_rgba(device, queue, image);
                    }
                    Ok(())
                },
            )?;
        }

        // 1. temporal smoothing into the next state
        queue.write_buffer(
            state_buffer,
            0,
            bytemuck::bytes_of(&state_params(request.selfie_mode)),
        );
        let (previous, next) = states.split();
        next.ensure_size(device, width, height);
        let bind_group = passes.state_update.bind(
            device,
            &[
                wgpu::BindingResource::TextureView(category.view()),
                wgpu::BindingResource::TextureView(confidence.view()),
                wgpu::BindingResource::TextureView(previous.view()),
                wgpu::BindingResource::Sampler(linear),
                state_buffer.as_entire_binding(),
            ],
        );
        passes.state_update.draw(&mut encoder, &bind_group, next.view());

        // 2. edge-aware refinement guided by the frame
        let state = &*next;
        queue.write_buffer(
            refine_buffer,
            0,
            bytemuck::bytes_of(&refine_params(width, height)),
        );
        refined.ensure_size(device, width, height);
        let bind_group = passes.refine.bind(
            device,
            &[
                wgpu::BindingResource::TextureView(state.view()),
                wgpu::BindingResource::TextureView(frame_texture.view()),
                wgpu::BindingResource::Sampler(linear),
                wgpu::BindingResource::Sampler(nearest),
                refine_buffer.as_entire_binding(),
            ],
        );
        passes.refine.draw(&mut encoder, &bind_group, refined.view());

        // 3 and 4. background selection, blurring the frame's own background if configured
        let background_size = if request.blur.is_active() {
            let blur_size = background_blur_size(width, height);
            blur_first.ensure_size(device, blur_size.0, blur_size.1);
            blur_second.ensure_size(device, blur_size.0, blur_size.1);

            let blur_passes = background_blur_passes((width, height), blur_size, request.blur);
            for (pass, buffer) in blur_passes.iter().zip(blur_buffers.iter()) {
                let (source, sampler) = match pass.input {
                    BlurStage::Frame => (frame_texture.view(), &*nearest),
                    BlurStage::First => (blur_first.view(), &*linear),
                    BlurStage::Second => (blur_second.view(), &*linear),
                };
                let target = match pass.output {
                    BlurStage::First => blur_first.view(),
                    BlurStage::Second => blur_second.view(),
                    BlurStage::Frame => {
                        return Err(FilterError::Transform(
                            "blur pass cannot write the frame".into(),
                        ));
                    }
                };
                queue.write_buffer(buffer, 0, bytemuck::bytes_of(&pass.params));
                let bind_group = passes.masked_blur.bind(
                    device,
                    &[
                        wgpu::BindingResource::TextureView(source),
                        wgpu::BindingResource::TextureView(refined.view()),
                        wgpu::BindingResource::Sampler(sampler),
                        wgpu::BindingResource::Sampler(linear),
                        buffer.as_entire_binding(),
                    ],
                );
                passes.masked_blur.draw(&mut encoder, &bind_group, target);
            }
            blur_size
        } else {
            match layer.pixels {
                BackgroundPixels::Color(_) => (width, height),
                BackgroundPixels::Image(image) => image.dimensions(),
            }
        };
        let background_view = if request.blur.is_active() {
            blur_second.view()
        } else {
            self.background
                .texture()
                .ok_or_else(|| FilterError::Transform("background texture missing".into()))?
                .view()
        };

        // 5. blend
        let blend = BlendParams {
            bg_dimensions: [background_size.0 as f32, background_size.1 as f32],
            canvas_dimensions: [width as f32, height as f32],
        };
        queue.write_buffer(blend_buffer, 0, bytemuck::bytes_of(&blend));
        let bind_group = passes.blend.bind(
            device,
            &[
                wgpu::BindingResource::TextureView(frame_texture.view()),
                wgpu::BindingResource::TextureView(background_view),
                wgpu::BindingResource::TextureView(refined.view()),
                wgpu::BindingResource::Sampler(nearest),
                wgpu::BindingResource::Sampler(linear),
                blend_buffer.as_entire_binding(),
            ],
        );
        passes.blend.draw(&mut encoder, &bind_group, output.view());

        let image = readback.read(device, queue, encoder, output)?;
        surface.present(image)?;

        // 6. swap roles
        states.swap();
        self.frames_composited += 1;
        Ok(())
    }

    fn state_index(&self) -> usize {
        self.resources
            .as_ref()
            .map_or(0, |resources| resources.states.read_index())
    }

    fn frames_composited(&self) -> u64 {
        self.frames_composited
    }

    fn background_allocations(&self) -> u64 {
        self.background.allocations()
    }

    fn background_identifier(&self) -> Option<&str> {
        self.background.identifier()
    }

    fn close(&mut self) {
        if let Some(texture) = self.background.take() {
            texture.destroy();
        }
        if let Some(mut resources) = self.resources.take() {
            resources.destroy();
            debug!(frames = self.frames_composited, "GPU compositor closed");
        }
    }
}

impl Drop for GpuCompositor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_quantize_mask_rounds_and_clamps() {
        let mask = MaskImage::from_fn(4, 1, |x, _| Luma([[0.0, 0.5, 1.0, 2.0][x as usize]]));
        assert_eq!(quantize_mask(&mask), vec![0, 128, 255, 255]);
    }
}
