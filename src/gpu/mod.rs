// SPDX-License-Identifier: GPL-3.0-only

//! GPU initialization utilities for render pipelines
//!
//! Each renderer creates its own device so GPU resources are never shared
//! between concurrently running pipelines.

pub mod resources;

use crate::errors::{FilterError, FilterResult};
use std::sync::Arc;
use tracing::{debug, info};

pub use wgpu;

/// Adapter a renderer ended up on, reported by the `probe` command
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    pub adapter_name: String,
    pub backend: wgpu::Backend,
}

/// Device and queue owned by one renderer
#[derive(Debug, Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub info: GpuDeviceInfo,
}

impl GpuContext {
    /// Create a device, blocking on adapter and device requests
    pub fn create(label: &str) -> FilterResult<Self> {
        let (device, queue, info) = pollster::block_on(create_render_device(label))
            .map_err(FilterError::UnsupportedContext)?;
        Ok(Self {
            device,
            queue,
            info,
        })
    }
}

/// Request an adapter and an offscreen device labelled `label`
///
/// No surface is involved; every pass renders into textures that are read
/// back into the render surface.
pub async fn create_render_device(
    label: &str,
) -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>, GpuDeviceInfo), String> {
    info!(label = label, "Creating GPU device for rendering");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| format!("Failed to find suitable GPU adapter: {}", e))?;

    let adapter_info = adapter.get_info();
    let adapter_limits = adapter.limits();

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected for rendering"
    );

    debug!(
        max_texture_dimension_2d = adapter_limits.max_texture_dimension_2d,
        "Requesting device with adapter limits"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter_limits,
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        })
        .await
        .map_err(|e| format!("Failed to create GPU device: {}", e))?;

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
    };

    Ok((Arc::new(device), Arc::new(queue), info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_reports_adapter() {
        match GpuContext::create("video_filters_test") {
            Ok(context) => {
                assert!(!context.info.adapter_name.is_empty());
                assert!(context.device.limits().max_texture_dimension_2d >= 1);
            }
            Err(e) => {
                assert!(matches!(e, FilterError::UnsupportedContext(_)));
                println!("Skipping test (no GPU): {}", e);
            }
        }
    }
}
