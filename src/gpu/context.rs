//! Headless GPU context
//!
//! Owns the wgpu instance, adapter, device and queue used for off-screen
//! rendering. There is no window or presentation surface: all output goes to
//! textures that are read back to the CPU.

use crate::error::{ExtractError, Result};

/// GPU resources for one output surface
pub struct GpuContext {
    /// The wgpu instance
    pub instance: wgpu::Instance,
    /// The selected GPU adapter
    pub adapter: wgpu::Adapter,
    /// The GPU device for creating resources
    pub device: wgpu::Device,
    /// The command queue for submitting GPU work
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Create a headless context, blocking until the device is ready
    pub fn new(power_preference: wgpu::PowerPreference) -> Result<Self> {
        pollster::block_on(Self::new_async(power_preference))
    }

    async fn new_async(power_preference: wgpu::PowerPreference) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| ExtractError::GpuInit("no suitable GPU adapter".to_string()))?;

        let info = adapter.get_info();
        tracing::info!("Using GPU: {}", info.name);
        tracing::debug!("Backend: {:?}", info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Frame Extractor Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| ExtractError::GpuInit(format!("failed to create device: {}", e)))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Open a validation scope for the next operation
    pub fn push_error_scope(&self) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
    }

    /// Close the scope opened by [`push_error_scope`](Self::push_error_scope) and
    /// report anything it captured as a [`ExtractError::Gpu`] error for `op`
    pub fn check_gpu_error(&self, op: &'static str) -> Result<()> {
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => {
                tracing::error!("{}: GPU error: {}", op, error);
                Err(ExtractError::Gpu {
                    op,
                    message: error.to_string(),
                })
            }
            None => Ok(()),
        }
    }

    /// Largest texture side supported by the device
    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }
}
