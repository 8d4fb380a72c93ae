//! Off-screen render target fed by a decoder
//!
//! An [`OutputSurface`] bundles everything the frame pump needs on the GPU
//! side: a headless context, an RGBA render target, the texture renderer, the
//! surface texture the decoder renders into and the CPU pixel buffer frames
//! are read back into.
//!
//! The surface is pinned to the thread that built it. Only the
//! [`ProducerSurface`] handle crosses threads.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::surface_texture::{FrameSlot, ProducerSurface, SurfaceTexture};
use super::{GpuContext, TextureRenderer};
use crate::error::{ExtractError, Result};
use crate::shaders::FragmentShader;
use crate::video::frame::rgba_size;

/// Default upper bound for a frame to arrive after a rendered release
pub const DEFAULT_FRAME_AWAIT_TIMEOUT: Duration = Duration::from_millis(2500);

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Row pitch of the readback buffer for a given width
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Copy `height` rows of `row_bytes` each out of a buffer with `padded` pitch
pub fn unpad_rows(padded: &[u8], padded_row: usize, row_bytes: usize, height: usize, out: &mut [u8]) {
    for (dst, src) in out
        .chunks_exact_mut(row_bytes)
        .zip(padded.chunks(padded_row))
        .take(height)
    {
        dst.copy_from_slice(&src[..row_bytes]);
    }
}

/// Configures and creates an [`OutputSurface`]
pub struct OutputSurfaceBuilder {
    width: u32,
    height: u32,
    fragment_shader: FragmentShader,
    power_preference: wgpu::PowerPreference,
    frame_await_timeout: Duration,
}

impl OutputSurfaceBuilder {
    /// Fragment stage used to convert the latched image
    pub fn fragment_shader(mut self, fragment_shader: FragmentShader) -> Self {
        self.fragment_shader = fragment_shader;
        self
    }

    pub fn power_preference(mut self, power_preference: wgpu::PowerPreference) -> Self {
        self.power_preference = power_preference;
        self
    }

    /// How long [`OutputSurface::await_new_image`] waits before giving up
    pub fn frame_await_timeout(mut self, timeout: Duration) -> Self {
        self.frame_await_timeout = timeout;
        self
    }

    /// Create the GPU context and every resource the surface draws with
    ///
    /// Any failure is an [`ExtractError::GpuInit`].
    pub fn build(self) -> Result<OutputSurface> {
        let (width, height) = (self.width, self.height);
        if width == 0 || height == 0 {
            return Err(ExtractError::GpuInit(format!(
                "invalid surface size {}x{}",
                width, height
            )));
        }

        let context = GpuContext::new(self.power_preference)?;
        let max = context.max_texture_dimension();
        if width > max || height > max {
            return Err(ExtractError::GpuInit(format!(
                "surface size {}x{} exceeds device limit {}",
                width, height, max
            )));
        }

        context.push_error_scope();
        let target = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Output Surface Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let padded_row = padded_bytes_per_row(width);
        let readback = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Surface Readback"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        context
            .check_gpu_error("create render target")
            .map_err(|e| ExtractError::GpuInit(e.to_string()))?;

        let renderer = TextureRenderer::new(&context, TARGET_FORMAT, &self.fragment_shader)?;
        let surface_texture = SurfaceTexture::new(&context.device, renderer.texture_id());

        // Frame-available handler
        let slot = FrameSlot::new();

        tracing::debug!(
            "Output surface {}x{} ready (texture id {}, readback pitch {})",
            width,
            height,
            surface_texture.texture_id(),
            padded_row
        );

        Ok(OutputSurface {
            resources: Some(SurfaceResources {
                target,
                target_view,
                readback,
                renderer,
                surface_texture,
                context,
            }),
            slot,
            pixels: vec![0; rgba_size(width, height)],
            width,
            height,
            padded_row,
            frame_await_timeout: self.frame_await_timeout,
            _not_send: PhantomData,
        })
    }
}

/// GPU resources, dropped together on release
struct SurfaceResources {
    // Field order is drop order
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    renderer: TextureRenderer,
    surface_texture: SurfaceTexture,
    context: GpuContext,
}

/// Off-screen surface decoded frames are drawn to and read back from
pub struct OutputSurface {
    resources: Option<SurfaceResources>,
    slot: Arc<FrameSlot>,
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    padded_row: u32,
    frame_await_timeout: Duration,
    // GPU state stays on the constructing thread
    _not_send: PhantomData<*const ()>,
}

impl OutputSurface {
    /// Surface with the default fragment shader and timeouts
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::builder(width, height).build()
    }

    pub fn builder(width: u32, height: u32) -> OutputSurfaceBuilder {
        OutputSurfaceBuilder {
            width,
            height,
            fragment_shader: FragmentShader::default(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            frame_await_timeout: DEFAULT_FRAME_AWAIT_TIMEOUT,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Handle for the decoder to render into
    pub fn producer_surface(&self) -> ProducerSurface {
        ProducerSurface::new(Arc::clone(&self.slot))
    }

    /// Producer callback, usable from any thread through the slot
    pub fn on_frame_available(&self, image: crate::video::YuvImage) -> Result<()> {
        self.slot.on_frame_available(image)
    }

    fn resources(&self, op: &'static str) -> Result<&SurfaceResources> {
        self.resources.as_ref().ok_or(ExtractError::Gpu {
            op,
            message: "output surface has been released".to_string(),
        })
    }

    /// Wait for the next decoded image and latch it into the surface texture
    pub fn await_new_image(&mut self) -> Result<()> {
        let image = self.slot.await_frame(self.frame_await_timeout)?;
        let resources = self.resources.as_mut().ok_or(ExtractError::SurfaceAbandoned)?;

        resources.context.push_error_scope();
        resources.surface_texture.update_tex_image(
            &resources.context.device,
            &resources.context.queue,
            &image,
        );
        resources.context.check_gpu_error("update_tex_image")
    }

    /// Draw the latched image into the render target, flipped upright
    pub fn draw(&mut self) -> Result<()> {
        let resources = self.resources("draw")?;
        let st = resources.surface_texture.transform_matrix();
        resources.renderer.draw(
            &resources.context,
            &resources.target_view,
            &resources.surface_texture,
            st,
            true,
        )
    }

    /// Read the render target back into the pixel buffer
    ///
    /// The returned slice holds `4 * width * height` bytes of RGBA, top row first.
    pub fn read_pixels(&mut self) -> Result<&[u8]> {
        let resources = self.resources.as_ref().ok_or(ExtractError::Gpu {
            op: "read_pixels",
            message: "output surface has been released".to_string(),
        })?;
        let context = &resources.context;
        context.push_error_scope();

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Output Surface Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &resources.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &resources.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        context.queue.submit(Some(encoder.finish()));

        let slice = resources.readback.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = context.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = context.check_gpu_error("read_pixels");
                return Err(ExtractError::Gpu {
                    op: "read_pixels",
                    message: e.to_string(),
                });
            }
            Err(_) => {
                let _ = context.check_gpu_error("read_pixels");
                return Err(ExtractError::Gpu {
                    op: "read_pixels",
                    message: "buffer mapping was never completed".to_string(),
                });
            }
        }

        {
            let mapped = slice.get_mapped_range();
            unpad_rows(
                &mapped,
                self.padded_row as usize,
                self.width as usize * 4,
                self.height as usize,
                &mut self.pixels,
            );
        }
        resources.readback.unmap();
        context.check_gpu_error("read_pixels")?;

        Ok(&self.pixels)
    }

    /// Free every GPU resource and disconnect the producer surface. Idempotent.
    pub fn release(&mut self) {
        self.slot.abandon();
        if let Some(resources) = self.resources.take() {
            drop(resources);
            tracing::debug!("Released output surface {}x{}", self.width, self.height);
        }
        self.pixels = Vec::new();
    }
}

impl Drop for OutputSurface {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_bytes_per_row() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(1920), 7680);
    }

    #[test]
    fn test_unpad_rows() {
        // Two rows of 3 RGBA pixels in a 16-byte pitch
        let mut padded = vec![0u8; 32];
        for (i, byte) in padded[..12].iter_mut().enumerate() {
            *byte = i as u8;
        }
        for (i, byte) in padded[16..28].iter_mut().enumerate() {
            *byte = 100 + i as u8;
        }
        let mut out = vec![0u8; 24];
        unpad_rows(&padded, 16, 12, 2, &mut out);
        assert_eq!(&out[..12], &(0..12).collect::<Vec<u8>>()[..]);
        assert_eq!(&out[12..], &(100..112).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn test_zero_size_rejected_before_gpu_init() {
        assert!(matches!(
            OutputSurface::new(0, 480),
            Err(ExtractError::GpuInit(_))
        ));
        assert!(matches!(
            OutputSurface::new(640, 0),
            Err(ExtractError::GpuInit(_))
        ));
    }
}
