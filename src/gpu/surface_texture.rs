//! Producer/consumer hand-off of decoded images
//!
//! The decoder worker pushes each rendered picture through a [`ProducerSurface`]
//! into a [`FrameSlot`]: a single-slot mailbox guarded by a mutex and condition
//! variable. The consumer waits on the slot, takes the image and latches it
//! into the [`SurfaceTexture`] plane textures on its own thread.
//!
//! At most one unconsumed frame is buffered. A push while the previous frame
//! is still pending is a protocol fault: the producer gets the error back and
//! the consumer sees it on its next wait.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{ExtractError, Result};
use crate::video::YuvImage;

#[derive(Default)]
struct SlotState {
    pending: Option<YuvImage>,
    frame_available: bool,
    dropped: bool,
    failed: Option<String>,
    abandoned: bool,
}

/// Single-slot mailbox between the decoder worker and the consumer
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    frame_sync: Condvar,
}

impl FrameSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer side: store `image` and signal the consumer
    pub fn on_frame_available(&self, image: YuvImage) -> Result<()> {
        let mut state = self.lock();
        if state.abandoned {
            return Err(ExtractError::SurfaceAbandoned);
        }
        if state.frame_available {
            tracing::error!("frame available already set, frame could be dropped");
            state.dropped = true;
            self.frame_sync.notify_all();
            return Err(ExtractError::FrameDropped);
        }
        state.pending = Some(image);
        state.frame_available = true;
        self.frame_sync.notify_all();
        Ok(())
    }

    /// Producer side: report a fault so a waiting consumer fails with it
    /// instead of timing out
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.lock();
        if state.failed.is_none() {
            state.failed = Some(message.into());
        }
        self.frame_sync.notify_all();
    }

    /// Consumer side: wait up to `timeout` for the next image and take it
    ///
    /// Wake-ups without a frame keep waiting until the deadline.
    pub fn await_frame(&self, timeout: Duration) -> Result<YuvImage> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.dropped {
                return Err(ExtractError::FrameDropped);
            }
            if let Some(message) = &state.failed {
                return Err(ExtractError::Codec(message.clone()));
            }
            if state.frame_available {
                state.frame_available = false;
                if let Some(image) = state.pending.take() {
                    return Ok(image);
                }
            }
            if state.abandoned {
                return Err(ExtractError::SurfaceAbandoned);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ExtractError::FrameWaitTimeout(timeout));
            }
            state = match self.frame_sync.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Whether a frame is waiting to be consumed
    pub fn is_frame_available(&self) -> bool {
        self.lock().frame_available
    }

    /// Disconnect the consumer; later pushes fail with [`ExtractError::SurfaceAbandoned`]
    pub fn abandon(&self) {
        let mut state = self.lock();
        state.abandoned = true;
        state.pending = None;
        state.frame_available = false;
        self.frame_sync.notify_all();
    }

    pub fn is_abandoned(&self) -> bool {
        self.lock().abandoned
    }
}

/// Handle the decoder renders into; cheap to clone and usable from any thread
#[derive(Clone)]
pub struct ProducerSurface {
    slot: Arc<FrameSlot>,
}

impl ProducerSurface {
    pub fn new(slot: Arc<FrameSlot>) -> Self {
        Self { slot }
    }

    /// Queue a decoded picture for the consumer
    pub fn push(&self, image: YuvImage) -> Result<()> {
        if !image.is_valid() {
            let message = format!(
                "malformed {}x{} image pushed to surface",
                image.coded_width(),
                image.coded_height()
            );
            self.slot.fail(message.clone());
            return Err(ExtractError::Codec(message));
        }
        self.slot.on_frame_available(image)
    }

    pub fn is_abandoned(&self) -> bool {
        self.slot.is_abandoned()
    }
}

impl std::fmt::Debug for ProducerSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerSurface")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

static NEXT_TEXTURE_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a texture id for a surface texture
pub(crate) fn allocate_texture_id() -> u32 {
    NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)
}

/// One single-channel plane texture
struct PlaneTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl PlaneTexture {
    fn new(device: &wgpu::Device, label: &'static str, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width: width.max(1),
            height: height.max(1),
        }
    }

    fn resize(&mut self, device: &wgpu::Device, label: &'static str, width: u32, height: u32) {
        if self.width == width && self.height == height {
            return;
        }
        *self = Self::new(device, label, width, height);
        tracing::debug!("Resized {} to {}x{}", label, width, height);
    }

    fn upload(&self, queue: &wgpu::Queue, plane: &crate::video::Plane) {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &plane.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(plane.stride as u32),
                rows_per_image: Some(plane.height),
            },
            wgpu::Extent3d {
                width: plane.width,
                height: plane.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

/// GPU side of the surface: the latched image's planes and texture transform
pub struct SurfaceTexture {
    texture_id: u32,
    y: PlaneTexture,
    u: PlaneTexture,
    v: PlaneTexture,
    transform: [f32; 16],
    full_range: bool,
}

impl SurfaceTexture {
    /// Create the plane textures for `texture_id`; they start at 1x1 and grow on first latch
    pub fn new(device: &wgpu::Device, texture_id: u32) -> Self {
        Self {
            texture_id,
            y: PlaneTexture::new(device, "Surface Texture Y", 1, 1),
            u: PlaneTexture::new(device, "Surface Texture U", 1, 1),
            v: PlaneTexture::new(device, "Surface Texture V", 1, 1),
            transform: glam::Mat4::IDENTITY.to_cols_array(),
            full_range: true,
        }
    }

    pub fn texture_id(&self) -> u32 {
        self.texture_id
    }

    /// Upload `image` into the plane textures and take over its transform
    pub fn update_tex_image(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, image: &YuvImage) {
        self.y.resize(device, "Surface Texture Y", image.y.width, image.y.height);
        self.u.resize(device, "Surface Texture U", image.u.width, image.u.height);
        self.v.resize(device, "Surface Texture V", image.v.width, image.v.height);

        self.y.upload(queue, &image.y);
        self.u.upload(queue, &image.u);
        self.v.upload(queue, &image.v);

        self.transform = image.transform_matrix();
        self.full_range = image.full_range;
    }

    /// Texture transform of the latched image (column-major)
    pub fn transform_matrix(&self) -> [f32; 16] {
        self.transform
    }

    pub fn full_range(&self) -> bool {
        self.full_range
    }

    /// Views of the Y, U and V planes, in binding order
    pub fn plane_views(&self) -> [&wgpu::TextureView; 3] {
        [&self.y.view, &self.u.view, &self.v.view]
    }
}
