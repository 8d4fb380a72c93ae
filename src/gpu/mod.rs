//! GPU side of the pipeline
//!
//! A headless wgpu context, the surface texture decoded images are latched
//! into, the renderer converting them to RGBA and the output surface that
//! reads the result back to the CPU.

pub mod context;
pub mod output_surface;
pub mod surface_texture;
pub mod texture_renderer;

pub use context::GpuContext;
pub use output_surface::{OutputSurface, OutputSurfaceBuilder, DEFAULT_FRAME_AWAIT_TIMEOUT};
pub use surface_texture::{FrameSlot, ProducerSurface, SurfaceTexture};
pub use texture_renderer::{QuadUniforms, TextureRenderer};
