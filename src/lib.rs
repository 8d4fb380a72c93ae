//! mpeg-frames
//!
//! Extracts every frame of the first video track of an MP4 (or any container
//! FFmpeg can demux) as tightly packed RGBA8. Samples are decoded by FFmpeg,
//! uploaded as YUV planes and converted on the GPU with wgpu, then read back
//! and handed to a [`FrameSink`] one frame at a time.

pub mod error;
pub mod extractor;
pub mod gpu;
pub mod pump;
pub mod settings;
pub mod shaders;
pub mod sink;
pub mod source;
pub mod task;
pub mod telemetry;
pub mod video;

#[cfg(test)]
mod testing;

use std::collections::BTreeMap;
use std::fs::File;

use url::Url;

pub use error::{ExtractError, Result};
pub use extractor::{ExtractorConfig, FrameExtractor, HardwareBackend, PipelineBackend, RenderSurface};
pub use pump::{FramePump, FrameTarget, PumpConfig, PumpState, PumpStats, MAX_FRAMES};
pub use settings::{ExtractorSettings, SettingsError};
pub use shaders::FragmentShader;
pub use sink::{FrameCollector, FrameSink};
pub use source::SourceHandle;
pub use task::{CancelToken, ExtractTask, ExtractedFrame};

/// Extract frames from `source` with the default configuration
///
/// Returns `Ok(false)` if the source could not be opened or read.
pub fn extract<K: FrameSink + ?Sized>(source: SourceHandle, sink: &mut K) -> Result<bool> {
    FrameExtractor::default().extract(source, sink)
}

/// Extract frames from a byte range of an open file
///
/// A negative `declared_length` reads to the end of the file.
pub fn extract_file<K: FrameSink + ?Sized>(
    file: File,
    start_offset: u64,
    declared_length: i64,
    sink: &mut K,
) -> Result<bool> {
    FrameExtractor::default().extract_file(file, start_offset, declared_length, sink)
}

/// Extract frames from a URI, sending `headers` with network requests
pub fn extract_uri<K: FrameSink + ?Sized>(
    uri: Url,
    headers: Option<BTreeMap<String, String>>,
    sink: &mut K,
) -> Result<bool> {
    FrameExtractor::default().extract_uri(uri, headers, sink)
}
