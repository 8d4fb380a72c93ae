//! Extraction pipeline
//!
//! Wires a demuxer, an output surface and a decoder together, runs the
//! [`FramePump`] and tears everything down again on every exit path.
//! The pieces come from a [`PipelineBackend`]; [`HardwareBackend`] is the
//! FFmpeg + wgpu implementation used by the crate-level entry points.

use std::collections::BTreeMap;
use std::fs::File;

use url::Url;

use crate::error::{ExtractError, Result};
use crate::gpu::{OutputSurface, ProducerSurface};
use crate::pump::{FramePump, FrameTarget, PumpConfig, PumpStats};
use crate::shaders::FragmentShader;
use crate::sink::FrameSink;
use crate::source::SourceHandle;
use crate::video::{select_video_track, Codec, FfmpegCodec, FfmpegDemuxer, MediaSource};

/// Extraction settings
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub pump: PumpConfig,
    pub fragment_shader: FragmentShader,
    /// Try a hardware decoder before falling back to software
    pub try_hwaccel: bool,
    pub power_preference: wgpu::PowerPreference,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            pump: PumpConfig::default(),
            fragment_shader: FragmentShader::default(),
            try_hwaccel: true,
            power_preference: wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// A [`FrameTarget`] decoders can render into
pub trait RenderSurface: FrameTarget {
    /// Handle handed to the decoder at configure time
    fn producer_surface(&self) -> ProducerSurface;

    /// Free the surface; pending and later frames are discarded
    fn release(&mut self);
}

impl RenderSurface for OutputSurface {
    fn producer_surface(&self) -> ProducerSurface {
        OutputSurface::producer_surface(self)
    }

    fn release(&mut self) {
        OutputSurface::release(self)
    }
}

/// Factory for the components of one extraction run
pub trait PipelineBackend {
    type Source: MediaSource;
    type Surface: RenderSurface;
    type Codec: Codec;

    /// Open the container; failures must be [`ExtractError::Io`]
    fn open_source(&mut self, source: &SourceHandle) -> Result<Self::Source>;

    /// Create the render target for `width` x `height` frames
    fn create_surface(
        &mut self,
        width: u32,
        height: u32,
        config: &ExtractorConfig,
    ) -> Result<Self::Surface>;

    /// Create an unconfigured decoder for a MIME type
    fn create_codec(&mut self, mime: &str, config: &ExtractorConfig) -> Result<Self::Codec>;
}

/// FFmpeg demuxing and decoding, wgpu rendering
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareBackend;

impl PipelineBackend for HardwareBackend {
    type Source = FfmpegDemuxer;
    type Surface = OutputSurface;
    type Codec = FfmpegCodec;

    fn open_source(&mut self, source: &SourceHandle) -> Result<FfmpegDemuxer> {
        FfmpegDemuxer::open(source)
    }

    fn create_surface(
        &mut self,
        width: u32,
        height: u32,
        config: &ExtractorConfig,
    ) -> Result<OutputSurface> {
        OutputSurface::builder(width, height)
            .fragment_shader(config.fragment_shader.clone())
            .power_preference(config.power_preference)
            .frame_await_timeout(config.pump.frame_await_timeout)
            .build()
    }

    fn create_codec(&mut self, mime: &str, config: &ExtractorConfig) -> Result<FfmpegCodec> {
        FfmpegCodec::create_with_options(mime, config.try_hwaccel)
    }
}

/// Components of a run, released in decoder, surface, demuxer order
struct Pipeline<S: MediaSource, T: RenderSurface, C: Codec> {
    source: S,
    surface: Option<T>,
    codec: Option<C>,
}

impl<S: MediaSource, T: RenderSurface, C: Codec> Pipeline<S, T, C> {
    fn new(source: S) -> Self {
        Self {
            source,
            surface: None,
            codec: None,
        }
    }

    fn release(&mut self) {
        if let Some(mut codec) = self.codec.take() {
            if let Err(e) = codec.stop() {
                tracing::warn!("Failed to stop decoder: {}", e);
            }
            codec.release();
        }
        if let Some(mut surface) = self.surface.take() {
            surface.release();
        }
        self.source.release();
    }
}

impl<S: MediaSource, T: RenderSurface, C: Codec> Drop for Pipeline<S, T, C> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs extractions with a fixed configuration
pub struct FrameExtractor<B = HardwareBackend> {
    config: ExtractorConfig,
    backend: B,
    last_stats: Option<PumpStats>,
}

impl FrameExtractor<HardwareBackend> {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            backend: HardwareBackend,
            last_stats: None,
        }
    }
}

impl Default for FrameExtractor<HardwareBackend> {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl<B: PipelineBackend> FrameExtractor<B> {
    /// Swap the component factory
    pub fn with_backend<N: PipelineBackend>(self, backend: N) -> FrameExtractor<N> {
        FrameExtractor {
            config: self.config,
            backend,
            last_stats: None,
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Counters of the last run that reached end-of-stream
    pub fn last_stats(&self) -> Option<&PumpStats> {
        self.last_stats.as_ref()
    }

    /// Extract every frame of the first video track into `sink`
    ///
    /// Returns `Ok(false)` when the source could not be opened or read, and
    /// `Ok(true)` otherwise, including for sources without a video track.
    pub fn extract<K: FrameSink + ?Sized>(
        &mut self,
        source: SourceHandle,
        sink: &mut K,
    ) -> Result<bool> {
        let description = source.describe();
        self.last_stats = None;
        match self.run(&source, sink) {
            Ok(stats) => {
                self.last_stats = stats;
                Ok(true)
            }
            Err(e) if e.is_io() => {
                tracing::warn!("Extraction from {} failed: {}", description, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Extract from `declared_length` bytes of `file` starting at `start_offset`
    ///
    /// A negative length means "to the end of the file".
    pub fn extract_file<K: FrameSink + ?Sized>(
        &mut self,
        file: File,
        start_offset: u64,
        declared_length: i64,
        sink: &mut K,
    ) -> Result<bool> {
        self.extract(SourceHandle::file_range(file, start_offset, declared_length), sink)
    }

    /// Extract from a URI, sending `headers` with network requests
    pub fn extract_uri<K: FrameSink + ?Sized>(
        &mut self,
        uri: Url,
        headers: Option<BTreeMap<String, String>>,
        sink: &mut K,
    ) -> Result<bool> {
        let source = match headers {
            Some(headers) => SourceHandle::uri_with_headers(uri, headers),
            None => SourceHandle::uri(uri),
        };
        self.extract(source, sink)
    }

    fn run<K: FrameSink + ?Sized>(
        &mut self,
        handle: &SourceHandle,
        sink: &mut K,
    ) -> Result<Option<PumpStats>> {
        let source = self.backend.open_source(handle)?;
        let mut pipeline = Pipeline::new(source);

        let Some(track) = select_video_track(&pipeline.source)? else {
            tracing::warn!("{}: {}", handle.describe(), ExtractError::NoVideoTrack);
            return Ok(None);
        };
        pipeline.source.select_track(track)?;
        let format = pipeline.source.track_format(track)?;
        let (width, height) = (format.width, format.height);
        tracing::info!("Extracting frames from track {}", format);

        let surface = pipeline
            .surface
            .insert(self.backend.create_surface(width, height, &self.config)?);
        let producer = surface.producer_surface();

        let codec = pipeline
            .codec
            .insert(self.backend.create_codec(&format.mime, &self.config)?);
        codec.configure(&format, producer)?;
        codec.start()?;

        let stats = FramePump::new(
            &mut pipeline.source,
            codec,
            surface,
            track,
            (width, height),
            self.config.pump.clone(),
        )
        .run(sink)?;

        tracing::info!(
            "Extracted {} frames ({} decoded, {} samples)",
            stats.frames_delivered,
            stats.decode_count,
            stats.input_chunks
        );
        pipeline.release();
        Ok(Some(stats))
    }
}
