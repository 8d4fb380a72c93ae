//! Frame pump
//!
//! Drives demuxer, decoder and output surface in lock-step on one thread:
//! samples are fed into the decoder's input queue, every decoded picture is
//! released to the producer surface, awaited, drawn and read back, and the
//! pixels are handed to the sink. The pump ends once the decoder reports
//! end-of-stream on its output.

use std::time::{Duration, Instant};

use crate::error::{ExtractError, Result};
use crate::gpu::{OutputSurface, DEFAULT_FRAME_AWAIT_TIMEOUT};
use crate::sink::FrameSink;
use crate::telemetry::SaveTimings;
use crate::video::{BufferFlags, BufferInfo, Codec, MediaSource, OutputStatus};

/// Default cap on sink invocations per run
pub const MAX_FRAMES: u32 = 1000;

/// Default input/output dequeue timeout
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Render target the pump draws decoded pictures into
pub trait FrameTarget {
    /// Block until the next released picture has arrived and latch it
    fn await_new_image(&mut self) -> Result<()>;

    /// Draw the latched picture
    fn draw(&mut self) -> Result<()>;

    /// Read the drawn frame back as tightly packed RGBA
    fn read_pixels(&mut self) -> Result<&[u8]>;
}

impl FrameTarget for OutputSurface {
    fn await_new_image(&mut self) -> Result<()> {
        OutputSurface::await_new_image(self)
    }

    fn draw(&mut self) -> Result<()> {
        OutputSurface::draw(self)
    }

    fn read_pixels(&mut self) -> Result<&[u8]> {
        OutputSurface::read_pixels(self)
    }
}

/// Pump configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PumpConfig {
    /// Upper bound on sink invocations; later frames are decoded and dropped
    pub max_frames: u32,
    /// Timeout of each input and output dequeue
    pub dequeue_timeout: Duration,
    /// How long to wait for a released frame to reach the surface
    pub frame_await_timeout: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            max_frames: MAX_FRAMES,
            dequeue_timeout: DEQUEUE_TIMEOUT,
            frame_await_timeout: DEFAULT_FRAME_AWAIT_TIMEOUT,
        }
    }
}

/// Pump progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// Samples are still being queued
    Feeding,
    /// End-of-stream queued, waiting for the decoder to drain
    Flushing,
    /// End-of-stream seen on the output
    Done,
    /// A fault stopped the pump
    Errored,
}

/// Counters collected over one run
#[derive(Debug, Clone, Default)]
pub struct PumpStats {
    /// Samples queued to the decoder (end-of-stream excluded)
    pub input_chunks: u64,
    /// Frames rendered, delivered or not
    pub decode_count: u32,
    /// Frames handed to the sink
    pub frames_delivered: u32,
    /// End-of-stream buffers queued on the input
    pub eos_inputs: u32,
    /// End-of-stream buffers observed on the output
    pub eos_outputs: u32,
    /// Time from rendered release to sink return, per delivered frame
    pub frame_save_time: SaveTimings,
}

/// Drives one extraction run over borrowed pipeline components
pub struct FramePump<'a, S: ?Sized, C: ?Sized, T: ?Sized> {
    source: &'a mut S,
    codec: &'a mut C,
    target: &'a mut T,
    track: usize,
    width: u32,
    height: u32,
    config: PumpConfig,
    state: PumpState,
    stats: PumpStats,
}

impl<'a, S, C, T> FramePump<'a, S, C, T>
where
    S: MediaSource + ?Sized,
    C: Codec + ?Sized,
    T: FrameTarget + ?Sized,
{
    /// `source` must have `track` selected; `codec` must be configured and started
    pub fn new(
        source: &'a mut S,
        codec: &'a mut C,
        target: &'a mut T,
        track: usize,
        (width, height): (u32, u32),
        config: PumpConfig,
    ) -> Self {
        Self {
            source,
            codec,
            target,
            track,
            width,
            height,
            config,
            state: PumpState::Feeding,
            stats: PumpStats::default(),
        }
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    /// Run until the decoder reports end-of-stream
    pub fn run<K: FrameSink + ?Sized>(&mut self, sink: &mut K) -> Result<PumpStats> {
        match self.pump(sink) {
            Ok(()) => {
                self.log_save_time();
                Ok(std::mem::take(&mut self.stats))
            }
            Err(e) => {
                self.state = PumpState::Errored;
                tracing::debug!(
                    "Pump stopped after {} chunks and {} frames: {}",
                    self.stats.input_chunks,
                    self.stats.decode_count,
                    e
                );
                Err(e)
            }
        }
    }

    fn pump<K: FrameSink + ?Sized>(&mut self, sink: &mut K) -> Result<()> {
        while self.state != PumpState::Done {
            tracing::trace!("loop");

            // Feed more data to the decoder
            if self.state == PumpState::Feeding {
                self.feed_input()?;
            }

            self.drain_output(sink)?;
        }
        Ok(())
    }

    fn feed_input(&mut self) -> Result<()> {
        let Some(index) = self.codec.dequeue_input(self.config.dequeue_timeout)? else {
            tracing::trace!("input buffer not available");
            return Ok(());
        };

        let buffer = self.codec.input_buffer(index)?;
        match self.source.read_sample(buffer)? {
            None => {
                // End of stream: send an empty frame with the EOS flag set
                self.codec
                    .queue_input(index, 0, 0, 0, BufferFlags::END_OF_STREAM)?;
                self.stats.eos_inputs += 1;
                self.state = PumpState::Flushing;
                tracing::debug!("sent input EOS after {} chunks", self.stats.input_chunks);
            }
            Some(size) => {
                let sample_track = self.source.sample_track();
                if sample_track != Some(self.track) {
                    tracing::warn!(
                        "got sample from track {:?}, expected {}",
                        sample_track,
                        self.track
                    );
                }
                let presentation_time_us = self.source.sample_time_us().unwrap_or(0);
                self.codec
                    .queue_input(index, 0, size, presentation_time_us, BufferFlags::NONE)?;
                tracing::trace!(
                    "submitted frame {} to decoder, size={}",
                    self.stats.input_chunks,
                    size
                );
                self.stats.input_chunks += 1;
                self.source.advance();
            }
        }
        Ok(())
    }

    fn drain_output<K: FrameSink + ?Sized>(&mut self, sink: &mut K) -> Result<()> {
        let mut info = BufferInfo::default();
        let index = match self
            .codec
            .dequeue_output(&mut info, self.config.dequeue_timeout)?
        {
            OutputStatus::Buffer(index) => index,
            OutputStatus::TryAgainLater => {
                tracing::trace!("no output from decoder available");
                return Ok(());
            }
            OutputStatus::BuffersChanged => {
                // Not important for us, since we're using a surface
                tracing::debug!("decoder output buffers changed");
                return Ok(());
            }
            OutputStatus::FormatChanged => {
                match self.codec.output_format() {
                    Some(format) => tracing::debug!("decoder output format changed: {}", format),
                    None => tracing::debug!("decoder output format changed"),
                }
                return Ok(());
            }
            OutputStatus::Unknown(code) => return Err(ExtractError::DecoderProtocol(code)),
        };

        tracing::trace!(
            "surface decoder given buffer {} (size={}, pts={})",
            index,
            info.size,
            info.presentation_time_us
        );
        if info.is_end_of_stream() {
            tracing::debug!("output EOS");
            self.stats.eos_outputs += 1;
            self.state = PumpState::Done;
        }

        // The image reaches the surface only after the buffer is released with
        // render set, so release before waiting for it.
        let render = info.size != 0;
        self.codec.release_output(index, render)?;
        if !render {
            return Ok(());
        }

        tracing::trace!("awaiting decode of frame {}", self.stats.decode_count);
        self.target.await_new_image()?;
        self.target.draw()?;

        if self.stats.decode_count < self.config.max_frames {
            // Save time covers the read-back and the sink only
            let started = Instant::now();
            let pixels = self.target.read_pixels()?;
            sink.on_frame_extracted(self.stats.decode_count, pixels, self.width, self.height);
            self.stats.frame_save_time.record(started.elapsed());
            self.stats.frames_delivered += 1;
        }
        self.stats.decode_count += 1;
        Ok(())
    }

    fn log_save_time(&self) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        match self.stats.frame_save_time.average() {
            Some(average) => {
                let stats = self.stats.frame_save_time.stats();
                tracing::debug!(
                    "Saving {} frames took {} us per frame (p50 {:.2} ms, p95 {:.2} ms)",
                    stats.sample_count,
                    average.as_micros(),
                    stats.p50_ms,
                    stats.p95_ms
                );
            }
            None => tracing::debug!("No frames saved"),
        }
    }
}
