//! In-memory pipeline components for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ExtractError, Result};
use crate::extractor::{ExtractorConfig, PipelineBackend, RenderSurface};
use crate::gpu::{FrameSlot, ProducerSurface};
use crate::pump::FrameTarget;
use crate::sink::FrameSink;
use crate::source::SourceHandle;
use crate::video::{
    BufferFlags, BufferInfo, Codec, MediaSource, OutputStatus, TrackFormat, YuvImage,
};

/// Shared log of lifecycle calls across fakes
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: &str) {
        self.0.lock().unwrap().push(entry.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

fn record(journal: &Option<Journal>, entry: &str) {
    if let Some(journal) = journal {
        journal.record(entry);
    }
}

#[derive(Debug, Clone)]
pub struct FakeSample {
    pub track: usize,
    pub time_us: i64,
    pub data: Vec<u8>,
}

/// Container with fixed tracks and samples
#[derive(Debug, Default)]
pub struct FakeSource {
    pub tracks: Vec<TrackFormat>,
    pub samples: Vec<FakeSample>,
    pub selected: Vec<usize>,
    /// Sample position whose read fails with an I/O error
    pub fail_at: Option<usize>,
    pub position: usize,
    pub released: bool,
    pub journal: Option<Journal>,
}

impl FakeSource {
    pub fn new(tracks: Vec<TrackFormat>) -> Self {
        Self {
            tracks,
            ..Default::default()
        }
    }

    /// One 64x48 AVC track with `count` samples at 30fps
    pub fn video(count: usize) -> Self {
        let mut source = Self::new(vec![TrackFormat::video(0, "video/avc", 64, 48)]);
        source.samples = (0..count)
            .map(|i| FakeSample {
                track: 0,
                time_us: i as i64 * 33_333,
                data: vec![i as u8; 16 + i % 7],
            })
            .collect();
        source
    }
}

impl MediaSource for FakeSource {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        self.tracks
            .get(index)
            .cloned()
            .ok_or_else(|| ExtractError::io_other(format!("no track {}", index)))
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(ExtractError::io_other(format!("no track {}", index)));
        }
        self.selected.push(index);
        Ok(())
    }

    fn read_sample(&mut self, buffer: &mut Vec<u8>) -> Result<Option<usize>> {
        if self.fail_at == Some(self.position) {
            return Err(ExtractError::io_other("truncated sample"));
        }
        match self.samples.get(self.position) {
            Some(sample) => {
                buffer.clear();
                buffer.extend_from_slice(&sample.data);
                Ok(Some(sample.data.len()))
            }
            None => Ok(None),
        }
    }

    fn sample_track(&self) -> Option<usize> {
        self.samples.get(self.position).map(|s| s.track)
    }

    fn sample_time_us(&self) -> Option<i64> {
        self.samples.get(self.position).map(|s| s.time_us)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            record(&self.journal, "source.release");
        }
    }
}

#[derive(Debug)]
enum Queued {
    Frame(i64),
    EndOfStream,
}

/// Decoder that turns every queued sample into a flat grey picture
///
/// The picture for the n-th output has luma `n % 256`.
#[derive(Debug, Default)]
pub struct FakeCodec {
    /// Samples held back before output starts, until end-of-stream flushes them
    pub latency: usize,
    /// Statuses returned before any buffer
    pub inject: VecDeque<OutputStatus>,
    /// Report a format on [`OutputStatus::FormatChanged`]
    pub report_format: bool,
    /// Push every rendered picture twice
    pub double_push: bool,
    /// Never push rendered pictures
    pub skip_push: bool,
    pub queued_pts: Vec<i64>,
    pub output_indices: Vec<usize>,
    pub eos_inputs: u32,
    pub eos_outputs: u32,
    pub released_without_render: u32,
    pub stopped: bool,
    pub released: bool,
    pub journal: Option<Journal>,

    format: Option<TrackFormat>,
    output_format: Option<TrackFormat>,
    surface: Option<ProducerSurface>,
    started: bool,
    inputs: Vec<Vec<u8>>,
    free: VecDeque<usize>,
    pipeline: VecDeque<Queued>,
    flushing: bool,
    held: HashMap<usize, Option<YuvImage>>,
    next_output: usize,
    frames_out: u32,
}

impl FakeCodec {
    pub fn new() -> Self {
        Self {
            inputs: vec![Vec::new(); 4],
            free: (0..4).collect(),
            ..Default::default()
        }
    }

    fn check_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(ExtractError::Codec("codec not started".into()))
        }
    }
}

impl Codec for FakeCodec {
    fn configure(&mut self, format: &TrackFormat, surface: ProducerSurface) -> Result<()> {
        self.format = Some(format.clone());
        self.surface = Some(surface);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.format.is_none() {
            return Err(ExtractError::Codec("codec not configured".into()));
        }
        self.started = true;
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        self.check_started()?;
        Ok(self.free.pop_front())
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>> {
        self.inputs
            .get_mut(index)
            .ok_or_else(|| ExtractError::Codec(format!("no input buffer {}", index)))
    }

    fn queue_input(
        &mut self,
        index: usize,
        _offset: usize,
        _size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        self.check_started()?;
        if flags.contains(BufferFlags::END_OF_STREAM) {
            self.eos_inputs += 1;
            self.flushing = true;
            self.pipeline.push_back(Queued::EndOfStream);
        } else {
            self.queued_pts.push(presentation_time_us);
            self.pipeline.push_back(Queued::Frame(presentation_time_us));
        }
        self.free.push_back(index);
        Ok(())
    }

    fn dequeue_output(&mut self, info: &mut BufferInfo, _timeout: Duration) -> Result<OutputStatus> {
        self.check_started()?;
        if let Some(status) = self.inject.pop_front() {
            if status == OutputStatus::FormatChanged && self.report_format {
                self.output_format = self.format.clone();
            }
            return Ok(status);
        }
        if !self.flushing && self.pipeline.len() <= self.latency {
            return Ok(OutputStatus::TryAgainLater);
        }

        let Some(queued) = self.pipeline.pop_front() else {
            return Ok(OutputStatus::TryAgainLater);
        };
        let index = self.next_output;
        self.next_output += 1;
        self.output_indices.push(index);

        match queued {
            Queued::Frame(pts) => {
                let (width, height) = self
                    .format
                    .as_ref()
                    .map(|f| (f.width, f.height))
                    .unwrap_or((2, 2));
                let luma = (self.frames_out % 256) as u8;
                self.frames_out += 1;
                *info = BufferInfo {
                    offset: 0,
                    size: 1,
                    presentation_time_us: pts,
                    flags: BufferFlags::NONE,
                };
                self.held
                    .insert(index, Some(YuvImage::solid(width, height, luma, pts)));
            }
            Queued::EndOfStream => {
                self.eos_outputs += 1;
                *info = BufferInfo {
                    flags: BufferFlags::END_OF_STREAM,
                    ..Default::default()
                };
                self.held.insert(index, None);
            }
        }
        Ok(OutputStatus::Buffer(index))
    }

    fn output_format(&self) -> Option<TrackFormat> {
        self.output_format.clone()
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<()> {
        let image = self
            .held
            .remove(&index)
            .ok_or_else(|| ExtractError::Codec(format!("output {} not held", index)))?;
        let (true, Some(image)) = (render, image) else {
            self.released_without_render += 1;
            return Ok(());
        };
        if self.skip_push {
            return Ok(());
        }
        if let Some(surface) = &self.surface {
            if self.double_push {
                surface.push(image.clone())?;
                let _ = surface.push(image);
            } else {
                surface.push(image)?;
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.started {
            self.started = false;
            self.stopped = true;
            record(&self.journal, "codec.stop");
        }
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.surface = None;
            record(&self.journal, "codec.release");
        }
    }
}

/// Render target that "draws" a picture as its luma value
pub struct FakeTarget {
    pub width: u32,
    pub height: u32,
    pub draws: u32,
    pub released: bool,
    pub journal: Option<Journal>,
    /// Simulated render cost per draw
    pub draw_delay: Duration,
    slot: Arc<FrameSlot>,
    timeout: Duration,
    latched: Option<YuvImage>,
    pixels: Vec<u8>,
}

impl FakeTarget {
    pub fn new(width: u32, height: u32, timeout: Duration) -> Self {
        Self {
            width,
            height,
            draws: 0,
            released: false,
            journal: None,
            draw_delay: Duration::ZERO,
            slot: FrameSlot::new(),
            timeout,
            latched: None,
            pixels: Vec::new(),
        }
    }
}

impl FrameTarget for FakeTarget {
    fn await_new_image(&mut self) -> Result<()> {
        self.latched = Some(self.slot.await_frame(self.timeout)?);
        Ok(())
    }

    fn draw(&mut self) -> Result<()> {
        if self.latched.is_none() {
            return Err(ExtractError::Gpu {
                op: "draw",
                message: "no image latched".into(),
            });
        }
        if !self.draw_delay.is_zero() {
            std::thread::sleep(self.draw_delay);
        }
        self.draws += 1;
        Ok(())
    }

    fn read_pixels(&mut self) -> Result<&[u8]> {
        let luma = self
            .latched
            .as_ref()
            .and_then(|image| image.y.data.first().copied())
            .unwrap_or(0);
        self.pixels.clear();
        for _ in 0..(self.width * self.height) {
            self.pixels.extend_from_slice(&[luma, luma, luma, 255]);
        }
        Ok(&self.pixels)
    }
}

impl RenderSurface for FakeTarget {
    fn producer_surface(&self) -> ProducerSurface {
        ProducerSurface::new(self.slot.clone())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.slot.abandon();
            record(&self.journal, "surface.release");
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkCall {
    pub index: u32,
    pub len: usize,
    pub width: u32,
    pub height: u32,
    pub first: u8,
}

/// Sink that remembers the shape of every call
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub calls: Vec<SinkCall>,
}

impl RecordingSink {
    pub fn indices(&self) -> Vec<u32> {
        self.calls.iter().map(|c| c.index).collect()
    }

    pub fn first_bytes(&self) -> Vec<u8> {
        self.calls.iter().map(|c| c.first).collect()
    }
}

impl FrameSink for RecordingSink {
    fn on_frame_extracted(&mut self, index: u32, pixels: &[u8], width: u32, height: u32) {
        self.calls.push(SinkCall {
            index,
            len: pixels.len(),
            width,
            height,
            first: pixels.first().copied().unwrap_or(0),
        });
    }
}

/// Hands out prepared fakes, all writing into one journal
#[derive(Default)]
pub struct FakeBackend {
    pub journal: Journal,
    pub source: Option<FakeSource>,
    pub codec: Option<FakeCodec>,
    pub unsupported: bool,
    pub open_fails: bool,
}

impl FakeBackend {
    pub fn with_source(source: FakeSource) -> Self {
        Self {
            source: Some(source),
            codec: Some(FakeCodec::new()),
            ..Default::default()
        }
    }
}

impl PipelineBackend for FakeBackend {
    type Source = FakeSource;
    type Surface = FakeTarget;
    type Codec = FakeCodec;

    fn open_source(&mut self, _source: &SourceHandle) -> Result<FakeSource> {
        if self.open_fails {
            return Err(ExtractError::io_other("connection refused"));
        }
        let mut source = self.source.take().unwrap_or_default();
        source.journal = Some(self.journal.clone());
        Ok(source)
    }

    fn create_surface(
        &mut self,
        width: u32,
        height: u32,
        config: &ExtractorConfig,
    ) -> Result<FakeTarget> {
        self.journal.record("surface.create");
        let mut target = FakeTarget::new(width, height, config.pump.frame_await_timeout);
        target.journal = Some(self.journal.clone());
        Ok(target)
    }

    fn create_codec(&mut self, mime: &str, _config: &ExtractorConfig) -> Result<FakeCodec> {
        if self.unsupported {
            return Err(ExtractError::UnsupportedCodec(mime.to_string()));
        }
        let mut codec = self.codec.take().unwrap_or_else(FakeCodec::new);
        codec.journal = Some(self.journal.clone());
        Ok(codec)
    }
}

/// Luma written into frame `n` of a [`write_test_clip`] clip
pub fn clip_luma(n: u32) -> u8 {
    (32 + (n * 24) % 192) as u8
}

/// A 64x48 [`write_test_clip`] MP4 in the temp directory, removed on drop
pub struct TestClip {
    pub path: std::path::PathBuf,
    pub frames: u32,
}

impl TestClip {
    pub const WIDTH: u32 = 64;
    pub const HEIGHT: u32 = 48;

    pub fn new(name: &str, frames: u32) -> Self {
        let path = std::env::temp_dir().join(format!("mpeg-frames-{}-{}.mp4", std::process::id(), name));
        write_test_clip(&path, frames, Self::WIDTH, Self::HEIGHT).unwrap();
        Self { path, frames }
    }
}

impl Drop for TestClip {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Encode `frames` flat grey MPEG-4 Part 2 frames at 25 fps into an MP4 at `path`
///
/// Uses FFmpeg's built-in `mpeg4` encoder, so no external codec library is needed.
pub fn write_test_clip(
    path: &std::path::Path,
    frames: u32,
    width: u32,
    height: u32,
) -> std::result::Result<(), ffmpeg_next::Error> {
    use ffmpeg_next::{codec, encoder, format, frame, Rational};

    ffmpeg_next::init()?;
    let frame_rate = Rational(1, 25);

    let mut output = format::output(&path)?;
    let global_header = output.format().flags().contains(format::Flags::GLOBAL_HEADER);
    let mpeg4 = encoder::find(codec::Id::MPEG4).ok_or(ffmpeg_next::Error::EncoderNotFound)?;

    let mut video = codec::context::Context::new_with_codec(mpeg4).encoder().video()?;
    video.set_width(width);
    video.set_height(height);
    video.set_format(format::Pixel::YUV420P);
    video.set_time_base(frame_rate);
    video.set_frame_rate(Some(Rational(25, 1)));
    video.set_gop(10);
    if global_header {
        video.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let mut encoder = video.open_as(mpeg4)?;

    let stream_index = {
        let mut stream = output.add_stream(mpeg4)?;
        stream.set_time_base(frame_rate);
        stream.set_parameters(&encoder);
        stream.index()
    };
    output.write_header()?;
    let stream_time_base = output
        .stream(stream_index)
        .ok_or(ffmpeg_next::Error::StreamNotFound)?
        .time_base();

    let write_packets = |encoder: &mut codec::encoder::video::Encoder,
                             output: &mut format::context::Output|
     -> std::result::Result<(), ffmpeg_next::Error> {
        let mut packet = ffmpeg_next::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(stream_index);
            packet.rescale_ts(frame_rate, stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    };

    for n in 0..frames {
        let mut picture = frame::Video::new(format::Pixel::YUV420P, width, height);
        picture.data_mut(0).fill(clip_luma(n));
        picture.data_mut(1).fill(128);
        picture.data_mut(2).fill(128);
        picture.set_pts(Some(n as i64));
        encoder.send_frame(&picture)?;
        write_packets(&mut encoder, &mut output)?;
    }
    encoder.send_eof()?;
    write_packets(&mut encoder, &mut output)?;
    output.write_trailer()?;
    Ok(())
}
