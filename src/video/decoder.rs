//! FFmpeg-backed [`Codec`] with hardware acceleration support
//!
//! The decoder runs on its own worker thread. Compressed samples reach it
//! through a command channel; decoded pictures are normalised to planar
//! YUV 4:2:0 (hardware frames are transferred to system memory first) and
//! announced on an event channel. Releasing an output with `render = true`
//! makes the worker push the picture into the configured producer surface, so
//! frame-available notifications originate on the worker thread.

use std::collections::HashMap;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::codec::{BufferFlags, BufferInfo, Codec, OutputStatus};
use super::format::codec_id_for_mime;
use super::frame::{Plane, YuvImage};
use super::TrackFormat;
use crate::error::{ExtractError, Result};
use crate::gpu::ProducerSurface;

/// Number of input buffers in the pool
pub const INPUT_BUFFER_COUNT: usize = 4;

/// Hardware acceleration method in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwAccelMethod {
    /// No hardware acceleration (software decode)
    None,
    /// macOS VideoToolbox
    VideoToolbox,
    /// Windows D3D11VA
    D3d11va,
    /// NVIDIA NVDEC
    Nvdec,
    /// Intel QuickSync
    Qsv,
    /// Linux V4L2 memory-to-memory decoders
    V4l2M2m,
}

impl std::fmt::Display for HwAccelMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HwAccelMethod::None => write!(f, "software"),
            HwAccelMethod::VideoToolbox => write!(f, "videotoolbox"),
            HwAccelMethod::D3d11va => write!(f, "d3d11va"),
            HwAccelMethod::Nvdec => write!(f, "nvdec"),
            HwAccelMethod::Qsv => write!(f, "qsv"),
            HwAccelMethod::V4l2M2m => write!(f, "v4l2m2m"),
        }
    }
}

impl HwAccelMethod {
    /// Methods worth probing on this platform, most preferred first
    pub fn platform_candidates() -> &'static [HwAccelMethod] {
        #[cfg(target_os = "macos")]
        {
            &[HwAccelMethod::VideoToolbox]
        }
        #[cfg(target_os = "windows")]
        {
            &[HwAccelMethod::D3d11va, HwAccelMethod::Nvdec, HwAccelMethod::Qsv]
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            &[HwAccelMethod::Nvdec, HwAccelMethod::Qsv, HwAccelMethod::V4l2M2m]
        }
    }

    /// Name suffix of the dedicated FFmpeg decoder for this method, if it has one
    ///
    /// VideoToolbox and D3D11VA work through the regular decoders.
    pub fn decoder_suffix(&self) -> Option<&'static str> {
        match self {
            HwAccelMethod::Nvdec => Some("cuvid"),
            HwAccelMethod::Qsv => Some("qsv"),
            HwAccelMethod::V4l2M2m => Some("v4l2m2m"),
            HwAccelMethod::None | HwAccelMethod::VideoToolbox | HwAccelMethod::D3d11va => None,
        }
    }

    /// FFmpeg device type to attach to the regular decoder for methods without
    /// a dedicated decoder
    pub fn device_type(&self) -> Option<ffmpeg_next::ffi::AVHWDeviceType> {
        use ffmpeg_next::ffi::AVHWDeviceType;
        match self {
            HwAccelMethod::VideoToolbox => Some(AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX),
            HwAccelMethod::D3d11va => Some(AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA),
            HwAccelMethod::None | HwAccelMethod::Nvdec | HwAccelMethod::Qsv | HwAccelMethod::V4l2M2m => None,
        }
    }
}

/// `AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX`
const HW_CONFIG_METHOD_DEVICE_CTX: i32 = 0x01;

/// Whether `codec` can decode through a device context of type `device`
fn supports_device(codec: ffmpeg_next::Codec, device: ffmpeg_next::ffi::AVHWDeviceType) -> bool {
    let mut index = 0;
    loop {
        // Null past the last entry
        let config = unsafe { ffmpeg_next::ffi::avcodec_get_hw_config(codec.as_ptr(), index) };
        if config.is_null() {
            return false;
        }
        let config = unsafe { &*config };
        if config.device_type == device && config.methods & HW_CONFIG_METHOD_DEVICE_CTX != 0 {
            return true;
        }
        index += 1;
    }
}

/// Name of the hardware decoder variant for a software decoder
pub fn hw_decoder_name(codec_name: &str, method: HwAccelMethod) -> Option<String> {
    method
        .decoder_suffix()
        .map(|suffix| format!("{}_{}", codec_name, suffix))
}

/// Check if a pixel format is a hardware format
fn is_hardware_format(format: ffmpeg_next::format::Pixel) -> bool {
    matches!(
        format,
        ffmpeg_next::format::Pixel::VIDEOTOOLBOX
            | ffmpeg_next::format::Pixel::D3D11
            | ffmpeg_next::format::Pixel::CUDA
            | ffmpeg_next::format::Pixel::QSV
            | ffmpeg_next::format::Pixel::VAAPI
            | ffmpeg_next::format::Pixel::VDPAU
            | ffmpeg_next::format::Pixel::DXVA2_VLD
    )
}

/// Formats that can be handed to the surface without conversion
fn is_planar_420(format: ffmpeg_next::format::Pixel) -> bool {
    matches!(
        format,
        ffmpeg_next::format::Pixel::YUV420P | ffmpeg_next::format::Pixel::YUVJ420P
    )
}

/// Commands sent to the decoder worker
enum Command {
    Input {
        index: usize,
        data: Vec<u8>,
        pts_us: i64,
        flags: BufferFlags,
    },
    Release {
        index: usize,
        render: bool,
    },
    Stop,
}

/// Events posted by the decoder worker
enum Event {
    FormatChanged(TrackFormat),
    Buffer { index: usize, info: BufferInfo },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodecState {
    Created,
    Configured,
    Running,
    Stopped,
    Released,
}

/// Decoder running on a worker thread, driven through buffer queues
pub struct FfmpegCodec {
    mime: String,
    software: ffmpeg_next::Codec,
    try_hwaccel: bool,
    hwaccel: HwAccelMethod,
    state: CodecState,
    decoder: Option<ffmpeg_next::decoder::Video>,
    surface: Option<ProducerSurface>,
    input_buffers: Vec<Vec<u8>>,
    free_tx: Sender<(usize, Vec<u8>)>,
    free_rx: Receiver<(usize, Vec<u8>)>,
    commands: Option<Sender<Command>>,
    events: Option<Receiver<Event>>,
    worker: Option<JoinHandle<()>>,
    output_format: Option<TrackFormat>,
    eos_queued: bool,
}

impl FfmpegCodec {
    /// Create a decoder for a MIME type, probing hardware variants at configure time
    pub fn create_for(mime: &str) -> Result<Self> {
        Self::create_with_options(mime, true)
    }

    /// Create a decoder with explicit hardware acceleration control
    pub fn create_with_options(mime: &str, try_hwaccel: bool) -> Result<Self> {
        ffmpeg_next::init()?;

        let software = codec_id_for_mime(mime)
            .and_then(ffmpeg_next::decoder::find)
            .ok_or_else(|| ExtractError::UnsupportedCodec(mime.to_string()))?;

        let (free_tx, free_rx) = crossbeam_channel::unbounded();
        for index in 0..INPUT_BUFFER_COUNT {
            // Unbounded send never fails while the receiver is alive
            let _ = free_tx.send((index, Vec::new()));
        }

        tracing::debug!("Created decoder {} for {}", software.name(), mime);

        Ok(Self {
            mime: mime.to_string(),
            software,
            try_hwaccel,
            hwaccel: HwAccelMethod::None,
            state: CodecState::Created,
            decoder: None,
            surface: None,
            input_buffers: vec![Vec::new(); INPUT_BUFFER_COUNT],
            free_tx,
            free_rx,
            commands: None,
            events: None,
            worker: None,
            output_format: None,
            eos_queued: false,
        })
    }

    /// Get the hardware acceleration method in use
    pub fn hwaccel_method(&self) -> HwAccelMethod {
        self.hwaccel
    }

    /// Name of the FFmpeg decoder backing this codec
    pub fn codec_name(&self) -> &str {
        self.software.name()
    }

    fn expect_state(&self, expected: CodecState, op: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ExtractError::Codec(format!(
                "{} called in state {:?}, expected {:?}",
                op, self.state, expected
            )))
        }
    }

    /// Try each hardware variant available for this platform
    fn open_hwaccel_decoder(
        &self,
        format: &TrackFormat,
    ) -> std::result::Result<(ffmpeg_next::decoder::Video, HwAccelMethod), String> {
        for &method in HwAccelMethod::platform_candidates() {
            let (codec, device) = match (hw_decoder_name(self.software.name(), method), method.device_type()) {
                (Some(name), _) => match ffmpeg_next::decoder::find_by_name(&name) {
                    Some(codec) => (codec, None),
                    None => {
                        tracing::debug!("Hardware decoder {} not built in", name);
                        continue;
                    }
                },
                (None, Some(device)) if supports_device(self.software, device) => (self.software, Some(device)),
                (None, Some(_)) => {
                    tracing::debug!("{} has no {} support", self.software.name(), method);
                    continue;
                }
                (None, None) => continue,
            };

            match open_decoder(codec, format, device) {
                Ok(decoder) => {
                    tracing::info!("Hardware acceleration enabled: {} ({})", method, codec.name());
                    return Ok((decoder, method));
                }
                Err(e) => {
                    tracing::debug!("Hardware acceleration {} not available: {}", method, e);
                }
            }
        }
        Err("No hardware acceleration available".to_string())
    }
}

/// Open a decoder context configured with the track's dimensions and CSD
///
/// With `device` set, a hardware device context of that type is created and
/// attached; failing to create it fails the open.
fn open_decoder(
    codec: ffmpeg_next::Codec,
    format: &TrackFormat,
    device: Option<ffmpeg_next::ffi::AVHWDeviceType>,
) -> Result<ffmpeg_next::decoder::Video> {
    let mut context = ffmpeg_next::codec::context::Context::new_with_codec(codec);

    // The safe API does not expose dimensions, time base or extradata setters
    unsafe {
        let raw = context.as_mut_ptr();
        (*raw).width = format.width as i32;
        (*raw).height = format.height as i32;
        (*raw).pkt_timebase = ffmpeg_next::ffi::AVRational {
            num: 1,
            den: 1_000_000,
        };

        if !format.csd.is_empty() {
            let padding = ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
            let extradata = ffmpeg_next::ffi::av_mallocz(format.csd.len() + padding) as *mut u8;
            if extradata.is_null() {
                return Err(ExtractError::Codec("failed to allocate codec extradata".to_string()));
            }
            std::ptr::copy_nonoverlapping(format.csd.as_ptr(), extradata, format.csd.len());
            // Freed together with the context
            (*raw).extradata = extradata;
            (*raw).extradata_size = format.csd.len() as i32;
        }

        if let Some(device) = device {
            let mut device_ctx: *mut ffmpeg_next::ffi::AVBufferRef = std::ptr::null_mut();
            let ret = ffmpeg_next::ffi::av_hwdevice_ctx_create(
                &mut device_ctx,
                device,
                std::ptr::null(),
                std::ptr::null_mut(),
                0,
            );
            if ret < 0 || device_ctx.is_null() {
                return Err(ExtractError::Codec(format!(
                    "failed to create {:?} device: {}",
                    device,
                    ffmpeg_next::Error::from(ret)
                )));
            }
            // The context unrefs it when freed
            (*raw).hw_device_ctx = device_ctx;
        }
    }

    let decoder = context.decoder().open_as(codec)?.video()?;
    Ok(decoder)
}

impl Codec for FfmpegCodec {
    fn configure(&mut self, format: &TrackFormat, surface: ProducerSurface) -> Result<()> {
        self.expect_state(CodecState::Created, "configure")?;

        let (decoder, hwaccel) = if self.try_hwaccel {
            match self.open_hwaccel_decoder(format) {
                Ok(opened) => opened,
                Err(e) => {
                    tracing::warn!("Hardware acceleration failed: {}. Falling back to software decode.", e);
                    (open_decoder(self.software, format, None)?, HwAccelMethod::None)
                }
            }
        } else {
            (open_decoder(self.software, format, None)?, HwAccelMethod::None)
        };

        tracing::info!(
            "Configured decoder for {} ({}x{}, {} bytes csd, hwaccel: {})",
            self.mime,
            format.width,
            format.height,
            format.csd.len(),
            hwaccel
        );

        self.decoder = Some(decoder);
        self.hwaccel = hwaccel;
        self.surface = Some(surface);
        self.state = CodecState::Configured;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.expect_state(CodecState::Configured, "start")?;
        let (decoder, surface) = match (self.decoder.take(), self.surface.take()) {
            (Some(decoder), Some(surface)) => (decoder, surface),
            _ => return Err(ExtractError::Codec("decoder is not configured".to_string())),
        };

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let mime = self.mime.clone();
        let free = self.free_tx.clone();

        let handle = std::thread::Builder::new()
            .name("mpeg-frames-decoder".to_string())
            .spawn(move || DecodeWorker::new(decoder, surface, mime, event_tx, free).run(command_rx))
            .map_err(|e| ExtractError::Codec(format!("failed to spawn decoder thread: {}", e)))?;

        self.commands = Some(command_tx);
        self.events = Some(event_rx);
        self.worker = Some(handle);
        self.state = CodecState::Running;
        Ok(())
    }

    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<usize>> {
        self.expect_state(CodecState::Running, "dequeue_input")?;
        if self.eos_queued {
            return Ok(None);
        }
        match self.free_rx.recv_timeout(timeout) {
            Ok((index, mut buffer)) => {
                buffer.clear();
                self.input_buffers[index] = buffer;
                Ok(Some(index))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ExtractError::Codec("input buffer pool closed".to_string()))
            }
        }
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>> {
        self.input_buffers
            .get_mut(index)
            .ok_or_else(|| ExtractError::Codec(format!("invalid input buffer index {}", index)))
    }

    fn queue_input(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        self.expect_state(CodecState::Running, "queue_input")?;
        let buffer = self
            .input_buffers
            .get_mut(index)
            .ok_or_else(|| ExtractError::Codec(format!("invalid input buffer index {}", index)))?;
        let end = offset.checked_add(size).filter(|end| *end <= buffer.len()).ok_or_else(|| {
            ExtractError::Codec(format!(
                "input range {}+{} exceeds buffer of {} bytes",
                offset,
                size,
                buffer.len()
            ))
        })?;

        let mut data = std::mem::take(buffer);
        data.truncate(end);
        data.drain(..offset);

        if flags.contains(BufferFlags::END_OF_STREAM) {
            self.eos_queued = true;
        }
        self.send(Command::Input {
            index,
            data,
            pts_us: presentation_time_us,
            flags,
        })
    }

    fn dequeue_output(&mut self, info: &mut BufferInfo, timeout: Duration) -> Result<OutputStatus> {
        self.expect_state(CodecState::Running, "dequeue_output")?;
        let events = self
            .events
            .as_ref()
            .ok_or_else(|| ExtractError::Codec("decoder is not running".to_string()))?;

        match events.recv_timeout(timeout) {
            Ok(Event::FormatChanged(format)) => {
                tracing::debug!("Decoder output format changed: {}", format);
                self.output_format = Some(format);
                Ok(OutputStatus::FormatChanged)
            }
            Ok(Event::Buffer { index, info: buffer }) => {
                *info = buffer;
                Ok(OutputStatus::Buffer(index))
            }
            Ok(Event::Error(message)) => Err(ExtractError::Codec(message)),
            Err(RecvTimeoutError::Timeout) => Ok(OutputStatus::TryAgainLater),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ExtractError::Codec("decoder worker exited".to_string()))
            }
        }
    }

    fn output_format(&self) -> Option<TrackFormat> {
        self.output_format.clone()
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<()> {
        self.expect_state(CodecState::Running, "release_output")?;
        self.send(Command::Release { index, render })
    }

    fn stop(&mut self) -> Result<()> {
        if matches!(self.state, CodecState::Stopped | CodecState::Released) {
            return Ok(());
        }
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Stop);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                self.state = CodecState::Stopped;
                return Err(ExtractError::Codec("decoder worker panicked".to_string()));
            }
        }
        self.events = None;
        self.state = CodecState::Stopped;
        Ok(())
    }

    fn release(&mut self) {
        if self.state == CodecState::Released {
            return;
        }
        if let Err(e) = self.stop() {
            tracing::warn!("Stopping decoder during release failed: {}", e);
        }
        self.decoder = None;
        self.surface = None;
        self.input_buffers.clear();
        while self.free_rx.try_recv().is_ok() {}
        self.state = CodecState::Released;
        tracing::debug!("Released decoder for {}", self.mime);
    }
}

impl FfmpegCodec {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or_else(|| ExtractError::Codec("decoder is not running".to_string()))?
            .send(command)
            .map_err(|_| ExtractError::Codec("decoder worker exited".to_string()))
    }
}

impl Drop for FfmpegCodec {
    fn drop(&mut self) {
        self.release();
    }
}

/// State owned by the decoder worker thread
struct DecodeWorker {
    decoder: ffmpeg_next::decoder::Video,
    surface: ProducerSurface,
    mime: String,
    events: Sender<Event>,
    free: Sender<(usize, Vec<u8>)>,
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    outputs: HashMap<usize, YuvImage>,
    next_output: usize,
    current_format: Option<(u32, u32, ffmpeg_next::format::Pixel)>,
}

impl DecodeWorker {
    fn new(
        decoder: ffmpeg_next::decoder::Video,
        surface: ProducerSurface,
        mime: String,
        events: Sender<Event>,
        free: Sender<(usize, Vec<u8>)>,
    ) -> Self {
        Self {
            decoder,
            surface,
            mime,
            events,
            free,
            scaler: None,
            outputs: HashMap::new(),
            next_output: 0,
            current_format: None,
        }
    }

    fn run(mut self, commands: Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            let result = match command {
                Command::Input {
                    index,
                    data,
                    pts_us,
                    flags,
                } => self.decode(index, data, pts_us, flags),
                Command::Release { index, render } => self.release_output(index, render),
                Command::Stop => break,
            };
            if let Err(e) = result {
                tracing::error!("Decoder worker error: {}", e);
                let _ = self.events.send(Event::Error(e.to_string()));
            }
        }
        tracing::debug!("Decoder worker for {} exiting", self.mime);
    }

    fn decode(&mut self, index: usize, mut data: Vec<u8>, pts_us: i64, flags: BufferFlags) -> Result<()> {
        let end_of_stream = flags.contains(BufferFlags::END_OF_STREAM);
        let result = if data.is_empty() && end_of_stream {
            self.decoder.send_eof().map_err(ExtractError::from)
        } else {
            let mut packet = ffmpeg_next::Packet::copy(&data);
            packet.set_pts(Some(pts_us));
            if flags.contains(BufferFlags::KEY_FRAME) {
                packet.set_flags(ffmpeg_next::packet::Flags::KEY);
            }
            self.send_packet(&packet).and_then(|()| {
                if end_of_stream {
                    self.decoder.send_eof().map_err(ExtractError::from)
                } else {
                    Ok(())
                }
            })
        };

        // The buffer is free again as soon as its bytes reached the decoder
        data.clear();
        let _ = self.free.send((index, data));
        result?;

        self.drain()
    }

    fn send_packet(&mut self, packet: &ffmpeg_next::Packet) -> Result<()> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::error::EAGAIN,
            }) => {
                // Decoder is full: collect pending frames, then retry once
                self.drain()?;
                self.decoder.send_packet(packet).map_err(ExtractError::from)
            }
            // Invalid data in one sample is not fatal to the stream
            Err(ffmpeg_next::Error::InvalidData) => {
                tracing::warn!("Decoder rejected a sample as invalid data");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Receive every frame the decoder has ready
    fn drain(&mut self) -> Result<()> {
        let mut decoded = ffmpeg_next::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let image = self.convert(&decoded)?;
                    self.post_image(image)?;
                }
                Err(ffmpeg_next::Error::Other {
                    errno: ffmpeg_next::error::EAGAIN,
                }) => return Ok(()),
                Err(ffmpeg_next::Error::Eof) => {
                    self.post_end_of_stream();
                    return Ok(());
                }
                Err(e) => return Err(ExtractError::Codec(format!("decoding failed: {}", e))),
            }
        }
    }

    /// Transfer to system memory if needed and normalise to YUV 4:2:0
    fn convert(&mut self, decoded: &ffmpeg_next::frame::Video) -> Result<YuvImage> {
        let pts_us = decoded.timestamp().or(decoded.pts()).unwrap_or(0);

        let mut transferred = None;
        if is_hardware_format(decoded.format()) {
            let mut sw_frame = ffmpeg_next::frame::Video::empty();
            let ret = unsafe {
                ffmpeg_next::ffi::av_hwframe_transfer_data(sw_frame.as_mut_ptr(), decoded.as_ptr(), 0)
            };
            if ret < 0 {
                return Err(ExtractError::Codec(
                    "failed to transfer hardware frame to system memory".to_string(),
                ));
            }
            transferred = Some(sw_frame);
        }
        let frame = transferred.as_ref().unwrap_or(decoded);

        let (width, height) = (frame.width(), frame.height());
        let full_range = frame.format() == ffmpeg_next::format::Pixel::YUVJ420P
            || frame.color_range() == ffmpeg_next::color::Range::JPEG;

        if is_planar_420(frame.format()) {
            return Ok(image_from_frame(frame, pts_us, full_range));
        }

        // Recreate scaler if format changed
        let stale = self.scaler.as_ref().map_or(true, |scaler| {
            let input = scaler.input();
            input.format != frame.format() || input.width != width || input.height != height
        });
        if stale {
            let scaler = ffmpeg_next::software::scaling::Context::get(
                frame.format(),
                width,
                height,
                ffmpeg_next::format::Pixel::YUV420P,
                width,
                height,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| ExtractError::Codec(format!("failed to create scaler: {}", e)))?;
            self.scaler = Some(scaler);
        }

        let mut yuv = ffmpeg_next::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut yuv)?;
        }
        Ok(image_from_frame(&yuv, pts_us, full_range))
    }

    fn post_image(&mut self, image: YuvImage) -> Result<()> {
        let format_key = (image.coded_width(), image.coded_height(), ffmpeg_next::format::Pixel::YUV420P);
        if self.current_format != Some(format_key) {
            self.current_format = Some(format_key);
            let format = TrackFormat::video(0, self.mime.clone(), image.coded_width(), image.coded_height());
            self.send_event(Event::FormatChanged(format))?;
        }

        let index = self.allocate_output();
        let info = BufferInfo {
            offset: 0,
            size: image.byte_len(),
            presentation_time_us: image.pts_us,
            flags: BufferFlags::NONE,
        };
        self.outputs.insert(index, image);
        self.send_event(Event::Buffer { index, info })
    }

    fn post_end_of_stream(&mut self) {
        let index = self.allocate_output();
        let info = BufferInfo {
            offset: 0,
            size: 0,
            presentation_time_us: 0,
            flags: BufferFlags::END_OF_STREAM,
        };
        let _ = self.send_event(Event::Buffer { index, info });
    }

    fn allocate_output(&mut self) -> usize {
        let index = self.next_output;
        self.next_output = self.next_output.wrapping_add(1);
        index
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<()> {
        match self.outputs.remove(&index) {
            Some(image) if render => self.surface.push(image),
            // Dropped without rendering, or the empty end-of-stream buffer
            _ => Ok(()),
        }
    }

    fn send_event(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| ExtractError::Codec("decoder output queue closed".to_string()))
    }
}

/// Copy the three planes of a YUV 4:2:0 frame
fn image_from_frame(frame: &ffmpeg_next::frame::Video, pts_us: i64, full_range: bool) -> YuvImage {
    let plane = |index: usize| {
        Plane::from_strided(
            frame.data(index),
            frame.stride(index),
            frame.plane_width(index),
            frame.plane_height(index),
        )
    };
    YuvImage::new(plane(0), plane(1), plane(2), pts_us, full_range)
}
