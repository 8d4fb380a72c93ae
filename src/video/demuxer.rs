//! Container demuxing
//!
//! [`MediaSource`] is the cursor-style sample reader the frame pump consumes:
//! select tracks, then repeatedly read the current sample and advance.
//! [`FfmpegDemuxer`] implements it on top of an FFmpeg format context.

use ffmpeg_next::{Rational, Rescale};

use super::format::mime_for_codec;
use super::TrackFormat;
use crate::error::{ExtractError, Result};
use crate::source::{format_headers, SourceHandle};

/// Microsecond time base used for every timestamp leaving the demuxer
const MICROSECONDS: Rational = Rational(1, 1_000_000);

/// A cursor over the samples of a container
pub trait MediaSource {
    /// Number of tracks in the container
    fn track_count(&self) -> usize;

    /// Format of a track
    fn track_format(&self, index: usize) -> Result<TrackFormat>;

    /// Include a track in the samples returned by [`read_sample`](Self::read_sample)
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Copy the current sample into `buffer`, replacing its contents
    ///
    /// Returns the sample size, or `None` once the selected tracks are exhausted.
    /// A failed read is an [`ExtractError::Io`].
    fn read_sample(&mut self, buffer: &mut Vec<u8>) -> Result<Option<usize>>;

    /// Track of the current sample
    fn sample_track(&self) -> Option<usize>;

    /// Presentation time of the current sample in microseconds
    fn sample_time_us(&self) -> Option<i64>;

    /// Move to the next sample
    fn advance(&mut self);

    /// Close the container. Safe to call more than once.
    fn release(&mut self);
}

/// Index of the first video track, if any
pub fn select_video_track<S: MediaSource + ?Sized>(source: &S) -> Result<Option<usize>> {
    for index in 0..source.track_count() {
        let format = source.track_format(index)?;
        if format.is_video() {
            tracing::debug!("Extractor selected track {} ({}): {}x{}", index, format.mime, format.width, format.height);
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// A sample waiting to be read
struct CurrentSample {
    data: Vec<u8>,
    track: usize,
    time_us: Option<i64>,
}

/// [`MediaSource`] backed by an FFmpeg format context
pub struct FfmpegDemuxer {
    input: Option<ffmpeg_next::format::context::Input>,
    tracks: Vec<TrackFormat>,
    time_bases: Vec<Rational>,
    selected: Vec<bool>,
    current: Option<CurrentSample>,
    eos: bool,
    description: String,
}

impl FfmpegDemuxer {
    /// Open a source; any failure is reported as [`ExtractError::Io`]
    pub fn open(source: &SourceHandle) -> Result<Self> {
        ffmpeg_next::init().map_err(|e| ExtractError::io_other(format!("FFmpeg init failed: {}", e)))?;

        let description = source.describe();
        let input = match source {
            SourceHandle::FileRange {
                file,
                start_offset,
                declared_length,
            } => open_file_range(file, *start_offset, *declared_length)?,
            SourceHandle::Uri { uri, headers } => {
                let mut options = ffmpeg_next::Dictionary::new();
                if let Some(headers) = headers.as_ref().filter(|h| !h.is_empty()) {
                    options.set("headers", &format_headers(headers));
                }
                let location = match uri.to_file_path() {
                    Ok(path) if uri.scheme() == "file" => path,
                    _ => std::path::PathBuf::from(uri.as_str()),
                };
                ffmpeg_next::format::input_with_dictionary(&location, options).map_err(|e| {
                    ExtractError::io_other(format!("failed to open {}: {}", uri, e))
                })?
            }
        };

        let mut tracks = Vec::new();
        let mut time_bases = Vec::new();
        for stream in input.streams() {
            tracks.push(stream_format(&stream));
            time_bases.push(stream.time_base());
        }

        tracing::info!("Opened {} with {} track(s)", description, tracks.len());
        for track in &tracks {
            tracing::debug!("  track {}", track);
        }

        let selected = vec![false; tracks.len()];
        Ok(Self {
            input: Some(input),
            tracks,
            time_bases,
            selected,
            current: None,
            eos: false,
            description,
        })
    }

    /// Pull packets until one belongs to a selected track
    fn fill_current(&mut self) -> Result<()> {
        if self.current.is_some() || self.eos {
            return Ok(());
        }
        let Some(input) = self.input.as_mut() else {
            self.eos = true;
            return Ok(());
        };

        let mut packet = ffmpeg_next::Packet::empty();
        loop {
            match packet.read(input) {
                Ok(()) => {
                    let track = packet.stream();
                    if !self.selected.get(track).copied().unwrap_or(false) {
                        continue;
                    }
                    let time_base = self.time_bases[track];
                    let time_us = packet
                        .pts()
                        .or(packet.dts())
                        .map(|pts| pts.rescale(time_base, MICROSECONDS));
                    self.current = Some(CurrentSample {
                        data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                        track,
                        time_us,
                    });
                    return Ok(());
                }
                Err(ffmpeg_next::Error::Eof) => {
                    self.eos = true;
                    return Ok(());
                }
                Err(e) => {
                    return Err(ExtractError::io_other(format!(
                        "reading {} failed: {}",
                        self.description, e
                    )));
                }
            }
        }
    }
}

impl MediaSource for FfmpegDemuxer {
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
        match self.selected.get_mut(index) {
            Some(selected) => {
                *selected = true;
                Ok(())
            }
            None => Err(ExtractError::io_other(format!("no track {}", index))),
        }
    }

    fn read_sample(&mut self, buffer: &mut Vec<u8>) -> Result<Option<usize>> {
        self.fill_current()?;
        match &self.current {
            Some(sample) => {
                buffer.clear();
                buffer.extend_from_slice(&sample.data);
                Ok(Some(sample.data.len()))
            }
            None => Ok(None),
        }
    }

    fn sample_track(&self) -> Option<usize> {
        self.current.as_ref().map(|sample| sample.track)
    }

    fn sample_time_us(&self) -> Option<i64> {
        self.current.as_ref().and_then(|sample| sample.time_us)
    }

    fn advance(&mut self) {
        self.current = None;
    }

    fn release(&mut self) {
        if self.input.take().is_some() {
            tracing::debug!("Released demuxer for {}", self.description);
        }
        self.current = None;
        self.eos = true;
    }
}

impl Drop for FfmpegDemuxer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open a byte range of an already opened file through FFmpeg's `subfile` protocol
#[cfg(unix)]
fn open_file_range(
    file: &std::fs::File,
    start_offset: u64,
    declared_length: i64,
) -> Result<ffmpeg_next::format::context::Input> {
    use std::os::unix::io::AsRawFd;

    let end = SourceHandle::range_end(start_offset, declared_length);
    let location = format!(
        "subfile,,start,{},end,{},,:/dev/fd/{}",
        start_offset,
        end,
        file.as_raw_fd()
    );
    tracing::debug!("Opening file range {}", location);
    ffmpeg_next::format::input(&location)
        .map_err(|e| ExtractError::io_other(format!("failed to open file range: {}", e)))
}

#[cfg(not(unix))]
fn open_file_range(
    _file: &std::fs::File,
    _start_offset: u64,
    _declared_length: i64,
) -> Result<ffmpeg_next::format::context::Input> {
    Err(ExtractError::io_other(
        "file ranges are only supported on unix targets",
    ))
}

/// Describe a stream as a [`TrackFormat`]
fn stream_format(stream: &ffmpeg_next::format::stream::Stream) -> TrackFormat {
    let parameters = stream.parameters();
    let mime = mime_for_codec(parameters.id());

    // Dimensions and extradata are not exposed by the safe parameter API
    let (width, height, csd) = unsafe {
        let raw = &*parameters.as_ptr();
        let csd = if raw.extradata.is_null() || raw.extradata_size <= 0 {
            Vec::new()
        } else {
            std::slice::from_raw_parts(raw.extradata, raw.extradata_size as usize).to_vec()
        };
        (raw.width.max(0) as u32, raw.height.max(0) as u32, csd)
    };

    let duration_us = (stream.duration() > 0).then(|| {
        stream
            .duration()
            .rescale(stream.time_base(), MICROSECONDS)
    });
    let rate = stream.avg_frame_rate();
    let frame_rate = (rate.numerator() > 0 && rate.denominator() > 0)
        .then(|| rate.numerator() as f64 / rate.denominator() as f64);

    TrackFormat {
        index: stream.index(),
        mime,
        width,
        height,
        csd,
        duration_us,
        frame_rate,
    }
}
