//! Video demuxing and decoding
//!
//! This module provides:
//! - [`MediaSource`]: cursor-style sample reader, with the FFmpeg-backed [`FfmpegDemuxer`]
//! - [`Codec`]: buffer-queue decoder interface, with the FFmpeg-backed [`FfmpegCodec`]
//! - [`TrackFormat`]: per-track description keyed by MIME type
//! - [`YuvImage`]: decoded 4:2:0 picture handed to producer surfaces

pub mod codec;
pub mod decoder;
pub mod demuxer;
pub mod format;
pub mod frame;

pub use codec::{BufferFlags, BufferInfo, Codec, OutputStatus};
pub use decoder::{FfmpegCodec, HwAccelMethod};
pub use demuxer::{select_video_track, FfmpegDemuxer, MediaSource};
pub use format::TrackFormat;
pub use frame::{Plane, YuvImage};
