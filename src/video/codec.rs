//! Buffer-queue decoder interface
//!
//! A [`Codec`] exposes decoding as two queues: the caller dequeues an empty
//! input buffer, fills it with one compressed sample and queues it back; decoded
//! pictures come out of the output queue as indices that must be released, and
//! releasing with `render = true` pushes the picture into the producer surface
//! the codec was configured with.

use std::time::Duration;

use super::TrackFormat;
use crate::error::Result;
use crate::gpu::ProducerSurface;

/// Raw status: no output available within the timeout
pub const INFO_TRY_AGAIN_LATER: i32 = -1;
/// Raw status: the output format changed
pub const INFO_OUTPUT_FORMAT_CHANGED: i32 = -2;
/// Raw status: the output buffer set changed
pub const INFO_OUTPUT_BUFFERS_CHANGED: i32 = -3;

/// Flags carried by queued input and dequeued output buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags
    pub const NONE: BufferFlags = BufferFlags(0);
    /// The buffer holds a sync (key) frame
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    /// Last buffer of the stream
    pub const END_OF_STREAM: BufferFlags = BufferFlags(4);

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: BufferFlags) {
        self.0 |= rhs.0;
    }
}

/// Metadata of a dequeued output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub offset: usize,
    /// Payload size; zero for an empty end-of-stream buffer
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }
}

/// Result of an output dequeue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// A decoded buffer is ready at this index
    Buffer(usize),
    /// Nothing ready yet
    TryAgainLater,
    /// The output buffer set changed; nothing to do with surface output
    BuffersChanged,
    /// The output format changed; [`Codec::output_format`] has the new one
    FormatChanged,
    /// Any other negative status
    Unknown(i32),
}

impl OutputStatus {
    /// Interpret a raw status code: non-negative values are buffer indices
    pub fn from_raw(code: i32) -> Self {
        match code {
            INFO_TRY_AGAIN_LATER => OutputStatus::TryAgainLater,
            INFO_OUTPUT_FORMAT_CHANGED => OutputStatus::FormatChanged,
            INFO_OUTPUT_BUFFERS_CHANGED => OutputStatus::BuffersChanged,
            index if index >= 0 => OutputStatus::Buffer(index as usize),
            other => OutputStatus::Unknown(other),
        }
    }
}

/// A decoder driven through input and output buffer queues
pub trait Codec {
    /// Apply the track format and the surface decoded pictures are rendered into
    fn configure(&mut self, format: &TrackFormat, surface: ProducerSurface) -> Result<()>;

    /// Begin decoding; buffers can be dequeued afterwards
    fn start(&mut self) -> Result<()>;

    /// Index of a free input buffer, or `None` if none freed up within `timeout`
    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<usize>>;

    /// Storage of a dequeued input buffer
    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>>;

    /// Hand `size` bytes starting at `offset` of an input buffer to the decoder
    fn queue_input(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    /// Next output event, filling `info` when a buffer is returned
    fn dequeue_output(&mut self, info: &mut BufferInfo, timeout: Duration) -> Result<OutputStatus>;

    /// Current output format, once the decoder has reported one
    fn output_format(&self) -> Option<TrackFormat>;

    /// Return an output buffer, rendering it to the surface when `render` is set
    fn release_output(&mut self, index: usize, render: bool) -> Result<()>;

    /// Stop decoding; queued work is discarded
    fn stop(&mut self) -> Result<()>;

    /// Free all decoder resources. Safe to call more than once.
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        assert_eq!(OutputStatus::from_raw(-1), OutputStatus::TryAgainLater);
        assert_eq!(OutputStatus::from_raw(-2), OutputStatus::FormatChanged);
        assert_eq!(OutputStatus::from_raw(-3), OutputStatus::BuffersChanged);
        assert_eq!(OutputStatus::from_raw(0), OutputStatus::Buffer(0));
        assert_eq!(OutputStatus::from_raw(7), OutputStatus::Buffer(7));
        assert_eq!(OutputStatus::from_raw(-42), OutputStatus::Unknown(-42));
    }

    #[test]
    fn test_flags() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.contains(BufferFlags::END_OF_STREAM));
        assert!(flags.contains(BufferFlags::KEY_FRAME));
        assert!(!BufferFlags::KEY_FRAME.contains(BufferFlags::END_OF_STREAM));
        assert!(flags.contains(BufferFlags::NONE));

        let info = BufferInfo {
            flags,
            ..Default::default()
        };
        assert!(info.is_end_of_stream());
        assert!(!BufferInfo::default().is_end_of_stream());
    }
}
