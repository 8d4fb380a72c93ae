//! Error taxonomy for the extraction pipeline
//!
//! Only [`ExtractError::Io`] is recoverable at the public entry points (it turns
//! into `Ok(false)`); everything else is a protocol or setup fault and
//! propagates to the caller.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while extracting frames
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Opening the source or reading a sample failed
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The source exposes no track whose MIME type starts with `video/`
    #[error("no video track found in source")]
    NoVideoTrack,

    /// The headless GPU context, render target or pipeline could not be created
    #[error("GPU initialisation failed: {0}")]
    GpuInit(String),

    /// A GPU operation reported a validation error
    #[error("{op}: GPU error: {message}")]
    Gpu {
        /// The operation that was being performed
        op: &'static str,
        /// Message reported by the validation layer
        message: String,
    },

    /// The decoder returned a negative dequeue status that is not one of the benign ones
    #[error("unexpected result from decoder dequeue_output: {0}")]
    DecoderProtocol(i32),

    /// No frame arrived on the producer surface in time
    #[error("frame wait timed out after {0:?}")]
    FrameWaitTimeout(Duration),

    /// The producer pushed a frame while the previous one was still unconsumed
    #[error("frame available already set, frame could be dropped")]
    FrameDropped,

    /// No decoder is available for the track's MIME type
    #[error("no decoder available for {0}")]
    UnsupportedCodec(String),

    /// The decoder failed while decoding or was driven out of order
    #[error("decoder failure: {0}")]
    Codec(String),

    /// A frame was pushed into a producer surface whose consumer has been released
    #[error("producer surface has been abandoned")]
    SurfaceAbandoned,
}

impl ExtractError {
    /// Whether this error maps to a `false` return at the public entry points
    pub fn is_io(&self) -> bool {
        matches!(self, ExtractError::Io(_))
    }

    pub(crate) fn io_other(message: impl Into<String>) -> Self {
        ExtractError::Io(std::io::Error::new(std::io::ErrorKind::Other, message.into()))
    }
}

impl From<ffmpeg_next::Error> for ExtractError {
    fn from(e: ffmpeg_next::Error) -> Self {
        ExtractError::Codec(e.to_string())
    }
}

/// Crate-wide result alias
pub type Result<T, E = ExtractError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ExtractError::NoVideoTrack.to_string(),
            "no video track found in source"
        );
        assert_eq!(
            ExtractError::DecoderProtocol(-42).to_string(),
            "unexpected result from decoder dequeue_output: -42"
        );
        let gpu = ExtractError::Gpu {
            op: "draw",
            message: "bad bind group".to_string(),
        };
        assert_eq!(gpu.to_string(), "draw: GPU error: bad bind group");
    }

    #[test]
    fn test_only_io_is_recoverable() {
        assert!(ExtractError::io_other("truncated").is_io());
        assert!(!ExtractError::FrameDropped.is_io());
        assert!(!ExtractError::UnsupportedCodec("video/x-foo".into()).is_io());
    }
}
