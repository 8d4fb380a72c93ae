//! Track formats and MIME type naming
//!
//! Tracks are identified by the MIME names media frameworks conventionally use
//! (`video/avc`, `audio/mp4a-latm`, ...). Codecs without a registered name get
//! a synthetic `video/x-ffmpeg-<codec>` style name so every track has one.

use ffmpeg_next::codec::Id;

/// MIME prefix shared by every video track
pub const VIDEO_MIME_PREFIX: &str = "video/";

/// Registered MIME names and the FFmpeg codec they map to
const MIME_TABLE: &[(&str, Id)] = &[
    ("video/avc", Id::H264),
    ("video/hevc", Id::HEVC),
    ("video/mp4v-es", Id::MPEG4),
    ("video/3gpp", Id::H263),
    ("video/mpeg2", Id::MPEG2VIDEO),
    ("video/x-vnd.on2.vp8", Id::VP8),
    ("video/x-vnd.on2.vp9", Id::VP9),
    ("video/av01", Id::AV1),
    ("audio/mp4a-latm", Id::AAC),
    ("audio/mpeg", Id::MP3),
    ("audio/opus", Id::OPUS),
    ("audio/vorbis", Id::VORBIS),
    ("audio/flac", Id::FLAC),
];

const FALLBACK_VIDEO_PREFIX: &str = "video/x-ffmpeg-";
const FALLBACK_AUDIO_PREFIX: &str = "audio/x-ffmpeg-";

/// Description of one track of a container
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFormat {
    /// Track index within the container
    pub index: usize,
    /// MIME type of the track's codec
    pub mime: String,
    /// Coded width in pixels (0 for non-video tracks)
    pub width: u32,
    /// Coded height in pixels (0 for non-video tracks)
    pub height: u32,
    /// Codec-specific configuration data
    pub csd: Vec<u8>,
    /// Track duration, when the container declares one
    pub duration_us: Option<i64>,
    /// Average frame rate, when known
    pub frame_rate: Option<f64>,
}

impl TrackFormat {
    /// A minimal video track description
    pub fn video(index: usize, mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            index,
            mime: mime.into(),
            width,
            height,
            csd: Vec::new(),
            duration_us: None,
            frame_rate: None,
        }
    }

    /// A minimal non-video track description
    pub fn other(index: usize, mime: impl Into<String>) -> Self {
        Self::video(index, mime, 0, 0)
    }

    /// Whether the track carries video
    pub fn is_video(&self) -> bool {
        self.mime.starts_with(VIDEO_MIME_PREFIX)
    }
}

impl std::fmt::Display for TrackFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {}", self.index, self.mime)?;
        if self.is_video() {
            write!(f, " {}x{}", self.width, self.height)?;
        }
        if let Some(fps) = self.frame_rate {
            write!(f, " @ {:.2}fps", fps)?;
        }
        Ok(())
    }
}

/// Codec for a MIME type, if one is registered or synthesised
pub fn codec_id_for_mime(mime: &str) -> Option<Id> {
    if let Some((_, id)) = MIME_TABLE.iter().find(|(name, _)| *name == mime) {
        return Some(*id);
    }

    let codec_name = mime
        .strip_prefix(FALLBACK_VIDEO_PREFIX)
        .or_else(|| mime.strip_prefix(FALLBACK_AUDIO_PREFIX))?;
    ffmpeg_next::decoder::find_by_name(codec_name).map(|codec| codec.id())
}

/// MIME type for a codec
pub fn mime_for_codec(id: Id) -> String {
    if let Some((name, _)) = MIME_TABLE.iter().find(|(_, known)| *known == id) {
        return (*name).to_string();
    }
    fallback_mime(id.medium() == ffmpeg_next::media::Type::Video, id.name())
}

/// Synthetic MIME name for a codec with no registered one
pub fn fallback_mime(is_video: bool, codec_name: &str) -> String {
    let prefix = if is_video {
        FALLBACK_VIDEO_PREFIX
    } else {
        FALLBACK_AUDIO_PREFIX
    };
    format!("{}{}", prefix, codec_name.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_mimes_resolve() {
        assert_eq!(codec_id_for_mime("video/avc"), Some(Id::H264));
        assert_eq!(codec_id_for_mime("video/hevc"), Some(Id::HEVC));
        assert_eq!(codec_id_for_mime("video/x-vnd.on2.vp9"), Some(Id::VP9));
        assert_eq!(codec_id_for_mime("audio/mp4a-latm"), Some(Id::AAC));
    }

    #[test]
    fn test_codec_to_mime() {
        assert_eq!(mime_for_codec(Id::H264), "video/avc");
        assert_eq!(mime_for_codec(Id::AV1), "video/av01");
        assert_eq!(mime_for_codec(Id::OPUS), "audio/opus");
    }

    #[test]
    fn test_fallback_mime() {
        assert_eq!(fallback_mime(true, "ProRes"), "video/x-ffmpeg-prores");
        assert_eq!(fallback_mime(false, "pcm_s16le"), "audio/x-ffmpeg-pcm_s16le");
    }

    #[test]
    fn test_video_predicate() {
        assert!(TrackFormat::video(0, "video/avc", 320, 240).is_video());
        assert!(!TrackFormat::other(1, "audio/mp4a-latm").is_video());
        // Prefix match is case sensitive, like the container metadata it mirrors
        assert!(!TrackFormat::other(2, "VIDEO/avc").is_video());
    }

    #[test]
    fn test_display() {
        let mut format = TrackFormat::video(0, "video/avc", 1280, 720);
        format.frame_rate = Some(30.0);
        assert_eq!(format.to_string(), "#0 video/avc 1280x720 @ 30.00fps");
        assert_eq!(TrackFormat::other(1, "audio/opus").to_string(), "#1 audio/opus");
    }
}
