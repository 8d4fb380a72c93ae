//! Input sources accepted by the extractor
//!
//! A source is either a byte range of an already opened file (the shape an
//! asset file descriptor takes) or a URI with optional request headers.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use url::Url;

use crate::error::{ExtractError, Result};

/// Upper bound used when a file range has no declared length
pub const MAX_SOURCE_LENGTH: u64 = (1 << 62) - 1;

/// An opened, readable byte source
#[derive(Debug)]
pub enum SourceHandle {
    /// A byte range of an open file
    FileRange {
        /// The open file; kept alive until the extraction finishes
        file: File,
        /// Offset of the first byte of the media
        start_offset: u64,
        /// Declared length in bytes, negative when unknown ("until EOF")
        declared_length: i64,
    },
    /// A URI, optionally with request headers for network protocols
    Uri {
        uri: Url,
        headers: Option<BTreeMap<String, String>>,
    },
}

impl SourceHandle {
    /// A whole file, read until EOF
    pub fn file(file: File) -> Self {
        SourceHandle::FileRange {
            file,
            start_offset: 0,
            declared_length: -1,
        }
    }

    /// A byte range inside a file
    pub fn file_range(file: File, start_offset: u64, declared_length: i64) -> Self {
        SourceHandle::FileRange {
            file,
            start_offset,
            declared_length,
        }
    }

    /// A URI without headers
    pub fn uri(uri: Url) -> Self {
        SourceHandle::Uri { uri, headers: None }
    }

    /// A URI with request headers
    pub fn uri_with_headers(uri: Url, headers: BTreeMap<String, String>) -> Self {
        SourceHandle::Uri {
            uri,
            headers: Some(headers),
        }
    }

    /// A filesystem path, relative paths resolved against the working directory
    pub fn path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let uri = Url::from_file_path(&absolute).map_err(|_| {
            ExtractError::io_other(format!("not a valid file path: {}", absolute.display()))
        })?;
        Ok(SourceHandle::uri(uri))
    }

    /// Parse a command-line style location: a URL with a scheme, or a path
    pub fn parse(location: &str) -> Result<Self> {
        match Url::parse(location) {
            // Single-letter schemes are Windows drive letters, not URLs
            Ok(uri) if uri.scheme().len() > 1 => Ok(SourceHandle::uri(uri)),
            _ => SourceHandle::path(location),
        }
    }

    /// Exclusive end offset of a file range, applying the "until EOF" sentinel
    pub fn range_end(start_offset: u64, declared_length: i64) -> u64 {
        let length = if declared_length < 0 {
            MAX_SOURCE_LENGTH
        } else {
            declared_length as u64
        };
        start_offset.saturating_add(length).min(MAX_SOURCE_LENGTH)
    }

    /// Short description for log output
    pub fn describe(&self) -> String {
        match self {
            SourceHandle::FileRange {
                start_offset,
                declared_length,
                ..
            } => format!("file range @{} (+{})", start_offset, declared_length),
            SourceHandle::Uri { uri, .. } => uri.to_string(),
        }
    }
}

/// Serialise a header map the way FFmpeg's `headers` option expects it
pub fn format_headers(headers: &BTreeMap<String, String>) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}\r\n", name.trim(), value.trim()))
        .collect()
}
