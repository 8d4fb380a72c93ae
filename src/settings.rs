//! Extractor settings
//!
//! Stored as XML in the user's config directory
//! (`<config_dir>/mpeg-frames/settings.xml`) and converted into the
//! [`ExtractorConfig`] used by the pipeline.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extractor::ExtractorConfig;
use crate::gpu::DEFAULT_FRAME_AWAIT_TIMEOUT;
use crate::pump::{PumpConfig, DEQUEUE_TIMEOUT, MAX_FRAMES};
use crate::shaders::FragmentShader;

/// Directory under the platform config dir
const CONFIG_DIR_NAME: &str = "mpeg-frames";
const SETTINGS_FILE_NAME: &str = "settings.xml";

fn default_max_frames() -> u32 {
    MAX_FRAMES
}

fn default_dequeue_timeout_ms() -> u64 {
    DEQUEUE_TIMEOUT.as_millis() as u64
}

fn default_frame_await_timeout_ms() -> u64 {
    DEFAULT_FRAME_AWAIT_TIMEOUT.as_millis() as u64
}

fn default_true() -> bool {
    true
}

fn default_fragment_shader() -> String {
    "rgba".to_string()
}

fn default_image_format() -> String {
    "png".to_string()
}

/// Persistent extraction preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "MpegFramesSettings")]
pub struct ExtractorSettings {
    /// Maximum number of frames delivered per extraction (at least 1)
    #[serde(rename = "maxFrames", default = "default_max_frames")]
    pub max_frames: u32,

    /// Decoder buffer dequeue timeout in milliseconds
    #[serde(rename = "dequeueTimeoutMs", default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,

    /// How long to wait for a decoded frame to reach the surface, in milliseconds
    #[serde(rename = "frameAwaitTimeoutMs", default = "default_frame_await_timeout_ms")]
    pub frame_await_timeout_ms: u64,

    /// Try a hardware decoder first
    #[serde(rename = "tryHwaccel", default = "default_true")]
    pub try_hwaccel: bool,

    /// `rgba` or `bgra`
    #[serde(rename = "fragmentShader", default = "default_fragment_shader")]
    pub fragment_shader: String,

    /// Where the CLI writes frames
    #[serde(rename = "outputDir", default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,

    /// Image file format for written frames (`png` or `jpeg`)
    #[serde(rename = "imageFormat", default = "default_image_format")]
    pub image_format: String,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            max_frames: default_max_frames(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            frame_await_timeout_ms: default_frame_await_timeout_ms(),
            try_hwaccel: true,
            fragment_shader: default_fragment_shader(),
            output_dir: None,
            image_format: default_image_format(),
        }
    }
}

impl ExtractorSettings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push(CONFIG_DIR_NAME);
            p.push(SETTINGS_FILE_NAME);
            p
        })
    }

    /// Raise out-of-range values to their minimum
    pub fn clamp(&mut self) {
        self.max_frames = self.max_frames.max(1);
        self.dequeue_timeout_ms = self.dequeue_timeout_ms.max(1);
        self.frame_await_timeout_ms = self.frame_await_timeout_ms.max(1);
    }

    /// Load settings from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        let mut settings: Self = from_str(&contents)?;
        settings.clamp();
        Ok(settings)
    }

    /// Save settings to an XML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let xml = to_string(self)?;
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);
        fs::write(path, formatted)?;
        Ok(())
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring settings at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::default_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to_file(&path)
    }

    pub fn shader(&self) -> Result<FragmentShader, SettingsError> {
        FragmentShader::from_name(&self.fragment_shader).ok_or_else(|| SettingsError::InvalidValue {
            field: "fragmentShader",
            value: self.fragment_shader.clone(),
        })
    }

    /// Output image format; `jpg` and `jpeg` are the same
    pub fn output_format(&self) -> Result<image::ImageFormat, SettingsError> {
        let name = self.image_format.trim().to_ascii_lowercase();
        match image::ImageFormat::from_extension(&name) {
            Some(format @ (image::ImageFormat::Png | image::ImageFormat::Jpeg)) => Ok(format),
            _ => Err(SettingsError::InvalidValue {
                field: "imageFormat",
                value: self.image_format.clone(),
            }),
        }
    }

    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            max_frames: self.max_frames.max(1),
            dequeue_timeout: Duration::from_millis(self.dequeue_timeout_ms.max(1)),
            frame_await_timeout: Duration::from_millis(self.frame_await_timeout_ms.max(1)),
        }
    }

    pub fn extractor_config(&self) -> Result<ExtractorConfig, SettingsError> {
        Ok(ExtractorConfig {
            pump: self.pump_config(),
            fragment_shader: self.shader()?,
            try_hwaccel: self.try_hwaccel,
            ..ExtractorConfig::default()
        })
    }
}

/// Errors loading, saving or interpreting settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),

    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),

    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("Invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}
