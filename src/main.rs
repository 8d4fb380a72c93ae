//! mpeg-frames - frame dump tool
//!
//! Extracts the frames of a video file or URL and writes them as numbered
//! PNG or JPEG images.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use image::{DynamicImage, ImageFormat, RgbaImage};
use mpeg_frames::settings::ExtractorSettings;
use mpeg_frames::telemetry::{init_logging, LogConfig, SaveTimings};
use mpeg_frames::{FrameExtractor, FrameSink, SourceHandle};

#[derive(Parser, Debug)]
#[command(name = "mpeg-frames", version, about = "Dump the frames of a video as numbered images")]
struct Args {
    /// File path or URL of the video
    input: String,

    /// Directory for written frames (default: ./frames)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Stop delivering frames after N
    #[arg(short = 'n', long, value_name = "N")]
    max_frames: Option<u32>,

    /// png or jpeg
    #[arg(short, long, value_name = "FMT")]
    format: Option<String>,

    /// Start of the video inside INPUT, in bytes (files only)
    #[arg(long, value_name = "BYTES")]
    offset: Option<u64>,

    /// Length of the video inside INPUT, in bytes; -1 reads to the end (files only)
    #[arg(long, value_name = "BYTES", allow_negative_numbers = true)]
    length: Option<i64>,

    /// Request header for URL inputs, repeatable
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Swap red and blue
    #[arg(long)]
    bgra: bool,

    /// Decode in software only
    #[arg(long)]
    no_hwaccel: bool,

    /// Also write logs to PATH
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Store the effective settings as the new defaults
    #[arg(long)]
    save_settings: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header {:?} is not NAME:VALUE", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header {:?} has no name", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl Args {
    /// Overlay command-line choices on stored settings
    fn apply(&self, settings: &mut ExtractorSettings) {
        if let Some(max_frames) = self.max_frames {
            settings.max_frames = max_frames;
        }
        if let Some(format) = &self.format {
            settings.image_format = format.clone();
        }
        if let Some(output) = &self.output {
            settings.output_dir = Some(output.display().to_string());
        }
        if self.bgra {
            settings.fragment_shader = "bgra".into();
        }
        if self.no_hwaccel {
            settings.try_hwaccel = false;
        }
        settings.clamp();
    }
}

/// Sink writing each frame to `<dir>/frame_00000.<ext>`
struct FrameWriter {
    dir: PathBuf,
    format: ImageFormat,
    written: u32,
    failed: u32,
    timings: SaveTimings,
}

impl FrameWriter {
    fn new(dir: PathBuf, format: ImageFormat) -> Self {
        Self {
            dir,
            format,
            written: 0,
            failed: 0,
            timings: SaveTimings::new(),
        }
    }

    fn frame_path(&self, index: u32) -> PathBuf {
        let extension = self.format.extensions_str().first().copied().unwrap_or("img");
        self.dir.join(format!("frame_{:05}.{}", index, extension))
    }

    fn write(&self, path: &Path, image: RgbaImage) -> image::ImageResult<()> {
        match self.format {
            // JPEG has no alpha channel
            ImageFormat::Jpeg => DynamicImage::ImageRgba8(image)
                .to_rgb8()
                .save_with_format(path, self.format),
            _ => image.save_with_format(path, self.format),
        }
    }
}

impl FrameSink for FrameWriter {
    fn on_frame_extracted(&mut self, index: u32, pixels: &[u8], width: u32, height: u32) {
        let started = Instant::now();
        let Some(image) = RgbaImage::from_raw(width, height, pixels.to_vec()) else {
            tracing::warn!("Frame {} has an unexpected size", index);
            self.failed += 1;
            return;
        };
        let path = self.frame_path(index);
        match self.write(&path, image) {
            Ok(()) => {
                tracing::debug!("Wrote {}", path.display());
                self.written += 1;
            }
            Err(e) => {
                tracing::error!("Failed to write {}: {}", path.display(), e);
                self.failed += 1;
            }
        }
        self.timings.record(started.elapsed());
    }
}

fn open_source(args: &Args) -> Result<SourceHandle, Box<dyn std::error::Error>> {
    if args.offset.is_some() || args.length.is_some() {
        let file = File::open(&args.input)?;
        return Ok(SourceHandle::file_range(
            file,
            args.offset.unwrap_or(0),
            args.length.unwrap_or(-1),
        ));
    }
    match SourceHandle::parse(&args.input)? {
        SourceHandle::Uri { uri, .. } if !args.headers.is_empty() => Ok(SourceHandle::uri_with_headers(
            uri,
            args.headers.iter().cloned().collect(),
        )),
        source => Ok(source),
    }
}

fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let mut settings = ExtractorSettings::load();
    args.apply(&mut settings);
    if args.save_settings {
        settings.save()?;
        tracing::info!("Saved settings");
    }

    let config = settings.extractor_config()?;
    let format = settings.output_format()?;
    let dir = settings
        .output_dir
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("frames"));
    fs::create_dir_all(&dir)?;

    let source = open_source(&args)?;
    let mut writer = FrameWriter::new(dir, format);
    let mut extractor = FrameExtractor::new(config);

    let started = Instant::now();
    let ok = extractor.extract(source, &mut writer)?;
    let elapsed = started.elapsed();

    if !ok {
        tracing::error!("Could not read {}", args.input);
        return Ok(false);
    }

    let stats = writer.timings.stats();
    tracing::info!(
        "Wrote {} frames to {} in {:.2}s ({} failed, avg {:.2} ms/frame, p95 {:.2} ms)",
        writer.written,
        writer.dir.display(),
        elapsed.as_secs_f64(),
        writer.failed,
        stats.avg_ms,
        stats.p95_ms
    );
    if let Some(pump) = extractor.last_stats() {
        tracing::info!(
            "Decoded {} frames from {} samples",
            pump.decode_count,
            pump.input_chunks
        );
    }
    Ok(writer.failed == 0)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_config = LogConfig {
        file_enabled: args.log_file.is_some(),
        file_path: args.log_file.clone(),
        default_level: if args.verbose { "debug" } else { "info" }.to_string(),
        ..LogConfig::default()
    };
    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_range() {
        let args = Args::try_parse_from(["mpeg-frames", "clip.bin", "--offset", "4096", "--length", "-1"]).unwrap();
        assert_eq!(args.input, "clip.bin");
        assert_eq!(args.offset, Some(4096));
        assert_eq!(args.length, Some(-1));
        assert!(args.headers.is_empty());
    }

    #[test]
    fn test_parse_repeated_headers() {
        let args = Args::try_parse_from([
            "mpeg-frames",
            "https://example.com/a.mp4",
            "-H",
            "Authorization: Bearer abc",
            "--header",
            "X-Trace:1",
        ])
        .unwrap();
        assert_eq!(
            args.headers,
            vec![
                ("Authorization".to_string(), "Bearer abc".to_string()),
                ("X-Trace".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Args::try_parse_from(["mpeg-frames"]).is_err());
        assert!(Args::try_parse_from(["mpeg-frames", "a.mp4", "-H", "no-colon"]).is_err());
        assert!(Args::try_parse_from(["mpeg-frames", "a.mp4", "-n", "many"]).is_err());
        assert!(Args::try_parse_from(["mpeg-frames", "a.mp4", "--offset", "-5"]).is_err());
    }

    #[test]
    fn test_apply_overlays_settings() {
        let args = Args::try_parse_from([
            "mpeg-frames",
            "a.mp4",
            "-n",
            "25",
            "-f",
            "jpeg",
            "-o",
            "out",
            "--bgra",
            "--no-hwaccel",
        ])
        .unwrap();
        let mut settings = ExtractorSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.max_frames, 25);
        assert_eq!(settings.image_format, "jpeg");
        assert_eq!(settings.output_dir.as_deref(), Some("out"));
        assert_eq!(settings.fragment_shader, "bgra");
        assert!(!settings.try_hwaccel);
    }

    #[test]
    fn test_apply_keeps_unset_fields() {
        let args = Args::try_parse_from(["mpeg-frames", "a.mp4"]).unwrap();
        let stored = ExtractorSettings {
            max_frames: 7,
            image_format: "jpeg".into(),
            ..ExtractorSettings::default()
        };
        let mut settings = stored.clone();
        args.apply(&mut settings);
        assert_eq!(settings, stored);
    }
}
