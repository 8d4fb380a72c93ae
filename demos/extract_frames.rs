//! Extract frames from a video and print a short report
//!
//! Run with: cargo run --example extract_frames -- <path-or-url> [--task]
//!
//! Without `--task` the frames are collected in-process; with it they are
//! streamed from a background `ExtractTask`.

use mpeg_frames::telemetry::{init_logging, LogConfig};
use mpeg_frames::{ExtractTask, ExtractorConfig, FrameCollector, SourceHandle};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _guard = init_logging(&LogConfig::with_level("info,mpeg_frames=debug"))?;

    let mut args = std::env::args().skip(1);
    let location = args.next().ok_or("usage: extract_frames <path-or-url> [--task]")?;
    let use_task = args.any(|a| a == "--task");
    let source = SourceHandle::parse(&location)?;

    if use_task {
        let task = ExtractTask::spawn(source, ExtractorConfig::default())?;
        let mut count = 0;
        for frame in task.frames().iter() {
            if count == 0 {
                let (width, height) = frame.image.dimensions();
                println!("first frame: {}x{}, top-left {:?}", width, height, frame.image.get_pixel(0, 0).0);
            }
            count += 1;
        }
        let ok = task.wait()?;
        println!("task finished (ok = {}), {} frames received", ok, count);
        return Ok(());
    }

    let mut collector = FrameCollector::new();
    let ok = mpeg_frames::extract(source, &mut collector)?;
    if !ok {
        println!("could not read {}", location);
        return Ok(());
    }

    println!("extracted {} frames", collector.len());
    if let Some((_, first)) = collector.frames().first() {
        let (width, height) = first.dimensions();
        let centre = first.get_pixel(width / 2, height / 2).0;
        println!("frame size {}x{}, centre pixel {:?}", width, height, centre);
    }
    Ok(())
}
