//! Background extraction
//!
//! [`ExtractTask`] runs one extraction on its own thread and streams copies of
//! the frames back over a channel. The owner keeps the [`CancelToken`]; once it
//! is cancelled the worker stops forwarding frames, and dropping the receiver
//! has the same effect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;

use crate::error::{ExtractError, Result};
use crate::extractor::{ExtractorConfig, FrameExtractor, HardwareBackend, PipelineBackend};
use crate::sink::FrameSink;
use crate::source::SourceHandle;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A frame delivered by an [`ExtractTask`]
#[derive(Debug, Clone)]
pub struct ExtractedFrame {
    pub index: u32,
    pub image: RgbaImage,
}

/// Worker-side sink forwarding frames to the owner
struct ForwardingSink {
    frames: Sender<ExtractedFrame>,
    cancel: CancelToken,
    forwarded: u32,
}

impl FrameSink for ForwardingSink {
    fn on_frame_extracted(&mut self, index: u32, pixels: &[u8], width: u32, height: u32) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(image) = RgbaImage::from_raw(width, height, pixels.to_vec()) else {
            tracing::warn!("Dropping frame {}: {} bytes for {}x{}", index, pixels.len(), width, height);
            return;
        };
        if self.frames.send(ExtractedFrame { index, image }).is_err() {
            // Owner went away
            tracing::debug!("Frame receiver dropped, cancelling after frame {}", index);
            self.cancel.cancel();
            return;
        }
        self.forwarded += 1;
    }
}

/// An extraction running on a worker thread
pub struct ExtractTask {
    frames: Receiver<ExtractedFrame>,
    cancel: CancelToken,
    handle: Option<JoinHandle<Result<bool>>>,
}

impl ExtractTask {
    /// Extract from `source` with the FFmpeg + wgpu backend
    pub fn spawn(source: SourceHandle, config: ExtractorConfig) -> Result<Self> {
        Self::spawn_with(source, config, || HardwareBackend)
    }

    /// Extract with a backend built on the worker thread
    ///
    /// GPU resources are not `Send`, so the backend and everything it creates
    /// live entirely on the worker.
    pub fn spawn_with<B, F>(source: SourceHandle, config: ExtractorConfig, make_backend: F) -> Result<Self>
    where
        B: PipelineBackend,
        F: FnOnce() -> B + Send + 'static,
    {
        let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("mpeg-frames-extract".into())
            .spawn(move || {
                let description = source.describe();
                let mut extractor = FrameExtractor::new(config).with_backend(make_backend());
                let mut sink = ForwardingSink {
                    frames: frame_tx,
                    cancel: worker_cancel,
                    forwarded: 0,
                };
                let result = extractor.extract(source, &mut sink);
                tracing::debug!(
                    "Extract task for {} finished after forwarding {} frames",
                    description,
                    sink.forwarded
                );
                result
            })?;

        Ok(Self {
            frames: frame_rx,
            cancel,
            handle: Some(handle),
        })
    }

    /// Frames in decode order; disconnects when the worker finishes
    pub fn frames(&self) -> &Receiver<ExtractedFrame> {
        &self.frames
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the extraction to end and return its result
    pub fn wait(mut self) -> Result<bool> {
        self.join()
    }

    /// Cancel, then wait for the worker to exit
    pub fn close(mut self) -> Result<bool> {
        self.cancel.cancel();
        self.join()
    }

    fn join(&mut self) -> Result<bool> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ExtractError::Codec("extract task panicked".into()))?,
            None => Ok(true),
        }
    }
}

impl Drop for ExtractTask {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Err(e) = self.join() {
            tracing::warn!("Extract task ended with error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeSource};

    fn handle() -> SourceHandle {
        SourceHandle::parse("https://example.com/clip.mp4").unwrap()
    }

    #[test]
    fn test_frames_stream_to_owner() {
        let task = ExtractTask::spawn_with(handle(), ExtractorConfig::default(), || {
            FakeBackend::with_source(FakeSource::video(6))
        })
        .unwrap();

        let frames: Vec<ExtractedFrame> = task.frames().iter().collect();
        assert_eq!(frames.len(), 6);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.index, i as u32);
            assert_eq!(frame.image.dimensions(), (64, 48));
            assert_eq!(frame.image.get_pixel(0, 0).0, [i as u8, i as u8, i as u8, 255]);
        }
        assert!(task.wait().unwrap());
    }

    #[test]
    fn test_cancelled_task_forwards_nothing() {
        let task = ExtractTask::spawn_with(handle(), ExtractorConfig::default(), || {
            FakeBackend::with_source(FakeSource::video(50))
        })
        .unwrap();
        let frames = task.frames().clone();
        task.close().unwrap();

        // Whatever was sent before the cancel is all there is
        let received = frames.try_iter().count();
        assert!(received <= 50);
        assert!(frames.recv().is_err());
    }

    #[test]
    fn test_cancel_before_start_drops_all_frames() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = ForwardingSink {
            frames: tx,
            cancel,
            forwarded: 0,
        };
        sink.on_frame_extracted(0, &[0; 16], 2, 2);
        assert_eq!(sink.forwarded, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_cancels() {
        let cancel = CancelToken::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let mut sink = ForwardingSink {
            frames: tx,
            cancel: cancel.clone(),
            forwarded: 0,
        };
        sink.on_frame_extracted(0, &[0; 16], 2, 2);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_unopenable_source_reports_false() {
        let task = ExtractTask::spawn_with(handle(), ExtractorConfig::default(), || FakeBackend {
            open_fails: true,
            ..Default::default()
        })
        .unwrap();
        assert!(!task.wait().unwrap());
    }
}
