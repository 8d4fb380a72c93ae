//! Frame delivery
//!
//! A [`FrameSink`] receives every extracted frame as tightly packed RGBA8,
//! top row first. The pixel slice is only valid for the duration of the call;
//! sinks that keep frames must copy them.

use image::RgbaImage;

/// Receiver of extracted frames
pub trait FrameSink {
    /// Called once per frame, in decode order, with `pixels.len() == 4 * width * height`
    fn on_frame_extracted(&mut self, index: u32, pixels: &[u8], width: u32, height: u32);
}

impl<F> FrameSink for F
where
    F: FnMut(u32, &[u8], u32, u32),
{
    fn on_frame_extracted(&mut self, index: u32, pixels: &[u8], width: u32, height: u32) {
        self(index, pixels, width, height)
    }
}

/// Sink that keeps a copy of every frame
#[derive(Debug, Default)]
pub struct FrameCollector {
    frames: Vec<(u32, RgbaImage)>,
    rejected: usize,
}

impl FrameCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected frames with their indices
    pub fn frames(&self) -> &[(u32, RgbaImage)] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames whose buffer did not match their dimensions
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn into_frames(self) -> Vec<(u32, RgbaImage)> {
        self.frames
    }
}

impl FrameSink for FrameCollector {
    fn on_frame_extracted(&mut self, index: u32, pixels: &[u8], width: u32, height: u32) {
        match RgbaImage::from_raw(width, height, pixels.to_vec()) {
            Some(image) => self.frames.push((index, image)),
            None => {
                tracing::warn!(
                    "Frame {} has {} bytes, expected {} for {}x{}",
                    index,
                    pixels.len(),
                    crate::video::frame::rgba_size(width, height),
                    width,
                    height
                );
                self.rejected += 1;
            }
        }
    }
}
