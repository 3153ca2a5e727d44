use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::{FrameSource, STUB_SCHEME};
use crate::frame::Frame;

/// Deterministic generated frames for `stub://` inputs.
///
/// Each frame is a slowly shifting gradient. Pair it with the stub detector to
/// exercise the whole pipeline without any media files or model.
pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    fps: f64,
    total_frames: u64,
    next_index: u64,
}

impl SyntheticSource {
    pub const DEFAULT_WIDTH: u32 = 640;
    pub const DEFAULT_HEIGHT: u32 = 480;
    pub const DEFAULT_FPS: f64 = 25.0;
    pub const DEFAULT_FRAMES: u64 = 100;

    /// Open `stub://<name>` with the default geometry and length.
    pub fn open(uri: &str) -> Result<Self> {
        let name = uri
            .strip_prefix(STUB_SCHEME)
            .ok_or_else(|| anyhow!("synthetic inputs must start with {}", STUB_SCHEME))?;
        let name = if name.trim().is_empty() { "synthetic" } else { name };
        log::info!("SyntheticSource: opened {}{} (synthetic)", STUB_SCHEME, name);
        Ok(Self {
            name: name.to_string(),
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
            fps: Self::DEFAULT_FPS,
            total_frames: Self::DEFAULT_FRAMES,
            next_index: 0,
        })
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        if fps > 0.0 {
            self.fps = fps;
        }
        self
    }

    pub fn with_frames(mut self, frames: u64) -> Self {
        self.total_frames = frames;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, index: u64) -> RgbImage {
        let shift = (index % 256) as u32;
        let scene = ((index / 50) % 4) as u32 * 40;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift / 2) % 256) as u8,
                ((x / 4 + y / 4 + scene) % 256) as u8,
            ])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_index >= self.total_frames {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Frame::new(index, self.render(index))))
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count_hint(&self) -> Option<u64> {
        Some(self.total_frames)
    }
}
