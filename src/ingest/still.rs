use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::FrameSource;
use crate::frame::Frame;

/// A single still image, yielded once as frame 0.
pub struct ImageSource {
    path: PathBuf,
    pending: Option<Frame>,
}

impl ImageSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to decode image {}", path.display()))?
            .into_rgb8();
        log::info!(
            "ImageSource: opened {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self {
            path: path.to_path_buf(),
            pending: Some(Frame::new(0, image)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for ImageSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.pending.take())
    }

    /// Stills have no frame rate; 1 keeps second-based schedules meaningful.
    fn fps(&self) -> f64 {
        1.0
    }

    fn frame_count_hint(&self) -> Option<u64> {
        Some(1)
    }
}
