use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::FrameSink;
use crate::frame::Frame;

/// Writes a single image. The format follows the file extension.
pub struct ImageSink {
    path: PathBuf,
    written: bool,
}

impl ImageSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            written: false,
        }
    }
}

impl FrameSink for ImageSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.written {
            return Err(anyhow!(
                "{} already holds a frame; use an image sequence for streams",
                self.path.display()
            ));
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        frame
            .image()
            .save(&self.path)
            .with_context(|| format!("failed to write image {}", self.path.display()))?;
        self.written = true;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.written {
            log::info!("ImageSink: wrote {}", self.path.display());
        } else {
            log::warn!("ImageSink: no frame written to {}", self.path.display());
        }
        Ok(())
    }
}

/// Writes every frame as `frame_000000.png`, `frame_000001.png`, ... into a
/// directory.
pub struct ImageSequenceSink {
    dir: PathBuf,
    frames: u64,
}

impl ImageSequenceSink {
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            frames: 0,
        })
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", index))
    }
}

impl FrameSink for ImageSequenceSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let path = self.frame_path(frame.index());
        frame
            .image()
            .save(&path)
            .with_context(|| format!("failed to write frame {}", path.display()))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        log::info!(
            "ImageSequenceSink: wrote {} frames to {}",
            self.frames,
            self.dir.display()
        );
        Ok(())
    }
}
