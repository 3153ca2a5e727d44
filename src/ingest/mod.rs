//! Frame sources.
//!
//! - Still images (any format the `image` crate decodes)
//! - Video files (feature: video-ffmpeg)
//! - Synthetic `stub://` streams (testing, demos)
//!
//! Sources are local-only: URL schemes other than `stub://` are rejected.
//! Decoded frames are handed to the pipeline one at a time and never written
//! anywhere by the source itself.

use anyhow::Result;
use std::path::Path;

use crate::frame::Frame;

mod resample;
mod still;
mod synthetic;
#[cfg(feature = "video-ffmpeg")]
pub(crate) mod video_ffmpeg;

pub use resample::Resampled;
pub use still::ImageSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "video-ffmpeg")]
pub use video_ffmpeg::VideoSource;

/// Prefix that selects the synthetic source.
pub const STUB_SCHEME: &str = "stub://";

/// A stream of decoded frames, delivered in order with indices 0, 1, 2, ...
pub trait FrameSource {
    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Frames per second of the stream.
    fn fps(&self) -> f64;

    /// Total number of frames, when the container knows it.
    fn frame_count_hint(&self) -> Option<u64> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn fps(&self) -> f64 {
        (**self).fps()
    }

    fn frame_count_hint(&self) -> Option<u64> {
        (**self).frame_count_hint()
    }
}

/// What kind of media an input path refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Synthetic,
    NotFound,
    Unknown,
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff", "webp", "ppm", "pgm", "pnm", "tga", "ico",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "mov", "avi", "webm", "mpg", "mpeg", "wmv", "flv", "ts", "mts", "3gp",
    "ogv",
];

impl MediaKind {
    /// Classify an input by scheme, existence and file extension.
    pub fn sniff(input: &str) -> Self {
        if input.starts_with(STUB_SCHEME) {
            return MediaKind::Synthetic;
        }
        let path = Path::new(input);
        if !path.is_file() {
            return MediaKind::NotFound;
        }
        let Some(ext) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
        else {
            return MediaKind::Unknown;
        };
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Unknown
        }
    }
}

/// Open a video file. Needs the `video-ffmpeg` feature.
pub fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    #[cfg(feature = "video-ffmpeg")]
    {
        Ok(Box::new(VideoSource::open(path)?))
    }
    #[cfg(not(feature = "video-ffmpeg"))]
    {
        Err(anyhow::anyhow!(
            "cannot decode {}: video support requires the video-ffmpeg feature",
            path.display()
        ))
    }
}
