//! Frame sinks: where anonymized frames go.
//!
//! A sink only ever sees frames after masks have been rendered. `finish` must
//! be called once the stream ends (or is interrupted) so containers get their
//! trailers written.

use anyhow::Result;
use std::path::Path;

use crate::frame::Frame;

mod images;
#[cfg(feature = "video-ffmpeg")]
mod video_ffmpeg;

pub use images::{ImageSequenceSink, ImageSink};
#[cfg(feature = "video-ffmpeg")]
pub use video_ffmpeg::VideoSink;

pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<K: FrameSink + ?Sized> FrameSink for Box<K> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Discards frames. Useful for dry runs and benchmarks.
#[derive(Debug, Default)]
pub struct NullSink {
    frames: u64,
}

impl NullSink {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for NullSink {
    fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        self.frames += 1;
        Ok(())
    }
}

/// Create a video encoder sink, optionally carrying over the audio track of
/// `audio_from`. Needs the `video-ffmpeg` feature.
pub fn open_video(
    path: &Path,
    width: u32,
    height: u32,
    fps: f64,
    codec: &str,
    audio_from: Option<&Path>,
) -> Result<Box<dyn FrameSink>> {
    #[cfg(feature = "video-ffmpeg")]
    {
        Ok(Box::new(VideoSink::create(
            path, width, height, fps, codec, audio_from,
        )?))
    }
    #[cfg(not(feature = "video-ffmpeg"))]
    {
        let _ = (width, height, fps, codec, audio_from);
        Err(anyhow::anyhow!(
            "cannot encode {}: video support requires the video-ffmpeg feature",
            path.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_counts_frames() {
        let mut sink = NullSink::default();
        for index in 0..3 {
            let frame = Frame::from_rgb(index, 2, 2, vec![0u8; 12]).unwrap();
            sink.write_frame(&frame).unwrap();
        }
        sink.finish().unwrap();
        assert_eq!(sink.frames(), 3);
    }
}
