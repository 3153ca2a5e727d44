use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Face detector backend.
///
/// A backend turns one frame into raw face boxes in frame pixel coordinates,
/// keeping only boxes whose score exceeds `threshold`. Landmarks or other
/// auxiliary model outputs are dropped before returning.
///
/// Backends are called once per frame, in stream order. They must treat the
/// frame as read-only and must not keep pixel data beyond the call.
pub trait FaceDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        (**self).detect(frame, threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
