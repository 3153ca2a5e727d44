//! Frame-rate conversion for sources.
//!
//! Output frame `n` shows the source frame on screen at time `n / target`,
//! so frames are dropped when slowing down and repeated when speeding up.
//! Stream duration is preserved.

use anyhow::{anyhow, Result};

use super::FrameSource;
use crate::frame::Frame;

/// Slack for float error when mapping output times onto source frames.
const EPSILON: f64 = 1e-9;

pub struct Resampled<S> {
    inner: S,
    target_fps: f64,
    /// Source frames per output frame.
    step: f64,
    current: Option<Frame>,
    /// Source position of `current`; the number of frames pulled so far.
    pulled: u64,
    emitted: u64,
}

impl<S: FrameSource> Resampled<S> {
    pub fn new(inner: S, target_fps: f64) -> Result<Self> {
        if !(target_fps.is_finite() && target_fps > 0.0) {
            return Err(anyhow!("target fps must be positive, got {}", target_fps));
        }
        let step = inner.fps() / target_fps;
        Ok(Self {
            inner,
            target_fps,
            step,
            current: None,
            pulled: 0,
            emitted: 0,
        })
    }

    fn source_position(&self, output_index: u64) -> u64 {
        (output_index as f64 * self.step + EPSILON).floor() as u64
    }
}

impl<S: FrameSource> FrameSource for Resampled<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let wanted = self.source_position(self.emitted);
        while self.current.is_none() || self.pulled <= wanted {
            match self.inner.next_frame()? {
                Some(frame) => {
                    self.current = Some(frame);
                    self.pulled += 1;
                }
                None => {
                    self.current = None;
                    return Ok(None);
                }
            }
        }

        let index = self.emitted;
        self.emitted += 1;
        let Some(mut frame) = self.current.take() else {
            return Ok(None);
        };
        if self.source_position(self.emitted) < self.pulled {
            // Shown again by the next output frame.
            let copy = Frame::new(index, frame.image().clone());
            self.current = Some(frame);
            return Ok(Some(copy));
        }
        frame.renumber(index);
        Ok(Some(frame))
    }

    fn fps(&self) -> f64 {
        self.target_fps
    }

    fn frame_count_hint(&self) -> Option<u64> {
        self.inner
            .frame_count_hint()
            .map(|frames| (frames as f64 / self.step - EPSILON).ceil().max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Source whose frame `i` is filled with the value `i`.
    struct Numbered {
        fps: f64,
        frames: u64,
        next: u64,
    }

    impl FrameSource for Numbered {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.next == self.frames {
                return Ok(None);
            }
            let value = self.next as u8;
            let frame = Frame::new(self.next, RgbImage::from_pixel(2, 2, Rgb([value; 3])));
            self.next += 1;
            Ok(Some(frame))
        }

        fn fps(&self) -> f64 {
            self.fps
        }

        fn frame_count_hint(&self) -> Option<u64> {
            Some(self.frames)
        }
    }

    fn numbered(fps: f64, frames: u64) -> Numbered {
        Numbered {
            fps,
            frames,
            next: 0,
        }
    }

    /// (output index, source frame shown) pairs.
    fn drain(source: &mut Resampled<Numbered>) -> Vec<(u64, u8)> {
        let mut shown = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            shown.push((frame.index(), frame.image().get_pixel(0, 0).0[0]));
        }
        shown
    }

    #[test]
    fn halving_the_rate_drops_every_other_frame() {
        let mut source = Resampled::new(numbered(30.0, 30), 15.0).unwrap();
        assert_eq!(source.fps(), 15.0);
        assert_eq!(source.frame_count_hint(), Some(15));

        let shown = drain(&mut source);
        assert_eq!(shown.len(), 15);
        assert_eq!(shown[0], (0, 0));
        assert_eq!(shown[1], (1, 2));
        assert_eq!(shown[14], (14, 28));
    }

    #[test]
    fn raising_the_rate_repeats_frames() {
        let mut source = Resampled::new(numbered(10.0, 10), 25.0).unwrap();
        assert_eq!(source.frame_count_hint(), Some(25));

        let shown: Vec<u8> = drain(&mut source).into_iter().map(|(_, value)| value).collect();
        assert_eq!(shown.len(), 25);
        assert_eq!(&shown[..6], &[0, 0, 0, 1, 1, 2]);
        assert_eq!(shown[24], 9);
    }

    #[test]
    fn duration_is_preserved() {
        for (source_fps, frames, target) in [(30.0, 90, 12.0), (24.0, 48, 60.0), (25.0, 50, 25.0)] {
            let mut source = Resampled::new(numbered(source_fps, frames), target).unwrap();
            let emitted = drain(&mut source).len() as f64;
            let source_seconds = frames as f64 / source_fps;
            assert!(
                (emitted / target - source_seconds).abs() < 1.0 / target,
                "{source_fps} -> {target}: {emitted} frames"
            );
        }
    }

    #[test]
    fn output_indices_are_contiguous() {
        let mut source = Resampled::new(numbered(30.0, 20), 7.0).unwrap();
        let indices: Vec<u64> = drain(&mut source).into_iter().map(|(index, _)| index).collect();
        assert_eq!(indices, (0..indices.len() as u64).collect::<Vec<_>>());
    }

    #[test]
    fn rejects_non_positive_rates() {
        assert!(Resampled::new(numbered(30.0, 1), 0.0).is_err());
        assert!(Resampled::new(numbered(30.0, 1), f64::NAN).is_err());
    }
}
