use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::FaceDetector;
use crate::detect::registry::STUB_BACKEND;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub backend for tests and demos. Never looks at pixels.
///
/// - `scripted`: replays a fixed list of per-frame raw detections, indexed by
///   frame index and cycled when the stream is longer than the script.
/// - `synthetic`: seeded face tracks drifting across the frame, with jitter,
///   occasional misses and sporadic low-score false positives.
///
/// Both modes keep only boxes scoring above the requested threshold.
pub struct StubBackend {
    mode: StubMode,
}

enum StubMode {
    Scripted(Vec<Vec<Detection>>),
    Synthetic(SyntheticFaces),
}

impl StubBackend {
    pub fn scripted(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            mode: StubMode::Scripted(frames),
        }
    }

    pub fn synthetic(seed: u64, faces: usize) -> Self {
        Self {
            mode: StubMode::Synthetic(SyntheticFaces::new(seed, faces)),
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::synthetic(0, 2)
    }
}

impl FaceDetector for StubBackend {
    fn name(&self) -> &'static str {
        STUB_BACKEND
    }

    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        let raw = match &mut self.mode {
            StubMode::Scripted(frames) if frames.is_empty() => Vec::new(),
            StubMode::Scripted(frames) => {
                let slot = (frame.index() % frames.len() as u64) as usize;
                frames[slot].clone()
            }
            StubMode::Synthetic(faces) => faces.next(frame),
        };
        Ok(raw.into_iter().filter(|det| det.score > threshold).collect())
    }
}

struct SyntheticFaces {
    rng: StdRng,
    faces: usize,
}

impl SyntheticFaces {
    const MISS_RATE: f64 = 0.1;
    const FALSE_POSITIVE_RATE: f64 = 0.15;
    const JITTER_PX: f32 = 2.0;

    fn new(seed: u64, faces: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            faces,
        }
    }

    fn next(&mut self, frame: &Frame) -> Vec<Detection> {
        let width = frame.width() as f32;
        let height = frame.height() as f32;
        let side = (width.min(height) / 6.0).max(4.0);
        let lanes = self.faces.max(1) as f32;
        let mut out = Vec::with_capacity(self.faces + 1);

        for face in 0..self.faces {
            if self.rng.gen_bool(Self::MISS_RATE) {
                continue;
            }
            // Each face drifts right along its own lane and wraps around.
            let travel = (width - side).max(1.0);
            let x = (frame.index() as f32 * 3.0 + face as f32 * travel / lanes) % travel;
            let y = (height - side) * (face as f32 + 0.5) / lanes;
            let jx = self.rng.gen_range(-Self::JITTER_PX..=Self::JITTER_PX);
            let jy = self.rng.gen_range(-Self::JITTER_PX..=Self::JITTER_PX);
            let x1 = (x + jx).max(0.0);
            let y1 = (y + jy).max(0.0);
            out.push(Detection::new(
                x1,
                y1,
                (x1 + side).min(width),
                (y1 + side).min(height),
                self.rng.gen_range(0.5..0.95),
            ));
        }

        if self.rng.gen_bool(Self::FALSE_POSITIVE_RATE) {
            let fp_side = side / 2.0;
            let x1 = self.rng.gen_range(0.0..(width - fp_side).max(1.0));
            let y1 = self.rng.gen_range(0.0..(height - fp_side).max(1.0));
            out.push(Detection::new(
                x1,
                y1,
                x1 + fp_side,
                y1 + fp_side,
                self.rng.gen_range(0.05..0.6),
            ));
        }

        out
    }
}
