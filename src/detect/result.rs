/// A scored, axis-aligned face box in frame pixel coordinates.
///
/// Detections are produced fresh by a detector every frame and are never
/// mutated afterwards. Boxes are expected to satisfy `x1 < x2` and `y1 < y2`;
/// that is the detector's contract and is not re-checked here.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Detector confidence in `0..=1`.
    pub score: f32,
}

impl Detection {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            score,
        }
    }

    /// Build from the `[x1, y1, x2, y2, score]` layout detectors emit.
    pub const fn from_array(raw: [f32; 5]) -> Self {
        Self::new(raw[0], raw[1], raw[2], raw[3], raw[4])
    }

    pub fn to_array(&self) -> [f32; 5] {
        [self.x1, self.y1, self.x2, self.y2, self.score]
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

impl From<[f32; 5]> for Detection {
    fn from(raw: [f32; 5]) -> Self {
        Self::from_array(raw)
    }
}
