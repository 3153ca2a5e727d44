//! Time-varying detection threshold.
//!
//! A schedule is declared in seconds (`{1: 0.2, 5: 0.6}`) and resolved once
//! against the stream frame rate into a step function over frame indices.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Piecewise-constant mapping from frame index to detector threshold.
///
/// Frame 0 is always keyed, so every non-negative frame index resolves to a
/// threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdSchedule {
    thresholds: BTreeMap<i64, f32>,
    default_threshold: f32,
    fps: f64,
}

impl ThresholdSchedule {
    /// Resolve `(second, threshold)` pairs against `fps`.
    ///
    /// Each second maps to frame `round(fps * second)` (half away from zero).
    /// Frame 0 gets `default_threshold` unless a pair lands on it. When two
    /// seconds land on the same frame the later second wins.
    pub fn new<I>(thresholds_by_sec: I, default_threshold: f32, fps: f64) -> Self
    where
        I: IntoIterator<Item = (f64, f32)>,
    {
        let mut pairs: Vec<(f64, f32)> = thresholds_by_sec.into_iter().collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut thresholds = BTreeMap::new();
        thresholds.insert(0, default_threshold);
        for (second, threshold) in pairs {
            let frame_idx = (fps * second).round() as i64;
            thresholds.insert(frame_idx, threshold);
        }

        Self {
            thresholds,
            default_threshold,
            fps,
        }
    }

    /// A schedule that always answers `default_threshold`.
    pub fn constant(default_threshold: f32, fps: f64) -> Self {
        Self::new(std::iter::empty(), default_threshold, fps)
    }

    /// Threshold at the greatest keyed frame not after `frame_idx`.
    pub fn threshold_for_frame(&self, frame_idx: u64) -> f32 {
        let frame_idx = i64::try_from(frame_idx).unwrap_or(i64::MAX);
        self.thresholds
            .range(..=frame_idx)
            .next_back()
            .map(|(_, threshold)| *threshold)
            .unwrap_or(self.default_threshold)
    }

    /// Keyed frames in ascending order.
    pub fn keyed_frames(&self) -> Vec<(i64, f32)> {
        self.thresholds
            .iter()
            .map(|(frame, threshold)| (*frame, *threshold))
            .collect()
    }

    /// True when `frame_idx` starts a new step (and is not frame 0).
    pub fn changes_at(&self, frame_idx: u64) -> bool {
        frame_idx != 0
            && i64::try_from(frame_idx)
                .map(|idx| self.thresholds.contains_key(&idx))
                .unwrap_or(false)
    }

    pub fn default_threshold(&self) -> f32 {
        self.default_threshold
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

fn bare_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([{,]\s*)(-?[0-9]+(?:\.[0-9]+)?)\s*:").expect("static regex is valid")
    })
}

/// Parse a seconds-keyed threshold map.
///
/// Accepts JSON objects (`{"1": 0.5}`) as well as the shorthand with bare
/// numeric keys (`{1: 0.5, 5.5: 0.7}`). Keys are seconds, values must lie in
/// `0..=1`. Blank input yields an empty schedule.
pub fn parse_thresholds_by_sec(text: &str) -> Result<Vec<(f64, f32)>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let quoted = bare_key_pattern().replace_all(text, "${1}\"${2}\":");
    let raw: BTreeMap<String, f64> = serde_json::from_str(&quoted)
        .with_context(|| format!("invalid threshold schedule '{}'", text))?;

    let mut pairs = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        let second: f64 = key
            .trim()
            .parse()
            .map_err(|_| anyhow!("threshold schedule key '{}' is not a number of seconds", key))?;
        if !second.is_finite() || second < 0.0 {
            return Err(anyhow!(
                "threshold schedule key '{}' must be a non-negative number of seconds",
                key
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(anyhow!(
                "threshold {} at {}s is outside 0..=1",
                value,
                second
            ));
        }
        pairs.push((second, value as f32));
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(pairs)
}
