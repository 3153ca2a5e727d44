use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::detect::{available_backends, FaceDetector, AUTO_BACKEND, STUB_BACKEND};
use crate::ingest::MediaKind;
use crate::mask::{MaskOptions, ReplaceMode};
use crate::reliability::MAX_CONSISTENCY_THRESHOLD;
use crate::threshold::{parse_thresholds_by_sec, ThresholdSchedule};

const DEFAULT_THRESHOLD: f32 = 0.2;
const DEFAULT_CONSISTENCY_THRESHOLD: usize = 2;
const DEFAULT_CODEC: &str = "libx264";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DefaceConfigFile {
    detection: Option<DetectionConfigFile>,
    mask: Option<MaskConfigFile>,
    video: Option<VideoConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    threshold: Option<f32>,
    consistency_threshold: Option<usize>,
    backend: Option<String>,
    model_path: Option<PathBuf>,
    /// `WxH`
    scale: Option<String>,
    /// Seconds (as table keys) to thresholds.
    thresholds_by_sec: Option<BTreeMap<String, f32>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MaskConfigFile {
    replacewith: Option<ReplaceMode>,
    mask_scale: Option<f32>,
    ellipse: Option<bool>,
    mosaic_size: Option<u32>,
    color: Option<[u8; 3]>,
    replace_image: Option<PathBuf>,
    draw_scores: Option<bool>,
    score_font: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct VideoConfigFile {
    codec: Option<String>,
    fps: Option<f64>,
    keep_audio: Option<bool>,
}

/// Run configuration for the `deface` binary.
#[derive(Debug, Clone)]
pub struct DefaceConfig {
    pub detection: DetectionSettings,
    pub mask: MaskOptions,
    /// Required when `mask.mode` is `img`.
    pub replace_image: Option<PathBuf>,
    /// TrueType font for score labels; a system font when unset.
    pub score_font: Option<PathBuf>,
    pub video: VideoSettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub threshold: f32,
    pub consistency_threshold: usize,
    pub thresholds_by_sec: Vec<(f64, f32)>,
    pub backend: String,
    pub model_path: Option<PathBuf>,
    /// Inference resolution; the frame size when unset.
    pub inference_size: Option<(u32, u32)>,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub codec: String,
    /// Frame rate to resample the input to; the source rate when unset.
    pub fps: Option<f64>,
    /// Copy the input's audio stream into the output unchanged.
    pub keep_audio: bool,
}

impl Default for DefaceConfig {
    fn default() -> Self {
        Self {
            detection: DetectionSettings {
                threshold: DEFAULT_THRESHOLD,
                consistency_threshold: DEFAULT_CONSISTENCY_THRESHOLD,
                thresholds_by_sec: Vec::new(),
                backend: AUTO_BACKEND.to_string(),
                model_path: None,
                inference_size: None,
            },
            mask: MaskOptions::default(),
            replace_image: None,
            score_font: None,
            video: VideoSettings {
                codec: DEFAULT_CODEC.to_string(),
                fps: None,
                keep_audio: false,
            },
        }
    }
}

impl DefaceConfig {
    /// Defaults, then the config file (`path`, or `DEFACE_CONFIG`), then
    /// `DEFACE_*` environment overrides. Validated before returning.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = Self::layered(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Same layering as [`DefaceConfig::load`] without validation, for
    /// callers that apply further overrides first.
    pub fn layered(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("DEFACE_CONFIG")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => DefaceConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: DefaceConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(detection) = file.detection {
            let settings = &mut cfg.detection;
            if let Some(threshold) = detection.threshold {
                settings.threshold = threshold;
            }
            if let Some(consistency) = detection.consistency_threshold {
                settings.consistency_threshold = consistency;
            }
            if let Some(backend) = detection.backend {
                settings.backend = backend;
            }
            settings.model_path = detection.model_path;
            if let Some(scale) = detection.scale {
                settings.inference_size = Some(parse_size(&scale)?);
            }
            if let Some(table) = detection.thresholds_by_sec {
                settings.thresholds_by_sec = table
                    .into_iter()
                    .map(|(second, threshold)| {
                        let second: f64 = second.trim().parse().map_err(|_| {
                            anyhow!("thresholds_by_sec key '{}' is not a number of seconds", second)
                        })?;
                        Ok((second, threshold))
                    })
                    .collect::<Result<_>>()?;
            }
        }

        if let Some(mask) = file.mask {
            let options = &mut cfg.mask;
            if let Some(mode) = mask.replacewith {
                options.mode = mode;
            }
            if let Some(scale) = mask.mask_scale {
                options.mask_scale = scale;
            }
            if let Some(ellipse) = mask.ellipse {
                options.ellipse = ellipse;
            }
            if let Some(size) = mask.mosaic_size {
                options.mosaic_size = size;
            }
            if let Some(color) = mask.color {
                options.color = color;
            }
            if let Some(draw_scores) = mask.draw_scores {
                options.draw_scores = draw_scores;
            }
            cfg.replace_image = mask.replace_image;
            cfg.score_font = mask.score_font;
        }

        if let Some(video) = file.video {
            if let Some(codec) = video.codec {
                cfg.video.codec = codec;
            }
            cfg.video.fps = video.fps;
            if let Some(keep_audio) = video.keep_audio {
                cfg.video.keep_audio = keep_audio;
            }
        }

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(threshold) = std::env::var("DEFACE_THRESHOLD") {
            self.detection.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("DEFACE_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Ok(consistency) = std::env::var("DEFACE_CONSISTENCY_THRESHOLD") {
            self.detection.consistency_threshold = consistency.trim().parse().map_err(|_| {
                anyhow!(
                    "DEFACE_CONSISTENCY_THRESHOLD must be an integer between 0 and {}",
                    MAX_CONSISTENCY_THRESHOLD
                )
            })?;
        }
        if let Ok(backend) = std::env::var("DEFACE_BACKEND") {
            if !backend.trim().is_empty() {
                self.detection.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("DEFACE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detection.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(schedule) = std::env::var("DEFACE_THRESHOLDS_BY_SEC") {
            if !schedule.trim().is_empty() {
                self.detection.thresholds_by_sec = parse_thresholds_by_sec(&schedule)
                    .context("invalid DEFACE_THRESHOLDS_BY_SEC")?;
            }
        }
        Ok(())
    }

    /// Check ranges and cross-field requirements.
    pub fn validate(&self) -> Result<()> {
        let detection = &self.detection;
        if !(0.0..=1.0).contains(&detection.threshold) {
            return Err(anyhow!(
                "detection threshold must be between 0 and 1, got {}",
                detection.threshold
            ));
        }
        if detection.consistency_threshold > MAX_CONSISTENCY_THRESHOLD {
            return Err(anyhow!(
                "consistency threshold must be between 0 and {}, got {}",
                MAX_CONSISTENCY_THRESHOLD,
                detection.consistency_threshold
            ));
        }
        for (second, threshold) in &detection.thresholds_by_sec {
            if !second.is_finite() || *second < 0.0 {
                return Err(anyhow!("threshold schedule second {} must be >= 0", second));
            }
            if !(0.0..=1.0).contains(threshold) {
                return Err(anyhow!(
                    "threshold {} at {}s must be between 0 and 1",
                    threshold,
                    second
                ));
            }
        }
        if detection.backend.trim().is_empty() {
            return Err(anyhow!("detector backend must not be empty"));
        }
        if let Some((w, h)) = detection.inference_size {
            if w == 0 || h == 0 {
                return Err(anyhow!("inference size must be non-zero, got {}x{}", w, h));
            }
        }

        if !(self.mask.mask_scale.is_finite() && self.mask.mask_scale > 0.0) {
            return Err(anyhow!(
                "mask scale must be greater than zero, got {}",
                self.mask.mask_scale
            ));
        }
        if self.mask.mosaic_size == 0 {
            return Err(anyhow!("mosaic size must be at least 1"));
        }
        if self.mask.mode == ReplaceMode::Img && self.replace_image.is_none() {
            return Err(anyhow!("replace mode 'img' needs a replacement image"));
        }

        if self.video.codec.trim().is_empty() {
            return Err(anyhow!("video codec must not be empty"));
        }
        if let Some(fps) = self.video.fps {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(anyhow!("output fps must be greater than zero, got {}", fps));
            }
        }
        Ok(())
    }

    /// Threshold schedule for a stream running at `fps`.
    pub fn schedule(&self, fps: f64) -> ThresholdSchedule {
        ThresholdSchedule::new(
            self.detection.thresholds_by_sec.iter().copied(),
            self.detection.threshold,
            fps,
        )
    }
}

impl DetectionSettings {
    /// Build and warm up the detector for an input of `kind`.
    ///
    /// The stub backend is only offered for synthetic streams or when it is
    /// selected by name. Real media without a model therefore fails here
    /// instead of being masked with made-up boxes.
    pub fn detector(&self, kind: MediaKind) -> Result<Box<dyn FaceDetector>> {
        let explicit_stub = self.backend == STUB_BACKEND;
        let mut registry = available_backends(
            self.model_path.as_deref(),
            self.inference_size,
            explicit_stub || kind == MediaKind::Synthetic,
        )?;
        if self.backend == AUTO_BACKEND && registry.default_name().is_none() {
            return Err(anyhow!(
                "no face detector available: pass --model with a CenterFace ONNX file \
                 (requires the backend-tract feature)"
            ));
        }
        let mut detector = registry.select(&self.backend)?;
        if explicit_stub && kind != MediaKind::Synthetic {
            log::warn!("stub detector selected for real media; boxes are synthetic");
        }
        detector.warm_up()?;
        Ok(detector)
    }
}

/// Parse `WxH`, e.g. `640x360`.
pub fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("size '{}' must look like WxH", value))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|_| anyhow!("size '{}' must look like WxH", value))
    };
    Ok((parse(w)?, parse(h)?))
}

/// Parse `R,G,B` with components 0..=255.
pub fn parse_color(value: &str) -> Result<[u8; 3]> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [r, g, b] = parts.as_slice() else {
        return Err(anyhow!("color '{}' must look like R,G,B", value));
    };
    let parse = |part: &str| {
        part.parse::<u8>()
            .map_err(|_| anyhow!("color component '{}' must be between 0 and 255", part))
    };
    Ok([parse(r)?, parse(g)?, parse(b)?])
}

fn read_config_file(path: &Path) -> Result<DefaceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
