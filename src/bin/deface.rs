//! deface - anonymize faces in images and videos
//!
//! For every input:
//! 1. Sniffs the media kind (image, video, `stub://` synthetic stream)
//! 2. Builds the detector, threshold schedule and mask renderer from the
//!    layered configuration (defaults, config file, environment, flags)
//! 3. Runs the frame pipeline into an image, image sequence or video sink
//!
//! Ctrl-C stops feeding frames; the current output is still finalized.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use image::DynamicImage;
use std::fs;
use std::io::IsTerminal;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use deface::config::{parse_color, parse_size};
use deface::ingest::{self, STUB_SCHEME};
use deface::mask::load_score_font;
use deface::output;
use deface::threshold::parse_thresholds_by_sec;
use deface::{
    DefaceConfig, Frame, FramePipeline, FrameSink, FrameSource, ImageSequenceSink, ImageSink,
    ImageSource, MaskRenderer, MediaKind, ReplaceMode, Resampled, SyntheticSource,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "deface",
    version,
    about = "Video and image anonymization by face detection"
)]
struct Args {
    /// Input files or directories (directories are expanded one level), or stub://<name>
    #[arg(required = true, value_name = "INPUT")]
    inputs: Vec<String>,

    /// Output path (single input only). Defaults to <stem>_anonymized.<ext>
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Detection threshold in [0, 1]
    #[arg(short = 't', long = "thresh", value_name = "T")]
    thresh: Option<f32>,

    /// Downscale frames to WxH for detection
    #[arg(long, value_name = "WxH")]
    scale: Option<String>,

    /// Mask whole boxes instead of inscribed ellipses
    #[arg(long)]
    boxes: bool,

    /// Scale factor applied to face boxes before masking
    #[arg(long, value_name = "S")]
    mask_scale: Option<f32>,

    /// Replacement: blur, solid, mosaic, img or none
    #[arg(long, value_name = "MODE")]
    replacewith: Option<ReplaceMode>,

    /// Replacement image for --replacewith img
    #[arg(long, value_name = "PATH")]
    replaceimg: Option<PathBuf>,

    /// Mosaic tile size in pixels
    #[arg(long, value_name = "PX")]
    mosaicsize: Option<u32>,

    /// Fill color for --replacewith solid
    #[arg(long, value_name = "R,G,B")]
    color: Option<String>,

    /// Print detection scores above masked regions
    #[arg(long)]
    draw_scores: bool,

    /// TrueType font for --draw-scores (defaults to a system font)
    #[arg(long, value_name = "PATH")]
    score_font: Option<PathBuf>,

    /// Detector backend (auto|tract|stub)
    #[arg(long, value_name = "NAME")]
    backend: Option<String>,

    /// CenterFace ONNX model for the tract backend
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Thresholds from a given second on, e.g. "{0: 0.3, 12.5: 0.5}"
    #[arg(long, value_name = "MAP")]
    thresholds_by_sec: Option<String>,

    /// Past frames a face must overlap before it is masked
    #[arg(short = 'c', long, value_name = "N", value_parser = clap::value_parser!(u8).range(0..=5))]
    consistency_threshold: Option<u8>,

    /// Video encoder
    #[arg(long, value_name = "NAME")]
    codec: Option<String>,

    /// Resample videos to this frame rate (defaults to the input rate)
    #[arg(long, value_name = "FPS")]
    fps: Option<f64>,

    /// Copy the input's audio track into the output video
    #[arg(short = 'k', long)]
    keep_audio: bool,

    /// TOML configuration file (falls back to $DEFACE_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = DefaceConfig::layered(args.config.as_deref())?;
        apply_args(&mut cfg, &args)?;
        cfg.validate()?;
        cfg
    };

    let replacement = match (&cfg.mask.mode, &cfg.replace_image) {
        (ReplaceMode::Img, Some(path)) => Some(
            image::open(path)
                .with_context(|| format!("failed to read replacement image {}", path.display()))?,
        ),
        _ => None,
    };

    let inputs = expand_inputs(&args.inputs)?;
    if args.output.is_some() && inputs.len() != 1 {
        return Err(anyhow!(
            "--output needs exactly one input, got {}",
            inputs.len()
        ));
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let run = Run {
        cfg: &cfg,
        replacement: replacement.as_ref(),
        ui: &ui,
        stop: &stop,
    };
    let mut failed = 0usize;
    for input in &inputs {
        if stop.load(Ordering::SeqCst) {
            log::warn!("interrupted; skipping remaining inputs");
            break;
        }
        if let Err(err) = run.input(input, args.output.as_deref()) {
            log::error!("{}: {:#}", input, err);
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} inputs failed", failed, inputs.len()));
    }
    Ok(())
}

fn apply_args(cfg: &mut DefaceConfig, args: &Args) -> Result<()> {
    if let Some(thresh) = args.thresh {
        cfg.detection.threshold = thresh;
    }
    if let Some(consistency) = args.consistency_threshold {
        cfg.detection.consistency_threshold = consistency as usize;
    }
    if let Some(schedule) = &args.thresholds_by_sec {
        cfg.detection.thresholds_by_sec =
            parse_thresholds_by_sec(schedule).context("invalid --thresholds-by-sec")?;
    }
    if let Some(backend) = &args.backend {
        cfg.detection.backend = backend.clone();
    }
    if let Some(model) = &args.model {
        cfg.detection.model_path = Some(model.clone());
    }
    if let Some(scale) = &args.scale {
        cfg.detection.inference_size = Some(parse_size(scale)?);
    }
    if args.boxes {
        cfg.mask.ellipse = false;
    }
    if let Some(mask_scale) = args.mask_scale {
        cfg.mask.mask_scale = mask_scale;
    }
    if let Some(mode) = args.replacewith {
        cfg.mask.mode = mode;
    }
    if let Some(path) = &args.replaceimg {
        cfg.replace_image = Some(path.clone());
    }
    if let Some(size) = args.mosaicsize {
        cfg.mask.mosaic_size = size;
    }
    if let Some(color) = &args.color {
        cfg.mask.color = parse_color(color)?;
    }
    if args.draw_scores {
        cfg.mask.draw_scores = true;
    }
    if let Some(font) = &args.score_font {
        cfg.score_font = Some(font.clone());
    }
    if let Some(codec) = &args.codec {
        cfg.video.codec = codec.clone();
    }
    if let Some(fps) = args.fps {
        cfg.video.fps = Some(fps);
    }
    if args.keep_audio {
        cfg.video.keep_audio = true;
    }
    Ok(())
}

/// Directories are replaced by the files directly inside them, sorted.
fn expand_inputs(inputs: &[String]) -> Result<Vec<String>> {
    let mut expanded = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if input.starts_with(STUB_SCHEME) || !path.is_dir() {
            expanded.push(input.clone());
            continue;
        }
        let mut files: Vec<String> = fs::read_dir(path)
            .with_context(|| format!("failed to list {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file())
            .filter_map(|path| path.to_str().map(str::to_string))
            .collect();
        files.sort();
        if files.is_empty() {
            log::warn!("{}: directory has no files", path.display());
        }
        expanded.extend(files);
    }
    Ok(expanded)
}

/// `<stem>_anonymized.<ext>` next to the input; a directory for synthetic
/// streams.
fn default_output(input: &str, kind: MediaKind) -> PathBuf {
    if let Some(name) = input.strip_prefix(STUB_SCHEME) {
        let name = name.trim_matches('/').replace('/', "_");
        let name = if name.is_empty() { "synthetic" } else { name.as_str() };
        return PathBuf::from(format!("{}_anonymized", name));
    }
    let path = Path::new(input);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("output");
    let ext = match (path.extension().and_then(|ext| ext.to_str()), kind) {
        (Some(ext), _) => ext.to_string(),
        (None, MediaKind::Video) => "mp4".to_string(),
        (None, _) => "png".to_string(),
    };
    path.with_file_name(format!("{}_anonymized.{}", stem, ext))
}

struct Run<'a> {
    cfg: &'a DefaceConfig,
    replacement: Option<&'a DynamicImage>,
    ui: &'a ui::Ui,
    stop: &'a AtomicBool,
}

impl Run<'_> {
    fn input(&self, input: &str, output: Option<&Path>) -> Result<()> {
        let kind = MediaKind::sniff(input);
        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_output(input, kind));

        match kind {
            MediaKind::NotFound => Err(anyhow!("input not found")),
            MediaKind::Unknown => {
                log::warn!("{}: not a recognized image or video file, skipping", input);
                Ok(())
            }
            MediaKind::Image => self.still(input, &output),
            MediaKind::Synthetic => {
                let mut source = self.resample(SyntheticSource::open(input)?)?;
                let mut sink = ImageSequenceSink::create(&output)?;
                self.stream(input, kind, &mut source, &mut sink)
            }
            MediaKind::Video => {
                let mut source = self.resample(ingest::open_video(Path::new(input))?)?;
                let audio_from = self.cfg.video.keep_audio.then(|| PathBuf::from(input));
                let mut sink = DeferredVideoSink::new(
                    output,
                    source.fps(),
                    &self.cfg.video.codec,
                    audio_from,
                );
                self.stream(input, kind, &mut source, &mut sink)
            }
        }
    }

    /// Convert `source` to the configured frame rate, if one is set.
    fn resample<S: FrameSource + 'static>(&self, source: S) -> Result<Box<dyn FrameSource>> {
        match self.cfg.video.fps {
            Some(fps) if fps != source.fps() => {
                log::info!("resampling {:.3} fps to {:.3} fps", source.fps(), fps);
                Ok(Box::new(Resampled::new(source, fps)?))
            }
            _ => Ok(Box::new(source)),
        }
    }

    fn renderer(&self) -> Result<MaskRenderer> {
        let renderer =
            MaskRenderer::with_replacement(self.cfg.mask.clone(), self.replacement.cloned())?;
        if !self.cfg.mask.draw_scores {
            return Ok(renderer);
        }
        let font = load_score_font(self.cfg.score_font.as_deref())?;
        Ok(renderer.with_score_font(font))
    }

    fn still(&self, input: &str, output: &Path) -> Result<()> {
        let _stage = self.ui.stage(&format!("Anonymize {}", input));
        let mut source = ImageSource::open(input)?;
        let mut frame = source
            .next_frame()?
            .ok_or_else(|| anyhow!("image decoded to no frame"))?;

        let mut pipeline = FramePipeline::new(
            self.cfg.schedule(source.fps()),
            self.cfg.detection.detector(MediaKind::Image)?,
            self.cfg.detection.consistency_threshold,
            self.renderer()?,
        );
        let report = pipeline.process_still(&mut frame)?;

        let mut sink = ImageSink::new(output);
        sink.write_frame(&frame)?;
        sink.finish()?;
        log::info!(
            "{}: {} faces masked -> {}",
            input,
            report.reliable.len(),
            output.display()
        );
        Ok(())
    }

    fn stream(
        &self,
        input: &str,
        kind: MediaKind,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> Result<()> {
        let mut pipeline = FramePipeline::new(
            self.cfg.schedule(source.fps()),
            self.cfg.detection.detector(kind)?,
            self.cfg.detection.consistency_threshold,
            self.renderer()?,
        );
        log::debug!(
            "{}: threshold schedule {:?}",
            input,
            pipeline.schedule().keyed_frames()
        );

        let mut progress = self.ui.frames(input, source.frame_count_hint());
        let stats = pipeline.run(source, sink, |_| {
            progress.tick();
            if self.stop.load(Ordering::SeqCst) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        progress.finish(&format!(
            "{} frames, {} masked in {} frames{}",
            stats.frames,
            stats.reliable_detections,
            stats.frames_with_masks,
            if stats.interrupted { " (interrupted)" } else { "" }
        ));
        log::info!(
            "{}: {} frames, {} raw detections, {} masked regions",
            input,
            stats.frames,
            stats.raw_detections,
            stats.reliable_detections
        );
        Ok(())
    }
}

/// Video sink opened on the first frame, once the frame size is known.
struct DeferredVideoSink {
    path: PathBuf,
    fps: f64,
    codec: String,
    audio_from: Option<PathBuf>,
    inner: Option<Box<dyn FrameSink>>,
}

impl DeferredVideoSink {
    fn new(path: PathBuf, fps: f64, codec: &str, audio_from: Option<PathBuf>) -> Self {
        Self {
            path,
            fps,
            codec: codec.to_string(),
            audio_from,
            inner: None,
        }
    }
}

impl FrameSink for DeferredVideoSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.inner.is_none() {
            self.inner = Some(output::open_video(
                &self.path,
                frame.width(),
                frame.height(),
                self.fps,
                &self.codec,
                self.audio_from.as_deref(),
            )?);
        }
        match &mut self.inner {
            Some(sink) => sink.write_frame(frame),
            None => Err(anyhow!("video sink for {} is not open", self.path.display())),
        }
    }

    fn finish(&mut self) -> Result<()> {
        match &mut self.inner {
            Some(sink) => sink.finish(),
            None => {
                log::warn!("{}: no frames decoded, nothing written", self.path.display());
                Ok(())
            }
        }
    }
}
