//! Per-frame orchestration.
//!
//! For every frame, in stream order:
//! 1. look up the threshold for the frame index,
//! 2. run the face detector at that threshold,
//! 3. pass the raw boxes through the reliability filter,
//! 4. render masks over the reliable boxes.
//!
//! The pipeline owns the only stateful piece (the reliability history), so a
//! pipeline instance serves exactly one stream.

use anyhow::{Context, Result};
use std::ops::ControlFlow;

use crate::detect::{Detection, FaceDetector};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::output::FrameSink;
use crate::reliability::ReliabilityFilter;
use crate::threshold::ThresholdSchedule;

/// Draws masks over detections. Must not alter the detections themselves.
pub trait Renderer {
    fn render(&mut self, frame: &mut Frame, detections: &[Detection]) -> Result<()>;
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, frame: &mut Frame, detections: &[Detection]) -> Result<()> {
        (**self).render(frame, detections)
    }
}

/// What happened to one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub threshold: f32,
    pub raw_detections: usize,
    /// Representative boxes handed to the renderer.
    pub reliable: Vec<Detection>,
}

/// Totals over a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub raw_detections: u64,
    pub reliable_detections: u64,
    pub frames_with_masks: u64,
    /// True when the observer stopped the run before the source ran dry.
    pub interrupted: bool,
}

impl PipelineStats {
    fn record(&mut self, report: &FrameReport) {
        self.frames += 1;
        self.raw_detections += report.raw_detections as u64;
        self.reliable_detections += report.reliable.len() as u64;
        if !report.reliable.is_empty() {
            self.frames_with_masks += 1;
        }
    }
}

pub struct FramePipeline<D, R> {
    schedule: ThresholdSchedule,
    detector: D,
    filter: ReliabilityFilter,
    renderer: R,
}

impl<D: FaceDetector, R: Renderer> FramePipeline<D, R> {
    pub fn new(
        schedule: ThresholdSchedule,
        detector: D,
        consistency_threshold: usize,
        renderer: R,
    ) -> Self {
        Self {
            schedule,
            detector,
            filter: ReliabilityFilter::new(consistency_threshold),
            renderer,
        }
    }

    /// Detect, filter and mask one frame in place.
    pub fn process_frame(&mut self, frame: &mut Frame) -> Result<FrameReport> {
        let frame_index = frame.index();
        let threshold = self.schedule.threshold_for_frame(frame_index);
        if self.schedule.changes_at(frame_index) {
            log::debug!("frame {}: detection threshold now {:.3}", frame_index, threshold);
        }

        let raw = self
            .detector
            .detect(frame, threshold)
            .with_context(|| format!("{} detector failed on frame {}", self.detector.name(), frame_index))?;
        let reliable = self.filter.filter(&raw);
        log::debug!(
            "frame {}: {} raw, {} masked",
            frame_index,
            raw.len(),
            reliable.len()
        );

        self.renderer
            .render(frame, &reliable)
            .with_context(|| format!("failed to render masks on frame {}", frame_index))?;

        Ok(FrameReport {
            frame_index,
            threshold,
            raw_detections: raw.len(),
            reliable,
        })
    }

    /// Mask a still image.
    ///
    /// Stills have no temporal context: every raw detection at the default
    /// threshold is masked, without history or clustering.
    pub fn process_still(&mut self, frame: &mut Frame) -> Result<FrameReport> {
        let threshold = self.schedule.default_threshold();
        let raw = self
            .detector
            .detect(frame, threshold)
            .with_context(|| format!("{} detector failed on still image", self.detector.name()))?;
        self.renderer
            .render(frame, &raw)
            .context("failed to render masks on still image")?;
        Ok(FrameReport {
            frame_index: frame.index(),
            threshold,
            raw_detections: raw.len(),
            reliable: raw,
        })
    }

    /// Drain `source` into `sink`, one frame at a time.
    ///
    /// `observer` sees every report and may stop the run early. The sink is
    /// finished in every case that does not fail.
    pub fn run<S, K, F>(&mut self, source: &mut S, sink: &mut K, mut observer: F) -> Result<PipelineStats>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
        F: FnMut(&FrameReport) -> ControlFlow<()>,
    {
        let mut stats = PipelineStats::default();
        while let Some(mut frame) = source.next_frame()? {
            let report = self.process_frame(&mut frame)?;
            sink.write_frame(&frame)
                .with_context(|| format!("failed to write frame {}", report.frame_index))?;
            stats.record(&report);
            if observer(&report).is_break() {
                stats.interrupted = true;
                break;
            }
        }
        sink.finish()?;
        Ok(stats)
    }

    pub fn schedule(&self) -> &ThresholdSchedule {
        &self.schedule
    }

    pub fn filter(&self) -> &ReliabilityFilter {
        &self.filter
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Start a new stream: clears the reliability history.
    pub fn reset(&mut self) {
        self.filter.reset();
    }
}
