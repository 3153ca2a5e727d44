//! deface: face anonymization for images and video.
//!
//! Faces are found by a pluggable detector and covered with a blur, solid
//! fill, mosaic or replacement image. For video, raw detections pass through
//! a temporal reliability filter first, so a box is only masked after
//! overlapping faces in enough recent frames. Single-frame false positives
//! are dropped this way.
//!
//! # Module Structure
//!
//! - `threshold`: per-frame detection thresholds from a seconds-keyed schedule
//! - `geometry`: box overlap, one-pass clustering, cluster representatives
//! - `reliability`: bounded detection history and the reliability filter
//! - `pipeline`: threshold, detect, filter and render for each frame
//! - `detect`: detector trait, backend registry, stub and tract backends
//! - `mask`: mask regions and replacement modes
//! - `frame`: owned RGB frames, zeroized on drop
//! - `ingest` / `output`: frame sources and sinks
//! - `config`: layered run configuration

pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod mask;
pub mod output;
pub mod pipeline;
pub mod reliability;
pub mod threshold;

pub use config::DefaceConfig;
pub use detect::{available_backends, BackendRegistry, Detection, FaceDetector, StubBackend};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use frame::Frame;
pub use geometry::{cluster_overlapping, overlaps, representative, Cluster};
pub use ingest::{FrameSource, ImageSource, MediaKind, Resampled, SyntheticSource};
pub use mask::{MaskOptions, MaskRenderer, ReplaceMode};
pub use output::{FrameSink, ImageSequenceSink, ImageSink, NullSink};
pub use pipeline::{FramePipeline, FrameReport, PipelineStats, Renderer};
pub use reliability::{filter_by_history, Generation, History, ReliabilityFilter, HISTORY_CAPACITY};
pub use threshold::{parse_thresholds_by_sec, ThresholdSchedule};
