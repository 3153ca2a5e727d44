use std::ops::ControlFlow;

use image::Rgb;

use deface::{
    Detection, FramePipeline, FrameSink, FrameSource, ImageSequenceSink, MaskOptions,
    MaskRenderer, NullSink, ReplaceMode, Resampled, StubBackend, SyntheticSource,
    ThresholdSchedule,
};

const RED: [u8; 3] = [255, 0, 0];

fn face() -> Detection {
    Detection::new(8.0, 8.0, 16.0, 16.0, 0.9)
}

fn solid_red() -> MaskRenderer {
    MaskRenderer::new(MaskOptions {
        mode: ReplaceMode::Solid,
        mask_scale: 1.0,
        color: RED,
        ..MaskOptions::default()
    })
    .expect("valid mask options")
}

fn synthetic(frames: u64) -> SyntheticSource {
    SyntheticSource::open("stub://pipeline")
        .expect("synthetic source")
        .with_size(32, 32)
        .with_fps(2.0)
        .with_frames(frames)
}

#[test]
fn steady_face_is_masked_after_warm_up_and_flicker_is_not() {
    let false_positive = Detection::new(24.0, 0.0, 30.0, 6.0, 0.9);
    let mut script = vec![vec![face()]; 6];
    script[3].push(false_positive);

    let mut pipeline = FramePipeline::new(
        ThresholdSchedule::constant(0.5, 2.0),
        StubBackend::scripted(script),
        2,
        solid_red(),
    );
    let mut source = synthetic(6);
    let mut sink = NullSink::default();

    let mut reliable_per_frame = Vec::new();
    let stats = pipeline
        .run(&mut source, &mut sink, |report| {
            reliable_per_frame.push(report.reliable.clone());
            ControlFlow::Continue(())
        })
        .expect("pipeline run");

    assert_eq!(stats.frames, 6);
    assert_eq!(stats.raw_detections, 7);
    assert_eq!(stats.reliable_detections, 4);
    assert_eq!(stats.frames_with_masks, 4);
    assert!(!stats.interrupted);
    assert_eq!(sink.frames(), 6);

    assert!(reliable_per_frame[0].is_empty());
    assert!(reliable_per_frame[1].is_empty());
    for reliable in &reliable_per_frame[2..] {
        assert_eq!(reliable, &vec![face()]);
    }
}

#[test]
fn masked_frames_reach_the_sink() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out_dir = dir.path().join("out");

    let mut pipeline = FramePipeline::new(
        ThresholdSchedule::constant(0.5, 2.0),
        StubBackend::scripted(vec![vec![face()]]),
        1,
        solid_red(),
    );
    let mut source = synthetic(3);
    let mut sink = ImageSequenceSink::create(&out_dir).expect("sequence sink");
    pipeline
        .run(&mut source, &mut sink, |_| ControlFlow::Continue(()))
        .expect("pipeline run");

    let first = image::open(sink.frame_path(0)).expect("frame 0").into_rgb8();
    let last = image::open(sink.frame_path(2)).expect("frame 2").into_rgb8();
    assert_ne!(first.get_pixel(12, 12), &Rgb(RED));
    assert_eq!(last.get_pixel(12, 12), &Rgb(RED));
    assert_eq!(last.get_pixel(8, 8), &Rgb(RED));
    assert_eq!(last.get_pixel(15, 15), &Rgb(RED));
    assert_ne!(last.get_pixel(16, 16), &Rgb(RED));
}

#[test]
fn empty_frames_do_not_age_the_history() {
    let script = vec![
        vec![face()],
        vec![face()],
        vec![face()],
        vec![],
        vec![],
        vec![face()],
    ];
    let mut pipeline = FramePipeline::new(
        ThresholdSchedule::constant(0.5, 2.0),
        StubBackend::scripted(script),
        2,
        solid_red(),
    );
    let mut source = synthetic(6);

    let mut masked = Vec::new();
    pipeline
        .run(&mut source, &mut NullSink::default(), |report| {
            masked.push(!report.reliable.is_empty());
            ControlFlow::Continue(())
        })
        .expect("pipeline run");

    assert_eq!(masked, vec![false, false, true, false, false, true]);
    assert_eq!(pipeline.filter().history().len(), 4);
}

#[test]
fn schedule_changes_detector_threshold_mid_stream() {
    // 0.4 passes the default 0.3 but not the 0.5 in force from 1s (frame 2).
    let weak_face = Detection::new(8.0, 8.0, 16.0, 16.0, 0.4);
    let mut pipeline = FramePipeline::new(
        ThresholdSchedule::new([(1.0, 0.5)], 0.3, 2.0),
        StubBackend::scripted(vec![vec![weak_face]]),
        0,
        solid_red(),
    );
    let mut source = synthetic(4);

    let mut seen = Vec::new();
    pipeline
        .run(&mut source, &mut NullSink::default(), |report| {
            seen.push((report.threshold, report.raw_detections));
            ControlFlow::Continue(())
        })
        .expect("pipeline run");

    assert_eq!(seen, vec![(0.3, 1), (0.3, 1), (0.5, 0), (0.5, 0)]);
}

#[test]
fn history_stays_bounded_over_long_streams() {
    let mut pipeline = FramePipeline::new(
        ThresholdSchedule::constant(0.0, 25.0),
        StubBackend::synthetic(3, 2),
        3,
        solid_red(),
    );
    let mut source = synthetic(40);
    pipeline
        .run(&mut source, &mut NullSink::default(), |_| ControlFlow::Continue(()))
        .expect("pipeline run");

    assert!(pipeline.filter().history().len() <= deface::HISTORY_CAPACITY);
}

#[test]
fn observer_can_stop_the_run_and_the_sink_is_finished() {
    struct FinishFlag {
        frames: u64,
        finished: bool,
    }

    impl FrameSink for FinishFlag {
        fn write_frame(&mut self, _frame: &deface::Frame) -> anyhow::Result<()> {
            self.frames += 1;
            Ok(())
        }

        fn finish(&mut self) -> anyhow::Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    let mut pipeline = FramePipeline::new(
        ThresholdSchedule::constant(0.5, 2.0),
        StubBackend::scripted(vec![vec![face()]]),
        2,
        solid_red(),
    );
    let mut source = synthetic(10);
    let mut sink = FinishFlag {
        frames: 0,
        finished: false,
    };

    let stats = pipeline
        .run(&mut source, &mut sink, |report| {
            if report.frame_index == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .expect("pipeline run");

    assert_eq!(stats.frames, 3);
    assert!(stats.interrupted);
    assert_eq!(sink.frames, 3);
    assert!(sink.finished);
    assert_eq!(source.next_frame().expect("source").map(|f| f.index()), Some(3));
}

#[test]
fn resampled_streams_keep_their_duration_and_schedule() {
    let source = SyntheticSource::open("stub://resampled")
        .expect("synthetic source")
        .with_size(32, 32)
        .with_fps(30.0)
        .with_frames(60);
    let mut source = Resampled::new(source, 15.0).expect("resampled source");
    assert_eq!(source.frame_count_hint(), Some(30));

    let mut pipeline = FramePipeline::new(
        ThresholdSchedule::new([(1.0, 0.5)], 0.3, source.fps()),
        StubBackend::scripted(vec![vec![face()]]),
        2,
        solid_red(),
    );
    let mut thresholds = Vec::new();
    let stats = pipeline
        .run(&mut source, &mut NullSink::default(), |report| {
            thresholds.push(report.threshold);
            ControlFlow::Continue(())
        })
        .expect("pipeline run");

    assert_eq!(stats.frames, 30);
    assert_eq!(stats.frames as f64 / source.fps(), 2.0);
    assert_eq!(thresholds.iter().position(|t| *t == 0.5), Some(15));
}
