//! Video file source using FFmpeg.
//!
//! Decodes the best video stream of a local file and converts every frame to
//! packed RGB24 in memory.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use super::FrameSource;
use crate::frame::Frame;

const FALLBACK_FPS: f64 = 25.0;

pub struct VideoSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: f64,
    frame_count_hint: Option<u64>,
    next_index: u64,
    draining: bool,
}

impl VideoSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{} has no video track", path.display()))?;
        let stream_index = input_stream.index();
        let fps = stream_fps(&input_stream);
        let frame_count_hint = u64::try_from(input_stream.frames()).ok().filter(|n| *n > 0);

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "VideoSource: opened {} ({}x{} @ {:.3} fps, {} frames)",
            path.display(),
            decoder.width(),
            decoder.height(),
            fps,
            frame_count_hint.map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            frame_count_hint,
            next_index: 0,
            draining: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let index = self.next_index;
        self.next_index += 1;
        Frame::from_rgb(index, width, height, pixels)
    }
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            let received = self.decoder.receive_frame(&mut decoded);
            match codec_step(received).with_context(|| {
                format!(
                    "failed to decode frame {} of {}",
                    self.next_index,
                    self.path.display()
                )
            })? {
                CodecStep::Ready => return self.convert(&decoded).map(Some),
                CodecStep::Finished => return Ok(None),
                CodecStep::NeedsInput if self.draining => return Ok(None),
                CodecStep::NeedsInput => {}
            }

            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                Some(_) => {}
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.draining = true;
                }
            }
        }
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count_hint(&self) -> Option<u64> {
        self.frame_count_hint
    }
}

/// Outcome of pulling from an FFmpeg decoder or encoder.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CodecStep {
    /// A frame or packet was produced.
    Ready,
    /// The codec wants more input first (`EAGAIN`).
    NeedsInput,
    /// The codec was flushed and has nothing left.
    Finished,
}

/// Split a `receive_*` result into the codec's normal states and real errors.
pub(crate) fn codec_step(result: Result<(), ffmpeg::Error>) -> Result<CodecStep, ffmpeg::Error> {
    match result {
        Ok(()) => Ok(CodecStep::Ready),
        Err(ffmpeg::Error::Eof) => Ok(CodecStep::Finished),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
            Ok(CodecStep::NeedsInput)
        }
        Err(err) => Err(err),
    }
}

fn stream_fps(stream: &ffmpeg::format::stream::Stream<'_>) -> f64 {
    [stream.avg_frame_rate(), stream.rate()]
        .into_iter()
        .filter(|rate| rate.denominator() != 0)
        .map(f64::from)
        .find(|fps| fps.is_finite() && *fps > 0.0)
        .unwrap_or(FALLBACK_FPS)
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
