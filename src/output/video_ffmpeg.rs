//! Video file sink using FFmpeg.
//!
//! RGB frames are converted to YUV 4:2:0 and encoded with the requested codec
//! (libx264 unless configured otherwise). Frame `i` gets presentation time
//! `i / fps`. The audio track of another file can be carried over unchanged
//! (stream copy, no transcoding).

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use ffmpeg::software::scaling;
use ffmpeg::util::format::pixel::Pixel;
use ffmpeg::Rational;

use super::FrameSink;
use crate::frame::Frame;
use crate::ingest::video_ffmpeg::{codec_step, CodecStep};

/// Audio stream copied from the input into the output.
struct AudioCopy {
    input: ffmpeg::format::context::Input,
    input_index: usize,
    input_time_base: Rational,
    output_index: usize,
}

pub struct VideoSink {
    path: PathBuf,
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: scaling::Context,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    frames: u64,
    audio: Option<AudioCopy>,
    finished: bool,
}

impl VideoSink {
    /// Open `path` for writing `width` x `height` frames at `fps`.
    ///
    /// YUV 4:2:0 needs even dimensions; odd frame sizes are scaled down by one
    /// pixel on encode.
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        fps: f64,
        codec_name: &str,
        audio_from: Option<&Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !(fps.is_finite() && fps > 0.0) {
            return Err(anyhow!("video fps must be positive, got {}", fps));
        }
        let out_width = (width & !1).max(2);
        let out_height = (height & !1).max(2);

        ffmpeg::init().context("initialize ffmpeg")?;
        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("failed to create video '{}'", path.display()))?;
        let codec = ffmpeg::encoder::find_by_name(codec_name)
            .ok_or_else(|| anyhow!("ffmpeg has no encoder named '{}'", codec_name))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let frame_rate = Rational::from(fps);
        let encoder_time_base = frame_rate.invert();

        let mut stream = output
            .add_stream(codec)
            .context("add video stream to output")?;
        let stream_index = stream.index();

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create ffmpeg video encoder")?;
        encoder.set_width(out_width);
        encoder.set_height(out_height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(frame_rate));
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(codec)
            .with_context(|| format!("failed to open {} encoder", codec_name))?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);

        let audio = match audio_from {
            Some(source) => open_audio_copy(source, &mut output)?,
            None => None,
        };

        output
            .write_header()
            .with_context(|| format!("failed to write header of {}", path.display()))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| anyhow!("output stream disappeared after header"))?;

        let scaler = scaling::Context::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            out_width,
            out_height,
            scaling::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "VideoSink: writing {} ({}x{} @ {:.3} fps, {})",
            path.display(),
            out_width,
            out_height,
            fps,
            codec_name
        );

        Ok(Self {
            path: path.to_path_buf(),
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width,
            height,
            frames: 0,
            audio,
            finished: false,
        })
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            let received = self.encoder.receive_packet(&mut packet);
            match codec_step(received).context("ffmpeg encoder failed")? {
                CodecStep::Ready => {}
                CodecStep::NeedsInput | CodecStep::Finished => return Ok(()),
            }
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write encoded packet")?;
        }
    }

    /// Stream-copy every audio packet of the source into the output.
    fn copy_audio(&mut self) -> Result<()> {
        let Some(audio) = &mut self.audio else {
            return Ok(());
        };
        let output_time_base = self
            .output
            .stream(audio.output_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| anyhow!("audio output stream is missing"))?;

        let mut copied = 0u64;
        for (stream, mut packet) in audio.input.packets() {
            if stream.index() != audio.input_index {
                continue;
            }
            packet.rescale_ts(audio.input_time_base, output_time_base);
            packet.set_position(-1);
            packet.set_stream(audio.output_index);
            packet
                .write_interleaved(&mut self.output)
                .context("write audio packet")?;
            copied += 1;
        }
        log::debug!("VideoSink: copied {} audio packets", copied);
        Ok(())
    }
}

impl FrameSink for VideoSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.finished {
            return Err(anyhow!("{} is already finalized", self.path.display()));
        }
        if (frame.width(), frame.height()) != (self.width, self.height) {
            return Err(anyhow!(
                "frame {} is {}x{}, video was opened for {}x{}",
                frame.index(),
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }

        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data_mut(0);
        for (row, src) in frame.pixels().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            data.get_mut(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("convert frame to YUV")?;
        yuv.set_pts(Some(frame.index() as i64));

        self.encoder
            .send_frame(&yuv)
            .context("send frame to ffmpeg encoder")?;
        self.drain_packets()?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.encoder.send_eof().context("flush ffmpeg encoder")?;
        self.drain_packets()?;
        self.copy_audio()?;
        self.output
            .write_trailer()
            .with_context(|| format!("failed to finalize {}", self.path.display()))?;
        log::info!(
            "VideoSink: wrote {} frames to {}",
            self.frames,
            self.path.display()
        );
        Ok(())
    }
}

/// Add a copy of the best audio stream of `source` to `output`. Sources
/// without audio are written video-only.
fn open_audio_copy(
    source: &Path,
    output: &mut ffmpeg::format::context::Output,
) -> Result<Option<AudioCopy>> {
    let input = ffmpeg::format::input(&source)
        .with_context(|| format!("failed to open {} for audio", source.display()))?;
    let Some(input_stream) = input.streams().best(ffmpeg::media::Type::Audio) else {
        log::warn!("{}: no audio track to keep", source.display());
        return Ok(None);
    };
    let input_index = input_stream.index();
    let input_time_base = input_stream.time_base();
    let parameters = input_stream.parameters();

    let mut stream = output
        .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
        .context("add audio stream to output")?;
    stream.set_parameters(parameters);
    let output_index = stream.index();

    Ok(Some(AudioCopy {
        input,
        input_index,
        input_time_base,
        output_index,
    }))
}
