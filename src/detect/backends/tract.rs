#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::FaceDetector;
use crate::detect::centerface::{self, RawOutputs};
use crate::detect::result::Detection;
use crate::frame::Frame;

/// CenterFace face detector running on tract.
///
/// The model is loaded from a local ONNX file. tract needs a concrete input
/// shape, so the runnable plan is built for the first frame size seen and
/// rebuilt whenever the frame size changes.
pub struct TractBackend {
    model_path: PathBuf,
    inference_size: Option<(u32, u32)>,
    loaded: Option<LoadedModel>,
}

struct LoadedModel {
    frame_size: (u32, u32),
    input_size: (u32, u32),
    plan: TypedRunnableModel<TypedModel>,
}

impl TractBackend {
    /// Prepare a backend for the ONNX model at `model_path`.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(anyhow!(
                "CenterFace model not found at {}",
                model_path.display()
            ));
        }
        Ok(Self {
            model_path: model_path.to_path_buf(),
            inference_size: None,
            loaded: None,
        })
    }

    /// Downscale frames to `width` x `height` (rounded up to multiples of 32)
    /// for inference instead of using the frame size.
    pub fn with_inference_size(mut self, width: u32, height: u32) -> Self {
        self.inference_size = Some((width, height));
        self.loaded = None;
        self
    }

    fn load(&self, frame_size: (u32, u32)) -> Result<LoadedModel> {
        let (req_w, req_h) = self.inference_size.unwrap_or(frame_size);
        let (input_w, input_h) = centerface::input_size(req_w, req_h);
        let plan = tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| {
                format!(
                    "failed to load ONNX model from {}",
                    self.model_path.display()
                )
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_h as usize, input_w as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "tract: CenterFace ready for {}x{} frames (input {}x{})",
            frame_size.0,
            frame_size.1,
            input_w,
            input_h
        );
        Ok(LoadedModel {
            frame_size,
            input_size: (input_w, input_h),
            plan,
        })
    }

    fn ensure_loaded(&mut self, frame_size: (u32, u32)) -> Result<&LoadedModel> {
        let stale = self
            .loaded
            .as_ref()
            .map_or(true, |loaded| loaded.frame_size != frame_size);
        if stale {
            self.loaded = Some(self.load(frame_size)?);
        }
        self.loaded
            .as_ref()
            .ok_or_else(|| anyhow!("CenterFace model failed to load"))
    }
}

fn build_input(frame: &Frame, input_w: u32, input_h: u32) -> Tensor {
    let resized;
    let image = if frame.width() == input_w && frame.height() == input_h {
        frame.image()
    } else {
        resized = imageops::resize(frame.image(), input_w, input_h, FilterType::Triangle);
        &resized
    };

    // Raw 0..255 values, RGB channel order, no mean subtraction.
    tract_ndarray::Array4::from_shape_fn(
        (1, 3, input_h as usize, input_w as usize),
        |(_, channel, y, x)| image.get_pixel(x as u32, y as u32).0[channel] as f32,
    )
    .into_tensor()
}

impl FaceDetector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        let frame_size = (frame.width(), frame.height());
        let loaded = self.ensure_loaded(frame_size)?;
        let (input_w, input_h) = loaded.input_size;

        let input = build_input(frame, input_w, input_h);
        let outputs = loaded
            .plan
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        if outputs.len() < 3 {
            return Err(anyhow!(
                "CenterFace model produced {} outputs, expected heatmap, scale and offset",
                outputs.len()
            ));
        }

        let shape = outputs[0].shape();
        let (rows, cols) = match shape {
            [_, _, rows, cols] => (*rows, *cols),
            _ => return Err(anyhow!("unexpected heatmap shape {:?}", shape)),
        };
        let raw = RawOutputs {
            heatmap: outputs[0].as_slice::<f32>().context("heatmap is not f32")?,
            scale: outputs[1].as_slice::<f32>().context("scale map is not f32")?,
            offset: outputs[2].as_slice::<f32>().context("offset map is not f32")?,
            rows,
            cols,
        };

        let mut boxes = centerface::decode(&raw, input_w as f32, input_h as f32, threshold);
        centerface::rescale(
            &mut boxes,
            input_w as f32 / frame_size.0 as f32,
            input_h as f32 / frame_size.1 as f32,
        );
        Ok(boxes)
    }
}
