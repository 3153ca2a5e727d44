//! CenterFace output decoding.
//!
//! CenterFace predicts, on a grid with stride 4, a face-center heatmap, log
//! box sizes and sub-cell center offsets. These helpers turn those maps into
//! boxes and are independent of the inference runtime.

use crate::detect::result::Detection;

/// Output stride of the network.
pub const STRIDE: f32 = 4.0;

/// Overlap above which the lower-scoring of two boxes is suppressed.
pub const NMS_IOU: f32 = 0.3;

/// Network input size for a requested size: each side rounded up to a
/// multiple of 32.
pub fn input_size(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(32) * 32, height.div_ceil(32) * 32)
}

/// Raw network outputs for one image, NCHW with N = 1.
pub struct RawOutputs<'a> {
    /// `[1, 1, rows, cols]`
    pub heatmap: &'a [f32],
    /// `[1, 2, rows, cols]`, channel 0 = log height, channel 1 = log width.
    pub scale: &'a [f32],
    /// `[1, 2, rows, cols]`, channel 0 = y offset, channel 1 = x offset.
    pub offset: &'a [f32],
    pub rows: usize,
    pub cols: usize,
}

/// Decode every heatmap cell above `threshold` into a box in network input
/// coordinates (`input_w` x `input_h`), then apply non-maximum suppression.
pub fn decode(outputs: &RawOutputs<'_>, input_w: f32, input_h: f32, threshold: f32) -> Vec<Detection> {
    let plane = outputs.rows * outputs.cols;
    let mut boxes = Vec::new();

    for row in 0..outputs.rows {
        for col in 0..outputs.cols {
            let idx = row * outputs.cols + col;
            let Some(&score) = outputs.heatmap.get(idx) else {
                continue;
            };
            if score <= threshold {
                continue;
            }
            let (Some(&log_h), Some(&log_w), Some(&off_y), Some(&off_x)) = (
                outputs.scale.get(idx),
                outputs.scale.get(plane + idx),
                outputs.offset.get(idx),
                outputs.offset.get(plane + idx),
            ) else {
                continue;
            };

            let box_h = log_h.exp() * STRIDE;
            let box_w = log_w.exp() * STRIDE;
            let x1 = ((col as f32 + off_x + 0.5) * STRIDE - box_w / 2.0)
                .max(0.0)
                .min(input_w);
            let y1 = ((row as f32 + off_y + 0.5) * STRIDE - box_h / 2.0)
                .max(0.0)
                .min(input_h);
            boxes.push(Detection::new(
                x1,
                y1,
                (x1 + box_w).min(input_w),
                (y1 + box_h).min(input_h),
                score,
            ));
        }
    }

    suppress_non_maxima(boxes, NMS_IOU)
}

/// Greedy non-maximum suppression, highest score first.
///
/// Areas use the inclusive pixel convention (`x2 - x1 + 1`). A box is dropped
/// once its overlap with an already kept box reaches `iou_threshold`.
pub fn suppress_non_maxima(mut boxes: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept
            .iter()
            .all(|keep| inclusive_iou(keep, &candidate) < iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn inclusive_iou(a: &Detection, b: &Detection) -> f32 {
    let area = |d: &Detection| (d.x2 - d.x1 + 1.0) * (d.y2 - d.y1 + 1.0);
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1) + 1.0).max(0.0);
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1) + 1.0).max(0.0);
    let inter = w * h;
    inter / (area(a) + area(b) - inter)
}

/// Map boxes from network input coordinates back to the frame.
pub fn rescale(boxes: &mut [Detection], scale_w: f32, scale_h: f32) {
    for det in boxes {
        det.x1 /= scale_w;
        det.x2 /= scale_w;
        det.y1 /= scale_h;
        det.y2 /= scale_h;
    }
}
