//! Face mask rendering.
//!
//! Each detection is grown around its center by `mask_scale`, clipped to the
//! frame and then painted over with the configured replacement.

use ab_glyph::FontVec;
use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, RgbaImage};
use imageproc::drawing::{draw_filled_ellipse_mut, draw_filled_rect_mut, draw_text_mut};
use imageproc::filter::separable_filter;
use imageproc::rect::Rect;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use crate::detect::Detection;
use crate::frame::Frame;
use crate::pipeline::Renderer;

/// How a face region is replaced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplaceMode {
    /// Strong box blur, inside the inscribed ellipse unless disabled.
    #[default]
    Blur,
    /// Solid color fill.
    Solid,
    /// Coarse tiles colored by their top-left pixel.
    Mosaic,
    /// A substitute image stretched over the region.
    Img,
    /// Leave the region untouched.
    None,
}

impl ReplaceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplaceMode::Blur => "blur",
            ReplaceMode::Solid => "solid",
            ReplaceMode::Mosaic => "mosaic",
            ReplaceMode::Img => "img",
            ReplaceMode::None => "none",
        }
    }
}

impl FromStr for ReplaceMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "blur" => Ok(ReplaceMode::Blur),
            "solid" => Ok(ReplaceMode::Solid),
            "mosaic" => Ok(ReplaceMode::Mosaic),
            "img" => Ok(ReplaceMode::Img),
            "none" => Ok(ReplaceMode::None),
            other => Err(anyhow!(
                "unknown replace mode '{}' (expected blur, solid, mosaic, img or none)",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaskOptions {
    pub mode: ReplaceMode,
    /// Growth factor applied to each box around its center.
    pub mask_scale: f32,
    /// Restrict blur to the ellipse inscribed in the region.
    pub ellipse: bool,
    /// Tile side for mosaic mode, in pixels.
    pub mosaic_size: u32,
    /// Fill color for solid mode.
    pub color: [u8; 3],
    /// Label each masked region with its detection score.
    pub draw_scores: bool,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            mode: ReplaceMode::Blur,
            mask_scale: 1.3,
            ellipse: true,
            mosaic_size: 20,
            color: [0, 0, 0],
            draw_scores: false,
        }
    }
}

/// Pixel region `[x1, x2) x [y1, y2)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    fn rect(&self) -> Rect {
        Rect::at(self.x1 as i32, self.y1 as i32).of_size(self.width(), self.height())
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// Region painted for `det` in a `width` x `height` frame.
///
/// Coordinates are truncated to whole pixels, grown by `mask_scale - 1` of
/// the box size on every side, rounded and clipped to the frame. Returns
/// `None` when nothing of the box is left inside the frame.
pub fn mask_region(det: &Detection, mask_scale: f32, width: u32, height: u32) -> Option<Region> {
    let (x1, y1) = (det.x1.trunc() as f64, det.y1.trunc() as f64);
    let (x2, y2) = (det.x2.trunc() as f64, det.y2.trunc() as f64);
    let grow = mask_scale as f64 - 1.0;
    let (w, h) = (x2 - x1, y2 - y1);

    let clip = |value: f64, max: u32| value.round().clamp(0.0, max as f64) as u32;
    let region = Region {
        x1: clip(x1 - w * grow, width),
        y1: clip(y1 - h * grow, height),
        x2: clip(x2 + w * grow, width),
        y2: clip(y2 + h * grow, height),
    };
    if region.x1 >= region.x2 || region.y1 >= region.y2 {
        None
    } else {
        Some(region)
    }
}

/// Renders masks over the reliable detections of a frame.
pub struct MaskRenderer {
    options: MaskOptions,
    replacement: Option<RgbaImage>,
    score_font: Option<FontVec>,
}

impl MaskRenderer {
    pub fn new(options: MaskOptions) -> Result<Self> {
        Self::with_replacement(options, None)
    }

    /// Renderer with a substitute image for [`ReplaceMode::Img`].
    pub fn with_replacement(options: MaskOptions, replacement: Option<DynamicImage>) -> Result<Self> {
        if options.mode == ReplaceMode::Img && replacement.is_none() {
            return Err(anyhow!("replace mode 'img' needs a replacement image"));
        }
        if options.mask_scale <= 0.0 || !options.mask_scale.is_finite() {
            return Err(anyhow!("mask scale must be a positive number"));
        }
        if options.mosaic_size == 0 {
            return Err(anyhow!("mosaic size must be at least 1"));
        }
        Ok(Self {
            options,
            replacement: replacement.map(|image| image.to_rgba8()),
            score_font: None,
        })
    }

    /// Font used for score labels when `draw_scores` is set.
    pub fn with_score_font(mut self, font: FontVec) -> Self {
        self.score_font = Some(font);
        self
    }

    pub fn options(&self) -> &MaskOptions {
        &self.options
    }

    fn paint(&self, image: &mut RgbImage, region: Region) {
        match self.options.mode {
            ReplaceMode::Blur => blur_region(image, region, self.options.ellipse),
            ReplaceMode::Solid => fill_region(image, region, Rgb(self.options.color)),
            ReplaceMode::Mosaic => mosaic_region(image, region, self.options.mosaic_size),
            ReplaceMode::Img => {
                if let Some(replacement) = &self.replacement {
                    paste_region(image, region, replacement);
                }
            }
            ReplaceMode::None => {}
        }
    }
}

impl Renderer for MaskRenderer {
    fn render(&mut self, frame: &mut Frame, detections: &[Detection]) -> Result<()> {
        let font = match (self.options.draw_scores, &self.score_font) {
            (false, _) => None,
            (true, Some(font)) => Some(font),
            (true, None) => return Err(anyhow!("drawing scores needs a font")),
        };
        let (width, height) = (frame.width(), frame.height());
        for det in detections {
            if let Some(region) = mask_region(det, self.options.mask_scale, width, height) {
                self.paint(frame.image_mut(), region);
                if let Some(font) = font {
                    draw_score(frame.image_mut(), region, det.score, font);
                }
            }
        }
        Ok(())
    }
}

const SCORE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const SCORE_SCALE: f32 = 16.0;
/// Labels sit this far above the region's top edge.
const SCORE_OFFSET: i32 = 20;

/// Fonts tried, in order, when no score font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Load the font for score labels from `path`, or the first system font found.
pub fn load_score_font(path: Option<&Path>) -> Result<FontVec> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => SYSTEM_FONTS
            .iter()
            .map(Path::new)
            .find(|candidate| candidate.is_file())
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("no system font found for score labels; set a score font"))?,
    };
    let bytes = std::fs::read(&path)
        .with_context(|| format!("failed to read font {}", path.display()))?;
    FontVec::try_from_vec(bytes).map_err(|_| anyhow!("{} is not a usable font", path.display()))
}

/// Score text for a detection, two decimals.
pub fn score_label(score: f32) -> String {
    format!("{:.2}", score)
}

fn draw_score(image: &mut RgbImage, region: Region, score: f32, font: &FontVec) {
    draw_text_mut(
        image,
        SCORE_COLOR,
        region.x1 as i32,
        region.y1 as i32 - SCORE_OFFSET,
        SCORE_SCALE,
        font,
        &score_label(score),
    );
}

fn fill_region(image: &mut RgbImage, region: Region, color: Rgb<u8>) {
    draw_filled_rect_mut(image, region.rect(), color);
}

fn mosaic_region(image: &mut RgbImage, region: Region, tile: u32) {
    for ty in (region.y1..region.y2).step_by(tile as usize) {
        for tx in (region.x1..region.x2).step_by(tile as usize) {
            let color = *image.get_pixel(tx, ty);
            let tile_region = Region {
                x1: tx,
                y1: ty,
                x2: (tx + tile).min(region.x2),
                y2: (ty + tile).min(region.y2),
            };
            draw_filled_rect_mut(image, tile_region.rect(), color);
        }
    }
}

fn paste_region(image: &mut RgbImage, region: Region, replacement: &RgbaImage) {
    let resized = imageops::resize(
        replacement,
        region.width(),
        region.height(),
        FilterType::Triangle,
    );
    for (dx, dy, src) in resized.enumerate_pixels() {
        let dst = image.get_pixel_mut(region.x1 + dx, region.y1 + dy);
        let alpha = src.0[3] as f32 / 255.0;
        for channel in 0..3 {
            let blended = dst.0[channel] as f32 * (1.0 - alpha) + src.0[channel] as f32 * alpha;
            dst.0[channel] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn blur_region(image: &mut RgbImage, region: Region, ellipse: bool) {
    let roi = imageops::crop_imm(&*image, region.x1, region.y1, region.width(), region.height())
        .to_image();
    let kernel_w = (roi.width() / 2).max(1);
    let kernel_h = (roi.height() / 2).max(1);
    let blurred = box_blur(&roi, kernel_w, kernel_h);

    let mask = if ellipse {
        inscribed_ellipse(roi.width(), roi.height())
    } else {
        None
    };
    for (x, y, pixel) in blurred.enumerate_pixels() {
        if let Some(mask) = &mask {
            if mask.get_pixel(x, y).0[0] == 0 {
                continue;
            }
        }
        image.put_pixel(region.x1 + x, region.y1 + y, *pixel);
    }
}

/// Selection mask of the ellipse inscribed in a `width` x `height` box, or
/// `None` when the box is too thin to hold one.
fn inscribed_ellipse(width: u32, height: u32) -> Option<GrayImage> {
    let (rx, ry) = ((width / 2) as i32, (height / 2) as i32);
    if rx == 0 || ry == 0 {
        return None;
    }
    let mut mask = GrayImage::new(width, height);
    draw_filled_ellipse_mut(&mut mask, (rx, ry), rx, ry, Luma([255]));
    Some(mask)
}

/// Normalized box filter with a `kernel_w` x `kernel_h` window centered on
/// each pixel. Borders replicate the edge pixels.
fn box_blur(src: &RgbImage, kernel_w: u32, kernel_h: u32) -> RgbImage {
    let h_kernel = vec![1.0 / kernel_w as f32; kernel_w as usize];
    let v_kernel = vec![1.0 / kernel_h as f32; kernel_h as usize];
    separable_filter(src, &h_kernel, &v_kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn replace_mode_parses_case_insensitively() {
        assert_eq!("Mosaic".parse::<ReplaceMode>().unwrap(), ReplaceMode::Mosaic);
        assert_eq!("none".parse::<ReplaceMode>().unwrap(), ReplaceMode::None);
        assert!("pixelate".parse::<ReplaceMode>().is_err());
    }

    #[test]
    fn region_grows_around_center() {
        let det = Detection::new(40.0, 40.0, 60.0, 60.0, 0.9);
        let region = mask_region(&det, 1.5, 100, 100).unwrap();
        assert_eq!(region, Region { x1: 30, y1: 30, x2: 70, y2: 70 });
    }

    #[test]
    fn region_is_clipped_to_frame() {
        let det = Detection::new(-10.0, 90.0, 20.0, 130.0, 0.9);
        let region = mask_region(&det, 1.0, 100, 100).unwrap();
        assert_eq!(region, Region { x1: 0, y1: 90, x2: 20, y2: 100 });

        let outside = Detection::new(150.0, 150.0, 170.0, 170.0, 0.9);
        assert!(mask_region(&outside, 1.3, 100, 100).is_none());
    }

    fn close(actual: [u8; 3], expected: u8) -> bool {
        actual.iter().all(|c| c.abs_diff(expected) <= 1)
    }

    #[test]
    fn box_blur_of_flat_image_stays_flat() {
        let flat = RgbImage::from_pixel(9, 5, Rgb([64, 128, 32]));
        let blurred = box_blur(&flat, 4, 2);
        for pixel in blurred.pixels() {
            assert!(pixel.0[0].abs_diff(64) <= 1, "{pixel:?}");
            assert!(pixel.0[1].abs_diff(128) <= 1, "{pixel:?}");
            assert!(pixel.0[2].abs_diff(32) <= 1, "{pixel:?}");
        }
    }

    #[test]
    fn box_blur_averages_window() {
        // Single row 0, 0, 90 with a 3-wide window: centre pixel sees all three.
        let mut row = RgbImage::new(3, 1);
        row.put_pixel(2, 0, Rgb([90, 90, 90]));
        let blurred = box_blur(&row, 3, 1);
        assert!(close(blurred.get_pixel(1, 0).0, 30), "{:?}", blurred.get_pixel(1, 0));
        // Right edge replicates: 0, 90, 90.
        assert!(close(blurred.get_pixel(2, 0).0, 60), "{:?}", blurred.get_pixel(2, 0));
    }

    #[test]
    fn thin_regions_have_no_ellipse() {
        assert!(inscribed_ellipse(1, 30).is_none());
        let mask = inscribed_ellipse(20, 10).unwrap();
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(10, 5).0[0], 255);
    }

    #[test]
    fn score_labels_use_two_decimals() {
        assert_eq!(score_label(0.8649), "0.86");
        assert_eq!(score_label(1.0), "1.00");
    }

    #[test]
    fn drawing_scores_without_a_font_fails() {
        let mut renderer = MaskRenderer::new(MaskOptions {
            draw_scores: true,
            ..MaskOptions::default()
        })
        .unwrap();
        let mut frame = Frame::new(0, gradient(40, 40));
        let det = Detection::new(10.0, 25.0, 30.0, 35.0, 0.9);
        assert!(renderer.render(&mut frame, &[det]).is_err());
    }

    #[test]
    fn missing_font_file_is_an_error() {
        let err = load_score_font(Some(Path::new("/nonexistent/font.ttf"))).err().unwrap();
        assert!(err.to_string().contains("failed to read font"));
    }

    #[test]
    fn ellipse_blur_keeps_corners() {
        let mut image = gradient(40, 40);
        let original = image.clone();
        blur_region(&mut image, Region { x1: 0, y1: 0, x2: 40, y2: 40 }, true);
        assert_eq!(image.get_pixel(0, 0), original.get_pixel(0, 0));
        assert_eq!(image.get_pixel(39, 39), original.get_pixel(39, 39));
        assert_ne!(image.get_pixel(20, 20), original.get_pixel(20, 20));
    }

    #[test]
    fn mosaic_uses_tile_origin_color() {
        let mut image = gradient(10, 10);
        let origin = *image.get_pixel(2, 2);
        mosaic_region(&mut image, Region { x1: 2, y1: 2, x2: 8, y2: 8 }, 4);
        for y in 2..6 {
            for x in 2..6 {
                assert_eq!(*image.get_pixel(x, y), origin);
            }
        }
    }

    #[test]
    fn opaque_replacement_covers_region() {
        let mut image = gradient(20, 20);
        let replacement = RgbaImage::from_pixel(4, 4, image::Rgba([200, 100, 50, 255]));
        paste_region(&mut image, Region { x1: 5, y1: 5, x2: 15, y2: 10 }, &replacement);
        assert_eq!(image.get_pixel(5, 5).0, [200, 100, 50]);
        assert_eq!(image.get_pixel(14, 9).0, [200, 100, 50]);
        assert_ne!(image.get_pixel(15, 10).0, [200, 100, 50]);
    }

    #[test]
    fn img_mode_requires_replacement() {
        let options = MaskOptions {
            mode: ReplaceMode::Img,
            ..MaskOptions::default()
        };
        assert!(MaskRenderer::new(options).is_err());
    }
}
