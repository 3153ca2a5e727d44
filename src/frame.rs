//! Decoded frame container.
//!
//! A `Frame` owns the RGB pixels of one image or video frame together with its
//! position in the stream. Pixels still show un-anonymized faces until the
//! renderer has run, so the buffer is zeroized when the frame is dropped.

use anyhow::{anyhow, Result};
use image::RgbImage;
use zeroize::Zeroize;

pub struct Frame {
    index: u64,
    image: RgbImage,
}

// Explicitly NOT implementing Clone: copies of raw pixels would outlive the
// zeroize-on-drop guarantee.

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// Wrap a packed RGB24 buffer.
    pub fn from_rgb(index: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected_len,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self::new(index, image))
    }

    /// Position of this frame in its stream, starting at 0.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Move the frame to another stream position, e.g. after rate conversion.
    pub fn renumber(&mut self, index: u64) {
        self.index = index;
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Packed RGB24 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let buffer: &mut [u8] = &mut self.image;
        buffer.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_checks_length() {
        assert!(Frame::from_rgb(0, 2, 2, vec![0u8; 12]).is_ok());
        assert!(Frame::from_rgb(0, 2, 2, vec![0u8; 11]).is_err());
    }

    #[test]
    fn exposes_dimensions_and_index() {
        let frame = Frame::from_rgb(7, 4, 3, vec![9u8; 36]).unwrap();
        assert_eq!(frame.index(), 7);
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.pixels().len(), 36);
        assert_eq!(frame.image().get_pixel(3, 2).0, [9, 9, 9]);
    }
}
