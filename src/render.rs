//! Stream annotation.
//!
//! Annotation never touches a captured `Frame`: each tick renders onto a
//! `DisplayFrame` copy, draws the guide box and face box for the current
//! session state, and JPEG-encodes the result for the video feed.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::{FaceRegion, Frame};

/// Border thickness of annotation boxes, in pixels.
const BOX_THICKNESS: u32 = 3;

/// Idle guide box.
pub const COLOR_GUIDE: [u8; 3] = [128, 128, 128];
/// Authenticated match.
pub const COLOR_MATCHED: [u8; 3] = [0, 255, 0];
/// Face present but not recognized.
pub const COLOR_UNMATCHED: [u8; 3] = [255, 0, 0];
/// Registration searching for a usable face.
pub const COLOR_SEARCHING: [u8; 3] = [255, 255, 0];
/// Frozen capture under review.
pub const COLOR_FROZEN: [u8; 3] = [0, 255, 0];

/// Mutable RGB24 canvas for one streamed frame.
pub struct DisplayFrame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl DisplayFrame {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            pixels: frame.pixels().to_vec(),
            width: frame.width,
            height: frame.height,
        }
    }

    /// The fixed guide box the operator centers their face in.
    pub fn guide_box(&self) -> FaceRegion {
        let width = self.width / 3;
        let height = self.height * 5 / 8;
        FaceRegion {
            x: (self.width - width) / 2,
            y: (self.height - height) / 2,
            width,
            height,
        }
    }

    /// Draw a rectangle outline. Coordinates are clipped to the canvas.
    pub fn draw_box(&mut self, region: &FaceRegion, color: [u8; 3]) {
        let x1 = (region.x + region.width).min(self.width);
        let y1 = (region.y + region.height).min(self.height);
        if region.x >= x1 || region.y >= y1 {
            return;
        }
        for t in 0..BOX_THICKNESS {
            // Horizontal edges.
            for x in region.x..x1 {
                self.put(x, region.y + t, color);
                self.put(x, y1.saturating_sub(t + 1), color);
            }
            // Vertical edges.
            for y in region.y..y1 {
                self.put(region.x + t, y, color);
                self.put(x1.saturating_sub(t + 1), y, color);
            }
        }
    }

    fn put(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = ((y * self.width + x) * 3) as usize;
        self.pixels[offset..offset + 3].copy_from_slice(&color);
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = ((y * self.width + x) * 3) as usize;
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ]
    }

    /// Encode the canvas as JPEG for the video feed.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(&self.pixels, self.width, self.height, ExtendedColorType::Rgb8)
            .context("encode frame as JPEG")?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame() -> Frame {
        Frame::new(vec![10u8; 64 * 48 * 3], 64, 48, 1)
    }

    #[test]
    fn guide_box_is_centered() {
        let display = DisplayFrame::from_frame(&test_frame());
        let guide = display.guide_box();
        let right_margin = 64 - (guide.x + guide.width);
        assert!(guide.x.abs_diff(right_margin) <= 1);
        assert!(guide.x > 0 && guide.y > 0);
        assert!(guide.x + guide.width <= 64);
        assert!(guide.y + guide.height <= 48);
    }

    #[test]
    fn draw_box_paints_the_border_only() {
        let mut display = DisplayFrame::from_frame(&test_frame());
        let region = FaceRegion {
            x: 8,
            y: 8,
            width: 32,
            height: 24,
        };
        display.draw_box(&region, COLOR_MATCHED);

        // Top-left corner painted, interior untouched.
        assert_eq!(display.pixel(8, 8), COLOR_MATCHED);
        assert_eq!(display.pixel(24, 20), [10, 10, 10]);
    }

    #[test]
    fn draw_box_clips_to_canvas() {
        let mut display = DisplayFrame::from_frame(&test_frame());
        let region = FaceRegion {
            x: 60,
            y: 40,
            width: 100,
            height: 100,
        };
        display.draw_box(&region, COLOR_UNMATCHED);
        assert_eq!(display.pixel(63, 40), COLOR_UNMATCHED);
    }

    #[test]
    fn encode_jpeg_produces_a_jpeg() {
        let display = DisplayFrame::from_frame(&test_frame());
        let jpeg = display.encode_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
