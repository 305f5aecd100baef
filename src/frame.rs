//! Frame and face-region types.
//!
//! A `Frame` is a timestamped RGB24 pixel buffer. Pixel data is private and
//! only readable through `pixels()`: frames are immutable after capture and
//! move (not copy) through the pipeline. Annotation for the video stream
//! happens on a separate display buffer (see `render`), never on the frame.

use crate::now_ms;

/// One captured frame. RGB24, row-major, no padding.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time in milliseconds since the epoch.
    pub captured_at_ms: u64,
    /// Monotonic per-source sequence number.
    pub seq: u64,
}

impl Frame {
    /// Create a frame from raw RGB24 bytes. Called only by ingestion sources.
    pub(crate) fn new(data: Vec<u8>, width: u32, height: u32, seq: u64) -> Self {
        debug_assert_eq!(data.len(), (width as usize) * (height as usize) * 3);
        Self {
            data,
            width,
            height,
            captured_at_ms: now_ms(),
            seq,
        }
    }

    /// Build a frame from externally produced RGB24 bytes (e.g. a decoded
    /// still image). Fails when the buffer does not match the dimensions.
    pub fn from_rgb24(data: Vec<u8>, width: u32, height: u32) -> anyhow::Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow::anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow::anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self::new(data, width, height, 0))
    }

    /// Read-only view of the pixel data.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }
}

/// Axis-aligned bounding box of one detected face, in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Selection policy when a frame contains several faces: the largest
/// bounding-box area wins, ties broken by the leftmost x coordinate.
pub fn select_primary_region(regions: &[FaceRegion]) -> Option<FaceRegion> {
    regions
        .iter()
        .copied()
        .max_by(|a, b| a.area().cmp(&b.area()).then(b.x.cmp(&a.x)))
}
