//! Recognizer backends and the pixel helpers they share.

mod cpu;
mod stub;
#[cfg(feature = "backend-tract")]
mod tract;

pub use cpu::CpuBackend;
pub use stub::StubBackend;
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use crate::errors::RecognitionError;
use crate::frame::FaceRegion;
use crate::registry::{FaceEmbedding, EMBEDDING_DIM};

/// Side length of the luminance cells the detector scans.
pub(crate) const CELL: u32 = 16;
/// Mean cell luminance at or above which a cell counts as face candidate.
pub(crate) const BRIGHT_THRESHOLD: u32 = 180;
/// Minimum candidate cells for a component to count as a face.
pub(crate) const MIN_COMPONENT_CELLS: usize = 4;
/// Minimum region side length accepted for embedding.
pub(crate) const MIN_FACE_SIDE: u32 = 32;
/// Embedding sample grid; width * height must equal `EMBEDDING_DIM`.
const EMBED_GRID_W: u32 = 8;
const EMBED_GRID_H: u32 = 16;

/// Mean luminance of a pixel block, clipped to the frame.
fn block_luminance(pixels: &[u8], width: u32, height: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> u32 {
    let x1 = x1.min(width);
    let y1 = y1.min(height);
    if x0 >= x1 || y0 >= y1 {
        return 0;
    }
    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    for y in y0..y1 {
        let row = (y as usize * width as usize + x0 as usize) * 3;
        let end = (y as usize * width as usize + x1 as usize) * 3;
        for chunk in pixels[row..end].chunks_exact(3) {
            sum += (chunk[0] as u64 + chunk[1] as u64 + chunk[2] as u64) / 3;
            count += 1;
        }
    }
    (sum / count.max(1)) as u32
}

/// Bright-blob face detection over a coarse luminance cell grid.
///
/// Cells whose mean luminance clears `BRIGHT_THRESHOLD` are grouped into
/// 4-connected components; each component of at least `MIN_COMPONENT_CELLS`
/// cells becomes one face region. A heuristic, not a model, but good enough for
/// guided capture at close range and for deterministic tests.
pub(crate) fn luminance_regions(pixels: &[u8], width: u32, height: u32) -> Vec<FaceRegion> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let grid_w = width.div_ceil(CELL) as usize;
    let grid_h = height.div_ceil(CELL) as usize;

    let mut bright = vec![false; grid_w * grid_h];
    for gy in 0..grid_h {
        for gx in 0..grid_w {
            let luma = block_luminance(
                pixels,
                width,
                height,
                gx as u32 * CELL,
                gy as u32 * CELL,
                (gx as u32 + 1) * CELL,
                (gy as u32 + 1) * CELL,
            );
            bright[gy * grid_w + gx] = luma >= BRIGHT_THRESHOLD;
        }
    }

    let mut visited = vec![false; grid_w * grid_h];
    let mut regions = Vec::new();
    for start in 0..bright.len() {
        if !bright[start] || visited[start] {
            continue;
        }
        // Flood-fill one component, tracking its cell bounding box.
        let mut stack = vec![start];
        visited[start] = true;
        let (mut min_x, mut min_y, mut max_x, mut max_y) =
            (grid_w - 1, grid_h - 1, 0usize, 0usize);
        let mut cells = 0usize;
        while let Some(idx) = stack.pop() {
            let (cx, cy) = (idx % grid_w, idx / grid_w);
            min_x = min_x.min(cx);
            min_y = min_y.min(cy);
            max_x = max_x.max(cx);
            max_y = max_y.max(cy);
            cells += 1;
            let mut push = |nx: usize, ny: usize| {
                let nidx = ny * grid_w + nx;
                if bright[nidx] && !visited[nidx] {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            };
            if cx > 0 {
                push(cx - 1, cy);
            }
            if cx + 1 < grid_w {
                push(cx + 1, cy);
            }
            if cy > 0 {
                push(cx, cy - 1);
            }
            if cy + 1 < grid_h {
                push(cx, cy + 1);
            }
        }
        if cells < MIN_COMPONENT_CELLS {
            continue;
        }
        let x = min_x as u32 * CELL;
        let y = min_y as u32 * CELL;
        regions.push(FaceRegion {
            x,
            y,
            width: ((max_x as u32 + 1) * CELL).min(width) - x,
            height: ((max_y as u32 + 1) * CELL).min(height) - y,
        });
    }
    regions
}

/// Quality guards shared by all embedders.
pub(crate) fn check_region_quality(region: &FaceRegion) -> Result<(), RecognitionError> {
    if region.width < MIN_FACE_SIDE || region.height < MIN_FACE_SIDE {
        return Err(RecognitionError::RegionTooSmall {
            width: region.width,
            height: region.height,
            min: MIN_FACE_SIDE,
        });
    }
    let (long, short) = if region.width > region.height {
        (region.width, region.height)
    } else {
        (region.height, region.width)
    };
    if long > short * 4 {
        return Err(RecognitionError::DegenerateRegion {
            width: region.width,
            height: region.height,
        });
    }
    Ok(())
}

/// Grid embedding: the region's luminance resampled to an 8x16 grid,
/// mean-centered and L2-normalized into a unit vector.
pub(crate) fn grid_embedding(
    pixels: &[u8],
    width: u32,
    height: u32,
    region: &FaceRegion,
) -> Result<FaceEmbedding, RecognitionError> {
    check_region_quality(region)?;

    let mut values = Vec::with_capacity(EMBEDDING_DIM);
    for gy in 0..EMBED_GRID_H {
        for gx in 0..EMBED_GRID_W {
            let x0 = region.x + gx * region.width / EMBED_GRID_W;
            let x1 = region.x + (gx + 1) * region.width / EMBED_GRID_W;
            let y0 = region.y + gy * region.height / EMBED_GRID_H;
            let y1 = region.y + (gy + 1) * region.height / EMBED_GRID_H;
            values.push(block_luminance(pixels, width, height, x0, y0, x1.max(x0 + 1), y1.max(y0 + 1)) as f32);
        }
    }

    let mean = values.iter().sum::<f32>() / values.len() as f32;
    for value in &mut values {
        *value -= mean;
    }
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < 1e-6 {
        return Err(RecognitionError::Unembeddable(
            "region has no luminance structure".into(),
        ));
    }
    for value in &mut values {
        *value /= norm;
    }

    FaceEmbedding::new(values).map_err(|e| RecognitionError::Unembeddable(e.to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dark_frame_has_no_regions() {
        let pixels = test_frames::dark(128, 128);
        assert!(luminance_regions(&pixels, 128, 128).is_empty());
    }

    #[test]
    fn bright_rect_is_detected() {
        let pixels = test_frames::with_bright_rect(128, 128, 32, 32, 64, 64);
        let regions = luminance_regions(&pixels, 128, 128);
        assert_eq!(regions.len(), 1);
        let region = regions[0];
        assert!(region.width >= 64 && region.height >= 64);
        assert!(region.x <= 32 && region.y <= 32);
    }

    #[test]
    fn two_separated_rects_are_two_regions() {
        let mut pixels = test_frames::with_bright_rect(256, 128, 0, 32, 64, 64);
        let second = test_frames::with_bright_rect(256, 128, 176, 32, 64, 64);
        for (dst, src) in pixels.iter_mut().zip(second) {
            *dst = (*dst).max(src);
        }
        let regions = luminance_regions(&pixels, 256, 128);
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn tiny_region_fails_quality_check() {
        let region = crate::frame::FaceRegion {
            x: 0,
            y: 0,
            width: 16,
            height: 16,
        };
        assert!(matches!(
            check_region_quality(&region),
            Err(RecognitionError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn extreme_aspect_ratio_fails_quality_check() {
        let region = crate::frame::FaceRegion {
            x: 0,
            y: 0,
            width: 320,
            height: 48,
        };
        assert!(matches!(
            check_region_quality(&region),
            Err(RecognitionError::DegenerateRegion { .. })
        ));
    }

    #[test]
    fn grid_embedding_is_deterministic_and_unit_norm() {
        let pixels = test_frames::with_bright_rect(128, 128, 32, 32, 64, 64);
        let region = crate::frame::FaceRegion {
            x: 32,
            y: 32,
            width: 64,
            height: 64,
        };
        let a = grid_embedding(&pixels, 128, 128, &region).unwrap();
        let b = grid_embedding(&pixels, 128, 128, &region).unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.values().iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn uniform_region_is_unembeddable() {
        let mut pixels = test_frames::dark(128, 128);
        for value in &mut pixels {
            *value = 220;
        }
        let region = crate::frame::FaceRegion {
            x: 0,
            y: 0,
            width: 128,
            height: 128,
        };
        assert!(matches!(
            grid_embedding(&pixels, 128, 128, &region),
            Err(RecognitionError::Unembeddable(_))
        ));
    }
}
