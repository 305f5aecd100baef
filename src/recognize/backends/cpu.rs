use anyhow::Result;

use crate::errors::RecognitionError;
use crate::frame::FaceRegion;
use crate::recognize::backend::RecognizerBackend;
use crate::recognize::backends::{grid_embedding, luminance_regions};
use crate::registry::FaceEmbedding;

/// CPU backend: bright-blob detection over a luminance cell grid and grid
/// embeddings. The default backend when no model backend is compiled in.
#[derive(Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl RecognizerBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<FaceRegion>> {
        Ok(luminance_regions(pixels, width, height))
    }

    fn embed(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        region: &FaceRegion,
    ) -> Result<FaceEmbedding, RecognitionError> {
        grid_embedding(pixels, width, height, region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::backends::test_frames;

    #[test]
    fn cpu_backend_detects_and_embeds() {
        let mut backend = CpuBackend::new();
        let pixels = test_frames::with_bright_rect(128, 128, 32, 32, 64, 64);

        let regions = backend.detect(&pixels, 128, 128).unwrap();
        assert_eq!(regions.len(), 1);

        let embedding = backend.embed(&pixels, 128, 128, &regions[0]).unwrap();
        assert_eq!(embedding.values().len(), crate::registry::EMBEDDING_DIM);
    }

    #[test]
    fn same_face_at_two_positions_matches_closely() {
        let mut backend = CpuBackend::new();
        let left = test_frames::with_bright_rect(256, 128, 16, 32, 64, 64);
        let right = test_frames::with_bright_rect(256, 128, 160, 32, 64, 64);

        let region_left = backend.detect(&left, 256, 128).unwrap()[0];
        let region_right = backend.detect(&right, 256, 128).unwrap()[0];

        let a = backend.embed(&left, 256, 128, &region_left).unwrap();
        let b = backend.embed(&right, 256, 128, &region_right).unwrap();
        assert!(a.distance(&b) < 0.1);
    }

    #[test]
    fn no_faces_in_a_dark_frame() {
        let mut backend = CpuBackend::new();
        let pixels = test_frames::dark(128, 128);
        assert!(backend.detect(&pixels, 128, 128).unwrap().is_empty());
    }
}
