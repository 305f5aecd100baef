use anyhow::Result;

use crate::errors::RecognitionError;
use crate::frame::FaceRegion;
use crate::recognize::backend::RecognizerBackend;
use crate::recognize::backends::grid_embedding;
use crate::registry::FaceEmbedding;

/// Stub backend for demos without a usable detector: always reports one
/// centered face region and embeds it on the grid embedder.
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognizerBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _pixels: &[u8], width: u32, height: u32) -> Result<Vec<FaceRegion>> {
        Ok(vec![FaceRegion {
            x: width / 3,
            y: height / 4,
            width: width / 3,
            height: height / 2,
        }])
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

    #[test]
    fn stub_backend_always_reports_one_centered_region() {
        let mut backend = StubBackend::new();
        let pixels = vec![0u8; 120 * 120 * 3];
        let regions = backend.detect(&pixels, 120, 120).unwrap();
        assert_eq!(
            regions,
            vec![FaceRegion {
                x: 40,
                y: 30,
                width: 40,
                height: 60,
            }]
        );
    }
}
