#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::errors::RecognitionError;
use crate::frame::FaceRegion;
use crate::recognize::backend::RecognizerBackend;
use crate::recognize::backends::{check_region_quality, luminance_regions};
use crate::registry::{FaceEmbedding, EMBEDDING_DIM};

/// Tract-based embedding backend for ONNX face-embedding models.
///
/// Detection stays on the CPU heuristic; the model only embeds the selected
/// crop. The model must take a 1x3xNxN f32 input and produce an
/// `EMBEDDING_DIM`-component vector. No network I/O, no writes beyond model
/// loading.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX embedding model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }

    fn build_input(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        region: &FaceRegion,
    ) -> Result<Tensor> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let size = self.input_size as usize;
        let region_w = region.width.min(width - region.x.min(width)) as usize;
        let region_h = region.height.min(height - region.y.min(height)) as usize;
        if region_w == 0 || region_h == 0 {
            return Err(anyhow!("face region lies outside the frame"));
        }

        // Nearest-neighbour resample of the crop into the model input.
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size, size),
            |(_, channel, y, x)| {
                let src_x = region.x as usize + x * region_w / size;
                let src_y = region.y as usize + y * region_h / size;
                let idx = (src_y * width as usize + src_x) * 3 + channel;
                (pixels[idx] as f32 - 127.5) / 127.5
            },
        );

        Ok(input.into_tensor())
    }

    fn run_embedding(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        region: &FaceRegion,
    ) -> Result<FaceEmbedding> {
        let input = self.build_input(pixels, width, height, region)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let mut values: Vec<f32> = view.iter().copied().collect();
        if values.len() != EMBEDDING_DIM {
            return Err(anyhow!(
                "model produced a {}-component vector, expected {}",
                values.len(),
                EMBEDDING_DIM
            ));
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return Err(anyhow!("model produced a zero embedding"));
        }
        for value in &mut values {
            *value /= norm;
        }
        FaceEmbedding::new(values)
    }
}

impl RecognizerBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
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
        check_region_quality(region)?;
        self.run_embedding(pixels, width, height, region)
            .map_err(|e| RecognitionError::Unembeddable(e.to_string()))
    }
}
