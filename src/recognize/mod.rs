//! Face detection and embedding.
//!
//! `Recognizer` wraps a `RecognizerBackend` and adds the fixed selection
//! policy: when several faces are present, the largest bounding box wins,
//! ties broken by the leftmost x coordinate.

mod backend;
mod backends;

pub use backend::RecognizerBackend;
pub use backends::{CpuBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
#[cfg(test)]
pub(crate) use backends::test_frames;

use anyhow::{anyhow, Result};

use crate::errors::RecognitionError;
use crate::frame::{select_primary_region, FaceRegion, Frame};
use crate::registry::FaceEmbedding;

pub struct Recognizer {
    backend: Box<dyn RecognizerBackend>,
}

impl Recognizer {
    pub fn new(backend: Box<dyn RecognizerBackend>) -> Self {
        Self { backend }
    }

    /// Build a recognizer from a configured backend name.
    ///
    /// `cpu` and `stub` are always available; `tract:<model-path>` needs the
    /// `backend-tract` feature.
    pub fn from_backend_name(name: &str) -> Result<Self> {
        match name {
            "cpu" => Ok(Self::new(Box::new(CpuBackend::new()))),
            "stub" => Ok(Self::new(Box::new(StubBackend::new()))),
            other => {
                #[cfg(feature = "backend-tract")]
                if let Some(model_path) = other.strip_prefix("tract:") {
                    return Ok(Self::new(Box::new(TractBackend::new(model_path, 112)?)));
                }
                Err(anyhow!("unknown recognizer backend '{}'", other))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    /// All face regions in the frame. Empty when none are found.
    pub fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>> {
        self.backend
            .detect(frame.pixels(), frame.width, frame.height)
    }

    /// The region selected by the fixed policy, if any face was found.
    pub fn primary_face(&mut self, frame: &Frame) -> Result<Option<FaceRegion>> {
        Ok(select_primary_region(&self.detect_faces(frame)?))
    }

    /// Embedding for one detected region.
    pub fn embed(
        &mut self,
        frame: &Frame,
        region: &FaceRegion,
    ) -> Result<FaceEmbedding, RecognitionError> {
        self.backend
            .embed(frame.pixels(), frame.width, frame.height, region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::backends::test_frames;

    fn frame_with_rect(rx: u32, ry: u32, rw: u32, rh: u32) -> Frame {
        let pixels = test_frames::with_bright_rect(256, 128, rx, ry, rw, rh);
        Frame::new(pixels, 256, 128, 1)
    }

    #[test]
    fn from_backend_name_resolves_known_backends() {
        assert_eq!(Recognizer::from_backend_name("cpu").unwrap().name(), "cpu");
        assert_eq!(
            Recognizer::from_backend_name("stub").unwrap().name(),
            "stub"
        );
        assert!(Recognizer::from_backend_name("gpu").is_err());
    }

    #[test]
    fn primary_face_selects_largest() {
        let mut recognizer = Recognizer::from_backend_name("cpu").unwrap();
        let mut pixels = test_frames::with_bright_rect(256, 128, 0, 32, 48, 48);
        let bigger = test_frames::with_bright_rect(256, 128, 144, 16, 96, 96);
        for (dst, src) in pixels.iter_mut().zip(bigger) {
            *dst = (*dst).max(src);
        }
        let frame = Frame::new(pixels, 256, 128, 1);

        let primary = recognizer.primary_face(&frame).unwrap().unwrap();
        assert!(primary.x >= 144);
    }

    #[test]
    fn embed_round_trips_through_the_facade() {
        let mut recognizer = Recognizer::from_backend_name("cpu").unwrap();
        let frame = frame_with_rect(32, 32, 64, 64);
        let region = recognizer.primary_face(&frame).unwrap().unwrap();
        let embedding = recognizer.embed(&frame, &region).unwrap();
        assert_eq!(embedding.values().len(), crate::registry::EMBEDDING_DIM);
    }
}
