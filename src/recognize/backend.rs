use anyhow::Result;

use crate::errors::RecognitionError;
use crate::frame::FaceRegion;
use crate::registry::FaceEmbedding;

/// Recognizer backend trait.
///
/// `detect` returns every face region found in the frame; an empty result is
/// a normal outcome, not an error. `embed` turns one region into an identity
/// vector and fails with `RecognitionError` when the region is too small or
/// degenerate, also a normal retried-next-tick outcome.
///
/// Implementations must treat the pixel slice as read-only and ephemeral and
/// must not retain it beyond the call.
pub trait RecognizerBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect all faces in an RGB24 frame. One pass, empty if none.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<FaceRegion>>;

    /// Produce the embedding for one detected region.
    fn embed(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        region: &FaceRegion,
    ) -> Result<FaceEmbedding, RecognitionError>;

    /// Optional warm-up hook (model load, first-inference cost).
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
