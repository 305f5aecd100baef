//! Error taxonomy for the authentication core.
//!
//! Only `DeviceError` is fatal. Recognition failures are absorbed by the
//! capture loop as "no match this tick"; control-surface errors are local to
//! one request and never leave the session state partially mutated.

use thiserror::Error;

/// The camera device is gone. Fatal to the capture loop once the bounded
/// retry policy is exhausted.
#[derive(Debug, Error)]
#[error("camera device unavailable: {reason}")]
pub struct DeviceError {
    pub reason: String,
}

impl DeviceError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A frame was not good enough to embed. Normal outcome, retried on the next
/// processed tick.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("face region {width}x{height} is below the minimum of {min} px per side")]
    RegionTooSmall { width: u32, height: u32, min: u32 },
    #[error("face region {width}x{height} has a degenerate aspect ratio")]
    DegenerateRegion { width: u32, height: u32 },
    #[error("face region could not be embedded: {0}")]
    Unembeddable(String),
}

/// Registry mutation failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("name '{0}' is already enrolled")]
    DuplicateName(String),
    #[error("registry storage failure")]
    Storage(#[from] anyhow::Error),
}

/// Control-surface failures, mapped 1:1 onto responses by the API binding.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("registration password rejected")]
    Authorization,
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("name '{0}' is already enrolled")]
    DuplicateName(String),
    #[error("operation not valid in the current session state: {0}")]
    InvalidState(String),
    #[error("internal failure")]
    Internal(#[from] anyhow::Error),
}

impl From<RegistryError> for ControlError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateName(name) => ControlError::DuplicateName(name),
            RegistryError::Storage(inner) => ControlError::Internal(inner),
        }
    }
}
