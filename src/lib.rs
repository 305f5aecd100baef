//! Face authentication gate.
//!
//! This crate implements the concurrent core of a camera-facing
//! authentication kiosk: a capture thread matches live faces against a small
//! enrolled registry while a password-gated, multi-step workflow enrolls new
//! faces, without ever stalling the video stream or racing the registry.
//!
//! # Architecture
//!
//! - `ingest`: frame sources (synthetic, V4L2) behind the `FrameSource`
//!   contract with scoped acquire/release
//! - `recognize`: face detection + embedding backends behind
//!   `RecognizerBackend`, with the fixed primary-face selection policy
//! - `registry`: enrolled `{name, embedding, enrolled_at}` entries;
//!   concurrent lookups, exclusive atomic inserts, SQLite durability
//! - `session`: the one process-wide session state machine; every
//!   guard-check-and-transition is a single critical section
//! - `capture`: the capture loop thread; throttled recognition, annotation,
//!   stream publishing, bounded device retry
//! - `control`: the operations the web layer consumes (status, password
//!   gate, start/submit/recapture/cancel)
//! - `publish` / `render`: latest-frame fan-out and stream annotation
//! - `api`: thin HTTP binding of the control surface and the MJPEG feed

use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod capture;
pub mod config;
pub mod control;
pub mod errors;
pub mod frame;
pub mod ingest;
pub mod publish;
pub mod recognize;
pub mod registry;
pub mod render;
pub mod session;

pub use capture::{CaptureConfig, CaptureHandle, CaptureLoop};
pub use config::{FacegateConfig, RecognizerSettings};
pub use control::{ControlSurface, PasswordGate};
pub use errors::{ControlError, DeviceError, RecognitionError, RegistryError};
pub use frame::{select_primary_region, FaceRegion, Frame};
pub use ingest::{CameraConfig, CameraSource, FrameSource, SourceStats};
pub use publish::{EncodedFrame, FramePublisher};
pub use recognize::{CpuBackend, Recognizer, RecognizerBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use recognize::TractBackend;
pub use registry::{
    validate_enrolled_name, FaceEmbedding, FaceRegistry, InMemoryRegistryStore, RegistryEntry,
    RegistryStore, SqliteRegistryStore, EMBEDDING_DIM,
};
pub use session::{MatchResult, Mode, SessionStateMachine, StatusSnapshot};

/// Milliseconds since the epoch. Clamps to zero on a pre-epoch clock.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seconds since the epoch. Clamps to zero on a pre-epoch clock.
pub fn now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
