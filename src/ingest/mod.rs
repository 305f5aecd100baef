//! Frame ingestion sources.
//!
//! A `FrameSource` produces a continuous sequence of RGB24 frames at a
//! target rate. Sources are acquired through `CameraSource::acquire`, which
//! pairs the open with a guaranteed `release` (explicit or on drop) so the
//! camera handle never outlives the process.
//!
//! Available backends:
//! - Synthetic (`stub://...`): deterministic scene for tests and demos
//! - V4L2 devices (feature: ingest-v4l2)

#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use crate::errors::DeviceError;
use crate::frame::Frame;

/// Contract the capture loop requires from a camera.
///
/// `next_frame` blocks until a frame is available and fails with
/// `DeviceError` when the device is gone. `release` must be idempotent;
/// implementations also release on drop.
pub trait FrameSource: Send {
    /// Human-readable device identifier for logs.
    fn describe(&self) -> String;

    /// Capture the next frame, blocking until one is available.
    fn next_frame(&mut self) -> Result<Frame, DeviceError>;

    /// Attempt to (re)connect to the device.
    fn connect(&mut self) -> Result<(), DeviceError>;

    /// Whether the source believes it can keep producing frames.
    fn is_healthy(&self) -> bool;

    /// Release the underlying device handle. Idempotent.
    fn release(&mut self);

    /// Frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device identifier: `stub://<name>` or a device node like `/dev/video0`.
    pub device: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://front_door".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Camera source with a backend per device scheme.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(v4l2::V4l2Camera),
}

impl CameraSource {
    /// Open the configured device and connect to it. The returned source
    /// releases the device on `release()` or drop.
    pub fn acquire(config: CameraConfig) -> Result<Self, DeviceError> {
        let mut source = if config.device.starts_with("stub://") {
            Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            }
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                Self {
                    backend: CameraBackend::V4l2(v4l2::V4l2Camera::new(config)),
                }
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                return Err(DeviceError::new(format!(
                    "device '{}' requires the ingest-v4l2 feature",
                    config.device
                )));
            }
        };
        source.connect()?;
        Ok(source)
    }
}

impl FrameSource for CameraSource {
    fn describe(&self) -> String {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.describe(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.describe(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.next_frame(),
        }
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.connect(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.is_healthy(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.release(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.stats(),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for tests and demos
// ----------------------------------------------------------------------------

/// Deterministic scene: a dark room with one bright face-like block that
/// drifts horizontally and periodically leaves the frame, so both the
/// "face present" and "no face" paths get exercised.
struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
    released: bool,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            released: false,
        }
    }

    fn describe(&self) -> String {
        self.config.device.clone()
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        self.released = false;
        log::info!("CameraSource: connected to {} (synthetic)", self.config.device);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        if self.released {
            return Err(DeviceError::new("synthetic camera already released"));
        }
        self.frame_count += 1;
        let pixels = self.generate_scene();
        Ok(Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        ))
    }

    fn generate_scene(&self) -> Vec<u8> {
        let width = self.config.width;
        let height = self.config.height;
        let mut pixels = vec![20u8; (width * height * 3) as usize];

        // Two out of every ten frames the subject steps out of view.
        if self.frame_count % 10 >= 8 {
            return pixels;
        }

        let face_w = width / 3;
        let face_h = height / 2;
        let drift = ((self.frame_count / 10) % 4) as u32 * (width / 32);
        let fx = width / 4 + drift;
        let fy = height / 4;
        for y in fy..(fy + face_h).min(height) {
            let value = 200 + ((y - fy) * 55 / face_h.max(1)) as u8;
            for x in fx..(fx + face_w).min(width) {
                let offset = ((y * width + x) * 3) as usize;
                pixels[offset] = value;
                pixels[offset + 1] = value;
                pixels[offset + 2] = value;
            }
        }
        pixels
    }

    fn is_healthy(&self) -> bool {
        !self.released
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log::info!("CameraSource: released {} (synthetic)", self.config.device);
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}
