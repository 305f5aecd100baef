//! Daemon configuration.
//!
//! Layered the usual way: JSON file named by `FACEGATE_CONFIG`, then
//! environment overrides, then validation. Defaults give a runnable demo
//! (synthetic camera, cpu backend) with no file at all.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::capture::CaptureConfig;
use crate::ingest::CameraConfig;

const DEFAULT_DB_PATH: &str = "facegate.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_CAMERA_DEVICE: &str = "stub://front_door";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_BACKEND: &str = "cpu";
const DEFAULT_MATCH_THRESHOLD: f32 = 0.55;
const DEFAULT_DETECT_EVERY: u32 = 3;
const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
struct FacegateConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    recognizer: Option<RecognizerConfigFile>,
    registration: Option<RegistrationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognizerConfigFile {
    backend: Option<String>,
    match_threshold: Option<f32>,
    detect_every: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct RegistrationConfigFile {
    password_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FacegateConfig {
    pub db_path: String,
    pub api_addr: String,
    pub camera: CameraConfig,
    pub recognizer: RecognizerSettings,
    /// SHA-256 hex digest of the registration password. The daemon refuses
    /// to start without one; tools that never gate registration ignore it.
    pub password_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecognizerSettings {
    pub backend: String,
    pub match_threshold: f32,
    pub detect_every: u32,
    pub jpeg_quality: u8,
}

impl FacegateConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FACEGATE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FacegateConfigFile) -> Self {
        let camera = CameraConfig {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_CAMERA_FPS),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };
        let recognizer = RecognizerSettings {
            backend: file
                .recognizer
                .as_ref()
                .and_then(|r| r.backend.clone())
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            match_threshold: file
                .recognizer
                .as_ref()
                .and_then(|r| r.match_threshold)
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            detect_every: file
                .recognizer
                .as_ref()
                .and_then(|r| r.detect_every)
                .unwrap_or(DEFAULT_DETECT_EVERY),
            jpeg_quality: file
                .recognizer
                .as_ref()
                .and_then(|r| r.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        };
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            camera,
            recognizer,
            password_sha256: file.registration.and_then(|r| r.password_sha256),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("FACEGATE_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("FACEGATE_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(device) = std::env::var("FACEGATE_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(digest) = std::env::var("FACEGATE_PASSWORD_SHA256") {
            if !digest.trim().is_empty() {
                self.password_sha256 = Some(digest);
            }
        }
        if let Ok(threshold) = std::env::var("FACEGATE_MATCH_THRESHOLD") {
            self.recognizer.match_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("FACEGATE_MATCH_THRESHOLD must be a number"))?;
        }
        if let Ok(every) = std::env::var("FACEGATE_DETECT_EVERY") {
            self.recognizer.detect_every = every
                .parse()
                .map_err(|_| anyhow!("FACEGATE_DETECT_EVERY must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        if self.recognizer.match_threshold <= 0.0 {
            return Err(anyhow!("match_threshold must be greater than zero"));
        }
        if self.recognizer.detect_every == 0 {
            return Err(anyhow!("detect_every must be at least 1"));
        }
        if self.recognizer.jpeg_quality == 0 || self.recognizer.jpeg_quality > 100 {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if let Some(digest) = &self.password_sha256 {
            let bytes = hex::decode(digest.trim())
                .map_err(|_| anyhow!("password_sha256 must be a hex SHA-256 digest"))?;
            if bytes.len() != 32 {
                return Err(anyhow!("password_sha256 must be 32 hex-encoded bytes"));
            }
        }
        Ok(())
    }

    /// Capture-loop settings derived from the recognizer section.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            detect_every: self.recognizer.detect_every,
            match_threshold: self.recognizer.match_threshold,
            target_fps: self.camera.target_fps,
            jpeg_quality: self.recognizer.jpeg_quality,
            ..CaptureConfig::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<FacegateConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
