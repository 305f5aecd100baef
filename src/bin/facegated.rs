//! facegated - face authentication gate daemon
//!
//! This daemon:
//! 1. Loads the registry of enrolled faces from SQLite
//! 2. Serves the control API and the MJPEG video feed
//! 3. Runs the capture loop: camera frames -> throttled recognition ->
//!    session transitions -> annotated stream
//! 4. Releases the camera deterministically on shutdown or device failure

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use facegate::api::{ApiConfig, ApiServer};
use facegate::{
    CameraSource, CaptureLoop, ControlSurface, FaceRegistry, FacegateConfig, FramePublisher,
    PasswordGate, Recognizer, SessionStateMachine, SqliteRegistryStore,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = FacegateConfig::load()?;
    let password_digest = cfg.password_sha256.clone().ok_or_else(|| {
        anyhow!("registration password digest must be set (FACEGATE_PASSWORD_SHA256 or registration.password_sha256)")
    })?;
    let gate = PasswordGate::from_digest_hex(&password_digest)?;

    let registry = Arc::new(FaceRegistry::open(Box::new(SqliteRegistryStore::open(
        &cfg.db_path,
    )?))?);
    let session = Arc::new(SessionStateMachine::new());
    let publisher = Arc::new(FramePublisher::new());
    let control = Arc::new(ControlSurface::new(
        Arc::clone(&session),
        Arc::clone(&registry),
        gate,
    ));

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        control,
        Arc::clone(&publisher),
    )
    .spawn()?;
    log::info!("control api listening on {}", api_handle.addr);

    let source = CameraSource::acquire(cfg.camera.clone())?;
    let mut recognizer = Recognizer::from_backend_name(&cfg.recognizer.backend)?;
    recognizer.warm_up()?;

    log::info!(
        "facegated running: device={} backend={} registry={} ({} enrolled)",
        cfg.camera.device,
        cfg.recognizer.backend,
        cfg.db_path,
        registry.len()
    );

    let capture_handle = CaptureLoop::new(
        Box::new(source),
        recognizer,
        session,
        registry,
        publisher,
        cfg.capture_config(),
    )
    .spawn()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })?;
    }

    while !shutdown.load(Ordering::SeqCst) && !capture_handle.is_finished() {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("facegated shutting down");
    let capture_result = capture_handle.stop();
    api_handle.stop()?;
    capture_result
}
