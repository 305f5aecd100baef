//! End-to-end workflow tests: a spawned capture loop over the synthetic
//! camera, driven through the control surface the way the web layer drives
//! the daemon.

use std::sync::Arc;
use std::time::{Duration, Instant};

use facegate::{
    CameraConfig, CameraSource, CaptureConfig, CaptureLoop, ControlError, ControlSurface,
    FaceRegistry, FramePublisher, InMemoryRegistryStore, Mode, PasswordGate, Recognizer,
    SessionStateMachine,
};

const PASSWORD: &str = "sesame";

struct Harness {
    session: Arc<SessionStateMachine>,
    registry: Arc<FaceRegistry>,
    publisher: Arc<FramePublisher>,
    control: ControlSurface,
    capture: Option<facegate::CaptureHandle>,
}

impl Harness {
    fn start() -> Self {
        let session = Arc::new(SessionStateMachine::new());
        let registry =
            Arc::new(FaceRegistry::open(Box::new(InMemoryRegistryStore::new())).unwrap());
        let publisher = Arc::new(FramePublisher::new());
        let gate = PasswordGate::from_password(PASSWORD)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2));
        let control = ControlSurface::new(Arc::clone(&session), Arc::clone(&registry), gate);

        let source = CameraSource::acquire(CameraConfig {
            device: "stub://test".to_string(),
            target_fps: 0,
            width: 320,
            height: 240,
        })
        .unwrap();
        let capture = CaptureLoop::new(
            Box::new(source),
            Recognizer::from_backend_name("cpu").unwrap(),
            Arc::clone(&session),
            Arc::clone(&registry),
            Arc::clone(&publisher),
            CaptureConfig {
                detect_every: 1,
                target_fps: 200,
                ..CaptureConfig::default()
            },
        )
        .spawn()
        .unwrap();

        Self {
            session,
            registry,
            publisher,
            control,
            capture: Some(capture),
        }
    }

    fn wait_until(&self, what: &str, predicate: impl Fn(&Self) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if predicate(self) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {}", what);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop().unwrap();
        }
    }
}

#[test]
fn empty_registry_never_matches() {
    let harness = Harness::start();
    harness.wait_until("an unmatched result", |h| {
        h.control
            .get_status()
            .last_match
            .map_or(false, |result| !result.matched)
    });
    assert_eq!(harness.control.get_status().mode, Mode::Authenticating);
    assert_eq!(harness.registry.len(), 0);
}

#[test]
fn wrong_password_is_rejected_and_changes_nothing() {
    let harness = Harness::start();
    assert!(matches!(
        harness.control.check_password("wrong"),
        Err(ControlError::Authorization)
    ));
    assert!(matches!(
        harness.control.start_registration("wrong"),
        Err(ControlError::Authorization)
    ));
    assert_eq!(harness.control.get_status().mode, Mode::Authenticating);
}

#[test]
fn registration_capture_submit_then_authenticate() {
    let harness = Harness::start();

    // Start registration; the loop freezes the first good face.
    assert!(harness.control.start_registration(PASSWORD).unwrap());
    harness.wait_until("a frozen capture", |h| {
        h.control.get_status().captured_frame
    });
    let status = harness.control.get_status();
    assert_eq!(status.mode, Mode::RegistrationCapturing);

    // Recapture discards the frozen frame; the loop freezes another.
    harness.control.recapture().unwrap();
    harness.wait_until("a second frozen capture", |h| {
        h.control.get_status().captured_frame
    });

    // Submit enrolls and returns to authentication.
    harness.control.set_pending_name("Alice").unwrap();
    harness.control.submit_registration("Alice").unwrap();
    assert_eq!(harness.control.get_status().mode, Mode::Authenticating);
    assert_eq!(harness.control.enrolled_names(), vec!["Alice".to_string()]);

    // The same synthetic face now authenticates as Alice.
    harness.wait_until("a match for Alice", |h| {
        h.control
            .get_status()
            .last_match
            .map_or(false, |result| {
                result.matched && result.name.as_deref() == Some("Alice")
            })
    });
}

#[test]
fn duplicate_submission_keeps_one_entry_and_stays_open() {
    let harness = Harness::start();

    harness.control.start_registration(PASSWORD).unwrap();
    harness.wait_until("a frozen capture", |h| {
        h.control.get_status().captured_frame
    });
    harness.control.submit_registration("Alice").unwrap();

    harness.control.start_registration(PASSWORD).unwrap();
    harness.wait_until("another frozen capture", |h| {
        h.control.get_status().captured_frame
    });
    let err = harness.control.submit_registration("Alice").unwrap_err();
    assert!(matches!(err, ControlError::DuplicateName(_)));

    let status = harness.control.get_status();
    assert_eq!(status.mode, Mode::RegistrationCapturing);
    assert!(status.captured_frame);
    assert_eq!(harness.registry.len(), 1);

    // Cancel always works and returns to authentication.
    harness.control.cancel_registration();
    assert_eq!(harness.control.get_status().mode, Mode::Authenticating);
}

#[test]
fn capture_loop_streams_while_frozen() {
    let harness = Harness::start();
    harness.control.start_registration(PASSWORD).unwrap();
    harness.wait_until("a frozen capture", |h| {
        h.control.get_status().captured_frame
    });

    // The stream keeps publishing the frozen frame during review.
    let seq_before = harness.publisher.latest().map_or(0, |f| f.seq);
    harness.wait_until("frozen frames on the stream", |h| {
        h.publisher.latest().map_or(0, |f| f.seq) > seq_before
    });

    let sess_frozen = harness.session.snapshot();
    assert!(sess_frozen.captured_frame);
    assert!(sess_frozen.captured_at_ms.is_some());
}
