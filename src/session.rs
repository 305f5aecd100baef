//! Session state machine.
//!
//! Exactly one session exists per process. Every guard check and its
//! transition run inside a single critical section on the state mutex, so no
//! observer ever sees a partially applied transition. The capture loop feeds
//! match results and capture candidates in; control operations drive the
//! registration workflow.
//!
//! Registration review is not a separate mode: a present `captured` face
//! while in `RegistrationCapturing` is the review state, which keeps the
//! "reviewing implies a frozen frame exists" invariant structural.

use std::sync::Mutex;

use serde::Serialize;

use crate::errors::ControlError;
use crate::frame::{FaceRegion, Frame};
use crate::registry::FaceEmbedding;

/// Visible session mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Authenticating,
    RegistrationCapturing,
}

/// Outcome of matching one processed frame against the registry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    pub name: Option<String>,
    pub distance: f32,
}

/// The frozen frame captured for enrollment, with its embedding candidate.
pub struct CapturedFace {
    pub frame: Frame,
    pub region: FaceRegion,
    pub embedding: FaceEmbedding,
    /// Monotonic id; changes on every re-capture so renderers can cache the
    /// frozen annotation per capture.
    pub id: u64,
}

struct SessionState {
    mode: Mode,
    captured: Option<CapturedFace>,
    pending_name: Option<String>,
    last_match: Option<MatchResult>,
    next_capture_id: u64,
}

/// Read-only session view for polling clients. Never carries pixel data.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub mode: Mode,
    pub captured_frame: bool,
    pub captured_at_ms: Option<u64>,
    pub pending_name: Option<String>,
    pub last_match: Option<MatchResult>,
}

/// The process-wide session state, shared between the capture thread and the
/// control surface.
pub struct SessionStateMachine {
    state: Mutex<SessionState>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                mode: Mode::Authenticating,
                captured: None,
                pending_name: None,
                last_match: None,
                next_capture_id: 1,
            }),
        }
    }

    // Transitions never panic between field writes, so a poisoned mutex still
    // holds a fully applied state and recovery is safe.
    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.lock();
        StatusSnapshot {
            mode: state.mode,
            captured_frame: state.captured.is_some(),
            captured_at_ms: state.captured.as_ref().map(|c| c.frame.captured_at_ms),
            pending_name: state.pending_name.clone(),
            last_match: state.last_match.clone(),
        }
    }

    /// Enter registration. Idempotent: returns `false` (and changes nothing)
    /// when a registration workflow is already in flight.
    pub fn begin_registration(&self) -> bool {
        let mut state = self.lock();
        if state.mode == Mode::RegistrationCapturing {
            return false;
        }
        state.mode = Mode::RegistrationCapturing;
        state.captured = None;
        state.pending_name = None;
        log::info!("session: registration started");
        true
    }

    /// Record the match outcome of one authentication tick. Applies only
    /// while authenticating; `None` means "no face this tick" and clears any
    /// previous result rather than repeating it.
    pub fn record_match(&self, result: Option<MatchResult>) {
        let mut state = self.lock();
        if state.mode != Mode::Authenticating {
            return;
        }
        state.last_match = result;
    }

    /// Store a frozen capture candidate. Applies only while registration is
    /// searching for a face (capturing mode, nothing captured yet); returns
    /// whether the capture was taken.
    pub fn record_capture(&self, frame: Frame, region: FaceRegion, embedding: FaceEmbedding) -> bool {
        let mut state = self.lock();
        if state.mode != Mode::RegistrationCapturing || state.captured.is_some() {
            return false;
        }
        let id = state.next_capture_id;
        state.next_capture_id += 1;
        state.captured = Some(CapturedFace {
            frame,
            region,
            embedding,
            id,
        });
        log::info!("session: capture {} frozen for review", id);
        true
    }

    /// Discard the frozen frame and resume searching. Only valid while a
    /// captured frame is present.
    pub fn recapture(&self) -> Result<(), ControlError> {
        let mut state = self.lock();
        if state.mode != Mode::RegistrationCapturing || state.captured.is_none() {
            return Err(ControlError::InvalidState(
                "no captured frame to discard".into(),
            ));
        }
        state.captured = None;
        log::info!("session: capture discarded, searching again");
        Ok(())
    }

    /// Record the operator's name input during registration so polling
    /// clients can render it. The name passed to submission stays
    /// authoritative.
    pub fn set_pending_name(&self, name: &str) -> Result<(), ControlError> {
        let mut state = self.lock();
        if state.mode != Mode::RegistrationCapturing {
            return Err(ControlError::InvalidState(
                "no registration in flight".into(),
            ));
        }
        state.pending_name = Some(name.to_string());
        Ok(())
    }

    /// Run the enrollment commit under the session lock.
    ///
    /// Guards (mode is capturing, a frame is captured) are checked, then
    /// `commit` runs with the captured face (the registry insert happens
    /// here, inside the critical section. Only when it succeeds does the
    /// session reset to `Authenticating` with all registration fields
    /// cleared; on any error the state is left untouched so the operator can
    /// rename, recapture or cancel.
    pub fn commit_registration<F>(&self, commit: F) -> Result<(), ControlError>
    where
        F: FnOnce(&CapturedFace) -> Result<(), ControlError>,
    {
        let mut state = self.lock();
        if state.mode != Mode::RegistrationCapturing {
            return Err(ControlError::InvalidState(
                "no registration in flight".into(),
            ));
        }
        let Some(captured) = state.captured.as_ref() else {
            return Err(ControlError::Validation(
                "no captured frame to submit".into(),
            ));
        };
        commit(captured)?;
        state.captured = None;
        state.pending_name = None;
        state.mode = Mode::Authenticating;
        log::info!("session: registration committed, back to authenticating");
        Ok(())
    }

    /// Abort registration from any sub-state. Always succeeds; a cancel
    /// outside registration is a no-op.
    pub fn cancel(&self) {
        let mut state = self.lock();
        if state.mode != Mode::RegistrationCapturing {
            return;
        }
        state.mode = Mode::Authenticating;
        state.captured = None;
        state.pending_name = None;
        log::info!("session: registration cancelled");
    }

    pub fn has_captured(&self) -> bool {
        self.lock().captured.is_some()
    }

    /// Read the frozen capture (if any) under the lock. Used by the capture
    /// loop to render the review frame without cloning pixels out.
    pub fn with_captured<R>(&self, f: impl FnOnce(Option<&CapturedFace>) -> R) -> R {
        let state = self.lock();
        f(state.captured.as_ref())
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EMBEDDING_DIM;

    fn test_frame() -> Frame {
        Frame::new(vec![0u8; 8 * 8 * 3], 8, 8, 1)
    }

    fn test_region() -> FaceRegion {
        FaceRegion {
            x: 0,
            y: 0,
            width: 8,
            height: 8,
        }
    }

    fn test_embedding() -> FaceEmbedding {
        FaceEmbedding::new(vec![0.5; EMBEDDING_DIM]).unwrap()
    }

    #[test]
    fn starts_authenticating_with_clean_state() {
        let session = SessionStateMachine::new();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.mode, Mode::Authenticating);
        assert!(!snapshot.captured_frame);
        assert!(snapshot.pending_name.is_none());
        assert!(snapshot.last_match.is_none());
    }

    #[test]
    fn begin_registration_is_idempotent() {
        let session = SessionStateMachine::new();
        assert!(session.begin_registration());
        assert!(!session.begin_registration());
        assert_eq!(session.mode(), Mode::RegistrationCapturing);
    }

    #[test]
    fn match_results_apply_only_while_authenticating() {
        let session = SessionStateMachine::new();
        session.record_match(Some(MatchResult {
            matched: true,
            name: Some("Alice".into()),
            distance: 0.3,
        }));
        assert!(session.snapshot().last_match.is_some());

        session.begin_registration();
        session.record_match(Some(MatchResult {
            matched: false,
            name: None,
            distance: 9.0,
        }));
        // Ignored: the session is no longer authenticating.
        assert_eq!(
            session.snapshot().last_match.unwrap().name,
            Some("Alice".into())
        );
    }

    #[test]
    fn no_face_clears_previous_match() {
        let session = SessionStateMachine::new();
        session.record_match(Some(MatchResult {
            matched: true,
            name: Some("Alice".into()),
            distance: 0.3,
        }));
        session.record_match(None);
        assert!(session.snapshot().last_match.is_none());
    }

    #[test]
    fn capture_applies_only_once_per_search() {
        let session = SessionStateMachine::new();
        assert!(!session.record_capture(test_frame(), test_region(), test_embedding()));

        session.begin_registration();
        assert!(session.record_capture(test_frame(), test_region(), test_embedding()));
        assert!(!session.record_capture(test_frame(), test_region(), test_embedding()));
        assert!(session.snapshot().captured_frame);
    }

    #[test]
    fn recapture_requires_a_captured_frame() {
        let session = SessionStateMachine::new();
        assert!(session.recapture().is_err());

        session.begin_registration();
        assert!(session.recapture().is_err());

        session.record_capture(test_frame(), test_region(), test_embedding());
        assert!(session.recapture().is_ok());
        assert!(!session.snapshot().captured_frame);
        // Still registering, back to searching.
        assert_eq!(session.mode(), Mode::RegistrationCapturing);
    }

    #[test]
    fn commit_requires_captured_frame_and_clears_on_success() {
        let session = SessionStateMachine::new();
        session.begin_registration();

        let err = session.commit_registration(|_| Ok(())).unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));

        session.record_capture(test_frame(), test_region(), test_embedding());
        session.set_pending_name("Alice").unwrap();
        session.commit_registration(|_| Ok(())).unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.mode, Mode::Authenticating);
        assert!(!snapshot.captured_frame);
        assert!(snapshot.pending_name.is_none());
    }

    #[test]
    fn failed_commit_leaves_state_untouched() {
        let session = SessionStateMachine::new();
        session.begin_registration();
        session.record_capture(test_frame(), test_region(), test_embedding());
        session.set_pending_name("Alice").unwrap();

        let err = session
            .commit_registration(|_| Err(ControlError::DuplicateName("Alice".into())))
            .unwrap_err();
        assert!(matches!(err, ControlError::DuplicateName(_)));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.mode, Mode::RegistrationCapturing);
        assert!(snapshot.captured_frame);
        assert_eq!(snapshot.pending_name, Some("Alice".into()));
    }

    #[test]
    fn cancel_resets_from_any_registration_substate() {
        let session = SessionStateMachine::new();
        session.begin_registration();
        session.record_capture(test_frame(), test_region(), test_embedding());
        session.cancel();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.mode, Mode::Authenticating);
        assert!(!snapshot.captured_frame);
        assert!(snapshot.pending_name.is_none());

        // Cancelling outside registration is a no-op.
        session.cancel();
        assert_eq!(session.mode(), Mode::Authenticating);
    }

    #[test]
    fn capture_ids_are_monotonic_across_recaptures() {
        let session = SessionStateMachine::new();
        session.begin_registration();
        session.record_capture(test_frame(), test_region(), test_embedding());
        let first = session.with_captured(|c| c.unwrap().id);
        session.recapture().unwrap();
        session.record_capture(test_frame(), test_region(), test_embedding());
        let second = session.with_captured(|c| c.unwrap().id);
        assert!(second > first);
    }
}
