//! Control surface.
//!
//! The set of operations the web layer invokes against the core: status
//! polling, the password gate, and the registration workflow. Every
//! operation is local to one request; failures never leave the session in a
//! half-transitioned state.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::errors::ControlError;
use crate::registry::{validate_enrolled_name, FaceRegistry, RegistryEntry};
use crate::session::{SessionStateMachine, StatusSnapshot};

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Password gate for the registration workflow.
///
/// The password is held as a SHA-256 digest, never in the clear. Consecutive
/// failures open an exponentially growing backoff window (with jitter);
/// attempts inside the window are rejected without being evaluated.
pub struct PasswordGate {
    digest: [u8; 32],
    backoff_base: Duration,
    backoff_max: Duration,
    throttle: Mutex<ThrottleState>,
}

#[derive(Default)]
struct ThrottleState {
    consecutive_failures: u32,
    blocked_until: Option<Instant>,
}

impl PasswordGate {
    /// Build a gate from a hex-encoded SHA-256 digest (the configured form).
    pub fn from_digest_hex(digest_hex: &str) -> Result<Self> {
        let bytes = hex::decode(digest_hex.trim())
            .map_err(|e| anyhow!("registration password digest is not valid hex: {}", e))?;
        if bytes.len() != 32 {
            return Err(anyhow!(
                "registration password digest must be 32 bytes, got {}",
                bytes.len()
            ));
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes);
        Ok(Self {
            digest,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
            throttle: Mutex::new(ThrottleState::default()),
        })
    }

    /// Build a gate from a cleartext password. Used by tools and tests.
    pub fn from_password(password: &str) -> Self {
        let digest: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        Self {
            digest,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
            throttle: Mutex::new(ThrottleState::default()),
        }
    }

    /// Override the backoff windows (tests).
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Check a password candidate. Wrong candidates (and any candidate
    /// arriving inside an open backoff window) fail with `Authorization`.
    pub fn check(&self, candidate: &str) -> Result<(), ControlError> {
        let mut throttle = self.throttle.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(blocked_until) = throttle.blocked_until {
            if Instant::now() < blocked_until {
                log::warn!("password attempt rejected: backoff window open");
                return Err(ControlError::Authorization);
            }
        }

        let candidate_digest: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
        if candidate_digest == self.digest {
            *throttle = ThrottleState::default();
            return Ok(());
        }

        throttle.consecutive_failures = throttle.consecutive_failures.saturating_add(1);
        let exponent = throttle.consecutive_failures.saturating_sub(1).min(16);
        let mut delay = self
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.backoff_base.as_millis() as u64 / 2);
        delay += Duration::from_millis(jitter_ms);
        throttle.blocked_until = Some(Instant::now() + delay);
        log::warn!(
            "password attempt failed ({} consecutive), next attempt allowed in {:?}",
            throttle.consecutive_failures,
            delay
        );
        Err(ControlError::Authorization)
    }
}

/// External operations on the session and registry. The HTTP binding is a
/// thin consumer of this type.
pub struct ControlSurface {
    session: Arc<SessionStateMachine>,
    registry: Arc<FaceRegistry>,
    gate: PasswordGate,
}

impl ControlSurface {
    pub fn new(
        session: Arc<SessionStateMachine>,
        registry: Arc<FaceRegistry>,
        gate: PasswordGate,
    ) -> Self {
        Self {
            session,
            registry,
            gate,
        }
    }

    /// Read-only session snapshot for polling.
    pub fn get_status(&self) -> StatusSnapshot {
        self.session.snapshot()
    }

    pub fn check_password(&self, candidate: &str) -> Result<(), ControlError> {
        self.gate.check(candidate)
    }

    /// Enter the registration workflow. Returns `true` when the workflow was
    /// newly started, `false` when one was already in flight (no-op).
    pub fn start_registration(&self, password: &str) -> Result<bool, ControlError> {
        self.gate.check(password)?;
        Ok(self.session.begin_registration())
    }

    /// Record the operator's name input during registration.
    pub fn set_pending_name(&self, name: &str) -> Result<(), ControlError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ControlError::Validation("name must not be empty".into()));
        }
        self.session.set_pending_name(name)
    }

    /// Enroll the captured face under `name`. The duplicate check, the
    /// durable insert and the session reset all happen inside one critical
    /// section; a duplicate name leaves the registration open for correction.
    pub fn submit_registration(&self, name: &str) -> Result<(), ControlError> {
        let name = name.trim().to_string();
        validate_enrolled_name(&name).map_err(|e| ControlError::Validation(e.to_string()))?;

        let registry = Arc::clone(&self.registry);
        self.session.commit_registration(move |captured| {
            let entry = RegistryEntry::new(name, captured.embedding.clone());
            registry.insert(entry).map_err(ControlError::from)
        })
    }

    /// Discard the frozen frame and search again.
    pub fn recapture(&self) -> Result<(), ControlError> {
        self.session.recapture()
    }

    /// Abort the registration workflow. Valid in any registration sub-state.
    pub fn cancel_registration(&self) {
        self.session.cancel();
    }

    /// Enrolled names, for operator tooling.
    pub fn enrolled_names(&self) -> Vec<String> {
        self.registry.names()
    }
}
