//! At-most-once delivery for user-submitted messages.
//!
//! Two layers: a synchronous single-flight lock closing the race between
//! near-simultaneous triggers (key press, click, programmatic retry), and a
//! time-windowed content-hash cache rejecting identical resends.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitRejection {
    #[error("a send is already in flight")]
    InFlight,
    #[error("duplicate message, recently sent")]
    DuplicateRecent,
}

/// Holds the single-flight lock for one outbound send. Dropping it releases
/// the lock, so the lock cannot leak across an abandoned send path.
#[derive(Debug)]
pub struct SendAttempt {
    in_flight: Arc<AtomicBool>,
}

impl Drop for SendAttempt {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct SubmissionGuard {
    in_flight: Arc<AtomicBool>,
    recent: HashMap<String, Instant>,
    ttl: Duration,
}

impl SubmissionGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            recent: HashMap::new(),
            ttl,
        }
    }

    fn hash_key(session_id: &str, message: &str) -> String {
        format!("{session_id}:{}", message.trim())
    }

    /// Try to open a send. Checks the duplicate cache first (a duplicate
    /// must not consume the lock), then takes the lock with a single
    /// check-and-set so two triggers in the same tick cannot both pass.
    pub fn begin(
        &mut self,
        session_id: &str,
        message: &str,
        now: Instant,
    ) -> Result<SendAttempt, SubmitRejection> {
        self.sweep(now);
        let key = Self::hash_key(session_id, message);
        if self.recent.contains_key(&key) {
            tracing::info!("[guard] rejected duplicate send for session {session_id}");
            return Err(SubmitRejection::DuplicateRecent);
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::info!("[guard] rejected overlapping send for session {session_id}");
            return Err(SubmitRejection::InFlight);
        }
        self.recent.insert(key, now + self.ttl);
        Ok(SendAttempt {
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Forget a hash after a failed send so a manual retry is not rejected
    /// as a duplicate.
    pub fn forget_recent(&mut self, session_id: &str, message: &str) {
        self.recent.remove(&Self::hash_key(session_id, message));
    }

    /// Lazy expiry sweep; also exposed for the session's timer tick.
    pub fn sweep(&mut self, now: Instant) {
        self.recent.retain(|_, expires_at| *expires_at > now);
    }

    pub fn reset(&mut self) {
        self.recent.clear();
        self.in_flight.store(false, Ordering::Release);
    }
}
