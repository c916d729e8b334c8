use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Single-active-session guard plus the cooperative stop flag.
#[derive(Debug, Default)]
pub struct SessionGuard {
    active: AtomicBool,
    cancel: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub active: bool,
    pub cancel_requested: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Non-blocking. On success the stop flag is cleared and the returned
    /// permit releases the guard when dropped.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SessionPermit> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.cancel.store(false, Ordering::Release);
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        info!("Session acquired");

        Some(SessionPermit {
            guard: Arc::clone(self),
        })
    }

    pub fn release(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.cancel.store(false, Ordering::Release);
            *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = None;
            info!("Session released");
        }
    }

    /// Idempotent. Ignored while no session is active.
    pub fn request_cancel(&self) {
        if !self.is_active() {
            debug!("Stop requested with no active session");
            return;
        }
        if !self.cancel.swap(true, Ordering::AcqRel) {
            debug!("Stop requested");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            active: self.is_active(),
            cancel_requested: self.cancel_requested(),
            started_at: *self.started_at.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

/// Proof of holding the active session.
#[derive(Debug)]
pub struct SessionPermit {
    guard: Arc<SessionGuard>,
}

impl SessionPermit {
    pub fn is_cancelled(&self) -> bool {
        self.guard.cancel_requested()
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.guard.release();
    }
}
