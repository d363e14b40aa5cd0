// src/config/timeouts.rs
//
// The active timeout values, written once at startup (or explicitly by an
// operator flag) and read by many call sites. The only shared mutable
// state in the pipeline, guarded by a read/write lock.

use std::sync::{OnceLock, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    /// Days of residual certificate validity below which a warning is
    /// emitted instead of silently reusing the certificate.
    pub certificate_expiry_warning_days: i64,
    /// Fixed sleep between polls of a not-yet-ready cluster resource.
    pub poll_interval_secs: u64,
    /// Upper bound on waiting for a cluster resource to become readable.
    pub discovery_timeout_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            certificate_expiry_warning_days: 90,
            poll_interval_secs: 5,
            discovery_timeout_secs: 300,
        }
    }
}

fn cell() -> &'static RwLock<Timeouts> {
    static ACTIVE: OnceLock<RwLock<Timeouts>> = OnceLock::new();
    ACTIVE.get_or_init(|| RwLock::new(Timeouts::default()))
}

pub fn active() -> Timeouts {
    cell().read().expect("timeouts lock poisoned").clone()
}

pub fn set_active(timeouts: Timeouts) {
    *cell().write().expect("timeouts lock poisoned") = timeouts;
}
