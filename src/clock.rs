//! Time source capability (spec.md §6, "consumed capabilities").
//!
//! Backoff and Probe both need "now" to make admission decisions. Wrapping
//! it behind a trait — rather than calling `Instant::now()` directly —
//! lets tests drive fake time instead of sleeping in wall-clock seconds,
//! the same dependency-injection shape the teacher crate uses for its
//! `Resolver`/`Dialer` boundaries.

use std::sync::Arc;
use std::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real wall clock. Default for every plugin unless a test overrides it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
