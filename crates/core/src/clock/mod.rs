//! Time sources and the stop signal shared by every playback loop.
//!
//! All loops in the crate suspend through [`Clock::wait_until`] so that a
//! raised [`StopSignal`] cuts a wait short instead of being noticed only when
//! the sleep ends. Tests drive the same loops with a [`ManualClock`] whose
//! virtual time jumps to each deadline instantly.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Source of the current time and of interruptible waits.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Suspends until `deadline` or until `stop` is raised, whichever comes
    /// first. Returns `true` when the wait ended because of the signal.
    fn wait_until(&self, deadline: Instant, stop: &StopSignal) -> bool;

    /// Suspends for `duration`, see [`Clock::wait_until`].
    fn wait_for(&self, duration: Duration, stop: &StopSignal) -> bool {
        self.wait_until(self.now() + duration, stop)
    }
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wait_until(&self, deadline: Instant, stop: &StopSignal) -> bool {
        let mut raised = stop.lock();
        loop {
            if *raised {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            raised = stop
                .inner
                .changed
                .wait_timeout(raised, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Virtual clock for deterministic tests. Waiting never blocks: time jumps to
/// the requested deadline unless the stop signal is already raised.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves virtual time forward, e.g. to simulate a slow display call.
    pub fn advance(&self, delta: Duration) {
        *self.offset() += delta;
    }

    /// Virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.offset()
    }

    /// Instant the clock was created at, which is virtual time zero.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    fn offset(&self) -> MutexGuard<'_, Duration> {
        self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset()
    }

    fn wait_until(&self, deadline: Instant, stop: &StopSignal) -> bool {
        if stop.is_raised() {
            return true;
        }
        let target = deadline.saturating_duration_since(self.origin);
        let mut offset = self.offset();
        if target > *offset {
            *offset = target;
        }
        drop(offset);
        stop.is_raised()
    }
}

/// Cloneable flag used to request that a loop stops. Raising it wakes every
/// thread blocked in [`SystemClock::wait_until`].
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug, Default)]
struct SignalInner {
    raised: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        *self.lock() = true;
        self.inner.changed.notify_all();
    }

    pub fn reset(&self) {
        *self.lock() = false;
    }

    pub fn is_raised(&self) -> bool {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner
            .raised
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
