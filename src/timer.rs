//! Caller-supplied clock.
//!
//! The core never calls `std::thread::sleep` or reads the system clock
//! directly. Every wait goes through a [`Timer`], so tests can drive polling
//! loops deterministically with [`ManualTimer`].

use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

/// Monotonic clock plus blocking sleep.
pub trait Timer {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Block for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock timer backed by [`Instant`] and [`std::thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct SystemTimer {
    origin: Instant,
}

impl SystemTimer {
    /// Timer whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for SystemTimer {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock that only advances when slept on.
///
/// Every requested sleep is recorded for later inspection.
///
/// ```rust
/// use scpi_bench::timer::{ManualTimer, Timer};
/// use std::time::Duration;
///
/// let timer = ManualTimer::new();
/// timer.sleep(Duration::from_millis(250));
/// assert_eq!(timer.now(), Duration::from_millis(250));
/// ```
#[derive(Debug, Default)]
pub struct ManualTimer {
    elapsed: Cell<Duration>,
    sleeps: RefCell<Vec<Duration>>,
}

impl ManualTimer {
    /// Clock at zero with no sleeps recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> Duration {
        self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

impl<T: Timer + ?Sized> Timer for &T {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}
