//! Limit checking and failure accounting.
//!
//! A [`TestRun`] bundles the [`TestLog`] records go to with the run's
//! [`ErrorCounter`]. Every check emits exactly one record; failures also bump
//! the counter, which only ever grows during a run.

use crate::decode::Reading;
use crate::testlog::TestLog;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Monotonic count of failed checks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCounter {
    count: u32,
}

impl ErrorCounter {
    /// Failures so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    fn bump(&mut self) {
        self.count = self.count.saturating_add(1);
    }
}

/// How values and bounds are rendered in records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum DisplayMode {
    /// Fixed six-decimal notation followed by `unit`.
    Decimal {
        /// Unit suffix; empty for none.
        unit: String,
    },
    /// Integer part in upper-case hexadecimal, for register and bit-field checks.
    Hex,
}

impl DisplayMode {
    /// Decimal rendering with `unit`.
    pub fn decimal(unit: &str) -> Self {
        DisplayMode::Decimal {
            unit: unit.to_string(),
        }
    }

    fn render(&self, value: f64) -> String {
        match self {
            DisplayMode::Decimal { unit } if unit.is_empty() => format!("{:.6}", value),
            DisplayMode::Decimal { unit } => format!("{:.6} {}", value, unit),
            DisplayMode::Hex if value.is_finite() => format!("0x{:X}", value as i64),
            DisplayMode::Hex => value.to_string(),
        }
    }
}

impl Default for DisplayMode {
    fn default() -> Self {
        DisplayMode::decimal("V")
    }
}

/// A named pass window, as declared in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitSpec {
    /// Name used in configuration and records.
    pub name: String,
    /// Lowest passing value.
    pub min: f64,
    /// Highest passing value.
    pub max: f64,
    /// Unit printed after values.
    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_unit() -> String {
    "V".to_string()
}

impl LimitSpec {
    /// Decimal display in this limit's unit.
    pub fn display(&self) -> DisplayMode {
        DisplayMode::decimal(&self.unit)
    }
}

/// Whether `value` lies in `[min, max]`. NaN never does.
pub fn within(value: f64, min: f64, max: f64) -> bool {
    min <= value && value <= max
}

/// One test run: a record sink plus the failure counter.
#[derive(Debug)]
pub struct TestRun<L: TestLog> {
    log: L,
    errors: ErrorCounter,
}

impl<L: TestLog> TestRun<L> {
    /// Run writing records to `log`.
    pub fn new(log: L) -> Self {
        Self {
            log,
            errors: ErrorCounter::default(),
        }
    }

    /// Check `value` against the inclusive window `[min, max]`.
    ///
    /// Returns `true` on pass. A failure increments the error counter.
    pub fn check(&mut self, name: &str, value: f64, min: f64, max: f64, display: &DisplayMode) -> bool {
        let (v, lo, hi) = (display.render(value), display.render(min), display.render(max));
        let passed = within(value, min, max);
        debug!(name, value, min, max, passed, "limit check");

        if passed {
            self.log.log_pass(&format!(
                "{}: {} expected range from {} to {}. Test PASS !",
                name, v, lo, hi
            ));
        } else {
            self.errors.bump();
            self.log.log_fail(&format!(
                "{}: {} OUT OF LIMITS ({}, {}). Test Failed !",
                name, v, lo, hi
            ));
        }
        passed
    }

    /// [`check`](Self::check) a decoded reading.
    pub fn check_reading(
        &mut self,
        name: &str,
        reading: &Reading,
        min: f64,
        max: f64,
        display: &DisplayMode,
    ) -> bool {
        self.check(name, reading.value, min, max, display)
    }

    /// Check against a configured limit.
    pub fn check_limit(&mut self, limit: &LimitSpec, value: f64) -> bool {
        self.check(&limit.name, value, limit.min, limit.max, &limit.display())
    }

    /// Failed checks so far.
    pub fn error_count(&self) -> u32 {
        self.errors.count()
    }

    /// Snapshot of the failure counter.
    pub fn errors(&self) -> ErrorCounter {
        self.errors
    }

    /// True while no check has failed.
    pub fn passed(&self) -> bool {
        self.errors.count() == 0
    }

    /// Record sink.
    pub fn log(&self) -> &L {
        &self.log
    }

    /// Mutable record sink.
    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }

    /// Consume the run and return its log.
    pub fn into_log(self) -> L {
        self.log
    }
}
