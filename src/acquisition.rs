//! Overlapped (instrument-paced, buffered) acquisition.
//!
//! The instrument is armed to take `expected_count` samples on its own timer
//! and returns immediately. The caller later waits: the sample counter is
//! polled until it reaches the expected count or the timeout elapses, then
//! the buffer is drained one definite-length block at a time.
//!
//! ```text
//! Idle --start--> Armed --wait_done--> Polling --+--> Complete
//!                                                +--> TimedOut
//!                                                +--> Failed
//! ```
//!
//! A timeout is a normal outcome, not an error: it is reported as
//! [`AcquisitionOutcome::TimedOut`] and carries no partial samples.

use crate::command::{build_arm_overlapped, build_arm_single, fetch_one_query, poll_count_query};
use crate::decode::{decode_block, decode_count, Reading};
use crate::error::AcquisitionError;
use crate::timer::Timer;
use crate::transport::Transport;
use std::time::Duration;
use tracing::{debug, warn};

/// Relative slack applied before rounding `total / period` up, so that
/// `0.3 / 0.1` yields 3 rather than 4.
const COUNT_TOLERANCE: f64 = 1e-9;

/// Lifecycle of an [`OverlappedJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Not yet armed.
    Idle,
    /// Arm commands sent; no poll issued yet.
    Armed,
    /// Waiting for the sample counter.
    Polling,
    /// All samples drained.
    Complete,
    /// The deadline passed before the counter reached the expected count.
    TimedOut,
    /// A transport or decode error ended the job.
    Failed,
}

/// Terminal result of [`OverlappedJob::wait_done`].
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionOutcome {
    /// Exactly `expected_count` readings in capture order.
    Complete(Vec<Reading>),
    /// The counter did not reach the expected count in time.
    TimedOut {
        /// Samples the job was waiting for.
        expected: u32,
        /// Counter value seen on the final poll.
        last_count: u32,
        /// Time spent polling.
        elapsed: Duration,
    },
}

impl AcquisitionOutcome {
    /// Drained readings; empty after a timeout.
    pub fn readings(&self) -> &[Reading] {
        match self {
            AcquisitionOutcome::Complete(readings) => readings,
            AcquisitionOutcome::TimedOut { .. } => &[],
        }
    }

    /// Whether every expected sample was drained.
    pub fn is_complete(&self) -> bool {
        matches!(self, AcquisitionOutcome::Complete(_))
    }
}

/// Polling parameters for [`OverlappedJob::wait_done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Sleep between counter polls.
    pub poll_interval: Duration,
    /// Give up once this much time has passed since polling started.
    pub timeout: Duration,
    /// Per-query reply timeout handed to the transport.
    pub query_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(2),
        }
    }
}

/// Number of samples needed to cover `total_s` at `period_s` spacing.
///
/// ```rust
/// use scpi_bench::acquisition::expected_count;
///
/// assert_eq!(expected_count(1.0, 5.0).unwrap(), 5);
/// assert_eq!(expected_count(0.1, 0.3).unwrap(), 3);
/// assert_eq!(expected_count(2.0, 5.0).unwrap(), 3);
/// assert!(expected_count(0.0, 5.0).is_err());
/// ```
pub fn expected_count(period_s: f64, total_s: f64) -> Result<u32, AcquisitionError> {
    let invalid = || AcquisitionError::InvalidTiming { period_s, total_s };
    if !(period_s.is_finite() && total_s.is_finite()) || period_s <= 0.0 || total_s <= 0.0 {
        return Err(invalid());
    }
    let ratio = total_s / period_s;
    let count = (ratio * (1.0 - COUNT_TOLERANCE)).ceil();
    if !count.is_finite() || count < 1.0 || count > f64::from(u32::MAX) {
        return Err(invalid());
    }
    Ok(count as u32)
}

/// One armed buffered acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlappedJob {
    period_s: f64,
    total_s: f64,
    expected_count: u32,
    state: JobState,
}

impl OverlappedJob {
    /// Validate timing without touching an instrument.
    pub fn new(period_s: f64, total_s: f64) -> Result<Self, AcquisitionError> {
        Ok(Self {
            period_s,
            total_s,
            expected_count: expected_count(period_s, total_s)?,
            state: JobState::Idle,
        })
    }

    /// Validate timing, then arm the instrument.
    pub fn start<T>(period_s: f64, total_s: f64, transport: &mut T) -> Result<Self, AcquisitionError>
    where
        T: Transport + ?Sized,
    {
        let mut job = Self::new(period_s, total_s)?;
        job.arm(transport)?;
        Ok(job)
    }

    /// Arm a single bus-triggered sample.
    pub fn start_single<T>(transport: &mut T) -> Result<Self, AcquisitionError>
    where
        T: Transport + ?Sized,
    {
        for command in build_arm_single() {
            transport.write(command.as_bytes())?;
        }
        debug!(expected = 1, "single sample armed");
        Ok(Self {
            period_s: 0.0,
            total_s: 0.0,
            expected_count: 1,
            state: JobState::Armed,
        })
    }

    /// Send the arm sequence. Only valid from `Idle`.
    pub fn arm<T>(&mut self, transport: &mut T) -> Result<(), AcquisitionError>
    where
        T: Transport + ?Sized,
    {
        debug_assert_eq!(self.state, JobState::Idle);
        for command in build_arm_overlapped(self.period_s, self.expected_count) {
            if let Err(err) = transport.write(command.as_bytes()) {
                self.transition(JobState::Failed);
                return Err(err.into());
            }
        }
        self.transition(JobState::Armed);
        Ok(())
    }

    /// Samples the instrument was armed for.
    pub fn expected_count(&self) -> u32 {
        self.expected_count
    }

    /// Sampling period in seconds.
    pub fn period_s(&self) -> f64 {
        self.period_s
    }

    /// Total acquisition length in seconds.
    pub fn total_s(&self) -> f64 {
        self.total_s
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Poll until the buffer holds `expected_count` samples or `settings.timeout`
    /// passes, then drain it.
    pub fn wait_done<T, C>(
        mut self,
        transport: &mut T,
        timer: &C,
        settings: &PollSettings,
    ) -> Result<AcquisitionOutcome, AcquisitionError>
    where
        T: Transport + ?Sized,
        C: Timer + ?Sized,
    {
        let result = self.poll_and_drain(transport, timer, settings);
        match &result {
            Ok(AcquisitionOutcome::Complete(_)) => self.transition(JobState::Complete),
            Ok(AcquisitionOutcome::TimedOut { .. }) => self.transition(JobState::TimedOut),
            Err(_) => self.transition(JobState::Failed),
        }
        result
    }

    fn poll_and_drain<T, C>(
        &mut self,
        transport: &mut T,
        timer: &C,
        settings: &PollSettings,
    ) -> Result<AcquisitionOutcome, AcquisitionError>
    where
        T: Transport + ?Sized,
        C: Timer + ?Sized,
    {
        self.transition(JobState::Polling);
        let started = timer.now();
        let poll = poll_count_query();

        loop {
            let reply = transport.query(poll.as_bytes(), settings.query_timeout)?;
            let text = String::from_utf8_lossy(&reply);
            let count = decode_count(&text).map_err(AcquisitionError::Counter)?;
            debug!(count, expected = self.expected_count, "sample counter");

            if count >= self.expected_count {
                if count > self.expected_count {
                    warn!(
                        count,
                        expected = self.expected_count,
                        "instrument buffered more samples than requested"
                    );
                }
                return self.drain(transport, settings).map(AcquisitionOutcome::Complete);
            }

            let elapsed = timer.now().saturating_sub(started);
            if elapsed >= settings.timeout {
                return Ok(AcquisitionOutcome::TimedOut {
                    expected: self.expected_count,
                    last_count: count,
                    elapsed,
                });
            }
            timer.sleep(settings.poll_interval.min(settings.timeout - elapsed));
        }
    }

    fn drain<T>(&self, transport: &mut T, settings: &PollSettings) -> Result<Vec<Reading>, AcquisitionError>
    where
        T: Transport + ?Sized,
    {
        let fetch = fetch_one_query();
        (0..self.expected_count as usize)
            .map(|index| -> Result<Reading, AcquisitionError> {
                let raw = transport.query(fetch.as_bytes(), settings.query_timeout)?;
                decode_block(&raw)
                    .map(Reading::block)
                    .map_err(|source| AcquisitionError::Sample { index, source })
            })
            .collect()
    }

    fn transition(&mut self, next: JobState) {
        debug!(from = ?self.state, to = ?next, expected = self.expected_count, "overlapped job");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualTimer;
    use crate::transport::MockTransport;

    fn settings() -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(2),
            query_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_expected_count_rounding() {
        assert_eq!(expected_count(1.0, 5.0).unwrap(), 5);
        assert_eq!(expected_count(0.1, 0.3).unwrap(), 3);
        assert_eq!(expected_count(0.3, 0.1).unwrap(), 1);
        assert_eq!(expected_count(1.0, 5.5).unwrap(), 6);
    }

    #[test]
    fn test_invalid_timing() {
        for (period, total) in [
            (0.0, 1.0),
            (-1.0, 1.0),
            (1.0, 0.0),
            (f64::NAN, 1.0),
            (1.0, f64::INFINITY),
            (1e-12, 1e6),
        ] {
            assert!(
                matches!(
                    expected_count(period, total),
                    Err(AcquisitionError::InvalidTiming { .. })
                ),
                "{} / {}",
                period,
                total
            );
        }
    }

    #[test]
    fn test_invalid_timing_writes_nothing() {
        let mock = MockTransport::new();
        let mut handle = mock.clone();
        assert!(OverlappedJob::start(0.0, 5.0, &mut handle).is_err());
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn test_start_arms_and_wait_completes() {
        let mock = MockTransport::new();
        mock.push_reply("DATA:POIN?", "0\n");
        mock.push_reply("DATA:POIN?", "3\n");
        mock.push_reply("DATA:POIN?", "+5\n");
        for value in 1..=5 {
            mock.push_reply("R? 1", format!("#15+{}.00\n", value));
        }
        let mut handle = mock.clone();
        let timer = ManualTimer::new();

        let job = OverlappedJob::start(1.0, 5.0, &mut handle).unwrap();
        assert_eq!(job.state(), JobState::Armed);
        assert_eq!(job.expected_count(), 5);

        let outcome = job.wait_done(&mut handle, &timer, &settings()).unwrap();
        let values: Vec<f64> = outcome.readings().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(timer.sleeps().len(), 2);
    }

    #[test]
    fn test_timeout_returns_no_samples() {
        let mock = MockTransport::new();
        mock.set_reply("DATA:POIN?", "2\n");
        let mut handle = mock.clone();
        let timer = ManualTimer::new();

        let job = OverlappedJob::start(1.0, 5.0, &mut handle).unwrap();
        let outcome = job.wait_done(&mut handle, &timer, &settings()).unwrap();

        assert_eq!(
            outcome,
            AcquisitionOutcome::TimedOut {
                expected: 5,
                last_count: 2,
                elapsed: Duration::from_secs(2),
            }
        );
        assert!(!mock.sent().iter().any(|c| c == "R? 1"));
        assert_eq!(timer.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_sleep_is_capped_by_remaining_time() {
        let mock = MockTransport::new();
        mock.set_reply("DATA:POIN?", "0\n");
        let mut handle = mock.clone();
        let timer = ManualTimer::new();
        let settings = PollSettings {
            poll_interval: Duration::from_millis(800),
            timeout: Duration::from_secs(2),
            query_timeout: Duration::from_millis(100),
        };

        let job = OverlappedJob::start(1.0, 5.0, &mut handle).unwrap();
        job.wait_done(&mut handle, &timer, &settings).unwrap();
        assert_eq!(
            timer.sleeps(),
            vec![
                Duration::from_millis(800),
                Duration::from_millis(800),
                Duration::from_millis(400),
            ]
        );
    }

    #[test]
    fn test_bad_sample_reports_index() {
        let mock = MockTransport::new();
        mock.set_reply("DATA:POIN?", "3\n");
        mock.push_reply("R? 1", "#14+1.0\n");
        mock.push_reply("R? 1", "+2.0\n");
        let mut handle = mock.clone();
        let timer = ManualTimer::new();

        let job = OverlappedJob::start(1.0, 3.0, &mut handle).unwrap();
        let err = job.wait_done(&mut handle, &timer, &settings()).unwrap_err();
        assert!(matches!(err, AcquisitionError::Sample { index: 1, .. }));
    }

    #[test]
    fn test_transport_failure_propagates() {
        let mock = MockTransport::new();
        let mut handle = mock.clone();
        let timer = ManualTimer::new();

        let job = OverlappedJob::start(1.0, 2.0, &mut handle).unwrap();
        mock.trigger_failure();
        let err = job.wait_done(&mut handle, &timer, &settings()).unwrap_err();
        assert!(matches!(err, AcquisitionError::Transport(_)));
    }

    #[test]
    fn test_single_sample() {
        let mock = MockTransport::new();
        mock.set_reply("DATA:POIN?", "1\n");
        mock.push_reply("R? 1", "#18-0.12500\n");
        let mut handle = mock.clone();

        let job = OverlappedJob::start_single(&mut handle).unwrap();
        let outcome = job
            .wait_done(&mut handle, &ManualTimer::new(), &settings())
            .unwrap();
        assert_eq!(outcome.readings()[0].value, -0.125);
        assert_eq!(&mock.sent()[..5], &["SAMP:COUN 1", "TRIG:SOUR BUS", "TRIG:COUN 1", "INIT", "*TRG"]);
    }
}
