//! End-to-end session flows against the scripted transport.

use scpi_bench::acquisition::{AcquisitionOutcome, PollSettings};
use scpi_bench::decode::{Reading, ReadingSource};
use scpi_bench::error::{AcquisitionError, BenchError};
use scpi_bench::parameters::{IntegrationSetting, RangeSetting};
use scpi_bench::timer::ManualTimer;
use scpi_bench::transport::MockTransport;
use scpi_bench::{InstrumentFamily, InstrumentSession};
use std::time::Duration;

fn session(family: InstrumentFamily) -> (MockTransport, InstrumentSession<MockTransport, ManualTimer>) {
    let mock = MockTransport::new();
    let session = InstrumentSession::new("bench", family, mock.clone(), ManualTimer::new())
        .with_settle(Duration::from_secs(1));
    (mock, session)
}

fn block(value: &str) -> String {
    format!("#{}{}{}\n", value.len().to_string().len(), value.len(), value)
}

fn poll_settings() -> PollSettings {
    PollSettings {
        poll_interval: Duration::from_millis(500),
        timeout: Duration::from_secs(2),
        query_timeout: Duration::from_millis(200),
    }
}

#[test]
fn test_scan_configuration_sequence() {
    let (mock, mut session) = session(InstrumentFamily::Agilent34972);
    session.open().unwrap();
    session
        .configure_scan("101:105", "VOLT:DC", RangeSetting::Value(10.0), IntegrationSetting::Nplc(1.0))
        .unwrap();
    session.config_ac_filter("201", 20.0).unwrap();

    assert_eq!(
        mock.sent(),
        vec![
            "*RST",
            "CONF:VOLT:DC 10,(@101:105)",
            "VOLT:DC:NPLC 1",
            "SENS:VOLT:AC:BAND 20,(@201)",
        ]
    );
    assert_eq!(session.timer().sleeps(), vec![Duration::from_secs(1)]);
}

#[test]
fn test_default_integration_uses_family_default() {
    let (mock, mut session) = session(InstrumentFamily::Agilent34972);
    session
        .configure_scan("101", "RES", RangeSetting::Auto, IntegrationSetting::Default)
        .unwrap();
    assert_eq!(mock.sent(), vec!["CONF:RES AUTO,(@101)", "RES:NPLC 1"]);
}

#[test]
fn test_tsp_open_and_dmm_config() {
    let (mock, mut session) = session(InstrumentFamily::Keithley3706);
    session.open().unwrap();
    session
        .configure_dmm("dcvolts", RangeSetting::Value(10.0), IntegrationSetting::Nplc(2.0), None)
        .unwrap();

    let sent = mock.sent();
    assert_eq!(sent[0], "*RST");
    assert!(sent[1].starts_with("beeper.enable"));
    assert_eq!(
        &sent[3..],
        &["dmm.func = \"dcvolts\"", "dmm.range = 10", "dmm.nplc = 2"]
    );
}

#[test]
fn test_identify_and_read() {
    let (mock, mut session) = session(InstrumentFamily::Agilent34411);
    mock.set_reply("*IDN?", "Agilent Technologies,34411A,MY0000,2.35\r\n");
    mock.push_reply("READ?", " -1.000000E-03\n");

    assert_eq!(session.identify().unwrap(), "Agilent Technologies,34411A,MY0000,2.35");
    let reading = session.read().unwrap();
    assert_eq!(reading.value, -1.0e-3);
    assert_eq!(reading.source, ReadingSource::Scalar);
}

#[test]
fn test_overlapped_acquisition_completes() {
    let (mock, mut session) = session(InstrumentFamily::Agilent34411);
    mock.push_reply("DATA:POIN?", "0\n");
    mock.push_reply("DATA:POIN?", "3\n");
    mock.push_reply("DATA:POIN?", "5\n");
    for value in ["+1.0E+00", "+2.0E+00", "+3.0E+00", "+4.0E+00", "+5.0E+00"] {
        mock.push_reply("R? 1", block(value));
    }

    let job = session.start_overlapped(1.0, 5.0).unwrap();
    assert_eq!(job.expected_count(), 5);
    let outcome = session.wait_overlapped_done(job, &poll_settings()).unwrap();

    let values: Vec<f64> = outcome.readings().iter().map(|r| r.value).collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert!(outcome.readings().iter().all(|r| r.source == ReadingSource::Block));
    assert_eq!(
        session.timer().sleeps(),
        vec![Duration::from_millis(500), Duration::from_millis(500)]
    );

    let sent = mock.sent();
    assert_eq!(
        &sent[..6],
        &["TRIG:SOUR BUS", "SAMP:COUN 5", "SAMP:SOUR TIM", "SAMP:TIM 1", "INIT", "*TRG"]
    );
    assert_eq!(sent.iter().filter(|c| *c == "DATA:POIN?").count(), 3);
    assert_eq!(sent.iter().filter(|c| *c == "R? 1").count(), 5);
}

#[test]
fn test_overlapped_acquisition_times_out() {
    let (mock, mut session) = session(InstrumentFamily::Agilent34411);
    mock.set_reply("DATA:POIN?", "2\n");

    let job = session.start_overlapped(1.0, 5.0).unwrap();
    let outcome = session.wait_overlapped_done(job, &poll_settings()).unwrap();

    match outcome {
        AcquisitionOutcome::TimedOut {
            expected,
            last_count,
            elapsed,
        } => {
            assert_eq!(expected, 5);
            assert_eq!(last_count, 2);
            assert_eq!(elapsed, Duration::from_secs(2));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(!mock.sent().iter().any(|c| c == "R? 1"));
}

#[test]
fn test_invalid_timing_sends_nothing() {
    let (mock, mut session) = session(InstrumentFamily::Agilent34411);
    assert!(matches!(
        session.start_overlapped(0.0, 5.0),
        Err(BenchError::Acquisition(AcquisitionError::InvalidTiming { .. }))
    ));
    assert!(mock.sent().is_empty());
}

#[test]
fn test_triggered_single_read() {
    let (mock, mut session) = session(InstrumentFamily::Agilent34411);
    mock.push_reply("DATA:POIN?", "1\n");
    mock.push_reply("R? 1", block("+4.2E-01"));

    let reading = session.read_triggered(&poll_settings()).unwrap();
    assert_eq!(reading, Some(Reading::block(0.42)));
    assert_eq!(
        &mock.sent()[..5],
        &["SAMP:COUN 1", "TRIG:SOUR BUS", "TRIG:COUN 1", "INIT", "*TRG"]
    );
}

#[test]
fn test_tsp_mainframe_refuses_overlapped_sampling() {
    let (mock, mut session) = session(InstrumentFamily::Keithley3706);
    let err = session.start_overlapped(1.0, 5.0).unwrap_err();
    assert!(matches!(
        err,
        BenchError::Acquisition(AcquisitionError::Unsupported { .. })
    ));
    assert!(err.is_validation());
    assert!(matches!(
        session.read_triggered(&poll_settings()),
        Err(BenchError::Acquisition(AcquisitionError::Unsupported { .. }))
    ));
    assert!(mock.sent().is_empty());
}

#[test]
fn test_transport_failure_propagates() {
    let (mock, mut session) = session(InstrumentFamily::Agilent34972);
    mock.trigger_failure();
    assert!(matches!(
        session.control_switch(101, true),
        Err(BenchError::Transport(_))
    ));
    session.control_switch(101, true).unwrap();
    assert_eq!(mock.sent(), vec!["ROUT:CLOS (@101)"]);
}
