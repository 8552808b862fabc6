//! Limit checks writing to in-memory and file-backed test logs.

use scpi_bench::decode::Reading;
use scpi_bench::limits::{DisplayMode, LimitSpec, TestRun};
use scpi_bench::testlog::{next_log_name, FileLog, MemoryLog, RecordKind, LAST_LOG_FILE};
use std::fs;

#[test]
fn test_bounds_are_inclusive() {
    let mut run = TestRun::new(MemoryLog::new());
    let volts = DisplayMode::decimal("V");
    assert!(run.check("Vout", 3.0, 3.0, 3.6, &volts));
    assert!(run.check("Vout", 3.6, 3.0, 3.6, &volts));
    assert!(!run.check("Vout", 3.6000001, 3.0, 3.6, &volts));
    assert!(!run.check("Vout", f64::NAN, 3.0, 3.6, &volts));
    assert_eq!(run.error_count(), 2);
}

#[test]
fn test_error_counter_is_monotonic() {
    let mut run = TestRun::new(MemoryLog::new());
    let volts = DisplayMode::default();
    let mut last = 0;
    for value in [1.0, 5.0, 2.0, -1.0, 2.5] {
        run.check("V", value, 0.0, 3.0, &volts);
        assert!(run.error_count() >= last);
        last = run.error_count();
    }
    assert_eq!(last, 2);
    assert!(!run.passed());
}

#[test]
fn test_record_text() {
    let mut run = TestRun::new(MemoryLog::new());
    run.check("Vout", 3.3, 3.2, 3.4, &DisplayMode::decimal("V"));
    run.check("Iq", 0.01, 0.0, 0.005, &DisplayMode::decimal("A"));

    let log = run.into_log();
    assert_eq!(
        log.lines(RecordKind::Pass),
        vec!["Vout: 3.300000 V expected range from 3.200000 V to 3.400000 V. Test PASS !"]
    );
    assert_eq!(
        log.lines(RecordKind::Fail),
        vec!["Iq: 0.010000 A OUT OF LIMITS (0.000000 A, 0.005000 A). Test Failed !"]
    );
}

#[test]
fn test_hex_display() {
    let mut run = TestRun::new(MemoryLog::new());
    run.check("STATUS", 255.0, 0.0, 127.0, &DisplayMode::Hex);
    assert_eq!(
        run.log().lines(RecordKind::Fail),
        vec!["STATUS: 0xFF OUT OF LIMITS (0x0, 0x7F). Test Failed !"]
    );
}

#[test]
fn test_check_reading_and_limit() {
    let mut run = TestRun::new(MemoryLog::new());
    let limit = LimitSpec {
        name: "Vref".to_string(),
        min: 2.49,
        max: 2.51,
        unit: "V".to_string(),
    };
    assert!(run.check_limit(&limit, 2.5));
    assert!(!run.check_reading("Vref", &Reading::block(2.6), limit.min, limit.max, &limit.display()));
    assert_eq!(run.error_count(), 1);
}

#[test]
fn test_file_log_numbering_and_history() {
    let dir = tempfile::tempdir().unwrap();

    let first = FileLog::open_next(dir.path(), "board", ".log").unwrap();
    assert_eq!(first.path().file_name().unwrap(), "BOARD_0000.log");
    first.close().unwrap();

    let second = FileLog::open_next(dir.path(), "board", ".log").unwrap();
    assert_eq!(second.path().file_name().unwrap(), "BOARD_0001.log");
    second.close().unwrap();

    let history = fs::read_to_string(dir.path().join(LAST_LOG_FILE)).unwrap();
    assert_eq!(history.lines().collect::<Vec<_>>(), vec!["BOARD_0000.log", "BOARD_0001.log"]);
}

#[test]
fn test_next_name_continues_custom_prefix() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(LAST_LOG_FILE), "SN1234_0041.txt\n").unwrap();
    fs::write(dir.path().join("SN1234_0042.txt"), "taken").unwrap();

    assert_eq!(
        next_log_name(dir.path(), "board", ".txt").unwrap(),
        "SN1234_0043.txt"
    );
}

#[test]
fn test_file_log_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.log");

    let mut run = TestRun::new(FileLog::create(&path).unwrap());
    run.check("Vout", 3.3, 3.2, 3.4, &DisplayMode::decimal("V"));
    run.check("Vout", 4.0, 3.2, 3.4, &DisplayMode::decimal("V"));
    run.into_log().close().unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("# opened "));
    assert_eq!(lines[1], "    Vout: 3.300000 V expected range from 3.200000 V to 3.400000 V. Test PASS !");
    assert_eq!(
        lines[2],
        "**** Error: Vout: 4.000000 V OUT OF LIMITS (3.200000 V, 3.400000 V). Test Failed !"
    );
}
