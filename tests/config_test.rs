//! Configuration loading from files and the environment.

use scpi_bench::config::BenchConfig;
use scpi_bench::logging::LogFormat;
use scpi_bench::transport::TransportKind;
use scpi_bench::InstrumentFamily;
use std::path::Path;
use std::time::Duration;

#[test]
fn test_shipped_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/scpi_bench.toml");
    let config = BenchConfig::load_from(path).unwrap();
    config.validate().unwrap();

    let daq = config.instrument("daq").unwrap();
    assert_eq!(daq.family, InstrumentFamily::Agilent34972);
    assert_eq!(daq.transport, TransportKind::Tcp);

    let switch = config.instrument("switch").unwrap();
    assert!(!switch.enabled);
    let scheme = switch.scheme().unwrap();
    assert!(scheme.is_valid_channel(1001));
    assert!(!scheme.is_valid_channel(3001));

    assert!(config.enabled_instruments().iter().all(|i| i.enabled));
    assert!(config.limit("Vout").is_some());
}

#[test]
fn test_minimal_file_uses_defaults() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("bench.toml", "[application]\nname = \"Minimal\"\n")?;

        let config = BenchConfig::load_from("bench.toml")?;
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.application.log_format, LogFormat::Compact);
        assert!(config.instruments.is_empty());

        let settings = config.timing.poll_settings(Duration::from_secs(5));
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.query_timeout, Duration::from_secs(2));
        Ok(())
    });
}

#[test]
fn test_env_overrides_nested_keys() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "bench.toml",
            r#"
            [application]
            name = "Bench"
            log_format = "pretty"

            [timing]
            poll_interval_ms = 250
            "#,
        )?;
        jail.set_env("SCPI_BENCH_TIMING__POLL_INTERVAL_MS", "50");
        jail.set_env("SCPI_BENCH_APPLICATION__LOG_FORMAT", "json");

        let config = BenchConfig::load_from("bench.toml")?;
        assert_eq!(config.timing.poll_interval_ms, 50);
        assert_eq!(config.application.log_format, LogFormat::Json);
        Ok(())
    });
}

#[test]
fn test_missing_application_section_fails() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("bench.toml", "[timing]\nsettle_ms = 10\n")?;
        assert!(BenchConfig::load_from("bench.toml").is_err());
        Ok(())
    });
}

#[test]
fn test_unknown_family_rejected() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "bench.toml",
            r#"
            [application]
            name = "Bench"

            [[instruments]]
            id = "x"
            family = "hp3458"
            resource = "10.0.0.1:5025"
            "#,
        )?;
        assert!(BenchConfig::load_from("bench.toml").is_err());
        Ok(())
    });
}
