//! Bench configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/scpi_bench.toml` (or an explicit path)
//! 2. Environment variables prefixed with `SCPI_BENCH_`, nested keys separated
//!    by a double underscore, e.g. `SCPI_BENCH_APPLICATION__LOG_LEVEL=debug`.
//!
//! # Example
//! ```no_run
//! use scpi_bench::config::BenchConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BenchConfig::load()?;
//! config.validate()?;
//! for instrument in config.enabled_instruments() {
//!     println!("{} -> {}", instrument.id, instrument.resource);
//! }
//! # Ok(())
//! # }
//! ```

use crate::acquisition::PollSettings;
use crate::addressing::{AddressingScheme, CardType, FlatBankScheme, SlotRelativeScheme};
use crate::error::{BenchError, BenchResult};
use crate::family::InstrumentFamily;
use crate::limits::LimitSpec;
use crate::logging::{parse_log_level, LogFormat};
use crate::transport::TransportKind;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/scpi_bench.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SCPI_BENCH_";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Application name and logging.
    pub application: ApplicationConfig,
    /// Delays and timeouts.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Instruments on the bench.
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
    /// Named pass windows for `check`.
    #[serde(default)]
    pub limits: Vec<LimitSpec>,
}

/// Application-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Shown in logs and used as the test report prefix.
    pub name: String,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Console output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Delays and timeouts shared by every instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Wait after `*RST` before the instrument accepts commands.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Sleep between sample-counter polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-query reply timeout.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Overall wait for an overlapped acquisition, beyond its nominal duration.
    #[serde(default = "default_acquisition_margin_ms")]
    pub acquisition_margin_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            acquisition_margin_ms: default_acquisition_margin_ms(),
        }
    }
}

impl TimingConfig {
    /// Post-reset settle time.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Poll settings for an acquisition expected to last `nominal`.
    pub fn poll_settings(&self, nominal: Duration) -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: nominal + Duration::from_millis(self.acquisition_margin_ms),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
        }
    }
}

/// One instrument on the bench.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Unique identifier used on the command line.
    pub id: String,
    /// Selects parameter table, dialect and addressing.
    pub family: InstrumentFamily,
    /// `host:port` for TCP, `port@baud` for serial.
    pub resource: String,
    /// How the resource string is opened.
    #[serde(default)]
    pub transport: TransportKind,
    /// Disabled instruments stay in the file but are skipped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Connect / query timeout for this instrument.
    #[serde(default = "default_query_timeout_ms")]
    pub timeout_ms: u64,
    /// Override the highest single channel of a flat bank.
    #[serde(default)]
    pub bank_single_max: Option<u32>,
    /// Override the highest range endpoint of a flat bank.
    #[serde(default)]
    pub bank_range_max: Option<u32>,
    /// Card models per slot (e.g. `["3720", "Empty Slot", ...]`), skipping discovery.
    #[serde(default)]
    pub slots: Option<Vec<String>>,
}

impl InstrumentConfig {
    /// Per-instrument query timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Addressing scheme for this instrument, with configured overrides applied.
    pub fn scheme(&self) -> BenchResult<Box<dyn AddressingScheme>> {
        if let Some(slots) = &self.slots {
            let scheme = SlotRelativeScheme::from_idns(slots.iter().map(String::as_str))?;
            return Ok(Box::new(scheme));
        }
        if !self.family.has_flat_bank() {
            return Ok(self.family.default_scheme());
        }
        let base = FlatBankScheme::agilent_34972();
        Ok(Box::new(FlatBankScheme::with_bounds(
            base.min,
            self.bank_single_max.unwrap_or(base.single_max),
            self.bank_range_max.unwrap_or(base.range_max),
        )))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_query_timeout_ms() -> u64 {
    2000
}

fn default_acquisition_margin_ms() -> u64 {
    5000
}

fn default_enabled() -> bool {
    true
}

impl BenchConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// Provider chain, exposed so callers can merge extra layers.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> BenchResult<()> {
        parse_log_level(&self.application.log_level)?;

        let timing = &self.timing;
        if timing.poll_interval_ms == 0 {
            return Err(invalid("timing.poll_interval_ms must be positive"));
        }
        if timing.query_timeout_ms == 0 {
            return Err(invalid("timing.query_timeout_ms must be positive"));
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if !ids.insert(instrument.id.as_str()) {
                return Err(invalid(&format!("duplicate instrument id '{}'", instrument.id)));
            }
            if instrument.timeout_ms == 0 {
                return Err(invalid(&format!(
                    "instrument '{}': timeout_ms must be positive",
                    instrument.id
                )));
            }
            if instrument.resource.trim().is_empty() && instrument.transport != TransportKind::Mock {
                return Err(invalid(&format!(
                    "instrument '{}': resource is empty",
                    instrument.id
                )));
            }
            if (instrument.bank_single_max.is_some() || instrument.bank_range_max.is_some())
                && !instrument.family.has_flat_bank()
            {
                return Err(invalid(&format!(
                    "instrument '{}': family {} has no channel bank to override",
                    instrument.id, instrument.family
                )));
            }
            if let Some(slots) = &instrument.slots {
                if !instrument.family.has_slots() {
                    return Err(invalid(&format!(
                        "instrument '{}': family {} has no card slots",
                        instrument.id, instrument.family
                    )));
                }
                if slots.iter().any(|model| matches!(CardType::from_model(model), CardType::Unsupported(_))) {
                    // Unsupported cards are legal; their channels are simply rejected.
                    tracing::warn!(instrument = %instrument.id, "slot list contains unsupported cards");
                }
            }
            instrument.scheme()?;
        }

        let mut names = HashSet::new();
        for limit in &self.limits {
            if !names.insert(limit.name.as_str()) {
                return Err(invalid(&format!("duplicate limit '{}'", limit.name)));
            }
            if !(limit.min.is_finite() && limit.max.is_finite()) || limit.min > limit.max {
                return Err(invalid(&format!(
                    "limit '{}': min {} / max {} is not a valid window",
                    limit.name, limit.min, limit.max
                )));
            }
        }

        Ok(())
    }

    /// Instruments with `enabled = true`.
    pub fn enabled_instruments(&self) -> Vec<&InstrumentConfig> {
        self.instruments.iter().filter(|inst| inst.enabled).collect()
    }

    /// Instrument with the given id.
    pub fn instrument(&self, id: &str) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|inst| inst.id == id)
    }

    /// Limit with the given name.
    pub fn limit(&self, name: &str) -> Option<&LimitSpec> {
        self.limits.iter().find(|limit| limit.name == name)
    }
}

fn invalid(message: &str) -> BenchError {
    BenchError::Configuration(message.to_string())
}
