//! CLI entry point for scpi_bench.
//!
//! Offline helpers (channel-list checks, command preview, reply decoding,
//! a simulated overlapped acquisition) plus `acquire` and `check`, which talk
//! to instruments and limits declared in the configuration file.
//!
//! # Usage
//!
//! ```bash
//! scpi_bench channels "101,201:205" --family 34972a
//! scpi_bench channels "1001:1005" --family 3706a --slots 3720
//! scpi_bench command "101:105" VOLT:DC --range 10 --nplc 1
//! scpi_bench decode --block "#16+1.234"
//! scpi_bench acquire dmm --period 0.5 --total 5
//! scpi_bench simulate --period 1 --total 5
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scpi_bench::acquisition::{AcquisitionOutcome, OverlappedJob, PollSettings};
use scpi_bench::addressing::{AddressingScheme, SlotRelativeScheme, SLOT_COUNT};
use scpi_bench::channel_list::{self, ChannelList};
use scpi_bench::command::CommandBuilder;
use scpi_bench::config::{BenchConfig, DEFAULT_CONFIG_PATH};
use scpi_bench::decode::{decode_block, decode_scalar};
use scpi_bench::limits::TestRun;
use scpi_bench::logging::{self, LoggingConfig};
use scpi_bench::testlog::{FileLog, TracingLog};
use scpi_bench::timer::{ManualTimer, Timer};
use scpi_bench::transport::MockTransport;
use scpi_bench::{InstrumentFamily, InstrumentSession};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "scpi_bench")]
#[command(about = "Drive SCPI lab instruments from the command line", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a channel list and print its wire form
    Channels {
        list: String,
        #[arg(long, default_value = "34972a")]
        family: InstrumentFamily,
        /// Card model per slot for slot-relative families, e.g. `3720,3721`
        #[arg(long, value_delimiter = ',')]
        slots: Vec<String>,
    },

    /// Print the commands that configure a scan group
    Command {
        list: String,
        function: String,
        /// Fixed range; autorange when omitted
        #[arg(long)]
        range: Option<f64>,
        /// Integration time in power-line cycles
        #[arg(long)]
        nplc: Option<f64>,
        #[arg(long, default_value = "34972a")]
        family: InstrumentFamily,
        /// Card model per slot for slot-relative families, e.g. `3720,3721`
        #[arg(long, value_delimiter = ',')]
        slots: Vec<String>,
    },

    /// Decode an instrument reply
    Decode {
        reply: String,
        /// Treat the reply as a definite-length block
        #[arg(long)]
        block: bool,
    },

    /// Run an overlapped acquisition on a configured instrument
    Acquire {
        /// Instrument id from the configuration file
        id: String,
        /// Sampling period in seconds
        #[arg(long)]
        period: f64,
        /// Total acquisition time in seconds
        #[arg(long)]
        total: f64,
        /// Overall wait in seconds (defaults to total plus the configured margin)
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Run an overlapped acquisition against a simulated instrument
    Simulate {
        #[arg(long, default_value_t = 1.0)]
        period: f64,
        #[arg(long, default_value_t = 5.0)]
        total: f64,
        /// Timeout in seconds
        #[arg(long, default_value_t = 10.0)]
        timeout: f64,
    },

    /// Check a value against a configured limit
    Check {
        /// Limit name from the configuration file
        limit: String,
        value: f64,
        /// Write a numbered report into this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = BenchConfig::load_from(&cli.config);
    match &loaded {
        Ok(config) => logging::init_from_config(config)?,
        Err(_) => logging::init(LoggingConfig::default())?,
    }
    let path = cli.config.clone();
    let config = move || -> Result<BenchConfig> {
        let config = loaded.with_context(|| format!("loading {}", path.display()))?;
        config.validate()?;
        Ok(config)
    };

    match cli.command {
        Commands::Channels {
            list,
            family,
            slots,
        } => channels(&list, family, &slots),
        Commands::Command {
            list,
            function,
            range,
            nplc,
            family,
            slots,
        } => command(&list, &function, range, nplc, family, &slots),
        Commands::Decode { reply, block } => decode(&reply, block),
        Commands::Acquire {
            id,
            period,
            total,
            timeout,
        } => acquire(&config()?, &id, period, total, timeout),
        Commands::Simulate {
            period,
            total,
            timeout,
        } => simulate(period, total, timeout),
        Commands::Check {
            limit,
            value,
            log_dir,
        } => check(&config()?, &limit, value, log_dir),
    }
}

/// Family default addressing, or slot-relative addressing built from `slots`.
fn scheme_for(family: InstrumentFamily, slots: &[String]) -> Result<Box<dyn AddressingScheme>> {
    if slots.is_empty() {
        return Ok(family.default_scheme());
    }
    if !family.has_slots() {
        bail!("family {} has no card slots", family);
    }
    if slots.len() > SLOT_COUNT {
        bail!("at most {} slots, got {}", SLOT_COUNT, slots.len());
    }
    let mut models: Vec<&str> = slots.iter().map(String::as_str).collect();
    models.resize(SLOT_COUNT, "Empty Slot");
    Ok(Box::new(SlotRelativeScheme::from_idns(models)?))
}

fn channels(list: &str, family: InstrumentFamily, slots: &[String]) -> Result<()> {
    let scheme = scheme_for(family, slots)?;
    let parsed = scheme_parse(list, scheme.as_ref())?;
    println!("{}", scheme.format(&parsed));
    println!("{} channel(s): {:?}", parsed.channel_count(), parsed.channels().collect::<Vec<_>>());
    Ok(())
}

fn scheme_parse(list: &str, scheme: &dyn AddressingScheme) -> Result<ChannelList> {
    channel_list::parse(list, scheme)
        .with_context(|| format!("channel list '{}' rejected by {} addressing", list, scheme.name()))
}

fn command(
    list: &str,
    function: &str,
    range: Option<f64>,
    nplc: Option<f64>,
    family: InstrumentFamily,
    slots: &[String],
) -> Result<()> {
    let scheme = scheme_for(family, slots)?;
    let table = family.parameter_table();
    let builder = CommandBuilder::new(scheme.as_ref(), &table, family.dialect());
    let commands = builder.build_scan_command(list, function, range.into(), nplc.into())?;
    for command in commands {
        println!("{}", command);
    }
    Ok(())
}

fn decode(reply: &str, block: bool) -> Result<()> {
    let value = if block {
        decode_block(reply.as_bytes())?
    } else {
        decode_scalar(reply)?
    };
    println!("{}", value);
    Ok(())
}

fn acquire(config: &BenchConfig, id: &str, period: f64, total: f64, timeout: Option<f64>) -> Result<()> {
    let instrument = config
        .instrument(id)
        .with_context(|| format!("no instrument '{}' in configuration", id))?;
    if !instrument.enabled {
        bail!("instrument '{}' is disabled", id);
    }

    let mut session = InstrumentSession::connect(instrument, &config.timing)
        .with_context(|| format!("connecting to '{}' at {}", id, instrument.resource))?;
    session.open()?;
    info!(idn = %session.identify()?, "connected");

    let job = session.start_overlapped(period, total)?;
    let nominal = Duration::try_from_secs_f64(job.total_s()).context("invalid --total")?;
    let mut settings = config.timing.poll_settings(nominal);
    if let Some(timeout) = timeout {
        settings.timeout = Duration::try_from_secs_f64(timeout).context("invalid --timeout")?;
    }
    let outcome = session.wait_overlapped_done(job, &settings);
    session.close()?;
    report(outcome?)
}

fn simulate(period: f64, total: f64, timeout: f64) -> Result<()> {
    let job = OverlappedJob::new(period, total)?;
    let expected = job.expected_count();

    // The simulated counter advances by half the run per poll.
    let mock = MockTransport::new();
    let step = (expected / 2).max(1);
    let mut count = 0;
    while count < expected {
        mock.push_reply("DATA:POIN?", format!("{}\n", count));
        count += step;
    }
    mock.set_reply("DATA:POIN?", format!("{}\n", expected));
    for index in 0..expected {
        let value = format!("{:+.6E}", (f64::from(index) * period).sin());
        mock.push_reply("R? 1", format!("#{}{}{}\n", value.len().to_string().len(), value.len(), value));
    }

    let timer = ManualTimer::new();
    let settings = PollSettings {
        poll_interval: Duration::from_secs_f64(period.clamp(0.001, 1.0)),
        timeout: Duration::try_from_secs_f64(timeout).context("invalid --timeout")?,
        query_timeout: Duration::from_secs(1),
    };
    let mut session = InstrumentSession::new("sim", InstrumentFamily::Agilent34411, mock, &timer);
    let job = session.start_overlapped(period, total)?;
    let outcome = session.wait_overlapped_done(job, &settings)?;
    println!("simulated wait: {:?} over {} poll(s)", timer.now(), timer.sleeps().len() + 1);
    report(outcome)
}

fn report(outcome: AcquisitionOutcome) -> Result<()> {
    match outcome {
        AcquisitionOutcome::Complete(readings) => {
            for (index, reading) in readings.iter().enumerate() {
                println!("{:>5}  {}", index, reading);
            }
            Ok(())
        }
        AcquisitionOutcome::TimedOut {
            expected,
            last_count,
            elapsed,
        } => bail!(
            "timed out after {:?} with {} of {} samples buffered",
            elapsed,
            last_count,
            expected
        ),
    }
}

fn check(config: &BenchConfig, name: &str, value: f64, log_dir: Option<PathBuf>) -> Result<()> {
    let limit = config
        .limit(name)
        .with_context(|| format!("no limit '{}' in configuration", name))?;

    let passed = match log_dir {
        Some(dir) => {
            let log = FileLog::open_next(&dir, &config.application.name.replace(' ', "_"), ".log")
                .with_context(|| format!("opening test log in {}", dir.display()))?;
            println!("logging to {}", log.path().display());
            let mut run = TestRun::new(log);
            let passed = run.check_limit(limit, value);
            run.into_log().close().context("writing test log")?;
            passed
        }
        None => TestRun::new(TracingLog).check_limit(limit, value),
    };

    if passed {
        println!("PASS");
        Ok(())
    } else {
        warn!(limit = name, value, "limit check failed");
        bail!("{} out of limits", name)
    }
}
