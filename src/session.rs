//! Instrument sessions.
//!
//! An [`InstrumentSession`] exclusively owns the transport to one physical
//! instrument together with everything needed to talk to it: the family's
//! parameter table, its dialect and the active addressing scheme. All
//! operations take `&mut self`, so commands on one handle are strictly
//! ordered. Callers that share a session across threads wrap it in a mutex.
//!
//! Validation always happens before the first byte is written. A method that
//! returns a validation error has not touched the instrument.

use crate::acquisition::{AcquisitionOutcome, OverlappedJob, PollSettings};
use crate::addressing::{AddressingScheme, CardType, SlotRelativeScheme, SLOT_COUNT};
use crate::channel_list::ChannelList;
use crate::command::{Command, CommandBuilder, Dialect, RouteAction};
use crate::config::{InstrumentConfig, TimingConfig};
use crate::decode::{decode_scalar, Reading};
use crate::error::{AcquisitionError, BenchError, BenchResult};
use crate::family::InstrumentFamily;
use crate::parameters::{IntegrationSetting, ParameterTable, RangeSetting};
use crate::timer::{SystemTimer, Timer};
use crate::transport::{self, Transport};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default wait after a reset.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Default per-query reply timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Exclusive handle to one instrument.
pub struct InstrumentSession<T = Box<dyn Transport>, C = SystemTimer>
where
    T: Transport,
    C: Timer,
{
    id: String,
    family: InstrumentFamily,
    transport: T,
    timer: C,
    scheme: Box<dyn AddressingScheme>,
    table: ParameterTable,
    dialect: Dialect,
    settle: Duration,
    query_timeout: Duration,
    opened: bool,
}

impl<T: Transport, C: Timer> std::fmt::Debug for InstrumentSession<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("id", &self.id)
            .field("family", &self.family)
            .field("scheme", &self.scheme)
            .field("dialect", &self.dialect)
            .field("opened", &self.opened)
            .finish_non_exhaustive()
    }
}

impl InstrumentSession {
    /// Open the configured transport and build a session for `config`.
    ///
    /// The instrument is not reset; call [`open`](Self::open) for that.
    pub fn connect(config: &InstrumentConfig, timing: &TimingConfig) -> BenchResult<Self> {
        let transport = transport::open(config.transport, &config.resource, config.timeout())?;
        let session = InstrumentSession::new(&config.id, config.family, transport, SystemTimer::new())
            .with_scheme(config.scheme()?)
            .with_settle(timing.settle())
            .with_query_timeout(config.timeout());
        Ok(session)
    }
}

impl<T: Transport, C: Timer> InstrumentSession<T, C> {
    /// Session with the family's built-in table, dialect and addressing.
    pub fn new(id: &str, family: InstrumentFamily, transport: T, timer: C) -> Self {
        Self {
            id: id.to_string(),
            family,
            transport,
            timer,
            scheme: family.default_scheme(),
            table: family.parameter_table(),
            dialect: family.dialect(),
            settle: DEFAULT_SETTLE,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            opened: false,
        }
    }

    /// Replace the addressing scheme, e.g. after slot discovery.
    pub fn with_scheme(mut self, scheme: Box<dyn AddressingScheme>) -> Self {
        self.scheme = scheme;
        self
    }

    /// Replace the function table.
    pub fn with_table(mut self, table: ParameterTable) -> Self {
        self.table = table;
        self
    }

    /// Wait after each reset.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Timeout for every query reply.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Instrument id from configuration.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Instrument family.
    pub fn family(&self) -> InstrumentFamily {
        self.family
    }

    /// Whether [`open`](Self::open) has run.
    pub fn is_open(&self) -> bool {
        self.opened
    }

    /// Active addressing scheme.
    pub fn scheme(&self) -> &dyn AddressingScheme {
        self.scheme.as_ref()
    }

    /// Active function table.
    pub fn table(&self) -> &ParameterTable {
        &self.table
    }

    /// Timer used for settle delays and polling.
    pub fn timer(&self) -> &C {
        &self.timer
    }

    /// Command builder bound to this session's scheme, table and dialect.
    pub fn builder(&self) -> CommandBuilder<'_> {
        CommandBuilder::new(self.scheme.as_ref(), &self.table, self.dialect)
    }

    /// Parse `channels` against the active addressing scheme.
    pub fn channels(&self, channels: &str) -> BenchResult<ChannelList> {
        self.builder().channels(channels)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bring the instrument to its default state. A second call is a no-op.
    #[instrument(skip(self), fields(id = %self.id))]
    pub fn open(&mut self) -> BenchResult<()> {
        if self.opened {
            return Ok(());
        }
        self.reset()?;
        if self.dialect == Dialect::Tsp {
            self.write(&Command::new("beeper.enable = beeper.ON"))?;
            self.write(&Command::new("beeper.beep(0.1, 4800)"))?;
        }
        self.opened = true;
        info!(family = %self.family, "instrument opened");
        Ok(())
    }

    /// `*RST`, then wait for the configured settle time.
    pub fn reset(&mut self) -> BenchResult<()> {
        self.write(&Command::new("*RST"))?;
        self.timer.sleep(self.settle);
        Ok(())
    }

    /// `*IDN?` reply, trimmed.
    pub fn identify(&mut self) -> BenchResult<String> {
        let reply = self.query(&Command::new("*IDN?"))?;
        Ok(String::from_utf8_lossy(&reply).trim().to_string())
    }

    /// Reset the instrument and release the transport. Idempotent.
    pub fn close(&mut self) -> BenchResult<()> {
        if !self.opened {
            return Ok(());
        }
        self.write(&Command::new("*RST"))?;
        self.transport.close()?;
        self.opened = false;
        info!(id = %self.id, "instrument closed");
        Ok(())
    }

    /// Give the transport back without closing it.
    pub fn into_transport(self) -> T {
        self.transport
    }

    // =========================================================================
    // Switching and configuration
    // =========================================================================

    /// Close (`true`) or open (`false`) one relay.
    pub fn control_switch(&mut self, channel: u32, close: bool) -> BenchResult<()> {
        let command = self.route_command(channel, close)?;
        self.write(&command)
    }

    /// Configure a scan group.
    pub fn configure_scan(
        &mut self,
        channels: &str,
        function: &str,
        range: RangeSetting,
        integration: IntegrationSetting,
    ) -> BenchResult<()> {
        let commands = self
            .builder()
            .build_scan_command(channels, function, range, integration)?;
        self.write_all(&commands)
    }

    /// Configure the multimeter front end.
    pub fn configure_dmm(
        &mut self,
        function: &str,
        range: RangeSetting,
        integration: IntegrationSetting,
        autozero: Option<bool>,
    ) -> BenchResult<()> {
        let commands = self
            .builder()
            .build_dmm_config(function, range, integration, autozero)?;
        self.write_all(&commands)
    }

    /// Set the AC bandwidth for `channels` to suit signals down to `hz`.
    pub fn config_ac_filter(&mut self, channels: &str, hz: f64) -> BenchResult<()> {
        let command = self.builder().build_ac_filter(channels, hz)?;
        self.write(&command)
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// One immediate reading with the current configuration.
    pub fn read(&mut self) -> BenchResult<Reading> {
        let command = self.builder().build_read();
        let reply = self.query(&command)?;
        let value = decode_scalar(&String::from_utf8_lossy(&reply))?;
        debug!(id = %self.id, value, "reading");
        Ok(Reading::scalar(value))
    }

    /// Close `channel`, wait `delay`, read, and open it again.
    ///
    /// The relay is reopened even if the reading fails.
    pub fn read_switch(&mut self, channel: u32, delay: Duration) -> BenchResult<Reading> {
        let close = self.route_command(channel, true)?;
        let open = self.route_command(channel, false)?;

        self.write(&close)?;
        if !delay.is_zero() {
            self.timer.sleep(delay);
        }
        let reading = self.read();
        let reopened = self.write(&open);
        if let (Err(err), Err(_)) = (&reopened, &reading) {
            warn!(id = %self.id, channel, error = %err, "failed to reopen relay after a failed read");
        }
        let reading = reading?;
        reopened?;
        Ok(reading)
    }

    /// Arm one bus-triggered sample and wait for it.
    ///
    /// Returns `None` when the sample did not arrive within `settings.timeout`.
    pub fn read_triggered(&mut self, settings: &PollSettings) -> BenchResult<Option<Reading>> {
        self.require_sample_buffer()?;
        let job = OverlappedJob::start_single(&mut self.transport)?;
        let outcome = job.wait_done(&mut self.transport, &self.timer, settings)?;
        Ok(outcome.readings().first().copied())
    }

    /// Arm buffered sampling of `total_s` seconds at `period_s` spacing.
    #[instrument(skip(self), fields(id = %self.id))]
    pub fn start_overlapped(&mut self, period_s: f64, total_s: f64) -> BenchResult<OverlappedJob> {
        self.require_sample_buffer()?;
        let job = OverlappedJob::start(period_s, total_s, &mut self.transport)?;
        info!(expected = job.expected_count(), "overlapped acquisition armed");
        Ok(job)
    }

    /// Bus-triggered buffered sampling is a SCPI DMM feature; TSP mainframes lack it.
    fn require_sample_buffer(&self) -> BenchResult<()> {
        if self.dialect == Dialect::Tsp {
            return Err(AcquisitionError::Unsupported {
                family: self.family.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Wait for an armed acquisition and drain its samples.
    pub fn wait_overlapped_done(
        &mut self,
        job: OverlappedJob,
        settings: &PollSettings,
    ) -> BenchResult<AcquisitionOutcome> {
        let outcome = job.wait_done(&mut self.transport, &self.timer, settings)?;
        match &outcome {
            AcquisitionOutcome::Complete(readings) => {
                info!(id = %self.id, samples = readings.len(), "overlapped acquisition complete")
            }
            AcquisitionOutcome::TimedOut {
                expected,
                last_count,
                ..
            } => warn!(id = %self.id, expected, last_count, "overlapped acquisition timed out"),
        }
        Ok(outcome)
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Identify the card in every slot and switch to slot-relative addressing.
    pub fn discover_slots(&mut self) -> BenchResult<Vec<CardType>> {
        if !self.family.has_slots() {
            return Err(BenchError::InvalidArgument(format!(
                "family {} has no card slots",
                self.family
            )));
        }
        let mut idns = Vec::with_capacity(SLOT_COUNT);
        for slot in 1..=SLOT_COUNT {
            let reply = self.query(&Command::new(format!("print(slot[{}].idn)", slot)))?;
            idns.push(String::from_utf8_lossy(&reply).trim().to_string());
        }
        let scheme = SlotRelativeScheme::from_idns(idns.iter().map(String::as_str))?;
        let cards = scheme.slots().to_vec();
        info!(id = %self.id, ?cards, "slots discovered");
        self.scheme = Box::new(scheme);
        Ok(cards)
    }

    // =========================================================================
    // Wire helpers
    // =========================================================================

    fn route_command(&self, channel: u32, close: bool) -> BenchResult<Command> {
        let list = ChannelList::single(channel, self.scheme.as_ref())?;
        let action = if close { RouteAction::Close } else { RouteAction::Open };
        self.builder().build_route(&list.to_canonical(), action)
    }

    /// Send one command that has no reply.
    pub fn write(&mut self, command: &Command) -> BenchResult<()> {
        debug!(id = %self.id, command = %command, "write");
        self.transport.write(command.as_bytes())?;
        Ok(())
    }

    fn write_all(&mut self, commands: &[Command]) -> BenchResult<()> {
        commands.iter().try_for_each(|command| self.write(command))
    }

    /// Send a query and return the raw reply.
    pub fn query(&mut self, command: &Command) -> BenchResult<Vec<u8>> {
        debug!(id = %self.id, command = %command, "query");
        let reply = self.transport.query(command.as_bytes(), self.query_timeout)?;
        Ok(reply)
    }
}
