//! Command synthesis.
//!
//! [`CommandBuilder`] combines a validated channel list with validated
//! function parameters into protocol command strings. All validation runs
//! before the first command is produced, so a builder call either returns the
//! complete command sequence or an error and nothing else.
//!
//! Two wire dialects share the same validation path:
//!
//! | Operation      | [`Dialect::Scpi`]                       | [`Dialect::Tsp`]                                        |
//! |----------------|-----------------------------------------|---------------------------------------------------------|
//! | scan configure | `CONF:VOLT:DC 10,(@101:105)`            | `channel.setdmm("1001:1005", dmm.ATTR_MEAS_FUNCTION, "dcvolts")` |
//! | integration    | `VOLT:DC:NPLC 1`                        | `channel.setdmm("1001:1005", dmm.ATTR_MEAS_NPLC, 1)`     |
//! | route          | `ROUT:CLOS (@101)`                      | `channel.close("1001")`                                  |
//! | read           | `READ?`                                 | `print(dmm.measure())`                                   |

use crate::addressing::AddressingScheme;
use crate::channel_list::ChannelList;
use crate::error::{BenchError, BenchResult, ParameterError};
use crate::parameters::{IntegrationSetting, ParameterTable, RangeCheck, RangeSetting};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest AC filter frequency, in Hz, the instruments accept.
pub const MIN_AC_FILTER_HZ: f64 = 3.0;

/// One protocol command, without terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// Wrap raw command text.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Command text without terminator.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Command text as bytes for the transport.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Take the command text.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether the instrument answers this command.
    pub fn is_query(&self) -> bool {
        self.0.contains('?') || self.0.starts_with("print(")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Command {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Command language spoken by an instrument family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Classic SCPI tree commands.
    #[default]
    Scpi,
    /// Keithley Test Script Processor (Lua) commands.
    Tsp,
}

/// Relay action for [`CommandBuilder::build_route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// Close the relay.
    Close,
    /// Open the relay.
    Open,
}

/// Builds validated command sequences for one instrument.
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder<'a> {
    scheme: &'a dyn AddressingScheme,
    table: &'a ParameterTable,
    dialect: Dialect,
}

impl<'a> CommandBuilder<'a> {
    /// Builder validating against `scheme` and `table`, emitting `dialect` syntax.
    pub fn new(scheme: &'a dyn AddressingScheme, table: &'a ParameterTable, dialect: Dialect) -> Self {
        Self {
            scheme,
            table,
            dialect,
        }
    }

    /// Dialect commands are emitted in.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Scheme channel lists are checked against.
    pub fn scheme(&self) -> &'a dyn AddressingScheme {
        self.scheme
    }

    /// Function table in use.
    pub fn table(&self) -> &'a ParameterTable {
        self.table
    }

    /// Parse `channels` against this builder's addressing scheme.
    pub fn channels(&self, channels: &str) -> BenchResult<ChannelList> {
        Ok(ChannelList::parse(channels, self.scheme)?)
    }

    /// Configure a scan group: one configure command, plus an integration-time
    /// command when the function has one.
    pub fn build_scan_command(
        &self,
        channels: &str,
        function: &str,
        range: RangeSetting,
        integration: IntegrationSetting,
    ) -> BenchResult<Vec<Command>> {
        let list = self.channels(channels)?;
        let spec = self.table.require(function)?;
        let range = self.table.check_range(function, range)?;
        let nplc = self.table.check_integration_time(function, integration)?;
        let list = self.scheme.format(&list);

        let mut commands = Vec::with_capacity(2);
        match self.dialect {
            Dialect::Scpi => {
                let configure = match (range, spec.range) {
                    (RangeCheck::Auto, _) => format!("CONF:{} AUTO,{}", spec.keyword(), list),
                    (RangeCheck::Value(value), _) => {
                        format!("CONF:{} {},{}", spec.keyword(), value, list)
                    }
                    // Digital inputs take no range argument at all.
                    (RangeCheck::NotApplicable, None) if spec.keyword().starts_with("DIG") => {
                        format!("CONF:{} {}", spec.keyword(), list)
                    }
                    (RangeCheck::NotApplicable, _) => {
                        format!("CONF:{} DEF,{}", spec.keyword(), list)
                    }
                };
                commands.push(Command::new(configure));
                if let Some(nplc) = nplc {
                    commands.push(Command::new(format!("{}:NPLC {}", spec.keyword(), nplc)));
                }
            }
            Dialect::Tsp => {
                commands.push(Command::new(format!(
                    "channel.setdmm({}, dmm.ATTR_MEAS_FUNCTION, \"{}\")",
                    list,
                    spec.keyword()
                )));
                match range {
                    RangeCheck::Auto => commands.push(Command::new(format!(
                        "channel.setdmm({}, dmm.ATTR_MEAS_AUTO_RANGE, dmm.ON)",
                        list
                    ))),
                    RangeCheck::Value(value) => commands.push(Command::new(format!(
                        "channel.setdmm({}, dmm.ATTR_MEAS_RANGE, {})",
                        list, value
                    ))),
                    RangeCheck::NotApplicable => {}
                }
                if let Some(nplc) = nplc {
                    commands.push(Command::new(format!(
                        "channel.setdmm({}, dmm.ATTR_MEAS_NPLC, {})",
                        list, nplc
                    )));
                }
            }
        }
        Ok(commands)
    }

    /// Configure the multimeter front end directly, without a scan list.
    ///
    /// `autozero` is only sent when given, and is rejected for functions
    /// without the capability.
    pub fn build_dmm_config(
        &self,
        function: &str,
        range: RangeSetting,
        integration: IntegrationSetting,
        autozero: Option<bool>,
    ) -> BenchResult<Vec<Command>> {
        let spec = self.table.require(function)?;
        let range = self.table.check_range(function, range)?;
        let nplc = self.table.check_integration_time(function, integration)?;
        let autozero = match autozero {
            Some(on) => Some(self.build_autozero(function, on)?),
            None => None,
        };

        let kw = spec.keyword();
        let mut commands = Vec::with_capacity(4);
        match self.dialect {
            Dialect::Scpi => {
                commands.push(Command::new(format!("FUNC \"{}\"", kw)));
                match range {
                    RangeCheck::Auto => commands.push(Command::new(format!("{}:RANGE:AUTO ON", kw))),
                    RangeCheck::Value(value) => {
                        commands.push(Command::new(format!("{}:RANGE {}", kw, value)))
                    }
                    RangeCheck::NotApplicable => {}
                }
                if let Some(nplc) = nplc {
                    commands.push(Command::new(format!("{}:NPLC {}", kw, nplc)));
                }
            }
            Dialect::Tsp => {
                commands.push(Command::new(format!("dmm.func = \"{}\"", kw)));
                match range {
                    RangeCheck::Auto => commands.push(Command::new("dmm.autorange = dmm.ON")),
                    RangeCheck::Value(value) => {
                        commands.push(Command::new(format!("dmm.range = {}", value)))
                    }
                    RangeCheck::NotApplicable => {}
                }
                if let Some(nplc) = nplc {
                    commands.push(Command::new(format!("dmm.nplc = {}", nplc)));
                }
            }
        }
        commands.extend(autozero);
        Ok(commands)
    }

    /// Enable or disable autozero for `function`.
    pub fn build_autozero(&self, function: &str, on: bool) -> BenchResult<Command> {
        let spec = self.table.check_autozero(function)?;
        let command = match self.dialect {
            Dialect::Scpi => format!("{}:ZERO:AUTO {}", spec.keyword(), u8::from(on)),
            Dialect::Tsp => format!(
                "dmm.autozero = {}",
                if on { "dmm.ON" } else { "dmm.OFF" }
            ),
        };
        Ok(Command::new(command))
    }

    /// Close or open the relays named by `channels`.
    pub fn build_route(&self, channels: &str, action: RouteAction) -> BenchResult<Command> {
        let list = self.scheme.format(&self.channels(channels)?);
        let command = match (self.dialect, action) {
            (Dialect::Scpi, RouteAction::Close) => format!("ROUT:CLOS {}", list),
            (Dialect::Scpi, RouteAction::Open) => format!("ROUT:OPEN {}", list),
            (Dialect::Tsp, RouteAction::Close) => format!("channel.close({})", list),
            (Dialect::Tsp, RouteAction::Open) => format!("channel.open({})", list),
        };
        Ok(Command::new(command))
    }

    /// Set the AC detector bandwidth to the lowest expected signal frequency.
    pub fn build_ac_filter(&self, channels: &str, hz: f64) -> BenchResult<Command> {
        let list = self.scheme.format(&self.channels(channels)?);
        if !hz.is_finite() {
            return Err(ParameterError::NotFinite {
                parameter: "AC filter",
                value: hz,
            }
            .into());
        }
        if hz < MIN_AC_FILTER_HZ {
            return Err(BenchError::InvalidArgument(format!(
                "AC filter frequency {} Hz is below {} Hz",
                hz, MIN_AC_FILTER_HZ
            )));
        }
        let command = match self.dialect {
            Dialect::Scpi => format!("SENS:VOLT:AC:BAND {},{}", hz, list),
            Dialect::Tsp => format!("channel.setdmm({}, dmm.ATTR_MEAS_DETECTBW, {})", list, hz),
        };
        Ok(Command::new(command))
    }

    /// Immediate single reading.
    pub fn build_read(&self) -> Command {
        match self.dialect {
            Dialect::Scpi => Command::new("READ?"),
            Dialect::Tsp => Command::new("print(dmm.measure())"),
        }
    }
}

/// Arm timer-paced buffered sampling of `count` points every `period_s` seconds.
pub fn build_arm_overlapped(period_s: f64, count: u32) -> Vec<Command> {
    vec![
        Command::new("TRIG:SOUR BUS"),
        Command::new(format!("SAMP:COUN {}", count)),
        Command::new("SAMP:SOUR TIM"),
        Command::new(format!("SAMP:TIM {}", period_s)),
        Command::new("INIT"),
        Command::new("*TRG"),
    ]
}

/// Arm a single bus-triggered sample.
pub fn build_arm_single() -> Vec<Command> {
    vec![
        Command::new("SAMP:COUN 1"),
        Command::new("TRIG:SOUR BUS"),
        Command::new("TRIG:COUN 1"),
        Command::new("INIT"),
        Command::new("*TRG"),
    ]
}

/// Sample-counter query.
pub fn poll_count_query() -> Command {
    Command::new("DATA:POIN?")
}

/// Remove and return the oldest buffered sample as a definite-length block.
pub fn fetch_one_query() -> Command {
    Command::new("R? 1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::{CardType, FlatBankScheme, SlotRelativeScheme};

    fn texts(commands: &[Command]) -> Vec<&str> {
        commands.iter().map(Command::as_str).collect()
    }

    #[test]
    fn test_scpi_scan_with_range_and_nplc() {
        let scheme = FlatBankScheme::new(101, 399);
        let table = ParameterTable::agilent_34972();
        let builder = CommandBuilder::new(&scheme, &table, Dialect::Scpi);

        let commands = builder
            .build_scan_command(
                "101:105",
                "volt:dc",
                RangeSetting::Value(10.0),
                IntegrationSetting::Nplc(1.0),
            )
            .unwrap();
        assert_eq!(
            texts(&commands),
            vec!["CONF:VOLT:DC 10,(@101:105)", "VOLT:DC:NPLC 1"]
        );
    }

    #[test]
    fn test_scpi_scan_auto_and_range_less() {
        let scheme = FlatBankScheme::new(101, 399);
        let table = ParameterTable::agilent_34972();
        let builder = CommandBuilder::new(&scheme, &table, Dialect::Scpi);

        let commands = builder
            .build_scan_command("101", "VOLT:AC", RangeSetting::Auto, IntegrationSetting::Default)
            .unwrap();
        assert_eq!(texts(&commands), vec!["CONF:VOLT:AC AUTO,(@101)"]);

        let commands = builder
            .build_scan_command("101", "FREQ", RangeSetting::Auto, IntegrationSetting::Default)
            .unwrap();
        assert_eq!(texts(&commands), vec!["CONF:FREQ DEF,(@101)"]);

        let commands = builder
            .build_scan_command("101", "DIG", RangeSetting::Auto, IntegrationSetting::Default)
            .unwrap();
        assert_eq!(texts(&commands), vec!["CONF:DIG:BYTE (@101)"]);
    }

    #[test]
    fn test_scan_validation_is_all_or_nothing() {
        let scheme = FlatBankScheme::new(101, 399);
        let table = ParameterTable::agilent_34972();
        let builder = CommandBuilder::new(&scheme, &table, Dialect::Scpi);

        let err = builder
            .build_scan_command(
                "101",
                "VOLT:DC",
                RangeSetting::Value(1000.0),
                IntegrationSetting::Default,
            )
            .unwrap_err();
        assert!(matches!(err, BenchError::Parameter(ParameterError::OutOfRange { .. })));

        let err = builder
            .build_scan_command("205:201", "VOLT:DC", RangeSetting::Auto, IntegrationSetting::Default)
            .unwrap_err();
        assert!(matches!(err, BenchError::ChannelList(_)));
    }

    #[test]
    fn test_tsp_scan() {
        let scheme = SlotRelativeScheme::new([
            CardType::Card3720,
            CardType::Empty,
            CardType::Empty,
            CardType::Empty,
            CardType::Empty,
            CardType::Empty,
        ]);
        let table = ParameterTable::keithley_3706();
        let builder = CommandBuilder::new(&scheme, &table, Dialect::Tsp);

        let commands = builder
            .build_scan_command("1001:1005", "DCVOLTS", RangeSetting::Auto, IntegrationSetting::Nplc(2.0))
            .unwrap();
        assert_eq!(
            texts(&commands),
            vec![
                "channel.setdmm(\"1001:1005\", dmm.ATTR_MEAS_FUNCTION, \"dcvolts\")",
                "channel.setdmm(\"1001:1005\", dmm.ATTR_MEAS_AUTO_RANGE, dmm.ON)",
                "channel.setdmm(\"1001:1005\", dmm.ATTR_MEAS_NPLC, 2)",
            ]
        );
        assert_eq!(
            builder.build_route("1001", RouteAction::Open).unwrap().as_str(),
            "channel.open(\"1001\")"
        );
        assert_eq!(builder.build_read().as_str(), "print(dmm.measure())");
    }

    #[test]
    fn test_dmm_config_with_autozero() {
        let scheme = FlatBankScheme::new(101, 399);
        let table = ParameterTable::agilent_34411();
        let builder = CommandBuilder::new(&scheme, &table, Dialect::Scpi);

        let commands = builder
            .build_dmm_config(
                "VOLT:DC",
                RangeSetting::Value(10.0),
                IntegrationSetting::Nplc(1.0),
                Some(true),
            )
            .unwrap();
        assert_eq!(
            texts(&commands),
            vec![
                "FUNC \"VOLT:DC\"",
                "VOLT:DC:RANGE 10",
                "VOLT:DC:NPLC 1",
                "VOLT:DC:ZERO:AUTO 1",
            ]
        );

        assert!(builder
            .build_dmm_config("FRES", RangeSetting::Auto, IntegrationSetting::Default, Some(false))
            .is_err());
    }

    #[test]
    fn test_route_and_ac_filter() {
        let scheme = FlatBankScheme::new(101, 399);
        let table = ParameterTable::agilent_34972();
        let builder = CommandBuilder::new(&scheme, &table, Dialect::Scpi);

        assert_eq!(
            builder.build_route("101,103", RouteAction::Close).unwrap().as_str(),
            "ROUT:CLOS (@101,103)"
        );
        assert_eq!(
            builder.build_ac_filter("201:205", 20.0).unwrap().as_str(),
            "SENS:VOLT:AC:BAND 20,(@201:205)"
        );
        assert!(matches!(
            builder.build_ac_filter("201", 2.5),
            Err(BenchError::InvalidArgument(_))
        ));
        assert!(builder.build_ac_filter("201", f64::NAN).is_err());
    }

    #[test]
    fn test_arm_sequences() {
        assert_eq!(
            texts(&build_arm_overlapped(0.5, 10)),
            vec!["TRIG:SOUR BUS", "SAMP:COUN 10", "SAMP:SOUR TIM", "SAMP:TIM 0.5", "INIT", "*TRG"]
        );
        assert_eq!(build_arm_single().len(), 5);
        assert!(poll_count_query().is_query());
        assert!(fetch_one_query().is_query());
        assert!(!Command::from("INIT").is_query());
    }
}
