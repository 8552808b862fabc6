//! Per-function parameter legality tables.
//!
//! Each instrument family supports a different subset of {range, integration
//! time, autozero} per measurement function. A [`ParameterTable`] records that
//! subset explicitly, together with the policy applied when a caller supplies a
//! value for a capability the function lacks, so one validation routine serves
//! every family.
//!
//! Bounds are inclusive. The `Auto` / `Default` sentinels never take part in a
//! bound comparison.

use crate::error::ParameterError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Inclusive numeric window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl Bounds {
    /// Window `[min, max]`.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Inclusive membership. NaN is never contained.
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Requested measurement range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RangeSetting {
    /// Let the instrument autorange. Always accepted.
    #[default]
    Auto,
    /// Fixed range in SI units.
    Value(f64),
}

impl From<Option<f64>> for RangeSetting {
    fn from(value: Option<f64>) -> Self {
        value.map_or(RangeSetting::Auto, RangeSetting::Value)
    }
}

/// Requested integration time in power-line cycles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum IntegrationSetting {
    /// Use the family default. Always accepted.
    #[default]
    Default,
    /// Explicit NPLC.
    Nplc(f64),
}

impl From<Option<f64>> for IntegrationSetting {
    fn from(value: Option<f64>) -> Self {
        value.map_or(IntegrationSetting::Default, IntegrationSetting::Nplc)
    }
}

/// What to do with an explicit value for a capability the function does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedPolicy {
    /// Fail validation with [`ParameterError::Unsupported`].
    Reject,
    /// Drop the value with a warning.
    #[default]
    Ignore,
}

/// Legal parameters of one measurement function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Canonical function token, e.g. `VOLT:DC` or `dcvolts`.
    pub name: String,
    /// Keyword used in the configure command when it differs from `name`.
    #[serde(default)]
    pub keyword: Option<String>,
    /// Range window, `None` if the function has no range selection.
    #[serde(default)]
    pub range: Option<Bounds>,
    /// NPLC window, `None` if integration time is fixed.
    #[serde(default)]
    pub nplc: Option<Bounds>,
    /// Whether the function supports autozero control.
    #[serde(default)]
    pub autozero: bool,
}

impl FunctionSpec {
    /// Function with optional range and NPLC windows.
    pub fn new(name: &str, range: Option<Bounds>, nplc: Option<Bounds>) -> Self {
        Self {
            name: name.to_string(),
            keyword: None,
            range,
            nplc,
            autozero: false,
        }
    }

    /// Use `keyword` in configure commands instead of the name.
    pub fn with_keyword(mut self, keyword: &str) -> Self {
        self.keyword = Some(keyword.to_string());
        self
    }

    /// Mark the function as supporting autozero.
    pub fn with_autozero(mut self) -> Self {
        self.autozero = true;
        self
    }

    /// Configure-command keyword.
    pub fn keyword(&self) -> &str {
        self.keyword.as_deref().unwrap_or(&self.name)
    }
}

/// Outcome of a range check, telling the command builder what to emit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeCheck {
    /// Function supports ranges and the caller asked for autorange.
    Auto,
    /// Function supports ranges and the value is inside the window.
    Value(f64),
    /// Function has no range selection; emit the instrument default.
    NotApplicable,
}

/// Data-driven legality table for one instrument family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTable {
    /// Family label used in log output.
    pub family: String,
    /// Handling of explicit ranges for functions without range selection.
    #[serde(default)]
    pub range_policy: UnsupportedPolicy,
    /// Handling of explicit NPLC for functions with fixed integration time.
    #[serde(default)]
    pub nplc_policy: UnsupportedPolicy,
    /// NPLC sent for capable functions when the caller passes `Default`.
    #[serde(default)]
    pub default_nplc: Option<f64>,
    /// Functions the family supports.
    pub functions: Vec<FunctionSpec>,
}

impl ParameterTable {
    /// Case-insensitive lookup.
    pub fn lookup(&self, function: &str) -> Option<&FunctionSpec> {
        let function = function.trim();
        self.functions
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(function))
    }

    /// Like [`lookup`](Self::lookup) but unknown names are an error.
    pub fn require(&self, function: &str) -> Result<&FunctionSpec, ParameterError> {
        self.lookup(function)
            .ok_or_else(|| ParameterError::UnknownFunction(function.trim().to_string()))
    }

    /// Validate a range request for `function`.
    pub fn check_range(
        &self,
        function: &str,
        setting: RangeSetting,
    ) -> Result<RangeCheck, ParameterError> {
        let spec = self.require(function)?;
        match (setting, spec.range) {
            (RangeSetting::Auto, Some(_)) => Ok(RangeCheck::Auto),
            (RangeSetting::Auto, None) => Ok(RangeCheck::NotApplicable),
            (RangeSetting::Value(value), bounds) => {
                ensure_finite("range", value)?;
                match bounds {
                    Some(bounds) if bounds.contains(value) => Ok(RangeCheck::Value(value)),
                    Some(bounds) => Err(out_of_range(spec, "range", value, bounds)),
                    None => self
                        .unsupported(spec, "range", value, self.range_policy)
                        .map(|()| RangeCheck::NotApplicable),
                }
            }
        }
    }

    /// Validate an integration-time request for `function`.
    ///
    /// Returns the NPLC to send, or `None` when no integration-time command
    /// should be emitted.
    pub fn check_integration_time(
        &self,
        function: &str,
        setting: IntegrationSetting,
    ) -> Result<Option<f64>, ParameterError> {
        let spec = self.require(function)?;
        match (setting, spec.nplc) {
            (IntegrationSetting::Default, Some(_)) => Ok(self.default_nplc),
            (IntegrationSetting::Default, None) => Ok(None),
            (IntegrationSetting::Nplc(value), bounds) => {
                ensure_finite("NPLC", value)?;
                match bounds {
                    Some(bounds) if bounds.contains(value) => Ok(Some(value)),
                    Some(bounds) => Err(out_of_range(spec, "NPLC", value, bounds)),
                    None => self
                        .unsupported(spec, "NPLC", value, self.nplc_policy)
                        .map(|()| None),
                }
            }
        }
    }

    /// Whether `function` accepts autozero control. Unknown names are an error.
    pub fn check_autozero(&self, function: &str) -> Result<&FunctionSpec, ParameterError> {
        let spec = self.require(function)?;
        if spec.autozero {
            Ok(spec)
        } else {
            Err(ParameterError::Unsupported {
                function: spec.name.clone(),
                parameter: "autozero",
            })
        }
    }

    fn unsupported(
        &self,
        spec: &FunctionSpec,
        parameter: &'static str,
        value: f64,
        policy: UnsupportedPolicy,
    ) -> Result<(), ParameterError> {
        match policy {
            UnsupportedPolicy::Reject => Err(ParameterError::Unsupported {
                function: spec.name.clone(),
                parameter,
            }),
            UnsupportedPolicy::Ignore => {
                warn!(
                    family = %self.family,
                    function = %spec.name,
                    parameter,
                    value,
                    "ignoring value for unsupported parameter"
                );
                Ok(())
            }
        }
    }

    // =========================================================================
    // Built-in families
    // =========================================================================

    /// Agilent 34972A data acquisition / switch unit.
    pub fn agilent_34972() -> Self {
        const NPLC: Bounds = Bounds::new(0.02, 200.0);
        Self {
            family: "34972A".to_string(),
            range_policy: UnsupportedPolicy::Ignore,
            nplc_policy: UnsupportedPolicy::Ignore,
            default_nplc: Some(1.0),
            functions: vec![
                FunctionSpec::new("VOLT:DC", Some(Bounds::new(0.1, 300.0)), Some(NPLC)),
                FunctionSpec::new("VOLT:AC", Some(Bounds::new(0.1, 300.0)), None),
                FunctionSpec::new("CURR:DC", Some(Bounds::new(0.01, 1.0)), Some(NPLC)),
                FunctionSpec::new("CURR:AC", Some(Bounds::new(0.01, 1.0)), None),
                FunctionSpec::new("RES", Some(Bounds::new(100.0, 1e8)), Some(NPLC)),
                FunctionSpec::new("FRES", Some(Bounds::new(100.0, 1e8)), Some(NPLC)),
                FunctionSpec::new("TEMP", None, Some(NPLC)),
                FunctionSpec::new("DIG", None, None).with_keyword("DIG:BYTE"),
                FunctionSpec::new("FREQ", None, None),
                FunctionSpec::new("PER", None, None),
                FunctionSpec::new("TOT", None, None),
            ],
        }
    }

    /// Agilent 34411A digital multimeter.
    pub fn agilent_34411() -> Self {
        const NPLC: Bounds = Bounds::new(0.001, 100.0);
        Self {
            family: "34411A".to_string(),
            range_policy: UnsupportedPolicy::Ignore,
            nplc_policy: UnsupportedPolicy::Ignore,
            default_nplc: Some(1.0),
            functions: vec![
                FunctionSpec::new("CAP", Some(Bounds::new(1e-9, 1e-5)), None),
                FunctionSpec::new("CURR:DC", Some(Bounds::new(1e-5, 3.0)), Some(NPLC))
                    .with_autozero(),
                FunctionSpec::new("CURR:AC", Some(Bounds::new(1e-5, 3.0)), None),
                FunctionSpec::new("FRES", Some(Bounds::new(100.0, 1e9)), Some(NPLC)),
                FunctionSpec::new("RES", Some(Bounds::new(100.0, 1e9)), Some(NPLC))
                    .with_autozero(),
                FunctionSpec::new("VOLT:DC", Some(Bounds::new(0.1, 1000.0)), Some(NPLC))
                    .with_autozero(),
                FunctionSpec::new("VOLT:AC", Some(Bounds::new(0.1, 750.0)), None),
                FunctionSpec::new("TEMP", None, Some(NPLC)).with_autozero(),
                FunctionSpec::new("FREQ", None, None),
                FunctionSpec::new("PER", None, None),
                FunctionSpec::new("CON", None, None),
                FunctionSpec::new("DIOD", None, None),
            ],
        }
    }

    /// Keithley 3706A system switch with integrated DMM.
    pub fn keithley_3706() -> Self {
        const NPLC: Bounds = Bounds::new(0.2, 200.0);
        const OHMS: Bounds = Bounds::new(0.0, 120e6);
        Self {
            family: "3706A".to_string(),
            range_policy: UnsupportedPolicy::Ignore,
            nplc_policy: UnsupportedPolicy::Ignore,
            default_nplc: Some(1.0),
            functions: vec![
                FunctionSpec::new("dcvolts", Some(Bounds::new(0.0, 303.0)), Some(NPLC)),
                FunctionSpec::new("acvolts", Some(Bounds::new(0.0, 303.0)), Some(NPLC)),
                FunctionSpec::new("dccurrent", Some(Bounds::new(0.0, 3.1)), Some(NPLC)),
                FunctionSpec::new("accurrent", Some(Bounds::new(0.0, 3.1)), Some(NPLC)),
                FunctionSpec::new("twowireohms", Some(OHMS), Some(NPLC)),
                FunctionSpec::new("fourwireohms", Some(OHMS), Some(NPLC)),
                FunctionSpec::new("commonsideohms", Some(OHMS), Some(NPLC)),
                FunctionSpec::new("temperature", None, Some(NPLC)),
                FunctionSpec::new("frequency", None, None),
                FunctionSpec::new("period", None, None),
            ],
        }
    }

    /// Parse a table declared in TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

fn ensure_finite(parameter: &'static str, value: f64) -> Result<(), ParameterError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ParameterError::NotFinite { parameter, value })
    }
}

fn out_of_range(
    spec: &FunctionSpec,
    parameter: &'static str,
    value: f64,
    bounds: Bounds,
) -> ParameterError {
    ParameterError::OutOfRange {
        function: spec.name.clone(),
        parameter,
        value,
        min: bounds.min,
        max: bounds.max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = ParameterTable::agilent_34972();
        assert_eq!(table.lookup("volt:dc").map(|s| s.name.as_str()), Some("VOLT:DC"));
        assert_eq!(table.lookup(" Res ").map(|s| s.name.as_str()), Some("RES"));
        assert!(table.lookup("VOLT").is_none());
    }

    #[test]
    fn test_unknown_function() {
        let table = ParameterTable::agilent_34972();
        assert_eq!(
            table.check_range("OHMS", RangeSetting::Auto),
            Err(ParameterError::UnknownFunction("OHMS".into()))
        );
    }

    #[test]
    fn test_auto_always_passes() {
        let table = ParameterTable::agilent_34972();
        assert_eq!(table.check_range("VOLT:DC", RangeSetting::Auto), Ok(RangeCheck::Auto));
        assert_eq!(
            table.check_range("FREQ", RangeSetting::Auto),
            Ok(RangeCheck::NotApplicable)
        );
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let table = ParameterTable::agilent_34972();
        let eps = 1e-9;
        assert_eq!(
            table.check_range("VOLT:DC", RangeSetting::Value(0.1)),
            Ok(RangeCheck::Value(0.1))
        );
        assert_eq!(
            table.check_range("VOLT:DC", RangeSetting::Value(300.0)),
            Ok(RangeCheck::Value(300.0))
        );
        assert!(table.check_range("VOLT:DC", RangeSetting::Value(0.1 - eps)).is_err());
        assert!(table.check_range("VOLT:DC", RangeSetting::Value(300.0 + eps)).is_err());
    }

    #[test]
    fn test_non_finite_rejected() {
        let table = ParameterTable::agilent_34411();
        assert!(matches!(
            table.check_range("VOLT:DC", RangeSetting::Value(f64::NAN)),
            Err(ParameterError::NotFinite { .. })
        ));
        assert!(matches!(
            table.check_integration_time("VOLT:DC", IntegrationSetting::Nplc(f64::INFINITY)),
            Err(ParameterError::NotFinite { .. })
        ));
    }

    #[test]
    fn test_unsupported_range_ignored_by_default() {
        let table = ParameterTable::agilent_34972();
        assert_eq!(
            table.check_range("FREQ", RangeSetting::Value(10.0)),
            Ok(RangeCheck::NotApplicable)
        );
    }

    #[test]
    fn test_unsupported_range_rejected_by_policy() {
        let mut table = ParameterTable::agilent_34972();
        table.range_policy = UnsupportedPolicy::Reject;
        assert_eq!(
            table.check_range("FREQ", RangeSetting::Value(10.0)),
            Err(ParameterError::Unsupported {
                function: "FREQ".into(),
                parameter: "range",
            })
        );
        // The sentinel is still fine.
        assert!(table.check_range("FREQ", RangeSetting::Auto).is_ok());
    }

    #[test]
    fn test_integration_time() {
        let table = ParameterTable::agilent_34972();
        assert_eq!(
            table.check_integration_time("VOLT:DC", IntegrationSetting::Default),
            Ok(Some(1.0))
        );
        assert_eq!(
            table.check_integration_time("VOLT:DC", IntegrationSetting::Nplc(10.0)),
            Ok(Some(10.0))
        );
        assert!(table
            .check_integration_time("VOLT:DC", IntegrationSetting::Nplc(0.01))
            .is_err());
        assert_eq!(
            table.check_integration_time("VOLT:AC", IntegrationSetting::Default),
            Ok(None)
        );
        assert_eq!(
            table.check_integration_time("VOLT:AC", IntegrationSetting::Nplc(10.0)),
            Ok(None)
        );
    }

    #[test]
    fn test_autozero_capability() {
        let table = ParameterTable::agilent_34411();
        assert!(table.check_autozero("volt:dc").is_ok());
        assert!(table.check_autozero("FRES").is_err());
        assert!(ParameterTable::agilent_34972().check_autozero("VOLT:DC").is_err());
    }

    #[test]
    fn test_keyword_override() {
        let table = ParameterTable::agilent_34972();
        assert_eq!(table.lookup("dig").map(FunctionSpec::keyword), Some("DIG:BYTE"));
        assert_eq!(table.lookup("RES").map(FunctionSpec::keyword), Some("RES"));
    }

    #[test]
    fn test_table_from_toml() {
        let table = ParameterTable::from_toml_str(
            r#"
            family = "custom"
            range_policy = "reject"

            [[functions]]
            name = "VOLT:DC"
            range = { min = 0.1, max = 10.0 }
            nplc = { min = 1.0, max = 10.0 }

            [[functions]]
            name = "FREQ"
            "#,
        )
        .unwrap();

        assert_eq!(table.nplc_policy, UnsupportedPolicy::Ignore);
        assert_eq!(table.default_nplc, None);
        assert!(table.check_range("FREQ", RangeSetting::Value(1.0)).is_err());
        assert_eq!(
            table.check_integration_time("VOLT:DC", IntegrationSetting::Default),
            Ok(None)
        );
    }
}
