//! Supported instrument families.

use crate::addressing::{
    AddressingScheme, CardType, FlatBankScheme, NoScannerScheme, SlotRelativeScheme, SLOT_COUNT,
};
use crate::command::Dialect;
use crate::parameters::ParameterTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Instrument family: selects parameter table, dialect and addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentFamily {
    /// Agilent / Keysight 34972A switch unit with internal DMM.
    #[serde(rename = "34972a", alias = "34972A", alias = "34970a")]
    Agilent34972,
    /// Agilent / Keysight 34411A DMM.
    #[serde(rename = "34411a", alias = "34411A", alias = "34410a")]
    Agilent34411,
    /// Keithley 3706A switch mainframe.
    #[serde(rename = "3706a", alias = "3706A")]
    Keithley3706,
}

impl InstrumentFamily {
    /// Every supported family.
    pub const ALL: [InstrumentFamily; 3] = [
        InstrumentFamily::Agilent34972,
        InstrumentFamily::Agilent34411,
        InstrumentFamily::Keithley3706,
    ];

    /// Lower-case configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            InstrumentFamily::Agilent34972 => "34972a",
            InstrumentFamily::Agilent34411 => "34411a",
            InstrumentFamily::Keithley3706 => "3706a",
        }
    }

    /// Built-in function table.
    pub fn parameter_table(&self) -> ParameterTable {
        match self {
            InstrumentFamily::Agilent34972 => ParameterTable::agilent_34972(),
            InstrumentFamily::Agilent34411 => ParameterTable::agilent_34411(),
            InstrumentFamily::Keithley3706 => ParameterTable::keithley_3706(),
        }
    }

    /// Command language spoken by the family.
    pub fn dialect(&self) -> Dialect {
        match self {
            InstrumentFamily::Keithley3706 => Dialect::Tsp,
            _ => Dialect::Scpi,
        }
    }

    /// Addressing used before any slot discovery.
    ///
    /// The 34411A has no scanner and accepts no channel at all. A 3706A
    /// starts with every slot empty.
    pub fn default_scheme(&self) -> Box<dyn AddressingScheme> {
        match self {
            InstrumentFamily::Agilent34972 => Box::new(FlatBankScheme::agilent_34972()),
            InstrumentFamily::Agilent34411 => Box::new(NoScannerScheme),
            InstrumentFamily::Keithley3706 => Box::new(SlotRelativeScheme::new(
                std::array::from_fn::<_, SLOT_COUNT, _>(|_| CardType::Empty),
            )),
        }
    }

    /// Whether the instrument has card slots that must be discovered.
    pub fn has_slots(&self) -> bool {
        matches!(self, InstrumentFamily::Keithley3706)
    }

    /// Whether the instrument addresses a fixed numeric channel bank.
    pub fn has_flat_bank(&self) -> bool {
        matches!(self, InstrumentFamily::Agilent34972)
    }
}

impl fmt::Display for InstrumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InstrumentFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "34972a" | "34972" | "34970a" => Ok(InstrumentFamily::Agilent34972),
            "34411a" | "34411" | "34410a" => Ok(InstrumentFamily::Agilent34411),
            "3706a" | "3706" => Ok(InstrumentFamily::Keithley3706),
            other => Err(format!(
                "unknown instrument family '{}', expected one of: 34972a, 34411a, 3706a",
                other
            )),
        }
    }
}
