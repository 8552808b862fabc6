//! Channel addressing schemes.
//!
//! An [`AddressingScheme`] answers two questions for the channel-list grammar:
//! whether a channel number exists on the instrument, and how a validated
//! [`ChannelList`] is written on the wire. Two variants ship with the crate:
//!
//! - [`FlatBankScheme`]: a fixed numeric bank such as the Agilent 34972A's
//!   `101..=399`, written as `(@<list>)`.
//! - [`SlotRelativeScheme`]: mainframes like the Keithley 3706A where the first
//!   digit selects a slot and the validity of the remaining digits depends on
//!   the card installed in that slot. Written as a quoted string.
//!
//! Multimeters without a scanner use [`NoScannerScheme`], which has no
//! channels at all.

use crate::channel_list::ChannelList;
use crate::error::BenchError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Capability supplied to channel-list parsing and command formatting.
pub trait AddressingScheme: std::fmt::Debug + Send + Sync {
    /// Whether `channel` names a switch this instrument has.
    fn is_valid_channel(&self, channel: u32) -> bool;

    /// Whether `channel` may be used as a range endpoint.
    ///
    /// Defaults to [`is_valid_channel`](Self::is_valid_channel).
    fn is_valid_range_endpoint(&self, channel: u32) -> bool {
        self.is_valid_channel(channel)
    }

    /// Render a validated list in this scheme's bracketing syntax.
    fn format(&self, list: &ChannelList) -> String;

    /// Short name used in log output.
    fn name(&self) -> &str;
}

// =============================================================================
// Flat numeric bank
// =============================================================================

/// Fixed numeric channel bank.
///
/// Single channels and range endpoints carry separate upper bounds. The
/// 34972A helpers accept singles up to 440 but range endpoints only up to 399.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatBankScheme {
    /// Lowest channel number.
    pub min: u32,
    /// Highest channel accepted on its own.
    pub single_max: u32,
    /// Highest channel accepted as a range endpoint.
    pub range_max: u32,
}

impl FlatBankScheme {
    /// A bank with one bound for singles and range endpoints alike.
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            single_max: max,
            range_max: max,
        }
    }

    /// Separate upper bounds for single channels and range endpoints.
    pub fn with_bounds(min: u32, single_max: u32, range_max: u32) -> Self {
        Self {
            min,
            single_max,
            range_max,
        }
    }

    /// Agilent 34972A bank: singles `101..=440`, range endpoints `101..=399`.
    pub fn agilent_34972() -> Self {
        Self::with_bounds(101, 440, 399)
    }
}

impl AddressingScheme for FlatBankScheme {
    fn is_valid_channel(&self, channel: u32) -> bool {
        let ok = (self.min..=self.single_max).contains(&channel);
        if ok && channel > self.range_max {
            warn!(
                channel,
                range_max = self.range_max,
                "channel accepted only by the wider single-channel bound"
            );
        }
        ok
    }

    fn is_valid_range_endpoint(&self, channel: u32) -> bool {
        (self.min..=self.range_max).contains(&channel)
    }

    fn format(&self, list: &ChannelList) -> String {
        format!("(@{})", list.to_canonical())
    }

    fn name(&self) -> &str {
        "flat-bank"
    }
}

/// Addressing for an instrument with no scanner card.
///
/// Every channel is rejected, so no command carrying a channel list can be
/// built for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoScannerScheme;

impl AddressingScheme for NoScannerScheme {
    fn is_valid_channel(&self, _channel: u32) -> bool {
        false
    }

    fn format(&self, list: &ChannelList) -> String {
        format!("(@{})", list.to_canonical())
    }

    fn name(&self) -> &str {
        "no-scanner"
    }
}

// =============================================================================
// Slot relative
// =============================================================================

/// First switch number of the backplane relays shared by every card.
const BACKPLANE_FIRST: u32 = 911;
/// Last backplane relay.
const BACKPLANE_LAST: u32 = 916;
/// Number of card slots in the mainframe.
pub const SLOT_COUNT: usize = 6;

/// Card installed in a mainframe slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardType {
    /// No card installed.
    Empty,
    /// Keithley 3720 dual 1x30 multiplexer.
    Card3720,
    /// Keithley 3721 dual 1x20 multiplexer.
    Card3721,
    /// Keithley 3722 dual 1x48 multiplexer.
    Card3722,
    /// Keithley 3723 dual 1x30 reed multiplexer.
    Card3723,
    /// A card the scheme has no switch table for. Every channel on it is rejected.
    Unsupported(String),
}

impl CardType {
    /// Map a model token (`"3720"`, `"Empty Slot"`, ...) to a card type.
    pub fn from_model(model: &str) -> Self {
        match model.trim() {
            "Empty Slot" | "" => CardType::Empty,
            "3720" => CardType::Card3720,
            "3721" => CardType::Card3721,
            "3722" => CardType::Card3722,
            "3723" => CardType::Card3723,
            other => CardType::Unsupported(other.to_string()),
        }
    }

    /// Parse the reply to `print(slot[n].idn)`.
    ///
    /// Pseudo-cards report `Pseudo,<model>,...`; real cards put the model first.
    pub fn from_idn(idn: &str) -> Self {
        let mut fields = idn.split(',').map(str::trim);
        let first = fields.next().unwrap_or_default();
        if first == "Pseudo" {
            Self::from_model(fields.next().unwrap_or_default())
        } else {
            Self::from_model(first)
        }
    }

    /// Highest in-slot switch number, excluding the backplane.
    pub fn max_switch(&self) -> Option<u32> {
        match self {
            CardType::Card3720 | CardType::Card3723 => Some(60),
            CardType::Card3721 => Some(42),
            CardType::Card3722 => Some(96),
            CardType::Empty | CardType::Unsupported(_) => None,
        }
    }

    fn accepts(&self, switch: u32) -> bool {
        match self.max_switch() {
            Some(max) => (1..=max).contains(&switch) || (BACKPLANE_FIRST..=BACKPLANE_LAST).contains(&switch),
            None => false,
        }
    }
}

/// Six-slot mainframe addressing: a slot digit followed by the switch number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRelativeScheme {
    slots: [CardType; SLOT_COUNT],
}

impl SlotRelativeScheme {
    /// Scheme for a known slot layout, slot 1 first.
    pub fn new(slots: [CardType; SLOT_COUNT]) -> Self {
        Self { slots }
    }

    /// Build the scheme from the six slot identification replies, slot 1 first.
    ///
    /// Fails when the reply count is wrong or no slot holds a card.
    pub fn from_idns<'a, I>(idns: I) -> Result<Self, BenchError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let cards: Vec<CardType> = idns.into_iter().map(CardType::from_idn).collect();
        let slots: [CardType; SLOT_COUNT] = cards.try_into().map_err(|cards: Vec<CardType>| {
            BenchError::Configuration(format!(
                "expected {} slot identifications, got {}",
                SLOT_COUNT,
                cards.len()
            ))
        })?;
        if slots.iter().all(|card| *card == CardType::Empty) {
            return Err(BenchError::Configuration(
                "no card detected in any slot".to_string(),
            ));
        }
        Ok(Self { slots })
    }

    /// Installed cards, slot 1 first.
    pub fn slots(&self) -> &[CardType; SLOT_COUNT] {
        &self.slots
    }

    /// Split `channel` into `(slot, switch)`.
    ///
    /// The leading decimal digit is the slot and the remaining digits are
    /// the switch, so `1060` and `160` both name switch 60 of slot 1. A
    /// single-digit channel has no switch part and yields `None`.
    fn split(channel: u32) -> Option<(usize, u32)> {
        let switch_digits = channel.checked_ilog10()?;
        if switch_digits == 0 {
            return None;
        }
        let place = 10u32.pow(switch_digits);
        let slot = (channel / place) as usize;
        let switch = channel % place;
        (1..=SLOT_COUNT).contains(&slot).then_some((slot, switch))
    }
}

impl AddressingScheme for SlotRelativeScheme {
    fn is_valid_channel(&self, channel: u32) -> bool {
        match Self::split(channel) {
            Some((slot, switch)) => self.slots[slot - 1].accepts(switch),
            None => false,
        }
    }

    fn format(&self, list: &ChannelList) -> String {
        format!("\"{}\"", list.to_canonical())
    }

    fn name(&self) -> &str {
        "slot-relative"
    }
}
