//! Channel-list grammar.
//!
//! ```text
//! list  := item (',' item)*
//! item  := INT | INT ':' INT
//! ```
//!
//! Whitespace around items and around the `:` is ignored. Ranges are inclusive
//! and must be written low-to-high. Every endpoint is checked against the
//! active [`AddressingScheme`], so a parsed [`ChannelList`] is always valid for
//! the instrument it was parsed for.
//!
//! # Example
//!
//! ```rust
//! use scpi_bench::addressing::{AddressingScheme, FlatBankScheme};
//! use scpi_bench::channel_list::ChannelList;
//!
//! let scheme = FlatBankScheme::new(101, 399);
//! let list = ChannelList::parse("101 , 201:205, 305", &scheme).unwrap();
//! assert_eq!(scheme.format(&list), "(@101,201:205,305)");
//! ```

use crate::addressing::AddressingScheme;
use crate::error::{ChannelListError, ChannelListErrorKind};
use std::fmt;

/// One item of a channel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRef {
    /// One channel.
    Single(u32),
    /// Inclusive range, `from <= to`.
    Range {
        /// First channel.
        from: u32,
        /// Last channel, inclusive.
        to: u32,
    },
}

impl ChannelRef {
    /// Number of channels this item addresses.
    pub fn len(&self) -> usize {
        match *self {
            ChannelRef::Single(_) => 1,
            ChannelRef::Range { from, to } => to.saturating_sub(from) as usize + 1,
        }
    }

    /// Always false; kept for symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Single(channel) => write!(f, "{}", channel),
            ChannelRef::Range { from, to } => write!(f, "{}:{}", from, to),
        }
    }
}

/// A validated, ordered channel list.
///
/// Insertion order is preserved because it is reflected in the emitted command text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelList {
    items: Vec<ChannelRef>,
}

impl ChannelList {
    /// Parse and validate `text` against `scheme`.
    pub fn parse(text: &str, scheme: &dyn AddressingScheme) -> Result<Self, ChannelListError> {
        if text.trim().is_empty() {
            return Err(ChannelListError::new(text, ChannelListErrorKind::Empty));
        }

        let items = text
            .split(',')
            .map(|item| parse_item(item, scheme))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { items })
    }

    /// A list holding one channel, validated against `scheme`.
    pub fn single(channel: u32, scheme: &dyn AddressingScheme) -> Result<Self, ChannelListError> {
        if !scheme.is_valid_channel(channel) {
            return Err(ChannelListError::new(
                channel.to_string(),
                ChannelListErrorKind::InvalidChannel(channel),
            ));
        }
        Ok(Self {
            items: vec![ChannelRef::Single(channel)],
        })
    }

    /// Items in the order they were written.
    pub fn items(&self) -> &[ChannelRef] {
        &self.items
    }

    /// Total channels addressed, counting every member of each range.
    pub fn channel_count(&self) -> usize {
        self.items.iter().map(ChannelRef::len).sum()
    }

    /// Every addressed channel in list order.
    pub fn channels(&self) -> impl Iterator<Item = u32> + '_ {
        self.items.iter().flat_map(|item| match *item {
            ChannelRef::Single(channel) => channel..=channel,
            ChannelRef::Range { from, to } => from..=to,
        })
    }

    /// Canonical text without scheme bracketing: `101,201:205`.
    pub fn to_canonical(&self) -> String {
        self.items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for ChannelList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical())
    }
}

/// Parse and validate `text` against `scheme`.
pub fn parse(text: &str, scheme: &dyn AddressingScheme) -> Result<ChannelList, ChannelListError> {
    ChannelList::parse(text, scheme)
}

fn parse_item(raw: &str, scheme: &dyn AddressingScheme) -> Result<ChannelRef, ChannelListError> {
    let item = raw.trim();
    if item.is_empty() {
        return Err(ChannelListError::new(raw, ChannelListErrorKind::Empty));
    }

    match item.split_once(':') {
        Some((from, to)) => {
            let from = parse_channel(item, from)?;
            let to = parse_channel(item, to)?;
            if from > to {
                return Err(ChannelListError::new(
                    item,
                    ChannelListErrorKind::RangeOrder { from, to },
                ));
            }
            for endpoint in [from, to] {
                if !scheme.is_valid_range_endpoint(endpoint) {
                    return Err(ChannelListError::new(
                        item,
                        ChannelListErrorKind::InvalidChannel(endpoint),
                    ));
                }
            }
            Ok(ChannelRef::Range { from, to })
        }
        None => {
            let channel = parse_channel(item, item)?;
            if !scheme.is_valid_channel(channel) {
                return Err(ChannelListError::new(
                    item,
                    ChannelListErrorKind::InvalidChannel(channel),
                ));
            }
            Ok(ChannelRef::Single(channel))
        }
    }
}

/// Digits only: no sign, no embedded whitespace, no second `:`.
fn parse_channel(item: &str, text: &str) -> Result<u32, ChannelListError> {
    let text = text.trim();
    let malformed = || {
        ChannelListError::new(
            item,
            ChannelListErrorKind::MalformedInteger(text.to_string()),
        )
    };
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    text.parse::<u32>().map_err(|_| malformed())
}
