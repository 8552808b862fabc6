//! Custom error types for the bench core.
//!
//! This module defines the primary error type, `BenchError`, together with the
//! category errors each layer of the protocol core returns. Using the `thiserror`
//! crate, it provides a centralized and consistent way to handle everything from
//! malformed channel lists to transport failures.
//!
//! ## Error Hierarchy
//!
//! `BenchError` is an enum that consolidates the category errors:
//!
//! - **`ChannelList`**: A channel-list string failed to parse or named a channel the
//!   active addressing scheme does not have.
//! - **`Parameter`**: A function name, range or integration time was rejected by the
//!   family's parameter table.
//! - **`Decode`**: An instrument reply was not a number or not a well-formed
//!   definite-length block.
//! - **`Acquisition`**: Overlapped acquisition could not be armed or was aborted.
//! - **`Transport`**: The byte-stream collaborator failed. Always surfaced, never retried.
//! - **`Config`** / **`Configuration`**: Loading or validating `BenchConfig` failed.
//!
//! Validation categories (`ChannelList`, `Parameter`, `InvalidTiming`) are produced
//! before anything is written to an instrument, so the device state is untouched
//! when they are returned.

use thiserror::Error;

// =============================================================================
// Channel List Errors
// =============================================================================

/// Why a single channel-list item was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelListErrorKind {
    /// The list, or one comma-separated item, was empty.
    Empty,
    /// An endpoint was not a decimal integer.
    MalformedInteger(String),
    /// A range was written high-to-low.
    RangeOrder {
        /// Range start as written.
        from: u32,
        /// Range end as written.
        to: u32,
    },
    /// The addressing scheme has no such channel.
    InvalidChannel(u32),
}

impl std::fmt::Display for ChannelListErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelListErrorKind::Empty => write!(f, "empty item"),
            ChannelListErrorKind::MalformedInteger(text) => {
                write!(f, "'{}' is not a channel number", text)
            }
            ChannelListErrorKind::RangeOrder { from, to } => {
                write!(f, "range start {} is greater than range end {}", from, to)
            }
            ChannelListErrorKind::InvalidChannel(channel) => {
                write!(f, "channel {} does not exist", channel)
            }
        }
    }
}

/// A channel list failed validation. Identifies the offending item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid channel list item '{item}': {kind}")]
pub struct ChannelListError {
    /// Offending item text, as written.
    pub item: String,
    /// Why it was rejected.
    pub kind: ChannelListErrorKind,
}

impl ChannelListError {
    /// Error for `item`.
    pub fn new(item: impl Into<String>, kind: ChannelListErrorKind) -> Self {
        Self {
            item: item.into(),
            kind,
        }
    }
}

// =============================================================================
// Parameter Errors
// =============================================================================

/// A function parameter was rejected by a [`ParameterTable`](crate::parameters::ParameterTable).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// The function name is not in the family's table.
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// An explicit value lies outside the function's inclusive window.
    #[error("{parameter} {value} out of range [{min}, {max}] for function '{function}'")]
    OutOfRange {
        /// Function being configured.
        function: String,
        /// `"range"` or `"NPLC"`.
        parameter: &'static str,
        /// Rejected value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// An explicit value was given for a capability the function lacks,
    /// and the table's policy for that capability is to reject.
    #[error("Function '{function}' does not support {parameter}")]
    Unsupported {
        /// Function being configured.
        function: String,
        /// `"range"` or `"NPLC"`.
        parameter: &'static str,
    },

    /// NaN or infinite values never reach a bound comparison.
    #[error("{parameter} must be finite, got {value}")]
    NotFinite {
        /// `"range"` or `"NPLC"`.
        parameter: &'static str,
        /// Rejected value.
        value: f64,
    },
}

// =============================================================================
// Decode Errors
// =============================================================================

/// An instrument reply could not be decoded into a number.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The reply is not a floating-point literal.
    #[error("Reply is not a number: '{0}'")]
    NotANumber(String),

    /// A definite-length block did not start with `#`.
    #[error("Block reply does not start with '#'")]
    MissingBlockMarker,

    /// The digit-count byte after `#` is missing, not a digit, or zero.
    #[error("Block header has invalid digit count")]
    InvalidDigitCount,

    /// The length field is not decimal, or fewer payload bytes arrived than declared.
    #[error("Block header declares an invalid length: {0}")]
    InvalidLength(String),
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Failure reported by the byte-stream collaborator.
///
/// The core propagates these unchanged; retry policy belongs to the caller.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying socket / port I/O failed.
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No complete reply arrived within the query timeout.
    #[error("Timed out after {timeout_ms} ms waiting for reply to '{command}'")]
    Timeout {
        /// Command whose reply did not arrive.
        command: String,
        /// Timeout that elapsed.
        timeout_ms: u128,
    },

    /// The peer closed the connection.
    #[error("Connection closed by instrument")]
    Closed,

    /// The transport was used after `close()`.
    #[error("Transport is not open")]
    NotOpen,

    /// Any other collaborator-specific failure.
    #[error("Transport error: {0}")]
    Other(String),
}

// =============================================================================
// Acquisition Errors
// =============================================================================

/// Overlapped acquisition failed (the `Failed` terminal state, or arming was refused).
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// Period or total duration was not a positive finite number of seconds,
    /// or the resulting sample count does not fit the instrument counter.
    #[error("Invalid timing: period {period_s} s, total {total_s} s")]
    InvalidTiming {
        /// Requested sampling period in seconds.
        period_s: f64,
        /// Requested acquisition length in seconds.
        total_s: f64,
    },

    /// The instrument has no bus-triggered sample buffer in its command set.
    #[error("Overlapped acquisition is not available on {family}")]
    Unsupported {
        /// Family name of the session that was asked to arm.
        family: String,
    },

    /// The transport failed while arming, polling or draining.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The sample counter reply could not be decoded.
    #[error("Sample counter reply could not be decoded: {0}")]
    Counter(DecodeError),

    /// A drained sample could not be decoded. Remaining samples were not read.
    #[error("Sample {index} could not be decoded: {source}")]
    Sample {
        /// Zero-based position of the bad sample in capture order.
        index: usize,
        /// Why the block did not decode.
        #[source]
        source: DecodeError,
    },
}

// =============================================================================
// Application Error
// =============================================================================

/// Convenience alias for results using the crate error type.
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Primary error type for the bench core.
///
/// # Example
///
/// ```rust
/// use scpi_bench::error::{BenchError, ParameterError};
///
/// fn reject(function: &str) -> Result<(), BenchError> {
///     Err(ParameterError::UnknownFunction(function.into()).into())
/// }
///
/// assert!(reject("VOLT:XX").is_err());
/// ```
#[derive(Error, Debug)]
pub enum BenchError {
    /// Channel-list syntax or addressing failure.
    #[error(transparent)]
    ChannelList(#[from] ChannelListError),

    /// Function / range / integration-time validation failure.
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    /// Reply decoding failure.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Overlapped acquisition failure.
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    /// Transport collaborator failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A value passed to a command builder that is not tied to a function
    /// table (AC filter frequency, settle delay) was invalid.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File I/O outside the transport (test logs).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for BenchError {
    fn from(value: figment::Error) -> Self {
        BenchError::Config(Box::new(value))
    }
}

impl BenchError {
    /// True for the validation categories, which leave instrument state untouched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BenchError::ChannelList(_)
                | BenchError::Parameter(_)
                | BenchError::InvalidArgument(_)
                | BenchError::Acquisition(AcquisitionError::InvalidTiming { .. })
                | BenchError::Acquisition(AcquisitionError::Unsupported { .. })
        )
    }
}
