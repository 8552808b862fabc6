//! Instrument reply decoding.
//!
//! Two reply shapes reach the core:
//!
//! - plain ASCII scalars such as `+1.23456E-01\r\n`, answered by `READ?` and
//!   `print(...)`;
//! - IEEE 488.2 definite-length blocks `#<d><L><payload>`, answered by
//!   `R? n`. `d` is the number of length digits (1-9), `L` the payload byte
//!   count, and the payload itself is an ASCII scalar.
//!
//! Both routines are pure and shared by immediate reads and the overlapped
//! drain loop.

use crate::error::DecodeError;
use std::fmt;

/// Where a [`Reading`] was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingSource {
    /// Plain ASCII reply.
    Scalar,
    /// Definite-length block.
    Block,
}

/// One decoded measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Measured value.
    pub value: f64,
    /// Reply shape it came from.
    pub source: ReadingSource,
}

impl Reading {
    /// Reading decoded from a plain reply.
    pub fn scalar(value: f64) -> Self {
        Self {
            value,
            source: ReadingSource::Scalar,
        }
    }

    /// Reading decoded from a block.
    pub fn block(value: f64) -> Self {
        Self {
            value,
            source: ReadingSource::Block,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Parse an ASCII floating-point reply.
///
/// Leading and trailing whitespace, including CR/LF, is ignored.
///
/// ```rust
/// use scpi_bench::decode::decode_scalar;
///
/// assert_eq!(decode_scalar(" +1.5E+00\r\n").unwrap(), 1.5);
/// assert!(decode_scalar("OVLD").is_err());
/// ```
pub fn decode_scalar(text: &str) -> Result<f64, DecodeError> {
    let trimmed = text.trim();
    if !looks_numeric(trimmed) {
        return Err(DecodeError::NotANumber(trimmed.to_string()));
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| DecodeError::NotANumber(trimmed.to_string()))
}

/// Parse a raw scalar reply that may not be valid UTF-8.
pub fn decode_scalar_bytes(raw: &[u8]) -> Result<f64, DecodeError> {
    match std::str::from_utf8(raw) {
        Ok(text) => decode_scalar(text),
        Err(_) => Err(DecodeError::NotANumber(
            String::from_utf8_lossy(raw).trim().to_string(),
        )),
    }
}

/// Walk a definite-length block header and return exactly the `L` payload bytes.
///
/// Anything after the payload, usually the reply terminator, is not part of
/// the block and is left out.
pub fn block_payload(raw: &[u8]) -> Result<&[u8], DecodeError> {
    let (start, length) = block_header(raw)?;
    Ok(&raw[start..start + length])
}

/// Return `(payload_offset, declared_length)` for a definite-length block.
///
/// The first byte must be `#`; leading whitespace is a framing error.
pub fn block_header(raw: &[u8]) -> Result<(usize, usize), DecodeError> {
    match raw.first() {
        Some(b'#') => {}
        _ => return Err(DecodeError::MissingBlockMarker),
    }

    let digits = match raw.get(1) {
        Some(b) if b.is_ascii_digit() && *b != b'0' => usize::from(b - b'0'),
        _ => return Err(DecodeError::InvalidDigitCount),
    };

    let invalid = |field: &[u8]| DecodeError::InvalidLength(String::from_utf8_lossy(field).into_owned());
    let length_field = raw.get(2..2 + digits).ok_or_else(|| invalid(&raw[2..]))?;
    if !length_field.iter().all(u8::is_ascii_digit) {
        return Err(invalid(length_field));
    }
    let length: usize = std::str::from_utf8(length_field)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid(length_field))?;

    let start = 2 + digits;
    let available = raw.len() - start;
    if available < length {
        return Err(DecodeError::InvalidLength(format!(
            "declared {} payload bytes, {} available",
            length, available
        )));
    }
    Ok((start, length))
}

/// Decode a definite-length block whose payload is an ASCII scalar.
///
/// ```rust
/// use scpi_bench::decode::decode_block;
///
/// assert_eq!(decode_block(b"#16+1.234").unwrap(), 1.234);
/// // Only the declared five bytes are parsed.
/// assert_eq!(decode_block(b"#15+1.234").unwrap(), 1.23);
/// ```
pub fn decode_block(raw: &[u8]) -> Result<f64, DecodeError> {
    let payload = block_payload(raw)?;
    decode_scalar_bytes(payload)
}

/// Decode the integer reply of a sample-counter query.
pub fn decode_count(text: &str) -> Result<u32, DecodeError> {
    let trimmed = text.trim();
    if let Ok(count) = trimmed.trim_start_matches('+').parse::<u32>() {
        return Ok(count);
    }
    // Some firmware answers in float notation (`+5.00000000E+00`).
    let value = decode_scalar(trimmed)?;
    if value >= 0.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX) {
        Ok(value as u32)
    } else {
        Err(DecodeError::NotANumber(trimmed.to_string()))
    }
}

/// Rust's float parser accepts `inf` and `NaN`; instruments never send those as text.
fn looks_numeric(text: &str) -> bool {
    let unsigned = text.trim_start_matches(['+', '-']);
    unsigned
        .bytes()
        .next()
        .is_some_and(|b| b.is_ascii_digit() || b == b'.')
}
