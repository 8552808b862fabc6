//! # SCPI Bench Core Library
//!
//! Protocol core for test-bench software that drives SCPI-speaking lab
//! instruments (multimeters, switch units, sources) over a byte-stream
//! transport. Every operation follows the same pattern: validate, synthesize
//! commands, send, parse the reply and, for buffered acquisitions, poll.
//!
//! ## Crate Structure
//!
//! - **`channel_list`** / **`addressing`**: the `101,201:205` channel-list
//!   grammar and the flat-bank / slot-relative schemes that decide which
//!   channels exist and how a list is written on the wire.
//! - **`parameters`**: per-family tables of legal range and integration-time
//!   windows for each measurement function.
//! - **`command`**: `CommandBuilder`, turning validated inputs into SCPI or
//!   TSP command strings.
//! - **`decode`**: ASCII scalar and definite-length block reply decoding.
//! - **`acquisition`**: the arm / poll / drain state machine for
//!   instrument-paced buffered sampling.
//! - **`limits`** / **`testlog`**: pass/fail checks with a monotonic failure
//!   counter, and the sinks their records go to.
//! - **`session`**: `InstrumentSession`, one exclusive handle per instrument.
//! - **`transport`** / **`timer`**: the I/O and clock collaborators.
//! - **`config`** / **`logging`** / **`error`**: ambient configuration,
//!   tracing setup and the crate error type.
//!
//! Everything is synchronous; waits go through a caller-supplied
//! [`timer::Timer`] so polling loops can be tested without sleeping.

pub mod acquisition;
pub mod addressing;
pub mod channel_list;
pub mod command;
pub mod config;
pub mod decode;
pub mod error;
pub mod family;
pub mod limits;
pub mod logging;
pub mod parameters;
pub mod session;
pub mod testlog;
pub mod timer;
pub mod transport;

pub use error::{BenchError, BenchResult};
pub use family::InstrumentFamily;
pub use session::InstrumentSession;
