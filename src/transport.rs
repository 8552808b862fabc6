//! Byte-stream transports.
//!
//! The protocol core only needs three operations from a transport: write a
//! command, write a query and read its reply, and close. [`Transport`]
//! captures exactly that. Implementations append the command terminator on
//! write and read replies up to the reply terminator, except definite-length
//! blocks, whose length header is honoured so payload bytes equal to the
//! terminator are not mistaken for the end of the reply.
//!
//! - [`TcpTransport`]: raw socket (LXI instruments, port 5025).
//! - [`SerialTransport`]: RS-232 / USB-serial, requires the
//!   `instrument_serial` feature.
//! - [`MockTransport`]: scripted replies, call log and failure injection for tests.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace};

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Default command terminator.
pub const DEFAULT_TERMINATOR: &[u8] = b"\n";

/// Request/response byte stream to one instrument.
pub trait Transport: Send {
    /// Send a command that produces no reply.
    fn write(&mut self, command: &[u8]) -> Result<(), TransportError>;

    /// Send a query and return the raw reply, terminator included.
    fn query(&mut self, command: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Release the underlying handle. Further calls fail with [`TransportError::NotOpen`].
    fn close(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, command: &[u8]) -> Result<(), TransportError> {
        (**self).write(command)
    }

    fn query(&mut self, command: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).query(command, timeout)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}

/// How a configured instrument is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// `host:port` socket.
    #[default]
    Tcp,
    /// `port@baud`, e.g. `/dev/ttyUSB0@9600`.
    Serial,
    /// In-process scripted transport.
    Mock,
}

/// Open a transport for `resource`.
pub fn open(
    kind: TransportKind,
    resource: &str,
    timeout: Duration,
) -> Result<Box<dyn Transport>, TransportError> {
    match kind {
        TransportKind::Tcp => Ok(Box::new(TcpTransport::connect(resource, timeout)?)),
        TransportKind::Serial => {
            let (port, baud) = parse_serial_resource(resource)?;
            Ok(Box::new(SerialTransport::open(port, baud, timeout)?))
        }
        TransportKind::Mock => Ok(Box::new(MockTransport::new())),
    }
}

fn parse_serial_resource(resource: &str) -> Result<(&str, u32), TransportError> {
    match resource.rsplit_once('@') {
        Some((port, baud)) => baud
            .trim()
            .parse()
            .map(|baud| (port.trim(), baud))
            .map_err(|_| TransportError::Other(format!("invalid baud rate in '{}'", resource))),
        None => Ok((resource.trim(), 9600)),
    }
}

/// Read one reply from `reader`.
///
/// Plain replies end at `terminator`. A reply starting with `#<d>` is read as
/// a definite-length block: header, then exactly the declared payload, then
/// up to the next terminator.
pub fn read_reply<R: BufRead>(reader: &mut R, terminator: u8) -> io::Result<Vec<u8>> {
    let mut reply = Vec::new();
    let mut first = [0u8; 1];
    reader.read_exact(&mut first)?;
    reply.push(first[0]);

    if first[0] == b'#' {
        let mut digit = [0u8; 1];
        reader.read_exact(&mut digit)?;
        reply.push(digit[0]);
        if digit[0].is_ascii_digit() && digit[0] != b'0' {
            let mut length = vec![0u8; usize::from(digit[0] - b'0')];
            reader.read_exact(&mut length)?;
            reply.extend_from_slice(&length);
            let declared = std::str::from_utf8(&length)
                .ok()
                .and_then(|text| text.parse::<u64>().ok());
            if let Some(declared) = declared {
                // The buffer grows with the bytes that actually arrive, not
                // with the length a garbled header claims.
                let before = reply.len();
                Read::take(&mut *reader, declared).read_to_end(&mut reply)?;
                let received = (reply.len() - before) as u64;
                if received < declared {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("block declared {} bytes, {} received", declared, received),
                    ));
                }
            }
        }
        if reply.last() == Some(&terminator) {
            return Ok(reply);
        }
    } else if first[0] == terminator {
        return Ok(reply);
    }

    let read = reader.read_until(terminator, &mut reply)?;
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-reply",
        ));
    }
    Ok(reply)
}

fn map_io(err: io::Error, command: &[u8], timeout: Duration) -> TransportError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout {
            command: String::from_utf8_lossy(command).into_owned(),
            timeout_ms: timeout.as_millis(),
        },
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TransportError::Closed,
        _ => TransportError::Io(err),
    }
}

// =============================================================================
// TCP
// =============================================================================

/// Raw-socket transport.
#[derive(Debug)]
pub struct TcpTransport {
    peer: String,
    terminator: Vec<u8>,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpTransport {
    /// Connect to `addr` (`host:port`) within `timeout`.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, TransportError> {
        let target = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TransportError::Other(format!("'{}' did not resolve", addr)))?;
        let stream = TcpStream::connect_timeout(&target, timeout)?;
        stream.set_nodelay(true)?;
        info!(peer = %addr, "connected");
        Ok(Self {
            peer: addr.to_string(),
            terminator: DEFAULT_TERMINATOR.to_vec(),
            stream: Some(BufReader::new(stream)),
        })
    }

    /// Replace the command terminator (default `\n`).
    pub fn with_terminator(mut self, terminator: &[u8]) -> Self {
        self.terminator = terminator.to_vec();
        self
    }

    fn stream(&mut self) -> Result<&mut BufReader<TcpStream>, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotOpen)
    }

    fn send(&mut self, command: &[u8]) -> Result<(), TransportError> {
        let mut frame = Vec::with_capacity(command.len() + self.terminator.len());
        frame.extend_from_slice(command);
        frame.extend_from_slice(&self.terminator);
        let socket = self.stream()?.get_mut();
        socket.write_all(&frame)?;
        socket.flush()?;
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, command: &[u8]) -> Result<(), TransportError> {
        trace!(peer = %self.peer, command = %String::from_utf8_lossy(command), "write");
        self.send(command)
    }

    fn query(&mut self, command: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        trace!(peer = %self.peer, command = %String::from_utf8_lossy(command), "query");
        self.send(command)?;
        let terminator = self.terminator.last().copied().unwrap_or(b'\n');
        let stream = self.stream()?;
        // A zero read timeout is rejected by the socket API.
        stream
            .get_ref()
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        read_reply(stream, terminator).map_err(|err| map_io(err, command, timeout))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = self.stream.take() {
            stream.get_ref().shutdown(std::net::Shutdown::Both)?;
            info!(peer = %self.peer, "disconnected");
        }
        Ok(())
    }
}

// =============================================================================
// Serial
// =============================================================================

/// RS-232 / USB-serial transport.
///
/// Without the `instrument_serial` feature, [`SerialTransport::open`] always fails.
pub struct SerialTransport {
    port_name: String,
    terminator: Vec<u8>,
    #[cfg(feature = "instrument_serial")]
    port: Option<BufReader<Box<dyn SerialPort>>>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_name", &self.port_name)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Open `port` at `baud`.
    #[cfg(feature = "instrument_serial")]
    pub fn open(port: &str, baud: u32, timeout: Duration) -> Result<Self, TransportError> {
        let handle = serialport::new(port, baud)
            .timeout(timeout)
            .open()
            .map_err(io::Error::from)?;
        info!(port, baud, "serial port opened");
        Ok(Self {
            port_name: port.to_string(),
            terminator: DEFAULT_TERMINATOR.to_vec(),
            port: Some(BufReader::new(handle)),
        })
    }

    /// Open `port` at `baud`.
    #[cfg(not(feature = "instrument_serial"))]
    pub fn open(port: &str, baud: u32, timeout: Duration) -> Result<Self, TransportError> {
        let _ = (baud, timeout);
        Err(TransportError::Other(format!(
            "cannot open '{}': serial support requires the instrument_serial feature",
            port
        )))
    }

    /// Replace the command terminator (default `\n`).
    pub fn with_terminator(mut self, terminator: &[u8]) -> Self {
        self.terminator = terminator.to_vec();
        self
    }
}

#[cfg(feature = "instrument_serial")]
impl SerialTransport {
    fn port(&mut self) -> Result<&mut BufReader<Box<dyn SerialPort>>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }

    fn send(&mut self, command: &[u8]) -> Result<(), TransportError> {
        let mut frame = command.to_vec();
        frame.extend_from_slice(&self.terminator);
        let port = self.port()?.get_mut();
        port.write_all(&frame)?;
        port.flush()?;
        Ok(())
    }
}

#[cfg(feature = "instrument_serial")]
impl Transport for SerialTransport {
    fn write(&mut self, command: &[u8]) -> Result<(), TransportError> {
        trace!(port = %self.port_name, command = %String::from_utf8_lossy(command), "write");
        self.send(command)
    }

    fn query(&mut self, command: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        trace!(port = %self.port_name, command = %String::from_utf8_lossy(command), "query");
        self.send(command)?;
        let terminator = self.terminator.last().copied().unwrap_or(b'\n');
        let port = self.port()?;
        port.get_mut().set_timeout(timeout).map_err(io::Error::from)?;
        read_reply(port, terminator).map_err(|err| map_io(err, command, timeout))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            info!(port = %self.port_name, "serial port closed");
        }
        Ok(())
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl Transport for SerialTransport {
    fn write(&mut self, _command: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::NotOpen)
    }

    fn query(&mut self, _command: &[u8], _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::NotOpen)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

// =============================================================================
// Mock
// =============================================================================

#[derive(Debug, Default)]
struct MockState {
    queued: HashMap<String, VecDeque<Vec<u8>>>,
    sticky: HashMap<String, Vec<u8>>,
    sent: Vec<String>,
    fail_next: bool,
    closed: bool,
}

/// Scripted transport for tests and simulation.
///
/// Clones share state, so a test can keep a handle for inspection after
/// moving another into a session.
///
/// Replies are looked up by the exact command text. One-shot replies queued
/// with [`push_reply`](Self::push_reply) are served first, in order; after
/// that the sticky reply from [`set_reply`](Self::set_reply) is repeated. A
/// query with neither times out.
///
/// ```rust
/// use scpi_bench::transport::{MockTransport, Transport};
/// use std::time::Duration;
///
/// let mock = MockTransport::new();
/// mock.set_reply("*IDN?", "MOCK,0,0,0\n");
///
/// let mut handle = mock.clone();
/// let reply = handle.query(b"*IDN?", Duration::from_secs(1)).unwrap();
/// assert_eq!(reply, b"MOCK,0,0,0\n");
/// assert_eq!(mock.sent(), vec!["*IDN?"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Mock with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a one-shot reply for `command`.
    pub fn push_reply(&self, command: &str, reply: impl Into<Vec<u8>>) {
        self.state()
            .queued
            .entry(command.to_string())
            .or_default()
            .push_back(reply.into());
    }

    /// Reply served for `command` whenever no one-shot reply is queued.
    pub fn set_reply(&self, command: &str, reply: impl Into<Vec<u8>>) {
        self.state().sticky.insert(command.to_string(), reply.into());
    }

    /// Make the next write or query fail.
    pub fn trigger_failure(&self) {
        self.state().fail_next = true;
    }

    /// Every command written or queried, in order.
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Forget the commands recorded so far.
    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn record(&self, command: &[u8]) -> Result<MutexGuard<'_, MockState>, TransportError> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::NotOpen);
        }
        if std::mem::take(&mut state.fail_next) {
            return Err(TransportError::Other("injected failure".to_string()));
        }
        state.sent.push(String::from_utf8_lossy(command).into_owned());
        Ok(state)
    }
}

impl Transport for MockTransport {
    fn write(&mut self, command: &[u8]) -> Result<(), TransportError> {
        self.record(command).map(drop)
    }

    fn query(&mut self, command: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut state = self.record(command)?;
        let key = String::from_utf8_lossy(command).into_owned();
        if let Some(reply) = state.queued.get_mut(&key).and_then(VecDeque::pop_front) {
            debug!(command = %key, "mock reply (queued)");
            return Ok(reply);
        }
        match state.sticky.get(&key) {
            Some(reply) => Ok(reply.clone()),
            None => Err(TransportError::Timeout {
                command: key,
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.state().closed = true;
        Ok(())
    }
}
