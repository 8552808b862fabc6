//! Test-result logging collaborators.
//!
//! The limit checker hands every pass / fail record to a [`TestLog`]. Three
//! implementations are provided:
//!
//! - [`TracingLog`]: forwards records as `tracing` events on the `testlog` target.
//! - [`FileLog`]: plain-text report file with sequential `<ROOT>_NNNN` naming.
//! - [`MemoryLog`]: keeps records in memory for assertions.
//!
//! Logging never fails the test run. [`FileLog`] keeps the first write error
//! and reports it from [`FileLog::flush`] / [`FileLog::close`].

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Prefix that marks failure lines in text reports.
pub const FAIL_PREFIX: &str = "**** Error: ";

/// Name of the file that remembers previously used log names.
pub const LAST_LOG_FILE: &str = "lastlog.txt";

/// Sink for test records.
pub trait TestLog {
    /// Free-form informational line.
    fn log_text(&mut self, line: &str);

    /// A failed check.
    fn log_fail(&mut self, line: &str);

    /// A passed check.
    fn log_pass(&mut self, line: &str) {
        self.log_text(line);
    }

    /// A named measurement.
    fn log_value(&mut self, name: &str, value: f64, unit: &str) {
        self.log_text(&format!("{:<16} = {:.6} {}", name, value, unit));
    }
}

impl<L: TestLog + ?Sized> TestLog for &mut L {
    fn log_text(&mut self, line: &str) {
        (**self).log_text(line)
    }

    fn log_fail(&mut self, line: &str) {
        (**self).log_fail(line)
    }

    fn log_pass(&mut self, line: &str) {
        (**self).log_pass(line)
    }

    fn log_value(&mut self, name: &str, value: f64, unit: &str) {
        (**self).log_value(name, value, unit)
    }
}

impl<L: TestLog + ?Sized> TestLog for Box<L> {
    fn log_text(&mut self, line: &str) {
        (**self).log_text(line)
    }

    fn log_fail(&mut self, line: &str) {
        (**self).log_fail(line)
    }

    fn log_pass(&mut self, line: &str) {
        (**self).log_pass(line)
    }

    fn log_value(&mut self, name: &str, value: f64, unit: &str) {
        (**self).log_value(name, value, unit)
    }
}

/// Emits records as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl TestLog for TracingLog {
    fn log_text(&mut self, line: &str) {
        info!(target: "testlog", "{}", line);
    }

    fn log_fail(&mut self, line: &str) {
        error!(target: "testlog", "{}", line);
    }
}

/// Kind of a record held by [`MemoryLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Free text.
    Text,
    /// Passed check.
    Pass,
    /// Failed check.
    Fail,
}

/// In-memory record list.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    records: Vec<(RecordKind, String)>,
}

impl MemoryLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in arrival order.
    pub fn records(&self) -> &[(RecordKind, String)] {
        &self.records
    }

    /// Lines of one kind.
    pub fn lines(&self, kind: RecordKind) -> Vec<&str> {
        self.records
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, line)| line.as_str())
            .collect()
    }
}

impl TestLog for MemoryLog {
    fn log_text(&mut self, line: &str) {
        self.records.push((RecordKind::Text, line.to_string()));
    }

    fn log_fail(&mut self, line: &str) {
        self.records.push((RecordKind::Fail, line.to_string()));
    }

    fn log_pass(&mut self, line: &str) {
        self.records.push((RecordKind::Pass, line.to_string()));
    }
}

/// Plain-text report file.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    writer: BufWriter<File>,
    error: Option<io::Error>,
}

impl FileLog {
    /// Create (or truncate) the report at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut log = Self {
            path,
            writer: BufWriter::new(file),
            error: None,
        };
        let opened = format!("# opened {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        log.write_line(&opened);
        info!(path = %log.path.display(), "test log opened");
        Ok(log)
    }

    /// Open the next sequentially numbered report in `dir` and record its
    /// name in `lastlog.txt`.
    ///
    /// `dir` is created when missing.
    pub fn open_next(dir: impl AsRef<Path>, root: &str, extension: &str) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let name = next_log_name(dir, root, extension)?;
        let log = Self::create(dir.join(&name))?;

        let history = dir.join(LAST_LOG_FILE);
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&history)
            .and_then(|mut file| writeln!(file, "{}", name));
        if let Err(err) = appended {
            warn!(path = %history.display(), error = %err, "could not update log history");
        }
        Ok(log)
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered lines, surfacing any earlier write error.
    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.writer.flush()
    }

    /// Flush and close the report.
    pub fn close(mut self) -> io::Result<()> {
        self.flush()
    }

    fn write_line(&mut self, line: &str) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = writeln!(self.writer, "{}", line) {
            error!(path = %self.path.display(), error = %err, "test log write failed");
            self.error = Some(err);
        }
    }
}

impl TestLog for FileLog {
    fn log_text(&mut self, line: &str) {
        self.write_line(line);
    }

    fn log_fail(&mut self, line: &str) {
        self.write_line(&format!("{}{}", FAIL_PREFIX, line));
    }

    fn log_pass(&mut self, line: &str) {
        self.write_line(&format!("    {}", line));
    }
}

/// Choose the next report name in `dir`.
///
/// The last line of `lastlog.txt` is taken as the previous name. When it ends
/// in four digits before the extension, the number is incremented and the
/// prefix kept. Otherwise, or without history, `<ROOT>_0000<extension>` is
/// used. Names of files that already exist are skipped.
pub fn next_log_name(dir: &Path, root: &str, extension: &str) -> io::Result<String> {
    let default = (format!("{}_", root.to_uppercase()), 0u32);
    let (prefix, mut number) = match fs::read_to_string(dir.join(LAST_LOG_FILE)) {
        Ok(history) => history
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .and_then(split_numbered)
            .map(|(prefix, number)| (prefix.to_string(), number + 1))
            .unwrap_or(default),
        Err(err) if err.kind() == io::ErrorKind::NotFound => default,
        Err(err) => return Err(err),
    };

    loop {
        let name = format!("{}{:04}{}", prefix, number, extension);
        if !dir.join(&name).exists() {
            return Ok(name);
        }
        number += 1;
    }
}

/// `BOARD_0012.log` -> `("BOARD_", 12)`.
fn split_numbered(name: &str) -> Option<(&str, u32)> {
    let stem = match name.rfind('.') {
        Some(dot) => &name[..dot],
        None => name,
    };
    let split = stem.len().checked_sub(4)?;
    let digits = stem.get(split..)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((&stem[..split], digits.parse().ok()?))
}
