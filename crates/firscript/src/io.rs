use std::{
    cell::RefCell,
    io::{self, Write as _},
    rc::Rc,
};

use strum::Display;

/// Trait for handling output from the `print()` builtin.
///
/// Implement this to capture or redirect print output from sandboxed
/// scripts. The default implementation [`StdPrint`] writes to stdout.
pub trait PrintWriter {
    /// Called with one fully formatted print line, without the trailing
    /// newline.
    fn write_line(&mut self, line: &str);
}

pub(crate) type PrintHandle = Rc<RefCell<dyn PrintWriter>>;

/// Default `PrintWriter` that writes to stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write_line(&mut self, line: &str) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        let _ = handle.write_all(line.as_bytes());
        let _ = handle.write_all(b"\n");
    }
}

/// A `PrintWriter` that collects all output into a string.
///
/// Useful for testing or capturing print output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected output.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn write_line(&mut self, line: &str) {
        self.0.push_str(line);
        self.0.push('\n');
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write_line(&mut self, _line: &str) {}
}

/// Severity levels of the `log` namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LogLevel {
    #[strum(serialize = "INFO")]
    Info,
    #[strum(serialize = "WARNING")]
    Warning,
    #[strum(serialize = "ERROR")]
    Error,
}

/// Destination for `log.info` / `log.warning` / `log.error` calls.
pub trait LogSink {
    fn log(&mut self, level: LogLevel, message: &str);
}

/// Default sink, writing one line per record to stderr.
#[derive(Debug, Default)]
pub struct StderrLog;

impl LogSink for StderrLog {
    fn log(&mut self, level: LogLevel, message: &str) {
        eprintln!("[{level}] {message}");
    }
}

/// Sink that keeps `(level, message)` records for inspection.
#[derive(Debug, Default)]
pub struct CollectLog(Vec<(LogLevel, String)>);

impl CollectLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> &[(LogLevel, String)] {
        &self.0
    }
}

impl LogSink for CollectLog {
    fn log(&mut self, level: LogLevel, message: &str) {
        self.0.push((level, message.to_owned()));
    }
}
