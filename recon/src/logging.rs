//! Tracing setup: console layer plus a per-run scan.log, both writing
//! through the redactor so nothing in the catalog ever reaches a sink.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use recon_core::redact;

/// The swappable file sink behind the log layer. The subscriber is global
/// and installed once; the file target changes per run directory.
#[derive(Clone)]
pub struct LogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl LogSink {
    fn new() -> Self {
        LogSink {
            file: Arc::new(Mutex::new(None)),
        }
    }

    /// Point the sink at a run's scan.log. Appends so a resumed run keeps
    /// the original run's log history.
    pub fn set_file(&self, path: &Path) -> io::Result<()> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        *self.file.lock().expect("log sink lock") = Some(file);
        Ok(())
    }
}

pub struct RedactingWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl Write for RedactingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let scrubbed = redact::redact(&String::from_utf8_lossy(buf));
        if let Some(file) = self.file.lock().expect("log sink lock").as_mut() {
            file.write_all(scrubbed.as_bytes())?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.lock().expect("log sink lock").as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = RedactingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            file: self.file.clone(),
        }
    }
}

/// Console writer with the same redaction applied.
#[derive(Clone)]
pub struct RedactingStderr;

pub struct RedactingStderrWriter;

impl Write for RedactingStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let scrubbed = redact::redact(&String::from_utf8_lossy(buf));
        io::stderr().write_all(scrubbed.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingStderr {
    type Writer = RedactingStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingStderrWriter
    }
}

/// Install the global subscriber; returns the handle used to attach each
/// run's scan.log.
pub fn init(verbose: bool) -> LogSink {
    let level = if verbose { "debug" } else { "info" };
    let sink = LogSink::new();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(sink.clone())
        .with_ansi(false)
        .with_target(false);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(RedactingStderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(file_layer)
        .with(console_layer)
        .init();
    sink
}
