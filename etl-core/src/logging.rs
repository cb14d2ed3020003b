//! Per-run activity log: console output mirrored into a timestamped file.
//!
//! The log is a handle, not a global subscriber. Callers attach
//! [`ActivityLog::dispatch`] to the work they want recorded (for example with
//! `tracing::instrument::WithSubscriber`) and dropping the handle flushes the
//! file.

use anyhow::{Context, Result};
use chrono::Local;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use tracing::Dispatch;
use tracing_subscriber::{EnvFilter, fmt, fmt::MakeWriter, layer::SubscriberExt};

/// Shared, buffered handle to the log file.
#[derive(Debug, Clone)]
struct LogFile(Arc<Mutex<BufWriter<File>>>);

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub struct ActivityLog {
    dispatch: Dispatch,
    file: LogFile,
    path: PathBuf,
}

impl ActivityLog {
    /// Create `log_<YYYYMMDD_HHMMSS>.txt` in `dir` and build a subscriber that
    /// writes to it and to stderr. `filter` uses `EnvFilter` syntax.
    pub fn open(dir: &Path, filter: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

        let path = dir.join(format!("log_{}.txt", Local::now().format("%Y%m%d_%H%M%S")));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        let file = LogFile(Arc::new(Mutex::new(BufWriter::new(file))));

        let filter = EnvFilter::try_new(filter)
            .with_context(|| format!("Invalid log filter '{filter}'"))?;

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr).with_target(false))
            .with(
                fmt::layer()
                    .with_writer(file.clone())
                    .with_ansi(false)
                    .with_target(false),
            );

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            file,
            path,
        })
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> io::Result<()> {
        self.file.clone().flush()
    }
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for ActivityLog {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
