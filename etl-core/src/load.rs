//! Persisting a [`FlatRecord`] to the archive file and the relational table.
//!
//! The two sinks are written independently: a failure in one never prevents
//! the other from being attempted, and each reports its own outcome.

use async_trait::async_trait;
use std::fmt::Debug;
use tracing::{error, info};

use crate::{Config, error::LoadError, model::FlatRecord, retry::RetryPolicy};

pub mod archive;
pub mod table;

pub use archive::ArchiveSink;
pub use table::TableSink;

/// A durable destination for one record.
#[async_trait]
pub trait RecordSink: Send + Sync + Debug {
    /// Short human-readable description used in logs.
    fn describe(&self) -> String;

    /// Write `record`. Either the whole row lands or nothing does.
    async fn write(&self, record: &FlatRecord) -> Result<(), LoadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Succeeded,
    /// Exactly one sink holds the record; re-running only the failed sink is safe.
    PartiallyFailed,
    Failed,
}

/// Per-sink outcome of one load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub archive: Result<(), LoadError>,
    pub table: Result<(), LoadError>,
}

impl LoadResult {
    pub fn status(&self) -> LoadStatus {
        match (self.archive.is_ok(), self.table.is_ok()) {
            (true, true) => LoadStatus::Succeeded,
            (false, false) => LoadStatus::Failed,
            _ => LoadStatus::PartiallyFailed,
        }
    }
}

#[derive(Debug)]
pub struct Loader {
    archive: Box<dyn RecordSink>,
    table: Box<dyn RecordSink>,
    retry: RetryPolicy,
}

impl Loader {
    /// `retry` applies to the table sink; the archive is local and written once.
    ///
    /// Sink writes are never cut off by `retry.attempt_timeout`: each sink bounds
    /// its own attempts, and every attempt finishes before the next one starts.
    pub fn new(archive: Box<dyn RecordSink>, table: Box<dyn RecordSink>, retry: RetryPolicy) -> Self {
        Self {
            archive,
            table,
            retry,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let retry = config.retry.policy();
        let archive = ArchiveSink::new(config.archive.path.clone(), config.archive.mode);
        let table = TableSink::new(
            config.table.database.clone(),
            config.table.name.clone(),
            config.table.mode,
        )
        .with_busy_timeout(retry.attempt_timeout);

        Self::new(Box::new(archive), Box::new(table), retry)
    }

    /// Attempt both sinks concurrently and report each outcome.
    pub async fn load(&self, record: &FlatRecord) -> LoadResult {
        let archive = write_logged(self.archive.as_ref(), record, RetryPolicy::single_attempt());
        // A dropped table write keeps running on its blocking thread and can
        // still commit, so a second attempt may only start once it has ended.
        let table_retry = RetryPolicy {
            attempt_timeout: None,
            ..self.retry
        };
        let table = write_logged(self.table.as_ref(), record, table_retry);

        let (archive, table) = tokio::join!(archive, table);
        LoadResult { archive, table }
    }
}

async fn write_logged(
    sink: &dyn RecordSink,
    record: &FlatRecord,
    retry: RetryPolicy,
) -> Result<(), LoadError> {
    let target = sink.describe();
    info!(sink = %target, "writing record");

    let result = retry.run(&target, |_| sink.write(record)).await;
    match &result {
        Ok(()) => info!(sink = %target, "record written"),
        Err(err) => error!(sink = %target, error = %err, "sink write failed"),
    }
    result
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    /// In-memory sink that can be told to fail its first `failures` writes.
    #[derive(Debug, Clone)]
    pub struct MemorySink {
        pub rows: Arc<Mutex<Vec<FlatRecord>>>,
        pub calls: Arc<AtomicU32>,
        failures: u32,
        error: LoadError,
        delay: Duration,
    }

    impl MemorySink {
        pub fn healthy() -> Self {
            Self::failing(
                0,
                LoadError::InsertFailed {
                    table: "memory".into(),
                    reason: "unused".into(),
                },
            )
        }

        pub fn failing(failures: u32, error: LoadError) -> Self {
            Self {
                rows: Arc::default(),
                calls: Arc::default(),
                failures,
                error,
                delay: Duration::ZERO,
            }
        }

        /// Make every write take at least `delay`.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn always_failing(error: LoadError) -> Self {
            Self::failing(u32::MAX, error)
        }

        pub fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecordSink for MemorySink {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        async fn write(&self, record: &FlatRecord) -> Result<(), LoadError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if call < self.failures {
                return Err(self.error.clone());
            }
            self.rows.lock().unwrap().push(record.clone());
            Ok(())
        }
    }
}
