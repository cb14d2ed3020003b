use async_trait::async_trait;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::{config::WriteMode, error::LoadError, model::FlatRecord};

use super::RecordSink;

/// Comma-separated snapshot of the record with a header row.
#[derive(Debug, Clone)]
pub struct ArchiveSink {
    path: PathBuf,
    mode: WriteMode,
}

impl ArchiveSink {
    pub fn new(path: PathBuf, mode: WriteMode) -> Self {
        Self { path, mode }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn failed(&self, reason: impl ToString) -> LoadError {
        LoadError::ArchiveWriteFailed {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    async fn replace(&self, bytes: &[u8]) -> Result<(), LoadError> {
        // Write beside the target and rename, so readers never see half a file.
        let tmp = tmp_path(&self.path);
        let written = match fs::write(&tmp, bytes).await {
            Ok(()) => fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(self.failed(e));
        }
        Ok(())
    }

    async fn append(&self, bytes: &[u8]) -> Result<(), LoadError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.failed(e))?;

        file.write_all(bytes).await.map_err(|e| self.failed(e))?;
        file.flush().await.map_err(|e| self.failed(e))
    }

    /// Whether an append still needs the header row.
    async fn needs_header(&self) -> bool {
        match self.mode {
            WriteMode::Replace => true,
            WriteMode::Append => match fs::metadata(&self.path).await {
                Ok(meta) => meta.len() == 0,
                Err(_) => true,
            },
        }
    }
}

#[async_trait]
impl RecordSink for ArchiveSink {
    fn describe(&self) -> String {
        format!("archive {} ({})", self.path.display(), self.mode)
    }

    async fn write(&self, record: &FlatRecord) -> Result<(), LoadError> {
        let header = self.needs_header().await;
        let bytes = encode(record, header).map_err(|e| self.failed(e))?;
        debug!(path = %self.path.display(), bytes = bytes.len(), header, "encoded archive row");

        match self.mode {
            WriteMode::Replace => self.replace(&bytes).await,
            WriteMode::Append => self.append(&bytes).await,
        }
    }
}

/// Serialize one record, optionally preceded by the header row.
pub fn encode(record: &FlatRecord, header: bool) -> csv::Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(header)
        .from_writer(Vec::new());
    wtr.serialize(record)?;
    wtr.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

/// Parse an archive back into records.
pub fn read_records(path: &Path) -> csv::Result<Vec<FlatRecord>> {
    let mut rdr = csv::Reader::from_path(path)?;
    rdr.deserialize().collect()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}
