use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, TransactionBehavior, params};
use std::time::Duration;
use tracing::{debug, dispatcher};

use crate::{
    config::WriteMode,
    error::LoadError,
    model::FlatRecord,
    normalize::{FieldKind, SCHEMA},
};

use super::RecordSink;

/// Appends (or replaces) rows in a SQLite table whose columns mirror the record.
#[derive(Debug, Clone)]
pub struct TableSink {
    database: String,
    table: String,
    mode: WriteMode,
    busy_timeout: Option<Duration>,
}

impl TableSink {
    pub fn new(database: String, table: String, mode: WriteMode) -> Self {
        Self {
            database,
            table,
            mode,
            busy_timeout: None,
        }
    }

    /// How long SQLite waits on a locked database before giving up.
    ///
    /// This is the only bound on an attempt: a locked database fails the
    /// attempt with its transaction rolled back, so a retry cannot duplicate it.
    pub fn with_busy_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect(&self) -> Result<Connection, LoadError> {
        let failed = |e: rusqlite::Error| LoadError::ConnectionFailed {
            target: self.database.clone(),
            reason: e.to_string(),
        };

        let conn = Connection::open(&self.database).map_err(failed)?;
        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout).map_err(failed)?;
        }
        Ok(conn)
    }

    fn insert(&self, conn: &mut Connection, record: &FlatRecord) -> rusqlite::Result<()> {
        // Take the write lock up front so the busy handler covers every wait.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute_batch(&create_table_sql(&self.table))?;
        if self.mode == WriteMode::Replace {
            let removed = tx.execute(&format!("DELETE FROM {}", quote_ident(&self.table)), [])?;
            debug!(table = %self.table, removed, "cleared table for replace");
        }

        tx.execute(
            &insert_sql(&self.table),
            params![
                record.longitude,
                record.latitude,
                record.weather,
                record.description,
                record.temperature,
                record.feels_like,
                record.temp_min,
                record.temp_max,
                record.pressure,
                record.humidity,
                record.visibility,
                record.wind_speed,
                record.wind_direction,
                record.cloudiness,
                record.sunrise,
                record.sunset,
                record.timezone,
                record.city_id,
                record.city_name,
                record.code,
            ],
        )?;

        tx.commit()
    }

    /// Connect and insert on the current thread.
    fn write_blocking(&self, record: &FlatRecord) -> Result<(), LoadError> {
        let mut conn = self.connect()?;
        debug!(database = %self.database, "connected");

        self.insert(&mut conn, record)
            .map_err(|e| self.insert_error(e))
    }

    /// Lock contention leaves nothing behind and is worth retrying.
    fn insert_error(&self, e: rusqlite::Error) -> LoadError {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                LoadError::ConnectionFailed {
                    target: self.database.clone(),
                    reason: e.to_string(),
                }
            }
            _ => LoadError::InsertFailed {
                table: self.table.clone(),
                reason: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl RecordSink for TableSink {
    fn describe(&self) -> String {
        format!("table {} in {} ({})", self.table, self.database, self.mode)
    }

    async fn write(&self, record: &FlatRecord) -> Result<(), LoadError> {
        let sink = self.clone();
        let record = record.clone();
        let dispatch = dispatcher::get_default(|d| d.clone());

        tokio::task::spawn_blocking(move || {
            dispatcher::with_default(&dispatch, || sink.write_blocking(&record))
        })
        .await
        .map_err(|e| LoadError::InsertFailed {
            table: self.table.clone(),
            reason: format!("table writer task failed: {e}"),
        })?
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Float => "REAL",
        FieldKind::Integer => "INTEGER",
        FieldKind::Text => "TEXT",
    }
}

fn create_table_sql(table: &str) -> String {
    let columns = SCHEMA
        .iter()
        .map(|field| format!("{} {} NOT NULL", quote_ident(field.column), sql_type(field.kind)))
        .collect::<Vec<_>>()
        .join(", ");

    format!("CREATE TABLE IF NOT EXISTS {} ({columns});", quote_ident(table))
}

fn insert_sql(table: &str) -> String {
    let columns = FlatRecord::COLUMNS
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=FlatRecord::COLUMNS.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders})",
        quote_ident(table)
    )
}
