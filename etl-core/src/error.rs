//! Typed failures for each pipeline stage.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::retry::Retryable;

/// Failure to obtain a raw observation from the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection-level failure: DNS, refused connection, TLS, timeout.
    #[error("weather endpoint unreachable: {reason}")]
    NetworkUnreachable { reason: String },

    /// The endpoint answered with a non-success status code.
    #[error("weather endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The body could not be parsed as a JSON object.
    #[error("malformed weather response: {reason}")]
    MalformedResponse { reason: String },
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::NetworkUnreachable { .. } => true,
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
            FetchError::MalformedResponse { .. } => false,
        }
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        FetchError::NetworkUnreachable {
            reason: format!("{operation} timed out after {after:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingErrorKind {
    Missing,
    WrongType { expected: &'static str },
}

/// A required field of the raw observation is absent or has the wrong type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot map field `{field}` from `{path}`: {}", describe_kind(.kind))]
pub struct MappingError {
    /// Output column name, e.g. `Weather`.
    pub field: &'static str,
    /// Source path inside the raw response, e.g. `weather[0].main`.
    pub path: String,
    pub kind: MappingErrorKind,
}

fn describe_kind(kind: &MappingErrorKind) -> String {
    match kind {
        MappingErrorKind::Missing => "value is missing".to_string(),
        MappingErrorKind::WrongType { expected } => format!("expected {expected}"),
    }
}

/// Failure of a single sink write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("failed to write archive {}: {reason}", path.display())]
    ArchiveWriteFailed { path: PathBuf, reason: String },

    #[error("failed to connect to database {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("failed to insert into table {table}: {reason}")]
    InsertFailed { table: String, reason: String },

    /// The write was abandoned at its deadline and may still have landed.
    #[error("write to {sink} abandoned after {after:?}; it may still have been applied")]
    TimedOut { sink: String, after: Duration },
}

impl Retryable for LoadError {
    fn is_transient(&self) -> bool {
        matches!(self, LoadError::ConnectionFailed { .. })
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        LoadError::TimedOut {
            sink: operation.to_string(),
            after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        let http = |status| FetchError::Http {
            status,
            body: String::new(),
        };

        assert!(http(503).is_transient());
        assert!(http(429).is_transient());
        assert!(!http(401).is_transient());
        assert!(!http(404).is_transient());
    }

    #[test]
    fn malformed_response_is_not_transient() {
        let err = FetchError::MalformedResponse {
            reason: "eof".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn only_connection_failures_are_retried_for_loads() {
        let conn = LoadError::ConnectionFailed {
            target: "weather.db".into(),
            reason: "locked".into(),
        };
        let insert = LoadError::InsertFailed {
            table: "zocco".into(),
            reason: "no such column".into(),
        };

        assert!(conn.is_transient());
        assert!(!insert.is_transient());
    }

    #[test]
    fn abandoned_writes_are_final_and_name_the_sink() {
        let err = LoadError::timed_out(
            "table zocco in weather.db (append)",
            Duration::from_millis(300),
        );

        assert!(!err.is_transient());
        assert!(err.to_string().contains("table zocco in weather.db"));
    }

    #[test]
    fn fetch_timeouts_are_retried() {
        let err = FetchError::timed_out("fetch", Duration::from_secs(30));

        assert!(err.is_transient());
        assert!(err.to_string().contains("fetch timed out after 30s"));
    }

    #[test]
    fn mapping_error_message_names_field_and_path() {
        let err = MappingError {
            field: "Weather",
            path: "weather[0].main".into(),
            kind: MappingErrorKind::Missing,
        };

        let msg = err.to_string();
        assert!(msg.contains("`Weather`"));
        assert!(msg.contains("weather[0].main"));
        assert!(msg.contains("missing"));
    }
}
