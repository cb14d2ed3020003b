//! Fetch → normalize → load, one record per run.

use std::fmt;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    Config,
    error::{FetchError, LoadError, MappingError},
    fetch::{WeatherSource, source_from_config},
    load::{LoadResult, Loader},
    model::FlatRecord,
    normalize::normalize,
    retry::RetryPolicy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Fetching,
    Normalizing,
    Loading,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Fetching => "fetching",
            Stage::Normalizing => "normalizing",
            Stage::Loading => "loading",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run produced nothing durable.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Normalize(#[from] MappingError),

    #[error("both sinks failed; archive: {archive}; table: {table}")]
    Load { archive: LoadError, table: LoadError },
}

impl RunError {
    /// The stage the run stopped in.
    pub fn stage(&self) -> Stage {
        match self {
            RunError::Fetch(_) => Stage::Fetching,
            RunError::Normalize(_) => Stage::Normalizing,
            RunError::Load { .. } => Stage::Loading,
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Succeeded {
        record: FlatRecord,
    },
    /// One sink holds the record and the other does not.
    PartiallyFailed {
        record: FlatRecord,
        load: LoadResult,
    },
    Failed(RunError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. })
    }

    /// 0 on success, 3 on partial failure, 1 otherwise. 2 stays with clap.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Succeeded { .. } => 0,
            RunOutcome::PartiallyFailed { .. } => 3,
            RunOutcome::Failed(_) => 1,
        }
    }
}

#[derive(Debug)]
pub struct Pipeline {
    source: Box<dyn WeatherSource>,
    loader: Loader,
    retry: RetryPolicy,
}

impl Pipeline {
    /// `retry` wraps the fetch; the loader carries its own policy for the table.
    pub fn new(source: Box<dyn WeatherSource>, loader: Loader, retry: RetryPolicy) -> Self {
        Self {
            source,
            loader,
            retry,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        Ok(Self::new(
            source_from_config(config)?,
            Loader::from_config(config),
            config.retry.policy(),
        ))
    }

    /// Fetch and normalize without touching either sink.
    pub async fn extract(&self) -> Result<FlatRecord, RunError> {
        info!(stage = %Stage::Fetching, "stage entered");
        let raw = self
            .retry
            .run("fetch", |_| self.source.fetch())
            .await
            .inspect_err(|e| error!(stage = %Stage::Fetching, error = %e, "stage failed"))?;
        info!(stage = %Stage::Fetching, "stage completed");

        info!(stage = %Stage::Normalizing, "stage entered");
        let record = normalize(&raw)
            .inspect_err(|e| error!(stage = %Stage::Normalizing, error = %e, "stage failed"))?;
        info!(stage = %Stage::Normalizing, record = ?record, "stage completed");

        Ok(record)
    }

    /// Run all three stages. Both sinks are attempted once loading starts.
    pub async fn run(&self) -> RunOutcome {
        let record = match self.extract().await {
            Ok(record) => record,
            Err(err) => return RunOutcome::Failed(err),
        };

        info!(stage = %Stage::Loading, "stage entered");
        let LoadResult { archive, table } = self.loader.load(&record).await;

        match (archive, table) {
            (Ok(()), Ok(())) => {
                info!(stage = %Stage::Loading, "stage completed");
                RunOutcome::Succeeded { record }
            }
            (Err(archive), Err(table)) => {
                error!(stage = %Stage::Loading, "record landed in no sink");
                RunOutcome::Failed(RunError::Load { archive, table })
            }
            (archive, table) => {
                warn!(
                    stage = %Stage::Loading,
                    archive_ok = archive.is_ok(),
                    table_ok = table.is_ok(),
                    "record landed in one sink only"
                );
                RunOutcome::PartiallyFailed {
                    record,
                    load: LoadResult { archive, table },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        load::testing::MemorySink,
        model::{
            RawObservation,
            fixtures::{ZOCCA_JSON, zocca_record},
        },
    };
    use async_trait::async_trait;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    /// Replays canned results, repeating the last one.
    #[derive(Debug)]
    struct ScriptedSource {
        responses: Vec<Result<RawObservation, FetchError>>,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<RawObservation, FetchError>>) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            let source = Self {
                responses,
                calls: calls.clone(),
            };
            (source, calls)
        }
    }

    #[async_trait]
    impl WeatherSource for ScriptedSource {
        async fn fetch(&self) -> Result<RawObservation, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let index = call.min(self.responses.len() - 1);
            self.responses[index].clone()
        }
    }

    fn ok_raw() -> Result<RawObservation, FetchError> {
        RawObservation::from_json_str(ZOCCA_JSON)
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            attempt_timeout: Some(Duration::from_secs(5)),
        }
    }

    fn pipeline(
        responses: Vec<Result<RawObservation, FetchError>>,
        archive: &MemorySink,
        table: &MemorySink,
    ) -> (Pipeline, Arc<AtomicU32>) {
        let (source, calls) = ScriptedSource::new(responses);
        let loader = Loader::new(
            Box::new(archive.clone()),
            Box::new(table.clone()),
            fast_retry(1),
        );
        (Pipeline::new(Box::new(source), loader, fast_retry(3)), calls)
    }

    fn connection_refused() -> LoadError {
        LoadError::ConnectionFailed {
            target: "weather.db".into(),
            reason: "refused".into(),
        }
    }

    #[tokio::test]
    async fn full_success_writes_both_sinks() {
        let (archive, table) = (MemorySink::healthy(), MemorySink::healthy());
        let (pipeline, _) = pipeline(vec![ok_raw()], &archive, &table);

        let outcome = pipeline.run().await;

        assert!(outcome.is_success());
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(archive.row_count(), 1);
        assert_eq!(table.row_count(), 1);
    }

    #[tokio::test]
    async fn unauthorized_fetch_stops_before_loading() {
        let (archive, table) = (MemorySink::healthy(), MemorySink::healthy());
        let unauthorized = FetchError::Http {
            status: 401,
            body: "Invalid API key".into(),
        };
        let (pipeline, calls) = pipeline(vec![Err(unauthorized.clone())], &archive, &table);

        let outcome = pipeline.run().await;

        match &outcome {
            RunOutcome::Failed(err @ RunError::Fetch(fetch)) => {
                assert_eq!(fetch, &unauthorized);
                assert_eq!(err.stage(), Stage::Fetching);
            }
            other => panic!("expected fetch failure, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 1);
        // 401 is permanent: one attempt, no sink touched.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(archive.call_count(), 0);
        assert_eq!(table.call_count(), 0);
    }

    #[tokio::test]
    async fn transient_fetch_failures_are_retried() {
        let (archive, table) = (MemorySink::healthy(), MemorySink::healthy());
        let unavailable = Err(FetchError::Http {
            status: 503,
            body: String::new(),
        });
        let (pipeline, calls) = pipeline(vec![unavailable, ok_raw()], &archive, &table);

        assert!(pipeline.run().await.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mapping_failure_stops_before_loading() {
        let (archive, table) = (MemorySink::healthy(), MemorySink::healthy());
        let raw = RawObservation::from_json_str(r#"{"coord": {"lon": 1.0, "lat": 2.0}, "weather": []}"#);
        let (pipeline, _) = pipeline(vec![raw], &archive, &table);

        let outcome = pipeline.run().await;

        match outcome {
            RunOutcome::Failed(RunError::Normalize(err)) => assert_eq!(err.field, "Weather"),
            other => panic!("expected mapping failure, got {other:?}"),
        }
        assert_eq!(archive.call_count(), 0);
        assert_eq!(table.call_count(), 0);
    }

    #[tokio::test]
    async fn table_outage_is_partial_failure() {
        let archive = MemorySink::healthy();
        let table = MemorySink::always_failing(connection_refused());
        let (pipeline, _) = pipeline(vec![ok_raw()], &archive, &table);

        let outcome = pipeline.run().await;

        match &outcome {
            RunOutcome::PartiallyFailed { record, load } => {
                assert_eq!(record, &zocca_record());
                assert_eq!(load.archive, Ok(()));
                assert_eq!(load.table, Err(connection_refused()));
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 3);
        assert_eq!(archive.row_count(), 1);
    }

    #[tokio::test]
    async fn both_sinks_failing_is_total_failure() {
        let archive = MemorySink::always_failing(LoadError::ArchiveWriteFailed {
            path: "weather_data.csv".into(),
            reason: "read-only file system".into(),
        });
        let table = MemorySink::always_failing(connection_refused());
        let (pipeline, _) = pipeline(vec![ok_raw()], &archive, &table);

        let outcome = pipeline.run().await;

        match &outcome {
            RunOutcome::Failed(err @ RunError::Load { .. }) => {
                assert_eq!(err.stage(), Stage::Loading);
                assert!(err.to_string().contains("read-only file system"));
                assert!(err.to_string().contains("refused"));
            }
            other => panic!("expected load failure, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn extract_never_touches_sinks() {
        let (archive, table) = (MemorySink::healthy(), MemorySink::healthy());
        let (pipeline, _) = pipeline(vec![ok_raw()], &archive, &table);

        assert_eq!(pipeline.extract().await.unwrap(), zocca_record());
        assert_eq!(archive.call_count(), 0);
        assert_eq!(table.call_count(), 0);
    }

    #[test]
    fn from_config_requires_api_key() {
        let err = Pipeline::from_config(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("No API key configured"));
    }
}
