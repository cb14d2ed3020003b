//! Core library for the `weather-etl` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The fetcher for the current-weather endpoint
//! - Normalization of the nested response into one flat record
//! - The loader writing that record to a CSV archive and a SQLite table
//! - The pipeline tying the three stages together, with retry and an
//!   explicit per-run activity log
//!
//! It is used by `weather-etl`, but can also be reused by other binaries or services.

pub mod config;
pub mod error;
pub mod fetch;
pub mod load;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod retry;

pub use config::{Config, Units, WriteMode};
pub use error::{FetchError, LoadError, MappingError};
pub use fetch::{OpenWeatherSource, WeatherSource};
pub use load::{ArchiveSink, LoadResult, LoadStatus, Loader, RecordSink, TableSink};
pub use logging::ActivityLog;
pub use model::{FlatRecord, RawObservation};
pub use normalize::normalize;
pub use pipeline::{Pipeline, RunError, RunOutcome, Stage};
pub use retry::RetryPolicy;
