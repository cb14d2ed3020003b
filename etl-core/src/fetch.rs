use crate::{Config, error::FetchError, model::RawObservation};
use async_trait::async_trait;
use std::fmt::Debug;

pub mod openweather;

pub use openweather::OpenWeatherSource;

/// A remote endpoint that yields one raw observation per call.
#[async_trait]
pub trait WeatherSource: Send + Sync + Debug {
    async fn fetch(&self) -> Result<RawObservation, FetchError>;
}

/// Construct the OpenWeather source described by `config`.
pub fn source_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherSource>> {
    let source = OpenWeatherSource::from_config(&config.source)?;
    Ok(Box::new(source))
}
