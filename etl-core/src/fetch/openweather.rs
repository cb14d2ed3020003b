use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::error::Error as StdError;
use tracing::{debug, info};

use crate::{
    config::{SourceConfig, Units},
    error::FetchError,
    model::RawObservation,
};

use super::WeatherSource;

/// Current-weather endpoint of the OpenWeather API.
#[derive(Debug, Clone)]
pub struct OpenWeatherSource {
    endpoint: Url,
    api_key: String,
    latitude: f64,
    longitude: f64,
    units: Units,
    http: Client,
}

impl OpenWeatherSource {
    pub fn new(endpoint: Url, api_key: String, latitude: f64, longitude: f64, units: Units) -> Self {
        Self {
            endpoint,
            api_key,
            latitude,
            longitude,
            units,
            http: Client::new(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "No API key configured for the weather source.\n\
                     Hint: run `weather-etl configure` and enter your API key."
                )
            })?;

        let endpoint = Url::parse(&config.endpoint)
            .with_context(|| format!("Invalid endpoint URL '{}'", config.endpoint))?;

        Ok(Self::new(
            endpoint,
            api_key.to_owned(),
            config.latitude,
            config.longitude,
            config.units,
        ))
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("lat", self.latitude.to_string()),
            ("lon", self.longitude.to_string()),
            ("appid", self.api_key.clone()),
        ];
        // The API already defaults to standard units.
        if self.units != Units::Standard {
            query.push(("units", self.units.as_str().to_string()));
        }
        query
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherSource {
    async fn fetch(&self) -> Result<RawObservation, FetchError> {
        info!(
            endpoint = %self.endpoint,
            lat = self.latitude,
            lon = self.longitude,
            units = %self.units,
            "requesting current weather"
        );

        let res = self
            .http
            .get(self.endpoint.clone())
            .query(&self.query())
            .send()
            .await
            .map_err(|e| FetchError::NetworkUnreachable {
                reason: error_chain(&e),
            })?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| FetchError::NetworkUnreachable {
                reason: format!("failed to read response body: {}", error_chain(&e)),
            })?;

        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let raw = RawObservation::from_json_str(&body)?;
        debug!(response = %raw.to_pretty_string(), "raw weather response");

        Ok(raw)
    }
}

/// reqwest's top-level message hides the cause; keep the whole chain.
fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        format!("{}...", body.chars().take(MAX).collect::<String>())
    } else {
        body.to_string()
    }
}
