use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;

/// The untouched JSON object returned by the weather endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation(Value);

impl RawObservation {
    /// Parse a response body. Anything other than a JSON object is malformed.
    pub fn from_json_str(body: &str) -> Result<Self, FetchError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| FetchError::MalformedResponse {
                reason: e.to_string(),
            })?;

        Self::try_from(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}

impl TryFrom<Value> for RawObservation {
    type Error = FetchError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(FetchError::MalformedResponse {
                reason: format!("expected a JSON object, got {}", json_type_name(&value)),
            })
        }
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One flattened observation, one row in every sink.
///
/// Serde names are the archive header and the table column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    #[serde(rename = "Longitude")]
    pub longitude: f64,
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    #[serde(rename = "Weather")]
    pub weather: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Temperature")]
    pub temperature: f64,
    #[serde(rename = "Feels_Like")]
    pub feels_like: f64,
    #[serde(rename = "Temp_Min")]
    pub temp_min: f64,
    #[serde(rename = "Temp_Max")]
    pub temp_max: f64,
    #[serde(rename = "Pressure")]
    pub pressure: i64,
    #[serde(rename = "Humidity")]
    pub humidity: i64,
    #[serde(rename = "Visibility")]
    pub visibility: i64,
    #[serde(rename = "Wind_Speed")]
    pub wind_speed: f64,
    #[serde(rename = "Wind_Direction")]
    pub wind_direction: i64,
    #[serde(rename = "Cloudiness")]
    pub cloudiness: i64,
    #[serde(rename = "Sunrise")]
    pub sunrise: i64,
    #[serde(rename = "Sunset")]
    pub sunset: i64,
    #[serde(rename = "Timezone")]
    pub timezone: i64,
    #[serde(rename = "City_ID")]
    pub city_id: i64,
    #[serde(rename = "City_Name")]
    pub city_name: String,
    #[serde(rename = "Code")]
    pub code: i64,
}

impl FlatRecord {
    pub const COLUMNS: [&'static str; 20] = [
        "Longitude",
        "Latitude",
        "Weather",
        "Description",
        "Temperature",
        "Feels_Like",
        "Temp_Min",
        "Temp_Max",
        "Pressure",
        "Humidity",
        "Visibility",
        "Wind_Speed",
        "Wind_Direction",
        "Cloudiness",
        "Sunrise",
        "Sunset",
        "Timezone",
        "City_ID",
        "City_Name",
        "Code",
    ];

    /// Column/value pairs in column order, formatted for display.
    pub fn display_pairs(&self) -> Vec<(&'static str, String)> {
        let values = [
            self.longitude.to_string(),
            self.latitude.to_string(),
            self.weather.clone(),
            self.description.clone(),
            self.temperature.to_string(),
            self.feels_like.to_string(),
            self.temp_min.to_string(),
            self.temp_max.to_string(),
            self.pressure.to_string(),
            self.humidity.to_string(),
            self.visibility.to_string(),
            self.wind_speed.to_string(),
            self.wind_direction.to_string(),
            self.cloudiness.to_string(),
            self.sunrise.to_string(),
            self.sunset.to_string(),
            self.timezone.to_string(),
            self.city_id.to_string(),
            self.city_name.clone(),
            self.code.to_string(),
        ];

        Self::COLUMNS.into_iter().zip(values).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_object_bodies_are_malformed() {
        let err = RawObservation::from_json_str("[1, 2]").unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse { ref reason } if reason.contains("array")));

        let err = RawObservation::from_json_str("<html>").unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse { .. }));
    }

    #[test]
    fn serde_field_names_match_columns() {
        let value = serde_json::to_value(fixtures::zocca_record()).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), FlatRecord::COLUMNS.len());
        for column in FlatRecord::COLUMNS {
            assert!(object.contains_key(column), "missing column {column}");
        }
    }

    #[test]
    fn display_pairs_follow_column_order() {
        let pairs = fixtures::zocca_record().display_pairs();

        assert_eq!(pairs.len(), 20);
        assert_eq!(pairs[0], ("Longitude", "10.99".to_string()));
        assert_eq!(pairs[18], ("City_Name", "Zocca".to_string()));
        assert_eq!(pairs[19], ("Code", "200".to_string()));
    }
}
