//! Flattening of the nested API response into a [`FlatRecord`].
//!
//! Every output column is described by a [`SourceField`]: where it lives in the
//! raw response and which scalar type it must have. Fields are read in column
//! order and the first one that cannot be read aborts normalization, so a
//! record is either complete or not produced at all.

use std::fmt::Write as _;

use serde_json::Value;

use crate::{
    error::{MappingError, MappingErrorKind},
    model::{FlatRecord, RawObservation, json_type_name},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Key(&'static str),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Integer,
    Text,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            FieldKind::Float => "a number",
            FieldKind::Integer => "an integer",
            FieldKind::Text => "a string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceField {
    pub column: &'static str,
    pub path: &'static [Step],
    pub kind: FieldKind,
}

impl SourceField {
    /// Dotted rendering of the path, e.g. `weather[0].main`.
    pub fn path_string(&self) -> String {
        let mut out = String::new();
        for step in self.path {
            match step {
                Step::Key(key) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(key);
                }
                Step::Index(i) => {
                    let _ = write!(out, "[{i}]");
                }
            }
        }
        out
    }

    fn locate<'a>(&self, root: &'a Value) -> Result<&'a Value, MappingError> {
        let found = self.path.iter().try_fold(root, |node, step| match step {
            Step::Key(key) => node.get(key),
            Step::Index(i) => node.get(i),
        });

        match found {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(self.error(MappingErrorKind::Missing)),
        }
    }

    fn error(&self, kind: MappingErrorKind) -> MappingError {
        MappingError {
            field: self.column,
            path: self.path_string(),
            kind,
        }
    }

    fn wrong_type(&self, found: &Value) -> MappingError {
        tracing::debug!(
            field = self.column,
            found = json_type_name(found),
            "unexpected value type"
        );
        self.error(MappingErrorKind::WrongType {
            expected: self.kind.name(),
        })
    }

    fn read_float(&self, root: &Value) -> Result<f64, MappingError> {
        debug_assert_eq!(self.kind, FieldKind::Float);
        let value = self.locate(root)?;
        value.as_f64().ok_or_else(|| self.wrong_type(value))
    }

    fn read_integer(&self, root: &Value) -> Result<i64, MappingError> {
        debug_assert_eq!(self.kind, FieldKind::Integer);
        let value = self.locate(root)?;
        if let Some(n) = value.as_i64() {
            return Ok(n);
        }
        // Some stations report integral values as `1020.0`.
        match value.as_f64() {
            // `i64::MAX as f64` rounds up to 2^63, which is already out of range.
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Ok(f as i64)
            }
            _ => Err(self.wrong_type(value)),
        }
    }

    fn read_text(&self, root: &Value) -> Result<String, MappingError> {
        debug_assert_eq!(self.kind, FieldKind::Text);
        let value = self.locate(root)?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| self.wrong_type(value))
    }
}

const fn field(column: &'static str, path: &'static [Step], kind: FieldKind) -> SourceField {
    SourceField { column, path, kind }
}

use FieldKind::{Float, Integer, Text};
use Step::{Index, Key};

pub const LONGITUDE: SourceField = field("Longitude", &[Key("coord"), Key("lon")], Float);
pub const LATITUDE: SourceField = field("Latitude", &[Key("coord"), Key("lat")], Float);
pub const WEATHER: SourceField = field("Weather", &[Key("weather"), Index(0), Key("main")], Text);
pub const DESCRIPTION: SourceField = field(
    "Description",
    &[Key("weather"), Index(0), Key("description")],
    Text,
);
pub const TEMPERATURE: SourceField = field("Temperature", &[Key("main"), Key("temp")], Float);
pub const FEELS_LIKE: SourceField = field("Feels_Like", &[Key("main"), Key("feels_like")], Float);
pub const TEMP_MIN: SourceField = field("Temp_Min", &[Key("main"), Key("temp_min")], Float);
pub const TEMP_MAX: SourceField = field("Temp_Max", &[Key("main"), Key("temp_max")], Float);
pub const PRESSURE: SourceField = field("Pressure", &[Key("main"), Key("pressure")], Integer);
pub const HUMIDITY: SourceField = field("Humidity", &[Key("main"), Key("humidity")], Integer);
pub const VISIBILITY: SourceField = field("Visibility", &[Key("visibility")], Integer);
pub const WIND_SPEED: SourceField = field("Wind_Speed", &[Key("wind"), Key("speed")], Float);
pub const WIND_DIRECTION: SourceField =
    field("Wind_Direction", &[Key("wind"), Key("deg")], Integer);
pub const CLOUDINESS: SourceField = field("Cloudiness", &[Key("clouds"), Key("all")], Integer);
pub const SUNRISE: SourceField = field("Sunrise", &[Key("sys"), Key("sunrise")], Integer);
pub const SUNSET: SourceField = field("Sunset", &[Key("sys"), Key("sunset")], Integer);
pub const TIMEZONE: SourceField = field("Timezone", &[Key("timezone")], Integer);
pub const CITY_ID: SourceField = field("City_ID", &[Key("id")], Integer);
pub const CITY_NAME: SourceField = field("City_Name", &[Key("name")], Text);
pub const CODE: SourceField = field("Code", &[Key("cod")], Integer);

/// All source fields, in column order.
pub const SCHEMA: [SourceField; 20] = [
    LONGITUDE,
    LATITUDE,
    WEATHER,
    DESCRIPTION,
    TEMPERATURE,
    FEELS_LIKE,
    TEMP_MIN,
    TEMP_MAX,
    PRESSURE,
    HUMIDITY,
    VISIBILITY,
    WIND_SPEED,
    WIND_DIRECTION,
    CLOUDINESS,
    SUNRISE,
    SUNSET,
    TIMEZONE,
    CITY_ID,
    CITY_NAME,
    CODE,
];

/// Map a raw observation onto the twenty-column record.
///
/// Values pass through as received; no unit conversion or rounding.
pub fn normalize(raw: &RawObservation) -> Result<FlatRecord, MappingError> {
    let root = raw.as_value();

    // Struct fields are evaluated in source order, which is column order.
    Ok(FlatRecord {
        longitude: LONGITUDE.read_float(root)?,
        latitude: LATITUDE.read_float(root)?,
        weather: WEATHER.read_text(root)?,
        description: DESCRIPTION.read_text(root)?,
        temperature: TEMPERATURE.read_float(root)?,
        feels_like: FEELS_LIKE.read_float(root)?,
        temp_min: TEMP_MIN.read_float(root)?,
        temp_max: TEMP_MAX.read_float(root)?,
        pressure: PRESSURE.read_integer(root)?,
        humidity: HUMIDITY.read_integer(root)?,
        visibility: VISIBILITY.read_integer(root)?,
        wind_speed: WIND_SPEED.read_float(root)?,
        wind_direction: WIND_DIRECTION.read_integer(root)?,
        cloudiness: CLOUDINESS.read_integer(root)?,
        sunrise: SUNRISE.read_integer(root)?,
        sunset: SUNSET.read_integer(root)?,
        timezone: TIMEZONE.read_integer(root)?,
        city_id: CITY_ID.read_integer(root)?,
        city_name: CITY_NAME.read_text(root)?,
        code: CODE.read_integer(root)?,
    })
}
