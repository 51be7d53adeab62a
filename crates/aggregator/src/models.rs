use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::{Duration, OffsetDateTime};

use crate::{DailyExtremeRecord, OutageState};

/// The sealed set of weather fields the engine knows how to reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    WindSpeed,
    WindDirection,
    GustSpeed,
    Temperature,
    Dewpoint,
    Humidity,
    Pressure,
    Precipitation,
    Visibility,
    Ceiling,
    CloudCover,
}

impl FieldName {
    pub const ALL: [FieldName; 11] = [
        FieldName::WindSpeed,
        FieldName::WindDirection,
        FieldName::GustSpeed,
        FieldName::Temperature,
        FieldName::Dewpoint,
        FieldName::Humidity,
        FieldName::Pressure,
        FieldName::Precipitation,
        FieldName::Visibility,
        FieldName::Ceiling,
        FieldName::CloudCover,
    ];

    /// Speed, direction and gust travel together from a single source.
    pub const WIND_GROUP: [FieldName; 3] = [
        FieldName::WindSpeed,
        FieldName::WindDirection,
        FieldName::GustSpeed,
    ];

    /// Unit is a property of the field, so a null reading still carries one.
    pub fn unit(self) -> Unit {
        match self {
            FieldName::WindSpeed | FieldName::GustSpeed => Unit::Knots,
            FieldName::WindDirection => Unit::DegreesTrue,
            FieldName::Temperature | FieldName::Dewpoint => Unit::Celsius,
            FieldName::Humidity => Unit::Percent,
            FieldName::Pressure => Unit::InchesOfMercury,
            FieldName::Precipitation => Unit::Inches,
            FieldName::Visibility => Unit::StatuteMiles,
            FieldName::Ceiling => Unit::Feet,
            FieldName::CloudCover => Unit::SkyCoverCode,
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(self, FieldName::CloudCover)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldName::WindSpeed => "wind_speed",
            FieldName::WindDirection => "wind_direction",
            FieldName::GustSpeed => "gust_speed",
            FieldName::Temperature => "temperature",
            FieldName::Dewpoint => "dewpoint",
            FieldName::Humidity => "humidity",
            FieldName::Pressure => "pressure",
            FieldName::Precipitation => "precipitation",
            FieldName::Visibility => "visibility",
            FieldName::Ceiling => "ceiling",
            FieldName::CloudCover => "cloud_cover",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Knots,
    DegreesTrue,
    Celsius,
    Percent,
    InchesOfMercury,
    Inches,
    StatuteMiles,
    Feet,
    SkyCoverCode,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Unit::Knots => "kt",
            Unit::DegreesTrue => "deg",
            Unit::Celsius => "degC",
            Unit::Percent => "%",
            Unit::InchesOfMercury => "inHg",
            Unit::Inches => "in",
            Unit::StatuteMiles => "sm",
            Unit::Feet => "ft",
            Unit::SkyCoverCode => "code",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Text(String),
}

impl ReadingValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ReadingValue::Number(v) => Some(*v),
            ReadingValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ReadingValue::Number(_) => None,
            ReadingValue::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Number(v) => write!(f, "{}", v),
            ReadingValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ReadingValue {
    fn from(value: f64) -> Self {
        ReadingValue::Number(value)
    }
}

impl From<&str> for ReadingValue {
    fn from(value: &str) -> Self {
        ReadingValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        SourceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        SourceId(value.to_string())
    }
}

/// One measured value with the unit of its field and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    pub value: Option<ReadingValue>,
    pub unit: Unit,
    pub source: SourceId,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub valid: bool,
}

impl WeatherReading {
    pub fn new(
        field: FieldName,
        value: impl Into<ReadingValue>,
        source: SourceId,
        observed_at: OffsetDateTime,
    ) -> Self {
        WeatherReading {
            value: Some(value.into()),
            unit: field.unit(),
            source,
            observed_at,
            valid: true,
        }
    }

    /// A reported absence, e.g. a METAR with no cloud layer forming a ceiling.
    pub fn null(field: FieldName, source: SourceId, observed_at: OffsetDateTime) -> Self {
        WeatherReading {
            value: None,
            unit: field.unit(),
            source,
            observed_at,
            valid: true,
        }
    }

    pub fn invalidate(&mut self) {
        self.value = None;
        self.valid = false;
    }

    pub fn is_usable(&self) -> bool {
        self.valid && self.value.is_some()
    }

    pub fn as_number(&self) -> Option<f64> {
        if !self.valid {
            return None;
        }
        self.value.as_ref().and_then(ReadingValue::as_number)
    }

    pub fn age(&self, now: OffsetDateTime) -> Duration {
        now - self.observed_at
    }
}

/// Speed, direction and gust taken together from one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct WindGroup {
    pub speed: WeatherReading,
    pub direction: WeatherReading,
    pub gust: WeatherReading,
    pub source: SourceId,
}

impl WindGroup {
    /// Returns `None` unless all three components are present and usable.
    pub fn from_snapshot(snapshot: &WeatherSnapshot) -> Option<WindGroup> {
        let usable = |field| snapshot.reading(field).filter(|r| r.is_usable()).cloned();
        Some(WindGroup {
            speed: usable(FieldName::WindSpeed)?,
            direction: usable(FieldName::WindDirection)?,
            gust: usable(FieldName::GustSpeed)?,
            source: snapshot.source_id.clone(),
        })
    }

    /// The group is only as fresh as its oldest component.
    pub fn observed_at(&self) -> OffsetDateTime {
        self.speed
            .observed_at
            .min(self.direction.observed_at)
            .min(self.gust.observed_at)
    }

    pub fn into_readings(self) -> [(FieldName, WeatherReading); 3] {
        [
            (FieldName::WindSpeed, self.speed),
            (FieldName::WindDirection, self.direction),
            (FieldName::GustSpeed, self.gust),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    PrimarySensor,
    Metar,
    Nws,
    Backup,
}

impl SourceType {
    /// Report stations are only local when their identifier matches the airport.
    pub fn is_report_station(self) -> bool {
        matches!(self, SourceType::Metar | SourceType::Nws)
    }

    pub fn default_max_age(self) -> Duration {
        match self {
            SourceType::PrimarySensor | SourceType::Backup => Duration::minutes(10),
            SourceType::Nws => Duration::minutes(90),
            SourceType::Metar => Duration::hours(2),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::PrimarySensor => "primary-sensor",
            SourceType::Metar => "metar",
            SourceType::Nws => "nws",
            SourceType::Backup => "backup",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// timeout, DNS, connection
    Transient,
    /// auth, TLS, 4xx
    Permanent,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("dns lookup failed: {0}")]
    Dns(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("tls failure: {0}")]
    Tls(String),
    #[error("http status {0}")]
    Http(u16),
    #[error("unreadable response: {0}")]
    Parse(String),
    #[error("no gateway registered for provider {0}")]
    UnknownProvider(String),
    #[error("gateway failed internally: {0}")]
    Internal(String),
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::Timeout(_)
            | FetchError::Dns(_)
            | FetchError::Connection(_)
            | FetchError::Parse(_) => FailureClass::Transient,
            FetchError::Http(status) if (400..500).contains(status) => FailureClass::Permanent,
            FetchError::Http(_) => FailureClass::Transient,
            FetchError::Auth(_)
            | FetchError::Tls(_)
            | FetchError::UnknownProvider(_)
            | FetchError::Internal(_) => FailureClass::Permanent,
        }
    }
}

/// Everything one source returned in one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    pub source_id: SourceId,
    pub source_type: SourceType,
    pub local_station_id: Option<String>,
    pub readings: BTreeMap<FieldName, WeatherReading>,
    pub fetched_at: OffsetDateTime,
    pub error: Option<FetchError>,
}

impl WeatherSnapshot {
    pub fn new(source_id: SourceId, source_type: SourceType, fetched_at: OffsetDateTime) -> Self {
        WeatherSnapshot {
            source_id,
            source_type,
            local_station_id: None,
            readings: BTreeMap::new(),
            fetched_at,
            error: None,
        }
    }

    pub fn with_station(mut self, station_id: impl Into<String>) -> Self {
        self.local_station_id = Some(station_id.into());
        self
    }

    pub fn with_value(
        mut self,
        field: FieldName,
        value: impl Into<ReadingValue>,
        observed_at: OffsetDateTime,
    ) -> Self {
        let reading = WeatherReading::new(field, value, self.source_id.clone(), observed_at);
        self.readings.insert(field, reading);
        self
    }

    pub fn with_null(mut self, field: FieldName, observed_at: OffsetDateTime) -> Self {
        let reading = WeatherReading::null(field, self.source_id.clone(), observed_at);
        self.readings.insert(field, reading);
        self
    }

    pub fn reading(&self, field: FieldName) -> Option<&WeatherReading> {
        self.readings.get(&field)
    }

    /// Newest observation time across usable readings, used as the source's
    /// "last seen". Readings the validator rejected do not count.
    pub fn latest_observation(&self) -> Option<OffsetDateTime> {
        self.readings
            .values()
            .filter(|r| r.is_usable())
            .map(|r| r.observed_at)
            .max()
    }

    /// Re-stamps the snapshot and every reading with the configured source id.
    pub fn assign_source(&mut self, source_id: &SourceId) {
        self.source_id = source_id.clone();
        for reading in self.readings.values_mut() {
            reading.source = source_id.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: FieldName,
    pub source: SourceId,
    pub raw_value: Option<ReadingValue>,
    pub reason: String,
}

/// Ordered from least to most restrictive, so `max` picks the worst case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightCategory {
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
}

impl fmt::Display for FlightCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlightCategory::Vfr => "VFR",
            FlightCategory::Mvfr => "MVFR",
            FlightCategory::Ifr => "IFR",
            FlightCategory::Lifr => "LIFR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedAltitudes {
    pub pressure_altitude_ft: Option<f64>,
    pub density_altitude_ft: Option<f64>,
}

/// One cycle's reconciled view of an airport, with per-field provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedObservation {
    pub airport_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub fields: BTreeMap<FieldName, WeatherReading>,
    pub field_source_map: BTreeMap<FieldName, SourceId>,
    pub field_obs_time_map: BTreeMap<FieldName, OffsetDateTime>,
    pub flight_category: Option<FlightCategory>,
    pub altitudes: DerivedAltitudes,
    pub gust_factor_kt: Option<f64>,
    pub validation_issues: Vec<ValidationIssue>,
    pub daily_extremes: Option<DailyExtremeRecord>,
    pub outage: Option<OutageState>,
}

impl AggregatedObservation {
    pub fn empty(airport_id: impl Into<String>, generated_at: OffsetDateTime) -> Self {
        AggregatedObservation {
            airport_id: airport_id.into(),
            generated_at,
            fields: BTreeMap::new(),
            field_source_map: BTreeMap::new(),
            field_obs_time_map: BTreeMap::new(),
            flight_category: None,
            altitudes: DerivedAltitudes::default(),
            gust_factor_kt: None,
            validation_issues: vec![],
            daily_extremes: None,
            outage: None,
        }
    }

    /// Stores a selected reading and records where and when it came from.
    pub fn record(&mut self, field: FieldName, reading: WeatherReading) {
        self.field_source_map.insert(field, reading.source.clone());
        self.field_obs_time_map.insert(field, reading.observed_at);
        self.fields.insert(field, reading);
    }

    /// Nulls a field but keeps its provenance for audit.
    pub fn null_field(&mut self, field: FieldName) {
        if let Some(reading) = self.fields.get_mut(&field) {
            reading.invalidate();
        }
    }

    pub fn reading(&self, field: FieldName) -> Option<&WeatherReading> {
        self.fields.get(&field)
    }

    pub fn value(&self, field: FieldName) -> Option<f64> {
        self.fields.get(&field).and_then(WeatherReading::as_number)
    }

    pub fn is_usable(&self, field: FieldName) -> bool {
        self.fields.get(&field).is_some_and(WeatherReading::is_usable)
    }

    /// True when no field carries a value; the signal of a fully degraded cycle.
    pub fn is_degraded(&self) -> bool {
        !self.fields.values().any(WeatherReading::is_usable)
    }
}
