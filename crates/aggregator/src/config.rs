//! Airport and engine configuration.
//!
//! Raw `*Config` structs mirror the TOML file. Converting an `AirportConfig`
//! into an `Airport` performs every check that would otherwise surface
//! mid-cycle, so a bad file is rejected before the first aggregation runs.

use airwx_core::{
    find_config_file, load_config, ConfigSource, CONFIG_ENV_VAR, CONFIG_FILENAME,
    DEFAULT_FETCH_DEADLINE, DEFAULT_HARD_STALENESS, DEFAULT_MAX_CONCURRENT_AIRPORTS,
    DEFAULT_OUTAGE_THRESHOLD, DEFAULT_SOURCE_TIMEOUT, MAX_SETTING_SECONDS,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration as StdDuration;
use time::Duration;
use time_tz::{timezones, TimeZone, Tz};

use crate::{BreakerSettings, SourceId, SourceType};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("failed to load configuration from {origin}: {reason}")]
    Load { origin: String, reason: String },
    #[error("airport entry has a blank identifier")]
    BlankIdentifier,
    #[error("airport {0} is configured more than once")]
    DuplicateAirport(String),
    #[error("airport {0} has no timezone")]
    MissingTimezone(String),
    #[error("airport {airport} has unknown timezone {timezone}")]
    UnknownTimezone { airport: String, timezone: String },
    #[error("airport {0} has a non-finite elevation")]
    InvalidElevation(String),
    #[error("airport {0} must refresh at a positive interval")]
    InvalidRefreshInterval(String),
    #[error("airport {0} has no enabled sources")]
    NoSources(String),
    #[error("airport {airport} lists source {source_id} more than once")]
    DuplicateSource { airport: String, source_id: String },
    #[error("{setting} = {value} is outside {min}..={max}")]
    OutOfRange {
        setting: String,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("source {source_id} at airport {airport} has a zero timeout")]
    ZeroTimeout { airport: String, source_id: String },
    #[error("source {source_id} at airport {airport} uses unregistered provider {provider}")]
    UnknownProvider {
        airport: String,
        source_id: String,
        provider: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub settings: EngineSettings,
    pub airports: Vec<AirportConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub fetch_deadline_seconds: u64,
    pub hard_staleness_seconds: u64,
    pub outage_threshold_seconds: u64,
    pub max_concurrent_airports: usize,
    pub breaker: BreakerConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            fetch_deadline_seconds: DEFAULT_FETCH_DEADLINE,
            hard_staleness_seconds: DEFAULT_HARD_STALENESS,
            outage_threshold_seconds: DEFAULT_OUTAGE_THRESHOLD,
            max_concurrent_airports: DEFAULT_MAX_CONCURRENT_AIRPORTS,
            breaker: BreakerConfig::default(),
        }
    }
}

/// Rejects a duration setting outside `min..=MAX_SETTING_SECONDS`.
fn check_range(setting: impl Into<String>, value: u64, min: u64) -> Result<(), ConfigError> {
    if (min..=MAX_SETTING_SECONDS).contains(&value) {
        return Ok(());
    }
    Err(ConfigError::OutOfRange {
        setting: setting.into(),
        value,
        min,
        max: MAX_SETTING_SECONDS,
    })
}

/// Seconds as a `time::Duration`, capped at the longest allowed setting.
fn capped_seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_SETTING_SECONDS) as i64)
}

impl EngineSettings {
    /// Range checks run at load time, so no setting can overflow a
    /// timestamp or deadline mid-cycle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("fetch_deadline_seconds", self.fetch_deadline_seconds, 1)?;
        check_range("hard_staleness_seconds", self.hard_staleness_seconds, 1)?;
        check_range("outage_threshold_seconds", self.outage_threshold_seconds, 1)?;
        check_range(
            "breaker.base_backoff_seconds",
            self.breaker.base_backoff_seconds,
            1,
        )?;
        check_range(
            "breaker.max_backoff_seconds",
            self.breaker.max_backoff_seconds,
            self.breaker.base_backoff_seconds,
        )
    }

    pub fn fetch_deadline(&self) -> StdDuration {
        StdDuration::from_secs(self.fetch_deadline_seconds.min(MAX_SETTING_SECONDS))
    }

    pub fn hard_staleness(&self) -> Duration {
        capped_seconds(self.hard_staleness_seconds)
    }

    pub fn outage_threshold(&self) -> Duration {
        capped_seconds(self.outage_threshold_seconds)
    }

    pub fn max_concurrent_airports(&self) -> usize {
        self.max_concurrent_airports.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub base_backoff_seconds: u64,
    pub max_backoff_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 3,
            base_backoff_seconds: 60,
            max_backoff_seconds: 3600,
        }
    }
}

impl From<&BreakerConfig> for BreakerSettings {
    fn from(config: &BreakerConfig) -> Self {
        BreakerSettings {
            failure_threshold: config.failure_threshold.max(1),
            base_backoff: StdDuration::from_secs(config.base_backoff_seconds.min(MAX_SETTING_SECONDS)),
            max_backoff: StdDuration::from_secs(config.max_backoff_seconds.min(MAX_SETTING_SECONDS)),
        }
    }
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirportConfig {
    pub id: String,
    pub local_identifier: String,
    #[serde(default)]
    pub timezone: Option<String>,
    pub elevation_ft: f64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub provider: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub max_age_seconds: Option<u64>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Provider-specific settings passed through to the gateway untouched.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// A source that passed validation, with defaults resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: SourceId,
    pub provider: String,
    pub source_type: SourceType,
    pub station_id: Option<String>,
    pub max_age: Duration,
    pub timeout: StdDuration,
    pub options: BTreeMap<String, String>,
}

/// An airport that passed validation; only these are handed to the engine.
#[derive(Clone)]
pub struct Airport {
    pub id: String,
    pub local_identifier: String,
    pub timezone: &'static Tz,
    pub elevation_ft: f64,
    pub refresh_interval: StdDuration,
    pub sources: Vec<Source>,
}

impl fmt::Debug for Airport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Airport")
            .field("id", &self.id)
            .field("local_identifier", &self.local_identifier)
            .field("timezone", &self.timezone.name())
            .field("elevation_ft", &self.elevation_ft)
            .field("refresh_interval", &self.refresh_interval)
            .field("sources", &self.sources)
            .finish()
    }
}

impl Airport {
    pub fn source(&self, id: &SourceId) -> Option<&Source> {
        self.sources.iter().find(|s| &s.id == id)
    }

    pub fn max_age_for(&self, id: &SourceId) -> Option<Duration> {
        self.source(id).map(|s| s.max_age)
    }

    /// A report station is local only when it reports under the airport's own identifier.
    pub fn is_local_station(&self, station_id: Option<&str>) -> bool {
        station_id.is_some_and(|s| s.trim().eq_ignore_ascii_case(self.local_identifier.trim()))
    }
}

impl TryFrom<AirportConfig> for Airport {
    type Error = ConfigError;

    fn try_from(config: AirportConfig) -> Result<Self, Self::Error> {
        let id = config.id.trim().to_string();
        if id.is_empty() || config.local_identifier.trim().is_empty() {
            return Err(ConfigError::BlankIdentifier);
        }

        let tz_name = match config.timezone.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ConfigError::MissingTimezone(id)),
        };
        let timezone =
            timezones::get_by_name(tz_name).ok_or_else(|| ConfigError::UnknownTimezone {
                airport: id.clone(),
                timezone: tz_name.to_string(),
            })?;

        if !config.elevation_ft.is_finite() {
            return Err(ConfigError::InvalidElevation(id));
        }
        if config.refresh_interval_seconds == 0 {
            return Err(ConfigError::InvalidRefreshInterval(id));
        }
        check_range(
            format!("{}.refresh_interval_seconds", id),
            config.refresh_interval_seconds,
            1,
        )?;

        let mut seen = HashSet::new();
        let mut sources = vec![];
        for source in config.sources.into_iter().filter(|s| s.enabled) {
            if !seen.insert(source.id.clone()) {
                return Err(ConfigError::DuplicateSource {
                    airport: id,
                    source_id: source.id,
                });
            }
            let timeout = source.timeout_seconds.unwrap_or(DEFAULT_SOURCE_TIMEOUT);
            if timeout == 0 {
                return Err(ConfigError::ZeroTimeout {
                    airport: id,
                    source_id: source.id,
                });
            }
            check_range(format!("{}/{}.timeout_seconds", id, source.id), timeout, 1)?;
            if let Some(secs) = source.max_age_seconds {
                check_range(format!("{}/{}.max_age_seconds", id, source.id), secs, 1)?;
            }
            let max_age = source
                .max_age_seconds
                .map(capped_seconds)
                .unwrap_or_else(|| source.source_type.default_max_age());
            sources.push(Source {
                id: SourceId::new(source.id),
                provider: source.provider,
                source_type: source.source_type,
                station_id: source.station_id,
                max_age,
                timeout: StdDuration::from_secs(timeout),
                options: source.options,
            });
        }
        if sources.is_empty() {
            return Err(ConfigError::NoSources(id));
        }

        Ok(Airport {
            id,
            local_identifier: config.local_identifier.trim().to_string(),
            timezone,
            elevation_ft: config.elevation_ft,
            refresh_interval: StdDuration::from_secs(config.refresh_interval_seconds),
            sources,
        })
    }
}

impl EngineConfig {
    /// Validates every airport, failing on the first bad entry.
    pub fn airports(&self) -> Result<Vec<Airport>, ConfigError> {
        let mut seen = HashSet::new();
        let mut airports = vec![];
        for config in &self.airports {
            let airport = Airport::try_from(config.clone())?;
            if !seen.insert(airport.id.clone()) {
                return Err(ConfigError::DuplicateAirport(airport.id));
            }
            airports.push(airport);
        }
        Ok(airports)
    }
}

/// Configuration that has been read from disk and fully validated.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub origin: ConfigSource,
    pub settings: EngineSettings,
    pub airports: Vec<Airport>,
}

/// Load configuration from an explicit path or the standard search locations
pub fn load_engine_config(explicit_path: Option<&str>) -> Result<LoadedConfig, ConfigError> {
    let origin = match explicit_path {
        Some(path) => ConfigSource::Explicit(path.into()),
        None => find_config_file(CONFIG_ENV_VAR, CONFIG_FILENAME),
    };
    let config: EngineConfig = load_config(&origin).map_err(|e| ConfigError::Load {
        origin: origin.to_string(),
        reason: format!("{:#}", e),
    })?;
    config.settings.validate()?;
    let airports = config.airports()?;
    Ok(LoadedConfig {
        origin,
        settings: config.settings,
        airports,
    })
}
