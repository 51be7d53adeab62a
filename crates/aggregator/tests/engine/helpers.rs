use aggregator::{
    Airport, Clock, EngineConfig, EngineSettings, FetchError, FieldName, GatewayRegistry,
    InMemoryStore, ManualClock, Source, SourceGateway, SourceId, SourceType, WeatherEngine,
    WeatherSnapshot,
};
use async_trait::async_trait;
use slog::{o, Discard, Logger};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::macros::datetime;
use time::OffsetDateTime;

/// Noon at KSPB (Pacific daylight time).
pub const T: OffsetDateTime = datetime!(2024-07-01 19:00 UTC);

const AIRPORTS: &str = r#"
[[airports]]
id = "kspb"
local_identifier = "KSPB"
timezone = "America/Los_Angeles"
elevation_ft = 58.0

[[airports.sources]]
id = "tempest"
provider = "tempest"
source_type = "primary-sensor"

[[airports.sources]]
id = "metar"
provider = "awc"
source_type = "metar"
station_id = "KSPB"

[[airports.sources]]
id = "nws-khio"
provider = "nws"
source_type = "nws"
station_id = "KHIO"

[[airports]]
id = "khio"
local_identifier = "KHIO"
timezone = "America/Los_Angeles"
elevation_ft = 208.0

[[airports.sources]]
id = "nws"
provider = "nws"
source_type = "nws"
station_id = "KHIO"
"#;

/// Gateway that answers every fetch with whatever it was last told to.
pub struct ScriptedGateway {
    response: Mutex<Result<WeatherSnapshot, FetchError>>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(ScriptedGateway {
            response: Mutex::new(Err(FetchError::Connection("not scripted".to_string()))),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn respond(&self, response: Result<WeatherSnapshot, FetchError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn fail(&self) {
        self.respond(Err(FetchError::Connection("connection refused".to_string())));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceGateway for ScriptedGateway {
    async fn fetch(&self, _: &Source, _: Duration) -> Result<WeatherSnapshot, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().unwrap().clone()
    }
}

pub struct TestEngine {
    pub engine: WeatherEngine,
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStore>,
    pub tempest: Arc<ScriptedGateway>,
    pub metar: Arc<ScriptedGateway>,
    pub nws: Arc<ScriptedGateway>,
    pub airports: Vec<Airport>,
}

impl TestEngine {
    pub fn kspb(&self) -> &Airport {
        &self.airports[0]
    }

    pub fn khio(&self) -> &Airport {
        &self.airports[1]
    }

    pub fn advance(&self, by: time::Duration) -> OffsetDateTime {
        self.clock.advance(by);
        self.clock.now()
    }
}

pub fn spawn_engine() -> TestEngine {
    let config: EngineConfig = toml::from_str(AIRPORTS).expect("test airports parse");
    let airports = config.airports().expect("test airports are valid");

    let tempest = ScriptedGateway::new();
    let metar = ScriptedGateway::new();
    let nws = ScriptedGateway::new();
    let registry = GatewayRegistry::new()
        .register("tempest", tempest.clone())
        .register("awc", metar.clone())
        .register("nws", nws.clone());

    let clock = Arc::new(ManualClock::new(T));
    let store = Arc::new(InMemoryStore::new());
    let engine = WeatherEngine::new(
        EngineSettings::default(),
        registry,
        store.clone(),
        clock.clone(),
        Logger::root(Discard, o!()),
    );
    engine
        .check_airports(&airports)
        .expect("every provider is registered");

    TestEngine {
        engine,
        clock,
        store,
        tempest,
        metar,
        nws,
        airports,
    }
}

fn snapshot(source_type: SourceType, at: OffsetDateTime) -> WeatherSnapshot {
    WeatherSnapshot::new(SourceId::from("upstream"), source_type, at)
}

pub fn tempest_snapshot(at: OffsetDateTime) -> WeatherSnapshot {
    snapshot(SourceType::PrimarySensor, at)
        .with_value(FieldName::WindSpeed, 10.0, at)
        .with_value(FieldName::WindDirection, 270.0, at)
        .with_value(FieldName::GustSpeed, 14.0, at)
        .with_value(FieldName::Temperature, 21.0, at)
        .with_value(FieldName::Humidity, 60.0, at)
        .with_value(FieldName::Pressure, 29.92, at)
}

pub fn metar_snapshot(at: OffsetDateTime) -> WeatherSnapshot {
    snapshot(SourceType::Metar, at)
        .with_value(FieldName::WindSpeed, 12.0, at)
        .with_value(FieldName::WindDirection, 260.0, at)
        .with_value(FieldName::GustSpeed, 18.0, at)
        .with_value(FieldName::Temperature, 20.0, at)
        .with_value(FieldName::Dewpoint, 12.0, at)
        .with_value(FieldName::Pressure, 29.90, at)
        .with_value(FieldName::Visibility, 10.0, at)
        .with_value(FieldName::Ceiling, 2500.0, at)
        .with_value(FieldName::CloudCover, "BKN", at)
}

pub fn nws_snapshot(at: OffsetDateTime) -> WeatherSnapshot {
    snapshot(SourceType::Nws, at)
        .with_value(FieldName::WindSpeed, 15.0, at)
        .with_value(FieldName::WindDirection, 200.0, at)
        .with_value(FieldName::GustSpeed, 25.0, at)
        .with_value(FieldName::Temperature, 25.0, at)
        .with_value(FieldName::Visibility, 3.0, at)
        .with_value(FieldName::Ceiling, 800.0, at)
}
