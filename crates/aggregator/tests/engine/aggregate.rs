use crate::helpers::{metar_snapshot, nws_snapshot, spawn_engine, tempest_snapshot, T};
use aggregator::{
    Airport, AirportConfig, ConfigError, FetchError, FieldName, FlightCategory, ReadingValue,
    SourceConfig, SourceId, SourceType,
};
use std::collections::BTreeMap;
use time::Duration;

fn source_of(obs: &aggregator::AggregatedObservation, field: FieldName) -> Option<&str> {
    obs.field_source_map.get(&field).map(SourceId::as_str)
}

#[tokio::test]
async fn full_cycle_prefers_local_sources_and_persists_result() {
    let t = spawn_engine();
    t.tempest.respond(Ok(tempest_snapshot(T - Duration::minutes(5))));
    t.metar.respond(Ok(metar_snapshot(T - Duration::minutes(10))));
    t.nws.respond(Ok(nws_snapshot(T)));

    let obs = t.engine.aggregate(t.kspb()).await;

    // The neighbouring station is freshest but never beats a local source.
    assert_eq!(obs.value(FieldName::WindSpeed), Some(10.0));
    assert_eq!(source_of(&obs, FieldName::WindSpeed), Some("tempest"));
    assert_eq!(source_of(&obs, FieldName::GustSpeed), Some("tempest"));
    assert_eq!(obs.value(FieldName::Temperature), Some(21.0));
    assert_eq!(obs.value(FieldName::Dewpoint), Some(12.0));
    assert_eq!(source_of(&obs, FieldName::Dewpoint), Some("metar"));

    assert_eq!(obs.value(FieldName::Visibility), Some(10.0));
    assert_eq!(source_of(&obs, FieldName::Ceiling), Some("metar"));
    assert_eq!(
        obs.reading(FieldName::CloudCover).and_then(|r| r.value.clone()),
        Some(ReadingValue::Text("BKN".to_string()))
    );
    assert_eq!(obs.flight_category, Some(FlightCategory::Mvfr));
    assert_eq!(obs.altitudes.pressure_altitude_ft, Some(58.0));
    assert_eq!(obs.gust_factor_kt, Some(4.0));
    assert!(obs.validation_issues.is_empty());
    assert_eq!(
        obs.field_obs_time_map.get(&FieldName::WindSpeed),
        Some(&(T - Duration::minutes(5)))
    );

    let latest = t
        .engine
        .latest_observation("kspb")
        .await
        .unwrap()
        .expect("observation persisted");
    assert_eq!(latest.generated_at, obs.generated_at);
    assert_eq!(latest.field_source_map, obs.field_source_map);
    assert_eq!(latest.flight_category, obs.flight_category);
}

#[tokio::test]
async fn invalid_values_are_screened_before_selection() {
    let t = spawn_engine();
    let at = T - Duration::minutes(2);
    t.tempest.respond(Ok(tempest_snapshot(at)
        .with_value(FieldName::Temperature, 85.0, at)
        .with_value(FieldName::Pressure, 2992.0, at)));
    t.metar.respond(Ok(metar_snapshot(T - Duration::minutes(30))));
    t.nws.fail();

    let obs = t.engine.aggregate(t.kspb()).await;

    assert_eq!(obs.validation_issues.len(), 1);
    assert_eq!(obs.validation_issues[0].field, FieldName::Temperature);
    assert_eq!(obs.validation_issues[0].source, SourceId::from("tempest"));
    assert_eq!(obs.value(FieldName::Temperature), Some(20.0));
    assert_eq!(source_of(&obs, FieldName::Temperature), Some("metar"));

    let pressure = obs.value(FieldName::Pressure).unwrap();
    assert!((pressure - 29.92).abs() < 1e-9);
    assert_eq!(source_of(&obs, FieldName::Pressure), Some("tempest"));
}

#[tokio::test]
async fn failed_sensor_falls_back_to_local_report_not_neighbour() {
    let t = spawn_engine();
    t.tempest.fail();
    t.metar.respond(Ok(metar_snapshot(T - Duration::minutes(40))));
    t.nws.respond(Ok(nws_snapshot(T)));

    let obs = t.engine.aggregate(t.kspb()).await;

    assert_eq!(obs.value(FieldName::WindSpeed), Some(12.0));
    assert_eq!(source_of(&obs, FieldName::WindSpeed), Some("metar"));
    assert_eq!(obs.value(FieldName::Temperature), Some(20.0));
    assert_eq!(
        t.engine.breaker().state("kspb/tempest").consecutive_failures,
        1
    );
}

#[tokio::test]
async fn partial_wind_triple_is_never_used() {
    let t = spawn_engine();
    t.tempest.fail();
    let mut metar = metar_snapshot(T - Duration::minutes(5));
    metar.readings.remove(&FieldName::GustSpeed);
    t.metar.respond(Ok(metar));
    t.nws.respond(Ok(nws_snapshot(T - Duration::minutes(20))));

    let obs = t.engine.aggregate(t.kspb()).await;

    for field in FieldName::WIND_GROUP {
        assert_eq!(source_of(&obs, field), Some("nws-khio"), "{}", field);
    }
    assert_eq!(obs.value(FieldName::WindSpeed), Some(15.0));
    assert_eq!(obs.value(FieldName::GustSpeed), Some(25.0));
    // Non-wind fields still come from the local report.
    assert_eq!(source_of(&obs, FieldName::Temperature), Some("metar"));
}

#[tokio::test]
async fn expired_sensor_reading_is_not_selected() {
    let t = spawn_engine();
    t.tempest.respond(Ok(tempest_snapshot(T - Duration::minutes(15))));
    t.metar.respond(Ok(metar_snapshot(T - Duration::minutes(50))));
    t.nws.fail();

    let obs = t.engine.aggregate(t.kspb()).await;

    assert_eq!(source_of(&obs, FieldName::Temperature), Some("metar"));
    assert_eq!(source_of(&obs, FieldName::WindSpeed), Some("metar"));
    assert!(obs.reading(FieldName::Humidity).is_some(), "derived from metar pair");
}

#[tokio::test]
async fn total_failure_yields_degraded_observation() {
    let t = spawn_engine();
    t.tempest.fail();
    t.metar.respond(Err(FetchError::Http(503)));
    t.nws.respond(Err(FetchError::Auth("bad token".to_string())));

    let obs = t.engine.aggregate(t.kspb()).await;

    assert!(obs.is_degraded());
    assert!(obs.fields.is_empty());
    assert_eq!(obs.flight_category, None);
    assert!(obs.outage.is_some(), "no source has ever reported");
    assert!(t.engine.latest_observation("kspb").await.unwrap().is_some());
}

#[tokio::test]
async fn open_breaker_stops_calling_failing_source() {
    let t = spawn_engine();
    t.tempest.fail();
    t.metar.respond(Ok(metar_snapshot(T)));
    t.nws.respond(Ok(nws_snapshot(T)));

    for _ in 0..4 {
        t.engine.aggregate(t.kspb()).await;
    }

    assert_eq!(t.tempest.calls(), 3);
    assert_eq!(t.metar.calls(), 4);
    assert!(!t.engine.breaker().may_fetch("kspb/tempest", T));
}

#[tokio::test]
async fn aggregate_many_returns_results_in_input_order() {
    let t = spawn_engine();
    t.tempest.fail();
    t.metar.fail();
    t.nws.respond(Ok(nws_snapshot(T - Duration::minutes(3))));

    let results = t
        .engine
        .aggregate_many(&[t.kspb().clone(), t.khio().clone()])
        .await;

    let ids: Vec<_> = results.iter().map(|o| o.airport_id.as_str()).collect();
    assert_eq!(ids, vec!["kspb", "khio"]);
    assert_eq!(source_of(&results[0], FieldName::WindSpeed), Some("nws-khio"));
    assert_eq!(source_of(&results[1], FieldName::WindSpeed), Some("nws"));
    assert_eq!(results[1].flight_category, Some(FlightCategory::Ifr));
    assert_eq!(t.nws.calls(), 2);
    assert!(t.store.keys().contains(&"observation:khio".to_string()));
}

#[tokio::test]
async fn airport_with_unregistered_provider_is_rejected() {
    let t = spawn_engine();
    let airport = Airport::try_from(AirportConfig {
        id: "kpdx".to_string(),
        local_identifier: "KPDX".to_string(),
        timezone: Some("America/Los_Angeles".to_string()),
        elevation_ft: 31.0,
        refresh_interval_seconds: 60,
        sources: vec![SourceConfig {
            id: "davis".to_string(),
            provider: "davis".to_string(),
            source_type: SourceType::Backup,
            station_id: None,
            enabled: true,
            max_age_seconds: None,
            timeout_seconds: None,
            options: BTreeMap::new(),
        }],
    })
    .unwrap();

    assert_eq!(
        t.engine.check_airport(&airport),
        Err(ConfigError::UnknownProvider {
            airport: "kpdx".to_string(),
            source_id: "davis".to_string(),
            provider: "davis".to_string(),
        })
    );
}
