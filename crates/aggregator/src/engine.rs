use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use slog::{debug, error, info, o, Logger};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::{Date, Duration, OffsetDateTime};

use crate::{
    get_json, put_json, with_lock, AggregatedObservation, AggregationEngine, Airport,
    CircuitBreaker, Clock, ConfigError, DailyExtremeRecord, DailyExtremesTracker, EngineSettings,
    GatewayRegistry, OutageDetector, OutageInputs, OutageState, ParallelFetchCoordinator,
    PersistentStore, SourceId, StalenessEvaluator, StoreError, Validator, WeatherSnapshot,
};

/// Feed ages the engine can't observe itself, such as webcam captures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalSignals {
    pub ages: BTreeMap<String, Option<Duration>>,
    /// Used as the outage start when no feed has ever reported.
    pub fallback_started_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SourceSighting {
    source: SourceId,
    #[serde(with = "time::serde::rfc3339")]
    observed_at: OffsetDateTime,
}

fn sightings_key(airport_id: &str) -> String {
    format!("sources:{}", airport_id)
}

fn observation_key(airport_id: &str) -> String {
    format!("observation:{}", airport_id)
}

/// Runs aggregation cycles and answers queries about their persisted results.
pub struct WeatherEngine {
    settings: EngineSettings,
    coordinator: ParallelFetchCoordinator,
    validator: Validator,
    aggregation: AggregationEngine,
    staleness: StalenessEvaluator,
    extremes: DailyExtremesTracker,
    outage: OutageDetector,
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    logger: Logger,
}

impl WeatherEngine {
    pub fn new(
        settings: EngineSettings,
        registry: GatewayRegistry,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        logger: Logger,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            (&settings.breaker).into(),
            logger.new(o!("component" => "breaker")),
        ));
        let coordinator = ParallelFetchCoordinator::new(
            registry,
            breaker,
            clock.clone(),
            settings.fetch_deadline(),
            logger.new(o!("component" => "coordinator")),
        );
        let extremes =
            DailyExtremesTracker::new(store.clone(), logger.new(o!("component" => "extremes")));
        let outage = OutageDetector::new(
            store.clone(),
            settings.outage_threshold(),
            logger.new(o!("component" => "outage")),
        );
        let hard_ceiling = settings.hard_staleness();
        WeatherEngine {
            settings,
            coordinator,
            validator: Validator::new(),
            aggregation: AggregationEngine::default().with_hard_ceiling(hard_ceiling),
            staleness: StalenessEvaluator::new(hard_ceiling),
            extremes,
            outage,
            store,
            clock,
            logger,
        }
    }

    /// Swaps the field policies, e.g. to reorder or narrow them. The hard
    /// staleness ceiling from the settings still applies.
    pub fn with_aggregation(mut self, aggregation: AggregationEngine) -> Self {
        self.aggregation = aggregation.with_hard_ceiling(self.settings.hard_staleness());
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.coordinator.breaker()
    }

    /// Load-time check that every source of the airport can be served.
    pub fn check_airport(&self, airport: &Airport) -> Result<(), ConfigError> {
        self.coordinator.registry().check(airport)
    }

    pub fn check_airports(&self, airports: &[Airport]) -> Result<(), ConfigError> {
        airports.iter().try_for_each(|airport| self.check_airport(airport))
    }

    pub async fn aggregate(&self, airport: &Airport) -> AggregatedObservation {
        self.aggregate_with_signals(airport, &ExternalSignals::default())
            .await
    }

    /// One full cycle. Never fails: upstream problems surface as null fields,
    /// validation issues and outage state, and store failures are logged.
    pub async fn aggregate_with_signals(
        &self,
        airport: &Airport,
        signals: &ExternalSignals,
    ) -> AggregatedObservation {
        let logger = self.logger.new(o!("airport" => airport.id.clone()));
        let report = self.coordinator.fetch_all(airport).await;
        let now = self.clock.now();

        let mut snapshots = report.snapshots;
        let mut issues = vec![];
        for snapshot in snapshots.iter_mut() {
            for issue in self.validator.validate(snapshot, now) {
                debug!(
                    logger,
                    "rejected {} from {}: {}", issue.field, issue.source, issue.reason
                );
                issues.push(issue);
            }
        }

        let mut obs = self.aggregation.aggregate(airport, &snapshots, now);
        obs.validation_issues = issues;

        for stale in self.staleness.evaluate(airport, &mut obs, now) {
            debug!(
                logger,
                "nulled {} from {}: {}s old",
                stale.field,
                stale.source,
                stale.age.whole_seconds()
            );
        }

        match self.extremes.update(airport, &obs, now).await {
            Ok(record) => obs.daily_extremes = record,
            Err(e) => error!(logger, "failed to update daily extremes: {}", e),
        }

        let last_seen = match self.record_sightings(airport, &snapshots, now).await {
            Ok(last_seen) => last_seen,
            Err(e) => {
                error!(logger, "failed to record source sightings: {}", e);
                sightings_from(&snapshots, now)
            }
        };
        let inputs = outage_inputs(airport, &last_seen, signals, now);
        match self.outage.update(&airport.id, &inputs, now).await {
            Ok(state) => obs.outage = state,
            Err(e) => error!(logger, "failed to update outage state: {}", e),
        }

        if obs.is_degraded() {
            info!(logger, "no usable fields this cycle");
        }
        if let Err(e) = put_json(self.store.as_ref(), &observation_key(&airport.id), &obs).await {
            error!(logger, "failed to persist observation: {}", e);
        }
        obs
    }

    /// Runs several airports at once, never more than `max_concurrent_airports`
    /// in flight. Results come back in input order.
    pub async fn aggregate_many(&self, airports: &[Airport]) -> Vec<AggregatedObservation> {
        stream::iter(airports)
            .map(|airport| self.aggregate(airport))
            .buffered(self.settings.max_concurrent_airports())
            .collect()
            .await
    }

    pub async fn daily_extremes(
        &self,
        airport_id: &str,
        date: Date,
    ) -> Result<Option<DailyExtremeRecord>, StoreError> {
        self.extremes.get(airport_id, date).await
    }

    pub async fn outage_state(&self, airport_id: &str) -> Result<Option<OutageState>, StoreError> {
        self.outage.get(airport_id, self.clock.now()).await
    }

    pub async fn latest_observation(
        &self,
        airport_id: &str,
    ) -> Result<Option<AggregatedObservation>, StoreError> {
        get_json(self.store.as_ref(), &observation_key(airport_id)).await
    }

    /// Merges this cycle's newest observation per source into the persisted
    /// last-seen ledger, so a source that fails keeps aging from its last data.
    async fn record_sightings(
        &self,
        airport: &Airport,
        snapshots: &[WeatherSnapshot],
        now: OffsetDateTime,
    ) -> Result<BTreeMap<SourceId, OffsetDateTime>, StoreError> {
        let key = sightings_key(&airport.id);
        with_lock(self.store.as_ref(), &key, || async {
            let stored: Vec<SourceSighting> =
                get_json(self.store.as_ref(), &key).await?.unwrap_or_default();
            let mut last_seen: BTreeMap<SourceId, OffsetDateTime> = stored
                .into_iter()
                .filter(|s| airport.source(&s.source).is_some())
                .map(|s| (s.source, s.observed_at.min(now)))
                .collect();
            for (source, observed_at) in sightings_from(snapshots, now) {
                let entry = last_seen.entry(source).or_insert(observed_at);
                *entry = (*entry).max(observed_at);
            }

            let ledger: Vec<SourceSighting> = last_seen
                .iter()
                .map(|(source, observed_at)| SourceSighting {
                    source: source.clone(),
                    observed_at: *observed_at,
                })
                .collect();
            put_json(self.store.as_ref(), &key, &ledger).await?;
            Ok(last_seen)
        })
        .await
    }
}

/// Newest usable data per source after validation. Timestamps inside the
/// allowed clock skew are clamped to `now`, so a source never looks younger
/// than the present.
fn sightings_from(
    snapshots: &[WeatherSnapshot],
    now: OffsetDateTime,
) -> BTreeMap<SourceId, OffsetDateTime> {
    snapshots
        .iter()
        .filter_map(|s| Some((s.source_id.clone(), s.latest_observation()?.min(now))))
        .collect()
}

fn outage_inputs(
    airport: &Airport,
    last_seen: &BTreeMap<SourceId, OffsetDateTime>,
    signals: &ExternalSignals,
    now: OffsetDateTime,
) -> OutageInputs {
    let mut ages: BTreeMap<String, Option<Duration>> = airport
        .sources
        .iter()
        .map(|source| {
            let age = last_seen.get(&source.id).map(|seen| now - *seen);
            (source.id.to_string(), age)
        })
        .collect();
    ages.extend(signals.ages.clone());
    OutageInputs {
        ages,
        fallback_started_at: signals.fallback_started_at,
    }
}
