use futures::FutureExt;
use slog::{debug, error, o, warn, Logger};
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::{
    Airport, CircuitBreaker, Clock, FetchError, GatewayRegistry, Source, SourceId, WeatherSnapshot,
};

/// What one fan-out produced. Every enabled source ends up in exactly one list.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Successful snapshots, ordered by source id.
    pub snapshots: Vec<WeatherSnapshot>,
    /// Sources whose breaker was open.
    pub skipped: Vec<SourceId>,
    pub failed: Vec<(SourceId, FetchError)>,
    /// Still outstanding when the overall deadline hit; not charged to the breaker.
    pub abandoned: Vec<SourceId>,
}

impl FetchReport {
    pub fn snapshot(&self, id: &SourceId) -> Option<&WeatherSnapshot> {
        self.snapshots.iter().find(|s| &s.source_id == id)
    }
}

pub fn breaker_key(airport: &Airport, source: &Source) -> String {
    format!("{}/{}", airport.id, source.id)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}

pub struct ParallelFetchCoordinator {
    registry: GatewayRegistry,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    deadline: Duration,
    logger: Logger,
}

impl ParallelFetchCoordinator {
    pub fn new(
        registry: GatewayRegistry,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
        deadline: Duration,
        logger: Logger,
    ) -> Self {
        ParallelFetchCoordinator {
            registry,
            breaker,
            clock,
            deadline,
            logger,
        }
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Fetches every eligible source concurrently. Each fetch is bounded by its
    /// source's timeout and the whole call by the coordinator deadline; nothing
    /// that goes wrong upstream is returned as an error.
    pub async fn fetch_all(&self, airport: &Airport) -> FetchReport {
        let logger = self.logger.new(o!("airport" => airport.id.clone()));
        let deadline = tokio::time::Instant::now() + self.deadline;
        let started = self.clock.now();
        let mut report = FetchReport::default();
        let mut pending = BTreeSet::new();
        let mut set = JoinSet::new();

        for source in &airport.sources {
            let key = breaker_key(airport, source);
            if !self.breaker.may_fetch(&key, started) {
                debug!(logger, "skipping {}: circuit open", source.id);
                report.skipped.push(source.id.clone());
                continue;
            }
            let Some(gateway) = self.registry.get(&source.provider) else {
                let err = FetchError::UnknownProvider(source.provider.clone());
                warn!(logger, "fetch from {} failed: {}", source.id, err);
                self.breaker.record_failure(&key, err.class(), started);
                report.failed.push((source.id.clone(), err));
                continue;
            };

            pending.insert(source.id.clone());
            let source = source.clone();
            set.spawn(async move {
                let fetch =
                    tokio::time::timeout(source.timeout, gateway.fetch(&source, source.timeout));
                // A panicking gateway is charged like any other failure.
                let result = match AssertUnwindSafe(fetch).catch_unwind().await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(FetchError::Timeout(source.timeout)),
                    Err(panic) => Err(FetchError::Internal(panic_message(panic.as_ref()))),
                };
                (source, result)
            });
        }

        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((source, result)))) => {
                    pending.remove(&source.id);
                    self.settle(airport, &source, result, &mut report, &logger);
                }
                Ok(Some(Err(e))) => error!(logger, "fetch task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        logger,
                        "fetch deadline of {}s reached, abandoning {} source(s)",
                        self.deadline.as_secs(),
                        pending.len()
                    );
                    set.abort_all();
                    break;
                }
            }
        }

        report.abandoned = pending.into_iter().collect();
        report.snapshots.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    fn settle(
        &self,
        airport: &Airport,
        source: &Source,
        result: Result<WeatherSnapshot, FetchError>,
        report: &mut FetchReport,
        logger: &Logger,
    ) {
        let key = breaker_key(airport, source);
        let result = result.and_then(|snapshot| match snapshot.error.clone() {
            Some(err) => Err(err),
            None => Ok(snapshot),
        });
        match result {
            Ok(mut snapshot) => {
                self.breaker.record_success(&key);
                snapshot.assign_source(&source.id);
                snapshot.source_type = source.source_type;
                if snapshot.local_station_id.is_none() {
                    snapshot.local_station_id = source.station_id.clone();
                }
                debug!(
                    logger,
                    "fetched {} reading(s) from {}",
                    snapshot.readings.len(),
                    source.id
                );
                report.snapshots.push(snapshot);
            }
            Err(err) => {
                warn!(logger, "fetch from {} failed: {}", source.id, err);
                self.breaker
                    .record_failure(&key, err.class(), self.clock.now());
                report.failed.push((source.id.clone(), err));
            }
        }
    }
}
