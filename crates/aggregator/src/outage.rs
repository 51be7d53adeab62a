use serde::{Deserialize, Serialize};
use slog::{info, warn, Logger};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

use crate::{get_json, put_json, with_lock, PersistentStore, StoreError};

/// A site-wide loss of every monitored feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutageState {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen_healthy_at: Option<OffsetDateTime>,
    /// Set while sources are healthy again but the grace period has not run out.
    #[serde(with = "time::serde::rfc3339::option")]
    pub recovered_at: Option<OffsetDateTime>,
}

impl OutageState {
    pub fn is_active(&self) -> bool {
        self.recovered_at.is_none()
    }
}

/// Ages of every monitored feed for one airport. `None` means the feed has
/// never delivered anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutageInputs {
    pub ages: BTreeMap<String, Option<Duration>>,
    pub fallback_started_at: Option<OffsetDateTime>,
}

impl OutageInputs {
    pub fn with_age(mut self, name: impl Into<String>, age: Option<Duration>) -> Self {
        self.ages.insert(name.into(), age);
        self
    }

    /// When the most recently active feed last delivered.
    fn newest_seen(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        self.ages.values().flatten().min().map(|age| now - *age)
    }
}

fn outage_key(airport_id: &str) -> String {
    format!("outage:{}", airport_id)
}

/// Turns per-feed ages into a persisted, debounced outage record.
///
/// Recovery does not delete the record straight away: it is kept for one
/// full threshold so that a brief flicker followed by another loss is
/// reported as a single outage with its original start time.
pub struct OutageDetector {
    store: Arc<dyn PersistentStore>,
    threshold: Duration,
    logger: Logger,
}

impl OutageDetector {
    pub fn new(store: Arc<dyn PersistentStore>, threshold: Duration, logger: Logger) -> Self {
        OutageDetector {
            store,
            threshold,
            logger,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Every monitored feed is past the threshold. Nothing monitored is not an outage.
    pub fn is_outage(&self, ages: &BTreeMap<String, Option<Duration>>) -> bool {
        !ages.is_empty()
            && ages
                .values()
                .all(|age| age.map_or(true, |age| age > self.threshold))
    }

    pub async fn update(
        &self,
        airport_id: &str,
        inputs: &OutageInputs,
        now: OffsetDateTime,
    ) -> Result<Option<OutageState>, StoreError> {
        let key = outage_key(airport_id);
        let down = self.is_outage(&inputs.ages);

        with_lock(self.store.as_ref(), &key, || async {
            let existing: Option<OutageState> = get_json(self.store.as_ref(), &key).await?;
            // A record whose grace period ran out while no cycle was looking is finished.
            let existing = existing.filter(|state| self.is_current(state, now));

            match (existing, down) {
                (Some(mut state), true) => {
                    if !state.is_active() {
                        warn!(
                            self.logger,
                            "outage at {} resumed within grace period (started {})",
                            airport_id,
                            state.started_at
                        );
                        state.recovered_at = None;
                        put_json(self.store.as_ref(), &key, &state).await?;
                    }
                    Ok(Some(state))
                }
                (None, true) => {
                    let last_seen = inputs.newest_seen(now);
                    let started_at = last_seen.or(inputs.fallback_started_at).unwrap_or(now);
                    let state = OutageState {
                        started_at,
                        last_seen_healthy_at: last_seen,
                        recovered_at: None,
                    };
                    warn!(
                        self.logger,
                        "all monitored feeds stale at {}, outage started {}",
                        airport_id,
                        started_at
                    );
                    put_json(self.store.as_ref(), &key, &state).await?;
                    Ok(Some(state))
                }
                (Some(mut state), false) => {
                    if state.is_active() {
                        info!(
                            self.logger,
                            "outage at {} recovered (started {})", airport_id, state.started_at
                        );
                        state.recovered_at = Some(now);
                    }
                    state.last_seen_healthy_at = Some(now);
                    put_json(self.store.as_ref(), &key, &state).await?;
                    Ok(Some(state))
                }
                (None, false) => {
                    if self.store.get(&key).await?.is_some() {
                        info!(self.logger, "outage at {} cleared after grace period", airport_id);
                        self.store.delete(&key).await?;
                    }
                    Ok(None)
                }
            }
        })
        .await
    }

    /// The outage as of `now`. A recovered record past its grace period is
    /// reported as no outage even before a cycle deletes it.
    pub async fn get(
        &self,
        airport_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<OutageState>, StoreError> {
        let state: Option<OutageState> =
            get_json(self.store.as_ref(), &outage_key(airport_id)).await?;
        Ok(state.filter(|state| self.is_current(state, now)))
    }

    fn is_current(&self, state: &OutageState, now: OffsetDateTime) -> bool {
        state
            .recovered_at
            .map_or(true, |recovered| now - recovered < self.threshold)
    }
}
