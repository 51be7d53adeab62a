use serde::{Deserialize, Serialize};
use slog::{debug, info, Logger};
use std::sync::Arc;
use time::{Date, Duration, OffsetDateTime};
use time_tz::{OffsetDateTimeExt, Tz};

use crate::{
    get_json, put_json, with_lock, AggregatedObservation, Airport, FieldName, PersistentStore,
    StoreError,
};

/// Days of history kept behind the current local day.
pub const EXTREMES_RETENTION_DAYS: i64 = 2;

/// High/low temperature and peak gust for one local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyExtremeRecord {
    pub date_key: Date,
    pub high: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub high_obs_time: Option<OffsetDateTime>,
    pub low: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub low_obs_time: Option<OffsetDateTime>,
    pub peak_gust: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub peak_gust_obs_time: Option<OffsetDateTime>,
}

impl DailyExtremeRecord {
    pub fn new(date_key: Date) -> Self {
        DailyExtremeRecord {
            date_key,
            high: None,
            high_obs_time: None,
            low: None,
            low_obs_time: None,
            peak_gust: None,
            peak_gust_obs_time: None,
        }
    }

    /// Returns true if the record changed. An equal value only moves the
    /// timestamp earlier, so a repeated extreme keeps its first occurrence.
    pub fn observe_temperature(&mut self, temp_c: f64, at: OffsetDateTime) -> bool {
        let high = extend(&mut self.high, &mut self.high_obs_time, temp_c, at, |new, old| new > old);
        let low = extend(&mut self.low, &mut self.low_obs_time, temp_c, at, |new, old| new < old);
        high || low
    }

    /// Peak gust only moves on a strictly higher value.
    pub fn observe_gust(&mut self, gust_kt: f64, at: OffsetDateTime) -> bool {
        match self.peak_gust {
            Some(peak) if gust_kt <= peak => false,
            _ => {
                self.peak_gust = Some(gust_kt);
                self.peak_gust_obs_time = Some(at);
                true
            }
        }
    }
}

fn extend(
    value: &mut Option<f64>,
    obs_time: &mut Option<OffsetDateTime>,
    candidate: f64,
    at: OffsetDateTime,
    beats: impl Fn(f64, f64) -> bool,
) -> bool {
    match *value {
        Some(current) if beats(candidate, current) => {}
        Some(current) if candidate == current => {
            if obs_time.is_some_and(|t| t <= at) {
                return false;
            }
        }
        Some(_) => return false,
        None => {}
    }
    *value = Some(candidate);
    *obs_time = Some(at);
    true
}

/// Calendar date at the airport for an instant.
pub fn local_date(at: OffsetDateTime, timezone: &Tz) -> Date {
    at.to_timezone(timezone).date()
}

fn ledger_key(airport_id: &str) -> String {
    format!("extremes:{}", airport_id)
}

/// Keeps the persisted per-airport ledger of daily extremes current.
///
/// Each reading is filed under the local date of its own observation time,
/// so a pre-midnight reading picked up after midnight still lands on the
/// day it was measured.
pub struct DailyExtremesTracker {
    store: Arc<dyn PersistentStore>,
    logger: Logger,
}

impl DailyExtremesTracker {
    pub fn new(store: Arc<dyn PersistentStore>, logger: Logger) -> Self {
        DailyExtremesTracker { store, logger }
    }

    /// Folds the observation's temperature and gust into the ledger and
    /// returns the record for the current local day, if one exists.
    pub async fn update(
        &self,
        airport: &Airport,
        obs: &AggregatedObservation,
        now: OffsetDateTime,
    ) -> Result<Option<DailyExtremeRecord>, StoreError> {
        let key = ledger_key(&airport.id);
        let today = local_date(now, airport.timezone);
        let oldest_kept = today - Duration::days(EXTREMES_RETENTION_DAYS);

        with_lock(self.store.as_ref(), &key, || async {
            let mut ledger: Vec<DailyExtremeRecord> =
                get_json(self.store.as_ref(), &key).await?.unwrap_or_default();

            for field in [FieldName::Temperature, FieldName::GustSpeed] {
                let Some(reading) = obs.reading(field).filter(|r| r.is_usable()) else {
                    continue;
                };
                let Some(value) = reading.as_number() else {
                    continue;
                };
                let date = local_date(reading.observed_at, airport.timezone);
                if date < oldest_kept {
                    continue;
                }

                let record = match ledger.iter().position(|r| r.date_key == date) {
                    Some(index) => &mut ledger[index],
                    None => {
                        info!(
                            self.logger,
                            "starting daily extremes for {} on {}", airport.id, date
                        );
                        ledger.push(DailyExtremeRecord::new(date));
                        let last = ledger.len() - 1;
                        &mut ledger[last]
                    }
                };
                let changed = match field {
                    FieldName::GustSpeed => record.observe_gust(value, reading.observed_at),
                    _ => record.observe_temperature(value, reading.observed_at),
                };
                if changed {
                    debug!(
                        self.logger,
                        "new {} extreme at {} for {}: {}", field, airport.id, date, value
                    );
                }
            }

            ledger.retain(|r| r.date_key >= oldest_kept);
            ledger.sort_by_key(|r| r.date_key);
            put_json(self.store.as_ref(), &key, &ledger).await?;

            Ok(ledger.into_iter().find(|r| r.date_key == today))
        })
        .await
    }

    pub async fn get(
        &self,
        airport_id: &str,
        date: Date,
    ) -> Result<Option<DailyExtremeRecord>, StoreError> {
        let ledger: Vec<DailyExtremeRecord> = get_json(self.store.as_ref(), &ledger_key(airport_id))
            .await?
            .unwrap_or_default();
        Ok(ledger.into_iter().find(|r| r.date_key == date))
    }
}
