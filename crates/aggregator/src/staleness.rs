use time::{Duration, OffsetDateTime};

use crate::{recompute_derived, AggregatedObservation, Airport, FieldName, SourceId};

/// A field nulled because its chosen source was too old.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleField {
    pub field: FieldName,
    pub source: SourceId,
    pub age: Duration,
}

/// Nulls fields whose provenance has aged past the source's ceiling or the
/// global hard ceiling, then recomputes derived values from what remains.
///
/// Daily extremes on the observation are never touched here.
#[derive(Debug, Clone)]
pub struct StalenessEvaluator {
    hard_ceiling: Duration,
}

impl StalenessEvaluator {
    pub fn new(hard_ceiling: Duration) -> Self {
        StalenessEvaluator { hard_ceiling }
    }

    pub fn hard_ceiling(&self) -> Duration {
        self.hard_ceiling
    }

    /// Source ceiling is exclusive (`age > max_age`), the hard ceiling inclusive.
    pub fn is_expired(&self, age: Duration, source_max_age: Option<Duration>) -> bool {
        age >= self.hard_ceiling || source_max_age.is_some_and(|max| age > max)
    }

    pub fn evaluate(
        &self,
        airport: &Airport,
        obs: &mut AggregatedObservation,
        now: OffsetDateTime,
    ) -> Vec<StaleField> {
        let mut stale = vec![];
        for field in FieldName::ALL {
            // A valid null (no ceiling reported) ages out like any value.
            if !obs.reading(field).is_some_and(|r| r.valid) {
                continue;
            }
            let (Some(source), Some(observed_at)) = (
                obs.field_source_map.get(&field),
                obs.field_obs_time_map.get(&field),
            ) else {
                continue;
            };
            let age = now - *observed_at;
            if self.is_expired(age, airport.max_age_for(source)) {
                stale.push(StaleField {
                    field,
                    source: source.clone(),
                    age,
                });
            }
        }

        for entry in &stale {
            obs.null_field(entry.field);
        }
        recompute_derived(obs, airport.elevation_ft);
        stale
    }
}

impl Default for StalenessEvaluator {
    fn default() -> Self {
        StalenessEvaluator::new(Duration::hours(3))
    }
}
