//! Per-field source selection.
//!
//! Each policy owns a fixed set of fields and picks, for each of them, one
//! reading out of the cycle's snapshots. Policies run in a fixed order and
//! selection depends only on source locality and observation times, so the
//! result does not depend on the order snapshots arrived in.

use airwx_core::DEFAULT_HARD_STALENESS;
use std::cmp::Ordering;
use time::{Duration, OffsetDateTime};

use crate::{
    recompute_derived, AggregatedObservation, Airport, FieldName, SourceType, WeatherReading,
    WeatherSnapshot, WindGroup,
};

/// What a policy may consult while choosing readings.
pub struct SelectionContext<'a> {
    pub airport: &'a Airport,
    pub now: OffsetDateTime,
    /// No reading this old is selected, whatever its source allows.
    pub hard_ceiling: Duration,
}

impl SelectionContext<'_> {
    /// Local sensors always count; report stations only under the airport's own identifier.
    pub fn is_local(&self, snapshot: &WeatherSnapshot) -> bool {
        !snapshot.source_type.is_report_station()
            || self
                .airport
                .is_local_station(snapshot.local_station_id.as_deref())
    }

    pub fn max_age(&self, snapshot: &WeatherSnapshot) -> Duration {
        self.airport
            .max_age_for(&snapshot.source_id)
            .unwrap_or_else(|| snapshot.source_type.default_max_age())
    }

    pub fn is_fresh(&self, snapshot: &WeatherSnapshot, observed_at: OffsetDateTime) -> bool {
        let age = self.now - observed_at;
        age <= self.max_age(snapshot) && age < self.hard_ceiling
    }

    /// The reading for `field` if it is present, usable and within the source's max age.
    pub fn eligible<'s>(
        &self,
        snapshot: &'s WeatherSnapshot,
        field: FieldName,
    ) -> Option<&'s WeatherReading> {
        snapshot
            .reading(field)
            .filter(|r| r.is_usable() && self.is_fresh(snapshot, r.observed_at))
    }
}

pub trait FieldPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn fields(&self) -> &[FieldName];

    fn select(
        &self,
        ctx: &SelectionContext<'_>,
        snapshots: &[WeatherSnapshot],
    ) -> Vec<(FieldName, WeatherReading)>;
}

/// Newest first; equal times fall back to source id so ties are stable.
fn fresher(a: (OffsetDateTime, &WeatherSnapshot), b: (OffsetDateTime, &WeatherSnapshot)) -> Ordering {
    b.0.cmp(&a.0).then_with(|| a.1.source_id.cmp(&b.1.source_id))
}

/// Local readings always beat neighbouring report stations; among peers the freshest wins.
fn pick_local_first<'s, T>(
    ctx: &SelectionContext<'_>,
    candidates: Vec<(&'s WeatherSnapshot, OffsetDateTime, T)>,
) -> Option<T> {
    let (local, neighbour): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(|(s, _, _)| ctx.is_local(s));
    let pool = if local.is_empty() { neighbour } else { local };
    pool.into_iter()
        .min_by(|a, b| fresher((a.1, a.0), (b.1, b.0)))
        .map(|(_, _, value)| value)
}

/// Speed, direction and gust are chosen as one unit from a single source.
#[derive(Debug, Default)]
pub struct WindGroupPolicy;

impl FieldPolicy for WindGroupPolicy {
    fn name(&self) -> &'static str {
        "wind-group"
    }

    fn fields(&self) -> &[FieldName] {
        &FieldName::WIND_GROUP
    }

    fn select(
        &self,
        ctx: &SelectionContext<'_>,
        snapshots: &[WeatherSnapshot],
    ) -> Vec<(FieldName, WeatherReading)> {
        let candidates = snapshots
            .iter()
            .filter_map(|snapshot| {
                let group = WindGroup::from_snapshot(snapshot)?;
                let all_fresh = [&group.speed, &group.direction, &group.gust]
                    .iter()
                    .all(|r| ctx.is_fresh(snapshot, r.observed_at));
                all_fresh.then(|| (snapshot, group.observed_at(), group))
            })
            .collect();

        pick_local_first(ctx, candidates)
            .map(|group| group.into_readings().to_vec())
            .unwrap_or_default()
    }
}

/// Fields where the airport's own microclimate must never be masked by a neighbour.
#[derive(Debug)]
pub struct LocalPreferencePolicy {
    fields: Vec<FieldName>,
}

impl LocalPreferencePolicy {
    pub fn new(fields: Vec<FieldName>) -> Self {
        LocalPreferencePolicy { fields }
    }
}

impl Default for LocalPreferencePolicy {
    fn default() -> Self {
        LocalPreferencePolicy::new(vec![
            FieldName::Temperature,
            FieldName::Dewpoint,
            FieldName::Humidity,
            FieldName::Pressure,
            FieldName::Precipitation,
        ])
    }
}

impl FieldPolicy for LocalPreferencePolicy {
    fn name(&self) -> &'static str {
        "local-preference"
    }

    fn fields(&self) -> &[FieldName] {
        &self.fields
    }

    fn select(
        &self,
        ctx: &SelectionContext<'_>,
        snapshots: &[WeatherSnapshot],
    ) -> Vec<(FieldName, WeatherReading)> {
        self.fields
            .iter()
            .filter_map(|field| {
                let candidates = snapshots
                    .iter()
                    .filter_map(|s| ctx.eligible(s, *field).map(|r| (s, r.observed_at, r)))
                    .collect();
                pick_local_first(ctx, candidates).map(|r| (*field, r.clone()))
            })
            .collect()
    }
}

/// Fields only an aviation report really measures: visibility, ceiling, sky cover.
#[derive(Debug)]
pub struct ReportPreferredPolicy {
    fields: Vec<FieldName>,
}

impl ReportPreferredPolicy {
    pub fn new(fields: Vec<FieldName>) -> Self {
        ReportPreferredPolicy { fields }
    }

    /// Lower is better: local METAR, other METAR, NWS, then anything else.
    fn rank(ctx: &SelectionContext<'_>, snapshot: &WeatherSnapshot) -> u8 {
        match snapshot.source_type {
            SourceType::Metar if ctx.is_local(snapshot) => 0,
            SourceType::Metar => 1,
            SourceType::Nws => 2,
            _ => 3,
        }
    }
}

impl Default for ReportPreferredPolicy {
    fn default() -> Self {
        ReportPreferredPolicy::new(vec![
            FieldName::Visibility,
            FieldName::Ceiling,
            FieldName::CloudCover,
        ])
    }
}

impl FieldPolicy for ReportPreferredPolicy {
    fn name(&self) -> &'static str {
        "report-preferred"
    }

    fn fields(&self) -> &[FieldName] {
        &self.fields
    }

    fn select(
        &self,
        ctx: &SelectionContext<'_>,
        snapshots: &[WeatherSnapshot],
    ) -> Vec<(FieldName, WeatherReading)> {
        self.fields
            .iter()
            .filter_map(|field| {
                snapshots
                    .iter()
                    .filter_map(|s| {
                        // A valid null ceiling is a reported "no ceiling", so it is eligible.
                        s.reading(*field)
                            .filter(|r| r.valid && self.is_present(*field, r))
                            .filter(|r| ctx.is_fresh(s, r.observed_at))
                            .map(|r| (s, r))
                    })
                    .min_by(|(sa, ra), (sb, rb)| {
                        Self::rank(ctx, sa)
                            .cmp(&Self::rank(ctx, sb))
                            .then_with(|| fresher((ra.observed_at, *sa), (rb.observed_at, *sb)))
                    })
                    .map(|(_, r)| (*field, r.clone()))
            })
            .collect()
    }
}

impl ReportPreferredPolicy {
    fn is_present(&self, field: FieldName, reading: &WeatherReading) -> bool {
        reading.value.is_some() || field == FieldName::Ceiling
    }
}

/// Reduces one cycle's validated snapshots to a single observation.
pub struct AggregationEngine {
    policies: Vec<Box<dyn FieldPolicy>>,
    hard_ceiling: Duration,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        AggregationEngine::new(vec![
            Box::new(WindGroupPolicy),
            Box::new(LocalPreferencePolicy::default()),
            Box::new(ReportPreferredPolicy::default()),
        ])
    }
}

impl AggregationEngine {
    pub fn new(policies: Vec<Box<dyn FieldPolicy>>) -> Self {
        AggregationEngine {
            policies,
            hard_ceiling: Duration::seconds(DEFAULT_HARD_STALENESS as i64),
        }
    }

    /// Readings at or past this age are never selected, matching the
    /// staleness pass that runs afterwards.
    pub fn with_hard_ceiling(mut self, hard_ceiling: Duration) -> Self {
        self.hard_ceiling = hard_ceiling;
        self
    }

    pub fn hard_ceiling(&self) -> Duration {
        self.hard_ceiling
    }

    pub fn policy_names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    pub fn aggregate(
        &self,
        airport: &Airport,
        snapshots: &[WeatherSnapshot],
        now: OffsetDateTime,
    ) -> AggregatedObservation {
        let mut ordered: Vec<WeatherSnapshot> = snapshots
            .iter()
            .filter(|s| s.error.is_none())
            .cloned()
            .collect();
        // One snapshot per source: the latest fetch, then the newest data.
        ordered.sort_by(|a, b| {
            a.source_id
                .cmp(&b.source_id)
                .then_with(|| b.fetched_at.cmp(&a.fetched_at))
                .then_with(|| b.latest_observation().cmp(&a.latest_observation()))
        });
        ordered.dedup_by(|later, kept| later.source_id == kept.source_id);

        let ctx = SelectionContext {
            airport,
            now,
            hard_ceiling: self.hard_ceiling,
        };
        let mut obs = AggregatedObservation::empty(airport.id.clone(), now);
        for policy in &self.policies {
            for (field, reading) in policy.select(&ctx, &ordered) {
                if policy.fields().contains(&field) {
                    obs.record(field, reading);
                }
            }
        }
        recompute_derived(&mut obs, airport.elevation_ft);
        obs
    }
}
