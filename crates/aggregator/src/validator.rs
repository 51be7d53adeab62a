//! Physical-bounds screening for snapshot readings.
//!
//! Anything outside what the atmosphere (or an airport) can produce is nulled
//! and reported as a `ValidationIssue`; processing of the snapshot continues.

use time::{Duration, OffsetDateTime};

use crate::{FieldName, ReadingValue, ValidationIssue, WeatherSnapshot};

/// Pressure above this is assumed to be hundredths of inHg (2992 for 29.92).
const PRESSURE_SCALE_THRESHOLD: f64 = 100.0;

/// How far ahead of our clock an upstream timestamp may be before it is rejected.
pub const MAX_CLOCK_SKEW: Duration = Duration::minutes(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    const fn new(min: f64, max: f64) -> Self {
        Bounds { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Physically possible range per numeric field; `None` for textual fields.
pub fn bounds_for(field: FieldName) -> Option<Bounds> {
    let bounds = match field {
        FieldName::Temperature | FieldName::Dewpoint => Bounds::new(-100.0, 70.0),
        FieldName::Humidity => Bounds::new(0.0, 100.0),
        FieldName::Pressure => Bounds::new(10.0, 70.0),
        FieldName::WindSpeed | FieldName::GustSpeed => Bounds::new(0.0, 242.0),
        FieldName::WindDirection => Bounds::new(0.0, 360.0),
        FieldName::Visibility | FieldName::Ceiling | FieldName::Precipitation => {
            Bounds::new(0.0, f64::INFINITY)
        }
        FieldName::CloudCover => return None,
    };
    Some(bounds)
}

#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_clock_skew: Duration,
}

impl Default for Validator {
    fn default() -> Self {
        Validator {
            max_clock_skew: MAX_CLOCK_SKEW,
        }
    }
}

enum Verdict {
    Keep,
    Replace(f64),
    Reject(String),
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_clock_skew(max_clock_skew: Duration) -> Self {
        Validator { max_clock_skew }
    }

    /// Screens every reading in place and returns what was rejected.
    ///
    /// A reading stamped more than the allowed skew ahead of `now` is
    /// rejected, null or not.
    pub fn validate(
        &self,
        snapshot: &mut WeatherSnapshot,
        now: OffsetDateTime,
    ) -> Vec<ValidationIssue> {
        let mut issues = vec![];
        for (field, reading) in snapshot.readings.iter_mut() {
            let ahead = reading.observed_at - now;
            let verdict = if ahead > self.max_clock_skew {
                Verdict::Reject(format!(
                    "observed {}s in the future",
                    ahead.whole_seconds()
                ))
            } else {
                match reading.value.as_ref() {
                    Some(value) => check(*field, value),
                    None => continue,
                }
            };
            match verdict {
                Verdict::Keep => {}
                Verdict::Replace(corrected) => reading.value = Some(ReadingValue::Number(corrected)),
                Verdict::Reject(reason) => {
                    issues.push(ValidationIssue {
                        field: *field,
                        source: reading.source.clone(),
                        raw_value: reading.value.clone(),
                        reason,
                    });
                    reading.invalidate();
                }
            }
        }
        issues
    }
}

fn check(field: FieldName, value: &ReadingValue) -> Verdict {
    let bounds = match (bounds_for(field), value) {
        (None, ReadingValue::Text(text)) if text.trim().is_empty() => {
            return Verdict::Reject("empty text value".to_string())
        }
        (None, ReadingValue::Text(_)) => return Verdict::Keep,
        (None, ReadingValue::Number(_)) => {
            return Verdict::Reject("expected a coded text value".to_string())
        }
        (Some(_), ReadingValue::Text(_)) => {
            return Verdict::Reject("expected a numeric value".to_string())
        }
        (Some(bounds), ReadingValue::Number(_)) => bounds,
    };
    let Some(raw) = value.as_number() else {
        return Verdict::Reject("expected a numeric value".to_string());
    };
    if !raw.is_finite() {
        return Verdict::Reject("non-finite value".to_string());
    }
    if bounds.contains(raw) {
        return Verdict::Keep;
    }
    if field == FieldName::Pressure && raw > PRESSURE_SCALE_THRESHOLD {
        let corrected = raw / 100.0;
        if bounds.contains(corrected) {
            return Verdict::Replace(corrected);
        }
    }
    Verdict::Reject(format!(
        "{} outside physical range {}..={}",
        raw, bounds.min, bounds.max
    ))
}
