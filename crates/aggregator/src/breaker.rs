use slog::{info, warn, Logger};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use time::{Date, OffsetDateTime};

use crate::FailureClass;

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        BreakerSettings {
            failure_threshold: 3,
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakerState {
    pub consecutive_failures: u32,
    pub backoff_until: Option<OffsetDateTime>,
    pub last_failure: Option<FailureClass>,
}

impl BreakerState {
    pub fn is_open(&self, now: OffsetDateTime) -> bool {
        self.backoff_until.is_some_and(|until| now < until)
    }
}

/// `now + backoff`, pinned to the last representable instant when that overflows.
fn open_until(now: OffsetDateTime, backoff: Duration) -> OffsetDateTime {
    time::Duration::try_from(backoff)
        .ok()
        .and_then(|backoff| now.checked_add(backoff))
        .unwrap_or_else(|| Date::MAX.midnight().assume_utc())
}

/// Per-source failure tracking that decides whether a source is tried this cycle.
///
/// Keys are opaque strings; the coordinator uses `"{airport}/{source}"` so the
/// same provider at two airports backs off independently.
pub struct CircuitBreaker {
    settings: BreakerSettings,
    states: Mutex<HashMap<String, BreakerState>>,
    logger: Logger,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings, logger: Logger) -> Self {
        CircuitBreaker {
            settings,
            states: Mutex::new(HashMap::new()),
            logger,
        }
    }

    pub fn may_fetch(&self, key: &str, now: OffsetDateTime) -> bool {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(key).map_or(true, |state| !state.is_open(now))
    }

    pub fn state(&self, key: &str) -> BreakerState {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(key).cloned().unwrap_or_default()
    }

    /// Backoff once `failures` has reached the threshold. Grows by doubling up to
    /// `max_backoff`; permanent failures wait twice as long as transient ones.
    pub fn backoff_for(&self, failures: u32, class: FailureClass) -> Duration {
        let exponent = failures
            .saturating_sub(self.settings.failure_threshold)
            .min(16);
        let transient = self
            .settings
            .base_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.settings.max_backoff)
            .min(self.settings.max_backoff);
        match class {
            FailureClass::Transient => transient,
            FailureClass::Permanent => transient.checked_mul(2).unwrap_or(Duration::MAX),
        }
    }

    pub fn record_failure(
        &self,
        key: &str,
        class: FailureClass,
        now: OffsetDateTime,
    ) -> BreakerState {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states.entry(key.to_string()).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(class);

        if state.consecutive_failures >= self.settings.failure_threshold {
            let backoff = self.backoff_for(state.consecutive_failures, class);
            state.backoff_until = Some(open_until(now, backoff));
            warn!(
                self.logger,
                "circuit open for {}: {} consecutive failures ({:?}), backing off {}s",
                key,
                state.consecutive_failures,
                class,
                backoff.as_secs()
            );
        }
        state.clone()
    }

    pub fn record_success(&self, key: &str) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = states.remove(key) {
            if previous.backoff_until.is_some() {
                info!(
                    self.logger,
                    "circuit closed for {} after {} failures", key, previous.consecutive_failures
                );
            }
        }
    }
}
