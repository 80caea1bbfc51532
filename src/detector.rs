//! Restart detection and alert throttling.
//!
//! Turns the previous run's persisted observation plus a fresh probe reading
//! into an alert decision and the state to persist for the next run. Uptime
//! since activation only grows while the unit keeps running, so a reading
//! that drops below the previous one by more than the jitter tolerance means
//! the unit restarted in between.

use crate::humanize::format_duration_ms;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Allowance for jitter between two consecutive uptime reads.
pub const DEFAULT_TOLERANCE_MS: u64 = 250;

/// Supervisor state label of a running unit.
pub const ACTIVE_STATE: &str = "active";

/// Durable record carried between runs. Zero means "not observed".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Uptime seen by the previous run, 0 if none or the unit was not active.
    #[serde(default)]
    pub last_uptime_ms: u64,
    /// Epoch milliseconds of the last alert sent, 0 if never.
    #[serde(default, rename = "last_alert_ms")]
    pub last_alert_at_ms: u64,
}

/// One status read of the watched unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReading {
    /// Milliseconds since the unit entered its current state (0 unless active).
    pub uptime_ms: u64,
    pub active_state: String,
}

impl ProbeReading {
    pub fn is_active(&self) -> bool {
        self.active_state == ACTIVE_STATE
    }
}

/// What the detector concluded about the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Active and still running since the last observation.
    Steady,
    /// Active, but uptime went backwards: the unit restarted.
    Restarted { suppressed: bool },
    /// Not in the active state at all.
    NotActive { suppressed: bool },
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDecision {
    pub verdict: Verdict,
    pub should_alert: bool,
    /// Alert text; empty for [`Verdict::Steady`].
    pub message: String,
    /// State to persist whether or not an alert fired.
    pub new_state: PersistedState,
}

/// True when no alert was ever sent or the cooldown has fully elapsed.
///
/// A clock that moved backwards counts as zero elapsed time.
pub fn alert_allowed(last_alert_at_ms: u64, now_ms: u64, cooldown: Duration) -> bool {
    if last_alert_at_ms == 0 {
        return true;
    }
    let elapsed = now_ms.saturating_sub(last_alert_at_ms);
    u128::from(elapsed) >= cooldown.as_millis()
}

/// Pure decision rule for one watched unit.
#[derive(Debug, Clone)]
pub struct RestartDetector {
    unit: String,
    cooldown: Duration,
    tolerance_ms: u64,
}

impl RestartDetector {
    pub fn new(unit: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            unit: unit.into(),
            cooldown,
            tolerance_ms: DEFAULT_TOLERANCE_MS,
        }
    }

    /// Override the jitter tolerance.
    #[allow(dead_code)]
    pub fn with_tolerance(mut self, tolerance_ms: u64) -> Self {
        self.tolerance_ms = tolerance_ms;
        self
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Decide whether `reading` warrants an alert given what the previous run saw.
    ///
    /// While not active, no restart comparison happens; the reading's uptime
    /// (normally 0) is stored so the next active reading starts fresh.
    /// `last_alert_at_ms` only moves when an alert actually fires, so a
    /// suppressed alert never extends the cooldown.
    pub fn evaluate(
        &self,
        prior: &PersistedState,
        reading: &ProbeReading,
        now: DateTime<Utc>,
    ) -> AlertDecision {
        let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let allowed = alert_allowed(prior.last_alert_at_ms, now_ms, self.cooldown);

        let (verdict, message) = if !reading.is_active() {
            let message = format!(
                "⚠️ Service {} state={} (uptime={})",
                self.unit,
                reading.active_state,
                format_duration_ms(reading.uptime_ms)
            );
            (
                Verdict::NotActive {
                    suppressed: !allowed,
                },
                message,
            )
        } else if self.restarted(prior.last_uptime_ms, reading.uptime_ms) {
            let message = format!(
                "🚨 RESTART detected: {} uptime dropped {} → {} (state={})",
                self.unit,
                format_duration_ms(prior.last_uptime_ms),
                format_duration_ms(reading.uptime_ms),
                reading.active_state
            );
            (
                Verdict::Restarted {
                    suppressed: !allowed,
                },
                message,
            )
        } else {
            (Verdict::Steady, String::new())
        };

        let should_alert = allowed && verdict != Verdict::Steady;
        let new_state = PersistedState {
            last_uptime_ms: reading.uptime_ms,
            last_alert_at_ms: if should_alert {
                now_ms
            } else {
                prior.last_alert_at_ms
            },
        };

        AlertDecision {
            verdict,
            should_alert,
            message,
            new_state,
        }
    }

    /// Strict comparison with the tolerance added to the new reading.
    /// A prior of 0 never counts.
    fn restarted(&self, prior_uptime_ms: u64, uptime_ms: u64) -> bool {
        prior_uptime_ms > 0 && uptime_ms.saturating_add(self.tolerance_ms) < prior_uptime_ms
    }
}
