/// One watch pass: load state, probe the unit, decide, alert, persist.
///
/// Only a probe failure aborts the pass. State load problems read as "no
/// prior observation", and notification or save failures are logged and
/// otherwise ignored so the next scheduled run can still catch a restart.
use crate::detector::{PersistedState, RestartDetector, Verdict};
use crate::notify::{self, Notifier};
use crate::probe::{ProbeError, StatusProbe};
use crate::state::StateStore;
use chrono::{DateTime, Utc};

/// Summary of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub verdict: Verdict,
    /// An alert was due and handed to the notifier.
    pub alerted: bool,
    /// The notifier reported success.
    pub delivered: bool,
    pub new_state: PersistedState,
    pub state_saved: bool,
}

/// Run a single evaluation for `detector.unit()`.
pub async fn run(
    detector: &RestartDetector,
    store: &StateStore,
    probe: &dyn StatusProbe,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> Result<RunReport, ProbeError> {
    let unit = detector.unit();
    let prior = store.load();

    let reading = probe.read(unit).await?;
    tracing::debug!(
        unit,
        uptime_ms = reading.uptime_ms,
        state = %reading.active_state,
        prior_uptime_ms = prior.last_uptime_ms,
        "probed unit"
    );

    let decision = detector.evaluate(&prior, &reading, now);
    match decision.verdict {
        Verdict::Steady => {
            tracing::debug!(unit, "no restart detected");
        }
        Verdict::Restarted { suppressed: true } => {
            tracing::info!(unit, "restart detected but in cooldown; skipping alert");
        }
        Verdict::NotActive { suppressed: true } => {
            tracing::info!(unit, state = %reading.active_state, "unit not active but in cooldown; skipping alert");
        }
        Verdict::Restarted { suppressed: false } | Verdict::NotActive { suppressed: false } => {
            tracing::info!(unit, message = %decision.message, "alerting");
        }
    }

    let delivered = if decision.should_alert {
        notify::dispatch(notifier, &decision.message).await
    } else {
        false
    };

    let state_saved = match store.save(&decision.new_state) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, path = %store.path().display(), "failed to save state");
            false
        }
    };

    Ok(RunReport {
        verdict: decision.verdict,
        alerted: decision.should_alert,
        delivered,
        new_state: decision.new_state,
        state_saved,
    })
}
