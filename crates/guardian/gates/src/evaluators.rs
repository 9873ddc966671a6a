//! Stateless gate evaluators.
//!
//! Each function maps one assertion plus what was observed in the current
//! cycle to a single [`GateVerdict`].

use chrono::{DateTime, Utc};
use guardian_types::{
    Assertion, ConflictCheck, GateKind, GateMeasurement, GateStatus, GateVerdict,
    StructuralFingerprint,
};
use tracing::{error, warn};

use crate::error::{GateError, Result};
use crate::overlap::overlap;
use crate::pert::relative_drift;

/// Freshness: HALT once the assertion has gone unreviewed for longer than its SLA.
pub fn freshness(assertion: &Assertion, now: DateTime<Utc>) -> GateVerdict {
    let age = now - assertion.last_updated;
    let window = assertion.sla_window();
    let measurement = GateMeasurement::Freshness {
        age_seconds: age.num_seconds(),
        sla_seconds: window.num_seconds(),
    };

    if age > window {
        warn!(
            assertion_id = %assertion.id,
            days = age.num_days(),
            sla_days = assertion.sla_days,
            "Freshness gate HALT"
        );
        GateVerdict::halt(
            GateKind::Freshness,
            format!(
                "last reviewed {} days ago (SLA {} days, owner {})",
                age.num_days(),
                assertion.sla_days,
                assertion.owner_role
            ),
        )
        .with_measurement(measurement)
    } else {
        GateVerdict::pass(GateKind::Freshness).with_measurement(measurement)
    }
}

/// Stability: compare the current value against the baseline under the
/// assertion's distribution.
///
/// Returns the verdict and, when it was computed, the drift figure.
pub fn stability(
    assertion: &Assertion,
    current: Option<f64>,
    threshold: f64,
) -> Result<(GateVerdict, Option<f64>)> {
    let Some(baseline) = assertion.baseline_value else {
        return Ok((GateVerdict::skip(GateKind::Stability, "no baseline value"), None));
    };
    let Some(current) = current else {
        return Ok((GateVerdict::skip(GateKind::Stability, "no current value"), None));
    };
    if !current.is_finite() || !baseline.is_finite() {
        return Err(GateError::NonFiniteValue(assertion.id.clone()));
    }
    assertion.distribution.validate()?;
    if assertion.distribution.is_degenerate() {
        return Ok((
            GateVerdict::skip(GateKind::Stability, "zero-range distribution"),
            None,
        ));
    }

    let drift = relative_drift(current, baseline, &assertion.distribution);
    let measurement = GateMeasurement::Drift { drift, threshold };

    let verdict = if drift > threshold {
        warn!(
            assertion_id = %assertion.id,
            drift,
            threshold,
            "Stability gate HALT"
        );
        GateVerdict::halt(
            GateKind::Stability,
            format!("drift {:.1}% exceeds threshold {:.1}%", drift * 100.0, threshold * 100.0),
        )
        .with_measurement(measurement)
    } else {
        GateVerdict::pass(GateKind::Stability).with_measurement(measurement)
    };

    Ok((verdict, Some(drift)))
}

/// Structure: HALT when the computation behind the value was redefined.
pub fn structure(
    assertion: &Assertion,
    current: Option<&StructuralFingerprint>,
) -> GateVerdict {
    let Some(baseline) = assertion.baseline_fingerprint.as_ref() else {
        return GateVerdict::skip(GateKind::Structure, "no baseline fingerprint");
    };
    let Some(current) = current else {
        return GateVerdict::skip(GateKind::Structure, "no current fingerprint");
    };

    if baseline == current {
        GateVerdict::pass(GateKind::Structure).with_measurement(GateMeasurement::Structure { matches: true })
    } else {
        error!(
            assertion_id = %assertion.id,
            baseline = %baseline.abbreviated(),
            current = %current.abbreviated(),
            "Structure gate HALT: fingerprint changed"
        );
        GateVerdict::halt(
            GateKind::Structure,
            format!(
                "fingerprint changed ({} -> {})",
                baseline.abbreviated(),
                current.abbreviated()
            ),
        )
        .with_measurement(GateMeasurement::Structure { matches: false })
    }
}

/// Pairwise overlap between two independently owned assertions.
///
/// A pair whose overlap integral falls below `cutoff` is a conflict.
pub fn pairwise_overlap(first: &Assertion, second: &Assertion, cutoff: f64) -> Result<ConflictCheck> {
    let value = overlap(&first.distribution, &second.distribution)?;
    let status = if value < cutoff {
        warn!(
            first = %first.id,
            second = %second.id,
            overlap = value,
            cutoff,
            "Overlap gate conflict"
        );
        GateStatus::Halt
    } else {
        GateStatus::Pass
    };

    Ok(ConflictCheck {
        first: first.id.clone(),
        second: second.id.clone(),
        overlap: value,
        cutoff,
        status,
    })
}
