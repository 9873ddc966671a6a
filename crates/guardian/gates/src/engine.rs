//! Gate pipeline for one evaluation cycle.

use chrono::{DateTime, Utc};
use guardian_types::{
    Assertion, AssertionEvaluation, AssertionId, AssertionStatus, ConflictCheck, GateKind,
    GateMeasurement, GateVerdict, StructuralFingerprint,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::error::{GateError, Result};
use crate::evaluators;

/// Gate thresholds. Manifests may override both per project.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Maximum tolerated drift in normalised units (default: 0.15)
    pub stability_threshold: f64,
    /// Minimum overlap integral for a declared pair (default: 0.05)
    pub overlap_cutoff: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            stability_threshold: 0.15,
            overlap_cutoff: 0.05,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("stability_threshold", self.stability_threshold),
            ("overlap_cutoff", self.overlap_cutoff),
        ] {
            if !(value.is_finite() && value > 0.0 && value <= 1.0) {
                return Err(GateError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }
}

/// What the cycle observed for one assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: Option<f64>,
    pub fingerprint: Option<StructuralFingerprint>,
    pub read_at: Option<DateTime<Utc>>,
    /// Why the value could not be used, if it could not.
    pub error: Option<String>,
}

impl Observation {
    pub fn numeric(value: f64, fingerprint: StructuralFingerprint, read_at: DateTime<Utc>) -> Self {
        Self {
            value: Some(value),
            fingerprint: Some(fingerprint),
            read_at: Some(read_at),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            value: None,
            fingerprint: None,
            read_at: None,
            error: Some(reason.into()),
        }
    }
}

/// Every assertion's evaluation plus the declared-pair checks.
#[derive(Debug, Clone, Default)]
pub struct CycleVerdicts {
    pub assertions: BTreeMap<AssertionId, AssertionEvaluation>,
    pub conflicts: Vec<ConflictCheck>,
}

/// Runs the gates. Holds no state beyond its thresholds.
#[derive(Debug, Clone, Default)]
pub struct GateEngine {
    config: GateConfig,
}

impl GateEngine {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Evaluate freshness, stability and structure for one assertion.
    ///
    /// Gate errors never escape: the failing gate becomes SKIP and the error
    /// is recorded on the evaluation.
    pub fn evaluate_assertion(
        &self,
        assertion: &Assertion,
        observation: &Observation,
        now: DateTime<Utc>,
    ) -> AssertionEvaluation {
        let mut errors: Vec<String> = observation.error.iter().cloned().collect();
        let mut verdicts = vec![evaluators::freshness(assertion, now)];

        let mut drift = None;
        match evaluators::stability(assertion, observation.value, self.config.stability_threshold) {
            Ok((verdict, computed)) => {
                drift = computed;
                let verdict = match (&verdict.measurement, &observation.error) {
                    (None, Some(reason)) if assertion.baseline_value.is_some() => {
                        GateVerdict::skip(GateKind::Stability, reason.clone())
                    }
                    _ => verdict,
                };
                verdicts.push(verdict);
            }
            Err(e) => {
                warn!(assertion_id = %assertion.id, error = %e, "Stability gate degraded to SKIP");
                verdicts.push(GateVerdict::skip(GateKind::Stability, e.to_string()));
                errors.push(e.to_string());
            }
        }

        verdicts.push(evaluators::structure(assertion, observation.fingerprint.as_ref()));

        let underlying = AssertionStatus::from_verdicts(&verdicts);
        debug!(assertion_id = %assertion.id, status = %underlying, "Assertion evaluated");

        AssertionEvaluation {
            assertion_id: assertion.id.clone(),
            logical_name: assertion.logical_name.clone(),
            owner_role: assertion.owner_role.clone(),
            distribution: assertion.distribution,
            verdicts,
            underlying_status: underlying,
            status: underlying,
            drift,
            current_value: observation.value,
            current_fingerprint: observation.fingerprint.clone(),
            read_at: observation.read_at,
            evaluation_error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
            active_override: None,
        }
    }

    /// Evaluate every declared pair and fold the result into both members'
    /// verdicts, so a conflict HALTs the assertions involved.
    pub fn evaluate_conflicts(
        &self,
        assertions: &[Assertion],
        pairs: &[(AssertionId, AssertionId)],
        evaluations: &mut BTreeMap<AssertionId, AssertionEvaluation>,
    ) -> Vec<ConflictCheck> {
        let by_id: HashMap<&AssertionId, &Assertion> = assertions.iter().map(|a| (&a.id, a)).collect();
        let mut checks = Vec::with_capacity(pairs.len());

        for (first_id, second_id) in pairs {
            let resolved = by_id
                .get(first_id)
                .ok_or_else(|| GateError::UnknownAssertion(first_id.clone()))
                .and_then(|first| {
                    by_id
                        .get(second_id)
                        .map(|second| (*first, *second))
                        .ok_or_else(|| GateError::UnknownAssertion(second_id.clone()))
                });

            let outcome = resolved.and_then(|(first, second)| {
                evaluators::pairwise_overlap(first, second, self.config.overlap_cutoff)
            });

            match outcome {
                Ok(check) => {
                    for (id, partner) in [(first_id, second_id), (second_id, first_id)] {
                        if let Some(eval) = evaluations.get_mut(id) {
                            let measurement = GateMeasurement::Overlap {
                                partner: partner.clone(),
                                overlap: check.overlap,
                                cutoff: check.cutoff,
                            };
                            let verdict = if check.status.is_halt() {
                                GateVerdict::halt(
                                    GateKind::Overlap,
                                    format!(
                                        "overlap with {} is {:.3}, below cutoff {:.3}",
                                        partner, check.overlap, check.cutoff
                                    ),
                                )
                            } else {
                                GateVerdict::pass(GateKind::Overlap)
                            };
                            eval.verdicts.push(verdict.with_measurement(measurement));
                        }
                    }
                    checks.push(check);
                }
                Err(e) => {
                    warn!(first = %first_id, second = %second_id, error = %e, "Overlap gate degraded to SKIP");
                    for id in [first_id, second_id] {
                        if let Some(eval) = evaluations.get_mut(id) {
                            eval.verdicts.push(GateVerdict::skip(GateKind::Overlap, e.to_string()));
                        }
                    }
                }
            }
        }

        for eval in evaluations.values_mut() {
            eval.underlying_status = AssertionStatus::from_verdicts(&eval.verdicts);
            eval.status = eval.underlying_status;
        }

        checks
    }

    /// Evaluate a whole cycle.
    ///
    /// Assertions missing from `observations` are evaluated as unreadable.
    pub fn evaluate_all(
        &self,
        assertions: &[Assertion],
        observations: &HashMap<AssertionId, Observation>,
        pairs: &[(AssertionId, AssertionId)],
        now: DateTime<Utc>,
    ) -> CycleVerdicts {
        let missing = Observation::failed("no reading for binding");
        let mut evaluations: BTreeMap<AssertionId, AssertionEvaluation> = assertions
            .iter()
            .map(|a| {
                let observation = observations.get(&a.id).unwrap_or(&missing);
                (a.id.clone(), self.evaluate_assertion(a, observation, now))
            })
            .collect();

        let conflicts = self.evaluate_conflicts(assertions, pairs, &mut evaluations);

        CycleVerdicts {
            assertions: evaluations,
            conflicts,
        }
    }
}
