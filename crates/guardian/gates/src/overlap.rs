//! Overlap integral between two PERT distributions.
//!
//! `overlap(A, B) = integral of min(f_A(x), f_B(x)) dx` over the union of both
//! supports. The integrand is zero wherever either density is zero, so the
//! quadrature only has to cover the intersection of the supports.

use guardian_types::PertDistribution;

use crate::error::{GateError, Result};
use crate::pert::ScaledBeta;

/// Composite Simpson intervals over the shared support. Must be even.
pub const DEFAULT_INTERVALS: usize = 2_000;

/// Largest overlap reported for distributions that are not identical.
///
/// Differences below the quadrature's resolution would otherwise round to
/// exactly `1.0`, which is reserved for identical distributions.
pub const MAX_DISTINCT_OVERLAP: f64 = 1.0 - f64::EPSILON;

/// Overlap integral with the default resolution.
///
/// Symmetric, bounded in `[0, 1]`, `1` for identical distributions and `0`
/// for disjoint supports.
pub fn overlap(a: &PertDistribution, b: &PertDistribution) -> Result<f64> {
    overlap_with_intervals(a, b, DEFAULT_INTERVALS)
}

/// Overlap integral using `intervals` Simpson panels.
pub fn overlap_with_intervals(
    a: &PertDistribution,
    b: &PertDistribution,
    intervals: usize,
) -> Result<f64> {
    a.validate()?;
    b.validate()?;

    if a == b {
        return Ok(1.0);
    }

    let (density_a, density_b) = match (ScaledBeta::new(a), ScaledBeta::new(b)) {
        (Some(da), Some(db)) => (da, db),
        // Point masses share mass only with an identical point mass, which the
        // equality check above already handled.
        _ => return Ok(0.0),
    };

    let lo = a.min.max(b.min);
    let hi = a.max.min(b.max);
    if hi <= lo {
        return Ok(0.0);
    }

    let value = simpson(lo, hi, intervals, |x| {
        density_a.density(x).min(density_b.density(x))
    })?;
    Ok(value.clamp(0.0, MAX_DISTINCT_OVERLAP))
}

/// Composite Simpson's rule.
pub fn simpson<F>(lo: f64, hi: f64, intervals: usize, f: F) -> Result<f64>
where
    F: Fn(f64) -> f64,
{
    if intervals == 0 || intervals % 2 != 0 {
        return Err(GateError::InvalidQuadrature(intervals));
    }

    let h = (hi - lo) / intervals as f64;
    let mut sum = f(lo) + f(hi);
    for i in 1..intervals {
        let x = lo + h * i as f64;
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(x);
    }
    Ok(sum * h / 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dist(min: f64, mode: f64, max: f64) -> PertDistribution {
        PertDistribution::new(min, mode, max).unwrap()
    }

    #[test]
    fn test_density_integrates_to_one() {
        for d in [dist(0.0, 5.0, 10.0), dist(0.0, 0.0, 1.0), dist(0.0, 2.0, 10.0)] {
            let beta = ScaledBeta::new(&d).unwrap();
            let mass = simpson(d.min, d.max, DEFAULT_INTERVALS, |x| beta.density(x)).unwrap();
            assert!((mass - 1.0).abs() < 1e-4, "mass {mass} for {d:?}");
        }
    }

    #[test]
    fn test_identity() {
        let d = dist(800.0, 1000.0, 1200.0);
        assert_eq!(overlap(&d, &d).unwrap(), 1.0);
    }

    #[test]
    fn test_disjoint_supports() {
        let a = dist(0.0, 1.0, 2.0);
        let b = dist(3.0, 4.0, 5.0);
        assert_eq!(overlap(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_touching_supports() {
        let a = dist(0.0, 1.0, 2.0);
        let b = dist(2.0, 3.0, 4.0);
        assert_eq!(overlap(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_nearly_identical_is_close_to_one() {
        let a = dist(0.0, 5.0, 10.0);
        let b = dist(0.0, 5.0, 10.001);
        let value = overlap(&a, &b).unwrap();
        assert!(value > 0.99 && value < 1.0, "overlap {value}");
    }

    #[test]
    fn test_unresolvable_difference_stays_below_one() {
        let a = dist(0.0, 3.0, 10.0);
        for max in [10.0 + 1e-7, 10.0 + 1e-9] {
            let b = dist(0.0, 3.0, max);
            assert!(a != b);
            assert!(overlap(&a, &b).unwrap() < 1.0);
            assert!(overlap(&b, &a).unwrap() < 1.0);
        }
        assert_eq!(overlap(&a, &a).unwrap(), 1.0);
    }

    #[test]
    fn test_partial_overlap_is_strictly_between() {
        let a = dist(0.0, 0.5, 1.0);
        let b = dist(0.5, 1.0, 1.5);
        let value = overlap(&a, &b).unwrap();
        assert!(value > 0.0 && value < 0.5, "overlap {value}");
    }

    #[test]
    fn test_conflicting_assumptions_fall_below_cutoff() {
        // Sales expects ~1.2M, finance plans around 600k: barely any shared mass.
        let sales = dist(1_000_000.0, 1_200_000.0, 1_500_000.0);
        let finance = dist(400_000.0, 600_000.0, 1_050_000.0);
        let value = overlap(&sales, &finance).unwrap();
        assert!(value < 0.05, "overlap {value}");
    }

    #[test]
    fn test_point_masses() {
        let point = dist(5.0, 5.0, 5.0);
        let other_point = dist(6.0, 6.0, 6.0);
        let continuous = dist(0.0, 5.0, 10.0);
        assert_eq!(overlap(&point, &point).unwrap(), 1.0);
        assert_eq!(overlap(&point, &other_point).unwrap(), 0.0);
        assert_eq!(overlap(&point, &continuous).unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_distribution_is_an_error() {
        let bad = PertDistribution {
            min: 10.0,
            mode: 0.0,
            max: 5.0,
        };
        let good = dist(0.0, 1.0, 2.0);
        assert!(matches!(
            overlap(&bad, &good),
            Err(GateError::InvalidDistribution(_))
        ));
    }

    #[test]
    fn test_odd_interval_count_rejected() {
        assert!(matches!(
            simpson(0.0, 1.0, 3, |x| x),
            Err(GateError::InvalidQuadrature(3))
        ));
    }

    fn arb_distribution() -> impl Strategy<Value = PertDistribution> {
        (-1_000.0f64..1_000.0, 0.0f64..500.0, 0.0f64..500.0).prop_map(|(min, up, span)| {
            let mode = min + up;
            PertDistribution {
                min,
                mode,
                max: mode + span,
            }
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn property_overlap_identity(d in arb_distribution()) {
            prop_assert_eq!(overlap(&d, &d).unwrap(), 1.0);
        }

        #[test]
        fn property_overlap_symmetric(a in arb_distribution(), b in arb_distribution()) {
            prop_assert_eq!(overlap(&a, &b).unwrap(), overlap(&b, &a).unwrap());
        }

        #[test]
        fn property_overlap_bounded(a in arb_distribution(), b in arb_distribution()) {
            let value = overlap(&a, &b).unwrap();
            prop_assert!((0.0..=1.0).contains(&value));
        }
    }
}
