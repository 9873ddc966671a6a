//! PERT distribution maths.
//!
//! Each assertion's uncertainty is a PERT-shaped distribution over
//! `[min, max]` peaking at `mode`, represented as a four-parameter Beta with
//! the standard mapping
//!
//! ```text
//! alpha = 1 + 4 (mode - min) / (max - min)
//! beta  = 1 + 4 (max - mode) / (max - min)
//! ```
//!
//! Both shape parameters are at least 1, so the density is finite everywhere
//! on the closed support.

use guardian_types::PertDistribution;

/// Lanczos approximation coefficients (g = 7, n = 9).
const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural log of the gamma function for `x > 0`.
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection formula.
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut acc = LANCZOS_COEFFICIENTS[0];
    for (i, coefficient) in LANCZOS_COEFFICIENTS.iter().enumerate().skip(1) {
        acc += coefficient / (x + i as f64);
    }
    let t = x + LANCZOS_G + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// Beta shape parameters of a PERT distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaShape {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaShape {
    /// Standard PERT mapping. `None` for a zero-width distribution.
    pub fn from_pert(dist: &PertDistribution) -> Option<Self> {
        if dist.is_degenerate() {
            return None;
        }
        let range = dist.range();
        Some(Self {
            alpha: 1.0 + 4.0 * (dist.mode - dist.min) / range,
            beta: 1.0 + 4.0 * (dist.max - dist.mode) / range,
        })
    }

    fn ln_beta_function(&self) -> f64 {
        ln_gamma(self.alpha) + ln_gamma(self.beta) - ln_gamma(self.alpha + self.beta)
    }
}

/// Beta density rescaled onto `[min, max]`, with the normaliser precomputed.
#[derive(Debug, Clone, Copy)]
pub struct ScaledBeta {
    min: f64,
    max: f64,
    range: f64,
    shape: BetaShape,
    ln_norm: f64,
}

impl ScaledBeta {
    pub fn new(dist: &PertDistribution) -> Option<Self> {
        let shape = BetaShape::from_pert(dist)?;
        let range = dist.range();
        Some(Self {
            min: dist.min,
            max: dist.max,
            range,
            shape,
            ln_norm: shape.ln_beta_function() + range.ln(),
        })
    }

    pub fn shape(&self) -> BetaShape {
        self.shape
    }

    /// Density at `x`; zero outside the support.
    pub fn density(&self, x: f64) -> f64 {
        if !(x >= self.min && x <= self.max) {
            return 0.0;
        }
        let t = ((x - self.min) / self.range).clamp(0.0, 1.0);
        let ln_kernel = ln_power(t, self.shape.alpha - 1.0) + ln_power(1.0 - t, self.shape.beta - 1.0);
        (ln_kernel - self.ln_norm).exp()
    }
}

/// `exponent * ln(base)` with `0^0 = 1` and `0^k = 0`.
fn ln_power(base: f64, exponent: f64) -> f64 {
    if exponent == 0.0 {
        0.0
    } else if base <= 0.0 {
        f64::NEG_INFINITY
    } else {
        exponent * base.ln()
    }
}

/// PERT density at `x`. `None` for a zero-width distribution.
pub fn pert_density(dist: &PertDistribution, x: f64) -> Option<f64> {
    ScaledBeta::new(dist).map(|beta| beta.density(x))
}

/// Normalised signed distance of `value` from `mode`.
///
/// `(clamp(value, min, max) - mode) / (max - min)`. Values outside the support
/// saturate at the bound, so the result always lies in `[-1, 1]`. A zero-width
/// distribution yields `0.0`.
pub fn drift(value: f64, dist: &PertDistribution) -> f64 {
    if dist.is_degenerate() {
        return 0.0;
    }
    let clamped = value.clamp(dist.min, dist.max);
    (clamped - dist.mode) / dist.range()
}

/// Magnitude of movement between two values, in normalised units.
///
/// Equal to the distance between both values' positions on the clamped unit
/// scale of the distribution.
pub fn relative_drift(current: f64, baseline: f64, dist: &PertDistribution) -> f64 {
    (drift(current, dist) - drift(baseline, dist)).abs()
}
