//! Threshold functions used by the delay-based estimators.
//!
//! Vegas-style algorithms scale their alpha/beta thresholds with the current
//! limit; these helpers build the usual shapes.

/// A function of the current limit returning a constant.
pub fn fixed(value: usize) -> impl Fn(usize) -> usize + Send + Sync {
    move |_limit| value
}

/// `max(baseline, log10(limit))`, the default threshold shape for Vegas.
pub fn log10_root(baseline: usize) -> impl Fn(usize) -> usize + Send + Sync {
    move |limit| baseline.max(log10_floor(limit as f64) as usize)
}

/// Float variant of [`log10_root`] used for the increase/decrease steps.
pub fn log10_root_float(baseline: f64) -> impl Fn(f64) -> f64 + Send + Sync {
    move |limit| baseline.max(log10_floor(limit))
}

/// `max(baseline, sqrt(limit))`, a more aggressive alternative.
pub fn sqrt_root(baseline: usize) -> impl Fn(usize) -> usize + Send + Sync {
    move |limit| baseline.max((limit as f64).sqrt() as usize)
}

fn log10_floor(value: f64) -> f64 {
    if value <= 1.0 {
        0.0
    } else {
        value.log10().floor()
    }
}
