use crate::error::ConfigError;

use super::Measurement;
use super::SimpleMovingVariance;

/// Moving percentile estimate without a sample window.
///
/// Frank-style moving percentile: the estimate steps down by `delta / p`
/// for samples below it and up by `delta / (1 - p)` for samples above it,
/// with `delta` rescaled to `delta0 * stdev` as the spread of the stream is
/// learned.
#[derive(Debug)]
pub struct WindowlessMovingPercentile {
    p: f64,
    delta_initial: f64,
    delta: f64,
    delta_state: SimpleMovingVariance,
    value: f64,
    seen: usize,
}

impl WindowlessMovingPercentile {
    pub fn new(
        p: f64,
        delta: f64,
        alpha_average: f64,
        alpha_variance: f64,
    ) -> Result<Self, ConfigError> {
        if !(p > 0.0 && p < 1.0) {
            return Err(ConfigError::Percentile(p));
        }
        Ok(Self {
            p,
            delta_initial: delta,
            delta,
            delta_state: SimpleMovingVariance::new(alpha_average, alpha_variance)?,
            value: 0.0,
            seen: 0,
        })
    }
}

impl Measurement for WindowlessMovingPercentile {
    fn add(&mut self, sample: f64) -> (f64, bool) {
        let mut changed = false;
        if self.seen < 2 {
            self.seen += 1;
        }

        let original_delta = self.delta;
        let (stdev, _) = self.delta_state.add(sample);
        if self.seen >= 2 {
            self.delta = self.delta_initial * stdev;
            if self.delta != original_delta {
                changed = true;
            }
        }

        let mut new_value = self.value;
        if self.seen == 1 {
            new_value = sample;
            changed = true;
        } else if sample < self.value {
            new_value = self.value - self.delta / self.p;
        } else if sample > self.value {
            new_value = self.value + self.delta / (1.0 - self.p);
        }
        if new_value != self.value {
            changed = true;
        }
        self.value = new_value;
        (self.value, changed)
    }

    fn get(&self) -> f64 {
        self.value
    }

    fn reset(&mut self) {
        self.value = 0.0;
        self.seen = 0;
        self.delta = self.delta_initial;
        self.delta_state.reset();
    }

    fn update(&mut self, op: &dyn Fn(f64) -> f64) {
        // Re-feed the current estimate through the percentile step before
        // applying the operation, so delta tracking stays consistent.
        let (value, _) = self.add(self.value);
        self.value = op(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_percentile_out_of_range() {
        assert!(WindowlessMovingPercentile::new(0.0, 0.1, 0.5, 0.5).is_err());
        assert!(WindowlessMovingPercentile::new(1.0, 0.1, 0.5, 0.5).is_err());
        assert!(WindowlessMovingPercentile::new(0.9, 0.1, 0.5, 0.5).is_ok());
    }

    #[test]
    fn first_sample_seeds_the_estimate() {
        let mut m = WindowlessMovingPercentile::new(0.5, 0.1, 0.5, 0.5).unwrap();
        let (value, changed) = m.add(42.0);
        assert_eq!(value, 42.0);
        assert!(changed);
    }

    #[test]
    fn constant_stream_converges_to_the_constant() {
        let mut m = WindowlessMovingPercentile::new(0.9, 0.05, 0.5, 0.5).unwrap();
        for _ in 0..100 {
            m.add(10.0);
        }
        assert!((m.get() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn high_percentile_tracks_the_upper_tail() {
        let mut m = WindowlessMovingPercentile::new(0.9, 0.1, 0.2, 0.2).unwrap();
        // Mostly 10s with occasional 100 spikes; the p90 estimate should end
        // up well above the median.
        for i in 0..500 {
            m.add(if i % 10 == 0 { 100.0 } else { 10.0 });
        }
        assert!(m.get() > 10.0, "p90 estimate {} stuck at the median", m.get());
    }

    #[test]
    fn update_applies_the_operation_to_the_estimate() {
        let mut m = WindowlessMovingPercentile::new(0.5, 0.1, 0.5, 0.5).unwrap();
        m.add(10.0);
        // Re-feeding the current estimate leaves it in place, so only the
        // operation moves it.
        m.update(&|v| v + 1.0);
        assert_eq!(m.get(), 11.0);
    }

    #[test]
    fn reset_restores_the_initial_delta() {
        let mut m = WindowlessMovingPercentile::new(0.5, 0.1, 0.5, 0.5).unwrap();
        m.add(10.0);
        m.add(1000.0);
        m.reset();
        assert_eq!(m.get(), 0.0);
        let (value, _) = m.add(3.0);
        assert_eq!(value, 3.0);
    }
}
