use crate::error::ConfigError;

use super::Measurement;

/// Exponential moving average with a fixed smoothing factor.
///
/// For the first `ceil(1 / alpha)` samples the effective alpha is
/// `1 / seen`, which makes the early value a plain running mean instead of
/// overweighting the seed sample.
#[derive(Debug)]
pub struct SimpleExponentialMovingAverage {
    alpha: f64,
    min_samples: usize,
    seen: usize,
    value: f64,
}

impl SimpleExponentialMovingAverage {
    pub fn new(alpha: f64) -> Result<Self, ConfigError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::Alpha(alpha));
        }
        Ok(Self {
            alpha,
            min_samples: (1.0 / alpha).ceil() as usize,
            seen: 0,
            value: 0.0,
        })
    }

    pub(crate) fn seen(&self) -> usize {
        self.seen
    }
}

impl Measurement for SimpleExponentialMovingAverage {
    fn add(&mut self, sample: f64) -> (f64, bool) {
        if self.seen < self.min_samples {
            self.seen += 1;
        }
        let alpha = if self.seen >= self.min_samples {
            self.alpha
        } else {
            1.0 / self.seen as f64
        };
        let new = (1.0 - alpha) * self.value + alpha * sample;
        let changed = new != self.value;
        self.value = new;
        (self.value, changed)
    }

    fn get(&self) -> f64 {
        self.value
    }

    fn reset(&mut self) {
        self.seen = 0;
        self.value = 0.0;
    }

    fn update(&mut self, op: &dyn Fn(f64) -> f64) {
        self.value = op(self.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_alpha_out_of_range() {
        assert!(SimpleExponentialMovingAverage::new(0.0).is_err());
        assert!(SimpleExponentialMovingAverage::new(1.5).is_err());
        assert!(SimpleExponentialMovingAverage::new(-0.1).is_err());
        assert!(SimpleExponentialMovingAverage::new(1.0).is_ok());
    }

    #[test]
    fn behaves_as_running_mean_during_warmup() {
        // alpha 0.25 -> 4 warm-up samples averaged plainly
        let mut m = SimpleExponentialMovingAverage::new(0.25).unwrap();
        m.add(4.0);
        assert_eq!(m.get(), 4.0);
        m.add(8.0);
        assert_eq!(m.get(), 6.0);
        m.add(9.0);
        assert_eq!(m.get(), 7.0);
        m.add(11.0);
        assert_eq!(m.get(), 8.0);
    }

    #[test]
    fn uses_configured_alpha_after_warmup() {
        let mut m = SimpleExponentialMovingAverage::new(0.5).unwrap();
        m.add(2.0);
        m.add(4.0); // warm-up complete, mean 3.0
        let (value, _) = m.add(7.0);
        assert!((value - 5.0).abs() < 1e-9);
    }
}
