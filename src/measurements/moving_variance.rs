use crate::error::ConfigError;

use super::Measurement;
use super::SimpleExponentialMovingAverage;

/// Moving mean and variance built from two exponential averages.
///
/// `add` returns the standard deviation (the consumer in the moving
/// percentile scales its step by it); `get` returns the variance.
#[derive(Debug)]
pub struct SimpleMovingVariance {
    average: SimpleExponentialMovingAverage,
    variance: SimpleExponentialMovingAverage,
    stdev: f64,
    normalized: f64,
}

impl SimpleMovingVariance {
    pub fn new(alpha_average: f64, alpha_variance: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            average: SimpleExponentialMovingAverage::new(alpha_average)?,
            variance: SimpleExponentialMovingAverage::new(alpha_variance)?,
            stdev: 0.0,
            normalized: 0.0,
        })
    }

    /// Standard deviation of the observed samples.
    pub fn stdev(&self) -> f64 {
        self.stdev
    }

    /// Most recent sample expressed in standard deviations from the mean.
    pub fn normalized(&self) -> f64 {
        self.normalized
    }
}

impl Measurement for SimpleMovingVariance {
    fn add(&mut self, sample: f64) -> (f64, bool) {
        if self.average.seen() > 0 {
            let deviation = sample - self.average.get();
            self.average.add(sample);
            self.variance.add(deviation * deviation);
        } else {
            self.average.add(sample);
        }

        let mean = self.average.get();
        let stdev = self.variance.get().max(0.0).sqrt();
        let mut normalized = self.normalized;
        if stdev != 0.0 {
            normalized = (sample - mean) / stdev;
        }
        let changed = stdev != self.stdev || normalized != self.normalized;
        self.stdev = stdev;
        self.normalized = normalized;
        (self.stdev, changed)
    }

    fn get(&self) -> f64 {
        self.variance.get()
    }

    fn reset(&mut self) {
        self.average.reset();
        self.variance.reset();
        self.stdev = 0.0;
        self.normalized = 0.0;
    }

    fn update(&mut self, op: &dyn Fn(f64) -> f64) {
        self.stdev = op(self.variance.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sample_has_zero_variance() {
        let mut m = SimpleMovingVariance::new(0.5, 0.5).unwrap();
        let (stdev, _) = m.add(10.0);
        assert_eq!(stdev, 0.0);
        assert_eq!(m.get(), 0.0);
    }

    #[test]
    fn constant_stream_keeps_variance_at_zero() {
        let mut m = SimpleMovingVariance::new(0.5, 0.5).unwrap();
        for _ in 0..20 {
            m.add(5.0);
        }
        assert_eq!(m.stdev(), 0.0);
    }

    #[test]
    fn spread_samples_produce_positive_stdev() {
        let mut m = SimpleMovingVariance::new(0.1, 0.1).unwrap();
        for i in 0..50 {
            m.add(if i % 2 == 0 { 0.0 } else { 10.0 });
        }
        assert!(m.stdev() > 1.0, "stdev {} too small", m.stdev());
        assert!(m.get() > 0.0);
    }

    #[test]
    fn reset_clears_all_state() {
        let mut m = SimpleMovingVariance::new(0.2, 0.2).unwrap();
        m.add(1.0);
        m.add(100.0);
        m.reset();
        assert_eq!(m.get(), 0.0);
        assert_eq!(m.stdev(), 0.0);
        assert_eq!(m.normalized(), 0.0);
    }
}
