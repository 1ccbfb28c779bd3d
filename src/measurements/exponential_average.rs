use super::Measurement;

/// Warm-up combinator applied before the average switches to exponential
/// smoothing.
pub type WarmupFn = fn(current: f64, sample: f64) -> f64;

/// Exponential moving average with a warm-up phase.
///
/// The first sample seeds the value, the next `warmup_window - 1` samples
/// are combined with the warm-up function (minimum by default), and from
/// then on the value is smoothed with `alpha = 2 / (window + 1)`.
#[derive(Debug)]
pub struct ExponentialAverageMeasurement {
    value: f64,
    window: usize,
    warmup_window: usize,
    warmup_fn: WarmupFn,
    count: usize,
}

impl ExponentialAverageMeasurement {
    pub fn new(window: usize, warmup_window: usize) -> Self {
        Self::with_warmup_fn(window, warmup_window, f64::min)
    }

    pub fn with_warmup_fn(window: usize, warmup_window: usize, warmup_fn: WarmupFn) -> Self {
        Self {
            value: 0.0,
            window,
            warmup_window,
            warmup_fn,
            count: 0,
        }
    }

    fn factor(&self) -> f64 {
        2.0 / (self.window as f64 + 1.0)
    }
}

impl Measurement for ExponentialAverageMeasurement {
    fn add(&mut self, sample: f64) -> (f64, bool) {
        if self.count == 0 {
            self.count += 1;
            self.value = sample;
        } else if self.count < self.warmup_window {
            self.count += 1;
            self.value = (self.warmup_fn)(self.value, sample);
        } else {
            let f = self.factor();
            self.value = self.value * (1.0 - f) + sample * f;
        }
        (self.value, true)
    }

    fn get(&self) -> f64 {
        self.value
    }

    fn reset(&mut self) {
        self.value = 0.0;
        self.count = 0;
    }

    fn update(&mut self, op: &dyn Fn(f64) -> f64) {
        self.value = op(self.value);
    }
}
