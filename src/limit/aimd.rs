use std::fmt;

use parking_lot::RwLock;

use crate::error::ConfigError;

use super::ChangeListener;
use super::LimitAlgorithm;

const DEFAULT_INITIAL_LIMIT: usize = 10;
const DEFAULT_BACK_OFF_RATIO: f64 = 0.9;

/// Loss-based limit: additive increase while samples succeed at the limit,
/// multiplicative decrease on a drop.
pub struct AimdLimit {
    back_off_ratio: f64,
    inner: RwLock<State>,
}

struct State {
    limit: usize,
    listeners: Vec<ChangeListener>,
}

impl AimdLimit {
    /// `initial_limit` 10, `back_off_ratio` 0.9.
    pub fn new_with_defaults() -> Self {
        Self::new(DEFAULT_INITIAL_LIMIT, DEFAULT_BACK_OFF_RATIO)
            .expect("default AIMD configuration is valid")
    }

    pub fn new(initial_limit: usize, back_off_ratio: f64) -> Result<Self, ConfigError> {
        if !(back_off_ratio > 0.0 && back_off_ratio < 1.0) {
            return Err(ConfigError::BackOffRatio(back_off_ratio));
        }
        Ok(Self {
            back_off_ratio,
            inner: RwLock::new(State {
                limit: initial_limit.max(1),
                listeners: Vec::new(),
            }),
        })
    }

    pub fn back_off_ratio(&self) -> f64 {
        self.back_off_ratio
    }
}

impl LimitAlgorithm for AimdLimit {
    fn estimated_limit(&self) -> usize {
        self.inner.read().limit
    }

    fn on_sample(&self, _start_time: u64, _rtt: u64, in_flight: usize, did_drop: bool) {
        let mut state = self.inner.write();
        if did_drop {
            let backed_off = (state.limit as f64 * self.back_off_ratio).floor() as usize;
            state.limit = backed_off.min(state.limit.saturating_sub(1)).max(1);
        } else if in_flight >= state.limit {
            state.limit += 1;
        } else {
            return;
        }
        let limit = state.limit;
        for listener in &state.listeners {
            listener(limit);
        }
    }

    fn notify_on_change(&self, listener: ChangeListener) {
        self.inner.write().listeners.push(listener);
    }
}

impl fmt::Debug for AimdLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AimdLimit{{limit={}, back_off_ratio={:.4}}}",
            self.inner.read().limit,
            self.back_off_ratio
        )
    }
}
