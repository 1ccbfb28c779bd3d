use std::time::Duration;

/// Errors raised while constructing limiters, estimators or strategies.
///
/// All validation happens at construction time; once a component is built,
/// operational rejections are reported through return values and never as
/// errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Smoothing factors blend the previous and the new estimate and must
    /// stay within `[0, 1]`.
    #[error("smoothing must be within [0, 1], got {0}")]
    Smoothing(f64),

    /// The AIMD multiplicative decrease factor must be within `(0, 1)`.
    #[error("back-off ratio must be within (0, 1), got {0}")]
    BackOffRatio(f64),

    /// Exponential moving averages require an alpha within `(0, 1]`.
    #[error("alpha must be within (0, 1], got {0}")]
    Alpha(f64),

    /// Moving percentiles track a quantile strictly between 0 and 1.
    #[error("percentile must be within (0, 1), got {0}")]
    Percentile(f64),

    /// Sampling windows shorter than this cannot produce meaningful RTT
    /// aggregates.
    #[error("window time must be at least {min:?}, got {got:?}")]
    WindowTime { min: Duration, got: Duration },

    /// The maximum window time must not undercut the minimum.
    #[error("max window time {max:?} is shorter than min window time {min:?}")]
    WindowBounds { min: Duration, max: Duration },

    /// Windows need a minimum number of samples to be significant.
    #[error("window size must be at least {min}, got {got}")]
    WindowSize { min: usize, got: usize },

    /// A lower limit bound above the upper bound can never be satisfied.
    #[error("min limit {min} exceeds max concurrency {max}")]
    LimitBounds { min: usize, max: usize },

    /// Each partition's share of the total limit must be within `(0, 1]`.
    #[error("partition {name:?} has percent {percent} outside (0, 1]")]
    PartitionPercent { name: String, percent: f64 },

    /// Partition shares must account for exactly the whole limit.
    #[error("partition percents sum to {total}, expected 1.0")]
    PartitionPercentSum { total: f64 },

    /// Partition names key the strategy's accounting and must be unique.
    #[error("duplicate partition {0:?}")]
    DuplicatePartition(String),

    /// A partitioned strategy without partitions can never admit anything.
    #[error("at least one partition is required")]
    NoPartitions,
}
