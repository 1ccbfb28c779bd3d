//! Predicate helpers for partitioned strategies.

use crate::context::Context;

/// Matches contexts whose value under `key` equals `expected`.
pub fn string_value_matcher(
    key: &'static str,
    expected: impl Into<String>,
    case_insensitive: bool,
) -> impl Fn(&Context) -> bool + Send + Sync + 'static {
    let expected: String = expected.into();
    move |ctx| match ctx.value(key) {
        Some(value) if case_insensitive => value.eq_ignore_ascii_case(&expected),
        Some(value) => value == expected,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::PARTITION_CONTEXT_KEY;

    #[test]
    fn matches_exact_values() {
        let matcher = string_value_matcher(PARTITION_CONTEXT_KEY, "batch", false);
        assert!(matcher(&Context::new().with_value(PARTITION_CONTEXT_KEY, "batch")));
        assert!(!matcher(&Context::new().with_value(PARTITION_CONTEXT_KEY, "BATCH")));
        assert!(!matcher(&Context::new()));
    }

    #[test]
    fn case_insensitive_matching() {
        let matcher = string_value_matcher(PARTITION_CONTEXT_KEY, "batch", true);
        assert!(matcher(&Context::new().with_value(PARTITION_CONTEXT_KEY, "Batch")));
        assert!(!matcher(&Context::new().with_value(PARTITION_CONTEXT_KEY, "live")));
    }
}
