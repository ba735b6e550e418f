//! Exponential backoff for blacklist TTLs (spec.md §3): `min(base * 2^(n-1), max)`.

/// `failure_count` is the value returned by `StateStore::increment_failure`
/// (always >= 1 on the call path that feeds this). A count of zero is
/// treated the same as one, so the function stays total.
pub fn backoff_ttl_seconds(failure_count: u64, base_seconds: u64, max_seconds: u64) -> u64 {
    let exponent = failure_count.saturating_sub(1).min(32) as u32;
    let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    base_seconds.saturating_mul(multiplier).min(max_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_with_each_failure_up_to_the_cap() {
        assert_eq!(backoff_ttl_seconds(1, 5, 300), 5);
        assert_eq!(backoff_ttl_seconds(2, 5, 300), 10);
        assert_eq!(backoff_ttl_seconds(3, 5, 300), 20);
        assert_eq!(backoff_ttl_seconds(4, 5, 300), 40);
        assert_eq!(backoff_ttl_seconds(7, 5, 300), 300);
        assert_eq!(backoff_ttl_seconds(0, 5, 300), 5);
    }

    #[test]
    fn never_overflows_for_pathological_counts() {
        assert_eq!(backoff_ttl_seconds(u64::MAX, 5, 300), 300);
    }
}
