//! Wall-clock helpers. Everything store-adjacent stamps records in epoch
//! milliseconds, matching the wire format.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_monotone_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        // Sanity: later than 2020-01-01.
        assert!(a > 1_577_836_800_000);
    }
}
