//! General time utility functions

use chrono;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Number of whole samples covering `duration_s` at `rate_hz`, at least one.
pub fn num_samples(duration_s: f64, rate_hz: f64) -> usize {
    let n = (duration_s * rate_hz).round();

    if n.is_finite() && n >= 1.0 {
        n as usize
    } else {
        1
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(duration_to_seconds(chrono::Duration::milliseconds(1500)), Some(1.5));
        assert_eq!(duration_to_seconds(chrono::Duration::zero()), Some(0.0));
    }

    #[test]
    fn test_num_samples() {
        assert_eq!(num_samples(1.0, 1000.0), 1000);
        assert_eq!(num_samples(0.0, 1000.0), 1);
        assert_eq!(num_samples(1.0, f64::NAN), 1);
        assert_eq!(num_samples(0.5, 5.0), 3);
    }
}
