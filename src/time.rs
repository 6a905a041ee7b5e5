use chrono::{DateTime, Utc};

/// Generates a timestamp in microseconds since the Unix epoch.
///
/// Both roles stamp with the same function so that an echoed probe can be
/// compared against the local clock on return.
///
/// ```
/// use rttometer::time::timestamp_micros;
/// let timestamp = timestamp_micros();
/// println!("Timestamp is {}", timestamp);
/// ```
pub fn timestamp_micros() -> u64 {
    convert_dt_to_micros(Utc::now())
}

/// Elapsed microseconds between a send timestamp and a receive timestamp.
///
/// Never negative: a wall clock stepping backwards yields zero.
pub fn elapsed_micros(sent_us: u64, received_us: u64) -> u64 {
    received_us.saturating_sub(sent_us)
}

fn convert_dt_to_micros(date: DateTime<Utc>) -> u64 {
    // Pre-epoch dates clamp to zero.
    u64::try_from(date.timestamp_micros()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_dt_to_micros_test() {
        const TEST_CASES: &[(i64, u32, u64)] = &[
            (0, 0, 0),
            (1_525_987, 0, 1_525_987_000_000),
            (2_584_229, 151_000_000, 2_584_229_151_000),
            (1_700_000_000, 999_999_999, 1_700_000_000_999_999),
        ];

        for &(secs, nanos, expected) in TEST_CASES {
            let sample = DateTime::<Utc>::from_timestamp(secs, nanos).expect("Invalid timestamp");
            assert_eq!(convert_dt_to_micros(sample), expected);
        }
    }

    #[test]
    fn convert_pre_epoch_clamps_to_zero() {
        let sample = DateTime::<Utc>::from_timestamp(-10, 0).expect("Invalid timestamp");
        assert_eq!(convert_dt_to_micros(sample), 0);
    }

    #[test]
    fn timestamp_is_monotonic_enough() {
        let a = timestamp_micros();
        let b = timestamp_micros();
        assert!(a > 0);
        assert!(elapsed_micros(a, b) < 1_000_000);
    }

    #[test]
    fn elapsed_micros_never_negative() {
        assert_eq!(elapsed_micros(100, 250), 150);
        assert_eq!(elapsed_micros(100, 100), 0);
        assert_eq!(elapsed_micros(250, 100), 0);
    }
}
