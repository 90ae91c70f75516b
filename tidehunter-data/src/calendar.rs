//! Candle bucket arithmetic.
//!
//! Pure functions aligning millisecond timestamps to [`Timeframe`] bucket boundaries. Each
//! wall-clock function has an `_at` twin taking the clock reading explicitly.

use crate::timeframe::Timeframe;
use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Length of one [`Timeframe`] bucket in milliseconds.
pub fn duration_ms(timeframe: Timeframe) -> i64 {
    timeframe.duration_ms()
}

/// Maximum number of candles retained for the [`Timeframe`].
pub fn max_length(timeframe: Timeframe) -> usize {
    timeframe.max_length()
}

/// Start of the bucket containing `timestamp`.
pub fn bucket_start(timestamp: i64, timeframe: Timeframe) -> i64 {
    timestamp - timestamp.rem_euclid(timeframe.duration_ms())
}

/// Start of the bucket containing `now`, ie/ the candle that is still open.
pub fn latest_incomplete_bucket_at(now: i64, timeframe: Timeframe) -> i64 {
    bucket_start(now, timeframe)
}

/// Start of the most recent candle that has closed as of `now`.
pub fn latest_complete_bucket_at(now: i64, timeframe: Timeframe) -> i64 {
    latest_incomplete_bucket_at(now, timeframe) - timeframe.duration_ms()
}

/// Oldest bucket kept for a series as of `now`.
///
/// Anchored to the open candle and reaching back `max_length` buckets; backfill starts here
/// and the collector prunes everything older.
pub fn retention_floor_at(now: i64, timeframe: Timeframe) -> i64 {
    latest_incomplete_bucket_at(now, timeframe)
        - timeframe.duration_ms() * timeframe.max_length() as i64
}

pub fn latest_incomplete_bucket(timeframe: Timeframe) -> i64 {
    latest_incomplete_bucket_at(now_ms(), timeframe)
}

pub fn latest_complete_bucket(timeframe: Timeframe) -> i64 {
    latest_complete_bucket_at(now_ms(), timeframe)
}

pub fn retention_floor(timeframe: Timeframe) -> i64 {
    retention_floor_at(now_ms(), timeframe)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01T10:37:12.345Z
    const NOW: i64 = 1_704_105_432_345;

    #[test]
    fn test_bucket_start() {
        struct TestCase {
            timestamp: i64,
            timeframe: Timeframe,
            expected: i64,
        }

        let tests = vec![
            TestCase {
                // TC0: minute bucket drops seconds & millis
                timestamp: NOW,
                timeframe: Timeframe::M1,
                expected: 1_704_105_420_000,
            },
            TestCase {
                // TC1: hour bucket
                timestamp: NOW,
                timeframe: Timeframe::H1,
                expected: 1_704_103_200_000,
            },
            TestCase {
                // TC2: timestamp already on a boundary is its own bucket
                timestamp: 1_704_103_200_000,
                timeframe: Timeframe::H1,
                expected: 1_704_103_200_000,
            },
            TestCase {
                // TC3: day bucket is aligned to midnight UTC
                timestamp: NOW,
                timeframe: Timeframe::D1,
                expected: 1_704_067_200_000,
            },
            TestCase {
                // TC4: weekly buckets are aligned to the epoch (Thursday)
                timestamp: NOW,
                timeframe: Timeframe::W1,
                expected: 1_703_721_600_000,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = bucket_start(test.timestamp, test.timeframe);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_bucket_start_contains_timestamp_for_every_timeframe() {
        let samples = [0, 1, 59_999, 60_000, NOW, NOW + 86_399_999, 1_893_456_000_123];

        for timeframe in Timeframe::ALL {
            for timestamp in samples {
                let start = bucket_start(timestamp, timeframe);
                assert!(start <= timestamp, "{timeframe} {timestamp}");
                assert!(timestamp < start + duration_ms(timeframe), "{timeframe} {timestamp}");
                assert_eq!(start % duration_ms(timeframe), 0);
            }
        }
    }

    #[test]
    fn test_latest_complete_is_one_bucket_before_incomplete() {
        for timeframe in Timeframe::ALL {
            assert_eq!(
                latest_complete_bucket_at(NOW, timeframe),
                latest_incomplete_bucket_at(NOW, timeframe) - timeframe.duration_ms()
            );
        }
    }

    #[test]
    fn test_wall_clock_buckets_are_consistent() {
        for timeframe in Timeframe::ALL {
            let incomplete = latest_incomplete_bucket(timeframe);
            let complete = latest_complete_bucket(timeframe);

            // Tolerate a bucket rollover between the two clock readings
            let delta = incomplete - complete;
            assert!(
                delta == timeframe.duration_ms() || delta == 0,
                "{timeframe}"
            );
            assert!(incomplete <= now_ms());
        }
    }

    #[test]
    fn test_retention_floor_spans_max_length_buckets() {
        let floor = retention_floor_at(NOW, Timeframe::H1);
        assert_eq!(floor, 1_704_103_200_000 - 100 * 3_600_000);
        assert_eq!(max_length(Timeframe::H1), 100);
    }
}
