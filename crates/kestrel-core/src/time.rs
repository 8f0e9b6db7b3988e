//! Media time representation and millisecond conversions

use serde::{Deserialize, Serialize};

/// Rational media time as reported by the decoding engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaTime {
    /// `value / timescale` seconds
    Finite { value: i64, timescale: i32 },
    /// Unbounded (live streams)
    Indefinite,
    /// Not yet known or not applicable
    Invalid,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime::Finite { value: 0, timescale: 1 };

    pub fn new(value: i64, timescale: i32) -> Self {
        MediaTime::Finite { value, timescale }
    }

    pub fn from_millis(millis: i64) -> Self {
        MediaTime::Finite {
            value: millis,
            timescale: 1000,
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        MediaTime::Finite {
            value: (secs * 1_000_000.0).round() as i64,
            timescale: 1_000_000,
        }
    }

    pub fn is_indefinite(&self) -> bool {
        matches!(self, MediaTime::Indefinite)
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, MediaTime::Invalid)
    }

    /// Integer milliseconds, saturating at the `i64` bounds. A zero
    /// timescale and non-finite times map to 0.
    pub fn to_millis(&self) -> i64 {
        match *self {
            MediaTime::Finite { timescale: 0, .. } => 0,
            MediaTime::Finite { value, timescale } => {
                let millis = i128::from(value) * 1000 / i128::from(timescale);
                i64::try_from(millis).unwrap_or(if millis < 0 { i64::MIN } else { i64::MAX })
            }
            MediaTime::Indefinite | MediaTime::Invalid => 0,
        }
    }

    /// Seconds as a float; NaN when not finite
    pub fn as_secs_f64(&self) -> f64 {
        match *self {
            MediaTime::Finite { timescale: 0, .. } => f64::NAN,
            MediaTime::Finite { value, timescale } => value as f64 / f64::from(timescale),
            MediaTime::Indefinite | MediaTime::Invalid => f64::NAN,
        }
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        MediaTime::ZERO
    }
}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (MediaTime::Finite { .. }, MediaTime::Finite { .. }) => {
                self.as_secs_f64().partial_cmp(&other.as_secs_f64())
            }
            (MediaTime::Indefinite, MediaTime::Indefinite) => Some(std::cmp::Ordering::Equal),
            (MediaTime::Finite { .. }, MediaTime::Indefinite) => Some(std::cmp::Ordering::Less),
            (MediaTime::Indefinite, MediaTime::Finite { .. }) => Some(std::cmp::Ordering::Greater),
            _ => None,
        }
    }
}

/// Contiguous span of media time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: MediaTime,
    pub duration: MediaTime,
}

impl TimeRange {
    pub fn new(start: MediaTime, duration: MediaTime) -> Self {
        Self { start, duration }
    }

    pub fn from_millis(start: i64, end: i64) -> Self {
        Self {
            start: MediaTime::from_millis(start),
            duration: MediaTime::from_millis(end - start),
        }
    }

    /// End of the range in seconds
    pub fn end_secs(&self) -> f64 {
        self.start.as_secs_f64() + self.duration.as_secs_f64()
    }
}

/// Converts an interval in seconds to integer milliseconds, saturating
pub fn interval_to_millis(secs: f64) -> i64 {
    (secs * 1000.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_millis() {
        assert_eq!(MediaTime::new(90_000, 90_000).to_millis(), 1000);
        assert_eq!(MediaTime::new(1, 30).to_millis(), 33);
        assert_eq!(MediaTime::from_millis(1).to_millis(), 1);
    }

    #[test]
    fn test_zero_timescale_is_zero() {
        assert_eq!(MediaTime::new(12345, 0).to_millis(), 0);
        assert_eq!(MediaTime::Indefinite.to_millis(), 0);
        assert_eq!(MediaTime::Invalid.to_millis(), 0);
    }

    #[test]
    fn test_ordering() {
        assert!(MediaTime::from_millis(500) > MediaTime::ZERO);
        assert!(MediaTime::from_millis(500) < MediaTime::new(1, 1));
        assert!(MediaTime::from_millis(500) < MediaTime::Indefinite);
        assert!(MediaTime::Invalid.partial_cmp(&MediaTime::ZERO).is_none());
    }

    #[test]
    fn test_large_values_saturate() {
        // 292 years at nanosecond timescale stays exact
        assert_eq!(
            MediaTime::new(i64::MAX, 1_000_000_000).to_millis(),
            i64::MAX / 1_000_000
        );
        assert_eq!(MediaTime::new(i64::MAX, 1).to_millis(), i64::MAX);
        assert_eq!(MediaTime::new(i64::MIN, 1).to_millis(), i64::MIN);
        assert_eq!(MediaTime::new(-90_000, -90_000).to_millis(), 1000);
    }

    #[test]
    fn test_interval_to_millis() {
        assert_eq!(interval_to_millis(1.5), 1500);
        assert_eq!(interval_to_millis(f64::MAX), i64::MAX);
    }
}
