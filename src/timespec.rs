//! Time parsing: suffixed durations and `[lo, hi]` intervals.
//!
//! Configuration time fields accept a bare number, a string with a unit
//! suffix, or a two-element interval. Everything resolves to integer
//! nanoseconds; intervals stay symbolic until the moment of consumption,
//! when a single value is drawn uniformly from `[lo, hi]`.

use rand::Rng;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::TimeNs;

/// Nanoseconds per unit for every accepted suffix.
fn unit_scale(unit: &str) -> Option<u64> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "microsecond" | "microseconds" => 1_000,
        "ms" | "millisecond" | "milliseconds" => 1_000_000,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000_000_000,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000_000_000,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000_000_000,
        _ => return None,
    })
}

/// Parse a duration string into nanoseconds.
///
/// The numeric part accepts `.` or `,` as decimal separator. A missing
/// unit multiplies by `default_scale` (callers pass 1 for plain
/// nanoseconds).
///
/// - `"1ms"` → 1_000_000
/// - `"0,5s"` → 500_000_000
/// - `"250"` with `default_scale = 1` → 250
pub fn parse_duration(s: &str, default_scale: u64) -> Result<TimeNs, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::InvalidTime {
            value: s.into(),
            reason: "empty duration string".into(),
        });
    }

    // Split at the first alphabetic character (µ counts); everything after
    // it is the unit.
    let unit_start = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic() || *c == 'µ')
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(unit_start);
    let unit = unit.trim();

    let scale = if unit.is_empty() {
        default_scale
    } else {
        unit_scale(unit).ok_or_else(|| ConfigError::InvalidTime {
            value: s.into(),
            reason: format!("unknown unit {unit:?}"),
        })?
    };

    let num: f64 = num_str
        .trim()
        .replace(',', ".")
        .parse()
        .map_err(|_| ConfigError::InvalidTime {
            value: s.into(),
            reason: format!("invalid number {:?}", num_str.trim()),
        })?;

    if !num.is_finite() || num < 0.0 {
        return Err(ConfigError::InvalidTime {
            value: s.into(),
            reason: "duration must be a finite non-negative number".into(),
        });
    }

    let ns = num * scale as f64;
    if ns > u64::MAX as f64 {
        return Err(ConfigError::InvalidTime {
            value: s.into(),
            reason: "duration overflows 64-bit nanoseconds".into(),
        });
    }
    Ok(ns.round() as TimeNs)
}

/// A raw time field as it appears in the configuration document. Resolved
/// into a [`TimeValue`] during validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    /// Bare non-negative number, scaled by the caller's default.
    Number(f64),
    /// Suffixed duration string.
    Text(String),
    /// Two-element `[lo, hi]` interval.
    Interval(Vec<TimeSpec>),
}

impl TimeSpec {
    /// Resolve to a concrete value or interval, scaling unitless numbers by
    /// `default_scale` nanoseconds.
    pub fn resolve(&self, default_scale: u64) -> Result<TimeValue, ConfigError> {
        match self {
            TimeSpec::Number(n) => {
                if !n.is_finite() || *n < 0.0 {
                    return Err(ConfigError::InvalidTime {
                        value: n.to_string(),
                        reason: "time must be a finite non-negative number".into(),
                    });
                }
                let ns = n * default_scale as f64;
                if ns > u64::MAX as f64 {
                    return Err(ConfigError::InvalidTime {
                        value: n.to_string(),
                        reason: "time overflows 64-bit nanoseconds".into(),
                    });
                }
                Ok(TimeValue::Fixed(ns.round() as TimeNs))
            }
            TimeSpec::Text(s) => Ok(TimeValue::Fixed(parse_duration(s, default_scale)?)),
            TimeSpec::Interval(parts) => {
                if parts.len() != 2 {
                    return Err(ConfigError::InvalidTime {
                        value: format!("{parts:?}"),
                        reason: "interval must have exactly two elements".into(),
                    });
                }
                let lo = match parts[0].resolve(default_scale)? {
                    TimeValue::Fixed(v) => v,
                    TimeValue::Interval(..) => {
                        return Err(ConfigError::InvalidTime {
                            value: format!("{parts:?}"),
                            reason: "interval bounds must be scalar".into(),
                        })
                    }
                };
                let hi = match parts[1].resolve(default_scale)? {
                    TimeValue::Fixed(v) => v,
                    TimeValue::Interval(..) => {
                        return Err(ConfigError::InvalidTime {
                            value: format!("{parts:?}"),
                            reason: "interval bounds must be scalar".into(),
                        })
                    }
                };
                if lo > hi {
                    return Err(ConfigError::InvalidTime {
                        value: format!("[{lo}, {hi}]"),
                        reason: "interval lower bound exceeds upper bound".into(),
                    });
                }
                Ok(TimeValue::Interval(lo, hi))
            }
        }
    }
}

/// A resolved time: either fixed, or an interval sampled at consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeValue {
    Fixed(TimeNs),
    /// Inclusive bounds; yields `lo + uniform_int(0, hi - lo)`.
    Interval(TimeNs, TimeNs),
}

impl TimeValue {
    /// Draw a concrete value. Fixed values ignore the RNG so fixed-only
    /// configurations consume no randomness.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> TimeNs {
        match *self {
            TimeValue::Fixed(v) => v,
            TimeValue::Interval(lo, hi) => lo + rng.gen_range(0..=(hi - lo)),
        }
    }

    /// The lower bound (the value itself for fixed times).
    pub fn min(&self) -> TimeNs {
        match *self {
            TimeValue::Fixed(v) => v,
            TimeValue::Interval(lo, _) => lo,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_duration("1ms", 1).unwrap(), 1_000_000);
        assert_eq!(parse_duration("2us", 1).unwrap(), 2_000);
        assert_eq!(parse_duration("2µs", 1).unwrap(), 2_000);
        assert_eq!(parse_duration("3s", 1).unwrap(), 3_000_000_000);
        assert_eq!(parse_duration("1m", 1).unwrap(), 60_000_000_000);
        assert_eq!(parse_duration("1h", 1).unwrap(), 3_600_000_000_000);
        assert_eq!(parse_duration("10 ns", 1).unwrap(), 10);
        assert_eq!(parse_duration("4 seconds", 1).unwrap(), 4_000_000_000);
        assert_eq!(parse_duration("2 mins", 1).unwrap(), 120_000_000_000);
    }

    #[test]
    fn test_parse_decimal_separators() {
        assert_eq!(parse_duration("0.5s", 1).unwrap(), 500_000_000);
        assert_eq!(parse_duration("0,5s", 1).unwrap(), 500_000_000);
        assert_eq!(parse_duration("1.5ms", 1).unwrap(), 1_500_000);
    }

    #[test]
    fn test_parse_default_scale() {
        // Bare numbers default to nanoseconds unless the caller scales.
        assert_eq!(parse_duration("250", 1).unwrap(), 250);
        assert_eq!(parse_duration("250", 1_000_000).unwrap(), 250_000_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("", 1).is_err());
        assert!(parse_duration("abc", 1).is_err());
        assert!(parse_duration("1 lightyear", 1).is_err());
        assert!(parse_duration("-5ms", 1).is_err());
    }

    #[test]
    fn test_resolve_interval() {
        let spec = TimeSpec::Interval(vec![TimeSpec::Number(2.0), TimeSpec::Text("1ms".into())]);
        assert_eq!(
            spec.resolve(1).unwrap(),
            TimeValue::Interval(2, 1_000_000)
        );

        let bad = TimeSpec::Interval(vec![TimeSpec::Number(5.0), TimeSpec::Number(2.0)]);
        assert!(bad.resolve(1).is_err());

        let short = TimeSpec::Interval(vec![TimeSpec::Number(5.0)]);
        assert!(short.resolve(1).is_err());
    }

    #[test]
    fn test_sample_within_bounds() {
        let mut rng = SmallRng::seed_from_u64(42);
        let iv = TimeValue::Interval(10, 20);
        for _ in 0..100 {
            let v = iv.sample(&mut rng);
            assert!((10..=20).contains(&v));
        }
        assert_eq!(TimeValue::Fixed(7).sample(&mut rng), 7);
    }

    #[test]
    fn test_degenerate_interval() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(TimeValue::Interval(5, 5).sample(&mut rng), 5);
    }
}
