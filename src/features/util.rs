//! Conversion and scoring helpers shared across feature extraction.

use chrono::NaiveDate;
use md5::{Digest, Md5};

pub fn safe_i64(val: &str, default: i64) -> i64 {
    let t = val.trim();
    if t.is_empty() {
        return default;
    }
    t.parse().unwrap_or(default)
}

pub fn safe_f64(val: &str, default: f64) -> f64 {
    let t = val.trim();
    if t.is_empty() {
        return default;
    }
    t.parse().unwrap_or(default)
}

/// Sex code ('1' stallion, '2' mare, '3' gelding) to numeric encoding.
pub fn encode_sex(sex_code: &str) -> f64 {
    match sex_code.trim() {
        "2" => 1.0,
        "3" => 2.0,
        _ => 0.0,
    }
}

/// Speed index from a raw finishing time in MSSS* format (minutes digit
/// followed by tenths of seconds). Higher is faster; centered around 80.
pub fn calc_speed_index(avg_time: Option<f64>) -> f64 {
    let t = match avg_time {
        Some(t) if t > 0.0 => t,
        _ => return 80.0,
    };
    let minutes = (t / 1000.0).floor();
    let seconds = (t % 1000.0) / 10.0;
    let total = minutes * 60.0 + seconds;
    (100.0 - (total - 90.0) * 2.0).clamp(50.0, 120.0)
}

/// Running style from the average 3rd-corner position:
/// 1 front runner, 2 stalker, 3 closer, 4 deep closer.
pub fn determine_style(avg_corner3: f64) -> u8 {
    if avg_corner3 <= 2.0 {
        1
    } else if avg_corner3 <= 5.0 {
        2
    } else if avg_corner3 <= 10.0 {
        3
    } else {
        4
    }
}

/// Grade code (A..H) to a numeric class rank, 8 highest.
pub fn grade_to_rank(grade_code: &str) -> f64 {
    match grade_code.trim() {
        "A" => 8.0,
        "B" => 7.0,
        "C" => 6.0,
        "D" => 5.0,
        "E" => 4.0,
        "F" => 3.0,
        "G" => 2.0,
        "H" => 1.0,
        _ => 3.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistanceCategory {
    Sprint,
    Mile,
    Middle,
    Classic,
    Long,
}

impl DistanceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceCategory::Sprint => "sprint",
            DistanceCategory::Mile => "mile",
            DistanceCategory::Middle => "middle",
            DistanceCategory::Classic => "classic",
            DistanceCategory::Long => "long",
        }
    }
}

pub fn distance_category(distance_m: i64) -> DistanceCategory {
    if distance_m <= 1200 {
        DistanceCategory::Sprint
    } else if distance_m <= 1600 {
        DistanceCategory::Mile
    } else if distance_m <= 2000 {
        DistanceCategory::Middle
    } else if distance_m <= 2400 {
        DistanceCategory::Classic
    } else {
        DistanceCategory::Long
    }
}

/// Rest-interval buckets: back-to-back through 4+ weeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalCategory {
    Rentou,
    Week1,
    Week2,
    Week3,
    Week4Plus,
}

impl IntervalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalCategory::Rentou => "rentou",
            IntervalCategory::Week1 => "week1",
            IntervalCategory::Week2 => "week2",
            IntervalCategory::Week3 => "week3",
            IntervalCategory::Week4Plus => "week4plus",
        }
    }

    pub fn encoding(&self) -> f64 {
        match self {
            IntervalCategory::Rentou => 1.0,
            IntervalCategory::Week1 => 2.0,
            IntervalCategory::Week2 => 3.0,
            IntervalCategory::Week3 => 4.0,
            IntervalCategory::Week4Plus => 5.0,
        }
    }
}

pub fn interval_category(days: i64) -> IntervalCategory {
    if days <= 7 {
        IntervalCategory::Rentou
    } else if days <= 14 {
        IntervalCategory::Week1
    } else if days <= 21 {
        IntervalCategory::Week2
    } else if days <= 28 {
        IntervalCategory::Week3
    } else {
        IntervalCategory::Week4Plus
    }
}

/// Days between the last race (YYYYMMDD) and the current race date.
/// Falls back to 60 when either side is unparseable.
pub fn days_since_last(last_race_date: &str, current_year: &str, current_gappi: &str) -> i64 {
    let parse = || -> Option<i64> {
        if last_race_date.len() < 8 || current_gappi.len() < 4 {
            return None;
        }
        let last = NaiveDate::from_ymd_opt(
            last_race_date.get(0..4)?.parse().ok()?,
            last_race_date.get(4..6)?.parse().ok()?,
            last_race_date.get(6..8)?.parse().ok()?,
        )?;
        let curr = NaiveDate::from_ymd_opt(
            current_year.trim().parse().ok()?,
            current_gappi.get(0..2)?.parse().ok()?,
            current_gappi.get(2..4)?.parse().ok()?,
        )?;
        Some((curr - last).num_days().max(0))
    };
    parse().unwrap_or(60)
}

/// Compatibility of a running style with the predicted pace.
/// High pace favors closers, slow pace favors front runners.
pub fn style_pace_compatibility(running_style: u8, pace_type: u8) -> f64 {
    match (running_style, pace_type) {
        (1, 1) => 0.8,
        (1, 3) => 0.2,
        (2, 1) => 0.7,
        (2, 3) => 0.4,
        (3, 1) => 0.3,
        (3, 3) => 0.7,
        (4, 1) => 0.2,
        (4, 3) => 0.8,
        _ => 0.5,
    }
}

/// Stable hash bucket for breeding ids.
///
/// The bucket feeds the model as a categorical stand-in, so it must be
/// identical across training, inference and process restarts. MD5 of the id
/// taken as a 128-bit integer mod `modulo`.
pub fn stable_hash(s: &str, modulo: u64) -> u64 {
    let digest = Md5::digest(s.as_bytes());
    let value = u128::from_be_bytes(digest.into());
    (value % modulo as u128) as u64
}

/// Log-scale confidence for blending sparse aggregates with prior means:
/// reaches 1.0 at `threshold` samples.
pub fn log_confidence(runs: i64, threshold: i64) -> f64 {
    let runs = runs.max(0) as f64;
    let threshold = threshold.max(1) as f64;
    ((runs + 1.0).ln() / (threshold + 1.0).ln()).min(1.0)
}

/// Blend an observed rate toward a prior with the given confidence.
pub fn blend_with_prior(rate: f64, prior: f64, confidence: f64) -> f64 {
    rate * confidence + prior * (1.0 - confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_hash_is_deterministic_and_bounded() {
        let a = stable_hash("2017103459", 10000);
        let b = stable_hash("2017103459", 10000);
        assert_eq!(a, b);
        assert!(a < 10000);
        assert_ne!(stable_hash("2017103459", 10000), stable_hash("2017103460", 10000));
    }

    #[test]
    fn test_determine_style_bands() {
        assert_eq!(determine_style(1.5), 1);
        assert_eq!(determine_style(4.0), 2);
        assert_eq!(determine_style(8.0), 3);
        assert_eq!(determine_style(12.0), 4);
    }

    #[test]
    fn test_interval_category_bounds() {
        assert_eq!(interval_category(7), IntervalCategory::Rentou);
        assert_eq!(interval_category(8), IntervalCategory::Week1);
        assert_eq!(interval_category(21), IntervalCategory::Week2);
        assert_eq!(interval_category(28), IntervalCategory::Week3);
        assert_eq!(interval_category(29), IntervalCategory::Week4Plus);
    }

    #[test]
    fn test_days_since_last() {
        assert_eq!(days_since_last("20230101", "2023", "0131"), 30);
        // unparseable input falls back to the 60-day prior
        assert_eq!(days_since_last("", "2023", "0131"), 60);
    }

    #[test]
    fn test_log_confidence_saturates() {
        assert!(log_confidence(0, 50) < 0.2);
        assert!((log_confidence(50, 50) - 1.0).abs() < 1e-12);
        assert_eq!(log_confidence(500, 50), 1.0);
    }

    #[test]
    fn test_speed_index_range() {
        // 1:30.0 stored as 1300 -> exactly 90s -> index 100
        assert!((calc_speed_index(Some(1300.0)) - 100.0).abs() < 1e-9);
        // slower times score lower, clamped to [50, 120]
        assert!(calc_speed_index(Some(2000.0)) < calc_speed_index(Some(1300.0)));
        assert_eq!(calc_speed_index(None), 80.0);
    }
}
