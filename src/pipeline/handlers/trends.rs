use chrono::NaiveDate;

use super::types::TrendSummary;
use crate::models::enums::TrendDirection;

/// Relative change below which a series counts as stable.
const STABLE_BAND_PERCENT: f64 = 5.0;

/// Direction of a dated series, first reading against last.
pub fn trend_direction(points: &[(NaiveDate, Option<f64>)]) -> TrendDirection {
    summarize_trend("", None, points).direction
}

/// Orders the points by date and compares the first and last numeric values.
pub fn summarize_trend(
    subject: &str,
    unit: Option<&str>,
    points: &[(NaiveDate, Option<f64>)],
) -> TrendSummary {
    let mut numeric: Vec<(NaiveDate, f64)> = points
        .iter()
        .filter_map(|(date, value)| value.map(|v| (*date, v)))
        .collect();
    numeric.sort_by_key(|(date, _)| *date);

    let mut summary = TrendSummary {
        subject: subject.to_string(),
        direction: TrendDirection::NonNumeric,
        first_value: numeric.first().map(|(_, v)| *v),
        last_value: numeric.last().map(|(_, v)| *v),
        change_percent: None,
        data_points: points.len(),
        unit: unit.map(str::to_string),
    };

    match (summary.first_value, summary.last_value) {
        (Some(first), Some(last)) if numeric.len() >= 2 => {
            let change = if first.abs() > f64::EPSILON {
                (last - first) / first.abs() * 100.0
            } else if (last - first).abs() > f64::EPSILON {
                100.0 * (last - first).signum()
            } else {
                0.0
            };
            summary.change_percent = Some((change * 10.0).round() / 10.0);
            summary.direction = if change.abs() < STABLE_BAND_PERCENT {
                TrendDirection::Stable
            } else if change > 0.0 {
                TrendDirection::Increasing
            } else {
                TrendDirection::Decreasing
            };
        }
        (Some(_), Some(_)) => summary.direction = TrendDirection::Stable,
        _ => {}
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn increasing_series() {
        let points = [(day(1), Some(100.0)), (day(10), Some(110.0)), (day(20), Some(125.0))];
        let summary = summarize_trend("glucose", Some("mg/dL"), &points);
        assert_eq!(summary.direction, TrendDirection::Increasing);
        assert_eq!(summary.change_percent, Some(25.0));
        assert_eq!(summary.data_points, 3);
    }

    #[test]
    fn unordered_points_are_sorted() {
        let points = [(day(20), Some(80.0)), (day(1), Some(100.0))];
        assert_eq!(trend_direction(&points), TrendDirection::Decreasing);
    }

    #[test]
    fn small_changes_are_stable() {
        let points = [(day(1), Some(100.0)), (day(2), Some(102.0))];
        assert_eq!(trend_direction(&points), TrendDirection::Stable);
    }

    #[test]
    fn single_point_is_stable() {
        assert_eq!(trend_direction(&[(day(1), Some(5.0))]), TrendDirection::Stable);
    }

    #[test]
    fn text_only_series_is_non_numeric() {
        let points = [(day(1), None), (day(2), None)];
        let summary = summarize_trend("culture", None, &points);
        assert_eq!(summary.direction, TrendDirection::NonNumeric);
        assert_eq!(summary.first_value, None);
    }

    #[test]
    fn zero_baseline() {
        let points = [(day(1), Some(0.0)), (day(2), Some(3.0))];
        assert_eq!(trend_direction(&points), TrendDirection::Increasing);
    }
}
