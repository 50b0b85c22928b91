//! Feature fusion: the trailing history window plus the forecast horizon as one
//! contiguous, time-indexed series for the quantile model.

use crate::models::demand::{DemandRecord, HorizonDay};
use chrono::NaiveDate;

/// Trailing history rows kept as model context.
pub const HISTORY_CONTEXT: usize = 400;
/// Days predicted after the last known date.
pub const HORIZON_DAYS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub time_idx: i64,
    pub date: NaiveDate,
    pub restaurant_id: String,
    pub day_of_week: String,
    pub is_holiday: bool,
    pub is_school_vacation: bool,
    pub tmax: f64,
    pub prcp: f64,
    pub sip: f64,
    /// Target; `None` on rows to predict.
    pub affluence: Option<f64>,
}

impl FeatureRow {
    pub fn from_record(record: &DemandRecord) -> Self {
        FeatureRow {
            time_idx: 0,
            date: record.date,
            restaurant_id: record.restaurant_id.to_string(),
            day_of_week: record.day_of_week.clone(),
            is_holiday: record.is_holiday,
            is_school_vacation: record.is_school_vacation,
            tmax: finite_or_zero(record.tmax),
            prcp: finite_or_zero(record.precipitation),
            sip: finite_or_zero(Some(record.sip)),
            affluence: Some(record.affluence as f64),
        }
    }

    fn from_horizon(day: &HorizonDay, restaurant_id: &str, with_signal: bool) -> Self {
        FeatureRow {
            time_idx: 0,
            date: day.date,
            restaurant_id: restaurant_id.to_string(),
            day_of_week: day.day_of_week.clone(),
            is_holiday: day.is_holiday,
            is_school_vacation: day.is_school_vacation,
            tmax: finite_or_zero(Some(day.tmax)),
            prcp: finite_or_zero(Some(day.precipitation)),
            sip: if with_signal { finite_or_zero(Some(day.sip)) } else { 0.0 },
            affluence: None,
        }
    }
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Training series index: whole days since the earliest date.
pub fn assign_day_offsets(rows: &mut [FeatureRow]) {
    let Some(origin) = rows.iter().map(|r| r.date).min() else {
        return;
    };
    for row in rows.iter_mut() {
        row.time_idx = (row.date - origin).num_days();
    }
}

pub fn fuse(history: &[FeatureRow], horizon: &[HorizonDay], restaurant_id: &str) -> Vec<FeatureRow> {
    fuse_with(history, horizon, restaurant_id, true)
}

/// Same series with the horizon's event signal zeroed.
pub fn fuse_without_signal(history: &[FeatureRow], horizon: &[HorizonDay], restaurant_id: &str) -> Vec<FeatureRow> {
    fuse_with(history, horizon, restaurant_id, false)
}

fn fuse_with(history: &[FeatureRow], horizon: &[HorizonDay], restaurant_id: &str, with_signal: bool) -> Vec<FeatureRow> {
    let tail = &history[history.len().saturating_sub(HISTORY_CONTEXT)..];
    let mut rows: Vec<FeatureRow> = tail
        .iter()
        .cloned()
        .chain(horizon.iter().map(|d| FeatureRow::from_horizon(d, restaurant_id, with_signal)))
        .collect();
    rows.sort_by(|a, b| a.restaurant_id.cmp(&b.restaurant_id).then(a.date.cmp(&b.date)));
    for (i, row) in rows.iter_mut().enumerate() {
        row.time_idx = i as i64;
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn history(start: NaiveDate, n: usize) -> Vec<FeatureRow> {
        let mut rows: Vec<_> = (0..n)
            .map(|i| FeatureRow {
                time_idx: 0,
                date: start + Duration::days(i as i64),
                restaurant_id: "1".into(),
                day_of_week: "monday".into(),
                is_holiday: false,
                is_school_vacation: false,
                tmax: 18.0,
                prcp: 0.0,
                sip: 0.2,
                affluence: Some(40.0),
            })
            .collect();
        assign_day_offsets(&mut rows);
        rows
    }

    fn horizon(start: NaiveDate, n: usize) -> Vec<HorizonDay> {
        (0..n)
            .map(|i| HorizonDay {
                date: start + Duration::days(i as i64),
                day_of_week: "friday".into(),
                weather_code: 61,
                tmax: f64::NAN,
                precipitation: 3.0,
                is_holiday: false,
                is_school_vacation: true,
                sip: 0.9,
                events: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn offsets_count_days_from_the_earliest_date() {
        let mut rows = history(date(2024, 1, 1), 3);
        rows.swap(0, 2);
        assign_day_offsets(&mut rows);
        assert_eq!(rows.iter().map(|r| r.time_idx).collect::<Vec<_>>(), vec![2, 1, 0]);
    }

    #[test]
    fn fused_series_keeps_tail_and_reindexes_densely() {
        let hist = history(date(2023, 1, 1), 500);
        let last = hist.last().unwrap().date;
        let fused = fuse(&hist, &horizon(last + Duration::days(1), HORIZON_DAYS), "1");

        assert_eq!(fused.len(), HISTORY_CONTEXT + HORIZON_DAYS);
        assert_eq!(fused[0].date, hist[100].date);
        assert!(fused.iter().enumerate().all(|(i, r)| r.time_idx == i as i64));
        assert!(fused.windows(2).all(|w| w[0].date < w[1].date));

        let tail = &fused[HISTORY_CONTEXT..];
        assert!(tail.iter().all(|r| r.affluence.is_none()));
        assert!(tail.iter().all(|r| r.sip == 0.9 && r.tmax == 0.0 && r.prcp == 3.0));
    }

    #[test]
    fn signal_off_zeroes_only_horizon_sip() {
        let hist = history(date(2024, 1, 1), 20);
        let fused = fuse_without_signal(&hist, &horizon(date(2024, 1, 21), 5), "1");
        assert!(fused[..20].iter().all(|r| r.sip == 0.2));
        assert!(fused[20..].iter().all(|r| r.sip == 0.0));
    }

    #[test]
    fn records_sanitize_missing_weather() {
        let record = DemandRecord {
            date: date(2024, 6, 1),
            restaurant_id: 9,
            day_of_week: "saturday".into(),
            is_weekend: true,
            is_holiday: false,
            holiday_name: None,
            is_school_vacation: false,
            vacation_name: None,
            weather_code: None,
            tmax: None,
            tmin: None,
            precipitation: Some(f64::INFINITY),
            wind_speed: None,
            sip: 0.5,
            affluence: 61,
            occupancy_rate: 76.3,
            is_full: false,
        };
        let row = FeatureRow::from_record(&record);
        assert_eq!(row.restaurant_id, "9");
        assert_eq!(row.tmax, 0.0);
        assert_eq!(row.prcp, 0.0);
        assert_eq!(row.affluence, Some(61.0));
    }
}
