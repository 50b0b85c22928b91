//! School vacation periods from the French education ministry open-data portal.
//!
//! Periods are published as timestamps; a period starting at 22:00 or 23:00 UTC
//! is the evening before the first day off, so such a start rolls to the next day.
//! The end is inclusive on its calendar date.

use crate::client::{HttpClient, ProviderError};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, warn};
use serde::Deserialize;

pub const EDUCATION_CALENDAR_URL: &str =
    "https://data.education.gouv.fr/api/explore/v2.1/catalog/datasets/fr-en-calendrier-scolaire/records";
const PAGE_LIMIT: u32 = 100;
const DEFAULT_DESCRIPTION: &str = "Vacances";

#[derive(Debug, Deserialize)]
struct RecordsPage {
    #[serde(default)]
    results: Vec<VacationRecord>,
}

#[derive(Debug, Deserialize)]
struct VacationRecord {
    description: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacationPeriod {
    pub description: String,
    /// First day off.
    pub first_day: NaiveDate,
    /// Last day off (inclusive).
    pub last_day: NaiveDate,
}

impl VacationPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.first_day && date <= self.last_day
    }
}

pub struct VacationProvider {
    client: HttpClient,
    url: String,
}

impl VacationProvider {
    pub fn new(client: HttpClient) -> Self {
        VacationProvider {
            client,
            url: EDUCATION_CALENDAR_URL.to_string(),
        }
    }

    /// Periods of `academy` overlapping `[start, end]`, ordered by start.
    pub fn periods(&self, academy: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<VacationPeriod>, ProviderError> {
        let filter = format!(
            "location=\"{}\" AND end_date >= \"{}\" AND start_date <= \"{}\"",
            academy.replace('"', ""),
            start,
            end
        );
        let query = [
            ("where", filter),
            ("limit", PAGE_LIMIT.to_string()),
            ("order_by", "start_date".to_string()),
        ];
        let page: RecordsPage = self.client.get_json(&self.url, &query)?;
        let periods = periods_from_records(page.results);
        debug!("Vacations: {} period(s) for academy {}", periods.len(), academy);
        Ok(periods)
    }
}

fn periods_from_records(records: Vec<VacationRecord>) -> Vec<VacationPeriod> {
    records
        .into_iter()
        .filter_map(|r| {
            let (start, end) = (r.start_date?, r.end_date?);
            let (Some(start_at), Some(end_at)) = (parse_timestamp(&start), parse_timestamp(&end)) else {
                warn!("Vacations: skipping record with unreadable dates ({start} .. {end})");
                return None;
            };
            Some(VacationPeriod {
                description: r.description.unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
                first_day: first_day_off(start_at),
                last_day: end_at.date(),
            })
        })
        .collect()
}

pub fn first_day_off(start: NaiveDateTime) -> NaiveDate {
    if start.time() == NaiveTime::MIN {
        start.date()
    } else {
        start.date().checked_add_days(Days::new(1)).unwrap_or(start.date())
    }
}

/// Wall-clock time as published, offset dropped.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}
