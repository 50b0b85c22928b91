//! Public holidays from Nager.Date (`/api/v3/PublicHolidays/{year}/{country}`).

use crate::client::{HttpClient, ProviderError};
use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const NAGER_BASE_URL: &str = "https://date.nager.at";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicHoliday {
    pub date: NaiveDate,
    pub local_name: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub struct HolidayProvider {
    client: HttpClient,
    base_url: String,
    country: String,
}

impl HolidayProvider {
    pub fn new(client: HttpClient, country: &str) -> Self {
        HolidayProvider {
            client,
            base_url: NAGER_BASE_URL.to_string(),
            country: country.to_ascii_uppercase(),
        }
    }

    pub fn for_year(&self, year: i32) -> Result<Vec<PublicHoliday>, ProviderError> {
        let url = format!("{}/api/v3/PublicHolidays/{}/{}", self.base_url, year, self.country);
        let holidays: Vec<PublicHoliday> = self.client.get_json(&url, &[])?;
        debug!("Holidays: {} entries for {} {}", holidays.len(), self.country, year);
        Ok(holidays)
    }

    /// Holiday names keyed by date for every year the inclusive range touches.
    /// A year that fails to load is skipped; the error surfaces only when no year loaded.
    pub fn in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<BTreeMap<NaiveDate, String>, ProviderError> {
        collect_years(start, end, |year| self.for_year(year))
    }
}

fn collect_years<F>(start: NaiveDate, end: NaiveDate, mut fetch: F) -> Result<BTreeMap<NaiveDate, String>, ProviderError>
where
    F: FnMut(i32) -> Result<Vec<PublicHoliday>, ProviderError>,
{
    let mut out = BTreeMap::new();
    let mut loaded = 0usize;
    let mut last_error = None;
    for year in start.year()..=end.year() {
        match fetch(year) {
            Ok(holidays) => {
                loaded += 1;
                out.extend(holidays_in_range(holidays, start, end));
            }
            Err(e) => {
                warn!("Holidays: {} unavailable ({}); skipping that year", year, e);
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) if loaded == 0 => Err(e),
        _ => Ok(out),
    }
}

pub fn holidays_in_range(
    holidays: Vec<PublicHoliday>,
    start: NaiveDate,
    end: NaiveDate,
) -> impl Iterator<Item = (NaiveDate, String)> {
    holidays
        .into_iter()
        .filter(move |h| h.date >= start && h.date <= end)
        .map(|h| (h.date, h.local_name))
}
