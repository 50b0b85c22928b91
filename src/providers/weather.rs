//! Open-Meteo daily weather: archive for history, forecast for the horizon.

use crate::client::{HttpClient, ProviderError};
use crate::models::demand::{Coordinates, WeatherObservation};
use chrono::NaiveDate;
use log::debug;
use serde::Deserialize;

pub const ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
pub const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const FORECAST_DAYS: u32 = 16;

const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,precipitation_sum,wind_speed_10m_max";

#[derive(Debug, Deserialize)]
struct DailyResponse {
    daily: Option<DailySeries>,
}

/// Column-oriented payload; every value column may contain nulls.
#[derive(Debug, Deserialize)]
struct DailySeries {
    time: Vec<NaiveDate>,
    #[serde(default)]
    weather_code: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m_max: Vec<Option<f64>>,
}

impl DailySeries {
    fn into_observations(self) -> Vec<WeatherObservation> {
        let at = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();
        self.time
            .iter()
            .enumerate()
            .map(|(i, date)| WeatherObservation {
                date: *date,
                tmax: at(&self.temperature_2m_max, i),
                tmin: at(&self.temperature_2m_min, i),
                precipitation: at(&self.precipitation_sum, i),
                wind_speed: at(&self.wind_speed_10m_max, i),
                weather_code: at(&self.weather_code, i).map(|c| c.round() as i32),
            })
            .collect()
    }
}

pub struct WeatherProvider {
    client: HttpClient,
    archive_url: String,
    forecast_url: String,
}

impl WeatherProvider {
    pub fn new(client: HttpClient) -> Self {
        WeatherProvider {
            client,
            archive_url: ARCHIVE_URL.to_string(),
            forecast_url: FORECAST_URL.to_string(),
        }
    }

    pub fn history(
        &self,
        at: Coordinates,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>, ProviderError> {
        let query = [
            ("latitude", at.latitude.to_string()),
            ("longitude", at.longitude.to_string()),
            ("start_date", start.to_string()),
            ("end_date", end.to_string()),
            ("daily", DAILY_FIELDS.to_string()),
            ("timezone", "auto".to_string()),
        ];
        let res: DailyResponse = self.client.get_json(&self.archive_url, &query)?;
        let out = res.daily.map(DailySeries::into_observations).unwrap_or_default();
        debug!("Weather: {} archived day(s) for {}..{}", out.len(), start, end);
        Ok(out)
    }

    /// The next [`FORECAST_DAYS`] days starting today (location's timezone).
    pub fn forecast(&self, at: Coordinates) -> Result<Vec<WeatherObservation>, ProviderError> {
        let query = [
            ("latitude", at.latitude.to_string()),
            ("longitude", at.longitude.to_string()),
            ("daily", DAILY_FIELDS.to_string()),
            ("timezone", "auto".to_string()),
            ("forecast_days", FORECAST_DAYS.to_string()),
        ];
        let res: DailyResponse = self.client.get_json(&self.forecast_url, &query)?;
        let out = res.daily.map(DailySeries::into_observations).unwrap_or_default();
        debug!("Weather: {} forecast day(s)", out.len());
        Ok(out)
    }
}
