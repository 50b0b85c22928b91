//! Forecast-horizon signals: forecast weather, calendar flags and LLM-extracted
//! events per day, scored with the forward-looking SIP.

use crate::client::HttpClient;
use crate::models::demand::{
    Coordinates, HorizonDay, ImpactEvent, RestaurantConfig, RestaurantProfile, WeatherObservation, weekday_name,
};
use crate::providers::events::{DayContext, EventExtractor};
use crate::providers::geocoding::Geocoder;
use crate::providers::vacations::VacationPeriod;
use crate::scoring;
use crate::services::calendar::CalendarSources;
use chrono::{Datelike, NaiveDate};
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Forecast defaults for days the weather forecast does not cover.
const DEFAULT_FORECAST_TMAX: f64 = 15.0;
const DEFAULT_WEATHER_CODE: i32 = 0;

/// Where the orchestrator gets location and horizon features from.
pub trait SignalProvider {
    /// Never fails; falls back to a configured coordinate.
    fn locate(&self, profile: &RestaurantProfile) -> Coordinates;

    /// One entry per day of `[start, end]`, empty only if nothing at all could be built.
    fn horizon(&self, start: NaiveDate, end: NaiveDate, config: &RestaurantConfig) -> Vec<HorizonDay>;
}

#[derive(Debug, Default, Clone)]
pub struct HorizonInputs {
    pub weather: BTreeMap<NaiveDate, WeatherObservation>,
    pub holidays: BTreeMap<NaiveDate, String>,
    pub vacations: Vec<VacationPeriod>,
    pub events: BTreeMap<NaiveDate, Vec<ImpactEvent>>,
}

impl HorizonInputs {
    fn weather_on(&self, date: NaiveDate) -> (i32, f64, f64) {
        let w = self.weather.get(&date);
        (
            w.and_then(|w| w.weather_code).unwrap_or(DEFAULT_WEATHER_CODE),
            w.and_then(|w| w.tmax).unwrap_or(DEFAULT_FORECAST_TMAX),
            w.and_then(|w| w.precipitation).unwrap_or(0.0),
        )
    }

    pub fn day_contexts(&self, start: NaiveDate, end: NaiveDate) -> Vec<DayContext> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|date| {
                let (weather_code, tmax, _) = self.weather_on(date);
                DayContext {
                    date,
                    weather_code,
                    tmax,
                }
            })
            .collect()
    }
}

pub fn score_horizon(
    start: NaiveDate,
    end: NaiveDate,
    inputs: &HorizonInputs,
    config: &RestaurantConfig,
) -> Vec<HorizonDay> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| {
            let (weather_code, tmax, precipitation) = inputs.weather_on(date);
            let events = inputs.events.get(&date).map(Vec::as_slice).unwrap_or_default();
            let sip = scoring::sip_forecast(date.weekday(), weather_code, events, config);
            HorizonDay {
                date,
                day_of_week: weekday_name(date.weekday()).to_string(),
                weather_code,
                tmax,
                precipitation,
                is_holiday: inputs.holidays.contains_key(&date),
                is_school_vacation: inputs.vacations.iter().any(|p| p.contains(date)),
                sip: sip.total,
                events: sip.events,
            }
        })
        .collect()
}

/// Live providers behind [`SignalProvider`].
pub struct LiveSignals {
    calendar: CalendarSources,
    geocoder: Geocoder,
    events: EventExtractor,
    fallback: Coordinates,
}

impl LiveSignals {
    pub fn new(client: &HttpClient, calendar: CalendarSources, events: EventExtractor, fallback: Coordinates) -> Self {
        LiveSignals {
            calendar,
            geocoder: Geocoder::new(client.clone()),
            events,
            fallback,
        }
    }

    pub fn calendar(&self) -> &CalendarSources {
        &self.calendar
    }

    pub fn fallback(&self) -> Coordinates {
        self.fallback
    }

    /// Geocode free text, falling back to the configured coordinate.
    pub fn locate_address(&self, address: &str) -> Coordinates {
        match self.geocoder.locate(address) {
            Ok(Some(c)) => c,
            Ok(None) => {
                warn!("Geocoding: no match for '{}'; using fallback location", address);
                self.fallback
            }
            Err(e) => {
                warn!("Geocoding: lookup failed for '{}' ({}); using fallback location", address, e);
                self.fallback
            }
        }
    }
}

impl SignalProvider for LiveSignals {
    fn locate(&self, profile: &RestaurantProfile) -> Coordinates {
        self.locate_address(&profile.full_address())
    }

    fn horizon(&self, start: NaiveDate, end: NaiveDate, config: &RestaurantConfig) -> Vec<HorizonDay> {
        let mut inputs = HorizonInputs {
            holidays: self.calendar.holidays_or_empty(start, end),
            vacations: self.calendar.vacations_or_empty(&config.academy, start, end),
            ..Default::default()
        };
        match self.calendar.weather.forecast(config.coordinates) {
            Ok(days) => inputs.weather = days.into_iter().map(|w| (w.date, w)).collect(),
            Err(e) => warn!("Horizon: weather forecast unavailable ({}); using defaults", e),
        }

        if self.events.is_enabled() {
            let contexts = inputs.day_contexts(start, end);
            match self.events.upcoming_events(config, &contexts) {
                Ok(events) => inputs.events = events,
                Err(e) => warn!("Horizon: event extraction failed ({}); weather-only horizon", e),
            }
        } else {
            info!("Horizon: event extraction disabled; weather-only horizon");
        }

        let days = score_horizon(start, end, &inputs, config);
        debug!(
            "Horizon: {} day(s), {} scored event(s)",
            days.len(),
            days.iter().map(|d| d.events.len()).sum::<usize>()
        );
        days
    }
}
