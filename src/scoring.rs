//! Weighted-impact scoring ("SIP").
//!
//! Two operations share the SIP name but not the formula and are kept apart:
//! - [`sip_historical`] labels past/synthetic days from calendar flags and weather.
//! - [`sip_forecast`] scores horizon days from extracted local events.
//!
//! Everything here is pure; the historical mode takes its randomness from the caller.

use crate::models::demand::{
    EventCategory, ImpactEvent, ImpactMoment, RestaurantConfig, ScoredEvent, UrbanContext, VenueType,
};
use chrono::Weekday;
use rand::Rng;

/// Forecast-mode day base.
pub const FORECAST_DAY_BASE: [(Weekday, f64); 7] = [
    (Weekday::Mon, 0.1),
    (Weekday::Tue, 0.1),
    (Weekday::Wed, 0.2),
    (Weekday::Thu, 0.3),
    (Weekday::Fri, 0.4),
    (Weekday::Sat, 0.5),
    (Weekday::Sun, 0.2),
];

/// Historical-mode day base. Same values as the forecast table today, kept separate
/// so either can be retuned without touching the other.
pub const HISTORICAL_DAY_BASE: [(Weekday, f64); 7] = [
    (Weekday::Mon, 0.1),
    (Weekday::Tue, 0.1),
    (Weekday::Wed, 0.2),
    (Weekday::Thu, 0.3),
    (Weekday::Fri, 0.4),
    (Weekday::Sat, 0.5),
    (Weekday::Sun, 0.2),
];

const FALLBACK_DAY_BASE: f64 = 0.1;
const FALLBACK_CATEGORY_IMPACT: f64 = 0.10;

const HOLIDAY_BONUS: f64 = 0.6;
const VACATION_BONUS: f64 = 0.2;
const LOCAL_EVENT_BONUS: f64 = 0.15;
const LOCAL_EVENT_PROBABILITY: f64 = 0.10;
const POOR_WEATHER_THRESHOLD: f64 = 0.8;
const POOR_WEATHER_DAMPING: f64 = 0.7;

const RAIN_SNOW_STORM_CODES: [i32; 15] = [51, 53, 55, 61, 63, 65, 71, 73, 75, 80, 81, 82, 95, 96, 99];
const FOG_CODES: [i32; 2] = [45, 48];
const CLEAR_CODES: [i32; 4] = [0, 1, 2, 3];

fn lookup(table: &[(Weekday, f64); 7], weekday: Weekday) -> f64 {
    table
        .iter()
        .find(|(day, _)| *day == weekday)
        .map(|(_, score)| *score)
        .unwrap_or(FALLBACK_DAY_BASE)
}

pub fn day_base_score(weekday: Weekday) -> f64 {
    lookup(&FORECAST_DAY_BASE, weekday)
}

pub fn historical_day_base(weekday: Weekday) -> f64 {
    lookup(&HISTORICAL_DAY_BASE, weekday)
}

/// Base impact ratio of an event category. The restaurant type is part of the
/// signature but does not change the table yet.
pub fn category_base_impact(
    category: EventCategory,
    moment: ImpactMoment,
    urban_context: UrbanContext,
    _restaurant_type: &str,
) -> f64 {
    match (category, moment, urban_context) {
        (EventCategory::Concert, ImpactMoment::EveningPre, UrbanContext::Dense) => 0.35,
        (EventCategory::Concert, ImpactMoment::EveningPre, UrbanContext::Medium) => 0.25,
        (EventCategory::Sport, _, _) => 0.20,
        (EventCategory::Culture, _, _) => 0.15,
        (EventCategory::Fete | EventCategory::Special, _, _) => 0.60,
        (EventCategory::Business, ImpactMoment::Midday, _) => 0.10,
        (EventCategory::Business, ImpactMoment::EveningPre, _) => 0.05,
        (EventCategory::Concert | EventCategory::Family | EventCategory::Other, _, _) => FALLBACK_CATEGORY_IMPACT,
    }
}

/// Near-field tiers then exponential far-field decay.
///
/// Tiers: `(limit_m, multiplier)` ×3, then `far_multiplier · exp(-(d - last_limit) / scale)`.
pub fn distance_decay(base_impact: f64, distance_meters: f64, urban_context: UrbanContext) -> f64 {
    let d = if distance_meters.is_finite() {
        distance_meters.max(0.0)
    } else {
        f64::MAX
    };
    let (tiers, far_multiplier, scale) = match urban_context {
        UrbanContext::Dense => ([(100.0, 1.5), (300.0, 1.0), (700.0, 0.4)], 0.1, 300.0),
        UrbanContext::Medium => ([(200.0, 1.3), (500.0, 1.0), (1000.0, 0.5)], 0.15, 400.0),
        UrbanContext::Periurban => ([(300.0, 1.2), (800.0, 1.0), (2000.0, 0.6)], 0.2, 800.0),
    };
    for (limit, multiplier) in tiers {
        if d < limit {
            return base_impact * multiplier;
        }
    }
    let last_limit = tiers[tiers.len() - 1].0;
    base_impact * far_multiplier * (-(d - last_limit) / scale).exp()
}

pub fn weather_event_modifier(weather_code: i32, venue_type: VenueType) -> f64 {
    match venue_type {
        VenueType::Indoor => 1.0,
        VenueType::Outdoor => {
            if RAIN_SNOW_STORM_CODES.contains(&weather_code) {
                0.4
            } else if FOG_CODES.contains(&weather_code) {
                0.7
            } else if CLEAR_CODES.contains(&weather_code) {
                1.2
            } else {
                1.0
            }
        }
    }
}

/// Special days the extractor tends to file under other categories.
fn effective_category(event: &ImpactEvent) -> EventCategory {
    let name = event.name.as_str();
    if name.contains("Valentin") || name.contains("Mother's Day") || name.contains("Fête des Mères") {
        EventCategory::Special
    } else {
        event.category
    }
}

/// Forward-looking SIP of one horizon day.
#[derive(Debug, Clone, PartialEq)]
pub struct SipForecast {
    pub day_base: f64,
    pub total: f64,
    pub events: Vec<ScoredEvent>,
}

pub fn sip_forecast(
    weekday: Weekday,
    weather_code: i32,
    events: &[ImpactEvent],
    config: &RestaurantConfig,
) -> SipForecast {
    let day_base = day_base_score(weekday);
    let mut total = day_base;
    let mut scored = Vec::with_capacity(events.len());
    for event in events {
        let category = effective_category(event);
        let base = category_base_impact(
            category,
            ImpactMoment::EveningPre,
            config.urban_context,
            &config.restaurant_type,
        );
        let decayed = distance_decay(base, event.distance_meters, config.urban_context);
        let impact = decayed * weather_event_modifier(weather_code, event.venue_type);
        total += impact;
        let mut event = event.clone();
        event.category = category;
        scored.push(ScoredEvent { event, impact });
    }
    SipForecast {
        day_base,
        total,
        events: scored,
    }
}

/// Historical SIP of one day, split into its components.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SipHistorical {
    pub base: f64,
    pub event: f64,
    pub total: f64,
}

/// Deterministic core of [`sip_historical`]; `local_event` is the random draw.
pub fn sip_historical_with(
    weekday: Weekday,
    is_holiday: bool,
    is_school_vacation: bool,
    weather_score: f64,
    local_event: bool,
) -> SipHistorical {
    let base = historical_day_base(weekday);
    let mut event = 0.0;
    if is_holiday {
        event += HOLIDAY_BONUS;
    }
    if is_school_vacation {
        event += VACATION_BONUS;
    }
    if local_event {
        event += LOCAL_EVENT_BONUS;
    }
    if weather_score < POOR_WEATHER_THRESHOLD {
        event *= POOR_WEATHER_DAMPING;
    }
    SipHistorical {
        base,
        event,
        total: base + event,
    }
}

pub fn sip_historical<R: Rng>(
    weekday: Weekday,
    is_holiday: bool,
    is_school_vacation: bool,
    weather_score: f64,
    rng: &mut R,
) -> SipHistorical {
    let local_event = rng.random_bool(LOCAL_EVENT_PROBABILITY);
    sip_historical_with(weekday, is_holiday, is_school_vacation, weather_score, local_event)
}

/// Weather score for rows that did not keep the generator's own score (store reads).
pub fn reconstructed_weather_score(tmax: Option<f64>, precipitation: Option<f64>, wind_speed: Option<f64>) -> f64 {
    let tmax = tmax.unwrap_or(20.0);
    let precipitation = precipitation.unwrap_or(0.0);
    let wind_speed = wind_speed.unwrap_or(10.0);

    let temp_mod = (1.0 - (tmax - 22.0).abs() / 30.0).clamp(0.5, 1.2);
    let rain_mod = 1.0 - precipitation.clamp(0.0, 20.0) / 40.0;
    let wind_mod = 1.0 - wind_speed.clamp(0.0, 60.0) / 100.0;
    (temp_mod + rain_mod + wind_mod) / 3.0
}
