//! Domain types shared by scoring, generation, fusion and the orchestrator.
//!
//! Notes
//! - Dates are calendar days (`NaiveDate`); the restaurant's local day is the unit.
//! - Closed enums replace string-keyed tables; labels from the original French
//!   services are accepted as serde aliases.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

// =====================
// Calendar & weather
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub is_holiday: bool,
    pub holiday_name: Option<String>,
    pub is_school_vacation: bool,
    pub vacation_name: Option<String>,
}

impl CalendarDay {
    pub fn plain(date: NaiveDate) -> Self {
        CalendarDay {
            date,
            is_holiday: false,
            holiday_name: None,
            is_school_vacation: false,
            vacation_name: None,
        }
    }

    pub fn weekday(&self) -> Weekday {
        self.date.weekday()
    }

    pub fn is_weekend(&self) -> bool {
        is_weekend(self.date.weekday())
    }

    pub fn day_of_week(&self) -> &'static str {
        weekday_name(self.date.weekday())
    }
}

/// Daily weather, every measurement optional since providers leave gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub date: NaiveDate,
    /// Max temperature (°C)
    pub tmax: Option<f64>,
    /// Min temperature (°C)
    pub tmin: Option<f64>,
    /// Precipitation sum (mm)
    pub precipitation: Option<f64>,
    /// Max wind speed (km/h)
    pub wind_speed: Option<f64>,
    /// WMO weather interpretation code
    pub weather_code: Option<i32>,
}

impl WeatherObservation {
    pub fn empty(date: NaiveDate) -> Self {
        WeatherObservation {
            date,
            ..Default::default()
        }
    }
}

/// One day of the input series fed to the synthetic generator.
#[derive(Debug, Clone, PartialEq)]
pub struct DayConditions {
    pub calendar: CalendarDay,
    pub weather: WeatherObservation,
}

impl DayConditions {
    pub fn date(&self) -> NaiveDate {
        self.calendar.date
    }
}

pub fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// Lowercase English weekday name, the `day_of_week` value used everywhere downstream.
pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

// =====================
// Events & context enums
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Sport,
    Concert,
    Business,
    #[serde(alias = "FAMILLE")]
    Family,
    Culture,
    Fete,
    Special,
    #[serde(alias = "AUTRE", other)]
    Other,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueType {
    #[serde(alias = "EXTERIEUR", alias = "EXTÉRIEUR")]
    Outdoor,
    #[default]
    #[serde(alias = "INTERIEUR", alias = "INTÉRIEUR", other)]
    Indoor,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrbanContext {
    Dense,
    #[default]
    #[serde(alias = "MOYEN")]
    Medium,
    #[serde(alias = "PERIURBAIN", alias = "RURAL")]
    Periurban,
}

impl UrbanContext {
    /// Lenient parse for values stored as free text.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DENSE" => Some(UrbanContext::Dense),
            "MEDIUM" | "MOYEN" => Some(UrbanContext::Medium),
            "PERIURBAN" | "PERIURBAIN" | "RURAL" => Some(UrbanContext::Periurban),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UrbanContext::Dense => "DENSE",
            UrbanContext::Medium => "MEDIUM",
            UrbanContext::Periurban => "PERIURBAN",
        }
    }
}

/// When, relative to service, an event pulls customers in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactMoment {
    Midday,
    EveningPre,
}

/// A local event as extracted by the LLM collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactEvent {
    pub name: String,
    pub category: EventCategory,
    pub venue_type: VenueType,
    pub distance_meters: f64,
    pub start_time: Option<String>,
    pub expected_attendance: Option<u32>,
}

/// An event with its contribution to the day's forecast SIP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEvent {
    #[serde(flatten)]
    pub event: ImpactEvent,
    pub impact: f64,
}

// =====================
// Restaurants
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

pub const DEFAULT_RESTAURANT_TYPE: &str = "BRASSERIE";
pub const DEFAULT_ACADEMY: &str = "Dijon";

/// Restaurant row as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RestaurantProfile {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub address: String,
    pub zip_code: String,
    pub restaurant_type: Option<String>,
    pub urban_context: Option<String>,
    pub academy: Option<String>,
}

impl RestaurantProfile {
    pub fn full_address(&self) -> String {
        format!(
            "{}, {} {}",
            self.address,
            self.zip_code,
            self.city.as_deref().unwrap_or_default()
        )
        .trim_end()
        .to_string()
    }
}

/// Profile with defaults applied and coordinates resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RestaurantConfig {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub full_address: String,
    pub restaurant_type: String,
    pub urban_context: UrbanContext,
    pub academy: String,
    pub coordinates: Coordinates,
}

impl RestaurantConfig {
    pub fn from_profile(profile: &RestaurantProfile, coordinates: Coordinates) -> Self {
        let urban_context = profile
            .urban_context
            .as_deref()
            .and_then(UrbanContext::parse)
            .unwrap_or_default();
        RestaurantConfig {
            id: profile.id,
            name: profile.name.clone(),
            city: profile.city.clone(),
            full_address: profile.full_address(),
            restaurant_type: profile
                .restaurant_type
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_RESTAURANT_TYPE.to_string()),
            urban_context,
            academy: profile
                .academy
                .clone()
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ACADEMY.to_string()),
            coordinates,
        }
    }
}

// =====================
// Demand series
// =====================

/// One labeled day of restaurant demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRecord {
    pub date: NaiveDate,
    pub restaurant_id: i64,
    pub day_of_week: String,
    pub is_weekend: bool,
    pub is_holiday: bool,
    pub holiday_name: Option<String>,
    pub is_school_vacation: bool,
    pub vacation_name: Option<String>,
    pub weather_code: Option<i32>,
    pub tmax: Option<f64>,
    pub tmin: Option<f64>,
    pub precipitation: Option<f64>,
    pub wind_speed: Option<f64>,
    pub sip: f64,
    pub affluence: u32,
    pub occupancy_rate: f64,
    pub is_full: bool,
}

impl DemandRecord {
    pub fn weekday(&self) -> Weekday {
        self.date.weekday()
    }
}

pub fn occupancy_rate(affluence: u32, max_covers: u32) -> f64 {
    if max_covers == 0 {
        return 0.0;
    }
    round_to(affluence as f64 / max_covers as f64 * 100.0, 1)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// =====================
// Forecast output
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceScore {
    High,
    Medium,
    Low,
}

impl ConfidenceScore {
    pub fn from_relative_uncertainty(relative_uncertainty: f64) -> Self {
        if relative_uncertainty < 0.30 {
            ConfidenceScore::High
        } else if relative_uncertainty < 0.60 {
            ConfidenceScore::Medium
        } else {
            ConfidenceScore::Low
        }
    }
}

/// Feature-horizon day as produced by the signal provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonDay {
    pub date: NaiveDate,
    pub day_of_week: String,
    pub weather_code: i32,
    pub tmax: f64,
    pub precipitation: f64,
    pub is_holiday: bool,
    pub is_school_vacation: bool,
    pub sip: f64,
    pub events: Vec<ScoredEvent>,
}

/// Compiled per-day result of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub day_of_week: String,
    pub tmax: f64,
    pub sip: f64,
    pub events: Vec<ScoredEvent>,
    pub predicted_affluence: f64,
    pub conf_low: f64,
    pub conf_high: f64,
    pub predicted_affluence_no_signal: f64,
    pub conf_low_no_signal: f64,
    pub conf_high_no_signal: f64,
    pub uncertainty_range: f64,
    pub relative_uncertainty: f64,
    pub confidence_score: ConfidenceScore,
}
