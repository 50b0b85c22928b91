//! Synthetic ground-truth demand, used to bootstrap a restaurant's history.
//!
//! Every modifier is a small pure function so each factor can be checked on its own;
//! randomness only enters through the injected RNG.

use crate::models::demand::{DayConditions, DemandRecord, is_weekend, occupancy_rate, weekday_name};
use crate::scoring;
use chrono::{Datelike, NaiveDate, Weekday};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

pub const DEFAULT_MAX_COVERS: u32 = 80;
pub const DEFAULT_BASE_OCCUPANCY: f64 = 0.6;
pub const DEFAULT_WEATHER_WEIGHT: f64 = 0.3;

const NOISE_STD_DEV: f64 = 0.15;
const DEFAULT_TMAX: f64 = 20.0;
const DEFAULT_PRECIPITATION: f64 = 0.0;
const DEFAULT_WIND_SPEED: f64 = 10.0;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SimulationParams {
    pub max_covers: u32,
    pub base_occupancy: f64,
    pub weather_weight: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            max_covers: DEFAULT_MAX_COVERS,
            base_occupancy: DEFAULT_BASE_OCCUPANCY,
            weather_weight: DEFAULT_WEATHER_WEIGHT,
        }
    }
}

pub fn day_weight(weekday: Weekday) -> f64 {
    match weekday {
        Weekday::Mon => 0.7,
        Weekday::Tue => 0.8,
        Weekday::Wed => 0.9,
        Weekday::Thu => 0.95,
        Weekday::Fri => 1.2,
        Weekday::Sat => 1.3,
        Weekday::Sun => 1.1,
    }
}

/// Yearly sine wave (zero crossing at day 160) plus end-of-year and winter adjustments.
pub fn seasonality_mod(date: NaiveDate) -> f64 {
    let doy = date.ordinal() as f64;
    let mut modifier = 1.0 + 0.15 * (2.0 * PI * (doy - 160.0) / 365.25).sin();
    match date.month() {
        12 => modifier += 0.15,
        1 | 2 => modifier -= 0.05,
        _ => {}
    }
    modifier
}

pub fn payday_mod(date: NaiveDate) -> f64 {
    let day = date.day();
    if day >= 28 || day <= 5 { 1.1 } else { 1.0 }
}

pub fn trend_mod(days_since_start: i64) -> f64 {
    1.0 + (days_since_start as f64 / 365.0) * 0.05
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WeatherModifiers {
    pub temp_mod: f64,
    pub rain_mod: f64,
    pub wind_mod: f64,
    pub weather_score: f64,
    pub weather_factor: f64,
}

pub fn weather_modifiers(
    tmax: Option<f64>,
    precipitation: Option<f64>,
    wind_speed: Option<f64>,
    weekend: bool,
    weather_weight: f64,
) -> WeatherModifiers {
    let tmax = tmax.unwrap_or(DEFAULT_TMAX);
    let precipitation = precipitation.unwrap_or(DEFAULT_PRECIPITATION);
    let wind_speed = wind_speed.unwrap_or(DEFAULT_WIND_SPEED);

    let temp_mod = (1.0 - (tmax - 22.0).abs() / 35.0).clamp(0.4, 1.2);
    // Rain keeps weekend walk-ins home more than weekday regulars.
    let rain_sensitivity = if weekend { 1.5 } else { 1.0 };
    let rain_mod = 1.0 - precipitation.clamp(0.0, 30.0) / 50.0 * rain_sensitivity;
    let wind_mod = 1.0 - wind_speed.clamp(0.0, 60.0) / 120.0;

    let weather_score = 0.5 * temp_mod + 0.3 * rain_mod + 0.2 * wind_mod;
    WeatherModifiers {
        temp_mod,
        rain_mod,
        wind_mod,
        weather_score,
        weather_factor: 1.0 + weather_weight * (weather_score - 1.0),
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticDemandGenerator {
    params: SimulationParams,
}

impl SyntheticDemandGenerator {
    pub fn new(params: SimulationParams) -> Self {
        SyntheticDemandGenerator { params }
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// One labeled record per input day, in input order.
    pub fn generate<R: Rng>(&self, restaurant_id: i64, days: &[DayConditions], rng: &mut R) -> Vec<DemandRecord> {
        let Some(origin) = days.iter().map(DayConditions::date).min() else {
            return Vec::new();
        };
        let base_demand = self.params.max_covers as f64 * self.params.base_occupancy;

        days.iter()
            .map(|day| {
                let date = day.date();
                let weekday = date.weekday();
                let weekend = is_weekend(weekday);
                let weather = &day.weather;

                let holiday_mod = if day.calendar.is_holiday {
                    rng.random_range(1.2..1.5)
                } else {
                    1.0
                };
                let vacation_mod = if day.calendar.is_school_vacation {
                    rng.random_range(1.0..1.2)
                } else {
                    1.0
                };
                let modifiers = weather_modifiers(
                    weather.tmax,
                    weather.precipitation,
                    weather.wind_speed,
                    weekend,
                    self.params.weather_weight,
                );
                let noise: f64 = rng.sample::<f64, _>(StandardNormal) * NOISE_STD_DEV;

                let raw = base_demand
                    * day_weight(weekday)
                    * seasonality_mod(date)
                    * payday_mod(date)
                    * holiday_mod
                    * vacation_mod
                    * trend_mod((date - origin).num_days())
                    * modifiers.weather_factor
                    * (1.0 + noise);
                let affluence = clip_covers(raw, self.params.max_covers);

                let sip = scoring::sip_historical(
                    weekday,
                    day.calendar.is_holiday,
                    day.calendar.is_school_vacation,
                    modifiers.weather_score,
                    rng,
                );

                DemandRecord {
                    date,
                    restaurant_id,
                    day_of_week: weekday_name(weekday).to_string(),
                    is_weekend: weekend,
                    is_holiday: day.calendar.is_holiday,
                    holiday_name: day.calendar.holiday_name.clone(),
                    is_school_vacation: day.calendar.is_school_vacation,
                    vacation_name: day.calendar.vacation_name.clone(),
                    weather_code: weather.weather_code,
                    tmax: weather.tmax,
                    tmin: weather.tmin,
                    precipitation: weather.precipitation,
                    wind_speed: weather.wind_speed,
                    sip: sip.total,
                    affluence,
                    occupancy_rate: occupancy_rate(affluence, self.params.max_covers),
                    is_full: affluence == self.params.max_covers,
                }
            })
            .collect()
    }
}

fn clip_covers(raw: f64, max_covers: u32) -> u32 {
    if !raw.is_finite() {
        return 0;
    }
    raw.round().clamp(0.0, max_covers as f64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::demand::{CalendarDay, WeatherObservation};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn series(start: NaiveDate, days: i64, weather: impl Fn(NaiveDate) -> WeatherObservation) -> Vec<DayConditions> {
        (0..days)
            .map(|offset| {
                let day = start + chrono::Duration::days(offset);
                DayConditions {
                    calendar: CalendarDay::plain(day),
                    weather: weather(day),
                }
            })
            .collect()
    }

    fn ideal(day: NaiveDate) -> WeatherObservation {
        WeatherObservation {
            date: day,
            tmax: Some(22.0),
            tmin: Some(12.0),
            precipitation: Some(0.0),
            wind_speed: Some(0.0),
            weather_code: Some(0),
        }
    }

    #[test]
    fn affluence_stays_within_capacity() {
        let mut days = series(date(2024, 1, 1), 366, |d| WeatherObservation {
            date: d,
            tmax: Some(35.0),
            tmin: None,
            precipitation: Some(12.0),
            wind_speed: Some(40.0),
            weather_code: Some(61),
        });
        for day in days.iter_mut().step_by(11) {
            day.calendar.is_holiday = true;
            day.calendar.holiday_name = Some("Jour férié".into());
        }
        // Large base occupancy saturates often, so `is_full` gets exercised too.
        let generator = SyntheticDemandGenerator::new(SimulationParams {
            max_covers: 40,
            base_occupancy: 1.4,
            weather_weight: 0.3,
        });
        let mut rng = SmallRng::seed_from_u64(7);
        let records = generator.generate(3, &days, &mut rng);

        assert_eq!(records.len(), days.len());
        assert!(records.iter().any(|r| r.is_full));
        for r in &records {
            assert!(r.affluence <= 40);
            assert_eq!(r.is_full, r.affluence == 40);
            assert_eq!(r.occupancy_rate, occupancy_rate(r.affluence, 40));
            assert!(r.sip.is_finite() && r.sip >= 0.0);
            assert_eq!(r.restaurant_id, 3);
        }
    }

    #[test]
    fn seasonality_crosses_zero_at_day_160_and_peaks_a_quarter_later() {
        // 2023-06-09 is day-of-year 160.
        assert!((seasonality_mod(date(2023, 6, 9)) - 1.0).abs() < 1e-12);
        let peak = seasonality_mod(date(2023, 9, 8)); // day 251
        assert!((peak - 1.15).abs() < 1e-3);
        assert!(seasonality_mod(date(2023, 3, 1)) < 1.0);
    }

    #[test]
    fn december_and_winter_months_shift_seasonality() {
        let dec = date(2023, 12, 15);
        let base = 1.0 + 0.15 * (2.0 * PI * (dec.ordinal() as f64 - 160.0) / 365.25).sin();
        assert!((seasonality_mod(dec) - (base + 0.15)).abs() < 1e-12);

        let feb = date(2023, 2, 10);
        let base = 1.0 + 0.15 * (2.0 * PI * (feb.ordinal() as f64 - 160.0) / 365.25).sin();
        assert!((seasonality_mod(feb) - (base - 0.05)).abs() < 1e-12);
    }

    #[test]
    fn payday_window_and_trend() {
        assert_eq!(payday_mod(date(2024, 3, 28)), 1.1);
        assert_eq!(payday_mod(date(2024, 3, 5)), 1.1);
        assert_eq!(payday_mod(date(2024, 3, 6)), 1.0);
        assert_eq!(payday_mod(date(2024, 3, 27)), 1.0);
        assert_eq!(trend_mod(0), 1.0);
        assert!((trend_mod(365) - 1.05).abs() < 1e-12);
    }

    #[test]
    fn ideal_weather_is_neutral() {
        let m = weather_modifiers(Some(22.0), Some(0.0), Some(0.0), false, 0.3);
        assert_eq!(m.temp_mod, 1.0);
        assert_eq!(m.rain_mod, 1.0);
        assert_eq!(m.wind_mod, 1.0);
        assert!((m.weather_factor - 1.0).abs() < 1e-12);
    }

    #[test]
    fn weekend_rain_hurts_more_and_missing_values_use_defaults() {
        let weekday = weather_modifiers(Some(22.0), Some(20.0), Some(0.0), false, 0.3);
        let weekend = weather_modifiers(Some(22.0), Some(20.0), Some(0.0), true, 0.3);
        assert!((weekday.rain_mod - 0.6).abs() < 1e-12);
        assert!((weekend.rain_mod - 0.4).abs() < 1e-12);

        let defaults = weather_modifiers(None, None, None, false, 0.3);
        let explicit = weather_modifiers(Some(20.0), Some(0.0), Some(10.0), false, 0.3);
        assert_eq!(defaults, explicit);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let days = series(date(2024, 5, 1), 30, ideal);
        let generator = SyntheticDemandGenerator::new(SimulationParams::default());

        let a = generator.generate(1, &days, &mut SmallRng::seed_from_u64(42));
        let b = generator.generate(1, &days, &mut SmallRng::seed_from_u64(42));
        assert_eq!(a, b);

        let c = generator.generate(1, &days, &mut SmallRng::seed_from_u64(43));
        assert_ne!(a, c);
    }

    #[test]
    fn empty_input_yields_no_records() {
        let generator = SyntheticDemandGenerator::new(SimulationParams::default());
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(generator.generate(1, &[], &mut rng).is_empty());
    }
}
