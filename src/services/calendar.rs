//! Calendar assembly: one `DayConditions` per date of an inclusive range.
//!
//! Holidays, school vacations and weather come from independent providers; any of
//! them failing degrades to "nothing known" for that source, never to an error.

use crate::client::{HttpClient, ProviderError};
use crate::models::demand::{CalendarDay, Coordinates, DayConditions, WeatherObservation};
use crate::providers::holidays::HolidayProvider;
use crate::providers::vacations::{VacationPeriod, VacationProvider};
use crate::providers::weather::WeatherProvider;
use chrono::NaiveDate;
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};

/// The three providers calendar assembly draws from.
pub struct CalendarSources {
    pub holidays: HolidayProvider,
    pub vacations: VacationProvider,
    pub weather: WeatherProvider,
}

impl CalendarSources {
    pub fn new(client: &HttpClient, holiday_country: &str) -> Self {
        CalendarSources {
            holidays: HolidayProvider::new(client.clone(), holiday_country),
            vacations: VacationProvider::new(client.clone()),
            weather: WeatherProvider::new(client.clone()),
        }
    }

    pub fn holidays_or_empty(&self, start: NaiveDate, end: NaiveDate) -> BTreeMap<NaiveDate, String> {
        self.holidays.in_range(start, end).unwrap_or_else(|e| {
            warn!("Calendar: holidays unavailable ({}); assuming none", e);
            BTreeMap::new()
        })
    }

    pub fn vacations_or_empty(&self, academy: &str, start: NaiveDate, end: NaiveDate) -> Vec<VacationPeriod> {
        self.vacations.periods(academy, start, end).unwrap_or_else(|e| {
            warn!("Calendar: school vacations unavailable ({}); assuming none", e);
            Vec::new()
        })
    }

    /// Providers are queried independently and each one degrades on its own.
    pub fn collect_conditions(
        &self,
        academy: &str,
        location: Coordinates,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<DayConditions> {
        let holidays = self.holidays_or_empty(start, end);
        let vacations = self.vacations_or_empty(academy, start, end);
        let weather = self
            .weather
            .history(location, start, end)
            .unwrap_or_else(|e: ProviderError| {
                warn!("Calendar: weather archive unavailable ({}); generator defaults apply", e);
                Vec::new()
            });
        info!(
            "Calendar: {}..{} with {} holiday(s), {} vacation period(s), {} weather day(s)",
            start,
            end,
            holidays.len(),
            vacations.len(),
            weather.len()
        );
        build_conditions(start, end, &holidays, &vacations, &weather)
    }
}

/// Pure merge step. Empty when `end < start`.
pub fn build_conditions(
    start: NaiveDate,
    end: NaiveDate,
    holidays: &BTreeMap<NaiveDate, String>,
    vacations: &[VacationPeriod],
    weather: &[WeatherObservation],
) -> Vec<DayConditions> {
    let by_date: HashMap<NaiveDate, &WeatherObservation> = weather.iter().map(|w| (w.date, w)).collect();

    let mut days: Vec<DayConditions> = start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| {
            let mut calendar = CalendarDay::plain(date);
            if let Some(name) = holidays.get(&date) {
                calendar.is_holiday = true;
                calendar.holiday_name = Some(name.clone());
            }
            // Later periods win on overlap.
            for period in vacations.iter().filter(|p| p.contains(date)) {
                calendar.is_school_vacation = true;
                calendar.vacation_name = Some(period.description.clone());
            }
            let weather = by_date
                .get(&date)
                .map(|w| (*w).clone())
                .unwrap_or_else(|| WeatherObservation::empty(date));
            DayConditions { calendar, weather }
        })
        .collect();

    if !weather.is_empty() {
        fill_weather_gaps(&mut days);
    }
    days
}

fn fill_weather_gaps(days: &mut [DayConditions]) {
    let tmax = mean(days.iter().filter_map(|d| d.weather.tmax));
    let tmin = mean(days.iter().filter_map(|d| d.weather.tmin));
    let wind = mean(days.iter().filter_map(|d| d.weather.wind_speed));
    for day in days.iter_mut() {
        let w = &mut day.weather;
        w.tmax = w.tmax.or(tmax);
        w.tmin = w.tmin.or(tmin);
        w.wind_speed = w.wind_speed.or(wind);
        w.precipitation = w.precipitation.or(Some(0.0));
        w.weather_code = w.weather_code.or(Some(0));
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn obs(day: NaiveDate, tmax: Option<f64>, wind: Option<f64>) -> WeatherObservation {
        WeatherObservation {
            date: day,
            tmax,
            tmin: tmax.map(|t| t - 8.0),
            precipitation: tmax.map(|_| 1.5),
            wind_speed: wind,
            weather_code: tmax.map(|_| 3),
        }
    }

    #[test]
    fn index_is_contiguous_and_inclusive() {
        let days = build_conditions(date(2024, 2, 27), date(2024, 3, 2), &BTreeMap::new(), &[], &[]);
        let dates: Vec<_> = days.iter().map(DayConditions::date).collect();
        assert_eq!(
            dates,
            vec![
                date(2024, 2, 27),
                date(2024, 2, 28),
                date(2024, 2, 29),
                date(2024, 3, 1),
                date(2024, 3, 2)
            ]
        );
        assert!(build_conditions(date(2024, 3, 2), date(2024, 3, 1), &BTreeMap::new(), &[], &[]).is_empty());
    }

    #[test]
    fn holidays_and_vacations_flag_their_days() {
        let holidays = BTreeMap::from([(date(2024, 5, 8), "Victoire 1945".to_string())]);
        let vacations = [VacationPeriod {
            description: "Pont de l'Ascension".into(),
            first_day: date(2024, 5, 9),
            last_day: date(2024, 5, 12),
        }];
        let days = build_conditions(date(2024, 5, 7), date(2024, 5, 13), &holidays, &vacations, &[]);

        assert!(days[1].calendar.is_holiday);
        assert_eq!(days[1].calendar.holiday_name.as_deref(), Some("Victoire 1945"));
        assert!(!days[1].calendar.is_school_vacation);
        assert!((2..=5).all(|i| days[i].calendar.is_school_vacation));
        assert!(!days[6].calendar.is_school_vacation);
        assert_eq!(days[6].calendar.vacation_name, None);
    }

    #[test]
    fn weather_gaps_take_column_means() {
        let start = date(2024, 3, 1);
        let weather = [
            obs(start, Some(10.0), Some(20.0)),
            obs(date(2024, 3, 3), Some(14.0), None),
        ];
        let days = build_conditions(start, date(2024, 3, 3), &BTreeMap::new(), &[], &weather);

        let gap = &days[1].weather;
        assert_eq!(gap.tmax, Some(12.0));
        assert_eq!(gap.tmin, Some(4.0));
        assert_eq!(gap.wind_speed, Some(20.0));
        assert_eq!(gap.precipitation, Some(0.0));
        assert_eq!(gap.weather_code, Some(0));
        assert_eq!(days[2].weather.wind_speed, Some(20.0));
        assert_eq!(days[2].weather.precipitation, Some(1.5));
    }

    #[test]
    fn no_weather_leaves_fields_empty() {
        let days = build_conditions(date(2024, 3, 1), date(2024, 3, 2), &BTreeMap::new(), &[], &[]);
        assert!(days.iter().all(|d| d.weather == WeatherObservation::empty(d.date())));
    }
}
