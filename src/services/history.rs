//! Batch history generation: conditions from providers, synthetic demand, then
//! export to the store and/or a CSV file.

use crate::models::demand::{Coordinates, DayConditions, DemandRecord};
use crate::services::horizon::LiveSignals;
use crate::services::synthetic::{SimulationParams, SyntheticDemandGenerator};
use crate::store::{ExportSummary, HistoryStore, RecordSink, StoreError};
use chrono::NaiveDate;
use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("end date {end} is before start date {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("Restaurant configuration not found for ID {0}")]
    RestaurantNotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv export failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub restaurant_id: i64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub params: SimulationParams,
    /// Free-text location overriding the restaurant's address.
    pub location: Option<String>,
    pub seed: Option<u64>,
    pub csv_path: Option<PathBuf>,
    /// Academy used when the restaurant has none (or is not looked up).
    pub default_academy: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct GenerateSummary {
    pub days: usize,
    pub exported: Option<ExportSummary>,
    pub csv_rows: Option<usize>,
}

/// Location and past conditions for a generation run.
pub trait HistorySignals {
    /// Never fails; falls back to the configured coordinate.
    fn locate_text(&self, address: &str) -> Coordinates;

    fn fallback_location(&self) -> Coordinates;

    /// One entry per day of `[start, end]`.
    fn conditions(&self, academy: &str, location: Coordinates, start: NaiveDate, end: NaiveDate) -> Vec<DayConditions>;
}

impl HistorySignals for LiveSignals {
    fn locate_text(&self, address: &str) -> Coordinates {
        self.locate_address(address)
    }

    fn fallback_location(&self) -> Coordinates {
        self.fallback()
    }

    fn conditions(&self, academy: &str, location: Coordinates, start: NaiveDate, end: NaiveDate) -> Vec<DayConditions> {
        self.calendar().collect_conditions(academy, location, start, end)
    }
}

/// `store` is `None` when the run must not touch the database.
pub fn generate_history<S, P>(
    opts: &GenerateOptions,
    mut store: Option<&mut S>,
    signals: &P,
) -> Result<GenerateSummary, HistoryError>
where
    S: HistoryStore + RecordSink,
    P: HistorySignals,
{
    if opts.end < opts.start {
        return Err(HistoryError::InvalidRange {
            start: opts.start,
            end: opts.end,
        });
    }

    let profile = match store.as_deref_mut() {
        Some(store) => Some(
            store
                .restaurant_profile(opts.restaurant_id)?
                .ok_or(HistoryError::RestaurantNotFound(opts.restaurant_id))?,
        ),
        None => None,
    };

    let location: Coordinates = match (&opts.location, &profile) {
        (Some(text), _) => signals.locate_text(text),
        (None, Some(profile)) => signals.locate_text(&profile.full_address()),
        (None, None) => {
            warn!("History: no location given and no restaurant lookup; using fallback location");
            signals.fallback_location()
        }
    };
    let academy = profile
        .as_ref()
        .and_then(|p| p.academy.clone())
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| opts.default_academy.clone());
    info!(
        "History: restaurant {} from {} to {} at {:.4},{:.4} (academy {})",
        opts.restaurant_id, opts.start, opts.end, location.latitude, location.longitude, academy
    );

    let conditions = signals.conditions(&academy, location, opts.start, opts.end);

    let mut rng = match opts.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };
    let generator = SyntheticDemandGenerator::new(opts.params);
    let records = generator.generate(opts.restaurant_id, &conditions, &mut rng);
    info!(
        "History: generated {} day(s), mean affluence {:.1}",
        records.len(),
        mean_affluence(&records)
    );

    let mut summary = GenerateSummary {
        days: records.len(),
        ..Default::default()
    };

    if let Some(path) = &opts.csv_path {
        let file = std::fs::File::create(path)?;
        let rows = write_csv(file, &records)?;
        info!("History: wrote {} row(s) to {}", rows, path.display());
        summary.csv_rows = Some(rows);
    }

    if let Some(store) = store {
        summary.exported = Some(store.export_records(&records)?);
    } else {
        info!("History: store export skipped");
    }

    Ok(summary)
}

fn mean_affluence(records: &[DemandRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    records.iter().map(|r| r.affluence as f64).sum::<f64>() / records.len() as f64
}

/// Column layout shared with the `demand_history` table.
#[derive(Serialize)]
struct CsvRow<'a> {
    date: NaiveDate,
    holiday_name: Option<&'a str>,
    is_holiday: bool,
    is_school_vacations: bool,
    vacation_name: Option<&'a str>,
    weather_code: Option<i32>,
    tmax: Option<f64>,
    tmin: Option<f64>,
    precipitation: Option<f64>,
    wind_speed: Option<f64>,
    day_of_week: &'a str,
    is_weekend: bool,
    affluence: u32,
    occupancy_rate: f64,
    is_full: bool,
    restaurant_id: i64,
}

impl<'a> From<&'a DemandRecord> for CsvRow<'a> {
    fn from(r: &'a DemandRecord) -> Self {
        CsvRow {
            date: r.date,
            holiday_name: r.holiday_name.as_deref(),
            is_holiday: r.is_holiday,
            is_school_vacations: r.is_school_vacation,
            vacation_name: r.vacation_name.as_deref(),
            weather_code: r.weather_code,
            tmax: r.tmax,
            tmin: r.tmin,
            precipitation: r.precipitation,
            wind_speed: r.wind_speed,
            day_of_week: &r.day_of_week,
            is_weekend: r.is_weekend,
            affluence: r.affluence,
            occupancy_rate: r.occupancy_rate,
            is_full: r.is_full,
            restaurant_id: r.restaurant_id,
        }
    }
}

pub fn write_csv<W: Write>(out: W, records: &[DemandRecord]) -> Result<usize, HistoryError> {
    let mut writer = csv::Writer::from_writer(out);
    for record in records {
        writer.serialize(CsvRow::from(record))?;
    }
    writer.flush()?;
    Ok(records.len())
}
