pub mod models {
    pub mod demand;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
}
pub mod engine;
pub mod env_file;
pub mod schema;
pub mod scoring;
pub mod store;
pub mod providers {
    pub mod events;
    pub mod geocoding;
    pub mod holidays;
    pub mod vacations;
    pub mod weather;
}
pub mod services {
    pub mod calendar;
    pub mod fusion;
    pub mod history;
    pub mod horizon;
    pub mod orchestrator;
    pub mod synthetic;
}

use crate::client::HttpClient;
use crate::config::Config;
use crate::engine::linear::LinearQuantileEngine;
use crate::providers::events::EventExtractor;
use crate::services::calendar::CalendarSources;
use crate::services::history::{GenerateOptions, generate_history};
use crate::services::horizon::LiveSignals;
use crate::services::orchestrator::{ForecastOrchestrator, ProgressEvent, StreamItem};
use crate::services::synthetic::{
    DEFAULT_BASE_OCCUPANCY, DEFAULT_MAX_COVERS, DEFAULT_WEATHER_WEIGHT, SimulationParams,
};
use crate::store::PgStore;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about = "Restaurant covers forecasting")]
struct Cli {
    /// Load environment from this file instead of ./.env
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate synthetic demand history for a restaurant.
    Generate {
        #[arg(long)]
        restaurant_id: i64,
        #[arg(long)]
        start_date: NaiveDate,
        /// Defaults to today.
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Accepted for compatibility; only logged.
        #[arg(long)]
        epochs: Option<u32>,
        #[arg(long, default_value_t = DEFAULT_MAX_COVERS)]
        max_covers: u32,
        #[arg(long, default_value_t = DEFAULT_BASE_OCCUPANCY)]
        base_occupancy: f64,
        #[arg(long, default_value_t = DEFAULT_WEATHER_WEIGHT)]
        weather_weight: f64,
        /// Free-text location, geocoded instead of the restaurant address.
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        seed: Option<u64>,
        /// Also write the generated rows to this CSV file.
        #[arg(long, value_name = "PATH")]
        csv: Option<PathBuf>,
        /// Do not read or write the database.
        #[arg(long)]
        skip_store: bool,
    },
    /// Forecast the next days and stream progress as JSON lines on stdout.
    Predict {
        #[arg(long)]
        restaurant_id: i64,
        #[arg(long, default_value_t = 30)]
        epochs: u32,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn live_signals(cfg: &Config, client: &HttpClient) -> LiveSignals {
    let calendar = CalendarSources::new(client, &cfg.holiday_country);
    let events = EventExtractor::new(client.clone(), cfg.gemini_api_key.clone(), &cfg.gemini_model);
    LiveSignals::new(client, calendar, events, cfg.fallback_location)
}

fn run(command: Command) -> Result<(), String> {
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (holiday_country={}, school_academy={}, events_enabled={}, gemini_model={}, max_request_retries={}, request_timeout={}s)",
        cfg.holiday_country,
        cfg.school_academy,
        cfg.gemini_api_key.is_some(),
        cfg.gemini_model,
        cfg.max_request_retries.get(),
        cfg.request_timeout.as_secs()
    );
    let client = HttpClient::new(cfg.http_settings());
    let signals = live_signals(&cfg, &client);

    match command {
        Command::Generate {
            restaurant_id,
            start_date,
            end_date,
            epochs,
            max_covers,
            base_occupancy,
            weather_weight,
            location,
            seed,
            csv,
            skip_store,
        } => {
            if let Some(epochs) = epochs {
                info!("Generate: --epochs={} has no effect on history generation", epochs);
            }
            if max_covers == 0 {
                return Err("--max-covers must be greater than zero".to_string());
            }
            let opts = GenerateOptions {
                restaurant_id,
                start: start_date,
                end: end_date.unwrap_or_else(|| Local::now().date_naive()),
                params: SimulationParams {
                    max_covers,
                    base_occupancy,
                    weather_weight,
                },
                location,
                seed,
                csv_path: csv,
                default_academy: cfg.school_academy.clone(),
            };

            let mut store = (!skip_store).then(|| PgStore::new(&cfg.database_url));
            let summary = generate_history(&opts, store.as_mut(), &signals).map_err(|e| e.to_string())?;
            info!(
                "Generate: {} day(s) generated, {} row(s) exported, {} failed, {} CSV row(s)",
                summary.days,
                summary.exported.map(|s| s.inserted).unwrap_or(0),
                summary.exported.map(|s| s.failed).unwrap_or(0),
                summary.csv_rows.unwrap_or(0)
            );
            Ok(())
        }
        Command::Predict {
            restaurant_id,
            epochs,
            seed,
        } => {
            if epochs == 0 {
                return Err("--epochs must be greater than zero".to_string());
            }
            let store = PgStore::new(&cfg.database_url);
            let engine = LinearQuantileEngine::with_max_epochs(epochs);
            let mut orchestrator = ForecastOrchestrator::new(restaurant_id, store, signals, engine);
            if let Some(seed) = seed {
                orchestrator = orchestrator.with_seed(seed);
            }
            let stream = orchestrator
                .spawn(cfg.progress_poll)
                .map_err(|e| e.to_string())?;

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let mut failure = None;
            for item in stream {
                let StreamItem::Event(event) = item else {
                    continue;
                };
                serde_json::to_writer(&mut out, &event).map_err(|e| format!("writing progress failed: {}", e))?;
                writeln!(out)
                    .and_then(|_| out.flush())
                    .map_err(|e| format!("writing progress failed: {}", e))?;
                if let ProgressEvent::Error { message } = event {
                    failure = Some(message);
                }
            }
            match failure {
                Some(message) => Err(message),
                None => Ok(()),
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let loaded_env = match env_file::load(cli.env_file.as_deref()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "covers-forecast {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_defaults() {
        let cli = Cli::try_parse_from([
            "covers-forecast",
            "generate",
            "--restaurant-id",
            "3",
            "--start-date",
            "2024-01-01",
            "--skip-store",
        ])
        .unwrap();
        match cli.command {
            Command::Generate {
                restaurant_id,
                start_date,
                end_date,
                max_covers,
                base_occupancy,
                skip_store,
                ..
            } => {
                assert_eq!(restaurant_id, 3);
                assert_eq!(start_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
                assert_eq!(end_date, None);
                assert_eq!(max_covers, 80);
                assert_eq!(base_occupancy, 0.6);
                assert!(skip_store);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn env_file_is_global() {
        let cli = Cli::try_parse_from([
            "covers-forecast",
            "predict",
            "--restaurant-id",
            "7",
            "--env-file",
            "prod.env",
        ])
        .unwrap();
        assert_eq!(cli.env_file, Some(PathBuf::from("prod.env")));
        assert!(matches!(cli.command, Command::Predict { epochs: 30, seed: None, .. }));
    }

    #[test]
    fn bad_dates_are_rejected() {
        assert!(
            Cli::try_parse_from(["covers-forecast", "generate", "--restaurant-id", "1", "--start-date", "01/02/2024"])
                .is_err()
        );
    }
}
