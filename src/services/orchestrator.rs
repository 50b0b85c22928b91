//! Progressive forecast run: load history, train once, predict the horizon with and
//! without the event signal, and stream progress to the caller while doing so.
//!
//! The whole blocking sequence runs on one worker thread. Progress crosses to the
//! consumer over a bounded channel; the channel closing marks the end of the run.

use crate::engine::{EngineError, EpochReport, ForecastingEngine, HIGH_INDEX, LOW_INDEX, MEDIAN_INDEX, QuantileModel};
use crate::models::demand::{ConfidenceScore, ForecastDay, RestaurantConfig};
use crate::scoring;
use crate::services::fusion::{self, FeatureRow, HORIZON_DAYS};
use crate::services::horizon::SignalProvider;
use crate::store::{HistoryStore, StoreError};
use chrono::{Datelike, Days};
use log::{debug, error, info, warn};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CHANNEL_CAPACITY: usize = 64;
const DEFAULT_SEED: u64 = 0x5eed;

pub const MSG_LOADING: &str = "Loading data...";
pub const MSG_TRAINING: &str = "Refining the forecast model...";
pub const MSG_SEARCHING: &str = "Searching upcoming conditions and events...";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Loading,
    Training,
    PredictingWithSignal,
    PredictingWithoutSignal,
    Compiled,
    Done,
    Failed,
}

impl RunPhase {
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Training)
                | (Training, PredictingWithSignal)
                | (PredictingWithSignal, PredictingWithoutSignal)
                | (PredictingWithoutSignal, Compiled)
                | (Compiled, Done)
        ) || (next == Failed && !self.is_terminal())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Loading => "loading",
            RunPhase::Training => "training",
            RunPhase::PredictingWithSignal => "predicting(signal-on)",
            RunPhase::PredictingWithoutSignal => "predicting(signal-off)",
            RunPhase::Compiled => "compiled",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One message of the progress protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProgressEvent {
    Message {
        message: String,
    },
    Steps {
        message: String,
        #[serde(rename = "stepName")]
        step_name: String,
        step: u32,
        #[serde(rename = "totalStep")]
        total_step: u32,
    },
    Error {
        message: String,
    },
    Output {
        payload: Vec<ForecastDay>,
    },
}

impl ProgressEvent {
    fn message(text: &str) -> Self {
        ProgressEvent::Message {
            message: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(ProgressEvent),
    /// Nothing arrived within the poll interval; the worker is still running.
    Heartbeat,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Restaurant configuration not found for ID {0}")]
    RestaurantNotFound(i64),
    #[error("No demand history for restaurant {0}")]
    EmptyHistory(i64),
    #[error("No forecast horizon available between {0} and {1}")]
    EmptyHorizon(chrono::NaiveDate, chrono::NaiveDate),
    #[error("Model returned {got} prediction(s) for {expected} horizon day(s)")]
    PredictionMismatch { expected: usize, got: usize },
    #[error("Invalid run transition {from} -> {to}")]
    InvalidTransition { from: RunPhase, to: RunPhase },
    #[error("Progress consumer went away")]
    ConsumerGone,
    #[error("Could not start forecast worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Model error: {0}")]
    Engine(#[from] EngineError),
}

/// Producer half held by the worker. Once the consumer is gone every later emit fails.
pub struct Emitter {
    tx: SyncSender<ProgressEvent>,
    detached: bool,
}

impl Emitter {
    fn new(tx: SyncSender<ProgressEvent>) -> Self {
        Emitter { tx, detached: false }
    }

    pub fn emit(&mut self, event: ProgressEvent) -> Result<(), OrchestratorError> {
        if self.detached {
            return Err(OrchestratorError::ConsumerGone);
        }
        // Blocks while the consumer is behind.
        if self.tx.send(event).is_err() {
            debug!("Orchestrator: progress consumer dropped; no further events");
            self.detached = true;
            return Err(OrchestratorError::ConsumerGone);
        }
        Ok(())
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

/// Consumer half: yields events and heartbeats until the worker finishes.
pub struct ProgressStream {
    rx: Receiver<ProgressEvent>,
    worker: Option<JoinHandle<()>>,
    poll: Duration,
    finished: bool,
}

impl Iterator for ProgressStream {
    type Item = StreamItem;

    fn next(&mut self) -> Option<StreamItem> {
        if self.finished {
            return None;
        }
        match self.rx.recv_timeout(self.poll) {
            Ok(event) => Some(StreamItem::Event(event)),
            Err(RecvTimeoutError::Timeout) => Some(StreamItem::Heartbeat),
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                match self.worker.take().map(JoinHandle::join) {
                    Some(Err(panic)) => {
                        let message = format!("Forecast worker crashed: {}", panic_message(panic.as_ref()));
                        error!("{}", message);
                        Some(StreamItem::Event(ProgressEvent::Error { message }))
                    }
                    _ => None,
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// `totalStep` reported after an epoch: the engine may stop before `max_epochs`.
pub fn projected_total_steps(epoch: u32, max_epochs: u32, patience: u32, wait_count: u32, should_stop: bool) -> u32 {
    if should_stop {
        epoch
    } else if wait_count > 0 {
        max_epochs.min(epoch + patience.saturating_sub(wait_count))
    } else {
        max_epochs
    }
}

pub fn relative_uncertainty(median: f64, uncertainty_range: f64) -> f64 {
    if median > 0.1 { uncertainty_range / median } else { 0.0 }
}

pub struct ForecastOrchestrator<S, P, E> {
    restaurant_id: i64,
    store: S,
    signals: P,
    engine: E,
    seed: u64,
    phase: RunPhase,
}

impl<S, P, E> ForecastOrchestrator<S, P, E>
where
    S: HistoryStore,
    P: SignalProvider,
    E: ForecastingEngine,
{
    pub fn new(restaurant_id: i64, store: S, signals: P, engine: E) -> Self {
        ForecastOrchestrator {
            restaurant_id,
            store,
            signals,
            engine,
            seed: DEFAULT_SEED,
            phase: RunPhase::Idle,
        }
    }

    /// Seed for the random part of the historical SIP.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn advance(&mut self, next: RunPhase) -> Result<(), OrchestratorError> {
        if !self.phase.can_advance_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!("Orchestrator: {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Runs on a dedicated worker; consuming `self` makes it one run per instance.
    pub fn spawn(self, poll: Duration) -> Result<ProgressStream, OrchestratorError>
    where
        S: Send + 'static,
        P: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        let mut orchestrator = self;
        let worker = thread::Builder::new()
            .name(format!("forecast-{}", orchestrator.restaurant_id))
            .spawn(move || {
                let mut emitter = Emitter::new(tx);
                orchestrator.execute(&mut emitter);
            })?;
        Ok(ProgressStream {
            rx,
            worker: Some(worker),
            poll,
            finished: false,
        })
    }

    fn execute(&mut self, emitter: &mut Emitter) {
        let outcome = self
            .run(emitter)
            .and_then(|payload| emitter.emit(ProgressEvent::Output { payload }));
        match outcome {
            Ok(()) => {
                if let Err(e) = self.advance(RunPhase::Done) {
                    warn!("Orchestrator: {}", e);
                }
                info!("Orchestrator: forecast for restaurant {} delivered", self.restaurant_id);
            }
            Err(OrchestratorError::ConsumerGone) => {
                self.phase = RunPhase::Failed;
                info!("Orchestrator: run for restaurant {} abandoned by consumer", self.restaurant_id);
            }
            Err(e) => {
                self.phase = RunPhase::Failed;
                error!("Orchestrator: run for restaurant {} failed: {}", self.restaurant_id, e);
                let _ = emitter.emit(ProgressEvent::Error { message: e.to_string() });
            }
        }
    }

    /// Whole blocking sequence up to the compiled result.
    pub fn run(&mut self, emitter: &mut Emitter) -> Result<Vec<ForecastDay>, OrchestratorError> {
        let (config, history) = self.load(emitter)?;
        let model = self.train(&history, emitter)?;
        self.predict(&model, &history, &config, emitter)
    }

    fn load(&mut self, emitter: &mut Emitter) -> Result<(RestaurantConfig, Vec<FeatureRow>), OrchestratorError> {
        self.advance(RunPhase::Loading)?;
        emitter.emit(ProgressEvent::message(MSG_LOADING))?;

        let profile = self
            .store
            .restaurant_profile(self.restaurant_id)?
            .ok_or(OrchestratorError::RestaurantNotFound(self.restaurant_id))?;
        let coordinates = self.signals.locate(&profile);
        let config = RestaurantConfig::from_profile(&profile, coordinates);

        let mut records = self.store.load_history(self.restaurant_id)?;
        if records.is_empty() {
            return Err(OrchestratorError::EmptyHistory(self.restaurant_id));
        }
        let mut rng = SmallRng::seed_from_u64(self.seed);
        for record in records.iter_mut() {
            let weather_score =
                scoring::reconstructed_weather_score(record.tmax, record.precipitation, record.wind_speed);
            record.sip = scoring::sip_historical(
                record.date.weekday(),
                record.is_holiday,
                record.is_school_vacation,
                weather_score,
                &mut rng,
            )
            .total;
        }
        let mut history: Vec<FeatureRow> = records.iter().map(FeatureRow::from_record).collect();
        fusion::assign_day_offsets(&mut history);
        info!(
            "Orchestrator: restaurant {} ({}) with {} day(s) of history, {}..{}",
            config.id,
            config.name,
            history.len(),
            records[0].date,
            records[records.len() - 1].date
        );
        Ok((config, history))
    }

    pub fn train(&mut self, history: &[FeatureRow], emitter: &mut Emitter) -> Result<E::Model, OrchestratorError> {
        self.advance(RunPhase::Training)?;
        emitter.emit(ProgressEvent::message(MSG_TRAINING))?;

        let mut on_epoch = |report: &EpochReport| {
            let total = projected_total_steps(
                report.epoch,
                report.max_epochs,
                report.patience,
                report.wait_count,
                report.should_stop,
            );
            // A gone consumer only stops reporting; it is checked once `fit` returns.
            let _ = emitter.emit(ProgressEvent::Steps {
                message: MSG_TRAINING.to_string(),
                step_name: format!("Step {} of {}", report.epoch, total),
                step: report.epoch,
                total_step: total,
            });
        };
        let model = self.engine.fit(history, &mut on_epoch)?;
        if emitter.is_detached() {
            return Err(OrchestratorError::ConsumerGone);
        }
        Ok(model)
    }

    pub fn predict(
        &mut self,
        model: &E::Model,
        history: &[FeatureRow],
        config: &RestaurantConfig,
        emitter: &mut Emitter,
    ) -> Result<Vec<ForecastDay>, OrchestratorError> {
        self.advance(RunPhase::PredictingWithSignal)?;
        emitter.emit(ProgressEvent::message(MSG_SEARCHING))?;

        let last = history
            .iter()
            .map(|r| r.date)
            .max()
            .ok_or(OrchestratorError::EmptyHistory(self.restaurant_id))?;
        let start = last + Days::new(1);
        let end = last + Days::new(HORIZON_DAYS as u64);
        let horizon = self.signals.horizon(start, end, config);
        if horizon.is_empty() {
            return Err(OrchestratorError::EmptyHorizon(start, end));
        }

        let group = config.id.to_string();
        let with_signal = model.predict(&fusion::fuse(history, &horizon, &group))?;
        self.advance(RunPhase::PredictingWithoutSignal)?;
        let without_signal = model.predict(&fusion::fuse_without_signal(history, &horizon, &group))?;
        for got in [with_signal.len(), without_signal.len()] {
            if got != horizon.len() {
                return Err(OrchestratorError::PredictionMismatch {
                    expected: horizon.len(),
                    got,
                });
            }
        }

        let payload = horizon
            .into_iter()
            .zip(with_signal.iter().zip(&without_signal))
            .map(|(day, (on, off))| {
                let predicted = on[MEDIAN_INDEX];
                let conf_low = on[LOW_INDEX].max(0.0);
                let conf_high = on[HIGH_INDEX].max(0.0);
                let uncertainty_range = conf_high - conf_low;
                let relative = relative_uncertainty(predicted, uncertainty_range);
                ForecastDay {
                    date: day.date,
                    day_of_week: day.day_of_week,
                    tmax: day.tmax,
                    sip: day.sip,
                    events: day.events,
                    predicted_affluence: predicted,
                    conf_low,
                    conf_high,
                    predicted_affluence_no_signal: off[MEDIAN_INDEX],
                    conf_low_no_signal: off[LOW_INDEX].max(0.0),
                    conf_high_no_signal: off[HIGH_INDEX].max(0.0),
                    uncertainty_range,
                    relative_uncertainty: relative,
                    confidence_score: ConfidenceScore::from_relative_uncertainty(relative),
                }
            })
            .collect::<Vec<_>>();
        self.advance(RunPhase::Compiled)?;
        debug!("Orchestrator: compiled {} forecast day(s)", payload.len());
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::QuantileVector;
    use crate::models::demand::{
        Coordinates, DemandRecord, HorizonDay, RestaurantProfile, weekday_name,
    };
    use crate::services::horizon::{HorizonInputs, score_horizon};
    use chrono::NaiveDate;

    struct MemoryStore {
        profile: Option<RestaurantProfile>,
        history: Vec<DemandRecord>,
    }

    impl HistoryStore for MemoryStore {
        fn restaurant_profile(&mut self, _id: i64) -> Result<Option<RestaurantProfile>, StoreError> {
            Ok(self.profile.clone())
        }

        fn load_history(&mut self, _id: i64) -> Result<Vec<DemandRecord>, StoreError> {
            Ok(self.history.clone())
        }
    }

    struct StaticSignals {
        days: usize,
        delay: Duration,
    }

    impl SignalProvider for StaticSignals {
        fn locate(&self, _profile: &RestaurantProfile) -> Coordinates {
            Coordinates {
                latitude: 46.7833,
                longitude: 4.85,
            }
        }

        fn horizon(&self, start: NaiveDate, end: NaiveDate, config: &RestaurantConfig) -> Vec<HorizonDay> {
            thread::sleep(self.delay);
            let mut days = score_horizon(start, end, &HorizonInputs::default(), config);
            days.truncate(self.days);
            days
        }
    }

    enum Behaviour {
        Replay(Vec<EpochReport>),
        Fail,
        Panic,
    }

    struct ScriptedEngine {
        behaviour: Behaviour,
    }

    /// Median follows the SIP so the two scenarios differ.
    struct SipModel;

    impl QuantileModel for SipModel {
        fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<QuantileVector>, EngineError> {
            Ok(rows
                .iter()
                .filter(|r| r.affluence.is_none())
                .map(|r| {
                    let m = 40.0 + 20.0 * r.sip;
                    [m - 30.0, m - 8.0, m - 4.0, m, m + 4.0, m + 8.0, m + 30.0]
                })
                .collect())
        }
    }

    impl ForecastingEngine for ScriptedEngine {
        type Model = SipModel;

        fn fit(&mut self, _rows: &[FeatureRow], on_epoch: &mut dyn FnMut(&EpochReport)) -> Result<SipModel, EngineError> {
            match &self.behaviour {
                Behaviour::Replay(reports) => {
                    for r in reports {
                        on_epoch(r);
                    }
                    Ok(SipModel)
                }
                Behaviour::Fail => Err(EngineError::InsufficientData { known: 3, required: 48 }),
                Behaviour::Panic => panic!("exploding gradient"),
            }
        }
    }

    fn report(epoch: u32, wait_count: u32, should_stop: bool) -> EpochReport {
        EpochReport {
            epoch,
            max_epochs: 30,
            patience: 10,
            wait_count,
            should_stop,
            train_loss: 0.1,
            val_loss: 0.1,
        }
    }

    fn profile() -> RestaurantProfile {
        RestaurantProfile {
            id: 12,
            name: "Le Comptoir".into(),
            city: Some("Chalon-sur-Saône".into()),
            address: "3 rue du Châtelet".into(),
            zip_code: "71100".into(),
            restaurant_type: None,
            urban_context: Some("DENSE".into()),
            academy: None,
        }
    }

    fn history(days: u64) -> Vec<DemandRecord> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        (0..days)
            .map(|i| {
                let date = start + Days::new(i);
                DemandRecord {
                    date,
                    restaurant_id: 12,
                    day_of_week: weekday_name(date.weekday()).into(),
                    is_weekend: false,
                    is_holiday: false,
                    holiday_name: None,
                    is_school_vacation: false,
                    vacation_name: None,
                    weather_code: Some(3),
                    tmax: Some(14.0),
                    tmin: Some(5.0),
                    precipitation: Some(0.0),
                    wind_speed: Some(12.0),
                    sip: 0.0,
                    affluence: 45,
                    occupancy_rate: 56.3,
                    is_full: false,
                }
            })
            .collect()
    }

    fn orchestrator(
        profile: Option<RestaurantProfile>,
        days: usize,
        behaviour: Behaviour,
    ) -> ForecastOrchestrator<MemoryStore, StaticSignals, ScriptedEngine> {
        ForecastOrchestrator::new(
            12,
            MemoryStore {
                profile,
                history: history(120),
            },
            StaticSignals {
                days,
                delay: Duration::ZERO,
            },
            ScriptedEngine { behaviour },
        )
    }

    fn events(stream: ProgressStream) -> Vec<ProgressEvent> {
        stream
            .filter_map(|item| match item {
                StreamItem::Event(e) => Some(e),
                StreamItem::Heartbeat => None,
            })
            .collect()
    }

    #[test]
    fn waiting_engine_projects_remaining_patience() {
        assert_eq!(projected_total_steps(15, 30, 10, 3, false), 22);
        assert_eq!(projected_total_steps(28, 30, 10, 1, false), 30);
        assert_eq!(projected_total_steps(5, 30, 10, 0, false), 30);
        assert_eq!(projected_total_steps(17, 30, 10, 10, true), 17);
    }

    #[test]
    fn relative_uncertainty_ignores_tiny_medians() {
        assert_eq!(relative_uncertainty(0.05, 4.0), 0.0);
        assert!((relative_uncertainty(40.0, 16.0) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn phases_only_move_forward() {
        assert!(RunPhase::Idle.can_advance_to(RunPhase::Loading));
        assert!(!RunPhase::Idle.can_advance_to(RunPhase::Training));
        assert!(!RunPhase::PredictingWithSignal.can_advance_to(RunPhase::Training));
        assert!(RunPhase::Training.can_advance_to(RunPhase::Failed));
        assert!(!RunPhase::Done.can_advance_to(RunPhase::Failed));
        assert!(!RunPhase::Failed.can_advance_to(RunPhase::Loading));
    }

    #[test]
    fn steps_serialize_with_protocol_field_names() {
        let event = ProgressEvent::Steps {
            message: MSG_TRAINING.into(),
            step_name: "Step 15 of 22".into(),
            step: 15,
            total_step: 22,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "steps");
        assert_eq!(json["stepName"], "Step 15 of 22");
        assert_eq!(json["totalStep"], 22);
        assert_eq!(json["step"], 15);

        let err = serde_json::to_value(ProgressEvent::Error { message: "x".into() }).unwrap();
        assert_eq!(err, serde_json::json!({"status": "error", "message": "x"}));
    }

    #[test]
    fn full_run_streams_progress_then_dual_forecast() {
        let reports = vec![report(1, 0, false), report(15, 3, false), report(22, 10, true)];
        let stream = orchestrator(Some(profile()), HORIZON_DAYS, Behaviour::Replay(reports))
            .spawn(Duration::from_millis(20))
            .unwrap();
        let events = events(stream);

        assert_eq!(events[0], ProgressEvent::message(MSG_LOADING));
        assert_eq!(events[1], ProgressEvent::message(MSG_TRAINING));
        let totals: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Steps { total_step, .. } => Some(*total_step),
                _ => None,
            })
            .collect();
        assert_eq!(totals, vec![30, 22, 22]);
        assert!(events.contains(&ProgressEvent::message(MSG_SEARCHING)));

        let Some(ProgressEvent::Output { payload }) = events.last() else {
            panic!("run did not end with an output event: {events:?}");
        };
        assert_eq!(payload.len(), HORIZON_DAYS);
        // History covers 2025-01-01 + 119 days; the horizon starts the day after.
        assert_eq!(payload[0].date, NaiveDate::from_ymd_opt(2025, 5, 1).unwrap());
        for day in payload {
            assert!(day.predicted_affluence > day.predicted_affluence_no_signal);
            assert!(day.conf_low <= day.predicted_affluence && day.predicted_affluence <= day.conf_high);
            assert!((day.uncertainty_range - 16.0).abs() < 1e-9);
            assert_eq!(
                day.confidence_score,
                ConfidenceScore::from_relative_uncertainty(day.relative_uncertainty)
            );
        }
    }

    #[test]
    fn unknown_restaurant_ends_with_error_event() {
        let stream = orchestrator(None, HORIZON_DAYS, Behaviour::Replay(Vec::new()))
            .spawn(Duration::from_millis(20))
            .unwrap();
        let events = events(stream);
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Error {
                message: "Restaurant configuration not found for ID 12".into()
            })
        );
        assert!(!events.iter().any(|e| matches!(e, ProgressEvent::Output { .. })));
    }

    #[test]
    fn engine_failure_and_empty_horizon_are_reported() {
        let events_fail = events(
            orchestrator(Some(profile()), HORIZON_DAYS, Behaviour::Fail)
                .spawn(Duration::from_millis(20))
                .unwrap(),
        );
        assert!(matches!(events_fail.last(), Some(ProgressEvent::Error { message }) if message.starts_with("Model error")));

        let events_empty = events(
            orchestrator(Some(profile()), 0, Behaviour::Replay(Vec::new()))
                .spawn(Duration::from_millis(20))
                .unwrap(),
        );
        assert!(matches!(events_empty.last(), Some(ProgressEvent::Error { message }) if message.starts_with("No forecast horizon")));
    }

    #[test]
    fn worker_panic_becomes_final_error() {
        let events = events(
            orchestrator(Some(profile()), HORIZON_DAYS, Behaviour::Panic)
                .spawn(Duration::from_millis(20))
                .unwrap(),
        );
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Error {
                message: "Forecast worker crashed: exploding gradient".into()
            })
        );
    }

    #[test]
    fn slow_worker_yields_heartbeats() {
        let mut orch = orchestrator(Some(profile()), HORIZON_DAYS, Behaviour::Replay(Vec::new()));
        orch.signals.delay = Duration::from_millis(60);
        let items: Vec<StreamItem> = orch.spawn(Duration::from_millis(5)).unwrap().collect();
        assert!(items.contains(&StreamItem::Heartbeat));
        assert!(matches!(items.last(), Some(StreamItem::Event(ProgressEvent::Output { .. }))));
    }

    #[test]
    fn slow_consumer_still_sees_every_step() {
        let reports: Vec<EpochReport> = (1..=100)
            .map(|epoch| EpochReport {
                max_epochs: 100,
                ..report(epoch, 0, false)
            })
            .collect();
        let stream = orchestrator(Some(profile()), HORIZON_DAYS, Behaviour::Replay(reports))
            .spawn(Duration::from_millis(20))
            .unwrap();
        // Let the worker run far ahead of the channel capacity.
        thread::sleep(Duration::from_millis(300));
        let events = events(stream);

        let steps: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Steps { step, .. } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(steps, (1..=100).collect::<Vec<_>>());
        assert!(matches!(events.last(), Some(ProgressEvent::Output { .. })));
    }

    #[test]
    fn negative_median_is_reported_raw() {
        struct LowModel;
        impl QuantileModel for LowModel {
            fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<QuantileVector>, EngineError> {
                Ok(rows
                    .iter()
                    .filter(|r| r.affluence.is_none())
                    .map(|_| [-9.0, -6.0, -4.0, -2.0, 1.0, 3.0, 5.0])
                    .collect())
            }
        }

        let (tx, _rx) = sync_channel(CHANNEL_CAPACITY);
        let mut emitter = Emitter::new(tx);
        let mut orch = orchestrator(Some(profile()), 2, Behaviour::Replay(Vec::new()));
        let (config, history) = orch.load(&mut emitter).unwrap();
        orch.advance(RunPhase::Training).unwrap();
        let payload = orch.predict(&LowModel, &history, &config, &mut emitter).unwrap();

        assert_eq!(payload[0].predicted_affluence, -2.0);
        assert_eq!(payload[0].predicted_affluence_no_signal, -2.0);
        assert_eq!(payload[0].conf_low, 0.0);
        assert_eq!(payload[0].conf_high, 3.0);
        assert_eq!(payload[0].relative_uncertainty, 0.0);
    }

    #[test]
    fn blocking_run_walks_every_phase() {
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        let mut emitter = Emitter::new(tx);
        let mut orch = orchestrator(Some(profile()), 4, Behaviour::Replay(vec![report(1, 0, false)]));
        let payload = orch.run(&mut emitter).unwrap();
        assert_eq!(payload.len(), 4);
        assert_eq!(orch.phase(), RunPhase::Compiled);
        drop(emitter);
        assert_eq!(rx.iter().count(), 4);
    }
}
