//! Built-in quantile engine: one linear model per quantile, fitted by full-batch
//! pinball-loss subgradient descent with early stopping on a held-out tail.

use super::{EarlyStopping, EngineError, EpochReport, ForecastingEngine, QUANTILES, QuantileModel, QuantileVector};
use crate::services::fusion::{FeatureRow, HORIZON_DAYS};
use chrono::{Datelike, Weekday};
use log::debug;

const N_FEATURES: usize = 12;
pub const MIN_LABELED_ROWS: usize = 48;

type Weights = [[f64; N_FEATURES]; QUANTILES.len()];

#[derive(Debug, Clone)]
pub struct LinearQuantileEngine {
    pub max_epochs: u32,
    pub steps_per_epoch: u32,
    pub learning_rate: f64,
    pub patience: u32,
    pub min_delta: f64,
}

impl Default for LinearQuantileEngine {
    fn default() -> Self {
        LinearQuantileEngine {
            max_epochs: 30,
            steps_per_epoch: 30,
            learning_rate: 0.03,
            patience: EarlyStopping::DEFAULT_PATIENCE,
            min_delta: EarlyStopping::DEFAULT_MIN_DELTA,
        }
    }
}

impl LinearQuantileEngine {
    pub fn with_max_epochs(max_epochs: u32) -> Self {
        LinearQuantileEngine {
            max_epochs,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearQuantileModel {
    weights: Weights,
    /// Target normalisation (training mean).
    scale: f64,
}

fn features(row: &FeatureRow) -> [f64; N_FEATURES] {
    let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    let weekday = row.date.weekday();
    // Sunday is the baseline.
    let day = |d: Weekday| flag(weekday == d);
    [
        1.0,
        day(Weekday::Mon),
        day(Weekday::Tue),
        day(Weekday::Wed),
        day(Weekday::Thu),
        day(Weekday::Fri),
        day(Weekday::Sat),
        flag(row.is_holiday),
        flag(row.is_school_vacation),
        (finite(row.tmax) - 20.0) / 10.0,
        finite(row.prcp) / 10.0,
        finite(row.sip),
    ]
}

fn dot(w: &[f64; N_FEATURES], x: &[f64; N_FEATURES]) -> f64 {
    w.iter().zip(x).map(|(a, b)| a * b).sum()
}

pub fn pinball(q: f64, target: f64, predicted: f64) -> f64 {
    let r = target - predicted;
    if r >= 0.0 { q * r } else { (q - 1.0) * r }
}

struct Sample {
    x: [f64; N_FEATURES],
    y: f64,
}

fn mean_loss(weights: &Weights, samples: &[Sample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total: f64 = samples
        .iter()
        .map(|s| {
            QUANTILES
                .iter()
                .zip(weights)
                .map(|(q, w)| pinball(*q, s.y, dot(w, &s.x)))
                .sum::<f64>()
        })
        .sum();
    total / (samples.len() * QUANTILES.len()) as f64
}

fn step(weights: &mut Weights, samples: &[Sample], learning_rate: f64) {
    let n = samples.len() as f64;
    for (q, w) in QUANTILES.iter().zip(weights.iter_mut()) {
        let mut grad = [0.0; N_FEATURES];
        for s in samples {
            let d = if s.y - dot(w, &s.x) >= 0.0 { -q } else { 1.0 - q };
            for (g, x) in grad.iter_mut().zip(&s.x) {
                *g += d * x;
            }
        }
        for (wi, g) in w.iter_mut().zip(&grad) {
            *wi -= learning_rate * g / n;
        }
    }
}

impl ForecastingEngine for LinearQuantileEngine {
    type Model = LinearQuantileModel;

    fn fit(
        &mut self,
        rows: &[FeatureRow],
        on_epoch: &mut dyn FnMut(&EpochReport),
    ) -> Result<LinearQuantileModel, EngineError> {
        if self.max_epochs == 0 {
            return Err(EngineError::InvalidInput("max_epochs must be at least 1".into()));
        }
        let mut labeled: Vec<&FeatureRow> = rows
            .iter()
            .filter(|r| r.affluence.is_some_and(f64::is_finite))
            .collect();
        if labeled.len() < MIN_LABELED_ROWS {
            return Err(EngineError::InsufficientData {
                known: labeled.len(),
                required: MIN_LABELED_ROWS,
            });
        }
        labeled.sort_by_key(|r| r.time_idx);

        let last_idx = labeled.last().map(|r| r.time_idx).unwrap_or_default();
        let cutoff = last_idx - HORIZON_DAYS as i64;
        let (train_rows, val_rows): (Vec<&FeatureRow>, Vec<&FeatureRow>) =
            labeled.into_iter().partition(|r| r.time_idx <= cutoff);
        if train_rows.is_empty() {
            return Err(EngineError::InvalidInput("no rows before the validation window".into()));
        }

        let target = |r: &FeatureRow| r.affluence.unwrap_or_default();
        let mean = train_rows.iter().map(|r| target(r)).sum::<f64>() / train_rows.len() as f64;
        let scale = if mean > 0.0 { mean } else { 1.0 };
        let to_samples = |rows: &[&FeatureRow]| -> Vec<Sample> {
            rows.iter()
                .map(|r| Sample {
                    x: features(r),
                    y: target(r) / scale,
                })
                .collect()
        };
        let train = to_samples(&train_rows);
        let val = to_samples(&val_rows);

        let mut weights: Weights = [[0.0; N_FEATURES]; QUANTILES.len()];
        for w in weights.iter_mut() {
            w[0] = 1.0;
        }
        let mut best = weights;
        let mut stopping = EarlyStopping::new(self.patience, self.min_delta);

        for epoch in 1..=self.max_epochs {
            for _ in 0..self.steps_per_epoch {
                step(&mut weights, &train, self.learning_rate);
            }
            let train_loss = mean_loss(&weights, &train);
            let val_loss = if val.is_empty() { train_loss } else { mean_loss(&weights, &val) };
            if !val_loss.is_finite() || !train_loss.is_finite() {
                return Err(EngineError::Diverged(epoch));
            }
            if stopping.observe(val_loss) {
                best = weights;
            }
            let report = EpochReport {
                epoch,
                max_epochs: self.max_epochs,
                patience: stopping.patience(),
                wait_count: stopping.wait_count(),
                should_stop: stopping.should_stop(),
                train_loss,
                val_loss,
            };
            debug!(
                "Engine: epoch {}/{} train={:.5} val={:.5} wait={}",
                epoch, self.max_epochs, train_loss, val_loss, report.wait_count
            );
            on_epoch(&report);
            if report.should_stop {
                break;
            }
        }

        Ok(LinearQuantileModel { weights: best, scale })
    }
}

impl QuantileModel for LinearQuantileModel {
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<QuantileVector>, EngineError> {
        rows.iter()
            .filter(|r| r.affluence.is_none())
            .map(|r| {
                let x = features(r);
                let mut out: QuantileVector = [0.0; QUANTILES.len()];
                for (o, w) in out.iter_mut().zip(&self.weights) {
                    *o = dot(w, &x) * self.scale;
                }
                if out.iter().any(|v| !v.is_finite()) {
                    return Err(EngineError::InvalidInput(format!("non-finite prediction for {}", r.date)));
                }
                // Independent per-quantile fits can cross.
                out.sort_by(f64::total_cmp);
                Ok(out)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MEDIAN_INDEX;
    use crate::models::demand::weekday_name;
    use crate::services::fusion::assign_day_offsets;
    use chrono::{Duration, NaiveDate};

    fn series(days: usize) -> Vec<FeatureRow> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut rows: Vec<_> = (0..days)
            .map(|i| {
                let date = start + Duration::days(i as i64);
                let busy = matches!(date.weekday(), Weekday::Fri | Weekday::Sat);
                FeatureRow {
                    time_idx: 0,
                    date,
                    restaurant_id: "1".into(),
                    day_of_week: weekday_name(date.weekday()).into(),
                    is_holiday: false,
                    is_school_vacation: false,
                    tmax: 18.0,
                    prcp: 0.0,
                    sip: if busy { 0.5 } else { 0.1 },
                    affluence: Some(if busy { 60.0 } else { 30.0 } + (i % 3) as f64),
                }
            })
            .collect();
        assign_day_offsets(&mut rows);
        rows
    }

    fn unlabeled(mut rows: Vec<FeatureRow>) -> Vec<FeatureRow> {
        for r in rows.iter_mut() {
            r.affluence = None;
        }
        rows
    }

    #[test]
    fn too_little_history_is_rejected() {
        let mut engine = LinearQuantileEngine::default();
        let err = engine.fit(&series(20), &mut |_| {}).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { known: 20, .. }));
    }

    #[test]
    fn learns_the_weekly_pattern() {
        let mut engine = LinearQuantileEngine::default();
        let model = engine.fit(&series(140), &mut |_| {}).unwrap();

        // 2024-05-20 is a Monday, 2024-05-24 a Friday.
        let probe = unlabeled(
            series(150)
                .into_iter()
                .filter(|r| {
                    r.date == NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
                        || r.date == NaiveDate::from_ymd_opt(2024, 5, 24).unwrap()
                })
                .collect(),
        );
        let out = model.predict(&probe).unwrap();
        assert_eq!(out.len(), 2);
        for q in &out {
            assert!(q.windows(2).all(|w| w[0] <= w[1]));
        }
        let (monday, friday) = (out[0][MEDIAN_INDEX], out[1][MEDIAN_INDEX]);
        assert!(friday > monday + 15.0, "monday={monday} friday={friday}");
        assert!((monday - 31.0).abs() < 8.0, "monday={monday}");
    }

    #[test]
    fn epochs_are_reported_in_order() {
        let mut engine = LinearQuantileEngine::with_max_epochs(12);
        let mut seen = Vec::new();
        engine.fit(&series(100), &mut |r| seen.push(*r)).unwrap();

        assert!(!seen.is_empty());
        assert!(seen.iter().enumerate().all(|(i, r)| r.epoch == i as u32 + 1));
        assert!(seen.iter().all(|r| r.max_epochs == 12 && r.patience == 10));
        let last = seen.last().unwrap();
        assert!(last.should_stop || last.epoch == 12);
    }

    #[test]
    fn labeled_rows_are_skipped_at_prediction_time() {
        let mut engine = LinearQuantileEngine::with_max_epochs(2);
        let rows = series(60);
        let model = engine.fit(&rows, &mut |_| {}).unwrap();
        assert!(model.predict(&rows).unwrap().is_empty());
    }

    #[test]
    fn fitting_is_deterministic() {
        let rows = series(90);
        let a = LinearQuantileEngine::default().fit(&rows, &mut |_| {}).unwrap();
        let b = LinearQuantileEngine::default().fit(&rows, &mut |_| {}).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn pinball_is_asymmetric() {
        assert!((pinball(0.9, 10.0, 8.0) - 1.8).abs() < 1e-12);
        assert!((pinball(0.9, 8.0, 10.0) - 0.2).abs() < 1e-12);
        assert_eq!(pinball(0.5, 3.0, 3.0), 0.0);
    }
}
