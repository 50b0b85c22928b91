//! Quantile forecasting capability injected into the orchestrator.
//!
//! An engine fits on a time-indexed series (rows with a known `affluence`) and yields
//! a model that predicts [`QUANTILES`] for every row whose target is unset.

pub mod linear;

use crate::services::fusion::FeatureRow;

/// Predicted quantile levels, ascending.
pub const QUANTILES: [f64; 7] = [0.02, 0.1, 0.25, 0.5, 0.75, 0.9, 0.98];
pub const LOW_INDEX: usize = 1;
pub const MEDIAN_INDEX: usize = 3;
pub const HIGH_INDEX: usize = 5;

pub type QuantileVector = [f64; QUANTILES.len()];

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not enough training data: {known} labeled row(s), at least {required} required")]
    InsufficientData { known: usize, required: usize },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("training diverged at epoch {0}")]
    Diverged(u32),
}

/// Early-stopping state after one epoch, as reported to progress listeners.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: u32,
    pub max_epochs: u32,
    pub patience: u32,
    pub wait_count: u32,
    pub should_stop: bool,
    pub train_loss: f64,
    pub val_loss: f64,
}

pub trait QuantileModel {
    /// One quantile vector per row with an unset target, in row order.
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<QuantileVector>, EngineError>;
}

pub trait ForecastingEngine {
    type Model: QuantileModel;

    fn fit(
        &mut self,
        rows: &[FeatureRow],
        on_epoch: &mut dyn FnMut(&EpochReport),
    ) -> Result<Self::Model, EngineError>;
}

/// Patience-based early stopping on a loss that should decrease.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: u32,
    min_delta: f64,
    best: f64,
    wait_count: u32,
}

impl EarlyStopping {
    pub const DEFAULT_PATIENCE: u32 = 10;
    pub const DEFAULT_MIN_DELTA: f64 = 1e-4;

    pub fn new(patience: u32, min_delta: f64) -> Self {
        EarlyStopping {
            patience,
            min_delta,
            best: f64::INFINITY,
            wait_count: 0,
        }
    }

    /// Records a loss; true when it improved on the best by more than `min_delta`.
    pub fn observe(&mut self, loss: f64) -> bool {
        if loss < self.best - self.min_delta {
            self.best = loss;
            self.wait_count = 0;
            true
        } else {
            self.wait_count += 1;
            false
        }
    }

    pub fn should_stop(&self) -> bool {
        self.wait_count >= self.patience
    }

    pub fn patience(&self) -> u32 {
        self.patience
    }

    pub fn wait_count(&self) -> u32 {
        self.wait_count
    }

    pub fn best(&self) -> f64 {
        self.best
    }
}

impl Default for EarlyStopping {
    fn default() -> Self {
        EarlyStopping::new(Self::DEFAULT_PATIENCE, Self::DEFAULT_MIN_DELTA)
    }
}
