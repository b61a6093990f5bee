use std::collections::TryReserveError;

use thiserror::Error;

use crate::config::{Implementation, NoisesOff};
use crate::simulator::ode::SolverError;

/// Errors raised while advancing a state vector.
///
/// Every variant maps onto an [ErrCode] bit through [PredictError::code], so that
/// drivers can OR-accumulate the outcome of many prediction calls per particle.
#[derive(Error, Debug)]
pub enum PredictError {
    /// The adaptive ODE solver could not advance the state.
    #[error("the ODE solver failed to advance at t = {t}: {source}")]
    Solver {
        t: f64,
        #[source]
        source: SolverError,
    },
    /// A derived remainder became negative; total population mass is violated.
    #[error("remainder '{name}' is negative ({value}) at t = {t}")]
    NegativeRemainder { name: String, t: f64, value: f64 },
    /// The state buffer could not be allocated.
    #[error("could not allocate the state buffer: {0}")]
    Allocation(#[from] TryReserveError),
    /// No prediction function exists for this implementation / noise combination.
    #[error("no prediction function for implementation {implementation:?} with noises off {noises_off:?}")]
    NoPredictor {
        implementation: Implementation,
        noises_off: NoisesOff,
    },
    /// The run configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// The state buffer does not match the layout described by the model index.
    #[error("state layout mismatch: {0}")]
    Layout(String),
    /// The selected predictor needs a model function that was not provided.
    #[error("the model has no {0} function")]
    MissingFunction(&'static str),
    /// A probability handed to the multinomial sampler is not a number in [0, 1].
    #[error("invalid probability {p} for outcome {k}")]
    InvalidProbability { k: usize, p: f64 },
    /// Trajectories could not be written.
    #[error("could not write trajectories: {0}")]
    Csv(#[from] csv::Error),
}

impl PredictError {
    pub fn code(&self) -> ErrCode {
        match self {
            PredictError::Solver { .. } => ErrCode::PRED,
            PredictError::NegativeRemainder { .. } => ErrCode::REM_SV,
            PredictError::Allocation(_) => ErrCode::ALLOC,
            PredictError::NoPredictor { .. }
            | PredictError::Config(_)
            | PredictError::Layout(_)
            | PredictError::MissingFunction(_)
            | PredictError::InvalidProbability { .. }
            | PredictError::Csv(_) => ErrCode::CONFIG,
        }
    }
}

bitflags::bitflags! {
    /// Bitmask status code accumulated across prediction calls.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ErrCode: u32 {
        const SUCCESS = 0;
        const REM_SV = 1 << 1;
        const PRED = 1 << 2;
        const ALLOC = 1 << 3;
        const CONFIG = 1 << 4;
    }
}

impl ErrCode {
    pub fn is_success(self) -> bool {
        self.is_empty()
    }
}

impl<T> From<&Result<T, PredictError>> for ErrCode {
    fn from(result: &Result<T, PredictError>) -> Self {
        match result {
            Ok(_) => ErrCode::SUCCESS,
            Err(e) => e.code(),
        }
    }
}
