//! Run configuration shared read-only by every particle.
//!
//! A [Nav] is usually built from a [NavConfig] parsed from JSON:
//!
//! ```ignore
//! use ssmpred::*;
//! let nav = Nav::from_json(r#"{
//!     "implementation": "sde",
//!     "noises_off": ["dem_sto", "white_noise"],
//!     "print": ["warning"],
//!     "dt": 0.1
//! }"#)?;
//! let predictor = nav.predictor()?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::simulator::ode::SolverSettings;
use crate::simulator::prediction::Predictor;
use crate::PredictError;

/// Numerical regime used to advance the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Implementation {
    /// Deterministic ordinary differential equations.
    Ode,
    /// Extended Kalman filter: mean and flattened covariance, both integrated as an ODE.
    Ekf,
    /// Stochastic differential equations with selectable noise sources.
    Sde,
    /// Euler-multinomial discrete-event stepping.
    Psr,
}

/// A noise source that can be switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Noise {
    DemSto,
    WhiteNoise,
    Diff,
}

bitflags::bitflags! {
    /// Bitmask of disabled noise sources.
    ///
    /// Masks built with [from_bits_retain](NoisesOff::from_bits_retain) keep bits
    /// outside [NoisesOff::ALL], so that the dispatcher can reject them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(from = "Vec<Noise>", into = "Vec<Noise>")]
    pub struct NoisesOff: u8 {
        const NONE = 0;
        const NO_DEM_STO = 1 << 0;
        const NO_WHITE_NOISE = 1 << 1;
        const NO_DIFF = 1 << 2;
        const ALL = Self::NO_DEM_STO.bits() | Self::NO_WHITE_NOISE.bits() | Self::NO_DIFF.bits();
    }
}

impl From<Noise> for NoisesOff {
    fn from(noise: Noise) -> Self {
        match noise {
            Noise::DemSto => NoisesOff::NO_DEM_STO,
            Noise::WhiteNoise => NoisesOff::NO_WHITE_NOISE,
            Noise::Diff => NoisesOff::NO_DIFF,
        }
    }
}

impl From<Vec<Noise>> for NoisesOff {
    fn from(noises: Vec<Noise>) -> Self {
        noises
            .into_iter()
            .fold(NoisesOff::NONE, |acc, n| acc | n.into())
    }
}

impl From<NoisesOff> for Vec<Noise> {
    fn from(mask: NoisesOff) -> Self {
        [Noise::DemSto, Noise::WhiteNoise, Noise::Diff]
            .into_iter()
            .filter(|n| mask.contains((*n).into()))
            .collect()
    }
}

/// What should be reported while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintItem {
    Warning,
    X,
    Hat,
}

bitflags::bitflags! {
    /// Bitmask of [PrintItem]s.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(from = "Vec<PrintItem>", into = "Vec<PrintItem>")]
    pub struct Print: u8 {
        const NONE = 0;
        const WARNING = 1 << 0;
        const X = 1 << 1;
        const HAT = 1 << 2;
    }
}

impl From<Vec<PrintItem>> for Print {
    fn from(items: Vec<PrintItem>) -> Self {
        items.into_iter().fold(Print::NONE, |acc, item| {
            acc | match item {
                PrintItem::Warning => Print::WARNING,
                PrintItem::X => Print::X,
                PrintItem::Hat => Print::HAT,
            }
        })
    }
}

impl From<Print> for Vec<PrintItem> {
    fn from(print: Print) -> Self {
        let mut items = Vec::new();
        if print.contains(Print::WARNING) {
            items.push(PrintItem::Warning);
        }
        if print.contains(Print::X) {
            items.push(PrintItem::X);
        }
        if print.contains(Print::HAT) {
            items.push(PrintItem::Hat);
        }
        items
    }
}

fn default_dt() -> f64 {
    0.25
}

/// Serializable form of the run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavConfig {
    pub implementation: Implementation,
    #[serde(default)]
    pub noises_off: NoisesOff,
    #[serde(default)]
    pub print: Print,
    /// Initial integration / sub-step size given to every new state vector.
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default)]
    pub solver: SolverSettings,
}

impl NavConfig {
    pub fn new(implementation: Implementation) -> Self {
        Self {
            implementation,
            noises_off: NoisesOff::NONE,
            print: Print::NONE,
            dt: default_dt(),
            solver: SolverSettings::default(),
        }
    }
}

/// Immutable run configuration, shared by reference across particles and workers.
#[derive(Debug, Clone)]
pub struct Nav {
    implementation: Implementation,
    noises_off: NoisesOff,
    print: Print,
    dt: f64,
    solver: SolverSettings,
    sink: Arc<dyn DiagnosticSink>,
}

impl Nav {
    pub fn new(implementation: Implementation) -> Self {
        NavConfig::new(implementation).into()
    }

    pub fn from_json(json: &str) -> Result<Self, PredictError> {
        let config: NavConfig = serde_json::from_str(json)?;
        Ok(config.into())
    }

    pub fn with_noises_off(mut self, noises_off: NoisesOff) -> Self {
        self.noises_off = noises_off;
        self
    }

    pub fn with_print(mut self, print: Print) -> Self {
        self.print = print;
        self
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_solver(mut self, solver: SolverSettings) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn implementation(&self) -> Implementation {
        self.implementation
    }

    pub fn noises_off(&self) -> NoisesOff {
        self.noises_off
    }

    pub fn print(&self) -> Print {
        self.print
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn solver(&self) -> &SolverSettings {
        &self.solver
    }

    /// Resolves the prediction function for this configuration.
    ///
    /// Call this once before entering the simulation loop and reuse the result.
    pub fn predictor(&self) -> Result<Predictor, PredictError> {
        Predictor::select(self.implementation, self.noises_off).ok_or(
            PredictError::NoPredictor {
                implementation: self.implementation,
                noises_off: self.noises_off,
            },
        )
    }

    pub(crate) fn warn(&self, message: &str) {
        if self.print.contains(Print::WARNING) {
            self.sink.warning(message);
        }
    }

    pub(crate) fn error(&self, message: &str) {
        self.sink.error(message);
    }
}

impl From<NavConfig> for Nav {
    fn from(config: NavConfig) -> Self {
        Self {
            implementation: config.implementation,
            noises_off: config.noises_off,
            print: config.print,
            dt: config.dt,
            solver: config.solver,
            sink: Arc::new(LogSink),
        }
    }
}
