//! Static description of a model: where each state lives in the state vector and
//! the per-model functions the prediction engine calls into.
//!
//! The bodies of these functions are model specific; the engine only fixes their
//! signatures. A model is shared read-only by every particle of a run.

use crate::calc::Calculator;
use crate::config::Implementation;
use crate::state::StateVector;
use crate::PredictError;

pub type T = f64;
pub type V = nalgebra::DVector<T>;

/// This closure represents the right-hand side of the deterministic system, used by
/// the ODE and EKF implementations.
/// Params:
/// - t: The time at which the system is evaluated
/// - y: The full state buffer (for EKF: mean followed by the flattened covariance)
/// - p: The parameters of the model
/// - dydt: A mutable slice receiving the derivative, same length as `y`
/// Example:
/// ```ignore
/// use ssmpred::*;
/// let rhs: Rhs = |_t, y, p, dydt| {
///     dydt[0] = -p[0] * y[0];
///     dydt[1] = p[0] * y[0] - p[1] * y[1];
/// };
/// ```
pub type Rhs = fn(T, &[T], &V, &mut [T]);

/// This closure advances the state by one sub-step of length `x.dt()`.
/// Params:
/// - x: The state vector, updated in place; the step may also adapt `x.dt()`
/// - t: The time at the start of the sub-step
/// - p: The parameters of the model
/// - noise: Which noise sources the selected predictor enables
/// - calc: The calculator of the particle, holding its random number generator
pub type Step = fn(&mut StateVector, T, &V, StepNoise, &mut Calculator) -> Result<(), PredictError>;

/// This closure evaluates the drift and dispersion of every diffusion-modelled component.
/// Params:
/// - diffed: The diffusion components after their inverse link, in [ModelIndex::states_diff] order
/// - w: One standard normal draw per Brownian driver, shared by all components
/// - t: The time of the sub-step
/// - p: The parameters of the model
/// - drift: A mutable slice receiving one drift term per component
/// - dispersion: A mutable slice receiving one dispersion term per component
/// Example:
/// ```ignore
/// use ssmpred::*;
/// let terms: DiffusionTerms = |_diffed, w, _t, p, drift, dispersion| {
///     drift[0] = 0.0;
///     dispersion[0] = p[2] * w[0];
/// };
/// ```
pub type DiffusionTerms = fn(&[T], &[T], T, &V, &mut [T], &mut [T]);

/// Inverse link applied to a diffusion component before its terms are evaluated.
pub type Link = fn(T) -> T;

/// Computes a derived quantity that must stay non-negative (e.g. the residual
/// population `N - S - I`).
pub type RemainderFn = fn(&StateVector, &V, T) -> T;

fn identity(x: T) -> T {
    x
}

/// Which noise sources a stepping routine should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepNoise {
    /// Discrete-event randomness in the transitions.
    pub dem_sto: bool,
    /// Multiplicative white noise on the rates.
    pub white_noise: bool,
}

/// A named position in the state vector.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDescriptor {
    pub name: String,
    pub offset: usize,
}

/// A state component modelled as a diffusion.
#[derive(Debug, Clone)]
pub struct DiffState {
    pub name: String,
    pub offset: usize,
    pub f_inv: Link,
}

/// A derived quantity whose sign is a hard model-consistency invariant.
#[derive(Debug, Clone)]
pub struct Remainder {
    pub name: String,
    pub f_remainder: RemainderFn,
}

/// Drift/dispersion evaluator together with the number of independent drivers.
#[derive(Debug, Clone, Copy)]
pub struct Diffusion {
    n_browns: usize,
    terms: DiffusionTerms,
}

impl Diffusion {
    pub fn n_browns(&self) -> usize {
        self.n_browns
    }

    pub fn terms(&self) -> DiffusionTerms {
        self.terms
    }
}

/// Describes where the states of a model live in the state vector.
///
/// The mean part of the vector holds `dim()` components. With
/// [Implementation::Ekf] it is followed by the flattened `dim() x dim()` covariance.
#[derive(Debug, Clone, Default)]
pub struct ModelIndex {
    states_sv: Vec<StateDescriptor>,
    states_inc: Vec<StateDescriptor>,
    states_diff: Vec<DiffState>,
    remainders: Vec<Remainder>,
}

impl ModelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a population-like state variable, clamped to zero when it turns negative.
    pub fn sv(mut self, name: impl Into<String>, offset: usize) -> Self {
        self.states_sv.push(StateDescriptor {
            name: name.into(),
            offset,
        });
        self
    }

    /// Adds an incidence accumulator, reset at observation boundaries.
    pub fn inc(mut self, name: impl Into<String>, offset: usize) -> Self {
        self.states_inc.push(StateDescriptor {
            name: name.into(),
            offset,
        });
        self
    }

    /// Adds a diffusion-modelled component stored without transformation.
    pub fn diff(self, name: impl Into<String>, offset: usize) -> Self {
        self.diff_with_link(name, offset, identity)
    }

    /// Adds a diffusion-modelled component whose terms see `f_inv(x[offset])`.
    pub fn diff_with_link(mut self, name: impl Into<String>, offset: usize, f_inv: Link) -> Self {
        self.states_diff.push(DiffState {
            name: name.into(),
            offset,
            f_inv,
        });
        self
    }

    pub fn remainder(mut self, name: impl Into<String>, f_remainder: RemainderFn) -> Self {
        self.remainders.push(Remainder {
            name: name.into(),
            f_remainder,
        });
        self
    }

    pub fn states_sv(&self) -> &[StateDescriptor] {
        &self.states_sv
    }

    pub fn states_inc(&self) -> &[StateDescriptor] {
        &self.states_inc
    }

    pub fn states_diff(&self) -> &[DiffState] {
        &self.states_diff
    }

    pub fn remainders(&self) -> &[Remainder] {
        &self.remainders
    }

    /// State variables and incidences, the components that must never be negative.
    pub fn sv_inc(&self) -> impl Iterator<Item = &StateDescriptor> {
        self.states_sv.iter().chain(self.states_inc.iter())
    }

    /// Number of components of the mean part of the state vector.
    pub fn dim(&self) -> usize {
        self.states_sv.len() + self.states_inc.len() + self.states_diff.len()
    }

    /// Length of the state buffer required by `implementation`.
    pub fn state_len(&self, implementation: Implementation) -> usize {
        let m = self.dim();
        match implementation {
            Implementation::Ekf => m + m * m,
            _ => m,
        }
    }

    /// Offset of the component called `name`, if any.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.sv_inc()
            .find(|s| s.name == name)
            .map(|s| s.offset)
            .or_else(|| {
                self.states_diff
                    .iter()
                    .find(|s| s.name == name)
                    .map(|s| s.offset)
            })
    }

    /// Column labels for a state buffer of length `len`.
    pub fn column_names(&self, len: usize) -> Vec<String> {
        let mut names: Vec<String> = (0..len).map(|i| format!("x{}", i)).collect();
        let named = self
            .sv_inc()
            .map(|s| (s.offset, &s.name))
            .chain(self.states_diff.iter().map(|s| (s.offset, &s.name)));
        for (offset, name) in named {
            if let Some(slot) = names.get_mut(offset) {
                *slot = name.clone();
            }
        }
        names
    }

    /// Checks that every offset is unique and fits into the mean part of the vector,
    /// and that `len` matches the layout of `implementation`.
    pub fn validate(&self, implementation: Implementation, len: usize) -> Result<(), PredictError> {
        let m = self.dim();
        let mut seen = vec![false; m];
        let offsets = self
            .sv_inc()
            .map(|s| (s.offset, s.name.as_str()))
            .chain(self.states_diff.iter().map(|s| (s.offset, s.name.as_str())));
        for (offset, name) in offsets {
            match seen.get_mut(offset) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(PredictError::Layout(format!(
                        "offset {} of '{}' is used twice",
                        offset, name
                    )))
                }
                None => {
                    return Err(PredictError::Layout(format!(
                        "offset {} of '{}' is outside the {} model states",
                        offset, name, m
                    )))
                }
            }
        }
        let expected = self.state_len(implementation);
        if len != expected {
            return Err(PredictError::Layout(format!(
                "state vector has {} components, {:?} expects {}",
                len, implementation, expected
            )));
        }
        Ok(())
    }
}

/// A model: its [ModelIndex] and the functions the engine drives.
///
/// Only the functions required by the selected predictor need to be present:
/// `rhs` for ODE/EKF, `sde_step` for SDE, `psr_step` for PSR, and `diffusion`
/// whenever diffusion is enabled and the model has diffusion components.
#[derive(Debug, Clone)]
pub struct Model {
    index: ModelIndex,
    rhs: Option<Rhs>,
    sde_step: Option<Step>,
    psr_step: Option<Step>,
    diffusion: Option<Diffusion>,
}

impl Model {
    pub fn new(index: ModelIndex) -> Self {
        Self {
            index,
            rhs: None,
            sde_step: None,
            psr_step: None,
            diffusion: None,
        }
    }

    pub fn with_rhs(mut self, rhs: Rhs) -> Self {
        self.rhs = Some(rhs);
        self
    }

    pub fn with_sde_step(mut self, step: Step) -> Self {
        self.sde_step = Some(step);
        self
    }

    pub fn with_psr_step(mut self, step: Step) -> Self {
        self.psr_step = Some(step);
        self
    }

    pub fn with_diffusion(mut self, n_browns: usize, terms: DiffusionTerms) -> Self {
        self.diffusion = Some(Diffusion { n_browns, terms });
        self
    }

    pub fn index(&self) -> &ModelIndex {
        &self.index
    }

    pub fn rhs(&self) -> Option<Rhs> {
        self.rhs
    }

    pub fn sde_step(&self) -> Option<Step> {
        self.sde_step
    }

    pub fn psr_step(&self) -> Option<Step> {
        self.psr_step
    }

    pub fn diffusion(&self) -> Option<&Diffusion> {
        self.diffusion.as_ref()
    }
}
