//! Adaptive explicit Runge–Kutta integration on top of `diffsol`.
//!
//! [Evolver] advances an [OdeSystem] from the caller's time cursor to a target time
//! with diffsol's Tsitouras 5(4) pair. It keeps the solver settings and step
//! statistics between calls, which is why it lives in a per-worker
//! [Calculator](crate::calc::Calculator). The caller owns the time cursor and the
//! step size: both are passed by mutable reference and updated in place, so the
//! step size found on one interval is reused on the next.

mod closure;

pub(crate) use closure::ModelSystem;
pub use closure::SystemEquations;

use diffsol::error::{DiffsolError, OdeSolverError};
use diffsol::{NalgebraMat, OdeBuilder, OdeSolverMethod, OdeSolverStopReason, VectorHost};
use serde::{Deserialize, Serialize};
use thiserror::Error;

type M = NalgebraMat<f64>;

/// Right-hand side of an ODE system `dy/dt = f(t, y)`.
pub trait OdeSystem {
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]);
}

/// Tolerances and limits of the adaptive solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSettings {
    pub rtol: f64,
    pub atol: f64,
    /// Smallest step the solver may shrink to before giving up.
    pub h_min: f64,
    /// Consecutive rejected attempts allowed for a single step.
    pub max_rejections: usize,
    /// Accepted steps allowed between two resets.
    pub max_steps: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-8,
            h_min: 1e-12,
            max_rejections: 64,
            max_steps: 1_000_000,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("invalid step size {h}")]
    InvalidStep { h: f64 },
    #[error("step size fell below the minimum at t = {t}")]
    StepSizeTooSmall { t: f64 },
    #[error("too many consecutive rejected steps at t = {t}")]
    TooManyRejections { t: f64 },
    #[error("more than {max_steps} steps since the last reset")]
    TooManySteps { max_steps: usize },
    #[error("integrator failure: {0}")]
    Integrator(String),
}

impl From<DiffsolError> for SolverError {
    fn from(err: DiffsolError) -> Self {
        match err {
            DiffsolError::OdeSolverError(OdeSolverError::StepSizeTooSmall { time }) => {
                SolverError::StepSizeTooSmall { t: time }
            }
            DiffsolError::OdeSolverError(OdeSolverError::TooManyErrorTestFailures { time }) => {
                SolverError::TooManyRejections { t: time }
            }
            err => SolverError::Integrator(err.to_string()),
        }
    }
}

/// Stateful adaptive integrator.
#[derive(Debug, Clone)]
pub struct Evolver {
    settings: SolverSettings,
    count: usize,
    failed_steps: usize,
    last_step: f64,
}

impl Evolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            count: 0,
            failed_steps: 0,
            last_step: 0.0,
        }
    }

    /// Forgets the step statistics, to be called at the start of every interval.
    pub fn reset(&mut self) {
        self.count = 0;
        self.failed_steps = 0;
        self.last_step = 0.0;
    }

    /// Accepted steps since the last reset.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Rejected attempts since the last reset.
    pub fn failed_steps(&self) -> usize {
        self.failed_steps
    }

    /// Size of the last accepted step.
    pub fn last_step(&self) -> f64 {
        self.last_step
    }

    /// Advances `y` from `*t` to `t1`, never stepping past `t1`.
    ///
    /// The first step is attempted with `*h`. On success `*t == t1`, `y` holds the
    /// state at `t1` and `*h` the step size proposed by the last step that was not
    /// shortened to land on `t1`. On failure `y` and `*t` hold the last accepted
    /// step.
    pub fn apply<S: OdeSystem + ?Sized>(
        &mut self,
        sys: &S,
        t: &mut f64,
        t1: f64,
        h: &mut f64,
        y: &mut [f64],
    ) -> Result<(), SolverError> {
        if !(h.is_finite() && *h > 0.0) {
            return Err(SolverError::InvalidStep { h: *h });
        }
        if t1 <= *t {
            return Ok(());
        }

        let y0 = y.to_vec();
        let problem = OdeBuilder::<M>::new()
            .t0(*t)
            .h0(*h)
            .rtol(self.settings.rtol)
            .atol([self.settings.atol])
            .build_from_eqn(SystemEquations::new(sys, &y0))?;
        let mut solver = problem.tsit45()?;
        *solver.state_mut().h = *h;
        let config = solver.config_mut();
        config.minimum_timestep = self.settings.h_min;
        config.maximum_error_test_failures = self.settings.max_rejections;

        let outcome = match solver.set_stop_time(t1) {
            Ok(()) => loop {
                if self.count >= self.settings.max_steps {
                    break Err(SolverError::TooManySteps {
                        max_steps: self.settings.max_steps,
                    });
                }
                let before = solver.state().t;
                match solver.step() {
                    Ok(OdeSolverStopReason::InternalTimestep) => {
                        self.count += 1;
                        self.last_step = solver.state().t - before;
                        *h = solver.state().h;
                    }
                    // a step shortened to land on t1 says nothing about the step
                    // size the solution allows, keep the carried one
                    Ok(OdeSolverStopReason::TstopReached) => {
                        self.count += 1;
                        self.last_step = solver.state().t - before;
                        break Ok(());
                    }
                    Ok(OdeSolverStopReason::RootFound(_)) => continue,
                    Err(err) => break Err(SolverError::from(err)),
                }
            },
            Err(DiffsolError::OdeSolverError(OdeSolverError::StopTimeAtCurrentTime)) => Ok(()),
            Err(err) => Err(SolverError::from(err)),
        };
        self.failed_steps += solver.get_statistics().number_of_error_test_failures;

        let state = solver.state();
        y.copy_from_slice(state.y.as_slice());
        *t = if outcome.is_ok() { t1 } else { state.t };
        outcome
    }
}
