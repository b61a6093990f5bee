pub mod calc;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod simulator;
pub mod state;

pub use crate::calc::Calculator;
pub use crate::config::{Implementation, Nav, NavConfig, Noise, NoisesOff, Print, PrintItem};
pub use crate::diagnostics::{DiagnosticSink, LogSink, NullSink};
pub use crate::model::{
    DiffState, Diffusion, DiffusionTerms, Link, Model, ModelIndex, Remainder, RemainderFn, Rhs,
    StateDescriptor, Step, StepNoise, T, V,
};
pub use crate::simulator::diffusion::compute_diff;
pub use crate::simulator::multinomial::{correct_rate, ran_multinomial};
pub use crate::simulator::ode::{Evolver, OdeSystem, SolverError, SolverSettings, SystemEquations};
pub use crate::simulator::prediction::Predictor;
pub use crate::simulator::sanitize::{check, reset_inc};
pub use crate::simulator::{simulate, ObservationRow, Simulation};
pub use crate::state::StateVector;
pub use error::{ErrCode, PredictError};
pub use nalgebra::dvector;

pub mod prelude {
    pub mod simulator {
        pub use crate::simulator::{
            diffusion::compute_diff,
            multinomial::{correct_rate, ran_multinomial},
            prediction::Predictor,
            sanitize::{check, reset_inc},
            simulate, ObservationRow, Simulation,
        };
    }

    pub use crate::calc::Calculator;
    pub use crate::config::{Implementation, Nav, NoisesOff, Print};
    pub use crate::model::{Model, ModelIndex, StepNoise, V};
    pub use crate::state::StateVector;
    pub use crate::{ErrCode, PredictError};

    /// Binds the model parameters to local names, in order.
    ///
    /// ```ignore
    /// let rhs: Rhs = |_t, y, p, dydt| {
    ///     fetch_params!(p, beta, gamma, n);
    ///     dydt[0] = -beta * y[0] * y[1] / n;
    ///     dydt[1] = beta * y[0] * y[1] / n - gamma * y[1];
    /// };
    /// ```
    #[macro_export]
    macro_rules! fetch_params {
        ($p:expr, $($name:ident),*) => {
            let p = $p;
            let mut idx = 0;
            $(
                #[allow(unused_mut)]
                let mut $name = p[idx];
                idx += 1;
            )*
            let _ = idx; // Consume idx to avoid unused_assignments warning
        };
    }
}
