use crate::calc::Calculator;
use crate::config::{Implementation, Nav, NoisesOff};
use crate::model::{Model, Step, StepNoise, V};
use crate::simulator::diffusion::compute_diff;
use crate::simulator::ode::ModelSystem;
use crate::simulator::sanitize::check;
use crate::state::StateVector;
use crate::PredictError;

const DEM: u8 = NoisesOff::NO_DEM_STO.bits();
const WN: u8 = NoisesOff::NO_WHITE_NOISE.bits();
const DIFF: u8 = NoisesOff::NO_DIFF.bits();
const DEM_WN: u8 = DEM | WN;
const DEM_DIFF: u8 = DEM | DIFF;
const WN_DIFF: u8 = WN | DIFF;
const DEM_WN_DIFF: u8 = DEM | WN | DIFF;

/// The prediction function of a run: how a state vector is advanced from one
/// observation time to the next.
///
/// Resolved once from the run configuration with [Predictor::select] (or
/// [Nav::predictor]) and reused for every particle and every interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predictor {
    /// Adaptive ODE integration of the model right-hand side. Also used for EKF,
    /// whose right-hand side propagates the covariance as well.
    Ode,
    /// SDE stepping with every noise source on.
    SdeFull,
    SdeNoDemSto,
    SdeNoWhiteNoise,
    SdeNoDiff,
    SdeNoDemStoNoWhiteNoise,
    SdeNoDemStoNoDiff,
    SdeNoWhiteNoiseNoDiff,
    /// Euler-multinomial stepping followed by diffusion.
    Psr,
    /// Euler-multinomial stepping without diffusion.
    PsrNoDiff,
}

#[derive(Debug, Clone, Copy)]
enum Stepper {
    Sde,
    Psr,
}

#[derive(Debug, Clone, Copy)]
enum Scheme {
    Ode,
    Stepping {
        stepper: Stepper,
        noise: StepNoise,
        diffusion: bool,
    },
}

impl Predictor {
    /// Selects the prediction function for an implementation and a set of disabled
    /// noise sources.
    ///
    /// For SDE the mask must match one of the eight combinations exactly; with every
    /// source off the model is deterministic and the ODE predictor is returned. PSR
    /// only looks at diffusion, white noise being handled by the model step. Returns
    /// `None` when the mask carries bits outside the known noise sources, which
    /// callers must treat as a configuration error.
    pub fn select(implementation: Implementation, noises_off: NoisesOff) -> Option<Predictor> {
        if noises_off.bits() & !NoisesOff::ALL.bits() != 0 {
            return None;
        }

        match implementation {
            Implementation::Ode | Implementation::Ekf => Some(Predictor::Ode),
            Implementation::Sde => match noises_off.bits() {
                0 => Some(Predictor::SdeFull),
                DEM => Some(Predictor::SdeNoDemSto),
                WN => Some(Predictor::SdeNoWhiteNoise),
                DIFF => Some(Predictor::SdeNoDiff),
                DEM_WN => Some(Predictor::SdeNoDemStoNoWhiteNoise),
                DEM_DIFF => Some(Predictor::SdeNoDemStoNoDiff),
                WN_DIFF => Some(Predictor::SdeNoWhiteNoiseNoDiff),
                DEM_WN_DIFF => Some(Predictor::Ode),
                _ => None,
            },
            Implementation::Psr => {
                if noises_off.contains(NoisesOff::NO_DIFF) {
                    Some(Predictor::PsrNoDiff)
                } else {
                    Some(Predictor::Psr)
                }
            }
        }
    }

    fn scheme(self, nav: &Nav) -> Scheme {
        let sde = |dem_sto, white_noise, diffusion| Scheme::Stepping {
            stepper: Stepper::Sde,
            noise: StepNoise {
                dem_sto,
                white_noise,
            },
            diffusion,
        };
        let psr = |diffusion| Scheme::Stepping {
            stepper: Stepper::Psr,
            noise: StepNoise {
                dem_sto: true,
                white_noise: !nav.noises_off().contains(NoisesOff::NO_WHITE_NOISE),
            },
            diffusion,
        };

        match self {
            Predictor::Ode => Scheme::Ode,
            Predictor::SdeFull => sde(true, true, true),
            Predictor::SdeNoDemSto => sde(false, true, true),
            Predictor::SdeNoWhiteNoise => sde(true, false, true),
            Predictor::SdeNoDiff => sde(true, true, false),
            Predictor::SdeNoDemStoNoWhiteNoise => sde(false, false, true),
            Predictor::SdeNoDemStoNoDiff => sde(false, true, false),
            Predictor::SdeNoWhiteNoiseNoDiff => sde(true, false, false),
            Predictor::Psr => psr(true),
            Predictor::PsrNoDiff => psr(false),
        }
    }

    /// Whether the predictor applies the diffusion evaluator after every sub-step.
    pub fn has_diffusion(self) -> bool {
        matches!(
            self,
            Predictor::SdeFull
                | Predictor::SdeNoDemSto
                | Predictor::SdeNoWhiteNoise
                | Predictor::SdeNoDemStoNoWhiteNoise
                | Predictor::Psr
        )
    }

    /// Advances `x` from `t0` to `t1`, then sanitizes it at `t1`.
    ///
    /// The ODE predictor hands the whole interval to the adaptive solver, carrying
    /// the step size in `x.dt()`. Stepping predictors repeat the model sub-step (and
    /// the diffusion evaluator when enabled) while `t < t1`, advancing `t` by the
    /// particle's current `dt` after each sub-step.
    ///
    /// # Errors
    ///
    /// - [PredictError::Solver] if the ODE solver fails; the state is left as the
    ///   solver last accepted it and is not sanitized.
    /// - [PredictError::NegativeRemainder] if a remainder is negative at `t1`.
    /// - [PredictError::MissingFunction] if the model lacks the function the
    ///   predictor needs, including diffusion terms when diffusion is enabled and
    ///   the model has diffusion components.
    /// - [PredictError::Layout] if `x` does not match the model layout.
    #[allow(clippy::too_many_arguments)]
    pub fn predict(
        self,
        x: &mut StateVector,
        t0: f64,
        t1: f64,
        par: &V,
        nav: &Nav,
        model: &Model,
        calc: &mut Calculator,
    ) -> Result<(), PredictError> {
        model.index().validate(nav.implementation(), x.len())?;

        match self.scheme(nav) {
            Scheme::Ode => predict_ode(x, t0, t1, par, nav, model, calc),
            Scheme::Stepping {
                stepper,
                noise,
                diffusion,
            } => {
                let step = match stepper {
                    Stepper::Sde => model.sde_step().ok_or(PredictError::MissingFunction("sde_step")),
                    Stepper::Psr => model.psr_step().ok_or(PredictError::MissingFunction("psr_step")),
                }?;
                if diffusion
                    && model.diffusion().is_none()
                    && !model.index().states_diff().is_empty()
                {
                    return Err(PredictError::MissingFunction("diffusion"));
                }
                predict_steps(x, t0, t1, par, nav, model, calc, step, noise, diffusion)
            }
        }
    }
}

fn predict_ode(
    x: &mut StateVector,
    t0: f64,
    t1: f64,
    par: &V,
    nav: &Nav,
    model: &Model,
    calc: &mut Calculator,
) -> Result<(), PredictError> {
    let rhs = model.rhs().ok_or(PredictError::MissingFunction("rhs"))?;
    let system = ModelSystem::new(rhs, par);
    let evolver = calc.evolver_mut();
    evolver.reset();

    let mut t = t0;
    let (y, h) = x.split_mut();
    while t < t1 {
        if let Err(source) = evolver.apply(&system, &mut t, t1, h, y) {
            nav.warn(&format!("ODE solver error: {}", source));
            return Err(PredictError::Solver { t, source });
        }
    }

    check(x, par, nav, model, t1)
}

#[allow(clippy::too_many_arguments)]
fn predict_steps(
    x: &mut StateVector,
    t0: f64,
    t1: f64,
    par: &V,
    nav: &Nav,
    model: &Model,
    calc: &mut Calculator,
    step: Step,
    noise: StepNoise,
    diffusion: bool,
) -> Result<(), PredictError> {
    let mut t = t0;
    while t < t1 {
        debug_assert!(x.dt() > 0.0, "sub-step size must be positive, got {}", x.dt());
        step(x, t, par, noise, calc)?;
        if diffusion {
            compute_diff(x, t, par, model, calc);
        }
        t += x.dt();
    }

    check(x, par, nav, model, t1)
}
