use rand::Rng;
use rand_distr::StandardNormal;

use crate::calc::Calculator;
use crate::model::{Model, V};
use crate::state::StateVector;

/// Applies one Euler–Maruyama increment to every diffusion-modelled component.
///
/// All Brownian drivers are drawn before any component is touched, and the model
/// terms are evaluated once against the pre-update values, so components sharing a
/// driver see the same draw. Each component is then updated in place with
/// `x += dt * drift + sqrt(dt) * dispersion` where `dt` is the particle's sub-step.
///
/// Does nothing if the model has no diffusion components or no diffusion terms.
///
/// # Panics
///
/// If a diffusion offset lies outside `x`.
pub fn compute_diff(x: &mut StateVector, t: f64, par: &V, model: &Model, calc: &mut Calculator) {
    let states = model.index().states_diff();
    let Some(diffusion) = model.diffusion() else {
        return;
    };
    if states.is_empty() {
        return;
    }

    let (scratch, rng) = calc.diffusion_scratch(states.len(), diffusion.n_browns());

    for (diffed, state) in scratch.diffed.iter_mut().zip(states) {
        *diffed = (state.f_inv)(x[state.offset]);
    }
    for w in scratch.w.iter_mut() {
        *w = rng.sample(StandardNormal);
    }

    (diffusion.terms())(
        &scratch.diffed,
        &scratch.w,
        t,
        par,
        &mut scratch.drift,
        &mut scratch.dispersion,
    );

    let dt = x.dt();
    let sqrt_dt = dt.sqrt();
    for (i, state) in states.iter().enumerate() {
        x[state.offset] += dt * scratch.drift[i] + sqrt_dt * scratch.dispersion[i];
    }
}
