use crate::config::{Implementation, Nav};
use crate::model::{Model, V};
use crate::state::StateVector;
use crate::PredictError;

/// Repairs negative state variables and verifies the model remainders at time `t`.
///
/// A negative state variable or incidence is numerical noise from a stochastic
/// sub-step: it is clamped to zero and reported as a warning only. A negative
/// remainder means the total population mass is violated; it is reported and
/// returned as [PredictError::NegativeRemainder], at the first offending remainder.
///
/// On a state with nothing to repair this is a no-op.
///
/// # Panics
///
/// If an offset of the model index lies outside `x`. Use
/// [ModelIndex::validate](crate::model::ModelIndex::validate) first on states of
/// unknown origin.
pub fn check(
    x: &mut StateVector,
    par: &V,
    nav: &Nav,
    model: &Model,
    t: f64,
) -> Result<(), PredictError> {
    for state in model.index().sv_inc() {
        let value = &mut x[state.offset];
        if *value < 0.0 {
            *value = 0.0;
            nav.warn(&format!("negative state variable '{}' at t = {}", state.name, t));
        }
    }

    for remainder in model.index().remainders() {
        let value = (remainder.f_remainder)(x, par, t);
        if value < 0.0 {
            nav.warn(&format!("remainder '{}' negative at t = {}", remainder.name, t));
            return Err(PredictError::NegativeRemainder {
                name: remainder.name.clone(),
                t,
                value,
            });
        }
    }

    Ok(())
}

/// Zeroes the incidence accumulators listed in `states_reset` (state offsets), as
/// done at every observation boundary.
///
/// With [Implementation::Ekf] the matching row and column of the covariance block
/// are zeroed too, which keeps the matrix symmetric. Every offset is checked
/// against the model states before anything is zeroed, so on error `x` is
/// unchanged.
pub fn reset_inc(
    x: &mut StateVector,
    states_reset: &[usize],
    nav: &Nav,
    model: &Model,
) -> Result<(), PredictError> {
    let m = model.index().dim();
    let ekf = nav.implementation() == Implementation::Ekf;
    if ekf {
        x.covariance_mut(m)?;
    }

    let bound = m.min(x.len());
    if let Some(&offset) = states_reset.iter().find(|&&offset| offset >= bound) {
        return Err(PredictError::Layout(format!(
            "reset offset {} outside the {} model states",
            offset, bound
        )));
    }

    for &offset in states_reset {
        x[offset] = 0.0;
    }
    if ekf {
        let mut cov = x.covariance_mut(m)?;
        for &offset in states_reset {
            cov.fill_row(offset, 0.0);
            cov.fill_column(offset, 0.0);
        }
    }

    Ok(())
}
