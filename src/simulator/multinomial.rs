//! Discrete-event primitives used by Euler-multinomial stepping routines.

use rand::Rng;
use rand_distr::{Binomial, Distribution};

use crate::PredictError;

/// Splits `n` trials between the outcomes of `p`, writing the counts into `out`.
///
/// The draw is a sequence of binomials: outcome `k` receives
/// `Binomial(n - sum(out[..k]), p[k] / (1 - sum(p[..k])))`. Outcomes with
/// `p[k] <= 0` get no draw and a count of zero. Whatever probability mass is not
/// listed in `p` stays put, so `sum(out) <= n`.
///
/// The probabilities are expected to sum to at most one by construction; this is
/// only checked in debug builds. The order of `p` is significant and is preserved.
///
/// # Errors
///
/// Returns [PredictError::InvalidProbability] if a probability is NaN.
///
/// # Panics
///
/// Panics if `out` is shorter than `p`.
pub fn ran_multinomial<R: Rng + ?Sized>(
    rng: &mut R,
    n: u32,
    p: &[f64],
    out: &mut [u32],
) -> Result<(), PredictError> {
    debug_assert!(
        p.iter().sum::<f64>() <= 1.0 + 1e-9,
        "multinomial probabilities sum to more than one: {:?}",
        p
    );

    let mut sum_p = 0.0;
    let mut sum_n = 0u32;

    for (k, (&pk, nk)) in p.iter().zip(out[..p.len()].iter_mut()).enumerate() {
        if pk.is_nan() {
            return Err(PredictError::InvalidProbability { k, p: pk });
        }
        *nk = if pk > 0.0 {
            let remaining = n - sum_n;
            let conditional = (pk / (1.0 - sum_p)).clamp(0.0, 1.0);
            let binomial = Binomial::new(u64::from(remaining), conditional)
                .map_err(|_| PredictError::InvalidProbability { k, p: pk })?;
            // bounded by `remaining`, which fits in u32
            binomial.sample(rng) as u32
        } else {
            0
        };

        sum_p += pk;
        sum_n += *nk;
    }

    Ok(())
}

/// Corrects an exponential rate for use over a discrete step of length `dt`.
///
/// Applying `rate * dt` as a per-step probability makes waiting times geometric
/// instead of exponential, which understates the event probability once `dt` is
/// comparable to `1 / rate`. The returned rate `-ln(1 - rate * dt) / dt` restores
/// the per-step firing probability. Requires `rate * dt < 1`.
pub fn correct_rate(rate: f64, dt: f64) -> f64 {
    debug_assert!(rate * dt < 1.0, "rate * dt must be < 1, got {}", rate * dt);
    -(-rate * dt).ln_1p() / dt
}
