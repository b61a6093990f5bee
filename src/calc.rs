use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::Nav;
use crate::simulator::ode::Evolver;

/// Scratch buffers of the diffusion evaluator, sized on first use.
#[derive(Debug, Clone, Default)]
pub(crate) struct DiffusionScratch {
    pub(crate) diffed: Vec<f64>,
    pub(crate) w: Vec<f64>,
    pub(crate) drift: Vec<f64>,
    pub(crate) dispersion: Vec<f64>,
}

impl DiffusionScratch {
    fn resize(&mut self, n_diff: usize, n_browns: usize) {
        self.diffed.resize(n_diff, 0.0);
        self.drift.resize(n_diff, 0.0);
        self.dispersion.resize(n_diff, 0.0);
        self.w.resize(n_browns, 0.0);
    }
}

/// Mutable per-worker state: the adaptive solver, the random number stream and
/// scratch space.
///
/// The solver keeps step history between calls, so a calculator must only ever be
/// driven by one particle at a time. It is `Send`, and the simulation driver hands
/// each worker its own instance.
#[derive(Debug, Clone)]
pub struct Calculator {
    rng: StdRng,
    evolver: Evolver,
    diffusion: DiffusionScratch,
}

impl Calculator {
    pub fn new(nav: &Nav, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            evolver: Evolver::new(nav.solver().clone()),
            diffusion: DiffusionScratch::default(),
        }
    }

    /// Creates one calculator per worker, with consecutive seeds starting at `seed`.
    pub fn many(nav: &Nav, n: usize, seed: u64) -> Vec<Self> {
        (0..n)
            .map(|i| Calculator::new(nav, seed.wrapping_add(i as u64)))
            .collect()
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub(crate) fn evolver_mut(&mut self) -> &mut Evolver {
        &mut self.evolver
    }

    pub(crate) fn diffusion_scratch(
        &mut self,
        n_diff: usize,
        n_browns: usize,
    ) -> (&mut DiffusionScratch, &mut StdRng) {
        self.diffusion.resize(n_diff, n_browns);
        (&mut self.diffusion, &mut self.rng)
    }
}
