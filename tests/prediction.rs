use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_relative_eq;
use rand::Rng;
use rand_distr::StandardNormal;
use ssmpred::*;

// S -> I -> (removed), the removed count being the remainder N - S - I
fn decay_index() -> ModelIndex {
    ModelIndex::new()
        .sv("S", 0)
        .sv("I", 1)
        .remainder("R", |x, p, _t| p[2] - x[0] - x[1])
}

fn decay_model() -> Model {
    Model::new(decay_index()).with_rhs(|_t, y, p, dydt| {
        fetch_params!(p, a, b, _n);
        dydt[0] = -a * y[0];
        dydt[1] = a * y[0] - b * y[1];
    })
}

fn decay_exact(t: f64, a: f64, b: f64, s0: f64, i0: f64) -> (f64, f64) {
    let s = s0 * (-a * t).exp();
    let i = i0 * (-b * t).exp() + a * s0 / (b - a) * ((-a * t).exp() - (-b * t).exp());
    (s, i)
}

#[derive(Debug, Default)]
struct CountingSink {
    warnings: AtomicUsize,
    errors: AtomicUsize,
}

impl DiagnosticSink for CountingSink {
    fn warning(&self, _message: &str) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
    }

    fn error(&self, _message: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn ode_matches_closed_form_over_many_intervals() {
    let model = decay_model();
    let nav = Nav::new(Implementation::Ode).with_dt(0.1);
    let predictor = nav.predictor().unwrap();
    let mut calc = Calculator::new(&nav, 0);
    let par = dvector![0.5, 0.2, 110.0];
    let mut x = StateVector::from_vec(vec![100.0, 10.0], nav.dt());

    for n in 0..10 {
        let (t0, t1) = (n as f64, (n + 1) as f64);
        predictor
            .predict(&mut x, t0, t1, &par, &nav, &model, &mut calc)
            .unwrap();

        let (s, i) = decay_exact(t1, 0.5, 0.2, 100.0, 10.0);
        assert_relative_eq!(x[0], s, max_relative = 1e-5);
        assert_relative_eq!(x[1], i, max_relative = 1e-5);
    }
    // the step size is carried from one interval to the next
    assert!(x.dt() > 0.1);
}

#[test]
fn ekf_propagates_mean_and_covariance() {
    // mean S' = -a S, variance P' = -2 a P + q
    let model = Model::new(ModelIndex::new().sv("S", 0)).with_rhs(|_t, y, p, dydt| {
        fetch_params!(p, a, q);
        dydt[0] = -a * y[0];
        dydt[1] = -2.0 * a * y[1] + q;
    });
    let nav = Nav::new(Implementation::Ekf);
    let mut calc = Calculator::new(&nav, 0);
    let par = dvector![0.3, 2.0];
    let mut x = StateVector::from_vec(vec![50.0, 4.0], nav.dt());
    model.index().validate(Implementation::Ekf, x.len()).unwrap();

    nav.predictor()
        .unwrap()
        .predict(&mut x, 0.0, 2.0, &par, &nav, &model, &mut calc)
        .unwrap();

    let decay = (-2.0 * 0.3 * 2.0f64).exp();
    assert_relative_eq!(x[0], 50.0 * (-0.3 * 2.0f64).exp(), max_relative = 1e-5);
    assert_relative_eq!(
        x[1],
        4.0 * decay + 2.0 / (2.0 * 0.3) * (1.0 - decay),
        max_relative = 1e-5
    );
}

#[test]
fn ekf_reset_keeps_covariance_symmetric() {
    let model = Model::new(ModelIndex::new().sv("S", 0).inc("inc", 1));
    let nav = Nav::new(Implementation::Ekf);
    let mut x = StateVector::from_vec(vec![5.0, 3.0, 4.0, 1.0, 1.0, 9.0], 0.1);

    reset_inc(&mut x, &[1], &nav, &model).unwrap();

    assert_eq!(x.as_slice(), &[5.0, 0.0, 4.0, 0.0, 0.0, 0.0]);
    let cov = x.covariance_mut(2).unwrap();
    assert_eq!(cov.transpose(), cov.clone_owned());
}

#[test]
fn negative_remainder_reports_once() {
    let index = ModelIndex::new()
        .sv("S", 0)
        .remainder("R", |_x, _p, _t| -1.0);
    let model = Model::new(index).with_rhs(|_t, _y, _p, dydt| dydt[0] = 0.0);
    let sink = Arc::new(CountingSink::default());
    let nav = Nav::new(Implementation::Ode)
        .with_print(Print::WARNING)
        .with_sink(sink.clone());
    let mut calc = Calculator::new(&nav, 0);
    let par = V::zeros(0);
    let mut x = StateVector::from_vec(vec![10.0], nav.dt());

    let result = nav
        .predictor()
        .unwrap()
        .predict(&mut x, 0.0, 1.0, &par, &nav, &model, &mut calc);

    assert!(matches!(result, Err(PredictError::NegativeRemainder { .. })));
    assert_eq!(ErrCode::from(&result), ErrCode::REM_SV);
    assert_eq!(sink.warnings.load(Ordering::SeqCst), 1);
    assert_eq!(sink.errors.load(Ordering::SeqCst), 0);
}

#[test]
fn warnings_are_silent_without_print_flag() {
    let index = ModelIndex::new()
        .sv("S", 0)
        .remainder("R", |_x, _p, _t| -1.0);
    let model = Model::new(index);
    let sink = Arc::new(CountingSink::default());
    let nav = Nav::new(Implementation::Ode).with_sink(sink.clone());
    let mut x = StateVector::from_vec(vec![-3.0], 0.1);

    let result = check(&mut x, &V::zeros(0), &nav, &model, 0.0);

    assert!(result.is_err());
    assert_eq!(x[0], 0.0);
    assert_eq!(sink.warnings.load(Ordering::SeqCst), 0);
}

#[test]
fn sanitizer_is_idempotent() {
    let model = Model::new(decay_index());
    let nav = Nav::new(Implementation::Sde);
    let par = dvector![0.5, 0.2, 110.0];
    let mut x = StateVector::from_vec(vec![-4.0, 20.0], 0.1);

    check(&mut x, &par, &nav, &model, 1.0).unwrap();
    let once = x.clone();
    check(&mut x, &par, &nav, &model, 1.0).unwrap();

    assert_eq!(x, once);
    assert_eq!(x.as_slice(), &[0.0, 20.0]);
}

#[test]
fn solver_failure_is_a_prediction_error() {
    let model = Model::new(decay_index()).with_rhs(|_t, _y, _p, dydt| {
        dydt[0] = f64::NAN;
        dydt[1] = 0.0;
    });
    let sink = Arc::new(CountingSink::default());
    let nav = Nav::new(Implementation::Ode)
        .with_print(Print::WARNING)
        .with_sink(sink.clone());
    let mut calc = Calculator::new(&nav, 0);
    let par = dvector![0.5, 0.2, 110.0];
    let mut x = StateVector::from_vec(vec![-1.0, 5.0], nav.dt());

    let result = nav
        .predictor()
        .unwrap()
        .predict(&mut x, 0.0, 1.0, &par, &nav, &model, &mut calc);

    assert!(matches!(result, Err(PredictError::Solver { .. })));
    assert_eq!(ErrCode::from(&result), ErrCode::PRED);
    // the sanitizer did not run: the negative state was not clamped
    assert_eq!(x[0], -1.0);
    assert_eq!(sink.warnings.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_model_function_is_reported() {
    let model = Model::new(decay_index());
    let nav = Nav::new(Implementation::Psr);
    let mut calc = Calculator::new(&nav, 0);
    let mut x = StateVector::from_vec(vec![1.0, 1.0], nav.dt());

    let result = nav.predictor().unwrap().predict(
        &mut x,
        0.0,
        1.0,
        &dvector![0.5, 0.2, 110.0],
        &nav,
        &model,
        &mut calc,
    );

    assert!(matches!(result, Err(PredictError::MissingFunction("psr_step"))));
    assert_eq!(ErrCode::from(&result), ErrCode::CONFIG);
}

#[test]
fn missing_diffusion_terms_are_reported() {
    let model = Model::new(ModelIndex::new().sv("S", 0).diff("beta", 1))
        .with_sde_step(|_x, _t, _p, _noise, _calc| Ok(()));
    let nav = Nav::new(Implementation::Sde)
        .with_noises_off(NoisesOff::NO_DEM_STO | NoisesOff::NO_WHITE_NOISE);
    let predictor = nav.predictor().unwrap();
    assert!(predictor.has_diffusion());
    let mut calc = Calculator::new(&nav, 0);
    let mut x = StateVector::from_vec(vec![10.0, 0.3], nav.dt());

    let result = predictor.predict(&mut x, 0.0, 1.0, &V::zeros(0), &nav, &model, &mut calc);

    assert!(matches!(result, Err(PredictError::MissingFunction("diffusion"))));
    assert_eq!(ErrCode::from(&result), ErrCode::CONFIG);
    assert_eq!(x.as_slice(), &[10.0, 0.3]);
}

#[test]
fn short_state_is_a_layout_error() {
    let nav = Nav::new(Implementation::Ode);
    let mut calc = Calculator::new(&nav, 0);
    let par = dvector![0.5, 0.2, 110.0];
    let mut x = StateVector::from_vec(vec![100.0], nav.dt());

    let result = nav
        .predictor()
        .unwrap()
        .predict(&mut x, 0.0, 1.0, &par, &nav, &decay_model(), &mut calc);

    assert!(matches!(result, Err(PredictError::Layout(_))));
    assert_eq!(x.as_slice(), &[100.0]);

    // the EKF layout also needs the covariance block
    let ekf = Nav::new(Implementation::Ekf);
    let mut x = StateVector::from_vec(vec![100.0, 10.0], ekf.dt());
    let result = ekf
        .predictor()
        .unwrap()
        .predict(&mut x, 0.0, 1.0, &par, &ekf, &decay_model(), &mut calc);
    assert!(matches!(result, Err(PredictError::Layout(_))));
}

// SIR with a stochastic transmission rate: x = [S, I, inc, log_beta]
fn sir_sde_step(
    x: &mut StateVector,
    _t: f64,
    p: &V,
    noise: StepNoise,
    calc: &mut Calculator,
) -> Result<(), PredictError> {
    fetch_params!(p, gamma, n, _sigma);
    let dt = x.dt();
    let beta = x[3].exp();
    let mut infections = beta * x[0] * x[1] / n * dt;
    let mut recoveries = gamma * x[1] * dt;
    if noise.dem_sto {
        let z_inf: f64 = calc.rng().sample(StandardNormal);
        let z_rec: f64 = calc.rng().sample(StandardNormal);
        infections += infections.sqrt() * z_inf;
        recoveries += recoveries.sqrt() * z_rec;
    }
    x[0] -= infections;
    x[1] += infections - recoveries;
    x[2] += infections;
    Ok(())
}

fn sir_sde_model() -> Model {
    let index = ModelIndex::new()
        .sv("S", 0)
        .sv("I", 1)
        .inc("inc", 2)
        .diff_with_link("log_beta", 3, f64::exp);
    Model::new(index)
        .with_sde_step(sir_sde_step)
        .with_diffusion(1, |_diffed, w, _t, p, drift, dispersion| {
            drift[0] = 0.0;
            dispersion[0] = p[2] * w[0];
        })
}

#[test]
fn sde_without_noise_sources_is_plain_euler() {
    let model = sir_sde_model();
    let nav = Nav::new(Implementation::Sde)
        .with_noises_off(NoisesOff::NO_DEM_STO | NoisesOff::NO_DIFF)
        .with_dt(0.25);
    let predictor = nav.predictor().unwrap();
    assert_eq!(predictor, Predictor::SdeNoDemStoNoDiff);

    let mut calc = Calculator::new(&nav, 1);
    let par = dvector![0.1, 1000.0, 0.5];
    let log_beta = 0.4f64.ln();
    let mut x = StateVector::from_vec(vec![990.0, 10.0, 0.0, log_beta], nav.dt());
    predictor
        .predict(&mut x, 0.0, 1.0, &par, &nav, &model, &mut calc)
        .unwrap();

    let (mut s, mut i, mut inc) = (990.0, 10.0, 0.0);
    for _ in 0..4 {
        let infections = 0.4 * s * i / 1000.0 * 0.25;
        let recoveries = 0.1 * i * 0.25;
        s -= infections;
        i += infections - recoveries;
        inc += infections;
    }
    assert_relative_eq!(x[0], s, epsilon = 1e-9);
    assert_relative_eq!(x[1], i, epsilon = 1e-9);
    assert_relative_eq!(x[2], inc, epsilon = 1e-9);
    assert_eq!(x[3], log_beta);
}

#[test]
fn sde_diffusion_is_reproducible() {
    let model = sir_sde_model();
    let nav = Nav::new(Implementation::Sde)
        .with_noises_off(NoisesOff::NO_DEM_STO | NoisesOff::NO_WHITE_NOISE);
    let predictor = nav.predictor().unwrap();
    assert!(predictor.has_diffusion());

    let par = dvector![0.1, 1000.0, 0.5];
    let run = |seed| {
        let mut calc = Calculator::new(&nav, seed);
        let mut x = StateVector::from_vec(vec![990.0, 10.0, 0.0, 0.4f64.ln()], nav.dt());
        predictor
            .predict(&mut x, 0.0, 2.0, &par, &nav, &model, &mut calc)
            .unwrap();
        x
    };

    let first = run(42);
    assert_eq!(first, run(42));
    assert_ne!(first[3], 0.4f64.ln());
    assert_ne!(first, run(43));
}

// SIR with binomial transitions: x = [S, I, inc]
fn sir_psr_step(
    x: &mut StateVector,
    _t: f64,
    p: &V,
    _noise: StepNoise,
    calc: &mut Calculator,
) -> Result<(), PredictError> {
    fetch_params!(p, beta, gamma, n);
    let dt = x.dt();
    let foi = beta * x[1] / n;
    let p_si = [1.0 - (-foi * dt).exp()];
    let p_ir = [1.0 - (-gamma * dt).exp()];
    let mut n_si = [0u32];
    let mut n_ir = [0u32];
    ran_multinomial(calc.rng(), x[0] as u32, &p_si, &mut n_si)?;
    ran_multinomial(calc.rng(), x[1] as u32, &p_ir, &mut n_ir)?;

    let (n_si, n_ir) = (f64::from(n_si[0]), f64::from(n_ir[0]));
    x[0] -= n_si;
    x[1] += n_si - n_ir;
    x[2] += n_si;
    Ok(())
}

fn sir_psr_model() -> Model {
    let index = ModelIndex::new()
        .sv("S", 0)
        .sv("I", 1)
        .inc("inc", 2)
        .remainder("R", |x, p, _t| p[2] - x[0] - x[1]);
    Model::new(index).with_psr_step(sir_psr_step)
}

#[test]
fn psr_conserves_population() {
    let model = sir_psr_model();
    let nav = Nav::new(Implementation::Psr).with_dt(0.1);
    let predictor = nav.predictor().unwrap();
    assert_eq!(predictor, Predictor::Psr);
    let par = dvector![0.6, 0.2, 1000.0];

    let mut calc = Calculator::new(&nav, 7);
    let mut x = StateVector::from_vec(vec![990.0, 10.0, 0.0], nav.dt());
    let mut s_prev = x[0];
    for n in 0..5 {
        reset_inc(&mut x, &[2], &nav, &model).unwrap();
        predictor
            .predict(&mut x, n as f64, (n + 1) as f64, &par, &nav, &model, &mut calc)
            .unwrap();

        for v in x.as_slice() {
            assert_eq!(v.fract(), 0.0);
            assert!(*v >= 0.0);
        }
        assert!(x[0] + x[1] <= 1000.0);
        // every infection of the interval is counted once
        assert_eq!(x[2], s_prev - x[0]);
        s_prev = x[0];
    }
}

#[test]
fn psr_same_seed_same_path() {
    let model = sir_psr_model();
    let nav = Nav::new(Implementation::Psr).with_dt(0.1);
    let predictor = nav.predictor().unwrap();
    let par = dvector![0.6, 0.2, 1000.0];
    let run = |seed| {
        let mut calc = Calculator::new(&nav, seed);
        let mut x = StateVector::from_vec(vec![990.0, 10.0, 0.0], nav.dt());
        predictor
            .predict(&mut x, 0.0, 10.0, &par, &nav, &model, &mut calc)
            .unwrap();
        x
    };
    assert_eq!(run(3), run(3));
}

#[test]
fn multinomial_splits_every_trial() {
    let mut calc = Calculator::new(&Nav::new(Implementation::Psr), 2024);
    let mut out = [0u32; 2];
    ran_multinomial(calc.rng(), 100, &[0.3, 0.7], &mut out).unwrap();
    assert_eq!(out[0] + out[1], 100);

    let mut again = [0u32; 2];
    let mut calc = Calculator::new(&Nav::new(Implementation::Psr), 2024);
    ran_multinomial(calc.rng(), 100, &[0.3, 0.7], &mut again).unwrap();
    assert_eq!(out, again);
}

#[test]
fn corrected_rate_gives_exact_step_probability() {
    // with the corrected rate, 1 - exp(-r dt) equals the naive probability rate * dt
    let (rate, dt) = (0.8, 0.5);
    let corrected = correct_rate(rate, dt);
    assert_relative_eq!(1.0 - (-corrected * dt).exp(), rate * dt, epsilon = 1e-12);
}
