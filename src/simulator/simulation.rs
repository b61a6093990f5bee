use std::io::Write;

use ndarray::{s, Array2, Array3, ArrayView1, Axis};
use rayon::prelude::*;

use crate::calc::Calculator;
use crate::config::{Nav, Print};
use crate::error::ErrCode;
use crate::model::{Model, V};
use crate::simulator::sanitize::reset_inc;
use crate::state::StateVector;
use crate::PredictError;

/// An observation instant and the incidence accumulators reset when it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRow {
    pub time: f64,
    /// Offsets of the incidences accumulated over the interval ending at `time`.
    pub states_reset: Vec<usize>,
}

impl ObservationRow {
    pub fn new(time: f64, states_reset: Vec<usize>) -> Self {
        Self { time, states_reset }
    }
}

/// The states of every particle at every observation time.
#[derive(Debug, Clone)]
pub struct Simulation {
    times: Vec<f64>,
    columns: Vec<String>,
    /// particle x observation x state component
    trajectories: Array3<f64>,
    cum_status: Vec<ErrCode>,
}

impl Simulation {
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn trajectories(&self) -> &Array3<f64> {
        &self.trajectories
    }

    /// Status of each particle, OR-accumulated over the whole run.
    pub fn cum_status(&self) -> &[ErrCode] {
        &self.cum_status
    }

    pub fn nparticles(&self) -> usize {
        self.cum_status.len()
    }

    /// Mean state across particles at each observation time (observation x state).
    pub fn hat(&self) -> Option<Array2<f64>> {
        self.trajectories.mean_axis(Axis(0))
    }

    /// Writes one CSV record per particle and observation time.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), PredictError> {
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header = vec!["particle".to_string(), "time".to_string()];
        header.extend(self.columns.iter().cloned());
        wtr.write_record(&header)?;

        for (j, particle) in self.trajectories.axis_iter(Axis(0)).enumerate() {
            for (time, row) in self.times.iter().zip(particle.axis_iter(Axis(0))) {
                let mut record = Vec::with_capacity(row.len() + 2);
                record.push(j.to_string());
                record.push(time.to_string());
                record.extend(row.iter().map(|v| v.to_string()));
                wtr.write_record(&record)?;
            }
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

/// Simulates `nparticles` independent copies of `x0` through `rows`.
///
/// For every observation row each particle has its listed incidences reset and is
/// predicted from the previous observation time (0 for the first row) to the row
/// time. Particles run in parallel, each with its own [Calculator] seeded from
/// `seed + j`, so a run is reproducible for a given seed. A failed prediction does
/// not stop the run: its status is OR-ed into the particle's
/// [cum_status](Simulation::cum_status) and the particle keeps going.
///
/// # Errors
///
/// Configuration problems (no predictor for the configuration, a state vector that
/// does not match the model layout, invalid reset offsets) abort the run.
pub fn simulate(
    model: &Model,
    nav: &Nav,
    par: &V,
    x0: &StateVector,
    rows: &[ObservationRow],
    nparticles: usize,
    seed: u64,
) -> Result<Simulation, PredictError> {
    let predictor = nav.predictor()?;
    model.index().validate(nav.implementation(), x0.len())?;

    let mut particles: Vec<StateVector> = vec![x0.clone(); nparticles];
    let mut calcs = Calculator::many(nav, nparticles, seed);
    let mut cum_status = vec![ErrCode::SUCCESS; nparticles];
    let mut trajectories = Array3::<f64>::zeros((nparticles, rows.len(), x0.len()));

    let mut t0 = 0.0;
    for (n, row) in rows.iter().enumerate() {
        let t1 = row.time;

        particles
            .par_iter_mut()
            .zip(calcs.par_iter_mut())
            .zip(cum_status.par_iter_mut())
            .enumerate()
            .try_for_each(|(j, ((x, calc), status))| -> Result<(), PredictError> {
                reset_inc(x, &row.states_reset, nav, model)?;
                let result = predictor.predict(x, t0, t1, par, nav, model, calc);
                if let Err(err) = &result {
                    nav.error(&format!("particle {} failed over [{}, {}]: {}", j, t0, t1, err));
                }
                *status |= ErrCode::from(&result);
                Ok(())
            })?;

        for (j, x) in particles.iter().enumerate() {
            trajectories
                .slice_mut(s![j, n, ..])
                .assign(&ArrayView1::from(x.as_slice()));
        }

        if nav.print().contains(Print::X) {
            for (j, x) in particles.iter().enumerate() {
                log::info!(target: "ssmpred", "t = {} particle {}: {:?}", t1, j, x.as_slice());
            }
        }
        if nav.print().contains(Print::HAT) {
            if let Some(hat) = trajectories.slice(s![.., n, ..]).mean_axis(Axis(0)) {
                log::info!(target: "ssmpred", "t = {} hat: {}", t1, hat);
            }
        }

        t0 = t1;
    }

    Ok(Simulation {
        times: rows.iter().map(|r| r.time).collect(),
        columns: model.index().column_names(x0.len()),
        trajectories,
        cum_status,
    })
}
