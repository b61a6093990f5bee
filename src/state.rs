use std::ops::{Index, IndexMut};

use nalgebra::{DMatrixViewMut, DVector};

use crate::PredictError;

/// The latent state of one particle.
///
/// `proj` holds every state component in a single contiguous buffer. For the EKF
/// implementation the mean part is followed by the flattened covariance matrix, see
/// [StateVector::covariance_mut]. `dt` is the integration step size; it is carried
/// from one prediction call to the next so the adaptive solver does not restart
/// from scratch at every observation.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVector {
    proj: DVector<f64>,
    dt: f64,
}

impl StateVector {
    /// Creates a zeroed state of `len` components.
    pub fn new(len: usize, dt: f64) -> Self {
        Self {
            proj: DVector::zeros(len),
            dt,
        }
    }

    /// Creates a zeroed state of `len` components, reporting allocation failure
    /// instead of aborting.
    pub fn try_new(len: usize, dt: f64) -> Result<Self, PredictError> {
        let mut buffer: Vec<f64> = Vec::new();
        buffer.try_reserve_exact(len)?;
        buffer.resize(len, 0.0);
        Ok(Self {
            proj: DVector::from_vec(buffer),
            dt,
        })
    }

    pub fn from_vec(values: Vec<f64>, dt: f64) -> Self {
        Self {
            proj: DVector::from_vec(values),
            dt,
        }
    }

    /// Overwrites `self` with `src`, reusing the buffer when the lengths agree.
    pub fn copy_from(&mut self, src: &StateVector) {
        if self.proj.len() == src.proj.len() {
            self.proj.copy_from(&src.proj);
        } else {
            self.proj = src.proj.clone();
        }
        self.dt = src.dt;
    }

    pub fn len(&self) -> usize {
        self.proj.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proj.is_empty()
    }

    pub fn proj(&self) -> &DVector<f64> {
        &self.proj
    }

    pub fn as_slice(&self) -> &[f64] {
        self.proj.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        self.proj.as_mut_slice()
    }

    pub fn get(&self, i: usize) -> Option<&f64> {
        self.proj.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut f64> {
        self.proj.get_mut(i)
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    /// Borrows the buffer and the step size at the same time, as the ODE solver
    /// updates both in place.
    pub(crate) fn split_mut(&mut self) -> (&mut [f64], &mut f64) {
        (self.proj.as_mut_slice(), &mut self.dt)
    }

    /// View of the `m x m` covariance block stored right after the `m` mean components.
    ///
    /// The buffer is column-major in nalgebra's sense; since the block is symmetric
    /// this is indistinguishable from a row-major layout.
    pub fn covariance_mut(&mut self, m: usize) -> Result<DMatrixViewMut<'_, f64>, PredictError> {
        let len = self.proj.len();
        let block = self
            .proj
            .as_mut_slice()
            .get_mut(m..m + m * m)
            .ok_or_else(|| {
                PredictError::Layout(format!(
                    "a {m}x{m} covariance needs {} components, the state has {}",
                    m + m * m,
                    len
                ))
            })?;
        Ok(DMatrixViewMut::from_slice(block, m, m))
    }
}

impl Index<usize> for StateVector {
    type Output = f64;
    fn index(&self, i: usize) -> &f64 {
        &self.proj[i]
    }
}

impl IndexMut<usize> for StateVector {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.proj[i]
    }
}
