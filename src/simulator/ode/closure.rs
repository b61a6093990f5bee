use diffsol::{
    ConstantOp, NalgebraContext, NalgebraMat, NalgebraVec, NonLinearOp, OdeEquations,
    OdeEquationsRef, Op, UnitCallable, VectorHost,
};

use super::OdeSystem;
use crate::model::{Rhs, V};

type T = f64;
type DVec = NalgebraVec<T>;
type DMat = NalgebraMat<T>;

/// Binds a model right-hand side to the parameters of the current prediction call.
pub(crate) struct ModelSystem<'a> {
    rhs: Rhs,
    par: &'a V,
}

impl<'a> ModelSystem<'a> {
    pub(crate) fn new(rhs: Rhs, par: &'a V) -> Self {
        Self { rhs, par }
    }
}

impl OdeSystem for ModelSystem<'_> {
    #[inline(always)]
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        (self.rhs)(t, y, self.par, dydt)
    }
}

pub struct SystemRhs<'a, S: OdeSystem + ?Sized> {
    nstates: usize,
    sys: &'a S,
    ctx: NalgebraContext,
}

impl<S: OdeSystem + ?Sized> Op for SystemRhs<'_, S> {
    type T = T;
    type V = DVec;
    type M = DMat;
    type C = NalgebraContext;
    fn context(&self) -> &Self::C {
        &self.ctx
    }
    fn nstates(&self) -> usize {
        self.nstates
    }
    fn nout(&self) -> usize {
        self.nstates
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl<S: OdeSystem + ?Sized> NonLinearOp for SystemRhs<'_, S> {
    fn call_inplace(&self, x: &Self::V, t: Self::T, y: &mut Self::V) {
        self.sys.rhs(t, x.as_slice(), y.as_mut_slice())
    }
}

pub struct SystemInit<'a> {
    init: &'a [f64],
    ctx: NalgebraContext,
}

impl Op for SystemInit<'_> {
    type T = T;
    type V = DVec;
    type M = DMat;
    type C = NalgebraContext;
    fn context(&self) -> &Self::C {
        &self.ctx
    }
    fn nstates(&self) -> usize {
        self.init.len()
    }
    fn nout(&self) -> usize {
        self.init.len()
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl ConstantOp for SystemInit<'_> {
    fn call_inplace(&self, _t: Self::T, y: &mut Self::V) {
        y.as_mut_slice().copy_from_slice(self.init);
    }
}

/// An [OdeSystem] and its state at the start of an integration, in the form the
/// solver consumes.
///
/// The parameters live inside the system, so the equation set itself has none.
pub struct SystemEquations<'a, S: OdeSystem + ?Sized> {
    sys: &'a S,
    y0: &'a [f64],
    ctx: NalgebraContext,
}

impl<'a, S: OdeSystem + ?Sized> SystemEquations<'a, S> {
    pub fn new(sys: &'a S, y0: &'a [f64]) -> Self {
        Self {
            sys,
            y0,
            ctx: NalgebraContext,
        }
    }
}

impl<S: OdeSystem + ?Sized> Op for SystemEquations<'_, S> {
    type T = T;
    type V = DVec;
    type M = DMat;
    type C = NalgebraContext;
    fn context(&self) -> &Self::C {
        &self.ctx
    }
    fn nstates(&self) -> usize {
        self.y0.len()
    }
    fn nout(&self) -> usize {
        self.y0.len()
    }
    fn nparams(&self) -> usize {
        0
    }
}

impl<'b, S: OdeSystem + ?Sized> OdeEquationsRef<'b> for SystemEquations<'_, S> {
    type Rhs = SystemRhs<'b, S>;
    type Mass = UnitCallable<DMat>;
    type Init = SystemInit<'b>;
    type Root = UnitCallable<DMat>;
    type Out = UnitCallable<DMat>;
}

impl<S: OdeSystem + ?Sized> OdeEquations for SystemEquations<'_, S> {
    fn rhs(&self) -> SystemRhs<'_, S> {
        SystemRhs {
            nstates: self.y0.len(),
            sys: self.sys,
            ctx: self.ctx.clone(),
        }
    }

    fn mass(&self) -> Option<UnitCallable<DMat>> {
        None
    }

    fn root(&self) -> Option<UnitCallable<DMat>> {
        None
    }

    fn out(&self) -> Option<UnitCallable<DMat>> {
        None
    }

    fn init(&self) -> SystemInit<'_> {
        SystemInit {
            init: self.y0,
            ctx: self.ctx.clone(),
        }
    }

    fn set_params(&mut self, _p: &DVec) {}

    fn get_params(&self, _p: &mut DVec) {}
}
