pub mod diffusion;
pub mod multinomial;
pub mod ode;
pub mod prediction;
pub mod sanitize;
mod simulation;

pub use simulation::{simulate, ObservationRow, Simulation};
