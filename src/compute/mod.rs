//! Compute module - Numerical kernels, chunking and scheduling for
//! elastodynamic wave propagation.

mod arrival;
mod cfl;
mod chunk;
mod halo;
mod kernel;
mod material;
mod monitor;
mod solver;
mod source;
mod stress;
mod velocity;

pub mod gpu;

pub use arrival::*;
pub use cfl::*;
pub use chunk::*;
pub use halo::*;
pub use kernel::*;
pub use material::*;
pub use monitor::*;
pub use solver::*;
pub use source::*;
pub use stress::*;
pub use velocity::*;
