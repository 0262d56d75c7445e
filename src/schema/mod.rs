//! Schema module - Parameter, volume and result types for wave simulations.

mod params;
mod results;
mod volume;

pub use params::*;
pub use results::*;
pub use volume::*;
