//! Rockwave - chunked elastodynamic wave propagation through voxelized
//! rock volumes.
//!
//! The crate simulates 3D P- and S-wave propagation with a staggered-grid
//! stress-velocity finite-difference scheme, optional Mohr-Coulomb
//! plasticity and scalar damage evolution. Large volumes are processed as
//! a sliding window of Z-chunks that can be offloaded to scratch files,
//! and the kernels run on the CPU (rayon) or the GPU (wgpu) with
//! identical semantics.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Parameter, volume and result types
//! - `compute`: Numerical computation (kernels, chunking, scheduling)
//!
//! # Example
//!
//! ```rust,no_run
//! use rockwave::{
//!     compute::ChunkedSolver,
//!     schema::{SimulationParameters, VolumeInputs},
//! };
//!
//! let params = SimulationParameters::default();
//! let voxels = params.voxel_count();
//! let labels = vec![0u8; voxels];
//! let density = vec![2500.0f32; voxels];
//!
//! let mut solver = ChunkedSolver::new(params, VolumeInputs::new(&labels, &density))
//!     .expect("valid parameters");
//! let results = solver.run();
//!
//! println!("P-wave velocity: {:.0} m/s", results.p_wave_velocity);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{CancelToken, ChunkedSolver, ProgressSink, UpdateSink};
pub use schema::{SimulationParameters, SimulationResults, VolumeInputs, WaveFieldSnapshot};
