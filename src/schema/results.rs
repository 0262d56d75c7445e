//! Output types produced by the solver at end of run.

use serde::{Deserialize, Serialize};

/// Downsampled velocity field capture at one time step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveFieldSnapshot {
    /// Step at which the snapshot was taken (1-based).
    pub step: u32,
    /// Simulated time in seconds (`step * dt`).
    pub time_seconds: f32,
    /// Downsampled grid width.
    pub width: usize,
    /// Downsampled grid height.
    pub height: usize,
    /// Downsampled grid depth.
    pub depth: usize,
    /// Voxel stride used for downsampling.
    pub stride: usize,
    pub vx: Vec<f32>,
    pub vy: Vec<f32>,
    pub vz: Vec<f32>,
}

/// Results of a completed (or cancelled) run.
///
/// Peak fields and damage are full `W*H*D` volumes in the same x-major
/// layout as the inputs. Arrival times are in steps; zero means the
/// corresponding first-break was never observed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationResults {
    /// Measured P-wave velocity in m/s (0 if no P arrival).
    pub p_wave_velocity: f32,
    /// Measured S-wave velocity in m/s (0 if no S arrival).
    pub s_wave_velocity: f32,
    /// Vp/Vs ratio (0 when Vs is 0).
    pub vp_vs_ratio: f32,
    /// P first-break step.
    pub p_wave_travel_time_steps: u32,
    /// S first-break step.
    pub s_wave_travel_time_steps: u32,
    /// Steps actually executed (may be short of the request on cancel).
    pub total_time_steps: u32,
    /// Wall-clock compute time in seconds.
    pub computation_time_seconds: f64,
    /// Per-voxel peak |vx| over all steps.
    pub wave_field_vx: Vec<f32>,
    /// Per-voxel peak |vy| over all steps.
    pub wave_field_vy: Vec<f32>,
    /// Per-voxel peak |vz| over all steps.
    pub wave_field_vz: Vec<f32>,
    /// Per-voxel scalar damage in [0,1].
    pub damage_field: Vec<f32>,
    /// Captured snapshots, oldest first (empty when disabled).
    pub snapshots: Vec<WaveFieldSnapshot>,
}
