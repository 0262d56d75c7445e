//! Stable time-step derivation from the heterogeneous material volume.

use crate::schema::SimulationParameters;

use super::material::{DENSITY_FLOOR, MaterialModel, lame_from_elastic};

/// Default time step when no voxel qualifies and none was configured.
const FALLBACK_DT: f32 = 1e-7;

/// Courant factor for the 3D staggered stencil.
const COURANT: f32 = 0.25;

/// Outcome of the CFL scan.
#[derive(Debug, Clone, Copy)]
pub struct TimeStep {
    /// Time step in seconds, constant for the whole run.
    pub dt: f32,
    /// Maximum P-wave speed found, m/s (0 when no voxel qualified).
    pub max_p_velocity: f32,
}

/// Scan the selected voxels for the fastest P-wave speed and derive a
/// stable `dt`. Falls back to the configured explicit step (or a default)
/// with a warning when nothing qualifies.
pub fn derive_time_step(params: &SimulationParameters, material: &MaterialModel<'_>) -> TimeStep {
    let mut max_vp = 0.0f32;
    for idx in 0..material.voxel_count() {
        if !material.is_selected(idx) {
            continue;
        }
        let rho = material.density(idx);
        if rho <= 0.0 {
            continue;
        }
        let (e_mpa, nu) = material.elastic(idx);
        if e_mpa <= 0.0 || nu <= -1.0 || nu >= 0.5 {
            continue;
        }
        let lame = lame_from_elastic(e_mpa * 1e6, nu);
        let vp = ((lame.lambda + 2.0 * lame.mu) / rho.max(DENSITY_FLOOR)).sqrt();
        if vp > max_vp {
            max_vp = vp;
        }
    }

    if max_vp > 0.0 {
        let dt = COURANT * params.pixel_size / (3.0f32.sqrt() * max_vp);
        log::info!(
            "CFL: max Vp {:.1} m/s over selected materials, dt = {:.3e} s",
            max_vp,
            dt
        );
        TimeStep {
            dt,
            max_p_velocity: max_vp,
        }
    } else {
        let dt = params.time_step_seconds.unwrap_or(FALLBACK_DT);
        log::warn!(
            "CFL: no selected voxel with usable elastic parameters, falling back to dt = {:.3e} s",
            dt
        );
        TimeStep {
            dt,
            max_p_velocity: 0.0,
        }
    }
}
