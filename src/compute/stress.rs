//! Stress half-step: constitutive update from velocity gradients plus the
//! Drucker-Prager return map and scalar damage accumulation.
//!
//! Staggered-grid convention: the stress update takes backward (lower
//! neighbor) differences of the velocities. Stresses and damage are only
//! written at the voxel itself, so the pass parallelizes over Z planes.

use rayon::prelude::*;

use crate::schema::SimulationParameters;

use super::chunk::ChunkFields;
use super::material::MaterialModel;
use super::monitor::CancelToken;

/// Damage accumulation rate on yield, 1/s.
pub const DAMAGE_RATE: f32 = 0.2;

/// Guard against division by zero in the yield evaluation.
const YIELD_EPSILON: f32 = 1e-6;

/// Precomputed Drucker-Prager yield surface constants.
#[derive(Debug, Clone, Copy)]
pub struct YieldModel {
    pub use_plastic: bool,
    pub use_brittle: bool,
    /// Confining pressure in Pa.
    pub confining_pa: f32,
    /// Cohesion in Pa.
    pub cohesion_pa: f32,
    /// `sin(phi) / sqrt(3)`.
    pub pressure_coefficient: f32,
    /// `cohesion * cos(phi) / sqrt(3)`.
    pub cohesion_term: f32,
}

impl YieldModel {
    pub fn from_params(params: &SimulationParameters) -> Self {
        let phi = params.failure_angle_deg.to_radians();
        let cohesion_pa = params.cohesion_mpa * 1e6;
        let sqrt3 = 3.0f32.sqrt();
        Self {
            use_plastic: params.use_plastic_model,
            use_brittle: params.use_brittle_model,
            confining_pa: params.confining_pressure_mpa * 1e6,
            cohesion_pa,
            pressure_coefficient: phi.sin() / sqrt3,
            cohesion_term: cohesion_pa * phi.cos() / sqrt3,
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.use_plastic || self.use_brittle
    }
}

/// One stress half-step over a chunk's interior.
///
/// `chunk_start_z` maps local planes to global material coordinates. The
/// caller injects the source term into the stress arrays beforehand.
#[allow(clippy::too_many_arguments)]
pub fn stress_pass_cpu(
    fields: &mut ChunkFields,
    material: &MaterialModel<'_>,
    width: usize,
    height: usize,
    chunk_start_z: usize,
    chunk_depth: usize,
    dt: f32,
    dx: f32,
    yield_model: &YieldModel,
    cancel: &CancelToken,
) {
    let plane = width * height;
    let inv_dx = 1.0 / dx;
    let interior_top = chunk_depth - 2;

    let ChunkFields {
        vx,
        vy,
        vz,
        sxx,
        syy,
        szz,
        sxy,
        sxz,
        syz,
        damage,
        ..
    } = fields;
    let (vx, vy, vz) = (vx.as_slice(), vy.as_slice(), vz.as_slice());

    sxx[plane..]
        .par_chunks_mut(plane)
        .zip(syy[plane..].par_chunks_mut(plane))
        .zip(szz[plane..].par_chunks_mut(plane))
        .zip(sxy[plane..].par_chunks_mut(plane))
        .zip(sxz[plane..].par_chunks_mut(plane))
        .zip(syz[plane..].par_chunks_mut(plane))
        .zip(damage[plane..].par_chunks_mut(plane))
        .enumerate()
        .for_each(
            |(i, ((((((sxx_p, syy_p), szz_p), sxy_p), sxz_p), syz_p), dmg_p))| {
                let lz = i + 1;
                if lz > interior_top || cancel.is_cancelled() {
                    return;
                }
                let z_base = lz * plane;
                let g_base = (chunk_start_z + lz) * plane;

                for y in 1..height - 1 {
                    for x in 1..width - 1 {
                        let p = y * width + x;
                        let g = g_base + p;
                        if !material.is_selected(g) || material.density(g) <= 0.0 {
                            continue;
                        }
                        let Some(lame) = material.lame(g) else {
                            continue;
                        };

                        let idx = z_base + p;
                        // Backward differences (lower neighbor per axis).
                        let dvx_dx = (vx[idx] - vx[idx - 1]) * inv_dx;
                        let dvy_dy = (vy[idx] - vy[idx - width]) * inv_dx;
                        let dvz_dz = (vz[idx] - vz[idx - plane]) * inv_dx;
                        let dvx_dy = (vx[idx] - vx[idx - width]) * inv_dx;
                        let dvx_dz = (vx[idx] - vx[idx - plane]) * inv_dx;
                        let dvy_dx = (vy[idx] - vy[idx - 1]) * inv_dx;
                        let dvy_dz = (vy[idx] - vy[idx - plane]) * inv_dx;
                        let dvz_dx = (vz[idx] - vz[idx - 1]) * inv_dx;
                        let dvz_dy = (vz[idx] - vz[idx - width]) * inv_dx;

                        let e_vol = dvx_dx + dvy_dy + dvz_dz;
                        let soften = 1.0 - 0.9 * dmg_p[p];
                        let lam_e = lame.lambda * e_vol;

                        sxx_p[p] += dt * soften * (lam_e + 2.0 * lame.mu * dvx_dx);
                        syy_p[p] += dt * soften * (lam_e + 2.0 * lame.mu * dvy_dy);
                        szz_p[p] += dt * soften * (lam_e + 2.0 * lame.mu * dvz_dz);
                        sxy_p[p] += dt * soften * lame.mu * (dvx_dy + dvy_dx);
                        sxz_p[p] += dt * soften * lame.mu * (dvx_dz + dvz_dx);
                        syz_p[p] += dt * soften * lame.mu * (dvy_dz + dvz_dy);

                        if yield_model.enabled() {
                            return_map(
                                &mut sxx_p[p],
                                &mut syy_p[p],
                                &mut szz_p[p],
                                &mut sxy_p[p],
                                &mut sxz_p[p],
                                &mut syz_p[p],
                                &mut dmg_p[p],
                                dt,
                                yield_model,
                            );
                        }
                    }
                }
            },
        );
}

/// Drucker-Prager yield check with brittle damage growth and plastic
/// deviator scaling.
#[allow(clippy::too_many_arguments)]
#[inline]
fn return_map(
    sxx: &mut f32,
    syy: &mut f32,
    szz: &mut f32,
    sxy: &mut f32,
    sxz: &mut f32,
    syz: &mut f32,
    damage: &mut f32,
    dt: f32,
    model: &YieldModel,
) {
    let mean = (*sxx + *syy + *szz) / 3.0 - model.confining_pa;
    let dev_xx = *sxx - mean;
    let dev_yy = *syy - mean;
    let dev_zz = *szz - mean;
    let j2 = 0.5 * (dev_xx * dev_xx + dev_yy * dev_yy + dev_zz * dev_zz)
        + *sxy * *sxy
        + *sxz * *sxz
        + *syz * *syz;
    let sqrt_j2 = j2.sqrt();
    let f = sqrt_j2 + model.pressure_coefficient * mean - model.cohesion_term;
    if f <= 0.0 {
        return;
    }

    if model.use_brittle {
        *damage =
            (*damage + dt * DAMAGE_RATE * f / (model.cohesion_pa + YIELD_EPSILON)).clamp(0.0, 1.0);
    }

    if model.use_plastic {
        let r = (model.cohesion_term - model.pressure_coefficient * mean)
            / (sqrt_j2 + YIELD_EPSILON);
        if r < 1.0 {
            *sxx = dev_xx * r + mean;
            *syy = dev_yy * r + mean;
            *szz = dev_zz * r + mean;
            *sxy *= r;
            *sxz *= r;
            *syz *= r;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SimulationParameters, VolumeInputs, voxel_index};

    const N: usize = 8;

    fn params() -> SimulationParameters {
        SimulationParameters {
            width: N,
            height: N,
            depth: N,
            youngs_modulus_mpa: 30_000.0,
            poisson_ratio: 0.25,
            ..Default::default()
        }
    }

    fn run_pass(
        fields: &mut ChunkFields,
        params: &SimulationParameters,
        labels: &[u8],
        density: &[f32],
        dt: f32,
    ) {
        let volume = VolumeInputs::new(labels, density);
        let material = MaterialModel::new(params, &volume);
        let yield_model = YieldModel::from_params(params);
        stress_pass_cpu(
            fields,
            &material,
            N,
            N,
            0,
            N,
            dt,
            params.pixel_size,
            &yield_model,
            &CancelToken::new(),
        );
    }

    #[test]
    fn test_uniform_x_gradient_loads_normal_stresses() {
        let params = params();
        let labels = vec![0u8; N * N * N];
        let density = vec![2500.0f32; N * N * N];
        let mut fields = ChunkFields::zeroed(N * N * N);
        // vx = x * dx ramp: dvx/dx = 1 everywhere, all other gradients zero
        for z in 0..N {
            for y in 0..N {
                for x in 0..N {
                    fields.vx[voxel_index(x, y, z, N, N)] = x as f32 * params.pixel_size;
                }
            }
        }
        let dt = 1e-8;
        run_pass(&mut fields, &params, &labels, &density, dt);

        // lambda = mu = 12 GPa at E = 30 GPa, nu = 0.25
        let lam = 12e9f32;
        let mu = 12e9f32;
        let idx = voxel_index(3, 3, 3, N, N);
        let expected_xx = dt * (lam + 2.0 * mu);
        let expected_yy = dt * lam;
        assert!((fields.sxx[idx] - expected_xx).abs() / expected_xx < 1e-5);
        assert!((fields.syy[idx] - expected_yy).abs() / expected_yy < 1e-5);
        assert_eq!(fields.sxy[idx], 0.0);
    }

    #[test]
    fn test_boundary_voxels_untouched() {
        let params = params();
        let labels = vec![0u8; N * N * N];
        let density = vec![2500.0f32; N * N * N];
        let mut fields = ChunkFields::zeroed(N * N * N);
        for v in fields.vx.iter_mut() {
            *v = 1.0;
        }
        run_pass(&mut fields, &params, &labels, &density, 1e-8);
        assert_eq!(fields.sxx[voxel_index(0, 3, 3, N, N)], 0.0);
        assert_eq!(fields.sxx[voxel_index(3, 0, 3, N, N)], 0.0);
        assert_eq!(fields.sxx[voxel_index(3, 3, 0, N, N)], 0.0);
        assert_eq!(fields.sxx[voxel_index(3, 3, N - 1, N, N)], 0.0);
    }

    #[test]
    fn test_disabled_voxel_is_inert() {
        let params = params();
        let labels = vec![0u8; N * N * N];
        let mut density = vec![2500.0f32; N * N * N];
        let dead = voxel_index(3, 3, 3, N, N);
        density[dead] = 0.0;
        let mut fields = ChunkFields::zeroed(N * N * N);
        for z in 0..N {
            for y in 0..N {
                for x in 0..N {
                    fields.vx[voxel_index(x, y, z, N, N)] = x as f32;
                }
            }
        }
        run_pass(&mut fields, &params, &labels, &density, 1e-8);
        assert_eq!(fields.sxx[dead], 0.0);
        assert!(fields.sxx[voxel_index(4, 3, 3, N, N)] != 0.0);
    }

    #[test]
    fn test_damage_softening_reduces_increment() {
        let params = params();
        let labels = vec![0u8; N * N * N];
        let density = vec![2500.0f32; N * N * N];
        let idx = voxel_index(3, 3, 3, N, N);

        let mut pristine = ChunkFields::zeroed(N * N * N);
        let mut damaged = ChunkFields::zeroed(N * N * N);
        for z in 0..N {
            for y in 0..N {
                for x in 0..N {
                    let v = x as f32;
                    pristine.vx[voxel_index(x, y, z, N, N)] = v;
                    damaged.vx[voxel_index(x, y, z, N, N)] = v;
                }
            }
        }
        damaged.damage[idx] = 1.0;
        run_pass(&mut pristine, &params, &labels, &density, 1e-8);
        run_pass(&mut damaged, &params, &labels, &density, 1e-8);

        // Fully damaged stiffness factor is 0.1, never zero
        let ratio = damaged.sxx[idx] / pristine.sxx[idx];
        assert!((ratio - 0.1).abs() < 1e-4, "ratio {}", ratio);
        assert!(damaged.sxx[idx] != 0.0);
    }

    #[test]
    fn test_brittle_damage_grows_and_clamps() {
        let mut params = params();
        params.use_brittle_model = true;
        params.cohesion_mpa = 0.001;
        let model = YieldModel::from_params(&params);

        let (mut sxx, mut syy, mut szz) = (5e6f32, -1e6, 0.0);
        let (mut sxy, mut sxz, mut syz) = (2e6f32, 0.0, 0.0);
        let mut damage = 0.0f32;
        return_map(
            &mut sxx, &mut syy, &mut szz, &mut sxy, &mut sxz, &mut syz, &mut damage, 1.0, &model,
        );
        assert!(damage > 0.0);
        assert!(damage <= 1.0);

        let before = damage;
        return_map(
            &mut sxx, &mut syy, &mut szz, &mut sxy, &mut sxz, &mut syz, &mut damage, 1.0, &model,
        );
        assert!(damage >= before);
    }

    #[test]
    fn test_plastic_return_restores_yield_surface() {
        let mut params = params();
        params.use_plastic_model = true;
        params.cohesion_mpa = 1.0;
        params.failure_angle_deg = 30.0;
        let model = YieldModel::from_params(&params);

        let (mut sxx, mut syy, mut szz) = (8e6f32, -4e6, -1e6);
        let (mut sxy, mut sxz, mut syz) = (3e6f32, 1e6, -2e6);
        let mut damage = 0.0f32;
        return_map(
            &mut sxx, &mut syy, &mut szz, &mut sxy, &mut sxz, &mut syz, &mut damage, 1e-8, &model,
        );

        // After the return map the state sits on (or inside) the surface.
        let mean = (sxx + syy + szz) / 3.0 - model.confining_pa;
        let (dxx, dyy, dzz) = (sxx - mean, syy - mean, szz - mean);
        let j2 = 0.5 * (dxx * dxx + dyy * dyy + dzz * dzz) + sxy * sxy + sxz * sxz + syz * syz;
        let f = j2.sqrt() + model.pressure_coefficient * mean - model.cohesion_term;
        assert!(f <= 1.0, "residual overshoot f = {}", f);
        assert_eq!(damage, 0.0);
    }
}
