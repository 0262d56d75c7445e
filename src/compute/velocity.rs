//! Velocity half-step: momentum update from stress divergence with
//! artificial viscosity, wall damping and per-voxel peak tracking.
//!
//! Normal stress gradients use backward differences; the six shear
//! couplings use 2x2-averaged staggered stencils (the naive stencil
//! checkerboards). The update is Jacobi-style through scratch buffers so
//! every read sees pre-step values regardless of plane scheduling.

use rayon::prelude::*;

use super::chunk::ChunkFields;
use super::material::MaterialModel;
use super::monitor::CancelToken;

/// Hard velocity clamp on the CPU path, m/s.
const VELOCITY_LIMIT: f32 = 1e4;

/// Per-step velocity retention (wall damping).
const RETENTION: f32 = 0.999;

/// Reusable next-velocity buffers, resized per chunk.
#[derive(Default)]
pub struct VelocityScratch {
    vx: Vec<f32>,
    vy: Vec<f32>,
    vz: Vec<f32>,
}

impl VelocityScratch {
    pub fn new() -> Self {
        Self::default()
    }

    fn prepare(&mut self, len: usize) {
        self.vx.resize(len, 0.0);
        self.vy.resize(len, 0.0);
        self.vz.resize(len, 0.0);
    }
}

/// One velocity half-step over a chunk's deep interior.
///
/// The two-voxel margin is measured against the global volume; in local Z
/// a plane only needs one halo neighbor on each side. This keeps the
/// updated planes tiling the volume identically whether it is split into
/// one chunk or many.
#[allow(clippy::too_many_arguments)]
pub fn velocity_pass_cpu(
    fields: &mut ChunkFields,
    scratch: &mut VelocityScratch,
    material: &MaterialModel<'_>,
    width: usize,
    height: usize,
    chunk_start_z: usize,
    chunk_depth: usize,
    total_depth: usize,
    dt: f32,
    dx: f32,
    damping: f32,
    cancel: &CancelToken,
) {
    let plane = width * height;
    let len = plane * chunk_depth;
    let inv_dx = 1.0 / dx;
    scratch.prepare(len);

    {
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
            max_abs_vx,
            max_abs_vy,
            max_abs_vz,
            ..
        } = fields;
        let (vx, vy, vz) = (vx.as_slice(), vy.as_slice(), vz.as_slice());
        let (sxx, syy, szz) = (sxx.as_slice(), syy.as_slice(), szz.as_slice());
        let (sxy, sxz, syz) = (sxy.as_slice(), sxz.as_slice(), syz.as_slice());

        scratch
            .vx
            .par_chunks_mut(plane)
            .zip(scratch.vy.par_chunks_mut(plane))
            .zip(scratch.vz.par_chunks_mut(plane))
            .zip(max_abs_vx.par_chunks_mut(plane))
            .zip(max_abs_vy.par_chunks_mut(plane))
            .zip(max_abs_vz.par_chunks_mut(plane))
            .enumerate()
            .for_each(
                |(lz, (((((nvx_p, nvy_p), nvz_p), mvx_p), mvy_p), mvz_p))| {
                    let z_base = lz * plane;
                    if cancel.is_cancelled() {
                        // Carry the old values through so the swap below
                        // leaves the chunk unchanged.
                        nvx_p.copy_from_slice(&vx[z_base..z_base + plane]);
                        nvy_p.copy_from_slice(&vy[z_base..z_base + plane]);
                        nvz_p.copy_from_slice(&vz[z_base..z_base + plane]);
                        return;
                    }
                    let gz = chunk_start_z + lz;
                    let g_base = gz * plane;
                    let z_deep =
                        lz >= 1 && lz + 1 < chunk_depth && gz >= 2 && gz + 2 < total_depth;

                    for y in 0..height {
                        let y_deep = (2..height - 2).contains(&y);
                        for x in 0..width {
                            let p = y * width + x;
                            let idx = z_base + p;

                            let deep = z_deep && y_deep && (2..width - 2).contains(&x);
                            let active = deep
                                && material.is_selected(g_base + p)
                                && material.density(g_base + p) > 0.0;

                            let (new_vx, new_vy, new_vz) = if active {
                                let rho = material.clamped_density(g_base + p);
                                update_voxel(
                                    vx, vy, vz, sxx, syy, szz, sxy, sxz, syz, idx, width, plane,
                                    rho, dt, inv_dx, damping,
                                )
                            } else {
                                (vx[idx], vy[idx], vz[idx])
                            };

                            nvx_p[p] = new_vx;
                            nvy_p[p] = new_vy;
                            nvz_p[p] = new_vz;
                            mvx_p[p] = mvx_p[p].max(new_vx.abs());
                            mvy_p[p] = mvy_p[p].max(new_vy.abs());
                            mvz_p[p] = mvz_p[p].max(new_vz.abs());
                        }
                    }
                },
            );
    }

    std::mem::swap(&mut fields.vx, &mut scratch.vx);
    std::mem::swap(&mut fields.vy, &mut scratch.vy);
    std::mem::swap(&mut fields.vz, &mut scratch.vz);
}

/// Momentum update for one deep-interior voxel. Returns the clamped new
/// velocity components.
#[allow(clippy::too_many_arguments)]
#[inline]
fn update_voxel(
    vx: &[f32],
    vy: &[f32],
    vz: &[f32],
    sxx: &[f32],
    syy: &[f32],
    szz: &[f32],
    sxy: &[f32],
    sxz: &[f32],
    syz: &[f32],
    idx: usize,
    width: usize,
    plane: usize,
    rho: f32,
    dt: f32,
    inv_dx: f32,
    damping: f32,
) -> (f32, f32, f32) {
    // vx: backward d(sxx)/dx, averaged d(sxy)/dy and d(sxz)/dz over x, x+1
    let dsxx_dx = (sxx[idx] - sxx[idx - 1]) * inv_dx;
    let dsxy_dy =
        0.25 * ((sxy[idx] + sxy[idx + 1]) - (sxy[idx - width] + sxy[idx + 1 - width])) * inv_dx;
    let dsxz_dz =
        0.25 * ((sxz[idx] + sxz[idx + 1]) - (sxz[idx - plane] + sxz[idx + 1 - plane])) * inv_dx;

    // vy: averaged d(sxy)/dx over y, y+1, backward d(syy)/dy, averaged d(syz)/dz
    let dsxy_dx =
        0.25 * ((sxy[idx] + sxy[idx + width]) - (sxy[idx - 1] + sxy[idx - 1 + width])) * inv_dx;
    let dsyy_dy = (syy[idx] - syy[idx - width]) * inv_dx;
    let dsyz_dz = 0.25
        * ((syz[idx] + syz[idx + width]) - (syz[idx - plane] + syz[idx + width - plane]))
        * inv_dx;

    // vz: averaged d(sxz)/dx and d(syz)/dy over z, z+1, backward d(szz)/dz
    let dsxz_dx =
        0.25 * ((sxz[idx] + sxz[idx + plane]) - (sxz[idx - 1] + sxz[idx - 1 + plane])) * inv_dx;
    let dsyz_dy = 0.25
        * ((syz[idx] + syz[idx + plane]) - (syz[idx - width] + syz[idx - width + plane]))
        * inv_dx;
    let dszz_dz = (szz[idx] - szz[idx - plane]) * inv_dx;

    let ax = (dsxx_dx + dsxy_dy + dsxz_dz) / rho;
    let ay = (dsxy_dx + dsyy_dy + dsyz_dz) / rho;
    let az = (dsxz_dx + dsyz_dy + dszz_dz) / rho;

    let smooth = damping / 6.0;
    let new_vx = RETENTION * vx[idx] + dt * ax + smooth * laplacian(vx, idx, width, plane);
    let new_vy = RETENTION * vy[idx] + dt * ay + smooth * laplacian(vy, idx, width, plane);
    let new_vz = RETENTION * vz[idx] + dt * az + smooth * laplacian(vz, idx, width, plane);

    (
        new_vx.clamp(-VELOCITY_LIMIT, VELOCITY_LIMIT),
        new_vy.clamp(-VELOCITY_LIMIT, VELOCITY_LIMIT),
        new_vz.clamp(-VELOCITY_LIMIT, VELOCITY_LIMIT),
    )
}

/// 6-point Laplacian of one component.
#[inline]
fn laplacian(v: &[f32], idx: usize, width: usize, plane: usize) -> f32 {
    v[idx - 1] + v[idx + 1] + v[idx - width] + v[idx + width] + v[idx - plane] + v[idx + plane]
        - 6.0 * v[idx]
}
