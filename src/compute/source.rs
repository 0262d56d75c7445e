//! Transducer source: pulse shape evaluation and stress-field injection.

use crate::schema::{SimulationParameters, SourceAxis, voxel_index};

use super::chunk::ChunkFields;
use super::material::MaterialModel;

const ENERGY_EPSILON: f32 = 1e-12;

/// Scalar source amplitude per step: Ricker wavelet or short step pulse.
#[derive(Debug, Clone)]
pub struct SourcePulse {
    peak: f32,
    frequency_hz: f32,
    dt: f32,
    ricker: bool,
}

impl SourcePulse {
    pub fn new(params: &SimulationParameters, dt: f32) -> Self {
        let peak = params.source_amplitude
            * params.source_energy_j.max(ENERGY_EPSILON).sqrt()
            * 1e6;
        Self {
            peak,
            frequency_hz: (params.source_frequency_khz * 1e3).max(1e3),
            dt,
            ricker: params.use_ricker_wavelet,
        }
    }

    /// Source amplitude at step `n >= 1`.
    pub fn amplitude(&self, step: u32) -> f32 {
        if self.ricker {
            let t = step as f32 * self.dt;
            let t0 = 1.2 / self.frequency_hz;
            if t > 2.0 * t0 {
                return 0.0;
            }
            let x = std::f32::consts::PI * self.frequency_hz * (t - t0);
            let x2 = x * x;
            self.peak * (1.0 - 2.0 * x2) * (-x2).exp()
        } else if (1..=3).contains(&step) {
            self.peak
        } else {
            0.0
        }
    }
}

/// Applies the per-step source amplitude to a chunk's stress fields.
///
/// Full-face mode loads an entire orthogonal plane near the transmitter
/// face; point mode spreads a Gaussian over the 3x3x3 neighborhood of the
/// transmitter voxel.
#[derive(Debug, Clone)]
pub struct SourceInjector {
    full_face: bool,
    axis: SourceAxis,
    /// Per-axis full-face plane coordinate (Z in global coordinates).
    face: [usize; 3],
    /// Clamped transmitter voxel.
    point: [i64; 3],
    width: usize,
    height: usize,
    depth: usize,
}

/// Flat description of the source geometry for the GPU dispatch.
#[derive(Debug, Clone, Copy)]
pub struct SourceDescription {
    pub full_face: bool,
    pub axis: SourceAxis,
    pub face: [usize; 3],
    pub point: [i64; 3],
}

impl SourceInjector {
    pub fn new(params: &SimulationParameters) -> Self {
        let dims = [params.width, params.height, params.depth];
        let tx = params.tx_position;
        let mut face = [0usize; 3];
        let mut point = [0i64; 3];
        for a in 0..3 {
            face[a] = face_coordinate(dims[a], tx[a]);
            point[a] = ((tx[a] * dims[a] as f32) as i64).clamp(1, dims[a] as i64 - 2);
        }
        Self {
            full_face: params.use_full_face_transducers,
            axis: params.axis,
            face,
            point,
            width: params.width,
            height: params.height,
            depth: params.depth,
        }
    }

    /// Geometry summary consumed by the GPU stress kernel.
    pub fn gpu_description(&self) -> SourceDescription {
        SourceDescription {
            full_face: self.full_face,
            axis: self.axis,
            face: self.face,
            point: self.point,
        }
    }

    /// Add the source contribution `s` to the chunk's normal stresses.
    pub fn inject(
        &self,
        fields: &mut ChunkFields,
        material: &MaterialModel<'_>,
        chunk_start_z: usize,
        chunk_depth: usize,
        s: f32,
    ) {
        if s == 0.0 {
            return;
        }
        if self.full_face {
            self.inject_face(fields, chunk_start_z, chunk_depth, s);
        } else {
            self.inject_point(fields, material, chunk_start_z, chunk_depth, s);
        }
    }

    fn inject_face(&self, fields: &mut ChunkFields, chunk_start_z: usize, chunk_depth: usize, s: f32) {
        let (w, h) = (self.width, self.height);
        match self.axis {
            SourceAxis::X => {
                let x = self.face[0];
                for lz in 0..chunk_depth {
                    for y in 0..h {
                        fields.sxx[voxel_index(x, y, lz, w, h)] += s;
                    }
                }
            }
            SourceAxis::Y => {
                let y = self.face[1];
                for lz in 0..chunk_depth {
                    for x in 0..w {
                        fields.syy[voxel_index(x, y, lz, w, h)] += s;
                    }
                }
            }
            SourceAxis::Z => {
                let z = self.face[2];
                if (chunk_start_z..chunk_start_z + chunk_depth).contains(&z) {
                    let lz = z - chunk_start_z;
                    for y in 0..h {
                        for x in 0..w {
                            fields.szz[voxel_index(x, y, lz, w, h)] += s;
                        }
                    }
                }
            }
        }
    }

    fn inject_point(
        &self,
        fields: &mut ChunkFields,
        material: &MaterialModel<'_>,
        chunk_start_z: usize,
        chunk_depth: usize,
        s: f32,
    ) {
        let (w, h) = (self.width, self.height);
        for dz in -1i64..=1 {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let gx = self.point[0] + dx;
                    let gy = self.point[1] + dy;
                    let gz = self.point[2] + dz;
                    if gx < 1 || gx > w as i64 - 2 || gy < 1 || gy > h as i64 - 2 {
                        continue;
                    }
                    if gz < 1 || gz > self.depth as i64 - 2 {
                        continue;
                    }
                    let lz = gz - chunk_start_z as i64;
                    // Strictly inside the chunk interior.
                    if lz < 1 || lz > chunk_depth as i64 - 2 {
                        continue;
                    }
                    let global_idx =
                        voxel_index(gx as usize, gy as usize, gz as usize, w, h);
                    // Only voxels that can carry the load receive it.
                    if material.lame(global_idx).is_none() {
                        continue;
                    }
                    let r2 = (dx * dx + dy * dy + dz * dz) as f32;
                    let contribution = s * (-0.5 * r2).exp();
                    let idx = voxel_index(gx as usize, gy as usize, lz as usize, w, h);
                    fields.sxx[idx] += contribution;
                    fields.syy[idx] += contribution;
                    fields.szz[idx] += contribution;
                }
            }
        }
    }
}

/// Full-face plane coordinate: two voxels in from whichever face is
/// closer to the transducer.
fn face_coordinate(dim: usize, normalized: f32) -> usize {
    if normalized * (dim as f32) < dim as f32 / 2.0 {
        2
    } else {
        dim - 3
    }
}
