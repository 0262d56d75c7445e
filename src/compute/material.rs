//! Per-voxel material parameter lookup shared by the CFL scan and kernels.

use crate::schema::{MaterialMask, SimulationParameters, VolumeInputs};

/// Density floor applied before any division, in kg/m^3.
pub const DENSITY_FLOOR: f32 = 100.0;

/// Lamé parameters (lambda, mu) in Pa.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lame {
    pub lambda: f32,
    pub mu: f32,
}

/// Convert Young's modulus (Pa) and Poisson ratio to Lamé parameters.
#[inline]
pub fn lame_from_elastic(e_pa: f32, nu: f32) -> Lame {
    let mu = e_pa / (2.0 * (1.0 + nu));
    let lambda = e_pa * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
    Lame { lambda, mu }
}

/// Whether an (E, nu) pair describes a usable elastic voxel.
#[inline]
pub fn elastic_valid(e_mpa: f32, nu: f32) -> bool {
    e_mpa > 0.0 && nu > -1.0 && nu < 0.5
}

/// Resolved material view over the borrowed volumes: answers, per voxel,
/// whether it participates and with which Lamé parameters.
pub struct MaterialModel<'a> {
    mask: MaterialMask,
    labels: &'a [u8],
    density: &'a [f32],
    per_voxel_e: Option<&'a [f32]>,
    per_voxel_nu: Option<&'a [f32]>,
    bulk_e_mpa: f32,
    bulk_nu: f32,
}

impl<'a> MaterialModel<'a> {
    pub fn new(params: &SimulationParameters, volume: &VolumeInputs<'a>) -> Self {
        Self {
            mask: MaterialMask::from_ids(&params.selected_materials),
            labels: volume.labels,
            density: volume.density,
            per_voxel_e: volume.youngs_modulus_mpa,
            per_voxel_nu: volume.poisson_ratio,
            bulk_e_mpa: params.youngs_modulus_mpa,
            bulk_nu: params.poisson_ratio,
        }
    }

    #[inline]
    pub fn mask(&self) -> &MaterialMask {
        &self.mask
    }

    /// Raw density at a flat index (unclamped; <= 0 disables the voxel).
    #[inline]
    pub fn density(&self, idx: usize) -> f32 {
        self.density[idx]
    }

    /// Density clamped to the stability floor.
    #[inline]
    pub fn clamped_density(&self, idx: usize) -> f32 {
        self.density[idx].max(DENSITY_FLOOR)
    }

    /// Whether the voxel's material id is selected.
    #[inline]
    pub fn is_selected(&self, idx: usize) -> bool {
        self.mask.is_selected(self.labels[idx])
    }

    /// Elastic pair (E in MPa, nu) at a flat index.
    #[inline]
    pub fn elastic(&self, idx: usize) -> (f32, f32) {
        match (self.per_voxel_e, self.per_voxel_nu) {
            (Some(e), Some(nu)) => (e[idx], nu[idx]),
            _ => (self.bulk_e_mpa, self.bulk_nu),
        }
    }

    /// Lamé parameters in Pa, or None if the voxel is inert (deselected,
    /// non-positive density, or out-of-range elastics).
    #[inline]
    pub fn lame(&self, idx: usize) -> Option<Lame> {
        if !self.is_selected(idx) || self.density[idx] <= 0.0 {
            return None;
        }
        let (e_mpa, nu) = self.elastic(idx);
        if !elastic_valid(e_mpa, nu) {
            return None;
        }
        Some(lame_from_elastic(e_mpa * 1e6, nu))
    }

    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.density.len()
    }
}
