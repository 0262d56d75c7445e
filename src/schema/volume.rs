//! Read-only volume views and material gating.
//!
//! All dense volumes are flat arrays in x-major order:
//! `idx = (z * height + y) * width + x`.

use super::params::{ConfigError, SimulationParameters};

/// Convert (x, y, z) voxel coordinates to a flat index.
#[inline]
pub fn voxel_index(x: usize, y: usize, z: usize, width: usize, height: usize) -> usize {
    (z * height + y) * width + x
}

/// Borrowed read-only input volumes for one run.
///
/// `labels` and `density` are dense `W*H*D` arrays. Per-voxel elastics are
/// optional; when absent the bulk parameters apply uniformly.
#[derive(Clone, Copy)]
pub struct VolumeInputs<'a> {
    /// Material id per voxel.
    pub labels: &'a [u8],
    /// Density per voxel in kg/m^3; values <= 0 disable the voxel.
    pub density: &'a [f32],
    /// Per-voxel Young's modulus in MPa.
    pub youngs_modulus_mpa: Option<&'a [f32]>,
    /// Per-voxel Poisson ratio.
    pub poisson_ratio: Option<&'a [f32]>,
}

impl<'a> VolumeInputs<'a> {
    /// Bulk-elastics view over labels and density only.
    pub fn new(labels: &'a [u8], density: &'a [f32]) -> Self {
        Self {
            labels,
            density,
            youngs_modulus_mpa: None,
            poisson_ratio: None,
        }
    }

    /// Check array lengths against the parameter dimensions.
    pub fn validate(&self, params: &SimulationParameters) -> Result<(), ConfigError> {
        let expected = params.voxel_count();
        if self.labels.len() != expected {
            return Err(ConfigError::VolumeSizeMismatch {
                name: "labels",
                got: self.labels.len(),
                expected,
            });
        }
        if self.density.len() != expected {
            return Err(ConfigError::VolumeSizeMismatch {
                name: "density",
                got: self.density.len(),
                expected,
            });
        }
        match (self.youngs_modulus_mpa, self.poisson_ratio) {
            (None, None) => {}
            (Some(e), Some(nu)) => {
                if e.len() != expected {
                    return Err(ConfigError::VolumeSizeMismatch {
                        name: "youngs_modulus",
                        got: e.len(),
                        expected,
                    });
                }
                if nu.len() != expected {
                    return Err(ConfigError::VolumeSizeMismatch {
                        name: "poisson_ratio",
                        got: nu.len(),
                        expected,
                    });
                }
            }
            _ => return Err(ConfigError::IncompleteElastics),
        }
        Ok(())
    }
}

/// O(1) material-id participation lookup built from the selection list.
#[derive(Clone)]
pub struct MaterialMask {
    selected: [bool; 256],
}

impl MaterialMask {
    pub fn from_ids(ids: &[u8]) -> Self {
        let mut selected = [false; 256];
        for &id in ids {
            selected[id as usize] = true;
        }
        Self { selected }
    }

    #[inline]
    pub fn is_selected(&self, id: u8) -> bool {
        self.selected[id as usize]
    }

    /// True if no material id participates.
    pub fn is_empty(&self) -> bool {
        !self.selected.iter().any(|&s| s)
    }
}
