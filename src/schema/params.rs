//! Simulation parameter types for elastodynamic wave propagation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Axis along which the transducer pair is oriented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceAxis {
    #[default]
    X,
    Y,
    Z,
}

impl SourceAxis {
    /// Axis index (0, 1, 2).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            SourceAxis::X => 0,
            SourceAxis::Y => 1,
            SourceAxis::Z => 2,
        }
    }

    /// The two transverse axis indices, in order.
    #[inline]
    pub fn transverse(self) -> (usize, usize) {
        match self {
            SourceAxis::X => (1, 2),
            SourceAxis::Y => (0, 2),
            SourceAxis::Z => (0, 1),
        }
    }
}

fn default_chunk_size_mb() -> usize {
    512
}

fn default_offload_directory() -> PathBuf {
    std::env::temp_dir().join("rockwave")
}

/// Top-level simulation parameters.
///
/// Constructed by the caller and borrowed read-only by the engine for the
/// full run. Elastic moduli, cohesion and confining pressure are given in
/// MPa and converted to Pa internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParameters {
    /// Volume width in voxels (X dimension).
    pub width: usize,
    /// Volume height in voxels (Y dimension).
    pub height: usize,
    /// Volume depth in voxels (Z dimension).
    pub depth: usize,
    /// Voxel edge length in meters.
    pub pixel_size: f32,
    /// Number of time steps to run.
    pub time_steps: u32,

    /// Source center frequency in kHz (Ricker mode).
    pub source_frequency_khz: f32,
    /// Dimensionless source amplitude scale.
    pub source_amplitude: f32,
    /// Source energy in joules; amplitude scales with its square root.
    pub source_energy_j: f32,
    /// Transmitter position, normalized [0,1] per axis.
    pub tx_position: [f32; 3],
    /// Receiver position, normalized [0,1] per axis.
    pub rx_position: [f32; 3],
    /// Propagation axis of the transducer pair.
    #[serde(default)]
    pub axis: SourceAxis,

    /// Ricker wavelet source (true) or short step pulse (false).
    #[serde(default)]
    pub use_ricker_wavelet: bool,
    /// Excite the whole transducer face instead of a point.
    #[serde(default)]
    pub use_full_face_transducers: bool,
    /// Prefer the GPU backend; falls back to CPU on init failure.
    #[serde(default)]
    pub use_gpu: bool,
    /// Offload non-window chunks to scratch files.
    #[serde(default)]
    pub enable_offloading: bool,
    /// Mohr-Coulomb plastic return mapping.
    #[serde(default)]
    pub use_plastic_model: bool,
    /// Scalar damage accumulation on yield.
    #[serde(default)]
    pub use_brittle_model: bool,

    /// Bulk Young's modulus in MPa (used when no per-voxel elastics).
    pub youngs_modulus_mpa: f32,
    /// Bulk Poisson ratio.
    pub poisson_ratio: f32,
    /// Confining pressure in MPa.
    #[serde(default)]
    pub confining_pressure_mpa: f32,
    /// Cohesion in MPa.
    #[serde(default)]
    pub cohesion_mpa: f32,
    /// Failure angle in degrees.
    #[serde(default)]
    pub failure_angle_deg: f32,
    /// Laplacian smoothing weight, [0, 1).
    #[serde(default)]
    pub artificial_damping_factor: f32,

    /// Target chunk size in MiB (floored at 256 internally).
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: usize,
    /// Directory for chunk scratch files.
    #[serde(default = "default_offload_directory")]
    pub offload_directory: PathBuf,
    /// Emit a downsampled snapshot every N steps (0 = never).
    #[serde(default)]
    pub snapshot_interval: u32,

    /// Material ids that participate in the simulation.
    pub selected_materials: Vec<u8>,
    /// Explicit time step, consulted only when no voxel qualifies for the
    /// CFL scan.
    #[serde(default)]
    pub time_step_seconds: Option<f32>,
}

impl SimulationParameters {
    /// Whether a material id participates in the simulation.
    #[inline]
    pub fn is_material_selected(&self, id: u8) -> bool {
        self.selected_materials.contains(&id)
    }

    /// Total voxel count.
    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Tx-Rx straight-line distance in meters.
    pub fn transducer_distance(&self) -> f32 {
        let dx = (self.tx_position[0] - self.rx_position[0]) * self.width as f32;
        let dy = (self.tx_position[1] - self.rx_position[1]) * self.height as f32;
        let dz = (self.tx_position[2] - self.rx_position[2]) * self.depth as f32;
        (dx * dx + dy * dy + dz * dz).sqrt() * self.pixel_size
    }

    /// Validate parameters. Only configuration errors abort a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width < 3 || self.height < 3 || self.depth < 3 {
            return Err(ConfigError::InvalidDimensions {
                width: self.width,
                height: self.height,
                depth: self.depth,
            });
        }
        if !(self.pixel_size > 0.0) {
            return Err(ConfigError::InvalidPixelSize(self.pixel_size));
        }
        if self.time_steps == 0 {
            return Err(ConfigError::InvalidTimeSteps);
        }
        for (name, pos) in [("tx", self.tx_position), ("rx", self.rx_position)] {
            if pos.iter().any(|c| !(0.0..=1.0).contains(c)) {
                return Err(ConfigError::InvalidTransducerPosition {
                    which: name,
                    position: pos,
                });
            }
        }
        if !(0.0..1.0).contains(&self.artificial_damping_factor) {
            return Err(ConfigError::InvalidDampingFactor(
                self.artificial_damping_factor,
            ));
        }
        Ok(())
    }
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            depth: 64,
            pixel_size: 1e-3,
            time_steps: 400,
            source_frequency_khz: 30.0,
            source_amplitude: 1.0,
            source_energy_j: 1e-3,
            tx_position: [0.1, 0.5, 0.5],
            rx_position: [0.9, 0.5, 0.5],
            axis: SourceAxis::X,
            use_ricker_wavelet: true,
            use_full_face_transducers: false,
            use_gpu: false,
            enable_offloading: false,
            use_plastic_model: false,
            use_brittle_model: false,
            youngs_modulus_mpa: 30_000.0,
            poisson_ratio: 0.25,
            confining_pressure_mpa: 0.0,
            cohesion_mpa: 10.0,
            failure_angle_deg: 30.0,
            artificial_damping_factor: 0.0,
            chunk_size_mb: default_chunk_size_mb(),
            offload_directory: default_offload_directory(),
            snapshot_interval: 0,
            selected_materials: (0..=255).collect(),
            time_step_seconds: None,
        }
    }
}

/// Parameter validation errors. These are the only fatal errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("volume dimensions must be at least 3 voxels per axis, got {width}x{height}x{depth}")]
    InvalidDimensions {
        width: usize,
        height: usize,
        depth: usize,
    },
    #[error("pixel size must be positive, got {0}")]
    InvalidPixelSize(f32),
    #[error("time step count must be at least 1")]
    InvalidTimeSteps,
    #[error("{which} position {position:?} outside normalized [0,1] range")]
    InvalidTransducerPosition {
        which: &'static str,
        position: [f32; 3],
    },
    #[error("artificial damping factor {0} outside [0,1)")]
    InvalidDampingFactor(f32),
    #[error("{name} volume length {got} does not match {expected} voxels")]
    VolumeSizeMismatch {
        name: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("per-voxel Young's modulus and Poisson ratio must be provided together")]
    IncompleteElastics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_valid() {
        let params = SimulationParameters::default();
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_rejects_thin_volume() {
        let params = SimulationParameters {
            depth: 2,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range_receiver() {
        let params = SimulationParameters {
            rx_position: [0.5, 1.2, 0.5],
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::InvalidTransducerPosition { which: "rx", .. })
        ));
    }

    #[test]
    fn test_rejects_damping_at_one() {
        let params = SimulationParameters {
            artificial_damping_factor: 1.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let params = SimulationParameters {
            use_gpu: true,
            axis: SourceAxis::Z,
            selected_materials: vec![1, 2, 7],
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: SimulationParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back.axis, SourceAxis::Z);
        assert_eq!(back.selected_materials, vec![1, 2, 7]);
        assert!(back.use_gpu);
    }

    #[test]
    fn test_transducer_distance_axis_aligned() {
        let params = SimulationParameters::default();
        // 0.8 of 64 voxels at 1 mm/voxel
        let expected = 0.8 * 64.0 * 1e-3;
        assert!((params.transducer_distance() - expected).abs() < 1e-6);
    }
}
