//! Receiver first-break detection and chunk-to-global field reduction.

use crate::schema::SimulationParameters;

use super::chunk::WaveFieldChunk;

/// Velocity magnitude that counts as a first break, m/s.
const ARRIVAL_THRESHOLD: f32 = 1e-12;

/// Watches the receiver voxel for P and S first breaks.
///
/// The longitudinal probe reads the component along the transducer axis;
/// the transverse probe reads the magnitude of the two remaining
/// components. The S break is only accepted after the P break.
#[derive(Debug, Clone)]
pub struct ArrivalTracker {
    receiver: [usize; 3],
    axis_index: usize,
    transverse: (usize, usize),
    p_step: Option<u32>,
    s_step: Option<u32>,
}

impl ArrivalTracker {
    pub fn new(params: &SimulationParameters) -> Self {
        let dims = [params.width, params.height, params.depth];
        let mut receiver = [0usize; 3];
        for a in 0..3 {
            receiver[a] = ((params.rx_position[a] * dims[a] as f32) as i64)
                .clamp(1, dims[a] as i64 - 2) as usize;
        }
        Self {
            receiver,
            axis_index: params.axis.index(),
            transverse: params.axis.transverse(),
            p_step: None,
            s_step: None,
        }
    }

    /// Receiver voxel in global coordinates.
    pub fn receiver(&self) -> [usize; 3] {
        self.receiver
    }

    /// Feed the receiver velocity sample for one step.
    pub fn observe(&mut self, step: u32, velocity: [f32; 3]) {
        if self.p_step.is_none() && velocity[self.axis_index].abs() > ARRIVAL_THRESHOLD {
            self.p_step = Some(step);
            log::info!("P first break at step {}", step);
        }
        if self.p_step.is_some() && self.s_step.is_none() {
            let (b, c) = self.transverse;
            let shear = (velocity[b] * velocity[b] + velocity[c] * velocity[c]).sqrt();
            if shear > ARRIVAL_THRESHOLD {
                self.s_step = Some(step);
                log::info!("S first break at step {}", step);
            }
        }
    }

    /// P first-break step (0 when never observed).
    pub fn p_arrival_step(&self) -> u32 {
        self.p_step.unwrap_or(0)
    }

    /// S first-break step (0 when never observed).
    pub fn s_arrival_step(&self) -> u32 {
        self.s_step.unwrap_or(0)
    }
}

/// Apparent propagation velocity from a first-break step.
pub fn wave_velocity(distance_m: f32, arrival_step: u32, dt: f32) -> f32 {
    if arrival_step == 0 {
        return 0.0;
    }
    distance_m / (arrival_step as f32 * dt)
}

/// Global fields rebuilt from the chunk list.
pub struct ReducedFields {
    pub max_abs_vx: Vec<f32>,
    pub max_abs_vy: Vec<f32>,
    pub max_abs_vz: Vec<f32>,
    pub damage: Vec<f32>,
}

/// Copy every chunk's peak and damage arrays into dense global volumes.
///
/// Each chunk contributes only the planes it updates: its shared halo
/// planes are stale copies of the neighbor's interior (and damage is
/// never exchanged), so the first chunk owns `[start, end-1)`, the last
/// `[start+1, end)` and middle chunks `[start+1, end-1)`. All chunks must
/// be resident.
pub fn reduce_chunks(
    chunks: &[WaveFieldChunk],
    width: usize,
    height: usize,
    depth: usize,
) -> ReducedFields {
    let total = width * height * depth;
    let mut out = ReducedFields {
        max_abs_vx: vec![0.0; total],
        max_abs_vy: vec![0.0; total],
        max_abs_vz: vec![0.0; total],
        damage: vec![0.0; total],
    };
    let plane = width * height;
    let last = chunks.len().saturating_sub(1);
    for (i, chunk) in chunks.iter().enumerate() {
        let fields = chunk.fields();
        let owned_start = if i == 0 { chunk.start_z } else { chunk.start_z + 1 };
        let owned_end = if i == last { chunk.end_z } else { chunk.end_z - 1 };
        let dst = owned_start * plane..owned_end * plane;
        let src = (owned_start - chunk.start_z) * plane..(owned_end - chunk.start_z) * plane;
        out.max_abs_vx[dst.clone()].copy_from_slice(&fields.max_abs_vx[src.clone()]);
        out.max_abs_vy[dst.clone()].copy_from_slice(&fields.max_abs_vy[src.clone()]);
        out.max_abs_vz[dst.clone()].copy_from_slice(&fields.max_abs_vz[src.clone()]);
        out.damage[dst].copy_from_slice(&fields.damage[src]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SourceAxis, voxel_index};

    fn params() -> SimulationParameters {
        SimulationParameters {
            width: 32,
            height: 32,
            depth: 32,
            rx_position: [0.9, 0.5, 0.5],
            axis: SourceAxis::X,
            ..Default::default()
        }
    }

    #[test]
    fn test_receiver_voxel_clamped() {
        let mut p = params();
        p.rx_position = [1.0, 0.0, 0.5];
        let tracker = ArrivalTracker::new(&p);
        assert_eq!(tracker.receiver(), [30, 1, 16]);
    }

    #[test]
    fn test_p_before_s() {
        let mut tracker = ArrivalTracker::new(&params());

        // Transverse motion before the P break is ignored
        tracker.observe(3, [0.0, 1e-3, 0.0]);
        assert_eq!(tracker.p_arrival_step(), 0);
        assert_eq!(tracker.s_arrival_step(), 0);

        tracker.observe(5, [1e-6, 0.0, 0.0]);
        assert_eq!(tracker.p_arrival_step(), 5);
        assert_eq!(tracker.s_arrival_step(), 0);

        tracker.observe(9, [1e-6, 1e-9, 1e-9]);
        assert_eq!(tracker.s_arrival_step(), 9);

        // First breaks never move
        tracker.observe(10, [1.0, 1.0, 1.0]);
        assert_eq!(tracker.p_arrival_step(), 5);
        assert_eq!(tracker.s_arrival_step(), 9);
    }

    #[test]
    fn test_p_and_s_same_step() {
        let mut tracker = ArrivalTracker::new(&params());
        tracker.observe(4, [1e-6, 1e-6, 0.0]);
        assert_eq!(tracker.p_arrival_step(), 4);
        assert_eq!(tracker.s_arrival_step(), 4);
    }

    #[test]
    fn test_sub_threshold_ignored() {
        let mut tracker = ArrivalTracker::new(&params());
        tracker.observe(1, [1e-13, 0.0, 0.0]);
        assert_eq!(tracker.p_arrival_step(), 0);
    }

    #[test]
    fn test_wave_velocity() {
        assert_eq!(wave_velocity(0.05, 0, 1e-8), 0.0);
        let v = wave_velocity(0.05, 1000, 1e-8);
        assert!((v - 5000.0).abs() < 1e-3);
    }

    #[test]
    fn test_reduce_overlapping_chunks() {
        let (w, h, d) = (4, 4, 12);
        let mut a = WaveFieldChunk::allocate(0, 8, w, h);
        let mut b = WaveFieldChunk::allocate(6, 12, w, h);
        for v in a.fields_mut().max_abs_vx.iter_mut() {
            *v = 1.0;
        }
        for v in b.fields_mut().max_abs_vx.iter_mut() {
            *v = 2.0;
        }
        for v in b.fields_mut().damage.iter_mut() {
            *v = 0.5;
        }
        let reduced = reduce_chunks(&[a, b], w, h, d);

        // Chunk a owns planes [0, 7), chunk b owns [7, 12)
        assert_eq!(reduced.max_abs_vx[voxel_index(2, 2, 3, w, h)], 1.0);
        assert_eq!(reduced.max_abs_vx[voxel_index(2, 2, 6, w, h)], 1.0);
        assert_eq!(reduced.max_abs_vx[voxel_index(2, 2, 7, w, h)], 2.0);
        assert_eq!(reduced.max_abs_vx[voxel_index(2, 2, 11, w, h)], 2.0);
        assert_eq!(reduced.damage[voxel_index(2, 2, 11, w, h)], 0.5);
        assert_eq!(reduced.damage[voxel_index(2, 2, 3, w, h)], 0.0);
    }
}
