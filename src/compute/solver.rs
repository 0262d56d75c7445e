//! Chunked solver: drives the per-step stress and velocity passes over
//! the Z-chunk list, manages sliding-window residency, probes arrivals
//! and assembles the final results.

use std::time::Instant;

use crate::schema::{
    SimulationParameters, SimulationResults, VolumeInputs, WaveFieldSnapshot, voxel_index,
};

use super::arrival::{ArrivalTracker, reduce_chunks, wave_velocity};
use super::cfl::derive_time_step;
use super::chunk::{WaveFieldChunk, allocate_chunks, delete_scratch};
use super::halo::{
    apply_stress_boundaries, apply_velocity_boundaries, exchange_stress_halos,
    exchange_velocity_halos,
};
use super::kernel::{CpuKernel, Kernel, PassContext};
use super::material::MaterialModel;
use super::monitor::{CancelToken, ProgressSink, UpdateSink};
use super::source::{SourceInjector, SourcePulse};
use super::stress::YieldModel;

/// Longest edge of a downsampled snapshot grid.
const SNAPSHOT_MAX_EDGE: usize = 64;

/// Steps between chunk-update events.
const UPDATE_EVENT_INTERVAL: u32 = 5;

#[derive(Clone, Copy, PartialEq)]
enum Pass {
    Stress,
    Velocity,
}

/// Out-of-core elastodynamic wave solver over a voxelized volume.
///
/// Owns the chunk list exclusively; kernels receive transient mutable
/// access to one chunk at a time. Input volumes are borrowed read-only
/// for the whole run.
pub struct ChunkedSolver<'a> {
    params: SimulationParameters,
    material: MaterialModel<'a>,
    chunks: Vec<WaveFieldChunk>,
    kernel: Box<dyn Kernel>,
    source: SourceInjector,
    pulse: SourcePulse,
    tracker: ArrivalTracker,
    yield_model: YieldModel,
    dt: f32,
    offloading: bool,
    cancel: CancelToken,
    progress_sink: Option<Box<dyn ProgressSink>>,
    update_sink: Option<Box<dyn UpdateSink>>,
    snapshot_stride: usize,
    active_snapshot: Option<WaveFieldSnapshot>,
    snapshots: Vec<WaveFieldSnapshot>,
    probe_sample: Option<[f32; 3]>,
}

impl<'a> ChunkedSolver<'a> {
    /// Validate the configuration, derive the time step, plan chunks and
    /// select the compute backend.
    pub fn new(
        params: SimulationParameters,
        volume: VolumeInputs<'a>,
    ) -> Result<Self, crate::schema::ConfigError> {
        params.validate()?;
        volume.validate(&params)?;

        let material = MaterialModel::new(&params, &volume);
        let time_step = derive_time_step(&params, &material);

        let chunks = allocate_chunks(
            params.width,
            params.height,
            params.depth,
            params.chunk_size_mb,
        );
        log::info!(
            "volume {}x{}x{} split into {} chunk(s)",
            params.width,
            params.height,
            params.depth,
            chunks.len()
        );

        let mut offloading = params.enable_offloading && chunks.len() > 1;
        if offloading && let Err(e) = std::fs::create_dir_all(&params.offload_directory) {
            log::warn!(
                "cannot create offload directory {}: {}; running fully resident",
                params.offload_directory.display(),
                e
            );
            offloading = false;
        }

        let kernel: Box<dyn Kernel> = if params.use_gpu {
            match super::gpu::GpuKernel::new() {
                Ok(gpu) => {
                    log::info!("using GPU backend");
                    Box::new(gpu)
                }
                Err(e) => {
                    log::warn!("GPU initialization failed: {}; falling back to CPU", e);
                    Box::new(CpuKernel::new())
                }
            }
        } else {
            Box::new(CpuKernel::new())
        };
        log::info!("backend: {}", kernel.name());

        let max_edge = params.width.max(params.height).max(params.depth);
        let snapshot_stride = max_edge.div_ceil(SNAPSHOT_MAX_EDGE).max(1);

        let source = SourceInjector::new(&params);
        let pulse = SourcePulse::new(&params, time_step.dt);
        let tracker = ArrivalTracker::new(&params);
        let yield_model = YieldModel::from_params(&params);

        Ok(Self {
            params,
            material,
            chunks,
            kernel,
            source,
            pulse,
            tracker,
            yield_model,
            dt: time_step.dt,
            offloading,
            cancel: CancelToken::new(),
            progress_sink: None,
            update_sink: None,
            snapshot_stride,
            active_snapshot: None,
            snapshots: Vec::new(),
            probe_sample: None,
        })
    }

    /// Shared token for cooperative cancellation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn set_progress_sink(&mut self, sink: Box<dyn ProgressSink>) {
        self.progress_sink = Some(sink);
    }

    pub fn set_update_sink(&mut self, sink: Box<dyn UpdateSink>) {
        self.update_sink = Some(sink);
    }

    /// Derived time step in seconds.
    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Run the full simulation (or until cancelled) and assemble results.
    pub fn run(&mut self) -> SimulationResults {
        let started = Instant::now();
        let total_steps = self.params.time_steps;
        let log_every = (total_steps / 10).max(1);
        let mut completed = 0u32;

        for step in 1..=total_steps {
            if self.cancel.is_cancelled() {
                log::info!("cancelled before step {}", step);
                break;
            }
            let source_value = self.pulse.amplitude(step);

            self.stress_pass(source_value);
            if self.cancel.is_cancelled() {
                break;
            }

            if self.params.snapshot_interval > 0 && step % self.params.snapshot_interval == 0 {
                self.active_snapshot = Some(self.empty_snapshot(step));
            }
            self.probe_sample = None;
            self.velocity_pass(step);

            if let Some(sample) = self.probe_sample.take() {
                self.tracker.observe(step, sample);
            }
            if let Some(snapshot) = self.active_snapshot.take() {
                self.snapshots.push(snapshot);
            }

            completed = step;
            let progress = step as f32 / total_steps as f32;
            if let Some(sink) = self.progress_sink.as_mut() {
                sink.report(progress, step, "time stepping");
            }
            if step % log_every == 0 {
                log::info!("step {}/{}", step, total_steps);
            }
        }

        // Reload everything for the reducer, even on cancellation.
        for i in 0..self.chunks.len() {
            self.ensure_resident(i);
        }
        let reduced = reduce_chunks(
            &self.chunks,
            self.params.width,
            self.params.height,
            self.params.depth,
        );
        delete_scratch(&mut self.chunks);

        let distance = self.params.transducer_distance();
        let p_step = self.tracker.p_arrival_step();
        let s_step = self.tracker.s_arrival_step();
        let p_velocity = wave_velocity(distance, p_step, self.dt);
        let s_velocity = wave_velocity(distance, s_step, self.dt);

        SimulationResults {
            p_wave_velocity: p_velocity,
            s_wave_velocity: s_velocity,
            vp_vs_ratio: if s_velocity > 0.0 {
                p_velocity / s_velocity
            } else {
                0.0
            },
            p_wave_travel_time_steps: p_step,
            s_wave_travel_time_steps: s_step,
            total_time_steps: completed,
            computation_time_seconds: started.elapsed().as_secs_f64(),
            wave_field_vx: reduced.max_abs_vx,
            wave_field_vy: reduced.max_abs_vy,
            wave_field_vz: reduced.max_abs_vz,
            damage_field: reduced.damage,
            snapshots: std::mem::take(&mut self.snapshots),
        }
    }

    fn stress_pass(&mut self, source_value: f32) {
        let count = self.chunks.len();
        if self.offloading {
            for i in 0..count {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.ensure_resident(i);
                if i + 1 < count {
                    self.ensure_resident(i + 1);
                    self.exchange_halos(i, Pass::Stress);
                }
                self.apply_boundaries(i, Pass::Stress);
                self.run_kernel(i, Pass::Stress, source_value);
                if i > 0 {
                    self.offload_chunk(i - 1);
                }
            }
            if count >= 2 {
                self.offload_chunk(count - 2);
            }
            self.offload_chunk(count - 1);
        } else {
            for i in 0..count.saturating_sub(1) {
                self.exchange_halos(i, Pass::Stress);
            }
            for i in 0..count {
                self.apply_boundaries(i, Pass::Stress);
            }
            for i in 0..count {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.run_kernel(i, Pass::Stress, source_value);
            }
        }
    }

    fn velocity_pass(&mut self, step: u32) {
        let count = self.chunks.len();
        if self.offloading {
            for i in 0..count {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.ensure_resident(i);
                if i + 1 < count {
                    self.ensure_resident(i + 1);
                    self.exchange_halos(i, Pass::Velocity);
                }
                self.apply_boundaries(i, Pass::Velocity);
                self.run_kernel(i, Pass::Velocity, 0.0);
                self.after_chunk_velocity(i, step);
                if i > 0 {
                    self.offload_chunk(i - 1);
                }
            }
            if count >= 2 {
                self.offload_chunk(count - 2);
            }
            self.offload_chunk(count - 1);
        } else {
            for i in 0..count.saturating_sub(1) {
                self.exchange_halos(i, Pass::Velocity);
            }
            for i in 0..count {
                self.apply_boundaries(i, Pass::Velocity);
            }
            for i in 0..count {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.run_kernel(i, Pass::Velocity, 0.0);
                self.after_chunk_velocity(i, step);
            }
        }
    }

    /// Exchange halos between chunk `i` and `i + 1`. Velocities move
    /// before a stress pass, stresses before a velocity pass.
    fn exchange_halos(&mut self, i: usize, pass: Pass) {
        let plane = self.params.width * self.params.height;
        let (left, right) = self.chunks.split_at_mut(i + 1);
        let a = &mut left[i];
        let b = &mut right[0];
        if !a.is_resident() || !b.is_resident() {
            return;
        }
        let depth_a = a.depth();
        match pass {
            Pass::Stress => {
                exchange_velocity_halos(a.fields_mut(), b.fields_mut(), depth_a, plane)
            }
            Pass::Velocity => {
                exchange_stress_halos(a.fields_mut(), b.fields_mut(), depth_a, plane)
            }
        }
    }

    fn apply_boundaries(&mut self, i: usize, pass: Pass) {
        let is_first = i == 0;
        let is_last = i == self.chunks.len() - 1;
        let (w, h) = (self.params.width, self.params.height);
        let chunk = &mut self.chunks[i];
        let depth = chunk.depth();
        match pass {
            Pass::Stress => {
                apply_velocity_boundaries(chunk.fields_mut(), w, h, depth, is_first, is_last)
            }
            Pass::Velocity => {
                apply_stress_boundaries(chunk.fields_mut(), w, h, depth, is_first, is_last)
            }
        }
    }

    fn run_kernel(&mut self, i: usize, pass: Pass, source_value: f32) {
        let ctx = PassContext {
            material: &self.material,
            source: &self.source,
            width: self.params.width,
            height: self.params.height,
            total_depth: self.params.depth,
            dt: self.dt,
            dx: self.params.pixel_size,
            damping: self.params.artificial_damping_factor,
            yield_model: self.yield_model,
            cancel: self.cancel.clone(),
        };
        let result = match pass {
            Pass::Stress => self
                .kernel
                .step_stress(&mut self.chunks[i], &ctx, source_value),
            Pass::Velocity => self.kernel.step_velocity(&mut self.chunks[i], &ctx),
        };
        if let Err(e) = result {
            let chunk = &self.chunks[i];
            log::warn!(
                "GPU dispatch failed on chunk z=[{},{}): {}; re-running on CPU",
                chunk.start_z,
                chunk.end_z,
                e
            );
            self.kernel = Box::new(CpuKernel::new());
            let retry = match pass {
                Pass::Stress => self
                    .kernel
                    .step_stress(&mut self.chunks[i], &ctx, source_value),
                Pass::Velocity => self.kernel.step_velocity(&mut self.chunks[i], &ctx),
            };
            if let Err(e) = retry {
                log::error!("CPU retry failed unexpectedly: {}", e);
            }
        }
    }

    /// Receiver probe, snapshot contribution and throttled update events,
    /// taken while the chunk is still resident.
    fn after_chunk_velocity(&mut self, i: usize, step: u32) {
        let (w, h) = (self.params.width, self.params.height);
        let is_first = i == 0;
        let is_last = i == self.chunks.len() - 1;
        let chunk = &self.chunks[i];
        let fields = chunk.fields();

        let receiver = self.tracker.receiver();
        let lz = receiver[2] as i64 - chunk.start_z as i64;
        if lz >= 1 && lz <= chunk.depth() as i64 - 2 {
            let idx = voxel_index(receiver[0], receiver[1], lz as usize, w, h);
            self.probe_sample = Some([fields.vx[idx], fields.vy[idx], fields.vz[idx]]);
        }

        if let Some(snapshot) = self.active_snapshot.as_mut() {
            let stride = self.snapshot_stride;
            let owned_start = if is_first {
                chunk.start_z
            } else {
                chunk.start_z + 1
            };
            let owned_end = if is_last { chunk.end_z } else { chunk.end_z - 1 };
            for gz in owned_start..owned_end {
                if gz % stride != 0 {
                    continue;
                }
                let sz = gz / stride;
                let local_z = gz - chunk.start_z;
                for sy in 0..snapshot.height {
                    let y = sy * stride;
                    for sx in 0..snapshot.width {
                        let x = sx * stride;
                        let out = (sz * snapshot.height + sy) * snapshot.width + sx;
                        let src = voxel_index(x, y, local_z, w, h);
                        snapshot.vx[out] = fields.vx[src];
                        snapshot.vy[out] = fields.vy[src];
                        snapshot.vz[out] = fields.vz[src];
                    }
                }
            }
        }

        if step % UPDATE_EVENT_INTERVAL == 0
            && let Some(sink) = self.update_sink.as_mut()
        {
            sink.on_chunk_updated(
                &fields.vx,
                &fields.vy,
                &fields.vz,
                chunk.start_z,
                chunk.depth(),
                step,
                step as f32 * self.dt,
            );
        }
    }

    fn empty_snapshot(&self, step: u32) -> WaveFieldSnapshot {
        let stride = self.snapshot_stride;
        let width = self.params.width.div_ceil(stride);
        let height = self.params.height.div_ceil(stride);
        let depth = self.params.depth.div_ceil(stride);
        let len = width * height * depth;
        WaveFieldSnapshot {
            step,
            time_seconds: step as f32 * self.dt,
            width,
            height,
            depth,
            stride,
            vx: vec![0.0; len],
            vy: vec![0.0; len],
            vz: vec![0.0; len],
        }
    }

    /// Reload an offloaded chunk. A failed reload reverts the chunk to a
    /// zero-filled resident state so the run can continue.
    fn ensure_resident(&mut self, i: usize) {
        let chunk = &mut self.chunks[i];
        if chunk.is_resident() {
            return;
        }
        if let Err(e) = chunk.reload() {
            log::error!(
                "failed to reload chunk z=[{},{}): {}; restoring zeroed fields",
                chunk.start_z,
                chunk.end_z,
                e
            );
            chunk.clear_offload_path();
            chunk.reset_zeroed();
        }
    }

    fn offload_chunk(&mut self, i: usize) {
        if !self.offloading || self.cancel.is_cancelled() {
            return;
        }
        let dir = self.params.offload_directory.clone();
        let chunk = &mut self.chunks[i];
        if !chunk.is_resident() {
            return;
        }
        if let Err(e) = chunk.offload(&dir) {
            log::warn!(
                "failed to offload chunk z=[{},{}): {}; keeping it resident",
                chunk.start_z,
                chunk.end_z,
                e
            );
            chunk.clear_offload_path();
        }
    }

    #[cfg(test)]
    pub(crate) fn override_chunk_ranges(&mut self, ranges: &[(usize, usize)]) {
        self.chunks = ranges
            .iter()
            .map(|&(s, e)| {
                super::chunk::WaveFieldChunk::allocate(s, e, self.params.width, self.params.height)
            })
            .collect();
        self.offloading = self.params.enable_offloading && self.chunks.len() > 1;
        if self.offloading {
            let _ = std::fs::create_dir_all(&self.params.offload_directory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::voxel_index;
    use tempfile::tempdir;

    fn homogeneous_volume(params: &SimulationParameters) -> (Vec<u8>, Vec<f32>) {
        let n = params.voxel_count();
        (vec![0u8; n], vec![2500.0f32; n])
    }

    fn cube_params(size: usize, steps: u32) -> SimulationParameters {
        SimulationParameters {
            width: size,
            height: size,
            depth: size,
            pixel_size: 1e-3,
            time_steps: steps,
            source_frequency_khz: 30.0,
            source_amplitude: 1.0,
            source_energy_j: 1e-3,
            tx_position: [0.1, 0.5, 0.5],
            rx_position: [0.9, 0.5, 0.5],
            use_ricker_wavelet: true,
            youngs_modulus_mpa: 30_000.0,
            poisson_ratio: 0.25,
            ..Default::default()
        }
    }

    #[test]
    fn test_homogeneous_cube_p_wave_arrival() {
        let params = cube_params(64, 400);
        let (labels, density) = homogeneous_volume(&params);
        let mut solver =
            ChunkedSolver::new(params, VolumeInputs::new(&labels, &density)).unwrap();
        let results = solver.run();

        assert_eq!(results.total_time_steps, 400);
        assert!(results.p_wave_travel_time_steps > 0, "no P arrival");
        // E = 30 GPa, nu = 0.25, rho = 2500 -> Vp about 3795 m/s
        assert!(
            (3650.0..=3950.0).contains(&results.p_wave_velocity),
            "P velocity {} m/s",
            results.p_wave_velocity
        );
        assert!(results.s_wave_velocity > 0.0, "no S arrival");
        assert!(
            results.vp_vs_ratio >= 1.0 && results.vp_vs_ratio <= 1.9,
            "Vp/Vs {}",
            results.vp_vs_ratio
        );
        // Wave reached the far half of the volume
        let far = voxel_index(57, 32, 32, 64, 64);
        assert!(results.wave_field_vx[far] > 0.0);
    }

    #[test]
    fn test_chunked_matches_single_chunk() {
        let params = cube_params(32, 30);
        let (labels, density) = homogeneous_volume(&params);

        let mut single =
            ChunkedSolver::new(params.clone(), VolumeInputs::new(&labels, &density)).unwrap();
        single.override_chunk_ranges(&[(0, 32)]);
        let single_results = single.run();

        let mut chunked =
            ChunkedSolver::new(params, VolumeInputs::new(&labels, &density)).unwrap();
        chunked.override_chunk_ranges(&[(0, 12), (10, 22), (20, 32)]);
        let chunked_results = chunked.run();

        assert_eq!(
            single_results.p_wave_travel_time_steps,
            chunked_results.p_wave_travel_time_steps
        );
        let peak = single_results
            .wave_field_vx
            .iter()
            .fold(0.0f32, |m, &v| m.max(v));
        assert!(peak > 0.0, "wave never moved");
        for (i, (a, b)) in single_results
            .wave_field_vx
            .iter()
            .zip(chunked_results.wave_field_vx.iter())
            .enumerate()
        {
            assert!(
                (a - b).abs() <= 1e-5 * peak,
                "peak vx mismatch at {}: {} vs {}",
                i,
                a,
                b
            );
        }
    }

    #[test]
    fn test_offloading_matches_resident() {
        let dir = tempdir().unwrap();
        let base = cube_params(24, 20);
        let (labels, density) = homogeneous_volume(&base);
        let ranges = [(0, 10), (8, 18), (16, 24)];

        let mut resident =
            ChunkedSolver::new(base.clone(), VolumeInputs::new(&labels, &density)).unwrap();
        resident.override_chunk_ranges(&ranges);
        let resident_results = resident.run();

        let offload_params = SimulationParameters {
            enable_offloading: true,
            offload_directory: dir.path().to_path_buf(),
            ..base
        };
        let mut offloaded =
            ChunkedSolver::new(offload_params, VolumeInputs::new(&labels, &density)).unwrap();
        offloaded.override_chunk_ranges(&ranges);
        let offloaded_results = offloaded.run();

        assert_eq!(resident_results.wave_field_vx, offloaded_results.wave_field_vx);
        assert_eq!(resident_results.wave_field_vz, offloaded_results.wave_field_vz);
        // Scratch files are gone after the run
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    fn brittle_params(steps: u32) -> SimulationParameters {
        SimulationParameters {
            use_brittle_model: true,
            use_ricker_wavelet: false,
            cohesion_mpa: 1e-6,
            failure_angle_deg: 30.0,
            source_amplitude: 100.0,
            source_energy_j: 1.0,
            ..cube_params(24, steps)
        }
    }

    #[test]
    fn test_damage_grows_monotonically() {
        let (labels, density) = homogeneous_volume(&brittle_params(1));

        let mut early =
            ChunkedSolver::new(brittle_params(25), VolumeInputs::new(&labels, &density)).unwrap();
        let early_results = early.run();

        let mut late =
            ChunkedSolver::new(brittle_params(35), VolumeInputs::new(&labels, &density)).unwrap();
        let late_results = late.run();

        assert!(
            early_results.damage_field.iter().any(|&d| d > 0.0),
            "source never yielded"
        );
        for (i, (&d_early, &d_late)) in early_results
            .damage_field
            .iter()
            .zip(late_results.damage_field.iter())
            .enumerate()
        {
            assert!((0.0..=1.0).contains(&d_early));
            assert!((0.0..=1.0).contains(&d_late));
            assert!(
                d_late >= d_early,
                "damage shrank at {}: {} -> {}",
                i,
                d_early,
                d_late
            );
        }
    }

    struct CancelAt {
        token: CancelToken,
        at: u32,
    }

    impl ProgressSink for CancelAt {
        fn report(&mut self, _progress: f32, step: u32, _message: &str) {
            if step >= self.at {
                self.token.cancel();
            }
        }
    }

    #[test]
    fn test_cancellation_returns_partial_results() {
        let dir = tempdir().unwrap();
        let params = SimulationParameters {
            time_steps: 10_000,
            enable_offloading: true,
            offload_directory: dir.path().to_path_buf(),
            ..cube_params(16, 10_000)
        };
        let (labels, density) = homogeneous_volume(&params);
        let mut solver =
            ChunkedSolver::new(params, VolumeInputs::new(&labels, &density)).unwrap();
        solver.override_chunk_ranges(&[(0, 10), (8, 16)]);
        solver.set_progress_sink(Box::new(CancelAt {
            token: solver.cancel_token(),
            at: 50,
        }));

        let results = solver.run();
        assert!(
            (50..=52).contains(&results.total_time_steps),
            "stopped at {}",
            results.total_time_steps
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_nothing_selected_falls_back_and_stays_inert() {
        let params = SimulationParameters {
            selected_materials: vec![],
            time_steps: 10,
            ..cube_params(16, 10)
        };
        let (labels, density) = homogeneous_volume(&params);
        let mut solver =
            ChunkedSolver::new(params, VolumeInputs::new(&labels, &density)).unwrap();
        let results = solver.run();

        assert_eq!(results.p_wave_travel_time_steps, 0);
        assert_eq!(results.s_wave_travel_time_steps, 0);
        assert_eq!(results.p_wave_velocity, 0.0);
        assert!(results.wave_field_vx.iter().all(|&v| v == 0.0));
        assert!(results.damage_field.iter().all(|&d| d == 0.0));
    }

    #[test]
    fn test_incompressible_voxels_are_inert() {
        let params = SimulationParameters {
            poisson_ratio: 0.5,
            time_steps: 10,
            ..cube_params(16, 10)
        };
        let (labels, density) = homogeneous_volume(&params);
        let mut solver =
            ChunkedSolver::new(params, VolumeInputs::new(&labels, &density)).unwrap();
        let results = solver.run();
        assert!(results.wave_field_vx.iter().all(|&v| v == 0.0));
        assert_eq!(results.p_wave_travel_time_steps, 0);
    }

    #[test]
    fn test_damping_attenuates_peak_envelope() {
        let (labels, density) = homogeneous_volume(&cube_params(20, 100));

        let mut free =
            ChunkedSolver::new(cube_params(20, 100), VolumeInputs::new(&labels, &density))
                .unwrap();
        let free_results = free.run();

        let damped_params = SimulationParameters {
            artificial_damping_factor: 0.2,
            ..cube_params(20, 100)
        };
        let mut damped =
            ChunkedSolver::new(damped_params, VolumeInputs::new(&labels, &density)).unwrap();
        let damped_results = damped.run();

        let peak = |r: &SimulationResults| {
            r.wave_field_vx
                .iter()
                .fold(0.0f32, |m, &v| m.max(v))
        };
        let free_peak = peak(&free_results);
        let damped_peak = peak(&damped_results);
        assert!(free_peak > 0.0);
        assert!(
            free_peak >= damped_peak,
            "undamped {} vs damped {}",
            free_peak,
            damped_peak
        );
    }

    #[test]
    fn test_snapshots_emitted_on_interval() {
        let params = SimulationParameters {
            snapshot_interval: 8,
            time_steps: 20,
            ..cube_params(16, 20)
        };
        let (labels, density) = homogeneous_volume(&params);
        let mut solver =
            ChunkedSolver::new(params, VolumeInputs::new(&labels, &density)).unwrap();
        let results = solver.run();

        assert_eq!(results.snapshots.len(), 2);
        let first = &results.snapshots[0];
        assert_eq!(first.step, 8);
        assert_eq!(first.stride, 1);
        assert_eq!(first.width, 16);
        assert_eq!(first.vx.len(), 16 * 16 * 16);
        assert!((first.time_seconds - 8.0 * solver.dt()).abs() < 1e-12);
        assert_eq!(results.snapshots[1].step, 16);
    }

    struct RecordingSink {
        calls: std::sync::Arc<std::sync::Mutex<Vec<(usize, u32)>>>,
    }

    impl UpdateSink for RecordingSink {
        fn on_chunk_updated(
            &mut self,
            _vx: &[f32],
            _vy: &[f32],
            _vz: &[f32],
            start_z: usize,
            _depth: usize,
            step: u32,
            _sim_time: f32,
        ) {
            self.calls.lock().unwrap().push((start_z, step));
        }
    }

    #[test]
    fn test_update_events_throttled() {
        let params = cube_params(16, 12);
        let (labels, density) = homogeneous_volume(&params);
        let mut solver =
            ChunkedSolver::new(params, VolumeInputs::new(&labels, &density)).unwrap();
        solver.override_chunk_ranges(&[(0, 10), (8, 16)]);
        let calls = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        solver.set_update_sink(Box::new(RecordingSink {
            calls: calls.clone(),
        }));
        solver.run();

        let calls = calls.lock().unwrap();
        // Steps 5 and 10, two chunks each
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|&(_, step)| step % 5 == 0));
        assert!(calls.iter().any(|&(start_z, _)| start_z == 0));
        assert!(calls.iter().any(|&(start_z, _)| start_z == 8));
    }

    #[test]
    fn test_gpu_parity_on_peaks() {
        // Skip when no adapter is available
        if super::super::gpu::GpuKernel::new().is_err() {
            eprintln!("Skipping GPU test: no adapter available");
            return;
        }

        let (labels, density) = homogeneous_volume(&cube_params(16, 15));

        let mut cpu =
            ChunkedSolver::new(cube_params(16, 15), VolumeInputs::new(&labels, &density))
                .unwrap();
        let cpu_results = cpu.run();

        let gpu_params = SimulationParameters {
            use_gpu: true,
            ..cube_params(16, 15)
        };
        let mut gpu =
            ChunkedSolver::new(gpu_params, VolumeInputs::new(&labels, &density)).unwrap();
        let gpu_results = gpu.run();

        let norm: f32 = cpu_results
            .wave_field_vx
            .iter()
            .map(|v| v * v)
            .sum::<f32>()
            .sqrt();
        let diff: f32 = cpu_results
            .wave_field_vx
            .iter()
            .zip(gpu_results.wave_field_vx.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt();
        assert!(norm > 0.0);
        assert!(
            diff / norm < 1e-4,
            "CPU/GPU peak field mismatch: relative error {}",
            diff / norm
        );
    }
}
