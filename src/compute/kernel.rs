//! Kernel backend abstraction: one stress and one velocity half-step per
//! chunk, implemented on the CPU (rayon over Z planes) or the GPU (wgpu
//! compute pipelines).

use super::chunk::WaveFieldChunk;
use super::gpu::GpuError;
use super::material::MaterialModel;
use super::monitor::CancelToken;
use super::source::SourceInjector;
use super::stress::{YieldModel, stress_pass_cpu};
use super::velocity::{VelocityScratch, velocity_pass_cpu};

/// Everything a kernel invocation needs besides the chunk itself.
pub struct PassContext<'a> {
    pub material: &'a MaterialModel<'a>,
    pub source: &'a SourceInjector,
    pub width: usize,
    pub height: usize,
    pub total_depth: usize,
    pub dt: f32,
    pub dx: f32,
    pub damping: f32,
    pub yield_model: YieldModel,
    pub cancel: CancelToken,
}

/// A compute backend for the two half-steps.
///
/// Implementations mutate exactly one chunk per call and must leave it
/// untouched on error so the scheduler can re-run it elsewhere.
pub trait Kernel {
    fn name(&self) -> &'static str;

    /// Inject the source term and update the six stress components plus
    /// damage from the chunk's velocities.
    fn step_stress(
        &mut self,
        chunk: &mut WaveFieldChunk,
        ctx: &PassContext<'_>,
        source_value: f32,
    ) -> Result<(), GpuError>;

    /// Update the three velocity components and their peaks from the
    /// chunk's stresses.
    fn step_velocity(
        &mut self,
        chunk: &mut WaveFieldChunk,
        ctx: &PassContext<'_>,
    ) -> Result<(), GpuError>;
}

/// Rayon-parallel CPU backend with per-chunk scratch buffers.
#[derive(Default)]
pub struct CpuKernel {
    scratch: VelocityScratch,
}

impl CpuKernel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Kernel for CpuKernel {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn step_stress(
        &mut self,
        chunk: &mut WaveFieldChunk,
        ctx: &PassContext<'_>,
        source_value: f32,
    ) -> Result<(), GpuError> {
        let start_z = chunk.start_z;
        let depth = chunk.depth();
        let fields = chunk.fields_mut();
        ctx.source
            .inject(fields, ctx.material, start_z, depth, source_value);
        stress_pass_cpu(
            fields,
            ctx.material,
            ctx.width,
            ctx.height,
            start_z,
            depth,
            ctx.dt,
            ctx.dx,
            &ctx.yield_model,
            &ctx.cancel,
        );
        Ok(())
    }

    fn step_velocity(
        &mut self,
        chunk: &mut WaveFieldChunk,
        ctx: &PassContext<'_>,
    ) -> Result<(), GpuError> {
        let start_z = chunk.start_z;
        let depth = chunk.depth();
        velocity_pass_cpu(
            chunk.fields_mut(),
            &mut self.scratch,
            ctx.material,
            ctx.width,
            ctx.height,
            start_z,
            depth,
            ctx.total_depth,
            ctx.dt,
            ctx.dx,
            ctx.damping,
            &ctx.cancel,
        );
        Ok(())
    }
}
