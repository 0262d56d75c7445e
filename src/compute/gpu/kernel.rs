//! GPU backend: wgpu compute pipelines for the stress and velocity
//! half-steps.
//!
//! Field components are packed into a few large storage buffers
//! (velocities 3N, stresses 6N, material 3N) to stay well inside the
//! per-stage storage buffer limit. Buffers live for one dispatch only.

use crate::schema::SourceAxis;

use super::super::chunk::WaveFieldChunk;
use super::super::kernel::{Kernel, PassContext};
use super::super::material::{MaterialModel, elastic_valid, lame_from_elastic};
use super::super::stress::DAMAGE_RATE;
use super::GpuError;

// Embed shader sources at compile time
const STRESS_SHADER: &str = include_str!("shaders/stress.wgsl");
const VELOCITY_SHADER: &str = include_str!("shaders/velocity.wgsl");

/// Uniform buffer struct for the stress shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct StressParams {
    width: u32,
    height: u32,
    depth: u32,
    chunk_start_z: u32,
    total_depth: u32,
    use_plastic: u32,
    use_brittle: u32,
    full_face: u32,
    source_axis: u32,
    src_x: u32,
    src_y: u32,
    src_z: u32,
    face_x: u32,
    face_y: u32,
    face_z: u32,
    _pad: u32,
    dt: f32,
    inv_dx: f32,
    damage_rate: f32,
    confining: f32,
    cohesion: f32,
    pressure_coefficient: f32,
    cohesion_term: f32,
    source_value: f32,
}

/// Uniform buffer struct for the velocity shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct VelocityParams {
    width: u32,
    height: u32,
    depth: u32,
    chunk_start_z: u32,
    total_depth: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
    dt: f32,
    inv_dx: f32,
    damping: f32,
    _pad3: f32,
}

/// GPU kernel backend using WebGPU compute shaders.
pub struct GpuKernel {
    device: wgpu::Device,
    queue: wgpu::Queue,
    stress_pipeline: wgpu::ComputePipeline,
    velocity_pipeline: wgpu::ComputePipeline,
    stress_bind_group_layout: wgpu::BindGroupLayout,
    velocity_bind_group_layout: wgpu::BindGroupLayout,
}

impl GpuKernel {
    /// Acquire a device and build both pipelines.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        // Large chunks need more than the default 128 MiB storage binding
        // limit; take whatever the adapter offers.
        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("rockwave GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await?;

        let stress_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Stress Shader"),
            source: wgpu::ShaderSource::Wgsl(STRESS_SHADER.into()),
        });
        let velocity_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Velocity Shader"),
            source: wgpu::ShaderSource::Wgsl(VELOCITY_SHADER.into()),
        });

        let stress_bind_group_layout = create_layout(
            &device,
            "Stress Bind Group Layout",
            &[Binding::Uniform, Binding::Read, Binding::Read, Binding::ReadWrite, Binding::ReadWrite],
        );
        let velocity_bind_group_layout = create_layout(
            &device,
            "Velocity Bind Group Layout",
            &[
                Binding::Uniform,
                Binding::Read,
                Binding::Read,
                Binding::Read,
                Binding::ReadWrite,
                Binding::ReadWrite,
            ],
        );

        let stress_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Stress Pipeline Layout"),
                bind_group_layouts: &[&stress_bind_group_layout],
                ..Default::default()
            });
        let velocity_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Velocity Pipeline Layout"),
                bind_group_layouts: &[&velocity_bind_group_layout],
                ..Default::default()
            });

        let stress_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Stress Pipeline"),
            layout: Some(&stress_pipeline_layout),
            module: &stress_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        let velocity_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Velocity Pipeline"),
            layout: Some(&velocity_pipeline_layout),
            module: &velocity_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            stress_pipeline,
            velocity_pipeline,
            stress_bind_group_layout,
            velocity_bind_group_layout,
        })
    }

    fn storage_buffer(&self, label: &str, data: &[f32], readback: bool) -> wgpu::Buffer {
        let mut usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        if readback {
            usage |= wgpu::BufferUsages::COPY_SRC;
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (data.len() * std::mem::size_of::<f32>()) as u64,
            usage,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&buffer, 0, bytemuck::cast_slice(data));
        buffer
    }

    fn uniform_buffer<T: bytemuck::Pod>(&self, label: &str, params: &T) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<T>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&buffer, 0, bytemuck::bytes_of(params));
        buffer
    }

    /// Map the staging buffer and copy its floats out.
    fn read_staging(&self, staging: &wgpu::Buffer, out: &mut [f32]) -> Result<(), GpuError> {
        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
        self.device.poll(wgpu::PollType::wait_indefinitely()).ok();
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(GpuError::BufferMap(e)),
            Err(_) => return Err(GpuError::ReadbackInterrupted),
        }
        {
            let data = slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice(&data));
        }
        staging.unmap();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        label: &str,
        width: u32,
        height: u32,
        depth: u32,
        copies: &[(&wgpu::Buffer, u64, &wgpu::Buffer, u64, u64)],
    ) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(width.div_ceil(8), height.div_ceil(8), depth.div_ceil(4));
        }
        for &(src, src_off, dst, dst_off, size) in copies {
            encoder.copy_buffer_to_buffer(src, src_off, dst, dst_off, size);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl Kernel for GpuKernel {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn step_stress(
        &mut self,
        chunk: &mut WaveFieldChunk,
        ctx: &PassContext<'_>,
        source_value: f32,
    ) -> Result<(), GpuError> {
        let (w, h) = (ctx.width, ctx.height);
        let depth = chunk.depth();
        let n = w * h * depth;
        let f32_size = std::mem::size_of::<f32>() as u64;

        let source = ctx.source.gpu_description();
        let params = StressParams {
            width: w as u32,
            height: h as u32,
            depth: depth as u32,
            chunk_start_z: chunk.start_z as u32,
            total_depth: ctx.total_depth as u32,
            use_plastic: ctx.yield_model.use_plastic as u32,
            use_brittle: ctx.yield_model.use_brittle as u32,
            full_face: source.full_face as u32,
            source_axis: match source.axis {
                SourceAxis::X => 0,
                SourceAxis::Y => 1,
                SourceAxis::Z => 2,
            },
            src_x: source.point[0] as u32,
            src_y: source.point[1] as u32,
            src_z: source.point[2] as u32,
            face_x: source.face[0] as u32,
            face_y: source.face[1] as u32,
            face_z: source.face[2] as u32,
            _pad: 0,
            dt: ctx.dt,
            inv_dx: 1.0 / ctx.dx,
            damage_rate: DAMAGE_RATE,
            confining: ctx.yield_model.confining_pa,
            cohesion: ctx.yield_model.cohesion_pa,
            pressure_coefficient: ctx.yield_model.pressure_coefficient,
            cohesion_term: ctx.yield_model.cohesion_term,
            source_value,
        };

        let mat_data = pack_material(ctx.material, chunk.start_z, depth, w * h);
        let fields = chunk.fields_mut();
        let vel_data = pack3(&fields.vx, &fields.vy, &fields.vz);
        let stress_data = pack6(
            &fields.sxx, &fields.syy, &fields.szz, &fields.sxy, &fields.sxz, &fields.syz,
        );

        let params_buffer = self.uniform_buffer("Stress Params", &params);
        let vel_buffer = self.storage_buffer("Velocity Buffer", &vel_data, false);
        let mat_buffer = self.storage_buffer("Material Buffer", &mat_data, false);
        let stress_buffer = self.storage_buffer("Stress Buffer", &stress_data, true);
        let damage_buffer = self.storage_buffer("Damage Buffer", &fields.damage, true);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Stress Staging"),
            size: 7 * n as u64 * f32_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Stress Bind Group"),
            layout: &self.stress_bind_group_layout,
            entries: &[
                entry(0, &params_buffer),
                entry(1, &vel_buffer),
                entry(2, &mat_buffer),
                entry(3, &stress_buffer),
                entry(4, &damage_buffer),
            ],
        });

        self.dispatch(
            &self.stress_pipeline,
            &bind_group,
            "Stress Pass",
            w as u32,
            h as u32,
            depth as u32,
            &[
                (&stress_buffer, 0, &staging, 0, 6 * n as u64 * f32_size),
                (&damage_buffer, 0, &staging, 6 * n as u64 * f32_size, n as u64 * f32_size),
            ],
        );

        let mut readback = vec![0.0f32; 7 * n];
        self.read_staging(&staging, &mut readback)?;

        fields.sxx.copy_from_slice(&readback[..n]);
        fields.syy.copy_from_slice(&readback[n..2 * n]);
        fields.szz.copy_from_slice(&readback[2 * n..3 * n]);
        fields.sxy.copy_from_slice(&readback[3 * n..4 * n]);
        fields.sxz.copy_from_slice(&readback[4 * n..5 * n]);
        fields.syz.copy_from_slice(&readback[5 * n..6 * n]);
        fields.damage.copy_from_slice(&readback[6 * n..]);
        Ok(())
    }

    fn step_velocity(
        &mut self,
        chunk: &mut WaveFieldChunk,
        ctx: &PassContext<'_>,
    ) -> Result<(), GpuError> {
        let (w, h) = (ctx.width, ctx.height);
        let depth = chunk.depth();
        let n = w * h * depth;
        let f32_size = std::mem::size_of::<f32>() as u64;

        let params = VelocityParams {
            width: w as u32,
            height: h as u32,
            depth: depth as u32,
            chunk_start_z: chunk.start_z as u32,
            total_depth: ctx.total_depth as u32,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
            dt: ctx.dt,
            inv_dx: 1.0 / ctx.dx,
            damping: ctx.damping,
            _pad3: 0.0,
        };

        let mat_data = pack_material(ctx.material, chunk.start_z, depth, w * h);
        let fields = chunk.fields_mut();
        let vel_data = pack3(&fields.vx, &fields.vy, &fields.vz);
        let stress_data = pack6(
            &fields.sxx, &fields.syy, &fields.szz, &fields.sxy, &fields.sxz, &fields.syz,
        );
        let maxabs_data = pack3(&fields.max_abs_vx, &fields.max_abs_vy, &fields.max_abs_vz);

        let params_buffer = self.uniform_buffer("Velocity Params", &params);
        let stress_buffer = self.storage_buffer("Stress Buffer", &stress_data, false);
        let vel_in_buffer = self.storage_buffer("Velocity In Buffer", &vel_data, false);
        let mat_buffer = self.storage_buffer("Material Buffer", &mat_data, false);
        let vel_out_buffer = self.storage_buffer("Velocity Out Buffer", &vel_data, true);
        let maxabs_buffer = self.storage_buffer("Peak Buffer", &maxabs_data, true);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Velocity Staging"),
            size: 6 * n as u64 * f32_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Velocity Bind Group"),
            layout: &self.velocity_bind_group_layout,
            entries: &[
                entry(0, &params_buffer),
                entry(1, &stress_buffer),
                entry(2, &vel_in_buffer),
                entry(3, &mat_buffer),
                entry(4, &vel_out_buffer),
                entry(5, &maxabs_buffer),
            ],
        });

        self.dispatch(
            &self.velocity_pipeline,
            &bind_group,
            "Velocity Pass",
            w as u32,
            h as u32,
            depth as u32,
            &[
                (&vel_out_buffer, 0, &staging, 0, 3 * n as u64 * f32_size),
                (&maxabs_buffer, 0, &staging, 3 * n as u64 * f32_size, 3 * n as u64 * f32_size),
            ],
        );

        let mut readback = vec![0.0f32; 6 * n];
        self.read_staging(&staging, &mut readback)?;

        fields.vx.copy_from_slice(&readback[..n]);
        fields.vy.copy_from_slice(&readback[n..2 * n]);
        fields.vz.copy_from_slice(&readback[2 * n..3 * n]);
        fields.max_abs_vx.copy_from_slice(&readback[3 * n..4 * n]);
        fields.max_abs_vy.copy_from_slice(&readback[4 * n..5 * n]);
        fields.max_abs_vz.copy_from_slice(&readback[5 * n..]);
        Ok(())
    }
}

enum Binding {
    Uniform,
    Read,
    ReadWrite,
}

fn create_layout(
    device: &wgpu::Device,
    label: &str,
    bindings: &[Binding],
) -> wgpu::BindGroupLayout {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
        .iter()
        .enumerate()
        .map(|(i, binding)| wgpu::BindGroupLayoutEntry {
            binding: i as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: match binding {
                    Binding::Uniform => wgpu::BufferBindingType::Uniform,
                    Binding::Read => wgpu::BufferBindingType::Storage { read_only: true },
                    Binding::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

fn entry<'a>(binding: u32, buffer: &'a wgpu::Buffer) -> wgpu::BindGroupEntry<'a> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn pack3(a: &[f32], b: &[f32], c: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(a.len() * 3);
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out.extend_from_slice(c);
    out
}

fn pack6(a: &[f32], b: &[f32], c: &[f32], d: &[f32], e: &[f32], f: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(a.len() * 6);
    for s in [a, b, c, d, e, f] {
        out.extend_from_slice(s);
    }
    out
}

/// Pack per-voxel material data for a chunk slab: `[lambda | mu | rho]`.
///
/// Invalid elastics encode as `lambda = mu = -1`; deselected voxels as
/// `rho = -1`; selected voxels carry `max(rho, 0)`.
fn pack_material(
    material: &MaterialModel<'_>,
    start_z: usize,
    depth: usize,
    plane: usize,
) -> Vec<f32> {
    let n = plane * depth;
    let offset = start_z * plane;
    let mut mat = vec![0.0f32; 3 * n];
    let (lam_s, rest) = mat.split_at_mut(n);
    let (mu_s, rho_s) = rest.split_at_mut(n);
    for i in 0..n {
        let g = offset + i;
        let (e_mpa, nu) = material.elastic(g);
        if elastic_valid(e_mpa, nu) {
            let lame = lame_from_elastic(e_mpa * 1e6, nu);
            lam_s[i] = lame.lambda;
            mu_s[i] = lame.mu;
        } else {
            lam_s[i] = -1.0;
            mu_s[i] = -1.0;
        }
        rho_s[i] = if material.is_selected(g) {
            material.density(g).max(0.0)
        } else {
            -1.0
        };
    }
    mat
}
