//! GPU compute backend for the wave kernels.
//!
//! Provides GPU-accelerated stress and velocity half-steps using WebGPU
//! (wgpu). Device buffers are created per chunk dispatch and released
//! after readback to bound device memory.

mod kernel;

pub use kernel::GpuKernel;

/// Error type for GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("GPU readback interrupted")]
    ReadbackInterrupted,
}
