//! Progress reporting, chunk-update notification and cooperative cancel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives per-step progress reports. Must not call back into the engine.
pub trait ProgressSink: Send {
    fn report(&mut self, progress: f32, step: u32, message: &str);
}

/// Receives throttled per-chunk velocity updates during the velocity pass.
/// Slices are the chunk's full local arrays; `start_z` is the chunk's
/// storage origin in global Z.
pub trait UpdateSink: Send {
    #[allow(clippy::too_many_arguments)]
    fn on_chunk_updated(
        &mut self,
        vx: &[f32],
        vy: &[f32],
        vz: &[f32],
        start_z: usize,
        depth: usize,
        step: u32,
        sim_time: f32,
    );
}

/// Shared cooperative cancellation flag.
///
/// Cloned tokens observe the same flag. The scheduler polls it before each
/// chunk kernel, between passes, inside the CPU kernel's outer loop and
/// before every disk operation.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
