//! Per-engine command encoding.
//!
//! The submission path is engine-agnostic; everything hardware-specific
//! (which flush packet, whether preemption checkpoints are emitted, worst
//! case record sizes) lives behind [`EngineDispatcher`]. Callers reserve the
//! worst-case size up front and encoders return the bytes actually used.

use opal_protocol::cmd::{
    BATCH_BUFFER_START_SIZE_BYTES, FLUSH_DW_SIZE_BYTES, PIPE_CONTROL_SIZE_BYTES,
    SINGLE_DWORD_SIZE_BYTES,
};
use opal_protocol::{CmdWriter, Generation};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Render,
    Blitter,
}

pub trait EngineDispatcher: Send {
    fn engine(&self) -> EngineKind;

    fn generation(&self) -> Generation;

    /// Size of a cache flush emitted ahead of a command buffer jump.
    fn preamble_size(&self) -> usize;

    /// Size of the jump record into a client command buffer.
    fn linkage_size(&self) -> usize;

    /// Upper bound on [`EngineDispatcher::encode_flush_and_fence`] output.
    /// Reservations use this bound; actual output may be smaller.
    fn max_epilogue_size(&self) -> usize;

    /// Size of the jump record back to the ring start.
    fn ring_switch_size(&self) -> usize {
        BATCH_BUFFER_START_SIZE_BYTES
    }

    /// Engine-appropriate cache flush, no completion write.
    fn encode_preamble_flush(&self, target: &mut [u8]) -> usize;

    /// Nested jump into the client's command buffer. The buffer itself ends
    /// with a batch buffer end, which returns execution to the ring.
    fn encode_command_buffer_linkage(&self, target: &mut [u8], buffer_gpu_address: u64) -> usize;

    /// Flush caches, then post a completion write of `sequence` to
    /// `fence_gpu_address`.
    fn encode_flush_and_fence(
        &self,
        target: &mut [u8],
        fence_gpu_address: u64,
        sequence: u64,
    ) -> usize;

    /// Top-level jump to `ring_start_gpu_address`, redirecting the consumer
    /// to offset 0.
    fn encode_ring_switch(&self, target: &mut [u8], ring_start_gpu_address: u64) -> usize;
}

/// Render/compute engine. Flushes and fences via PIPE_CONTROL.
pub struct RenderDispatcher {
    gen: Generation,
}

impl RenderDispatcher {
    pub fn new(gen: Generation) -> Self {
        Self { gen }
    }
}

impl EngineDispatcher for RenderDispatcher {
    fn engine(&self) -> EngineKind {
        EngineKind::Render
    }

    fn generation(&self) -> Generation {
        self.gen
    }

    fn preamble_size(&self) -> usize {
        PIPE_CONTROL_SIZE_BYTES
    }

    fn linkage_size(&self) -> usize {
        BATCH_BUFFER_START_SIZE_BYTES
    }

    fn max_epilogue_size(&self) -> usize {
        // Flush, fence write, optional preemption checkpoint.
        2 * PIPE_CONTROL_SIZE_BYTES + SINGLE_DWORD_SIZE_BYTES
    }

    fn encode_preamble_flush(&self, target: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(self.gen, target);
        w.pipe_control_flush(self.gen.render_flush_flags());
        w.written()
    }

    fn encode_command_buffer_linkage(&self, target: &mut [u8], buffer_gpu_address: u64) -> usize {
        let mut w = CmdWriter::new(self.gen, target);
        w.batch_buffer_start(buffer_gpu_address, true);
        w.written()
    }

    fn encode_flush_and_fence(
        &self,
        target: &mut [u8],
        fence_gpu_address: u64,
        sequence: u64,
    ) -> usize {
        let mut w = CmdWriter::new(self.gen, target);
        w.pipe_control_flush(self.gen.render_flush_flags());
        w.pipe_control_fence(0, fence_gpu_address, sequence);
        if self.gen.supports_preemption() {
            w.arb_check();
        }
        w.written()
    }

    fn encode_ring_switch(&self, target: &mut [u8], ring_start_gpu_address: u64) -> usize {
        let mut w = CmdWriter::new(self.gen, target);
        w.batch_buffer_start(ring_start_gpu_address, false);
        w.written()
    }
}

/// Copy engine. Flushes and fences via MI_FLUSH_DW; PIPE_CONTROL does not
/// exist on this engine.
pub struct BlitterDispatcher {
    gen: Generation,
}

impl BlitterDispatcher {
    pub fn new(gen: Generation) -> Self {
        Self { gen }
    }
}

impl EngineDispatcher for BlitterDispatcher {
    fn engine(&self) -> EngineKind {
        EngineKind::Blitter
    }

    fn generation(&self) -> Generation {
        self.gen
    }

    fn preamble_size(&self) -> usize {
        FLUSH_DW_SIZE_BYTES
    }

    fn linkage_size(&self) -> usize {
        BATCH_BUFFER_START_SIZE_BYTES
    }

    fn max_epilogue_size(&self) -> usize {
        FLUSH_DW_SIZE_BYTES + SINGLE_DWORD_SIZE_BYTES
    }

    fn encode_preamble_flush(&self, target: &mut [u8]) -> usize {
        let mut w = CmdWriter::new(self.gen, target);
        w.flush_dw();
        w.written()
    }

    fn encode_command_buffer_linkage(&self, target: &mut [u8], buffer_gpu_address: u64) -> usize {
        let mut w = CmdWriter::new(self.gen, target);
        w.batch_buffer_start(buffer_gpu_address, true);
        w.written()
    }

    fn encode_flush_and_fence(
        &self,
        target: &mut [u8],
        fence_gpu_address: u64,
        sequence: u64,
    ) -> usize {
        let mut w = CmdWriter::new(self.gen, target);
        w.flush_dw_fence(fence_gpu_address, sequence);
        if self.gen.supports_preemption() {
            w.arb_check();
        }
        w.written()
    }

    fn encode_ring_switch(&self, target: &mut [u8], ring_start_gpu_address: u64) -> usize {
        let mut w = CmdWriter::new(self.gen, target);
        w.batch_buffer_start(ring_start_gpu_address, false);
        w.written()
    }
}

/// Dispatcher for a (generation, engine) pair.
pub fn dispatcher_for(gen: Generation, engine: EngineKind) -> Box<dyn EngineDispatcher> {
    match engine {
        EngineKind::Render => Box::new(RenderDispatcher::new(gen)),
        EngineKind::Blitter => Box::new(BlitterDispatcher::new(gen)),
    }
}
