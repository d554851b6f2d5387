//! Per-generation opcode tables and feature flags.
//!
//! The dispatch protocol never changes across generations; only the numeric
//! opcode values, the render flush mask, and preemption support differ. The
//! generation is selected once at engine-context creation and never switched
//! mid-stream.

use crate::cmd::{
    CmdOp, PIPE_CONTROL_DC_FLUSH, PIPE_CONTROL_DEPTH_CACHE_FLUSH, PIPE_CONTROL_RENDER_TARGET_FLUSH,
    PIPE_CONTROL_TILE_CACHE_FLUSH,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Generation {
    Gen9,
    Gen12,
}

struct OpcodeTable {
    noop: u8,
    batch_buffer_end: u8,
    batch_buffer_start: u8,
    pipe_control: u8,
    flush_dw: u8,
    arb_check: u8,
}

const GEN9_OPCODES: OpcodeTable = OpcodeTable {
    noop: 0x00,
    batch_buffer_end: 0x0a,
    batch_buffer_start: 0x31,
    pipe_control: 0x7a,
    flush_dw: 0x26,
    arb_check: 0x05,
};

// Gen12 re-numbered the two-engine flush opcodes; MI_* values are unchanged.
const GEN12_OPCODES: OpcodeTable = OpcodeTable {
    noop: 0x00,
    batch_buffer_end: 0x0a,
    batch_buffer_start: 0x31,
    pipe_control: 0x7e,
    flush_dw: 0x27,
    arb_check: 0x05,
};

impl Generation {
    fn table(self) -> &'static OpcodeTable {
        match self {
            Generation::Gen9 => &GEN9_OPCODES,
            Generation::Gen12 => &GEN12_OPCODES,
        }
    }

    pub fn opcode_value(self, op: CmdOp) -> u8 {
        let t = self.table();
        match op {
            CmdOp::Noop => t.noop,
            CmdOp::BatchBufferEnd => t.batch_buffer_end,
            CmdOp::BatchBufferStart => t.batch_buffer_start,
            CmdOp::PipeControl => t.pipe_control,
            CmdOp::FlushDw => t.flush_dw,
            CmdOp::ArbCheck => t.arb_check,
        }
    }

    pub fn opcode_from_value(self, value: u8) -> Option<CmdOp> {
        let t = self.table();
        // Tables are injective; match in fixed order.
        if value == t.noop {
            Some(CmdOp::Noop)
        } else if value == t.batch_buffer_end {
            Some(CmdOp::BatchBufferEnd)
        } else if value == t.batch_buffer_start {
            Some(CmdOp::BatchBufferStart)
        } else if value == t.pipe_control {
            Some(CmdOp::PipeControl)
        } else if value == t.flush_dw {
            Some(CmdOp::FlushDw)
        } else if value == t.arb_check {
            Some(CmdOp::ArbCheck)
        } else {
            None
        }
    }

    /// Whether epilogues must carry a preemption checkpoint.
    pub fn supports_preemption(self) -> bool {
        match self {
            Generation::Gen9 => false,
            Generation::Gen12 => true,
        }
    }

    /// Cache-flush bits a render epilogue must set before the fence write is
    /// hardware-guaranteed visible.
    pub fn render_flush_flags(self) -> u32 {
        match self {
            Generation::Gen9 => {
                PIPE_CONTROL_RENDER_TARGET_FLUSH | PIPE_CONTROL_DEPTH_CACHE_FLUSH | PIPE_CONTROL_DC_FLUSH
            }
            Generation::Gen12 => {
                PIPE_CONTROL_RENDER_TARGET_FLUSH
                    | PIPE_CONTROL_DEPTH_CACHE_FLUSH
                    | PIPE_CONTROL_DC_FLUSH
                    | PIPE_CONTROL_TILE_CACHE_FLUSH
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_tables_round_trip() {
        for gen in [Generation::Gen9, Generation::Gen12] {
            for op in [
                CmdOp::Noop,
                CmdOp::BatchBufferEnd,
                CmdOp::BatchBufferStart,
                CmdOp::PipeControl,
                CmdOp::FlushDw,
                CmdOp::ArbCheck,
            ] {
                assert_eq!(gen.opcode_from_value(gen.opcode_value(op)), Some(op));
            }
        }
    }

    #[test]
    fn gen12_tile_cache_flush_is_in_render_mask() {
        assert_eq!(
            Generation::Gen12.render_flush_flags() & PIPE_CONTROL_TILE_CACHE_FLUSH,
            PIPE_CONTROL_TILE_CACHE_FLUSH
        );
        assert_eq!(
            Generation::Gen9.render_flush_flags() & PIPE_CONTROL_TILE_CACHE_FLUSH,
            0
        );
    }
}
