//! Command packet layouts.
//!
//! Every packet starts with a header dword `(opcode << 24) | (dword_len - 1)`.
//! Addresses and fence values are 64-bit, split lo/hi across two dwords.

use crate::gen::Generation;

pub const SINGLE_DWORD_SIZE_BYTES: usize = 4;
pub const BATCH_BUFFER_START_SIZE_BYTES: usize = 16;
pub const PIPE_CONTROL_SIZE_BYTES: usize = 28;
pub const FLUSH_DW_SIZE_BYTES: usize = 24;

/// Logical command opcodes. Numeric values differ per [`Generation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdOp {
    /// Padding; no effect.
    Noop,
    /// Ends a nested command buffer; execution resumes after the launching
    /// batch-buffer-start in the parent stream.
    BatchBufferEnd,
    /// Jump. First-level redirects the ring's program counter (ring switch);
    /// second-level executes a nested buffer and returns.
    BatchBufferStart,
    /// Render-engine pipeline flush, optionally with a post-sync 64-bit
    /// immediate write once the flush retires.
    PipeControl,
    /// Blitter-engine flush, optionally with a post-sync immediate write.
    FlushDw,
    /// Preemption checkpoint.
    ArbCheck,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmdHeader {
    pub opcode_value: u8,
    pub dword_len: u8,
}

impl CmdHeader {
    pub fn encode(self) -> u32 {
        debug_assert!(self.dword_len >= 1);
        (u32::from(self.opcode_value) << 24) | u32::from(self.dword_len - 1)
    }

    pub fn decode(dword: u32) -> Self {
        Self {
            opcode_value: (dword >> 24) as u8,
            // Low byte is `dword_len - 1`; bits 8..24 are reserved-zero.
            dword_len: (dword & 0xff) as u8 + 1,
        }
    }
}

/// `BATCH_BUFFER_START` flags dword, bit 0.
pub const BATCH_BUFFER_START_SECOND_LEVEL: u32 = 1 << 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchBufferStart {
    pub flags: u32,
    pub gpu_address: u64,
}

impl BatchBufferStart {
    pub fn is_second_level(&self) -> bool {
        self.flags & BATCH_BUFFER_START_SECOND_LEVEL != 0
    }
}

/// `PIPE_CONTROL` flags dword bits.
pub const PIPE_CONTROL_RENDER_TARGET_FLUSH: u32 = 1 << 0;
pub const PIPE_CONTROL_DEPTH_CACHE_FLUSH: u32 = 1 << 1;
pub const PIPE_CONTROL_DC_FLUSH: u32 = 1 << 2;
pub const PIPE_CONTROL_TILE_CACHE_FLUSH: u32 = 1 << 3;
pub const PIPE_CONTROL_POST_SYNC_WRITE_IMM: u32 = 1 << 14;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipeControl {
    pub flags: u32,
    pub address: u64,
    pub value: u64,
}

impl PipeControl {
    pub fn writes_post_sync(&self) -> bool {
        self.flags & PIPE_CONTROL_POST_SYNC_WRITE_IMM != 0
    }
}

/// `MI_FLUSH_DW` flags dword bits.
pub const FLUSH_DW_POST_SYNC_WRITE_IMM: u32 = 1 << 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushDw {
    pub flags: u32,
    pub address: u64,
    pub value: u64,
}

impl FlushDw {
    pub fn writes_post_sync(&self) -> bool {
        self.flags & FLUSH_DW_POST_SYNC_WRITE_IMM != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdDecodeError {
    /// Fewer bytes remain than the smallest packet.
    Truncated { remaining: usize },
    /// The header's opcode value is not defined for this generation.
    UnknownOpcode { opcode_value: u8 },
    /// The header's length field does not match the packet's fixed layout.
    BadLength { op: CmdOp, dword_len: u8 },
}

impl core::fmt::Display for CmdDecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CmdDecodeError::Truncated { remaining } => {
                write!(f, "truncated command stream ({remaining} bytes remaining)")
            }
            CmdDecodeError::UnknownOpcode { opcode_value } => {
                write!(f, "unknown opcode value {opcode_value:#04x}")
            }
            CmdDecodeError::BadLength { op, dword_len } => {
                write!(f, "bad dword length {dword_len} for {op:?}")
            }
        }
    }
}

impl std::error::Error for CmdDecodeError {}

/// A fully decoded packet, as consumed by ring walkers and diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodedCmd {
    Noop,
    BatchBufferEnd,
    ArbCheck,
    BatchBufferStart(BatchBufferStart),
    PipeControl(PipeControl),
    FlushDw(FlushDw),
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from(read_u32(buf, offset)) | (u64::from(read_u32(buf, offset + 4)) << 32)
}

/// Decode the packet at the start of `buf`, returning it and its encoded size.
pub fn decode_at(gen: Generation, buf: &[u8]) -> Result<(DecodedCmd, usize), CmdDecodeError> {
    if buf.len() < SINGLE_DWORD_SIZE_BYTES {
        return Err(CmdDecodeError::Truncated { remaining: buf.len() });
    }
    let header = CmdHeader::decode(read_u32(buf, 0));
    let op = gen
        .opcode_from_value(header.opcode_value)
        .ok_or(CmdDecodeError::UnknownOpcode {
            opcode_value: header.opcode_value,
        })?;

    let size_bytes = usize::from(header.dword_len) * 4;
    let expected = match op {
        CmdOp::Noop | CmdOp::BatchBufferEnd | CmdOp::ArbCheck => SINGLE_DWORD_SIZE_BYTES,
        CmdOp::BatchBufferStart => BATCH_BUFFER_START_SIZE_BYTES,
        CmdOp::PipeControl => PIPE_CONTROL_SIZE_BYTES,
        CmdOp::FlushDw => FLUSH_DW_SIZE_BYTES,
    };
    if size_bytes != expected {
        return Err(CmdDecodeError::BadLength {
            op,
            dword_len: header.dword_len,
        });
    }
    if buf.len() < size_bytes {
        return Err(CmdDecodeError::Truncated { remaining: buf.len() });
    }

    let decoded = match op {
        CmdOp::Noop => DecodedCmd::Noop,
        CmdOp::BatchBufferEnd => DecodedCmd::BatchBufferEnd,
        CmdOp::ArbCheck => DecodedCmd::ArbCheck,
        CmdOp::BatchBufferStart => DecodedCmd::BatchBufferStart(BatchBufferStart {
            flags: read_u32(buf, 4),
            gpu_address: read_u64(buf, 8),
        }),
        CmdOp::PipeControl => DecodedCmd::PipeControl(PipeControl {
            flags: read_u32(buf, 4),
            address: read_u64(buf, 8),
            value: read_u64(buf, 16),
        }),
        CmdOp::FlushDw => DecodedCmd::FlushDw(FlushDw {
            flags: read_u32(buf, 4),
            address: read_u64(buf, 8),
            value: read_u64(buf, 16),
        }),
    };
    Ok((decoded, size_bytes))
}
