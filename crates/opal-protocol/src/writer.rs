//! Safe command writer.
//!
//! Encodes canonical packets (correct header length fields, lo/hi address
//! splits) into a caller-provided byte range. Callers size the target via the
//! dispatcher's worst-case bounds, so running out of space here is a logic
//! error and asserts rather than returning a result.

use crate::cmd::{
    CmdHeader, CmdOp, BATCH_BUFFER_START_SECOND_LEVEL, BATCH_BUFFER_START_SIZE_BYTES,
    FLUSH_DW_POST_SYNC_WRITE_IMM, FLUSH_DW_SIZE_BYTES, PIPE_CONTROL_POST_SYNC_WRITE_IMM,
    PIPE_CONTROL_SIZE_BYTES, SINGLE_DWORD_SIZE_BYTES,
};
use crate::gen::Generation;

pub struct CmdWriter<'a> {
    gen: Generation,
    buf: &'a mut [u8],
    cursor: usize,
}

impl<'a> CmdWriter<'a> {
    pub fn new(gen: Generation, buf: &'a mut [u8]) -> Self {
        Self { gen, buf, cursor: 0 }
    }

    /// Bytes encoded so far.
    pub fn written(&self) -> usize {
        self.cursor
    }

    fn put_u32(&mut self, v: u32) {
        assert!(
            self.cursor + 4 <= self.buf.len(),
            "command writer overflow: target sized below the dispatcher's worst-case bound"
        );
        self.buf[self.cursor..self.cursor + 4].copy_from_slice(&v.to_le_bytes());
        self.cursor += 4;
    }

    fn put_header(&mut self, op: CmdOp, size_bytes: usize) {
        self.put_u32(
            CmdHeader {
                opcode_value: self.gen.opcode_value(op),
                dword_len: (size_bytes / 4) as u8,
            }
            .encode(),
        );
    }

    fn put_u64_split(&mut self, v: u64) {
        self.put_u32(v as u32);
        self.put_u32((v >> 32) as u32);
    }

    pub fn noop(&mut self) -> usize {
        self.put_header(CmdOp::Noop, SINGLE_DWORD_SIZE_BYTES);
        SINGLE_DWORD_SIZE_BYTES
    }

    pub fn batch_buffer_end(&mut self) -> usize {
        self.put_header(CmdOp::BatchBufferEnd, SINGLE_DWORD_SIZE_BYTES);
        SINGLE_DWORD_SIZE_BYTES
    }

    pub fn arb_check(&mut self) -> usize {
        self.put_header(CmdOp::ArbCheck, SINGLE_DWORD_SIZE_BYTES);
        SINGLE_DWORD_SIZE_BYTES
    }

    pub fn batch_buffer_start(&mut self, gpu_address: u64, second_level: bool) -> usize {
        self.put_header(CmdOp::BatchBufferStart, BATCH_BUFFER_START_SIZE_BYTES);
        self.put_u32(if second_level {
            BATCH_BUFFER_START_SECOND_LEVEL
        } else {
            0
        });
        self.put_u64_split(gpu_address);
        BATCH_BUFFER_START_SIZE_BYTES
    }

    /// Render-engine flush with no post-sync write.
    pub fn pipe_control_flush(&mut self, flush_flags: u32) -> usize {
        self.pipe_control(flush_flags, 0, 0)
    }

    /// Render-engine flush plus a post-sync immediate write of `value` to
    /// `address` once the flush retires.
    pub fn pipe_control_fence(&mut self, flush_flags: u32, address: u64, value: u64) -> usize {
        self.pipe_control(flush_flags | PIPE_CONTROL_POST_SYNC_WRITE_IMM, address, value)
    }

    fn pipe_control(&mut self, flags: u32, address: u64, value: u64) -> usize {
        self.put_header(CmdOp::PipeControl, PIPE_CONTROL_SIZE_BYTES);
        self.put_u32(flags);
        self.put_u64_split(address);
        self.put_u64_split(value);
        self.put_u32(0); // reserved
        PIPE_CONTROL_SIZE_BYTES
    }

    /// Blitter-engine flush with no post-sync write.
    pub fn flush_dw(&mut self) -> usize {
        self.flush_dw_raw(0, 0, 0)
    }

    /// Blitter-engine flush plus a post-sync immediate write.
    pub fn flush_dw_fence(&mut self, address: u64, value: u64) -> usize {
        self.flush_dw_raw(FLUSH_DW_POST_SYNC_WRITE_IMM, address, value)
    }

    fn flush_dw_raw(&mut self, flags: u32, address: u64, value: u64) -> usize {
        self.put_header(CmdOp::FlushDw, FLUSH_DW_SIZE_BYTES);
        self.put_u32(flags);
        self.put_u64_split(address);
        self.put_u64_split(value);
        FLUSH_DW_SIZE_BYTES
    }
}
