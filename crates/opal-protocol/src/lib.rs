//! Hardware command stream layouts for the Opal direct submission runtime.
//!
//! Commands are little-endian dword streams. Every packet begins with a
//! header dword encoding the opcode and the packet length; the remaining
//! layout is fixed per packet type. Numeric opcode values are owned by the
//! per-generation tables in [`gen`]; everything else (packet shapes, the
//! writer, decode) is generation-independent.

pub mod cmd;
pub mod gen;
pub mod writer;

pub use cmd::{
    decode_at, BatchBufferStart, CmdDecodeError, CmdHeader, CmdOp, DecodedCmd, FlushDw, PipeControl,
    BATCH_BUFFER_START_SIZE_BYTES, FLUSH_DW_SIZE_BYTES, PIPE_CONTROL_SIZE_BYTES, SINGLE_DWORD_SIZE_BYTES,
};
pub use gen::Generation;
pub use writer::CmdWriter;
