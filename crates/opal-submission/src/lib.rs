//! Direct submission runtime for Opal engine contexts.
//!
//! Streams client command buffers into a GPU-visible ring without a kernel
//! round trip per submission: the host appends a jump into the client buffer
//! plus a flush-and-fence epilogue, rings the platform doorbell, and tracks
//! completion through a GPU-written fence page. One [`DirectSubmission`] per
//! engine context; dispatch is single-producer, completion queries are
//! thread-safe through the shared [`CompletionMonitor`].

pub mod direct;
pub mod dispatcher;
pub mod error;
pub mod fence;
pub mod ring;
pub mod transport;

pub use direct::{
    CommandBufferDescriptor, DirectSubmission, DirectSubmissionConfig, State, SubmissionObserver,
    SubmissionStats, SUBMIT_FLAG_CACHE_FLUSH_BEFORE, SUBMIT_FLAG_NONE,
};
pub use dispatcher::{
    dispatcher_for, BlitterDispatcher, EngineDispatcher, EngineKind, RenderDispatcher,
};
pub use error::SubmitError;
pub use fence::{CompletionMonitor, FencePage, PollPolicy, WaitResult};
pub use ring::{RingBuffer, RingDescriptor, RingReserveError};
pub use transport::{SubmissionTransport, TransportError, TransportHandle};
