use std::time::Duration;

use thiserror::Error;

use crate::direct::State;
use crate::transport::TransportError;

/// Failures surfaced by the direct submission path.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("engine context is already initialized")]
    AlreadyInitialized,

    #[error("engine context is not accepting work (state {state:?})")]
    NotActive { state: State },

    #[error(
        "command buffer cannot be submitted: {needed} bytes needed, ring capacity is {capacity}"
    )]
    OversizedCommandBuffer { needed: u64, capacity: u64 },

    /// Ring space reuse stalled past the configured timeout. Recoverable:
    /// the context stays active and a later retry may succeed.
    #[error("possible hang: sequence {sequence} still pending after {waited:?}")]
    PossibleHang { sequence: u64, waited: Duration },

    /// Transport failures are fatal; the context transitions to Stopped.
    #[error("submission transport failed")]
    Transport(#[from] TransportError),
}
