//! Platform submission transport.
//!
//! Abstracts how a ring is made known to the device and how new work is
//! signalled. On real hardware this is a KMD ioctl plus a doorbell register;
//! tests plug in an in-process double.

use thiserror::Error;

use crate::ring::RingDescriptor;

/// Opaque per-ring token returned by registration and required for every
/// doorbell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportHandle(pub u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("ring is already registered with the transport")]
    AlreadyRegistered,

    #[error("transport rejected ring registration: {reason}")]
    RegistrationRejected { reason: String },

    #[error("doorbell write failed: {reason}")]
    DoorbellFailed { reason: String },
}

pub trait SubmissionTransport: Send {
    /// Register the ring with the platform and receive a doorbell handle.
    /// Called exactly once per ring.
    fn register_ring(&mut self, ring: &RingDescriptor) -> Result<TransportHandle, TransportError>;

    /// Tell the device new work is published. May be called many times; the
    /// device coalesces rings.
    fn notify_new_work(&mut self, handle: TransportHandle) -> Result<(), TransportError>;
}
