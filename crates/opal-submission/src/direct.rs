//! Direct submission engine context.
//!
//! Owns one ring plus its completion monitor and streams client command
//! buffers into it without any per-submission kernel round trip. Per
//! submission the ring receives an optional cache flush, a nested jump into
//! the client buffer and a flush-and-fence epilogue, then the transport
//! doorbell is rung. Crossing the physical ring end is handled by an explicit
//! jump record back to offset 0.
//!
//! Dispatch is single-producer. Completion queries go through the shared
//! [`CompletionMonitor`] and are safe from any thread.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::dispatcher::EngineDispatcher;
use crate::error::SubmitError;
use crate::fence::{CompletionMonitor, FencePage, PollPolicy, WaitResult};
use crate::ring::{RingBuffer, RingReserveError};
use crate::transport::{SubmissionTransport, TransportHandle};

pub const SUBMIT_FLAG_NONE: u32 = 0;
/// Emit an engine cache flush ahead of the command buffer jump.
pub const SUBMIT_FLAG_CACHE_FLUSH_BEFORE: u32 = 1 << 0;

/// Covers preamble + linkage + worst-case epilogue for every engine.
const MAX_RECORD_BYTES: usize = 128;

/// Client command buffer to be linked into the ring. The buffer must end
/// with a batch buffer end so execution returns to the ring.
#[derive(Clone, Copy, Debug)]
pub struct CommandBufferDescriptor {
    pub gpu_address: u64,
    pub size_bytes: u64,
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Active,
    Switching,
    Stopped,
}

/// Submission lifecycle callbacks. Invoked inline on the dispatching thread;
/// keep implementations cheap.
pub trait SubmissionObserver: Send {
    fn buffer_submitted(&self, _sequence: u64, _ring_offset: u64) {}
    fn sequence_completed(&self, _sequence: u64) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SubmissionStats {
    pub dispatches: u64,
    pub ring_switches: u64,
    pub backpressure_waits: u64,
    pub doorbells: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct DirectSubmissionConfig {
    /// Upper bound on any single wait for in-flight ring space. Exceeding it
    /// surfaces [`SubmitError::PossibleHang`].
    pub backpressure_timeout: Duration,
    pub poll: PollPolicy,
    /// Promote ring switch logs from debug to info.
    pub log_ring_transitions: bool,
}

impl Default for DirectSubmissionConfig {
    fn default() -> Self {
        Self {
            backpressure_timeout: Duration::from_secs(2),
            poll: PollPolicy::default(),
            log_ring_transitions: false,
        }
    }
}

pub struct DirectSubmission {
    config: DirectSubmissionConfig,
    state: State,
    ring: RingBuffer,
    dispatcher: Box<dyn EngineDispatcher>,
    transport: Box<dyn SubmissionTransport>,
    transport_handle: Option<TransportHandle>,
    monitor: Arc<CompletionMonitor>,
    observer: Option<Box<dyn SubmissionObserver>>,
    stats: SubmissionStats,
    last_submitted: u64,
    last_published: u64,
}

impl DirectSubmission {
    pub fn new(
        config: DirectSubmissionConfig,
        ring: RingBuffer,
        fence_page: Arc<FencePage>,
        dispatcher: Box<dyn EngineDispatcher>,
        transport: Box<dyn SubmissionTransport>,
    ) -> Self {
        let monitor = Arc::new(CompletionMonitor::new(fence_page, config.poll));
        Self {
            config,
            state: State::Uninitialized,
            ring,
            dispatcher,
            transport,
            transport_handle: None,
            monitor,
            observer: None,
            stats: SubmissionStats::default(),
            last_submitted: 0,
            last_published: 0,
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn SubmissionObserver>) {
        self.observer = Some(observer);
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stats(&self) -> &SubmissionStats {
        &self.stats
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Shared completion monitor, for completion queries off the dispatching
    /// thread.
    pub fn monitor(&self) -> Arc<CompletionMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn last_submitted(&self) -> u64 {
        self.last_submitted
    }

    /// Register the ring with the transport and start accepting work.
    pub fn initialize(&mut self) -> Result<(), SubmitError> {
        match self.state {
            State::Uninitialized => {}
            // A dead context was never (or is no longer) initialized; saying
            // "already initialized" would send the caller the wrong way.
            State::Stopped => {
                return Err(SubmitError::NotActive {
                    state: State::Stopped,
                })
            }
            State::Active | State::Switching => return Err(SubmitError::AlreadyInitialized),
        }
        let descriptor = self.ring.descriptor();
        match self.transport.register_ring(&descriptor) {
            Ok(handle) => {
                self.transport_handle = Some(handle);
                self.state = State::Active;
                debug!(
                    ring_gpu_address = descriptor.gpu_address,
                    ring_size = descriptor.size_bytes,
                    engine = ?self.dispatcher.engine(),
                    "direct submission active"
                );
                Ok(())
            }
            Err(e) => {
                self.state = State::Stopped;
                error!(error = %e, "ring registration failed");
                Err(SubmitError::Transport(e))
            }
        }
    }

    /// Link one command buffer into the ring and ring the doorbell. Returns
    /// the sequence number assigned to the buffer; successful dispatches get
    /// consecutive sequence numbers starting at 1.
    pub fn dispatch(&mut self, buffer: &CommandBufferDescriptor) -> Result<u64, SubmitError> {
        if self.state != State::Active {
            return Err(SubmitError::NotActive { state: self.state });
        }

        let capacity = self.ring.capacity();
        if buffer.size_bytes > capacity {
            return Err(SubmitError::OversizedCommandBuffer {
                needed: buffer.size_bytes,
                capacity,
            });
        }
        let wants_preamble = buffer.flags & SUBMIT_FLAG_CACHE_FLUSH_BEFORE != 0;
        let preamble = if wants_preamble {
            self.dispatcher.preamble_size()
        } else {
            0
        };
        let record_max =
            (preamble + self.dispatcher.linkage_size() + self.dispatcher.max_epilogue_size()) as u64;
        // Every reservation keeps enough tail free for a later jump record.
        let slack = self.dispatcher.ring_switch_size() as u64;
        if record_max + slack > capacity {
            return Err(SubmitError::OversizedCommandBuffer {
                needed: record_max + slack,
                capacity,
            });
        }

        let offset = self.reserve_with_backpressure(record_max + slack)?;
        // Allocated only after all waits succeed, so failed dispatches never
        // consume sequence numbers.
        let sequence = self.monitor.next_sequence();

        let mut scratch = [0u8; MAX_RECORD_BYTES];
        let mut used = 0;
        if wants_preamble {
            used += self.dispatcher.encode_preamble_flush(&mut scratch[used..]);
        }
        used += self
            .dispatcher
            .encode_command_buffer_linkage(&mut scratch[used..], buffer.gpu_address);
        used += self.dispatcher.encode_flush_and_fence(
            &mut scratch[used..],
            self.monitor.fence_page().gpu_address(),
            sequence,
        );
        debug_assert!(used as u64 <= record_max);

        self.ring.write(offset, &scratch[..used]);
        self.ring.advance(offset + used as u64, sequence);
        self.ring_doorbell()?;

        self.stats.dispatches = self.stats.dispatches.saturating_add(1);
        self.last_submitted = sequence;
        trace!(sequence, ring_offset = offset, bytes = used, "dispatched command buffer");
        if let Some(observer) = &self.observer {
            observer.buffer_submitted(sequence, offset);
        }
        self.publish_completions();
        Ok(sequence)
    }

    pub fn is_complete(&self, sequence: u64) -> bool {
        self.monitor.is_complete(sequence)
    }

    /// Wait for `sequence`, then deliver any newly observed completions to
    /// the observer.
    pub fn wait(&mut self, sequence: u64, timeout: Duration) -> WaitResult {
        let result = self.monitor.wait_until(sequence, timeout);
        self.publish_completions();
        result
    }

    /// Stop accepting work. Already-submitted buffers keep executing and can
    /// still be waited on. Idempotent.
    pub fn stop(&mut self) {
        if self.state != State::Stopped {
            debug!("direct submission stopped");
            self.state = State::Stopped;
        }
    }

    fn reserve_with_backpressure(&mut self, bytes: u64) -> Result<u64, SubmitError> {
        loop {
            let monitor = Arc::clone(&self.monitor);
            match self.ring.reserve(bytes, |seq| monitor.is_complete(seq)) {
                Ok(offset) => return Ok(offset),
                Err(RingReserveError::StillInFlight { sequence }) => {
                    self.wait_for_reuse(sequence)?;
                }
                Err(RingReserveError::BeyondRingEnd { .. }) => {
                    self.switch_ring()?;
                }
            }
        }
    }

    fn wait_for_reuse(&mut self, sequence: u64) -> Result<(), SubmitError> {
        self.stats.backpressure_waits = self.stats.backpressure_waits.saturating_add(1);
        debug!(sequence, "ring space still in flight, waiting");
        match self
            .monitor
            .wait_until(sequence, self.config.backpressure_timeout)
        {
            WaitResult::Completed => Ok(()),
            WaitResult::TimedOut => {
                warn!(
                    sequence,
                    timeout = ?self.config.backpressure_timeout,
                    "ring space reuse stalled"
                );
                Err(SubmitError::PossibleHang {
                    sequence,
                    waited: self.config.backpressure_timeout,
                })
            }
        }
    }

    /// Publish a jump record back to offset 0 and rewind the write offset.
    /// The slack reserved by every dispatch guarantees the record fits the
    /// remaining tail.
    fn switch_ring(&mut self) -> Result<(), SubmitError> {
        self.state = State::Switching;
        let switch_size = self.dispatcher.ring_switch_size() as u64;
        let offset = loop {
            let monitor = Arc::clone(&self.monitor);
            match self.ring.reserve(switch_size, |seq| monitor.is_complete(seq)) {
                Ok(offset) => break offset,
                Err(RingReserveError::StillInFlight { sequence }) => {
                    if let Err(e) = self.wait_for_reuse(sequence) {
                        // Nothing was written; the context stays usable.
                        self.state = State::Active;
                        return Err(e);
                    }
                }
                Err(RingReserveError::BeyondRingEnd { .. }) => {
                    unreachable!("dispatch slack keeps the tail large enough for a jump record")
                }
            }
        };

        let mut scratch = [0u8; MAX_RECORD_BYTES];
        let used = self
            .dispatcher
            .encode_ring_switch(&mut scratch, self.ring.gpu_address());
        self.ring.write(offset, &scratch[..used]);
        // The jump is consumed before the next sequence executes, so tagging
        // it with that sequence retires the record no later than the work
        // behind it.
        self.ring.wrap_to_start(used as u64, self.monitor.peek_next());

        self.stats.ring_switches = self.stats.ring_switches.saturating_add(1);
        if self.config.log_ring_transitions {
            tracing::info!(at_offset = offset, "ring switch emitted");
        } else {
            debug!(at_offset = offset, "ring switch emitted");
        }
        self.state = State::Active;
        Ok(())
    }

    fn ring_doorbell(&mut self) -> Result<(), SubmitError> {
        let handle = self.transport_handle.ok_or(SubmitError::NotActive {
            state: self.state,
        })?;
        if let Err(e) = self.transport.notify_new_work(handle) {
            error!(error = %e, "doorbell failed, stopping context");
            self.state = State::Stopped;
            return Err(SubmitError::Transport(e));
        }
        self.stats.doorbells = self.stats.doorbells.saturating_add(1);
        Ok(())
    }

    fn publish_completions(&mut self) {
        let completed = self
            .monitor
            .fence_page()
            .completed()
            .min(self.last_submitted);
        let first_unpublished = self.last_published + 1;
        self.last_published = self.last_published.max(completed);
        if let Some(observer) = &self.observer {
            for sequence in first_unpublished..=completed {
                observer.sequence_completed(sequence);
            }
        }
    }
}
