//! Circular command ring.
//!
//! Host-owned backing for a GPU-visible ring. The writer appends linkage and
//! epilogue records; the GPU consumes them in order and reports progress
//! through the fence page. Offsets never silently wrap: a reservation that
//! would cross the physical end fails with [`RingReserveError::BeyondRingEnd`]
//! and the caller emits an explicit jump back to offset 0.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Placement of a ring as handed to the platform transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingDescriptor {
    pub gpu_address: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingReserveError {
    /// The request fits the ring but not the space left before the physical
    /// end. `remaining` is the contiguous tail still available.
    #[error("reservation would cross the ring end ({remaining} bytes remain before wrap)")]
    BeyondRingEnd { remaining: u64 },
    /// The requested range overlaps a region the GPU has not retired yet.
    /// `sequence` is the oldest blocking sequence number.
    #[error("requested ring space still in flight (blocked on sequence {sequence})")]
    StillInFlight { sequence: u64 },
}

#[derive(Debug)]
struct InFlightRegion {
    start: u64,
    end: u64,
    sequence: u64,
}

/// Single-writer ring over host memory.
///
/// `reserve`/`write`/`advance` are the producer protocol: reserve a
/// contiguous range, fill it, then publish it. `advance` is the only
/// operation that makes bytes visible to a consumer; the Release store on the
/// committed counter orders the payload writes before the counter update.
#[derive(Debug)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    gpu_address: u64,
    write_offset: u64,
    /// Total bytes ever committed, monotonic across wraps.
    committed: Arc<AtomicU64>,
    /// Published regions not yet known retired, oldest first.
    in_flight: VecDeque<InFlightRegion>,
}

impl RingBuffer {
    pub fn new(gpu_address: u64, size_bytes: u64) -> Self {
        assert!(size_bytes > 0, "ring must not be empty");
        assert_eq!(size_bytes % 4, 0, "ring size must be dword aligned");
        Self {
            storage: vec![0u8; size_bytes as usize].into_boxed_slice(),
            gpu_address,
            write_offset: 0,
            committed: Arc::new(AtomicU64::new(0)),
            in_flight: VecDeque::new(),
        }
    }

    pub fn descriptor(&self) -> RingDescriptor {
        RingDescriptor {
            gpu_address: self.gpu_address,
            size_bytes: self.capacity(),
        }
    }

    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    pub fn capacity(&self) -> u64 {
        self.storage.len() as u64
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Contiguous bytes left before the physical end.
    pub fn remaining_to_end(&self) -> u64 {
        self.capacity() - self.write_offset
    }

    /// Raw ring contents, for a consumer walking published records.
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    /// Shared handle to the committed-bytes counter. A consumer loads it with
    /// Acquire ordering and may read exactly that many published bytes.
    pub fn committed_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.committed)
    }

    pub fn committed_bytes(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    /// Drop in-flight regions whose sequence `is_retired` reports complete.
    /// Retirement is in submission order, so a still-pending region stops the
    /// scan.
    pub fn retire_completed(&mut self, is_retired: impl Fn(u64) -> bool) {
        while let Some(front) = self.in_flight.front() {
            if !is_retired(front.sequence) {
                break;
            }
            self.in_flight.pop_front();
        }
    }

    /// Reserve `bytes` contiguous bytes at the current write offset.
    ///
    /// A request exactly equal to `remaining_to_end` fits; only a request
    /// strictly larger forces the caller to switch. Space still covered by an
    /// unretired region is refused rather than overwritten.
    pub fn reserve(
        &mut self,
        bytes: u64,
        is_retired: impl Fn(u64) -> bool,
    ) -> Result<u64, RingReserveError> {
        assert!(bytes > 0 && bytes % 4 == 0, "reservations are dword sized");
        self.retire_completed(is_retired);

        let remaining = self.remaining_to_end();
        if bytes > remaining {
            return Err(RingReserveError::BeyondRingEnd { remaining });
        }

        let start = self.write_offset;
        let end = start + bytes;
        for region in &self.in_flight {
            if region.start < end && start < region.end {
                return Err(RingReserveError::StillInFlight {
                    sequence: region.sequence,
                });
            }
        }
        Ok(start)
    }

    /// Fill a previously reserved range. Not visible to the consumer until
    /// `advance` publishes it.
    pub fn write(&mut self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        let end = start + data.len();
        assert!(end <= self.storage.len(), "write past ring end");
        self.storage[start..end].copy_from_slice(data);
    }

    /// Publish everything from the current write offset up to `end_offset`
    /// and tag the region with `sequence` for later retirement.
    pub fn advance(&mut self, end_offset: u64, sequence: u64) {
        assert!(end_offset > self.write_offset, "advance must move forward");
        assert!(end_offset <= self.capacity(), "advance past ring end");
        let start = self.write_offset;
        self.in_flight.push_back(InFlightRegion {
            start,
            end: end_offset,
            sequence,
        });
        self.write_offset = end_offset;
        self.committed
            .fetch_add(end_offset - start, Ordering::Release);
    }

    /// Publish a `record_len`-byte jump record at the current offset and
    /// rewind the write offset to 0. The record region is tagged with
    /// `sequence`; the jump is consumed before that sequence executes, so
    /// its retirement also frees the jump bytes.
    pub fn wrap_to_start(&mut self, record_len: u64, sequence: u64) {
        assert!(record_len <= self.remaining_to_end(), "jump record must fit");
        let start = self.write_offset;
        self.in_flight.push_back(InFlightRegion {
            start,
            end: start + record_len,
            sequence,
        });
        self.write_offset = 0;
        self.committed.fetch_add(record_len, Ordering::Release);
    }
}
