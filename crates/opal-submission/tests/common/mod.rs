#![allow(dead_code)]

//! In-process doubles: a transport that records registrations and doorbells,
//! a guest memory map for client command buffers, and a software ring walker
//! standing in for the GPU.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use opal_protocol::cmd::{decode_at, DecodedCmd};
use opal_protocol::{CmdWriter, Generation};
use opal_submission::{
    dispatcher_for, DirectSubmission, DirectSubmissionConfig, EngineKind, FencePage, RingBuffer,
    RingDescriptor, SubmissionObserver, SubmissionTransport, TransportError, TransportHandle,
};

pub const RING_GPU_ADDRESS: u64 = 0x10_0000;
pub const FENCE_GPU_ADDRESS: u64 = 0xfe00_0000;

/// Engine context wired to a recording transport.
pub fn build_context(
    gen: Generation,
    engine: EngineKind,
    ring_size: u64,
    config: DirectSubmissionConfig,
) -> (
    DirectSubmission,
    Arc<Mutex<Vec<RingDescriptor>>>,
    Arc<AtomicU64>,
) {
    let (transport, registrations, doorbells) = MockTransport::new();
    let ds = DirectSubmission::new(
        config,
        RingBuffer::new(RING_GPU_ADDRESS, ring_size),
        FencePage::new(FENCE_GPU_ADDRESS),
        dispatcher_for(gen, engine),
        Box::new(transport),
    );
    (ds, registrations, doorbells)
}

pub struct MockTransport {
    pub registrations: Arc<Mutex<Vec<RingDescriptor>>>,
    pub doorbells: Arc<AtomicU64>,
}

impl MockTransport {
    pub fn new() -> (Self, Arc<Mutex<Vec<RingDescriptor>>>, Arc<AtomicU64>) {
        let registrations = Arc::new(Mutex::new(Vec::new()));
        let doorbells = Arc::new(AtomicU64::new(0));
        (
            Self {
                registrations: registrations.clone(),
                doorbells: doorbells.clone(),
            },
            registrations,
            doorbells,
        )
    }
}

impl SubmissionTransport for MockTransport {
    fn register_ring(&mut self, ring: &RingDescriptor) -> Result<TransportHandle, TransportError> {
        let mut registrations = self.registrations.lock().unwrap();
        if !registrations.is_empty() {
            return Err(TransportError::AlreadyRegistered);
        }
        registrations.push(*ring);
        Ok(TransportHandle(1))
    }

    fn notify_new_work(&mut self, handle: TransportHandle) -> Result<(), TransportError> {
        assert_eq!(handle, TransportHandle(1));
        self.doorbells.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Flat map of client command buffers by GPU address.
#[derive(Default)]
pub struct GuestMemory {
    buffers: Vec<(u64, Vec<u8>)>,
}

impl GuestMemory {
    pub fn insert(&mut self, gpu_address: u64, bytes: Vec<u8>) {
        self.buffers.push((gpu_address, bytes));
    }

    fn bytes_at(&self, gpu_address: u64) -> &[u8] {
        for (base, bytes) in &self.buffers {
            let end = base + bytes.len() as u64;
            if gpu_address >= *base && gpu_address < end {
                return &bytes[(gpu_address - base) as usize..];
            }
        }
        panic!("no guest buffer mapped at {gpu_address:#x}");
    }
}

/// Minimal client buffer: a few noops closed by a batch buffer end.
pub fn make_client_buffer(gen: Generation, noops: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; (noops + 1) * 4];
    let mut w = CmdWriter::new(gen, &mut bytes);
    for _ in 0..noops {
        w.noop();
    }
    w.batch_buffer_end();
    bytes
}

/// Software consumer of the ring. Walks exactly the bytes the producer has
/// published, executes nested buffers, follows top-level jumps back to the
/// ring start and performs post-sync fence writes.
pub struct MockGpu {
    gen: Generation,
    ring_base: u64,
    fence: Arc<FencePage>,
    committed: Arc<AtomicU64>,
    pc: u64,
    consumed: u64,
    pub executed_buffers: Vec<u64>,
    pub fence_writes: Vec<u64>,
    pub ring_switches: u64,
}

impl MockGpu {
    pub fn new(gen: Generation, ds: &DirectSubmission) -> Self {
        Self {
            gen,
            ring_base: ds.ring().gpu_address(),
            fence: ds.monitor().fence_page().clone(),
            committed: ds.ring().committed_handle(),
            pc: 0,
            consumed: 0,
            executed_buffers: Vec::new(),
            fence_writes: Vec::new(),
            ring_switches: 0,
        }
    }

    pub fn run(&mut self, ring_bytes: &[u8], mem: &GuestMemory) {
        let target = self.committed.load(Ordering::Acquire);
        while self.consumed < target {
            let (cmd, size) =
                decode_at(self.gen, &ring_bytes[self.pc as usize..]).expect("ring stream decodes");
            self.consumed += size as u64;
            match cmd {
                DecodedCmd::BatchBufferStart(bbs) if bbs.is_second_level() => {
                    self.executed_buffers.push(bbs.gpu_address);
                    self.execute_nested(mem, bbs.gpu_address);
                    self.pc += size as u64;
                }
                DecodedCmd::BatchBufferStart(bbs) => {
                    assert_eq!(
                        bbs.gpu_address, self.ring_base,
                        "top-level jumps must target the ring start"
                    );
                    self.ring_switches += 1;
                    self.pc = 0;
                }
                DecodedCmd::PipeControl(pc) if pc.writes_post_sync() => {
                    assert_eq!(pc.address, self.fence.gpu_address());
                    self.fence_writes.push(pc.value);
                    self.fence.signal(pc.value);
                    self.pc += size as u64;
                }
                DecodedCmd::FlushDw(fd) if fd.writes_post_sync() => {
                    assert_eq!(fd.address, self.fence.gpu_address());
                    self.fence_writes.push(fd.value);
                    self.fence.signal(fd.value);
                    self.pc += size as u64;
                }
                _ => {
                    self.pc += size as u64;
                }
            }
        }
        assert_eq!(self.consumed, target, "walker overran the published bytes");
    }

    fn execute_nested(&mut self, mem: &GuestMemory, gpu_address: u64) {
        let bytes = mem.bytes_at(gpu_address);
        let mut cursor = 0;
        loop {
            let (cmd, size) =
                decode_at(self.gen, &bytes[cursor..]).expect("client buffer decodes");
            cursor += size;
            if cmd == DecodedCmd::BatchBufferEnd {
                return;
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservedEvent {
    Submitted { sequence: u64, ring_offset: u64 },
    Completed { sequence: u64 },
}

#[derive(Clone, Default)]
pub struct RecordingObserver {
    pub events: Arc<Mutex<Vec<ObservedEvent>>>,
}

impl SubmissionObserver for RecordingObserver {
    fn buffer_submitted(&self, sequence: u64, ring_offset: u64) {
        self.events
            .lock()
            .unwrap()
            .push(ObservedEvent::Submitted { sequence, ring_offset });
    }

    fn sequence_completed(&self, sequence: u64) {
        self.events
            .lock()
            .unwrap()
            .push(ObservedEvent::Completed { sequence });
    }
}
