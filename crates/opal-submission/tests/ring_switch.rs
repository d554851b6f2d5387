//! Ring wraparound behavior.
//!
//! Gen12 render records are 76 bytes (16-byte linkage plus a 60-byte
//! epilogue) and every reservation carries a 16-byte jump slack, so a
//! 256-byte ring takes three records before the fourth forces a switch.

mod common;

use common::{GuestMemory, MockGpu, ObservedEvent, RecordingObserver};
use opal_protocol::Generation;
use opal_submission::{CommandBufferDescriptor, EngineKind, SUBMIT_FLAG_NONE};
use pretty_assertions::assert_eq;

fn descriptor(gpu_address: u64) -> CommandBufferDescriptor {
    CommandBufferDescriptor {
        gpu_address,
        size_bytes: 16,
        flags: SUBMIT_FLAG_NONE,
    }
}

#[test]
fn wrapping_emits_one_jump_and_restarts_at_offset_zero() {
    let gen = Generation::Gen12;
    let (mut ds, _, _) = common::build_context(gen, EngineKind::Render, 256, Default::default());
    ds.initialize().unwrap();
    let observer = RecordingObserver::default();
    ds.set_observer(Box::new(observer.clone()));

    let mut mem = GuestMemory::default();
    let mut gpu = MockGpu::new(gen, &ds);
    for i in 0..4u64 {
        let addr = 0x20_0000 + i * 0x100;
        mem.insert(addr, common::make_client_buffer(gen, 3));
        let seq = ds.dispatch(&descriptor(addr)).unwrap();
        assert_eq!(seq, i + 1);
        gpu.run(ds.ring().as_bytes(), &mem);
    }

    assert_eq!(ds.stats().ring_switches, 1);
    assert_eq!(gpu.ring_switches, 1);
    assert_eq!(gpu.fence_writes, vec![1, 2, 3, 4]);
    assert!(ds.is_complete(4));

    // The fourth record landed at the ring start.
    let events = observer.events.lock().unwrap().clone();
    assert!(events.contains(&ObservedEvent::Submitted {
        sequence: 4,
        ring_offset: 0
    }));
    assert_eq!(ds.ring().write_offset(), 76);
}

#[test]
fn reservation_exactly_filling_the_tail_does_not_switch() {
    // After the first 76-byte record a 168-byte ring has exactly 92 bytes of
    // tail left, matching the second reservation to the byte. An exact fit
    // must not trigger a switch.
    let gen = Generation::Gen12;
    let (mut ds, _, _) = common::build_context(gen, EngineKind::Render, 168, Default::default());
    ds.initialize().unwrap();

    ds.dispatch(&descriptor(0x20_0000)).unwrap();
    ds.dispatch(&descriptor(0x20_0100)).unwrap();

    assert_eq!(ds.stats().ring_switches, 0);
    assert_eq!(ds.ring().write_offset(), 152);
    assert_eq!(ds.ring().remaining_to_end(), 16);
}
