//! Completion sequence tracking.
//!
//! The GPU reports execution progress by writing the latest retired sequence
//! number to a host-visible fence location (the epilogue's post-sync write).
//! The host side only ever reads that location; waits are bounded polls, never
//! unbounded spins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// GPU-writable completion slot.
///
/// Exactly one per engine context, session-scoped. The producer reads it via
/// [`CompletionMonitor`]; the hardware (or a software ring walker in tests)
/// stores retired sequence values through [`FencePage::signal`].
#[derive(Debug)]
pub struct FencePage {
    gpu_address: u64,
    completed: AtomicU64,
}

impl FencePage {
    pub fn new(gpu_address: u64) -> Arc<Self> {
        Arc::new(Self {
            gpu_address,
            completed: AtomicU64::new(0),
        })
    }

    /// Address the epilogue fence writes target.
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// Latest sequence the GPU has reported complete.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Record a retired sequence. Monotonic: a stale store never moves the
    /// observed value backwards.
    pub fn signal(&self, sequence: u64) {
        self.completed.fetch_max(sequence, Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitResult {
    Completed,
    TimedOut,
}

/// Polling parameters for [`CompletionMonitor::wait_until`].
#[derive(Clone, Copy, Debug)]
pub struct PollPolicy {
    /// Busy-spin iterations before falling back to sleeping.
    pub spin_iterations: u32,
    /// Sleep interval between polls once spinning is exhausted.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            spin_iterations: 64,
            interval: Duration::from_micros(50),
        }
    }
}

/// Sequence allocation plus completion queries against the fence page.
///
/// `next_sequence` must only be called from the single submission path;
/// `is_complete` and `wait_until` are safe from any number of threads.
#[derive(Debug)]
pub struct CompletionMonitor {
    page: Arc<FencePage>,
    next: AtomicU64,
    poll: PollPolicy,
}

impl CompletionMonitor {
    pub fn new(page: Arc<FencePage>, poll: PollPolicy) -> Self {
        Self {
            page,
            next: AtomicU64::new(1),
            poll,
        }
    }

    pub fn fence_page(&self) -> &Arc<FencePage> {
        &self.page
    }

    /// Allocate the next sequence number. The first dispatched buffer gets 1.
    pub fn next_sequence(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The value the next call to [`CompletionMonitor::next_sequence`] will
    /// return.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    pub fn is_complete(&self, sequence: u64) -> bool {
        self.page.completed() >= sequence
    }

    /// Poll until `sequence` completes or `timeout` elapses. A timeout is a
    /// recoverable condition; the caller decides whether to treat it as a
    /// hang.
    pub fn wait_until(&self, sequence: u64, timeout: Duration) -> WaitResult {
        if self.is_complete(sequence) {
            return WaitResult::Completed;
        }

        let deadline = Instant::now() + timeout;
        for _ in 0..self.poll.spin_iterations {
            if self.is_complete(sequence) {
                return WaitResult::Completed;
            }
            std::hint::spin_loop();
        }
        loop {
            if self.is_complete(sequence) {
                return WaitResult::Completed;
            }
            if Instant::now() >= deadline {
                return WaitResult::TimedOut;
            }
            std::thread::sleep(self.poll.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_start_at_one_and_increment() {
        let monitor = CompletionMonitor::new(FencePage::new(0x1000), PollPolicy::default());
        assert_eq!(monitor.peek_next(), 1);
        assert_eq!(monitor.next_sequence(), 1);
        assert_eq!(monitor.next_sequence(), 2);
        assert_eq!(monitor.peek_next(), 3);
    }

    #[test]
    fn is_complete_tracks_fence_page() {
        let page = FencePage::new(0x1000);
        let monitor = CompletionMonitor::new(page.clone(), PollPolicy::default());
        assert!(!monitor.is_complete(1));
        page.signal(2);
        assert!(monitor.is_complete(1));
        assert!(monitor.is_complete(2));
        assert!(!monitor.is_complete(3));
    }

    #[test]
    fn fence_page_never_moves_backwards() {
        let page = FencePage::new(0x1000);
        page.signal(5);
        page.signal(3);
        assert_eq!(page.completed(), 5);
    }

    #[test]
    fn wait_until_times_out_near_the_requested_timeout() {
        let page = FencePage::new(0x1000);
        let monitor = CompletionMonitor::new(page.clone(), PollPolicy::default());
        page.signal(4);

        let start = Instant::now();
        let result = monitor.wait_until(5, Duration::from_millis(10));
        let waited = start.elapsed();

        assert_eq!(result, WaitResult::TimedOut);
        assert!(waited >= Duration::from_millis(10));
        assert!(waited < Duration::from_millis(200), "waited {waited:?}");
    }

    #[test]
    fn wait_until_observes_signal_from_another_thread() {
        let page = FencePage::new(0x1000);
        let monitor = CompletionMonitor::new(page.clone(), PollPolicy::default());

        let signaller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            page.signal(1);
        });
        assert_eq!(
            monitor.wait_until(1, Duration::from_secs(5)),
            WaitResult::Completed
        );
        signaller.join().unwrap();
    }
}
