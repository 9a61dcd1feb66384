//! Identity allocation for buffers and queues.
//!
//! Both sources are plain atomics. Each has a process-wide instance for
//! production use; queues take them as constructor arguments so tests can
//! supply private, deterministic ones.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

static PROCESS_SEQUENCES: Lazy<Arc<SequenceSource>> = Lazy::new(|| Arc::new(SequenceSource::new()));
static PROCESS_UNIQUE_IDS: Lazy<Arc<UniqueIdSource>> =
    Lazy::new(|| Arc::new(UniqueIdSource::with_pid(std::process::id())));

/// Hands out monotonically increasing buffer sequence numbers, starting at 0.
#[derive(Debug, Default)]
pub struct SequenceSource {
    next: AtomicU32,
}

impl SequenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts numbering at `first`.
    pub fn starting_at(first: u32) -> Self {
        Self { next: AtomicU32::new(first) }
    }

    /// The source shared by every queue in this process.
    pub fn process_wide() -> Arc<SequenceSource> {
        Arc::clone(&PROCESS_SEQUENCES)
    }

    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Produces `(pid << 32) | counter` queue identities.
#[derive(Debug)]
pub struct UniqueIdSource {
    pid: u32,
    counter: AtomicU32,
}

impl UniqueIdSource {
    /// A source stamping ids with `pid`, counter starting at 0.
    pub fn with_pid(pid: u32) -> Self {
        Self { pid, counter: AtomicU32::new(0) }
    }

    /// The source seeded from `std::process::id()`.
    pub fn process_wide() -> Arc<UniqueIdSource> {
        Arc::clone(&PROCESS_UNIQUE_IDS)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn next(&self) -> u64 {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        (u64::from(self.pid) << 32) | u64::from(counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_sequence_source_is_monotonic() {
        let source = SequenceSource::starting_at(10);
        assert_eq!(source.next(), 10);
        assert_eq!(source.next(), 11);
    }

    #[test]
    fn test_unique_id_layout() {
        let source = UniqueIdSource::with_pid(0x1234);
        assert_eq!(source.next(), 0x1234_0000_0000);
        assert_eq!(source.next(), 0x1234_0000_0001);
    }

    #[test]
    fn test_process_wide_sources_are_shared() {
        assert!(Arc::ptr_eq(&SequenceSource::process_wide(), &SequenceSource::process_wide()));
        assert_eq!(UniqueIdSource::process_wide().pid(), std::process::id());
        assert_eq!(UniqueIdSource::process_wide().next() >> 32, u64::from(std::process::id()));
    }

    #[test]
    fn test_sequence_source_concurrent_uniqueness() {
        let source = Arc::new(SequenceSource::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let source = Arc::clone(&source);
                thread::spawn(move || (0..250).map(|_| source.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for sequence in handle.join().unwrap() {
                assert!(seen.insert(sequence), "duplicate sequence {}", sequence);
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
