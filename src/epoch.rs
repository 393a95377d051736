//! Global epoch state and per-thread reader slots.
//!
//! The engine keeps a process-wide monotonic epoch counter and a fixed table
//! of reader slots. Each participating thread owns one slot for its lifetime
//! and publishes the epoch it observed when entering a read section; the
//! sentinel value [`IDLE`] means the thread is outside any section. A
//! grace-period wait advances the epoch and then scans the table until every
//! slot is idle or has moved past the snapshot.

use core::hint::spin_loop;
use core::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use once_cell::race::OnceBox;
use std::sync::Mutex;

/// Slot value for a thread outside any read section.
///
/// The global epoch starts at 1 and only grows, so 0 never collides with a
/// published epoch.
pub(crate) const IDLE: u64 = 0;

// Maximum concurrent reader threads. Configurable via cargo features:
//   quiesce = { features = ["max-threads-512"] }
// Default: 128.
#[cfg(feature = "max-threads-1024")]
const MAX_THREADS: usize = 1024;
#[cfg(all(feature = "max-threads-512", not(feature = "max-threads-1024")))]
const MAX_THREADS: usize = 512;
#[cfg(all(
    feature = "max-threads-256",
    not(any(feature = "max-threads-512", feature = "max-threads-1024"))
))]
const MAX_THREADS: usize = 256;
#[cfg(not(any(
    feature = "max-threads-256",
    feature = "max-threads-512",
    feature = "max-threads-1024"
)))]
const MAX_THREADS: usize = 128;

/// One reader's published epoch, padded to its own cache line.
#[repr(align(128))]
pub(crate) struct ReaderSlot {
    pub(crate) epoch: AtomicU64,
}

impl ReaderSlot {
    const fn new() -> Self {
        Self {
            epoch: AtomicU64::new(IDLE),
        }
    }
}

/// Spin-then-yield backoff for the grace-period scan.
struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    fn new() -> Self {
        Self { step: 0 }
    }

    fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1 << self.step) {
                spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

/// Process-wide reclamation state.
pub(crate) struct EpochState {
    /// Fixed reader-slot table; slot `i` is owned by the thread holding tid `i`.
    slots: Box<[ReaderSlot]>,
    /// Global epoch counter (starts at 1).
    epoch: AtomicU64,
    /// Thread ID allocator (next never-used ID).
    next_tid: AtomicUsize,
    /// Recycled thread IDs from exited threads.
    free_tids: Mutex<Vec<usize>>,
}

impl EpochState {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_THREADS);
        for _ in 0..MAX_THREADS {
            slots.push(ReaderSlot::new());
        }
        Self {
            slots: slots.into_boxed_slice(),
            epoch: AtomicU64::new(1),
            next_tid: AtomicUsize::new(0),
            free_tids: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub(crate) fn slot(&self, tid: usize) -> &ReaderSlot {
        &self.slots[tid]
    }

    #[inline]
    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Upper bound on the number of slots ever handed out.
    #[inline]
    pub(crate) fn registered(&self) -> usize {
        self.next_tid.load(Ordering::Acquire).min(MAX_THREADS)
    }

    /// Allocate a thread ID, preferring recycled ones.
    pub(crate) fn alloc_tid(&self) -> usize {
        {
            let mut free = self.free_tids.lock().unwrap();
            if let Some(tid) = free.pop() {
                return tid;
            }
        }
        // CAS loop: only increment on success so the counter stays valid
        // if the assert unwinds.
        loop {
            let current = self.next_tid.load(Ordering::Relaxed);
            assert!(
                current < MAX_THREADS,
                "quiesce: exceeded maximum reader thread count ({MAX_THREADS})"
            );
            match self.next_tid.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(_) => continue,
            }
        }
    }

    /// Release a thread ID for recycling. The slot must be idle.
    pub(crate) fn free_tid(&self, tid: usize) {
        self.slots[tid].epoch.store(IDLE, Ordering::Release);
        self.free_tids.lock().unwrap().push(tid);
    }

    /// Grace-period wait.
    ///
    /// Snapshots the current epoch `E` while advancing the counter to `E + 1`,
    /// then blocks until every reader slot is idle or holds an epoch greater
    /// than `E`. On return, no read section that was open at the moment of the
    /// snapshot is still open, so every node retired at an epoch `<= E` is
    /// unreachable. Returns the snapshot.
    pub(crate) fn synchronize(&self) -> u64 {
        fence(Ordering::SeqCst);
        let observed = self.epoch.fetch_add(1, Ordering::SeqCst);

        // Scan the whole table, not just the allocated prefix: a thread whose
        // slot allocation is not yet visible here parks on an IDLE slot.
        for slot in self.slots.iter() {
            let mut backoff = Backoff::new();
            loop {
                let published = slot.epoch.load(Ordering::Acquire);
                if published == IDLE || published > observed {
                    break;
                }
                backoff.snooze();
            }
        }

        fence(Ordering::SeqCst);
        observed
    }
}

/// Global singleton instance.
static GLOBAL: OnceBox<EpochState> = OnceBox::new();

/// Get a reference to the global epoch state.
#[inline]
pub(crate) fn global() -> &'static EpochState {
    GLOBAL.get_or_init(|| Box::new(EpochState::new()))
}
