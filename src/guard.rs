//! Read sections, retirement batching, and grace-period waits.

use crate::epoch::{global, IDLE};
use crate::retired::Retired;
use core::cell::{Cell, RefCell};
use core::marker::PhantomData;
use core::mem;
use core::sync::atomic::{fence, Ordering};

/// Minimum batch length before a retire triggers a flush.
///
/// The effective threshold is `2 x registered readers`, floored here, so that
/// one grace-period wait amortizes over a batch proportional to the reader
/// population.
const BATCH_FLOOR: usize = 32;

/// RAII guard representing an active read section.
///
/// While a `Guard` exists, any [`Shared`](crate::Shared) pointer loaded
/// through it is guaranteed to remain valid. Guards nest: inner guards share
/// the outermost section, and quiescence is published when the outermost
/// guard drops. A guard is tied to the thread that created it and cannot be
/// sent or shared across threads.
pub struct Guard {
    _not_send: PhantomData<*mut ()>,
}

impl Drop for Guard {
    fn drop(&mut self) {
        HANDLE.with(|h| h.unpin());
    }
}

/// Thread-local reclamation state: the owned reader slot, the read-section
/// nesting depth, and the batch of retired nodes.
struct Handle {
    tid: usize,
    depth: Cell<usize>,
    batch: RefCell<Vec<Retired>>,
}

impl Handle {
    fn new() -> Self {
        Self {
            tid: global().alloc_tid(),
            depth: Cell::new(0),
            batch: RefCell::new(Vec::new()),
        }
    }

    fn pin(&self) -> Guard {
        let depth = self.depth.get();
        if depth == 0 {
            let state = global();
            let slot = state.slot(self.tid);
            // Publish the observed epoch, then fence so the publication is
            // visible to any grace-period scan before this thread's first
            // traversal load.
            slot.epoch.store(state.current_epoch(), Ordering::Relaxed);
            fence(Ordering::SeqCst);
        }
        self.depth.set(depth + 1);
        Guard {
            _not_send: PhantomData,
        }
    }

    fn unpin(&self) {
        let depth = self.depth.get() - 1;
        self.depth.set(depth);
        if depth == 0 {
            global().slot(self.tid).epoch.store(IDLE, Ordering::Release);
            // Now quiescent: drain any batch that outgrew its threshold while
            // this thread was inside the section.
            if self.batch.borrow().len() >= self.threshold() {
                self.flush();
            }
        }
    }

    #[inline]
    fn threshold(&self) -> usize {
        (2 * global().registered()).max(BATCH_FLOOR)
    }

    fn retire(&self, entry: Retired) {
        let mut batch = self.batch.borrow_mut();
        batch.push(entry);
        let full = batch.len() >= self.threshold();
        drop(batch);
        // A retire issued inside a read section only grows the batch; the
        // flush is deferred until the outermost guard drops.
        if full && self.depth.get() == 0 {
            self.flush();
        }
    }

    fn flush(&self) {
        assert_eq!(
            self.depth.get(),
            0,
            "quiesce: flush would wait for a grace period inside a read section"
        );
        let drained = mem::take(&mut *self.batch.borrow_mut());
        if drained.is_empty() {
            return;
        }
        let snapshot = global().synchronize();
        for entry in drained {
            debug_assert!(entry.epoch() <= snapshot);
            // SAFETY: every entry was retired before the grace period that
            // `synchronize` just completed, so no reader can still hold it.
            unsafe { entry.free() }
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        debug_assert_eq!(self.depth.get(), 0);
        self.flush();
        global().free_tid(self.tid);
    }
}

std::thread_local! {
    static HANDLE: Handle = Handle::new();
}

/// Enter a read section.
///
/// Returns a [`Guard`] representing the active section. While the guard
/// exists, any [`Shared`](crate::Shared) pointer loaded through it is
/// guaranteed to remain valid. Reentrant: a nested `pin` is a counter bump.
#[inline]
pub fn pin() -> Guard {
    HANDLE.with(|h| h.pin())
}

/// Retire a node for deferred reclamation.
///
/// Ownership transfers to the engine; the node is freed after a grace period,
/// in a batch flushed the next time this thread is outside every read
/// section. Calling this inside a read section is safe and never blocks.
///
/// # Safety
///
/// `ptr` must come from `Box::into_raw`, must already be unreachable for any
/// reader entering a new read section, and must not be accessed by the
/// caller after this call. Readers that observed the node in an earlier
/// section are exactly what the grace period waits out.
#[inline]
pub unsafe fn retire<T: 'static>(ptr: *mut T) {
    HANDLE.with(|h| {
        // SAFETY: forwarded caller contract
        let entry = unsafe { Retired::new(ptr, global().current_epoch()) };
        h.retire(entry);
    });
}

/// Block until every read section open at the moment of the call has ended.
///
/// # Panics
///
/// Panics if the calling thread is inside a read section: the wait would
/// deadlock against the caller's own reader slot.
pub fn synchronize() {
    HANDLE.with(|h| {
        assert_eq!(
            h.depth.get(),
            0,
            "quiesce: synchronize called inside a read section"
        );
    });
    global().synchronize();
}

/// Drain the calling thread's retired batch now.
///
/// Performs one grace-period wait and frees every node this thread has
/// retired so far. Useful for deterministic teardown and tests.
///
/// # Panics
///
/// Panics if the calling thread is inside a read section.
pub fn flush() {
    HANDLE.with(|h| h.flush());
}
