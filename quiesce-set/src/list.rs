//! Ordered lock-free bucket list.
//!
//! One bucket of the set: a sorted singly-linked list in the style of
//! Michael's 2002 list-based set. The low bit of each `next` pointer is the
//! logical-deletion mark; every traversal helps complete the physical unlink
//! of marked nodes it encounters. Disposal always belongs to the thread that
//! won the marking CAS.

use core::borrow::Borrow;
use core::cmp::Ordering::{Equal, Greater, Less};
use core::hint::spin_loop;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use quiesce::{Atomic, Guard, Shared};

/// A simple exponential backoff for reducing contention on CAS retries.
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self { step: 0 }
    }

    #[inline(always)]
    pub(crate) fn spin(&mut self) {
        for _ in 0..(1 << self.step.min(6)) {
            spin_loop();
        }
        if self.step <= 6 {
            self.step += 1;
        }
    }
}

/// Node in the lock-free linked list.
///
/// Layout optimized for scanning: the cached hash is checked before the key.
/// The `next` word carries the deletion mark, so the node allocation must be
/// at least 2-aligned; the atomic field alone guarantees word alignment.
pub(crate) struct Node<T> {
    pub(crate) hash: u64,
    pub(crate) next: Atomic<Node<T>>,
    pub(crate) value: T,
}

impl<T> Node<T> {
    pub(crate) fn boxed(hash: u64, value: T) -> Box<Self> {
        Box::new(Self {
            hash,
            next: Atomic::null(),
            value,
        })
    }
}

/// Compares a linked node against a probe, hash first, then key.
#[inline]
pub(crate) fn node_order<T, Q>(node: &Node<T>, hash: u64, key: &Q) -> core::cmp::Ordering
where
    T: Borrow<Q>,
    Q: Ord + ?Sized,
{
    node.hash
        .cmp(&hash)
        .then_with(|| node.value.borrow().cmp(key))
}

/// Outcome of [`OrderedList::ensure`].
pub(crate) enum EnsureResult<'g, T> {
    /// No equal node existed; the candidate was spliced in.
    Inserted(&'g T),
    /// An equal node already existed; the candidate was discarded.
    Updated(&'g T),
}

/// A search position: `prev` is the link whose target was observed to be
/// `curr`; when the probe was found, `next` is `curr`'s unmarked successor.
struct Position<'g, T> {
    prev: &'g Atomic<Node<T>>,
    curr: Shared<'g, Node<T>>,
    next: Shared<'g, Node<T>>,
}

/// One bucket: a sentinel head plus a sorted chain of nodes.
pub(crate) struct OrderedList<T> {
    head: Atomic<Node<T>>,
}

impl<T> OrderedList<T> {
    pub(crate) const fn new() -> Self {
        Self {
            head: Atomic::null(),
        }
    }

    #[inline]
    pub(crate) fn head(&self) -> &Atomic<Node<T>> {
        &self.head
    }

    /// The shared search primitive.
    ///
    /// Walks the chain until it reaches the first node ordering `>=` the
    /// probe, returning that position and whether the probe matched exactly.
    /// Both `curr` and (when found) `next` are observed unmarked, and `prev`
    /// pointed at `curr` at observation time. Any node encountered with a
    /// marked `next` is physically unlinked on the way; if that unlink CAS
    /// fails the walk restarts from the head.
    fn search<'g, F>(&'g self, ord: &F, guard: &'g Guard) -> (Position<'g, T>, bool)
    where
        F: Fn(&Node<T>) -> core::cmp::Ordering,
    {
        'restart: loop {
            let mut prev = &self.head;
            let mut curr = prev.load(Acquire, guard);

            loop {
                let node = match unsafe { curr.as_ref() } {
                    Some(node) => node,
                    None => {
                        return (
                            Position {
                                prev,
                                curr,
                                next: Shared::null(),
                            },
                            false,
                        )
                    }
                };
                let next = node.next.load(Acquire, guard);

                if next.mark() {
                    // `curr` is logically deleted: unlink it and keep going.
                    // Its memory stays with the eraser that set the mark.
                    match prev.compare_exchange(
                        curr,
                        next.with_mark(false),
                        Release,
                        Relaxed,
                        guard,
                    ) {
                        Ok(_) => {
                            curr = next.with_mark(false);
                            continue;
                        }
                        Err(_) => continue 'restart,
                    }
                }

                match ord(node) {
                    Less => {
                        prev = &node.next;
                        curr = next;
                    }
                    Equal => return (Position { prev, curr, next }, true),
                    Greater => {
                        return (
                            Position {
                                prev,
                                curr,
                                next: Shared::null(),
                            },
                            false,
                        )
                    }
                }
            }
        }
    }

    /// Splices `node` into its sorted position.
    ///
    /// Returns a reference to the inserted value, or the candidate back when
    /// an equal node is already present. The allocation is reused across CAS
    /// retries.
    pub(crate) fn insert<'g>(
        &'g self,
        mut node: Box<Node<T>>,
        guard: &'g Guard,
    ) -> Result<&'g T, Box<Node<T>>>
    where
        T: Ord,
    {
        let mut backoff = Backoff::new();
        loop {
            let (pos, found) =
                self.search(&|n: &Node<T>| node_order(n, node.hash, &node.value), guard);
            if found {
                return Err(node);
            }

            node.next.store(pos.curr, Relaxed);
            let raw = Box::into_raw(node);
            match pos.prev.compare_exchange(
                pos.curr,
                unsafe { Shared::from_raw(raw) },
                Release,
                Relaxed,
                guard,
            ) {
                Ok(_) => return Ok(unsafe { &(*raw).value }),
                Err(_) => {
                    // The link changed under us (new neighbor, or the
                    // predecessor got marked). Take the allocation back and
                    // retry from the head.
                    node = unsafe { Box::from_raw(raw) };
                    backoff.spin();
                }
            }
        }
    }

    /// Update-or-insert.
    ///
    /// When an equal node exists the candidate is dropped and the existing
    /// value is returned; otherwise behaves like [`OrderedList::insert`].
    pub(crate) fn ensure<'g>(&'g self, mut node: Box<Node<T>>, guard: &'g Guard) -> EnsureResult<'g, T>
    where
        T: Ord,
    {
        let mut backoff = Backoff::new();
        loop {
            let (pos, found) =
                self.search(&|n: &Node<T>| node_order(n, node.hash, &node.value), guard);
            if found {
                let existing = unsafe { pos.curr.deref() };
                return EnsureResult::Updated(&existing.value);
            }

            node.next.store(pos.curr, Relaxed);
            let raw = Box::into_raw(node);
            match pos.prev.compare_exchange(
                pos.curr,
                unsafe { Shared::from_raw(raw) },
                Release,
                Relaxed,
                guard,
            ) {
                Ok(_) => return EnsureResult::Inserted(unsafe { &(*raw).value }),
                Err(_) => {
                    node = unsafe { Box::from_raw(raw) };
                    backoff.spin();
                }
            }
        }
    }

    /// Finds the first unmarked node matching the probe.
    pub(crate) fn get<'g, F>(&'g self, ord: &F, guard: &'g Guard) -> Option<&'g T>
    where
        F: Fn(&Node<T>) -> core::cmp::Ordering,
    {
        let (pos, found) = self.search(ord, guard);
        if found {
            // SAFETY: `curr` was observed unmarked inside the read section
            Some(unsafe { &pos.curr.deref().value })
        } else {
            None
        }
    }

    /// Finds the first unmarked node matching the probe and calls `f` on it.
    ///
    /// The node is alive for the duration of `f` but not serialized against
    /// other mutators. Returns `true` if a match was found.
    pub(crate) fn apply<F, G>(&self, ord: &F, f: G, guard: &Guard) -> bool
    where
        F: Fn(&Node<T>) -> core::cmp::Ordering,
        G: FnOnce(&T),
    {
        match self.get(ord, guard) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Logically deletes the matching node and drives its physical unlink to
    /// completion.
    ///
    /// On success the returned node is unreachable from the head and owned
    /// solely by the caller, which must either retire it or wrap it in an
    /// extraction handle. Returns `None` when no unmarked match exists,
    /// including when a concurrent eraser won the marking race.
    pub(crate) fn unlink<F>(&self, ord: &F, guard: &Guard) -> Option<*mut Node<T>>
    where
        F: Fn(&Node<T>) -> core::cmp::Ordering,
    {
        let mut backoff = Backoff::new();
        loop {
            let (pos, found) = self.search(ord, guard);
            if !found {
                return None;
            }
            let node = unsafe { pos.curr.deref() };
            let next = pos.next;

            // Claim the node by setting the deletion mark on its successor
            // link. Losing this CAS means either a racing eraser won or the
            // successor changed; both retry through a fresh search.
            if node
                .next
                .compare_exchange(next, next.with_mark(true), Release, Relaxed, guard)
                .is_err()
            {
                backoff.spin();
                continue;
            }

            if pos
                .prev
                .compare_exchange(pos.curr, next, Release, Relaxed, guard)
                .is_err()
            {
                // A full re-search physically unlinks every marked node on
                // the probe's path, ours included; it cannot return while
                // the node is still reachable.
                let _ = self.search(ord, guard);
            }

            return Some(pos.curr.as_raw());
        }
    }

    /// Detaches the whole chain and retires the nodes this call owns.
    ///
    /// Single-threaded teardown: not safe against concurrent mutators of the
    /// same bucket. Nodes whose `next` is already marked belong to the eraser
    /// that marked them and are skipped here.
    pub(crate) fn clear(&self, guard: &Guard)
    where
        T: 'static,
    {
        let mut curr = self.head.swap(Shared::null(), AcqRel, guard);
        while let Some(node) = unsafe { curr.as_ref() } {
            let next = node.next.load(Relaxed, guard);
            if !next.mark() {
                // SAFETY: the chain is detached, so the node is unreachable
                // for new readers and this call is its sole owner.
                unsafe { quiesce::retire(curr.as_raw()) };
            }
            curr = next.with_mark(false);
        }
    }
}
