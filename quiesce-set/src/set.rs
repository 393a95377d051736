//! Hash set facade: bucket table, dispatch, item counter, iteration.

use crate::extract::Extracted;
use crate::list::{node_order, EnsureResult, Node, OrderedList};
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use core::sync::atomic::Ordering::{Acquire, Relaxed};
use core::sync::atomic::AtomicUsize;
use foldhash::fast::FixedState;
use quiesce::{pin, retire, Guard, Shared};

/// Default sizing when no capacity is given: room for 1024 items at one item
/// per bucket.
const DEFAULT_EXPECTED_ITEMS: usize = 1024;
const DEFAULT_LOAD_FACTOR: usize = 1;

/// Smallest power-of-two bucket count `M` with `M * load_factor >= expected`.
fn bucket_count_for(expected_max_items: usize, load_factor: usize) -> usize {
    let per_bucket = load_factor.max(1);
    expected_max_items
        .div_ceil(per_bucket)
        .max(1)
        .next_power_of_two()
}

/// Lock-free concurrent hash set.
///
/// Elements are identified by their `Ord + Hash` key form; for element types
/// with auxiliary payload, implement `Hash`/`Ord` over the key fields only
/// and use interior mutability (with the usual `Sync` requirements) for
/// in-place updates through [`HashSet::find`] or [`HashSet::ensure`].
///
/// The item counter is a plain atomic: it receives exactly one increment per
/// confirmed insert and one decrement per confirmed removal, may transiently
/// disagree with an iteration taken mid-flight, and is exact once mutations
/// quiesce.
pub struct HashSet<T, S = FixedState> {
    buckets: Box<[OrderedList<T>]>,
    mask: usize,
    count: AtomicUsize,
    hasher: S,
}

impl<T> HashSet<T, FixedState>
where
    T: Ord + Hash + 'static,
{
    /// Creates a set sized for the default expected item count.
    pub fn new() -> Self {
        Self::with_hasher(FixedState::default())
    }

    /// Creates a set sized for `expected_max_items` at `load_factor` items
    /// per bucket. The bucket count is fixed for the set's lifetime.
    pub fn with_capacity(expected_max_items: usize, load_factor: usize) -> Self {
        Self::with_capacity_and_hasher(expected_max_items, load_factor, FixedState::default())
    }
}

impl<T, S> HashSet<T, S>
where
    T: Ord + Hash + 'static,
    S: BuildHasher,
{
    /// Creates a default-sized set with a custom hasher.
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(DEFAULT_EXPECTED_ITEMS, DEFAULT_LOAD_FACTOR, hasher)
    }

    /// Creates a set with explicit sizing and a custom hasher.
    pub fn with_capacity_and_hasher(
        expected_max_items: usize,
        load_factor: usize,
        hasher: S,
    ) -> Self {
        let bucket_count = bucket_count_for(expected_max_items, load_factor);
        let mut buckets = Vec::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            buckets.push(OrderedList::new());
        }

        Self {
            buckets: buckets.into_boxed_slice(),
            mask: bucket_count - 1,
            count: AtomicUsize::new(0),
            hasher,
        }
    }

    #[inline]
    fn hash_of<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.hasher.hash_one(key)
    }

    #[inline]
    fn bucket_for(&self, hash: u64) -> &OrderedList<T> {
        &self.buckets[(hash as usize) & self.mask]
    }

    /// Inserts `value`. Returns `false` (dropping `value`) if an element with
    /// an equal key is already present.
    pub fn insert(&self, value: T) -> bool {
        self.insert_with(value, |_| ())
    }

    /// Inserts `value`, calling `f` on the inserted element on success.
    ///
    /// `f` runs inside the insertion's read section: the element is alive for
    /// the duration of the call but not serialized against other mutators.
    pub fn insert_with<F>(&self, value: T, f: F) -> bool
    where
        F: FnOnce(&T),
    {
        let hash = self.hash_of(&value);
        let guard = pin();
        match self.bucket_for(hash).insert(Node::boxed(hash, value), &guard) {
            Ok(inserted) => {
                self.count.fetch_add(1, Relaxed);
                f(inserted);
                true
            }
            Err(_rejected) => false,
        }
    }

    /// Update-or-insert.
    ///
    /// If no element with an equal key exists, inserts `value` and calls
    /// `f(true, &inserted)`; otherwise drops `value` and calls
    /// `f(false, &existing)`. Returns `true` when a new element was inserted.
    ///
    /// `f` runs inside a read section, must not block, must not re-enter the
    /// set, and may touch non-key state only.
    pub fn ensure<F>(&self, value: T, f: F) -> bool
    where
        F: FnOnce(bool, &T),
    {
        let hash = self.hash_of(&value);
        let guard = pin();
        match self.bucket_for(hash).ensure(Node::boxed(hash, value), &guard) {
            EnsureResult::Inserted(inserted) => {
                self.count.fetch_add(1, Relaxed);
                f(true, inserted);
                true
            }
            EnsureResult::Updated(existing) => {
                f(false, existing);
                false
            }
        }
    }

    /// Removes the element with an equal key. Returns `false` if absent.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        self.remove_and(key, |_| ())
    }

    /// Removes the element with an equal key, calling `f` on the removed
    /// value before it is retired.
    pub fn remove_and<Q, F>(&self, key: &Q, f: F) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
        F: FnOnce(&T),
    {
        let hash = self.hash_of(key);
        let guard = pin();
        let victim = self
            .bucket_for(hash)
            .unlink(&|n: &Node<T>| node_order(n, hash, key), &guard);
        drop(guard);

        match victim {
            Some(ptr) => {
                self.count.fetch_sub(1, Relaxed);
                // The marking CAS made this thread the node's sole owner
                // until retirement, so the value is alive for `f`.
                f(unsafe { &(*ptr).value });
                // SAFETY: physically unlinked, owned by this thread exactly
                // once.
                unsafe { retire(ptr) };
                true
            }
            None => false,
        }
    }

    /// Removes under an external comparator.
    ///
    /// `cmp` must induce the same total order over keys as the element's
    /// `Ord`, and `key` must hash identically to the element it denotes.
    pub fn remove_with<Q, F>(&self, key: &Q, cmp: F) -> bool
    where
        Q: Hash + ?Sized,
        F: Fn(&Q, &T) -> core::cmp::Ordering,
    {
        let hash = self.hash_of(key);
        let guard = pin();
        let victim = self.bucket_for(hash).unlink(
            &|n: &Node<T>| n.hash.cmp(&hash).then_with(|| cmp(key, &n.value).reverse()),
            &guard,
        );
        drop(guard);

        match victim {
            Some(ptr) => {
                self.count.fetch_sub(1, Relaxed);
                // SAFETY: as in `remove_and`
                unsafe { retire(ptr) };
                true
            }
            None => false,
        }
    }

    /// Unlinks the element with an equal key and transfers ownership to an
    /// [`Extracted`] handle, without scheduling reclamation.
    ///
    /// Must be called inside a read section; release the handle wherever
    /// convenient afterwards.
    pub fn extract<Q>(&self, key: &Q, guard: &Guard) -> Option<Extracted<T>>
    where
        T: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        let hash = self.hash_of(key);
        let ptr = self
            .bucket_for(hash)
            .unlink(&|n: &Node<T>| node_order(n, hash, key), guard)?;
        self.count.fetch_sub(1, Relaxed);
        // SAFETY: the physical unlink ran to completion and the marking CAS
        // transferred sole ownership to this call.
        Some(unsafe { Extracted::new(ptr) })
    }

    /// Returns `true` if an element with an equal key is present.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        self.find(key, |_| ())
    }

    /// Finds the element with an equal key and calls `f` on it.
    ///
    /// The element is guaranteed alive for the duration of `f` but not
    /// serialized against other mutators; `f` may touch non-key state only.
    /// Returns `true` if the element was found.
    pub fn find<Q, F>(&self, key: &Q, f: F) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
        F: FnOnce(&T),
    {
        let hash = self.hash_of(key);
        let guard = pin();
        self.bucket_for(hash)
            .apply(&|n: &Node<T>| node_order(n, hash, key), f, &guard)
    }

    /// Returns a reference to the element with an equal key.
    ///
    /// The reference is valid for the caller's read section only.
    pub fn get<'g, Q>(&'g self, key: &Q, guard: &'g Guard) -> Option<&'g T>
    where
        T: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        let hash = self.hash_of(key);
        self.bucket_for(hash)
            .get(&|n: &Node<T>| node_order(n, hash, key), guard)
    }

    /// Removes every element.
    ///
    /// Per-bucket teardown; not safe against concurrent mutators. Intended
    /// for single-threaded shutdown and reuse.
    pub fn clear(&self) {
        let guard = pin();
        for bucket in self.buckets.iter() {
            bucket.clear(&guard);
        }
        self.count.store(0, Relaxed);
    }

    /// The item count.
    ///
    /// May transiently disagree with iteration under concurrent mutation;
    /// exact at quiescence.
    pub fn len(&self) -> usize {
        self.count.load(Relaxed)
    }

    /// Returns `true` if the counter reads zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed number of buckets: a power of two chosen at construction.
    pub fn bucket_count(&self) -> usize {
        self.mask + 1
    }

    /// The set's hasher.
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Iterates the set inside the caller's read section.
    ///
    /// Buckets are visited in index order and each bucket in `(hash, key)`
    /// order; nodes observed marked are skipped. Under concurrent mutation
    /// the iterator may miss concurrent inserts, but it never yields a freed
    /// or logically-deleted node. The iterator borrows the guard and so
    /// cannot leave the thread that pinned it.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T, S> {
        Iter {
            set: self,
            bucket: 0,
            curr: Shared::null(),
            guard,
        }
    }
}

impl<T> Default for HashSet<T, FixedState>
where
    T: Ord + Hash + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: readers on any thread borrow elements (`T: Sync`) and removers may
// drop elements on another thread (`T: Send`).
unsafe impl<T: Send + Sync, S: Send> Send for HashSet<T, S> {}
unsafe impl<T: Send + Sync, S: Sync> Sync for HashSet<T, S> {}

impl<T, S> Drop for HashSet<T, S> {
    fn drop(&mut self) {
        let guard = pin();
        for bucket in self.buckets.iter() {
            let mut curr = bucket.head().load(Acquire, &guard);
            while let Some(node) = unsafe { curr.as_ref() } {
                let next = node.next.load(Relaxed, &guard);
                if !next.mark() {
                    // SAFETY: exclusive access; marked nodes were already
                    // retired by their erasers and are left to the engine.
                    unsafe { drop(Box::from_raw(curr.as_raw())) };
                }
                curr = next.with_mark(false);
            }
        }
    }
}

/// Forward iterator over a [`HashSet`], bound to a read section.
pub struct Iter<'g, T, S> {
    set: &'g HashSet<T, S>,
    bucket: usize,
    curr: Shared<'g, Node<T>>,
    guard: &'g Guard,
}

impl<'g, T, S> Iterator for Iter<'g, T, S> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        loop {
            while let Some(node) = unsafe { self.curr.as_ref() } {
                let next = node.next.load(Acquire, self.guard);
                self.curr = next.with_mark(false);
                if !next.mark() {
                    return Some(&node.value);
                }
            }

            if self.bucket >= self.set.buckets.len() {
                return None;
            }
            self.curr = self.set.buckets[self.bucket].head().load(Acquire, self.guard);
            self.bucket += 1;
        }
    }
}
