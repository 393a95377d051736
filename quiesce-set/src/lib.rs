//! Lock-free concurrent hash set using Michael's algorithm with quiesce
//! memory reclamation.
//!
//! The set is a fixed array of hash buckets where each bucket is an ordered
//! lock-free singly-linked list. Deletion is two-phase: a node is first
//! logically deleted by setting the mark bit in its `next` pointer, then
//! physically unlinked by whichever traversal encounters it next. Unlinked
//! nodes are handed to the [`quiesce`] engine and freed only after every read
//! section that could have observed them has ended.
//!
//! # Architecture
//!
//! - **Buckets**: `2^k` independent ordered lists, sized at construction from
//!   an expected item count and a load factor; the table never resizes.
//! - **Ordering**: within a bucket, unmarked nodes are strictly ascending by
//!   `(hash, key)`, with the cached full hash as the comparison fast path.
//! - **Reads**: wait-free walks under a [`Guard`]; [`HashSet::get`] hands out
//!   references valid for the current read section.
//! - **Writes**: CAS-based insert and mark-then-unlink removal; lock-free.
//! - **Extraction**: [`HashSet::extract`] unlinks a node and transfers
//!   ownership to an [`Extracted`] handle, deferring retirement until the
//!   handle is released.

#![warn(missing_docs)]

mod extract;
mod list;
mod set;

pub use extract::Extracted;
pub use set::{HashSet, Iter};

// Read sections come from the reclamation crate; re-exported so callers of
// `get`/`iter`/`extract` don't need a separate dependency.
pub use quiesce::{pin, Guard};
