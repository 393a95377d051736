//! Quiesce: epoch-based deferred memory reclamation for lock-free data structures
//!
//! Quiesce tracks read-side critical sections with a global epoch counter and
//! per-thread reader slots. A thread that wants to traverse a lock-free
//! structure enters a read section with [`pin`]; while the returned [`Guard`]
//! is alive, every pointer loaded through it is guaranteed not to be freed.
//! Writers hand logically-removed nodes to [`retire`], and the engine frees
//! them only after a grace period: an interval long enough that no read
//! section which could have observed the node remains open.
//!
//! # Key properties
//!
//! - **Cheap read sections**: entering costs one load, one store and one fence
//! - **Reentrant**: nested [`pin`] calls share the outermost section
//! - **Batched retirement**: retired nodes accumulate in a thread-local batch
//!   and are freed in bulk after a single grace-period wait
//! - **Blocking only on the write side**: [`synchronize`] and batch flushes
//!   wait for readers; the read path never blocks
//!
//! # Example
//!
//! ```rust,ignore
//! use quiesce::{pin, retire, Atomic, Ordering};
//!
//! let atomic = Atomic::null();
//!
//! // Enter a read section.
//! let guard = pin();
//!
//! let ptr = atomic.load(Ordering::Acquire, &guard);
//! if let Some(value) = unsafe { ptr.as_ref() } {
//!     // `value` cannot be freed while `guard` lives.
//! }
//!
//! drop(guard);
//! ```

#![warn(missing_docs)]

mod atomic;
mod epoch;
mod guard;
mod retired;

pub use atomic::{Atomic, Shared};
pub use guard::{flush, pin, retire, synchronize, Guard};

// Re-export for convenience
pub use core::sync::atomic::Ordering;
