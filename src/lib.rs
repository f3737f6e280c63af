#![warn(clippy::all)]
#![warn(missing_docs)]

//! An embeddable, conservative mark-and-sweep garbage collector.
//!
//! Blocks are tracked in a separate open-addressed registry keyed by
//! base address rather than via an in-band header, so any allocator can
//! back a [`Collector`] (see [`BackingAlloc`]). Reachability is found
//! conservatively: the machine stack between a host-supplied
//! `stack_bottom` and the collector's own current frame is scanned word
//! by word, and every word that falls inside a registered block's
//! address range is treated as a pointer into it, exactly like the
//! reference C implementation this crate reimplements.
//!
//! ```
//! use conservative_gc::{Collector, GcFlags};
//!
//! // `stack_bottom` must be a real address on this thread's stack, at
//! // or above every frame the collector will later scan from.
//! let stack_anchor = 0usize;
//! let mut gc = Collector::new(&stack_anchor as *const usize as *const u8);
//! let greeting = gc.alloc_opt(GcFlags::ROOT, None, 14).unwrap();
//! unsafe { std::ptr::copy_nonoverlapping(b"Hello, world!\0".as_ptr(), greeting, 14) };
//! gc.run();
//! assert_eq!(gc.stats().live_objects, 1);
//! gc.end();
//! ```

mod backing;
mod collector;
mod config;
mod error;
mod flags;
mod registry;
mod stack;

pub use backing::{BackingAlloc, SystemAlloc};
pub use collector::{Collector, GcStats};
pub use config::GcConfig;
pub use error::GcError;
pub use flags::GcFlags;

/// A block destructor, invoked with the block's base address immediately
/// before its backing storage is released, whether by an explicit
/// [`Collector::free`], a sweep, or [`Collector::end`].
///
/// # Safety
/// The pointer is valid for the block's registered size for the
/// duration of the call only; it must not be retained afterward.
pub type DropFn = unsafe fn(*mut u8);
