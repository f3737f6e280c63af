//! The collector: allocator façade, tracer, and sweeper tied together.

use std::time::Instant;

use crate::backing::{layout_for, BackingAlloc, SystemAlloc};
use crate::config::GcConfig;
use crate::error::GcError;
use crate::flags::GcFlags;
use crate::registry::{Registry, Slot};
use crate::stack::{flush_registers, scan_words};
use crate::DropFn;

/// Snapshot of registry occupancy and sizing, per spec §4.5 `stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    /// Sum of live block sizes plus the registry's own slot count (a
    /// coarse, byte-granularity-1 approximation of the table's
    /// footprint — preserved verbatim from the reference, which mixes
    /// units the same way; see DESIGN.md).
    pub total_heap_size: usize,
    /// Number of currently-registered (live) blocks.
    pub live_objects: usize,
    /// Sum of live block sizes.
    pub live_objects_size: usize,
}

/// An embeddable conservative mark-and-sweep collector.
///
/// Parameterized over its backing allocator (spec §9's re-architecture
/// note: "implement the core as an owned object parameterized over its
/// backing allocator" rather than the reference's process-wide
/// singleton). `Collector` is not `Send`/`Sync`: its fields include raw
/// pointers (`stack_bottom`, every `BlockRecord::base` in the
/// `Registry`), so both auto-traits are withheld by default, matching
/// spec §5's single-threaded, non-reentrant contract as a compile-time
/// guarantee rather than an unenforced precondition. This crate adds no
/// `unsafe impl Send`/`Sync` to grant either back — a `BackingAlloc`
/// that is itself not `Send` (e.g. one closing over an `Rc`) correctly
/// keeps its `Collector` un-`Send` too.
pub struct Collector<A: BackingAlloc = SystemAlloc> {
    alloc: A,
    registry: Registry,
    stack_bottom: *const u8,
    paused: bool,
    ended: bool,
}

impl Collector<SystemAlloc> {
    /// Create a collector using the system allocator and default
    /// [`GcConfig`] (spec §4.5 `init`).
    ///
    /// `stack_bottom` must be the address of a variable in (or below)
    /// the shallowest frame from which this collector will later be
    /// invoked — typically the address of a local in the host's entry
    /// frame.
    pub fn new(stack_bottom: *const u8) -> Self {
        Self::with_config(stack_bottom, GcConfig::default())
    }

    /// Create a collector using the system allocator and a custom
    /// [`GcConfig`].
    pub fn with_config(stack_bottom: *const u8, config: GcConfig) -> Self {
        Collector {
            alloc: SystemAlloc,
            registry: Registry::new(config.load_factor, config.grow_factor),
            stack_bottom,
            paused: false,
            ended: false,
        }
    }
}

impl<A: BackingAlloc> Collector<A> {
    /// Create a collector over a custom backing allocator.
    pub fn with_allocator(stack_bottom: *const u8, config: GcConfig, alloc: A) -> Self {
        Collector {
            alloc,
            registry: Registry::new(config.load_factor, config.grow_factor),
            stack_bottom,
            paused: false,
            ended: false,
        }
    }

    // -----------------------------------------------------------------
    // Allocator façade (spec §4.2)
    // -----------------------------------------------------------------

    /// Allocate `size` bytes with default flags (no ROOT, no LEAF).
    pub fn alloc(&mut self, size: usize) -> Result<*mut u8, GcError> {
        self.alloc_opt(GcFlags::empty(), None, size)
    }

    /// Allocate `size` bytes with explicit flags and destructor.
    ///
    /// `adjust` runs — if the load threshold is exceeded — before the
    /// backing allocation, so a collection cycle never observes the
    /// block-to-be before it exists (spec §4.2 ordering rationale).
    pub fn alloc_opt(
        &mut self,
        flags: GcFlags,
        dtor: Option<DropFn>,
        size: usize,
    ) -> Result<*mut u8, GcError> {
        self.maybe_adjust();

        let layout = layout_for(size)?;
        let ptr = self.alloc.alloc(size);
        if ptr.is_null() {
            #[cfg(feature = "gc_logging")]
            tracing::warn!(target: "gc", size, "backing allocation failed");
            return Err(GcError::AllocationFailed { layout });
        }
        self.registry.insert(ptr, size, flags, dtor);
        Ok(ptr)
    }

    /// Allocate `count * size` zeroed bytes with default flags.
    pub fn zero_alloc(&mut self, count: usize, size: usize) -> Result<*mut u8, GcError> {
        self.zero_alloc_opt(GcFlags::empty(), None, count, size)
    }

    /// Allocate `count * size` zeroed bytes with explicit flags and
    /// destructor.
    pub fn zero_alloc_opt(
        &mut self,
        flags: GcFlags,
        dtor: Option<DropFn>,
        count: usize,
        size: usize,
    ) -> Result<*mut u8, GcError> {
        self.maybe_adjust();

        let total = count.saturating_mul(size);
        let layout = layout_for(total)?;
        let ptr = self.alloc.zero_alloc(count, size);
        if ptr.is_null() {
            #[cfg(feature = "gc_logging")]
            tracing::warn!(target: "gc", count, size, "backing zero_alloc failed");
            return Err(GcError::AllocationFailed { layout });
        }
        self.registry.insert(ptr, total, flags, dtor);
        Ok(ptr)
    }

    /// Resize a registered block, preserving its current flags and
    /// destructor.
    ///
    /// # Safety
    /// `ptr` must currently be registered with this collector (returned
    /// by a prior `alloc`/`alloc_opt`/`zero_alloc`/`zero_alloc_opt`/
    /// `resize`/`resize_opt` call on `self` and not yet freed or swept).
    pub unsafe fn resize(&mut self, ptr: *mut u8, size: usize) -> Result<*mut u8, GcError> {
        let (flags, dtor) = self.record_meta(ptr);
        // SAFETY: forwarded from this function's own contract.
        unsafe { self.resize_opt(ptr, flags, dtor, size) }
    }

    /// Resize a registered block. If the backing allocator relocates the
    /// block, the Registry entry is moved to the new base with the
    /// caller-supplied flags and destructor; otherwise the block stays at
    /// the same base and only its size is updated in place (spec §4.2
    /// step 2 — flags/destructor replacement applies only to the
    /// relocated case).
    ///
    /// # Safety
    /// `ptr` must currently be registered with this collector (returned
    /// by a prior `alloc`/`alloc_opt`/`zero_alloc`/`zero_alloc_opt`/
    /// `resize`/`resize_opt` call on `self` and not yet freed or swept).
    pub unsafe fn resize_opt(
        &mut self,
        ptr: *mut u8,
        flags: GcFlags,
        dtor: Option<DropFn>,
        size: usize,
    ) -> Result<*mut u8, GcError> {
        let old_size = self.record_size(ptr);
        let layout = layout_for(size)?;
        // SAFETY: ptr/old_size describe a block this allocator previously returned.
        let new_ptr = unsafe { self.alloc.resize(ptr, old_size, size) };
        if new_ptr.is_null() {
            return Err(GcError::AllocationFailed { layout });
        }

        if new_ptr == ptr {
            // Spec §4.2 step 2: a same-base resize only updates `size` in
            // place. The caller-supplied flags/destructor only take effect
            // when the block actually relocates (step 3, below) — matching
            // the reference's `gc_realloc_opt`, which never touches
            // flags/dtor on a non-relocating `realloc`.
            if let Some(Slot::Occupied(rec)) = self.occupied_slot_mut(ptr) {
                rec.size = size;
            }
        } else {
            self.registry.remove(ptr);
            self.registry.insert(new_ptr, size, flags, dtor);
        }
        Ok(new_ptr)
    }

    /// Synchronously reclaim `ptr`: remove it from the Registry, invoke
    /// its destructor, and release its backing storage. A no-op on a
    /// null pointer.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        if let Some(rec) = self.registry.remove(ptr) {
            if let Some(dtor) = rec.dtor {
                // SAFETY: rec.base is a block this allocator returned and has
                // just been removed from the Registry, so it cannot be
                // reached again.
                unsafe { dtor(rec.base) };
            }
            // SAFETY: rec.base/rec.size describe the block just removed.
            unsafe { self.alloc.release(rec.base, rec.size) };
        }
    }

    fn record_size(&self, ptr: *mut u8) -> usize {
        if self.registry.capacity == 0 {
            return 0;
        }
        match &self.registry.slots[self.registry.find(ptr)] {
            Slot::Occupied(rec) => rec.size,
            _ => 0,
        }
    }

    fn record_meta(&self, ptr: *mut u8) -> (GcFlags, Option<DropFn>) {
        if self.registry.capacity == 0 {
            return (GcFlags::empty(), None);
        }
        match &self.registry.slots[self.registry.find(ptr)] {
            Slot::Occupied(rec) => (rec.flags, rec.dtor),
            _ => (GcFlags::empty(), None),
        }
    }

    fn occupied_slot_mut(&mut self, ptr: *mut u8) -> Option<&mut Slot> {
        let idx = self.registry.find(ptr);
        Some(&mut self.registry.slots[idx])
    }

    // -----------------------------------------------------------------
    // Lifecycle (spec §4.5)
    // -----------------------------------------------------------------

    /// Suppress automatic cycles inside `adjust` (growth still happens).
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume automatic cycles inside `adjust`.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Run an explicit full mark/sweep cycle. Still collects while
    /// paused — `pause` only suppresses *automatic* cycles triggered
    /// from `adjust` (spec §5 "Ordering", §9 Open Questions).
    pub fn run(&mut self) {
        let start = Instant::now();
        #[cfg(feature = "gc_logging")]
        let before = self.registry.count;

        #[cfg(feature = "gc_logging")]
        {
            let roots = self
                .registry
                .slots
                .iter()
                .filter(|s| matches!(s, Slot::Occupied(rec) if rec.flags.contains(GcFlags::ROOT)))
                .count();
            let heap_bytes: usize = self
                .registry
                .slots
                .iter()
                .filter_map(|s| match s {
                    Slot::Occupied(rec) => Some(rec.size),
                    _ => None,
                })
                .sum();
            tracing::debug!(
                target: "gc",
                roots,
                heap_bytes,
                live_objects = before,
                "gc cycle starting"
            );
        }

        self.mark_roots();
        self.mark_stack();
        let reclaimed = self.sweep();

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "gc",
            pause_us = start.elapsed().as_micros() as u64,
            reclaimed_bytes = reclaimed,
            live_objects = self.registry.count,
            freed_objects = before.saturating_sub(self.registry.count),
            "gc cycle complete"
        );
        let _ = (start, reclaimed);
    }

    /// Reclaim everything without tracing and reset to the post-`init`
    /// state (spec §4.5 `end`). Safe to call more than once; subsequent
    /// calls are no-ops.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        for slot in std::mem::take(&mut self.registry.slots) {
            if let Slot::Occupied(rec) = slot {
                if let Some(dtor) = rec.dtor {
                    // SAFETY: rec.base is a live block being torn down; no
                    // other reference to it survives `end`.
                    unsafe { dtor(rec.base) };
                }
                // SAFETY: rec.base/rec.size describe the block just removed.
                unsafe { self.alloc.release(rec.base, rec.size) };
            }
        }
        self.registry.capacity = 0;
        self.registry.count = 0;
        self.registry.minptr = usize::MAX;
        self.registry.maxptr = 0;
        self.ended = true;
    }

    /// Snapshot occupancy and sizing.
    pub fn stats(&self) -> GcStats {
        let mut size = 0usize;
        let mut count = 0usize;
        for slot in &self.registry.slots {
            if let Slot::Occupied(rec) = slot {
                size += rec.size;
                count += 1;
            }
        }
        GcStats {
            total_heap_size: size + self.registry.capacity,
            live_objects: count,
            live_objects_size: size,
        }
    }

    // -----------------------------------------------------------------
    // adjust: the one entry point combining collection and growth
    // -----------------------------------------------------------------

    fn maybe_adjust(&mut self) {
        let threshold = self.registry.capacity as f64 * self.registry.load_factor;
        if (self.registry.count + 1) as f64 > threshold {
            self.adjust();
        }
    }

    fn adjust(&mut self) {
        if !self.paused && self.registry.capacity > 0 {
            self.run();
        }

        if self.registry.count < self.registry.capacity / self.registry.grow_factor.max(1) {
            return;
        }

        let new_capacity = (self.registry.capacity * self.registry.grow_factor).max(8);
        self.registry.rehash(new_capacity);
    }

    // -----------------------------------------------------------------
    // Tracer (spec §4.3)
    // -----------------------------------------------------------------

    /// Walk the Registry; mark every ROOT block and scan its payload.
    fn mark_roots(&mut self) {
        for i in 0..self.registry.capacity {
            let (base, size, is_leaf) = match &self.registry.slots[i] {
                Slot::Occupied(rec) if rec.flags.contains(GcFlags::ROOT) => {
                    (rec.base, rec.size, rec.flags.contains(GcFlags::LEAF))
                }
                _ => continue,
            };
            if let Slot::Occupied(rec) = &mut self.registry.slots[i] {
                rec.flags.insert(GcFlags::MARK);
            }
            if is_leaf {
                continue;
            }
            for word in payload_words(base, size) {
                self.trace_from(word);
            }
        }
    }

    /// Flush callee-saved registers, sample this frame's stack pointer,
    /// and scan every word between it and `stack_bottom` as a candidate
    /// pointer. Called through an indirection the optimizer cannot see
    /// through, so it cannot shrink the scanned frame by inlining this
    /// away (spec §4.3).
    fn mark_stack(&mut self) {
        flush_registers();
        let indirect: fn(&mut Self) = Self::mark_stack_inner;
        let indirect = std::hint::black_box(indirect);
        indirect(self);
    }

    fn mark_stack_inner(&mut self) {
        let top_local: usize = 0;
        let top = std::hint::black_box(&top_local as *const usize) as usize;
        let bottom = self.stack_bottom as usize;
        // SAFETY: [min(bottom, top), max(bottom, top)] spans this thread's
        // own live machine stack, from the host-supplied entry frame down
        // to the local just sampled.
        unsafe {
            scan_words(bottom, top, |word| self.trace_from(word as *mut u8));
        }
    }

    /// Candidate marking, iterative (spec §4.3 permits either recursion
    /// or an explicit worklist; this crate uses a worklist so a deep
    /// object graph cannot blow the native call stack, per spec §9's
    /// design note).
    fn trace_from(&mut self, candidate: *mut u8) {
        let mut worklist = vec![candidate];
        while let Some(word) = worklist.pop() {
            let addr = word as usize;
            if addr < self.registry.minptr || addr > self.registry.maxptr {
                continue;
            }
            let idx = self.registry.find(word);
            let (already_marked, is_leaf, base, size) = match &self.registry.slots[idx] {
                Slot::Occupied(rec) => (
                    rec.flags.contains(GcFlags::MARK),
                    rec.flags.contains(GcFlags::LEAF),
                    rec.base,
                    rec.size,
                ),
                _ => continue,
            };
            if already_marked {
                continue;
            }
            if let Slot::Occupied(rec) = &mut self.registry.slots[idx] {
                rec.flags.insert(GcFlags::MARK);
            }
            if is_leaf {
                continue;
            }
            worklist.extend(payload_words(base, size));
        }
    }

    // -----------------------------------------------------------------
    // Sweeper (spec §4.4)
    // -----------------------------------------------------------------

    fn sweep(&mut self) -> usize {
        let mut reclaimed = 0usize;
        for i in 0..self.registry.capacity {
            let (marked, base, size, dtor) = match &self.registry.slots[i] {
                Slot::Occupied(rec) => (
                    rec.flags.contains(GcFlags::MARK),
                    rec.base,
                    rec.size,
                    rec.dtor,
                ),
                _ => continue,
            };
            if marked {
                if let Slot::Occupied(rec) = &mut self.registry.slots[i] {
                    rec.flags.remove(GcFlags::MARK);
                }
                continue;
            }
            if let Some(dtor) = dtor {
                // SAFETY: base is about to be removed from the Registry and
                // released; no other reference to it survives this sweep.
                unsafe { dtor(base) };
            }
            // SAFETY: base/size describe the block being reclaimed.
            unsafe { self.alloc.release(base, size) };
            self.registry.slots[i] = Slot::Tombstone;
            self.registry.count -= 1;
            reclaimed += size;
        }
        reclaimed
    }
}

/// View a block's payload as an iterator of machine words (spec: "treat
/// its payload as an array of machine words").
fn payload_words(base: *mut u8, size: usize) -> impl Iterator<Item = *mut u8> {
    let word_size = std::mem::size_of::<usize>();
    let n = size / word_size;
    (0..n).map(move |i| {
        // SAFETY: i < size/word_size, so base + i*word_size + word_size <= base + size,
        // within the bounds of the block this record describes.
        let word_ptr = unsafe { (base as *mut usize).add(i) };
        unsafe { word_ptr.read_unaligned() as *mut u8 }
    })
}

impl<A: BackingAlloc> Drop for Collector<A> {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
impl<A: BackingAlloc> Collector<A> {
    /// Mark from ROOT blocks and sweep, skipping the conservative stack
    /// scan. Scenarios that assert a *non-root* block's fate need this:
    /// `mark_stack` would otherwise pick up incidental stale copies of a
    /// just-dropped pointer still sitting in this very test's own stack
    /// frame, since nothing overwrites that slot before the scan runs.
    fn collect_roots_only(&mut self) -> usize {
        self.mark_roots();
        self.sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A real address on this thread's own machine stack, close to the
    // frame every test method below runs in. `scan_words` walks
    // everything between this and the collector's current frame, so an
    // arbitrary or null address here would make it walk unmapped memory
    // instead of skipping the scan.
    fn new_gc(anchor: &usize) -> Collector {
        Collector::new(anchor as *const usize as *const u8)
    }

    #[test]
    fn alloc_and_stats() {
        let anchor = 0usize;
        let mut gc = new_gc(&anchor);
        let p = gc.alloc(14).unwrap();
        assert!(!p.is_null());
        let stats = gc.stats();
        assert_eq!(stats.live_objects, 1);
        assert_eq!(stats.live_objects_size, 14);
        std::hint::black_box(p);
        gc.end();
    }

    #[test]
    fn unreachable_block_is_reclaimed_on_run() {
        let anchor = 0usize;
        let mut gc = new_gc(&anchor);
        let _ = gc.alloc(32).unwrap();
        // No ROOT flag and the stack scan is skipped here -- nothing
        // keeps this block alive.
        gc.collect_roots_only();
        assert_eq!(gc.stats().live_objects, 0);
    }

    #[test]
    fn root_block_survives_without_any_reference() {
        let anchor = 0usize;
        let mut gc = new_gc(&anchor);

        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        unsafe fn mark_reclaimed(_ptr: *mut u8) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        {
            let _ = gc
                .alloc_opt(GcFlags::ROOT, Some(mark_reclaimed as DropFn), 8)
                .unwrap();
        }

        gc.run();
        gc.run();
        assert_eq!(gc.stats().live_objects, 1);
        gc.end();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn leaf_block_payload_is_never_traced() {
        let anchor = 0usize;
        let mut gc = new_gc(&anchor);

        let target = gc.alloc_opt(GcFlags::ROOT, None, 8).unwrap();
        // Write target's address into the LEAF block's payload -- a
        // LEAF block's bytes must never be scanned, so this reference
        // does not keep `target` alive through `leaf`.
        let leaf = gc
            .alloc_opt(GcFlags::LEAF, None, std::mem::size_of::<usize>())
            .unwrap();
        unsafe { (leaf as *mut usize).write(target as usize) };

        gc.collect_roots_only();
        // `target` survives only because it is ROOT; `leaf` itself is
        // unreachable from anywhere (the stack scan is skipped here) and
        // is collected despite its payload naming `target`'s address.
        assert_eq!(gc.stats().live_objects, 1);
        gc.end();
    }

    #[test]
    fn explicit_free_and_sweep_invoke_dtor_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        unsafe fn count_dtor(_ptr: *mut u8) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let anchor = 0usize;
        let mut gc = new_gc(&anchor);
        let p = gc
            .alloc_opt(GcFlags::empty(), Some(count_dtor as DropFn), 8)
            .unwrap();
        gc.free(p);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(gc.stats().live_objects, 0);
    }

    #[test]
    fn paused_adjust_still_collects_on_explicit_run() {
        let anchor = 0usize;
        let mut gc = new_gc(&anchor);
        gc.pause();
        let _ = gc.alloc(8).unwrap();
        gc.collect_roots_only();
        assert_eq!(gc.stats().live_objects, 0);
    }

    #[test]
    fn resize_updates_size_and_tracks_relocation() {
        let anchor = 0usize;
        let mut gc = new_gc(&anchor);
        let p = gc.alloc(8).unwrap();
        let p2 = unsafe { gc.resize(p, 4096) }.unwrap();
        assert!(!p2.is_null());
        assert_eq!(gc.stats().live_objects, 1);
        assert_eq!(gc.stats().live_objects_size, 4096);
        std::hint::black_box(p2);
        gc.end();
    }
}
