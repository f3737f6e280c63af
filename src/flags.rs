//! Per-block flag bitset.
//!
//! Mirrors the reference's `GC_flags_t` bitmask (`GC_MARK`, `GC_ROOT`,
//! `GC_LEAF`) as a small newtype instead of a C enum, so flag combinations
//! stay bitwise-composable (`GcFlags::ROOT | GcFlags::LEAF`) without
//! resorting to an extra dependency for a three-bit set.

use std::ops::{BitOr, BitOrAssign};

/// A block's flag bitset.
///
/// `ROOT` and `LEAF` are set by the host at allocation time; `MARK` is
/// reserved for the collector and is never meaningful across a completed
/// cycle (see invariant in spec §3: after any completed cycle no occupied
/// record carries `MARK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcFlags(u8);

impl GcFlags {
    /// Transient mark bit, set during trace and cleared during sweep.
    pub(crate) const MARK: GcFlags = GcFlags(0x01);
    /// The block is always reachable and is (re-)marked at the start of
    /// every cycle.
    pub const ROOT: GcFlags = GcFlags(0x02);
    /// The block's bytes are never scanned for candidate pointers, even
    /// while marked.
    pub const LEAF: GcFlags = GcFlags(0x04);

    /// The empty flag set.
    pub const fn empty() -> Self {
        GcFlags(0)
    }

    pub(crate) fn contains(self, other: GcFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn insert(&mut self, other: GcFlags) {
        self.0 |= other.0;
    }

    pub(crate) fn remove(&mut self, other: GcFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for GcFlags {
    type Output = GcFlags;
    fn bitor(self, rhs: GcFlags) -> GcFlags {
        GcFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for GcFlags {
    fn bitor_assign(&mut self, rhs: GcFlags) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_query() {
        let f = GcFlags::ROOT | GcFlags::LEAF;
        assert!(f.contains(GcFlags::ROOT));
        assert!(f.contains(GcFlags::LEAF));
        assert!(!f.contains(GcFlags::MARK));
    }

    #[test]
    fn insert_and_remove() {
        let mut f = GcFlags::empty();
        f.insert(GcFlags::MARK);
        assert!(f.contains(GcFlags::MARK));
        f.remove(GcFlags::MARK);
        assert!(!f.contains(GcFlags::MARK));
    }
}
