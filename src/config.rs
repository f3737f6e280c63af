//! Registry growth configuration.

/// Tunables for the Registry's load control and growth policy.
///
/// Mirrors `otter-vm-gc::heap::GcConfig`'s role: the reference keeps
/// `load_factor`/`grow_factor` as plain fields on the `GC` struct; this
/// crate groups them so `Collector::with_config` reads as one call
/// instead of four field assignments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcConfig {
    /// Trigger a cycle + possible resize once `count + 1` exceeds
    /// `capacity as f64 * load_factor`. Default `0.75`.
    pub load_factor: f64,
    /// Multiplier applied to capacity on growth. Stored as an integer
    /// (the reference stores this as a C `double` but only ever uses it
    /// as an integer multiplier and divisor; representing it as `usize`
    /// avoids float-to-int truncation surprises at the boundary).
    /// Default `2`.
    pub grow_factor: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            load_factor: 0.75,
            grow_factor: 2,
        }
    }
}
