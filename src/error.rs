//! Error surface for the allocator façade.

use std::alloc::Layout;

/// Failure modes reported by the collector's entry points.
///
/// The reference implementation returns a null pointer on any backing
/// allocation failure and otherwise never fails. This crate keeps that
/// success/failure shape but gives the host a typed reason instead of a
/// bare null.
#[derive(Debug, thiserror::Error)]
pub enum GcError {
    /// The backing allocator returned null for the given layout.
    ///
    /// The Registry and address envelope are left unchanged; the host
    /// may retry, invoke [`crate::Collector::run`] manually, or abort.
    #[error("backing allocation failed for layout {layout:?}")]
    AllocationFailed {
        /// Layout that could not be satisfied.
        layout: Layout,
    },

    /// The requested size could not be turned into a valid `Layout`.
    #[error("invalid allocation layout: {0}")]
    LayoutError(#[from] std::alloc::LayoutError),
}
