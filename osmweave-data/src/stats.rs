//! Pass counters.

/// Counts gathered over one pass of a stream.
///
/// Diagnostics such as unresolved references and exceeded capacities are
/// logged once and counted here rather than raised as errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Nodes reported by the decoder.
    pub nodes: u64,
    /// Ways reported by the decoder.
    pub ways: u64,
    /// Relations reported by the decoder.
    pub relations: u64,
    /// Features handed to the caller.
    pub features: u64,
    /// Ways dropped for having fewer than two resolvable positions.
    pub unresolved_ways: u64,
    /// Relations dropped or emptied because members were missing.
    pub unresolved_relations: u64,
    /// Primitives truncated or rejected for exceeding a size limit.
    pub capacity_exceeded: u64,
    /// Pending way batches resolved.
    pub way_flushes: u64,
}
