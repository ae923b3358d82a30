//! Tuning knobs for a decoding pass.
//!
//! Values are plain data so callers can layer them from whatever source
//! they like; the CLI merges flags, environment and files before handing a
//! finished [`DecoderConfig`] to the stream.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Keys whose presence on a closed way marks it as an area by default.
pub const DEFAULT_CLOSED_WAYS_ARE_POLYGONS: &[&str] = &[
    "aeroway",
    "amenity",
    "boundary",
    "building",
    "craft",
    "geological",
    "historic",
    "landuse",
    "leisure",
    "military",
    "natural",
    "office",
    "place",
    "shop",
    "sport",
    "tourism",
    "highway=platform",
    "public_transport=platform",
];

/// Configuration for one [`OsmStream`](crate::OsmStream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Node references held in the pending way batch before a forced flush.
    pub max_nodes_in_batch: usize,
    /// Ways held in the pending batch before a forced flush.
    pub max_ways_in_batch: usize,
    /// Tags held in the pending batch before a forced flush.
    pub max_tags_in_batch: usize,
    /// Inline tag value bytes held before a forced flush.
    pub max_inline_bytes_in_batch: usize,
    /// Ways with more references than this are rejected.
    pub max_refs_per_way: usize,
    /// Memory budget, in MiB, for scratch storage before spilling to disk.
    pub max_tmpfile_size_mb: u64,
    /// Use the paged coordinate store instead of the keyed fallback.
    pub use_custom_indexing: bool,
    /// Delta-compress coordinate sectors.
    pub compress_nodes: bool,
    /// Keys (`key`) or pairs (`key=value`) that make a closed way an area.
    pub closed_ways_are_polygons: Vec<String>,
    /// Emit every node as a point, even without significant tags.
    pub report_all_nodes: bool,
    /// Emit every way, even without significant tags.
    pub report_all_ways: bool,
    /// Persist every way so relations can reference non-area members.
    pub index_all_ways: bool,
    /// Round-robin across collections instead of draining one at a time.
    pub interleaved: bool,
    /// Buffered features per collection before that queue is drained first.
    pub max_buffered_features: usize,
    /// Carry primitive provenance onto emitted features.
    pub attributes: bool,
    /// Directory for spill files; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_nodes_in_batch: 1_000_000,
            max_ways_in_batch: 75_000,
            max_tags_in_batch: 375_000,
            max_inline_bytes_in_batch: 750_000,
            max_refs_per_way: 100_000,
            max_tmpfile_size_mb: 100,
            use_custom_indexing: true,
            compress_nodes: false,
            closed_ways_are_polygons: DEFAULT_CLOSED_WAYS_ARE_POLYGONS
                .iter()
                .map(|entry| (*entry).to_owned())
                .collect(),
            report_all_nodes: false,
            report_all_ways: false,
            index_all_ways: true,
            interleaved: false,
            max_buffered_features: 100_000,
            attributes: false,
            scratch_dir: None,
        }
    }
}

impl DecoderConfig {
    /// Scratch storage budget in bytes.
    #[must_use]
    pub const fn tmpfile_budget_bytes(&self) -> u64 {
        self.max_tmpfile_size_mb.saturating_mul(1024 * 1024)
    }

    /// Size at which the in-memory coordinate file migrates to disk.
    #[must_use]
    pub const fn node_spill_threshold(&self) -> u64 {
        (self.tmpfile_budget_bytes() >> 2).saturating_mul(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_cover_common_area_keys() {
        let config = DecoderConfig::default();
        assert!(config.closed_ways_are_polygons.iter().any(|k| k == "building"));
        assert!(
            config
                .closed_ways_are_polygons
                .iter()
                .any(|k| k == "highway=platform")
        );
        assert_eq!(config.node_spill_threshold(), 75 * 1024 * 1024);
    }

    #[rstest]
    fn partial_documents_fill_in_defaults() {
        let config: DecoderConfig =
            serde_json::from_str(r#"{"compress_nodes": true, "max_tmpfile_size_mb": 0}"#)
                .expect("valid config");
        assert!(config.compress_nodes);
        assert_eq!(config.node_spill_threshold(), 0);
        assert_eq!(config.max_ways_in_batch, 75_000);
    }
}
