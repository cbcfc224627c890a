//! Result types returned by the orchestrator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Files produced by one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// One path when merged, otherwise one per input document in input order.
    pub output_paths: Vec<PathBuf>,
    pub stats: ConversionStats,
}

/// Counters and timings for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Documents converted by LibreOffice.
    pub documents: usize,
    /// True if the outputs were merged into one PDF.
    pub merged: bool,
    /// Target of the post-merge reformat, if one ran.
    pub reformatted: Option<String>,
    pub duration_ms: u64,
    /// Time spent in per-document conversion.
    pub convert_duration_ms: u64,
    /// Time spent in merge and reformat.
    pub post_process_duration_ms: u64,
}
