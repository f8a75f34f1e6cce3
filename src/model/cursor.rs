//! Per-source ingestion watermark.

use serde::{Deserialize, Serialize};

/// The last sequence id fully processed for one source.
///
/// Stored in the `offset_folder` collection as `{ "folder": .., "offset": .. }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetCursor {
    /// Stable source/folder identifier.
    #[serde(rename = "folder")]
    pub source_key: String,

    /// Highest sequence id fully processed.
    #[serde(rename = "offset")]
    pub last_sequence_id: u32,
}

/// How a run obtained its cursor. A source with no stored cursor is
/// uninitialized until its first run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Just created at the source's current highest id; the backlog is skipped.
    Initialized,
    /// Loaded from the store, or moved forward after a successful run.
    Advanced,
}
