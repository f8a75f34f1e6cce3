//! A materialized attachment file.

use std::path::PathBuf;

/// A file written to the attachment directory.
///
/// Has no identity beyond its path; it belongs to the record that listed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Where the payload was written.
    pub path: PathBuf,

    /// Filename as declared by the MIME part, before sanitizing and collision renaming.
    pub original_name: Option<String>,

    /// `id` of the [`MailRecord`](super::record::MailRecord) it was extracted from.
    pub message_id: String,
}
