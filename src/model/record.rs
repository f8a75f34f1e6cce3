//! The normalized message record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body text stored once a message has been rasterized.
pub const RENDERED_BODY_PLACEHOLDER: &str = "Rendered to image";

/// One normalized message.
///
/// Built once per raw message by the normalizer, then completed by the
/// attachment extractor and the HTML renderer. Persisted once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailRecord {
    /// Folder name immediately followed by the sequence id (`"INBOX42"`).
    pub id: String,

    /// `Date:` header normalized to `%Y-%m-%d %H:%M:%S`.
    pub date: String,

    /// Cleaned plain text, or [`RENDERED_BODY_PLACEHOLDER`].
    pub body: String,

    /// Decoded subject. Empty when missing or undecodable.
    pub subject: String,

    /// Decoded `From:` header.
    pub sender: String,

    /// Decoded, lower-cased `To:` header.
    pub receiver: String,

    /// Source folder the message was fetched from.
    pub folder: String,

    /// Always `false` for ingested mail.
    pub is_sent: bool,

    /// `true` once the body was replaced by rendered images.
    pub converted_to_image: bool,

    /// Storage paths; rendered images come first, then extracted files.
    pub attachments: Vec<String>,
}

impl MailRecord {
    /// Keys of the persisted document that profile extra fields may not replace.
    pub const FIELDS: [&'static str; 10] = [
        "id",
        "date",
        "body",
        "subject",
        "sender",
        "receiver",
        "folder",
        "is_sent",
        "converted_to_image",
        "attachments",
    ];

    /// Compose the record id from folder and sequence id.
    pub fn compose_id(folder: &str, sequence_id: u32) -> String {
        format!("{folder}{sequence_id}")
    }

    /// Build the persisted document: base fields with `extra` merged in.
    ///
    /// Profiles reject extra keys that name a base field, see [`Self::FIELDS`].
    pub fn to_document(&self, extra: &Map<String, Value>) -> serde_json::Result<Map<String, Value>> {
        let mut doc = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (k, v) in extra {
            doc.insert(k.clone(), v.clone());
        }
        Ok(doc)
    }
}
