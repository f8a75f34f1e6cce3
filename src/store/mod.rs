//! Keyed document persistence and the per-source offset cursor.
//!
//! Documents are flat JSON objects grouped into named collections. Filters
//! are field-equality maps: a document matches when every filter field is
//! present with an equal value. An empty filter matches everything.

pub mod cursor;
pub mod memory;
pub mod sqlite;

use serde_json::{Map, Value};

use crate::error::Result;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Collection holding one cursor document per source.
pub const OFFSET_COLLECTION: &str = "offset_folder";

/// Collection holding normalized mail records.
pub const MAIL_COLLECTION: &str = "mails";

/// A stored JSON object.
pub type Document = Map<String, Value>;

/// Minimal document-store capability used by the pipeline.
pub trait DocumentStore {
    /// Number of documents in `collection` matching `filter`.
    fn count(&self, collection: &str, filter: &Document) -> Result<u64>;

    /// Every matching document, in insertion order.
    fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>>;

    fn insert_one(&self, collection: &str, doc: &Document) -> Result<()>;

    /// Remove every matching document, returning how many were removed.
    fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64>;

    /// Swap all matching documents for `doc`.
    ///
    /// Backends that can should do this atomically.
    fn replace(&self, collection: &str, filter: &Document, doc: &Document) -> Result<()> {
        self.delete_many(collection, filter)?;
        self.insert_one(collection, doc)
    }
}

/// Build a single-field equality filter.
pub fn field_filter(field: &str, value: impl Into<Value>) -> Document {
    let mut filter = Document::new();
    filter.insert(field.to_string(), value.into());
    filter
}

/// `true` when every filter field is present in `doc` with an equal value.
pub(crate) fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}
