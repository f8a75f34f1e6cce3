//! Offset cursor manager: one watermark document per source.

use serde_json::Value;
use tracing::info;

use super::{field_filter, Document, DocumentStore, OFFSET_COLLECTION};
use crate::error::{IntakeError, Result};
use crate::model::cursor::{CursorState, OffsetCursor};

/// Reads and moves the cursor of a single source.
pub struct CursorManager<'a> {
    store: &'a dyn DocumentStore,
    source_key: String,
}

impl<'a> CursorManager<'a> {
    pub fn new(store: &'a dyn DocumentStore, source_key: impl Into<String>) -> Self {
        Self {
            store,
            source_key: source_key.into(),
        }
    }

    fn filter(&self) -> Document {
        field_filter("folder", self.source_key.as_str())
    }

    /// The stored cursor, if any. More than one is a persistence error.
    pub fn load(&self) -> Result<Option<OffsetCursor>> {
        let mut docs = self.store.find(OFFSET_COLLECTION, &self.filter())?;
        if docs.len() > 1 {
            return Err(IntakeError::Persistence(format!(
                "{} cursors stored for '{}'",
                docs.len(),
                self.source_key
            )));
        }
        docs.pop()
            .map(|doc| serde_json::from_value(Value::Object(doc)).map_err(IntakeError::from))
            .transpose()
    }

    /// Load the cursor, creating it at `highest_id` on first contact.
    ///
    /// A freshly created cursor skips every message already in the folder.
    pub fn resolve(&self, highest_id: u32) -> Result<(OffsetCursor, CursorState)> {
        if let Some(cursor) = self.load()? {
            return Ok((cursor, CursorState::Advanced));
        }
        let cursor = OffsetCursor {
            source_key: self.source_key.clone(),
            last_sequence_id: highest_id,
        };
        self.store.insert_one(OFFSET_COLLECTION, &to_document(&cursor)?)?;
        info!(folder = %self.source_key, offset = highest_id, "Cursor initialized, backlog skipped");
        Ok((cursor, CursorState::Initialized))
    }

    /// Move the cursor to `to` in one replace operation.
    pub fn advance(&self, to: u32) -> Result<OffsetCursor> {
        let cursor = OffsetCursor {
            source_key: self.source_key.clone(),
            last_sequence_id: to,
        };
        self.store
            .replace(OFFSET_COLLECTION, &self.filter(), &to_document(&cursor)?)?;
        info!(folder = %self.source_key, offset = to, "Cursor advanced");
        Ok(cursor)
    }
}

/// Every stored cursor, in insertion order.
pub fn list_cursors(store: &dyn DocumentStore) -> Result<Vec<OffsetCursor>> {
    store
        .find(OFFSET_COLLECTION, &Document::new())?
        .into_iter()
        .map(|doc| serde_json::from_value(Value::Object(doc)).map_err(IntakeError::from))
        .collect()
}

fn to_document(cursor: &OffsetCursor) -> Result<Document> {
    match serde_json::to_value(cursor)? {
        Value::Object(map) => Ok(map),
        other => Err(IntakeError::Persistence(format!(
            "cursor serialized to non-object {other}"
        ))),
    }
}
