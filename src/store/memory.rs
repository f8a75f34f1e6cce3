//! Process-local document store.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{matches, Document, DocumentStore};
use crate::error::Result;

/// Keeps collections in memory, for tests and embedders without a database file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, Vec<Document>>) -> T) -> T {
        let mut guard = self
            .collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl DocumentStore for MemoryStore {
    fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
        Ok(self.with(|c| {
            c.get(collection)
                .map_or(0, |docs| docs.iter().filter(|d| matches(d, filter)).count() as u64)
        }))
    }

    fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        Ok(self.with(|c| {
            c.get(collection)
                .map(|docs| {
                    docs.iter()
                        .filter(|d| matches(d, filter))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    fn insert_one(&self, collection: &str, doc: &Document) -> Result<()> {
        self.with(|c| {
            c.entry(collection.to_string())
                .or_default()
                .push(doc.clone())
        });
        Ok(())
    }

    fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64> {
        Ok(self.with(|c| {
            let Some(docs) = c.get_mut(collection) else {
                return 0;
            };
            let before = docs.len();
            docs.retain(|d| !matches(d, filter));
            (before - docs.len()) as u64
        }))
    }

    fn replace(&self, collection: &str, filter: &Document, doc: &Document) -> Result<()> {
        self.with(|c| {
            let docs = c.entry(collection.to_string()).or_default();
            docs.retain(|d| !matches(d, filter));
            docs.push(doc.clone());
        });
        Ok(())
    }
}
