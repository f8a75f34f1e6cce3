//! SQLite-backed document store.
//!
//! Every collection lives in one `documents` table as JSON text. Filters
//! compile to `json_extract` comparisons; the `id` and `folder` paths are
//! indexed since dedup and cursor lookups query them. Mail ids are unique.

use std::path::Path;
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tracing::debug;

use super::{Document, DocumentStore};
use crate::error::{IntakeError, Result};

/// Schema DDL run on open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    doc_id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_id
    ON documents(collection, json_extract(body, '$.id'));

CREATE INDEX IF NOT EXISTS idx_documents_folder
    ON documents(collection, json_extract(body, '$.folder'));

CREATE UNIQUE INDEX IF NOT EXISTS idx_mails_unique_id
    ON documents(json_extract(body, '$.id'))
    WHERE collection = 'mails';
";

/// One connection to the shared database file. Open one per worker.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| IntakeError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened document store");
        Self::init(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Number of documents in every collection, for diagnostics.
    pub fn collection_sizes(&self) -> Result<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, COUNT(*) FROM documents GROUP BY collection ORDER BY collection",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?;
        let mut sizes = Vec::new();
        for row in rows {
            sizes.push(row?);
        }
        Ok(sizes)
    }
}

/// Compile a filter into a `WHERE` clause and its bound values.
///
/// Field names are inlined as JSON paths so the expression indexes apply;
/// only plain identifiers are accepted.
fn where_clause(collection: &str, filter: &Document) -> Result<(String, Vec<SqlValue>)> {
    let mut sql = String::from("collection = ?1");
    let mut values = vec![SqlValue::Text(collection.to_string())];

    for (field, value) in filter {
        if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(IntakeError::Persistence(format!(
                "unsupported filter field '{field}'"
            )));
        }
        values.push(sql_value(value));
        sql.push_str(&format!(
            " AND json_extract(body, '$.{field}') IS ?{}",
            values.len()
        ));
    }
    Ok((sql, values))
}

/// The value `json_extract` yields for `value`.
fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

impl DocumentStore for SqliteStore {
    fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
        let (clause, values) = where_clause(collection, filter)?;
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM documents WHERE {clause}"),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        let (clause, values) = where_clause(collection, filter)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT body FROM documents WHERE {clause} ORDER BY doc_id"
        ))?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;

        let mut docs = Vec::new();
        for row in rows {
            let body = row?;
            docs.push(serde_json::from_str(&body)?);
        }
        Ok(docs)
    }

    fn insert_one(&self, collection: &str, doc: &Document) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        self.conn.execute(
            "INSERT INTO documents (collection, body) VALUES (?1, ?2)",
            rusqlite::params![collection, body],
        )?;
        Ok(())
    }

    fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64> {
        let (clause, values) = where_clause(collection, filter)?;
        let n = self.conn.execute(
            &format!("DELETE FROM documents WHERE {clause}"),
            params_from_iter(values),
        )?;
        Ok(n as u64)
    }

    fn replace(&self, collection: &str, filter: &Document, doc: &Document) -> Result<()> {
        let (clause, values) = where_clause(collection, filter)?;
        let body = serde_json::to_string(doc)?;

        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(
            &format!("DELETE FROM documents WHERE {clause}"),
            params_from_iter(values),
        )?;
        tx.execute(
            "INSERT INTO documents (collection, body) VALUES (?1, ?2)",
            rusqlite::params![collection, body],
        )?;
        tx.commit()?;
        debug!(collection, removed, "Replaced documents");
        Ok(())
    }
}
