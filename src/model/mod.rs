//! Core data model types: normalized records, attachments, and cursors.

pub mod attachment;
pub mod cursor;
pub mod record;
