//! `mailintake`: incremental mailbox ingestion.
//!
//! This crate fetches messages that arrived since the last run of each
//! configured source, normalizes their headers and bodies, filters and
//! deduplicates them, extracts attachments, renders HTML bodies to images
//! and persists one document per accepted message.

pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod profile;
pub mod render;
pub mod store;
pub mod transport;
