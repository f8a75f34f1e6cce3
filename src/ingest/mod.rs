//! The ingestion orchestrator: one source, from cursor to persisted records.

pub mod worker;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{IntakeError, Result};
use crate::export::attachment::extract_attachments;
use crate::filter::{self, RejectReason, Verdict};
use crate::model::cursor::CursorState;
use crate::parser::normalize::Normalizer;
use crate::profile::SourceProfile;
use crate::render::{is_rich_content, render_record, Rasterizer};
use crate::store::cursor::CursorManager;
use crate::store::{DocumentStore, MAIL_COLLECTION};
use crate::transport::MailTransport;

/// What a single run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub folder: String,
    /// Cursor before the run; the range processed is `(from, to]`.
    pub from: u32,
    /// Highest sequence id seen, and the cursor after a successful run.
    pub to: u32,
    pub persisted: u64,
    /// Rejections per filter rule.
    pub filtered: BTreeMap<&'static str, u64>,
    /// Messages excluded by a message-level error.
    pub skipped: u64,
}

impl RunSummary {
    /// Number of sequence ids in the processed range.
    pub fn attempted(&self) -> u64 {
        u64::from(self.to.saturating_sub(self.from))
    }

    fn filtered_total(&self) -> u64 {
        self.filtered.values().sum()
    }
}

/// Shared collaborators for one source run.
pub struct IngestContext<'a> {
    pub normalizer: Normalizer,
    pub rasterizer: &'a dyn Rasterizer,
    pub attachments_dir: PathBuf,
}

impl<'a> IngestContext<'a> {
    /// Default normalizer for `profile`.
    pub fn new(
        profile: &SourceProfile,
        rasterizer: &'a dyn Rasterizer,
        attachments_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            normalizer: Normalizer::for_profile(profile),
            rasterizer,
            attachments_dir: attachments_dir.into(),
        }
    }
}

enum Outcome {
    Persisted,
    Filtered(RejectReason),
}

/// Ingest everything that arrived in the profile's folder since the last run.
///
/// Messages are processed oldest first. Message-level failures (see
/// [`IntakeError::is_message_scoped`]) skip that message; any other error
/// aborts the run with the cursor untouched. The cursor moves to the highest id only once every id in the
/// range has been attempted.
pub fn run_source(
    profile: &SourceProfile,
    transport: &mut dyn MailTransport,
    store: &dyn DocumentStore,
    ctx: &IngestContext<'_>,
) -> Result<RunSummary> {
    let folder = profile.folder.as_str();
    let highest = transport.highest_sequence_id(folder)?;
    let cursors = CursorManager::new(store, folder);
    let (cursor, state) = cursors.resolve(highest)?;

    let mut summary = RunSummary {
        source: profile.name.clone(),
        folder: folder.to_string(),
        from: cursor.last_sequence_id,
        to: highest,
        ..RunSummary::default()
    };

    if state == CursorState::Initialized || cursor.last_sequence_id == highest {
        info!(folder, offset = highest, "No new messages");
        summary.from = highest;
        return Ok(summary);
    }
    if cursor.last_sequence_id > highest {
        // Messages were expunged; sequence ids shifted down
        warn!(
            folder,
            cursor = cursor.last_sequence_id,
            highest,
            "Cursor ahead of folder, resetting"
        );
        cursors.advance(highest)?;
        summary.from = highest;
        return Ok(summary);
    }

    info!(folder, from = cursor.last_sequence_id + 1, to = highest, "Processing range");
    for sequence_id in cursor.last_sequence_id + 1..=highest {
        match process_message(profile, transport, store, ctx, sequence_id) {
            Ok(Outcome::Persisted) => summary.persisted += 1,
            Ok(Outcome::Filtered(reason)) => {
                *summary.filtered.entry(reason.as_str()).or_default() += 1;
            }
            Err(e) if e.is_message_scoped() => {
                warn!(folder, sequence_id, error = %e, "Message skipped");
                summary.skipped += 1;
            }
            Err(e) => {
                error!(folder, sequence_id, error = %e, "Run aborted, cursor left unchanged");
                return Err(e);
            }
        }
    }

    cursors.advance(highest)?;
    info!(
        folder,
        persisted = summary.persisted,
        filtered = summary.filtered_total(),
        skipped = summary.skipped,
        "Run complete"
    );
    Ok(summary)
}

fn process_message(
    profile: &SourceProfile,
    transport: &mut dyn MailTransport,
    store: &dyn DocumentStore,
    ctx: &IngestContext<'_>,
    sequence_id: u32,
) -> Result<Outcome> {
    let folder = profile.folder.as_str();
    let raw = transport.fetch_raw(folder, sequence_id)?;
    let mut record = ctx.normalizer.normalize(&raw, folder, sequence_id, profile)?;
    debug!(sequence_id, subject = %record.subject, "Normalized");

    if let Verdict::Reject(reason) = filter::check(&record, profile, store)? {
        info!(sequence_id, %reason, "Filtered out");
        return Ok(Outcome::Filtered(reason));
    }

    extract_attachments(&raw, &mut record, &ctx.attachments_dir);
    if is_rich_content(&record.body) {
        if let Err(e) = render_record(&mut record, profile, &ctx.attachments_dir, ctx.rasterizer) {
            discard_files(&record.attachments);
            return Err(e);
        }
    }

    let persisted = record
        .to_document(&profile.extra_fields)
        .map_err(IntakeError::from)
        .and_then(|doc| store.insert_one(MAIL_COLLECTION, &doc));
    if let Err(e) = persisted {
        discard_files(&record.attachments);
        return Err(e);
    }
    info!(sequence_id, id = %record.id, attachments = record.attachments.len(), "Persisted");
    Ok(Outcome::Persisted)
}

/// Remove files written for a message that will not be persisted.
fn discard_files(paths: &[String]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            debug!(path = %path, error = %e, "Could not remove file");
        }
    }
}
