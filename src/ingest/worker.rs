//! One worker thread per source, all running in parallel.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::{error, info, info_span};

use super::{run_source, IngestContext, RunSummary};
use crate::config::Config;
use crate::error::{IntakeError, Result};
use crate::profile::{ensure_distinct_folders, SourceProfile};
use crate::render::Rasterizer;
use crate::store::SqliteStore;
use crate::transport::{ImapTransport, MailTransport};

/// Where workers persist their output.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub database_path: PathBuf,
    pub busy_timeout: Duration,
    pub attachments_dir: PathBuf,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            database_path: config.database.path.clone(),
            busy_timeout: Duration::from_millis(config.database.busy_timeout_ms),
            attachments_dir: config.general.attachments_dir.clone(),
        }
    }
}

/// Result of one source's worker.
#[derive(Debug)]
pub struct WorkerReport {
    pub source: String,
    pub result: Result<RunSummary>,
}

/// Run every profile once over IMAP, one thread each, and wait for all of them.
pub fn run_all(
    profiles: &[SourceProfile],
    settings: &WorkerSettings,
    rasterizer: &dyn Rasterizer,
) -> Result<Vec<WorkerReport>> {
    run_all_with(profiles, settings, rasterizer, ImapTransport::open)
}

/// [`run_all`] with a custom way of opening mailbox sessions.
///
/// Each worker opens its own store connection and its own session; nothing
/// mutable is shared between them. Fails before starting any worker when two
/// profiles read the same folder.
pub fn run_all_with<T, C>(
    profiles: &[SourceProfile],
    settings: &WorkerSettings,
    rasterizer: &dyn Rasterizer,
    connect: C,
) -> Result<Vec<WorkerReport>>
where
    T: MailTransport,
    C: Fn(&SourceProfile) -> Result<T> + Sync,
{
    ensure_distinct_folders(profiles)?;

    let connect = &connect;
    let reports = thread::scope(|scope| {
        let handles: Vec<_> = profiles
            .iter()
            .map(|profile| {
                let spawned = thread::Builder::new()
                    .name(format!("intake-{}", profile.name))
                    .spawn_scoped(scope, move || {
                        run_worker(profile, settings, rasterizer, connect)
                    });
                (profile.name.clone(), spawned)
            })
            .collect();

        handles
            .into_iter()
            .map(|(source, spawned)| {
                let result = match spawned {
                    Ok(handle) => handle.join().unwrap_or_else(|_| {
                        Err(IntakeError::Worker {
                            source_name: source.clone(),
                            reason: "panicked".into(),
                        })
                    }),
                    Err(e) => Err(IntakeError::Worker {
                        source_name: source.clone(),
                        reason: format!("cannot spawn thread: {e}"),
                    }),
                };
                WorkerReport { source, result }
            })
            .collect()
    });
    Ok(reports)
}

fn run_worker<T, C>(
    profile: &SourceProfile,
    settings: &WorkerSettings,
    rasterizer: &dyn Rasterizer,
    connect: &C,
) -> Result<RunSummary>
where
    T: MailTransport,
    C: Fn(&SourceProfile) -> Result<T>,
{
    let span = info_span!("source", name = %profile.name, folder = %profile.folder);
    let _enter = span.enter();

    let result = (|| {
        let store = SqliteStore::open(&settings.database_path, settings.busy_timeout)?;
        let mut transport = connect(profile)?;
        let ctx = IngestContext::new(profile, rasterizer, &settings.attachments_dir);
        let summary = run_source(profile, &mut transport, &store, &ctx);
        transport.close()?;
        summary
    })();

    match &result {
        Ok(summary) => info!(
            persisted = summary.persisted,
            skipped = summary.skipped,
            "Worker finished"
        ),
        Err(e) => error!(error = %e, "Worker aborted"),
    }
    result
}
