//! CLI entry point for `mailintake`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser, Subcommand};

use mailintake::config::{self, Config, ProfileConfig};
use mailintake::ingest::worker::{self, WorkerReport, WorkerSettings};
use mailintake::parser::normalize::Normalizer;
use mailintake::profile::{ensure_distinct_folders, SourceProfile};
use mailintake::render::{is_rich_content, WkHtmlToImage};
use mailintake::store::cursor::list_cursors;
use mailintake::store::SqliteStore;

#[derive(Parser)]
#[command(name = "mailintake", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $MAILINTAKE_CONFIG or the user config dir)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest new mail from every configured source
    Run {
        /// Only run the named profile (repeatable)
        #[arg(short, long = "source", value_name = "NAME")]
        sources: Vec<String>,
        /// Repeat every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
    /// Show the stored offset cursor of every source
    Cursors {
        #[arg(long)]
        json: bool,
    },
    /// Normalize a local message file and print the record
    Parse {
        path: PathBuf,
        /// Profile whose cleaning rules apply (defaults to built-in rules)
        #[arg(short, long, value_name = "NAME")]
        profile: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = config::load_config(cli.config.as_deref());
    let fallback = loaded.as_ref().ok().cloned().unwrap_or_default();

    let log_level = match cli.verbose {
        0 => fallback.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &fallback);

    match cli.command {
        Commands::Run { sources, every } => cmd_run(&loaded?, &sources, every),
        Commands::Cursors { json } => cmd_cursors(&loaded?, json),
        Commands::Parse {
            path,
            profile,
            json,
        } => cmd_parse(&path, profile.as_deref(), loaded.ok().as_ref(), json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::log_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = match config.general.log_rotation.as_str() {
            "hourly" => tracing_appender::rolling::hourly(&log_dir, "mailintake.log"),
            "daily" => tracing_appender::rolling::daily(&log_dir, "mailintake.log"),
            _ => tracing_appender::rolling::never(&log_dir, "mailintake.log"),
        };
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailintake", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Run the selected profiles once, or forever with `every`.
fn cmd_run(config: &Config, sources: &[String], every: Option<u64>) -> anyhow::Result<()> {
    let selected: Vec<&ProfileConfig> = if sources.is_empty() {
        config.profiles.iter().collect()
    } else {
        sources
            .iter()
            .map(|name| {
                config
                    .profiles
                    .iter()
                    .find(|p| &p.name == name)
                    .ok_or_else(|| anyhow::anyhow!("no profile named '{name}' in configuration"))
            })
            .collect::<anyhow::Result<_>>()?
    };
    if selected.is_empty() {
        anyhow::bail!("no profiles configured");
    }

    let profiles = selected
        .into_iter()
        .map(SourceProfile::from_config)
        .collect::<mailintake::error::Result<Vec<_>>>()?;
    ensure_distinct_folders(&profiles)?;

    let settings = WorkerSettings::from_config(config);
    let renderer_timeout =
        (config.renderer.timeout_secs > 0).then(|| Duration::from_secs(config.renderer.timeout_secs));
    let rasterizer = WkHtmlToImage::new(&config.renderer.binary, renderer_timeout);

    loop {
        let start = Instant::now();
        let reports = worker::run_all(&profiles, &settings, &rasterizer)?;
        let failed = print_reports(&reports, start.elapsed());

        match every {
            None if failed > 0 => anyhow::bail!("{failed} source(s) aborted"),
            None => return Ok(()),
            Some(secs) => {
                tracing::info!(failed, next_in_secs = secs, "Cycle complete");
                std::thread::sleep(Duration::from_secs(secs));
            }
        }
    }
}

/// Print one line per worker. Returns the number of aborted workers.
fn print_reports(reports: &[WorkerReport], elapsed: Duration) -> usize {
    println!();
    println!(
        "  {:<20} {:<16} {:>13} {:>9} {:>8} {:>7}",
        "Source", "Folder", "Range", "Persisted", "Filtered", "Skipped"
    );
    println!("  {}", "-".repeat(78));

    let mut failed = 0;
    for report in reports {
        match &report.result {
            Ok(s) => println!(
                "  {:<20} {:<16} {:>13} {:>9} {:>8} {:>7}",
                truncate(&s.source, 20),
                truncate(&s.folder, 16),
                format!("{}..{}", s.from, s.to),
                s.persisted,
                s.filtered.values().sum::<u64>(),
                s.skipped
            ),
            Err(e) => {
                failed += 1;
                println!("  {:<20} aborted: {e}", truncate(&report.source, 20));
            }
        }
    }
    println!();
    println!("  {} source(s) in {:.2?}", reports.len(), elapsed);
    println!();
    failed
}

/// Print every stored cursor.
fn cmd_cursors(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = SqliteStore::open(
        &config.database.path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )?;
    let cursors = list_cursors(&store)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&cursors)?);
        return Ok(());
    }

    println!();
    println!("  {:<40} {:>10}", "Folder", "Offset");
    println!("  {}", "-".repeat(51));
    for cursor in &cursors {
        println!(
            "  {:<40} {:>10}",
            truncate(&cursor.source_key, 40),
            cursor.last_sequence_id
        );
    }
    println!();
    for (collection, count) in store.collection_sizes()? {
        println!("  {:<20} {} document(s)", collection, count);
    }
    println!();
    Ok(())
}

/// Normalize a local `.eml` file without touching the store.
fn cmd_parse(
    path: &Path,
    profile_name: Option<&str>,
    config: Option<&Config>,
    json: bool,
) -> anyhow::Result<()> {
    let profile_cfg = match profile_name {
        Some(name) => config
            .and_then(|c| c.profiles.iter().find(|p| p.name == name))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no profile named '{name}' in configuration"))?,
        None => ProfileConfig::default(),
    };
    let profile = SourceProfile::offline(&profile_cfg)?;

    let raw = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    let record = Normalizer::for_profile(&profile).normalize(&raw, &profile.folder, 1, &profile)?;
    let rich = is_rich_content(&record.body);

    if json {
        let mut doc = record.to_document(&profile.extra_fields)?;
        doc.insert("rich_content".into(), rich.into());
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    use humansize::{format_size, BINARY};
    println!();
    println!("  {:<14} {}", "File", path.display());
    println!("  {:<14} {}", "Size", format_size(raw.len() as u64, BINARY));
    println!("  {:<14} {}", "Id", record.id);
    println!("  {:<14} {}", "Date", record.date);
    println!("  {:<14} {}", "Subject", record.subject);
    println!("  {:<14} {}", "Sender", record.sender);
    println!("  {:<14} {}", "Receiver", record.receiver);
    println!("  {:<14} {}", "Rich content", if rich { "yes" } else { "no" });
    println!();
    println!("{}", record.body);
    println!();
    Ok(())
}

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
