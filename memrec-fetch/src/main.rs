//! memrec-fetch - Roster snapshot binary
//!
//! Pulls every person from the scheduling platform, lifts the self-reported
//! member ID out of their custom fields, and writes the roster snapshot
//! artifact. Holds the shared run-status lock for the duration.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;

use memrec_common::artifacts::{mirror_files, DirSink};
use memrec_common::config::Settings;
use memrec_common::status::{RunPhase, StatusFile};
use memrec_common::Error;
use memrec_fetch::{PeopleClient, RosterSnapshot};

/// Command-line arguments for memrec-fetch
#[derive(Parser, Debug)]
#[command(name = "memrec-fetch")]
#[command(about = "Fetch the roster and snapshot self-reported member IDs")]
#[command(version)]
struct Args {
    /// Snapshot output path
    #[arg(long, default_value = "out/usa-members.json")]
    out: PathBuf,

    /// Custom field display name holding the member ID (overrides config)
    #[arg(long)]
    field_name: Option<String>,

    /// Platform base URL (overrides config)
    #[arg(long, env = "MEMREC_PLATFORM_BASE_URL")]
    base_url: Option<String>,

    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run status file shared with the verifier (cooperative lock)
    #[arg(long, default_value = "out/refresh-status.json")]
    status: PathBuf,

    /// Append log lines to this file as well as the console
    #[arg(long, default_value = "out/usa-status.log")]
    log: PathBuf,

    /// Log filter when RUST_LOG is unset (e.g. info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Shortcut for --log-level debug
    #[arg(short, long)]
    verbose: bool,

    /// Mirror the snapshot and status file into this directory after the run
    #[arg(long)]
    mirror_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let directive = if args.verbose {
        "debug".to_string()
    } else {
        args.log_level.clone()
    };
    memrec_common::logging::init(&directive, Some(&args.log))
        .context("Failed to initialize logging")?;

    info!("Starting memrec-fetch v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(args.config.as_deref())?;
    let api_key = settings.platform_api_key()?;
    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| settings.platform.base_url.clone());
    let field_name = args
        .field_name
        .clone()
        .unwrap_or_else(|| settings.platform.member_field.clone());

    // Cooperative lock: a live fetch or verify run means nothing to do here
    let mut status = StatusFile::new(&args.status);
    match status.begin(RunPhase::Fetch) {
        Ok(()) => {}
        Err(Error::AlreadyRunning(pid)) => {
            info!(pid, "Another run is already active; exiting without work");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    match fetch_and_snapshot(&base_url, &api_key, &field_name, &args.out).await {
        Ok(()) => {
            status.complete()?;
            mirror(&args);
            Ok(())
        }
        Err(e) => {
            if let Err(se) = status.fail(&e.to_string()) {
                tracing::warn!(error = %se, "Failed to record error in status file");
            }
            Err(e)
        }
    }
}

async fn fetch_and_snapshot(
    base_url: &str,
    api_key: &str,
    field_name: &str,
    out: &Path,
) -> Result<()> {
    let client = PeopleClient::new(base_url, api_key)?;
    let people = client.fetch_candidates(field_name).await?;

    let snapshot = RosterSnapshot::new(people, field_name);
    snapshot
        .write(out)
        .with_context(|| format!("Failed to write snapshot {}", out.display()))?;

    info!(
        count = snapshot.summary.count,
        with_ids = snapshot.summary.with_ids,
        field = %field_name,
        "Roster snapshot written to {}",
        out.display()
    );
    Ok(())
}

fn mirror(args: &Args) {
    let Some(dir) = &args.mirror_dir else {
        return;
    };
    let sink = DirSink::new(dir);
    let n = mirror_files(&sink, &[args.out.as_path(), args.status.as_path()]);
    info!(count = n, dir = %dir.display(), "Mirrored artifacts");
}
