//! memrec-verify - Membership verification binary
//!
//! Loads the candidate roster, signs into the membership registry once, and
//! fans pending records out to worker tabs that verify each self-reported
//! member ID through the registry's search UI. Results are written after
//! every record, so an interrupted run resumes where it stopped. Holds the
//! shared run-status lock for the duration.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use memrec_common::artifacts::{mirror_files, DirSink};
use memrec_common::config::{Credentials, Settings};
use memrec_common::status::{RunPhase, StatusFile};
use memrec_common::Error;
use memrec_verify::session::RegistryContext;
use memrec_verify::{roster, store, PageFactory, ResultStore, Scheduler, SchedulerConfig};

/// Command-line arguments for memrec-verify
#[derive(Parser, Debug)]
#[command(name = "memrec-verify")]
#[command(about = "Verify self-reported membership IDs against the registry")]
#[command(version)]
struct Args {
    /// Check at most this many pending records (0 = all)
    #[arg(long, default_value_t = 0)]
    limit: usize,

    /// Concurrent worker tabs under the one signed-in session
    #[arg(long, default_value_t = 1, env = "MEMREC_VERIFIER_CONCURRENCY")]
    concurrency: usize,

    /// ID-search retries per record
    #[arg(long, default_value_t = 2, env = "MEMREC_VERIFIER_RETRY")]
    retry: u32,

    /// Final results path; the CSV and partial snapshot are siblings
    #[arg(long, default_value = "out/usa-status.json")]
    out: PathBuf,

    /// Roster snapshot to read candidates from
    #[arg(long = "in", default_value = "out/usa-members.json")]
    input: PathBuf,

    /// Skip the roster cache and read the platform API directly
    #[arg(long)]
    from_api: bool,

    /// Ignore prior results and start from an empty set
    #[arg(long, visible_alias = "fresh")]
    no_resume: bool,

    /// Run the browser with a visible window
    #[arg(long)]
    headful: bool,

    /// WebDriver endpoint of a running chromedriver
    #[arg(
        long,
        default_value = "http://localhost:9515",
        env = "MEMREC_WEBDRIVER_URL"
    )]
    webdriver_url: String,

    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run status file shared with the fetcher (cooperative lock)
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

    /// Mirror the results and status files into this directory after the run
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

    info!(
        "Starting membership verification run v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        limit = args.limit,
        concurrency = args.concurrency,
        retry = args.retry,
        out = %args.out.display(),
        input = %args.input.display(),
        from_api = args.from_api,
        no_resume = args.no_resume,
        "Parameters"
    );

    let settings = Arc::new(Settings::load(args.config.as_deref())?);
    // Credentials are checked before any session work
    let credentials = settings.registry_credentials()?;

    let mut status = StatusFile::new(&args.status);
    match status.begin(RunPhase::Verify) {
        Ok(()) => {}
        Err(Error::AlreadyRunning(pid)) => {
            info!(pid, "Another run is already active; exiting without work");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    match run(&args, Arc::clone(&settings), credentials).await {
        Ok(()) => {
            status.complete()?;
            mirror(&args);
            Ok(())
        }
        Err(e) => {
            if let Err(se) = status.fail(&e.to_string()) {
                warn!(error = %se, "Failed to record error in status file");
            }
            Err(e)
        }
    }
}

async fn run(args: &Args, settings: Arc<Settings>, credentials: Credentials) -> Result<()> {
    let people = roster::load(&settings, &args.input, args.from_api).await?;
    let people = roster::with_member_ids(people);

    let store = Arc::new(ResultStore::new(&args.out));
    let prior = if args.no_resume {
        info!("Resume disabled by flag");
        Vec::new()
    } else {
        store.load_prior()
    };

    let mut planned = store::compute_pending(&people, &prior);
    let remaining = planned.len();
    if args.limit > 0 && planned.len() > args.limit {
        planned.truncate(args.limit);
    }
    info!(
        with_ids = people.len(),
        already_checked = prior.len(),
        remaining,
        will_check = planned.len(),
        "Computed pending work"
    );

    store.seed(prior).await;
    store.set_planned(planned.len()).await;

    if planned.is_empty() {
        store.flush_final().await?;
        info!("No pending people to verify; wrote existing results and exiting");
        println!(
            "Done. Nothing to verify. Wrote {} and {}",
            store.final_path().display(),
            store.csv_path().display()
        );
        return Ok(());
    }

    let headless = !args.headful;
    info!(headless, "Launching browser");
    let ctx =
        RegistryContext::connect(&args.webdriver_url, headless, Arc::clone(&settings)).await?;
    let login_started = Instant::now();
    if let Err(e) = ctx.login(&credentials).await {
        close_quietly(&ctx).await;
        return Err(e.into());
    }
    info!(seconds = login_started.elapsed().as_secs(), "Login step took");

    let cancel = CancellationToken::new();
    spawn_interrupt_flush(Arc::clone(&store), cancel.clone());

    let scheduler = Scheduler::new(
        Arc::clone(&settings),
        SchedulerConfig {
            workers: args.concurrency.max(1),
            retries: args.retry,
        },
    );
    let factory: Arc<dyn PageFactory> = Arc::new(ctx.pages());
    let stats = match scheduler
        .run(factory, planned, Arc::clone(&store), cancel.clone())
        .await
    {
        Ok(stats) => stats,
        Err(e) => {
            close_quietly(&ctx).await;
            return Err(e.into());
        }
    };

    close_quietly(&ctx).await;
    store.flush_final().await?;

    let (checked, found, not_found) = store.counts().await;
    info!(
        processed = stats.processed,
        errors = stats.errors,
        "Verification run finished"
    );
    println!(
        "Done. Checked {checked}. FOUND={found}, NOT_FOUND={not_found}. Wrote {} and {}",
        store.final_path().display(),
        store.csv_path().display()
    );
    Ok(())
}

/// Interrupts flush whatever is in memory and leave with the exit code that
/// tells callers "partial results saved".
fn spawn_interrupt_flush(store: Arc<ResultStore>, cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
        info!(
            "Saving partial results to {}...",
            store.final_path().display()
        );
        if let Err(e) = store.flush_final().await {
            warn!(error = %e, "Final flush on interrupt failed");
        }
        std::process::exit(130);
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

async fn close_quietly(ctx: &RegistryContext) {
    if let Err(e) = ctx.close().await {
        warn!(error = %e, "Failed to close browser session");
    }
}

fn mirror(args: &Args) {
    let Some(dir) = &args.mirror_dir else {
        return;
    };
    let sink = DirSink::new(dir);
    let csv = args.out.with_extension("csv");
    let n = mirror_files(
        &sink,
        &[args.out.as_path(), csv.as_path(), args.status.as_path()],
    );
    info!(count = n, dir = %dir.display(), "Mirrored artifacts");
}
