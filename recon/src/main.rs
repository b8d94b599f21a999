//! recon — automated external reconnaissance pipeline.

mod config;
mod logging;
mod notify;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use artifacts::journal::{Journal, StageRecord};
use artifacts::ArtifactStore;
use pipeline::{Notifier, Pipeline, RunContext, RunReport};
use recon_core::redact;
use recon_core::target::{Scope, Target};
use runner::ToolRegistry;

const EXIT_OK: i32 = 0;
const EXIT_STRICT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_FATAL: i32 = 3;

#[derive(Debug, Parser)]
#[command(
    name = "recon",
    version,
    about = "Automated external reconnaissance pipeline (authorized targets only)"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Target domain (repeatable; each domain gets its own run)
    #[arg(short = 'd', long = "domain")]
    domain: Vec<String>,

    /// Parent directory for run artifacts
    #[arg(short = 'o', long, default_value = "./recon_results")]
    output: PathBuf,

    /// Governor permits: global bound on concurrent tool invocations
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Wordlist for subdomain brute forcing
    #[arg(short = 'w', long)]
    wordlist: Option<PathBuf>,

    /// Skip the active stages (brute force, fuzzing, scans)
    #[arg(long)]
    passive_only: bool,

    /// Only keep discovered hosts matching this regex
    #[arg(long)]
    include: Option<String>,

    /// Drop discovered hosts matching this regex
    #[arg(long)]
    exclude: Option<String>,

    /// Continue the most recent run for this target, if config matches
    #[arg(long)]
    resume: bool,

    /// YAML config file (CLI flags override file values)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Webhook URL receiving the summary JSON on completion
    #[arg(long)]
    webhook: Option<String>,

    /// Exit nonzero when any stage FAILED
    #[arg(long)]
    strict: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Acknowledge that you are authorized to scan the target
    #[arg(long = "i-understand-this-requires-authorization")]
    authorized: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compare two completed run directories and print the changes as JSON
    Diff {
        previous: PathBuf,
        current: PathBuf,
    },
}

fn main() {
    std::process::exit(real_main());
}

fn real_main() -> i32 {
    let cli = Cli::parse();

    if let Some(Commands::Diff { previous, current }) = &cli.command {
        return run_diff(previous, current);
    }

    if !cli.authorized {
        eprintln!(
            "refusing to scan: pass --i-understand-this-requires-authorization to confirm \
             you have explicit permission to test the target"
        );
        return EXIT_USAGE;
    }

    let domains = resolve_domains(&cli.domain);
    if domains.is_empty() {
        eprintln!("no target: pass -d/--domain or set RECON_TARGET");
        return EXIT_USAGE;
    }

    let sink = logging::init(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("runtime: {e}");
            return EXIT_FATAL;
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        rt.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let mut exit = EXIT_OK;
    for domain in &domains {
        if cancel.is_cancelled() {
            break;
        }
        match rt.block_on(run_one(domain, &cli, &sink, &cancel)) {
            Ok(code) => exit = exit.max(code),
            Err(e) => {
                error!(error = %format!("{e:#}"), "run failed");
                eprintln!("fatal: {e:#}");
                exit = exit.max(EXIT_FATAL);
            }
        }
    }
    if cancel.is_cancelled() {
        exit = exit.max(EXIT_FATAL);
    }
    exit
}

/// -d flags, falling back to the conventional environment variables.
fn resolve_domains(cli_domains: &[String]) -> Vec<String> {
    if !cli_domains.is_empty() {
        return cli_domains.to_vec();
    }
    for key in ["RECON_TARGET", "RECON_DOMAIN", "TARGET_DOMAIN"] {
        if let Ok(value) = std::env::var(key) {
            if !value.trim().is_empty() {
                return vec![value];
            }
        }
    }
    Vec::new()
}

async fn run_one(
    domain: &str,
    cli: &Cli,
    sink: &logging::LogSink,
    cancel: &CancellationToken,
) -> Result<i32> {
    let target = Target::parse(domain).map_err(|e| anyhow!("{e}"))?;
    target.ensure_routable().map_err(|e| anyhow!("{e}"))?;
    let scope = Scope::new(cli.include.as_deref(), cli.exclude.as_deref())
        .map_err(|e| anyhow!("{e}"))?;

    let file_config = config::load_config(cli.config.as_deref());
    let overrides = config::CliOverrides {
        threads: cli.threads,
        passive_only: cli.passive_only,
        strict: cli.strict,
        wordlist: cli.wordlist.clone(),
    };
    let scan_config = config::build_scan_config(file_config.as_ref(), &overrides);

    let mut stage_set = stages::catalog();
    stage_set.extend(report::reporting_stages());
    let pipeline = Pipeline::new(stage_set).map_err(|e| anyhow!("{e}"))?;
    let config_hash = scan_config.resume_hash(&target, &scope, &pipeline.stage_names());

    // Resume reopens the latest matching run directory; otherwise a fresh
    // stamped directory is created.
    let (store, journal, resume_map) = if cli.resume {
        let run_dir = find_latest_run(&cli.output, target.fqdn())
            .ok_or_else(|| anyhow!("--resume: no previous run found for {}", target.fqdn()))?;
        let store = ArtifactStore::open(&run_dir).map_err(|e| anyhow!("{e}"))?;
        let journal = Journal::load(&store)
            .ok_or_else(|| anyhow!("--resume: {} has no state journal", run_dir.display()))?;
        if let Err(e) = journal.validate_resume(&config_hash) {
            eprintln!("{e}");
            return Ok(EXIT_USAGE);
        }
        let mut resume_map: HashMap<String, StageRecord> = HashMap::new();
        for name in journal.resumable_ok_stages(&store) {
            if let Some(record) = journal.stage(&name) {
                resume_map.insert(name, record.clone());
            }
        }
        (store, journal, resume_map)
    } else {
        let store =
            ArtifactStore::create(&cli.output, target.fqdn()).map_err(|e| anyhow!("{e}"))?;
        let journal = Journal::new(store.run_id(), &config_hash);
        (store, journal, HashMap::new())
    };

    sink.set_file(&store.run_root().join("scan.log"))
        .context("scan.log")?;
    info!(
        target = target.fqdn(),
        run_id = store.run_id(),
        permits = scan_config.permits,
        passive_only = scan_config.passive_only,
        "run starting"
    );

    let local_bin = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.join("bin")));
    let registry = ToolRegistry::new(config::tool_overrides(file_config.as_ref()), local_bin);

    let strict = scan_config.strict;
    let ctx = Arc::new(RunContext::new(
        target,
        scope,
        scan_config,
        store,
        registry,
        cancel.clone(),
    ));

    let run_report = pipeline.run(ctx.clone(), journal, resume_map).await;
    print_table(&run_report);

    notify_completion(cli, &ctx.store).await;

    if run_report.cancelled {
        return Ok(EXIT_FATAL);
    }
    if strict && run_report.failed_count() > 0 {
        return Ok(EXIT_STRICT_FAILURE);
    }
    Ok(EXIT_OK)
}

/// Most recent `<target>_<stamp>` directory under the output parent; the
/// UTC stamp sorts lexically.
fn find_latest_run(output: &Path, target: &str) -> Option<PathBuf> {
    let prefix = format!("{target}_");
    let mut runs: Vec<PathBuf> = std::fs::read_dir(output)
        .ok()?
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .collect();
    runs.sort();
    runs.pop()
}

fn print_table(report: &RunReport) {
    println!(
        "\nrun {} ({}) finished in {}s{}",
        report.run_id,
        report.target,
        report.duration.as_secs(),
        if report.cancelled { " [cancelled]" } else { "" }
    );
    println!("{:<18} {:<8} {:>9}  note", "stage", "state", "duration");
    for result in &report.results {
        println!(
            "{:<18} {:<8} {:>8}s  {}",
            result.name,
            result.state.to_string(),
            result.duration.as_secs(),
            result
                .reason
                .as_deref()
                .map(redact::redact)
                .unwrap_or_default()
        );
    }
}

async fn notify_completion(cli: &Cli, store: &ArtifactStore) {
    let url = cli
        .webhook
        .clone()
        .or_else(|| std::env::var("WEBHOOK_URL").ok())
        .filter(|u| !u.trim().is_empty());
    let Some(url) = url else { return };
    let Ok(summary) = store.read_json::<serde_json::Value>("summary.json") else {
        warn!("summary.json missing, skipping webhook");
        return;
    };
    match notify::WebhookNotifier::new(url) {
        Ok(notifier) => {
            let _ = notifier.notify(&summary).await;
        }
        Err(e) => warn!(error = %e, "webhook notifier unavailable"),
    }
}

fn run_diff(previous: &Path, current: &Path) -> i32 {
    let open = |p: &Path| {
        ArtifactStore::open(p).map_err(|e| {
            eprintln!("cannot open run directory {}: {e}", p.display());
            EXIT_USAGE
        })
    };
    let prev = match open(previous) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let curr = match open(current) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let changes = report::diff_runs(&prev, &curr);
    match serde_json::to_string_pretty(&changes) {
        Ok(json) => {
            println!("{json}");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("diff serialization: {e}");
            EXIT_FATAL
        }
    }
}
