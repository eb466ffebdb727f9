//! warden - log-driven repair agent
//!
//! `warden run` executes exactly one cycle: read the trailing log window,
//! cluster and deduplicate problems, and open fix pull requests or send
//! benign-decision emails. Scheduling is external (cron, systemd timer).
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/warden/state.db (~/.local/share/warden/state.db)
//! - Logs: $XDG_STATE_HOME/warden/warden.log (~/.local/state/warden/warden.log)
//! - Config: $XDG_CONFIG_HOME/warden/config.toml (~/.config/warden/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use process_lock::try_acquire_run_lock;
use std::path::PathBuf;
use warden_core::llm::{create_completion_client, LlmJudge};
use warden_core::logs::LokiClient;
use warden_core::notify::{Notifier, ResendNotifier};
use warden_core::source_control::GitHubClient;
use warden_core::{ClusterOutcome, Config, Database, Orchestrator};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Turn recurring ledger node log errors into fix pull requests")]
#[command(version)]
struct Args {
    /// Config file (defaults to $XDG_CONFIG_HOME/warden/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one full cycle and exit
    Run,

    /// List processed patterns
    Patterns {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete processed patterns so they are reconsidered next run
    Reset {
        /// Slugs to reset
        #[arg(required_unless_present = "all")]
        slugs: Vec<String>,

        /// Reset every pattern
        #[arg(long, conflicts_with = "slugs")]
        all: bool,
    },

    /// Show recent runs
    Runs {
        /// Number of runs to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved configuration (secrets masked)
    Config,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    let _log_guard =
        warden_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Run => run(&config),
        Command::Patterns { json } => patterns(json),
        Command::Reset { slugs, all } => reset(&slugs, all),
        Command::Runs { limit, json } => runs(limit, json),
        Command::Config => show_config(&config),
    }
}

fn open_database() -> Result<Database> {
    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    Ok(db)
}

fn run(config: &Config) -> Result<()> {
    config
        .validate_for_run()
        .context("configuration is incomplete")?;

    let db_path = Config::database_path();
    let Some(_lock) = try_acquire_run_lock(&db_path).context("failed to acquire process lock")?
    else {
        tracing::info!("Another run holds the lock, exiting");
        println!("Another warden run is in progress; nothing to do.");
        return Ok(());
    };

    let db = open_database()?;

    let logs = LokiClient::new(&config.logs).context("failed to create log store client")?;
    let completion =
        create_completion_client(&config.llm).context("failed to create model client")?;
    let judge = LlmJudge::new(completion, config.environment.clone());
    let github = GitHubClient::new(&config.github).context("failed to create GitHub client")?;
    let resend = if config.notify.enabled {
        Some(
            ResendNotifier::new(&config.notify, &config.environment)
                .context("failed to create notifier")?,
        )
    } else {
        None
    };
    let notifier = resend.as_ref().map(|n| n as &dyn Notifier);

    let orchestrator = Orchestrator::new(config, &db, &logs, &judge, &github, notifier);
    let summary = orchestrator.run_once().context("run failed")?;

    println!("Run {}", summary.record.id);
    println!(
        "  clusters: {}  PRs opened: {}  errors: {}  duration: {:.1}s",
        summary.record.clusters_found,
        summary.record.prs_created,
        summary.record.errors,
        summary.record.duration_seconds
    );
    for cluster in &summary.clusters {
        match &cluster.pr_url {
            Some(url) => println!("  {:<16} {}  {}", cluster.outcome.as_str(), cluster.slug, url),
            None => println!("  {:<16} {}", cluster.outcome.as_str(), cluster.slug),
        }
    }
    let deferred = summary.count(ClusterOutcome::Deferred);
    if deferred > 0 {
        println!("  {} fixable cluster(s) deferred by the PR cap", deferred);
    }
    if summary.deadline_reached {
        println!("  deadline reached; remaining clusters left for the next run");
    }

    Ok(())
}

fn patterns(json: bool) -> Result<()> {
    let db = open_database()?;
    let patterns = db.list_patterns().context("failed to list patterns")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&patterns)?);
        return Ok(());
    }

    if patterns.is_empty() {
        println!("No processed patterns.");
        return Ok(());
    }

    println!("{:<60} {:<18} {:<17} PR", "SLUG", "STATUS", "CREATED");
    for p in &patterns {
        println!(
            "{:<60} {:<18} {:<17} {}",
            p.slug,
            p.status.as_str(),
            p.created_at.format("%Y-%m-%d %H:%M"),
            p.pr_url.as_deref().unwrap_or("-")
        );
    }

    let counts = db.count_patterns_by_status()?;
    let mut totals: Vec<_> = counts.into_iter().collect();
    totals.sort();
    let totals: Vec<String> = totals
        .into_iter()
        .map(|(status, count)| format!("{}={}", status, count))
        .collect();
    println!("\n{} pattern(s): {}", patterns.len(), totals.join(", "));
    Ok(())
}

fn reset(slugs: &[String], all: bool) -> Result<()> {
    let db_path = Config::database_path();
    let Some(_lock) = try_acquire_run_lock(&db_path).context("failed to acquire process lock")?
    else {
        anyhow::bail!("a warden run is in progress; try again when it finishes");
    };

    let db = open_database()?;

    if all {
        let removed = db.delete_all_patterns()?;
        println!("Reset {} pattern(s).", removed);
        return Ok(());
    }

    let mut missing = Vec::new();
    for slug in slugs {
        match db.delete_pattern(slug) {
            Ok(()) => println!("Reset {}", slug),
            Err(warden_core::Error::PatternNotFound(_)) => missing.push(slug.as_str()),
            Err(e) => return Err(e.into()),
        }
    }

    if !missing.is_empty() {
        anyhow::bail!("pattern not found: {}", missing.join(", "));
    }
    Ok(())
}

fn runs(limit: usize, json: bool) -> Result<()> {
    let db = open_database()?;
    let runs = db.list_runs(limit).context("failed to list runs")?;

    if json {
        let detailed = runs
            .iter()
            .map(|run| {
                Ok(serde_json::json!({
                    "run": run,
                    "snapshots": db.snapshots_for_run(&run.id)?,
                }))
            })
            .collect::<warden_core::Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&detailed)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!(
        "{:<36} {:<17} {:>9} {:>8} {:>4} {:>6}",
        "ID", "STARTED", "DURATION", "CLUSTERS", "PRS", "ERRORS"
    );
    for run in &runs {
        println!(
            "{:<36} {:<17} {:>8.1}s {:>8} {:>4} {:>6}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.duration_seconds,
            run.clusters_found,
            run.prs_created,
            run.errors
        );
    }
    Ok(())
}

fn mask(secret: Option<String>) -> &'static str {
    if secret.is_some() {
        "set"
    } else {
        "not set"
    }
}

fn show_config(config: &Config) -> Result<()> {
    println!("Config file: {}", Config::config_path().display());
    println!("Database:    {}", Config::database_path().display());
    println!("Log file:    {}", Config::log_path().display());
    println!();
    println!("environment = {}", config.environment);
    println!(
        "[logs] url = {}, window = {}m, max_entries = {}",
        config.logs.url.as_deref().unwrap_or("(unset)"),
        config.logs.window_minutes,
        config.logs.max_entries
    );
    println!(
        "[llm] provider = {:?}, model = {}, api_key = {}",
        config.llm.provider,
        if config.llm.model.is_empty() {
            "(unset)"
        } else {
            config.llm.model.as_str()
        },
        mask(config.llm.resolved_api_key())
    );
    println!(
        "[github] repo = {}, base = {}, reviewer = {}, token = {}",
        config.github.repo,
        config.github.base_branch,
        config.github.reviewer.as_deref().unwrap_or("(none)"),
        mask(config.github.resolved_token())
    );
    println!(
        "[checkout] path = {}, sync_before_run = {}",
        config.checkout.path.display(),
        config.checkout.sync_before_run
    );
    println!(
        "[notify] enabled = {}, to = {}, from = {}, api_key = {}",
        config.notify.enabled,
        config.notify.to.as_deref().unwrap_or("(none)"),
        config.notify.sender(&config.environment),
        mask(config.notify.resolved_api_key())
    );
    println!(
        "[run] max_prs = {}, max_clusters = {}, deadline = {}s, similarity >= {}",
        config.run.max_prs_per_run,
        config.run.max_clusters,
        config.run.deadline_secs,
        config.run.similarity_threshold
    );
    println!(
        "[module_hints] version = {}, modules = {}",
        config.module_hints.version,
        config.module_hints.paths.len()
    );

    match config.validate_for_run() {
        Ok(()) => println!("\nReady to run."),
        Err(e) => println!("\nNot ready to run: {}", e),
    }
    Ok(())
}
