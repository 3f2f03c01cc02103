use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repodrift::auth::Credentials;
use repodrift::bitbucket::{BitbucketClient, Listing, RemoteRepo};
use repodrift::config::Config;
use repodrift::engine::{EngineOptions, SyncEngine};
use repodrift::error::SyncError;
use repodrift::git::SystemGit;
use repodrift::health::HealthCheck;
use repodrift::report::ReportFormat;

#[derive(Parser)]
#[command(name = "repodrift")]
#[command(about = "Mirror Bitbucket projects locally and report per-repository drift")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bitbucket workspace slug
    #[arg(short, long, global = true, env = "BB_WORKSPACE")]
    workspace: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List repositories in the selected projects without touching disk
    List {
        /// Comma-separated project keys, e.g. DEVOPS,PLATFORM
        #[arg(short, long, value_delimiter = ',')]
        projects: Vec<String>,

        /// Output format: text or json
        #[arg(long)]
        format: Option<ReportFormat>,
    },

    /// Clone missing repositories, fetch existing ones, report drift
    Sync {
        /// Comma-separated project keys, e.g. DEVOPS,PLATFORM
        #[arg(short, long, value_delimiter = ',')]
        projects: Vec<String>,

        /// Destination root directory for local clones
        #[arg(short, long)]
        dest: Option<String>,

        /// Resolve planned actions without cloning, fetching or fast-forwarding
        #[arg(long)]
        dry_run: bool,

        /// Fast-forward default branches that are strictly behind origin
        #[arg(long)]
        ff_default: bool,

        /// Report format: text or json
        #[arg(long)]
        format: Option<ReportFormat>,

        /// Worker pool width (1 processes repositories strictly in sequence)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Exit non-zero when any repository fails or a project matches nothing
        #[arg(long)]
        strict: bool,
    },

    /// Write a default configuration file
    Init {
        /// Destination root to record in the config
        #[arg(short, long)]
        dest: Option<String>,
    },

    /// Preflight checks: git binary, credentials, destination root
    Doctor,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        // Credential and configuration problems get their own exit code so
        // nightly automation can tell "fix the token" from "run went bad".
        let code = match err.downcast_ref::<SyncError>() {
            Some(SyncError::Auth(_)) | Some(SyncError::Config(_)) => 2,
            _ => 1,
        };
        eprintln!("error: {:#}", err);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("repodrift v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(workspace) = cli.workspace {
        config.workspace = workspace;
    }

    match cli.command {
        Commands::List { projects, format } => cmd_list(config, projects, format).await,
        Commands::Sync {
            projects,
            dest,
            dry_run,
            ff_default,
            format,
            jobs,
            strict,
        } => {
            cmd_sync(
                config, projects, dest, dry_run, ff_default, format, jobs, strict,
            )
            .await
        }
        Commands::Init { dest } => cmd_init(config, dest),
        Commands::Doctor => cmd_doctor(&config),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// List repositories of the selected projects. Read-only: no clone, no
/// fetch, no filesystem changes at all.
async fn cmd_list(
    mut config: Config,
    projects: Vec<String>,
    format: Option<ReportFormat>,
) -> Result<()> {
    if !projects.is_empty() {
        config.projects = projects;
    }
    config.validate(false)?;

    let credentials = Credentials::from_env()?;
    let listing = enumerate(&config, credentials).await?;

    let format = format.unwrap_or(config.report.format);
    match format {
        ReportFormat::Json => {
            let items: Vec<serde_json::Value> = listing
                .repos
                .iter()
                .map(|repo| {
                    let (ssh, https) = clone_links(repo);
                    serde_json::json!({
                        "name": repo.name,
                        "slug": repo.slug,
                        "project": repo.project,
                        "ssh": ssh,
                        "https": https,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        ReportFormat::Text => {
            for repo in &listing.repos {
                println!("{:<12} {:<40} {}", repo.project, repo.slug, repo.clone_url);
            }
            println!("{} repositories", listing.repos.len());
        }
    }

    for key in &listing.missing_projects {
        warn!(project = %key, "project matched no repository");
    }

    Ok(())
}

/// Run the sync engine over the selected projects and print the report.
#[allow(clippy::too_many_arguments)]
async fn cmd_sync(
    mut config: Config,
    projects: Vec<String>,
    dest: Option<String>,
    dry_run: bool,
    ff_default: bool,
    format: Option<ReportFormat>,
    jobs: Option<usize>,
    strict: bool,
) -> Result<()> {
    if !projects.is_empty() {
        config.projects = projects;
    }
    if let Some(dest) = dest {
        config.dest_root = dest;
        config.expand_paths()?;
    }
    if let Some(jobs) = jobs {
        config.sync.jobs = jobs;
    }
    if ff_default {
        config.sync.ff_default = true;
    }
    config.validate(true)?;

    let credentials = Credentials::from_env()?;
    debug!(method = credentials.method(), "credentials resolved");

    let listing = enumerate(&config, credentials).await?;

    let options = EngineOptions::from_config(&config, dry_run);
    let engine = SyncEngine::new(Arc::new(SystemGit), options);

    // Ctrl-C lets in-flight git operations finish so no clone is left
    // half-written; repositories not yet started are reported as interrupted.
    let shutdown = engine.shutdown_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight git operations");
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    let workspace = config.workspace.clone();
    let report = engine.run(&workspace, listing).await?;

    let format = format.unwrap_or(config.report.format);
    println!("{}", report.render(format)?);

    if strict && report.has_failures() {
        bail!(
            "{} of {} repositories failed, {} projects matched nothing",
            report.summary.failed,
            report.summary.total,
            report.missing_projects.len()
        );
    }

    Ok(())
}

/// Write a default configuration file to the XDG config location.
fn cmd_init(mut config: Config, dest: Option<String>) -> Result<()> {
    let path = Config::default_config_path()?;
    if path.exists() {
        return Err(SyncError::Config(format!(
            "config already exists at {}; edit or remove it first",
            path.display()
        ))
        .into());
    }

    if let Some(dest) = dest {
        config.dest_root = dest;
    }
    config.save(&path)?;

    println!("✅ wrote {}", path.display());
    println!("   set workspace and projects there, or pass --workspace/--projects");
    Ok(())
}

/// Run the preflight checks and print the findings.
fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config);
    print_health_report(&health);

    if !health.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

/// Enumerate the configured projects, logging the volume.
async fn enumerate(config: &Config, credentials: Credentials) -> Result<Listing> {
    let client = BitbucketClient::new(&config.api_url, credentials)?;
    let projects = config.normalized_projects();

    info!(workspace = %config.workspace, projects = ?projects, "listing repositories");

    let mut listing = client
        .list_repositories(&config.workspace, &projects)
        .await
        .context("failed to list repositories")?;

    let before = listing.repos.len();
    listing.repos.retain(|repo| {
        let keep = !config.is_excluded(&repo.slug);
        if !keep {
            debug!(slug = %repo.slug, "excluded by configuration");
        }
        keep
    });

    info!(
        found = before,
        kept = listing.repos.len(),
        "repository listing complete"
    );

    Ok(listing)
}

/// Split a repository's clone URLs back into (ssh, https) for listings.
fn clone_links(repo: &RemoteRepo) -> (Option<&str>, Option<&str>) {
    if repo.clone_url.starts_with("http") {
        (None, Some(repo.clone_url.as_str()))
    } else {
        (Some(repo.clone_url.as_str()), repo.clone_url_alt.as_deref())
    }
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    use repodrift::health::CheckResult;

    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 repodrift preflight checks");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
