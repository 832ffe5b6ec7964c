//! Patch-Tracker CLI
//!
//! The `patch-tracker` command runs the sync service and its one-off
//! maintenance tasks.
//!
//! ## Commands
//!
//! - `serve`: run the scheduler until Ctrl-C
//! - `sync-once`: run one cycle for one tracking
//! - `track` / `list`: manage tracking configurations
//! - `check-credentials`: verify the GitHub and Gitee tokens
//! - `spec-update`: add patches and a changelog entry to a local RPM spec file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use patch_tracker_core::{
    CredentialCheck, CycleOutcome, GitHubClient, GiteeClient, LocalGitSource, PublishPipeline,
    RemoteApiSource, RetryPolicy, Scheduler, Settings, SourceFactory, SpecFile, Tracker,
};
use tracing::{info, Level};
use tracking_state::{BackendKind, SurrealTrackingStore, TrackingConfig, TrackingKey, TrackingStore};

#[derive(Parser)]
#[command(name = "patch-tracker")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish upstream commits as reviewable downstream patches", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Settings file
    #[arg(
        short,
        long,
        global = true,
        env = "PATCH_TRACKER_CONFIG",
        default_value = "patch-tracker.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify credentials and run the scheduler until Ctrl-C
    Serve,

    /// Run one tracking cycle now
    SyncOnce {
        /// Downstream repository (`owner/name`)
        #[arg(long)]
        repo: String,

        /// Downstream base branch
        #[arg(long)]
        branch: String,
    },

    /// Add or replace a tracking
    Track {
        /// Downstream repository (`owner/name`)
        #[arg(long)]
        repo: String,

        /// Downstream base branch
        #[arg(long)]
        branch: String,

        /// Upstream backend: local-git or remote-api
        #[arg(long, default_value = "remote-api")]
        backend: BackendKind,

        /// Upstream locator (clone URL or `owner/name`)
        #[arg(long)]
        scm_repo: String,

        /// Upstream branch
        #[arg(long)]
        scm_branch: String,

        /// Watermark to set; omitted keeps the stored one, empty means
        /// bootstrap to the upstream tip
        #[arg(long)]
        watermark: Option<String>,

        /// Store the tracking disabled
        #[arg(long)]
        disabled: bool,
    },

    /// List enabled trackings
    List,

    /// Verify the GitHub and Gitee tokens
    CheckCredentials,

    /// Add patches and a changelog entry to a local RPM spec file
    SpecUpdate {
        /// Spec file to rewrite in place
        file: PathBuf,

        /// Patch file names, in apply order
        #[arg(short, long = "patch", required = true)]
        patches: Vec<String>,

        /// Changelog entry title (default: today's date and `patch-tracking`)
        #[arg(long)]
        title: Option<String>,

        /// Changelog note
        #[arg(long, default_value = "append patch file of upstream repository")]
        note: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    patch_tracker_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Serve => cmd_serve(&cli.config).await,
        Commands::SyncOnce { repo, branch } => cmd_sync_once(&cli.config, &repo, &branch).await,
        Commands::Track {
            repo,
            branch,
            backend,
            scm_repo,
            scm_branch,
            watermark,
            disabled,
        } => {
            let tracking = TrackingConfig {
                repo,
                branch,
                backend,
                scm_repo,
                scm_branch,
                watermark,
                enabled: !disabled,
            };
            cmd_track(&cli.config, tracking).await
        }
        Commands::List => cmd_list(&cli.config, cli.json).await,
        Commands::CheckCredentials => cmd_check_credentials(&cli.config).await,
        Commands::SpecUpdate {
            file,
            patches,
            title,
            note,
        } => cmd_spec_update(&file, &patches, title.as_deref(), &note),
    }
}

// -- wiring ------------------------------------------------------------------

struct Service {
    settings: Settings,
    store: Arc<SurrealTrackingStore>,
    github: Arc<GitHubClient>,
    gitee: Arc<GiteeClient>,
}

impl Service {
    async fn open(config: &Path) -> Result<Self> {
        let settings = Settings::load(config)
            .with_context(|| format!("Failed to load settings from {}", config.display()))?;
        let store = SurrealTrackingStore::connect(&settings.database_url)
            .await
            .with_context(|| format!("Failed to open tracking store {}", settings.database_url))?;
        let github = GitHubClient::with_base_url(
            &settings.github_api_base,
            &settings.github_access_token,
            RetryPolicy::REMOTE_API,
        )
        .context("Failed to build GitHub client")?;
        let gitee = GiteeClient::with_base_url(&settings.gitee_api_base, &settings.gitee_access_token)
            .context("Failed to build Gitee client")?;

        Ok(Self {
            settings,
            store: Arc::new(store),
            github: Arc::new(github),
            gitee: Arc::new(gitee),
        })
    }

    fn tracker(&self) -> Tracker {
        let local = Arc::new(LocalGitSource::new(self.settings.git_base_path.clone()));
        let remote = Arc::new(RemoteApiSource::new(self.github.clone()));
        let pipeline = PublishPipeline::new(self.gitee.clone(), self.store.clone(), self.store.clone());
        Tracker::new(self.store.clone(), SourceFactory::new(local, remote), pipeline)
    }

    fn credential_checks(&self) -> Vec<Arc<dyn CredentialCheck>> {
        let github: Arc<dyn CredentialCheck> = self.github.clone();
        let gitee: Arc<dyn CredentialCheck> = self.gitee.clone();
        vec![github, gitee]
    }
}

async fn open_store(config: &Path) -> Result<SurrealTrackingStore> {
    let settings = Settings::load(config)
        .with_context(|| format!("Failed to load settings from {}", config.display()))?;
    SurrealTrackingStore::connect(&settings.database_url)
        .await
        .with_context(|| format!("Failed to open tracking store {}", settings.database_url))
}

// -- commands ----------------------------------------------------------------

async fn cmd_serve(config: &Path) -> Result<()> {
    let service = Service::open(config).await?;
    let scheduler = Scheduler::initialize(
        service.tracker(),
        service.settings.scheduler_config(),
        &service.credential_checks(),
    )
    .await
    .context("Refusing to start")?;

    scheduler.start()?;
    info!(config = %config.display(), "patch-tracker serving");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested, waiting for running cycles");
    scheduler.shutdown().await;
    Ok(())
}

async fn cmd_sync_once(config: &Path, repo: &str, branch: &str) -> Result<()> {
    let service = Service::open(config).await?;
    let outcome = service
        .tracker()
        .run_for_key(&TrackingKey::new(repo, branch))
        .await?;

    match &outcome {
        CycleOutcome::Published(result) => {
            println!("Published {} patch(es) to {}", result.patches.len(), result.work_branch);
            println!("Issue: {}", result.issue);
            println!("Watermark: {}", result.watermark);
        }
        CycleOutcome::UpToDate => println!("Up to date"),
        CycleOutcome::Bootstrapped { tip } => println!("Watermark bootstrapped to {tip}"),
        CycleOutcome::Diverged { reason } => bail!("Upstream diverged: {reason}"),
        CycleOutcome::Skipped { reason } => bail!("Cycle skipped: {reason}"),
        CycleOutcome::Failed { error, .. } => bail!("Publish failed: {error}"),
    }
    Ok(())
}

async fn cmd_track(config: &Path, tracking: TrackingConfig) -> Result<()> {
    let store = open_store(config).await?;
    let key = tracking.key();
    save_tracking(&store, tracking).await?;
    println!("Tracking {key} saved");
    Ok(())
}

/// Upsert `tracking`; without a watermark the stored one is kept.
async fn save_tracking(store: &dyn TrackingStore, tracking: TrackingConfig) -> Result<()> {
    let key = tracking.key();
    store
        .upsert(tracking)
        .await
        .with_context(|| format!("Failed to save tracking {key}"))
}

async fn cmd_list(config: &Path, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let trackings = store.list_enabled().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&trackings)?);
        return Ok(());
    }
    if trackings.is_empty() {
        println!("No enabled trackings");
    }
    for t in &trackings {
        println!(
            "{}:{}  <-  {}@{}  [{}]  watermark: {}",
            t.repo,
            t.branch,
            t.scm_repo,
            t.scm_branch,
            t.backend,
            t.watermark().unwrap_or("-")
        );
    }
    Ok(())
}

async fn cmd_check_credentials(config: &Path) -> Result<()> {
    let service = Service::open(config).await?;
    let mut failed = Vec::new();
    for check in service.credential_checks() {
        match check.verify_credentials().await {
            Ok(()) => println!("{}: ok", check.service()),
            Err(err) => {
                println!("{}: {err}", check.service());
                failed.push(check.service().to_string());
            }
        }
    }
    if !failed.is_empty() {
        bail!("Credentials rejected by {}", failed.join(", "));
    }
    Ok(())
}

fn cmd_spec_update(file: &Path, patches: &[String], title: Option<&str>, note: &str) -> Result<()> {
    let current = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read spec file {}", file.display()))?;
    let spec = SpecFile::parse(&current);
    for anomaly in spec.anomalies() {
        eprintln!("warning: {anomaly}");
    }

    let title = title
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} patch-tracking", Local::now().format("%a %b %d %Y")));
    let updated = spec.update(&title, note, patches);
    std::fs::write(file, updated)
        .with_context(|| format!("Failed to write spec file {}", file.display()))?;
    println!("Added {} patch(es) to {}", patches.len(), file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sync_once_with_global_flags() {
        let cli = Cli::try_parse_from([
            "patch-tracker",
            "sync-once",
            "--repo",
            "src-openeuler/zlib",
            "--branch",
            "master",
            "--json",
            "--config",
            "/etc/patch-tracker.toml",
        ])
        .unwrap();

        assert!(cli.json);
        assert_eq!(cli.config, PathBuf::from("/etc/patch-tracker.toml"));
        assert!(matches!(
            cli.command,
            Commands::SyncOnce { ref repo, ref branch } if repo == "src-openeuler/zlib" && branch == "master"
        ));
    }

    #[test]
    fn track_parses_backend_aliases() {
        let cli = Cli::try_parse_from([
            "patch-tracker",
            "track",
            "--repo",
            "src-openeuler/zlib",
            "--branch",
            "master",
            "--backend",
            "git",
            "--scm-repo",
            "https://github.com/madler/zlib.git",
            "--scm-branch",
            "develop",
        ])
        .unwrap();

        let Commands::Track {
            backend, watermark, ..
        } = cli.command
        else {
            panic!("expected track");
        };
        assert_eq!(backend, BackendKind::LocalGit);
        assert!(watermark.is_none());
    }

    #[tokio::test]
    async fn retracking_without_watermark_keeps_progress() {
        let store = SurrealTrackingStore::in_memory().await.unwrap();
        let tracking = |watermark: Option<&str>, enabled: bool| TrackingConfig {
            repo: "src-openeuler/zlib".to_string(),
            branch: "master".to_string(),
            backend: BackendKind::RemoteApi,
            scm_repo: "madler/zlib".to_string(),
            scm_branch: "develop".to_string(),
            watermark: watermark.map(str::to_string),
            enabled,
        };

        save_tracking(&store, tracking(Some("c7"), true)).await.unwrap();
        save_tracking(&store, tracking(None, false)).await.unwrap();

        let stored = store
            .get(&TrackingKey::new("src-openeuler/zlib", "master"))
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.watermark.as_deref(), Some("c7"));
    }

    #[test]
    fn spec_update_requires_a_patch() {
        assert!(Cli::try_parse_from(["patch-tracker", "spec-update", "zlib.spec"]).is_err());
    }

    #[test]
    fn spec_update_rewrites_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("zlib.spec");
        std::fs::write(
            &file,
            "Name: zlib\nVersion: 1.3\nRelease: 4\nSource0: zlib-1.3.tar.gz\n\n%prep\n%setup -q\n\n%changelog\n",
        )
        .unwrap();

        cmd_spec_update(
            &file,
            &["fix-inflate.patch".to_string()],
            Some("Tue Mar 05 2024 patch-tracking"),
            "append fix-inflate",
        )
        .unwrap();

        let updated = std::fs::read_to_string(&file).unwrap();
        assert!(updated.contains("Patch0001: fix-inflate.patch"));
        assert!(updated.contains("Release: 5"));
        assert!(updated.contains("* Tue Mar 05 2024 patch-tracking - 1.3-5\n- append fix-inflate"));
    }

    #[test]
    fn spec_update_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_spec_update(&dir.path().join("absent.spec"), &[], None, "note").unwrap_err();
        assert!(err.to_string().contains("absent.spec"));
    }
}
