//! Release Mirror CLI
//!
//! Mirrors upstream releases into a downstream repository, branch by branch

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use release_mirror::core::config::{
    DependencyPin, ManifestPatch, MirrorConfigFile, RunConfig, WorkspaceConfig, WorkspaceRetention,
};
use release_mirror::orchestration::{BranchPlan, MirrorService, RunHistory, RunReport};
use release_mirror::pipeline::DeploymentOutcome;
use release_mirror::telemetry::init_tracing;
use release_mirror::{ConfigLoadOptions, ConfigLoader, MirrorConfig, MirrorError};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::Level;

/// Mirror upstream releases into a deployable downstream repository
#[derive(Parser)]
#[command(name = "release-mirror")]
#[command(version)]
#[command(about = "Mirror upstream releases into a deployable downstream repository", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./release-mirror.yaml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings that take precedence over file and environment
#[derive(Args, Default)]
struct OverrideArgs {
    /// Branch target as branch:prefix (repeatable, replaces configured branches)
    #[arg(long = "branch", global = true, value_name = "BRANCH:PREFIX")]
    branches: Vec<String>,

    /// Directory overlaid onto every release
    #[arg(long, global = true)]
    resources_dir: Option<PathBuf>,

    /// Directory under which workspaces are created
    #[arg(long, global = true)]
    workspace_root: Option<PathBuf>,

    /// Workspace retention (always, on-failure, never)
    #[arg(long, global = true)]
    retention: Option<WorkspaceRetention>,

    /// Dependency pinned into package.json as name@version
    #[arg(long, global = true, value_name = "NAME@VERSION")]
    dependency: Option<DependencyPin>,

    /// Key under `engines` to narrow to its upper range
    #[arg(long, global = true)]
    engine: Option<String>,

    /// Process branches one after another
    #[arg(long, global = true)]
    sequential: bool,

    /// Maximum concurrent branch flows
    #[arg(long, global = true)]
    max_concurrency: Option<usize>,

    /// GitHub API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Run history file
    #[arg(long, global = true)]
    history_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass
    Run {
        /// Write the run report as JSON to this path
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
    },

    /// Show what the next run would publish
    Plan {
        /// Also run the stages up to the resource overlay, without committing
        #[arg(long)]
        stage: bool,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run every day at the configured time
    Daemon {
        /// Run once immediately before waiting for the schedule
        #[arg(long)]
        run_on_startup: bool,
    },

    /// Display run history statistics
    Stats {
        /// History file (defaults to the configured one; the rest of the
        /// configuration is not validated)
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
}

impl OverrideArgs {
    fn into_config_file(self) -> Result<MirrorConfigFile> {
        let mut config = MirrorConfigFile::default();

        if !self.branches.is_empty() {
            let joined = self.branches.join(",");
            config.branches = Some(ConfigLoader::parse_branches(&joined)?);
        }
        config.resources_dir = self.resources_dir;
        if self.workspace_root.is_some() || self.retention.is_some() {
            config.workspace = Some(WorkspaceConfig {
                root: self.workspace_root,
                retention: self.retention,
            });
        }
        if self.dependency.is_some() || self.engine.is_some() {
            config.manifest = Some(ManifestPatch {
                dependency: self.dependency,
                engine: self.engine,
            });
        }
        if self.sequential || self.max_concurrency.is_some() {
            config.run = Some(RunConfig {
                sequential: self.sequential.then_some(true),
                max_concurrency: self.max_concurrency,
                ..Default::default()
            });
        }
        config.api_url = self.api_url;
        config.history_file = self.history_file;

        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.log_level);

    match run(cli).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            eprintln!("{}", e);
            if let Some(mirror_error) = e.downcast_ref::<MirrorError>() {
                for action in mirror_error.suggested_actions() {
                    eprintln!("  - {}", action);
                }
            }
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config_path = cli.config;
    let overrides = cli.overrides;

    match cli.command {
        Commands::Stats { file, json } => {
            // only the history location is needed, so no credentials are required
            let path = match file {
                Some(path) => path,
                None => ConfigLoader::load_merged(&load_options(config_path, overrides)?)
                    .await?
                    .history_file
                    .ok_or_else(|| {
                        MirrorError::ConfigError("no history file configured".to_string())
                    })?,
            };
            stats_command(path, json).await
        }
        command => {
            let config = Arc::new(load_config(config_path, overrides).await?);
            match command {
                Commands::Run { report } => run_command(config, report).await,
                Commands::Plan { stage, json } => plan_command(config, stage, json).await,
                Commands::Daemon { run_on_startup } => {
                    daemon_command(config, run_on_startup).await
                }
                Commands::Stats { .. } => Ok(0),
            }
        }
    }
}

fn load_options(config_path: Option<PathBuf>, overrides: OverrideArgs) -> Result<ConfigLoadOptions> {
    Ok(ConfigLoadOptions {
        config_path,
        working_dir: std::env::current_dir()?,
        cli_overrides: Some(overrides.into_config_file()?),
        env: std::env::vars().collect(),
    })
}

async fn load_config(config_path: Option<PathBuf>, overrides: OverrideArgs) -> Result<MirrorConfig> {
    Ok(ConfigLoader::load(load_options(config_path, overrides)?).await?)
}

async fn run_command(config: Arc<MirrorConfig>, report_path: Option<PathBuf>) -> Result<i32> {
    println!("\n📦 release-mirror\n");

    let service = MirrorService::from_config(config, false)?;
    let report = service.run_once().await?;

    print_run_report(&report);

    if let Some(path) = report_path {
        tokio::fs::write(&path, serde_json::to_string_pretty(&report)?).await?;
        println!("\nReport written to {}", path.display());
    }

    Ok(0)
}

async fn plan_command(config: Arc<MirrorConfig>, stage: bool, json: bool) -> Result<i32> {
    if stage {
        let service = MirrorService::from_config(config, true)?;
        let report = service.run_once().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_run_report(&report);
        }
        return Ok(0);
    }

    let service = MirrorService::from_config(config, true)?;
    let plans = service.orchestrator().plan().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
    } else {
        print_plans(&plans);
    }
    Ok(0)
}

async fn daemon_command(config: Arc<MirrorConfig>, run_on_startup: bool) -> Result<i32> {
    let service = MirrorService::from_config(config, false)?;
    service.daemon(run_on_startup).await?;
    Ok(0)
}

async fn stats_command(path: PathBuf, json: bool) -> Result<i32> {
    let history = RunHistory::load(&path).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history.statistics())?);
    } else if history.records().is_empty() {
        println!("No runs recorded in {}", path.display());
    } else {
        println!("{}", history.render_markdown());
    }
    Ok(0)
}

fn print_plans(plans: &[BranchPlan]) {
    for plan in plans {
        println!("{} ({}x)", plan.branch, plan.name_prefix);
        if let Some(error) = &plan.error {
            println!("  ❌ {}", error);
            continue;
        }
        println!(
            "  latest mirrored: {}",
            plan.latest_mirrored.as_deref().unwrap_or("none")
        );
        match &plan.backlog {
            Some(backlog) if !backlog.is_empty() => {
                println!("  to publish ({}):", backlog.len());
                for name in backlog.names() {
                    println!("    - {}", name);
                }
            }
            _ => println!("  up to date"),
        }
    }
}

fn print_run_report(report: &RunReport) {
    for branch in &report.branches {
        println!("{} ({}x)", branch.branch, branch.name_prefix);
        if let Some(error) = &branch.error {
            println!("  ❌ {}", error);
            continue;
        }
        if branch.deployments.is_empty() {
            println!("  up to date");
        }
        for deployment in &branch.deployments {
            let marker = match deployment.outcome {
                DeploymentOutcome::Published => "✅",
                DeploymentOutcome::DryRun => "🔍",
                DeploymentOutcome::Failed => "❌",
                DeploymentOutcome::Skipped => "⏭️ ",
            };
            match &deployment.error {
                Some(error) => println!("  {} {} - {}", marker, deployment.release, error),
                None => println!("  {} {}", marker, deployment.release),
            }
        }
    }
    println!(
        "\nPublished {}, failed {} in {}ms",
        report.published(),
        report.failed(),
        report.duration_ms
    );
}
