use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use crate::db::prelude::*;
use crate::github::api::GithubApi;
use crate::github::classroom::GhCli;
use crate::sync::Orchestrator;
use crate::sync::config::{ConfigErr, Overrides, SyncConfig};
use crate::util::env::Env;
use crate::util::telemetry::Telemetry;

mod constants;
mod db;
mod github;
mod sync;
mod util;

#[derive(Debug, Parser)]
#[command(name = "classroom-sync")]
#[command(about = "Sync GitHub Classroom grades and CI attempts into Postgres", long_about = None)]
struct Cli {
    /// Classroom name, overriding CLASSROOM_NAME
    #[arg(long)]
    classroom: Option<String>,

    /// Sync a single assignment by its classroom id
    #[arg(long)]
    assignment_id: Option<String>,

    /// Username to trace through the run
    #[arg(long)]
    track: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    /// Read variables from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    #[arg(long)]
    json_logs: bool,

    /// Run against an in-memory store and print the leaderboard
    #[arg(long)]
    dry_run: bool,

    /// Apply schema migrations before syncing
    #[arg(long)]
    migrate: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            classroom: self.classroom.clone(),
            assignment_id: self.assignment_id.clone(),
            track: self.track.clone(),
            log_level: self.log_level.clone(),
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let telemetry = config
        .otel_endpoint
        .as_deref()
        .and_then(|url| match Telemetry::new(url) {
            Ok(telemetry) => Some(telemetry),
            Err(e) => {
                eprintln!("telemetry disabled: {e}");
                None
            }
        });
    util::tracing::init_subscriber(&config.log_level, cli.json_logs, telemetry.as_ref());

    tracing::info!(
        classroom = %config.classroom_name,
        dry_run = config.dry_run,
        assignment_id = ?config.assignment_id,
        "starting classroom sync"
    );

    let code = match run(&cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "classroom sync failed");
            eprintln!("classroom sync failed: {e:#}");
            ExitCode::FAILURE
        }
    };

    if let Some(telemetry) = telemetry {
        telemetry.shutdown();
    }

    code
}

fn load_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let env = Env::load(cli.env_file.as_deref()).context("failed to read environment")?;
    Ok(SyncConfig::from_env(env, cli.overrides())?)
}

async fn run(cli: &Cli, config: &SyncConfig) -> anyhow::Result<()> {
    let classroom = GhCli::new(config.timeout);
    let api = GithubApi::new(&config.github_token, config.timeout, config.max_retries)
        .context("failed to build GitHub client")?;

    if config.dry_run {
        if cli.migrate {
            tracing::warn!("--migrate has no effect on a dry run");
        }

        let store = MemoryStore::new();
        let summary = Orchestrator::new(config, &classroom, &api, &store)
            .run()
            .await?;

        println!("{summary}");
        print_leaderboard(&store.leaderboard().await?);
        return Ok(());
    }

    let database_url = config
        .database_url
        .as_deref()
        .ok_or(ConfigErr::Missing("DATABASE_URL"))?;
    let pool = db::db_pool(database_url)
        .await
        .context("failed to connect to Postgres")?;

    if cli.migrate {
        db::migrate(pool).await.context("failed to apply migrations")?;
        tracing::info!("schema migrations applied");
    }

    let store = PgStore::new(pool);
    let summary = Orchestrator::new(config, &classroom, &api, &store)
        .run()
        .await?;

    println!("{summary}");
    Ok(())
}

fn print_leaderboard(entries: &[LeaderboardEntry]) {
    println!(
        "{:>4}  {:<24} {:>6} {:>8} {:>4} {:>5} {:>6}",
        "rank", "username", "score", "possible", "pct", "done", "hours"
    );

    for e in entries {
        let hours = e
            .resolution_time_hours
            .map(|h| h.to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:>4}  {:<24} {:>6} {:>8} {:>3}% {:>5} {:>6}",
            e.ranking_position,
            e.github_username,
            e.total_score,
            e.total_possible,
            e.percentage,
            e.assignments_completed,
            hours
        );
    }
}
