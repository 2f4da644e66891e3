use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobhunt_core::{Posting, UserSkillSet};
use jobhunt_storage::{JobStore, MemoryJobStore, PgJobStore};
use jobhunt_sync::{build_pipeline, load_enricher, maybe_build_scheduler, run_and_log, SyncConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jobhunt-cli")]
#[command(about = "Job ingestion and scoring pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every configured source once.
    Sync {
        /// Keep results in memory instead of Postgres.
        #[arg(long)]
        memory: bool,
    },
    /// Run on the cron schedule until interrupted.
    Daemon {
        #[arg(long)]
        memory: bool,
    },
    /// Apply database migrations.
    Migrate,
    /// Classify and score a job description.
    Classify {
        text: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        company: String,
        /// Comma-separated skills to score against; built-in defaults otherwise.
        #[arg(long, value_delimiter = ',')]
        skills: Vec<String>,
    },
    /// Compare a job description against your skills.
    Analyze {
        text: String,
        #[arg(long, value_delimiter = ',')]
        skills: Vec<String>,
    },
}

fn skill_set(skills: Vec<String>) -> UserSkillSet {
    let set = UserSkillSet::new("cli", skills);
    if set.is_empty() {
        UserSkillSet::builtin_default()
    } else {
        set
    }
}

async fn open_store(config: &SyncConfig, memory: bool) -> Result<Arc<dyn JobStore>> {
    if memory {
        tracing::info!("using in-memory job store");
        return Ok(Arc::new(MemoryJobStore::new()));
    }
    let store = PgJobStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync { memory: false }) {
        Commands::Sync { memory } => {
            let store = open_store(&config, memory).await?;
            let pipeline = build_pipeline(&config, store)?;
            match pipeline.run_all_sources().await {
                Ok(summary) => println!(
                    "sync complete: run_id={} persisted={} failed_writes={} elapsed_ms={}",
                    summary.run_id,
                    summary.totals.persisted(),
                    summary.totals.failed_writes,
                    summary.elapsed_ms
                ),
                Err(err) => {
                    let summary = err.summary();
                    println!(
                        "sync finished with errors: run_id={} persisted={} failed_writes={}",
                        summary.run_id,
                        summary.totals.persisted(),
                        summary.totals.failed_writes
                    );
                    return Err(err.into());
                }
            }
        }
        Commands::Daemon { memory } => {
            let store = open_store(&config, memory).await?;
            let pipeline = Arc::new(build_pipeline(&config, store)?);
            match maybe_build_scheduler(pipeline.clone(), &config).await? {
                Some(mut sched) => {
                    sched.start().await.context("starting scheduler")?;
                    tracing::info!(cron = %config.sync_cron, "scheduler running; press ctrl-c to stop");
                    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                    sched.shutdown().await.context("stopping scheduler")?;
                }
                None => {
                    tracing::warn!("scheduler disabled; running a single pass");
                    run_and_log(&pipeline, "manual").await;
                }
            }
        }
        Commands::Migrate => {
            let store = PgJobStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Classify {
            text,
            title,
            company,
            skills,
        } => {
            let enricher = load_enricher(&config)?;
            let skills = skill_set(skills);
            let posting = Posting::new(title, company, "cli").with_description(text);
            let breakdown = enricher.scorer().breakdown(&posting, &skills);
            let job = enricher.enrich(posting, &skills);
            let out = serde_json::json!({
                "skills": job.skills,
                "tech_stack": job.tech_stack,
                "salary_range": job.salary_range,
                "experience": job.experience,
                "score": job.score,
                "breakdown": breakdown,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Analyze { text, skills } => {
            let enricher = load_enricher(&config)?;
            let gap = enricher.analyze_gap(&text, &skill_set(skills));
            println!("{}", serde_json::to_string_pretty(&gap)?);
        }
    }

    Ok(())
}
