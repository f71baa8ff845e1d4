mod config;
mod events_cmd;
mod serve_cmd;
mod status_cmd;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use forgewright_core::config::EngineConfig;
use forgewright_core::events::TokioBroadcastBus;
use forgewright_core::generator::SubprocessGenerator;
use forgewright_core::isolation;
use forgewright_core::vcs::GitHubVcs;
use forgewright_core::verify::HttpVerifier;
use forgewright_core::{cascade, engine, state::dispatch};
use forgewright_db::pool;

use config::GatorConfig;

#[derive(Parser)]
#[command(name = "forgewright", about = "LLM coding agent fleet orchestrator")]
struct Cli {
    /// Database URL (overrides FORGEWRIGHT_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a forgewright config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/forgewright")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the forgewright database (requires config file or env vars)
    DbInit,
    /// Show session progress (requires --project, or pass a design session directly via `events`)
    Status {
        /// Project ID to show sessions for
        #[arg(long)]
        project: String,
    },
    /// Show a ticket's event log
    Events {
        /// Ticket ID to show events for
        ticket_id: String,
    },
    /// Activate every ticket in a design session: dependency-free tickets
    /// go straight to `ready`, the rest start `blocked` until the cascade
    /// promotes them.
    Activate {
        /// Design session ID to activate
        session_id: String,
    },
    /// Run the orchestrator engine (dispatcher, heartbeat, reaper, sentinel)
    /// until interrupted. Blocks on Ctrl-C.
    Run {
        /// Stable identifier for this replica, stored on claimed tickets.
        /// Defaults to `<hostname>-<pid>`.
        #[arg(long)]
        worker_id: Option<String>,
        /// Path to the git repository tickets should be worked in.
        #[arg(long)]
        repo_path: String,
        /// Isolation backend: "worktree" or "container"
        #[arg(long, default_value = "worktree")]
        isolation: String,
        /// Command to invoke for ticket generation (JSON request on stdin,
        /// JSON response on stdout).
        #[arg(long)]
        generator_command: String,
        /// Arguments passed to the generator command.
        #[arg(long)]
        generator_arg: Vec<String>,
        /// HTTP endpoint for the verification service.
        #[arg(long)]
        verifier_url: String,
        /// Path to a file holding the GitHub token used to open/merge PRs.
        #[arg(long)]
        vcs_token_path: String,
    },
    /// Cancel a ticket from whichever cancellable state it currently holds.
    Cancel {
        /// Ticket ID to cancel
        ticket_id: String,
        /// Reason recorded on the cancellation event
        #[arg(long)]
        reason: Option<String>,
    },
    /// Retry a needs-review ticket for another attempt
    Retry {
        /// Ticket ID to retry
        ticket_id: String,
        /// Worker ID to attribute the retry to
        #[arg(long, default_value = "operator")]
        worker_id: String,
    },
    /// Serve the dashboard HTTP API
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

/// Execute the `forgewright init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `forgewright db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `forgewright db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = GatorConfig::resolve(cli_db_url)?;

    println!("Initializing forgewright database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("forgewright db-init complete.");
    Ok(())
}

fn default_worker_id() -> String {
    let host = hostname_or_unknown();
    format!("{host}-{}", std::process::id())
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "forgewright".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Status { project } => {
            let resolved = GatorConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, Some(project.as_str())).await;
            db_pool.close().await;
            result?;
        }
        Commands::Events { ticket_id } => {
            let resolved = GatorConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = events_cmd::run_events(&db_pool, &ticket_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Activate { session_id } => {
            let resolved = GatorConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = Uuid::parse_str(&session_id)
                .with_context(|| format!("invalid design session ID: {session_id}"))?;
            let events = TokioBroadcastBus::new(256);
            let result = cascade::activate_session_tickets(&db_pool, &events, id).await;
            db_pool.close().await;
            result?;
            println!("Session {session_id} activated.");
        }
        Commands::Cancel { ticket_id, reason } => {
            let resolved = GatorConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = Uuid::parse_str(&ticket_id)
                .with_context(|| format!("invalid ticket ID: {ticket_id}"))?;
            let payload = serde_json::json!({ "reason": reason.unwrap_or_else(|| "operator cancelled".to_string()) });
            let result = dispatch::cancel_ticket(&db_pool, id, payload).await;
            db_pool.close().await;
            result?;
            println!("Ticket {ticket_id} cancelled.");
        }
        Commands::Retry {
            ticket_id,
            worker_id,
        } => {
            let resolved = GatorConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = Uuid::parse_str(&ticket_id)
                .with_context(|| format!("invalid ticket ID: {ticket_id}"))?;
            let result = dispatch::operator_retry(&db_pool, id, &worker_id).await;
            db_pool.close().await;
            result?;
            println!("Ticket {ticket_id} reset to in_progress for retry.");
        }
        Commands::Serve { bind, port } => {
            let resolved = GatorConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = serve_cmd::run_serve(db_pool.clone(), &bind, port).await;
            db_pool.close().await;
            result?;
        }
        Commands::Run {
            worker_id,
            repo_path,
            isolation: isolation_mode,
            generator_command,
            generator_arg,
            verifier_url,
            vcs_token_path,
        } => {
            let resolved = GatorConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;

            let vcs_token = std::fs::read_to_string(&vcs_token_path)
                .with_context(|| format!("failed to read VCS token from {vcs_token_path}"))?
                .trim()
                .to_string();

            let repo = std::path::Path::new(&repo_path);
            let deps = engine::EngineDeps {
                pool: db_pool.clone(),
                isolation: isolation::create_isolation(&isolation_mode, repo)?,
                generator: std::sync::Arc::new(SubprocessGenerator::new(
                    "default",
                    generator_command,
                    generator_arg,
                )),
                verifier: std::sync::Arc::new(HttpVerifier::new("default", verifier_url)),
                vcs: std::sync::Arc::new(GitHubVcs::new(vcs_token)),
                events: std::sync::Arc::new(TokioBroadcastBus::new(256)),
            };

            let worker_id = worker_id.unwrap_or_else(default_worker_id);
            let config = EngineConfig::from_env();
            let handle = engine::start(config, worker_id, deps);

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            println!("shutting down...");
            handle.stop().await;

            db_pool.close().await;
        }
    }

    Ok(())
}
