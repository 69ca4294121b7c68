//! # pagewise CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pagewise init` | Create the SQLite database and run schema migrations |
//! | `pagewise serve` | Run the consumer, readiness poller and HTTP server |
//! | `pagewise enqueue <url>` | Queue a URL for processing |
//! | `pagewise stats` | Show queue length and task counts |
//! | `pagewise chat <uuid> <message>` | Ask about a processed page |
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pagewise::app::Services;
use pagewise::config::load_config;
use pagewise::conversation::PersistOutcome;
use pagewise::producer::enqueue_url;
use pagewise::server::run_server;
use pagewise::stats::{collect_stats, print_stats};

/// pagewise: summarize web pages and chat about them.
#[derive(Parser)]
#[command(name = "pagewise", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pagewise.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run the task consumer, readiness poller and HTTP server until Ctrl-C.
    Serve,

    /// Queue a URL for processing.
    ///
    /// A URL that already has a task is not queued again; its existing task
    /// id is printed instead.
    Enqueue {
        url: String,
    },

    /// Show queue length and task counts.
    Stats,

    /// Ask a question about a processed page.
    Chat {
        /// Task id returned by `enqueue`.
        uuid: String,
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = pagewise::db::connect(&config).await?;
            pagewise::migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", config.db.path.display());
        }
        Commands::Serve => {
            let services = Services::open(&config).await?;
            serve(&config.server.bind, services).await?;
        }
        Commands::Enqueue { url } => {
            pagewise::scrape::validate_url(&url)?;
            let services = Services::open(&config).await?;
            let enqueued =
                enqueue_url(services.store.as_ref(), services.queue.as_ref(), &url).await?;
            if enqueued.created {
                println!("queued {} as {}", url, enqueued.task_id);
            } else {
                println!(
                    "{} already has task {} ({})",
                    url, enqueued.task_id, enqueued.status
                );
            }
        }
        Commands::Stats => {
            let services = Services::open(&config).await?;
            let stats = collect_stats(services.store.as_ref(), services.queue.as_ref()).await?;
            print_stats(&stats);
        }
        Commands::Chat { uuid, message } => {
            let services = Services::open(&config).await?;
            services.conversations.rehydrate(&uuid).await;
            let reply = services.conversations.chat(&uuid, &message).await?;
            println!("{}", reply.answer);
            if let outcome @ PersistOutcome::Failed(_) = reply.persistence.confirm().await {
                warn!(task_id = %uuid, outcome = %outcome, "chat history not saved");
                eprintln!("warning: {}", outcome);
            }
        }
    }

    Ok(())
}

async fn serve(bind: &str, services: Services) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = {
        let consumer = services.consumer.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { consumer.run(rx).await })
    };
    let poller = {
        let readiness = services.readiness.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { readiness.run(rx).await })
    };
    let mut server = {
        let state = services.app_state();
        let bind = bind.to_string();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { run_server(&bind, state, rx).await })
    };

    // The server exiting early (e.g. bind failure) also stops the workers.
    let early_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutting down");
            None
        }
        result = &mut server => Some(result),
    };
    let _ = shutdown_tx.send(true);

    if let Err(e) = consumer.await? {
        error!(error = %format!("{:#}", e), "consumer exited with error");
    }
    poller.await?;
    match early_exit {
        Some(result) => result??,
        None => server.await??,
    }
    Ok(())
}
