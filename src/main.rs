//! chatwarden binary: run the bot engine over the local transport, or scan
//! the credential store without connecting.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use chatwarden::auth::{CorruptionGuard, CredentialStore};
use chatwarden::config::Config;
use chatwarden::contact::ContactResolver;
use chatwarden::dispatch::Dispatcher;
use chatwarden::repl::LocalConnector;
use chatwarden::stats::Stats;
use chatwarden::supervisor::Supervisor;
use chatwarden::task::{OllamaExecutor, TaskRunner};

#[derive(Parser, Debug)]
#[command(name = "chatwarden", version, about = "Resilient chat-bot runtime")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bot over the local stdin/stdout transport (default).
    Run,
    /// Scan the credential store for corrupt records and exit.
    Scan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatwarden=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::resolve().context("failed to resolve configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Scan => scan(config),
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store = CredentialStore::open(&config.session.dir)
        .with_context(|| format!("failed to open session store at {}", config.session.dir.display()))?;
    let guard = CorruptionGuard::new(config.limits.bad_mac_window, config.limits.bad_mac_threshold);

    let runner = Arc::new(OllamaExecutor::new(
        config.ai.model.clone(),
        config.ai.timeout,
    ));
    if runner.check_model().await {
        tracing::info!(model = %config.ai.model, "AI model is available");
    } else {
        tracing::warn!(model = %config.ai.model,
            "AI model not found; the ai command will fail until it is pulled");
    }

    let stats = Arc::new(Stats::new());
    let rate = Arc::new(chatwarden::rate::RateGuard::new(
        config.limits.rate_ceiling,
        config.limits.rate_window,
        config.limits.cooldown,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        runner,
        rate,
        Arc::clone(&stats),
        config.commands.prefix,
        config.commands.admin_id.clone(),
        config.commands.vcard_path.clone(),
        config.ai.model.clone(),
        config.ai.timeout,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let supervisor = Supervisor::new(
        Arc::new(LocalConnector),
        store,
        guard,
        dispatcher,
        Arc::new(ContactResolver::new()),
        stats,
        config.reconnect,
    );
    supervisor
        .run(shutdown_rx)
        .await
        .context("bot engine stopped")?;
    Ok(())
}

fn scan(config: Config) -> anyhow::Result<()> {
    let store = CredentialStore::open(&config.session.dir)
        .with_context(|| format!("failed to open session store at {}", config.session.dir.display()))?;
    let guard = CorruptionGuard::new(config.limits.bad_mac_window, config.limits.bad_mac_threshold);

    let report = guard.scan(&store);
    println!(
        "Scanned {} record(s) in {}",
        report.scanned,
        store.dir().display()
    );
    if report.deleted.is_empty() {
        println!("No corrupt records found.");
    } else {
        for (name, kind) in &report.deleted {
            println!("Deleted {name}: {kind:?}");
        }
    }
    Ok(())
}
