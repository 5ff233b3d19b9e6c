use std::{io, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use client_core::{
    ReconnectPolicy, RolloutClient, RolloutViewer, ViewerConfig, ViewerOutcome,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod terminal;

use terminal::TerminalSurface;

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Follow a canary rollout from the terminal")]
struct Args {
    #[arg(
        long,
        env = "SKYCANARY_SERVER_URL",
        default_value = "http://127.0.0.1:8090"
    )]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to rollout progress and render it until completion.
    Watch(WatchArgs),
    /// Print the current app, version and traffic split.
    State,
    /// Send an operator message to the rollout service.
    Message { text: String },
}

#[derive(ClapArgs, Debug)]
struct WatchArgs {
    /// Ask the service to start a rollout before subscribing.
    #[arg(long)]
    request_start: bool,
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
    /// Give up on a stream that stays silent this long.
    #[arg(long)]
    idle_timeout_secs: Option<u64>,
    #[arg(long)]
    no_timestamps: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();

    let client = RolloutClient::new(&args.server_url)?;
    match args.command {
        Command::Watch(watch) => run_watch(&client, watch).await,
        Command::State => {
            let snapshot = client.fetch_state().await?;
            println!(
                "{} ({}) k8s={} | {}",
                snapshot.app,
                snapshot.version,
                snapshot.use_k8s,
                snapshot.weights.label()
            );
            Ok(())
        }
        Command::Message { text } => {
            let ack = client.send_message(&text).await?;
            println!("{}: {}", ack.status, ack.message);
            Ok(())
        }
    }
}

async fn run_watch(client: &RolloutClient, watch: WatchArgs) -> Result<()> {
    if watch.request_start {
        let started = client.start_rollout().await?;
        info!(message = %started.message, mode = %started.mode, "rollout requested");
    }

    let config = ViewerConfig {
        reconnect: ReconnectPolicy::default().with_max_retries(watch.max_retries),
        idle_timeout: watch.idle_timeout_secs.map(Duration::from_secs),
    };
    let source = Arc::new(client.progress_source()?);
    info!(server = %client.base_url(), "watching rollout");
    let surface = TerminalSurface::new(io::stdout(), !watch.no_timestamps);
    let mut viewer = RolloutViewer::new(source, surface, config);

    match viewer.on_start_clicked().await {
        ViewerOutcome::Completed { events } => {
            info!(events, "rollout finished");
            Ok(())
        }
        ViewerOutcome::Failed { error, .. } => Err(anyhow!("rollout did not complete: {error}")),
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
