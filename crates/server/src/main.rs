use std::net::SocketAddr;

use server::{api::ApiContext, build_router, config::load_settings, rollout::RolloutSimulator};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let api = ApiContext {
        app_name: settings.app_name,
        app_version: settings.app_version,
        use_k8s: settings.use_k8s,
        rollout: RolloutSimulator::new(settings.rollout_steps, settings.step_interval),
    };
    info!(
        app = %api.app_name,
        version = %api.app_version,
        use_k8s = api.use_k8s,
        steps = ?api.rollout.steps(),
        "rollout simulator ready"
    );

    let app = build_router(api);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
