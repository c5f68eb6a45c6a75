use employee_module::service::{run_server, ServiceConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env()?;
    info!(
        "starting employee service on {}:{} (slack={}, notion={}, gmail={})",
        config.host,
        config.port,
        config.slack_bot_token.is_some(),
        config.notion_token.is_some(),
        config.gmail_enabled
    );

    run_server(config, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await
}
