use tokio_util::sync::CancellationToken;

use bookforge::api;
use bookforge::config::AppConfig;
use bookforge::logging;
use bookforge::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let _log_guard = match std::env::var("LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            Some(logging::init_with_file(std::path::Path::new(&dir)))
        }
        _ => {
            logging::init();
            None
        }
    };

    let config = AppConfig::from_env();
    tracing::info!(
        "Starting bookforge on {}:{}",
        config.server.bind_address,
        config.server.port
    );

    let container = ServiceContainer::new(config.clone()).await?;
    container.start();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    api::serve(container.app_state(), config.server.clone(), shutdown).await?;

    container.shutdown().await;
    Ok(())
}
