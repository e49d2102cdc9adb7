use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use querygate::config::Config;
use querygate::engine::DataFusionEngine;
use querygate::mysql::MysqlServer;
use querygate::query::{Handler, SessionManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "querygate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting querygate");

    let config = Config::load()?;
    info!("Configuration loaded: {:?}", config);

    let engine = DataFusionEngine::new();
    if let Some(data_dir) = &config.data_dir {
        match engine.register_csv_dir(data_dir).await {
            Ok(count) => info!("Registered {} CSV tables from {}", count, data_dir),
            Err(e) => error!("Failed to register CSV tables from {}: {}", data_dir, e),
        }
    }

    let handler = Handler::new(Arc::new(engine), Arc::new(SessionManager::new()))
        .with_batch_size(config.rows_batch_size);
    let server = MysqlServer::new(&config, Arc::new(handler));

    let mysql_handle = tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            error!("MySQL server error: {}", e);
        }
    });

    info!("Connect with: mysql -h 127.0.0.1 -P {} -u root", config.mysql_port);

    tokio::select! {
        _ = mysql_handle => {
            error!("MySQL server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down querygate");
    Ok(())
}
