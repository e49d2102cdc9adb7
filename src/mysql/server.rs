use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::query::Handler;
use super::connection::MysqlConnection;

pub struct MysqlServer {
    listen_addr: String,
    server_version: String,
    connection_id_counter: Arc<AtomicU32>,
    handler: Arc<Handler>,
}

impl MysqlServer {
    pub fn new(config: &Config, handler: Arc<Handler>) -> Self {
        Self {
            listen_addr: config.listen_addr(),
            server_version: config.server_version.clone(),
            connection_id_counter: Arc::new(AtomicU32::new(1)),
            handler,
        }
    }

    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!("MySQL server listening on {}", self.listen_addr);

        self.serve_with_listener(listener).await
    }

    /// Accepts connections from an already bound listener until it fails.
    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let connection_id = self.connection_id_counter.fetch_add(1, Ordering::SeqCst);
                    let handler = self.handler.clone();
                    let server_version = self.server_version.clone();

                    info!("Accepted connection from {}, ID: {}", addr, connection_id);

                    tokio::spawn(async move {
                        let _ = stream.set_nodelay(true);
                        let conn = MysqlConnection::new(stream, connection_id, handler, server_version);

                        if let Err(e) = conn.handle().await {
                            error!("Connection {} error: {}", connection_id, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
