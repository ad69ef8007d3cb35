//! API Server
//!
//! Serves the REST router until shutdown is requested.

use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::storage::FakeStorage;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

/// REST API server over a manager
pub struct ApiServer {
    config: ApiServerConfig,
    manager: Arc<Manager>,
    simulator: Option<Arc<FakeStorage>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, manager: Arc<Manager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            manager,
            simulator: None,
            shutdown_tx,
        }
    }

    /// Serve the simulator endpoints over an in-memory storage system
    pub fn with_simulator(mut self, storage: Arc<FakeStorage>) -> Self {
        self.simulator = Some(storage);
        self
    }

    /// Serve until [`ApiServer::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        let mut router = RestRouter::new(self.manager.clone());
        if let Some(storage) = &self.simulator {
            router = router.with_simulator(storage.clone());
        }
        let app = router.build();

        let listener = tokio::net::TcpListener::bind(self.config.rest_addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
        info!("REST API listening on {}", self.config.rest_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
