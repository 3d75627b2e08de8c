//! Server setup and lifecycle management

use crate::api::rest::{create_router, AppState};
use crate::config::{DaemonConfig, DirectoryConfig, GatewayConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::Scheduler;
use coffer_adapters::{
    HttpIdentityDirectory, HttpSettlementGateway, StaticIdentityDirectory,
    StaticSettlementGateway,
};
use coffer_core::{
    CofferEngine, CofferStorage, EngineConfig, IdentityDirectory, InMemoryCofferStorage,
    ReconcilerConfig, SettlementGateway,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Coffer daemon server
pub struct Server {
    config: DaemonConfig,
    engine: CofferEngine,
    scheduler: Arc<Scheduler>,
}

impl Server {
    /// Create a new server with the given configuration
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let storage = build_storage(&config.storage).await?;
        let gateway = build_gateway(&config.gateway)?;
        let directory = build_directory(&config.directory)?;

        let engine_config = EngineConfig {
            reconciler: ReconcilerConfig {
                gateway_timeout: Duration::from_millis(config.gateway.timeout_ms),
                max_concurrent_workspaces: config.scheduler.max_concurrent_workspaces,
                recent_window: Duration::from_secs(config.scheduler.recent_invoice_window_secs),
            },
            registry: None,
        };
        let engine = CofferEngine::new(storage, gateway, directory, engine_config);
        let scheduler = Scheduler::new(config.scheduler.clone(), engine.reconciler().clone());

        Ok(Self {
            config,
            engine,
            scheduler,
        })
    }

    pub fn engine(&self) -> &CofferEngine {
        &self.engine
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(self.engine.clone(), self.scheduler.clone());
        let app = create_router(state, self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Coffer daemon listening on {}", addr);
        tracing::info!(
            storage = self.engine.storage().backend_label(),
            "Storage backend ready"
        );

        let scheduler = self.scheduler.clone();
        let scheduler_handle = tokio::spawn(async move {
            scheduler.start().await;
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Coffer daemon shutting down");

        // let an in-flight tick finish
        self.scheduler.stop();
        if let Err(e) = scheduler_handle.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }

        Ok(())
    }
}

async fn build_storage(config: &StorageConfig) -> DaemonResult<Arc<dyn CofferStorage>> {
    match config {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; ledger state is lost on restart");
            Ok(Arc::new(InMemoryCofferStorage::new()))
        }
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let storage = coffer_core::PostgresCofferStorage::connect_with_options(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await
            .map_err(|e| DaemonError::Storage(e.to_string()))?;
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => Err(DaemonError::Config(
            "postgres storage requires the `postgres` feature".to_string(),
        )),
    }
}

fn build_gateway(config: &GatewayConfig) -> DaemonResult<Arc<dyn SettlementGateway>> {
    match &config.base_url {
        Some(base_url) => {
            let gateway = HttpSettlementGateway::new(
                base_url.clone(),
                Duration::from_millis(config.timeout_ms),
                config.api_token.clone(),
            )
            .map_err(|e| DaemonError::Config(e.to_string()))?;
            Ok(Arc::new(gateway))
        }
        None => {
            tracing::warn!("No settlement gateway configured; invoices will stay pending");
            Ok(Arc::new(StaticSettlementGateway::new()))
        }
    }
}

fn build_directory(config: &DirectoryConfig) -> DaemonResult<Arc<dyn IdentityDirectory>> {
    match &config.base_url {
        Some(base_url) => {
            let directory = HttpIdentityDirectory::new(
                base_url.clone(),
                Duration::from_millis(config.timeout_ms),
            )
            .map_err(|e| DaemonError::Config(e.to_string()))?;
            Ok(Arc::new(directory))
        }
        None => {
            tracing::warn!("No identity directory configured; new members cannot be resolved");
            Ok(Arc::new(StaticIdentityDirectory::new()))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
