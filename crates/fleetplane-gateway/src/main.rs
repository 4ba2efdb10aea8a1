//! Fleetplane Gateway - HTTP API for the control plane
//!
//! This is the main entry point for the gateway service. The control plane
//! runs embedded in the same process.
//!
//! # Storage
//!
//! Set `DATA_DIR` to persist state in RocksDB. Without it everything lives
//! in memory and is lost on restart.
//!
//! # Provider Integration
//!
//! Set `PROVIDER_URL` to provision real instances through the provisioning
//! service. If not set, a no-op provider only simulates instances.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetplane_control::{
    ControlConfig, ControlPlane, ControlPlaneService, HttpProviderClient, NoopProvider,
    ProviderClient,
};
use fleetplane_gateway::{create_router, GatewayConfig, GatewayState};
use fleetplane_store::{MemoryStore, RocksStore, Store};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetplane=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fleetplane Gateway");

    // Load configuration from environment
    let data_dir = std::env::var("DATA_DIR").ok();
    let provider_url = std::env::var("PROVIDER_URL").ok();

    let mut control_config = ControlConfig::default();
    if let Some(timeout) = env_seconds("WATCH_TIMEOUT_SECONDS")? {
        control_config.watch_timeout = timeout;
    }
    if let Some(retention) = env_seconds("TERMINATED_RETENTION_SECONDS")? {
        control_config.terminated_retention = retention;
    }

    let mut gateway_config = GatewayConfig {
        listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
        ..GatewayConfig::default()
    };
    // Long polls must finish before the request timeout cuts them off
    let watch_secs = control_config.watch_timeout.as_secs();
    if gateway_config.request_timeout_seconds <= watch_secs {
        gateway_config.request_timeout_seconds = watch_secs + 30;
    }

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        data_dir = ?data_dir,
        provider_url = ?provider_url,
        watch_timeout_secs = control_config.watch_timeout.as_secs(),
        "Gateway configuration loaded"
    );

    let provider: Arc<dyn ProviderClient> = if let Some(url) = provider_url {
        tracing::info!(provider_url = %url, "Provider integration enabled");
        Arc::new(HttpProviderClient::new(url)?)
    } else {
        tracing::warn!("No PROVIDER_URL set - instances will only be simulated");
        Arc::new(NoopProvider::new())
    };

    if let Some(path) = data_dir {
        tracing::info!(path = %path, "Opening RocksDB store");
        let store = Arc::new(RocksStore::open(&path)?);
        serve(store, provider, control_config, gateway_config).await
    } else {
        tracing::warn!("No DATA_DIR set - state is kept in memory only");
        let store = Arc::new(MemoryStore::new());
        serve(store, provider, control_config, gateway_config).await
    }
}

async fn serve<S>(
    store: Arc<S>,
    provider: Arc<dyn ProviderClient>,
    control_config: ControlConfig,
    gateway_config: GatewayConfig,
) -> Result<(), BoxError>
where
    S: Store + 'static,
{
    let purge_interval = control_config.purge_interval;
    let control = Arc::new(ControlPlaneService::new(store, provider, control_config));
    let recovered = control.recover_drains().await?;
    tracing::info!(recovered_drains = recovered, "Control plane initialized");

    // Periodically remove terminated servers past retention
    let purger = Arc::clone(&control);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_interval);
        loop {
            interval.tick().await;
            match purger.purge_terminated().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged terminated servers"),
                Err(e) => tracing::error!(error = %e, "Failed to purge terminated servers"),
            }
        }
    });

    let listen_addr = gateway_config.listen_addr.clone();
    let state = GatewayState::new(control, gateway_config);
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Read a whole number of seconds from the environment.
fn env_seconds(name: &str) -> Result<Option<Duration>, BoxError> {
    match std::env::var(name) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .map_err(|e| format!("{name} must be a whole number of seconds: {e}"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}
