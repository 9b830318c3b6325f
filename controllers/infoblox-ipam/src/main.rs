//! Infoblox IPAM Controller
//!
//! Cluster API IPAM provider backed by Infoblox:
//! - IPAddressClaim: allocates an address from an InfobloxIPPool and binds it as an IPAddress
//! - InfobloxIPPool: reports readiness and is protected from deletion while in use
//! - InfobloxInstance: validates credentials and default views of an Infoblox grid

mod backoff;
mod config;
mod controller;
mod error;
mod hostname;
mod index;
mod kube_client;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube and reqwest both link rustls; pick the provider explicitly
    let _ = rustls::crypto::ring::default_provider().install_default();

    init_logging();

    info!("Starting Infoblox IPAM Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!(
        "  Watch namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Operator namespace: {}", config.operator_namespace);
    info!("  Watch filter: {}", config.watch_filter.as_deref().unwrap_or("none"));

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
