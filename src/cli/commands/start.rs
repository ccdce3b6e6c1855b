//! Start command implementation.

use crate::core::config::Config;
use crate::fabric::memory::MemoryCacheFactory;
use crate::fabric::{CacheFactory, ScopeRegistry};
use crate::proxy::service::NamedCacheService;
use crate::serializer::SerializerRegistry;
use crate::transport::grpc::CacheGrpcServer;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Start the GridGate server.
#[derive(Args, Debug)]
pub struct StartArgs {
    // No additional arguments - config is handled globally
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Run the start command with the given config path.
pub async fn run_start_with_config(config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {config_path:?}"))?;
    init_tracing(&config.telemetry.log_level);

    let bind_addr = config
        .listener
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", config.listener.bind))?;

    let factory: Arc<dyn CacheFactory> = Arc::new(MemoryCacheFactory::new(
        config.fabric.partitions,
        config.fabric.members,
    ));
    let scopes = Arc::new(ScopeRegistry::new(factory));
    let serializers = Arc::new(SerializerRegistry::new());
    let service = Arc::new(NamedCacheService::new(scopes, serializers, &config.proxy));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let server = CacheGrpcServer::new(
        bind_addr,
        service,
        config.listener.max_message_size,
        shutdown_rx,
    );
    server.run().await
}
