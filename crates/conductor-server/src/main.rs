//! # Conductor Server
//!
//! Main entry point for a Conductor node.
//!
//! The configured role decides which loops run:
//! - **all**: orchestrator and worker in one process
//! - **orchestrator**: scheduler, result reconciler, retry and recovery sweeps
//! - **worker**: task executor pool and heartbeat

use conductor_config::{AppConfig, ConfigLoader};
use conductor_core::telemetry::init_logging;
use conductor_core::{ConductorError, ConductorResult};
use conductor_jobs::{register_metrics, RedisLockStore, RedisWorkQueue};
use conductor_repository::DatabasePoolInterface;
use conductor_server::app::{App, Stores};
use conductor_server::di::{build_module, StoreResolver};
use conductor_server::startup::{print_banner, print_startup_info};
use conductor_server::tasks::{built_in_registry, BUILT_IN_TYPES};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match load_config().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(
        config.observability.log_format,
        &config.observability.default_filter(),
    ) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    print_banner();
    info!("Starting Conductor...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("Application error: {}", e);
        std::process::exit(1);
    }
}

async fn load_config() -> ConductorResult<AppConfig> {
    let loader = ConfigLoader::from_default_location()?;
    Ok(loader.get().await)
}

async fn run(config: AppConfig) -> ConductorResult<()> {
    info!("Environment: {}", config.app.environment);
    register_metrics();
    print_startup_info(&config);

    let registry =
        built_in_registry().map_err(|e| ConductorError::Configuration(e.to_string()))?;
    let missing = registry.audit(BUILT_IN_TYPES);
    if !missing.is_empty() {
        return Err(ConductorError::Configuration(format!(
            "no task implementation for job types: {}",
            missing.join(", ")
        )));
    }

    // Create database pool
    let db_pool = conductor_repository::create_pool(&config.database).await?;
    if config.database.run_migrations {
        db_pool.run_migrations().await?;
    }

    // Build DI module
    let module = build_module(&db_pool);

    // Redis backs both the lock store and the work queue
    let redis = conductor_jobs::create_pool(&config.redis)
        .await
        .map_err(|e| ConductorError::Cache(e.to_string()))?;

    let stores = Stores {
        jobs: module.job_store(),
        locks: Arc::new(RedisLockStore::new(redis.clone())),
        queue: Arc::new(RedisWorkQueue::new(redis, &config.queue)),
    };

    let shutdown = CancellationToken::new();
    let app = tokio::spawn(App::new(config, stores, registry).run(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    app.await
        .map_err(|e| ConductorError::Internal(format!("Node task failed: {e}")))?;
    module.database_pool().close().await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
