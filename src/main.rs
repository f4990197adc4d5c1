use std::process;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::TcpListener;
use trusty_poll::config::Config;
use trusty_poll::db::Database;
use trusty_poll::engine::PollEngine;
use trusty_poll::handlers::{self, AppState};
use trusty_poll::tasks;

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let database = match Database::new(
        &config.database_url,
        config.max_connections,
        config.lock_timeout,
    )
    .await
    {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            process::exit(1);
        }
    };

    let engine = Arc::new(PollEngine::new(database.clone(), config.lock_timeout));

    if config.admin_code.is_none() {
        warn!("ADMIN_CODE is not set; anyone can create and delete polls.");
    }

    if let Some(every) = config.audit_interval {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            tasks::auditor::check_poll_integrity_task(engine, every).await;
        });
    }

    let app = handlers::router(AppState::new(engine, config.admin_code.clone()));

    let listener = match TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            process::exit(1);
        }
    };
    info!("Listening on {}", config.bind_addr);

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!("Server error: {:?}", e);
    }

    database.close().await;
    info!("Shut down cleanly.");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, finishing in-flight requests...");
}
