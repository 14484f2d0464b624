//! valvehost - a worker-pool application hosting server
//!
//! Hosts named applications behind a shared valve pipeline, one fixed-size
//! pool of persistent workers per application.

mod application;
mod config;
mod dispatcher;
mod error;
mod exchange;
mod handlers;
mod pipeline;
mod pool;
mod router;
mod state;
mod valves;
mod worker;

use crate::application::ApplicationRegistry;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::pipeline::Pipeline;
use crate::router::create_router;
use crate::state::AppState;
use crate::valves::{AccessLogValve, EchoValve, ServerHeaderValve};

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "valvehost=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting valvehost...");

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Configuration loaded: {:?}", config);

    // One pipeline instance, shared read-only by every worker
    let pipeline = Pipeline::new(vec![
        Box::new(AccessLogValve),
        Box::new(ServerHeaderValve),
        Box::new(EchoValve),
    ]);
    info!(valves = pipeline.len(), "Pipeline assembled");

    // Create the dispatcher; worker pools are spawned lazily per application
    let dispatcher = Dispatcher::new(pipeline, &config);
    info!(pool_size = config.pool_size, "Dispatcher initialized");

    // Register and connect configured applications
    let registry = ApplicationRegistry::new();
    for name in &config.applications {
        let app = registry.register(name);
        app.set_connected(true);
        info!(app = %name, "Application connected");
    }

    // Create shared app state
    let app_state = Arc::new(AppState {
        dispatcher,
        registry,
        config: config.clone(),
    });

    // Build router
    let app = create_router(app_state);

    // Bind and serve
    let port = config.server_port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind to port");

    info!(port = port, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .expect("Server error");
}
