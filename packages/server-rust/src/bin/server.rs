//! The tilemud server binary.
//!
//! Parses configuration from flags and environment, connects to the
//! store, wires the engine, and runs the scheduler and the network module
//! until SIGINT/SIGTERM. Shutdown drains sockets and performs a final DB
//! flush so no tracked change is lost.

use std::time::Instant;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tilemud_server::config::ServerConfig;
use tilemud_server::network::{NetworkConfig, NetworkModule};
use tilemud_server::storage::Gateway;
use tilemud_server::Engine;

#[derive(Debug, Parser)]
#[command(name = "tilemud-server", about = "Real-time tile-world server")]
struct Args {
    /// Bind address.
    #[arg(long, env = "TILEMUD_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on (0 = OS-assigned).
    #[arg(long, env = "TILEMUD_PORT", default_value_t = 7380)]
    port: u16,

    /// PostgreSQL connection string.
    #[arg(long, env = "TILEMUD_DATABASE_URL")]
    database_url: String,

    /// Scheduler tick period in milliseconds.
    #[arg(long, env = "TILEMUD_TICK_FREQUENCY_MS", default_value_t = 16)]
    tick_frequency_ms: u64,

    /// Synchronizer period in milliseconds.
    #[arg(long, env = "TILEMUD_SYNC_FREQUENCY_MS", default_value_t = 100)]
    sync_frequency_ms: u64,

    /// DB flush period in milliseconds.
    #[arg(long, env = "TILEMUD_DB_FLUSH_FREQUENCY_MS", default_value_t = 100)]
    db_flush_frequency_ms: u64,

    /// Cache cleanup period in milliseconds.
    #[arg(long, env = "TILEMUD_CACHE_CLEAN_FREQUENCY_MS", default_value_t = 10_000)]
    cache_clean_frequency_ms: u64,

    /// Idle duration after which cache entries expire, in milliseconds.
    #[arg(long, env = "TILEMUD_CACHE_DEFAULT_DURATION_MS", default_value_t = 60_000)]
    cache_default_duration_ms: u64,

    /// Subzone width in tiles.
    #[arg(long, env = "TILEMUD_SUBZONE_SIZE_X", default_value_t = 16)]
    subzone_size_x: i32,

    /// Subzone height in tiles.
    #[arg(long, env = "TILEMUD_SUBZONE_SIZE_Y", default_value_t = 32)]
    subzone_size_y: i32,

    /// Tiles per walking step.
    #[arg(long, env = "TILEMUD_MOVEMENT_WALK_SPEED", default_value_t = 1)]
    movement_walk_speed: i32,

    /// Tiles per running step.
    #[arg(long, env = "TILEMUD_MOVEMENT_RUN_SPEED", default_value_t = 2)]
    movement_run_speed: i32,

    /// Maximum pooled database connections.
    #[arg(long, env = "TILEMUD_DATABASE_MAX_CONNECTIONS", default_value_t = 8)]
    database_max_connections: u32,

    /// Locale identifier for the client-side translation layer.
    #[arg(long, env = "TILEMUD_LOCALE", default_value = "en")]
    locale: String,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            tick_frequency_ms: self.tick_frequency_ms,
            sync_frequency_ms: self.sync_frequency_ms,
            db_flush_frequency_ms: self.db_flush_frequency_ms,
            cache_clean_frequency_ms: self.cache_clean_frequency_ms,
            cache_default_duration_ms: self.cache_default_duration_ms,
            subzone_size_x: self.subzone_size_x,
            subzone_size_y: self.subzone_size_y,
            movement_walk_speed: self.movement_walk_speed,
            movement_run_speed: self.movement_run_speed,
            database_url: self.database_url,
            database_max_connections: self.database_max_connections,
            locale: self.locale,
            network: NetworkConfig {
                host: self.host,
                port: self.port,
                ..NetworkConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Args::parse().into_config();
    let started = Instant::now();

    let gateway = Gateway::connect(&config.database_url, config.database_max_connections).await?;
    let engine = Engine::new(config, gateway)?;

    let mut network = NetworkModule::new(engine.clone());
    let port = network.start().await?;
    let shutdown = network.shutdown_controller();

    // The scheduler runs until the shutdown signal fires; in-flight tasks
    // finish, future ticks are suppressed.
    let scheduler_engine = engine.clone();
    let mut scheduler_shutdown = shutdown.shutdown_receiver();
    let scheduler_task = tokio::spawn(async move {
        scheduler_engine
            .scheduler
            .run(async move {
                let _ = scheduler_shutdown.changed().await;
            })
            .await;
    });

    info!(port, startup_ms = started.elapsed().as_millis() as u64, "tilemud server up");

    let signal_shutdown = shutdown.clone();
    network
        .serve(async move {
            wait_for_signal().await;
            signal_shutdown.trigger_shutdown();
        })
        .await?;

    let _ = scheduler_task.await;

    // Final flush: nothing tracked may be lost on the way down.
    if let Err(err) = engine.world.flush().await {
        error!(error = %err, "final flush failed");
    }
    info!("tilemud server stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
