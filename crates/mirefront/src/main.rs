//! miremud telnet front end.
//!
//! Accepts telnet clients, runs authentication and character selection, and
//! bridges each in-world session to the game shard over a frame stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::info;

mod acceptor;
mod auth;
mod bridge;
mod characters;
mod commands;
mod config;
mod dispatch;
mod idle;
mod render;
mod stores;

use acceptor::{Acceptor, AcceptorConfig};
use auth::AuthHandler;
use bridge::Bridge;
use commands::Registry;
use dispatch::dispatch_table;
use idle::IdleConfig;
use render::PlainRenderer;
use stores::MemoryStores;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let cfg = config::parse_args();
    let stores = Arc::new(MemoryStores::load(cfg.store_path.clone()));
    let registry = Arc::new(Registry::builtin()?);

    let handler = Arc::new(AuthHandler::<TcpStream> {
        accounts: stores.clone(),
        characters: stores,
        classes: characters::default_classes(),
        bridge: Bridge {
            shard_addr: cfg.shard_addr,
            registry,
            table: dispatch_table(),
            renderer: Arc::new(PlainRenderer),
            idle_cfg: IdleConfig {
                idle_timeout: cfg.idle_timeout,
                grace_period: cfg.idle_grace,
                tick_interval: Duration::from_secs(30),
            },
        },
    });

    let acceptor = Arc::new(Acceptor::new(
        AcceptorConfig {
            bind: cfg.bind,
            read_timeout: cfg.read_timeout,
            write_timeout: cfg.write_timeout,
        },
        handler,
    ));

    info!(bind = %cfg.bind, shard = %cfg.shard_addr, "front end starting");

    let runner = {
        let a = Arc::clone(&acceptor);
        tokio::spawn(async move { a.run().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    acceptor.stop().await;
    runner.await??;
    Ok(())
}
