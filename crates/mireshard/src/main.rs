//! miremud game shard.
//!
//! Owns the room graph and all live player state; serves session streams
//! for the telnet front end.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::TcpListener;
use tracing::info;

mod combat;
mod inventory;
mod queue;
mod registry;
mod service;
mod world;

use service::ShardServer;
use world::WorldMap;

struct Config {
    bind: SocketAddr,
    world_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4501".parse().unwrap(),
            world_path: None,
        }
    }
}

fn usage_and_exit() -> ! {
    eprintln!("usage: mireshard [--bind ADDR] [--world PATH.json]");
    std::process::exit(2);
}

fn parse_args() -> Config {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        match a.as_str() {
            "--bind" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                cfg.bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--world" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                cfg.world_path = Some(PathBuf::from(v));
            }
            "-h" | "--help" => usage_and_exit(),
            _ => {
                eprintln!("unknown flag: {a}");
                usage_and_exit();
            }
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let cfg = parse_args();
    let world = match &cfg.world_path {
        Some(path) => WorldMap::from_json_file(path)?,
        None => WorldMap::builtin(),
    };

    let listener = TcpListener::bind(cfg.bind).await?;
    let server = ShardServer::new(world);
    info!(bind = %cfg.bind, "shard starting");

    tokio::select! {
        res = server.run(listener) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}
