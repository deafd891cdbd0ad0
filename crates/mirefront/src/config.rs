//! Process configuration from command-line flags.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub shard_addr: SocketAddr,
    pub store_path: PathBuf,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub idle_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:4000".parse().unwrap(),
            shard_addr: "127.0.0.1:4501".parse().unwrap(),
            store_path: PathBuf::from("mirefront-store.json"),
            // Socket timeouts stay lenient; application liveness is the
            // idle monitor's job.
            read_timeout: Duration::from_secs(15 * 60),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10 * 60),
            idle_grace: Duration::from_secs(60),
        }
    }
}

fn usage_and_exit() -> ! {
    eprintln!(
        "usage: mirefront [--bind ADDR] [--shard ADDR] [--store PATH]\n\
         \x20  [--read-timeout-secs N] [--write-timeout-secs N]\n\
         \x20  [--idle-timeout-secs N] [--idle-grace-secs N]"
    );
    std::process::exit(2);
}

pub fn parse_args() -> Config {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        let mut value = |name: &str| args.next().unwrap_or_else(|| {
            eprintln!("missing value for {name}");
            usage_and_exit()
        });
        match a.as_str() {
            "--bind" => {
                cfg.bind = value("--bind").parse().unwrap_or_else(|_| usage_and_exit())
            }
            "--shard" => {
                cfg.shard_addr = value("--shard").parse().unwrap_or_else(|_| usage_and_exit())
            }
            "--store" => cfg.store_path = PathBuf::from(value("--store")),
            "--read-timeout-secs" => {
                cfg.read_timeout = parse_secs(&value("--read-timeout-secs"))
            }
            "--write-timeout-secs" => {
                cfg.write_timeout = parse_secs(&value("--write-timeout-secs"))
            }
            "--idle-timeout-secs" => {
                cfg.idle_timeout = parse_secs(&value("--idle-timeout-secs"))
            }
            "--idle-grace-secs" => cfg.idle_grace = parse_secs(&value("--idle-grace-secs")),
            "-h" | "--help" => usage_and_exit(),
            _ => {
                eprintln!("unknown flag: {a}");
                usage_and_exit()
            }
        }
    }
    cfg
}

fn parse_secs(s: &str) -> Duration {
    match s.parse::<u64>() {
        Ok(n) => Duration::from_secs(n),
        Err(_) => usage_and_exit(),
    }
}
