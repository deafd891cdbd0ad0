//! TCP acceptor for telnet clients.
//!
//! One task per accepted connection. `stop()` closes the listener, signals
//! every in-flight session through the shared watch channel, and returns
//! only after all connection tasks have finished.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use mireio::conn::TelnetConn;

/// Per-connection session processing, supplied by the caller.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Run one client session to completion. `cancel` flips to `true` when
    /// the acceptor is stopping; the handler must wind down promptly.
    async fn handle_session(
        &self,
        conn: TelnetConn<TcpStream>,
        cancel: watch::Receiver<bool>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct AcceptorConfig {
    pub bind: SocketAddr,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

pub struct Acceptor {
    cfg: AcceptorConfig,
    handler: Arc<dyn SessionHandler>,
    stop_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Acceptor {
    pub fn new(cfg: AcceptorConfig, handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            cfg,
            handler,
            stop_tx: watch::channel(false).0,
            done_tx: watch::channel(false).0,
            local_addr: Mutex::new(None),
        }
    }

    /// The actual bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Bind and accept until [`Acceptor::stop`] is called.
    ///
    /// The returned error reflects only bind failure; handler and accept
    /// errors are logged and never propagate.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.cfg.bind)
            .await
            .with_context(|| format!("listening on {}", self.cfg.bind))?;
        let addr = listener.local_addr().context("resolving bound address")?;
        *self.local_addr.lock().unwrap() = Some(addr);
        info!(addr = %addr, "telnet acceptor listening");

        let mut stop_rx = self.stop_tx.subscribe();
        let mut tasks = JoinSet::new();

        while !*stop_rx.borrow_and_update() {
            tokio::select! {
                _ = stop_rx.changed() => break,
                res = listener.accept() => match res {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&self.handler);
                        let cancel = self.stop_tx.subscribe();
                        let cfg = self.cfg;
                        tasks.spawn(serve_conn(stream, peer, cfg, handler, cancel));
                    }
                    Err(e) => {
                        if *stop_rx.borrow() {
                            break;
                        }
                        warn!(err = %e, "accepting connection");
                    }
                },
            }
        }

        // Stop accepting before draining so nothing new sneaks in.
        drop(listener);
        while tasks.join_next().await.is_some() {}
        let _ = self.done_tx.send(true);
        info!("telnet acceptor stopped");
        Ok(())
    }

    /// Stop accepting, cancel in-flight sessions, and wait for every
    /// connection task to finish. Safe to call more than once.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if self.local_addr().is_none() {
            // Never started listening; there is nothing to wait for.
            return;
        }
        let mut done = self.done_tx.subscribe();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }
}

async fn serve_conn(
    stream: TcpStream,
    peer: SocketAddr,
    cfg: AcceptorConfig,
    handler: Arc<dyn SessionHandler>,
    cancel: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now();
    info!(peer = %peer, "client connected");

    let conn = TelnetConn::new(stream, cfg.read_timeout, cfg.write_timeout);
    if let Err(e) = conn.negotiate().await {
        warn!(peer = %peer, err = %e, "telnet negotiation failed");
        return;
    }

    match handler.handle_session(conn, cancel).await {
        Ok(()) => info!(peer = %peer, elapsed = ?start.elapsed(), "session ended cleanly"),
        Err(e) => debug!(peer = %peer, err = %e, elapsed = ?start.elapsed(), "session ended"),
    }
    // The connection closes when the conn (and its writer clones inside the
    // handler) drop.
}
