//! The top-level authentication loop.
//!
//! A connected client lands here: `login`, `register`, `help`, or `quit`.
//! Accounts and characters live behind narrow store traits; this module
//! never sees how they are persisted. A successful login hands off to the
//! character selection flow, which in turn starts the bridge.

use std::sync::Arc;

use async_trait::async_trait;
use mireio::ansi;
use mireio::conn::TelnetConn;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{error, info};

use crate::acceptor::SessionHandler;
use crate::bridge::Bridge;
use crate::characters::{CharacterStore, ClassDef};

pub const ROLE_PLAYER: &str = "player";
pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub role: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account not found")]
    AccountNotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account already exists")]
    AccountExists,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create(&self, username: &str, password: &str) -> Result<Account, StoreError>;
    async fn authenticate(&self, username: &str, password: &str) -> Result<Account, StoreError>;
}

const WELCOME: &str = "\r\n\
    == m i r e m u d ==\r\n\
    The causeway sank years ago. Everything here leads down.\r\n\
    \r\n\
    Type 'login <username> [password]' to connect.\r\n\
    Type 'register <username> [password]' to create an account.\r\n\
    Type 'quit' to disconnect.\r\n";

pub struct AuthHandler<S> {
    pub accounts: Arc<dyn AccountStore>,
    pub characters: Arc<dyn CharacterStore>,
    pub classes: Vec<ClassDef>,
    pub bridge: Bridge<S>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> AuthHandler<S> {
    /// The auth loop for one connection; returns when the client quits, the
    /// session completes, or the server is shutting down.
    pub async fn run_session(
        &self,
        conn: &mut TelnetConn<S>,
        mut cancel: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let w = conn.writer();
        w.write(WELCOME.as_bytes()).await?;

        loop {
            if *cancel.borrow() {
                let _ = w
                    .write_line(&ansi::colorize(ansi::YELLOW, "Server shutting down. Goodbye!"))
                    .await;
                return Ok(());
            }
            w.write_prompt(&ansi::colorize(ansi::BRIGHT_WHITE, "> ")).await?;

            let line = tokio::select! {
                _ = cancel.changed() => {
                    let _ = w
                        .write_line(&ansi::colorize(ansi::YELLOW, "Server shutting down. Goodbye!"))
                        .await;
                    return Ok(());
                }
                res = conn.read_line() => match res? {
                    Some(l) => l,
                    None => return Ok(()),
                },
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut words = line.split_whitespace();
            let cmd = words.next().unwrap_or("").to_ascii_lowercase();
            let args: Vec<&str> = words.collect();

            match cmd.as_str() {
                "quit" | "exit" => {
                    let _ = w.write_line(&ansi::colorize(ansi::CYAN, "Goodbye!")).await;
                    return Ok(());
                }
                "login" => {
                    if let Some(acct) = self.handle_login(conn, &args).await? {
                        info!(username = %acct.username, "player logged in");
                        self.character_flow(conn, &acct, cancel.clone()).await?;
                        return Ok(());
                    }
                }
                "register" => self.handle_register(conn, &args).await?,
                "help" => self.show_help(conn).await?,
                _ => {
                    let _ = w
                        .write_line(&ansi::colorize(
                            ansi::RED,
                            &format!("Unknown command: {cmd}. Type 'help' for available commands."),
                        ))
                        .await;
                }
            }
        }
    }

    /// Authenticate a player.
    ///
    /// Returns `Ok(None)` when the failure was shown to the user and the
    /// auth loop should continue at the top-level prompt.
    async fn handle_login(
        &self,
        conn: &mut TelnetConn<S>,
        args: &[&str],
    ) -> anyhow::Result<Option<Account>> {
        let w = conn.writer();
        let Some(username) = args.first().map(|s| s.to_string()) else {
            w.write_line(&ansi::colorize(ansi::RED, "Usage: login <username> [password]"))
                .await?;
            return Ok(None);
        };

        let password = match args.get(1) {
            Some(p) => p.to_string(),
            None => {
                // Prompt with echo masked.
                w.write_prompt("Password: ").await?;
                match conn.read_password().await? {
                    Some(p) => p,
                    None => return Ok(None),
                }
            }
        };

        match self.accounts.authenticate(&username, &password).await {
            Ok(acct) => {
                w.write_line(&ansi::colorize(
                    ansi::BRIGHT_GREEN,
                    &format!("Welcome back, {}!", acct.username),
                ))
                .await?;
                Ok(Some(acct))
            }
            Err(StoreError::AccountNotFound) => {
                w.write_line(&ansi::colorize(
                    ansi::RED,
                    "Account not found. Use 'register' to create one.",
                ))
                .await?;
                Ok(None)
            }
            Err(StoreError::InvalidCredentials) => {
                w.write_line(&ansi::colorize(ansi::RED, "Invalid password.")).await?;
                Ok(None)
            }
            Err(e) => {
                error!(err = %e, "authentication error");
                w.write_line(&ansi::colorize(
                    ansi::RED,
                    "An internal error occurred. Please try again.",
                ))
                .await?;
                Ok(None)
            }
        }
    }

    async fn handle_register(&self, conn: &mut TelnetConn<S>, args: &[&str]) -> anyhow::Result<()> {
        let w = conn.writer();
        let Some(username) = args.first().map(|s| s.to_string()) else {
            w.write_line(&ansi::colorize(ansi::RED, "Usage: register <username> [password]"))
                .await?;
            return Ok(());
        };
        if username.len() < 3 || username.len() > 32 {
            w.write_line(&ansi::colorize(ansi::RED, "Username must be 3-32 characters."))
                .await?;
            return Ok(());
        }

        let password = match args.get(1) {
            Some(p) => p.to_string(),
            None => {
                w.write_prompt("Password: ").await?;
                match conn.read_password().await? {
                    Some(p) => p,
                    None => return Ok(()),
                }
            }
        };
        if password.len() < 6 {
            w.write_line(&ansi::colorize(ansi::RED, "Password must be at least 6 characters."))
                .await?;
            return Ok(());
        }

        match self.accounts.create(&username, &password).await {
            Ok(acct) => {
                w.write_line(&ansi::colorize(
                    ansi::BRIGHT_GREEN,
                    &format!("Account created: {}. You may now 'login'.", acct.username),
                ))
                .await?;
            }
            Err(StoreError::AccountExists) => {
                w.write_line(&ansi::colorize(ansi::RED, "That username is already taken."))
                    .await?;
            }
            Err(e) => {
                error!(err = %e, "registration error");
                w.write_line(&ansi::colorize(
                    ansi::RED,
                    "An internal error occurred. Please try again.",
                ))
                .await?;
            }
        }
        Ok(())
    }

    async fn show_help(&self, conn: &mut TelnetConn<S>) -> anyhow::Result<()> {
        let w = conn.writer();
        w.write_line(&ansi::colorize(ansi::BRIGHT_WHITE, "Available commands:")).await?;
        w.write_line("  login <username> [password]    - Log in to your account").await?;
        w.write_line("  register <username> [password] - Create a new account").await?;
        w.write_line("  help                           - Show this help").await?;
        w.write_line("  quit                           - Disconnect").await?;
        Ok(())
    }
}

#[async_trait]
impl SessionHandler for AuthHandler<TcpStream> {
    async fn handle_session(
        &self,
        mut conn: TelnetConn<TcpStream>,
        cancel: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        self.run_session(&mut conn, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characters::Character;
    use crate::commands::Registry;
    use crate::dispatch::dispatch_table;
    use crate::idle::IdleConfig;
    use crate::render::PlainRenderer;
    use crate::stores::MemoryStores;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn handler(stores: Arc<MemoryStores>) -> AuthHandler<DuplexStream> {
        AuthHandler {
            accounts: stores.clone(),
            characters: stores,
            classes: crate::characters::default_classes(),
            bridge: Bridge {
                // Never dialed in these tests.
                shard_addr: "127.0.0.1:1".parse().unwrap(),
                registry: Arc::new(Registry::builtin().unwrap()),
                table: dispatch_table(),
                renderer: Arc::new(PlainRenderer),
                idle_cfg: IdleConfig {
                    idle_timeout: Duration::from_secs(600),
                    grace_period: Duration::from_secs(60),
                    tick_interval: Duration::from_secs(30),
                },
            },
        }
    }

    async fn run_script_raw(h: &AuthHandler<DuplexStream>, script: &str) -> Vec<u8> {
        let (a, mut peer) = duplex(64 * 1024);
        let mut conn = TelnetConn::new(a, Duration::ZERO, Duration::ZERO);
        peer.write_all(script.as_bytes()).await.unwrap();

        let (_tx, cancel) = watch::channel(false);
        h.run_session(&mut conn, cancel).await.unwrap();

        drop(conn);
        let mut out = Vec::new();
        peer.read_to_end(&mut out).await.unwrap();
        out
    }

    async fn run_script(h: &AuthHandler<DuplexStream>, script: &str) -> String {
        String::from_utf8_lossy(&run_script_raw(h, script).await).into_owned()
    }

    fn seeded_stores() -> Arc<MemoryStores> {
        let stores = Arc::new(MemoryStores::new());
        let acct = stores.seed_account("alice", "secret", ROLE_PLAYER);
        stores.seed_character(Character {
            id: 0,
            account_id: acct.id,
            name: "Wren".into(),
            class: "scavenger".into(),
            level: 1,
            current_hp: 12,
            max_hp: 12,
            location: String::new(),
        });
        stores
    }

    #[tokio::test]
    async fn correct_login_reaches_character_selection() {
        let h = handler(seeded_stores());
        let out = run_script(&h, "login alice secret\r\nquit\r\n").await;
        assert!(out.contains("Welcome back, alice!"));
        assert!(out.contains("Your characters:"), "no selection screen: {out}");
        assert!(out.contains("Wren"));
    }

    #[tokio::test]
    async fn wrong_password_stays_at_the_top_level_prompt() {
        let h = handler(seeded_stores());
        let out = run_script(&h, "login alice wrong\r\nquit\r\n").await;
        assert!(out.contains("Invalid password."));
        assert!(!out.contains("Your characters:"));
        // The quit was handled at the top prompt afterwards.
        assert!(out.contains("Goodbye!"));
    }

    #[tokio::test]
    async fn unknown_account_is_reported() {
        let h = handler(Arc::new(MemoryStores::new()));
        let out = run_script(&h, "login nobody pw\r\nquit\r\n").await;
        assert!(out.contains("Account not found"));
    }

    #[tokio::test]
    async fn login_without_password_masks_the_prompted_one() {
        let h = handler(seeded_stores());
        let raw = run_script_raw(&h, "login alice\r\nsecret\r\nquit\r\n").await;
        let text = String::from_utf8_lossy(&raw);
        assert!(text.contains("Password: "));
        assert!(text.contains("Welcome back, alice!"));
        // Echo suppressed then restored around the hidden input.
        assert!(raw.windows(3).any(|w| w == [255, 251, 1]));
        assert!(raw.windows(3).any(|w| w == [255, 252, 1]));
    }

    #[tokio::test]
    async fn register_creates_an_account_and_rejects_duplicates() {
        let stores = Arc::new(MemoryStores::new());
        let h = handler(stores);
        let out = run_script(
            &h,
            "register bob hunter42\r\nregister bob hunter42\r\nquit\r\n",
        )
        .await;
        assert!(out.contains("Account created: bob"));
        assert!(out.contains("already taken"));
    }

    #[tokio::test]
    async fn short_passwords_are_rejected_at_register() {
        let h = handler(Arc::new(MemoryStores::new()));
        let out = run_script(&h, "register carl abc\r\nquit\r\n").await;
        assert!(out.contains("at least 6 characters"));
    }
}
