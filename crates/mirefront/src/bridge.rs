//! The duplex relay between one telnet client and the game shard.
//!
//! After character selection the session opens one frame stream to the
//! shard, joins the world, and then runs two tasks under one shared cancel
//! signal: the command loop (client lines -> dispatch table -> requests) and
//! the event forwarder (shard events -> rendered text -> client). Whichever
//! side finishes first flips the signal; the relay returns only after both
//! have stopped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::Context;
use mireio::ansi;
use mireio::conn::{ConnWriter, TelnetConn};
use mireio::frame::{FrameReader, FrameWriter};
use mireproto::{decode_event, encode_message, ClientMessage, Event, Request};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::auth::Account;
use crate::characters::Character;
use crate::commands::{parse, Registry};
use crate::dispatch::{BuildCtx, DispatchTable};
use crate::idle::{IdleConfig, IdleMonitor, IdleTracker};
use crate::render::{build_prompt, EventRenderer};

/// How a relay ended, as far as the caller is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Clean disconnect; the session is over.
    Quit,
    /// The player wants a different character; loop back to selection.
    SwitchCharacter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEnd {
    Quit,
    Switch,
    Cancelled,
}

/// Prompt inputs shared between the two relay tasks.
struct PromptState {
    name: String,
    current_hp: AtomicI32,
    max_hp: AtomicI32,
}

impl PromptState {
    fn new(ch: &Character) -> Self {
        let max = if ch.max_hp > 0 { ch.max_hp } else { ch.current_hp };
        Self {
            name: ch.name.clone(),
            current_hp: AtomicI32::new(ch.current_hp),
            max_hp: AtomicI32::new(max),
        }
    }

    fn set_hp(&self, current: i32, max: i32) {
        self.current_hp.store(current, Ordering::Relaxed);
        if max > 0 {
            self.max_hp.store(max, Ordering::Relaxed);
        }
    }

    fn prompt(&self) -> String {
        build_prompt(
            &self.name,
            self.current_hp.load(Ordering::Relaxed),
            self.max_hp.load(Ordering::Relaxed),
        )
    }
}

pub struct Bridge<S> {
    pub shard_addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub table: DispatchTable<S>,
    pub renderer: Arc<dyn EventRenderer>,
    pub idle_cfg: IdleConfig,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> Bridge<S> {
    /// Run the relay for one selected character.
    pub async fn run(
        &self,
        conn: &mut TelnetConn<S>,
        acct: &Account,
        ch: &Character,
        outer_cancel: watch::Receiver<bool>,
    ) -> anyhow::Result<BridgeOutcome> {
        let session_start = tokio::time::Instant::now();
        let writer = conn.writer();

        let stream = match TcpStream::connect(self.shard_addr).await {
            Ok(s) => s,
            Err(e) => {
                error!(shard = %self.shard_addr, err = %e, "connecting to shard");
                let _ = writer
                    .write_line(&ansi::colorize(
                        ansi::RED,
                        "Failed to reach the game shard. Please try again later.",
                    ))
                    .await;
                return Err(anyhow::Error::from(e).context("dialing shard"));
            }
        };
        let (rd, wr) = stream.into_split();
        let mut fr = FrameReader::new(rd);
        let mut fw = FrameWriter::new(wr);

        // Join, then block for exactly one acknowledgement.
        let join = ClientMessage {
            request_id: "join".to_string(),
            payload: Request::JoinWorld {
                uid: ch.id.to_string(),
                username: acct.username.clone(),
                character_name: ch.name.clone(),
                current_hp: ch.current_hp,
                max_hp: ch.max_hp,
                role: acct.role.clone(),
                class: ch.class.clone(),
                level: ch.level,
            },
        };
        fw.write_frame(&encode_message(&join).map_err(anyhow::Error::from)?)
            .await
            .context("sending join request")?;

        let ack_frame = fr
            .read_frame()
            .await
            .context("receiving join acknowledgement")?
            .context("shard closed the stream during join")?;
        let ack = decode_event(&ack_frame).map_err(anyhow::Error::from)?;

        let state = Arc::new(PromptState::new(ch));
        if let Some(text) = self.renderer.render(&ack.payload) {
            writer.write_line(&text).await.context("rendering join ack")?;
        }
        writer
            .write_prompt(&state.prompt())
            .await
            .context("writing initial prompt")?;

        // One shared cancel signal for both relay tasks, linked to the
        // acceptor's stop signal.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        {
            let tx = Arc::clone(&cancel_tx);
            let mut outer = outer_cancel;
            let mut inner = cancel_rx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    res = outer.wait_for(|s| *s) => {
                        if res.is_ok() {
                            let _ = tx.send(true);
                        }
                    }
                    _ = inner.wait_for(|s| *s) => {}
                }
            });
        }

        // "quit" until something more specific happens.
        let reason = Arc::new(std::sync::Mutex::new("quit"));

        let tracker = IdleTracker::new();
        let idle = {
            let warn_writer = writer.clone();
            let warn_msg = format!(
                "Warning: You have been idle for {}s. You will be disconnected in {}s.",
                self.idle_cfg.idle_timeout.as_secs(),
                self.idle_cfg.grace_period.as_secs(),
            );
            let disc_reason = Arc::clone(&reason);
            let disc_tx = Arc::clone(&cancel_tx);
            IdleMonitor::spawn(
                self.idle_cfg,
                tracker.clone(),
                move || {
                    let w = warn_writer.clone();
                    let msg = ansi::colorize(ansi::YELLOW, &warn_msg);
                    tokio::spawn(async move {
                        let _ = w.write_line(&msg).await;
                    });
                },
                move || {
                    *disc_reason.lock().unwrap() = "inactivity";
                    let _ = disc_tx.send(true);
                },
            )
        };

        let forwarder = tokio::spawn(forward_events(
            fr,
            writer.clone(),
            Arc::clone(&self.renderer),
            Arc::clone(&state),
            cancel_rx.clone(),
            Arc::clone(&cancel_tx),
        ));

        let end = self
            .command_loop(conn, &mut fw, acct, ch, &state, &tracker, cancel_rx)
            .await;

        // Teardown: flip the shared signal, then wait for the forwarder so
        // the shard stream is drained or abandoned before resources release.
        let _ = cancel_tx.send(true);
        let _ = forwarder.await;
        idle.shutdown().await;

        let ended = *reason.lock().unwrap();
        match end {
            Ok(LoopEnd::Quit) | Ok(LoopEnd::Cancelled) => {
                info!(
                    player = %ch.name,
                    account = %acct.username,
                    reason = ended,
                    session = ?session_start.elapsed(),
                    "player disconnected"
                );
                Ok(BridgeOutcome::Quit)
            }
            Ok(LoopEnd::Switch) => {
                info!(
                    player = %ch.name,
                    account = %acct.username,
                    reason = "switch_character",
                    session = ?session_start.elapsed(),
                    "player left the world"
                );
                Ok(BridgeOutcome::SwitchCharacter)
            }
            Err(e) => {
                info!(
                    player = %ch.name,
                    account = %acct.username,
                    reason = "connection_error",
                    session = ?session_start.elapsed(),
                    "player disconnected"
                );
                Err(e)
            }
        }
    }

    /// Client -> shard direction. Owns the telnet read half and the frame
    /// writer; any send failure is fatal to the whole relay.
    async fn command_loop(
        &self,
        conn: &mut TelnetConn<S>,
        fw: &mut FrameWriter<OwnedWriteHalf>,
        acct: &Account,
        ch: &Character,
        state: &PromptState,
        tracker: &IdleTracker,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<LoopEnd> {
        let mut request_counter: u64 = 0;

        loop {
            let line = tokio::select! {
                _ = cancel_rx.wait_for(|s| *s) => return Ok(LoopEnd::Cancelled),
                res = conn.read_line() => match res.context("reading input")? {
                    Some(l) => l,
                    None => anyhow::bail!("client closed the connection"),
                },
            };
            tracker.touch();

            let line = line.trim();
            if line.is_empty() {
                let _ = conn.writer().write_prompt(&state.prompt()).await;
                continue;
            }

            let parsed = parse(line);
            request_counter += 1;
            let request_id = format!("req-{request_counter}");

            let Some(cmd) = self.registry.resolve(&parsed.command) else {
                // Unknown word: forward it as a move toward a custom-named
                // exit and let the shard decide whether it exists.
                let msg = ClientMessage {
                    request_id,
                    payload: Request::Move {
                        direction: parsed.command.clone(),
                    },
                };
                send_frame(fw, &msg).await?;
                continue;
            };

            let builder = match self.table.get(cmd.handler) {
                Some(b) => *b,
                None => {
                    // Unreachable while the exhaustiveness test holds.
                    warn!(handler = cmd.handler, "command has no builder");
                    let w = conn.writer();
                    let _ = w
                        .write_line(&ansi::colorize(
                            ansi::DIM,
                            &format!("You don't know how to '{}'.", parsed.command),
                        ))
                        .await;
                    let _ = w.write_prompt(&state.prompt()).await;
                    continue;
                }
            };

            let prompt = state.prompt();
            let mut ctx = BuildCtx {
                request_id: &request_id,
                command: cmd,
                parsed: &parsed,
                character_name: &ch.name,
                role: &acct.role,
                registry: self.registry.as_ref(),
                conn: &mut *conn,
                prompt: &prompt,
            };
            let outcome = builder(&mut ctx).await?;

            if let Some(msg) = &outcome.message {
                send_frame(fw, msg).await?;
            }
            if outcome.quit {
                return Ok(LoopEnd::Quit);
            }
            if outcome.switch_character {
                return Ok(LoopEnd::Switch);
            }
            if outcome.handled_locally {
                // Local output only; the builder already re-issued the
                // prompt.
                continue;
            }
        }
    }
}

async fn send_frame(
    fw: &mut FrameWriter<OwnedWriteHalf>,
    msg: &ClientMessage,
) -> anyhow::Result<()> {
    let bytes = encode_message(msg).map_err(anyhow::Error::from)?;
    fw.write_frame(&bytes).await.context("sending request")
}

/// Shard -> client direction. Renders each event and re-displays the
/// prompt. Ends on cancellation, stream end, or a terminal forced
/// disconnect; always flips the shared signal on the way out.
async fn forward_events<S: AsyncRead + AsyncWrite + Send>(
    mut fr: FrameReader<OwnedReadHalf>,
    writer: ConnWriter<S>,
    renderer: Arc<dyn EventRenderer>,
    state: Arc<PromptState>,
    mut cancel_rx: watch::Receiver<bool>,
    cancel_tx: Arc<watch::Sender<bool>>,
) {
    let mut in_join_window = true;
    loop {
        let frame = tokio::select! {
            _ = cancel_rx.wait_for(|s| *s) => break,
            res = fr.read_frame() => match res {
                Ok(Some(f)) => f,
                // Expected end-of-stream; anything else is logged.
                Ok(None) => break,
                Err(e) => {
                    debug!(err = %e, "shard stream read failed");
                    break;
                }
            },
        };

        let evt = match decode_event(&frame) {
            Ok(e) => e,
            Err(e) => {
                warn!(err = %e, "bad shard event");
                continue;
            }
        };

        let terminal = matches!(evt.payload, Event::Disconnected { .. });
        if let Event::CharacterInfo {
            current_hp, max_hp, ..
        } = &evt.payload
        {
            state.set_hp(*current_hp, *max_hp);
            // The snapshot sent as part of joining updates the prompt but
            // produces no text block.
            if in_join_window {
                in_join_window = false;
                continue;
            }
        } else {
            in_join_window = false;
        }

        if let Some(text) = renderer.render(&evt.payload) {
            if writer.write_line(&text).await.is_err() {
                break;
            }
            if !terminal && writer.write_prompt(&state.prompt()).await.is_err() {
                break;
            }
        }
        if terminal {
            break;
        }
    }
    let _ = cancel_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ROLE_PLAYER;
    use crate::dispatch::dispatch_table;
    use crate::render::PlainRenderer;
    use mireproto::{decode_message, encode_event, ExitInfo, RoomView, ServerEvent};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::net::TcpListener;

    fn idle_cfg() -> IdleConfig {
        IdleConfig {
            idle_timeout: Duration::from_secs(600),
            grace_period: Duration::from_secs(60),
            tick_interval: Duration::from_secs(30),
        }
    }

    fn account() -> Account {
        Account {
            id: 1,
            username: "alice".into(),
            role: ROLE_PLAYER.into(),
        }
    }

    fn character() -> Character {
        Character {
            id: 7,
            account_id: 1,
            name: "Wren".into(),
            class: "scavenger".into(),
            level: 3,
            current_hp: 18,
            max_hp: 24,
            location: String::new(),
        }
    }

    fn bridge(addr: SocketAddr) -> Bridge<DuplexStream> {
        Bridge {
            shard_addr: addr,
            registry: Arc::new(Registry::builtin().unwrap()),
            table: dispatch_table(),
            renderer: Arc::new(PlainRenderer),
            idle_cfg: idle_cfg(),
        }
    }

    /// Minimal scripted shard: acks the join with a room view, records all
    /// requests, answers quit with a forced disconnect.
    async fn fake_shard(
        listener: TcpListener,
        seen: Arc<std::sync::Mutex<Vec<Request>>>,
    ) {
        let (stream, _) = listener.accept().await.unwrap();
        let (rd, wr) = stream.into_split();
        let mut fr = FrameReader::new(rd);
        let mut fw = FrameWriter::new(wr);

        let frame = fr.read_frame().await.unwrap().unwrap();
        let join = decode_message(&frame).unwrap();
        assert_eq!(join.request_id, "join");
        seen.lock().unwrap().push(join.payload.clone());

        let ack = ServerEvent::reply(
            join.request_id,
            Event::RoomView(RoomView {
                room_id: "sump-1".into(),
                title: "The Drowned Stair".into(),
                description: "Steps descend into black water.".into(),
                exits: vec![ExitInfo {
                    direction: "north".into(),
                    target_room_id: "sump-2".into(),
                    locked: false,
                    hidden: false,
                }],
                players: vec![],
            }),
        );
        fw.write_frame(&encode_event(&ack).unwrap()).await.unwrap();

        while let Ok(Some(frame)) = fr.read_frame().await {
            let msg = decode_message(&frame).unwrap();
            let is_quit = matches!(msg.payload, Request::Quit);
            seen.lock().unwrap().push(msg.payload);
            if is_quit {
                let bye = ServerEvent::broadcast(Event::Disconnected {
                    reason: "Wren has quit".into(),
                });
                let _ = fw.write_frame(&encode_event(&bye).unwrap()).await;
                break;
            }
        }
    }

    #[tokio::test]
    async fn relay_joins_forwards_and_quits_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let shard = tokio::spawn(fake_shard(listener, seen.clone()));

        let b = bridge(addr);
        let (a, mut peer) = duplex(64 * 1024);
        let mut conn = TelnetConn::new(a, Duration::ZERO, Duration::ZERO);
        // One dispatched command, one speculative exit move, then quit.
        peer.write_all(b"say hello\r\nstairs\r\nquit\r\n")
            .await
            .unwrap();

        let (_stop_tx, stop_rx) = watch::channel(false);
        let outcome = b
            .run(&mut conn, &account(), &character(), stop_rx)
            .await
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::Quit);
        shard.await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(matches!(
            &seen[0],
            Request::JoinWorld { character_name, current_hp, .. }
                if character_name == "Wren" && *current_hp == 18
        ));
        assert_eq!(
            seen[1],
            Request::Say {
                message: "hello".into()
            }
        );
        assert_eq!(
            seen[2],
            Request::Move {
                direction: "stairs".into()
            }
        );
        assert_eq!(seen[3], Request::Quit);

        drop(conn);
        let mut out = Vec::new();
        peer.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("The Drowned Stair"));
        assert!(text.contains("[Wren]"), "prompt missing: {text}");
        assert!(text.contains("Goodbye"));
    }

    #[tokio::test]
    async fn switch_returns_the_distinguished_outcome() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let shard = tokio::spawn(fake_shard(listener, seen.clone()));

        let b = bridge(addr);
        let (a, mut peer) = duplex(64 * 1024);
        let mut conn = TelnetConn::new(a, Duration::ZERO, Duration::ZERO);
        peer.write_all(b"switch\r\n").await.unwrap();

        let (_stop_tx, stop_rx) = watch::channel(false);
        let outcome = b
            .run(&mut conn, &account(), &character(), stop_rx)
            .await
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::SwitchCharacter);

        // The relay dropped its shard stream; the fake shard sees EOF.
        shard.await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen[1], Request::SwitchCharacter);
    }

    #[tokio::test]
    async fn unreachable_shard_is_fatal_and_reported_generically() {
        // Bind then drop to get a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let b = bridge(addr);
        let (a, mut peer) = duplex(64 * 1024);
        let mut conn = TelnetConn::new(a, Duration::ZERO, Duration::ZERO);

        let (_stop_tx, stop_rx) = watch::channel(false);
        let err = b.run(&mut conn, &account(), &character(), stop_rx).await;
        assert!(err.is_err());

        drop(conn);
        let mut out = Vec::new();
        peer.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("Failed to reach the game shard"));
        // No raw internal error text leaks to the client.
        assert!(!text.contains("refused"));
    }

    #[tokio::test]
    async fn acceptor_stop_cancels_the_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let _shard = tokio::spawn(fake_shard(listener, seen.clone()));

        let b = bridge(addr);
        let (a, _peer) = duplex(64 * 1024);
        let mut conn = TelnetConn::new(a, Duration::ZERO, Duration::ZERO);

        let (stop_tx, stop_rx) = watch::channel(false);
        let run = async {
            b.run(&mut conn, &account(), &character(), stop_rx).await
        };
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = stop_tx.send(true);
        };
        let (outcome, ()) = tokio::join!(run, stopper);
        assert_eq!(outcome.unwrap(), BridgeOutcome::Quit);
    }
}
