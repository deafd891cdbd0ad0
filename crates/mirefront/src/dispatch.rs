//! The command-dispatch table.
//!
//! One builder per handler id declared in the command registry. A builder
//! turns parsed input into an outbound [`ClientMessage`], or handles it
//! locally (help, usage errors) with no round trip. The table is built once
//! at startup and injected into the bridge; `dispatch_covers_every_command`
//! below fails the suite if the registry and this table ever drift apart.

use std::collections::HashMap;

use futures::future::BoxFuture;
use mireio::ansi;
use mireio::conn::TelnetConn;
use mireproto::{ClientMessage, Request};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::commands::{self, Command, Parsed, Registry};

/// Everything a builder may need: the correlation id, the parsed line, who
/// is asking, and the connection for extra prompt/read cycles.
pub struct BuildCtx<'a, S> {
    pub request_id: &'a str,
    pub command: &'a Command,
    pub parsed: &'a Parsed,
    pub character_name: &'a str,
    pub role: &'a str,
    pub registry: &'a Registry,
    pub conn: &'a mut TelnetConn<S>,
    /// Current prompt, re-issued after local-only output.
    pub prompt: &'a str,
}

/// What a builder decided.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    /// Message to send to the shard, if any.
    pub message: Option<ClientMessage>,
    /// Input was handled locally; no round trip.
    pub handled_locally: bool,
    /// Clean disconnect: send `message` (if any), then end the session.
    pub quit: bool,
    /// End the relay but return to character selection.
    pub switch_character: bool,
}

impl BuildOutcome {
    fn send(request_id: &str, payload: Request) -> Self {
        Self {
            message: Some(ClientMessage {
                request_id: request_id.to_string(),
                payload,
            }),
            ..Self::default()
        }
    }

    fn local() -> Self {
        Self {
            handled_locally: true,
            ..Self::default()
        }
    }
}

pub type Builder<S> =
    for<'a, 'b> fn(&'a mut BuildCtx<'b, S>) -> BoxFuture<'a, anyhow::Result<BuildOutcome>>;

pub type DispatchTable<S> = HashMap<&'static str, Builder<S>>;

/// Build the full dispatch table.
pub fn dispatch_table<S: AsyncRead + AsyncWrite + Send>() -> DispatchTable<S> {
    let mut t: DispatchTable<S> = HashMap::new();
    t.insert(commands::HANDLER_MOVE, build_move as Builder<S>);
    t.insert(commands::HANDLER_LOOK, build_look);
    t.insert(commands::HANDLER_EXITS, build_exits);
    t.insert(commands::HANDLER_SAY, build_say);
    t.insert(commands::HANDLER_EMOTE, build_emote);
    t.insert(commands::HANDLER_WHO, build_who);
    t.insert(commands::HANDLER_QUIT, build_quit);
    t.insert(commands::HANDLER_SWITCH, build_switch);
    t.insert(commands::HANDLER_HELP, build_help);
    t.insert(commands::HANDLER_EXAMINE, build_examine);
    t.insert(commands::HANDLER_ATTACK, build_attack);
    t.insert(commands::HANDLER_FLEE, build_flee);
    t.insert(commands::HANDLER_PASS, build_pass);
    t.insert(commands::HANDLER_STATUS, build_status);
    t.insert(commands::HANDLER_INVENTORY, build_inventory);
    t.insert(commands::HANDLER_GET, build_get);
    t.insert(commands::HANDLER_DROP, build_drop);
    t.insert(commands::HANDLER_BALANCE, build_balance);
    t.insert(commands::HANDLER_SETROLE, build_setrole);
    t.insert(commands::HANDLER_TELEPORT, build_teleport);
    t
}

/// Write a red error line and re-issue the prompt; the input is handled.
async fn usage<S: AsyncRead + AsyncWrite + Send>(
    ctx: &mut BuildCtx<'_, S>,
    msg: &str,
) -> anyhow::Result<BuildOutcome> {
    let w = ctx.conn.writer();
    w.write_line(&ansi::colorize(ansi::RED, msg)).await?;
    w.write_prompt(ctx.prompt).await?;
    Ok(BuildOutcome::local())
}

fn build_move<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    // The canonical command name is the direction ("n" resolved to "north").
    Box::pin(async move {
        Ok(BuildOutcome::send(
            ctx.request_id,
            Request::Move {
                direction: ctx.command.name.to_string(),
            },
        ))
    })
}

fn build_look<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move { Ok(BuildOutcome::send(ctx.request_id, Request::Look)) })
}

fn build_exits<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move { Ok(BuildOutcome::send(ctx.request_id, Request::Exits)) })
}

fn build_say<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        if ctx.parsed.raw_args.is_empty() {
            return usage(ctx, "Say what?").await;
        }
        Ok(BuildOutcome::send(
            ctx.request_id,
            Request::Say {
                message: ctx.parsed.raw_args.clone(),
            },
        ))
    })
}

fn build_emote<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        if ctx.parsed.raw_args.is_empty() {
            return usage(ctx, "Emote what?").await;
        }
        Ok(BuildOutcome::send(
            ctx.request_id,
            Request::Emote {
                action: ctx.parsed.raw_args.clone(),
            },
        ))
    })
}

fn build_who<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move { Ok(BuildOutcome::send(ctx.request_id, Request::Who)) })
}

fn build_quit<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        ctx.conn
            .writer()
            .write_line(&ansi::colorize(
                ansi::CYAN,
                "The mire swallows your footsteps. Goodbye.",
            ))
            .await?;
        let mut out = BuildOutcome::send(ctx.request_id, Request::Quit);
        out.quit = true;
        Ok(out)
    })
}

fn build_switch<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        let mut out = BuildOutcome::send(ctx.request_id, Request::SwitchCharacter);
        out.switch_character = true;
        Ok(out)
    })
}

fn build_help<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        let w = ctx.conn.writer();
        w.write_line(&ansi::colorize(ansi::BRIGHT_WHITE, "Available commands:"))
            .await?;

        let labels = [
            (commands::CATEGORY_MOVEMENT, "Movement"),
            (commands::CATEGORY_WORLD, "World"),
            (commands::CATEGORY_COMBAT, "Combat"),
            (commands::CATEGORY_COMMUNICATION, "Communication"),
            (commands::CATEGORY_SYSTEM, "System"),
            (commands::CATEGORY_ADMIN, "Admin"),
        ];
        let by_category = ctx.registry.by_category();
        for (cat, label) in labels {
            if cat == commands::CATEGORY_ADMIN && ctx.role != crate::auth::ROLE_ADMIN {
                continue;
            }
            let Some(cmds) = by_category.get(cat) else {
                continue;
            };
            w.write_line(&ansi::colorize(ansi::BRIGHT_YELLOW, &format!("  {label}:")))
                .await?;
            for cmd in cmds {
                let aliases = if cmd.aliases.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", cmd.aliases.join(", "))
                };
                w.write_line(&format!(
                    "    {}{aliases} - {}",
                    ansi::colorize(ansi::GREEN, &format!("{:<12}", cmd.name)),
                    cmd.help
                ))
                .await?;
            }
        }
        w.write_prompt(ctx.prompt).await?;
        Ok(BuildOutcome::local())
    })
}

fn build_examine<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        if ctx.parsed.raw_args.is_empty() {
            return usage(ctx, "Usage: examine <target>").await;
        }
        Ok(BuildOutcome::send(
            ctx.request_id,
            Request::Examine {
                target: ctx.parsed.raw_args.clone(),
            },
        ))
    })
}

fn build_attack<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        if ctx.parsed.raw_args.is_empty() {
            return usage(ctx, "Usage: attack <target>").await;
        }
        Ok(BuildOutcome::send(
            ctx.request_id,
            Request::Attack {
                target: ctx.parsed.raw_args.clone(),
            },
        ))
    })
}

fn build_flee<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move { Ok(BuildOutcome::send(ctx.request_id, Request::Flee)) })
}

fn build_pass<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move { Ok(BuildOutcome::send(ctx.request_id, Request::Pass)) })
}

fn build_status<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move { Ok(BuildOutcome::send(ctx.request_id, Request::Status)) })
}

fn build_inventory<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move { Ok(BuildOutcome::send(ctx.request_id, Request::Inventory)) })
}

fn build_get<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        if ctx.parsed.raw_args.is_empty() {
            return usage(ctx, "Usage: get <item>").await;
        }
        Ok(BuildOutcome::send(
            ctx.request_id,
            Request::GetItem {
                target: ctx.parsed.raw_args.clone(),
            },
        ))
    })
}

fn build_drop<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        if ctx.parsed.raw_args.is_empty() {
            return usage(ctx, "Usage: drop <item>").await;
        }
        Ok(BuildOutcome::send(
            ctx.request_id,
            Request::DropItem {
                target: ctx.parsed.raw_args.clone(),
            },
        ))
    })
}

fn build_balance<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move { Ok(BuildOutcome::send(ctx.request_id, Request::Balance)) })
}

fn build_setrole<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        if ctx.parsed.args.len() < 2 {
            return usage(ctx, "Usage: setrole <username> <role>").await;
        }
        Ok(BuildOutcome::send(
            ctx.request_id,
            Request::SetRole {
                target_username: ctx.parsed.args[0].clone(),
                role: ctx.parsed.args[1].clone(),
            },
        ))
    })
}

/// Teleport prompts synchronously for whatever the player left out.
fn build_teleport<'a, S: AsyncRead + AsyncWrite + Send>(
    ctx: &'a mut BuildCtx<'_, S>,
) -> BoxFuture<'a, anyhow::Result<BuildOutcome>> {
    Box::pin(async move {
        let mut target = ctx.parsed.raw_args.trim().to_string();
        if target.is_empty() {
            ctx.conn.writer().write_prompt("Character name: ").await?;
            target = match ctx.conn.read_line().await? {
                Some(l) => l.trim().to_string(),
                None => return Err(anyhow::anyhow!("connection closed during teleport prompt")),
            };
        }
        if target.is_empty() {
            return usage(ctx, "Character name cannot be empty.").await;
        }

        ctx.conn.writer().write_prompt("Room ID: ").await?;
        let room_id = match ctx.conn.read_line().await? {
            Some(l) => l.trim().to_string(),
            None => return Err(anyhow::anyhow!("connection closed during teleport prompt")),
        };
        if room_id.is_empty() {
            return usage(ctx, "Room ID cannot be empty.").await;
        }

        Ok(BuildOutcome::send(
            ctx.request_id,
            Request::Teleport {
                target_character: target,
                room_id,
            },
        ))
    })
}
