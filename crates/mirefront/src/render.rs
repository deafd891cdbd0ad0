//! Event rendering.
//!
//! Turning typed shard events into terminal text is a collaborator concern;
//! the bridge only depends on the [`EventRenderer`] trait. [`PlainRenderer`]
//! is the stock implementation.

use mireio::ansi;
use mireproto::{Event, MessageKind, RoomEventKind, RoomView};

pub trait EventRenderer: Send + Sync {
    /// Render one event to a text block, or `None` when the event produces
    /// no output.
    fn render(&self, event: &Event) -> Option<String>;
}

/// Builds the in-game prompt: `[Name] [hp/maxhp]> `, HP colored by how
/// close to death the character is.
pub fn build_prompt(name: &str, current_hp: i32, max_hp: i32) -> String {
    let max_hp = max_hp.max(1);
    let pct = f64::from(current_hp) / f64::from(max_hp);
    let hp_color = if pct >= 0.75 {
        ansi::BRIGHT_GREEN
    } else if pct >= 0.40 {
        ansi::YELLOW
    } else {
        ansi::RED
    };
    format!(
        "{} {}> ",
        ansi::colorize(ansi::BRIGHT_CYAN, &format!("[{name}]")),
        ansi::colorize(hp_color, &format!("[{current_hp}/{max_hp}hp]")),
    )
}

#[derive(Debug, Default)]
pub struct PlainRenderer;

impl EventRenderer for PlainRenderer {
    fn render(&self, event: &Event) -> Option<String> {
        match event {
            Event::RoomView(view) => Some(render_room_view(view)),
            Event::Message { from, kind, text } => Some(match kind {
                MessageKind::Say => format!("{from} says, \"{text}\""),
                MessageKind::Emote => format!("{from} {text}"),
            }),
            Event::RoomEvent {
                player,
                kind,
                direction,
            } => Some(match (kind, direction.is_empty()) {
                (RoomEventKind::Arrive, true) => format!("{player} arrives."),
                (RoomEventKind::Arrive, false) => {
                    format!("{player} arrives from the {direction}.")
                }
                (RoomEventKind::Depart, true) => format!("{player} leaves."),
                (RoomEventKind::Depart, false) => format!("{player} leaves {direction}."),
            }),
            Event::PlayerList { players } => {
                if players.is_empty() {
                    Some("No one else is around.".to_string())
                } else {
                    Some(format!("Players here: {}", players.join(", ")))
                }
            }
            Event::ExitList { exits } => {
                let mut out = String::from("Exits:");
                for e in exits {
                    out.push_str("\r\n  ");
                    out.push_str(&e.direction);
                    if e.locked {
                        out.push_str(" (locked)");
                    }
                }
                if exits.is_empty() {
                    out.push_str(" none");
                }
                Some(out)
            }
            Event::Error { message } => Some(ansi::colorize(ansi::RED, message)),
            Event::Combat { text, .. } => Some(text.clone()),
            Event::RoundStart { round } => Some(format!("-- Round {round} --")),
            Event::RoundEnd { round } => Some(format!("-- Round {round} ends --")),
            Event::NpcView {
                name,
                description,
                disposition,
            } => Some(format!(
                "{}\r\n{description}\r\nDisposition: {disposition}",
                ansi::colorize(ansi::BRIGHT_WHITE, name)
            )),
            Event::Condition {
                condition_id,
                name,
                remaining_rounds,
            } => {
                if condition_id.is_empty() {
                    Some(ansi::colorize(ansi::CYAN, "No active conditions."))
                } else {
                    Some(format!("{name} ({remaining_rounds} rounds remaining)"))
                }
            }
            Event::InventoryView { items, currency } => {
                let mut out = String::new();
                if items.is_empty() {
                    out.push_str("Your pack is empty.");
                } else {
                    out.push_str("You carry:");
                    for it in items {
                        out.push_str(&format!("\r\n  {} x{}", it.name, it.quantity));
                    }
                }
                out.push_str(&format!("\r\nScrip: {currency}"));
                Some(out)
            }
            Event::CharacterInfo {
                name,
                class,
                level,
                current_hp,
                max_hp,
            } => Some(format!(
                "{} - level {level} {class}\r\nHP: {current_hp}/{max_hp}",
                ansi::colorize(ansi::BRIGHT_WHITE, name)
            )),
            Event::Disconnected { reason } => {
                Some(ansi::colorize(ansi::YELLOW, &format!("Disconnected: {reason}")))
            }
        }
    }
}

fn render_room_view(view: &RoomView) -> String {
    let mut out = String::new();
    out.push_str(&ansi::colorize(ansi::BRIGHT_WHITE, &view.title));
    out.push_str("\r\n");
    out.push_str(&view.description);
    if !view.players.is_empty() {
        out.push_str("\r\nAlso here: ");
        out.push_str(&view.players.join(", "));
    }
    let visible: Vec<&str> = view
        .exits
        .iter()
        .filter(|e| !e.hidden)
        .map(|e| e.direction.as_str())
        .collect();
    if !visible.is_empty() {
        out.push_str("\r\nExits: ");
        out.push_str(&visible.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mireproto::ExitInfo;

    #[test]
    fn room_view_hides_hidden_exits() {
        let view = RoomView {
            room_id: "r1".into(),
            title: "Mudflat".into(),
            description: "Grey silt in every direction.".into(),
            exits: vec![
                ExitInfo {
                    direction: "north".into(),
                    target_room_id: "r2".into(),
                    locked: false,
                    hidden: false,
                },
                ExitInfo {
                    direction: "grate".into(),
                    target_room_id: "r3".into(),
                    locked: false,
                    hidden: true,
                },
            ],
            players: vec!["Wren".into()],
        };
        let text = PlainRenderer.render(&Event::RoomView(view)).unwrap();
        assert!(text.contains("Mudflat"));
        assert!(text.contains("Also here: Wren"));
        assert!(text.contains("Exits: north"));
        assert!(!text.contains("grate"));
    }

    #[test]
    fn say_and_emote_render_differently() {
        let r = PlainRenderer;
        let say = r
            .render(&Event::Message {
                from: "Brix".into(),
                kind: MessageKind::Say,
                text: "hi".into(),
            })
            .unwrap();
        assert_eq!(say, "Brix says, \"hi\"");
        let emote = r
            .render(&Event::Message {
                from: "Brix".into(),
                kind: MessageKind::Emote,
                text: "waves".into(),
            })
            .unwrap();
        assert_eq!(emote, "Brix waves");
    }

    #[test]
    fn empty_condition_id_is_the_no_conditions_sentinel() {
        let text = PlainRenderer
            .render(&Event::Condition {
                condition_id: String::new(),
                name: String::new(),
                remaining_rounds: 0,
            })
            .unwrap();
        assert!(text.contains("No active conditions."));
    }

    #[test]
    fn prompt_colors_follow_hp_fraction() {
        let healthy = build_prompt("Ash", 90, 100);
        assert!(healthy.contains(ansi::BRIGHT_GREEN));
        let hurt = build_prompt("Ash", 50, 100);
        assert!(hurt.contains(ansi::YELLOW));
        let dying = build_prompt("Ash", 5, 100);
        assert!(dying.contains(ansi::RED));
        assert!(dying.ends_with("> "));
    }

    #[test]
    fn prompt_survives_zero_max_hp() {
        let p = build_prompt("Ash", 0, 0);
        assert!(p.contains("[0/1hp]"));
    }
}
