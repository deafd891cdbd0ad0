//! Sparring-dummy combat.
//!
//! The real combat engine is a collaborator the shard calls through this
//! interface; the stock implementation produces deterministic round and
//! combat events so the event kinds flow end to end.

use mireproto::Event;

use crate::world::Npc;

pub trait CombatHandler: Send + Sync {
    /// Resolve an attack. The first event goes back to the attacker; the
    /// rest are broadcast to the room.
    fn attack(&self, attacker: &str, target: &Npc, round: u32) -> Vec<Event>;
    /// Resolve a flee attempt. Same delivery split as `attack`.
    fn flee(&self, actor: &str, round: u32) -> Vec<Event>;
    /// Resolve a passed turn.
    fn pass(&self, actor: &str, round: u32) -> Vec<Event>;
}

/// Fixed-damage sparring rules.
#[derive(Debug, Default)]
pub struct SparCombat;

const SPAR_DAMAGE: i32 = 2;

impl CombatHandler for SparCombat {
    fn attack(&self, attacker: &str, target: &Npc, round: u32) -> Vec<Event> {
        vec![
            Event::Combat {
                actor: attacker.to_string(),
                target: target.name.clone(),
                text: format!(
                    "You strike the {} for {} damage.",
                    target.name, SPAR_DAMAGE
                ),
                damage: SPAR_DAMAGE,
            },
            Event::RoundStart { round },
            Event::Combat {
                actor: attacker.to_string(),
                target: target.name.clone(),
                text: format!("{attacker} strikes the {}.", target.name),
                damage: SPAR_DAMAGE,
            },
            Event::RoundEnd { round },
        ]
    }

    fn flee(&self, actor: &str, round: u32) -> Vec<Event> {
        vec![
            Event::Combat {
                actor: actor.to_string(),
                target: String::new(),
                text: "You slip away through the reeds.".to_string(),
                damage: 0,
            },
            Event::Combat {
                actor: actor.to_string(),
                target: String::new(),
                text: format!("{actor} flees."),
                damage: 0,
            },
            Event::RoundEnd { round },
        ]
    }

    fn pass(&self, actor: &str, round: u32) -> Vec<Event> {
        vec![
            Event::Combat {
                actor: actor.to_string(),
                target: String::new(),
                text: "You hold your ground.".to_string(),
                damage: 0,
            },
            Event::Combat {
                actor: actor.to_string(),
                target: String::new(),
                text: format!("{actor} holds their ground."),
                damage: 0,
            },
        ]
    }
}
