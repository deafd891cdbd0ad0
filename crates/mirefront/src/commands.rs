//! Command registry and line parser.
//!
//! The registry is the single declaration of every player-facing command:
//! canonical name, aliases, help text, category, and the handler id the
//! dispatch table keys on. The dispatch exhaustiveness test in
//! `dispatch.rs` compares the two, so adding a command here without wiring
//! a builder fails the suite.

use std::collections::HashMap;

use anyhow::bail;

// Categories for organizing help output.
pub const CATEGORY_MOVEMENT: &str = "movement";
pub const CATEGORY_WORLD: &str = "world";
pub const CATEGORY_COMBAT: &str = "combat";
pub const CATEGORY_COMMUNICATION: &str = "communication";
pub const CATEGORY_SYSTEM: &str = "system";
pub const CATEGORY_ADMIN: &str = "admin";

// Handler ids keyed on by the dispatch table.
pub const HANDLER_MOVE: &str = "move";
pub const HANDLER_LOOK: &str = "look";
pub const HANDLER_EXITS: &str = "exits";
pub const HANDLER_SAY: &str = "say";
pub const HANDLER_EMOTE: &str = "emote";
pub const HANDLER_WHO: &str = "who";
pub const HANDLER_QUIT: &str = "quit";
pub const HANDLER_SWITCH: &str = "switch";
pub const HANDLER_HELP: &str = "help";
pub const HANDLER_EXAMINE: &str = "examine";
pub const HANDLER_ATTACK: &str = "attack";
pub const HANDLER_FLEE: &str = "flee";
pub const HANDLER_PASS: &str = "pass";
pub const HANDLER_STATUS: &str = "status";
pub const HANDLER_INVENTORY: &str = "inventory";
pub const HANDLER_GET: &str = "get";
pub const HANDLER_DROP: &str = "drop";
pub const HANDLER_BALANCE: &str = "balance";
pub const HANDLER_SETROLE: &str = "setrole";
pub const HANDLER_TELEPORT: &str = "teleport";

/// A player-invocable command.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub help: &'static str,
    pub category: &'static str,
    pub handler: &'static str,
}

/// All built-in commands.
pub fn builtin_commands() -> Vec<Command> {
    macro_rules! cmd {
        ($name:literal, $aliases:expr, $help:literal, $cat:expr, $handler:expr) => {
            Command {
                name: $name,
                aliases: $aliases,
                help: $help,
                category: $cat,
                handler: $handler,
            }
        };
    }

    vec![
        // Movement
        cmd!("north", &["n"], "Move north", CATEGORY_MOVEMENT, HANDLER_MOVE),
        cmd!("south", &["s"], "Move south", CATEGORY_MOVEMENT, HANDLER_MOVE),
        cmd!("east", &["e"], "Move east", CATEGORY_MOVEMENT, HANDLER_MOVE),
        cmd!("west", &["w"], "Move west", CATEGORY_MOVEMENT, HANDLER_MOVE),
        cmd!("northeast", &["ne"], "Move northeast", CATEGORY_MOVEMENT, HANDLER_MOVE),
        cmd!("northwest", &["nw"], "Move northwest", CATEGORY_MOVEMENT, HANDLER_MOVE),
        cmd!("southeast", &["se"], "Move southeast", CATEGORY_MOVEMENT, HANDLER_MOVE),
        cmd!("southwest", &["sw"], "Move southwest", CATEGORY_MOVEMENT, HANDLER_MOVE),
        cmd!("up", &["u"], "Move up", CATEGORY_MOVEMENT, HANDLER_MOVE),
        cmd!("down", &["d"], "Move down", CATEGORY_MOVEMENT, HANDLER_MOVE),
        // World
        cmd!("look", &["l"], "Look around the current room", CATEGORY_WORLD, HANDLER_LOOK),
        cmd!("exits", &[], "List available exits", CATEGORY_WORLD, HANDLER_EXITS),
        cmd!("examine", &["ex"], "Examine someone in the room", CATEGORY_WORLD, HANDLER_EXAMINE),
        cmd!("inventory", &["inv", "i"], "Show pack contents and currency", CATEGORY_WORLD, HANDLER_INVENTORY),
        cmd!("get", &["take"], "Pick up an item from the floor", CATEGORY_WORLD, HANDLER_GET),
        cmd!("drop", &[], "Drop an item from your pack", CATEGORY_WORLD, HANDLER_DROP),
        cmd!("balance", &["bal"], "Show your currency", CATEGORY_WORLD, HANDLER_BALANCE),
        // Combat
        cmd!("attack", &["att", "kill"], "Attack a target", CATEGORY_COMBAT, HANDLER_ATTACK),
        cmd!("flee", &["run"], "Attempt to flee combat", CATEGORY_COMBAT, HANDLER_FLEE),
        cmd!("pass", &["p"], "Forfeit your action this round", CATEGORY_COMBAT, HANDLER_PASS),
        cmd!("status", &["cond"], "Show your active conditions", CATEGORY_COMBAT, HANDLER_STATUS),
        // Communication
        cmd!("say", &[], "Say something to the room", CATEGORY_COMMUNICATION, HANDLER_SAY),
        cmd!("emote", &["em"], "Perform an emote action", CATEGORY_COMMUNICATION, HANDLER_EMOTE),
        // System
        cmd!("who", &[], "List players in the room", CATEGORY_SYSTEM, HANDLER_WHO),
        cmd!("quit", &["exit"], "Disconnect from the game", CATEGORY_SYSTEM, HANDLER_QUIT),
        cmd!("switch", &[], "Return to character selection", CATEGORY_SYSTEM, HANDLER_SWITCH),
        cmd!("help", &["?"], "Show available commands", CATEGORY_SYSTEM, HANDLER_HELP),
        // Admin
        cmd!("setrole", &[], "Set a player's role (admin only)", CATEGORY_ADMIN, HANDLER_SETROLE),
        cmd!("teleport", &["tp"], "Teleport a player to a room (admin only)", CATEGORY_ADMIN, HANDLER_TELEPORT),
    ]
}

/// Lookup from command names and aliases to command definitions.
#[derive(Debug)]
pub struct Registry {
    commands: HashMap<&'static str, Command>,
    aliases: HashMap<&'static str, &'static str>,
}

impl Registry {
    /// Build a registry, rejecting name/alias collisions.
    pub fn new(cmds: Vec<Command>) -> anyhow::Result<Self> {
        let mut commands = HashMap::with_capacity(cmds.len());
        let mut aliases: HashMap<&'static str, &'static str> = HashMap::new();

        for cmd in cmds {
            if commands.contains_key(cmd.name) {
                bail!("duplicate command name: {:?}", cmd.name);
            }
            if aliases.contains_key(cmd.name) {
                bail!("command name {:?} conflicts with an existing alias", cmd.name);
            }
            for &alias in cmd.aliases {
                if commands.contains_key(alias) {
                    bail!("alias {:?} conflicts with a command name", alias);
                }
                if let Some(prior) = aliases.insert(alias, cmd.name) {
                    bail!("duplicate alias {:?}: used by {:?} and {:?}", alias, prior, cmd.name);
                }
            }
            commands.insert(cmd.name, cmd);
        }

        Ok(Self { commands, aliases })
    }

    pub fn builtin() -> anyhow::Result<Self> {
        Self::new(builtin_commands())
    }

    /// Look up a command by canonical name or alias.
    pub fn resolve(&self, input: &str) -> Option<&Command> {
        self.commands
            .get(input)
            .or_else(|| self.aliases.get(input).and_then(|c| self.commands.get(c)))
    }

    /// Commands grouped by category, sorted by name within each group.
    pub fn by_category(&self) -> HashMap<&'static str, Vec<&Command>> {
        let mut out: HashMap<&'static str, Vec<&Command>> = HashMap::new();
        for cmd in self.commands.values() {
            out.entry(cmd.category).or_default().push(cmd);
        }
        for group in out.values_mut() {
            group.sort_by_key(|c| c.name);
        }
        out
    }
}

/// A parsed input line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parsed {
    /// First word, lowercased. Empty for a blank line.
    pub command: String,
    /// Remaining whitespace-split words.
    pub args: Vec<String>,
    /// Raw text after the command word, trimmed (spacing inside preserved).
    pub raw_args: String,
}

/// Split a line into command word and arguments.
pub fn parse(line: &str) -> Parsed {
    let line = line.trim();
    if line.is_empty() {
        return Parsed::default();
    }
    let Some(space) = line.find(' ') else {
        return Parsed {
            command: line.to_ascii_lowercase(),
            ..Parsed::default()
        };
    };
    let rest = line[space + 1..].trim();
    Parsed {
        command: line[..space].to_ascii_lowercase(),
        args: rest.split_whitespace().map(str::to_string).collect(),
        raw_args: rest.to_string(),
    }
}
