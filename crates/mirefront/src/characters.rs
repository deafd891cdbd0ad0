//! Character selection and creation, run after a successful login.

use async_trait::async_trait;
use mireio::ansi;
use mireio::conn::TelnetConn;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::info;

use crate::auth::{Account, AuthHandler, StoreError};
use crate::bridge::BridgeOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub class: String,
    pub level: i32,
    pub current_hp: i32,
    pub max_hp: i32,
    /// Last known room id; empty means "wherever the shard starts you".
    #[serde(default)]
    pub location: String,
}

/// A playable class. The full ruleset lives with the shard; the front end
/// only needs enough to run creation.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub base_hp: i32,
}

pub fn default_classes() -> Vec<ClassDef> {
    vec![
        ClassDef {
            id: "scavenger",
            name: "Scavenger",
            description: "Quick hands, quicker exits.",
            base_hp: 12,
        },
        ClassDef {
            id: "warden",
            name: "Warden",
            description: "Holds the causeway when everyone else runs.",
            base_hp: 18,
        },
        ClassDef {
            id: "chirurgeon",
            name: "Chirurgeon",
            description: "Keeps the others breathing, for a price.",
            base_hp: 10,
        },
        ClassDef {
            id: "dowser",
            name: "Dowser",
            description: "Reads the water. The water reads back.",
            base_hp: 8,
        },
    ]
}

#[async_trait]
pub trait CharacterStore: Send + Sync {
    async fn list_by_account(&self, account_id: i64) -> Result<Vec<Character>, StoreError>;
    async fn create(&self, character: Character) -> Result<Character, StoreError>;
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> AuthHandler<S> {
    /// The selection/creation loop. Starts the bridge for the chosen
    /// character; a switch outcome comes back here.
    pub(crate) async fn character_flow(
        &self,
        conn: &mut TelnetConn<S>,
        acct: &Account,
        cancel: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        loop {
            let chars = self.characters.list_by_account(acct.id).await?;
            let w = conn.writer();

            let selected = if chars.is_empty() {
                w.write_line(&ansi::colorize(
                    ansi::BRIGHT_YELLOW,
                    "\r\nYou have no characters. Let's create one.",
                ))
                .await?;
                match self.creation_flow(conn, acct).await? {
                    Some(c) => c,
                    None => continue,
                }
            } else {
                w.write_line(&ansi::colorize(ansi::BRIGHT_WHITE, "\r\nYour characters:"))
                    .await?;
                for (i, c) in chars.iter().enumerate() {
                    w.write_line(&format!(
                        "  {}. {} - level {} {}",
                        i + 1,
                        ansi::colorize(ansi::BRIGHT_WHITE, &c.name),
                        c.level,
                        c.class,
                    ))
                    .await?;
                }
                w.write_line(&format!("  {}. Create a new character", chars.len() + 1))
                    .await?;
                w.write_line("  quit. Disconnect").await?;
                w.write_prompt(&format!("Select [1-{}]: ", chars.len() + 1)).await?;

                let line = match conn.read_line().await? {
                    Some(l) => l.trim().to_string(),
                    None => return Ok(()),
                };
                if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
                    w.write_line(&ansi::colorize(ansi::CYAN, "Goodbye.")).await?;
                    return Ok(());
                }
                match line.parse::<usize>() {
                    Ok(choice) if (1..=chars.len()).contains(&choice) => {
                        chars[choice - 1].clone()
                    }
                    Ok(choice) if choice == chars.len() + 1 => {
                        match self.creation_flow(conn, acct).await? {
                            Some(c) => c,
                            None => continue,
                        }
                    }
                    _ => {
                        w.write_line(&ansi::colorize(ansi::RED, "Invalid selection.")).await?;
                        continue;
                    }
                }
            };

            match self.bridge.run(conn, acct, &selected, cancel.clone()).await? {
                BridgeOutcome::Quit => return Ok(()),
                BridgeOutcome::SwitchCharacter => continue,
            }
        }
    }

    /// Guided character creation. Returns `None` if the player cancels at
    /// any step.
    async fn creation_flow(
        &self,
        conn: &mut TelnetConn<S>,
        acct: &Account,
    ) -> anyhow::Result<Option<Character>> {
        let w = conn.writer();
        w.write_line(&ansi::colorize(ansi::BRIGHT_CYAN, "\r\n=== Character Creation ==="))
            .await?;
        w.write_line("Type 'cancel' at any prompt to return to the character screen.")
            .await?;

        w.write_prompt("Enter your character's name: ").await?;
        let name = match conn.read_line().await? {
            Some(l) => l.trim().to_string(),
            None => return Ok(None),
        };
        if name.eq_ignore_ascii_case("cancel") {
            return Ok(None);
        }
        if name.len() < 2 || name.len() > 32 {
            w.write_line(&ansi::colorize(ansi::RED, "Name must be 2-32 characters.")).await?;
            return Ok(None);
        }

        w.write_line(&ansi::colorize(ansi::BRIGHT_YELLOW, "\r\nChoose your class:")).await?;
        for (i, class) in self.classes.iter().enumerate() {
            w.write_line(&format!(
                "  {}. {} (HP {})\r\n     {}",
                i + 1,
                ansi::colorize(ansi::BRIGHT_WHITE, class.name),
                class.base_hp,
                class.description,
            ))
            .await?;
        }
        w.write_prompt(&format!("Select class [1-{}]: ", self.classes.len())).await?;
        let line = match conn.read_line().await? {
            Some(l) => l.trim().to_string(),
            None => return Ok(None),
        };
        if line.eq_ignore_ascii_case("cancel") {
            return Ok(None);
        }
        let class = match line.parse::<usize>() {
            Ok(i) if (1..=self.classes.len()).contains(&i) => &self.classes[i - 1],
            _ => {
                w.write_line(&ansi::colorize(ansi::RED, "Invalid selection.")).await?;
                return Ok(None);
            }
        };

        w.write_line(&format!(
            "\r\n  Name:  {}\r\n  Class: {}\r\n  HP:    {}",
            name, class.name, class.base_hp
        ))
        .await?;
        w.write_prompt("Create this character? [y/N]: ").await?;
        let confirm = match conn.read_line().await? {
            Some(l) => l.trim().to_string(),
            None => return Ok(None),
        };
        if !confirm.eq_ignore_ascii_case("y") {
            w.write_line(&ansi::colorize(ansi::YELLOW, "Character creation cancelled."))
                .await?;
            return Ok(None);
        }

        let created = self
            .characters
            .create(Character {
                id: 0,
                account_id: acct.id,
                name: name.clone(),
                class: class.id.to_string(),
                level: 1,
                current_hp: class.base_hp,
                max_hp: class.base_hp,
                location: String::new(),
            })
            .await?;
        info!(name = %created.name, account = %acct.username, "character created");
        w.write_line(&ansi::colorize(
            ansi::BRIGHT_GREEN,
            &format!("Character {} created!", created.name),
        ))
        .await?;
        Ok(Some(created))
    }
}
