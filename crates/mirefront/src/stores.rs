//! Stock account/character store: in-memory with optional JSON persistence.
//!
//! The store traits are the real interface; this implementation exists so
//! the binary runs without external infrastructure. The file format is a
//! dev fixture, not a contract. Saves go through a temp file and rename.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::warn;

use crate::auth::{Account, AccountStore, StoreError, ROLE_PLAYER};
use crate::characters::{Character, CharacterStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRec {
    id: i64,
    username: String,
    password: String,
    #[serde(default)]
    role: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    accounts: Vec<AccountRec>,
    characters: Vec<Character>,
    next_account_id: i64,
    next_character_id: i64,
}

#[derive(Debug)]
pub struct MemoryStores {
    state: Mutex<State>,
    path: Option<PathBuf>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_account_id: 1,
                next_character_id: 1,
                ..State::default()
            }),
            path: None,
        }
    }

    /// Load from a JSON file, starting empty if it does not exist or does
    /// not parse. Mutations are written back to the same path.
    pub fn load(path: PathBuf) -> Self {
        let mut state = match std::fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str::<State>(&s) {
                Ok(st) => st,
                Err(e) => {
                    warn!(path = %path.display(), err = %e, "unreadable store file; starting empty");
                    State::default()
                }
            },
            Err(_) => State::default(),
        };
        state.next_account_id = state.next_account_id.max(1);
        state.next_character_id = state.next_character_id.max(1);
        Self {
            state: Mutex::new(state),
            path: Some(path),
        }
    }

    fn save(&self, state: &State) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let s = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, s)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Test helper: insert an account directly.
    #[cfg(test)]
    pub fn seed_account(&self, username: &str, password: &str, role: &str) -> Account {
        let mut state = self.state.lock().unwrap();
        let id = state.next_account_id;
        state.next_account_id += 1;
        state.accounts.push(AccountRec {
            id,
            username: username.to_string(),
            password: password.to_string(),
            role: role.to_string(),
        });
        Account {
            id,
            username: username.to_string(),
            role: role.to_string(),
        }
    }

    /// Test helper: insert a character directly.
    #[cfg(test)]
    pub fn seed_character(&self, mut character: Character) -> Character {
        let mut state = self.state.lock().unwrap();
        character.id = state.next_character_id;
        state.next_character_id += 1;
        state.characters.push(character.clone());
        character
    }
}

impl Default for MemoryStores {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryStores {
    async fn create(&self, username: &str, password: &str) -> Result<Account, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.accounts.iter().any(|a| a.username == username) {
            return Err(StoreError::AccountExists);
        }
        let id = state.next_account_id;
        state.next_account_id += 1;
        state.accounts.push(AccountRec {
            id,
            username: username.to_string(),
            password: password.to_string(),
            role: ROLE_PLAYER.to_string(),
        });
        self.save(&state).map_err(StoreError::Other)?;
        Ok(Account {
            id,
            username: username.to_string(),
            role: ROLE_PLAYER.to_string(),
        })
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<Account, StoreError> {
        let state = self.state.lock().unwrap();
        let rec = state
            .accounts
            .iter()
            .find(|a| a.username == username)
            .ok_or(StoreError::AccountNotFound)?;
        if rec.password != password {
            return Err(StoreError::InvalidCredentials);
        }
        let role = if rec.role.is_empty() {
            ROLE_PLAYER.to_string()
        } else {
            rec.role.clone()
        };
        Ok(Account {
            id: rec.id,
            username: rec.username.clone(),
            role,
        })
    }
}

#[async_trait]
impl CharacterStore for MemoryStores {
    async fn list_by_account(&self, account_id: i64) -> Result<Vec<Character>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .characters
            .iter()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn create(&self, mut character: Character) -> Result<Character, StoreError> {
        let mut state = self.state.lock().unwrap();
        character.id = state.next_character_id;
        state.next_character_id += 1;
        state.characters.push(character.clone());
        self.save(&state).map_err(StoreError::Other)?;
        Ok(character)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_authenticate() {
        let s = MemoryStores::new();
        let acct = AccountStore::create(&s, "alice", "secret").await.unwrap();
        assert_eq!(acct.role, ROLE_PLAYER);

        let back = s.authenticate("alice", "secret").await.unwrap();
        assert_eq!(back.id, acct.id);

        assert!(matches!(
            s.authenticate("alice", "wrong").await,
            Err(StoreError::InvalidCredentials)
        ));
        assert!(matches!(
            s.authenticate("bob", "secret").await,
            Err(StoreError::AccountNotFound)
        ));
    }

    #[tokio::test]
    async fn duplicate_usernames_are_rejected() {
        let s = MemoryStores::new();
        AccountStore::create(&s, "alice", "secret").await.unwrap();
        assert!(matches!(
            AccountStore::create(&s, "alice", "other").await,
            Err(StoreError::AccountExists)
        ));
    }

    #[tokio::test]
    async fn characters_are_scoped_to_their_account() {
        let s = MemoryStores::new();
        let a1 = AccountStore::create(&s, "alice", "secret").await.unwrap();
        let a2 = AccountStore::create(&s, "bob", "secret").await.unwrap();
        CharacterStore::create(
            &s,
            Character {
                id: 0,
                account_id: a1.id,
                name: "Wren".into(),
                class: "scavenger".into(),
                level: 1,
                current_hp: 12,
                max_hp: 12,
                location: String::new(),
            },
        )
        .await
        .unwrap();

        assert_eq!(s.list_by_account(a1.id).await.unwrap().len(), 1);
        assert!(s.list_by_account(a2.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persists_and_reloads_from_disk() {
        let dir = std::env::temp_dir().join(format!("miremud-store-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("accounts.json");
        let _ = std::fs::remove_file(&path);

        {
            let s = MemoryStores::load(path.clone());
            AccountStore::create(&s, "alice", "secret").await.unwrap();
        }
        let s = MemoryStores::load(path.clone());
        assert!(s.authenticate("alice", "secret").await.is_ok());
        let _ = std::fs::remove_file(&path);
    }
}
