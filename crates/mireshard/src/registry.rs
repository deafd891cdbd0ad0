//! Live player sessions and room presence.
//!
//! One lock guards both the player map and the room index, so every
//! mutation updates the two together. Invariant: the sum of room-set sizes
//! always equals the player count, under any interleaving of add, move,
//! and remove.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::inventory::Backpack;
use crate::queue::EventQueue;

/// Events buffered per player before producers start seeing `Full`.
const EVENT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("player {0:?} already connected")]
    AlreadyConnected(String),
    #[error("player {0:?} not found")]
    NotFound(String),
}

/// A connected player, as the shard sees them.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub uid: String,
    pub username: String,
    pub char_name: String,
    pub room_id: String,
    pub current_hp: i32,
    pub max_hp: i32,
    pub role: String,
    pub class: String,
    pub level: i32,
    pub backpack: Backpack,
    pub currency: i64,
    pub queue: Arc<EventQueue>,
}

/// Parameters for [`PlayerRegistry::add_player`].
#[derive(Debug, Clone)]
pub struct NewPlayer {
    pub uid: String,
    pub username: String,
    pub char_name: String,
    pub room_id: String,
    pub current_hp: i32,
    pub max_hp: i32,
    pub role: String,
    pub class: String,
    pub level: i32,
}

#[derive(Debug, Default)]
struct Inner {
    players: HashMap<String, PlayerSession>,
    rooms: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Default)]
pub struct PlayerRegistry {
    inner: RwLock<Inner>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player. Fails without touching any state if the uid is
    /// already connected; on success the player gets a default pack, zero
    /// currency, and a fresh event queue.
    pub async fn add_player(&self, new: NewPlayer) -> Result<PlayerSession, RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.players.contains_key(&new.uid) {
            return Err(RegistryError::AlreadyConnected(new.uid));
        }

        let sess = PlayerSession {
            uid: new.uid.clone(),
            username: new.username,
            char_name: new.char_name,
            room_id: new.room_id.clone(),
            current_hp: new.current_hp,
            max_hp: new.max_hp,
            role: new.role,
            class: new.class,
            level: new.level,
            backpack: Backpack::default(),
            currency: 0,
            queue: Arc::new(EventQueue::new(EVENT_QUEUE_CAPACITY)),
        };
        inner.players.insert(new.uid.clone(), sess.clone());
        inner.rooms.entry(new.room_id).or_default().insert(new.uid);
        Ok(sess)
    }

    /// Remove a player from both indexes and close their queue.
    pub async fn remove_player(&self, uid: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let sess = inner
            .players
            .remove(uid)
            .ok_or_else(|| RegistryError::NotFound(uid.to_string()))?;

        if let Some(set) = inner.rooms.get_mut(&sess.room_id) {
            set.remove(uid);
            if set.is_empty() {
                inner.rooms.remove(&sess.room_id);
            }
        }
        sess.queue.close();
        Ok(())
    }

    /// Move a player, updating the session and both room-index entries
    /// atomically. Returns the prior room id.
    pub async fn move_player(&self, uid: &str, new_room: &str) -> Result<String, RegistryError> {
        let mut inner = self.inner.write().await;
        let old_room = match inner.players.get_mut(uid) {
            Some(sess) => {
                let old = std::mem::replace(&mut sess.room_id, new_room.to_string());
                old
            }
            None => return Err(RegistryError::NotFound(uid.to_string())),
        };

        if let Some(set) = inner.rooms.get_mut(&old_room) {
            set.remove(uid);
            if set.is_empty() {
                inner.rooms.remove(&old_room);
            }
        }
        inner
            .rooms
            .entry(new_room.to_string())
            .or_default()
            .insert(uid.to_string());
        Ok(old_room)
    }

    /// Update a mutable field of a live session via a closure.
    pub async fn update_player<F>(&self, uid: &str, f: F) -> Result<PlayerSession, RegistryError>
    where
        F: FnOnce(&mut PlayerSession),
    {
        let mut inner = self.inner.write().await;
        let sess = inner
            .players
            .get_mut(uid)
            .ok_or_else(|| RegistryError::NotFound(uid.to_string()))?;
        f(sess);
        Ok(sess.clone())
    }

    /// Display names of everyone in a room; an immutable snapshot, sorted
    /// for stable output.
    pub async fn players_in_room(&self, room_id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let Some(uids) = inner.rooms.get(room_id) else {
            return Vec::new();
        };
        let mut names: Vec<String> = uids
            .iter()
            .filter_map(|uid| inner.players.get(uid).map(|s| s.char_name.clone()))
            .collect();
        names.sort();
        names
    }

    /// UIDs of everyone in a room (snapshot).
    pub async fn uids_in_room(&self, room_id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .rooms
            .get(room_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot lookup by uid.
    pub async fn get_player(&self, uid: &str) -> Option<PlayerSession> {
        self.inner.read().await.players.get(uid).cloned()
    }

    /// Snapshot lookup by display name.
    pub async fn get_by_char_name(&self, name: &str) -> Option<PlayerSession> {
        let inner = self.inner.read().await;
        inner
            .players
            .values()
            .find(|s| s.char_name == name)
            .cloned()
    }

    /// Snapshot lookup by account username.
    pub async fn get_by_username(&self, username: &str) -> Option<PlayerSession> {
        let inner = self.inner.read().await;
        inner
            .players
            .values()
            .find(|s| s.username == username)
            .cloned()
    }

    pub async fn player_count(&self) -> usize {
        self.inner.read().await.players.len()
    }

    /// Sum of room-set sizes; equals [`PlayerRegistry::player_count`] at
    /// all times.
    #[cfg(test)]
    pub async fn room_occupancy_total(&self) -> usize {
        self.inner.read().await.rooms.values().map(HashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_player(uid: &str, name: &str, room: &str) -> NewPlayer {
        NewPlayer {
            uid: uid.to_string(),
            username: format!("acct-{uid}"),
            char_name: name.to_string(),
            room_id: room.to_string(),
            current_hp: 10,
            max_hp: 10,
            role: "player".to_string(),
            class: "scavenger".to_string(),
            level: 1,
        }
    }

    #[tokio::test]
    async fn add_creates_defaults_and_indexes_the_room() {
        let reg = PlayerRegistry::new();
        let sess = reg.add_player(new_player("u1", "Wren", "r1")).await.unwrap();
        assert_eq!(sess.currency, 0);
        assert!(sess.backpack.items.is_empty());
        assert!(!sess.queue.is_closed());

        assert_eq!(reg.players_in_room("r1").await, vec!["Wren".to_string()]);
        assert_eq!(reg.player_count().await, 1);
        assert_eq!(reg.room_occupancy_total().await, 1);
    }

    #[tokio::test]
    async fn duplicate_add_fails_without_mutating_state() {
        let reg = PlayerRegistry::new();
        reg.add_player(new_player("u1", "Wren", "r1")).await.unwrap();

        let err = reg
            .add_player(new_player("u1", "Impostor", "r9"))
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyConnected("u1".to_string()));

        // The original is untouched and no phantom room entry appeared.
        let sess = reg.get_player("u1").await.unwrap();
        assert_eq!(sess.char_name, "Wren");
        assert_eq!(sess.room_id, "r1");
        assert!(reg.players_in_room("r9").await.is_empty());
        assert_eq!(reg.player_count().await, 1);
        assert_eq!(reg.room_occupancy_total().await, 1);
    }

    #[tokio::test]
    async fn move_updates_both_room_entries_and_returns_the_old_room() {
        let reg = PlayerRegistry::new();
        reg.add_player(new_player("u1", "Wren", "r1")).await.unwrap();
        reg.add_player(new_player("u2", "Brix", "r1")).await.unwrap();

        assert_eq!(
            reg.players_in_room("r1").await,
            vec!["Brix".to_string(), "Wren".to_string()]
        );

        let old = reg.move_player("u1", "r2").await.unwrap();
        assert_eq!(old, "r1");
        assert_eq!(reg.players_in_room("r1").await, vec!["Brix".to_string()]);
        assert_eq!(reg.players_in_room("r2").await, vec!["Wren".to_string()]);
        assert_eq!(reg.room_occupancy_total().await, reg.player_count().await);
    }

    #[tokio::test]
    async fn remove_cleans_both_indexes_and_closes_the_queue() {
        let reg = PlayerRegistry::new();
        let sess = reg.add_player(new_player("u1", "Wren", "r1")).await.unwrap();
        reg.remove_player("u1").await.unwrap();

        assert!(reg.get_player("u1").await.is_none());
        assert!(reg.players_in_room("r1").await.is_empty());
        assert!(sess.queue.is_closed());
        assert_eq!(
            reg.remove_player("u1").await.unwrap_err(),
            RegistryError::NotFound("u1".to_string())
        );
    }

    #[tokio::test]
    async fn move_of_unknown_player_fails() {
        let reg = PlayerRegistry::new();
        assert_eq!(
            reg.move_player("ghost", "r1").await.unwrap_err(),
            RegistryError::NotFound("ghost".to_string())
        );
    }

    #[tokio::test]
    async fn players_in_room_returns_a_snapshot() {
        let reg = PlayerRegistry::new();
        reg.add_player(new_player("u1", "Wren", "r1")).await.unwrap();
        let snapshot = reg.players_in_room("r1").await;
        reg.move_player("u1", "r2").await.unwrap();
        // The earlier snapshot is unaffected by the move.
        assert_eq!(snapshot, vec!["Wren".to_string()]);
    }

    /// The sum invariant under a concurrent storm of add/move/remove.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn occupancy_sum_equals_player_count_under_concurrency() {
        let reg = Arc::new(PlayerRegistry::new());
        let rooms = ["r1", "r2", "r3", "r4"];

        let mut handles = Vec::new();
        for worker in 0..8u32 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                for i in 0..50u32 {
                    let uid = format!("u{worker}-{i}");
                    let room = rooms[(i as usize) % rooms.len()];
                    reg.add_player(new_player(&uid, &uid, room)).await.unwrap();
                    for hop in 0..4 {
                        let to = rooms[(i as usize + hop) % rooms.len()];
                        reg.move_player(&uid, to).await.unwrap();
                    }
                    if i % 2 == 0 {
                        reg.remove_player(&uid).await.unwrap();
                    }
                }
            }));
        }
        // Concurrent readers exercising the snapshot paths meanwhile.
        for _ in 0..2 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let _ = reg.players_in_room("r1").await;
                    let _ = reg.player_count().await;
                    tokio::task::yield_now().await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(reg.player_count().await, 8 * 25);
        assert_eq!(reg.room_occupancy_total().await, reg.player_count().await);
    }

    #[tokio::test]
    async fn two_player_room_scenario() {
        let reg = PlayerRegistry::new();
        reg.add_player(new_player("u1", "alice", "r1")).await.unwrap();
        reg.add_player(new_player("u2", "bob", "r1")).await.unwrap();

        let mut names = reg.players_in_room("r1").await;
        names.sort();
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);

        reg.move_player("u2", "r2").await.unwrap();
        assert_eq!(reg.players_in_room("r1").await, vec!["alice".to_string()]);
        assert_eq!(reg.players_in_room("r2").await, vec!["bob".to_string()]);
    }
}
