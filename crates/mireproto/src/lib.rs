//! `mireproto`: the typed protocol spoken between the miremud front end and
//! the game shard.
//!
//! Every message is carried inside a `mireio::frame` length-prefixed frame.
//! One frame holds exactly one envelope: a [`ClientMessage`] (front end to
//! shard) or a [`ServerEvent`] (shard to front end). Envelopes are encoded
//! as internally-tagged JSON; the correlation id travels beside the payload
//! and is echoed back on direct replies. Broadcast events carry no
//! correlation id.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A request from the front end on behalf of one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    pub payload: Request,
}

/// One payload variant per command the front end can issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    JoinWorld {
        uid: String,
        username: String,
        character_name: String,
        current_hp: i32,
        max_hp: i32,
        role: String,
        class: String,
        level: i32,
    },
    Move { direction: String },
    Look,
    Exits,
    Say { message: String },
    Emote { action: String },
    Who,
    Quit,
    SwitchCharacter,
    Examine { target: String },
    Attack { target: String },
    Flee,
    Pass,
    Status,
    Inventory,
    GetItem { target: String },
    DropItem { target: String },
    Balance,
    SetRole { target_username: String, role: String },
    Teleport { target_character: String, room_id: String },
}

/// An event from the shard to one player's front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    pub payload: Event,
}

impl ServerEvent {
    /// An event with no correlation id (broadcasts).
    pub fn broadcast(payload: Event) -> Self {
        Self {
            request_id: String::new(),
            payload,
        }
    }

    /// A direct reply correlated to the triggering request.
    pub fn reply(request_id: impl Into<String>, payload: Event) -> Self {
        Self {
            request_id: request_id.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RoomView(RoomView),
    Message {
        from: String,
        kind: MessageKind,
        text: String,
    },
    RoomEvent {
        player: String,
        kind: RoomEventKind,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        direction: String,
    },
    PlayerList {
        players: Vec<String>,
    },
    ExitList {
        exits: Vec<ExitInfo>,
    },
    Error {
        message: String,
    },
    Combat {
        actor: String,
        target: String,
        text: String,
        damage: i32,
    },
    RoundStart {
        round: u32,
    },
    RoundEnd {
        round: u32,
    },
    NpcView {
        name: String,
        description: String,
        disposition: String,
    },
    /// An empty `condition_id` is the no-active-conditions sentinel.
    Condition {
        condition_id: String,
        name: String,
        remaining_rounds: u32,
    },
    InventoryView {
        items: Vec<ItemView>,
        currency: i64,
    },
    CharacterInfo {
        name: String,
        class: String,
        level: i32,
        current_hp: i32,
        max_hp: i32,
    },
    Disconnected {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomView {
    pub room_id: String,
    pub title: String,
    pub description: String,
    pub exits: Vec<ExitInfo>,
    pub players: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub direction: String,
    pub target_room_id: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
    pub id: String,
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Say,
    Emote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEventKind {
    Arrive,
    Depart,
}

#[derive(Debug)]
pub enum ProtoError {
    Decode(serde_json::Error),
    Encode(serde_json::Error),
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::Decode(e) => write!(f, "malformed envelope: {e}"),
            ProtoError::Encode(e) => write!(f, "unencodable envelope: {e}"),
        }
    }
}

impl std::error::Error for ProtoError {}

pub fn encode_message(msg: &ClientMessage) -> Result<Bytes, ProtoError> {
    serde_json::to_vec(msg).map(Bytes::from).map_err(ProtoError::Encode)
}

pub fn decode_message(payload: &[u8]) -> Result<ClientMessage, ProtoError> {
    serde_json::from_slice(payload).map_err(ProtoError::Decode)
}

pub fn encode_event(evt: &ServerEvent) -> Result<Bytes, ProtoError> {
    serde_json::to_vec(evt).map(Bytes::from).map_err(ProtoError::Encode)
}

pub fn decode_event(payload: &[u8]) -> Result<ServerEvent, ProtoError> {
    serde_json::from_slice(payload).map_err(ProtoError::Decode)
}
