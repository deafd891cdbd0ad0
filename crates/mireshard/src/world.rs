//! The room graph.
//!
//! Rooms, exits, and resident NPC descriptions. A compiled-in default world
//! keeps the shard self-contained; `WorldMap::from_json_file` is the narrow
//! loading interface for real content.

use std::collections::HashMap;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Exit {
    pub direction: String,
    pub to: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Npc {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub hostile: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Room {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub exits: Vec<Exit>,
    #[serde(default)]
    pub npcs: Vec<Npc>,
}

impl Room {
    pub fn visible_exits(&self) -> impl Iterator<Item = &Exit> {
        self.exits.iter().filter(|e| !e.hidden)
    }
}

#[derive(Debug, Deserialize)]
struct WorldFile {
    start_room: String,
    rooms: Vec<Room>,
}

#[derive(Debug)]
pub struct WorldMap {
    rooms: HashMap<String, Room>,
    start_room: String,
}

impl WorldMap {
    pub fn new(rooms: Vec<Room>, start_room: impl Into<String>) -> anyhow::Result<Self> {
        let start_room = start_room.into();
        let map: HashMap<String, Room> =
            rooms.into_iter().map(|r| (r.id.clone(), r)).collect();
        anyhow::ensure!(
            map.contains_key(&start_room),
            "start room {start_room:?} is not in the world"
        );
        Ok(Self {
            rooms: map,
            start_room,
        })
    }

    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading world file {}", path.display()))?;
        let f: WorldFile = serde_json::from_str(&s)
            .with_context(|| format!("parsing world file {}", path.display()))?;
        Self::new(f.rooms, f.start_room)
    }

    /// The compiled-in default world.
    pub fn builtin() -> Self {
        let rooms = vec![
            Room {
                id: "causeway".into(),
                title: "The Sunken Causeway".into(),
                description: "Flagstones vanish under brown water a dozen paces out. \
                              Rope bridges sag between the drowned lamp posts."
                    .into(),
                exits: vec![
                    Exit {
                        direction: "north".into(),
                        to: "stilt-market".into(),
                        locked: false,
                        hidden: false,
                    },
                    Exit {
                        direction: "east".into(),
                        to: "pump-house".into(),
                        locked: false,
                        hidden: false,
                    },
                ],
                npcs: vec![Npc {
                    name: "ferry keeper".into(),
                    description: "An old woman poling a raft of lashed barrels. \
                                  She watches the water, not you."
                        .into(),
                    hostile: false,
                }],
            },
            Room {
                id: "stilt-market".into(),
                title: "Stilt Market".into(),
                description: "Stalls on bowed pilings sell eels, lamp oil, and rumors. \
                              Everything smells of silt."
                    .into(),
                exits: vec![
                    Exit {
                        direction: "south".into(),
                        to: "causeway".into(),
                        locked: false,
                        hidden: false,
                    },
                    Exit {
                        direction: "ladder".into(),
                        to: "watch-roost".into(),
                        locked: false,
                        hidden: false,
                    },
                ],
                npcs: vec![],
            },
            Room {
                id: "pump-house".into(),
                title: "The Dead Pump House".into(),
                description: "Rusted impellers the size of carts. Something below the \
                              grating breathes wetly."
                    .into(),
                exits: vec![
                    Exit {
                        direction: "west".into(),
                        to: "causeway".into(),
                        locked: false,
                        hidden: false,
                    },
                    Exit {
                        direction: "down".into(),
                        to: "undercroft".into(),
                        locked: false,
                        hidden: true,
                    },
                ],
                npcs: vec![Npc {
                    name: "sump lurker".into(),
                    description: "Pale eyes under the grate. It has been waiting longer \
                                  than you have been alive."
                        .into(),
                    hostile: true,
                }],
            },
            Room {
                id: "watch-roost".into(),
                title: "Watch Roost".into(),
                description: "A crow's nest of salvaged timber above the market. From \
                              here the flood looks almost calm."
                    .into(),
                exits: vec![Exit {
                    direction: "down".into(),
                    to: "stilt-market".into(),
                    locked: false,
                    hidden: false,
                }],
                npcs: vec![],
            },
            Room {
                id: "undercroft".into(),
                title: "The Undercroft".into(),
                description: "Black water to the waist. Arches recede past lantern \
                              range in every direction."
                    .into(),
                exits: vec![Exit {
                    direction: "up".into(),
                    to: "pump-house".into(),
                    locked: false,
                    hidden: false,
                }],
                npcs: vec![],
            },
        ];
        Self::new(rooms, "causeway").expect("builtin world is well-formed")
    }

    pub fn start_room(&self) -> &Room {
        &self.rooms[&self.start_room]
    }

    pub fn get_room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    /// Follow an exit by name from the given room.
    pub fn navigate(&self, from: &str, direction: &str) -> Result<&Room, NavigateError> {
        let room = self.rooms.get(from).ok_or(NavigateError::NoSuchRoom)?;
        let exit = room
            .exits
            .iter()
            .find(|e| e.direction.eq_ignore_ascii_case(direction))
            .ok_or(NavigateError::NoExit)?;
        if exit.locked {
            return Err(NavigateError::Locked);
        }
        self.rooms.get(&exit.to).ok_or(NavigateError::NoSuchRoom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NavigateError {
    #[error("you can't go that way")]
    NoExit,
    #[error("that way is barred")]
    Locked,
    #[error("the way leads nowhere")]
    NoSuchRoom,
}
