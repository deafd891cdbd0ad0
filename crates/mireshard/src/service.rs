//! The session stream service.
//!
//! One TCP connection per in-world player, carrying frames of
//! `mireproto` envelopes. Flow per connection:
//!
//! 1. first frame must be a join request,
//! 2. the player is registered and placed in the start room,
//! 3. a drain task becomes the sole writer, consuming the player's event
//!    queue in FIFO order,
//! 4. the command loop dispatches requests until quit/disconnect,
//! 5. teardown removes the player and announces the departure.
//!
//! Direct replies and room broadcasts both travel through the per-player
//! queue, so frames never interleave on the socket.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use mireio::frame::{FrameReader, FrameWriter};
use mireproto::{
    decode_message, encode_event, Event, ExitInfo, ItemView, MessageKind, Request, RoomEventKind,
    RoomView, ServerEvent,
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::combat::{CombatHandler, SparCombat};
use crate::inventory::FloorItems;
use crate::registry::{NewPlayer, PlayerRegistry, PlayerSession};
use crate::world::{Room, WorldMap};

pub const ROLE_ADMIN: &str = "admin";

pub struct ShardServer {
    world: WorldMap,
    pub registry: PlayerRegistry,
    floors: Mutex<FloorItems>,
    combat: Box<dyn CombatHandler>,
    rounds: AtomicU32,
}

/// What a dispatched request produced: a reply event, a session-ending
/// reply, or a user-facing validation failure.
enum Dispatch {
    Reply(Event),
    End(Event),
    Fail(String),
}

impl ShardServer {
    pub fn new(world: WorldMap) -> Arc<Self> {
        let server = Self {
            world,
            registry: PlayerRegistry::new(),
            floors: Mutex::new(FloorItems::default()),
            combat: Box::new(SparCombat),
            rounds: AtomicU32::new(0),
        };
        // A little salvage near the spawn so get/drop work out of the box.
        {
            let start = server.world.start_room().id.clone();
            let mut floors = server.floors.lock().unwrap();
            floors.drop_item(&start, "scrap", "Scrap Iron");
            floors.drop_item(&start, "lamp-oil", "Lamp Oil");
        }
        Arc::new(server)
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr().context("resolving bound address")?;
        info!(addr = %addr, "shard listening");
        loop {
            let (stream, peer) = listener.accept().await.context("accepting session stream")?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_stream(stream).await {
                    debug!(peer = %peer, err = %e, "session stream ended");
                }
            });
        }
    }

    async fn handle_stream(self: Arc<Self>, stream: tokio::net::TcpStream) -> anyhow::Result<()> {
        let (rd, wr) = stream.into_split();
        let mut fr = FrameReader::new(rd);
        let mut fw = FrameWriter::new(wr);

        // The handshake: exactly one join request first.
        let Some(frame) = fr.read_frame().await.context("reading join frame")? else {
            return Ok(());
        };
        let join = decode_message(&frame).map_err(anyhow::Error::from)?;
        let Request::JoinWorld {
            uid,
            username,
            character_name,
            current_hp,
            max_hp,
            role,
            class,
            level,
        } = join.payload
        else {
            anyhow::bail!("first message must be join_world");
        };

        let start = self.world.start_room();
        let sess = match self
            .registry
            .add_player(NewPlayer {
                uid: uid.clone(),
                username,
                char_name: character_name.clone(),
                room_id: start.id.clone(),
                current_hp,
                max_hp: if max_hp > 0 { max_hp } else { current_hp },
                role,
                class,
                level,
            })
            .await
        {
            Ok(s) => s,
            Err(e) => {
                // No queue exists yet, so this reply goes out directly.
                let evt = ServerEvent::reply(join.request_id, Event::Error {
                    message: e.to_string(),
                });
                let _ = fw
                    .write_frame(&encode_event(&evt).map_err(anyhow::Error::from)?)
                    .await;
                anyhow::bail!("join rejected: {e}");
            }
        };
        info!(uid = %uid, name = %character_name, room = %start.id, "player joined");

        // Sole writer for this connection: drain the queue to the socket.
        let mut rx = sess
            .queue
            .take_consumer()
            .expect("fresh queue has its consumer");
        let drain = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if fw.write_frame(&frame).await.is_err() {
                    break;
                }
            }
        });

        // The join acknowledgement and the character snapshot go into the
        // queue first, ahead of any broadcast that might race the join.
        let view = self.room_view(&uid, start).await;
        self.push_to(&sess, ServerEvent::reply(join.request_id, Event::RoomView(view)));
        self.push_to(
            &sess,
            ServerEvent::broadcast(Event::CharacterInfo {
                name: sess.char_name.clone(),
                class: sess.class.clone(),
                level: sess.level,
                current_hp: sess.current_hp,
                max_hp: sess.max_hp,
            }),
        );

        self.broadcast_room(
            &start.id,
            Some(&uid),
            Event::RoomEvent {
                player: character_name.clone(),
                kind: RoomEventKind::Arrive,
                direction: String::new(),
            },
        )
        .await;

        // Command loop.
        loop {
            let frame = match fr.read_frame().await {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(e) => {
                    debug!(uid = %uid, err = %e, "stream read failed");
                    break;
                }
            };
            let msg = match decode_message(&frame) {
                Ok(m) => m,
                Err(e) => {
                    warn!(uid = %uid, err = %e, "bad client message");
                    continue;
                }
            };

            let request_id = msg.request_id.clone();
            match self.dispatch(&uid, msg.payload).await {
                Dispatch::Reply(evt) => {
                    self.push_uid(&uid, ServerEvent::reply(request_id, evt)).await;
                }
                Dispatch::End(evt) => {
                    self.push_uid(&uid, ServerEvent::reply(request_id, evt)).await;
                    break;
                }
                Dispatch::Fail(message) => {
                    self.push_uid(&uid, ServerEvent::reply(request_id, Event::Error { message }))
                        .await;
                }
            }
        }

        // Teardown: announce, unregister (closing the queue), and let the
        // drain task flush what is buffered.
        if let Some(sess) = self.registry.get_player(&uid).await {
            let room = sess.room_id.clone();
            if let Err(e) = self.registry.remove_player(&uid).await {
                warn!(uid = %uid, err = %e, "removing player");
            }
            self.broadcast_room(
                &room,
                None,
                Event::RoomEvent {
                    player: sess.char_name.clone(),
                    kind: RoomEventKind::Depart,
                    direction: String::new(),
                },
            )
            .await;
            info!(uid = %uid, name = %sess.char_name, "player left");
        }
        let _ = drain.await;
        Ok(())
    }

    async fn dispatch(&self, uid: &str, req: Request) -> Dispatch {
        match req {
            Request::JoinWorld { .. } => Dispatch::Fail("already joined".to_string()),
            Request::Move { direction } => self.handle_move(uid, &direction).await,
            Request::Look => self.handle_look(uid).await,
            Request::Exits => self.handle_exits(uid).await,
            Request::Say { message } => {
                self.handle_chat(uid, MessageKind::Say, message).await
            }
            Request::Emote { action } => {
                self.handle_chat(uid, MessageKind::Emote, action).await
            }
            Request::Who => self.handle_who(uid).await,
            Request::Quit => self.handle_quit(uid).await,
            Request::SwitchCharacter => Dispatch::End(Event::Disconnected {
                reason: "switching characters".to_string(),
            }),
            Request::Examine { target } => self.handle_examine(uid, &target).await,
            Request::Attack { target } => self.handle_attack(uid, &target).await,
            Request::Flee => self.handle_flee_or_pass(uid, true).await,
            Request::Pass => self.handle_flee_or_pass(uid, false).await,
            Request::Status => Dispatch::Reply(Event::Condition {
                condition_id: String::new(),
                name: String::new(),
                remaining_rounds: 0,
            }),
            Request::Inventory | Request::Balance => self.handle_inventory(uid).await,
            Request::GetItem { target } => self.handle_get(uid, &target).await,
            Request::DropItem { target } => self.handle_drop(uid, &target).await,
            Request::SetRole {
                target_username,
                role,
            } => self.handle_setrole(uid, &target_username, &role).await,
            Request::Teleport {
                target_character,
                room_id,
            } => self.handle_teleport(uid, &target_character, &room_id).await,
        }
    }

    async fn handle_move(&self, uid: &str, direction: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        let dest = match self.world.navigate(&sess.room_id, direction) {
            Ok(room) => room,
            Err(e) => return Dispatch::Fail(e.to_string()),
        };

        let old_room = match self.registry.move_player(uid, &dest.id).await {
            Ok(r) => r,
            Err(e) => return Dispatch::Fail(e.to_string()),
        };

        self.broadcast_room(
            &old_room,
            Some(uid),
            Event::RoomEvent {
                player: sess.char_name.clone(),
                kind: RoomEventKind::Depart,
                direction: direction.to_string(),
            },
        )
        .await;
        self.broadcast_room(
            &dest.id,
            Some(uid),
            Event::RoomEvent {
                player: sess.char_name.clone(),
                kind: RoomEventKind::Arrive,
                direction: String::new(),
            },
        )
        .await;

        Dispatch::Reply(Event::RoomView(self.room_view(uid, dest).await))
    }

    async fn handle_look(&self, uid: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        let Some(room) = self.world.get_room(&sess.room_id) else {
            return Dispatch::Fail(format!("room {:?} not found", sess.room_id));
        };
        Dispatch::Reply(Event::RoomView(self.room_view(uid, room).await))
    }

    async fn handle_exits(&self, uid: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        let Some(room) = self.world.get_room(&sess.room_id) else {
            return Dispatch::Fail(format!("room {:?} not found", sess.room_id));
        };
        let exits = room
            .visible_exits()
            .map(|e| ExitInfo {
                direction: e.direction.clone(),
                target_room_id: e.to.clone(),
                locked: e.locked,
                hidden: e.hidden,
            })
            .collect();
        Dispatch::Reply(Event::ExitList { exits })
    }

    async fn handle_chat(&self, uid: &str, kind: MessageKind, text: String) -> Dispatch {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Dispatch::Fail("Say what?".to_string());
        }
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        let evt = Event::Message {
            from: sess.char_name.clone(),
            kind,
            text,
        };
        self.broadcast_room(&sess.room_id, Some(uid), evt.clone()).await;
        Dispatch::Reply(evt)
    }

    async fn handle_who(&self, uid: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        Dispatch::Reply(Event::PlayerList {
            players: self.registry.players_in_room(&sess.room_id).await,
        })
    }

    async fn handle_quit(&self, uid: &str) -> Dispatch {
        let reason = match self.registry.get_player(uid).await {
            Some(sess) => format!("{} has quit", sess.char_name),
            None => "Goodbye".to_string(),
        };
        Dispatch::End(Event::Disconnected { reason })
    }

    async fn handle_examine(&self, uid: &str, target: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        let Some(room) = self.world.get_room(&sess.room_id) else {
            return Dispatch::Fail(format!("room {:?} not found", sess.room_id));
        };
        let wanted = target.to_ascii_lowercase();
        if let Some(npc) = room
            .npcs
            .iter()
            .find(|n| n.name.to_ascii_lowercase().contains(&wanted))
        {
            return Dispatch::Reply(Event::NpcView {
                name: npc.name.clone(),
                description: npc.description.clone(),
                disposition: if npc.hostile { "hostile" } else { "indifferent" }.to_string(),
            });
        }
        Dispatch::Fail(format!("You see no {target} here."))
    }

    async fn handle_attack(&self, uid: &str, target: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        let Some(room) = self.world.get_room(&sess.room_id) else {
            return Dispatch::Fail(format!("room {:?} not found", sess.room_id));
        };
        let wanted = target.to_ascii_lowercase();
        let Some(npc) = room
            .npcs
            .iter()
            .find(|n| n.name.to_ascii_lowercase().contains(&wanted))
        else {
            return Dispatch::Fail(format!("You see no {target} here."));
        };
        if !npc.hostile {
            return Dispatch::Fail(format!("The {} wants no part of your fight.", npc.name));
        }

        let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;
        let mut events = self.combat.attack(&sess.char_name, npc, round);
        if events.is_empty() {
            return Dispatch::Fail("Nothing happens.".to_string());
        }
        let reply = events.remove(0);
        for evt in events {
            self.broadcast_room(&sess.room_id, Some(uid), evt).await;
        }
        Dispatch::Reply(reply)
    }

    async fn handle_flee_or_pass(&self, uid: &str, flee: bool) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        let round = self.rounds.load(Ordering::Relaxed).max(1);
        let mut events = if flee {
            self.combat.flee(&sess.char_name, round)
        } else {
            self.combat.pass(&sess.char_name, round)
        };
        if events.is_empty() {
            return Dispatch::Fail("Nothing happens.".to_string());
        }
        let reply = events.remove(0);
        for evt in events {
            self.broadcast_room(&sess.room_id, Some(uid), evt).await;
        }
        Dispatch::Reply(reply)
    }

    async fn handle_inventory(&self, uid: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        Dispatch::Reply(inventory_view(&sess))
    }

    async fn handle_get(&self, uid: &str, target: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        let taken = {
            let mut floors = self.floors.lock().unwrap();
            floors.take(&sess.room_id, target)
        };
        let Some(item) = taken else {
            return Dispatch::Fail(format!("There is no {target} here."));
        };

        let mut add_err = None;
        let updated = self
            .registry
            .update_player(uid, |s| {
                if let Err(e) = s.backpack.add(&item.id, &item.name) {
                    add_err = Some(e);
                }
            })
            .await;
        if let Some(e) = add_err {
            // Put it back where it was.
            let mut floors = self.floors.lock().unwrap();
            floors.drop_item(&sess.room_id, &item.id, &item.name);
            return Dispatch::Fail(e.to_string());
        }
        match updated {
            Ok(sess) => Dispatch::Reply(inventory_view(&sess)),
            Err(e) => Dispatch::Fail(e.to_string()),
        }
    }

    async fn handle_drop(&self, uid: &str, target: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        let mut dropped: Option<(String, String)> = None;
        let updated = self
            .registry
            .update_player(uid, |s| {
                // Resolve against the live pack, not the snapshot.
                if let Some(idx) = s
                    .backpack
                    .items
                    .iter()
                    .position(|i| i.id == target || i.name.eq_ignore_ascii_case(target))
                {
                    let id = s.backpack.items[idx].id.clone();
                    if let Some(name) = s.backpack.remove(&id) {
                        dropped = Some((id, name));
                    }
                }
            })
            .await;
        let Some((id, name)) = dropped else {
            return Dispatch::Fail(format!("You aren't carrying {target}."));
        };
        {
            let mut floors = self.floors.lock().unwrap();
            floors.drop_item(&sess.room_id, &id, &name);
        }
        match updated {
            Ok(sess) => Dispatch::Reply(inventory_view(&sess)),
            Err(e) => Dispatch::Fail(e.to_string()),
        }
    }

    async fn handle_setrole(&self, uid: &str, target_username: &str, role: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        if sess.role != ROLE_ADMIN {
            return Dispatch::Fail("You do not have permission to do that.".to_string());
        }
        let role = role.to_ascii_lowercase();
        if !matches!(role.as_str(), "player" | "editor" | "admin") {
            return Dispatch::Fail(format!("Unknown role {role:?}."));
        }
        let Some(target) = self.registry.get_by_username(target_username).await else {
            return Dispatch::Fail(format!("No connected player for account {target_username:?}."));
        };
        match self
            .registry
            .update_player(&target.uid, |s| s.role = role.clone())
            .await
        {
            Ok(updated) => Dispatch::Reply(Event::CharacterInfo {
                name: updated.char_name.clone(),
                class: updated.class.clone(),
                level: updated.level,
                current_hp: updated.current_hp,
                max_hp: updated.max_hp,
            }),
            Err(e) => Dispatch::Fail(e.to_string()),
        }
    }

    async fn handle_teleport(&self, uid: &str, target_character: &str, room_id: &str) -> Dispatch {
        let Some(sess) = self.registry.get_player(uid).await else {
            return Dispatch::Fail(format!("player {uid:?} not found"));
        };
        if sess.role != ROLE_ADMIN {
            return Dispatch::Fail("You do not have permission to do that.".to_string());
        }
        let Some(dest) = self.world.get_room(room_id) else {
            return Dispatch::Fail(format!("No such room {room_id:?}."));
        };
        let Some(target) = self.registry.get_by_char_name(target_character).await else {
            return Dispatch::Fail(format!("No such character {target_character:?}."));
        };

        let old_room = match self.registry.move_player(&target.uid, &dest.id).await {
            Ok(r) => r,
            Err(e) => return Dispatch::Fail(e.to_string()),
        };
        self.broadcast_room(
            &old_room,
            Some(&target.uid),
            Event::RoomEvent {
                player: target.char_name.clone(),
                kind: RoomEventKind::Depart,
                direction: String::new(),
            },
        )
        .await;
        self.broadcast_room(
            &dest.id,
            Some(&target.uid),
            Event::RoomEvent {
                player: target.char_name.clone(),
                kind: RoomEventKind::Arrive,
                direction: String::new(),
            },
        )
        .await;
        // The moved player sees their new surroundings.
        let view = self.room_view(&target.uid, dest).await;
        self.push_uid(&target.uid, ServerEvent::broadcast(Event::RoomView(view)))
            .await;

        Dispatch::Reply(Event::Message {
            from: sess.char_name.clone(),
            kind: MessageKind::Emote,
            text: format!("teleports {} to {}.", target.char_name, dest.id),
        })
    }

    /// Build a room view excluding the viewer from the player list.
    async fn room_view(&self, uid: &str, room: &Room) -> RoomView {
        let me = self.registry.get_player(uid).await.map(|s| s.char_name);
        let players = self
            .registry
            .players_in_room(&room.id)
            .await
            .into_iter()
            .filter(|name| Some(name) != me.as_ref())
            .collect();
        RoomView {
            room_id: room.id.clone(),
            title: room.title.clone(),
            description: room.description.clone(),
            exits: room
                .visible_exits()
                .map(|e| ExitInfo {
                    direction: e.direction.clone(),
                    target_room_id: e.to.clone(),
                    locked: e.locked,
                    hidden: e.hidden,
                })
                .collect(),
            players,
        }
    }

    /// Push an event to everyone in a room, optionally excluding one uid.
    async fn broadcast_room(&self, room_id: &str, exclude_uid: Option<&str>, evt: Event) {
        let event = ServerEvent::broadcast(evt);
        let frame = match encode_event(&event) {
            Ok(f) => f,
            Err(e) => {
                warn!(err = %e, "encoding broadcast event");
                return;
            }
        };
        for uid in self.registry.uids_in_room(room_id).await {
            if Some(uid.as_str()) == exclude_uid {
                continue;
            }
            let Some(sess) = self.registry.get_player(&uid).await else {
                continue;
            };
            if let Err(e) = sess.queue.push(frame.clone()) {
                // Fail-the-push policy: the event is lost for this player
                // and the producer moves on.
                warn!(uid = %uid, err = %e, "push to player queue failed");
            }
        }
    }

    fn push_to(&self, sess: &PlayerSession, event: ServerEvent) {
        match encode_event(&event) {
            Ok(frame) => {
                if let Err(e) = sess.queue.push(frame) {
                    warn!(uid = %sess.uid, err = %e, "push to player queue failed");
                }
            }
            Err(e) => warn!(err = %e, "encoding event"),
        }
    }

    async fn push_uid(&self, uid: &str, event: ServerEvent) {
        if let Some(sess) = self.registry.get_player(uid).await {
            self.push_to(&sess, event);
        }
    }
}

fn inventory_view(sess: &PlayerSession) -> Event {
    Event::InventoryView {
        items: sess
            .backpack
            .items
            .iter()
            .map(|s| ItemView {
                id: s.id.clone(),
                name: s.name.clone(),
                quantity: s.quantity,
            })
            .collect(),
        currency: sess.currency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mireproto::{decode_event, encode_message, ClientMessage};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpStream;
    use tokio::time::{timeout, Duration};

    struct Client {
        fr: FrameReader<OwnedReadHalf>,
        fw: FrameWriter<OwnedWriteHalf>,
        counter: u64,
    }

    impl Client {
        async fn connect(addr: std::net::SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (rd, wr) = stream.into_split();
            Self {
                fr: FrameReader::new(rd),
                fw: FrameWriter::new(wr),
                counter: 0,
            }
        }

        async fn join(addr: std::net::SocketAddr, uid: &str, name: &str, role: &str) -> Self {
            let mut c = Self::connect(addr).await;
            c.send_raw("join", Request::JoinWorld {
                uid: uid.into(),
                username: format!("acct-{uid}"),
                character_name: name.into(),
                current_hp: 10,
                max_hp: 10,
                role: role.into(),
                class: "scavenger".into(),
                level: 1,
            })
            .await;
            // Join ack then the character snapshot.
            let ack = c.recv().await;
            assert!(matches!(ack.payload, Event::RoomView(_)), "bad ack: {ack:?}");
            let info = c.recv().await;
            assert!(matches!(info.payload, Event::CharacterInfo { .. }));
            c
        }

        async fn send_raw(&mut self, request_id: &str, payload: Request) {
            let msg = ClientMessage {
                request_id: request_id.to_string(),
                payload,
            };
            self.fw
                .write_frame(&encode_message(&msg).unwrap())
                .await
                .unwrap();
        }

        async fn send(&mut self, payload: Request) -> String {
            self.counter += 1;
            let id = format!("req-{}", self.counter);
            self.send_raw(&id, payload).await;
            id
        }

        async fn recv(&mut self) -> ServerEvent {
            let frame = timeout(Duration::from_secs(5), self.fr.read_frame())
                .await
                .expect("timed out waiting for event")
                .unwrap()
                .expect("stream closed");
            decode_event(&frame).unwrap()
        }

        /// Receive events until one matches; panics after a few misses.
        async fn recv_until(&mut self, want: impl Fn(&Event) -> bool) -> ServerEvent {
            for _ in 0..10 {
                let evt = self.recv().await;
                if want(&evt.payload) {
                    return evt;
                }
            }
            panic!("expected event never arrived");
        }
    }

    async fn start_shard() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ShardServer::new(WorldMap::builtin());
        tokio::spawn(server.run(listener));
        addr
    }

    #[tokio::test]
    async fn join_look_say_who_quit() {
        let addr = start_shard().await;
        let mut c = Client::join(addr, "u1", "Wren", "player").await;

        let id = c.send(Request::Look).await;
        let evt = c.recv().await;
        assert_eq!(evt.request_id, id);
        let Event::RoomView(view) = evt.payload else {
            panic!("expected room view, got {evt:?}");
        };
        assert_eq!(view.room_id, "causeway");
        assert!(view.players.is_empty(), "viewer must be excluded");

        c.send(Request::Say {
            message: "hello".into(),
        })
        .await;
        let evt = c.recv().await;
        assert!(matches!(
            evt.payload,
            Event::Message { ref from, ref text, .. } if from == "Wren" && text == "hello"
        ));

        c.send(Request::Who).await;
        let evt = c.recv().await;
        assert!(matches!(
            evt.payload,
            Event::PlayerList { ref players } if players == &vec!["Wren".to_string()]
        ));

        c.send(Request::Quit).await;
        let evt = c.recv().await;
        assert!(matches!(
            evt.payload,
            Event::Disconnected { ref reason } if reason == "Wren has quit"
        ));
    }

    #[tokio::test]
    async fn movement_and_invalid_exits() {
        let addr = start_shard().await;
        let mut c = Client::join(addr, "u1", "Wren", "player").await;

        let id = c.send(Request::Move {
            direction: "north".into(),
        })
        .await;
        let evt = c.recv().await;
        assert_eq!(evt.request_id, id);
        assert!(matches!(
            evt.payload,
            Event::RoomView(ref v) if v.room_id == "stilt-market"
        ));

        // A speculative custom-exit move the world rejects.
        c.send(Request::Move {
            direction: "volcano".into(),
        })
        .await;
        let evt = c.recv().await;
        assert!(matches!(
            evt.payload,
            Event::Error { ref message } if message.contains("can't go that way")
        ));
    }

    #[tokio::test]
    async fn chat_broadcasts_to_the_room_but_not_the_speaker_twice() {
        let addr = start_shard().await;
        let mut a = Client::join(addr, "u1", "alice", "player").await;
        let mut b = Client::join(addr, "u2", "bob", "player").await;

        // alice sees bob arrive.
        a.recv_until(|e| {
            matches!(e, Event::RoomEvent { player, kind: RoomEventKind::Arrive, .. } if player == "bob")
        })
        .await;

        a.send(Request::Say {
            message: "anyone there?".into(),
        })
        .await;

        let to_b = b
            .recv_until(|e| matches!(e, Event::Message { .. }))
            .await;
        assert!(matches!(
            to_b.payload,
            Event::Message { ref from, ref text, .. } if from == "alice" && text == "anyone there?"
        ));
        // Broadcasts carry no correlation id.
        assert_eq!(to_b.request_id, "");

        // The speaker gets exactly one copy: the correlated reply.
        let to_a = a
            .recv_until(|e| matches!(e, Event::Message { .. }))
            .await;
        assert_eq!(to_a.request_id, "req-1");
    }

    #[tokio::test]
    async fn who_lists_both_players_in_the_room() {
        let addr = start_shard().await;
        let mut a = Client::join(addr, "u1", "alice", "player").await;
        let _b = Client::join(addr, "u2", "bob", "player").await;

        a.send(Request::Who).await;
        let evt = a.recv_until(|e| matches!(e, Event::PlayerList { .. })).await;
        let Event::PlayerList { players } = evt.payload else {
            unreachable!()
        };
        assert_eq!(players, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_uid_is_rejected_without_disturbing_the_original() {
        let addr = start_shard().await;
        let mut original = Client::join(addr, "u1", "Wren", "player").await;

        let mut dup = Client::connect(addr).await;
        dup.send_raw("join", Request::JoinWorld {
            uid: "u1".into(),
            username: "acct-u1".into(),
            character_name: "Impostor".into(),
            current_hp: 10,
            max_hp: 10,
            role: "player".into(),
            class: "scavenger".into(),
            level: 1,
        })
        .await;
        let evt = dup.recv().await;
        assert!(matches!(
            evt.payload,
            Event::Error { ref message } if message.contains("already connected")
        ));

        // The original session still works.
        original.send(Request::Look).await;
        let evt = original
            .recv_until(|e| matches!(e, Event::RoomView(_)))
            .await;
        assert!(matches!(evt.payload, Event::RoomView(ref v) if v.room_id == "causeway"));
    }

    #[tokio::test]
    async fn get_drop_and_inventory_round_trip() {
        let addr = start_shard().await;
        let mut c = Client::join(addr, "u1", "Wren", "player").await;

        c.send(Request::GetItem {
            target: "scrap iron".into(),
        })
        .await;
        let evt = c.recv().await;
        let Event::InventoryView { items, currency } = evt.payload else {
            panic!("expected inventory view, got {evt:?}");
        };
        assert_eq!(currency, 0);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Scrap Iron");

        c.send(Request::DropItem {
            target: "scrap".into(),
        })
        .await;
        let evt = c.recv().await;
        assert!(matches!(
            evt.payload,
            Event::InventoryView { ref items, .. } if items.is_empty()
        ));

        c.send(Request::GetItem {
            target: "ghost item".into(),
        })
        .await;
        let evt = c.recv().await;
        assert!(matches!(evt.payload, Event::Error { .. }));
    }

    #[tokio::test]
    async fn examine_attack_flee_and_status() {
        let addr = start_shard().await;
        let mut c = Client::join(addr, "u1", "Wren", "player").await;

        // The lurker lives east of the causeway.
        c.send(Request::Move {
            direction: "east".into(),
        })
        .await;
        c.recv_until(|e| matches!(e, Event::RoomView(_))).await;

        c.send(Request::Examine {
            target: "lurker".into(),
        })
        .await;
        let evt = c.recv_until(|e| matches!(e, Event::NpcView { .. })).await;
        assert!(matches!(
            evt.payload,
            Event::NpcView { ref disposition, .. } if disposition == "hostile"
        ));

        c.send(Request::Attack {
            target: "lurker".into(),
        })
        .await;
        let evt = c.recv_until(|e| matches!(e, Event::Combat { .. })).await;
        assert!(matches!(
            evt.payload,
            Event::Combat { damage, .. } if damage > 0
        ));

        c.send(Request::Flee).await;
        c.recv_until(|e| matches!(e, Event::Combat { .. })).await;

        c.send(Request::Status).await;
        let evt = c.recv_until(|e| matches!(e, Event::Condition { .. })).await;
        assert!(matches!(
            evt.payload,
            Event::Condition { ref condition_id, .. } if condition_id.is_empty()
        ));
    }

    #[tokio::test]
    async fn admin_gating_for_setrole_and_teleport() {
        let addr = start_shard().await;
        let mut player = Client::join(addr, "u1", "Wren", "player").await;
        let mut admin = Client::join(addr, "u2", "Overseer", "admin").await;

        player
            .send(Request::Teleport {
                target_character: "Overseer".into(),
                room_id: "undercroft".into(),
            })
            .await;
        let evt = player.recv_until(|e| matches!(e, Event::Error { .. })).await;
        assert!(matches!(
            evt.payload,
            Event::Error { ref message } if message.contains("permission")
        ));

        admin
            .send(Request::Teleport {
                target_character: "Wren".into(),
                room_id: "undercroft".into(),
            })
            .await;
        admin
            .recv_until(|e| matches!(e, Event::Message { .. }))
            .await;
        // The teleported player receives their new room view.
        let evt = player
            .recv_until(|e| matches!(e, Event::RoomView(_)))
            .await;
        assert!(matches!(
            evt.payload,
            Event::RoomView(ref v) if v.room_id == "undercroft"
        ));

        admin
            .send(Request::SetRole {
                target_username: "acct-u1".into(),
                role: "editor".into(),
            })
            .await;
        let evt = admin
            .recv_until(|e| matches!(e, Event::CharacterInfo { .. }))
            .await;
        assert!(matches!(
            evt.payload,
            Event::CharacterInfo { ref name, .. } if name == "Wren"
        ));
    }
}
