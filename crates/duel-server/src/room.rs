//! Room state machine and the shared registry of rooms, matchmaking queue,
//! and live connections.
//!
//! Mirrors the teacher's `RoomManager` shape: an outer `RwLock`-guarded index
//! of rooms, each individually `Mutex`-guarded so unrelated rooms never
//! contend, plus a `turn_counter`-style atomic generation counter per room
//! (and per player, for reconnect) used to invalidate stale timer tasks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock, mpsc};

use duel_core::protocol::{PlayerDescriptor, PlayerId, RoomCode, ServerMessage};

use crate::config::Config;
use crate::error::RoomError;
use crate::store::Store;

pub type OutboundTx = mpsc::UnboundedSender<ServerMessage>;

/// Identity of an accepted transport. Distinct from [`PlayerId`]: a
/// reconnect rebinds a fresh connection id to the same player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

struct ActionEvent {
    player_id: PlayerId,
    at: Instant,
}

pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub deck_id: String,
    pub conn_id: ConnectionId,
    pub tx: OutboundTx,
    pub disconnected_at: Option<Instant>,
    /// Bumped on disconnect and on reconnect; invalidates stale
    /// reconnect-timeout tasks the same way `turn_counter` invalidates
    /// stale turn timers.
    pub reconnect_gen: Arc<AtomicU64>,
}

pub struct Room {
    pub code: RoomCode,
    pub players: Vec<Player>,
    pub status: RoomStatus,
    pub created_at: Instant,
    pub created_at_ms: u64,
    pub game_start_time: Option<Instant>,
    pub game_start_time_ms: Option<u64>,
    pub current_turn_player_id: Option<PlayerId>,
    pub current_turn_start: Option<Instant>,
    pub turn_counter: Arc<AtomicU64>,
    pub game_state: Option<serde_json::Value>,
    action_log: VecDeque<ActionEvent>,
    pub suspicious_activity: u32,
    pub disconnect_deadline: Option<Instant>,
}

impl Room {
    fn new(code: RoomCode, first: Player) -> Self {
        Self {
            code,
            players: vec![first],
            status: RoomStatus::Waiting,
            created_at: Instant::now(),
            created_at_ms: now_ms(),
            game_start_time: None,
            game_start_time_ms: None,
            current_turn_player_id: None,
            current_turn_start: None,
            turn_counter: Arc::new(AtomicU64::new(0)),
            game_state: None,
            action_log: VecDeque::new(),
            suspicious_activity: 0,
            disconnect_deadline: None,
        }
    }

    pub fn send_to(&self, player_id: PlayerId, msg: &ServerMessage) {
        if let Some(p) = self.players.iter().find(|p| p.id == player_id) {
            let _ = p.tx.send(msg.clone());
        }
    }

    /// All members whose `disconnected_at` is unset.
    pub fn broadcast(&self, msg: &ServerMessage) {
        for p in &self.players {
            if p.disconnected_at.is_none() {
                let _ = p.tx.send(msg.clone());
            }
        }
    }

    pub fn broadcast_others(&self, exclude: PlayerId, msg: &ServerMessage) {
        for p in &self.players {
            if p.id != exclude && p.disconnected_at.is_none() {
                let _ = p.tx.send(msg.clone());
            }
        }
    }

    fn opponent_of(&self, player_id: PlayerId) -> Option<PlayerId> {
        self.players.iter().find(|p| p.id != player_id).map(|p| p.id)
    }

    fn descriptor(&self, player_id: PlayerId) -> Option<PlayerDescriptor> {
        self.players.iter().find(|p| p.id == player_id).map(|p| PlayerDescriptor {
            id: p.id,
            name: p.name.clone(),
            deck_id: p.deck_id.clone(),
        })
    }

    fn emit_game_start(&mut self) {
        self.status = RoomStatus::Playing;
        let ids: Vec<PlayerId> = self.players.iter().map(|p| p.id).collect();
        for &pid in &ids {
            let Some(opponent) = self.opponent_of(pid) else { continue };
            let (Some(d1), Some(d2)) = (self.descriptor(self.players[0].id), self.descriptor(self.players[1].id)) else {
                continue;
            };
            self.send_to(
                pid,
                &ServerMessage::GameStart {
                    room_code: self.code.clone(),
                    your_player_id: pid,
                    opponent_id: opponent,
                    player1: d1,
                    player2: d2,
                },
            );
        }
    }

    /// Evict action-history entries older than one second and count how
    /// many of the remainder belong to `sender`.
    fn prune_and_count(&mut self, sender: PlayerId) -> usize {
        let cutoff = Instant::now() - Duration::from_secs(1);
        while let Some(front) = self.action_log.front() {
            if front.at < cutoff {
                self.action_log.pop_front();
            } else {
                break;
            }
        }
        self.action_log.iter().filter(|e| e.player_id == sender).count()
    }

    fn record_action(&mut self, sender: PlayerId) {
        self.action_log.push_back(ActionEvent { player_id: sender, at: Instant::now() });
        while self.action_log.len() > 100 {
            self.action_log.pop_front();
        }
    }
}

struct QueueEntry {
    player_id: PlayerId,
    name: String,
    deck_id: String,
    conn_id: ConnectionId,
    tx: OutboundTx,
}

struct LiveConn {
    tx: OutboundTx,
}

/// Process-wide indices: rooms by code, the matchmaking queue, the
/// connection→(player, room) reverse map, and the live-connection set.
pub struct Registry {
    rooms: RwLock<HashMap<RoomCode, Arc<Mutex<Room>>>>,
    queue: Mutex<VecDeque<QueueEntry>>,
    connections: RwLock<HashMap<ConnectionId, (PlayerId, RoomCode)>>,
    live: RwLock<HashMap<ConnectionId, LiveConn>>,
    next_conn_id: AtomicU64,
    pub config: Arc<Config>,
}

/// Outcome of a `reconnect` call the connection handler needs in order to
/// reply to the reconnecting client.
pub struct ReconnectOutcome {
    pub game_state: Option<serde_json::Value>,
}

impl Registry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            connections: RwLock::new(HashMap::new()),
            live: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            config,
        }
    }

    /// Add a freshly-accepted transport to the live set, ahead of the first
    /// frame being read, so keepalive can reach it immediately.
    pub async fn register_connection(&self, tx: OutboundTx) -> ConnectionId {
        let id = ConnectionId(self.next_conn_id.fetch_add(1, Ordering::SeqCst));
        self.live.write().await.insert(id, LiveConn { tx });
        id
    }

    pub async fn unregister_connection(&self, conn_id: ConnectionId) {
        self.live.write().await.remove(&conn_id);
    }

    pub async fn live_senders(&self) -> Vec<(ConnectionId, OutboundTx)> {
        self.live.read().await.iter().map(|(id, c)| (*id, c.tx.clone())).collect()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    async fn get_room(&self, code: &RoomCode) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(code).cloned()
    }

    async fn bind_connection(&self, conn_id: ConnectionId, player_id: PlayerId, code: RoomCode) {
        self.connections.write().await.insert(conn_id, (player_id, code));
    }

    pub async fn create_room(
        &self,
        conn_id: ConnectionId,
        name: String,
        deck_id: String,
        tx: OutboundTx,
    ) -> (RoomCode, PlayerId) {
        let player_id = PlayerId::new();
        let code = {
            let rooms = self.rooms.read().await;
            let existing: HashSet<RoomCode> = rooms.keys().cloned().collect();
            RoomCode::generate(&existing)
        };

        let player = Player {
            id: player_id,
            name,
            deck_id,
            conn_id,
            tx,
            disconnected_at: None,
            reconnect_gen: Arc::new(AtomicU64::new(0)),
        };
        let room = Arc::new(Mutex::new(Room::new(code.clone(), player)));

        self.rooms.write().await.insert(code.clone(), room.clone());
        self.bind_connection(conn_id, player_id, code.clone()).await;

        {
            let room = room.lock().await;
            room.send_to(player_id, &ServerMessage::RoomCreated { room_code: code.clone(), player_id });
        }

        tracing::info!(room = %code, player = %player_id, "room created");
        (code, player_id)
    }

    pub async fn join_room(
        &self,
        conn_id: ConnectionId,
        raw_code: &str,
        name: String,
        deck_id: String,
        tx: OutboundTx,
    ) -> Result<(), RoomError> {
        let code = RoomCode::normalize(raw_code);
        let room_arc = self.get_room(&code).await.ok_or(RoomError::RoomNotFound)?;

        let player_id = PlayerId::new();
        {
            let mut room = room_arc.lock().await;
            if room.status != RoomStatus::Waiting {
                return Err(RoomError::GameInProgress);
            }
            if room.players.len() >= 2 {
                return Err(RoomError::RoomFull);
            }

            let player = Player {
                id: player_id,
                name: name.clone(),
                deck_id,
                conn_id,
                tx,
                disconnected_at: None,
                reconnect_gen: Arc::new(AtomicU64::new(0)),
            };
            room.players.push(player);
            room.broadcast(&ServerMessage::PlayerJoined { player_id, player_name: name });

            if room.players.len() == 2 {
                room.emit_game_start();
                room.game_start_time = Some(Instant::now());
                room.game_start_time_ms = Some(now_ms());
            }
        }

        self.bind_connection(conn_id, player_id, code.clone()).await;
        tracing::info!(room = %code, player = %player_id, "player joined");
        Ok(())
    }

    pub async fn find_match(&self, conn_id: ConnectionId, name: String, deck_id: String, tx: OutboundTx) {
        let player_id = PlayerId::new();

        let opponent = {
            let mut queue = self.queue.lock().await;
            queue.pop_front()
        };

        let Some(opponent) = opponent else {
            self.queue.lock().await.push_back(QueueEntry {
                player_id,
                name,
                deck_id,
                conn_id,
                tx,
            });
            self.bind_connection(conn_id, player_id, RoomCode::queue_sentinel()).await;
            return;
        };

        let code = {
            let rooms = self.rooms.read().await;
            let existing: HashSet<RoomCode> = rooms.keys().cloned().collect();
            RoomCode::generate(&existing)
        };

        let host = Player {
            id: opponent.player_id,
            name: opponent.name,
            deck_id: opponent.deck_id,
            conn_id: opponent.conn_id,
            tx: opponent.tx,
            disconnected_at: None,
            reconnect_gen: Arc::new(AtomicU64::new(0)),
        };
        let guest = Player {
            id: player_id,
            name,
            deck_id,
            conn_id,
            tx,
            disconnected_at: None,
            reconnect_gen: Arc::new(AtomicU64::new(0)),
        };

        let room = Room::new(code.clone(), host);
        let room_arc = Arc::new(Mutex::new(room));
        self.rooms.write().await.insert(code.clone(), room_arc.clone());

        self.bind_connection(opponent.conn_id, opponent.player_id, code.clone()).await;
        self.bind_connection(conn_id, player_id, code.clone()).await;

        {
            let mut room = room_arc.lock().await;
            room.players.push(guest);
            room.send_to(opponent.player_id, &ServerMessage::RoomCreated { room_code: code.clone(), player_id: opponent.player_id });
            room.send_to(player_id, &ServerMessage::RoomCreated { room_code: code.clone(), player_id });
            room.emit_game_start();
            room.game_start_time = Some(Instant::now());
            room.game_start_time_ms = Some(now_ms());
        }

        tracing::info!(room = %code, "matched two players from the queue");
    }

    async fn lookup(&self, conn_id: ConnectionId) -> Result<(PlayerId, RoomCode), RoomError> {
        let conns = self.connections.read().await;
        let (player_id, code) = conns.get(&conn_id).cloned().ok_or(RoomError::NotInRoom)?;
        if code.is_queue_sentinel() {
            return Err(RoomError::NotInRoom);
        }
        Ok((player_id, code))
    }

    pub async fn chat(&self, conn_id: ConnectionId, message: String) -> Result<(), RoomError> {
        let (player_id, code) = self.lookup(conn_id).await?;
        let room_arc = self.get_room(&code).await.ok_or(RoomError::RoomNotFound)?;
        let room = room_arc.lock().await;
        let Some(name) = room.players.iter().find(|p| p.id == player_id).map(|p| p.name.clone()) else {
            return Err(RoomError::PlayerNotFound);
        };
        room.broadcast(&ServerMessage::Chat { player_id, player_name: name, message });
        Ok(())
    }

    pub async fn emote(&self, conn_id: ConnectionId, emote_id: String) -> Result<(), RoomError> {
        let (player_id, code) = self.lookup(conn_id).await?;
        let room_arc = self.get_room(&code).await.ok_or(RoomError::RoomNotFound)?;
        let room = room_arc.lock().await;
        let Some(name) = room.players.iter().find(|p| p.id == player_id).map(|p| p.name.clone()) else {
            return Err(RoomError::PlayerNotFound);
        };
        room.broadcast(&ServerMessage::Emote { player_id, player_name: name, emote_id });
        Ok(())
    }

    /// Handle an inbound `game_action`. Applies the rate limiter, turn
    /// ownership rules, and the mulligan exemption, then fans the action out.
    ///
    /// Returns `Ok(true)` if the sender should be kicked (caller closes the
    /// connection after this call returns).
    pub async fn game_action(
        &self,
        conn_id: ConnectionId,
        action: serde_json::Value,
        game_state: Option<serde_json::Value>,
    ) -> Result<bool, RoomError> {
        let (player_id, code) = self.lookup(conn_id).await?;
        let room_arc = self.get_room(&code).await.ok_or(RoomError::RoomNotFound)?;

        let turn_duration = Duration::from_secs(self.config.turn_duration_secs);
        let max_per_second = self.config.max_actions_per_second as usize;

        let start_opponent_turn;
        {
            let mut room = room_arc.lock().await;

            let count = room.prune_and_count(player_id);
            if count >= max_per_second {
                room.suspicious_activity += 1;
                if room.suspicious_activity > 5 {
                    return Ok(true);
                }
                return Err(RoomError::RateLimit);
            }
            room.record_action(player_id);

            let action_type = action.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let exempt = action_type == "mulligan" || action_type == "keep_hand";

            if !exempt && room.current_turn_player_id != Some(player_id) {
                return Err(RoomError::NotYourTurn);
            }

            let should_arm_first_turn = action_type == "keep_hand" && room.current_turn_player_id.is_none();
            if should_arm_first_turn {
                room.game_start_time.get_or_insert_with(Instant::now);
                room.game_start_time_ms.get_or_insert_with(now_ms);
            }

            if let Some(gs) = game_state {
                room.game_state = Some(gs);
            }

            room.broadcast_others(player_id, &ServerMessage::GameAction { player_id, action: action.clone(), timestamp: now_ms() });

            if should_arm_first_turn {
                let first = room.players[0].id;
                let turn = Self::arm_turn(&mut room, first, turn_duration);
                Self::spawn_turn_timer(&room_arc, turn, first, turn_duration);
            }

            start_opponent_turn = if !exempt && action_type == "end_turn" {
                room.opponent_of(player_id)
            } else {
                None
            };
        }

        if let Some(opponent) = start_opponent_turn {
            Self::start_turn(&room_arc, opponent, turn_duration).await;
        }

        Ok(false)
    }

    /// Arm a fresh turn on an already-locked room: bump the generation
    /// counter, update turn-ownership bookkeeping, and announce `turn_start`.
    /// Returns the new generation so the caller can spawn its timeout timer.
    fn arm_turn(room: &mut Room, player_id: PlayerId, turn_duration: Duration) -> u64 {
        room.current_turn_player_id = Some(player_id);
        room.current_turn_start = Some(Instant::now());
        let turn = room.turn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        room.broadcast(&ServerMessage::TurnStart {
            player_id,
            turn_duration: turn_duration.as_millis() as u64,
        });
        turn
    }

    /// Lock the room, arm the turn, and detach a background timer that
    /// auto-advances if nothing happens before `turn_duration` elapses.
    async fn start_turn(room_arc: &Arc<Mutex<Room>>, player_id: PlayerId, turn_duration: Duration) {
        let turn = {
            let mut room = room_arc.lock().await;
            Self::arm_turn(&mut room, player_id, turn_duration)
        };
        Self::spawn_turn_timer(room_arc, turn, player_id, turn_duration);
    }

    /// Spawn the detached timeout timer for a just-armed turn. The fired
    /// task re-checks the generation counter before acting, so a turn that
    /// ended manually in the meantime makes it a no-op.
    fn spawn_turn_timer(room_arc: &Arc<Mutex<Room>>, turn: u64, player_id: PlayerId, turn_duration: Duration) {
        let room_arc = Arc::clone(room_arc);
        tokio::spawn(async move {
            tokio::time::sleep(turn_duration).await;

            let counter = {
                let room = room_arc.lock().await;
                Arc::clone(&room.turn_counter)
            };
            if counter.load(Ordering::SeqCst) != turn {
                return;
            }

            let opponent = {
                let mut room = room_arc.lock().await;
                if room.turn_counter.load(Ordering::SeqCst) != turn {
                    return;
                }
                let action = serde_json::json!({"type": "end_turn", "auto": true});
                room.broadcast(&ServerMessage::GameAction { player_id, action, timestamp: now_ms() });
                room.opponent_of(player_id)
            };

            if let Some(opponent) = opponent {
                Box::pin(Self::start_turn(&room_arc, opponent, turn_duration)).await;
            }
        });
    }

    pub async fn game_end(
        &self,
        conn_id: ConnectionId,
        winner_id: Option<PlayerId>,
        turn_count: u32,
        store: &Store,
    ) -> Result<(), RoomError> {
        let (_, code) = self.lookup(conn_id).await?;
        let room_arc = self.get_room(&code).await.ok_or(RoomError::RoomNotFound)?;

        let (p1, p2, start_ms) = {
            let mut room = room_arc.lock().await;
            if room.players.len() != 2 {
                return Err(RoomError::PlayerNotFound);
            }
            room.turn_counter.fetch_add(1, Ordering::SeqCst);
            room.status = RoomStatus::Finished;
            let start_ms = room.game_start_time_ms.unwrap_or(room.created_at_ms);
            (
                (room.players[0].id, room.players[0].name.clone(), room.players[0].deck_id.clone()),
                (room.players[1].id, room.players[1].name.clone(), room.players[1].deck_id.clone()),
                start_ms,
            )
        };

        let end_ms = now_ms() as i64;
        if let Err(e) = store
            .record_match(p1.0, &p1.1, p2.0, &p2.1, winner_id, start_ms as i64, end_ms, turn_count as i64, &p1.2, &p2.2)
            .await
        {
            tracing::error!(error = %e, room = %code, "failed to record match");
        }

        Ok(())
    }

    pub async fn reconnect(
        &self,
        conn_id: ConnectionId,
        raw_code: &str,
        player_id: PlayerId,
        tx: OutboundTx,
    ) -> Result<ReconnectOutcome, RoomError> {
        let code = RoomCode::normalize(raw_code);
        let room_arc = self.get_room(&code).await.ok_or(RoomError::RoomNotFound)?;

        let (game_state, peer, player_name) = {
            let mut room = room_arc.lock().await;
            let Some(player) = room.players.iter_mut().find(|p| p.id == player_id) else {
                return Err(RoomError::PlayerNotFound);
            };
            if player.disconnected_at.is_none() {
                return Err(RoomError::NotDisconnected);
            }

            player.disconnected_at = None;
            player.conn_id = conn_id;
            player.tx = tx;
            player.reconnect_gen.fetch_add(1, Ordering::SeqCst);
            let player_name = player.name.clone();
            room.disconnect_deadline = None;

            let peer = room.opponent_of(player_id);
            (room.game_state.clone(), peer, player_name)
        };

        self.bind_connection(conn_id, player_id, code.clone()).await;

        {
            let room = room_arc.lock().await;
            if let Some(peer) = peer {
                room.send_to(peer, &ServerMessage::PlayerJoined { player_id, player_name });
            }
        }

        tracing::info!(room = %code, player = %player_id, "player reconnected");
        Ok(ReconnectOutcome { game_state })
    }

    /// Guaranteed-release finalizer for transport close, `leave_room`, and
    /// any uncaught failure in the connection's read loop.
    pub async fn handle_disconnect(&self, conn_id: ConnectionId) {
        self.unregister_connection(conn_id).await;

        let Some((player_id, code)) = self.connections.write().await.remove(&conn_id) else {
            return;
        };

        if code.is_queue_sentinel() {
            let mut queue = self.queue.lock().await;
            queue.retain(|e| e.player_id != player_id);
            return;
        }

        // Defensive sweep per spec §4.7.
        {
            let mut queue = self.queue.lock().await;
            queue.retain(|e| e.player_id != player_id);
        }

        let Some(room_arc) = self.get_room(&code).await else {
            return;
        };

        let mut should_remove_room = false;
        {
            let mut room = room_arc.lock().await;
            let room_code = room.code.clone();

            match room.status {
                RoomStatus::Waiting => {
                    let name = room.players.iter().find(|p| p.id == player_id).map(|p| p.name.clone());
                    room.players.retain(|p| p.id != player_id);
                    if let Some(name) = name {
                        room.broadcast(&ServerMessage::PlayerLeft { player_id, player_name: name });
                    }
                    should_remove_room = room.players.is_empty();
                    tracing::info!(room = %room_code, player = %player_id, "player left waiting room");
                }
                RoomStatus::Playing => {
                    let reconnect_timeout = Duration::from_secs(self.config.reconnect_timeout_secs);
                    let Some(player) = room.players.iter_mut().find(|p| p.id == player_id) else {
                        return;
                    };
                    player.disconnected_at = Some(Instant::now());
                    let gen = player.reconnect_gen.fetch_add(1, Ordering::SeqCst) + 1;
                    let reconnect_gen = Arc::clone(&player.reconnect_gen);

                    let deadline_ms = now_ms() + reconnect_timeout.as_millis() as u64;
                    room.disconnect_deadline = Some(Instant::now() + reconnect_timeout);

                    room.broadcast_others(
                        player_id,
                        &ServerMessage::PlayerDisconnected { player_id, reconnect_deadline: deadline_ms },
                    );

                    tracing::info!(room = %room_code, player = %player_id, "player disconnected mid-game, arming reconnect timer");

                    let room_arc = Arc::clone(&room_arc);
                    tokio::spawn(async move {
                        tokio::time::sleep(reconnect_timeout).await;
                        if reconnect_gen.load(Ordering::SeqCst) != gen {
                            return;
                        }
                        let mut room = room_arc.lock().await;
                        let Some(player) = room.players.iter().find(|p| p.id == player_id) else {
                            return;
                        };
                        if player.disconnected_at.is_none() || player.reconnect_gen.load(Ordering::SeqCst) != gen {
                            return;
                        }
                        let name = player.name.clone();
                        room.players.retain(|p| p.id != player_id);
                        room.broadcast(&ServerMessage::PlayerLeft { player_id, player_name: name });
                        tracing::info!(room = %room.code, player = %player_id, "reconnect window expired, player evicted");
                    });
                }
                RoomStatus::Finished => {}
            }
        }

        if should_remove_room {
            let mut rooms = self.rooms.write().await;
            if let Some(room_arc) = rooms.get(&code) {
                let room = room_arc.lock().await;
                if room.players.is_empty() {
                    drop(room);
                    rooms.remove(&code);
                    tracing::info!(room = %code, "removed empty room");
                }
            }
        }
    }

    pub async fn waiting_rooms(&self) -> Vec<WaitingRoomSummary> {
        let rooms = self.rooms.read().await;
        let mut out = Vec::new();
        for room_arc in rooms.values() {
            let room = room_arc.lock().await;
            if room.status == RoomStatus::Waiting && room.players.len() == 1 {
                out.push(WaitingRoomSummary {
                    code: room.code.to_string(),
                    host_name: room.players[0].name.clone(),
                    host_deck_id: room.players[0].deck_id.clone(),
                    created_at: room.created_at_ms,
                    players_count: room.players.len(),
                });
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Reap rooms that are not `playing` and older than `ROOM_EXPIRY`.
    pub async fn reap_idle_rooms(&self) {
        let horizon = Duration::from_secs(self.config.room_expiry_secs);
        let mut to_remove = Vec::new();

        {
            let rooms = self.rooms.read().await;
            for (code, room_arc) in rooms.iter() {
                let room = room_arc.lock().await;
                if room.status != RoomStatus::Playing && room.created_at.elapsed() > horizon {
                    to_remove.push(code.clone());
                }
            }
        }

        if to_remove.is_empty() {
            return;
        }

        let mut rooms = self.rooms.write().await;
        for code in to_remove {
            rooms.remove(&code);
            tracing::info!(room = %code, "reaped idle room");
        }
    }

}

pub struct WaitingRoomSummary {
    pub code: String,
    pub host_name: String,
    pub host_deck_id: String,
    pub created_at: u64,
    pub players_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use tokio::sync::mpsc::unbounded_channel;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            port: 0,
            db_path: String::new(),
            ping_interval_secs: 30,
            room_expiry_secs: 3600,
            reconnect_timeout_secs: 120,
            turn_duration_secs: 1,
            max_actions_per_second: 10,
        })
    }

    async fn test_store() -> (Store, tempfile::TempPath) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.into_temp_path();
        let store = Store::open(path.to_str().unwrap()).await.unwrap();
        (store, path)
    }

    fn sender() -> OutboundTx {
        unbounded_channel().0
    }

    #[test]
    fn action_window_truncates_to_100_entries() {
        let player = PlayerId::new();
        let mut room = Room::new(RoomCode("AAAAAA".to_string()), Player {
            id: player,
            name: "A".into(),
            deck_id: "d1".into(),
            conn_id: ConnectionId(1),
            tx: sender(),
            disconnected_at: None,
            reconnect_gen: Arc::new(AtomicU64::new(0)),
        });

        for _ in 0..150 {
            room.record_action(player);
        }
        assert_eq!(room.action_log.len(), 100);
    }

    #[test]
    fn rate_limiter_counts_only_the_sender() {
        let a = PlayerId::new();
        let b = PlayerId::new();
        let mut room = Room::new(RoomCode("BBBBBB".to_string()), Player {
            id: a,
            name: "A".into(),
            deck_id: "d1".into(),
            conn_id: ConnectionId(1),
            tx: sender(),
            disconnected_at: None,
            reconnect_gen: Arc::new(AtomicU64::new(0)),
        });

        for _ in 0..9 {
            room.record_action(a);
        }
        room.record_action(b);

        assert_eq!(room.prune_and_count(a), 9);
        assert_eq!(room.prune_and_count(b), 1);
    }

    #[tokio::test]
    async fn create_then_join_reaches_playing_and_emits_game_start() {
        let registry = Registry::new(test_config());

        let (_code_a, _player_a) = registry.create_room(ConnectionId(1), "A".into(), "d1".into(), sender()).await;
        assert_eq!(registry.room_count().await, 1);

        let code = registry
            .rooms
            .read()
            .await
            .keys()
            .next()
            .cloned()
            .unwrap();

        registry
            .join_room(ConnectionId(2), &code.0, "B".into(), "d2".into(), sender())
            .await
            .unwrap();

        let room_arc = registry.get_room(&code).await.unwrap();
        let room = room_arc.lock().await;
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.players.len(), 2);
    }

    #[tokio::test]
    async fn join_full_room_is_rejected() {
        let registry = Registry::new(test_config());
        let (code, _) = registry.create_room(ConnectionId(1), "A".into(), "d1".into(), sender()).await;
        registry.join_room(ConnectionId(2), &code.0, "B".into(), "d2".into(), sender()).await.unwrap();

        let err = registry
            .join_room(ConnectionId(3), &code.0, "C".into(), "d3".into(), sender())
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::RoomFull));
    }

    #[tokio::test]
    async fn non_owner_action_is_rejected_until_keep_hand_arms_the_first_turn() {
        let registry = Registry::new(test_config());
        let (code, player_a) = registry.create_room(ConnectionId(1), "A".into(), "d1".into(), sender()).await;
        registry.join_room(ConnectionId(2), &code.0, "B".into(), "d2".into(), sender()).await.unwrap();

        let err = registry
            .game_action(ConnectionId(2), serde_json::json!({"type": "play_card"}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::NotYourTurn));

        registry
            .game_action(ConnectionId(1), serde_json::json!({"type": "keep_hand"}), None)
            .await
            .unwrap();
        registry
            .game_action(ConnectionId(2), serde_json::json!({"type": "keep_hand"}), None)
            .await
            .unwrap();

        let room_arc = registry.get_room(&code).await.unwrap();
        let current = room_arc.lock().await.current_turn_player_id;
        assert_eq!(current, Some(player_a));
    }

    #[tokio::test]
    async fn rate_limit_kicks_after_repeated_violations() {
        let registry = Registry::new(test_config());
        let (code, player_a) = registry.create_room(ConnectionId(1), "A".into(), "d1".into(), sender()).await;
        registry.join_room(ConnectionId(2), &code.0, "B".into(), "d2".into(), sender()).await.unwrap();
        let _ = player_a;

        // mulligan is turn-exempt, so it's a clean way to drive the limiter
        // without getting tangled up in turn ownership.
        for _ in 0..10 {
            registry
                .game_action(ConnectionId(1), serde_json::json!({"type": "mulligan"}), None)
                .await
                .unwrap();
        }
        for _ in 0..5 {
            let err = registry
                .game_action(ConnectionId(1), serde_json::json!({"type": "mulligan"}), None)
                .await
                .unwrap_err();
            assert!(matches!(err, RoomError::RateLimit));
        }
        let kick = registry
            .game_action(ConnectionId(1), serde_json::json!({"type": "mulligan"}), None)
            .await
            .unwrap();
        assert!(kick);
    }

    #[tokio::test]
    async fn reconnect_requires_a_disconnected_player() {
        let registry = Registry::new(test_config());
        let (code, player_a) = registry.create_room(ConnectionId(1), "A".into(), "d1".into(), sender()).await;
        registry.join_room(ConnectionId(2), &code.0, "B".into(), "d2".into(), sender()).await.unwrap();

        let err = registry
            .reconnect(ConnectionId(3), &code.0, player_a, sender())
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::NotDisconnected));

        registry.handle_disconnect(ConnectionId(1)).await;
        let outcome = registry.reconnect(ConnectionId(3), &code.0, player_a, sender()).await.unwrap();
        assert!(outcome.game_state.is_none());

        let err = registry
            .reconnect(ConnectionId(4), &code.0, player_a, sender())
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::NotDisconnected));
    }

    #[tokio::test]
    async fn leaving_the_only_player_in_a_waiting_room_deletes_it() {
        let registry = Registry::new(test_config());
        registry.create_room(ConnectionId(1), "A".into(), "d1".into(), sender()).await;
        assert_eq!(registry.room_count().await, 1);

        registry.handle_disconnect(ConnectionId(1)).await;
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn game_end_records_a_match_with_valid_ordering() {
        let registry = Registry::new(test_config());
        let (code, player_a) = registry.create_room(ConnectionId(1), "A".into(), "d1".into(), sender()).await;
        registry.join_room(ConnectionId(2), &code.0, "B".into(), "d2".into(), sender()).await.unwrap();
        let (store, _guard) = test_store().await;

        registry.game_end(ConnectionId(1), Some(player_a), 17, &store).await.unwrap();

        let recent = store.recent_matches().await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].winner_id.as_deref(), Some(player_a.to_string().as_str()));
        assert!(recent[0].end_time >= recent[0].start_time);
    }
}
