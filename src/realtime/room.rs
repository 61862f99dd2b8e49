use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::{dto::events::UserWire, realtime::protocol::ServerMessage};

/// What flows to a session's writer task.
#[derive(Debug)]
pub enum Outbound {
    Message(ServerMessage),
    /// Tear the connection down (dead heartbeat).
    Shutdown,
}

/// One live connection as the room layer sees it. Sessions own their socket;
/// rooms only hold these handles, so there is no ownership cycle between the
/// two.
pub struct SessionHandle {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub username: RwLock<Option<String>>,
    pub joined_canvas: RwLock<Option<Uuid>>,
    pub tx: mpsc::Sender<Outbound>,
    pub is_alive: AtomicBool,
}

impl SessionHandle {
    pub fn new(connection_id: Uuid, user_id: Uuid, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            connection_id,
            user_id,
            username: RwLock::new(None),
            joined_canvas: RwLock::new(None),
            tx,
            is_alive: AtomicBool::new(true),
        }
    }

    pub fn username(&self) -> Option<String> {
        self.username.read().ok().and_then(|name| name.clone())
    }

    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }
}

pub struct Room {
    pub canvas_id: Uuid,
    pub sessions: DashMap<Uuid, Arc<SessionHandle>>,
    /// Held across commit + fan-out so broadcasts leave in version order.
    pub write_lock: Mutex<()>,
}

impl Room {
    fn new(canvas_id: Uuid) -> Self {
        Self {
            canvas_id,
            sessions: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }
}

/// Process-wide registry of rooms and live sessions. Rooms are created on
/// first attach and removed when their last session detaches.
pub struct RoomManager {
    rooms: DashMap<Uuid, Arc<Room>>,
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
}

pub type Rooms = Arc<RoomManager>;

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    pub fn register_session(&self, session: Arc<SessionHandle>) {
        self.sessions.insert(session.connection_id, session);
    }

    pub fn unregister_session(&self, connection_id: Uuid) {
        self.sessions.remove(&connection_id);
    }

    /// Move a session into a canvas room, detaching it from any previous
    /// room first. Returns the room and, when one was left, the canvas that
    /// should get a `USER_LEFT`.
    pub fn attach(&self, session: &Arc<SessionHandle>, canvas_id: Uuid) -> (Arc<Room>, Option<Uuid>) {
        let left = self.detach(session);
        let room = self
            .rooms
            .entry(canvas_id)
            .or_insert_with(|| Arc::new(Room::new(canvas_id)))
            .value()
            .clone();
        room.sessions
            .insert(session.connection_id, session.clone());
        if let Ok(mut joined) = session.joined_canvas.write() {
            *joined = Some(canvas_id);
        }
        (room, left)
    }

    /// Remove a session from its room, dropping the room when it empties.
    /// Returns the canvas it was attached to, if any.
    pub fn detach(&self, session: &Arc<SessionHandle>) -> Option<Uuid> {
        let canvas_id = session
            .joined_canvas
            .write()
            .ok()
            .and_then(|mut joined| joined.take())?;
        if let Some(room) = self.rooms.get(&canvas_id).map(|entry| entry.value().clone()) {
            room.sessions.remove(&session.connection_id);
        }
        self.rooms
            .remove_if(&canvas_id, |_, room| room.sessions.is_empty());
        Some(canvas_id)
    }

    pub fn room(&self, canvas_id: Uuid) -> Option<Arc<Room>> {
        self.rooms.get(&canvas_id).map(|entry| entry.value().clone())
    }

    /// Fire-and-forget fan-out. Slow receivers never stall the room: a full
    /// send buffer drops the message, silently for ephemerals, logged for
    /// storable traffic (that receiver reconciles via GET_STATE/BATCH_SYNC).
    pub fn broadcast(&self, canvas_id: Uuid, message: &ServerMessage, exclude: Option<Uuid>) {
        let Some(room) = self.room(canvas_id) else {
            return;
        };
        for entry in room.sessions.iter() {
            let session = entry.value();
            if Some(session.connection_id) == exclude {
                continue;
            }
            let delivery = session.tx.try_send(Outbound::Message(message.clone()));
            if delivery.is_err() && !message.is_ephemeral() {
                tracing::warn!(
                    canvas_id = %canvas_id,
                    connection_id = %session.connection_id,
                    "Dropped broadcast to slow or closed session"
                );
            }
        }
    }

    /// Presence snapshot, one entry per distinct user.
    pub fn users_of(&self, canvas_id: Uuid) -> Vec<UserWire> {
        let Some(room) = self.room(canvas_id) else {
            return Vec::new();
        };
        let mut users: Vec<UserWire> = Vec::new();
        for entry in room.sessions.iter() {
            let session = entry.value();
            if users.iter().any(|user| user.user_id == session.user_id) {
                continue;
            }
            users.push(UserWire {
                user_id: session.user_id,
                username: session.username(),
            });
        }
        users.sort_by_key(|user| user.user_id);
        users
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Heartbeat sweep: a session that never answered the previous ping is
    /// shut down; everyone else gets pinged and must answer before the next
    /// sweep.
    pub fn sweep_sessions(&self) -> usize {
        let mut terminated = 0;
        let handles: Vec<Arc<SessionHandle>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for session in handles {
            if session.is_alive.swap(false, Ordering::Relaxed) {
                let _ = session.tx.try_send(Outbound::Message(ServerMessage::Ping));
            } else {
                tracing::info!(
                    connection_id = %session.connection_id,
                    user_id = %session.user_id,
                    "Terminating unresponsive session"
                );
                self.detach(&session);
                self.unregister_session(session.connection_id);
                let _ = session.tx.try_send(Outbound::Shutdown);
                terminated += 1;
            }
        }
        terminated
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
