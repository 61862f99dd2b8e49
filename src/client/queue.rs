use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    client::{
        ConnectionState, SyncError, SyncEvent,
        cache::CanvasCache,
        journal::{EventJournal, PendingEvent},
        transport::Connection,
    },
    models::events::EventKind,
    realtime::protocol::{ClientMessage, ServerMessage},
};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub ack_timeout: Duration,
    pub batch_timeout: Duration,
    pub join_timeout: Duration,
    /// Quiescence window before a coalesced edit is flushed.
    pub edit_debounce: Duration,
    /// Floor between cursor sends (~20/s).
    pub cursor_min_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            batch_timeout: Duration::from_secs(60),
            join_timeout: Duration::from_secs(10),
            edit_debounce: Duration::from_millis(300),
            cursor_min_interval: Duration::from_millis(50),
        }
    }
}

struct InFlight {
    event: PendingEvent,
    sent_at: Instant,
}

/// Rapid `SHAPE_EDITED` updates for one shape, shallow-merged until the
/// stream goes quiet.
struct CoalescedEdit {
    local_event_id: String,
    properties: Map<String, Value>,
    property_timestamps: HashMap<String, i64>,
    first_timestamp: i64,
    last_touched: Instant,
}

/// The client sync queue: throttling, offline buffering, ack correlation,
/// and reconnect replay, wrapped around the transport and the durable
/// journal. Per-event lifecycle:
/// `created → sent → ack`, or
/// `created → sent → timeout → enqueued → batched → cleared`, or
/// `created → enqueued` when the transport is known-offline.
pub struct SyncQueue {
    user_id: Uuid,
    username: Option<String>,
    cache: CanvasCache,
    journal: EventJournal,
    config: QueueConfig,
    connection: ConnectionState,
    out: Option<mpsc::Sender<ClientMessage>>,
    joined: bool,
    join_sent_at: Option<Instant>,
    batch_sent_at: Option<Instant>,
    in_flight: HashMap<String, InFlight>,
    coalesced: HashMap<Uuid, CoalescedEdit>,
    last_cursor_sent: Option<Instant>,
    notifications: Vec<SyncEvent>,
}

impl SyncQueue {
    pub fn new(
        user_id: Uuid,
        username: Option<String>,
        canvas_id: Uuid,
        journal: EventJournal,
        config: QueueConfig,
    ) -> Self {
        Self {
            user_id,
            username,
            cache: CanvasCache::new(canvas_id),
            journal,
            config,
            connection: ConnectionState::Disconnected,
            out: None,
            joined: false,
            join_sent_at: None,
            batch_sent_at: None,
            in_flight: HashMap::new(),
            coalesced: HashMap::new(),
            last_cursor_sent: None,
            notifications: Vec::new(),
        }
    }

    pub fn canvas_id(&self) -> Uuid {
        self.cache.canvas_id()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn cache(&self) -> &CanvasCache {
        &self.cache
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Drain UI notifications accumulated since the last call.
    pub fn take_notifications(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.notifications)
    }

    /// Wire a fresh transport in and start the join handshake.
    pub async fn attach_transport(
        &mut self,
        out: mpsc::Sender<ClientMessage>,
        now: Instant,
    ) -> Result<(), SyncError> {
        self.connection = if self.joined || self.journal.len() > 0 {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };
        self.joined = false;
        self.join_sent_at = Some(now);
        let join = ClientMessage::JoinCanvas {
            canvas_id: self.cache.canvas_id(),
            username: self.username.clone(),
        };
        out.send(join)
            .await
            .map_err(|_| SyncError::Transport("transport closed during join".into()))?;
        self.out = Some(out);
        Ok(())
    }

    /// Author one local event. Property edits coalesce per shape; everything
    /// else is sent (or durably enqueued) immediately. Returns the
    /// `localEventId` the ack will carry.
    pub async fn submit_event(
        &mut self,
        kind: EventKind,
        shape_id: Option<Uuid>,
        payload: Value,
        now: Instant,
    ) -> Result<String, SyncError> {
        if !kind.is_storable() {
            return Err(SyncError::InvalidEvent(format!(
                "{} cannot be submitted as a shape event",
                kind.as_str()
            )));
        }
        if kind.requires_shape() && shape_id.is_none() {
            return Err(SyncError::InvalidEvent(format!(
                "{} requires a shape id",
                kind.as_str()
            )));
        }

        let now_ms = Utc::now().timestamp_millis();

        if let (EventKind::ShapeEdited, Some(shape_id)) = (kind, shape_id) {
            let properties = crate::sync::projection::payload_properties(&payload);
            let entry = self.coalesced.entry(shape_id).or_insert_with(|| CoalescedEdit {
                local_event_id: Uuid::new_v4().to_string(),
                properties: Map::new(),
                property_timestamps: HashMap::new(),
                first_timestamp: now_ms,
                last_touched: now,
            });
            for (key, value) in properties {
                entry.property_timestamps.insert(key.clone(), now_ms);
                entry.properties.insert(key, value);
            }
            entry.last_touched = now;
            let local_event_id = entry.local_event_id.clone();

            // Keep the UI overlay current while the edit is still buffering.
            let event = PendingEvent {
                local_event_id: local_event_id.clone(),
                canvas_id: self.cache.canvas_id(),
                kind,
                shape_id: Some(shape_id),
                payload: serde_json::json!({
                    "properties": Value::Object(entry.properties.clone()),
                    "propertyTimestamps": entry.property_timestamps,
                }),
                user_id: self.user_id,
                timestamp: entry.first_timestamp,
            };
            self.cache.upsert_pending(event);
            return Ok(local_event_id);
        }

        let event = PendingEvent {
            local_event_id: Uuid::new_v4().to_string(),
            canvas_id: self.cache.canvas_id(),
            kind,
            shape_id,
            payload,
            user_id: self.user_id,
            timestamp: now_ms,
        };
        self.cache.upsert_pending(event.clone());
        let local_event_id = event.local_event_id.clone();
        self.attempt_send(event, now).await;
        Ok(local_event_id)
    }

    /// Throttled ephemeral cursor updates; dropped silently while offline.
    pub async fn send_cursor(&mut self, x: f64, y: f64, now: Instant) -> Result<(), SyncError> {
        if self.connection != ConnectionState::Connected {
            return Ok(());
        }
        if let Some(last) = self.last_cursor_sent {
            if now.saturating_duration_since(last) < self.config.cursor_min_interval {
                return Ok(());
            }
        }
        if let Some(out) = self.out.as_ref() {
            if out.send(ClientMessage::CursorMove { x, y }).await.is_err() {
                self.handle_disconnect().await;
                return Ok(());
            }
            self.last_cursor_sent = Some(now);
        }
        Ok(())
    }

    /// Periodic maintenance: debounce flushes, join best-effort fallback,
    /// ack timeouts, and batch-sync retry.
    pub async fn tick(&mut self, now: Instant) {
        self.flush_edits(now, false).await;

        if !self.joined && self.out.is_some() {
            if let Some(sent_at) = self.join_sent_at {
                if now.saturating_duration_since(sent_at) >= self.config.join_timeout {
                    // Older servers never ack joins; treat the join as done.
                    tracing::debug!("Join ack timed out; proceeding optimistically");
                    self.joined = true;
                    self.connection = ConnectionState::Connected;
                    self.begin_resync(now).await;
                }
            }
        }

        let timed_out: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| {
                now.saturating_duration_since(in_flight.sent_at) >= self.config.ack_timeout
            })
            .map(|(id, _)| id.clone())
            .collect();
        for local_event_id in timed_out {
            if let Some(in_flight) = self.in_flight.remove(&local_event_id) {
                tracing::debug!(%local_event_id, "Ack timed out; enqueueing durably");
                if let Err(error) = self.journal.append(&in_flight.event).await {
                    tracing::warn!(%local_event_id, error = %error, "Failed to journal timed-out event");
                }
            }
        }

        if let Some(sent_at) = self.batch_sent_at {
            if now.saturating_duration_since(sent_at) >= self.config.batch_timeout {
                tracing::warn!("Batch sync timed out; retrying");
                self.batch_sent_at = None;
                if self.connection == ConnectionState::Connected {
                    self.begin_resync(now).await;
                }
            }
        }
    }

    /// Drain ready inbound traffic and run maintenance. Call this from the
    /// UI event loop; it never blocks.
    pub async fn pump(&mut self, connection: &mut Connection) {
        loop {
            match connection.inbound.try_recv() {
                Ok(message) => {
                    let now = Instant::now();
                    self.handle_server_message(message, now).await;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.handle_disconnect().await;
                    break;
                }
            }
        }
        self.tick(Instant::now()).await;
    }

    pub async fn handle_server_message(&mut self, message: ServerMessage, now: Instant) {
        match message {
            ServerMessage::JoinSuccess { .. } => {
                self.joined = true;
                self.connection = ConnectionState::Connected;
                self.notifications.push(SyncEvent::Connected);
                self.begin_resync(now).await;
            }
            ServerMessage::JoinError { error, .. } => {
                tracing::warn!(error = %error, "Join rejected");
                self.notifications.push(SyncEvent::ServerError { message: error });
                self.connection = ConnectionState::Disconnected;
                self.out = None;
            }
            ServerMessage::CanvasState { shapes, version, .. } => {
                self.cache
                    .replace_snapshot(&crate::dto::events::CanvasStateWire { shapes, version });
                self.notifications.push(SyncEvent::StateChanged);
            }
            ServerMessage::EventAck {
                local_event_id,
                version,
                stored,
                had_conflict,
                ..
            } => {
                self.in_flight.remove(&local_event_id);
                self.cache.remove_pending(&local_event_id);
                if let Err(error) = self.journal.remove(&local_event_id).await {
                    tracing::warn!(%local_event_id, error = %error, "Failed to clear acked event");
                }
                if stored {
                    self.cache.note_version(version);
                }
                if had_conflict {
                    // The server rewrote our payload; pull the resolved tail.
                    self.request_incremental().await;
                }
            }
            ServerMessage::ShapeEvent {
                event_type,
                shape_id,
                payload,
                version,
                ..
            } => {
                let conflicted = self.cache.apply_remote_event(
                    event_type,
                    shape_id,
                    &payload,
                    version,
                    Utc::now(),
                );
                if conflicted {
                    self.notifications
                        .push(SyncEvent::ConflictResolved { shape_id });
                }
                self.notifications.push(SyncEvent::StateChanged);
            }
            ServerMessage::BatchSyncResult {
                success,
                current_state,
                conflicts,
                rejected_events,
                error,
                ..
            } => {
                self.batch_sent_at = None;
                for rejection in &rejected_events {
                    tracing::warn!(
                        local_event_id = %rejection.local_event_id,
                        error = %rejection.error,
                        "Server refused a queued event"
                    );
                    self.notifications.push(SyncEvent::ServerError {
                        message: rejection.error.clone(),
                    });
                }
                if success {
                    if let Some(state) = current_state.as_ref() {
                        self.cache.replace_snapshot(state);
                    }
                    self.cache.clear_pending();
                    self.in_flight.clear();
                    if let Err(error) =
                        self.journal.clear_canvas(self.cache.canvas_id()).await
                    {
                        tracing::warn!(error = %error, "Failed to clear journal after sync");
                    }
                    for conflict in conflicts {
                        self.notifications.push(SyncEvent::ConflictResolved {
                            shape_id: conflict.shape_id,
                        });
                    }
                    self.notifications.push(SyncEvent::Resynced);
                    self.notifications.push(SyncEvent::StateChanged);
                } else {
                    let message = error.unwrap_or_else(|| "batch sync failed".to_string());
                    tracing::warn!(error = %message, "Batch sync rejected");
                    self.notifications.push(SyncEvent::ServerError { message });
                }
            }
            ServerMessage::IncrementalUpdate { events } => {
                for event in events {
                    self.cache.apply_remote_event(
                        event.event_type,
                        event.shape_id,
                        &event.payload,
                        Some(event.version),
                        event.created_at,
                    );
                }
                self.notifications.push(SyncEvent::StateChanged);
            }
            ServerMessage::CursorMove { user_id, x, y, .. } => {
                self.notifications.push(SyncEvent::PeerCursor { user_id, x, y });
            }
            ServerMessage::UserJoined { user_id, username } => {
                self.notifications
                    .push(SyncEvent::PeerJoined { user_id, username });
            }
            ServerMessage::UserLeft { user_id, .. } => {
                self.notifications.push(SyncEvent::PeerLeft { user_id });
            }
            ServerMessage::Ping => {
                if let Some(out) = self.out.as_ref() {
                    if out.send(ClientMessage::Pong).await.is_err() {
                        self.handle_disconnect().await;
                    }
                }
            }
            ServerMessage::Error { error } => {
                self.notifications.push(SyncEvent::ServerError { message: error });
            }
        }
    }

    /// Transport gone: every in-flight send falls back to the durable queue
    /// and the next reconnect replays it.
    pub async fn handle_disconnect(&mut self) {
        if self.connection == ConnectionState::Disconnected {
            return;
        }
        self.connection = ConnectionState::Disconnected;
        self.out = None;
        self.joined = false;
        self.join_sent_at = None;
        self.batch_sent_at = None;
        let in_flight: Vec<InFlight> = self.in_flight.drain().map(|(_, v)| v).collect();
        for entry in in_flight {
            if let Err(error) = self.journal.append(&entry.event).await {
                tracing::warn!(
                    local_event_id = %entry.event.local_event_id,
                    error = %error,
                    "Failed to journal in-flight event on disconnect"
                );
            }
        }
        self.notifications.push(SyncEvent::Disconnected);
    }

    /// Flush coalesced edits that have gone quiet (or all of them when
    /// forced before a batch sync), attaching the vector clock and the
    /// per-property timestamps the resolver needs.
    async fn flush_edits(&mut self, now: Instant, force: bool) {
        let ready: Vec<Uuid> = self
            .coalesced
            .iter()
            .filter(|(_, entry)| {
                force
                    || now.saturating_duration_since(entry.last_touched)
                        >= self.config.edit_debounce
            })
            .map(|(shape_id, _)| *shape_id)
            .collect();

        for shape_id in ready {
            let Some(entry) = self.coalesced.remove(&shape_id) else {
                continue;
            };
            let mut vector_clock = self
                .cache
                .effective_shape(shape_id)
                .map(|shape| shape.vector_clock)
                .unwrap_or_default();
            vector_clock.increment(&self.user_id.to_string());

            let payload = serde_json::json!({
                "properties": Value::Object(entry.properties),
                "vectorClock": vector_clock,
                "propertyTimestamps": entry.property_timestamps,
            });
            let event = PendingEvent {
                local_event_id: entry.local_event_id,
                canvas_id: self.cache.canvas_id(),
                kind: EventKind::ShapeEdited,
                shape_id: Some(shape_id),
                payload,
                user_id: self.user_id,
                timestamp: entry.first_timestamp,
            };
            self.cache.upsert_pending(event.clone());
            self.attempt_send(event, now).await;
        }
    }

    async fn attempt_send(&mut self, event: PendingEvent, now: Instant) {
        let out = if self.connection == ConnectionState::Connected {
            self.out.clone()
        } else {
            None
        };
        let Some(out) = out else {
            if let Err(error) = self.journal.append(&event).await {
                tracing::warn!(
                    local_event_id = %event.local_event_id,
                    error = %error,
                    "Failed to journal offline event"
                );
            }
            return;
        };

        let message = ClientMessage::ShapeEvent {
            local_event_id: event.local_event_id.clone(),
            event_type: event.kind,
            shape_id: event.shape_id,
            payload: event.payload.clone(),
            timestamp: Some(event.timestamp),
        };
        if out.send(message).await.is_err() {
            self.handle_disconnect().await;
            if let Err(error) = self.journal.append(&event).await {
                tracing::warn!(
                    local_event_id = %event.local_event_id,
                    error = %error,
                    "Failed to journal event after send failure"
                );
            }
            return;
        }
        self.in_flight.insert(
            event.local_event_id.clone(),
            InFlight {
                event,
                sent_at: now,
            },
        );
    }

    /// Reconnect replay: flush anything still buffering, then ship the whole
    /// durable queue with our last known version.
    async fn begin_resync(&mut self, now: Instant) {
        self.flush_edits(now, true).await;
        let events: Vec<_> = self
            .journal
            .pending_for(self.cache.canvas_id())
            .iter()
            .map(|event| event.to_wire())
            .collect();
        let message = ClientMessage::BatchSync {
            events,
            last_known_version: self.cache.version(),
        };
        if let Some(out) = self.out.as_ref() {
            if out.send(message).await.is_err() {
                self.handle_disconnect().await;
                return;
            }
            self.batch_sent_at = Some(now);
        }
    }

    async fn request_incremental(&mut self) {
        if let Some(out) = self.out.as_ref() {
            let message = ClientMessage::GetState {
                since_version: Some(self.cache.version()),
            };
            if out.send(message).await.is_err() {
                self.handle_disconnect().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn queue_with_journal() -> (SyncQueue, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let journal = EventJournal::open(dir.path().join("pending.jsonl"))
            .await
            .unwrap();
        let queue = SyncQueue::new(
            Uuid::new_v4(),
            Some("ada".into()),
            Uuid::new_v4(),
            journal,
            QueueConfig::default(),
        );
        (queue, dir)
    }

    async fn connect(queue: &mut SyncQueue) -> mpsc::Receiver<ClientMessage> {
        let (tx, mut rx) = mpsc::channel(64);
        let now = Instant::now();
        queue.attach_transport(tx, now).await.unwrap();
        // Server answers the join.
        assert!(matches!(rx.recv().await, Some(ClientMessage::JoinCanvas { .. })));
        let canvas_id = queue.canvas_id();
        queue
            .handle_server_message(
                ServerMessage::JoinSuccess {
                    canvas_id,
                    user_id: Uuid::new_v4(),
                    username: None,
                },
                now,
            )
            .await;
        // Reconnect replay always issues a batch sync.
        assert!(matches!(rx.recv().await, Some(ClientMessage::BatchSync { .. })));
        rx
    }

    fn move_payload() -> Value {
        json!({"position": {"x": 10.0, "y": 20.0}})
    }

    #[tokio::test]
    async fn offline_submit_goes_to_durable_queue() {
        let (mut queue, _dir) = queue_with_journal().await;
        let shape_id = Uuid::new_v4();
        queue
            .submit_event(EventKind::ShapeMoved, Some(shape_id), move_payload(), Instant::now())
            .await
            .unwrap();
        assert_eq!(queue.journal_len(), 1);
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn connected_submit_sends_and_awaits_ack() {
        let (mut queue, _dir) = queue_with_journal().await;
        let mut rx = connect(&mut queue).await;

        let shape_id = Uuid::new_v4();
        let local_event_id = queue
            .submit_event(EventKind::ShapeMoved, Some(shape_id), move_payload(), Instant::now())
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(ClientMessage::ShapeEvent { .. })));
        assert_eq!(queue.in_flight_len(), 1);
        assert_eq!(queue.journal_len(), 0);

        queue
            .handle_server_message(
                ServerMessage::EventAck {
                    local_event_id,
                    event_id: Some(Uuid::new_v4()),
                    version: 1,
                    stored: true,
                    had_conflict: false,
                },
                Instant::now(),
            )
            .await;
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.cache().version(), 1);
        assert!(queue.cache().pending().is_empty());
    }

    #[tokio::test]
    async fn ack_timeout_falls_back_to_journal() {
        let (mut queue, _dir) = queue_with_journal().await;
        let _rx = connect(&mut queue).await;

        let start = Instant::now();
        queue
            .submit_event(EventKind::ShapeMoved, Some(Uuid::new_v4()), move_payload(), start)
            .await
            .unwrap();
        assert_eq!(queue.in_flight_len(), 1);

        queue.tick(start + Duration::from_secs(6)).await;
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.journal_len(), 1);
    }

    #[tokio::test]
    async fn rapid_edits_coalesce_into_one_send() {
        let (mut queue, _dir) = queue_with_journal().await;
        let mut rx = connect(&mut queue).await;

        let shape_id = Uuid::new_v4();
        let start = Instant::now();
        let first = queue
            .submit_event(
                EventKind::ShapeEdited,
                Some(shape_id),
                json!({"properties": {"strokeColor": "#f00"}}),
                start,
            )
            .await
            .unwrap();
        let second = queue
            .submit_event(
                EventKind::ShapeEdited,
                Some(shape_id),
                json!({"properties": {"strokeWidth": 5}}),
                start + Duration::from_millis(50),
            )
            .await
            .unwrap();
        assert_eq!(first, second);
        // Still buffering: nothing on the wire yet.
        assert!(rx.try_recv().is_err());

        queue.tick(start + Duration::from_millis(500)).await;
        match rx.try_recv().unwrap() {
            ClientMessage::ShapeEvent { event_type, payload, .. } => {
                assert_eq!(event_type, EventKind::ShapeEdited);
                assert_eq!(payload["properties"]["strokeColor"], json!("#f00"));
                assert_eq!(payload["properties"]["strokeWidth"], json!(5));
                assert!(payload["vectorClock"].is_object());
                assert!(payload["propertyTimestamps"]["strokeWidth"].is_i64());
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cursor_moves_are_throttled() {
        let (mut queue, _dir) = queue_with_journal().await;
        let mut rx = connect(&mut queue).await;

        let start = Instant::now();
        queue.send_cursor(1.0, 1.0, start).await.unwrap();
        queue
            .send_cursor(2.0, 2.0, start + Duration::from_millis(10))
            .await
            .unwrap();
        queue
            .send_cursor(3.0, 3.0, start + Duration::from_millis(80))
            .await
            .unwrap();

        assert!(matches!(rx.try_recv(), Ok(ClientMessage::CursorMove { x, .. }) if x == 1.0));
        assert!(matches!(rx.try_recv(), Ok(ClientMessage::CursorMove { x, .. }) if x == 3.0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reconnect_replays_journal_and_clears_it() {
        let (mut queue, _dir) = queue_with_journal().await;
        let shape_id = Uuid::new_v4();
        queue
            .submit_event(EventKind::ShapeMoved, Some(shape_id), move_payload(), Instant::now())
            .await
            .unwrap();
        assert_eq!(queue.journal_len(), 1);

        let (tx, mut rx) = mpsc::channel(64);
        let now = Instant::now();
        queue.attach_transport(tx, now).await.unwrap();
        assert_eq!(queue.connection_state(), ConnectionState::Reconnecting);
        assert!(matches!(rx.recv().await, Some(ClientMessage::JoinCanvas { .. })));

        let canvas_id = queue.canvas_id();
        queue
            .handle_server_message(
                ServerMessage::JoinSuccess {
                    canvas_id,
                    user_id: Uuid::new_v4(),
                    username: None,
                },
                now,
            )
            .await;
        match rx.recv().await.unwrap() {
            ClientMessage::BatchSync { events, last_known_version } => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].shape_id, Some(shape_id));
                assert_eq!(last_known_version, 0);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        queue
            .handle_server_message(
                ServerMessage::BatchSyncResult {
                    success: true,
                    stored_events: Vec::new(),
                    missed_events: Vec::new(),
                    current_state: Some(crate::dto::events::CanvasStateWire {
                        shapes: vec![],
                        version: 7,
                    }),
                    conflicts: Vec::new(),
                    rejected_events: Vec::new(),
                    error: None,
                },
                now,
            )
            .await;
        assert_eq!(queue.journal_len(), 0);
        assert!(queue.cache().pending().is_empty());
        assert_eq!(queue.cache().version(), 7);
    }

    #[tokio::test]
    async fn batch_rejections_surface_as_notifications() {
        let (mut queue, _dir) = queue_with_journal().await;
        let _rx = connect(&mut queue).await;
        queue.take_notifications();

        queue
            .handle_server_message(
                ServerMessage::BatchSyncResult {
                    success: true,
                    stored_events: Vec::new(),
                    missed_events: Vec::new(),
                    current_state: Some(crate::dto::events::CanvasStateWire {
                        shapes: vec![],
                        version: 3,
                    }),
                    conflicts: Vec::new(),
                    rejected_events: vec![crate::dto::events::RejectedEventWire {
                        local_event_id: "e-1".into(),
                        error: "Event kind SHAPE_ROTATED is accepted for reads only".into(),
                    }],
                    error: None,
                },
                Instant::now(),
            )
            .await;

        let notifications = queue.take_notifications();
        assert!(notifications.iter().any(|event| matches!(
            event,
            SyncEvent::ServerError { message } if message.contains("reads only")
        )));
        assert!(notifications
            .iter()
            .any(|event| matches!(event, SyncEvent::Resynced)));
    }

    #[tokio::test]
    async fn server_ping_gets_a_pong() {
        let (mut queue, _dir) = queue_with_journal().await;
        let mut rx = connect(&mut queue).await;

        queue
            .handle_server_message(ServerMessage::Ping, Instant::now())
            .await;
        assert!(matches!(rx.try_recv(), Ok(ClientMessage::Pong)));
    }

    #[tokio::test]
    async fn ephemeral_kinds_are_rejected_by_submit() {
        let (mut queue, _dir) = queue_with_journal().await;
        let result = queue
            .submit_event(EventKind::CursorMove, None, json!({}), Instant::now())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disconnect_moves_in_flight_to_journal() {
        let (mut queue, _dir) = queue_with_journal().await;
        let _rx = connect(&mut queue).await;
        queue
            .submit_event(EventKind::ShapeMoved, Some(Uuid::new_v4()), move_payload(), Instant::now())
            .await
            .unwrap();
        assert_eq!(queue.in_flight_len(), 1);

        queue.handle_disconnect().await;
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.journal_len(), 1);
        assert_eq!(queue.connection_state(), ConnectionState::Disconnected);
    }
}
