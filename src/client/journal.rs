use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::{
    client::SyncError,
    dto::events::PendingEventWire,
    models::events::EventKind,
};

/// One locally-authored event awaiting durable sync to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvent {
    pub local_event_id: String,
    pub canvas_id: Uuid,
    #[serde(alias = "eventType")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub user_id: Uuid,
    /// Wall-clock milliseconds at authoring time; batch order key.
    pub timestamp: i64,
}

impl PendingEvent {
    pub fn to_wire(&self) -> PendingEventWire {
        PendingEventWire {
            local_event_id: self.local_event_id.clone(),
            canvas_id: Some(self.canvas_id),
            event_type: self.kind,
            shape_id: self.shape_id,
            payload: self.payload.clone(),
            user_id: Some(self.user_id),
            timestamp: Some(self.timestamp),
        }
    }
}

/// Durable pending-event log: one JSON document per line, appended on
/// enqueue, compacted on removal. Replayed on open so enqueued events
/// survive a process restart.
pub struct EventJournal {
    path: PathBuf,
    entries: BTreeMap<String, PendingEvent>,
}

impl EventJournal {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref().to_path_buf();
        let mut entries = BTreeMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for line in contents.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<PendingEvent>(line) {
                        Ok(event) => {
                            entries.insert(event.local_event_id.clone(), event);
                        }
                        Err(error) => {
                            // A torn tail write from a crash; everything up
                            // to it replayed fine.
                            tracing::warn!(error = %error, "Skipping unreadable journal line");
                        }
                    }
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(SyncError::Storage(error)),
        }

        Ok(Self { path, entries })
    }

    /// Persist one event. Only storable kinds belong in the journal.
    pub async fn append(&mut self, event: &PendingEvent) -> Result<(), SyncError> {
        if !event.kind.is_storable() {
            return Err(SyncError::InvalidEvent(format!(
                "{} is not a storable kind",
                event.kind.as_str()
            )));
        }
        if self.entries.contains_key(&event.local_event_id) {
            return Ok(());
        }

        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        self.entries.insert(event.local_event_id.clone(), event.clone());
        Ok(())
    }

    pub async fn remove(&mut self, local_event_id: &str) -> Result<(), SyncError> {
        if self.entries.remove(local_event_id).is_some() {
            self.rewrite().await?;
        }
        Ok(())
    }

    /// Drop every entry for the canvas, typically after a successful batch
    /// sync acknowledged them all.
    pub async fn clear_canvas(&mut self, canvas_id: Uuid) -> Result<(), SyncError> {
        let before = self.entries.len();
        self.entries.retain(|_, event| event.canvas_id != canvas_id);
        if self.entries.len() != before {
            self.rewrite().await?;
        }
        Ok(())
    }

    /// Pending events for one canvas in timestamp order.
    pub fn pending_for(&self, canvas_id: Uuid) -> Vec<PendingEvent> {
        let mut events: Vec<PendingEvent> = self
            .entries
            .values()
            .filter(|event| event.canvas_id == canvas_id)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.timestamp);
        events
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compaction: write the surviving entries to a sibling file and swap it
    /// into place, so a crash mid-compaction never loses the old log.
    async fn rewrite(&self) -> Result<(), SyncError> {
        let tmp_path = self.path.with_extension("tmp");
        let mut contents = String::new();
        for event in self.entries.values() {
            contents.push_str(&serde_json::to_string(event)?);
            contents.push('\n');
        }
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
