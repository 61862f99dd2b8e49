use std::time::Duration;

use crate::realtime::room::Rooms;

const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Ping every live session on an interval and terminate the ones that never
/// answered the previous ping. Detaching dead sessions also sweeps rooms
/// they leave empty.
pub fn spawn_heartbeat(rooms: Rooms) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let terminated = rooms.sweep_sessions();
            if terminated > 0 {
                tracing::info!(terminated, "Heartbeat sweep closed unresponsive sessions");
            }
        }
    });
}
