use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    client::SyncError,
    realtime::protocol::{ClientMessage, ServerMessage},
};

const TRANSPORT_BUFFER: usize = 256;

/// One live duplex channel to the server, as the queue consumes it. The
/// queue never touches sockets; tests wire up [`in_memory`] instead.
pub struct Connection {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<ServerMessage>,
}

/// Dial the server and spawn the reader/writer pumps. The inbound receiver
/// closing signals a lost connection to the queue.
pub async fn connect(url: &str) -> Result<Connection, SyncError> {
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|error| SyncError::Transport(error.to_string()))?;
    let (mut writer, mut reader) = stream.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(TRANSPORT_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<ServerMessage>(TRANSPORT_BUFFER);

    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(error = %error, "Failed to serialize outbound message");
                    continue;
                }
            };
            if writer.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(message) => {
                            if in_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "Dropping unreadable server frame");
                        }
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    Ok(Connection {
        outbound: out_tx,
        inbound: in_rx,
    })
}

/// The far side of an in-memory connection, for tests and local harnesses.
pub struct PeerEnd {
    pub inbound: mpsc::Receiver<ClientMessage>,
    pub outbound: mpsc::Sender<ServerMessage>,
}

/// A connected pair with no socket underneath.
pub fn in_memory() -> (Connection, PeerEnd) {
    let (out_tx, out_rx) = mpsc::channel(TRANSPORT_BUFFER);
    let (in_tx, in_rx) = mpsc::channel(TRANSPORT_BUFFER);
    (
        Connection {
            outbound: out_tx,
            inbound: in_rx,
        },
        PeerEnd {
            inbound: out_rx,
            outbound: in_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_pair_round_trips_both_ways() {
        let (mut connection, mut peer) = in_memory();

        connection
            .outbound
            .send(ClientMessage::LeaveCanvas)
            .await
            .unwrap();
        assert!(matches!(
            peer.inbound.recv().await,
            Some(ClientMessage::LeaveCanvas)
        ));

        peer.outbound.send(ServerMessage::Ping).await.unwrap();
        assert!(matches!(connection.inbound.recv().await, Some(ServerMessage::Ping)));
    }

    #[tokio::test]
    async fn dropping_peer_closes_inbound() {
        let (mut connection, peer) = in_memory();
        drop(peer);
        assert!(connection.inbound.recv().await.is_none());
    }
}
