//! WebSocket support for real-time ledger updates
//!
//! Provides a broadcast channel for pushing events to connected clients.

use crate::api::handlers::{ApiState, BlockInfo};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Maximum number of events to buffer per subscriber
const BROADCAST_CAPACITY: usize = 100;

/// WebSocket events that can be broadcast to clients
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsEvent {
    /// A product registration entered the pending pool
    RecordRegistered {
        record_id: String,
        product_id: String,
        manufacturer: String,
        pending_records: usize,
    },
    /// A block of pending records was mined
    BlockMined {
        block: BlockInfo,
        time_ms: u128,
        attempts: u64,
    },
    /// Connection established
    Connected { message: String },
}

/// Broadcaster for WebSocket events
#[derive(Debug)]
pub struct WsBroadcaster {
    sender: broadcast::Sender<WsEvent>,
}

impl WsBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Broadcast an event to all connected clients
    pub fn broadcast(&self, event: WsEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.sender.subscribe()
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// GET /ws - WebSocket upgrade
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    let broadcaster = state.ws_broadcaster.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

type EventSink = SplitSink<WebSocket, Message>;

async fn forward(sink: &mut EventSink, event: &WsEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    sink.send(Message::Text(json.into())).await
}

async fn handle_socket(socket: WebSocket, broadcaster: Arc<WsBroadcaster>) {
    let (mut sink, mut incoming) = socket.split();
    let mut events = broadcaster.subscribe();

    let welcome = WsEvent::Connected {
        message: "Connected to provenance ledger events".to_string(),
    };
    if forward(&mut sink, &welcome).await.is_err() {
        return;
    }

    // Clients only listen; inbound frames are drained until close
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if forward(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("WebSocket client lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = incoming.next() => match frame {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("WebSocket error: {}", e);
                    break;
                }
            },
        }
    }

    log::info!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_with_no_subscribers() {
        let broadcaster = WsBroadcaster::new();
        broadcaster.broadcast(WsEvent::Connected {
            message: "nobody listening".to_string(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let broadcaster = WsBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        broadcaster.broadcast(WsEvent::RecordRegistered {
            record_id: "r1".to_string(),
            product_id: "p1".to_string(),
            manufacturer: "Acme".to_string(),
            pending_records: 1,
        });

        match rx.recv().await.unwrap() {
            WsEvent::RecordRegistered { product_id, .. } => assert_eq!(product_id, "p1"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = WsEvent::BlockMined {
            block: BlockInfo {
                index: 1,
                hash: "0000abc123".to_string(),
                previous_hash: "00ff".to_string(),
                merkle_root: "merkle".to_string(),
                timestamp: 1_735_689_600_000_000,
                nonce: 12345,
                records: 3,
            },
            time_ms: 42,
            attempts: 12346,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BlockMined");
        assert_eq!(json["data"]["block"]["hash"], "0000abc123");
        assert_eq!(json["data"]["attempts"], 12346);
    }
}
