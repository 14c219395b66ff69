//! Live session events over WebSocket.
//!
//! `GET /sessions/:session_id/events` upgrades to a socket that receives
//! every event published on the session's topic: chain updates, window
//! rotations, attendance milestones and the end of the session. The
//! stream is one-way; the only client frames that matter are close frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use baton_node::{NodeMetrics, TopicEvent};
use baton_types::{session_topic, SessionEvent, SessionId};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::auth::Caller;
use crate::error::RpcError;
use crate::handlers::blocking;
use crate::server::RpcState;

/// Frames sent to subscribers.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage<'a> {
    Event {
        topic: &'a str,
        event: &'a SessionEvent,
    },
    /// The subscriber fell behind and `missed` events were dropped.
    Lagged { missed: u64 },
}

pub async fn session_events(
    ws: WebSocketUpgrade,
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
) -> Result<impl IntoResponse, RpcError> {
    let session_id = SessionId::parse(sid)?;
    let check = session_id.clone();
    blocking(&state.service, move |s| s.get_session(&identity, &check)).await?;

    // Subscribe before the upgrade so nothing published in between is lost.
    let rx = state.notifier.subscribe();
    let topic = session_topic(&session_id);
    let metrics = Arc::clone(&state.metrics);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, rx, topic, metrics)))
}

async fn handle_socket(
    socket: WebSocket,
    rx: broadcast::Receiver<Arc<TopicEvent>>,
    topic: String,
    metrics: Arc<NodeMetrics>,
) {
    let (sender, mut receiver) = socket.split();
    metrics.event_subscribers.inc();
    debug!(topic = %topic, "event subscriber connected");

    let mut forwarder = tokio::spawn(forward_events(rx, sender, topic.clone()));
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "event socket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut forwarder => reader.abort(),
        _ = &mut reader => forwarder.abort(),
    }

    metrics.event_subscribers.dec();
    debug!(topic = %topic, "event subscriber disconnected");
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &StreamMessage<'_>,
) -> Result<(), ()> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "failed to encode event frame");
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

async fn forward_events(
    mut rx: broadcast::Receiver<Arc<TopicEvent>>,
    mut sender: SplitSink<WebSocket, Message>,
    topic: String,
) {
    loop {
        let frame_sent = match rx.recv().await {
            Ok(message) => {
                if message.topic != topic {
                    continue;
                }
                send_frame(
                    &mut sender,
                    &StreamMessage::Event {
                        topic: &message.topic,
                        event: &message.event,
                    },
                )
                .await
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(topic = %topic, missed, "event subscriber lagged");
                send_frame(&mut sender, &StreamMessage::Lagged { missed }).await
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(topic = %topic, "event channel closed");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        };
        if frame_sent.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_tagged() {
        let event = SessionEvent::SessionEnded {
            session_id: SessionId::new("s1"),
        };
        let json = serde_json::to_value(StreamMessage::Event {
            topic: "session/s1",
            event: &event,
        })
        .unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["topic"], "session/s1");
        assert_eq!(json["event"]["type"], "session_ended");

        let lagged = serde_json::to_value(StreamMessage::Lagged { missed: 3 }).unwrap();
        assert_eq!(lagged, serde_json::json!({"type": "lagged", "missed": 3}));
    }
}
