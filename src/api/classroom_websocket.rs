use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use warp::ws::{Message, WebSocket};

use crate::classroom::{ClassroomServer, Envelope, PeerLink, SignalType};
use crate::collaborators::LeaveReason;
use crate::error::{Result, SignalingError};

/// Upper bound for flushing the last control envelopes to a departing client
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocket, Message>;

/// Serves one signaling connection: handshake, then relay until the client
/// leaves, the transport fails, or the link is closed by the server.
pub async fn handle_classroom_websocket(websocket: WebSocket, session_id: String, server: Arc<ClassroomServer>) {
    tracing::info!(session_id = %session_id, "New classroom WebSocket connection");

    let (mut ws_sender, mut ws_receiver) = websocket.split();

    let token = match await_join(&mut ws_receiver, server.config().join_timeout).await {
        Ok(token) => token,
        Err(e) => {
            tracing::info!(session_id = %session_id, error = %e, "Handshake failed");
            send_rejection(&mut ws_sender, &e).await;
            return;
        }
    };

    let link = server.new_link();
    let admission = match server.on_connect(&session_id, &token, link.clone()).await {
        Ok(admission) => admission,
        Err(e) => {
            tracing::info!(
                session_id = %session_id,
                reason = ?e.rejection_reason(),
                error = %e,
                "Join rejected"
            );
            send_rejection(&mut ws_sender, &e).await;
            return;
        }
    };
    let participant_id = admission.participant.participant_id;

    // welcome is already queued, so it is the first frame the client sees
    let sender_task = tokio::spawn(write_envelopes(link.clone(), ws_sender));

    let reason = loop {
        tokio::select! {
            _ = link.closed() => break LeaveReason::ConnectionClosed,
            frame = ws_receiver.next() => match frame {
                Some(Ok(message)) => {
                    link.touch();
                    if message.is_close() {
                        break LeaveReason::ConnectionClosed;
                    }
                    let Ok(text) = message.to_str() else {
                        continue;
                    };
                    match Envelope::parse(text) {
                        Ok(envelope) => match envelope.kind {
                            SignalType::Leave => break LeaveReason::Left,
                            SignalType::Heartbeat => {}
                            SignalType::Join => {
                                tracing::debug!(
                                    session_id = %session_id,
                                    participant_id = %participant_id,
                                    "Ignoring repeated join"
                                );
                            }
                            _ => server.handle_envelope(&session_id, &participant_id, envelope).await,
                        },
                        Err(e) => {
                            tracing::warn!(
                                session_id = %session_id,
                                participant_id = %participant_id,
                                error = %e,
                                raw_message = %text,
                                "Failed to parse envelope"
                            );
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(
                        session_id = %session_id,
                        participant_id = %participant_id,
                        error = %e,
                        "WebSocket error"
                    );
                    break LeaveReason::ConnectionClosed;
                }
                None => break LeaveReason::ConnectionClosed,
            }
        }
    };

    // no-op when the server already removed the participant
    server.on_disconnect(&session_id, &participant_id, reason).await;
    link.close();

    let abort = sender_task.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, sender_task)
        .await
        .is_err()
    {
        abort.abort();
    }

    tracing::info!(
        session_id = %session_id,
        participant_id = %participant_id,
        "Classroom WebSocket connection closed"
    );
}

/// Waits for the first text frame, which must be a `join` carrying a token
async fn await_join(receiver: &mut SplitStream<WebSocket>, timeout: Duration) -> Result<String> {
    tokio::time::timeout(timeout, read_join(receiver))
        .await
        .map_err(|_| SignalingError::InvalidHandshake("join timed out".to_string()))?
}

async fn read_join(receiver: &mut SplitStream<WebSocket>) -> Result<String> {
    while let Some(frame) = receiver.next().await {
        let message =
            frame.map_err(|e| SignalingError::InvalidHandshake(format!("transport error: {}", e)))?;
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };

        let envelope = Envelope::parse(text)
            .map_err(|e| SignalingError::InvalidHandshake(format!("malformed join frame: {}", e)))?;
        return envelope
            .join_token()
            .map(str::to_string)
            .ok_or_else(|| SignalingError::InvalidHandshake("first frame must be a join with a token".to_string()));
    }
    Err(SignalingError::InvalidHandshake(
        "connection closed before join".to_string(),
    ))
}

async fn send_rejection(ws_sender: &mut WsSink, error: &SignalingError) {
    let envelope = Envelope::rejected(error.rejection_reason(), error.to_string());
    match envelope.to_json() {
        Ok(text) => {
            if let Err(e) = ws_sender.send(Message::text(text)).await {
                tracing::debug!(error = %e, "Failed to send rejection");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize rejection"),
    }
    let _ = ws_sender.close().await;
}

/// Drains the link onto the socket until the link is closed and flushed
async fn write_envelopes(link: Arc<PeerLink>, mut ws_sender: WsSink) {
    while let Some(envelope) = link.next().await {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, kind = ?envelope.kind, "Failed to serialize envelope");
                continue;
            }
        };
        if let Err(e) = ws_sender.send(Message::text(text)).await {
            tracing::debug!(error = %e, "Failed to send WebSocket message");
            link.close();
            break;
        }
    }
    let _ = ws_sender.close().await;
}
