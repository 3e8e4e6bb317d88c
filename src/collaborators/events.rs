use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::authorization::BearerToken;
use crate::error::Result;

/// Why a participant left its room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// Explicit `leave` from the client
    Left,
    /// Transport closed or failed
    ConnectionClosed,
    HeartbeatTimeout,
    SessionEnded,
}

impl std::fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LeaveReason::Left => "left",
            LeaveReason::ConnectionClosed => "connection_closed",
            LeaveReason::HeartbeatTimeout => "heartbeat_timeout",
            LeaveReason::SessionEnded => "session_ended",
        })
    }
}

/// Side effects emitted by the signaling core
#[derive(Debug, Clone, PartialEq)]
pub enum ClassroomEvent {
    ParticipantJoined {
        session_id: String,
        user_id: String,
        participant_id: String,
        credential: Option<BearerToken>,
        at: DateTime<Utc>,
    },
    ParticipantLeft {
        session_id: String,
        user_id: String,
        participant_id: String,
        joined_at: DateTime<Utc>,
        left_at: DateTime<Utc>,
        reason: LeaveReason,
    },
    ChatPosted {
        session_id: String,
        user_id: String,
        participant_id: String,
        credential: Option<BearerToken>,
        payload: Value,
        at: DateTime<Utc>,
    },
    HandRaised {
        session_id: String,
        user_id: String,
        participant_id: String,
        raised: bool,
        at: DateTime<Utc>,
    },
}

/// Attendance bookkeeping. `credential` is the token the user joined with,
/// when the transport had one.
#[async_trait]
pub trait AttendanceRecorder: Send + Sync {
    async fn record_join(
        &self,
        session_id: &str,
        user_id: &str,
        credential: Option<&BearerToken>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn record_leave(
        &self,
        _session_id: &str,
        _user_id: &str,
        _joined_at: DateTime<Utc>,
        _left_at: DateTime<Utc>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Optional history store for chat and hand-raise signals
#[async_trait]
pub trait ChatArchive: Send + Sync {
    async fn store_chat(
        &self,
        session_id: &str,
        user_id: &str,
        credential: Option<&BearerToken>,
        payload: &Value,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn store_hand_raise(
        &self,
        _session_id: &str,
        _user_id: &str,
        _raised: bool,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Collaborator used when no backend is configured: logs and succeeds
#[derive(Debug, Default, Clone)]
pub struct LoggingSink;

#[async_trait]
impl AttendanceRecorder for LoggingSink {
    async fn record_join(
        &self,
        session_id: &str,
        user_id: &str,
        _credential: Option<&BearerToken>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        tracing::info!(session_id = %session_id, user_id = %user_id, at = %at, "Attendance join");
        Ok(())
    }

    async fn record_leave(
        &self,
        session_id: &str,
        user_id: &str,
        joined_at: DateTime<Utc>,
        left_at: DateTime<Utc>,
    ) -> Result<()> {
        tracing::info!(
            session_id = %session_id,
            user_id = %user_id,
            duration_secs = (left_at - joined_at).num_seconds(),
            "Attendance leave"
        );
        Ok(())
    }
}

#[async_trait]
impl ChatArchive for LoggingSink {
    async fn store_chat(
        &self,
        session_id: &str,
        user_id: &str,
        _credential: Option<&BearerToken>,
        payload: &Value,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        tracing::debug!(session_id = %session_id, user_id = %user_id, payload = %payload, "Chat message");
        Ok(())
    }
}

enum QueueItem {
    Event(ClassroomEvent),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking queue in front of the side-effect collaborators.
///
/// `emit` returns immediately; a background task delivers events in order.
/// A failing collaborator is logged and never affects signaling.
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::UnboundedSender<QueueItem>,
}

impl EventQueue {
    /// Must be called inside a tokio runtime
    pub fn new(attendance: Arc<dyn AttendanceRecorder>, archive: Arc<dyn ChatArchive>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::process_events(attendance, archive, receiver));
        Self { sender }
    }

    pub fn logging() -> Self {
        let sink = Arc::new(LoggingSink);
        Self::new(sink.clone(), sink)
    }

    pub fn emit(&self, event: ClassroomEvent) {
        tracing::debug!(event = ?event, "Queueing classroom event");
        if self.sender.send(QueueItem::Event(event)).is_err() {
            tracing::error!("Classroom event processor is gone, dropping event");
        }
    }

    /// Waits until every event emitted before this call has been handled
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(QueueItem::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn process_events(
        attendance: Arc<dyn AttendanceRecorder>,
        archive: Arc<dyn ChatArchive>,
        mut receiver: mpsc::UnboundedReceiver<QueueItem>,
    ) {
        tracing::debug!("Classroom event processor started");

        while let Some(item) = receiver.recv().await {
            let event = match item {
                QueueItem::Event(event) => event,
                QueueItem::Flush(done) => {
                    let _ = done.send(());
                    continue;
                }
            };

            if let Err(e) = Self::handle_event(attendance.as_ref(), archive.as_ref(), &event).await {
                tracing::error!(error = %e, event = ?event, "Failed to process classroom event");
            }
        }

        tracing::debug!("Classroom event processor stopped");
    }

    async fn handle_event(
        attendance: &dyn AttendanceRecorder,
        archive: &dyn ChatArchive,
        event: &ClassroomEvent,
    ) -> Result<()> {
        match event {
            ClassroomEvent::ParticipantJoined {
                session_id,
                user_id,
                credential,
                at,
                ..
            } => {
                attendance
                    .record_join(session_id, user_id, credential.as_ref(), *at)
                    .await
            }
            ClassroomEvent::ParticipantLeft {
                session_id,
                user_id,
                joined_at,
                left_at,
                ..
            } => {
                attendance
                    .record_leave(session_id, user_id, *joined_at, *left_at)
                    .await
            }
            ClassroomEvent::ChatPosted {
                session_id,
                user_id,
                credential,
                payload,
                at,
                ..
            } => {
                archive
                    .store_chat(session_id, user_id, credential.as_ref(), payload, *at)
                    .await
            }
            ClassroomEvent::HandRaised {
                session_id,
                user_id,
                raised,
                at,
                ..
            } => archive.store_hand_raise(session_id, user_id, *raised, *at).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every collaborator call as a short string
    #[derive(Default)]
    pub struct RecordingSink {
        pub calls: Mutex<Vec<String>>,
        /// Token each join and chat was made with
        pub credentials: Mutex<Vec<Option<String>>>,
        pub fail_joins: bool,
    }

    impl RecordingSink {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn credentials(&self) -> Vec<Option<String>> {
            self.credentials.lock().unwrap().clone()
        }

        fn remember(&self, credential: Option<&BearerToken>) {
            self.credentials
                .lock()
                .unwrap()
                .push(credential.map(|token| token.expose().to_string()));
        }
    }

    #[async_trait]
    impl AttendanceRecorder for RecordingSink {
        async fn record_join(
            &self,
            session_id: &str,
            user_id: &str,
            credential: Option<&BearerToken>,
            _at: DateTime<Utc>,
        ) -> Result<()> {
            self.remember(credential);
            self.calls
                .lock()
                .unwrap()
                .push(format!("join:{}:{}", session_id, user_id));
            if self.fail_joins {
                return Err(crate::error::SignalingError::BackendStatus(503));
            }
            Ok(())
        }

        async fn record_leave(
            &self,
            session_id: &str,
            user_id: &str,
            _joined_at: DateTime<Utc>,
            _left_at: DateTime<Utc>,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("leave:{}:{}", session_id, user_id));
            Ok(())
        }
    }

    #[async_trait]
    impl ChatArchive for RecordingSink {
        async fn store_chat(
            &self,
            session_id: &str,
            user_id: &str,
            credential: Option<&BearerToken>,
            _payload: &Value,
            _at: DateTime<Utc>,
        ) -> Result<()> {
            self.remember(credential);
            self.calls
                .lock()
                .unwrap()
                .push(format!("chat:{}:{}", session_id, user_id));
            Ok(())
        }

        async fn store_hand_raise(
            &self,
            session_id: &str,
            user_id: &str,
            raised: bool,
            _at: DateTime<Utc>,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("hand:{}:{}:{}", session_id, user_id, raised));
            Ok(())
        }
    }

    pub fn recording_queue() -> (EventQueue, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (EventQueue::new(sink.clone(), sink.clone()), sink)
    }
}
