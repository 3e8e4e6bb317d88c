use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::envelope::{Envelope, SignalType};
use super::lifecycle::{Admission, ConnectionManager};
use super::link::PeerLink;
use super::participant::Participant;
use super::relay::{RouteOutcome, SignalingRelay};
use super::room::RoomManager;
use super::session::{Session, SessionAction, SessionRegistry, SessionStatus};
use crate::collaborators::{Authorizer, ClassroomEvent, EventQueue, LeaveReason, UserProfile};
use crate::config::ClassroomConfig;
use crate::error::{Result, SignalingError};

/// Entry point of the signaling core. Owns the session registry, the room
/// table, the relay and the connection lifecycle.
pub struct ClassroomServer {
    config: ClassroomConfig,
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomManager>,
    relay: SignalingRelay,
    connections: ConnectionManager,
    authorizer: Arc<dyn Authorizer>,
    events: EventQueue,
}

impl ClassroomServer {
    /// `events` must already be running; this only wires the components together
    pub fn new(config: ClassroomConfig, authorizer: Arc<dyn Authorizer>, events: EventQueue) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomManager::new(sessions.clone(), config.room_capacity));
        let connections =
            ConnectionManager::new(sessions.clone(), rooms.clone(), authorizer.clone(), events.clone());

        Self {
            relay: SignalingRelay::new(rooms.clone()),
            config,
            sessions,
            rooms,
            connections,
            authorizer,
            events,
        }
    }

    /// Resolves a bearer token for the HTTP surface
    pub async fn authenticate(&self, token: &str) -> Result<UserProfile> {
        self.authorizer
            .identify(token)
            .await?
            .ok_or_else(|| SignalingError::unauthorized("unknown token"))
    }

    pub fn config(&self) -> &ClassroomConfig {
        &self.config
    }

    /// Fresh outbound link sized by the configured queue capacity
    pub fn new_link(&self) -> Arc<PeerLink> {
        Arc::new(PeerLink::new(self.config.outbound_queue_capacity))
    }

    pub fn register_session(&self, session: Session) -> Result<()> {
        self.sessions.register(session)
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id)
    }

    pub async fn member_count(&self, session_id: &str) -> usize {
        self.rooms.member_count(session_id).await
    }

    pub async fn members(&self, session_id: &str) -> Vec<Participant> {
        self.rooms.snapshot(session_id).await
    }

    pub fn room_exists(&self, session_id: &str) -> bool {
        self.rooms.room_exists(session_id)
    }

    /// Applies `action` to the session. When the session leaves `live` the
    /// room is torn down before this returns.
    pub async fn transition(&self, session_id: &str, action: SessionAction) -> Result<SessionStatus> {
        let (from, to) = self.sessions.transition(session_id, action)?;

        if from == SessionStatus::Live && to.is_terminal() {
            let disconnected = self.connections.teardown_room(session_id).await;
            tracing::info!(
                session_id = %session_id,
                action = %action,
                disconnected,
                "Session closed"
            );
        }
        Ok(to)
    }

    pub async fn on_connect(&self, session_id: &str, token: &str, link: Arc<PeerLink>) -> Result<Admission> {
        self.connections.on_connect(session_id, token, link).await
    }

    pub async fn on_disconnect(&self, session_id: &str, participant_id: &str, reason: LeaveReason) -> bool {
        self.connections
            .on_disconnect(session_id, participant_id, reason)
            .await
    }

    /// Handles one envelope received from a joined participant
    pub async fn handle_envelope(&self, session_id: &str, participant_id: &str, envelope: Envelope) {
        match envelope.kind {
            SignalType::HandRaise => self.handle_hand_raise(session_id, participant_id, &envelope).await,
            SignalType::Chat => {
                let payload = envelope.payload.clone();
                if let RouteOutcome::Routed { sender, .. } =
                    self.relay.route(session_id, participant_id, envelope).await
                {
                    self.events.emit(ClassroomEvent::ChatPosted {
                        session_id: session_id.to_string(),
                        user_id: sender.user_id,
                        participant_id: sender.participant_id,
                        credential: sender.credential,
                        payload,
                        at: Utc::now(),
                    });
                }
            }
            kind if kind.is_directed() => {
                if envelope.target_participant_id.is_none() {
                    tracing::debug!(
                        session_id = %session_id,
                        participant_id = %participant_id,
                        kind = ?kind,
                        "Directed envelope without target, dropping"
                    );
                    return;
                }
                self.relay.route(session_id, participant_id, envelope).await;
            }
            kind => {
                tracing::warn!(
                    session_id = %session_id,
                    participant_id = %participant_id,
                    kind = ?kind,
                    "Ignoring envelope type not accepted from clients"
                );
            }
        }
    }

    async fn handle_hand_raise(&self, session_id: &str, participant_id: &str, envelope: &Envelope) {
        let updated = match envelope.requested_hand_state() {
            Some(raised) => {
                self.rooms
                    .set_hand_raise(session_id, participant_id, raised)
                    .await
            }
            None => self.rooms.toggle_hand_raise(session_id, participant_id).await,
        };

        let participant = match updated {
            Ok(participant) => participant,
            Err(e) => {
                tracing::debug!(
                    session_id = %session_id,
                    participant_id = %participant_id,
                    error = %e,
                    "Hand raise from participant not in room"
                );
                return;
            }
        };

        tracing::info!(
            session_id = %session_id,
            participant_id = %participant_id,
            raised = participant.hand_raised,
            "Hand raise"
        );

        self.relay
            .route(session_id, participant_id, Envelope::hand_raise(&participant))
            .await;
        self.events.emit(ClassroomEvent::HandRaised {
            session_id: session_id.to_string(),
            user_id: participant.user_id,
            participant_id: participant.participant_id,
            raised: participant.hand_raised,
            at: Utc::now(),
        });
    }

    /// One pass of the heartbeat monitor. Returns `(evicted, healed_rooms)`.
    pub async fn sweep(&self) -> (usize, usize) {
        let evicted = self
            .connections
            .evict_idle(self.config.heartbeat_timeout)
            .await;

        let mut healed = 0;
        for session_id in self.rooms.room_ids() {
            if self.sessions.is_live(&session_id) {
                continue;
            }
            let disconnected = self.connections.teardown_orphan(&session_id).await;
            if disconnected > 0 {
                tracing::error!(
                    session_id = %session_id,
                    disconnected,
                    "Room outlived its session, forced teardown"
                );
                healed += 1;
            }
        }
        (evicted, healed)
    }

    /// Starts the background heartbeat monitor
    pub fn start_heartbeat_monitor(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(
                interval_secs = self.config.heartbeat_interval.as_secs(),
                timeout_secs = self.config.heartbeat_timeout.as_secs(),
                "Heartbeat monitor started"
            );

            loop {
                ticker.tick().await;
                let (evicted, healed) = self.sweep().await;
                if evicted > 0 || healed > 0 {
                    tracing::debug!(evicted, healed, "Heartbeat sweep");
                }
            }
        })
    }
}
