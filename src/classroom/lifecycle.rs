use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::envelope::Envelope;
use super::link::PeerLink;
use super::participant::{Participant, Role};
use super::room::{Member, RoomManager};
use super::session::SessionRegistry;
use crate::collaborators::{Authorizer, BearerToken, ClassroomEvent, EventQueue, LeaveReason};
use crate::error::{Result, SignalingError};

/// What a successful handshake hands back to the transport
#[derive(Debug, Clone)]
pub struct Admission {
    pub participant: Participant,
    /// Members already present; the newcomer offers to each of them
    pub members: Vec<Participant>,
}

/// Owns the connect/disconnect edges of every participant connection
pub struct ConnectionManager {
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomManager>,
    authorizer: Arc<dyn Authorizer>,
    events: EventQueue,
}

impl ConnectionManager {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        rooms: Arc<RoomManager>,
        authorizer: Arc<dyn Authorizer>,
        events: EventQueue,
    ) -> Self {
        Self {
            sessions,
            rooms,
            authorizer,
            events,
        }
    }

    async fn entitled_role(&self, user_id: &str, session_id: &str, instructor_id: &str) -> Result<Role> {
        if user_id == instructor_id {
            return Ok(Role::Instructor);
        }
        if self.authorizer.can_join(user_id, session_id).await? {
            Ok(Role::Student)
        } else {
            Err(SignalingError::unauthorized(format!(
                "user {} is not enrolled in session {}",
                user_id, session_id
            )))
        }
    }

    /// Authorizes `token` for `session_id` and adds a new participant to the
    /// room. On success `welcome` is already queued on `link` and the
    /// existing members have been sent `user_joined`.
    pub async fn on_connect(&self, session_id: &str, token: &str, link: Arc<PeerLink>) -> Result<Admission> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SignalingError::SessionNotFound(session_id.to_string()))?;

        let profile = self
            .authorizer
            .identify(token)
            .await?
            .ok_or_else(|| SignalingError::unauthorized("unknown token"))?;

        let role = match self
            .entitled_role(&profile.user_id, session_id, &session.instructor_id)
            .await
        {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    user_id = %profile.user_id,
                    error = %e,
                    "Join refused"
                );
                return Err(e);
            }
        };

        let participant = Participant::new(profile.user_id, profile.display_name, role, profile.photo_ref)
            .with_credential(BearerToken::new(token));
        let admitted = self.rooms.join(session_id, participant, link).await?;

        self.events.emit(ClassroomEvent::ParticipantJoined {
            session_id: session_id.to_string(),
            user_id: admitted.participant.user_id.clone(),
            participant_id: admitted.participant.participant_id.clone(),
            credential: admitted.participant.credential.clone(),
            at: admitted.joined_at,
        });

        Ok(Admission {
            participant: admitted.participant,
            members: admitted.members,
        })
    }

    /// Removes a participant after a leave, transport failure or timeout.
    /// Returns `false` when it was already gone; calling it again is a no-op.
    pub async fn on_disconnect(&self, session_id: &str, participant_id: &str, reason: LeaveReason) -> bool {
        let Some(departure) = self.rooms.leave(session_id, participant_id).await else {
            return false;
        };
        departure.link.close();

        tracing::info!(
            session_id = %session_id,
            participant_id = %participant_id,
            user_id = %departure.participant.user_id,
            reason = %reason,
            notified = departure.notified,
            room_closed = departure.room_closed,
            "Participant left room"
        );

        self.events.emit(ClassroomEvent::ParticipantLeft {
            session_id: session_id.to_string(),
            user_id: departure.participant.user_id,
            participant_id: departure.participant.participant_id,
            joined_at: departure.joined_at,
            left_at: Utc::now(),
            reason,
        });
        true
    }

    /// Sends `session_ended` to every member, closes their links and removes
    /// the room. Returns the number of members disconnected.
    pub async fn teardown_room(&self, session_id: &str) -> usize {
        let members = self.rooms.teardown(session_id).await;
        self.end_for_members(session_id, members)
    }

    /// Tears down a room whose session is not live, re-checked under the
    /// room lock
    pub async fn teardown_orphan(&self, session_id: &str) -> usize {
        let members = self.rooms.teardown_if_not_live(session_id).await;
        self.end_for_members(session_id, members)
    }

    fn end_for_members(&self, session_id: &str, members: Vec<Member>) -> usize {
        if members.is_empty() {
            return 0;
        }

        let ended = Envelope::session_ended(session_id);
        let left_at = Utc::now();
        for member in &members {
            member.link.push_control(ended.clone());
            member.link.close();
            self.events.emit(ClassroomEvent::ParticipantLeft {
                session_id: session_id.to_string(),
                user_id: member.participant.user_id.clone(),
                participant_id: member.participant.participant_id.clone(),
                joined_at: member.joined_at,
                left_at,
                reason: LeaveReason::SessionEnded,
            });
        }

        tracing::info!(
            session_id = %session_id,
            disconnected = members.len(),
            "Room torn down"
        );
        members.len()
    }

    /// Disconnects every participant silent for longer than `timeout`
    pub async fn evict_idle(&self, timeout: Duration) -> usize {
        let mut evicted = 0;
        for (session_id, participant_id) in self.rooms.idle_members(timeout).await {
            tracing::info!(
                session_id = %session_id,
                participant_id = %participant_id,
                timeout_secs = timeout.as_secs(),
                "Heartbeat timeout"
            );
            if self
                .on_disconnect(&session_id, &participant_id, LeaveReason::HeartbeatTimeout)
                .await
            {
                evicted += 1;
            }
        }
        evicted
    }
}
