use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::envelope::Envelope;
use super::link::PeerLink;
use super::participant::{ConnectionState, Participant, ParticipantId};
use super::session::{SessionId, SessionRegistry};
use crate::error::{Result, SignalingError};

/// A participant together with its outbound link
#[derive(Clone)]
pub struct Member {
    pub participant: Participant,
    pub link: Arc<PeerLink>,
    pub joined_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Default)]
struct Room {
    members: HashMap<ParticipantId, Member>,
    next_seq: u64,
    /// Set once the room is torn down; a joiner holding a stale handle retries
    closed: bool,
}

impl Room {
    fn others(&self, exclude: &str) -> Vec<Arc<PeerLink>> {
        self.members
            .values()
            .filter(|m| m.participant.participant_id != exclude)
            .map(|m| m.link.clone())
            .collect()
    }

    fn sorted_members(&self) -> Vec<&Member> {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.seq);
        members
    }
}

/// Result of a successful join
#[derive(Debug)]
pub struct Admitted {
    pub participant: Participant,
    /// Members present before the join, in join order
    pub members: Vec<Participant>,
    pub joined_at: DateTime<Utc>,
}

/// Result of removing a participant
pub struct Departure {
    pub participant: Participant,
    pub link: Arc<PeerLink>,
    pub joined_at: DateTime<Utc>,
    /// Members that were sent `user_left`
    pub notified: usize,
    pub room_closed: bool,
}

/// Recipients of one routed envelope
pub struct Recipients {
    pub sender: Participant,
    pub links: Vec<Arc<PeerLink>>,
}

/// In-memory room membership table.
///
/// Each room sits behind its own mutex, so mutations of one room are
/// linearized while different rooms never wait on each other. A room is
/// created by the first join and removed when its last member leaves.
pub struct RoomManager {
    rooms: DashMap<SessionId, Arc<Mutex<Room>>>,
    sessions: Arc<SessionRegistry>,
    default_capacity: Option<usize>,
}

impl RoomManager {
    pub fn new(sessions: Arc<SessionRegistry>, default_capacity: Option<usize>) -> Self {
        Self {
            rooms: DashMap::new(),
            sessions,
            default_capacity,
        }
    }

    fn room(&self, session_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Drops the map entry if it still points at `room`
    fn forget(&self, session_id: &str, room: &Arc<Mutex<Room>>) {
        self.rooms
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, room));
    }

    fn ensure_live(&self, session_id: &str) -> Result<()> {
        if self.sessions.is_live(session_id) {
            Ok(())
        } else {
            // distinguishes unknown sessions from not-live ones
            self.sessions.get_status(session_id)?;
            Err(SignalingError::SessionNotLive(session_id.to_string()))
        }
    }

    /// Adds `participant` to the room of `session_id`, creating the room if
    /// needed. The session must be live.
    ///
    /// `welcome` is queued on the joiner's link and `user_joined` on every
    /// existing member's link before the room lock is released, so no other
    /// membership broadcast can overtake them.
    pub async fn join(
        &self,
        session_id: &str,
        mut participant: Participant,
        link: Arc<PeerLink>,
    ) -> Result<Admitted> {
        self.ensure_live(session_id)?;

        let capacity = self
            .sessions
            .get(session_id)
            .and_then(|s| s.max_participants)
            .or(self.default_capacity);

        loop {
            let room = Arc::clone(
                self.rooms
                    .entry(session_id.to_string())
                    .or_default()
                    .value(),
            );
            let mut guard = room.lock().await;
            if guard.closed {
                continue;
            }

            // status may have changed while we waited for the lock
            if let Err(e) = self.ensure_live(session_id) {
                if guard.members.is_empty() {
                    guard.closed = true;
                    self.forget(session_id, &room);
                }
                return Err(e);
            }

            if let Some(limit) = capacity {
                if guard.members.len() >= limit {
                    tracing::info!(
                        session_id = %session_id,
                        capacity = limit,
                        "Room full, rejecting join"
                    );
                    if guard.members.is_empty() {
                        guard.closed = true;
                        self.forget(session_id, &room);
                    }
                    return Err(SignalingError::RoomFull(session_id.to_string()));
                }
            }

            if !link.advance(ConnectionState::Joined) {
                if guard.members.is_empty() {
                    guard.closed = true;
                    self.forget(session_id, &room);
                }
                return Err(SignalingError::InvalidHandshake(
                    "connection closed before join completed".to_string(),
                ));
            }
            participant.connection_state = ConnectionState::Joined;

            let members: Vec<Participant> = guard
                .sorted_members()
                .into_iter()
                .map(|m| m.participant.clone())
                .collect();

            link.push_control(Envelope::welcome(&participant, &members));
            let announcement = Envelope::user_joined(&participant);
            for member in guard.members.values() {
                member.link.push_control(announcement.clone());
            }

            let joined_at = Utc::now();
            let seq = guard.next_seq;
            guard.next_seq += 1;
            guard.members.insert(
                participant.participant_id.clone(),
                Member {
                    participant: participant.clone(),
                    link,
                    joined_at,
                    seq,
                },
            );

            tracing::info!(
                session_id = %session_id,
                participant_id = %participant.participant_id,
                user_id = %participant.user_id,
                role = %participant.role,
                member_count = guard.members.len(),
                "Participant joined room"
            );

            return Ok(Admitted {
                participant,
                members,
                joined_at,
            });
        }
    }

    /// Removes a participant and queues `user_left` for the members that
    /// remain. Returns `None` if it was not a member, which makes repeated
    /// leaves harmless.
    pub async fn leave(&self, session_id: &str, participant_id: &str) -> Option<Departure> {
        let room = self.room(session_id)?;
        let mut guard = room.lock().await;

        let mut member = guard.members.remove(participant_id)?;
        member.participant.connection_state = ConnectionState::Disconnected;

        let farewell = Envelope::user_left(&member.participant);
        for remaining in guard.members.values() {
            remaining.link.push_control(farewell.clone());
        }
        let notified = guard.members.len();

        let room_closed = guard.members.is_empty();
        if room_closed {
            guard.closed = true;
            self.forget(session_id, &room);
            tracing::info!(session_id = %session_id, "Last participant left, room removed");
        }

        Some(Departure {
            notified,
            participant: member.participant,
            link: member.link,
            joined_at: member.joined_at,
            room_closed,
        })
    }

    pub async fn set_hand_raise(
        &self,
        session_id: &str,
        participant_id: &str,
        raised: bool,
    ) -> Result<Participant> {
        self.update_hand(session_id, participant_id, |_| raised).await
    }

    pub async fn toggle_hand_raise(
        &self,
        session_id: &str,
        participant_id: &str,
    ) -> Result<Participant> {
        self.update_hand(session_id, participant_id, |current| !current)
            .await
    }

    async fn update_hand(
        &self,
        session_id: &str,
        participant_id: &str,
        next: impl FnOnce(bool) -> bool,
    ) -> Result<Participant> {
        let not_found = || SignalingError::ParticipantNotFound(participant_id.to_string());

        let room = self.room(session_id).ok_or_else(not_found)?;
        let mut guard = room.lock().await;
        let member = guard.members.get_mut(participant_id).ok_or_else(not_found)?;

        member.participant.hand_raised = next(member.participant.hand_raised);
        Ok(member.participant.clone())
    }

    /// Resolves who receives an envelope from `sender`: the target alone when
    /// one is given, otherwise every other member. `None` when the sender is
    /// no longer in the room.
    pub async fn recipients(
        &self,
        session_id: &str,
        sender: &str,
        target: Option<&str>,
    ) -> Option<Recipients> {
        let room = self.room(session_id)?;
        let guard = room.lock().await;
        let sender = guard.members.get(sender)?.participant.clone();

        let links = match target {
            Some(target) if target == sender.participant_id => Vec::new(),
            Some(target) => guard
                .members
                .get(target)
                .map(|m| vec![m.link.clone()])
                .unwrap_or_default(),
            None => guard.others(&sender.participant_id),
        };

        Some(Recipients { sender, links })
    }

    /// Removes the whole room and hands back its members
    pub async fn teardown(&self, session_id: &str) -> Vec<Member> {
        self.close_room(session_id, false).await
    }

    /// Like `teardown`, but leaves the room alone if its session is live
    /// again by the time the room lock is held
    pub async fn teardown_if_not_live(&self, session_id: &str) -> Vec<Member> {
        self.close_room(session_id, true).await
    }

    async fn close_room(&self, session_id: &str, unless_live: bool) -> Vec<Member> {
        let Some(room) = self.room(session_id) else {
            return Vec::new();
        };
        let mut guard = room.lock().await;
        if unless_live && self.sessions.is_live(session_id) {
            return Vec::new();
        }
        guard.closed = true;
        self.forget(session_id, &room);

        let mut members: Vec<Member> = guard.members.drain().map(|(_, m)| m).collect();
        members.sort_by_key(|m| m.seq);
        for member in &mut members {
            member.participant.connection_state = ConnectionState::Disconnected;
        }
        members
    }

    pub async fn snapshot(&self, session_id: &str) -> Vec<Participant> {
        let Some(room) = self.room(session_id) else {
            return Vec::new();
        };
        let guard = room.lock().await;
        let snapshot: Vec<Participant> = guard
            .sorted_members()
            .into_iter()
            .map(|m| m.participant.clone())
            .collect();
        snapshot
    }

    pub async fn member_count(&self, session_id: &str) -> usize {
        let Some(room) = self.room(session_id) else {
            return 0;
        };
        let count = room.lock().await.members.len();
        count
    }

    pub fn room_exists(&self, session_id: &str) -> bool {
        self.rooms.contains_key(session_id)
    }

    pub fn room_ids(&self) -> Vec<SessionId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Members whose link has been silent for longer than `timeout`
    pub async fn idle_members(&self, timeout: Duration) -> Vec<(SessionId, ParticipantId)> {
        let rooms: Vec<(SessionId, Arc<Mutex<Room>>)> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut idle = Vec::new();
        for (session_id, room) in rooms {
            let guard = room.lock().await;
            for member in guard.members.values() {
                if member.link.idle_for() > timeout {
                    idle.push((session_id.clone(), member.participant.participant_id.clone()));
                }
            }
        }
        idle
    }
}
