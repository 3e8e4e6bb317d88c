use std::sync::Arc;

use super::envelope::Envelope;
use super::link::PushOutcome;
use super::participant::Participant;
use super::room::RoomManager;

/// What happened to one routed envelope
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Delivered to `delivered` recipients on behalf of `sender`
    Routed {
        sender: Participant,
        delivered: usize,
    },
    /// Sender is no longer a member of the room
    SenderGone,
}

/// Full-mesh signaling relay. It reads only `type` and the routing ids;
/// `payload` is forwarded untouched.
pub struct SignalingRelay {
    rooms: Arc<RoomManager>,
}

impl SignalingRelay {
    pub fn new(rooms: Arc<RoomManager>) -> Self {
        Self { rooms }
    }

    /// Routes `envelope` from `sender` inside `session_id`.
    ///
    /// With a target the envelope goes to that participant only, and is
    /// silently dropped if the target has left. Without one it goes to every
    /// other member. The sender never receives its own envelope.
    pub async fn route(&self, session_id: &str, sender: &str, mut envelope: Envelope) -> RouteOutcome {
        let target = envelope.target_participant_id.clone();

        let Some(recipients) = self
            .rooms
            .recipients(session_id, sender, target.as_deref())
            .await
        else {
            tracing::debug!(
                session_id = %session_id,
                participant_id = %sender,
                kind = ?envelope.kind,
                "Dropping envelope from participant no longer in room"
            );
            return RouteOutcome::SenderGone;
        };

        envelope.sender_participant_id = Some(recipients.sender.participant_id.clone());

        if recipients.links.is_empty() {
            if let Some(target) = &target {
                tracing::debug!(
                    session_id = %session_id,
                    participant_id = %sender,
                    target_participant_id = %target,
                    kind = ?envelope.kind,
                    "Target unreachable, dropping envelope"
                );
            }
            return RouteOutcome::Routed {
                sender: recipients.sender,
                delivered: 0,
            };
        }

        let mut delivered = 0;
        for link in &recipients.links {
            match link.push(envelope.clone()) {
                PushOutcome::Closed | PushOutcome::Dropped => {}
                PushOutcome::Queued | PushOutcome::Evicted(_) => delivered += 1,
            }
        }

        tracing::trace!(
            session_id = %session_id,
            participant_id = %sender,
            kind = ?envelope.kind,
            delivered,
            "Envelope routed"
        );

        RouteOutcome::Routed {
            sender: recipients.sender,
            delivered,
        }
    }
}
