use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::participant::{Participant, ParticipantId};
use crate::error::RejectReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    // client -> server
    Join,
    Leave,
    Heartbeat,
    // relayed
    Offer,
    Answer,
    Candidate,
    HandRaise,
    Chat,
    // server -> client
    Welcome,
    Rejected,
    UserJoined,
    UserLeft,
    SessionEnded,
}

impl SignalType {
    /// Types a client is allowed to put on the wire
    pub fn is_client_type(self) -> bool {
        matches!(
            self,
            SignalType::Join
                | SignalType::Leave
                | SignalType::Heartbeat
                | SignalType::Offer
                | SignalType::Answer
                | SignalType::Candidate
                | SignalType::HandRaise
                | SignalType::Chat
        )
    }

    /// Control envelopes bypass the bounded queue and are never dropped
    pub fn is_control(self) -> bool {
        matches!(
            self,
            SignalType::Welcome
                | SignalType::Rejected
                | SignalType::UserJoined
                | SignalType::UserLeft
                | SignalType::SessionEnded
        )
    }

    /// Data a slow client can lose without breaking negotiation or membership
    pub fn is_evictable(self) -> bool {
        matches!(self, SignalType::Candidate | SignalType::Chat | SignalType::HandRaise)
    }

    /// Offer/answer/candidate only make sense with a target
    pub fn is_directed(self) -> bool {
        matches!(self, SignalType::Offer | SignalType::Answer | SignalType::Candidate)
    }
}

/// Unit of relay traffic. `payload` is opaque to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: SignalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_participant_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_participant_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
struct WelcomePayload<'a> {
    participant: &'a Participant,
    members: &'a [Participant],
}

impl Envelope {
    pub fn new(kind: SignalType, payload: Value) -> Self {
        Self {
            kind,
            sender_participant_id: None,
            target_participant_id: None,
            payload,
        }
    }

    pub fn from_sender(mut self, sender: impl Into<ParticipantId>) -> Self {
        self.sender_participant_id = Some(sender.into());
        self
    }

    pub fn to_target(mut self, target: impl Into<ParticipantId>) -> Self {
        self.target_participant_id = Some(target.into());
        self
    }

    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn welcome(participant: &Participant, members: &[Participant]) -> Self {
        let payload = serde_json::to_value(WelcomePayload {
            participant,
            members,
        })
        .unwrap_or(Value::Null);
        Self::new(SignalType::Welcome, payload)
    }

    pub fn rejected(reason: RejectReason, message: impl Into<String>) -> Self {
        Self::new(
            SignalType::Rejected,
            serde_json::json!({ "reason": reason, "message": message.into() }),
        )
    }

    pub fn user_joined(participant: &Participant) -> Self {
        Self::new(
            SignalType::UserJoined,
            serde_json::to_value(participant).unwrap_or(Value::Null),
        )
        .from_sender(participant.participant_id.clone())
    }

    pub fn user_left(participant: &Participant) -> Self {
        Self::new(
            SignalType::UserLeft,
            serde_json::json!({
                "participant_id": participant.participant_id,
                "user_id": participant.user_id,
            }),
        )
        .from_sender(participant.participant_id.clone())
    }

    pub fn hand_raise(participant: &Participant) -> Self {
        Self::new(
            SignalType::HandRaise,
            serde_json::to_value(participant).unwrap_or(Value::Null),
        )
        .from_sender(participant.participant_id.clone())
    }

    pub fn session_ended(session_id: &str) -> Self {
        Self::new(
            SignalType::SessionEnded,
            serde_json::json!({ "session_id": session_id }),
        )
    }

    /// Bearer token carried by a `join` frame
    pub fn join_token(&self) -> Option<&str> {
        if self.kind != SignalType::Join {
            return None;
        }
        self.payload.get("token").and_then(Value::as_str)
    }

    /// Requested hand state of a `hand_raise` frame; `None` means toggle
    pub fn requested_hand_state(&self) -> Option<bool> {
        self.payload.get("raised").and_then(Value::as_bool)
    }
}
