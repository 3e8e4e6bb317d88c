use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::collaborators::BearerToken;

pub type ParticipantId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Instructor,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Instructor => "instructor",
            Role::Student => "student",
        })
    }
}

/// Presence state of one connection: `connecting -> joined -> disconnected`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Joined,
    Disconnected,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal forward step. There is no way back to
    /// `Joined`; a reconnecting client is a new participant.
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Joined) | (Connecting, Disconnected) | (Joined, Disconnected)
        )
    }
}

/// One live connection inside a room. Serialized as-is in snapshots and
/// `user_joined` payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: ParticipantId,
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
    #[serde(default)]
    pub hand_raised: bool,
    pub connection_state: ConnectionState,
    /// Token presented at join, used to act for this user towards the backend
    #[serde(skip)]
    pub credential: Option<BearerToken>,
}

impl Participant {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        role: Role,
        photo_ref: Option<String>,
    ) -> Self {
        Self {
            participant_id: generate_participant_id(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            role,
            photo_ref,
            hand_raised: false,
            connection_state: ConnectionState::Connecting,
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: BearerToken) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// Random per-connection id, distinct from the user id so one user may hold
/// several connections at once
pub fn generate_participant_id() -> ParticipantId {
    let mut rng = rand::thread_rng();
    format!("p-{:016x}", rng.gen::<u64>())
}
