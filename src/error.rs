use serde::Serialize;
use thiserror::Error;

use crate::classroom::{SessionAction, SessionStatus};

/// Error types for the classroom signaling server
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Session registry errors
    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Session {0} already registered")]
    SessionAlreadyExists(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Cannot {action} a session that is {from}")]
    InvalidTransition {
        from: SessionStatus,
        action: SessionAction,
    },

    /// Join rejections
    #[error("Session {0} is not live")]
    SessionNotLive(String),

    #[error("Room {0} is full")]
    RoomFull(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Membership errors
    #[error("Participant {0} not found")]
    ParticipantNotFound(String),

    /// Signaling errors
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigurationParseFailed(String),

    /// Collaborator errors
    #[error("Backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("Backend rejected request with status {0}")]
    BackendStatus(u16),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using SignalingError
pub type Result<T> = std::result::Result<T, SignalingError>;

/// Reason carried by a `rejected` envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    SessionNotFound,
    SessionNotLive,
    RoomFull,
    Unauthorized,
    InvalidHandshake,
    Internal,
}

impl SignalingError {
    pub fn internal(msg: impl Into<String>) -> Self {
        SignalingError::Internal(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        SignalingError::Unauthorized(msg.into())
    }

    /// Maps a join-time failure to the reason reported to the client
    pub fn rejection_reason(&self) -> RejectReason {
        match self {
            SignalingError::SessionNotFound(_) => RejectReason::SessionNotFound,
            SignalingError::SessionNotLive(_) => RejectReason::SessionNotLive,
            SignalingError::RoomFull(_) => RejectReason::RoomFull,
            SignalingError::Unauthorized(_) => RejectReason::Unauthorized,
            SignalingError::InvalidHandshake(_) | SignalingError::InvalidEnvelope(_) => {
                RejectReason::InvalidHandshake
            }
            _ => RejectReason::Internal,
        }
    }

    /// Short machine-readable code used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            SignalingError::SessionNotFound(_) => "session_not_found",
            SignalingError::SessionAlreadyExists(_) => "session_exists",
            SignalingError::InvalidSession(_) => "invalid_session",
            SignalingError::InvalidTransition { .. } => "invalid_transition",
            SignalingError::SessionNotLive(_) => "session_not_live",
            SignalingError::RoomFull(_) => "room_full",
            SignalingError::Unauthorized(_) => "unauthorized",
            SignalingError::InvalidHandshake(_) => "invalid_handshake",
            SignalingError::ParticipantNotFound(_) => "participant_not_found",
            SignalingError::InvalidEnvelope(_) => "invalid_envelope",
            SignalingError::Serialization(_) => "serialization",
            SignalingError::InvalidConfiguration(_)
            | SignalingError::ConfigurationParseFailed(_) => "configuration",
            SignalingError::Backend(_) | SignalingError::BackendStatus(_) => "backend",
            SignalingError::Io { .. } => "io",
            SignalingError::Internal(_) => "internal",
        }
    }
}
