use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalingError};

pub type SessionId = String;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    Scheduled,
    Live,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Live => "live",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled sessions never go live again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Start,
    End,
    Cancel,
}

impl SessionAction {
    /// Target status if `action` is legal from `from`
    pub fn apply(self, from: SessionStatus) -> Option<SessionStatus> {
        use SessionStatus::*;
        match (self, from) {
            (SessionAction::Start, NotStarted | Scheduled) => Some(Live),
            (SessionAction::End, Live) => Some(Completed),
            (SessionAction::Cancel, NotStarted | Scheduled | Live) => Some(Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionAction::Start => "start",
            SessionAction::End => "end",
            SessionAction::Cancel => "cancel",
        })
    }
}

impl std::str::FromStr for SessionAction {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(SessionAction::Start),
            "end" => Ok(SessionAction::End),
            "cancel" => Ok(SessionAction::Cancel),
            other => Err(SignalingError::InvalidEnvelope(format!(
                "unknown session action {:?}",
                other
            ))),
        }
    }
}

/// A scheduled classroom session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub instructor_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
    /// Advisory only, joins are never gated on the schedule
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Overrides the server-wide room capacity when set
    #[serde(default)]
    pub max_participants: Option<usize>,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, instructor_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instructor_id: instructor_id.into(),
            title: None,
            status: SessionStatus::NotStarted,
            start_time: None,
            end_time: None,
            max_participants: None,
        }
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }
}

/// Source of truth for session lifecycle state.
///
/// `transition` is the only writer of `status`. Each transition runs under the
/// entry's exclusive shard guard, so two racing `start`/`end` calls cannot both
/// observe the same source status.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Session) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        if session.max_participants == Some(0) {
            return Err(SignalingError::InvalidSession(format!(
                "session {} must admit at least one participant",
                session.id
            )));
        }

        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(SignalingError::SessionAlreadyExists(session.id)),
            Entry::Vacant(slot) => {
                tracing::info!(
                    session_id = %session.id,
                    status = %session.status,
                    "Session registered"
                );
                slot.insert(session);
                Ok(())
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn get_status(&self, session_id: &str) -> Result<SessionStatus> {
        self.sessions
            .get(session_id)
            .map(|s| s.status)
            .ok_or_else(|| SignalingError::SessionNotFound(session_id.to_string()))
    }

    pub fn is_live(&self, session_id: &str) -> bool {
        matches!(self.get_status(session_id), Ok(SessionStatus::Live))
    }

    /// Compare-and-set the session status. Returns `(previous, current)`.
    pub fn transition(
        &self,
        session_id: &str,
        action: SessionAction,
    ) -> Result<(SessionStatus, SessionStatus)> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SignalingError::SessionNotFound(session_id.to_string()))?;

        let from = session.status;
        let to = action
            .apply(from)
            .ok_or(SignalingError::InvalidTransition { from, action })?;
        session.status = to;

        tracing::info!(
            session_id = %session_id,
            from = %from,
            to = %to,
            "Session transitioned"
        );
        Ok((from, to))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_start_from_not_started_and_scheduled() {
        let registry = SessionRegistry::new();
        registry.register(Session::new("1", "t1")).unwrap();
        registry
            .register(Session::new("2", "t1").with_status(SessionStatus::Scheduled))
            .unwrap();

        assert_eq!(
            registry.transition("1", SessionAction::Start).unwrap(),
            (SessionStatus::NotStarted, SessionStatus::Live)
        );
        assert_eq!(
            registry.transition("2", SessionAction::Start).unwrap().1,
            SessionStatus::Live
        );
        assert!(registry.is_live("1"));
    }

    #[test]
    fn test_end_requires_live() {
        let registry = SessionRegistry::new();
        registry.register(Session::new("1", "t1")).unwrap();

        let err = registry.transition("1", SessionAction::End).unwrap_err();
        assert!(matches!(
            err,
            SignalingError::InvalidTransition {
                from: SessionStatus::NotStarted,
                action: SessionAction::End
            }
        ));

        registry.transition("1", SessionAction::Start).unwrap();
        registry.transition("1", SessionAction::End).unwrap();
        assert_eq!(registry.get_status("1").unwrap(), SessionStatus::Completed);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let registry = SessionRegistry::new();
        registry
            .register(Session::new("1", "t1").with_status(SessionStatus::Completed))
            .unwrap();

        for action in [SessionAction::Start, SessionAction::End, SessionAction::Cancel] {
            assert!(registry.transition("1", action).is_err());
        }
        assert_eq!(registry.get_status("1").unwrap(), SessionStatus::Completed);
    }

    #[test]
    fn test_cancel_from_live() {
        let registry = SessionRegistry::new();
        registry
            .register(Session::new("1", "t1").with_status(SessionStatus::Live))
            .unwrap();

        let (from, to) = registry.transition("1", SessionAction::Cancel).unwrap();
        assert_eq!(from, SessionStatus::Live);
        assert_eq!(to, SessionStatus::Cancelled);
    }

    #[test]
    fn test_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.get_status("missing"),
            Err(SignalingError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.transition("missing", SessionAction::Start),
            Err(SignalingError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = SessionRegistry::new();
        registry.register(Session::new("1", "t1")).unwrap();
        assert!(matches!(
            registry.register(Session::new("1", "t2")),
            Err(SignalingError::SessionAlreadyExists(_))
        ));
        assert_eq!(registry.get("1").unwrap().instructor_id, "t1");
    }

    #[test]
    fn test_zero_capacity_session_is_refused() {
        let registry = SessionRegistry::new();
        let mut session = Session::new("1", "t1");
        session.max_participants = Some(0);
        assert!(matches!(
            registry.register(session),
            Err(SignalingError::InvalidSession(_))
        ));
        assert!(registry.get("1").is_none());
    }

    #[test]
    fn test_new_sessions_are_not_started() {
        assert_eq!(SessionStatus::default(), SessionStatus::NotStarted);
        assert_eq!(Session::new("1", "t1").status, SessionStatus::NotStarted);
    }

    #[test]
    fn test_racing_end_calls_succeed_once() {
        let registry = Arc::new(SessionRegistry::new());
        registry
            .register(Session::new("1", "t1").with_status(SessionStatus::Live))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.transition("1", SessionAction::End).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::NotStarted).unwrap(),
            "\"not_started\""
        );
        let session: Session =
            serde_json::from_str(r#"{"id":"9","instructor_id":"t9"}"#).unwrap();
        assert_eq!(session.status, SessionStatus::NotStarted);
        assert!(session.max_participants.is_none());
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("end".parse::<SessionAction>().unwrap(), SessionAction::End);
        assert!("pause".parse::<SessionAction>().is_err());
    }
}
