use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classroom::Session;
use crate::error::{Result, SignalingError};

/// Bearer token a client authenticated with. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Identity resolved from a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub photo_ref: Option<String>,
}

/// Decides who may enter a classroom.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Resolves a bearer token to a user, `None` if the token is unknown
    async fn identify(&self, token: &str) -> Result<Option<UserProfile>>;

    /// Whether `user_id` may join `session_id` as a student
    async fn can_join(&self, user_id: &str, session_id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Deserialize)]
struct DirectoryUser {
    token: String,
    #[serde(flatten)]
    profile: UserProfile,
}

/// On-disk directory: users with their tokens, per-session enrollments and
/// sessions to register at start-up
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Directory {
    #[serde(default)]
    users: Vec<DirectoryUser>,
    #[serde(default)]
    enrollments: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl Directory {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SignalingError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            SignalingError::InvalidConfiguration(format!("invalid directory file: {}", e))
        })
    }
}

/// In-memory authorizer backed by a [`Directory`]
#[derive(Debug, Default)]
pub struct DirectoryAuthorizer {
    tokens: HashMap<String, UserProfile>,
    enrollments: HashMap<String, HashSet<String>>,
}

impl DirectoryAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_directory(directory: &Directory) -> Self {
        let mut authorizer = Self::new();
        for user in &directory.users {
            authorizer = authorizer.with_user(user.token.clone(), user.profile.clone());
        }
        for (session_id, users) in &directory.enrollments {
            for user_id in users {
                authorizer = authorizer.enroll(session_id.clone(), user_id.clone());
            }
        }
        authorizer
    }

    pub fn with_user(mut self, token: impl Into<String>, profile: UserProfile) -> Self {
        self.tokens.insert(token.into(), profile);
        self
    }

    pub fn enroll(mut self, session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.enrollments
            .entry(session_id.into())
            .or_default()
            .insert(user_id.into());
        self
    }
}

#[async_trait]
impl Authorizer for DirectoryAuthorizer {
    async fn identify(&self, token: &str) -> Result<Option<UserProfile>> {
        Ok(self.tokens.get(token).cloned())
    }

    async fn can_join(&self, user_id: &str, session_id: &str) -> Result<bool> {
        Ok(self
            .enrollments
            .get(session_id)
            .map(|users| users.contains(user_id))
            .unwrap_or(false))
    }
}
