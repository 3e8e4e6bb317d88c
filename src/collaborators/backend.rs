use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::authorization::BearerToken;
use super::events::{AttendanceRecorder, ChatArchive};
use crate::error::{Result, SignalingError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Classroom id as the backend expects it: numeric ids are sent as numbers
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ClassroomRef<'a> {
    Numeric(i64),
    Named(&'a str),
}

impl<'a> ClassroomRef<'a> {
    fn from_session(session_id: &'a str) -> Self {
        match session_id.parse() {
            Ok(id) => ClassroomRef::Numeric(id),
            Err(_) => ClassroomRef::Named(session_id),
        }
    }
}

/// The backend takes the attendee from the bearer token, not the body
#[derive(Debug, Serialize)]
struct AttendanceCreate<'a> {
    classroom_id: ClassroomRef<'a>,
    is_present: bool,
    status: &'a str,
}

/// The author is likewise the token's user
#[derive(Debug, Serialize)]
struct ClassMessageCreate {
    message_text: String,
    message_type: String,
}

/// REST client for the e-learning backend: attendance and chat history.
///
/// Writes are made with the participant's own token so the backend records
/// them against that user. The service token is only a fallback for events
/// that carry no credential.
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    service_token: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, service_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        credential: Option<&BearerToken>,
    ) -> Result<()> {
        let mut request = self.http.post(self.url(path)).json(body);
        let token = credential
            .map(BearerToken::expose)
            .or(self.service_token.as_deref());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(path = %path, status = %status, "Backend rejected request");
            return Err(SignalingError::BackendStatus(status.as_u16()));
        }
        Ok(())
    }
}

/// Extracts `(text, message_type)` from a chat payload. Accepts a bare
/// string or an object with `text`/`message_text`/`message`.
pub fn chat_text(payload: &Value) -> Option<(String, String)> {
    match payload {
        Value::String(text) => Some((text.clone(), "normal".to_string())),
        Value::Object(fields) => {
            let text = ["text", "message_text", "message"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_str))?;
            let kind = fields
                .get("message_type")
                .and_then(Value::as_str)
                .unwrap_or("normal");
            Some((text.to_string(), kind.to_string()))
        }
        _ => None,
    }
}

// The backend has no leave endpoint, so leaves stay with the trait default
#[async_trait]
impl AttendanceRecorder for BackendClient {
    async fn record_join(
        &self,
        session_id: &str,
        user_id: &str,
        credential: Option<&BearerToken>,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        if credential.is_none() {
            tracing::debug!(
                session_id = %session_id,
                user_id = %user_id,
                "No user credential, attendance recorded with the service token"
            );
        }
        self.post_json(
            "attendance/",
            &AttendanceCreate {
                classroom_id: ClassroomRef::from_session(session_id),
                is_present: true,
                status: "present",
            },
            credential,
        )
        .await
    }
}

#[async_trait]
impl ChatArchive for BackendClient {
    async fn store_chat(
        &self,
        session_id: &str,
        _user_id: &str,
        credential: Option<&BearerToken>,
        payload: &Value,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        let Some((message_text, message_type)) = chat_text(payload) else {
            tracing::debug!(session_id = %session_id, "Chat payload has no text, not archived");
            return Ok(());
        };

        let path = format!("classrooms/{}/messages", urlencoding::encode(session_id));
        self.post_json(
            &path,
            &ClassMessageCreate {
                message_text,
                message_type,
            },
            credential,
        )
        .await
    }
}
