//! Collaborators the signaling core consumes but does not own.
//!
//! - `authorization`: who may enter a classroom
//! - `events`: fire-and-forget queue for attendance and chat history
//! - `backend`: REST client implementing the side-effect collaborators

mod authorization;
mod backend;
mod events;

pub use authorization::{Authorizer, BearerToken, Directory, DirectoryAuthorizer, UserProfile};
pub use backend::{chat_text, BackendClient};
pub use events::{AttendanceRecorder, ChatArchive, ClassroomEvent, EventQueue, LeaveReason, LoggingSink};

#[cfg(test)]
pub(crate) use events::testing;

use std::sync::Arc;

use crate::config::CollaboratorConfig;
use crate::error::Result;

/// Builds the event queue from configuration: the REST backend when a URL is
/// set, the logging sink otherwise. Must be called inside a tokio runtime.
pub fn event_queue_from_config(config: &CollaboratorConfig) -> Result<EventQueue> {
    match &config.backend_url {
        Some(url) => {
            let client = Arc::new(BackendClient::new(url.clone(), config.backend_token.clone())?);
            tracing::info!(backend_url = %url, "Side effects go to the REST backend");
            Ok(EventQueue::new(client.clone(), client))
        }
        None => {
            tracing::info!("No backend configured, side effects are only logged");
            Ok(EventQueue::logging())
        }
    }
}

/// Loads the directory file when configured
pub fn load_directory(config: &CollaboratorConfig) -> Result<Directory> {
    match &config.directory_file {
        Some(path) => {
            let directory = Directory::load(path)?;
            tracing::info!(
                path = %path,
                sessions = directory.sessions.len(),
                "Loaded classroom directory"
            );
            Ok(directory)
        }
        None => {
            tracing::warn!("DIRECTORY_FILE not set, no user will be able to join");
            Ok(Directory::default())
        }
    }
}
