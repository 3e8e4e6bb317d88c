use std::convert::Infallible;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use super::classroom_websocket;
use crate::classroom::{ClassroomServer, Participant, Session, SessionAction, SessionStatus};
use crate::config::IceConfig;
use crate::error::SignalingError;

/// Carries a [`SignalingError`] through warp's rejection system
#[derive(Debug)]
pub struct ApiRejection(pub SignalingError);

impl warp::reject::Reject for ApiRejection {}

fn reject(error: SignalingError) -> Rejection {
    warp::reject::custom(ApiRejection(error))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub id: String,
    /// Defaults to the caller
    #[serde(default)]
    pub instructor_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_participants: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SessionView {
    #[serde(flatten)]
    session: Session,
    member_count: usize,
    members: Vec<Participant>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Every route of the service, with JSON error handling
pub fn routes(
    server: Arc<ClassroomServer>,
    ice: IceConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["authorization", "content-type"])
        .allow_methods(vec!["GET", "POST"]);

    classroom_websocket_route(server.clone())
        .or(health_check())
        .or(config_endpoint(ice))
        .or(session_routes(server))
        .with(cors)
        .recover(handle_rejection)
}

/// `GET /classroom/{session_id}` upgraded to the signaling WebSocket
pub fn classroom_websocket_route(
    server: Arc<ClassroomServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("classroom" / String)
        .and(warp::ws())
        .and(with_server(server))
        .map(|session_id: String, ws: warp::ws::Ws, server: Arc<ClassroomServer>| {
            ws.on_upgrade(move |websocket| {
                classroom_websocket::handle_classroom_websocket(websocket, session_id, server)
            })
        })
}

pub fn health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Classroom Signaling",
                "version": env!("CARGO_PKG_VERSION")
            }))
        })
}

/// ICE servers the clients should use for their peer connections
pub fn config_endpoint(
    ice: IceConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let servers = ice.ice_servers();
    warp::path("config")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || warp::reply::json(&serde_json::json!({ "ice_servers": servers })))
}

pub fn session_routes(
    server: Arc<ClassroomServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let create = warp::path!("sessions")
        .and(warp::post())
        .and(bearer_token())
        .and(warp::body::json())
        .and(with_server(server.clone()))
        .and_then(create_session);

    let get = warp::path!("sessions" / String)
        .and(warp::get())
        .and(with_server(server.clone()))
        .and_then(get_session);

    let transition = warp::path!("sessions" / String / String)
        .and(warp::post())
        .and(bearer_token())
        .and(with_server(server))
        .and_then(transition_session);

    create.or(get).or(transition)
}

fn bearer_token() -> impl Filter<Extract = (String,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(|header: Option<String>| async move {
        header
            .as_deref()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| reject(SignalingError::unauthorized("missing bearer token")))
    })
}

async fn create_session(
    token: String,
    request: CreateSessionRequest,
    server: Arc<ClassroomServer>,
) -> Result<impl Reply, Rejection> {
    let caller = server.authenticate(&token).await.map_err(reject)?;
    let instructor_id = request
        .instructor_id
        .unwrap_or_else(|| caller.user_id.clone());
    if instructor_id != caller.user_id {
        return Err(reject(SignalingError::unauthorized(
            "sessions can only be registered by their instructor",
        )));
    }

    let session = Session {
        id: request.id,
        instructor_id,
        title: request.title,
        status: request.status.unwrap_or_default(),
        start_time: request.start_time,
        end_time: request.end_time,
        max_participants: request.max_participants,
    };
    server.register_session(session.clone()).map_err(reject)?;

    Ok(warp::reply::with_status(
        warp::reply::json(&session),
        StatusCode::CREATED,
    ))
}

async fn get_session(session_id: String, server: Arc<ClassroomServer>) -> Result<impl Reply, Rejection> {
    let session = server
        .session(&session_id)
        .ok_or_else(|| reject(SignalingError::SessionNotFound(session_id.clone())))?;
    let members = server.members(&session_id).await;

    Ok(warp::reply::json(&SessionView {
        session,
        member_count: members.len(),
        members,
    }))
}

async fn transition_session(
    session_id: String,
    action: String,
    token: String,
    server: Arc<ClassroomServer>,
) -> Result<impl Reply, Rejection> {
    let action: SessionAction = action.parse().map_err(reject)?;
    let caller = server.authenticate(&token).await.map_err(reject)?;
    let session = server
        .session(&session_id)
        .ok_or_else(|| reject(SignalingError::SessionNotFound(session_id.clone())))?;

    if session.instructor_id != caller.user_id {
        tracing::warn!(
            session_id = %session_id,
            user_id = %caller.user_id,
            action = %action,
            "Transition refused, caller is not the instructor"
        );
        return Err(reject(SignalingError::unauthorized(
            "only the session instructor may change its status",
        )));
    }

    let status = server
        .transition(&session_id, action)
        .await
        .map_err(reject)?;

    Ok(warp::reply::json(&serde_json::json!({
        "session_id": session_id,
        "status": status,
    })))
}

fn status_for(error: &SignalingError) -> StatusCode {
    match error {
        SignalingError::SessionNotFound(_) | SignalingError::ParticipantNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        SignalingError::SessionAlreadyExists(_)
        | SignalingError::InvalidTransition { .. }
        | SignalingError::SessionNotLive(_)
        | SignalingError::RoomFull(_) => StatusCode::CONFLICT,
        SignalingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        SignalingError::InvalidHandshake(_)
        | SignalingError::InvalidSession(_)
        | SignalingError::InvalidEnvelope(_)
        | SignalingError::Serialization(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, error, message) = if let Some(ApiRejection(e)) = err.find::<ApiRejection>() {
        (status_for(e), e.code(), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "invalid_body", e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "Method not allowed".to_string(),
        )
    } else {
        tracing::error!(rejection = ?err, "Unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "Internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error, message }),
        status,
    ))
}

fn with_server(
    server: Arc<ClassroomServer>,
) -> impl Filter<Extract = (Arc<ClassroomServer>,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DirectoryAuthorizer, EventQueue, UserProfile};
    use crate::config::ClassroomConfig;

    fn server() -> Arc<ClassroomServer> {
        let authorizer = DirectoryAuthorizer::new()
            .with_user(
                "t-teacher",
                UserProfile {
                    user_id: "teacher".to_string(),
                    display_name: "Teacher".to_string(),
                    photo_ref: None,
                },
            )
            .with_user(
                "t-ana",
                UserProfile {
                    user_id: "ana".to_string(),
                    display_name: "Ana".to_string(),
                    photo_ref: None,
                },
            );
        let server = ClassroomServer::new(
            ClassroomConfig::default(),
            Arc::new(authorizer),
            EventQueue::logging(),
        );
        server
            .register_session(Session::new("s1", "teacher"))
            .unwrap();
        Arc::new(server)
    }

    #[tokio::test]
    async fn test_health_check() {
        let res = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes(server(), IceConfig::default()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_config_lists_ice_servers() {
        let res = warp::test::request()
            .method("GET")
            .path("/config")
            .reply(&routes(server(), IceConfig::default()))
            .await;
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(
            body["ice_servers"][0]["urls"][0],
            crate::config::DEFAULT_STUN_SERVER_URL
        );
    }

    #[tokio::test]
    async fn test_get_session_and_not_found() {
        let api = routes(server(), IceConfig::default());

        let res = warp::test::request().path("/sessions/s1").reply(&api).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "not_started");
        assert_eq!(body["member_count"], 0);

        let res = warp::test::request().path("/sessions/nope").reply(&api).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["error"], "session_not_found");
    }

    #[tokio::test]
    async fn test_transition_requires_instructor() {
        let server = server();
        let api = routes(server.clone(), IceConfig::default());

        let res = warp::test::request()
            .method("POST")
            .path("/sessions/s1/start")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = warp::test::request()
            .method("POST")
            .path("/sessions/s1/start")
            .header("authorization", "Bearer t-ana")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(server.session("s1").unwrap().status, SessionStatus::NotStarted);

        let res = warp::test::request()
            .method("POST")
            .path("/sessions/s1/start")
            .header("authorization", "Bearer t-teacher")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(server.session("s1").unwrap().status, SessionStatus::Live);

        let res = warp::test::request()
            .method("POST")
            .path("/sessions/s1/start")
            .header("authorization", "Bearer t-teacher")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["error"], "invalid_transition");
    }

    #[tokio::test]
    async fn test_unknown_action_is_bad_request() {
        let res = warp::test::request()
            .method("POST")
            .path("/sessions/s1/pause")
            .header("authorization", "Bearer t-teacher")
            .reply(&routes(server(), IceConfig::default()))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_session() {
        let server = server();
        let api = routes(server.clone(), IceConfig::default());

        let res = warp::test::request()
            .method("POST")
            .path("/sessions")
            .header("authorization", "Bearer t-teacher")
            .json(&serde_json::json!({ "id": "s2", "title": "Algebra", "status": "scheduled" }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let created = server.session("s2").unwrap();
        assert_eq!(created.instructor_id, "teacher");
        assert_eq!(created.status, SessionStatus::Scheduled);

        let res = warp::test::request()
            .method("POST")
            .path("/sessions")
            .header("authorization", "Bearer t-teacher")
            .json(&serde_json::json!({ "id": "s2" }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = warp::test::request()
            .method("POST")
            .path("/sessions")
            .header("authorization", "Bearer t-ana")
            .json(&serde_json::json!({ "id": "s3", "instructor_id": "teacher" }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(server.session("s3").is_none());
    }

    #[tokio::test]
    async fn test_create_session_rejects_zero_capacity() {
        let server = server();
        let api = routes(server.clone(), IceConfig::default());

        let res = warp::test::request()
            .method("POST")
            .path("/sessions")
            .header("authorization", "Bearer t-teacher")
            .json(&serde_json::json!({ "id": "s4", "max_participants": 0 }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["error"], "invalid_session");
        assert!(server.session("s4").is_none());
    }
}
