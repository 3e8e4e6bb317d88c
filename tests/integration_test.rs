// Integration tests for the classroom signaling server
// Each test serves the real routes on an ephemeral port and talks to them over HTTP and WebSocket

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use classroom_signaling::api;
use classroom_signaling::classroom::{ClassroomServer, Session, SessionStatus};
use classroom_signaling::collaborators::{DirectoryAuthorizer, EventQueue, UserProfile};
use classroom_signaling::config::{ClassroomConfig, IceConfig};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    server: Arc<ClassroomServer>,
}

fn user(id: &str, name: &str) -> UserProfile {
    UserProfile {
        user_id: id.to_string(),
        display_name: name.to_string(),
        photo_ref: None,
    }
}

async fn start_server() -> TestServer {
    let authorizer = DirectoryAuthorizer::new()
        .with_user("t-teacher", user("teacher", "Ms. Frizzle"))
        .with_user("t-ana", user("ana", "Ana"))
        .with_user("t-eve", user("eve", "Eve"))
        .enroll("s1", "ana");

    let server = Arc::new(ClassroomServer::new(
        ClassroomConfig::default(),
        Arc::new(authorizer),
        EventQueue::logging(),
    ));
    server
        .register_session(Session::new("s1", "teacher").with_status(SessionStatus::Scheduled))
        .unwrap();

    let (addr, serving) =
        warp::serve(api::routes(server.clone(), IceConfig::default())).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serving);

    TestServer { addr, server }
}

async fn post_action(addr: SocketAddr, session: &str, action: &str, token: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{}/sessions/{}/{}", addr, session, action))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
}

async fn connect(addr: SocketAddr, session: &str, token: &str) -> Socket {
    let (mut ws, _) = connect_async(format!("ws://{}/classroom/{}", addr, session))
        .await
        .unwrap();
    ws.send(Message::Text(
        json!({ "type": "join", "payload": { "token": token } }).to_string(),
    ))
    .await
    .unwrap();
    ws
}

async fn send(ws: &mut Socket, envelope: Value) {
    ws.send(Message::Text(envelope.to_string())).await.unwrap();
}

/// Next text frame as JSON, `None` once the server closed the socket
async fn recv(ws: &mut Socket) -> Option<Value> {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame");
        match frame {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn recv_type(ws: &mut Socket, kind: &str) -> Value {
    loop {
        let envelope = recv(ws)
            .await
            .unwrap_or_else(|| panic!("socket closed before {}", kind));
        if envelope["type"] == kind {
            return envelope;
        }
    }
}

async fn assert_silent(ws: &mut Socket) {
    let frame = timeout(Duration::from_millis(300), ws.next()).await;
    assert!(frame.is_err(), "expected no frame, got {:?}", frame);
}

#[tokio::test]
async fn test_health_and_config_endpoints() {
    let t = start_server().await;

    let body: Value = reqwest::get(format!("http://{}/health", t.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "Classroom Signaling");

    let body: Value = reqwest::get(format!("http://{}/config", t.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["ice_servers"].as_array().is_some_and(|servers| !servers.is_empty()));
}

#[tokio::test]
async fn test_join_before_start_is_rejected() {
    let t = start_server().await;

    let mut ws = connect(t.addr, "s1", "t-teacher").await;
    let rejected = recv(&mut ws).await.unwrap();
    assert_eq!(rejected["type"], "rejected");
    assert_eq!(rejected["payload"]["reason"], "session_not_live");
    assert!(recv(&mut ws).await.is_none());
    assert!(!t.server.room_exists("s1"));
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let t = start_server().await;

    let mut ws = connect(t.addr, "nope", "t-teacher").await;
    let rejected = recv(&mut ws).await.unwrap();
    assert_eq!(rejected["payload"]["reason"], "session_not_found");
}

#[tokio::test]
async fn test_first_frame_must_be_join() {
    let t = start_server().await;
    post_action(t.addr, "s1", "start", "t-teacher").await;

    let (mut ws, _) = connect_async(format!("ws://{}/classroom/s1", t.addr))
        .await
        .unwrap();
    send(&mut ws, json!({ "type": "chat", "payload": "hi" })).await;

    let rejected = recv(&mut ws).await.unwrap();
    assert_eq!(rejected["payload"]["reason"], "invalid_handshake");
    assert_eq!(t.server.member_count("s1").await, 0);
}

/// Scenarios A and B: instructor joins an empty room, then a student joins
#[tokio::test]
async fn test_instructor_then_student_join() {
    let t = start_server().await;
    assert!(post_action(t.addr, "s1", "start", "t-teacher").await.status().is_success());

    let mut teacher = connect(t.addr, "s1", "t-teacher").await;
    let welcome = recv(&mut teacher).await.unwrap();
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["payload"]["participant"]["role"], "instructor");
    assert_eq!(welcome["payload"]["members"], json!([]));
    let teacher_id = welcome["payload"]["participant"]["participant_id"]
        .as_str()
        .unwrap()
        .to_string();

    let mut ana = connect(t.addr, "s1", "t-ana").await;
    let welcome = recv(&mut ana).await.unwrap();
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["payload"]["participant"]["role"], "student");
    let members = welcome["payload"]["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["participant_id"], teacher_id.as_str());

    let joined = recv(&mut teacher).await.unwrap();
    assert_eq!(joined["type"], "user_joined");
    assert_eq!(joined["payload"]["user_id"], "ana");

    let body: Value = reqwest::get(format!("http://{}/sessions/s1", t.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["member_count"], 2);
}

#[tokio::test]
async fn test_offer_answer_and_chat_are_relayed() {
    let t = start_server().await;
    post_action(t.addr, "s1", "start", "t-teacher").await;

    let mut teacher = connect(t.addr, "s1", "t-teacher").await;
    let teacher_id = recv(&mut teacher).await.unwrap()["payload"]["participant"]["participant_id"].clone();
    let mut ana = connect(t.addr, "s1", "t-ana").await;
    let ana_id = recv(&mut ana).await.unwrap()["payload"]["participant"]["participant_id"].clone();
    recv_type(&mut teacher, "user_joined").await;

    send(
        &mut ana,
        json!({
            "type": "offer",
            "sender_participant_id": "p-spoofed",
            "target_participant_id": teacher_id,
            "payload": { "sdp": "v=0 offer" }
        }),
    )
    .await;
    let offer = recv(&mut teacher).await.unwrap();
    assert_eq!(offer["type"], "offer");
    assert_eq!(offer["sender_participant_id"], ana_id);
    assert_eq!(offer["payload"]["sdp"], "v=0 offer");

    send(
        &mut teacher,
        json!({ "type": "answer", "target_participant_id": ana_id, "payload": { "sdp": "v=0 answer" } }),
    )
    .await;
    let answer = recv(&mut ana).await.unwrap();
    assert_eq!(answer["type"], "answer");
    assert_eq!(answer["sender_participant_id"], teacher_id);

    send(&mut teacher, json!({ "type": "chat", "payload": { "text": "welcome" } })).await;
    let chat = recv(&mut ana).await.unwrap();
    assert_eq!(chat["type"], "chat");
    assert_eq!(chat["payload"]["text"], "welcome");
    assert_silent(&mut teacher).await;

    send(&mut ana, json!({ "type": "hand_raise", "payload": { "raised": true } })).await;
    let hand = recv(&mut teacher).await.unwrap();
    assert_eq!(hand["type"], "hand_raise");
    assert_eq!(hand["payload"]["hand_raised"], true);
}

/// Scenario C: ending the session disconnects everyone and removes the room
#[tokio::test]
async fn test_end_sends_session_ended() {
    let t = start_server().await;
    post_action(t.addr, "s1", "start", "t-teacher").await;

    let mut teacher = connect(t.addr, "s1", "t-teacher").await;
    recv_type(&mut teacher, "welcome").await;
    let mut ana = connect(t.addr, "s1", "t-ana").await;
    recv_type(&mut ana, "welcome").await;

    let resp = post_action(t.addr, "s1", "end", "t-teacher").await;
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert!(!t.server.room_exists("s1"));

    for ws in [&mut teacher, &mut ana] {
        let ended = recv_type(ws, "session_ended").await;
        assert_eq!(ended["payload"]["session_id"], "s1");
        assert!(recv(ws).await.is_none());
    }

    let body: Value = reqwest::get(format!("http://{}/sessions/s1", t.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["member_count"], 0);
}

/// Scenario D: an offer to a participant that already left is dropped silently
#[tokio::test]
async fn test_offer_to_departed_participant_is_dropped() {
    let t = start_server().await;
    post_action(t.addr, "s1", "start", "t-teacher").await;

    let mut teacher = connect(t.addr, "s1", "t-teacher").await;
    let teacher_id = recv(&mut teacher).await.unwrap()["payload"]["participant"]["participant_id"].clone();
    let mut ana = connect(t.addr, "s1", "t-ana").await;
    recv_type(&mut ana, "welcome").await;

    send(&mut teacher, json!({ "type": "leave" })).await;
    let left = recv_type(&mut ana, "user_left").await;
    assert_eq!(left["payload"]["participant_id"], teacher_id);

    send(
        &mut ana,
        json!({ "type": "offer", "target_participant_id": teacher_id, "payload": { "sdp": "late" } }),
    )
    .await;
    assert_silent(&mut ana).await;
    assert_eq!(t.server.member_count("s1").await, 1);
}

/// Scenario E: a user who is not enrolled is rejected and never becomes a member
#[tokio::test]
async fn test_unenrolled_user_is_unauthorized() {
    let t = start_server().await;
    post_action(t.addr, "s1", "start", "t-teacher").await;

    let mut teacher = connect(t.addr, "s1", "t-teacher").await;
    recv_type(&mut teacher, "welcome").await;

    let mut eve = connect(t.addr, "s1", "t-eve").await;
    let rejected = recv(&mut eve).await.unwrap();
    assert_eq!(rejected["type"], "rejected");
    assert_eq!(rejected["payload"]["reason"], "unauthorized");
    assert!(recv(&mut eve).await.is_none());

    assert_eq!(t.server.member_count("s1").await, 1);
    assert_silent(&mut teacher).await;
}

#[tokio::test]
async fn test_closing_socket_broadcasts_user_left_once() {
    let t = start_server().await;
    post_action(t.addr, "s1", "start", "t-teacher").await;

    let mut teacher = connect(t.addr, "s1", "t-teacher").await;
    recv_type(&mut teacher, "welcome").await;
    let mut ana = connect(t.addr, "s1", "t-ana").await;
    recv_type(&mut ana, "welcome").await;
    recv_type(&mut teacher, "user_joined").await;

    ana.close(None).await.unwrap();
    let left = recv_type(&mut teacher, "user_left").await;
    assert_eq!(left["payload"]["user_id"], "ana");
    assert_silent(&mut teacher).await;
    assert_eq!(t.server.member_count("s1").await, 1);
}

#[tokio::test]
async fn test_transition_requires_instructor_owner() {
    let t = start_server().await;

    let resp = post_action(t.addr, "s1", "start", "t-ana").await;
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    assert_eq!(t.server.session("s1").unwrap().status, SessionStatus::Scheduled);
}
