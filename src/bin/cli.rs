// Classroom signaling CLI
// Drives the HTTP surface and joins classrooms over the signaling WebSocket

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "classroom-cli")]
#[command(about = "Classroom signaling CLI", long_about = None)]
struct Cli {
    /// Server address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Show the ICE servers handed to clients
    Config,

    /// Show a session and its live member count
    Session {
        session_id: String,
    },

    /// Start a session (instructor token required)
    Start {
        session_id: String,
        #[arg(short, long)]
        token: String,
    },

    /// End a live session, disconnecting everyone
    End {
        session_id: String,
        #[arg(short, long)]
        token: String,
    },

    /// Cancel a session
    Cancel {
        session_id: String,
        #[arg(short, long)]
        token: String,
    },

    /// Join a classroom and print every envelope received
    Join {
        session_id: String,

        #[arg(short, long)]
        token: String,

        /// Chat message to send after joining
        #[arg(short, long)]
        chat: Option<String>,

        /// Stay connected, sending heartbeats (press Ctrl+C to exit)
        #[arg(short, long)]
        keep_alive: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::Config => check_config(&cli.server).await,
        Commands::Session { session_id } => show_session(&cli.server, session_id).await,
        Commands::Start { session_id, token } => transition(&cli.server, session_id, "start", token).await,
        Commands::End { session_id, token } => transition(&cli.server, session_id, "end", token).await,
        Commands::Cancel { session_id, token } => {
            transition(&cli.server, session_id, "cancel", token).await
        }
        Commands::Join {
            session_id,
            token,
            chat,
            keep_alive,
        } => join_classroom(&cli.server, session_id, token, chat.as_deref(), *keep_alive).await,
    }
}

fn print_json(body: &serde_json::Value) {
    match serde_json::to_string_pretty(body) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", body),
    }
}

async fn print_error_body(resp: reqwest::Response) {
    let status = resp.status();
    match resp.json::<serde_json::Value>().await {
        Ok(body) => println!(
            "{} {}: {}",
            "✗".red(),
            status,
            body["message"].as_str().unwrap_or("unknown error")
        ),
        Err(_) => println!("{} Request failed: {}", "✗".red(), status),
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            println!("{} Health check passed", "✓".green());
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
            }
        }
        Ok(resp) => println!("{} Health check failed: {}", "✗".red(), resp.status()),
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching ICE configuration...".cyan());

    let url = format!("http://{}/config", server);
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                print_json(&body);
            }
        }
        Ok(resp) => println!("{} Config fetch failed: {}", "✗".red(), resp.status()),
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

async fn show_session(server: &str, session_id: &str) {
    let url = format!("http://{}/sessions/{}", server, urlencoding::encode(session_id));
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                println!(
                    "{} {} is {} with {} member(s)",
                    "●".cyan(),
                    session_id.bold(),
                    body["status"].as_str().unwrap_or("unknown").yellow(),
                    body["member_count"]
                );
                print_json(&body);
            }
        }
        Ok(resp) => print_error_body(resp).await,
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

async fn transition(server: &str, session_id: &str, action: &str, token: &str) {
    println!("{} {} {}", "→".cyan(), action.bold(), session_id);

    let url = format!(
        "http://{}/sessions/{}/{}",
        server,
        urlencoding::encode(session_id),
        action
    );
    let client = reqwest::Client::new();
    match client.post(&url).bearer_auth(token).send().await {
        Ok(resp) if resp.status().is_success() => {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                println!(
                    "{} Session {} is now {}",
                    "✓".green(),
                    session_id,
                    body["status"].as_str().unwrap_or("unknown").green().bold()
                );
            }
        }
        Ok(resp) => print_error_body(resp).await,
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

fn describe(envelope: &serde_json::Value) -> String {
    let kind = envelope["type"].as_str().unwrap_or("?");
    let from = envelope["sender_participant_id"].as_str().unwrap_or("server");
    match kind {
        "welcome" => format!(
            "welcome: you are {} with {} member(s) present",
            envelope["payload"]["participant"]["participant_id"]
                .as_str()
                .unwrap_or("?"),
            envelope["payload"]["members"]
                .as_array()
                .map(|members| members.len())
                .unwrap_or(0)
        ),
        "rejected" => format!(
            "rejected ({}): {}",
            envelope["payload"]["reason"].as_str().unwrap_or("?"),
            envelope["payload"]["message"].as_str().unwrap_or("")
        ),
        "user_joined" | "user_left" => format!(
            "{} {}",
            kind,
            envelope["payload"]["user_id"].as_str().unwrap_or(from)
        ),
        _ => format!("{} from {}: {}", kind, from, envelope["payload"]),
    }
}

/// Returns false once the server has closed or rejected the connection
fn print_frame(message: &Message) -> bool {
    match message {
        Message::Text(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(envelope) => {
                let line = describe(&envelope);
                match envelope["type"].as_str() {
                    Some("rejected") | Some("session_ended") => {
                        println!("{} {}", "◀".red(), line.red());
                        false
                    }
                    _ => {
                        println!("{} {}", "◀".green(), line.bright_white());
                        true
                    }
                }
            }
            Err(_) => {
                println!("{} {}", "◀".yellow(), text);
                true
            }
        },
        Message::Close(_) => {
            println!("{} Server closed the connection", "✗".yellow());
            false
        }
        _ => true,
    }
}

async fn join_classroom(server: &str, session_id: &str, token: &str, chat: Option<&str>, keep_alive: bool) {
    println!("{}", "Joining classroom...".cyan());
    println!("  Session ID: {}", session_id);

    let url = format!("ws://{}/classroom/{}", server, urlencoding::encode(session_id));
    let (ws_stream, _) = match connect_async(&url).await {
        Ok(connection) => connection,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let join = json!({ "type": "join", "payload": { "token": token } });
    if write.send(Message::Text(join.to_string())).await.is_err() {
        println!("{} Failed to send join", "✗".red());
        return;
    }

    match timeout(Duration::from_secs(5), read.next()).await {
        Ok(Some(Ok(message))) => {
            if !print_frame(&message) {
                return;
            }
        }
        Ok(Some(Err(e))) => {
            println!("{} Error receiving message: {}", "✗".red(), e);
            return;
        }
        Ok(None) => {
            println!("{} Connection closed by server", "✗".red());
            return;
        }
        Err(_) => {
            println!("{} Timeout waiting for welcome", "✗".red());
            return;
        }
    }

    if let Some(text) = chat {
        let message = json!({ "type": "chat", "payload": { "text": text } });
        if write.send(Message::Text(message.to_string())).await.is_ok() {
            println!("{} chat: {}", "▶".cyan(), text);
        }
    }

    if !keep_alive {
        let _ = write
            .send(Message::Text(json!({ "type": "leave" }).to_string()))
            .await;
        println!("{} Left the classroom", "✓".green());
        println!("Use {} to stay connected.", "--keep-alive".cyan());
        return;
    }

    println!("\n{}", "Connected. Listening for envelopes...".yellow());
    println!("Press {} to leave.", "Ctrl+C".bold());

    let mut heartbeat = interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let beat = json!({ "type": "heartbeat" }).to_string();
                if write.send(Message::Text(beat)).await.is_err() {
                    println!("{} Failed to send heartbeat", "✗".red());
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = write
                    .send(Message::Text(json!({ "type": "leave" }).to_string()))
                    .await;
                println!("\n{} Left the classroom", "✓".green());
                break;
            }
            frame = read.next() => match frame {
                Some(Ok(message)) => {
                    if !print_frame(&message) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    println!("{} Connection error: {}", "✗".red(), e);
                    break;
                }
                None => {
                    println!("{} Connection closed", "✗".yellow());
                    break;
                }
            }
        }
    }
}
