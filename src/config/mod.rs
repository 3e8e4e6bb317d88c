use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, SignalingError};

pub const DEFAULT_STUN_SERVER_URL: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub classroom: ClassroomConfig,
    pub collaborators: CollaboratorConfig,
    pub ice: IceConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Tunables for rooms and per-connection behaviour
#[derive(Debug, Clone)]
pub struct ClassroomConfig {
    /// A participant silent for this long is evicted
    pub heartbeat_timeout: Duration,
    /// Period of the heartbeat sweep
    pub heartbeat_interval: Duration,
    /// Time a fresh connection has to send its `join`
    pub join_timeout: Duration,
    /// Default member cap; `None` means unlimited
    pub room_capacity: Option<usize>,
    pub outbound_queue_capacity: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CollaboratorConfig {
    pub directory_file: Option<String>,
    pub backend_url: Option<String>,
    pub backend_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IceConfig {
    pub stun_url: String,
    pub turn_url: Option<String>,
    pub turn_username: Option<String>,
    pub turn_password: Option<String>,
}

/// One entry of the ICE server list handed to clients
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl Default for ClassroomConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            join_timeout: Duration::from_secs(10),
            room_capacity: None,
            outbound_queue_capacity: 64,
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_url: DEFAULT_STUN_SERVER_URL.to_string(),
            turn_url: None,
            turn_username: None,
            turn_password: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = ClassroomConfig::default();

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT")?.unwrap_or(8080),
            },
            classroom: ClassroomConfig {
                heartbeat_timeout: parse_var("HEARTBEAT_TIMEOUT_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.heartbeat_timeout),
                heartbeat_interval: parse_var("HEARTBEAT_INTERVAL_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.heartbeat_interval),
                join_timeout: parse_var("JOIN_TIMEOUT_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.join_timeout),
                room_capacity: parse_var("ROOM_CAPACITY")?,
                outbound_queue_capacity: parse_var("OUTBOUND_QUEUE_CAPACITY")?
                    .unwrap_or(defaults.outbound_queue_capacity),
            },
            collaborators: CollaboratorConfig {
                directory_file: non_empty_var("DIRECTORY_FILE"),
                backend_url: non_empty_var("BACKEND_API_URL"),
                backend_token: non_empty_var("BACKEND_SERVICE_TOKEN"),
            },
            ice: IceConfig {
                stun_url: non_empty_var("STUN_SERVER_URL")
                    .unwrap_or_else(|| DEFAULT_STUN_SERVER_URL.to_string()),
                turn_url: non_empty_var("TURN_URL"),
                turn_username: non_empty_var("TURN_USERNAME"),
                turn_password: non_empty_var("TURN_PASSWORD"),
            },
        }
        .validated()?)
    }

    fn validated(self) -> Result<Self> {
        if self.classroom.outbound_queue_capacity == 0 {
            return Err(SignalingError::InvalidConfiguration(
                "OUTBOUND_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }
        if self.classroom.room_capacity == Some(0) {
            return Err(SignalingError::InvalidConfiguration(
                "ROOM_CAPACITY must be at least 1".to_string(),
            ));
        }
        if self.classroom.heartbeat_interval.is_zero() {
            return Err(SignalingError::InvalidConfiguration(
                "HEARTBEAT_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::UNSPECIFIED;
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::LOCALHOST,
            "" | "0.0.0.0" => Ipv4Addr::UNSPECIFIED,
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::UNSPECIFIED
            }
        }
    }
}

impl IceConfig {
    /// STUN first, then TURN when configured
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut servers = vec![IceServer {
            urls: vec![self.stun_url.clone()],
            username: None,
            credential: None,
        }];

        if let Some(turn_url) = &self.turn_url {
            let url = if turn_url.starts_with("turn:") || turn_url.starts_with("turns:") {
                turn_url.clone()
            } else {
                format!("turn:{}", turn_url)
            };
            servers.push(IceServer {
                urls: vec![url],
                username: self.turn_username.clone(),
                credential: self.turn_password.clone(),
            });
        }

        servers
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>> {
    match non_empty_var(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            SignalingError::ConfigurationParseFailed(format!("{} has invalid value {:?}", key, raw))
        }),
    }
}
