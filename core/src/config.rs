/// Configuration management
use crate::error::{Result, SyncError};
use crate::identity::IdScheme;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:7420";
pub const DEFAULT_CHANNEL: &str = "bot-1";
pub const DEFAULT_EVENT_NAME: &str = "new-message";
pub const DEFAULT_BOT_ID: &str = "BOT";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local sender id; a random UUID is used when unset
    pub client_id: Option<String>,

    /// Relay address for the TCP transport
    pub relay_addr: SocketAddr,

    /// Channel joined on the relay
    pub channel: String,

    /// Application event name carrying chat payloads
    pub event_name: String,

    /// Reserved sender id of the demo bot
    pub bot_id: String,

    /// Connect + join timeout
    pub connect_timeout: Duration,

    /// Notification buffer per subscriber
    pub notification_capacity: usize,

    /// Transport notice buffer per subscriber
    pub notice_capacity: usize,

    /// Message id derivation scheme
    pub id_scheme: IdScheme,

    /// Start with the offline simulation flag set
    pub start_offline: bool,

    /// Conversation created and selected at startup
    pub initial_conversation: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: None,
            relay_addr: SocketAddr::from(([127, 0, 0, 1], 7420)),
            channel: DEFAULT_CHANNEL.to_string(),
            event_name: DEFAULT_EVENT_NAME.to_string(),
            bot_id: DEFAULT_BOT_ID.to_string(),
            connect_timeout: Duration::from_secs(10),
            notification_capacity: 16,
            notice_capacity: 64,
            id_scheme: IdScheme::Legacy,
            start_offline: false,
            initial_conversation: None,
        }
    }
}

impl Config {
    /// Create config from command line arguments (first element is the binary name)
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Config::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--relay" => {
                    let v = flag_value(args, i, "--relay", "an address")?;
                    config.relay_addr = parse_addr(v, "--relay")?;
                    i += 2;
                }
                "--client-id" => {
                    let v = flag_value(args, i, "--client-id", "an id")?;
                    config.client_id = Some(v.to_string());
                    i += 2;
                }
                "--channel" => {
                    let v = flag_value(args, i, "--channel", "a channel name")?;
                    config.channel = v.to_string();
                    i += 2;
                }
                "--conversation" => {
                    let v = flag_value(args, i, "--conversation", "a conversation id")?;
                    config.initial_conversation = Some(v.to_string());
                    i += 2;
                }
                "--id-scheme" => {
                    let v = flag_value(args, i, "--id-scheme", "legacy|digest")?;
                    config.id_scheme = v.parse().map_err(SyncError::Config)?;
                    i += 2;
                }
                "--offline" => {
                    config.start_offline = true;
                    i += 1;
                }
                other => {
                    return Err(SyncError::Config(format!(
                        "Unknown argument: {}\nUsage: {} [--relay <addr>] [--client-id <id>] [--channel <name>] [--conversation <id>] [--id-scheme legacy|digest] [--offline]",
                        other,
                        args.first().map(String::as_str).unwrap_or("chatsync")
                    )));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(v) = std::env::var("CHATSYNC_RELAY") {
            config.relay_addr = parse_addr(&v, "CHATSYNC_RELAY")?;
        }
        if let Ok(v) = std::env::var("CHATSYNC_CLIENT_ID") {
            if !v.trim().is_empty() {
                config.client_id = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CHATSYNC_CHANNEL") {
            if !v.trim().is_empty() {
                config.channel = v;
            }
        }

        Ok(config)
    }

    /// Configured client id, or a fresh random one
    pub fn resolve_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7420)),
        }
    }
}

impl RelayConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = RelayConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--listen" => {
                    let v = flag_value(args, i, "--listen", "an address")?;
                    config.listen_addr = parse_addr(v, "--listen")?;
                    i += 2;
                }
                other => {
                    return Err(SyncError::Config(format!(
                        "Unknown argument: {}\nUsage: relay [--listen <addr>]",
                        other
                    )));
                }
            }
        }
        Ok(config)
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str, what: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| SyncError::Config(format!("{} requires {} argument", flag, what)))
}

fn parse_addr(value: &str, source: &str) -> Result<SocketAddr> {
    value
        .parse::<SocketAddr>()
        .map_err(|_| SyncError::Config(format!("{} must be a socket address like {}", source, DEFAULT_RELAY_ADDR)))
}
