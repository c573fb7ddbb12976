use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

/// Server configuration, sourced from CLI flags or environment variables
/// (spec.md §6), via a `clap::Parser` derive.
#[derive(Parser, Debug, Clone)]
#[command(name = "huddle-server", about = "Self-hosted WebRTC signaling server", long_about = None)]
pub struct Config {
    /// TCP port to bind the HTTP/WebSocket listener on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Serve over HTTPS using `ssl_cert_path`/`ssl_key_path`.
    #[arg(long, env = "USE_HTTPS", default_value_t = false)]
    pub use_https: bool,

    #[arg(long, env = "SSL_CERT_PATH")]
    pub ssl_cert_path: Option<PathBuf>,

    #[arg(long, env = "SSL_KEY_PATH")]
    pub ssl_key_path: Option<PathBuf>,

    /// STUN/TURN hints handed to clients via `GET /config`.
    #[arg(long, env = "TURN_SERVER_URL")]
    pub turn_server_url: Option<String>,

    #[arg(long, env = "TURN_SERVER_USERNAME")]
    pub turn_server_username: Option<String>,

    #[arg(long, env = "TURN_SERVER_CREDENTIAL")]
    pub turn_server_credential: Option<String>,

    /// Cap on simultaneous pre-created (latent) rooms server-wide.
    #[arg(long, env = "MAX_LATENT_ROOMS", default_value_t = 10)]
    pub max_latent_rooms: usize,

    /// Latent rooms older than this are evicted by the Janitor.
    #[arg(long, env = "LATENT_ROOM_MAX_AGE_HOURS", default_value_t = 24)]
    pub latent_room_max_age_hours: i64,

    /// Ad-hoc (non-latent) empty rooms older than this are evicted.
    #[arg(long, env = "ROOM_MAX_AGE_HOURS", default_value_t = 1)]
    pub room_max_age_hours: i64,

    /// How often the Janitor sweep runs.
    #[arg(long, env = "ROOM_CLEANUP_INTERVAL_SECS", default_value_t = 1800)]
    pub room_cleanup_interval_secs: u64,

    /// Per-remote-address connection attempts allowed per rate-limit window.
    #[arg(long, env = "RATE_LIMIT_MAX_CONNECTIONS", default_value_t = 10)]
    pub rate_limit_max_connections: u32,

    /// Width of the rate-limit rolling window.
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    pub rate_limit_window_secs: u64,

    /// Default cap on simultaneous participants in a room.
    #[arg(long, env = "MAX_PARTICIPANTS", default_value_t = huddle_core::DEFAULT_MAX_PARTICIPANTS)]
    pub max_participants: usize,

    /// Path to the latent-room persistence file.
    #[arg(long, env = "LATENT_STORE_PATH", default_value = "data/rooms.json")]
    pub latent_store_path: PathBuf,

    /// Comma-separated origins allowed to cross-origin `/ws` and
    /// `/api/rooms`. Empty (the default) means same-origin-only — unlike
    /// `/health`/`/config`, these routes carry per-room authority and are
    /// never permissive-by-default (SPEC_FULL.md §4.7).
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Minimum room cleanup interval (prevents a zero/near-zero interval
    /// from busy-looping the janitor).
    const MIN_CLEANUP_INTERVAL_SECS: u64 = 5;
    const MAX_PARTICIPANTS_CEILING: usize = 64;

    /// Clamp out-of-range values rather than erroring at startup.
    pub fn validate(&mut self) {
        if self.room_cleanup_interval_secs < Self::MIN_CLEANUP_INTERVAL_SECS {
            tracing::warn!(
                requested = self.room_cleanup_interval_secs,
                clamped_to = Self::MIN_CLEANUP_INTERVAL_SECS,
                "room cleanup interval too low, clamping"
            );
            self.room_cleanup_interval_secs = Self::MIN_CLEANUP_INTERVAL_SECS;
        }
        if self.max_participants == 0 || self.max_participants > Self::MAX_PARTICIPANTS_CEILING {
            tracing::warn!(
                requested = self.max_participants,
                clamped_to = huddle_core::DEFAULT_MAX_PARTICIPANTS,
                "max participants out of range, resetting to default"
            );
            self.max_participants = huddle_core::DEFAULT_MAX_PARTICIPANTS;
        }
        if self.use_https && (self.ssl_cert_path.is_none() || self.ssl_key_path.is_none()) {
            tracing::warn!("USE_HTTPS set without both ssl_cert_path and ssl_key_path, disabling");
            self.use_https = false;
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn room_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.room_max_age_hours)
    }

    pub fn latent_room_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.latent_room_max_age_hours)
    }

    pub fn room_cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.room_cleanup_interval_secs)
    }

    pub fn rate_limit_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rate_limit_window_secs)
    }

    /// The shape returned by `GET /config` (spec.md §6).
    pub fn ice_config(&self) -> IceConfig {
        let mut ice_servers = vec![StunServer::google()];
        if let Some(url) = &self.turn_server_url {
            ice_servers.push(IceServer::Turn(TurnServer {
                urls: url.clone(),
                username: self.turn_server_username.clone(),
                credential: self.turn_server_credential.clone(),
            }));
        }
        IceConfig { ice_servers }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IceConfig {
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IceServer {
    Stun(StunServer),
    Turn(TurnServer),
}

#[derive(Debug, Clone, Serialize)]
pub struct StunServer {
    pub urls: String,
}

impl StunServer {
    fn google() -> IceServer {
        IceServer::Stun(StunServer {
            urls: "stun:stun.l.google.com:19302".to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnServer {
    pub urls: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}
