use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Application configuration, read from the environment with defaults
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub room: RoomConfig,
    pub session: SessionConfig,
    pub events: EventConfig,
    pub hub: HubConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Postgres store when set, in-memory store otherwise
    pub database_url: Option<String>,
    /// Redis cache when set, in-memory cache otherwise
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub max_players: i32,
    /// Expiry window for new rooms, also the cache-mirror TTL
    pub default_timeout: Duration,
    pub cleanup_interval: Duration,
    pub lock_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub timeout: Duration,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct EventConfig {
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub outbound_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:8080".to_string(),
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                token_expiration_hours: 24,
            },
            storage: StorageConfig {
                database_url: None,
                redis_url: None,
            },
            room: RoomConfig::default(),
            session: SessionConfig {
                timeout: Duration::from_secs(120),
                heartbeat_interval: Duration::from_secs(30),
            },
            events: EventConfig {
                channel: "game:events".to_string(),
            },
            hub: HubConfig {
                outbound_capacity: 256,
            },
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: 10,
            default_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            lock_ttl: Duration::from_millis(5000),
        }
    }
}

impl AppConfig {
    /// Builds the configuration from environment variables.
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            server: ServerConfig {
                bind_addr: env_or("BIND_ADDR", defaults.server.bind_addr),
            },
            auth: AuthConfig {
                jwt_secret: env_or("JWT_SECRET", defaults.auth.jwt_secret),
                token_expiration_hours: env_parse(
                    "JWT_EXPIRATION_HOURS",
                    defaults.auth.token_expiration_hours,
                ),
            },
            storage: StorageConfig {
                database_url: std::env::var("DATABASE_URL").ok(),
                redis_url: std::env::var("REDIS_URL").ok(),
            },
            room: RoomConfig {
                max_players: env_parse("ROOM_MAX_PLAYERS", defaults.room.max_players),
                default_timeout: Duration::from_secs(env_parse(
                    "ROOM_DEFAULT_TIMEOUT_SECS",
                    defaults.room.default_timeout.as_secs(),
                )),
                cleanup_interval: Duration::from_secs(env_parse(
                    "ROOM_CLEANUP_INTERVAL_SECS",
                    defaults.room.cleanup_interval.as_secs(),
                )),
                lock_ttl: Duration::from_millis(env_parse(
                    "ROOM_LOCK_TTL_MS",
                    defaults.room.lock_ttl.as_millis() as u64,
                )),
            },
            session: SessionConfig {
                timeout: Duration::from_secs(env_parse(
                    "SESSION_TIMEOUT_SECS",
                    defaults.session.timeout.as_secs(),
                )),
                heartbeat_interval: Duration::from_secs(env_parse(
                    "SESSION_HEARTBEAT_SECS",
                    defaults.session.heartbeat_interval.as_secs(),
                )),
            },
            events: EventConfig {
                channel: env_or("EVENT_CHANNEL", defaults.events.channel),
            },
            hub: HubConfig {
                outbound_capacity: env_parse(
                    "HUB_OUTBOUND_CAPACITY",
                    defaults.hub.outbound_capacity,
                )
                .max(1),
            },
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key = key, value = %raw, "Invalid config value, using default");
            default
        }),
        Err(_) => default,
    }
}
