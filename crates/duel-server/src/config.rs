//! Environment-driven server configuration.

use clap::Parser;

/// Typed configuration, populated from environment variables at startup.
///
/// No CLI arguments are actually passed by the process supervisor — every
/// field falls back to its documented default when the corresponding env
/// var is absent, the way `clap`'s `env` derive is used elsewhere in this
/// ecosystem for server config.
#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Listening port.
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Path to the SQLite match-history database.
    #[arg(long, env = "DB_PATH", default_value = "./gamehistory.db")]
    pub db_path: String,

    /// Keepalive ping period, in seconds.
    #[arg(long, env = "PING_INTERVAL", default_value_t = 30)]
    pub ping_interval_secs: u64,

    /// Idle-room reap horizon, in seconds.
    #[arg(long, env = "ROOM_EXPIRY", default_value_t = 3600)]
    pub room_expiry_secs: u64,

    /// Reconnect grace window, in seconds.
    #[arg(long, env = "RECONNECT_TIMEOUT", default_value_t = 120)]
    pub reconnect_timeout_secs: u64,

    /// Turn duration, in seconds.
    #[arg(long, env = "TURN_DURATION", default_value_t = 90)]
    pub turn_duration_secs: u64,

    /// Per-room, per-second action threshold before `RATE_LIMIT` kicks in.
    #[arg(long, env = "MAX_ACTIONS_PER_SECOND", default_value_t = 10)]
    pub max_actions_per_second: u32,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// `clap::Parser::parse` reads `std::env::args` too, but this binary takes
    /// no positional arguments, so in practice only the `env` fallbacks fire.
    pub fn load() -> Self {
        Config::parse()
    }
}
