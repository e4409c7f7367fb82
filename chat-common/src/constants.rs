//! Limits and defaults shared by the codec, validators, and storage layer.

/// Big-endian length prefix size, in bytes.
pub const HEADER_SIZE: usize = 4;

/// Maximum encoded frame payload, in bytes (excludes the header).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 20;
pub const PASSWORD_MIN_LEN: usize = 6;
pub const MESSAGE_MAX_LEN: usize = 2000;
pub const CHANNEL_NAME_MIN_LEN: usize = 2;
pub const CHANNEL_NAME_MAX_LEN: usize = 30;

pub const MESSAGE_HISTORY_LIMIT: i64 = 50;

pub const RATE_LIMIT_MAX_EVENTS: usize = 5;
pub const RATE_LIMIT_WINDOW_SECS: f64 = 1.0;

pub const SESSION_EXPIRY_HOURS: i64 = 24;

pub const DEFAULT_CHANNEL: &str = "general";
pub const DEFAULT_CHANNEL_DESCRIPTION: &str = "General discussion";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5050;
pub const LISTEN_BACKLOG: u32 = 50;
pub const IDLE_TIMEOUT_SECS: u64 = 300;

/// Interval between sweeps that delete expired session rows.
pub const SESSION_PRUNE_INTERVAL_SECS: u64 = 3600;
