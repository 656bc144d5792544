//! Central Configuration Constants
//!
//! Single source of truth for all engine defaults.
//! Every knob can be overridden through the environment (see `get_*` helpers).

/// Capacity of the recent-events ring
pub const TELEMETRY_BUFFER_CAPACITY: usize = 100;

/// Capacity of the recent-alerts ring
pub const ALERT_BUFFER_CAPACITY: usize = 50;

/// Probability at or above which an event is HIGH
pub const HIGH_BAND_MIN: f32 = 0.7;

/// Probability at or above which an event is MEDIUM
pub const MEDIUM_BAND_MIN: f32 = 0.3;

/// Default alert threshold for a new session
pub const DEFAULT_ALERT_THRESHOLD: f32 = 0.7;

/// Default classifier timeout (milliseconds)
pub const DEFAULT_CLASSIFIER_TIMEOUT_MS: u64 = 2_000;

/// Classifier calls allowed to run at once, timed-out ones included
pub const DEFAULT_CLASSIFIER_MAX_PENDING: usize = 4;

/// Default drain timeout for `stop()` (milliseconds)
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

/// Default pipeline input queue size
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;

/// Default per-subscriber backlog
pub const DEFAULT_SUBSCRIBER_BACKLOG: usize = 256;

/// Default interval between synthetic events (milliseconds)
pub const DEFAULT_SIMULATION_INTERVAL_MS: u64 = 1_000;

/// Default interval between replayed log lines (milliseconds)
pub const DEFAULT_REPLAY_INTERVAL_MS: u64 = 100;

/// Live capture reconnect: first backoff step (milliseconds)
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;

/// Live capture reconnect: backoff ceiling (milliseconds)
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 8_000;

/// Live capture reconnect: attempts after the first failure
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Read timeout handed to the live capture backend (milliseconds)
pub const CAPTURE_READ_TIMEOUT_MS: i32 = 200;

/// Daemon stdout queue for command responses (lines)
pub const RESPONSE_QUEUE_LINES: usize = 16;

/// Daemon stdout queue shared by subscription streams (lines)
pub const STREAM_QUEUE_LINES: usize = 64;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "NetShield";

// ============================================
// Helper functions to read from env with fallback
// ============================================

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Classifier timeout from environment or default
pub fn get_classifier_timeout_ms() -> u64 {
    env_parse("NETSHIELD_CLASSIFIER_TIMEOUT_MS").unwrap_or(DEFAULT_CLASSIFIER_TIMEOUT_MS)
}

/// Classifier call cap from environment or default
pub fn get_classifier_max_pending() -> usize {
    env_parse::<usize>("NETSHIELD_CLASSIFIER_MAX_PENDING")
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_CLASSIFIER_MAX_PENDING)
}

/// Drain timeout from environment or default
pub fn get_drain_timeout_ms() -> u64 {
    env_parse("NETSHIELD_DRAIN_TIMEOUT_MS").unwrap_or(DEFAULT_DRAIN_TIMEOUT_MS)
}

/// Pipeline queue size from environment or default
pub fn get_queue_capacity() -> usize {
    env_parse::<usize>("NETSHIELD_QUEUE_CAPACITY")
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_QUEUE_CAPACITY)
}

/// Subscriber backlog from environment or default
pub fn get_subscriber_backlog() -> usize {
    env_parse::<usize>("NETSHIELD_SUBSCRIBER_BACKLOG")
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_SUBSCRIBER_BACKLOG)
}

/// Disconnect lag threshold; unset means "drop oldest"
pub fn get_subscriber_max_lag() -> Option<u64> {
    env_parse("NETSHIELD_SUBSCRIBER_MAX_LAG")
}

/// Reconnect attempts from environment or default
pub fn get_max_retries() -> u32 {
    env_parse("NETSHIELD_MAX_RETRIES").unwrap_or(DEFAULT_MAX_RETRIES)
}

/// Reconnect base delay from environment or default
pub fn get_retry_base_ms() -> u64 {
    env_parse("NETSHIELD_RETRY_BASE_MS").unwrap_or(DEFAULT_RETRY_BASE_MS)
}

/// Check if the daemon should start a session on launch
pub fn is_autostart_enabled() -> bool {
    std::env::var("NETSHIELD_AUTOSTART")
        .map(|s| s.to_lowercase() == "true" || s == "1")
        .unwrap_or(false)
}

/// Startup capture config (JSON) for autostart
pub fn get_startup_config() -> Option<String> {
    std::env::var("NETSHIELD_CAPTURE_CONFIG").ok().filter(|s| !s.trim().is_empty())
}
