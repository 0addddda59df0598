//! Store configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the engine can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::time::Duration;

use postbox_shared::constants::{
    DEFAULT_FANOUT_BATCH, DEFAULT_PAGE_SIZE, DEFAULT_UNREAD_LIMIT, MAX_PAGE_SIZE,
};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite database file.
    /// Env: `POSTBOX_DB_PATH`
    /// Default: `None` (platform data directory, see [`crate::Database::new`]).
    pub db_path: Option<PathBuf>,

    /// Inbox page size used when the caller does not pass one.
    /// Env: `POSTBOX_PAGE_SIZE`
    /// Default: `20`
    pub page_size: u32,

    /// Largest page a caller may request; bigger requests are clamped.
    /// Env: `POSTBOX_MAX_PAGE_SIZE`
    /// Default: `100`
    pub max_page_size: u32,

    /// Cap applied to unread counts.
    /// Env: `POSTBOX_UNREAD_LIMIT`
    /// Default: `99`
    pub unread_limit: u32,

    /// How long a statement waits on a locked database before failing.
    /// Env: `POSTBOX_BUSY_TIMEOUT_MS`
    /// Default: `5000`
    pub busy_timeout: Duration,

    /// Broadcasts fetched per round trip during fan-out.
    /// Env: `POSTBOX_FANOUT_BATCH`
    /// Default: `64`
    pub fanout_batch: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            unread_limit: DEFAULT_UNREAD_LIMIT,
            busy_timeout: Duration::from_millis(5_000),
            fanout_batch: DEFAULT_FANOUT_BATCH,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`StoreConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("POSTBOX_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(n) = parse_positive(&lookup, "POSTBOX_PAGE_SIZE") {
            config.page_size = n;
        }

        if let Some(n) = parse_positive(&lookup, "POSTBOX_MAX_PAGE_SIZE") {
            config.max_page_size = n;
        }

        if let Some(n) = parse_positive(&lookup, "POSTBOX_UNREAD_LIMIT") {
            config.unread_limit = n;
        }

        if let Some(ms) = parse_positive(&lookup, "POSTBOX_BUSY_TIMEOUT_MS") {
            config.busy_timeout = Duration::from_millis(u64::from(ms));
        }

        if let Some(n) = parse_positive(&lookup, "POSTBOX_FANOUT_BATCH") {
            config.fanout_batch = n;
        }

        if config.page_size > config.max_page_size {
            tracing::warn!(
                page_size = config.page_size,
                max_page_size = config.max_page_size,
                "POSTBOX_PAGE_SIZE exceeds POSTBOX_MAX_PAGE_SIZE, clamping"
            );
            config.page_size = config.max_page_size;
        }

        config
    }

    /// Clamp a caller-supplied page size into `1..=max_page_size`.
    pub fn page_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

fn parse_positive<F>(lookup: &F, key: &str) -> Option<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
