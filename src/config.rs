//! Application-level configuration: batch sizes, lease TTLs, voting windows,
//! rollout switches, and the trigger secret.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use time::Duration;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CLIP_CLASH_CONFIG_PATH";
/// Environment variable holding the shared secret for the job trigger routes.
const TRIGGER_SECRET_ENV: &str = "TRIGGER_SECRET";

const DEFAULT_QUEUE_BATCH_SIZE: usize = 500;
const DEFAULT_DB_BATCH_SIZE: usize = 100;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_LOCK_TTL_SECS: i64 = 55;
const DEFAULT_VISIBILITY_TIMEOUT_SECS: i64 = 60;
const DEFAULT_VOTING_DURATION_HOURS: u32 = 24;

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Maximum number of events popped per drain cycle.
    pub queue_batch_size: usize,
    /// Sub-batch size for vote-table writes within one drain cycle.
    pub db_batch_size: usize,
    /// Delivery attempts before an event is dead-lettered.
    pub max_retries: u32,
    /// Lease TTL in seconds. Must stay below the platform invocation
    /// timeout so an abandoned lease self-expires.
    pub lock_ttl_secs: i64,
    /// Seconds an in-flight event stays invisible before orphan recovery
    /// may requeue it.
    pub visibility_timeout_secs: i64,
    /// Default voting window applied when a slot opens.
    pub voting_duration_hours: u32,
    /// Rollout switch for the queue drain job.
    pub queue_drain_enabled: bool,
    /// Rollout switch for the slot advancement job.
    pub slot_advance_enabled: bool,
    /// Bearer secret required by the job trigger routes. `None` means the
    /// routes reject every request.
    pub trigger_secret: Option<String>,
}

impl AppConfig {
    /// Load the configuration from disk, merged over built-in defaults, and
    /// pick up the trigger secret from the environment.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration from file");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.trigger_secret = env::var(TRIGGER_SECRET_ENV)
            .ok()
            .filter(|secret| !secret.is_empty());
        if config.trigger_secret.is_none() {
            warn!("no trigger secret configured; job trigger routes will reject all requests");
        }

        config
    }

    /// Lease TTL as a duration.
    pub fn lock_ttl(&self) -> Duration {
        Duration::seconds(self.lock_ttl_secs)
    }

    /// Visibility timeout as a duration.
    pub fn visibility_timeout(&self) -> Duration {
        Duration::seconds(self.visibility_timeout_secs)
    }

    /// Voting window as a duration.
    pub fn voting_duration(&self) -> Duration {
        Duration::hours(i64::from(self.voting_duration_hours))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            queue_batch_size: DEFAULT_QUEUE_BATCH_SIZE,
            db_batch_size: DEFAULT_DB_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            voting_duration_hours: DEFAULT_VOTING_DURATION_HOURS,
            queue_drain_enabled: true,
            slot_advance_enabled: true,
            trigger_secret: None,
        }
    }
}

/// JSON representation of the configuration file; every field optional so
/// partial files merge over the defaults.
#[derive(Debug, Deserialize)]
struct RawConfig {
    queue_batch_size: Option<usize>,
    db_batch_size: Option<usize>,
    max_retries: Option<u32>,
    lock_ttl_secs: Option<i64>,
    visibility_timeout_secs: Option<i64>,
    voting_duration_hours: Option<u32>,
    queue_drain_enabled: Option<bool>,
    slot_advance_enabled: Option<bool>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            queue_batch_size: raw.queue_batch_size.unwrap_or(defaults.queue_batch_size),
            db_batch_size: raw.db_batch_size.unwrap_or(defaults.db_batch_size),
            max_retries: raw.max_retries.unwrap_or(defaults.max_retries),
            lock_ttl_secs: raw.lock_ttl_secs.unwrap_or(defaults.lock_ttl_secs),
            visibility_timeout_secs: raw
                .visibility_timeout_secs
                .unwrap_or(defaults.visibility_timeout_secs),
            voting_duration_hours: raw
                .voting_duration_hours
                .unwrap_or(defaults.voting_duration_hours),
            queue_drain_enabled: raw
                .queue_drain_enabled
                .unwrap_or(defaults.queue_drain_enabled),
            slot_advance_enabled: raw
                .slot_advance_enabled
                .unwrap_or(defaults.slot_advance_enabled),
            trigger_secret: None,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_merges_over_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"queue_batch_size": 64, "max_retries": 5}"#).unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.queue_batch_size, 64);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.db_batch_size, DEFAULT_DB_BATCH_SIZE);
        assert!(config.queue_drain_enabled);
    }

    #[test]
    fn durations_derive_from_the_raw_numbers() {
        let config = AppConfig::default();
        assert_eq!(config.lock_ttl(), Duration::seconds(DEFAULT_LOCK_TTL_SECS));
        assert_eq!(
            config.voting_duration(),
            Duration::hours(i64::from(DEFAULT_VOTING_DURATION_HOURS))
        );
    }
}
