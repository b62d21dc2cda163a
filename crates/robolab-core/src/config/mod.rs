//! Runtime configuration for locking and sync.
//!
//! `RemoteConfig` says where the shared store lives and is read from the
//! environment. `WorkbenchConfig` carries the timing and policy knobs and can
//! be loaded from a JSON file; every field has a default.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_network_url, normalize_text_option};

pub const ENV_REMOTE_URL: &str = "ROBOLAB_REMOTE_URL";
pub const ENV_REMOTE_TOKEN: &str = "ROBOLAB_REMOTE_TOKEN";

const DEFAULT_LOCK_TTL_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 15_000;
const DEFAULT_VALIDATION_INTERVAL_MS: u64 = 10_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

/// Location of the shared store.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// `libsql://`/`https://` endpoint, or a local database file path
    pub url: String,
    /// Access token, required for network endpoints
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl RemoteConfig {
    /// Load the shared store location from environment variables.
    ///
    /// Returns `None` when nothing usable is set, which runs locking and sync
    /// in disabled mode. Partial credentials are logged and also disable them.
    pub fn from_env() -> Option<Self> {
        parse_remote_config(|key| env::var(key).ok())
    }

    pub fn is_network(&self) -> bool {
        is_network_url(&self.url)
    }
}

fn parse_remote_config(get: impl Fn(&str) -> Option<String>) -> Option<RemoteConfig> {
    let url = normalize_text_option(get(ENV_REMOTE_URL));
    let auth_token = normalize_text_option(get(ENV_REMOTE_TOKEN));

    match (url, auth_token) {
        (None, None) => None,
        (None, Some(_)) => {
            tracing::warn!(
                "{} is set but {} is missing; locking and sync are disabled",
                ENV_REMOTE_TOKEN,
                ENV_REMOTE_URL
            );
            None
        }
        (Some(url), None) if is_network_url(&url) => {
            tracing::warn!(
                "{} points at a server but {} is missing; locking and sync are disabled",
                ENV_REMOTE_URL,
                ENV_REMOTE_TOKEN
            );
            None
        }
        (Some(url), auth_token) => Some(RemoteConfig { url, auth_token }),
    }
}

/// What `acquire` reports when the shared store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireFailurePolicy {
    /// Grant the lock: keep students editing through a network outage at the
    /// cost of mutual exclusion during the partition.
    #[default]
    FailOpen,
    /// Deny the lock: never allow two editors, even if nobody can edit.
    FailClosed,
}

/// Where the pull watermark moves after a successful pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkStrategy {
    /// Wall-clock time at pull completion. A row stamped just before that
    /// time but committed after the query ran is never pulled.
    #[default]
    CompletionTime,
    /// Largest `updated_at` seen in the batch. Boundary rows are re-read on
    /// the next pull and dropped by digest comparison.
    MaxObserved,
}

/// Timing and policy settings for a workbench.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkbenchConfig {
    pub lock_ttl_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub validation_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub acquire_failure_policy: AcquireFailurePolicy,
    pub watermark: WatermarkStrategy,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            validation_interval_ms: DEFAULT_VALIDATION_INTERVAL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            acquire_failure_policy: AcquireFailurePolicy::default(),
            watermark: WatermarkStrategy::default(),
        }
    }
}

impl WorkbenchConfig {
    /// Parse a JSON config and validate it.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let payload = std::fs::read_to_string(path)?;
        Self::from_json(&payload)
    }

    /// Reject settings that would break the lease protocol.
    ///
    /// A lease must survive one missed heartbeat, so the TTL has to be at
    /// least twice the heartbeat interval.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("lock_ttl_ms", self.lock_ttl_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("validation_interval_ms", self.validation_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ];
        if let Some((field, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{field} must be greater than zero")));
        }

        if self.lock_ttl_ms < self.heartbeat_interval_ms.saturating_mul(2) {
            return Err(Error::Config(format!(
                "lock_ttl_ms ({}) must be at least twice heartbeat_interval_ms ({})",
                self.lock_ttl_ms, self.heartbeat_interval_ms
            )));
        }
        Ok(())
    }

    pub const fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub const fn validation_interval(&self) -> Duration {
        Duration::from_millis(self.validation_interval_ms)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_remote_config_is_disabled_mode() {
        assert_eq!(parse_remote_config(env_of(&[])), None);
    }

    #[test]
    fn network_url_without_token_is_disabled_mode() {
        let config = parse_remote_config(env_of(&[(ENV_REMOTE_URL, "libsql://class.turso.io")]));
        assert_eq!(config, None);

        let config = parse_remote_config(env_of(&[
            (ENV_REMOTE_URL, "libsql://class.turso.io"),
            (ENV_REMOTE_TOKEN, "secret"),
        ]))
        .unwrap();
        assert!(config.is_network());
    }

    #[test]
    fn file_url_needs_no_token() {
        let config = parse_remote_config(env_of(&[(ENV_REMOTE_URL, "file:/srv/class.db")])).unwrap();
        assert!(!config.is_network());
        assert_eq!(config.auth_token, None);
    }

    #[test]
    fn token_without_url_is_disabled_mode() {
        assert_eq!(parse_remote_config(env_of(&[(ENV_REMOTE_TOKEN, "secret")])), None);
    }

    #[test]
    fn remote_config_debug_redacts_token() {
        let config = RemoteConfig {
            url: "libsql://class.turso.io".to_string(),
            auth_token: Some("secret".to_string()),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn defaults_match_lease_protocol() {
        let config = WorkbenchConfig::default();
        assert_eq!(config.lock_ttl(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.validation_interval(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = WorkbenchConfig::from_json(
            r#"{ "poll_interval_ms": 1000, "acquire_failure_policy": "fail_closed" }"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(
            config.acquire_failure_policy,
            AcquireFailurePolicy::FailClosed
        );
        assert_eq!(config.watermark, WatermarkStrategy::CompletionTime);
    }

    #[test]
    fn ttl_shorter_than_two_heartbeats_is_rejected() {
        let error =
            WorkbenchConfig::from_json(r#"{ "lock_ttl_ms": 20000, "heartbeat_interval_ms": 15000 }"#)
                .unwrap_err();
        assert!(error.to_string().contains("twice"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(WorkbenchConfig::from_json(r#"{ "poll_interval_ms": 0 }"#).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(WorkbenchConfig::from_json(r#"{ "poll_every": 5 }"#).is_err());
    }
}
