use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_SID: &str = "S1";
pub const DEFAULT_ENVIRONMENT: &str = "dev";
pub const DEFAULT_PUSH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_OUTBOUND_QUEUE_CAP: usize = 256;

const SID_VAR: &str = "EMBER_SID";
const ENV_VAR: &str = "EMBER_ENV";
const SNAPSHOT_DIR_VAR: &str = "EMBER_SNAPSHOT_DIR";
const PUSH_TIMEOUT_VAR: &str = "EMBER_PUSH_TIMEOUT_MS";
const OUTBOUND_QUEUE_CAP_VAR: &str = "EMBER_OUTBOUND_QUEUE_CAP";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub sid: String,
    pub environment: String,
    pub snapshot_dir: PathBuf,
    pub push_timeout: Duration,
    pub outbound_queue_cap: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sid: DEFAULT_SID.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            snapshot_dir: default_snapshot_dir(),
            push_timeout: Duration::from_millis(DEFAULT_PUSH_TIMEOUT_MS),
            outbound_queue_cap: DEFAULT_OUTBOUND_QUEUE_CAP,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Missing, empty or invalid values
    /// fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: String| {
            lookup(key)
                .filter(|raw| !raw.trim().is_empty())
                .unwrap_or(default)
        };

        let push_timeout_ms = parse_positive(&lookup, PUSH_TIMEOUT_VAR, DEFAULT_PUSH_TIMEOUT_MS);

        Self {
            sid: text(SID_VAR, DEFAULT_SID.to_string()),
            environment: text(ENV_VAR, DEFAULT_ENVIRONMENT.to_string()),
            snapshot_dir: lookup(SNAPSHOT_DIR_VAR)
                .filter(|raw| !raw.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_snapshot_dir),
            push_timeout: Duration::from_millis(push_timeout_ms),
            outbound_queue_cap: parse_positive(
                &lookup,
                OUTBOUND_QUEUE_CAP_VAR,
                DEFAULT_OUTBOUND_QUEUE_CAP,
            ),
        }
    }
}

fn default_snapshot_dir() -> PathBuf {
    std::env::temp_dir().join("ember-snapshots")
}

fn parse_positive<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            warn!(key, value = %raw, default = %default, "invalid config value; using default");
            default
        }
    }
}
