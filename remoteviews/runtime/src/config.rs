//! Collector limits and host settings read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TRANSACTION_BUDGET: usize = 800_000;
pub const DEFAULT_COLLECTION_TIMEOUT_MS: u64 = 20_000;
/// One full-HD ARGB screen, times one and a half.
pub const DEFAULT_MAX_BITMAP_MEMORY: usize = 1920 * 1080 * 4 * 3 / 2;
pub const DEFAULT_OUTBOUND_QUEUE_CAP: usize = 256;
pub const DEFAULT_SID: &str = "S1";

pub const ENV_SID: &str = "REMOTE_VIEWS_SID";
pub const ENV_OUTBOUND_QUEUE_CAP: &str = "REMOTE_VIEWS_OUTBOUND_QUEUE_CAP";
pub const ENV_COLLECTION_TIMEOUT_MS: &str = "REMOTE_VIEWS_COLLECTION_TIMEOUT_MS";
pub const ENV_MAX_BITMAP_MEMORY: &str = "REMOTE_VIEWS_MAX_BITMAP_MEMORY";
pub const ENV_RESOURCES: &str = "REMOTE_VIEWS_RESOURCES";

/// Limits applied while resolving legacy collection sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Bytes one serialized hierarchy may occupy, resolved collections included.
    pub transaction_budget: usize,
    /// How long each remote factory gets to answer.
    pub timeout_ms: u64,
    /// Bitmap memory one hierarchy may reference.
    pub max_bitmap_memory: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            transaction_budget: DEFAULT_TRANSACTION_BUDGET,
            timeout_ms: DEFAULT_COLLECTION_TIMEOUT_MS,
            max_bitmap_memory: DEFAULT_MAX_BITMAP_MEMORY,
        }
    }
}

impl CollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub sid: String,
    pub outbound_queue_cap: usize,
    pub collector: CollectorConfig,
    /// JSON resource table to load instead of the built-in one.
    pub resources: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sid: DEFAULT_SID.to_string(),
            outbound_queue_cap: DEFAULT_OUTBOUND_QUEUE_CAP,
            collector: CollectorConfig::default(),
            resources: None,
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`; unset, empty, unparsable or
    /// non-positive values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let positive = |key: &str| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .filter(|value| *value > 0)
        };

        Self {
            sid: lookup(ENV_SID)
                .filter(|sid| !sid.is_empty())
                .unwrap_or(defaults.sid),
            outbound_queue_cap: positive(ENV_OUTBOUND_QUEUE_CAP)
                .and_then(|cap| usize::try_from(cap).ok())
                .unwrap_or(defaults.outbound_queue_cap),
            collector: CollectorConfig {
                timeout_ms: positive(ENV_COLLECTION_TIMEOUT_MS).unwrap_or(defaults.collector.timeout_ms),
                max_bitmap_memory: positive(ENV_MAX_BITMAP_MEMORY)
                    .and_then(|bytes| usize::try_from(bytes).ok())
                    .unwrap_or(defaults.collector.max_bitmap_memory),
                ..defaults.collector
            },
            resources: lookup(ENV_RESOURCES)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> HostConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        HostConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]);
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.collector.transaction_budget, 800_000);
        assert_eq!(config.collector.timeout(), Duration::from_secs(20));
        assert_eq!(config.collector.max_bitmap_memory, 12_441_600);
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            (ENV_SID, "S9"),
            (ENV_OUTBOUND_QUEUE_CAP, "32"),
            (ENV_COLLECTION_TIMEOUT_MS, "1500"),
            (ENV_MAX_BITMAP_MEMORY, "4096"),
            (ENV_RESOURCES, "/tmp/resources.json"),
        ]);
        assert_eq!(config.sid, "S9");
        assert_eq!(config.outbound_queue_cap, 32);
        assert_eq!(config.collector.timeout_ms, 1500);
        assert_eq!(config.collector.max_bitmap_memory, 4096);
        assert_eq!(config.resources, Some(PathBuf::from("/tmp/resources.json")));
    }

    #[rstest]
    #[case("0")]
    #[case("-4")]
    #[case("many")]
    #[case("")]
    fn bad_queue_capacity_falls_back(#[case] raw: &str) {
        assert_eq!(
            config(&[(ENV_OUTBOUND_QUEUE_CAP, raw)]).outbound_queue_cap,
            DEFAULT_OUTBOUND_QUEUE_CAP
        );
    }

    #[test]
    fn collector_config_fills_missing_fields() {
        let config: CollectorConfig = serde_json::from_str(r#"{"timeout_ms": 50}"#).expect("partial config");
        assert_eq!(config.timeout_ms, 50);
        assert_eq!(config.transaction_budget, DEFAULT_TRANSACTION_BUDGET);
    }
}
