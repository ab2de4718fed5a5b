//! Daemon configuration loaded from a TOML file (default `hbmon.toml`).
//!
//! Every field has a default, so a missing file or an empty table is a
//! valid configuration. Unknown fields are rejected.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use hbmon_core::{AlertPolicy, BoardPolicy};

pub const DEFAULT_CONFIG_PATH: &str = "hbmon.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub ingest: IngestConfig,
    pub board: BoardConfig,
    pub alert: AlertConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub queries: QueryConfig,
}

/// Which payloads count as heartbeats. `None` accepts any sender/channel.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub sender_id: Option<String>,
    pub channel_id: Option<String>,
}

impl IngestConfig {
    pub fn accepts(&self, sender_id: &str, channel_id: &str) -> bool {
        self.sender_id.as_deref().is_none_or(|s| s == sender_id)
            && self.channel_id.as_deref().is_none_or(|c| c == channel_id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    /// Seconds between board rebuilds.
    pub edit_period_secs: u64,
    pub offline_threshold_secs: u64,
    pub bold_instance_threshold: u32,
    pub rate_warning_threshold: f64,
    pub max_payload_chars: usize,
    /// Where the published board is written; relative to the store root.
    pub output: PathBuf,
}

impl Default for BoardConfig {
    fn default() -> Self {
        let policy = BoardPolicy::default();
        Self {
            edit_period_secs: 30,
            offline_threshold_secs: policy.offline_threshold_secs,
            bold_instance_threshold: policy.bold_instance_threshold,
            rate_warning_threshold: policy.rate_warning_threshold,
            max_payload_chars: policy.max_payload_chars,
            output: PathBuf::from("board.md"),
        }
    }
}

impl BoardConfig {
    pub fn policy(&self) -> BoardPolicy {
        BoardPolicy {
            offline_threshold_secs: self.offline_threshold_secs,
            bold_instance_threshold: self.bold_instance_threshold,
            rate_warning_threshold: self.rate_warning_threshold,
            max_payload_chars: self.max_payload_chars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertConfig {
    pub cooldown_secs: u64,
    pub min_elapsed_for_rate: u64,
    pub rate_floor: f64,
    pub instance_floor: Option<u32>,
    /// JSONL file alerts are appended to; relative to the store root.
    pub output: PathBuf,
}

impl Default for AlertConfig {
    fn default() -> Self {
        let policy = AlertPolicy::default();
        Self {
            cooldown_secs: policy.cooldown_secs,
            min_elapsed_for_rate: policy.min_elapsed_for_rate,
            rate_floor: policy.rate_floor,
            instance_floor: policy.instance_floor,
            output: PathBuf::from("alerts.jsonl"),
        }
    }
}

impl AlertConfig {
    pub fn policy(&self) -> AlertPolicy {
        AlertPolicy {
            cooldown_secs: self.cooldown_secs,
            min_elapsed_for_rate: self.min_elapsed_for_rate,
            rate_floor: self.rate_floor,
            instance_floor: self.instance_floor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

impl StoreConfig {
    /// Resolve a configured output path against the store root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Role ids allowed to confirm, retract and retire. Empty denies everyone.
    pub moderator_roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    pub inactive_days: u64,
    pub top_n: usize,
    pub chart_window_days: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            inactive_days: 7,
            top_n: 20,
            chart_window_days: 7,
        }
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").expect("parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.board.edit_period_secs, 30);
        assert_eq!(config.board.offline_threshold_secs, 1980);
        assert_eq!(config.alert.cooldown_secs, 7200);
        assert_eq!(config.queries.top_n, 20);
        assert!(config.alert.instance_floor.is_none());
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
[ingest]
sender_id = "1001"
channel_id = "2002"

[board]
edit_period_secs = 10
max_payload_chars = 1000
output = "/srv/board.md"

[alert]
rate_floor = 80.0
instance_floor = 3

[store]
root = "/var/lib/hbmon"

[auth]
moderator_roles = ["mods", "admins"]

[queries]
inactive_days = 14
"#;
        let config = Config::parse(toml).expect("parse");
        assert_eq!(config.ingest.sender_id.as_deref(), Some("1001"));
        assert_eq!(config.board.policy().max_payload_chars, 1000);
        assert_eq!(config.board.policy().bold_instance_threshold, 4);
        assert_eq!(config.alert.policy().instance_floor, Some(3));
        assert_eq!(config.alert.policy().rate_floor, 80.0);
        assert_eq!(config.auth.moderator_roles, vec!["mods", "admins"]);
        assert_eq!(config.queries.inactive_days, 14);
        assert_eq!(config.queries.chart_window_days, 7);
        assert_eq!(
            config.store.resolve(&config.board.output),
            PathBuf::from("/srv/board.md")
        );
        assert_eq!(
            config.store.resolve(&config.alert.output),
            PathBuf::from("/var/lib/hbmon/alerts.jsonl")
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Config::parse("[board]\nedit_period = 5\n").is_err());
        assert!(Config::parse("[telemetry]\n").is_err());
    }

    #[test]
    fn ingest_filter_matches_sender_and_channel() {
        let filter = IngestConfig {
            sender_id: Some("bot".into()),
            channel_id: Some("hb".into()),
        };
        assert!(filter.accepts("bot", "hb"));
        assert!(!filter.accepts("human", "hb"));
        assert!(!filter.accepts("bot", "general"));
        assert!(IngestConfig::default().accepts("anyone", "anywhere"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config, Config::default());
    }
}
