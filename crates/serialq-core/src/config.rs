use crate::error::{QueueError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default config file looked up by the CLI when no path is given.
pub const CONFIG_FILE: &str = "serialq.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ShutdownPolicy
// ---------------------------------------------------------------------------

/// What happens to still-pending actions when a queue shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Run every pending action, then stop.
    #[default]
    Drain,
    /// Kill every pending action without running it, then stop.
    Discard,
}

impl ShutdownPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ShutdownPolicy::Drain => "drain",
            ShutdownPolicy::Discard => "discard",
        }
    }
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ShutdownPolicy {
    type Err = QueueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "drain" => Ok(ShutdownPolicy::Drain),
            "discard" => Ok(ShutdownPolicy::Discard),
            _ => Err(QueueError::InvalidShutdownPolicy(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name; also the worker thread's name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Capture a submitter backtrace for every action.
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
    /// Accept submissions but hold dispatch until `resume()`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub start_paused: bool,
}

fn default_name() -> String {
    "serialq".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            debug: false,
            shutdown: ShutdownPolicy::default(),
            start_paused: false,
        }
    }
}

impl QueueConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: QueueConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.name.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "queue name is empty".to_string(),
            });
        }

        if self.name.contains('\0') {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "queue name contains a NUL byte".to_string(),
            });
        }

        // Linux truncates thread names to 15 bytes.
        if self.name.len() > 15 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "queue name '{}' is longer than 15 bytes and will be truncated in OS thread listings",
                    self.name
                ),
            });
        }

        if self.debug {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "debug is on: every submission captures a backtrace".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_yaml_uses_defaults() {
        let cfg: QueueConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, QueueConfig::default());
        assert_eq!(cfg.name, "serialq");
        assert_eq!(cfg.shutdown, ShutdownPolicy::Drain);
    }

    #[test]
    fn shutdown_policy_yaml_snake_case() {
        let cfg: QueueConfig =
            serde_yaml::from_str("name: ui\ndebug: true\nshutdown: discard\n").unwrap();
        assert_eq!(cfg.name, "ui");
        assert!(cfg.debug);
        assert_eq!(cfg.shutdown, ShutdownPolicy::Discard);
    }

    #[test]
    fn start_paused_not_serialized_when_false() {
        let yaml = serde_yaml::to_string(&QueueConfig::default()).unwrap();
        assert!(!yaml.contains("start_paused"));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let cfg = QueueConfig {
            name: "models".to_string(),
            debug: true,
            shutdown: ShutdownPolicy::Discard,
            start_paused: false,
        };
        cfg.save(&path).unwrap();
        assert_eq!(QueueConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn load_rejects_unknown_policy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "shutdown: explode\n").unwrap();
        assert!(matches!(QueueConfig::load(&path), Err(QueueError::Yaml(_))));
    }

    #[test]
    fn parse_policy_from_str() {
        assert_eq!("discard".parse::<ShutdownPolicy>().unwrap(), ShutdownPolicy::Discard);
        assert!("later".parse::<ShutdownPolicy>().is_err());
    }

    #[test]
    fn validate_default_config_no_warnings() {
        assert!(QueueConfig::default().validate().is_empty());
    }

    #[test]
    fn validate_empty_name_is_error() {
        let cfg = QueueConfig {
            name: "  ".to_string(),
            ..QueueConfig::default()
        };
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("empty")));
        assert!(matches!(
            crate::queue::Queue::with_config(cfg),
            Err(QueueError::InvalidName(_))
        ));
    }

    #[test]
    fn validate_long_name_and_debug_warn() {
        let cfg = QueueConfig {
            name: "a-very-long-queue-name".to_string(),
            debug: true,
            ..QueueConfig::default()
        };
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Warning));
        assert!(warnings.iter().any(|w| w.message.contains("15 bytes")));
    }
}
