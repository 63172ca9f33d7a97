//! Mount configuration
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```toml
//! topic_prefix = "fs"
//! attr_ttl_secs = 1
//!
//! [broker]
//! host = "mqtt.flespi.io"
//! port = 1883
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::sync::{BrokerConfig, TopicMapper, DEFAULT_TOPIC_PREFIX};

/// Config file name inside the per-user config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR_NAME: &str = "mqttfs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Broker connection settings
    pub broker: BrokerConfig,
    /// Topic namespace the filesystem lives under
    pub topic_prefix: String,
    /// Filesystem name shown by `mount`
    pub fs_name: String,
    /// How long the kernel may cache attributes and entries
    pub attr_ttl_secs: u64,
    /// Let users other than the mounting one access the mount
    pub allow_other: bool,
    /// Also write logs to daily rolling files in this directory
    pub log_dir: Option<PathBuf>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            fs_name: "mqttfs".to_string(),
            attr_ttl_secs: 1,
            allow_other: false,
            log_dir: None,
        }
    }
}

impl MountConfig {
    /// `<config dir>/mqttfs/config.toml`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load an explicit config file, else the default one if it exists,
    /// else the built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.broker.client_id_prefix = config.broker.client_id_prefix.trim().to_string();

        tracing::debug!(path = %path.display(), "loaded mount config");
        Ok(config)
    }

    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.attr_ttl_secs)
    }

    pub fn topics(&self) -> TopicMapper {
        TopicMapper::new(&self.topic_prefix)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MountConfig::default();
        assert_eq!(config.broker.host, "mqtt.flespi.io");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.topics().subscription(), "fs/#");
        assert_eq!(config.attr_ttl(), Duration::from_secs(1));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "topic_prefix = \"team/fs\"\nallow_other = true\n\n[broker]\nhost = \"localhost\""
        )
        .unwrap();

        let config = MountConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.topic_prefix, "team/fs");
        assert!(config.allow_other);
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.fs_name, "mqttfs");
    }

    #[test]
    fn test_client_id_prefix_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[broker]\nclient_id_prefix = \" laptop \"").unwrap();

        let config = MountConfig::from_file(file.path()).unwrap();
        assert_eq!(config.broker.client_id_prefix, "laptop");
        assert!(config
            .broker
            .mqtt_options("t")
            .client_id()
            .starts_with("laptop-"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = MountConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "attr_ttl_secs = \"soon\"").unwrap();

        let result = MountConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = MountConfig {
            log_dir: Some(PathBuf::from("/var/log/mqttfs")),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(toml::from_str::<MountConfig>(&text).unwrap(), config);
    }
}
