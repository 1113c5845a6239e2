//! Configuration types shared across crates.

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment variables that override configuration values.
pub const ENV_PREFIX: &str = "FOLIO_";

/// Blob storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Local {
        /// Root directory for blobs and staging files.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            path: PathBuf::from("./data"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Local { path } if path.as_os_str().is_empty() => {
                Err("local storage requires a non-empty path".to_string())
            }
            StorageConfig::Local { .. } => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Connection pool size. Streaming scans hold a connection for their
        /// whole lifetime, so keep this above 1 when scans and point lookups
        /// are interleaved.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Seconds to wait on a locked database before failing.
        #[serde(default = "default_busy_timeout_secs")]
        busy_timeout_secs: u64,
    },
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout_secs() -> u64 {
    5
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/folio.db"),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite {
                path,
                max_connections,
                ..
            } => {
                if path.as_os_str().is_empty() {
                    return Err("sqlite metadata requires a non-empty path".to_string());
                }
                if *max_connections == 0 {
                    return Err("sqlite max_connections must be at least 1".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Complete archive configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Configuration that keeps blobs and the database under one root directory.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            storage: StorageConfig::Local {
                path: root.to_path_buf(),
            },
            metadata: MetadataConfig::Sqlite {
                path: root.join("folio.db"),
                max_connections: default_max_connections(),
                busy_timeout_secs: default_busy_timeout_secs(),
            },
        }
    }

    /// Load configuration from an optional TOML file, overridden by
    /// `FOLIO_`-prefixed environment variables (`__` separates nested keys,
    /// e.g. `FOLIO_STORAGE__PATH`).
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.exists() {
                return Err(crate::Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate().map_err(crate::Error::Config)?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.metadata.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_config_defaults_when_fields_missing() {
        let json = r#"{"type":"sqlite","path":"/tmp/folio.db"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        match config {
            MetadataConfig::Sqlite {
                max_connections,
                busy_timeout_secs,
                ..
            } => {
                assert_eq!(max_connections, 4);
                assert_eq!(busy_timeout_secs, 5);
            }
        }
    }

    #[test]
    fn test_metadata_config_rejects_zero_connections() {
        let config = MetadataConfig::Sqlite {
            path: PathBuf::from("folio.db"),
            max_connections: 0,
            busy_timeout_secs: 5,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_config_rejects_empty_path() {
        let config = StorageConfig::Local {
            path: PathBuf::new(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_root_places_database_under_root() {
        let config = AppConfig::with_root("/srv/archive");
        match config.metadata.clone() {
            MetadataConfig::Sqlite { path, .. } => {
                assert_eq!(path, PathBuf::from("/srv/archive/folio.db"));
            }
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(
            &path,
            r#"
[storage]
type = "local"
path = "/var/lib/folio"

[metadata]
type = "sqlite"
path = "/var/lib/folio/meta.db"
max_connections = 8
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        match config.storage {
            StorageConfig::Local { path } => assert_eq!(path, PathBuf::from("/var/lib/folio")),
        }
        match config.metadata {
            MetadataConfig::Sqlite {
                max_connections, ..
            } => assert_eq!(max_connections, 8),
        }
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
