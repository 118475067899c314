//! Configuration manager for beria.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_AVATAR_HOST: &str = "www.gravatar.com";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Which user store backs the identity records.
    #[serde(default)]
    pub storage: Storage,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to automatic mail sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Related to avatar URLs.
    #[serde(default)]
    pub avatar: Avatar,
}

/// Fixed set of user stores.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    /// Persist users into PostgreSQL.
    Postgres,
    /// Keep users in process memory.
    #[default]
    Memory,
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Mail queue configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// Hostname:(?port) for RabbitMQ instance.
    pub address: String,
    /// RabbitMQ default vhost.
    pub vhost: Option<String>,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to send mailing events.
    pub queue: String,
    /// Sender used when a message does not name one.
    pub default_from: Option<String>,
}

/// Avatar service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Avatar {
    /// Host serving avatars by email hash.
    pub host: String,
}

impl Default for Avatar {
    fn default() -> Self {
        Self {
            host: DEFAULT_AVATAR_HOST.to_owned(),
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reduce a host entry to its bare host name, accepting values written
    /// with or without a scheme.
    fn normalize_host(&self, host: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if host.starts_with("http://") || host.starts_with("https://") {
                host.to_string()
            } else {
                format!("https://{host}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        parsed_url
            .host_str()
            .map(str::to_owned)
            .ok_or(url::ParseError::EmptyHost)
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();
                config.path = file_path.clone();
                config.avatar.host = self.normalize_host(&config.avatar.host)?;

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Configuration::default()
            .path(PathBuf::from("/nonexistent/beria.yaml"))
            .read()
            .unwrap();

        assert_eq!(config.storage, Storage::Memory);
        assert_eq!(config.avatar.host, DEFAULT_AVATAR_HOST);
        assert_eq!(config.version, VERSION);
    }

    #[test]
    fn test_read_yaml() {
        let path = write_config(
            "beria-config-test.yaml",
            r#"
name: beria
storage: postgres
postgres:
  address: localhost:5432
argon2:
  memory_cost: 2048
  iterations: 2
  parallelism: 1
  hash_length: 32
avatar:
  host: https://avatars.example.com/
"#,
        );

        let config = Configuration::default().path(path).read().unwrap();

        assert_eq!(config.name, "beria");
        assert_eq!(config.storage, Storage::Postgres);
        assert_eq!(config.postgres.as_ref().unwrap().address, "localhost:5432");
        assert_eq!(config.argon2.as_ref().unwrap().memory_cost, 2048);
        assert_eq!(config.avatar.host, "avatars.example.com");
        assert!(config.mail.is_none());
    }
}
