use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;

use crate::store::{MemoryStore, PgStore, RemoteStore, StudentStore};
use crate::wire::RequestFields;

pub const DEFAULT_DATA_FILE: &str = "students.json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Where the student collection lives. Flags win over environment variables.
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    /// Base URL of the student API, e.g. http://localhost:8000/api
    #[arg(long, env = "STUDENT_API_URL", global = true)]
    pub api_url: Option<String>,
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,
    /// Local JSON snapshot used when no server is configured
    #[arg(long, env = "STUDENT_DATA_FILE", global = true)]
    pub data_file: Option<PathBuf>,
    /// Request timeout for the API and database connections
    #[arg(long, env = "STUDENT_TIMEOUT_SECS", global = true)]
    pub timeout_secs: Option<u64>,
    /// Field naming of the API's request bodies: vi (ma_so_sv, ho, ten) or en (student_code, first_name)
    #[arg(long, env = "STUDENT_API_FIELDS", global = true)]
    pub api_fields: Option<RequestFields>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Remote {
        base_url: String,
        request_fields: RequestFields,
    },
    Postgres { database_url: String },
    Local { data_file: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: BackendConfig,
    pub request_timeout: Duration,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid API URL {url:?}: {reason}")]
    InvalidApiUrl { url: String, reason: String },
    #[error("timeout must be at least one second")]
    ZeroTimeout,
}

impl ConnectionArgs {
    /// API URL first, then database URL, then the local data file.
    pub fn resolve(&self) -> Result<Config, ConfigError> {
        let timeout_secs = self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let api_url = self.api_url.as_deref().map(str::trim).filter(|url| !url.is_empty());
        let database_url = self
            .database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());

        let backend = if let Some(url) = api_url {
            check_api_url(url)?;
            BackendConfig::Remote {
                base_url: url.trim_end_matches('/').to_string(),
                request_fields: self.api_fields.unwrap_or_default(),
            }
        } else if let Some(url) = database_url {
            BackendConfig::Postgres {
                database_url: url.to_string(),
            }
        } else {
            BackendConfig::Local {
                data_file: self
                    .data_file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE)),
            }
        };

        Ok(Config {
            backend,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn check_api_url(url: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidApiUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = reqwest::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}

/// An opened backend. Some commands need the concrete store, not just the trait.
pub enum Backend {
    Remote(Arc<RemoteStore>),
    Postgres(Arc<PgStore>),
    Local(Arc<MemoryStore>),
}

impl Backend {
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let backend = match &config.backend {
            BackendConfig::Remote {
                base_url,
                request_fields,
            } => {
                let store = RemoteStore::new(base_url.as_str(), config.request_timeout)
                    .context("failed to build the API client")?
                    .with_request_fields(*request_fields);
                Backend::Remote(Arc::new(store))
            }
            BackendConfig::Postgres { database_url } => {
                let store = PgStore::connect(database_url, config.request_timeout)
                    .await
                    .context("failed to connect to Postgres")?;
                Backend::Postgres(Arc::new(store))
            }
            BackendConfig::Local { data_file } => {
                let store = MemoryStore::open(data_file.clone())
                    .with_context(|| format!("failed to open {}", data_file.display()))?;
                Backend::Local(Arc::new(store))
            }
        };
        tracing::debug!(backend = backend.name(), "student store ready");
        Ok(backend)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Remote(_) => "api",
            Backend::Postgres(_) => "postgres",
            Backend::Local(_) => "local",
        }
    }

    pub fn store(&self) -> Arc<dyn StudentStore> {
        match self {
            Backend::Remote(store) => store.clone(),
            Backend::Postgres(store) => store.clone(),
            Backend::Local(store) => store.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_snapshot() {
        let config = ConnectionArgs::default().resolve().unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Local {
                data_file: PathBuf::from("students.json")
            }
        );
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn api_url_takes_precedence() {
        let args = ConnectionArgs {
            api_url: Some("http://localhost:8000/api/".to_string()),
            database_url: Some("postgres://localhost/students".to_string()),
            data_file: Some(PathBuf::from("other.json")),
            timeout_secs: Some(3),
            api_fields: Some(RequestFields::English),
        };
        let config = args.resolve().unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Remote {
                base_url: "http://localhost:8000/api".to_string(),
                request_fields: RequestFields::English,
            }
        );
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn request_fields_default_to_vietnamese_names() {
        let args = ConnectionArgs {
            api_url: Some("https://students.example.com/api".to_string()),
            ..ConnectionArgs::default()
        };
        assert!(matches!(
            args.resolve().unwrap().backend,
            BackendConfig::Remote {
                request_fields: RequestFields::Vietnamese,
                ..
            }
        ));
    }

    #[test]
    fn database_url_beats_data_file() {
        let args = ConnectionArgs {
            database_url: Some("postgres://localhost/students".to_string()),
            data_file: Some(PathBuf::from("other.json")),
            ..ConnectionArgs::default()
        };
        assert!(matches!(args.resolve().unwrap().backend, BackendConfig::Postgres { .. }));
    }

    #[test]
    fn blank_api_url_is_ignored() {
        let args = ConnectionArgs {
            api_url: Some("  ".to_string()),
            ..ConnectionArgs::default()
        };
        assert!(matches!(args.resolve().unwrap().backend, BackendConfig::Local { .. }));
    }

    #[test]
    fn rejects_bad_urls_and_zero_timeout() {
        let relative = ConnectionArgs {
            api_url: Some("localhost/api".to_string()),
            ..ConnectionArgs::default()
        };
        assert!(matches!(relative.resolve(), Err(ConfigError::InvalidApiUrl { .. })));

        let ftp = ConnectionArgs {
            api_url: Some("ftp://example.com/api".to_string()),
            ..ConnectionArgs::default()
        };
        assert!(matches!(ftp.resolve(), Err(ConfigError::InvalidApiUrl { .. })));

        let zero = ConnectionArgs {
            timeout_secs: Some(0),
            ..ConnectionArgs::default()
        };
        assert_eq!(zero.resolve(), Err(ConfigError::ZeroTimeout));
    }

    #[tokio::test]
    async fn local_backend_opens_missing_file_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            backend: BackendConfig::Local {
                data_file: dir.path().join("students.json"),
            },
            request_timeout: Duration::from_secs(1),
        };
        let backend = Backend::open(&config).await.unwrap();
        assert_eq!(backend.name(), "local");
        assert!(backend.store().list().await.unwrap().is_empty());
    }
}
