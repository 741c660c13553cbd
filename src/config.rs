use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::replicate::{ILLUSION_VERSION, REPLICATE_API_ROOT};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1_000;
const APP_DIR: &str = "illusion-relay";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required but not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_token: String,
    pub base_url: String,
    pub version: String,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordBackend {
    Redis { url: String },
    File { dir: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    /// Absolute origin used for share links and blob URLs, without trailing slash.
    pub public_base_url: String,
    pub replicate: ReplicateConfig,
    pub blob_dir: PathBuf,
    pub records: RecordBackend,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => parse(&raw, "PORT")?,
            None => DEFAULT_PORT,
        };
        let host = get("BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let bind_address = format!("{host}:{port}");

        let public_base_url = normalize_base_url(
            &get("PUBLIC_BASE_URL").unwrap_or_else(|| bind_address.clone()),
        );

        let api_token = get("REPLICATE_API_TOKEN")
            .or_else(|| get("REPLICATE_API_KEY"))
            .ok_or(ConfigError::Missing("REPLICATE_API_TOKEN"))?;
        let replicate = ReplicateConfig {
            api_token,
            base_url: get("REPLICATE_BASE_URL").unwrap_or_else(|| REPLICATE_API_ROOT.to_string()),
            version: get("REPLICATE_MODEL_VERSION").unwrap_or_else(|| ILLUSION_VERSION.to_string()),
            poll_interval: Duration::from_millis(match get("REPLICATE_POLL_INTERVAL_MS") {
                Some(raw) => parse_positive(&raw, "REPLICATE_POLL_INTERVAL_MS")?,
                None => DEFAULT_POLL_INTERVAL_MS,
            }),
            timeout: Duration::from_millis(match get("REPLICATE_TIMEOUT_MS") {
                Some(raw) => parse(&raw, "REPLICATE_TIMEOUT_MS")?,
                None => DEFAULT_TIMEOUT_MS,
            }),
        };

        let data_dir = default_data_dir();
        let blob_dir = get("BLOB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("blobs"));

        let records = match get("RECORD_STORE").as_deref().map(str::to_ascii_lowercase) {
            None => RecordBackend::File {
                dir: record_dir(&get, &data_dir),
            },
            Some(backend) => match backend.as_str() {
                "file" => RecordBackend::File {
                    dir: record_dir(&get, &data_dir),
                },
                "redis" => RecordBackend::Redis {
                    url: get("REDIS_URL").ok_or(ConfigError::Missing("REDIS_URL"))?,
                },
                "memory" => RecordBackend::Memory,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "RECORD_STORE",
                        value: backend,
                    });
                }
            },
        };

        let max_upload_bytes = match get("MAX_UPLOAD_BYTES") {
            Some(raw) => parse(&raw, "MAX_UPLOAD_BYTES")?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            bind_address,
            public_base_url,
            replicate,
            blob_dir,
            records,
            max_upload_bytes,
        })
    }

    pub fn blob_base_url(&self) -> String {
        format!("{}/blobs", self.public_base_url)
    }
}

fn parse<T: std::str::FromStr>(raw: &str, key: &'static str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn parse_positive(raw: &str, key: &'static str) -> Result<u64, ConfigError> {
    match parse(raw, key)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
        value => Ok(value),
    }
}

fn record_dir(get: &impl Fn(&str) -> Option<String>, data_dir: &std::path::Path) -> PathBuf {
    get("RECORD_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join("records"))
}

fn default_data_dir() -> PathBuf {
    let mut base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(APP_DIR);
    base
}

/// Adds a scheme when missing and collapses doubled ones such as `http://https://`.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut base = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", trimmed.trim_end_matches('/'))
    };
    while base.starts_with("http://http://") {
        base = base.replacen("http://http://", "http://", 1);
    }
    while base.starts_with("https://https://") {
        base = base.replacen("https://https://", "https://", 1);
    }
    while base.starts_with("http://https://") {
        base = base.replacen("http://https://", "https://", 1);
    }
    while base.starts_with("https://http://") {
        base = base.replacen("https://http://", "http://", 1);
    }
    base
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("REPLICATE_API_TOKEN", "r8_abc")]).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.public_base_url, "http://0.0.0.0:3000");
        assert_eq!(config.blob_base_url(), "http://0.0.0.0:3000/blobs");
        assert_eq!(config.replicate.base_url, REPLICATE_API_ROOT);
        assert_eq!(config.replicate.version, ILLUSION_VERSION);
        assert_eq!(config.replicate.timeout, Duration::from_secs(300));
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(matches!(config.records, RecordBackend::File { .. }));
    }

    #[test]
    fn token_is_required_and_key_is_accepted() {
        assert!(matches!(
            config(&[]),
            Err(ConfigError::Missing("REPLICATE_API_TOKEN"))
        ));
        assert!(matches!(
            config(&[("REPLICATE_API_TOKEN", "  ")]),
            Err(ConfigError::Missing(_))
        ));
        let config = config(&[("REPLICATE_API_KEY", "r8_legacy")]).unwrap();
        assert_eq!(config.replicate.api_token, "r8_legacy");
    }

    #[test]
    fn redis_backend_needs_url() {
        assert!(matches!(
            config(&[("REPLICATE_API_TOKEN", "t"), ("RECORD_STORE", "redis")]),
            Err(ConfigError::Missing("REDIS_URL"))
        ));
        let config = config(&[
            ("REPLICATE_API_TOKEN", "t"),
            ("RECORD_STORE", "Redis"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
        ])
        .unwrap();
        assert_eq!(
            config.records,
            RecordBackend::Redis {
                url: "redis://127.0.0.1:6379".into()
            }
        );
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            config(&[("REPLICATE_API_TOKEN", "t"), ("PORT", "eighty")]),
            Err(ConfigError::Invalid { key: "PORT", .. })
        ));
        assert!(matches!(
            config(&[("REPLICATE_API_TOKEN", "t"), ("RECORD_STORE", "sqlite")]),
            Err(ConfigError::Invalid { key: "RECORD_STORE", .. })
        ));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        assert!(matches!(
            config(&[("REPLICATE_API_TOKEN", "t"), ("REPLICATE_POLL_INTERVAL_MS", "0")]),
            Err(ConfigError::Invalid {
                key: "REPLICATE_POLL_INTERVAL_MS",
                ..
            })
        ));
        let config = config(&[
            ("REPLICATE_API_TOKEN", "t"),
            ("REPLICATE_POLL_INTERVAL_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.replicate.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn explicit_paths_and_public_url() {
        let config = config(&[
            ("REPLICATE_API_TOKEN", "t"),
            ("PUBLIC_BASE_URL", "https://lavand.example.com/"),
            ("BLOB_DIR", "/tmp/blobs"),
            ("RECORD_STORE", "file"),
            ("RECORD_DIR", "/tmp/records"),
            ("PORT", "8080"),
        ])
        .unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.public_base_url, "https://lavand.example.com");
        assert_eq!(config.blob_dir, PathBuf::from("/tmp/blobs"));
        assert_eq!(
            config.records,
            RecordBackend::File {
                dir: PathBuf::from("/tmp/records")
            }
        );
    }

    #[test]
    fn normalizes_schemes() {
        assert_eq!(normalize_base_url("example.com/"), "http://example.com");
        assert_eq!(normalize_base_url("http://https://example.com"), "https://example.com");
        assert_eq!(normalize_base_url("http://http://example.com"), "http://example.com");
        assert_eq!(normalize_base_url("https://example.com"), "https://example.com");
    }
}
