//! Application Configuration
//!
//! This module provides configuration management for the session store,
//! supporting YAML configuration files with sensible defaults and
//! environment variable overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{info, warn};

use crate::backend::config::{create_backend, BackendKind};
use crate::error::StoreError;
use crate::store::{RemoteSessionStore, StoreOptions};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "store.yaml";

/// Environment flag enabling per-operation debug tracing
pub const DEBUG_ENV: &str = "STORE_DEBUG";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Session store identity
    pub store: StoreSection,
    /// Object backend configuration
    pub backend: BackendConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Session store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Bucket or container holding the archives
    pub bucket_name: String,
    /// Remote directory prefix for archive keys
    pub remote_data_path: String,
    /// Directory where `<session>.zip` archives are read from on save
    pub archive_dir: Option<PathBuf>,
    /// Emit per-operation trace lines
    pub debug: bool,
}

/// Object backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend type
    pub kind: BackendKind,
    /// Root directory for the local backend
    pub local_root: PathBuf,
    /// Settings for S3-compatible services
    pub s3: S3Settings,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            local_root: PathBuf::from("./data/objects"),
            s3: S3Settings::default(),
        }
    }
}

/// S3 client settings. Unset values fall back to the standard `AWS_*`
/// environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Allow plain HTTP endpoints
    pub allow_http: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "store_log.yaml".to_string(),
        }
    }
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// The file was missing
    Defaults(PathBuf),
}

impl ConfigSource {
    /// Report the source; call once logging is initialized
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded configuration from {}", path.display()),
            ConfigSource::Defaults(path) => {
                warn!("Config file {} not found, using defaults", path.display())
            }
        }
    }
}

/// Read the debug flag the same way for config and direct construction
pub fn debug_from_env() -> bool {
    env::var(DEBUG_ENV).map(|v| v == "true").unwrap_or(false)
}

impl AppConfig {
    /// Load configuration from `path`, use defaults if not found.
    /// Environment overrides are applied on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let (config, source) = Self::read(path)?;
        source.log();
        Ok(config)
    }

    /// Like [`load`](Self::load) but logs nothing, so it can run before
    /// the logger is set up. The caller logs the returned source.
    pub fn read(path: impl AsRef<Path>) -> Result<(Self, ConfigSource), StoreError> {
        let path = path.as_ref();
        let (mut config, source) = if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
            let config: AppConfig = serde_yaml::from_str(&content)
                .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
            (config, ConfigSource::File(path.to_path_buf()))
        } else {
            (Self::default(), ConfigSource::Defaults(path.to_path_buf()))
        };
        config.apply_env_overrides();
        Ok((config, source))
    }

    /// Override configured values with `STORE_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bucket) = env::var("STORE_BUCKET") {
            self.store.bucket_name = bucket;
        }
        if let Ok(prefix) = env::var("STORE_REMOTE_PATH") {
            self.store.remote_data_path = prefix;
        }
        if let Ok(dir) = env::var("STORE_ARCHIVE_DIR") {
            self.store.archive_dir = Some(PathBuf::from(dir));
        }
        if let Ok(flag) = env::var(DEBUG_ENV) {
            self.store.debug = flag == "true";
        }
        if let Ok(backend_str) = env::var("STORE_BACKEND") {
            match backend_str.parse::<BackendKind>() {
                Ok(kind) => {
                    info!("Using object backend from environment: {:?}", kind);
                    self.backend.kind = kind;
                }
                Err(e) => {
                    warn!("Invalid object backend in environment: {}. Keeping {:?}.", e, self.backend.kind);
                }
            }
        }
        if let Ok(root) = env::var("STORE_LOCAL_ROOT") {
            self.backend.local_root = PathBuf::from(root);
        }
        if let Ok(region) = env::var("STORE_S3_REGION") {
            self.backend.s3.region = Some(region);
        }
        if let Ok(endpoint) = env::var("STORE_S3_ENDPOINT") {
            self.backend.s3.endpoint = Some(endpoint);
        }
        if let Ok(key) = env::var("STORE_S3_ACCESS_KEY") {
            self.backend.s3.access_key_id = Some(key);
        }
        if let Ok(secret) = env::var("STORE_S3_SECRET_KEY") {
            self.backend.s3.secret_access_key = Some(secret);
        }
        if let Ok(flag) = env::var("STORE_S3_ALLOW_HTTP") {
            self.backend.s3.allow_http = flag == "true";
        }
    }

    /// Create the configured backend and a store on top of it
    pub fn build_store(&self) -> Result<RemoteSessionStore, StoreError> {
        let backend = create_backend(&self.backend, &self.store.bucket_name)?;
        self.build_store_with(backend)
    }

    /// Create a store on top of an existing backend handle
    pub fn build_store_with(
        &self,
        backend: Arc<dyn crate::backend::ObjectBackend>,
    ) -> Result<RemoteSessionStore, StoreError> {
        RemoteSessionStore::new(StoreOptions {
            bucket_name: self.store.bucket_name.clone(),
            remote_data_path: self.store.remote_data_path.clone(),
            backend: Some(backend),
            archive_dir: self.store.archive_dir.clone(),
            debug: Some(self.store.debug),
        })
    }
}
