//! Backend selection for the session store

use crate::backend::{local_store::LocalFsBackend, mock_store::MockObjectBackend, s3_store::S3ObjectBackend, ObjectBackend};
use crate::config::BackendConfig;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use log::info;

/// Available object backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendKind {
    #[default]
    S3,
    Local,
    Mock,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" | "aws" | "r2" => Ok(BackendKind::S3),
            "local" | "fs" | "filesystem" => Ok(BackendKind::Local),
            "mock" | "memory" => Ok(BackendKind::Mock),
            _ => Err(format!("Unknown object backend: {}", s)),
        }
    }
}

/// Create an object backend based on the configuration
pub fn create_backend(config: &BackendConfig, bucket: &str) -> Result<Arc<dyn ObjectBackend>, StoreError> {
    match config.kind {
        BackendKind::S3 => {
            info!("Creating S3 object backend");
            Ok(Arc::new(S3ObjectBackend::from_settings(bucket, &config.s3)?))
        }
        BackendKind::Local => {
            info!("Creating local object backend at {}", config.local_root.display());
            Ok(Arc::new(LocalFsBackend::new(config.local_root.clone())))
        }
        BackendKind::Mock => {
            info!("Creating mock object backend");
            Ok(Arc::new(MockObjectBackend::new()))
        }
    }
}
