//! Local filesystem object backend
//!
//! Buckets are directories under a root path and keys are relative file
//! paths inside them. Uploads go to a temporary sibling file which is renamed
//! over the target once complete, so readers never observe a partial archive.

use crate::backend::{file_stream, ByteStream, ObjectBackend};
use crate::error::BackendError;
use crate::key::RemoteKey;
use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Suffix of the sidecar file holding an object's content type
const CONTENT_TYPE_SUFFIX: &str = ".content-type";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local directory object backend
#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!("Using local object directory: {}", root.display());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `bucket`/`key` to a file path inside the root.
    ///
    /// Keys may not climb out of their bucket directory.
    fn object_path(&self, bucket: &str, key: &RemoteKey) -> Result<PathBuf, BackendError> {
        let relative = Path::new(key.as_str().trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') || escapes {
            return Err(BackendError::Other(format!(
                "invalid object location {}/{}",
                bucket, key
            )));
        }
        Ok(self.root.join(bucket).join(relative))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(CONTENT_TYPE_SUFFIX);
        PathBuf::from(name)
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(
            ".tmp-{}-{}",
            process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        PathBuf::from(name)
    }

    async fn write_temp(temp: &Path, mut body: ByteStream) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(temp)
            .await?;
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Read the content type recorded for an object, if any
    pub async fn content_type(&self, bucket: &str, key: &RemoteKey) -> Option<String> {
        let path = self.object_path(bucket, key).ok()?;
        fs::read_to_string(Self::sidecar_path(&path)).await.ok()
    }
}

fn map_not_found(err: io::Error, key: &RemoteKey) -> BackendError {
    if err.kind() == io::ErrorKind::NotFound {
        BackendError::NotFound(key.to_string())
    } else {
        BackendError::Io(err)
    }
}

#[async_trait]
impl ObjectBackend for LocalFsBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn probe_exists(&self, bucket: &str, key: &RemoteKey) -> Result<bool, BackendError> {
        let path = self.object_path(bucket, key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(BackendError::Io(err)),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &RemoteKey,
        body: ByteStream,
        content_type: &str,
    ) -> Result<(), BackendError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = Self::temp_path(&path);
        if let Err(err) = Self::write_temp(&temp, body).await {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                warn!("Failed to remove temp file {}: {}", temp.display(), cleanup);
            }
            return Err(BackendError::Io(err));
        }

        // rename replaces any existing object in one step
        fs::rename(&temp, &path).await?;
        fs::write(Self::sidecar_path(&path), content_type).await?;

        info!("Stored object {}/{} at {}", bucket, key, path.display());
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &RemoteKey) -> Result<ByteStream, BackendError> {
        let path = self.object_path(bucket, key)?;
        let file = File::open(&path).await.map_err(|err| map_not_found(err, key))?;
        Ok(file_stream(file))
    }

    async fn delete_object(&self, bucket: &str, key: &RemoteKey) -> Result<(), BackendError> {
        let path = self.object_path(bucket, key)?;
        fs::remove_file(&path).await.map_err(|err| map_not_found(err, key))?;

        match fs::remove_file(Self::sidecar_path(&path)).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove content type for {}/{}: {}", bucket, key, err),
        }

        info!("Deleted object {}/{}", bucket, key);
        Ok(())
    }
}
