//! Remote session store
//!
//! Backs up and restores one zip archive per session to an object backend.
//! Saves and extracts report failures to the caller. Existence checks and
//! deletes never fail: errors there are logged and the call degrades to
//! "absent" or a no-op.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::poll_fn;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::backend::{file_stream, ObjectBackend, ARCHIVE_CONTENT_TYPE};
use crate::config::debug_from_env;
use crate::error::{BackendError, StoreError};
use crate::key::{RemoteKey, ARCHIVE_EXTENSION};

/// MDC key carrying the session id, read by the `{X(session)}` log pattern
pub const SESSION_MDC_KEY: &str = "session";

/// Run `operation` with the session id in the logging MDC.
///
/// The MDC is thread-local, so it is entered around every poll and the
/// previous value is restored afterwards.
async fn in_session<F: Future>(session: &str, operation: F) -> F::Output {
    let mut operation = pin!(operation);
    poll_fn(|cx| {
        let _mdc = log_mdc::insert_scoped(SESSION_MDC_KEY, session);
        operation.as_mut().poll(cx)
    })
    .await
}

/// The store contract consumed by a session manager
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Whether an archive is stored for `session`
    async fn session_exists(&self, session: &str) -> bool;

    /// Upload `<session>.zip` from the archive directory, replacing any
    /// previous archive
    async fn save(&self, session: &str) -> Result<(), StoreError>;

    /// Download the archive for `session` into `target`
    async fn extract(&self, session: &str, target: &Path) -> Result<(), StoreError>;

    /// Remove the archive for `session` if there is one
    async fn delete(&self, session: &str);
}

/// Options accepted by [`RemoteSessionStore::new`]
#[derive(Clone, Default)]
pub struct StoreOptions {
    pub bucket_name: String,
    pub remote_data_path: String,
    pub backend: Option<Arc<dyn ObjectBackend>>,
    /// Directory holding local archives; the working directory when unset
    pub archive_dir: Option<PathBuf>,
    /// Per-operation tracing; read from `STORE_DEBUG` when unset
    pub debug: Option<bool>,
}

/// Session store over an object backend
#[derive(Clone)]
pub struct RemoteSessionStore {
    bucket_name: String,
    remote_data_path: String,
    backend: Arc<dyn ObjectBackend>,
    archive_dir: Option<PathBuf>,
    debug: bool,
}

impl fmt::Debug for RemoteSessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSessionStore")
            .field("bucket_name", &self.bucket_name)
            .field("remote_data_path", &self.remote_data_path)
            .field("backend", &self.backend.name())
            .field("archive_dir", &self.archive_dir)
            .field("debug", &self.debug)
            .finish()
    }
}

impl RemoteSessionStore {
    /// Validate options and create the store. Performs no I/O.
    pub fn new(options: StoreOptions) -> Result<Self, StoreError> {
        if options.bucket_name.trim().is_empty() {
            return Err(StoreError::Configuration(
                "A valid bucket name is required for the session store".to_string(),
            ));
        }
        if options.remote_data_path.trim().is_empty() {
            return Err(StoreError::Configuration(
                "A valid remote data path is required for the session store".to_string(),
            ));
        }
        let backend = options.backend.ok_or_else(|| {
            StoreError::Configuration("A backend client is required for the session store".to_string())
        })?;

        Ok(Self {
            bucket_name: options.bucket_name,
            remote_data_path: options.remote_data_path,
            backend,
            archive_dir: options.archive_dir,
            debug: options.debug.unwrap_or_else(debug_from_env),
        })
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub fn remote_data_path(&self) -> &str {
        &self.remote_data_path
    }

    pub fn remote_key(&self, session: &str) -> RemoteKey {
        RemoteKey::derive(&self.remote_data_path, session)
    }

    /// Local archive read by [`save`](SessionStore::save)
    pub fn archive_path(&self, session: &str) -> PathBuf {
        let file_name = format!("{}.{}", session, ARCHIVE_EXTENSION);
        match &self.archive_dir {
            Some(dir) => dir.join(file_name),
            None => PathBuf::from(file_name),
        }
    }

    fn trace(&self, args: fmt::Arguments<'_>) {
        if self.debug {
            info!("[STORE_DEBUG] {}", args);
        } else {
            debug!("{}", args);
        }
    }

    /// Existence check that reports probe failures instead of hiding them.
    ///
    /// `Ok(false)` means the backend confirmed the archive is absent.
    pub async fn try_session_exists(&self, session: &str) -> Result<bool, BackendError> {
        let key = self.remote_key(session);
        in_session(session, self.check_exists(&key)).await
    }

    async fn check_exists(&self, key: &RemoteKey) -> Result<bool, BackendError> {
        match self.backend.probe_exists(&self.bucket_name, key).await {
            Err(err) if err.is_not_found() => Ok(false),
            other => other,
        }
    }

    /// Upload the archive at `archive` as the backup for `session`
    pub async fn save_from(&self, session: &str, archive: &Path) -> Result<(), StoreError> {
        in_session(session, async {
            self.trace(format_args!("[METHOD: save] Triggered."));
            let key = self.remote_key(session);

            self.delete_previous(&key).await;

            let file = File::open(archive).await.map_err(|err| StoreError::Save {
                key: key.to_string(),
                source: BackendError::Io(err),
            })?;

            self.backend
                .put_object(&self.bucket_name, &key, file_stream(file), ARCHIVE_CONTENT_TYPE)
                .await
                .map_err(|source| {
                    warn!("Upload of {} to {} failed: {}", archive.display(), key, source);
                    StoreError::Save {
                        key: key.to_string(),
                        source,
                    }
                })?;

            self.trace(format_args!("[METHOD: save] File saved. PATH='{}'.", key));
            Ok::<_, StoreError>(())
        })
        .await
    }

    /// Best-effort removal of the archive about to be replaced
    async fn delete_previous(&self, key: &RemoteKey) {
        self.trace(format_args!("[METHOD: delete_previous] Triggered."));
        match self.remove_if_present(key).await {
            Ok(true) => self.trace(format_args!(
                "[METHOD: delete_previous] File deleted. PATH='{}'.",
                key
            )),
            Ok(false) => self.trace(format_args!(
                "[METHOD: delete_previous] File not found. PATH='{}'.",
                key
            )),
            Err(err) => warn!("[METHOD: delete_previous] Error: {}", err),
        }
    }

    /// Probe then delete. `Ok(false)` when there was nothing to remove.
    async fn remove_if_present(&self, key: &RemoteKey) -> Result<bool, BackendError> {
        if !self.backend.probe_exists(&self.bucket_name, key).await? {
            return Ok(false);
        }
        match self.backend.delete_object(&self.bucket_name, key).await {
            Ok(()) => Ok(true),
            // removed by someone else between probe and delete
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn download(&self, key: &RemoteKey, target: &Path) -> Result<(), BackendError> {
        let mut body = self.backend.get_object(&self.bucket_name, key).await?;
        let mut file = File::create(target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        debug!("Wrote {} bytes to {}", written, target.display());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RemoteSessionStore {
    async fn session_exists(&self, session: &str) -> bool {
        in_session(session, async {
            self.trace(format_args!("[METHOD: session_exists] Triggered."));
            let key = self.remote_key(session);

            match self.check_exists(&key).await {
                Ok(true) => {
                    self.trace(format_args!("[METHOD: session_exists] File found. PATH='{}'.", key));
                    true
                }
                Ok(false) => {
                    self.trace(format_args!("[METHOD: session_exists] File not found. PATH='{}'.", key));
                    false
                }
                Err(err) => {
                    warn!("[METHOD: session_exists] Error: {}", err);
                    false
                }
            }
        })
        .await
    }

    async fn save(&self, session: &str) -> Result<(), StoreError> {
        let archive = self.archive_path(session);
        self.save_from(session, &archive).await
    }

    async fn extract(&self, session: &str, target: &Path) -> Result<(), StoreError> {
        in_session(session, async {
            self.trace(format_args!("[METHOD: extract] Triggered."));
            let key = self.remote_key(session);

            self.download(&key, target).await.map_err(|source| {
                warn!("Extract of {} to {} failed: {}", key, target.display(), source);
                StoreError::Extract {
                    key: key.to_string(),
                    path: target.display().to_string(),
                    source,
                }
            })?;

            self.trace(format_args!(
                "[METHOD: extract] File extracted. REMOTE_PATH='{}', LOCAL_PATH='{}'.",
                key,
                target.display()
            ));
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn delete(&self, session: &str) {
        in_session(session, async {
            self.trace(format_args!("[METHOD: delete] Triggered."));
            let key = self.remote_key(session);

            match self.remove_if_present(&key).await {
                Ok(true) => self.trace(format_args!("[METHOD: delete] File deleted. PATH='{}'.", key)),
                Ok(false) => self.trace(format_args!("[METHOD: delete] File not found. PATH='{}'.", key)),
                Err(err) => warn!("[METHOD: delete] Error: {}", err),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_store::MockObjectBackend;
    use crate::backend::ByteStream;
    use serial_test::serial;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    const BUCKET: &str = "example-bucket";

    fn store_with(backend: &MockObjectBackend, dir: &TempDir) -> RemoteSessionStore {
        RemoteSessionStore::new(StoreOptions {
            bucket_name: BUCKET.to_string(),
            remote_data_path: "example/remote/dir".to_string(),
            backend: Some(Arc::new(backend.clone())),
            archive_dir: Some(dir.path().to_path_buf()),
            debug: Some(true),
        })
        .unwrap()
    }

    fn write_archive(dir: &TempDir, session: &str, data: &[u8]) {
        std::fs::write(dir.path().join(format!("{}.zip", session)), data).unwrap();
    }

    #[test]
    fn test_construction_requires_all_options() {
        let backend: Arc<dyn ObjectBackend> = Arc::new(MockObjectBackend::new());
        let valid = StoreOptions {
            bucket_name: BUCKET.to_string(),
            remote_data_path: "dir".to_string(),
            backend: Some(backend),
            ..StoreOptions::default()
        };
        assert!(RemoteSessionStore::new(valid.clone()).is_ok());

        let no_bucket = StoreOptions { bucket_name: String::new(), ..valid.clone() };
        assert!(matches!(RemoteSessionStore::new(no_bucket), Err(StoreError::Configuration(_))));

        let no_prefix = StoreOptions { remote_data_path: " ".to_string(), ..valid.clone() };
        assert!(matches!(RemoteSessionStore::new(no_prefix), Err(StoreError::Configuration(_))));

        let no_backend = StoreOptions { backend: None, ..valid };
        assert!(matches!(RemoteSessionStore::new(no_backend), Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_construction_performs_no_io() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let _store = store_with(&backend, &dir);
        assert_eq!(backend.probe_calls() + backend.put_calls(), 0);
        assert_eq!(backend.get_calls() + backend.delete_calls(), 0);
    }

    #[test]
    fn test_archive_path() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);
        assert_eq!(store.archive_path("alice"), dir.path().join("alice.zip"));

        let cwd_store = RemoteSessionStore::new(StoreOptions {
            bucket_name: BUCKET.to_string(),
            remote_data_path: "dir".to_string(),
            backend: Some(Arc::new(backend)),
            ..StoreOptions::default()
        })
        .unwrap();
        assert_eq!(cwd_store.archive_path("alice"), PathBuf::from("alice.zip"));
    }

    #[tokio::test]
    async fn test_save_uploads_with_archive_content_type() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);
        write_archive(&dir, "alice", b"PK\x03\x04alice");

        store.save("alice").await.unwrap();

        let key = "example/remote/dir/alice.zip";
        assert_eq!(backend.object(BUCKET, key).unwrap(), b"PK\x03\x04alice");
        assert_eq!(backend.content_type(BUCKET, key).as_deref(), Some(ARCHIVE_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_save_replaces_previous_archive() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);

        write_archive(&dir, "bob", b"B1");
        store.save("bob").await.unwrap();
        write_archive(&dir, "bob", b"B2");
        store.save("bob").await.unwrap();

        assert_eq!(backend.list_keys(BUCKET), vec!["example/remote/dir/bob.zip".to_string()]);
        assert_eq!(backend.object(BUCKET, "example/remote/dir/bob.zip").unwrap(), b"B2");
        // second save found and removed the first archive
        assert_eq!(backend.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_save_missing_local_archive_is_save_error() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);

        let err = store.save("nobody").await.unwrap_err();
        assert!(matches!(err, StoreError::Save { source: BackendError::Io(_), .. }));
        assert_eq!(backend.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_save_ignores_pre_clean_failures() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);
        write_archive(&dir, "carol", b"data");

        backend.fail_probe(true);
        store.save("carol").await.unwrap();
        assert_eq!(backend.object(BUCKET, "example/remote/dir/carol.zip").unwrap(), b"data");

        backend.fail_probe(false);
        backend.fail_delete(true);
        write_archive(&dir, "carol", b"newer");
        store.save("carol").await.unwrap();
        assert_eq!(backend.object(BUCKET, "example/remote/dir/carol.zip").unwrap(), b"newer");
    }

    #[tokio::test]
    async fn test_save_from_explicit_path() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);
        let custom = dir.path().join("elsewhere.zip");
        std::fs::write(&custom, b"custom").unwrap();

        store.save_from("dave", &custom).await.unwrap();
        assert_eq!(backend.object(BUCKET, "example/remote/dir/dave.zip").unwrap(), b"custom");
    }

    #[tokio::test]
    async fn test_try_session_exists_reports_outage() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);

        assert!(!store.try_session_exists("alice").await.unwrap());
        backend.fail_probe(true);
        assert!(store.try_session_exists("alice").await.is_err());
        assert!(!store.session_exists("alice").await);
    }

    #[tokio::test]
    async fn test_extract_missing_archive_is_extract_error() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);

        let target = dir.path().join("out.zip");
        let err = store.extract("ghost", &target).await.unwrap_err();
        match err {
            StoreError::Extract { key, source, .. } => {
                assert_eq!(key, "example/remote/dir/ghost.zip");
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_extract_read_error_mid_body_is_extract_error() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);
        write_archive(&dir, "ivan", b"a body long enough to split");
        store.save("ivan").await.unwrap();

        backend.fail_mid_body(true);
        let target = dir.path().join("ivan-out.zip");
        let err = store.extract("ivan", &target).await.unwrap_err();
        match err {
            StoreError::Extract { key, source: BackendError::Io(_), .. } => {
                assert_eq!(key, "example/remote/dir/ivan.zip")
            }
            other => panic!("expected extract io error, got {}", other),
        }
        // the target was opened and holds at most the bytes read before the error
        assert!(std::fs::read(&target).unwrap().len() < b"a body long enough to split".len());
    }

    #[tokio::test]
    async fn test_extract_into_missing_directory_fails() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);
        write_archive(&dir, "erin", b"erin");
        store.save("erin").await.unwrap();

        let target = dir.path().join("no/such/dir/out.zip");
        assert!(matches!(
            store.extract("erin", &target).await,
            Err(StoreError::Extract { .. })
        ));
    }

    #[tokio::test]
    async fn test_extract_truncates_existing_target() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);
        write_archive(&dir, "frank", b"short");
        store.save("frank").await.unwrap();

        let target = dir.path().join("restore.zip");
        std::fs::write(&target, vec![0xFFu8; 4096]).unwrap();
        store.extract("frank", &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_delete_swallows_backend_errors() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let store = store_with(&backend, &dir);
        backend.insert(BUCKET, "example/remote/dir/gina.zip", b"x");

        backend.fail_delete(true);
        store.delete("gina").await;
        assert_eq!(backend.object_count(BUCKET), 1);

        backend.fail_delete(false);
        store.delete("gina").await;
        assert_eq!(backend.object_count(BUCKET), 0);
    }

    #[tokio::test]
    #[serial]
    async fn test_save_defaults_to_working_directory() {
        let backend = MockObjectBackend::new();
        let dir = tempdir().unwrap();
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let store = RemoteSessionStore::new(StoreOptions {
            bucket_name: BUCKET.to_string(),
            remote_data_path: "cwd".to_string(),
            backend: Some(Arc::new(backend.clone())),
            ..StoreOptions::default()
        })
        .unwrap();
        std::fs::write("henry.zip", b"from cwd").unwrap();
        let result = store.save("henry").await;

        std::env::set_current_dir(previous).unwrap();
        result.unwrap();
        assert_eq!(backend.object(BUCKET, "cwd/henry.zip").unwrap(), b"from cwd");
    }

    /// Backend recording the session MDC value seen by each call
    #[derive(Default)]
    struct MdcRecorder {
        inner: MockObjectBackend,
        seen: Mutex<Vec<Option<String>>>,
    }

    impl MdcRecorder {
        fn record(&self) {
            let session = log_mdc::get(SESSION_MDC_KEY, |v| v.map(String::from));
            self.seen.lock().unwrap().push(session);
        }

        fn seen(&self) -> Vec<Option<String>> {
            std::mem::take(&mut *self.seen.lock().unwrap())
        }
    }

    #[async_trait]
    impl ObjectBackend for MdcRecorder {
        fn name(&self) -> &'static str {
            "mdc-recorder"
        }

        async fn probe_exists(&self, bucket: &str, key: &RemoteKey) -> Result<bool, BackendError> {
            tokio::task::yield_now().await;
            self.record();
            self.inner.probe_exists(bucket, key).await
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &RemoteKey,
            body: ByteStream,
            content_type: &str,
        ) -> Result<(), BackendError> {
            self.record();
            self.inner.put_object(bucket, key, body, content_type).await
        }

        async fn get_object(&self, bucket: &str, key: &RemoteKey) -> Result<ByteStream, BackendError> {
            self.record();
            self.inner.get_object(bucket, key).await
        }

        async fn delete_object(&self, bucket: &str, key: &RemoteKey) -> Result<(), BackendError> {
            self.record();
            self.inner.delete_object(bucket, key).await
        }
    }

    #[tokio::test]
    async fn test_operations_tag_logs_with_session() {
        let recorder = Arc::new(MdcRecorder::default());
        let dir = tempdir().unwrap();
        let store = RemoteSessionStore::new(StoreOptions {
            bucket_name: BUCKET.to_string(),
            remote_data_path: "example/remote/dir".to_string(),
            backend: Some(recorder.clone()),
            archive_dir: Some(dir.path().to_path_buf()),
            debug: Some(false),
        })
        .unwrap();
        write_archive(&dir, "jill", b"jill");
        let jill = Some("jill".to_string());

        log_mdc::insert(SESSION_MDC_KEY, "outer");

        assert!(!store.session_exists("jill").await);
        assert_eq!(recorder.seen(), vec![jill.clone()]);

        store.save("jill").await.unwrap();
        assert_eq!(recorder.seen(), vec![jill.clone(), jill.clone()]);

        store.extract("jill", &dir.path().join("jill-out.zip")).await.unwrap();
        assert_eq!(recorder.seen(), vec![jill.clone()]);

        store.delete("jill").await;
        assert_eq!(recorder.seen(), vec![jill.clone(), jill.clone()]);

        assert!(store.try_session_exists("jill").await.is_ok());
        assert_eq!(recorder.seen(), vec![jill]);

        // the caller's value is back once each operation returns
        let after = log_mdc::get(SESSION_MDC_KEY, |v| v.map(String::from));
        assert_eq!(after.as_deref(), Some("outer"));
        log_mdc::remove(SESSION_MDC_KEY);
    }
}
