//! Object Backend Abstraction
//!
//! This module defines the narrow capability interface the session store
//! needs from an object-storage service, allowing S3-compatible services,
//! a local directory or an in-memory map to sit behind the same store.

pub mod config;
pub mod local_store;
pub mod mock_store;
pub mod s3_store;


use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::io;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::BackendError;
use crate::key::RemoteKey;

/// MIME type attached to every uploaded session archive
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Streamed object body
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Read size used when streaming files
const CHUNK_SIZE: usize = 64 * 1024;

/// Trait defining the object backend interface
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Short backend name used in log lines
    fn name(&self) -> &'static str;

    /// Metadata-only existence check. Not-found is `Ok(false)`.
    async fn probe_exists(&self, bucket: &str, key: &RemoteKey) -> Result<bool, BackendError>;

    /// Upload `body` to `key`, replacing any existing object.
    ///
    /// A failed upload must not leave a new partial object at `key`.
    async fn put_object(
        &self,
        bucket: &str,
        key: &RemoteKey,
        body: ByteStream,
        content_type: &str,
    ) -> Result<(), BackendError>;

    /// Download the object at `key`. Missing objects are `BackendError::NotFound`.
    async fn get_object(&self, bucket: &str, key: &RemoteKey) -> Result<ByteStream, BackendError>;

    /// Remove the object at `key`. Missing objects are `BackendError::NotFound`.
    async fn delete_object(&self, bucket: &str, key: &RemoteKey) -> Result<(), BackendError>;
}

/// Wrap an in-memory buffer as a single-chunk stream
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    stream::once(futures::future::ready(Ok(data.into()))).boxed()
}

/// Stream an open file in fixed-size chunks until EOF
pub fn file_stream(file: File) -> ByteStream {
    stream::try_unfold(file, |mut file| async move {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            return Ok::<_, io::Error>(None);
        }
        buffer.truncate(read);
        Ok(Some((Bytes::from(buffer), file)))
    })
    .boxed()
}

/// Drain a stream into one contiguous buffer
pub async fn collect_stream(mut body: ByteStream) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    while let Some(chunk) = body.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer)
}
