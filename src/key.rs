//! Remote key derivation
//!
//! A session archive lives at `<remote_data_path>/<session>.zip`. The key is
//! always `/`-separated so that archives written from any platform stay
//! readable from any other.

use std::fmt;

/// Extension appended to every session identifier
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Normalized object key under which a session archive is stored
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteKey(String);

impl RemoteKey {
    /// Derive the key for `session` under `prefix`.
    ///
    /// Backslashes become forward slashes, empty and `.` segments are dropped,
    /// `..` is kept as-is. A leading `/` on the prefix is preserved.
    pub fn derive(prefix: &str, session: &str) -> Self {
        let prefix = prefix.replace('\\', "/");
        let file_name = format!("{}.{}", session, ARCHIVE_EXTENSION).replace('\\', "/");

        let segments: Vec<&str> = prefix
            .split('/')
            .chain(file_name.split('/'))
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();

        let mut key = String::new();
        if prefix.starts_with('/') {
            key.push('/');
        }
        key.push_str(&segments.join("/"));
        RemoteKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemoteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
