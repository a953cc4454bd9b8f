// src/lib.rs

pub mod backend;
pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod store;

pub use backend::{ObjectBackend, ARCHIVE_CONTENT_TYPE};
pub use config::AppConfig;
pub use error::{BackendError, StoreError};
pub use key::RemoteKey;
pub use store::{RemoteSessionStore, SessionStore, StoreOptions};
