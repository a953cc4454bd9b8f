//! Logger initialisation
//!
//! A log4rs YAML file is used when one is present; otherwise `env_logger`
//! writes timestamped lines to stderr, honouring `RUST_LOG`.

use std::path::Path;

use env_logger::Env;
use log::{debug, info};

use crate::config::LoggingConfig;

/// Which logger ended up installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    Log4rs,
    EnvLogger,
    /// Another logger was already installed for this process
    AlreadyInitialized,
}

/// Install the process logger. Safe to call more than once.
pub fn init(config: &LoggingConfig, debug_enabled: bool) -> LogSink {
    let config_file = Path::new(&config.config_file);
    if config_file.exists() {
        match log4rs::init_file(config_file, Default::default()) {
            Ok(()) => {
                info!("Logging configured from {}", config_file.display());
                return LogSink::Log4rs;
            }
            Err(e) => {
                eprintln!("Failed to load log config {}: {}", config_file.display(), e);
            }
        }
    }

    let filter = if debug_enabled {
        "info,remote_session_store=debug"
    } else {
        "info"
    };

    match env_logger::Builder::from_env(Env::default().default_filter_or(filter)).try_init() {
        Ok(()) => {
            debug!("Logging to stderr with filter '{}'", filter);
            LogSink::EnvLogger
        }
        Err(_) => LogSink::AlreadyInitialized,
    }
}
