///
/// Directive and configuration error types.
///
/// Engine failures live in sqlbind-sqlite3; these cover what can go wrong
/// before a value ever reaches the engine.
///

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("Transient sentinel is not a callable cleanup function")]
    SentinelNotCallable,

    #[error("Cleanup directive requires a callback")]
    MissingCallback,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
