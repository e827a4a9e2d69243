///
/// Binding error types.
///
/// Every failure of the binding layer: index checks, engine result codes,
/// handle lookups, directive rejections and configuration. `code()` maps each
/// variant onto a SQLite result code for the C ABI.
///

use rusqlite::ffi;
use sqlbind_core::{ConfigError, DirectiveError, record_error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BindError {
    #[error("Parameter index {index} out of range (statement has {count} parameters)")]
    InvalidIndex { index: i64, count: usize },

    #[error("SQLite error {code}: {message}")]
    Sqlite { code: i32, message: String },

    #[error("Invalid {kind} handle {handle}")]
    InvalidHandle { kind: &'static str, handle: i64 },

    #[error("Value of {len} bytes exceeds the engine limit")]
    TooLarge { len: usize },

    #[error("Blob length {len} is negative")]
    NegativeLength { len: i64 },

    #[error("Pointer binds require a type name")]
    MissingPointerType,

    #[error("Directive error: {0}")]
    Directive(#[from] DirectiveError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] rusqlite::Error),
}

impl BindError {
    /// SQLite result code reported through the C ABI
    pub fn code(&self) -> i32 {
        match self {
            BindError::InvalidIndex { .. } => ffi::SQLITE_RANGE,
            BindError::Sqlite { code, .. } => *code,
            BindError::InvalidHandle { .. } => ffi::SQLITE_MISUSE,
            BindError::TooLarge { .. } => ffi::SQLITE_TOOBIG,
            BindError::NegativeLength { .. } => ffi::SQLITE_MISUSE,
            BindError::MissingPointerType => ffi::SQLITE_MISUSE,
            BindError::Directive(_) => ffi::SQLITE_MISUSE,
            BindError::Config(_) => ffi::SQLITE_ERROR,
            BindError::Connection(rusqlite::Error::SqliteFailure(err, _)) => err.extended_code,
            BindError::Connection(_) => ffi::SQLITE_ERROR,
        }
    }

    /// Store this error in the calling thread's last-error slot
    pub fn record(&self) {
        record_error(self.code(), &self.to_string());
    }
}
