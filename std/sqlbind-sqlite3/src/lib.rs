///
/// sqlbind SQLite3 Binding Support
///
/// Binds text and blob values into SQLite prepared statements with an explicit
/// ownership directive, both from Rust and through a C ABI. Uses rusqlite with
/// bundled SQLite for zero system dependency; statements are driven through
/// rusqlite's raw `ffi` module because rusqlite's own binds always copy.
///
/// Architecture:
/// - `PreparedStatement<'a>` for Rust callers: borrowed binds are tied to the
///   statement lifetime, owned binds move an `EngineBuffer` to the engine.
/// - Connection and statement handles for foreign callers live in a
///   LazyLock<Mutex<Registry>> (same pattern as the other handle registries).
/// - All handles are i64 IDs; failures record the thread's last error.
///
/// Functions:
/// - Connection: open, open_with_config, open_memory, close, exec
/// - Statement: prepare, step, reset, clear_bindings, finalize
/// - Binding: bind_text, bind_blob, bind_int, bind_float, bind_null, bind_pointer
/// - Columns: column_text, column_bytes, column_int
/// - Memory: malloc, free (engine allocator, usable as a cleanup callback)
/// - Utility: changes, last_insert_id
///

mod error;
pub mod sqlite;
pub mod statement;

pub use error::*;
pub use sqlite::*;
pub use statement::{EngineBuffer, PreparedStatement, StepResult, engine_free_directive};

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use sqlbind_core::BinderConfig;

/// Open a connection and apply the binder config
pub fn open_with_config(path: impl AsRef<Path>, config: &BinderConfig) -> Result<Connection, BindError> {
    config.validate()?;
    let path = path.as_ref();
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    tracing::debug!(path = %path.display(), busy_timeout_ms = config.busy_timeout_ms, "opened connection");
    Ok(conn)
}
