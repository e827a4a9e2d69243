///
/// SQLite C-ABI binding surface.
///
/// One registry behind LazyLock<Mutex<Registry>> maps i64 handles to:
/// - connections: rusqlite::Connection
/// - statements: RawStatement plus the id of the owning connection
///
/// Closing a connection finalizes its statements first.
///
/// Error handling:
/// - On success: return SQLITE_OK / SQLITE_ROW / SQLITE_DONE or a handle
/// - On failure: record the last error, return the SQLite result code
///   (or -1 for handle-returning functions)
///
/// Text and blob binds take the destructor slot exactly as sqlite3_bind_text
/// does: null, a cleanup callback, or the value returned by sqlbind_transient().
/// If a cleanup callback is given for an unknown statement handle it is still
/// invoked once, matching the engine's behaviour for a failed bind.
///
/// Cleanup callbacks run while the registry lock is held and must not call
/// back into the handle functions below.
///

use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_int, c_void};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, ffi};
use sqlbind_core::{BinderConfig, Cleanup, OwnershipDirective, RawDestructor};

use crate::statement::{RawStatement, StepResult};
use crate::{BindError, open_with_config};

struct StmtEntry {
    stmt: RawStatement,
    conn_id: i64,
}

struct Registry {
    connections: HashMap<i64, Connection>,
    statements: HashMap<i64, StmtEntry>,
    next_id: i64,
}

impl Registry {
    fn new() -> Self {
        Self {
            connections: HashMap::new(),
            statements: HashMap::new(),
            next_id: 1,
        }
    }

    fn next(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_connection(&mut self, conn: Connection) -> i64 {
        let id = self.next();
        self.connections.insert(id, conn);
        id
    }

    fn insert_statement(&mut self, entry: StmtEntry) -> i64 {
        let id = self.next();
        self.statements.insert(id, entry);
        id
    }

    fn connection(&self, handle: i64) -> Result<&Connection, BindError> {
        self.connections.get(&handle).ok_or(BindError::InvalidHandle {
            kind: "connection",
            handle,
        })
    }

    fn statement(&mut self, handle: i64) -> Result<&mut RawStatement, BindError> {
        self.statements
            .get_mut(&handle)
            .map(|entry| &mut entry.stmt)
            .ok_or(BindError::InvalidHandle {
                kind: "statement",
                handle,
            })
    }
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| Mutex::new(Registry::new()));

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fail(err: BindError) -> c_int {
    tracing::debug!(error = %err, "sqlbind call failed");
    err.record();
    err.code()
}

fn fail_handle(err: BindError) -> i64 {
    fail(err);
    -1
}

fn status(result: Result<(), BindError>) -> c_int {
    match result {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => fail(e),
    }
}

fn string_from_c(s: *const c_char) -> String {
    if s.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned()
}

/// Resolve a C length: negative means "up to the first nul"
unsafe fn byte_len(data: *const c_char, len: i64) -> usize {
    if let Ok(len) = usize::try_from(len) {
        return len;
    }
    if data.is_null() {
        return 0;
    }
    unsafe { CStr::from_ptr(data) }.to_bytes().len()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_open(path: *const c_char) -> i64 {
    let path_str = string_from_c(path);
    match open_with_config(&path_str, &BinderConfig::default()) {
        Ok(conn) => registry().insert_connection(conn),
        Err(e) => fail_handle(e),
    }
}

/// Open with a TOML binder config (null or empty uses the defaults)
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_open_with_config(
    path: *const c_char,
    config_toml: *const c_char,
) -> i64 {
    let path_str = string_from_c(path);
    let config = match BinderConfig::from_toml_str(&string_from_c(config_toml)) {
        Ok(config) => config,
        Err(e) => return fail_handle(e.into()),
    };
    match open_with_config(&path_str, &config) {
        Ok(conn) => registry().insert_connection(conn),
        Err(e) => fail_handle(e),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_open_memory() -> i64 {
    match open_with_config(":memory:", &BinderConfig::default()) {
        Ok(conn) => registry().insert_connection(conn),
        Err(e) => fail_handle(e),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_close(handle: i64) -> c_int {
    let mut reg = registry();
    let Some(conn) = reg.connections.remove(&handle) else {
        return fail(BindError::InvalidHandle { kind: "connection", handle });
    };
    let owned: Vec<i64> = reg
        .statements
        .iter()
        .filter(|(_, entry)| entry.conn_id == handle)
        .map(|(id, _)| *id)
        .collect();
    for id in owned {
        reg.statements.remove(&id);
    }
    drop(reg);

    match conn.close() {
        Ok(()) => ffi::SQLITE_OK,
        Err((_conn, e)) => {
            tracing::warn!(handle, error = %e, "failed to close connection");
            fail(e.into())
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_exec(handle: i64, sql: *const c_char) -> c_int {
    let sql_str = string_from_c(sql);
    let reg = registry();
    status(
        reg.connection(handle)
            .and_then(|conn| conn.execute_batch(&sql_str).map_err(BindError::from)),
    )
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_prepare(handle: i64, sql: *const c_char) -> i64 {
    let sql_str = string_from_c(sql);
    let mut reg = registry();
    let prepared = reg
        .connection(handle)
        .and_then(|conn| unsafe { RawStatement::prepare(conn.handle(), &sql_str) });
    match prepared {
        Ok(stmt) => reg.insert_statement(StmtEntry { stmt, conn_id: handle }),
        Err(e) => fail_handle(e),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_bind_text(
    stmt_handle: i64,
    index: c_int,
    data: *const c_char,
    len: i64,
    destructor: RawDestructor,
) -> c_int {
    let directive = OwnershipDirective::from_raw(destructor);
    let mut reg = registry();
    let stmt = match reg.statement(stmt_handle) {
        Ok(stmt) => stmt,
        Err(e) => {
            unsafe { directive.release_unbound(data as *mut c_void) };
            return fail(e);
        }
    };
    let len = unsafe { byte_len(data, len) };
    status(unsafe { stmt.bind_text(index, data.cast::<u8>(), len, directive) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_bind_blob(
    stmt_handle: i64,
    index: c_int,
    data: *const c_void,
    len: i64,
    destructor: RawDestructor,
) -> c_int {
    let directive = OwnershipDirective::from_raw(destructor);
    let mut reg = registry();
    let stmt = match reg.statement(stmt_handle) {
        Ok(stmt) => stmt,
        Err(e) => {
            unsafe { directive.release_unbound(data as *mut c_void) };
            return fail(e);
        }
    };
    let Ok(len) = usize::try_from(len) else {
        unsafe { directive.release_unbound(data as *mut c_void) };
        return fail(BindError::NegativeLength { len });
    };
    status(unsafe { stmt.bind_blob(index, data.cast::<u8>(), len, directive) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_bind_int(stmt_handle: i64, index: c_int, val: i64) -> c_int {
    let mut reg = registry();
    status(reg.statement(stmt_handle).and_then(|stmt| stmt.bind_int64(index, val)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_bind_float(stmt_handle: i64, index: c_int, val: f64) -> c_int {
    let mut reg = registry();
    status(reg.statement(stmt_handle).and_then(|stmt| stmt.bind_double(index, val)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_bind_null(stmt_handle: i64, index: c_int) -> c_int {
    let mut reg = registry();
    status(reg.statement(stmt_handle).and_then(|stmt| stmt.bind_null(index)))
}

/// Bind an opaque pointer. The destructor must be null or a real callback;
/// passing sqlbind_transient() returns SQLITE_MISUSE and binds nothing.
/// `type_name` must be a static string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_bind_pointer(
    stmt_handle: i64,
    index: c_int,
    ptr: *mut c_void,
    type_name: *const c_char,
    destructor: RawDestructor,
) -> c_int {
    let cleanup = match destructor.map(Cleanup::from_fn).transpose() {
        Ok(cleanup) => cleanup,
        Err(e) => return fail(e.into()),
    };
    let release = |err: BindError| {
        if let Some(cleanup) = cleanup {
            unsafe { (cleanup.as_fn())(ptr) };
        }
        fail(err)
    };
    if type_name.is_null() {
        return release(BindError::MissingPointerType);
    }
    let mut reg = registry();
    match reg.statement(stmt_handle) {
        Ok(stmt) => status(unsafe { stmt.bind_pointer(index, ptr, type_name, cleanup) }),
        Err(e) => release(e),
    }
}

/// Returns SQLITE_ROW, SQLITE_DONE or an error code
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_step(stmt_handle: i64) -> c_int {
    let mut reg = registry();
    match reg.statement(stmt_handle).and_then(|stmt| stmt.step()) {
        Ok(StepResult::Row) => ffi::SQLITE_ROW,
        Ok(StepResult::Done) => ffi::SQLITE_DONE,
        Err(e) => fail(e),
    }
}

/// Nul-terminated text of a result column, valid until the next step, reset
/// or finalize of this statement. Null for SQL NULL or an invalid handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_column_text(stmt_handle: i64, col: c_int) -> *const c_char {
    let mut reg = registry();
    match reg.statement(stmt_handle) {
        Ok(stmt) => stmt.column_text_ptr(col).0.cast::<c_char>(),
        Err(e) => {
            fail(e);
            std::ptr::null()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_column_bytes(stmt_handle: i64, col: c_int) -> i64 {
    let mut reg = registry();
    match reg.statement(stmt_handle) {
        Ok(stmt) => i64::try_from(stmt.column_bytes(col)).unwrap_or(i64::MAX),
        Err(e) => fail_handle(e),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_column_int(stmt_handle: i64, col: c_int) -> i64 {
    let mut reg = registry();
    match reg.statement(stmt_handle) {
        Ok(stmt) => stmt.column_int64(col),
        Err(e) => {
            fail(e);
            0
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_reset(stmt_handle: i64) -> c_int {
    let mut reg = registry();
    status(reg.statement(stmt_handle).and_then(|stmt| stmt.reset()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_clear_bindings(stmt_handle: i64) -> c_int {
    let mut reg = registry();
    status(reg.statement(stmt_handle).map(|stmt| stmt.clear_bindings()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_finalize(stmt_handle: i64) -> c_int {
    let mut reg = registry();
    match reg.statements.remove(&stmt_handle) {
        Some(entry) => {
            drop(entry);
            ffi::SQLITE_OK
        }
        None => fail(BindError::InvalidHandle { kind: "statement", handle: stmt_handle }),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_changes(handle: i64) -> i64 {
    let reg = registry();
    match reg.connection(handle) {
        Ok(conn) => i64::try_from(conn.changes()).unwrap_or(i64::MAX),
        Err(e) => {
            fail(e);
            0
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_last_insert_id(handle: i64) -> i64 {
    let reg = registry();
    match reg.connection(handle) {
        Ok(conn) => conn.last_insert_rowid(),
        Err(e) => {
            fail(e);
            0
        }
    }
}

/// Allocate from the engine allocator; pair with sqlbind_sqlite_free as the
/// cleanup callback of a text or blob bind
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_malloc(len: u64) -> *mut c_void {
    unsafe { ffi::sqlite3_malloc64(len) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlbind_sqlite_free(ptr: *mut c_void) {
    unsafe { ffi::sqlite3_free(ptr) };
}
