///
/// Directive-aware prepared statements.
///
/// `RawStatement` owns a `sqlite3_stmt` and performs every engine call.
/// `PreparedStatement<'a>` wraps it for Rust callers and ties borrowed binds
/// to the statement lifetime, so a `Borrow` directive is only reachable for
/// memory the borrow checker keeps alive and unchanged.
///
/// Text and blob binds come in four forms:
/// - `*_copied`: `CopyNow`, the engine copies before the call returns
/// - `*_borrowed`: `Borrow`, the engine reads the caller's memory in place
/// - `*_owned`: `OwnedCleanup`, an `EngineBuffer` moves to the engine
/// - `*_raw`: any directive over a raw pointer (unsafe)
///

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use rusqlite::{Connection, ffi};
use sqlbind_core::{BinderConfig, Cleanup, DirectiveKind, OwnershipDirective, RawDestructor};

use crate::BindError;

/// Outcome of one `step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Row,
    Done,
}

/// Directive that hands a buffer from `sqlite3_malloc64` back to `sqlite3_free`
pub fn engine_free_directive() -> OwnershipDirective {
    OwnershipDirective::from_raw(Some(ffi::sqlite3_free))
}

unsafe fn engine_error(db: *mut ffi::sqlite3, code: c_int) -> BindError {
    let msg = unsafe { ffi::sqlite3_errmsg(db) };
    let msg = if msg.is_null() {
        unsafe { ffi::sqlite3_errstr(code) }
    } else {
        msg
    };
    let message = if msg.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    };
    BindError::Sqlite { code, message }
}

pub(crate) struct RawStatement {
    stmt: NonNull<ffi::sqlite3_stmt>,
    db: *mut ffi::sqlite3,
}

// Only touched by one thread at a time: either through `&mut PreparedStatement`
// or while the handle registry lock is held.
unsafe impl Send for RawStatement {}

impl RawStatement {
    /// # Safety
    /// `db` must be an open connection that outlives the returned statement.
    pub(crate) unsafe fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self, BindError> {
        let len = c_int::try_from(sql.len()).map_err(|_| BindError::TooLarge { len: sql.len() })?;
        let mut stmt = std::ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                sql.as_ptr().cast::<c_char>(),
                len,
                &mut stmt,
                std::ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(unsafe { engine_error(db, rc) });
        }
        let stmt = NonNull::new(stmt).ok_or_else(|| BindError::Sqlite {
            code: ffi::SQLITE_MISUSE,
            message: "SQL contains no statement".to_string(),
        })?;
        tracing::debug!(sql, "prepared statement");
        Ok(Self { stmt, db })
    }

    pub(crate) fn parameter_count(&self) -> usize {
        let count = unsafe { ffi::sqlite3_bind_parameter_count(self.stmt.as_ptr()) };
        usize::try_from(count).unwrap_or(0)
    }

    pub(crate) fn parameter_index(&self, name: &str) -> Option<usize> {
        let name = CString::new(name).ok()?;
        let index = unsafe { ffi::sqlite3_bind_parameter_index(self.stmt.as_ptr(), name.as_ptr()) };
        usize::try_from(index).ok().filter(|&i| i > 0)
    }

    fn bind_result(&self, rc: c_int, index: c_int) -> Result<(), BindError> {
        match rc {
            ffi::SQLITE_OK => Ok(()),
            ffi::SQLITE_RANGE => Err(BindError::InvalidIndex {
                index: i64::from(index),
                count: self.parameter_count(),
            }),
            rc => Err(unsafe { engine_error(self.db, rc) }),
        }
    }

    /// # Safety
    /// `data` must point to `len` readable bytes and satisfy `directive`:
    /// stay valid and unchanged for `Borrow`, or be releasable by the
    /// cleanup callback for `OwnedCleanup`. The engine releases an
    /// `OwnedCleanup` value even when the bind fails.
    pub(crate) unsafe fn bind_text(
        &mut self,
        index: c_int,
        data: *const u8,
        len: usize,
        directive: OwnershipDirective,
    ) -> Result<(), BindError> {
        tracing::trace!(
            index,
            len,
            directive = %directive.kind(),
            releases_caller = directive.releases_caller(),
            "bind text"
        );
        let rc = unsafe {
            ffi::sqlite3_bind_text64(
                self.stmt.as_ptr(),
                index,
                data.cast::<c_char>(),
                len as u64,
                directive.into_raw(),
                ffi::SQLITE_UTF8 as u8,
            )
        };
        self.bind_result(rc, index)
    }

    /// # Safety
    /// Same contract as `bind_text`.
    pub(crate) unsafe fn bind_blob(
        &mut self,
        index: c_int,
        data: *const u8,
        len: usize,
        directive: OwnershipDirective,
    ) -> Result<(), BindError> {
        tracing::trace!(
            index,
            len,
            directive = %directive.kind(),
            releases_caller = directive.releases_caller(),
            "bind blob"
        );
        let rc = unsafe {
            ffi::sqlite3_bind_blob64(
                self.stmt.as_ptr(),
                index,
                data.cast::<c_void>(),
                len as u64,
                directive.into_raw(),
            )
        };
        self.bind_result(rc, index)
    }

    pub(crate) fn bind_int64(&mut self, index: c_int, value: i64) -> Result<(), BindError> {
        let rc = unsafe { ffi::sqlite3_bind_int64(self.stmt.as_ptr(), index, value) };
        self.bind_result(rc, index)
    }

    pub(crate) fn bind_double(&mut self, index: c_int, value: f64) -> Result<(), BindError> {
        let rc = unsafe { ffi::sqlite3_bind_double(self.stmt.as_ptr(), index, value) };
        self.bind_result(rc, index)
    }

    pub(crate) fn bind_null(&mut self, index: c_int) -> Result<(), BindError> {
        let rc = unsafe { ffi::sqlite3_bind_null(self.stmt.as_ptr(), index) };
        self.bind_result(rc, index)
    }

    /// # Safety
    /// `type_name` must stay valid for the life of the statement; `ptr` must
    /// be valid for whatever consumes the pointer value and for `cleanup`.
    pub(crate) unsafe fn bind_pointer(
        &mut self,
        index: c_int,
        ptr: *mut c_void,
        type_name: *const c_char,
        cleanup: Option<Cleanup>,
    ) -> Result<(), BindError> {
        tracing::trace!(index, has_cleanup = cleanup.is_some(), "bind pointer");
        let rc = unsafe {
            ffi::sqlite3_bind_pointer(
                self.stmt.as_ptr(),
                index,
                ptr,
                type_name,
                cleanup.map(Cleanup::as_fn),
            )
        };
        self.bind_result(rc, index)
    }

    pub(crate) fn step(&mut self) -> Result<StepResult, BindError> {
        match unsafe { ffi::sqlite3_step(self.stmt.as_ptr()) } {
            ffi::SQLITE_ROW => Ok(StepResult::Row),
            ffi::SQLITE_DONE => Ok(StepResult::Done),
            rc => Err(unsafe { engine_error(self.db, rc) }),
        }
    }

    pub(crate) fn column_count(&self) -> usize {
        let count = unsafe { ffi::sqlite3_column_count(self.stmt.as_ptr()) };
        usize::try_from(count).unwrap_or(0)
    }

    fn column_is_null(&self, col: c_int) -> bool {
        unsafe { ffi::sqlite3_column_type(self.stmt.as_ptr(), col) == ffi::SQLITE_NULL }
    }

    /// Text pointer valid until the next step, reset or finalize
    pub(crate) fn column_text_ptr(&self, col: c_int) -> (*const u8, usize) {
        let ptr = unsafe { ffi::sqlite3_column_text(self.stmt.as_ptr(), col) };
        let len = unsafe { ffi::sqlite3_column_bytes(self.stmt.as_ptr(), col) };
        (ptr, usize::try_from(len).unwrap_or(0))
    }

    pub(crate) fn column_text(&self, col: c_int) -> Option<String> {
        if self.column_is_null(col) {
            return None;
        }
        let (ptr, len) = self.column_text_ptr(col);
        if ptr.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    pub(crate) fn column_blob(&self, col: c_int) -> Option<Vec<u8>> {
        if self.column_is_null(col) {
            return None;
        }
        let ptr = unsafe { ffi::sqlite3_column_blob(self.stmt.as_ptr(), col) };
        let len = unsafe { ffi::sqlite3_column_bytes(self.stmt.as_ptr(), col) };
        let len = usize::try_from(len).unwrap_or(0);
        if ptr.is_null() || len == 0 {
            return Some(Vec::new());
        }
        Some(unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) }.to_vec())
    }

    pub(crate) fn column_bytes(&self, col: c_int) -> usize {
        let len = unsafe { ffi::sqlite3_column_bytes(self.stmt.as_ptr(), col) };
        usize::try_from(len).unwrap_or(0)
    }

    pub(crate) fn column_int64(&self, col: c_int) -> i64 {
        unsafe { ffi::sqlite3_column_int64(self.stmt.as_ptr(), col) }
    }

    pub(crate) fn reset(&mut self) -> Result<(), BindError> {
        match unsafe { ffi::sqlite3_reset(self.stmt.as_ptr()) } {
            ffi::SQLITE_OK => Ok(()),
            rc => Err(unsafe { engine_error(self.db, rc) }),
        }
    }

    /// Release every bound value; cleanup callbacks run here
    pub(crate) fn clear_bindings(&mut self) {
        unsafe { ffi::sqlite3_clear_bindings(self.stmt.as_ptr()) };
    }
}

impl Drop for RawStatement {
    fn drop(&mut self) {
        unsafe { ffi::sqlite3_finalize(self.stmt.as_ptr()) };
        tracing::debug!("finalized statement");
    }
}

/// Buffer allocated by the engine allocator, handed over with `OwnedCleanup`.
///
/// Freed with `sqlite3_free` on drop unless moved into a bind.
pub struct EngineBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// Plain heap memory from the engine allocator, which is thread-safe.
unsafe impl Send for EngineBuffer {}

impl EngineBuffer {
    pub fn zeroed(len: usize) -> Result<Self, BindError> {
        // sqlite3_malloc64(0) returns null, and a null text pointer binds NULL.
        let size = len.max(1);
        let raw = unsafe { ffi::sqlite3_malloc64(size as u64) };
        let ptr = NonNull::new(raw.cast::<u8>()).ok_or_else(|| BindError::Sqlite {
            code: ffi::SQLITE_NOMEM,
            message: format!("failed to allocate {size} bytes"),
        })?;
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, size) };
        Ok(Self { ptr, len })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BindError> {
        let mut buf = Self::zeroed(bytes.len())?;
        buf.as_mut_slice().copy_from_slice(bytes);
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn into_raw(self) -> (*mut u8, usize) {
        let buf = ManuallyDrop::new(self);
        (buf.ptr.as_ptr(), buf.len)
    }
}

impl Drop for EngineBuffer {
    fn drop(&mut self) {
        unsafe { ffi::sqlite3_free(self.ptr.as_ptr().cast::<c_void>()) };
    }
}

fn to_index(index: usize, raw: &RawStatement) -> Result<c_int, BindError> {
    c_int::try_from(index).map_err(|_| BindError::InvalidIndex {
        index: i64::try_from(index).unwrap_or(i64::MAX),
        count: raw.parameter_count(),
    })
}

/// A prepared statement whose text and blob binds carry an ownership directive.
///
/// Indices are 1-based for parameters and 0-based for result columns.
///
/// The connection stays borrowed until the statement is dropped:
///
/// ```compile_fail
/// use rusqlite::Connection;
/// use sqlbind_sqlite3::PreparedStatement;
///
/// let conn = Connection::open_in_memory().unwrap();
/// let mut stmt = PreparedStatement::prepare(&conn, "SELECT 1").unwrap();
/// stmt.step().unwrap();
/// drop(conn);
/// ```
///
/// and so does every borrowed bind:
///
/// ```compile_fail
/// use rusqlite::Connection;
/// use sqlbind_sqlite3::PreparedStatement;
///
/// let conn = Connection::open_in_memory().unwrap();
/// let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?1").unwrap();
/// let value = String::from("borrowed");
/// stmt.bind_text_borrowed(1, &value).unwrap();
/// drop(value);
/// ```
pub struct PreparedStatement<'a> {
    raw: RawStatement,
    text_default: DirectiveKind,
    blob_default: DirectiveKind,
    _marker: PhantomData<&'a Connection>,
}

impl<'a> PreparedStatement<'a> {
    pub fn prepare(conn: &'a Connection, sql: &str) -> Result<Self, BindError> {
        Self::prepare_with_config(conn, sql, &BinderConfig::default())
    }

    pub fn prepare_with_config(
        conn: &'a Connection,
        sql: &str,
        config: &BinderConfig,
    ) -> Result<Self, BindError> {
        config.validate()?;
        let raw = unsafe { RawStatement::prepare(conn.handle(), sql)? };
        Ok(Self {
            raw,
            text_default: config.default_text_directive,
            blob_default: config.default_blob_directive,
            _marker: PhantomData,
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.raw.parameter_count()
    }

    /// Index of a named parameter such as `:name` or `?1`
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.raw.parameter_index(name)
    }

    /// Bind text using the configured default directive
    pub fn bind_text(&mut self, index: usize, value: &'a str) -> Result<(), BindError> {
        match self.text_default {
            DirectiveKind::Borrow => self.bind_text_borrowed(index, value),
            DirectiveKind::Copy | DirectiveKind::Cleanup => self.bind_text_copied(index, value),
        }
    }

    pub fn bind_text_copied(&mut self, index: usize, value: &str) -> Result<(), BindError> {
        unsafe {
            self.bind_text_raw(index, value.as_ptr(), value.len(), OwnershipDirective::CopyNow)
        }
    }

    pub fn bind_text_borrowed(&mut self, index: usize, value: &'a str) -> Result<(), BindError> {
        unsafe { self.bind_text_raw(index, value.as_ptr(), value.len(), OwnershipDirective::Borrow) }
    }

    /// Move `value` to the engine, which frees it when the binding is released
    pub fn bind_text_owned(&mut self, index: usize, value: EngineBuffer) -> Result<(), BindError> {
        let (ptr, len) = value.into_raw();
        unsafe { self.bind_text_raw(index, ptr, len, engine_free_directive()) }
    }

    /// # Safety
    /// `data` must point to `len` bytes of UTF-8 honouring `directive`:
    /// valid and unchanged until the binding is released for `Borrow`, or
    /// releasable by the callback for `OwnedCleanup` (which runs exactly
    /// once, including when this call fails).
    pub unsafe fn bind_text_raw(
        &mut self,
        index: usize,
        data: *const u8,
        len: usize,
        directive: OwnershipDirective,
    ) -> Result<(), BindError> {
        let index = match to_index(index, &self.raw) {
            Ok(index) => index,
            Err(err) => {
                unsafe { directive.release_unbound(data as *mut c_void) };
                return Err(err);
            }
        };
        unsafe { self.raw.bind_text(index, data, len, directive) }
    }

    /// Bind a blob using the configured default directive
    pub fn bind_blob(&mut self, index: usize, value: &'a [u8]) -> Result<(), BindError> {
        match self.blob_default {
            DirectiveKind::Borrow => self.bind_blob_borrowed(index, value),
            DirectiveKind::Copy | DirectiveKind::Cleanup => self.bind_blob_copied(index, value),
        }
    }

    pub fn bind_blob_copied(&mut self, index: usize, value: &[u8]) -> Result<(), BindError> {
        unsafe {
            self.bind_blob_raw(index, value.as_ptr(), value.len(), OwnershipDirective::CopyNow)
        }
    }

    pub fn bind_blob_borrowed(&mut self, index: usize, value: &'a [u8]) -> Result<(), BindError> {
        unsafe { self.bind_blob_raw(index, value.as_ptr(), value.len(), OwnershipDirective::Borrow) }
    }

    pub fn bind_blob_owned(&mut self, index: usize, value: EngineBuffer) -> Result<(), BindError> {
        let (ptr, len) = value.into_raw();
        unsafe { self.bind_blob_raw(index, ptr, len, engine_free_directive()) }
    }

    /// # Safety
    /// Same contract as `bind_text_raw`, without the UTF-8 requirement.
    pub unsafe fn bind_blob_raw(
        &mut self,
        index: usize,
        data: *const u8,
        len: usize,
        directive: OwnershipDirective,
    ) -> Result<(), BindError> {
        let index = match to_index(index, &self.raw) {
            Ok(index) => index,
            Err(err) => {
                unsafe { directive.release_unbound(data as *mut c_void) };
                return Err(err);
            }
        };
        unsafe { self.raw.bind_blob(index, data, len, directive) }
    }

    pub fn bind_int64(&mut self, index: usize, value: i64) -> Result<(), BindError> {
        let index = to_index(index, &self.raw)?;
        self.raw.bind_int64(index, value)
    }

    pub fn bind_double(&mut self, index: usize, value: f64) -> Result<(), BindError> {
        let index = to_index(index, &self.raw)?;
        self.raw.bind_double(index, value)
    }

    pub fn bind_null(&mut self, index: usize) -> Result<(), BindError> {
        let index = to_index(index, &self.raw)?;
        self.raw.bind_null(index)
    }

    /// Bind an opaque pointer value. The destructor slot only accepts null or
    /// a real callback; the transient sentinel is rejected before the engine
    /// sees it.
    ///
    /// # Safety
    /// `ptr` must stay valid until the binding is released and be releasable
    /// by `destructor` when one is given.
    pub unsafe fn bind_pointer(
        &mut self,
        index: usize,
        ptr: *mut c_void,
        type_name: &'static CStr,
        destructor: RawDestructor,
    ) -> Result<(), BindError> {
        let cleanup = destructor.map(Cleanup::from_fn).transpose()?;
        let index = match to_index(index, &self.raw) {
            Ok(index) => index,
            Err(err) => {
                if let Some(cleanup) = cleanup {
                    unsafe { (cleanup.as_fn())(ptr) };
                }
                return Err(err);
            }
        };
        unsafe { self.raw.bind_pointer(index, ptr, type_name.as_ptr(), cleanup) }
    }

    pub fn step(&mut self) -> Result<StepResult, BindError> {
        self.raw.step()
    }

    pub fn column_count(&self) -> usize {
        self.raw.column_count()
    }

    pub fn column_text(&self, col: usize) -> Option<String> {
        c_int::try_from(col).ok().and_then(|col| self.raw.column_text(col))
    }

    pub fn column_blob(&self, col: usize) -> Option<Vec<u8>> {
        c_int::try_from(col).ok().and_then(|col| self.raw.column_blob(col))
    }

    pub fn column_int64(&self, col: usize) -> i64 {
        c_int::try_from(col).map_or(0, |col| self.raw.column_int64(col))
    }

    /// Rewind for another execution; bindings are kept
    pub fn reset(&mut self) -> Result<(), BindError> {
        self.raw.reset()
    }

    pub fn clear_bindings(&mut self) {
        self.raw.clear_bindings();
    }
}

impl Drop for PreparedStatement<'_> {
    // Borrowed binds end here, before the connection can go away.
    fn drop(&mut self) {
        self.raw.clear_bindings();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn select_one_text(stmt: &mut PreparedStatement<'_>) -> Option<String> {
        assert_eq!(stmt.step().unwrap(), StepResult::Row);
        stmt.column_text(0)
    }

    #[test]
    fn test_copy_now_survives_overwrite() {
        let conn = memory();
        let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?1").unwrap();
        let mut buf = b"hello".to_vec();
        unsafe {
            stmt.bind_text_raw(1, buf.as_ptr(), buf.len(), sqlbind_core::copy_now_directive())
                .unwrap();
        }
        buf.copy_from_slice(b"world");
        drop(buf);
        assert_eq!(select_one_text(&mut stmt).as_deref(), Some("hello"));
    }

    #[test]
    fn test_borrow_reads_in_place() {
        let conn = memory();
        let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?1").unwrap();
        let mut buf = b"hello".to_vec();
        unsafe {
            stmt.bind_text_raw(1, buf.as_ptr(), buf.len(), OwnershipDirective::Borrow)
                .unwrap();
            std::ptr::copy_nonoverlapping(b"world".as_ptr(), buf.as_mut_ptr(), 5);
        }
        assert_eq!(select_one_text(&mut stmt).as_deref(), Some("world"));
        drop(stmt);
        drop(buf);
    }

    #[test]
    fn test_safe_forms_round_trip() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE t (name TEXT, data BLOB)").unwrap();

        let name = String::from("borrowed");
        let data = vec![1u8, 2, 3];
        let mut insert = PreparedStatement::prepare(&conn, "INSERT INTO t VALUES (?1, ?2)").unwrap();
        insert.bind_text_borrowed(1, &name).unwrap();
        insert.bind_blob_borrowed(2, &data).unwrap();
        assert_eq!(insert.step().unwrap(), StepResult::Done);

        insert.reset().unwrap();
        insert.bind_text_copied(1, "copied").unwrap();
        insert.bind_blob_copied(2, &[4, 5]).unwrap();
        assert_eq!(insert.step().unwrap(), StepResult::Done);

        insert.reset().unwrap();
        let owned = EngineBuffer::from_bytes(b"owned").unwrap();
        assert_eq!(owned.len(), 5);
        assert_eq!(owned.as_slice(), b"owned");
        insert.bind_text_owned(1, owned).unwrap();
        insert.bind_blob_owned(2, EngineBuffer::from_bytes(&[6]).unwrap()).unwrap();
        assert_eq!(insert.step().unwrap(), StepResult::Done);
        drop(insert);

        let mut select = PreparedStatement::prepare(&conn, "SELECT name, data FROM t ORDER BY rowid").unwrap();
        assert_eq!(select.column_count(), 2);
        let mut rows = Vec::new();
        while select.step().unwrap() == StepResult::Row {
            rows.push((select.column_text(0).unwrap(), select.column_blob(1).unwrap()));
        }
        assert_eq!(
            rows,
            vec![
                ("borrowed".to_string(), vec![1, 2, 3]),
                ("copied".to_string(), vec![4, 5]),
                ("owned".to_string(), vec![6]),
            ]
        );
    }

    #[test]
    fn test_owned_empty_text_is_not_null() {
        let conn = memory();
        let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?1 IS NULL, length(?1)").unwrap();
        stmt.bind_text_owned(1, EngineBuffer::zeroed(0).unwrap()).unwrap();
        assert_eq!(stmt.step().unwrap(), StepResult::Row);
        assert_eq!(stmt.column_int64(0), 0);
        assert_eq!(stmt.column_int64(1), 0);
    }

    static CLEANUPS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn counting_free(data: *mut c_void) {
        CLEANUPS.fetch_add(1, Ordering::SeqCst);
        unsafe { ffi::sqlite3_free(data) };
    }

    fn counting_directive() -> OwnershipDirective {
        OwnershipDirective::OwnedCleanup(Cleanup::from_fn(counting_free).unwrap())
    }

    fn engine_copy(bytes: &[u8]) -> (*const u8, usize) {
        let (ptr, len) = EngineBuffer::from_bytes(bytes).unwrap().into_raw();
        (ptr.cast_const(), len)
    }

    // Cleanup counting shares one static, so every scenario runs in this test.
    #[test]
    fn test_cleanup_runs_exactly_once() {
        let conn = memory();
        let base = CLEANUPS.load(Ordering::SeqCst);

        let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?1").unwrap();
        let (ptr, len) = engine_copy(b"first");
        unsafe { stmt.bind_text_raw(1, ptr, len, counting_directive()).unwrap() };
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), base);
        assert_eq!(select_one_text(&mut stmt).as_deref(), Some("first"));
        stmt.reset().unwrap();
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), base);

        // Rebinding releases the previous value.
        let (ptr, len) = engine_copy(b"second");
        unsafe { stmt.bind_text_raw(1, ptr, len, counting_directive()).unwrap() };
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), base + 1);

        // Finalize releases the current value.
        drop(stmt);
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), base + 2);

        // Engine-rejected index still releases.
        let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?1").unwrap();
        let (ptr, len) = engine_copy(b"third");
        let err = unsafe { stmt.bind_blob_raw(5, ptr, len, counting_directive()) }.unwrap_err();
        assert!(matches!(err, BindError::InvalidIndex { index: 5, count: 1 }));
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), base + 3);

        // Index beyond c_int releases without reaching the engine.
        let (ptr, len) = engine_copy(b"fourth");
        let err = unsafe { stmt.bind_text_raw(usize::MAX, ptr, len, counting_directive()) }
            .unwrap_err();
        assert!(matches!(err, BindError::InvalidIndex { .. }));
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), base + 4);

        // clear_bindings releases.
        let (ptr, len) = engine_copy(b"fifth");
        unsafe { stmt.bind_text_raw(1, ptr, len, counting_directive()).unwrap() };
        stmt.clear_bindings();
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), base + 5);
        assert_eq!(select_one_text(&mut stmt), None);
    }

    #[test]
    fn test_invalid_index() {
        let conn = memory();
        let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?1, ?2").unwrap();
        assert_eq!(stmt.parameter_count(), 2);
        let err = stmt.bind_text_copied(3, "x").unwrap_err();
        assert!(matches!(err, BindError::InvalidIndex { index: 3, count: 2 }));
        assert_eq!(err.code(), ffi::SQLITE_RANGE);
        let err = stmt.bind_int64(0, 1).unwrap_err();
        assert!(matches!(err, BindError::InvalidIndex { index: 0, .. }));
    }

    #[test]
    fn test_named_parameters() {
        let conn = memory();
        let mut stmt = PreparedStatement::prepare(&conn, "SELECT :a + :b").unwrap();
        let a = stmt.parameter_index(":a").unwrap();
        let b = stmt.parameter_index(":b").unwrap();
        assert_eq!(stmt.parameter_index(":missing"), None);
        stmt.bind_int64(a, 40).unwrap();
        stmt.bind_double(b, 2.0).unwrap();
        assert_eq!(stmt.step().unwrap(), StepResult::Row);
        assert_eq!(stmt.column_int64(0), 42);
    }

    #[test]
    fn test_bind_null() {
        let conn = memory();
        let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?1").unwrap();
        stmt.bind_null(1).unwrap();
        assert_eq!(select_one_text(&mut stmt), None);
        assert!(stmt.column_blob(0).is_none());
    }

    static POINTER_CLEANUPS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn drop_boxed_u64(data: *mut c_void) {
        POINTER_CLEANUPS.fetch_add(1, Ordering::SeqCst);
        drop(unsafe { Box::from_raw(data.cast::<u64>()) });
    }

    #[test]
    fn test_bind_pointer_rejects_sentinel() {
        let conn = memory();
        let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?1 IS NULL").unwrap();
        let mut value = 7u64;
        let err = unsafe {
            stmt.bind_pointer(
                1,
                (&mut value as *mut u64).cast(),
                c"sqlbind-test",
                sqlbind_core::sqlbind_transient(),
            )
        }
        .unwrap_err();
        assert!(matches!(
            err,
            BindError::Directive(sqlbind_core::DirectiveError::SentinelNotCallable)
        ));
        assert_eq!(err.code(), ffi::SQLITE_MISUSE);

        let boxed = Box::into_raw(Box::new(9u64));
        unsafe {
            stmt.bind_pointer(1, boxed.cast(), c"sqlbind-test", Some(drop_boxed_u64))
                .unwrap();
        }
        // Pointer values read as NULL from SQL.
        assert_eq!(stmt.step().unwrap(), StepResult::Row);
        assert_eq!(stmt.column_int64(0), 1);
        drop(stmt);
        assert_eq!(POINTER_CLEANUPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_defaults_select_directive() {
        let conn = memory();
        let config = BinderConfig {
            default_text_directive: DirectiveKind::Borrow,
            ..BinderConfig::default()
        };
        let value = String::from("kept");
        let mut stmt = PreparedStatement::prepare_with_config(&conn, "SELECT ?1", &config).unwrap();
        stmt.bind_text(1, &value).unwrap();
        stmt.bind_blob(1, value.as_bytes()).unwrap();
        assert_eq!(select_one_text(&mut stmt).as_deref(), Some("kept"));

        let bad = BinderConfig {
            default_blob_directive: DirectiveKind::Cleanup,
            ..BinderConfig::default()
        };
        assert!(matches!(
            PreparedStatement::prepare_with_config(&conn, "SELECT 1", &bad),
            Err(BindError::Config(_))
        ));
    }

    #[test]
    fn test_prepare_errors() {
        let conn = memory();
        let err = PreparedStatement::prepare(&conn, "SELECT * FROM missing").err().unwrap();
        assert!(matches!(err, BindError::Sqlite { code: ffi::SQLITE_ERROR, .. }));
        assert!(err.to_string().contains("missing"));

        let err = PreparedStatement::prepare(&conn, "  -- nothing").err().unwrap();
        assert_eq!(err.code(), ffi::SQLITE_MISUSE);
    }

    #[test]
    fn test_sentinel_matches_engine() {
        let ours = sqlbind_core::sqlbind_transient().map(|f| f as usize);
        let engine = ffi::SQLITE_TRANSIENT().map(|f| f as usize);
        assert_eq!(ours, engine);
        assert_eq!(sqlbind_core::sqlbind_static().is_none(), ffi::SQLITE_STATIC().is_none());
    }

    #[test]
    fn test_step_error_then_reset() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE u (id INTEGER PRIMARY KEY, v TEXT NOT NULL)").unwrap();
        let mut stmt = PreparedStatement::prepare(&conn, "INSERT INTO u (v) VALUES (?1)").unwrap();
        stmt.bind_null(1).unwrap();
        let err = stmt.step().unwrap_err();
        assert_eq!(err.code() & 0xff, ffi::SQLITE_CONSTRAINT);
        assert!(stmt.reset().is_err());
        stmt.bind_text_copied(1, "ok").unwrap();
        assert_eq!(stmt.step().unwrap(), StepResult::Done);
    }

    #[test]
    fn test_connection_closes_after_statement_drop() {
        let conn = memory();
        let value = String::from("borrowed");
        let mut stmt = PreparedStatement::prepare(&conn, "SELECT ?1").unwrap();
        stmt.bind_text_borrowed(1, &value).unwrap();
        assert_eq!(select_one_text(&mut stmt).as_deref(), Some("borrowed"));
        drop(stmt);
        assert!(conn.close().is_ok());
    }
}
