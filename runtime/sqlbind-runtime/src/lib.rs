///
/// sqlbind Runtime Library
///
/// Provides every sqlbind C-ABI function in one static library
/// (libsqlbind_runtime.a) and one shared library, for callers whose import
/// tooling binds exported symbols but not header macros. Declarations are in
/// include/sqlbind.h.
///
/// Contains:
/// - Directive accessors (sqlbind_transient, sqlbind_static, sqlbind_is_transient)
/// - Last-error slot (sqlbind_last_error_code, _message, _clear)
/// - SQLite handle functions (sqlbind_sqlite_*)
///

pub use sqlbind_core::*;
pub use sqlbind_sqlite3::*;

/// Runtime version as a nul-terminated string
#[unsafe(no_mangle)]
pub extern "C" fn sqlbind_version() -> *const std::ffi::c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}
