//!
//! Last Error Slot
//!
//! Provides thread-local error storage for the C ABI. Functions that fail
//! return a result code or `-1` handle and record the details here.
//!
//! The message pointer returned by `sqlbind_last_error_message` stays valid
//! until the next error is recorded or cleared on the same thread.
//!

use std::cell::{Cell, RefCell};
use std::ffi::{CString, c_char};

thread_local! {
    static LAST_ERROR_CODE: Cell<i32> = const { Cell::new(0) };
    static LAST_ERROR_MESSAGE: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Record an error for the current thread
pub fn record_error(code: i32, message: &str) {
    let sanitized = message.replace('\0', " ");
    let c_message = CString::new(sanitized).ok();
    LAST_ERROR_CODE.with(|c| c.set(code));
    LAST_ERROR_MESSAGE.with(|m| *m.borrow_mut() = c_message);
}

/// Last recorded error code and message on this thread
pub fn last_error() -> Option<(i32, String)> {
    let code = LAST_ERROR_CODE.with(|c| c.get());
    if code == 0 {
        return None;
    }
    let message = LAST_ERROR_MESSAGE.with(|m| {
        m.borrow()
            .as_ref()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    Some((code, message))
}

pub fn clear_last_error() {
    LAST_ERROR_CODE.with(|c| c.set(0));
    LAST_ERROR_MESSAGE.with(|m| *m.borrow_mut() = None);
}

/// Get the last error code (0 if none)
#[unsafe(no_mangle)]
pub extern "C" fn sqlbind_last_error_code() -> i32 {
    LAST_ERROR_CODE.with(|c| c.get())
}

/// Get the last error message (null if none)
#[unsafe(no_mangle)]
pub extern "C" fn sqlbind_last_error_message() -> *const c_char {
    LAST_ERROR_MESSAGE.with(|m| {
        m.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |s| s.as_ptr())
    })
}

/// Clear the last error
#[unsafe(no_mangle)]
pub extern "C" fn sqlbind_last_error_clear() {
    clear_last_error();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_record_and_clear() {
        clear_last_error();
        assert_eq!(sqlbind_last_error_code(), 0);
        assert!(sqlbind_last_error_message().is_null());
        assert!(last_error().is_none());

        record_error(25, "column index out of range");
        assert_eq!(sqlbind_last_error_code(), 25);
        let msg = unsafe { CStr::from_ptr(sqlbind_last_error_message()) };
        assert_eq!(msg.to_str().unwrap(), "column index out of range");
        assert_eq!(last_error(), Some((25, "column index out of range".to_string())));

        sqlbind_last_error_clear();
        assert_eq!(sqlbind_last_error_code(), 0);
        assert!(sqlbind_last_error_message().is_null());
    }

    #[test]
    fn test_interior_nul_is_kept_readable() {
        record_error(1, "bad\0value");
        assert_eq!(last_error(), Some((1, "bad value".to_string())));
        clear_last_error();
    }

    #[test]
    fn test_errors_are_per_thread() {
        record_error(21, "misuse");
        let other = std::thread::spawn(|| sqlbind_last_error_code()).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(sqlbind_last_error_code(), 21);
        clear_last_error();
    }
}
