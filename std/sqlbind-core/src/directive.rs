//!
//! Ownership Directives
//!
//! Every text or blob bind hands the engine a destructor slot alongside the
//! bytes. The slot encodes one of three intents:
//!
//! - null: the engine reads the caller's memory in place (`Borrow`)
//! - a function: the engine calls it once when done with the memory (`OwnedCleanup`)
//! - the reserved value `-1`: the engine copies before the bind returns (`CopyNow`)
//!
//! The `-1` value is a header macro in the native interface and never becomes a
//! linkable symbol. `sqlbind_transient` wraps it in an exported function.
//!

use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::DirectiveError;

/// Signature of an engine-invoked cleanup callback
pub type CleanupFn = unsafe extern "C" fn(*mut c_void);

/// Raw destructor slot, layout-identical to `sqlite3_destructor_type`
pub type RawDestructor = Option<CleanupFn>;

/// Address the engine reserves for the transient sentinel (`(void(*)(void*))-1`)
const TRANSIENT_ADDR: usize = usize::MAX;

fn transient_sentinel() -> CleanupFn {
    // The engine compares against this address and never calls it.
    unsafe { std::mem::transmute::<isize, CleanupFn>(-1_isize) }
}

fn is_sentinel(f: CleanupFn) -> bool {
    f as usize == TRANSIENT_ADDR
}

/// A real callback the engine invokes exactly once to release a bound value.
///
/// Never holds the transient sentinel.
#[derive(Clone, Copy)]
pub struct Cleanup(CleanupFn);

impl Cleanup {
    /// Wrap a raw destructor slot, rejecting null and the transient sentinel
    pub fn new(raw: RawDestructor) -> Result<Self, DirectiveError> {
        match raw {
            None => Err(DirectiveError::MissingCallback),
            Some(f) => Self::from_fn(f),
        }
    }

    pub fn from_fn(f: CleanupFn) -> Result<Self, DirectiveError> {
        if is_sentinel(f) {
            tracing::warn!("rejected transient sentinel in a cleanup callback slot");
            return Err(DirectiveError::SentinelNotCallable);
        }
        Ok(Self(f))
    }

    pub fn as_fn(self) -> CleanupFn {
        self.0
    }

    fn addr(self) -> usize {
        self.0 as usize
    }
}

impl PartialEq for Cleanup {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Cleanup {}

impl Hash for Cleanup {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cleanup({:#x})", self.addr())
    }
}

/// How the engine should treat the memory behind one bound value.
///
/// Identity comparison only; there is no ordering between directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnershipDirective {
    /// Engine reads the memory in place; caller keeps it valid and unchanged
    /// until the statement is reset, stepped past, rebound or finalized.
    Borrow,
    /// Ownership moves to the engine, which calls the callback once when done.
    OwnedCleanup(Cleanup),
    /// Engine copies the bytes before the bind call returns.
    CopyNow,
}

impl OwnershipDirective {
    /// Encode as the engine's destructor slot
    pub fn into_raw(self) -> RawDestructor {
        match self {
            OwnershipDirective::Borrow => None,
            OwnershipDirective::OwnedCleanup(cleanup) => Some(cleanup.as_fn()),
            OwnershipDirective::CopyNow => Some(transient_sentinel()),
        }
    }

    /// Classify a destructor slot received from a foreign caller
    pub fn from_raw(raw: RawDestructor) -> Self {
        match raw {
            None => OwnershipDirective::Borrow,
            Some(f) if is_sentinel(f) => OwnershipDirective::CopyNow,
            Some(f) => OwnershipDirective::OwnedCleanup(Cleanup(f)),
        }
    }

    pub fn kind(&self) -> DirectiveKind {
        match self {
            OwnershipDirective::Borrow => DirectiveKind::Borrow,
            OwnershipDirective::OwnedCleanup(_) => DirectiveKind::Cleanup,
            OwnershipDirective::CopyNow => DirectiveKind::Copy,
        }
    }

    /// Engine owns or has copied the bytes once the bind returns
    pub fn releases_caller(&self) -> bool {
        !matches!(self, OwnershipDirective::Borrow)
    }

    /// Run the cleanup callback for a value the engine never received.
    ///
    /// # Safety
    /// `data` must be the pointer the callback expects, and the value must not
    /// have been handed to the engine.
    pub unsafe fn release_unbound(self, data: *mut c_void) {
        if let OwnershipDirective::OwnedCleanup(cleanup) = self {
            unsafe { (cleanup.as_fn())(data) };
        }
    }
}

/// Callback-free tag for a directive, used by config and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveKind {
    Borrow,
    Cleanup,
    Copy,
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DirectiveKind::Borrow => "borrow",
            DirectiveKind::Cleanup => "cleanup",
            DirectiveKind::Copy => "copy",
        };
        f.write_str(name)
    }
}

/// The process-wide `CopyNow` directive
pub fn copy_now_directive() -> OwnershipDirective {
    OwnershipDirective::CopyNow
}

/// Return `SQLITE_TRANSIENT` as a callable symbol
#[unsafe(no_mangle)]
pub extern "C" fn sqlbind_transient() -> RawDestructor {
    copy_now_directive().into_raw()
}

/// Return `SQLITE_STATIC` (null) as a callable symbol
#[unsafe(no_mangle)]
pub extern "C" fn sqlbind_static() -> RawDestructor {
    OwnershipDirective::Borrow.into_raw()
}

/// Returns 1 if the destructor slot holds the transient sentinel, 0 otherwise
#[unsafe(no_mangle)]
pub extern "C" fn sqlbind_is_transient(raw: RawDestructor) -> i32 {
    match raw {
        Some(f) if is_sentinel(f) => 1,
        _ => 0,
    }
}
