//!
//! sqlbind-core - Ownership Directive Types
//!
//! This crate provides the pieces shared across all sqlbind crates:
//!
//! - `OwnershipDirective` telling the engine how to treat the memory behind a bound value
//! - `Cleanup` for callbacks the engine invokes once it releases a value
//! - `sqlbind_transient` / `sqlbind_static` exported with C linkage, so callers that
//!   cannot expand `SQLITE_TRANSIENT` / `SQLITE_STATIC` can still obtain them
//! - A thread-local last-error slot read by the C ABI
//! - `BinderConfig` for per-connection binding defaults
//!
//! The sentinel pointer value only exists at the FFI boundary. Everywhere else a
//! directive is an ordinary enum.
//!

pub mod config;
pub mod directive;
mod error;
pub mod last_error;

pub use config::*;
pub use directive::*;
pub use error::*;
pub use last_error::*;
