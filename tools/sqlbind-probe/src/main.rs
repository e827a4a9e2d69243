///
/// sqlbind-probe - Ownership directive probe
///
/// Binds a value under each directive against an in-memory database, clobbers
/// the caller's buffer, and reports what the engine reads back:
/// - sqlbind-probe check [--value <text>] [--config <file>]
/// - sqlbind-probe sentinel
///
/// Set RUST_LOG=sqlbind_sqlite3=trace to see every bind.
///

use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Parser, Subcommand};
use rusqlite::{Connection, ffi};
use sqlbind_core::{BinderConfig, Cleanup, OwnershipDirective, copy_now_directive, sqlbind_transient};
use sqlbind_sqlite3::{BindError, PreparedStatement, StepResult, open_with_config};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlbind-probe")]
#[command(author, version, about = "Probe SQLite ownership directives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind a value under every directive and report what the engine kept
    Check {
        /// Text to bind
        #[arg(long, default_value = "hello")]
        value: String,

        /// Binder config (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the transient sentinel and compare it with the engine's
    Sentinel,
}

static RELEASES: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn counted_free(ptr: *mut c_void) {
    RELEASES.fetch_add(1, Ordering::SeqCst);
    unsafe { ffi::sqlite3_free(ptr) };
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { value, config } => {
            if let Err(e) = run_check(&value, config.as_deref()) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Sentinel => {
            if !print_sentinel() {
                std::process::exit(1);
            }
        }
    }
}

fn read_back(stmt: &mut PreparedStatement<'_>) -> Result<String, BindError> {
    match stmt.step()? {
        StepResult::Row => Ok(stmt.column_text(0).unwrap_or_default()),
        StepResult::Done => Ok(String::new()),
    }
}

fn probe_copy(conn: &Connection, value: &str) -> Result<String, BindError> {
    let mut stmt = PreparedStatement::prepare(conn, "SELECT ?1")?;
    let mut buf = value.as_bytes().to_vec();
    unsafe { stmt.bind_text_raw(1, buf.as_ptr(), buf.len(), copy_now_directive())? };
    buf.fill(b'#');
    drop(buf);
    read_back(&mut stmt)
}

fn probe_borrow(conn: &Connection, value: &str) -> Result<String, BindError> {
    let mut buf = value.as_bytes().to_vec();
    let mut stmt = PreparedStatement::prepare(conn, "SELECT ?1")?;
    unsafe {
        stmt.bind_text_raw(1, buf.as_ptr(), buf.len(), OwnershipDirective::Borrow)?;
        std::ptr::write_bytes(buf.as_mut_ptr(), b'#', buf.len());
    }
    read_back(&mut stmt)
}

fn probe_cleanup(conn: &Connection, value: &str) -> Result<(String, usize), BindError> {
    let before = RELEASES.load(Ordering::SeqCst);
    let size = value.len().max(1);
    let data = unsafe { ffi::sqlite3_malloc64(size as u64) }.cast::<u8>();
    if data.is_null() {
        return Err(BindError::Sqlite {
            code: ffi::SQLITE_NOMEM,
            message: format!("failed to allocate {size} bytes"),
        });
    }
    unsafe { std::ptr::copy_nonoverlapping(value.as_ptr(), data, value.len()) };

    let directive = OwnershipDirective::OwnedCleanup(Cleanup::from_fn(counted_free)?);
    let read = {
        let mut stmt = PreparedStatement::prepare(conn, "SELECT ?1")?;
        unsafe { stmt.bind_text_raw(1, data, value.len(), directive)? };
        read_back(&mut stmt)?
    };
    Ok((read, RELEASES.load(Ordering::SeqCst) - before))
}

fn run_check(value: &str, config_path: Option<&std::path::Path>) -> Result<(), BindError> {
    let config = match config_path {
        Some(path) => BinderConfig::load(path)?,
        None => BinderConfig::default(),
    };
    let conn = open_with_config(":memory:", &config)?;
    println!(
        "defaults: text={} blob={} busy_timeout_ms={}",
        config.default_text_directive, config.default_blob_directive, config.busy_timeout_ms
    );

    let copied = probe_copy(&conn, value)?;
    let copy_ok = copied == value;
    println!(
        "copy     bound {:?} read {:?} ({})",
        value,
        copied,
        if copy_ok { "preserved" } else { "LOST" }
    );

    let borrowed = probe_borrow(&conn, value)?;
    println!(
        "borrow   bound {:?} read {:?} ({})",
        value,
        borrowed,
        if borrowed == value { "preserved" } else { "read in place" }
    );

    let (owned, releases) = probe_cleanup(&conn, value)?;
    let cleanup_ok = owned == value && releases == 1;
    println!(
        "cleanup  bound {:?} read {:?} (callback ran {} time{})",
        value,
        owned,
        releases,
        if releases == 1 { "" } else { "s" }
    );

    if copy_ok && cleanup_ok {
        Ok(())
    } else {
        Err(BindError::Sqlite {
            code: ffi::SQLITE_ERROR,
            message: "directive check failed".to_string(),
        })
    }
}

fn print_sentinel() -> bool {
    let ours = sqlbind_transient().map_or(0, |f| f as usize);
    let engine = ffi::SQLITE_TRANSIENT().map_or(0, |f| f as usize);
    println!("sqlbind_transient() = {:#x}", ours);
    println!("SQLITE_TRANSIENT    = {:#x}", engine);
    if ours == engine {
        println!("match");
        true
    } else {
        println!("MISMATCH");
        false
    }
}
