//! Component A — the owning handle around a single SQLite connection.
//!
//! `IoHandle` is the only thing in this crate that talks to `rusqlite`
//! directly. Every other component (prepared statements, result sets, the
//! write queue, entities) reaches the connection through it.
//!
//! Reentrancy ("isLockedForThread" in the design) is realized statically
//! rather than with a runtime thread-id check: every method that needs the
//! connection has a public lock-acquiring entry point plus a private
//! `*_locked` variant that takes `&mut DbState` directly. Call sites that
//! already hold the guard (e.g. `close()` driving several pragmas in
//! sequence) call the `_locked` variant, so the type system — not a runtime
//! flag — prevents a second, self-deadlocking acquisition. See DESIGN.md.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

use crate::config::{IoHandleConfig, Synchronicity};
use crate::prepared_statement::{PreparedStatement, SqlTemplate};
use crate::result_set::ResultSet;
use crate::value::Value;

/// Either a raw SQL string or a pre-classified [`PreparedStatement`].
///
/// `IoHandle::query`/`update` accept anything convertible into this so
/// callers can pass either and get the same multi-bind handling.
pub enum Stmt<'a> {
    Text(&'a str),
    Prepared(&'a PreparedStatement),
}

impl<'a> From<&'a str> for Stmt<'a> {
    fn from(s: &'a str) -> Self {
        Stmt::Text(s)
    }
}

impl<'a> From<&'a PreparedStatement> for Stmt<'a> {
    fn from(p: &'a PreparedStatement) -> Self {
        Stmt::Prepared(p)
    }
}

enum TemplateRef<'a> {
    Owned(SqlTemplate),
    Borrowed(&'a SqlTemplate),
}

impl<'a> std::ops::Deref for TemplateRef<'a> {
    type Target = SqlTemplate;
    fn deref(&self) -> &SqlTemplate {
        match self {
            TemplateRef::Owned(t) => t,
            TemplateRef::Borrowed(t) => t,
        }
    }
}

impl<'a> Stmt<'a> {
    fn template(&self) -> TemplateRef<'a> {
        match self {
            Stmt::Text(sql) => TemplateRef::Owned(SqlTemplate::parse(sql)),
            Stmt::Prepared(p) => TemplateRef::Borrowed(p.template()),
        }
    }
}

/// The mutable state protected by the database lock.
pub(crate) struct DbState {
    pub connection: Option<Connection>,
    pub in_transaction: bool,
    pub uncommitted: u64,
}

/// Owns the single SQLite connection for one database file.
pub struct IoHandle {
    path: PathBuf,
    config: IoHandleConfig,
    pub(crate) state: Mutex<DbState>,
    error_count: AtomicU64,
    synchronicity: Mutex<Synchronicity>,
}

impl IoHandle {
    /// Open (creating the file if writable) and apply the write-side
    /// pragmas from §4.A / §6.
    pub fn open(path: impl AsRef<Path>, config: IoHandleConfig) -> crate::error::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let connection = if config.read_only {
            Connection::open_with_flags(&path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?
        } else {
            Connection::open(&path)?
        };

        if !config.read_only {
            connection.execute_batch(
                "pragma auto_vacuum=incremental;\
                 pragma cache_size=2000;\
                 pragma fullfsync=NO;\
                 pragma journal_mode=persist;\
                 pragma journal_size_limit=5000000;",
            )?;
        }

        let handle = IoHandle {
            path,
            state: Mutex::new(DbState {
                connection: Some(connection),
                in_transaction: false,
                uncommitted: 0,
            }),
            error_count: AtomicU64::new(0),
            synchronicity: Mutex::new(config.synchronicity),
            config,
        };
        Ok(handle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn busy_retry_timeout(&self) -> u32 {
        self.config.busy_retry_timeout
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().connection.is_some()
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub(crate) fn note_error(&self, sql: &str, err: &rusqlite::Error) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        log::warn!("quicksilver: step failed for `{sql}`: {err}");
    }

    // ---- transaction state --------------------------------------------

    pub fn in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    pub fn uncommitted_count(&self) -> u64 {
        self.state.lock().uncommitted
    }

    pub fn begin_transaction(&self, deferred: bool) -> bool {
        let mut guard = self.state.lock();
        self.begin_transaction_locked(&mut guard, deferred)
    }

    fn begin_transaction_locked(&self, state: &mut DbState, deferred: bool) -> bool {
        if state.in_transaction {
            log::warn!("quicksilver: beginTransaction called with a transaction already open");
            return false;
        }
        let Some(conn) = state.connection.as_ref() else {
            log::error!("quicksilver: beginTransaction on a closed handle");
            return false;
        };
        let sql = if deferred { "BEGIN DEFERRED" } else { "BEGIN" };
        match conn.execute_batch(sql) {
            Ok(()) => {
                state.in_transaction = true;
                state.uncommitted = 0;
                true
            }
            Err(e) => {
                self.note_error(sql, &e);
                false
            }
        }
    }

    /// Commit the open transaction. `renew` immediately reopens one so the
    /// in-transaction flag is preserved (commit-and-renew, §9).
    pub fn commit(&self, renew: bool) -> bool {
        let mut guard = self.state.lock();
        self.commit_locked(&mut guard, renew)
    }

    fn commit_locked(&self, state: &mut DbState, renew: bool) -> bool {
        if !state.in_transaction {
            log::warn!("quicksilver: commit called with no active transaction");
            return false;
        }
        let Some(conn) = state.connection.as_ref() else {
            return false;
        };
        match conn.execute_batch("COMMIT") {
            Ok(()) => {
                state.in_transaction = false;
                state.uncommitted = 0;
                if renew {
                    return self.begin_transaction_locked(state, false);
                }
                true
            }
            Err(e) => {
                self.note_error("COMMIT", &e);
                false
            }
        }
    }

    pub fn rollback(&self) -> bool {
        let mut guard = self.state.lock();
        if !guard.in_transaction {
            log::warn!("quicksilver: rollback called with no active transaction");
            return false;
        }
        let Some(conn) = guard.connection.as_ref() else {
            return false;
        };
        match conn.execute_batch("ROLLBACK") {
            Ok(()) => {
                guard.in_transaction = false;
                guard.uncommitted = 0;
                true
            }
            Err(e) => {
                self.note_error("ROLLBACK", &e);
                false
            }
        }
    }

    // ---- durability -----------------------------------------------------

    pub fn synchronicity(&self) -> Synchronicity {
        *self.synchronicity.lock()
    }

    /// If called mid-transaction, commits, applies the pragma, and reopens
    /// a transaction atomically (§4.A "Durability").
    pub fn set_synchronicity(&self, level: Synchronicity) -> bool {
        let mut guard = self.state.lock();
        let was_open = guard.in_transaction;
        if was_open && !self.commit_locked(&mut guard, false) {
            return false;
        }
        let ok = {
            let Some(conn) = guard.connection.as_ref() else {
                return false;
            };
            let sql = format!("PRAGMA SYNCHRONOUS={}", level.pragma_value());
            match conn.execute_batch(&sql) {
                Ok(()) => true,
                Err(e) => {
                    self.note_error(&sql, &e);
                    false
                }
            }
        };
        if ok {
            *self.synchronicity.lock() = level;
        }
        if was_open {
            self.begin_transaction_locked(&mut guard, false);
        }
        ok
    }

    pub fn set_locking_mode(&self, exclusive: bool) -> bool {
        let guard = self.state.lock();
        let Some(conn) = guard.connection.as_ref() else {
            return false;
        };
        let sql = format!(
            "PRAGMA locking_mode={}",
            if exclusive { "EXCLUSIVE" } else { "NORMAL" }
        );
        match conn.execute_batch(&sql) {
            Ok(()) => true,
            Err(e) => {
                self.note_error(&sql, &e);
                false
            }
        }
    }

    // ---- maintenance ----------------------------------------------------

    /// Finalizes every statement cached by `rusqlite` itself (our analogue
    /// of "finalize every registered prepared statement"; see DESIGN.md).
    pub fn finalise_prepared_statements(&self) {
        let guard = self.state.lock();
        if let Some(conn) = guard.connection.as_ref() {
            conn.flush_prepared_statement_cache();
        }
    }

    pub fn vacuum(&self) -> bool {
        let mut guard = self.state.lock();
        self.finalise_prepared_statements_locked(&guard);
        if guard.in_transaction && !self.commit_locked(&mut guard, false) {
            return false;
        }
        let ok = self.run_pragma_locked(&guard, "VACUUM");
        self.finalise_prepared_statements_locked(&guard);
        ok
    }

    pub fn analyse(&self) -> bool {
        let mut guard = self.state.lock();
        self.finalise_prepared_statements_locked(&guard);
        if guard.in_transaction && !self.commit_locked(&mut guard, false) {
            return false;
        }
        let ok = self.run_pragma_locked(&guard, "ANALYZE");
        self.finalise_prepared_statements_locked(&guard);
        ok
    }

    fn finalise_prepared_statements_locked(&self, state: &DbState) {
        if let Some(conn) = state.connection.as_ref() {
            conn.flush_prepared_statement_cache();
        }
    }

    fn run_pragma_locked(&self, state: &DbState, sql: &str) -> bool {
        let Some(conn) = state.connection.as_ref() else {
            return false;
        };
        match conn.execute_batch(sql) {
            Ok(()) => true,
            Err(e) => {
                self.note_error(sql, &e);
                false
            }
        }
    }

    /// `idx_<table>_<col1>_<col2>_…` unless `name` is given. Idempotent via
    /// `IF NOT EXISTS`.
    pub fn create_index(&self, table: &str, columns: &[&str], name: Option<&str>) -> bool {
        let index_name = name
            .map(String::from)
            .unwrap_or_else(|| format!("idx_{}_{}", table, columns.join("_")));
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}({})",
            index_name,
            table,
            columns.join(", ")
        );
        self.update(&*sql, &[])
    }

    // ---- query / update ---------------------------------------------------

    /// `update(args) -> bool` per §4.B.
    pub fn update<'a>(&self, stmt: impl Into<Stmt<'a>>, args: &[Value]) -> bool {
        let stmt = stmt.into();
        let template = stmt.template();
        let expected = template.fixed_bind_points() + template.multi_bind_sites();
        if args.len() != expected {
            log::warn!(
                "quicksilver: arity mismatch for `{}`: expected {expected}, got {} (attempting anyway)",
                template.raw(),
                args.len()
            );
        }

        let (sql, bound): (std::borrow::Cow<str>, Vec<Value>) = if template.is_multi_bind() {
            match template.expand(args) {
                Ok((sql, bound)) => (sql.into(), bound),
                Err(e) => {
                    log::error!("quicksilver: {e}");
                    return false;
                }
            }
        } else {
            (template.raw().into(), args.to_vec())
        };

        let mut guard = self.state.lock();
        let Some(conn) = guard.connection.as_ref() else {
            log::error!("quicksilver: update on a closed handle");
            return false;
        };

        let result = if template.is_multi_bind() {
            // Never cached: the text depends on argument arity.
            conn.prepare(&sql).and_then(|mut s| {
                for (i, v) in bound.iter().enumerate() {
                    s.raw_bind_parameter(i + 1, v)?;
                }
                s.raw_execute()
            })
        } else {
            conn.prepare_cached(&sql).and_then(|mut s| {
                for (i, v) in bound.iter().enumerate() {
                    s.raw_bind_parameter(i + 1, v)?;
                }
                s.raw_execute()
            })
        };

        match result {
            Ok(_) => {
                if guard.in_transaction {
                    guard.uncommitted += 1;
                }
                true
            }
            Err(e) => {
                self.note_error(&sql, &e);
                false
            }
        }
    }

    /// `query(args) -> Option<ResultSet>` per §4.B/§4.C. The returned
    /// cursor holds the database lock until it is dropped.
    pub fn query<'io, 'a>(
        &'io self,
        stmt: impl Into<Stmt<'a>>,
        args: &[Value],
    ) -> Option<ResultSet<'io>> {
        let stmt = stmt.into();
        let template = stmt.template();
        let expected = template.fixed_bind_points() + template.multi_bind_sites();
        if args.len() != expected {
            log::warn!(
                "quicksilver: arity mismatch for `{}`: expected {expected}, got {} (attempting anyway)",
                template.raw(),
                args.len()
            );
        }

        let (sql, bound): (String, Vec<Value>) = if template.is_multi_bind() {
            match template.expand(args) {
                Ok(x) => x,
                Err(e) => {
                    log::error!("quicksilver: {e}");
                    return None;
                }
            }
        } else {
            (template.raw().to_string(), args.to_vec())
        };

        // The lock is acquired here and held by the returned `ResultSet`
        // until `close()`/`Drop`; see result_set.rs for the lock+statement
        // self-reference this requires.
        let guard = self.state.lock();
        ResultSet::open(self, guard, sql, bound)
    }

    // ---- one-row typed getters --------------------------------------------
    //
    // Thin wrappers around `query`: open a cursor, step once, read column 0,
    // and let the cursor close on drop. `None` covers no-match, a null
    // column, and query/prepare failure alike — callers don't need to tell
    // those apart.

    pub fn string_for<'a>(&self, stmt: impl Into<Stmt<'a>>, args: &[Value]) -> Option<String> {
        let mut rs = self.query(stmt, args)?;
        rs.next().then(|| rs.text(0)).flatten()
    }

    pub fn int64_for<'a>(&self, stmt: impl Into<Stmt<'a>>, args: &[Value]) -> Option<i64> {
        let mut rs = self.query(stmt, args)?;
        rs.next().then(|| rs.int64(0)).flatten()
    }

    pub fn date_for<'a>(&self, stmt: impl Into<Stmt<'a>>, args: &[Value]) -> Option<DateTime<Utc>> {
        let mut rs = self.query(stmt, args)?;
        rs.next().then(|| rs.timestamp(0)).flatten()
    }

    pub fn data_for<'a>(&self, stmt: impl Into<Stmt<'a>>, args: &[Value]) -> Option<Vec<u8>> {
        let mut rs = self.query(stmt, args)?;
        rs.next().then(|| rs.blob(0)).flatten()
    }

    pub fn bool_for<'a>(&self, stmt: impl Into<Stmt<'a>>, args: &[Value]) -> Option<bool> {
        let mut rs = self.query(stmt, args)?;
        rs.next().then(|| rs.bool_(0)).flatten()
    }

    /// Dispatches on the column's runtime type, matching `ResultSet::numeric`.
    pub fn number_for<'a>(&self, stmt: impl Into<Stmt<'a>>, args: &[Value]) -> Option<Value> {
        let mut rs = self.query(stmt, args)?;
        rs.next().then(|| rs.numeric(0)).flatten()
    }

    // ---- close ------------------------------------------------------------

    /// Finalize all prepared statements; if writable, switch to `delete`
    /// journal mode, perform an empty BEGIN/COMMIT, and run an incremental
    /// vacuum; then close the connection with bounded busy-retry.
    pub fn close(&self) -> bool {
        let mut guard = self.state.lock();

        if guard.in_transaction {
            self.commit_locked(&mut guard, false);
        }

        self.finalise_prepared_statements_locked(&guard);

        if !self.config.read_only {
            if let Some(conn) = guard.connection.as_ref() {
                let _ = conn.execute_batch(
                    "pragma journal_mode=delete; BEGIN; COMMIT; pragma incremental_vacuum(1000);",
                );
            }
        }

        let Some(conn) = guard.connection.take() else {
            return true;
        };

        let mut retries = 0u32;
        let mut conn = conn;
        loop {
            match conn.close() {
                Ok(()) => return true,
                Err((returned, e)) if is_busy(&e) && retries < self.config.close_busy_retry_timeout => {
                    conn = returned;
                    retries += 1;
                    thread::sleep(Duration::from_millis(200));
                }
                Err((_, e)) => {
                    log::error!("quicksilver: close failed after {retries} busy-retries: {e}");
                    return false;
                }
            }
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(ffi, _) if ffi.code == rusqlite::ErrorCode::DatabaseBusy
    )
}

/// Used by `ResultSet` to step with the spec's busy-retry policy without
/// re-borrowing `IoHandle` beyond what it already holds.
pub(crate) fn busy_retry_limit(handle: &IoHandle) -> u32 {
    handle.config.busy_retry_timeout
}

pub(crate) type StateGuard<'io> = MutexGuard<'io, DbState>;
