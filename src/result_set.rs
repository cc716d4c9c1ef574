//! Component C — the forward-only cursor returned by `IoHandle::query`.
//!
//! `ResultSet` holds the database lock from the moment it's created until
//! it is closed (explicitly, or via `Drop`): at most one can be open per
//! handle, and every other operation on that handle blocks until it is.
//!
//! Making that true in safe Rust runs into a real self-reference: the
//! cursor must own both a `rusqlite::Statement` and the `rusqlite::Rows`
//! iterator that borrows it, and hand both back to the caller across
//! repeated `next()` calls — exactly the "owns a statement reset-token and
//! a lock guard, releases both on drop" shape called for in the design
//! notes. We box the statement so its heap address is stable regardless of
//! where `ResultSet` itself lives, then erase `Rows`'s borrow to `'static`;
//! the safety argument is that the box is never touched except through
//! `rows`, and `rows` is always dropped first (see the `Drop` impl) so the
//! erased borrow never outlives its referent.

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::io_handle::{busy_retry_limit, IoHandle, StateGuard};
use crate::value::Value;

/// One decoded row, detached from the cursor that produced it.
///
/// Building one of these is how the entity layer gets data out of a
/// `ResultSet` without entangling `ModelFactory` in the cursor's lifetime.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.index_of(column).map(|i| &self.values[i])
    }

    pub fn text(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::Text(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(format!("{other:?}")),
        }
    }

    pub fn int64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Integer(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Null => None,
            _ => None,
        }
    }

    pub fn bool_(&self, column: &str) -> Option<bool> {
        match self.get(column)? {
            Value::Bool(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Null => None,
            _ => None,
        }
    }

    pub fn double(&self, column: &str) -> Option<f64> {
        match self.get(column)? {
            Value::Double(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            Value::Null => None,
            _ => None,
        }
    }

    pub fn blob(&self, column: &str) -> Option<Vec<u8>> {
        match self.get(column)? {
            Value::Blob(b) => Some(b.clone()),
            Value::Null => None,
            _ => None,
        }
    }

    /// Columns round-tripped through a detached [`Row`] (as opposed to read
    /// live off a cursor) never carry `Value::Timestamp` — the generic
    /// `rusqlite::types::Value` conversion has no timestamp variant of its
    /// own, so a `created`/`modified` column comes back as `Double` (or
    /// `Integer` for a whole-second value). Accept either, matching
    /// `ResultSet::timestamp`'s decoding.
    pub fn timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        match self.get(column)? {
            Value::Timestamp(ts) => Some(*ts),
            Value::Double(d) => seconds_to_timestamp(*d),
            Value::Integer(i) => seconds_to_timestamp(*i as f64),
            Value::Null => None,
            _ => None,
        }
    }
}

/// Shared by [`Row::timestamp`] and [`ResultSet::timestamp`]: epoch seconds
/// (as stored by `Value`'s `ToSql` impl) back to a `DateTime<Utc>`, treating
/// a near-zero value as the Unix epoch rather than losing precision to
/// float round-trip noise.
fn seconds_to_timestamp(seconds: f64) -> Option<DateTime<Utc>> {
    if seconds.abs() < 0.001 {
        return Utc.timestamp_opt(0, 0).single();
    }
    let secs = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1e9).round() as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

pub struct ResultSet<'io> {
    handle: &'io IoHandle,
    guard: ManuallyDrop<StateGuard<'io>>,
    // Boxed so its heap address outlives any move of `ResultSet` itself;
    // `rows` borrows through this box, never through `self` directly.
    stmt: ManuallyDrop<Box<rusqlite::Statement<'io>>>,
    // SAFETY: actually borrows `*stmt` for as long as `self` lives. Dropped
    // explicitly, before `stmt`, in our `Drop` impl — see module doc.
    rows: ManuallyDrop<rusqlite::Rows<'static>>,
    // SAFETY: the `&Row` returned by `rows.next()` borrows `rows`, which we
    // never move or drop while `current` is set. Erased to a raw pointer
    // (rather than kept as a reference) only because `Row` has no public
    // `Copy`/`Clone` impl to stash an owned, lifetime-erased value instead.
    current: Option<*const rusqlite::Row<'static>>,
    column_names: Vec<String>,
    column_index: HashMap<String, usize>,
    busy_retry_timeout: u32,
    closed: bool,
    exhausted: bool,
}

impl<'io> ResultSet<'io> {
    /// Prepare and step the statement that produced this cursor. Returns
    /// `None` (rather than propagating) on prepare/bind failure, per the
    /// "reported, not thrown" query-path policy.
    pub(crate) fn open(
        handle: &'io IoHandle,
        guard: StateGuard<'io>,
        sql: String,
        bound: Vec<Value>,
    ) -> Option<Self> {
        let conn = guard.connection.as_ref()?;

        // SAFETY: `conn` is reached through `guard`, which we keep alive in
        // `self.guard` for exactly as long as `self` exists; `*conn`'s
        // address is stable for that whole span because it lives inside
        // the `Mutex`'s storage, not inside `guard` itself.
        let conn: &'io rusqlite::Connection = unsafe { &*(conn as *const rusqlite::Connection) };

        let mut stmt = Box::new(match conn.prepare(&sql) {
            Ok(s) => s,
            Err(e) => {
                handle.note_error(&sql, &e);
                return None;
            }
        });

        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let column_index = column_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        for (i, v) in bound.iter().enumerate() {
            if let Err(e) = stmt.raw_bind_parameter(i + 1, v) {
                handle.note_error(&sql, &e);
                return None;
            }
        }

        // SAFETY: `stmt` is heap-allocated and never moved again; `rows`
        // borrows `*stmt` through the box for `self`'s whole lifetime, and
        // `Drop` below drops `rows` before `stmt` so the borrow never
        // dangles.
        let stmt_ptr: *mut rusqlite::Statement<'io> = &mut *stmt;
        let rows: rusqlite::Rows<'static> =
            unsafe { std::mem::transmute(stmt_ptr.as_mut().unwrap().raw_query()) };

        Some(ResultSet {
            handle,
            guard: ManuallyDrop::new(guard),
            stmt: ManuallyDrop::new(stmt),
            rows: ManuallyDrop::new(rows),
            current: None,
            column_names,
            column_index,
            busy_retry_timeout: busy_retry_limit(handle),
            closed: false,
            exhausted: false,
        })
    }

    /// Step to the next row. Retries on `SQLITE_BUSY` with the handle's
    /// configured budget, matching `update`'s busy-retry semantics for
    /// reads (§4.A).
    pub fn next(&mut self) -> bool {
        if self.closed || self.exhausted {
            return false;
        }
        let mut retries = 0u32;
        loop {
            match self.rows.next() {
                Ok(Some(row)) => {
                    // SAFETY: erasing the borrow's lifetime is sound because
                    // `row` borrows `self.rows`, which outlives `self.current`
                    // (both are fields of the same struct, dropped together;
                    // see the module doc and `Drop` impl).
                    let ptr: *const rusqlite::Row<'_> = row;
                    self.current = Some(unsafe {
                        std::mem::transmute::<*const rusqlite::Row<'_>, *const rusqlite::Row<'static>>(
                            ptr,
                        )
                    });
                    return true;
                }
                Ok(None) => {
                    self.current = None;
                    self.exhausted = true;
                    return false;
                }
                Err(e) if is_busy(&e) && retries < self.busy_retry_timeout => {
                    retries += 1;
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    self.handle.note_error("<cursor step>", &e);
                    self.current = None;
                    self.exhausted = true;
                    return false;
                }
            }
        }
    }

    fn current_row_ref(&self) -> Option<&rusqlite::Row<'_>> {
        self.current.map(|p| unsafe { &*p })
    }

    fn current_value(&self, idx: usize) -> Option<Value> {
        let row = self.current_row_ref()?;
        let raw: rusqlite::types::Value = row.get(idx).ok()?;
        Some(raw.into())
    }

    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    pub fn column_name(&self, idx: usize) -> Option<&str> {
        self.column_names.get(idx).map(String::as_str)
    }

    fn index_for(&self, column: &str) -> Option<usize> {
        self.column_index.get(column).copied()
    }

    // ---- typed accessors by index --------------------------------------

    pub fn int(&self, idx: usize) -> Option<i32> {
        self.int64(idx).map(|v| v as i32)
    }

    pub fn int64(&self, idx: usize) -> Option<i64> {
        match self.current_value(idx)? {
            Value::Integer(i) => Some(i),
            Value::Bool(b) => Some(b as i64),
            Value::Null => None,
            _ => None,
        }
    }

    pub fn bool_(&self, idx: usize) -> Option<bool> {
        match self.current_value(idx)? {
            Value::Bool(b) => Some(b),
            Value::Integer(i) => Some(i != 0),
            Value::Null => None,
            _ => None,
        }
    }

    pub fn double(&self, idx: usize) -> Option<f64> {
        match self.current_value(idx)? {
            Value::Double(d) => Some(d),
            Value::Integer(i) => Some(i as f64),
            Value::Null => None,
            _ => None,
        }
    }

    pub fn text(&self, idx: usize) -> Option<String> {
        match self.current_value(idx)? {
            Value::Text(s) => Some(s),
            Value::Null => None,
            _ => None,
        }
    }

    pub fn blob(&self, idx: usize) -> Option<Vec<u8>> {
        match self.current_value(idx)? {
            Value::Blob(b) => Some(b),
            Value::Null => None,
            _ => None,
        }
    }

    /// The near-zero value SQLite returns for a genuinely absent timestamp
    /// column is disambiguated from a real `t=0` by checking the raw value
    /// is actually `NULL`, not merely small (§4.C).
    pub fn timestamp(&self, idx: usize) -> Option<DateTime<Utc>> {
        let row = self.current_row_ref()?;
        let raw = row.get_ref(idx).ok()?;
        if matches!(raw, rusqlite::types::ValueRef::Null) {
            return None;
        }
        let seconds = match raw {
            rusqlite::types::ValueRef::Real(f) => f,
            rusqlite::types::ValueRef::Integer(i) => i as f64,
            _ => return None,
        };
        seconds_to_timestamp(seconds)
    }

    /// Generic numeric accessor: integer columns come back as `Integer`,
    /// real columns as `Double`, matching whatever SQLite's dynamic typing
    /// actually stored.
    pub fn numeric(&self, idx: usize) -> Option<Value> {
        self.current_value(idx)
    }

    // ---- typed accessors by name ----------------------------------------

    pub fn int_named(&self, column: &str) -> Option<i32> {
        self.int(self.index_for(column)?)
    }

    pub fn int64_named(&self, column: &str) -> Option<i64> {
        self.int64(self.index_for(column)?)
    }

    pub fn bool_named(&self, column: &str) -> Option<bool> {
        self.bool_(self.index_for(column)?)
    }

    pub fn double_named(&self, column: &str) -> Option<f64> {
        self.double(self.index_for(column)?)
    }

    pub fn text_named(&self, column: &str) -> Option<String> {
        self.text(self.index_for(column)?)
    }

    pub fn blob_named(&self, column: &str) -> Option<Vec<u8>> {
        self.blob(self.index_for(column)?)
    }

    pub fn timestamp_named(&self, column: &str) -> Option<DateTime<Utc>> {
        self.timestamp(self.index_for(column)?)
    }

    /// Snapshot the whole current row into an owned [`Row`], detached from
    /// this cursor's lifetime. Used by the entity layer.
    pub fn current_row(&self) -> Row {
        let values = (0..self.column_names.len())
            .map(|i| self.current_value(i).unwrap_or(Value::Null))
            .collect();
        Row {
            columns: self.column_names.clone(),
            values,
        }
    }

    /// Release the database lock. Idempotent; also run on `Drop`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // SAFETY: drop order — `rows` borrows `*stmt`; both are dropped
        // here before `guard` is dropped, and neither field is touched
        // again afterward (the struct is left in a `closed` state that
        // every other method checks).
        unsafe {
            ManuallyDrop::drop(&mut self.rows);
            ManuallyDrop::drop(&mut self.stmt);
            ManuallyDrop::drop(&mut self.guard);
        }
    }
}

impl<'io> Drop for ResultSet<'io> {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(ffi, _) if ffi.code == rusqlite::ErrorCode::DatabaseBusy
    )
}
