//! Component E (part 2) — per-table identity-map cache and CRUD surface.
//!
//! `Entity<M, F>` owns the schema for one table and the identity map that
//! deduplicates in-memory model instances by UUID. Writes go through the
//! background [`WriteQueue`]; the cache is updated synchronously so a
//! caller that persists a model and immediately queries for it sees the
//! same `Arc` back, even before the write has actually landed on disk.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::io_handle::IoHandle;
use crate::model::{Model, ModelMeta};
use crate::result_set::Row;
use crate::value::Value;
use crate::write_queue::WriteQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    IntegerPk,
    Integer,
    Bool,
    Decimal,
    Varchar,
    VarcharPk,
    Timestamp,
    TimestampAsSeconds,
    Blob,
}

impl ColumnType {
    fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Bool => "INTEGER",
            ColumnType::IntegerPk => "INTEGER PRIMARY KEY",
            ColumnType::Decimal => "REAL",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::VarcharPk => "VARCHAR PRIMARY KEY",
            ColumnType::Timestamp | ColumnType::TimestampAsSeconds => "TIMESTAMP",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// Per-column behavior flags, orthogonal to `ColumnType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOption {
    None,
    /// An index on this column alone is created (`IF NOT EXISTS`) right
    /// after the table itself, named `idx_<table>_<column>`.
    CreateIndex,
    /// Excluded from the default whole-row projection (`select_columns`):
    /// a model decoded from `models`/`model_with`/etc. won't have this
    /// column populated. Callers that need it fetch it explicitly via
    /// `Entity::select`.
    LazyLoad,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub option: ColumnOption,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Column { name, ty, option: ColumnOption::None }
    }

    pub const fn with_option(name: &'static str, ty: ColumnType, option: ColumnOption) -> Self {
        Column { name, ty, option }
    }
}

/// Replaces the source's virtual `loadModelFrom`/`persist` overrides: one
/// implementation per concrete model type, supplied to `Entity::new`.
pub trait ModelFactory: Send + Sync {
    type Model: Model;

    /// Build a model from a freshly decoded row. `meta` already carries the
    /// uuid/created/modified columns; the rest come from `row`. A row built
    /// through the default projection leaves any `LazyLoad` column absent.
    fn decode_row(&self, meta: ModelMeta, row: &Row) -> Self::Model;

    /// The non-reserved columns to bind for an INSERT or UPDATE, in the
    /// order `Entity` registered them.
    fn encode_columns(&self, model: &Self::Model) -> Vec<Value>;

    /// Construct a brand-new, not-yet-persisted model.
    fn new_model(&self, meta: ModelMeta) -> Self::Model;
}

struct CacheEntry<M> {
    model: Arc<M>,
}

pub struct Entity<F: ModelFactory> {
    io: Arc<IoHandle>,
    queue: Arc<WriteQueue>,
    table: String,
    columns: Vec<Column>,
    cache: RwLock<HashMap<Uuid, CacheEntry<F::Model>>>,
    factory: F,
}

impl<F: ModelFactory> Entity<F> {
    pub(crate) fn new(
        io: Arc<IoHandle>,
        queue: Arc<WriteQueue>,
        table: impl Into<String>,
        columns: Vec<Column>,
        factory: F,
    ) -> crate::error::Result<Self> {
        let table = table.into();
        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             uuid TEXT PRIMARY KEY, created REAL NOT NULL, modified REAL NOT NULL"
        );
        for col in &columns {
            ddl.push_str(&format!(", {} {}", col.name, col.ty.sql_type()));
        }
        ddl.push(')');

        if !io.update(&*ddl, &[]) {
            return Err(crate::error::Error::MalformedEntity(
                table,
                "failed to create or verify schema".to_string(),
            ));
        }

        for col in &columns {
            if col.option == ColumnOption::CreateIndex {
                io.create_index(&table, &[col.name], None);
            }
        }

        Ok(Entity {
            io,
            queue,
            table,
            columns,
            cache: RwLock::new(HashMap::new()),
            factory,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_index(&self, columns: &[&str], name: Option<&str>) -> bool {
        self.io.create_index(&self.table, columns, name)
    }

    /// The default whole-row projection: the three reserved columns plus
    /// every declared column that isn't `LazyLoad`.
    fn select_columns(&self) -> String {
        let mut sql = "uuid, created, modified".to_string();
        for col in &self.columns {
            if col.option == ColumnOption::LazyLoad {
                continue;
            }
            sql.push_str(", ");
            sql.push_str(col.name);
        }
        sql
    }

    fn decode(&self, row: &Row) -> Option<Arc<F::Model>> {
        let uuid: Uuid = row.text("uuid")?.parse().ok()?;
        let created = row.timestamp("created")?;
        let modified = row.timestamp("modified")?;
        let meta = ModelMeta::from_row(uuid, created, modified);
        Some(Arc::new(self.factory.decode_row(meta, row)))
    }

    fn cache_or_insert(&self, uuid: Uuid, model: Arc<F::Model>) -> Arc<F::Model> {
        let mut cache = self.cache.write();
        if let Some(existing) = cache.get(&uuid) {
            existing.model.meta().set_used_recently(true);
            return Arc::clone(&existing.model);
        }
        cache.insert(uuid, CacheEntry { model: Arc::clone(&model) });
        model
    }

    /// The read-your-writes coherency barrier every read helper invokes
    /// before it touches the database (§4.E).
    fn drain(&self) {
        self.queue.wait_for_outstanding_operations();
    }

    // ---- reads ------------------------------------------------------------

    /// `modelWith(uuid)`: cache first; on a miss, load and cache the row.
    pub fn model_with(&self, uuid: Uuid) -> Option<Arc<F::Model>> {
        self.drain();
        if let Some(entry) = self.cache.read().get(&uuid) {
            entry.model.meta().set_used_recently(true);
            return Some(Arc::clone(&entry.model));
        }
        self.query_one("uuid = ?", &[Value::Text(uuid.to_string())])
    }

    /// `modelsWith(uuids)`: batch identity lookup. Cache hits are returned
    /// immediately; the misses are loaded in a single `WHERE uuid IN (#?)`
    /// query and inserted into the cache. Order is cache hits first (in
    /// `uuids` order), then the batch-loaded rows (in query order).
    pub fn models_with(&self, uuids: &[Uuid]) -> Vec<Arc<F::Model>> {
        self.drain();
        let mut out = Vec::with_capacity(uuids.len());
        let mut missing = Vec::new();
        {
            let cache = self.cache.read();
            for &uuid in uuids {
                if let Some(entry) = cache.get(&uuid) {
                    entry.model.meta().set_used_recently(true);
                    out.push(Arc::clone(&entry.model));
                } else {
                    missing.push(uuid);
                }
            }
        }
        if !missing.is_empty() {
            let sql = format!(
                "SELECT {} FROM {} WHERE uuid IN (#?)",
                self.select_columns(),
                self.table
            );
            let args = [Value::Sequence(
                missing.iter().map(|u| Value::Text(u.to_string())).collect(),
            )];
            out.extend(self.query_many(&sql, &args));
        }
        out
    }

    /// `models(where, args)`: every row matching `predicate`.
    pub fn models_where(&self, predicate: &str, args: &[Value]) -> Vec<Arc<F::Model>> {
        self.drain();
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.select_columns(),
            self.table,
            predicate
        );
        self.query_many(&sql, args)
    }

    /// `models()`: every row in the table.
    pub fn models(&self) -> Vec<Arc<F::Model>> {
        self.drain();
        let sql = format!("SELECT {} FROM {}", self.select_columns(), self.table);
        self.query_many(&sql, &[])
    }

    /// Undrained core shared by every whole-row, multi-row query. Callers
    /// are responsible for having already called `drain()`.
    fn query_many(&self, sql: &str, args: &[Value]) -> Vec<Arc<F::Model>> {
        let Some(mut rs) = self.io.query(sql, args) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while rs.next() {
            let row = rs.current_row();
            if let Some(model) = self.decode(&row) {
                out.push(self.cache_or_insert(model.uuid(), model));
            }
        }
        out
    }

    /// Undrained core shared by every whole-row, single-row query.
    fn query_one(&self, predicate: &str, args: &[Value]) -> Option<Arc<F::Model>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            self.select_columns(),
            self.table,
            predicate
        );
        let mut rs = self.io.query(&*sql, args)?;
        if !rs.next() {
            return None;
        }
        let row = rs.current_row();
        let model = self.decode(&row)?;
        Some(self.cache_or_insert(model.uuid(), model))
    }

    /// `anyModel(predicate, args)`: the first row matching `predicate`, or
    /// `None`. `predicate` is a raw `WHERE`-clause tail, e.g. `"title = ?"`.
    pub fn any_model(&self, predicate: &str, args: &[Value]) -> Option<Arc<F::Model>> {
        self.drain();
        self.query_one(predicate, args)
    }

    /// `modelUuids(predicate, args)`: just the UUIDs, skipping decode.
    pub fn model_uuids(&self, predicate: &str, args: &[Value]) -> Vec<Uuid> {
        self.drain();
        let sql = format!("SELECT uuid FROM {} WHERE {}", self.table, predicate);
        let Some(mut rs) = self.io.query(&*sql, args) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while rs.next() {
            if let Some(text) = rs.text(0) {
                if let Ok(uuid) = text.parse() {
                    out.push(uuid);
                }
            }
        }
        out
    }

    /// Same query as [`Entity::model_uuids`], kept as a distinct entry
    /// point because callers sometimes hold the identity as a bare numeric
    /// rowid rather than a parsed `Uuid` (e.g. diagnostics tooling); rows
    /// whose uuid column fails to parse are silently skipped rather than
    /// treated as an error, unlike `model_uuids`.
    pub fn model_uuids_numeric(&self, predicate: &str, args: &[Value]) -> Vec<i64> {
        self.drain();
        let sql = format!("SELECT rowid FROM {} WHERE {}", self.table, predicate);
        let Some(mut rs) = self.io.query(&*sql, args) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while rs.next() {
            if let Some(id) = rs.int64(0) {
                out.push(id);
            }
        }
        out
    }

    /// `countOfModels(predicate, args)`.
    pub fn count_of_models(&self, predicate: &str, args: &[Value]) -> i64 {
        self.drain();
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", self.table, predicate);
        self.io
            .query(&*sql, args)
            .and_then(|mut rs| {
                rs.next();
                rs.int64(0)
            })
            .unwrap_or(0)
    }

    /// `modelExists(predicate, args)`.
    pub fn model_exists(&self, predicate: &str, args: &[Value]) -> bool {
        self.drain();
        let sql = format!("SELECT 1 FROM {} WHERE {} LIMIT 1", self.table, predicate);
        self.io.query(&*sql, args).map(|mut rs| rs.next()).unwrap_or(false)
    }

    /// `select(distinct, column, predicate, args)`: a single-column
    /// projection, optionally deduplicated, rather than a whole-row fetch.
    pub fn select(&self, distinct: bool, column: &str, predicate: &str, args: &[Value]) -> Vec<Value> {
        self.drain();
        let sql = format!(
            "SELECT {}{} FROM {} WHERE {}",
            if distinct { "DISTINCT " } else { "" },
            column,
            self.table,
            predicate
        );
        let Some(mut rs) = self.io.query(&*sql, args) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while rs.next() {
            out.push(rs.numeric(0).unwrap_or(Value::Null));
        }
        out
    }

    // ---- writes -------------------------------------------------------------

    /// Construct, cache, and enqueue the INSERT for a brand-new model.
    pub fn persist(&self) -> Arc<F::Model> {
        let now = Utc::now();
        let meta = ModelMeta::new(Uuid::new_v4(), now);
        let uuid = meta.uuid();
        let model = Arc::new(self.factory.new_model(meta));
        model.meta().set_persisted(true);

        let mut args = vec![
            Value::Text(uuid.to_string()),
            Value::Timestamp(now),
            Value::Timestamp(now),
        ];
        args.extend(self.factory.encode_columns(&model));

        let mut columns = "uuid, created, modified".to_string();
        let mut marks = "?, ?, ?".to_string();
        for col in &self.columns {
            columns.push_str(", ");
            columns.push_str(col.name);
            marks.push_str(", ?");
        }
        let sql = format!("INSERT INTO {} ({}) VALUES ({})", self.table, columns, marks);

        self.queue.enqueue_sql(sql, args);
        self.cache_or_insert(uuid, model)
    }

    /// Enqueue an UPDATE reflecting the model's current in-memory values,
    /// bumping `modified`.
    pub fn update(&self, model: &Arc<F::Model>) {
        let now = Utc::now();
        model.meta().touch_modified(now);

        let mut set_clause = "modified = ?".to_string();
        let mut args = vec![Value::Timestamp(now)];
        for col in &self.columns {
            set_clause.push_str(&format!(", {} = ?", col.name));
        }
        args.extend(self.factory.encode_columns(model));
        args.push(Value::Text(model.uuid().to_string()));

        let sql = format!("UPDATE {} SET {} WHERE uuid = ?", self.table, set_clause);
        self.queue.enqueue_sql(sql, args);
    }

    /// Mark deleted, drop from the cache, enqueue the DELETE.
    pub fn delete(&self, model: &Arc<F::Model>) {
        model.meta().set_deleted(true);
        self.cache.write().remove(&model.uuid());
        let sql = format!("DELETE FROM {} WHERE uuid = ?", self.table);
        self.queue
            .enqueue_sql(sql, vec![Value::Text(model.uuid().to_string())]);
    }

    /// `write(sql, args)`: enqueue an arbitrary statement against this
    /// entity's table (bulk updates, column backfills).
    pub fn write(&self, sql: impl Into<String>, args: Vec<Value>) {
        self.queue.enqueue_sql(sql, args);
    }

    // ---- cache policy -------------------------------------------------------

    /// Clock-style sweep (§4.E): an entry not touched (`usedRecently`)
    /// since the last sweep is evicted; survivors have the bit cleared so
    /// the *next* sweep evicts them unless they're looked up again
    /// meanwhile.
    pub fn flush(&self) {
        let mut cache = self.cache.write();
        cache.retain(|_, entry| entry.model.meta().used_recently());
        for entry in cache.values() {
            entry.model.meta().set_used_recently(false);
        }
    }

    /// Explicit eviction of one model by uuid, regardless of recency.
    pub fn uncache(&self, uuid: Uuid) {
        self.cache.write().remove(&uuid);
    }

    /// Explicit eviction of the entire cache, regardless of recency.
    pub fn uncache_all(&self) {
        self.cache.write().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }
}
