//! The built-in per-table counter, provided by the engine at construction.
//!
//! Backed by a `counters` table keyed by the reserved uuid column like any
//! other entity, with one extra `tableName`/`counter` pair per tracked
//! table. The source's `setTable` bound the wrong column when creating a
//! fresh row for a never-before-seen table name (it wrote the new value
//! into `tableName` instead of `counter`); this implementation binds both
//! columns correctly rather than reproduce that bug (SPEC_FULL.md §9).

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::entity::{Column, ColumnType, Entity, ModelFactory};
use crate::io_handle::IoHandle;
use crate::model::{Model, ModelMeta};
use crate::result_set::Row;
use crate::value::Value;
use crate::write_queue::WriteQueue;

pub struct CounterModel {
    meta: ModelMeta,
    table_name: String,
    counter: i64,
}

impl Model for CounterModel {
    fn meta(&self) -> &ModelMeta {
        &self.meta
    }
}

impl CounterModel {
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn counter(&self) -> i64 {
        self.counter
    }
}

struct CounterFactory;

impl ModelFactory for CounterFactory {
    type Model = CounterModel;

    fn decode_row(&self, meta: ModelMeta, row: &Row) -> CounterModel {
        CounterModel {
            meta,
            table_name: row.text("tableName").unwrap_or_default(),
            counter: row.int64("counter").unwrap_or(0),
        }
    }

    fn encode_columns(&self, model: &CounterModel) -> Vec<Value> {
        vec![
            Value::Text(model.table_name.clone()),
            Value::Integer(model.counter),
        ]
    }

    fn new_model(&self, meta: ModelMeta) -> CounterModel {
        CounterModel {
            meta,
            table_name: String::new(),
            counter: 0,
        }
    }
}

/// Monotonic per-table-name id allocator: `nextModelId("jobs")` returns
/// `1, 2, 3, ...` across the life of the database, serialized so two
/// threads racing to create the first counter row for the same table name
/// can't both win.
///
/// The authoritative count is kept in-memory (`cached`), not re-read from
/// the database on every call: the database write goes through the
/// background queue, so a query-after-enqueue race would otherwise let two
/// back-to-back calls both observe the pre-increment value and hand out
/// the same id.
pub struct CounterEntity {
    entity: Entity<CounterFactory>,
    cached: parking_lot::Mutex<std::collections::HashMap<String, i64>>,
}

impl CounterEntity {
    pub(crate) fn new(io: Arc<IoHandle>, queue: Arc<WriteQueue>) -> crate::error::Result<Self> {
        let entity = Entity::new(
            io,
            queue,
            "counters",
            vec![
                Column::new("tableName", ColumnType::Varchar),
                Column::new("counter", ColumnType::Integer),
            ],
            CounterFactory,
        )?;
        Ok(CounterEntity {
            entity,
            cached: parking_lot::Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// Load `table`'s current counter from the database, or `0` if it has
    /// never been used. Only consulted the first time a table name is seen
    /// this process — after that, `cached` is authoritative.
    fn load_from_db(&self, table: &str) -> i64 {
        self.entity
            .any_model("tableName = ?", &[Value::Text(table.to_string())])
            .map(|row| row.counter())
            .unwrap_or(0)
    }

    /// Allocate and persist the next id for `table`, creating its counter
    /// row on first use.
    pub fn next_model_id(&self, table: &str) -> i64 {
        let mut cached = self.cached.lock();
        let current = match cached.get(table) {
            Some(v) => *v,
            None => self.load_from_db(table),
        };
        let next = current + 1;
        cached.insert(table.to_string(), next);
        self.persist_locked(table, next, current == 0);
        next
    }

    /// Force the counter for `table` so the *next* `next_model_id` call
    /// returns exactly `value`: the stored counter is `value - 1`, since
    /// `next_model_id` always hands out `current + 1`.
    pub fn set_next_model_id(&self, table: &str, value: i64) {
        let mut cached = self.cached.lock();
        let existed = cached.contains_key(table) || self.load_from_db(table) != 0;
        let stored = value - 1;
        cached.insert(table.to_string(), stored);
        self.persist_locked(table, stored, !existed);
    }

    fn persist_locked(&self, table: &str, value: i64, is_new_row: bool) {
        let now = Utc::now();
        if is_new_row {
            let meta = ModelMeta::new(Uuid::new_v4(), now);
            self.entity.write(
                format!(
                    "INSERT INTO {} (uuid, created, modified, tableName, counter) VALUES (?, ?, ?, ?, ?)",
                    self.entity.table()
                ),
                vec![
                    Value::Text(meta.uuid().to_string()),
                    Value::Timestamp(now),
                    Value::Timestamp(now),
                    Value::Text(table.to_string()),
                    Value::Integer(value),
                ],
            );
        } else {
            self.entity.write(
                format!(
                    "UPDATE {} SET modified = ?, counter = ? WHERE tableName = ?",
                    self.entity.table()
                ),
                vec![
                    Value::Timestamp(now),
                    Value::Integer(value),
                    Value::Text(table.to_string()),
                ],
            );
        }
    }
}
