use std::sync::Arc;

use quicksilver::entity::{Column, ColumnType, ModelFactory};
use quicksilver::model::{Model, ModelMeta};
use quicksilver::result_set::Row;
use quicksilver::value::Value;
use quicksilver::{Engine, IoHandleConfig};

struct Job {
    meta: ModelMeta,
    title: String,
    priority: i64,
}

impl Model for Job {
    fn meta(&self) -> &ModelMeta {
        &self.meta
    }
}

struct JobFactory;

impl ModelFactory for JobFactory {
    type Model = Job;

    fn decode_row(&self, meta: ModelMeta, row: &Row) -> Job {
        Job {
            meta,
            title: row.text("title").unwrap_or_default(),
            priority: row.int64("priority").unwrap_or(0),
        }
    }

    fn encode_columns(&self, model: &Job) -> Vec<Value> {
        vec![Value::Text(model.title.clone()), Value::Integer(model.priority)]
    }

    fn new_model(&self, meta: ModelMeta) -> Job {
        Job {
            meta,
            title: String::new(),
            priority: 0,
        }
    }
}

fn open_engine() -> (tempfile::TempDir, Arc<Engine>) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path().join("jobs.db"), IoHandleConfig::default()).unwrap();
    (dir, engine)
}

#[test]
fn persist_then_drain_then_query_sees_the_row() {
    let (_dir, engine) = open_engine();
    let jobs = engine
        .entity(
            "jobs",
            vec![
                Column::new("title", ColumnType::Varchar),
                Column::new("priority", ColumnType::Integer),
            ],
            JobFactory,
        )
        .unwrap();

    let job = jobs.persist();
    jobs.write(
        "UPDATE jobs SET title = ?, priority = ? WHERE uuid = ?",
        vec![
            Value::Text("build".into()),
            Value::Integer(5),
            Value::Text(job.uuid().to_string()),
        ],
    );

    engine.write_queue().wait_for_outstanding_operations();

    let rows = jobs.models();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "build");
    assert_eq!(rows[0].priority, 5);
}

#[test]
fn cache_returns_the_same_instance_by_uuid() {
    let (_dir, engine) = open_engine();
    let jobs = engine
        .entity(
            "jobs",
            vec![
                Column::new("title", ColumnType::Varchar),
                Column::new("priority", ColumnType::Integer),
            ],
            JobFactory,
        )
        .unwrap();

    let job = jobs.persist();
    let again = jobs.model_with(job.uuid()).unwrap();
    assert!(Arc::ptr_eq(&job, &again));
}

#[test]
fn update_enqueues_and_bumps_modified() {
    let (_dir, engine) = open_engine();
    let jobs = engine
        .entity(
            "jobs",
            vec![
                Column::new("title", ColumnType::Varchar),
                Column::new("priority", ColumnType::Integer),
            ],
            JobFactory,
        )
        .unwrap();

    let job = jobs.persist();
    engine.write_queue().wait_for_outstanding_operations();
    let created_modified = job.modified();

    std::thread::sleep(std::time::Duration::from_millis(5));
    jobs.update(&job);
    assert!(job.modified() >= created_modified);

    engine.write_queue().wait_for_outstanding_operations();
    assert_eq!(jobs.count_of_models("uuid = ?", &[Value::Text(job.uuid().to_string())]), 1);
}

#[test]
fn delete_removes_from_cache_and_database() {
    let (_dir, engine) = open_engine();
    let jobs = engine
        .entity(
            "jobs",
            vec![
                Column::new("title", ColumnType::Varchar),
                Column::new("priority", ColumnType::Integer),
            ],
            JobFactory,
        )
        .unwrap();

    let job = jobs.persist();
    engine.write_queue().wait_for_outstanding_operations();

    jobs.delete(&job);
    engine.write_queue().wait_for_outstanding_operations();

    assert!(job.is_deleted());
    assert_eq!(jobs.cache_len(), 0);
    assert_eq!(jobs.count_of_models("1 = 1", &[]), 0);
}

#[test]
fn create_index_is_idempotent() {
    let (_dir, engine) = open_engine();
    let jobs = engine
        .entity(
            "jobs",
            vec![Column::new("title", ColumnType::Varchar), Column::new("priority", ColumnType::Integer)],
            JobFactory,
        )
        .unwrap();

    assert!(jobs.create_index(&["title"], Some("idx_jobs_title")));
    assert!(jobs.create_index(&["title"], Some("idx_jobs_title")));
}
