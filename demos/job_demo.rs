//! Demonstrates the full open → persist → query → update → close cycle
//! against a `Job` entity: a title, a min/max range, and the three reserved
//! columns every entity gets for free.

use std::sync::Arc;

use quicksilver::entity::{Column, ColumnType, ModelFactory};
use quicksilver::model::{Model, ModelMeta};
use quicksilver::result_set::Row;
use quicksilver::value::Value;
use quicksilver::{Engine, IoHandleConfig};

pub struct Job {
    meta: ModelMeta,
    title: String,
    min: i64,
    max: i64,
}

impl Model for Job {
    fn meta(&self) -> &ModelMeta {
        &self.meta
    }
}

impl Job {
    pub fn title(&self) -> &str {
        &self.title
    }
}

struct JobFactory;

impl ModelFactory for JobFactory {
    type Model = Job;

    fn decode_row(&self, meta: ModelMeta, row: &Row) -> Job {
        Job {
            meta,
            title: row.text("title").unwrap_or_default(),
            min: row.int64("min").unwrap_or(0),
            max: row.int64("max").unwrap_or(0),
        }
    }

    fn encode_columns(&self, model: &Job) -> Vec<Value> {
        vec![
            Value::Text(model.title.clone()),
            Value::Integer(model.min),
            Value::Integer(model.max),
        ]
    }

    fn new_model(&self, meta: ModelMeta) -> Job {
        Job {
            meta,
            title: String::new(),
            min: 0,
            max: 0,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let dir = tempfile::tempdir()?;
    let engine = Engine::open(dir.path().join("jobs.db"), IoHandleConfig::default())?;

    let jobs = engine.entity(
        "jobs",
        vec![
            Column::new("title", ColumnType::Varchar),
            Column::new("min", ColumnType::Integer),
            Column::new("max", ColumnType::Integer),
        ],
        JobFactory,
    )?;
    jobs.create_index(&["title"], None);

    let job = jobs.persist();
    jobs.write(
        "UPDATE jobs SET title = ?, min = ?, max = ? WHERE uuid = ?",
        vec![
            Value::Text("build".into()),
            Value::Integer(1),
            Value::Integer(10),
            Value::Text(job.uuid().to_string()),
        ],
    );

    engine.write_queue().wait_for_outstanding_operations();

    let reloaded = jobs.model_with(job.uuid());
    log::info!("reloaded job title = {:?}", reloaded.as_ref().map(|j| j.title()));

    let all: Vec<Arc<Job>> = jobs.models();
    log::info!("{} job(s) in table", all.len());

    let next_id = engine.counters().next_model_id("jobs");
    log::info!("next job id from the shared counter: {next_id}");

    engine.close();
    Ok(())
}
