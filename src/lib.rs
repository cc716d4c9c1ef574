//! # QuickSilver
//!
//! A lightweight ORM over an embedded SQLite database: identity-map
//! caching per table, a background write queue with a read-after-write
//! coherency barrier, and explicit transaction/synchronicity control.
//!
//! [`Engine`] is the entry point — it owns the database connection and the
//! write queue. Per-table access goes through [`Entity`](entity::Entity),
//! which you get from `Engine::entity` after implementing
//! [`ModelFactory`](entity::ModelFactory) for your model type. See
//! `demos/job_demo.rs` for a complete example.

#![warn(clippy::all)]

pub mod config;
pub mod counter;
pub mod engine;
pub mod entity;
pub mod error;
pub mod io_handle;
pub mod model;
pub mod prepared_statement;
pub mod result_set;
pub mod value;
pub mod write_queue;

pub use config::{IoHandleConfig, Synchronicity};
pub use engine::Engine;
pub use entity::{Column, ColumnOption, ColumnType, Entity, ModelFactory};
pub use error::{Error, Result};
pub use io_handle::IoHandle;
pub use model::{Model, ModelMeta};
pub use prepared_statement::PreparedStatement;
pub use result_set::{ResultSet, Row};
pub use value::{OrderedValue, Value};
pub use write_queue::WriteQueue;
