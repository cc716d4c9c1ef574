//! The top-level handle a client opens: owns the [`IoHandle`], the
//! background [`WriteQueue`], and the built-in [`CounterEntity`].
//!
//! `Entity`s hold their own `Arc<IoHandle>`/`Arc<WriteQueue>` clones rather
//! than a back-reference to the `Engine` that created them, since the
//! `CounterEntity` has to exist before `Engine` itself does (it's built
//! partway through `Engine::open`). Entities defined by client code at
//! arbitrary call sites (see `demos/job_demo.rs`) follow the same shape for
//! consistency, via `Engine::entity`.

use std::sync::Arc;

use crate::config::IoHandleConfig;
use crate::counter::CounterEntity;
use crate::entity::{Column, Entity, ModelFactory};
use crate::error::Result;
use crate::io_handle::IoHandle;
use crate::write_queue::WriteQueue;
use std::path::Path;

pub struct Engine {
    pub(crate) io: Arc<IoHandle>,
    pub(crate) queue: Arc<WriteQueue>,
    counters: CounterEntity,
}

impl Engine {
    /// Open the database, apply the write-side pragmas, start the
    /// background write-queue worker, and — unless read-only — set
    /// `synchronicity = normal` and open the initial transaction (§10.7).
    pub fn open(path: impl AsRef<Path>, config: IoHandleConfig) -> Result<Arc<Engine>> {
        let read_only = config.read_only;
        let io = Arc::new(IoHandle::open(path, config)?);
        let queue = WriteQueue::spawn(Arc::clone(&io));

        if !read_only {
            io.set_synchronicity(crate::config::Synchronicity::Normal);
            io.begin_transaction(false);
        }

        let counters = CounterEntity::new(Arc::clone(&io), Arc::clone(&queue))?;

        Ok(Arc::new(Engine { io, queue, counters }))
    }

    pub fn io(&self) -> &IoHandle {
        self.io.as_ref()
    }

    pub fn write_queue(&self) -> &WriteQueue {
        self.queue.as_ref()
    }

    pub fn counters(&self) -> &CounterEntity {
        &self.counters
    }

    /// Register (or re-open) a table-backed entity, creating its schema if
    /// necessary.
    pub fn entity<F: ModelFactory>(
        &self,
        table: impl Into<String>,
        columns: Vec<Column>,
        factory: F,
    ) -> Result<Entity<F>> {
        Entity::new(Arc::clone(&self.io), Arc::clone(&self.queue), table, columns, factory)
    }

    /// Finish outstanding background writes, commit, finalize statements,
    /// and close the connection.
    pub fn close(&self) -> bool {
        self.queue.shutdown();
        self.io.close()
    }
}
