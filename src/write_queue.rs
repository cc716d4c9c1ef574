//! Component D — the background write queue and its drain barrier.
//!
//! A single worker thread drains a FIFO of write operations against one
//! `IoHandle`, so callers get fire-and-forget writes without contending on
//! the database lock themselves. `wait_for_outstanding_operations` is the
//! coherency barrier a synchronous read needs: it must block until every
//! write enqueued *before* the call has actually run, without blocking
//! enqueuers that show up *during* the wait indefinitely.
//!
//! The protocol (§4.D): under an `add` mutex, swap the queue's enqueue path
//! from direct-to-channel to an intercept buffer; send a marker down the
//! real channel while still holding `add`; release `add` and wait for the
//! worker to signal it reached the marker (which, because the channel is
//! FIFO, means every operation enqueued before the swap has run); then,
//! under `add` again, flush the intercept buffer into the real channel in
//! order and restore direct enqueueing. A second `wait` mutex serializes
//! concurrent drainers so their marker sends can't interleave.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;

use crate::io_handle::IoHandle;
use crate::value::Value;

pub(crate) trait Operation: Send {
    fn run(self: Box<Self>, handle: &IoHandle);
}

struct SqlOperation {
    sql: String,
    args: Vec<Value>,
}

impl Operation for SqlOperation {
    fn run(self: Box<Self>, handle: &IoHandle) {
        handle.update(&*self.sql, &self.args);
    }
}

struct CommitOperation {
    renew: bool,
}

impl Operation for CommitOperation {
    fn run(self: Box<Self>, handle: &IoHandle) {
        handle.commit(self.renew);
    }
}

enum QueueItem {
    Op(Box<dyn Operation>),
    /// Sent through the real channel while draining; signals `done` once
    /// the worker reaches it, which — by FIFO order — means every prior
    /// item has been run.
    Marker(Sender<()>),
}

enum EnqueueMode {
    Direct,
    /// Installed while a drain is in progress; operations land here
    /// instead of the real channel and are flushed back in order once the
    /// drain's marker has been observed.
    Intercepting(Vec<Box<dyn Operation>>),
}

/// FIFO background write queue bound to one [`IoHandle`].
pub struct WriteQueue {
    // `None` after `shutdown()`; dropping the last sender is what ends the
    // worker thread's `for item in receiver` loop.
    sender: Mutex<Option<Sender<QueueItem>>>,
    add_mutex: Mutex<EnqueueMode>,
    wait_mutex: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteQueue {
    pub(crate) fn spawn(handle: Arc<IoHandle>) -> Arc<Self> {
        let (sender, receiver) = unbounded::<QueueItem>();
        let worker = std::thread::spawn(move || {
            for item in receiver {
                match item {
                    QueueItem::Op(op) => op.run(&handle),
                    QueueItem::Marker(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Arc::new(WriteQueue {
            sender: Mutex::new(Some(sender)),
            add_mutex: Mutex::new(EnqueueMode::Direct),
            wait_mutex: Mutex::new(()),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, item: QueueItem) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(item);
        }
    }

    fn enqueue(&self, op: Box<dyn Operation>) {
        let mut mode = self.add_mutex.lock();
        match &mut *mode {
            EnqueueMode::Direct => self.send(QueueItem::Op(op)),
            EnqueueMode::Intercepting(buffered) => buffered.push(op),
        }
    }

    /// Enqueue a parameterized write, run asynchronously on the worker
    /// thread against the owning handle.
    pub fn enqueue_sql(&self, sql: impl Into<String>, args: Vec<Value>) {
        self.enqueue(Box::new(SqlOperation {
            sql: sql.into(),
            args,
        }));
    }

    /// Enqueue a background commit (`backgroundCommit`, §4.A), optionally
    /// reopening a transaction immediately after.
    pub fn enqueue_commit(&self, renew: bool) {
        self.enqueue(Box::new(CommitOperation { renew }));
    }

    /// Block until every operation enqueued before this call has run.
    pub fn wait_for_outstanding_operations(&self) {
        let _serialize = self.wait_mutex.lock();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        {
            let mut mode = self.add_mutex.lock();
            *mode = EnqueueMode::Intercepting(Vec::new());
            // Sent while still holding `add_mutex`: no producer can race a
            // direct enqueue between the mode swap and this send.
            self.send(QueueItem::Marker(done_tx));
        }

        let _ = done_rx.recv();

        let mut mode = self.add_mutex.lock();
        if let EnqueueMode::Intercepting(buffered) =
            std::mem::replace(&mut *mode, EnqueueMode::Direct)
        {
            for op in buffered {
                self.send(QueueItem::Op(op));
            }
        }
    }

    /// Drain, then stop the worker thread. Called from `Engine::close`.
    pub(crate) fn shutdown(&self) {
        self.wait_for_outstanding_operations();
        // Dropping the last `Sender` ends the worker's `for item in
        // receiver` loop, which lets the subsequent join return.
        self.sender.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}
