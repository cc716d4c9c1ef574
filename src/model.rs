//! Component E (part 1) — the base attributes every persisted model carries.
//!
//! A model never constructs itself into persistence; it is always produced
//! by its owning [`Entity`](crate::entity::Entity)'s [`ModelFactory`],
//! either freshly (via `new_model`) or decoded from a row (`decode_row`).
//! That construction discipline is what stands in for the source's
//! "back-reference to owning entity, orphaned if none" invariant: there is
//! no public way to build a model that isn't already entity-owned, so the
//! orphan case can't arise. See DESIGN.md.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// Mutable bookkeeping shared by every model: identity, timestamps, and the
/// cache/persistence flags the entity layer flips as a model moves through
/// its lifecycle.
pub struct ModelMeta {
    uuid: Uuid,
    created: DateTime<Utc>,
    modified: Mutex<DateTime<Utc>>,
    is_persisted: AtomicBool,
    is_deleted: AtomicBool,
    used_recently: AtomicBool,
    notify_on_change: AtomicBool,
}

impl ModelMeta {
    pub fn new(uuid: Uuid, created: DateTime<Utc>) -> Self {
        ModelMeta {
            uuid,
            created,
            modified: Mutex::new(created),
            is_persisted: AtomicBool::new(false),
            is_deleted: AtomicBool::new(false),
            used_recently: AtomicBool::new(true),
            notify_on_change: AtomicBool::new(false),
        }
    }

    pub fn from_row(uuid: Uuid, created: DateTime<Utc>, modified: DateTime<Utc>) -> Self {
        ModelMeta {
            uuid,
            created,
            modified: Mutex::new(modified),
            is_persisted: AtomicBool::new(true),
            is_deleted: AtomicBool::new(false),
            used_recently: AtomicBool::new(true),
            notify_on_change: AtomicBool::new(false),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn modified(&self) -> DateTime<Utc> {
        *self.modified.lock()
    }

    pub(crate) fn touch_modified(&self, at: DateTime<Utc>) {
        *self.modified.lock() = at;
    }

    pub fn is_persisted(&self) -> bool {
        self.is_persisted.load(Ordering::Acquire)
    }

    pub(crate) fn set_persisted(&self, v: bool) {
        self.is_persisted.store(v, Ordering::Release);
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted.load(Ordering::Acquire)
    }

    pub(crate) fn set_deleted(&self, v: bool) {
        self.is_deleted.store(v, Ordering::Release);
    }

    /// Clock-style eviction bit: cleared by the cache sweep, set again by
    /// any lookup that hits this entry (§5 "identity-map eviction").
    pub fn used_recently(&self) -> bool {
        self.used_recently.load(Ordering::Relaxed)
    }

    pub(crate) fn set_used_recently(&self, v: bool) {
        self.used_recently.store(v, Ordering::Relaxed);
    }

    pub fn notify_on_change(&self) -> bool {
        self.notify_on_change.load(Ordering::Relaxed)
    }

    pub fn set_notify_on_change(&self, v: bool) {
        self.notify_on_change.store(v, Ordering::Relaxed);
    }
}

/// Implemented by every concrete model type (`Job`, `Counter`, ...).
pub trait Model: Send + Sync {
    fn meta(&self) -> &ModelMeta;

    fn uuid(&self) -> Uuid {
        self.meta().uuid()
    }

    fn created(&self) -> DateTime<Utc> {
        self.meta().created()
    }

    fn modified(&self) -> DateTime<Utc> {
        self.meta().modified()
    }

    fn is_persisted(&self) -> bool {
        self.meta().is_persisted()
    }

    fn is_deleted(&self) -> bool {
        self.meta().is_deleted()
    }
}
