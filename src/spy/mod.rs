//! Generic interception primitives.
//!
//! Four interceptors share one shape: capture the original members, install
//! instrumented replacements that record and forward, and hand back a
//! [`SpyHandle`] that puts the captured originals back.
//!
//! - [`spy_on_methods`]: named functions on an object.
//! - [`spy_on_read_only_properties`] / [`spy_on_properties`]: named accessors.
//! - [`spy_on_whole_object`]: a constructor, its statics, its prototype's
//!   methods and accessors, and its binding in a scope object.

use std::fmt;
use std::rc::Rc;

use crate::notify::Notifier;
use crate::realm::Realm;
use crate::record::LogStore;

pub mod methods;
pub mod object;
pub mod properties;

pub use methods::{spy_on_methods, MethodLog};
pub use object::{spy_on_whole_object, ObjectSpec};
pub use properties::{own_descriptors, spy_on_properties, spy_on_read_only_properties, Descriptors};

/// What to do when a configured member is missing from the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Fail before touching the target.
    Required,
    /// Warn and skip that member.
    Optional,
}

/// Everything a hook needs at call time: the realm to forward through, the
/// sink to notify and the store to record into.
pub struct SpyContext<R: Realm> {
    pub realm: R,
    pub notifier: Rc<dyn Notifier<R::Value>>,
    pub store: LogStore<R::Value>,
}

impl<R: Realm> Clone for SpyContext<R> {
    fn clone(&self) -> Self {
        Self {
            realm: self.realm.clone(),
            notifier: Rc::clone(&self.notifier),
            store: self.store.clone(),
        }
    }
}

impl<R: Realm> SpyContext<R> {
    pub fn new(realm: R, notifier: Rc<dyn Notifier<R::Value>>, store: LogStore<R::Value>) -> Self {
        Self {
            realm,
            notifier,
            store,
        }
    }
}

/// Restores what one interceptor replaced.
///
/// `restore` consumes the handle, so a spy is undone at most once. Dropping
/// a handle without restoring leaves the spy installed.
#[must_use = "dropping a SpyHandle leaves the spy installed"]
pub struct SpyHandle {
    label: String,
    restore: Box<dyn FnOnce()>,
}

impl SpyHandle {
    pub(crate) fn new(label: impl Into<String>, restore: impl FnOnce() + 'static) -> Self {
        Self {
            label: label.into(),
            restore: Box::new(restore),
        }
    }

    /// What this handle restores, for logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn restore(self) {
        log::debug!("Restoring {}", self.label);
        (self.restore)();
    }
}

impl fmt::Debug for SpyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpyHandle").field("label", &self.label).finish()
    }
}

/// Undo already-installed spies, newest first, after a later step failed.
pub(crate) fn roll_back(installed: Vec<SpyHandle>) {
    for handle in installed.into_iter().rev() {
        handle.restore();
    }
}
